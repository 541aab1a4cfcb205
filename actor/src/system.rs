// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type. The `ActorSystem` type is the responsible for
//! creating and managing actors. Its `SystemRef` is the context object shared by every component
//! of one node: node identity, id allocator, address registry and actor-type factory table.
//!

use crate::{
    Actor, ActorAddr, ActorId, ActorRef, Error, Handler, Interface, NodeId,
    address::IdGenerator,
    handle::ActorHandle,
    mailbox::Payload,
    registry::Registry,
    runner::ActorRunner,
};

use futures::{FutureExt, future::BoxFuture};

use serde::de::DeserializeOwned;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::{collections::HashMap, sync::Arc};

/// Constructor of a named actor type: decodes its arguments and spawns the actor.
type Factory = Arc<
    dyn Fn(SystemRef, Payload) -> BoxFuture<'static, Result<(ActorHandle, Interface), Error>>
        + Send
        + Sync,
>;

pub struct ActorSystem {}

impl ActorSystem {
    /// Creates a new actor system (a node) bound to `token`. Cancelling the token stops every
    /// actor and then the system runner.
    pub fn create(token: CancellationToken) -> (SystemRef, SystemRunner) {
        let (event_sender, event_receiver) = mpsc::channel(100);
        let system = SystemRef::new(event_sender, token);
        let runner = SystemRunner::new(event_receiver);
        (system, runner)
    }
}

#[derive(Debug, Clone)]
pub enum SystemEvent {
    StopSystem,
}

#[derive(Clone)]
pub struct SystemRef {
    node: NodeId,

    ids: Arc<IdGenerator>,

    registry: Registry,

    factories: Arc<RwLock<HashMap<String, Factory>>>,

    token: CancellationToken,
}

impl SystemRef {
    pub fn new(
        event_sender: mpsc::Sender<SystemEvent>,
        token: CancellationToken,
    ) -> Self {
        let registry = Registry::default();
        let registry_clone = registry.clone();
        let token_clone = token.clone();

        tokio::spawn(async move {
            token_clone.cancelled().await;
            debug!("Stopping actor system...");
            for handle in registry_clone.handles().await {
                if let Err(err) = handle.ask_stop().await {
                    error!("Failed to stop actor {}: {}", handle.addr(), err);
                }
            }

            let _ = event_sender.send(SystemEvent::StopSystem).await;
        });

        let node = NodeId::generate();
        debug!("Actor system {} created.", node);
        SystemRef {
            node,
            ids: Arc::new(IdGenerator::new()),
            registry,
            factories: Arc::new(RwLock::new(HashMap::new())),
            token,
        }
    }

    /// Identity of this node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawns a new local actor and waits until it started.
    pub async fn spawn<A>(&self, actor: A) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        let addr = ActorAddr::new(self.node, self.ids.next());
        let (mut runner, actor_ref) = ActorRunner::create(addr, actor);
        self.registry
            .register_local(addr.id(), actor_ref.handle())
            .await?;

        let (sender, receiver) = oneshot::channel::<bool>();
        let system = self.clone();
        tokio::spawn(async move {
            runner.init(system, Some(sender)).await;
        });

        if receiver.await.map_err(|e| Error::Start(e.to_string()))? {
            debug!("Actor {} spawned.", addr);
            Ok(actor_ref)
        } else {
            Err(Error::Start(format!("Runner can not init {}", addr)))
        }
    }

    /// Registers a constructor under a type name, for [`SystemRef::spawn_named`] and remote
    /// spawn requests.
    pub async fn add_actor_type<A, Args, F>(&self, name: &str, constructor: F)
    where
        A: Actor + Handler<A>,
        Args: DeserializeOwned + Send + 'static,
        F: Fn(Args) -> A + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |system: SystemRef, args: Payload| {
            let actor = args.decode::<Args>().map(&constructor);
            async move {
                let actor_ref = system.spawn(actor?).await?;
                Ok((actor_ref.handle(), A::interface()))
            }
            .boxed()
        });
        let mut factories = self.factories.write().await;
        factories.insert(name.to_owned(), factory);
    }

    /// Spawns an actor from its registered type name.
    pub async fn spawn_named(
        &self,
        name: &str,
        args: Payload,
    ) -> Result<(ActorHandle, Interface), Error> {
        let factory = {
            let factories = self.factories.read().await;
            factories.get(name).cloned()
        };
        match factory {
            Some(factory) => factory(self.clone(), args).await,
            None => {
                debug!("Actor type '{}' is not registered.", name);
                Err(Error::TypeNotFound(name.to_owned()))
            }
        }
    }

    /// Live handle of a local actor. `None` for other nodes or terminated actors.
    pub async fn lookup(&self, addr: &ActorAddr) -> Option<ActorHandle> {
        if !addr.is_local_to(&self.node) {
            return None;
        }
        self.registry.lookup(addr.id()).await
    }

    pub(crate) async fn lookup_id(&self, id: ActorId) -> Option<ActorHandle> {
        self.registry.lookup(id).await
    }

    pub(crate) async fn unregister(&self, addr: &ActorAddr) {
        self.registry.unregister(addr.id()).await;
    }

    /// Number of live local actors.
    pub async fn actor_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn stop_system(&self) {
        self.token.cancel();
    }
}

pub struct SystemRunner {
    event_receiver: mpsc::Receiver<SystemEvent>,
}

impl SystemRunner {
    pub(crate) fn new(event_receiver: mpsc::Receiver<SystemEvent>) -> Self {
        Self { event_receiver }
    }

    pub async fn run(&mut self) {
        debug!("Running actor system...");
        if let Some(SystemEvent::StopSystem) = self.event_receiver.recv().await {
            debug!("Actor system stopped.");
        }
    }
}

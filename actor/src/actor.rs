// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait and the `ActorRef` type. The `Actor` trait is the
//! main trait that actors must implement. The `ActorRef` type is a reference to a local actor that
//! can be used to send messages to him with static typing; every `ActorRef` can be turned into a
//! location-transparent [`ActorHandle`].
//!

use crate::{
    ActorAddr, Error, Interface,
    handle::{ActorCell, ActorHandle, Interest},
    mailbox::{Envelope, Priority},
    system::SystemRef,
};

use async_trait::async_trait;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use tracing::debug;

use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
    sync::Arc,
};

/// Why an actor terminated.
///
/// Carried by exit messages (links) and down messages (monitors), locally and across the wire.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Regular termination. Never propagates through links.
    Normal,
    /// Stopped on request.
    UserShutdown,
    /// Forced termination. Cannot be trapped.
    Kill,
    /// Terminated after receiving a message it could not handle.
    Unhandled,
    /// The connection to the node hosting the actor was lost; its real state is unknown.
    ConnectionLost,
    /// The actor was already gone when interest in it was registered.
    Unknown,
    /// Behavior-defined failure.
    Error(String),
}

impl ExitReason {
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::UserShutdown => write!(f, "user_shutdown"),
            ExitReason::Kill => write!(f, "kill"),
            ExitReason::Unhandled => write!(f, "unhandled"),
            ExitReason::ConnectionLost => write!(f, "connection_lost"),
            ExitReason::Unknown => write!(f, "unknown"),
            ExitReason::Error(error) => write!(f, "error: {}", error),
        }
    }
}

/// Actor lifecycle states driven by the runner.
///
/// `Created` -> `Started` -> `Stopped` -> `Terminated`, or `Created` -> `Failed` ->
/// `Terminated` when `pre_start` fails.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorLifecycle {
    /// The actor has been created but not yet started.
    Created,
    /// The actor is processing messages.
    Started,
    /// The actor left its message loop; `post_stop` is pending.
    Stopped,
    /// The actor failed to start.
    Failed,
    /// The actor is unregistered and its watchers notified.
    Terminated,
}

/// Execution context of an actor.
///
/// Passed to every hook and handler. Gives access to the actor system and to the operations
/// an actor performs on itself: linking, monitoring, sending exit messages and quitting.
pub struct ActorContext<A: Actor + Handler<A>> {
    cell: Arc<ActorCell>,
    system: SystemRef,
    exit: Option<ExitReason>,
    _phantom_actor: PhantomData<A>,
}

impl<A> ActorContext<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(cell: Arc<ActorCell>, system: SystemRef) -> Self {
        Self {
            cell,
            system,
            exit: None,
            _phantom_actor: PhantomData,
        }
    }

    /// Typed reference to this actor.
    pub fn reference(&self) -> ActorRef<A> {
        ActorRef::new(self.cell.clone())
    }

    /// Location-transparent handle to this actor.
    pub fn handle(&self) -> ActorHandle {
        ActorHandle::Local(self.cell.clone())
    }

    pub fn addr(&self) -> ActorAddr {
        self.cell.addr()
    }

    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Terminates the actor with `reason` once the current message is processed.
    /// The first reason given wins.
    pub fn quit(&mut self, reason: ExitReason) {
        if self.exit.is_none() {
            debug!("Actor {} quits: {}.", self.addr(), reason);
            self.exit = Some(reason);
        }
    }

    pub(crate) fn exit_reason(&self) -> Option<&ExitReason> {
        self.exit.as_ref()
    }

    fn interest_refused(&self, target: &ActorHandle, interest: Interest) {
        let envelope = match interest {
            Interest::Link => {
                Envelope::exit(Some(target.addr()), ExitReason::Unknown)
            }
            Interest::Monitor => {
                Envelope::down(target.addr(), ExitReason::Unknown)
            }
        };
        let _ = self.cell.enqueue(envelope);
    }

    /// Links this actor with `target`. When either side terminates, the other receives an exit
    /// message with its reason.
    pub fn link_to(&mut self, target: &ActorHandle) -> Result<(), Error> {
        let me = self.addr();
        if target.addr() == me {
            return Ok(());
        }
        if target.attach(me.id(), Interest::Link).is_some() {
            self.interest_refused(target, Interest::Link);
            return Ok(());
        }
        match target {
            ActorHandle::Local(cell) => {
                self.cell.attach(cell.addr().id(), Interest::Link);
                Ok(())
            }
            ActorHandle::Proxy(proxy) => {
                self.cell.hold(target.clone());
                proxy.forwarder().link(&self.handle(), &proxy.addr(), true)
            }
        }
    }

    pub fn unlink_from(&mut self, target: &ActorHandle) -> Result<(), Error> {
        let me = self.addr();
        target.detach(me.id(), Interest::Link);
        match target {
            ActorHandle::Local(cell) => {
                self.cell.detach(cell.addr().id(), Interest::Link);
                Ok(())
            }
            ActorHandle::Proxy(proxy) => {
                self.cell.release_hold(&proxy.addr());
                proxy.forwarder().link(&self.handle(), &proxy.addr(), false)
            }
        }
    }

    /// Monitors `target`. This actor receives a down message when it terminates.
    pub fn monitor(&mut self, target: &ActorHandle) {
        if target.attach(self.addr().id(), Interest::Monitor).is_some() {
            self.interest_refused(target, Interest::Monitor);
        } else if !target.is_local() {
            self.cell.hold(target.clone());
        }
    }

    pub fn demonitor(&mut self, target: &ActorHandle) {
        target.detach(self.addr().id(), Interest::Monitor);
        if !target.is_local() {
            self.cell.release_hold(&target.addr());
        }
    }

    /// Sends an exit message to `target` on behalf of this actor.
    pub fn send_exit(
        &self,
        target: &ActorHandle,
        reason: ExitReason,
    ) -> Result<(), Error> {
        target.send_exit(Some(self.addr()), reason)
    }

    /// Sends a message to `target` with this actor as sender.
    pub async fn tell<M>(
        &self,
        target: &ActorHandle,
        message: M,
    ) -> Result<(), Error>
    where
        M: Message,
    {
        let payload = crate::Payload::encode(&message)?;
        target.enqueue(Envelope::message(
            Some(self.handle()),
            Priority::Normal,
            payload,
            None,
        ))
    }

    /// Sends a request to `target` with this actor as sender and waits for the response.
    pub async fn ask<M, R>(
        &self,
        target: &ActorHandle,
        message: M,
    ) -> Result<R, Error>
    where
        M: Message,
        R: Response,
    {
        target.request(Some(self.handle()), &message).await
    }
}

/// The `Actor` trait is the main trait that actors must implement.
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler<Self> {
    /// The message type accepted by this actor. An enum is the set of accepted shapes.
    type Message: Message;

    /// The response type returned to requests.
    type Response: Response;

    /// Messaging interface advertised by this actor.
    fn interface() -> Interface {
        Interface::Dynamic
    }

    /// If true, exit messages (except `Kill`) are handed to [`Handler::on_exit`] instead of
    /// terminating the actor.
    fn trap_exit() -> bool {
        false
    }

    /// Called before the actor starts processing messages.
    async fn pre_start(
        &mut self,
        _context: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called when the actor is asked to stop.
    async fn pre_stop(
        &mut self,
        _context: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called after the actor left its message loop.
    async fn post_stop(
        &mut self,
        _context: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Defines the type of value an actor can receive.
pub trait Message:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
}

/// Defines the type of value an actor can respond with.
pub trait Response: Serialize + DeserializeOwned + Send + Sync + 'static {}

macro_rules! impl_message_response {
    ($($ty:ty),*) => {
        $(
            impl Message for $ty {}
            impl Response for $ty {}
        )*
    };
}

impl_message_response!((), bool, i32, i64, u32, u64, String);

impl<T: Message> Message for Vec<T> {}
impl<T: Response> Response for Vec<T> {}
impl<T: Message, U: Message> Message for (T, U) {}
impl<T: Response, U: Response> Response for (T, U) {}
impl<T: Response> Response for Option<T> {}

/// Message handler of an actor.
#[async_trait]
pub trait Handler<A: Actor + Handler<A>>: Send + Sync {
    /// Handles a message. `sender` is `None` for anonymous messages.
    async fn handle_message(
        &mut self,
        sender: Option<ActorHandle>,
        msg: A::Message,
        ctx: &mut ActorContext<A>,
    ) -> Result<A::Response, Error>;

    /// Called for exit messages when the actor traps exits.
    async fn on_exit(
        &mut self,
        _from: Option<ActorAddr>,
        _reason: ExitReason,
        _ctx: &mut ActorContext<A>,
    ) {
    }

    /// Called when a monitored actor terminated.
    async fn on_down(
        &mut self,
        _from: ActorAddr,
        _reason: ExitReason,
        _ctx: &mut ActorContext<A>,
    ) {
    }
}

/// Typed reference to a local actor.
pub struct ActorRef<A>
where
    A: Actor + Handler<A>,
{
    cell: Arc<ActorCell>,
    _phantom_actor: PhantomData<A>,
}

impl<A> ActorRef<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(cell: Arc<ActorCell>) -> Self {
        Self {
            cell,
            _phantom_actor: PhantomData,
        }
    }

    /// Location-transparent handle to the same actor.
    pub fn handle(&self) -> ActorHandle {
        ActorHandle::Local(self.cell.clone())
    }

    pub fn addr(&self) -> ActorAddr {
        self.cell.addr()
    }

    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        debug!("Telling message to actor {}.", self.addr());
        self.handle().tell(message).await
    }

    pub async fn tell_with_priority(
        &self,
        message: A::Message,
        priority: Priority,
    ) -> Result<(), Error> {
        self.handle().tell_with_priority(message, priority).await
    }

    pub async fn ask(&self, message: A::Message) -> Result<A::Response, Error> {
        debug!("Asking message to actor {}.", self.addr());
        self.handle().ask(message).await
    }

    /// Stops the actor and waits until it terminated.
    pub async fn ask_stop(&self) -> Result<(), Error> {
        debug!("Stopping actor {}.", self.addr());
        self.cell.ask_stop().await
    }

    pub async fn tell_stop(&self) {
        debug!("Stopping actor {}.", self.addr());
        self.cell.tell_stop().await
    }

    /// Resolves with the exit reason once the actor terminated.
    pub async fn wait_for(&self) -> ExitReason {
        self.cell.wait_for().await
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.cell.exit_reason()
    }

    /// True if the actor's mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.cell.is_closed()
    }
}

impl<A> Clone for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn clone(&self) -> Self {
        Self::new(self.cell.clone())
    }
}

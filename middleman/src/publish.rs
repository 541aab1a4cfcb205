// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Publish / connect
//!
//! Publishing binds a fresh TCP listener for one local actor. A remote node connects to that
//! port, performs the handshake and asks which actor is published there; the answer (identity and
//! interface) is resolved into a proxy on the asking side.
//!
//! A port can also be opened with no actor behind it, for nodes that only serve remote spawns.
//!

use crate::{connection::Connection, frame::Frame, middleman::Middleman};

use actor::{ActorAddr, ActorHandle, Error, Interface, NodeId, Protocol, TypedHandle};

use tokio::{net::TcpListener, select};
use tokio_util::sync::CancellationToken;

use tracing::{debug, warn};

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

struct Publication {
    /// `None` for a port opened without an actor.
    handle: Option<ActorHandle>,
    listener: CancellationToken,
}

impl Publication {
    fn is_of(&self, addr: &ActorAddr) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.addr() == *addr)
            .unwrap_or(false)
    }
}

#[derive(Default)]
struct Table {
    ports: HashMap<u16, Publication>,
    /// Actors carrying the exit hook that closes their ports.
    hooked: HashSet<ActorAddr>,
}

/// Port to published actor table of a node.
#[derive(Clone, Default)]
pub(crate) struct Publications {
    table: Arc<Mutex<Table>>,
}

impl Publications {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the listener of `port`. True if the published actor still needs its exit hook.
    fn insert(
        &self,
        port: u16,
        handle: Option<ActorHandle>,
        listener: CancellationToken,
    ) -> bool {
        let mut table = self.table();
        let hook = match &handle {
            Some(handle) => table.hooked.insert(handle.addr()),
            None => false,
        };
        table.ports.insert(port, Publication { handle, listener });
        hook
    }

    /// Removes the entry at `port` and stops its listener.
    fn remove(&self, port: u16) -> Option<Option<ActorHandle>> {
        let publication = self.table().ports.remove(&port)?;
        publication.listener.cancel();
        Some(publication.handle)
    }

    /// Like [`Publications::remove`], only if `addr` is the actor published at `port`.
    fn remove_actor(&self, port: u16, addr: &ActorAddr) -> bool {
        let mut table = self.table();
        let published = table
            .ports
            .get(&port)
            .map(|publication| publication.is_of(addr))
            .unwrap_or(false);
        if published {
            if let Some(publication) = table.ports.remove(&port) {
                publication.listener.cancel();
            }
        }
        published
    }

    /// The actor `addr` terminated: every port it is published at is closed.
    fn remove_all(&self, addr: &ActorAddr) -> Vec<u16> {
        let mut table = self.table();
        table.hooked.remove(addr);
        let ports: Vec<u16> = table
            .ports
            .iter()
            .filter(|(_, publication)| publication.is_of(addr))
            .map(|(port, _)| *port)
            .collect();
        for port in &ports {
            if let Some(publication) = table.ports.remove(port) {
                publication.listener.cancel();
            }
        }
        ports
    }

    /// Live actor published at `port`, with its interface.
    pub(crate) fn lookup(&self, port: u16) -> Result<(ActorHandle, Interface), Error> {
        let table = self.table();
        match table.ports.get(&port).and_then(|publication| publication.handle.as_ref()) {
            Some(handle) if handle.exit_reason().is_none() => {
                Ok((handle.clone(), handle.interface().unwrap_or_default()))
            }
            _ => Err(Error::Resolution(format!("port {}", port))),
        }
    }

    /// Ports with a published actor.
    pub(crate) fn ports(&self) -> Vec<u16> {
        self.table()
            .ports
            .iter()
            .filter(|(_, publication)| publication.handle.is_some())
            .map(|(port, _)| *port)
            .collect()
    }

    pub(crate) fn clear(&self) {
        let publications: Vec<Publication> = {
            let mut table = self.table();
            table.hooked.clear();
            table.ports.drain().map(|(_, publication)| publication).collect()
        };
        for publication in publications {
            publication.listener.cancel();
        }
    }
}

impl Middleman {
    /// Publishes a local actor on `port` (0 for any free port) and returns the bound port.
    ///
    /// Every call binds its own listener: publishing an actor twice yields two ports. The
    /// publication disappears when the actor terminates.
    pub async fn publish(&self, handle: &ActorHandle, port: u16) -> Result<u16, Error> {
        let ActorHandle::Local(cell) = handle else {
            return Err(Error::Functional(format!(
                "only local actors can be published, {} is remote",
                handle.addr()
            )));
        };
        if handle.exit_reason().is_some() {
            return Err(Error::Terminated(handle.addr()));
        }

        let (listener, bound) = self.bind(port).await?;
        let token = self.token.child_token();
        if self.publications.insert(bound, Some(handle.clone()), token.clone()) {
            let publications = self.publications.clone();
            cell.attach_hook(Box::new(move |addr, _| {
                for port in publications.remove_all(addr) {
                    debug!("Actor {} terminated, port {} closed.", addr, port);
                }
            }));
        }
        self.serve(listener, bound, token);

        debug!("Actor {} published on port {}.", handle.addr(), bound);
        Ok(bound)
    }

    /// Accepts connections on `port` (0 for any free port) without publishing an actor there,
    /// and returns the bound port. Lookups on it fail; remote spawn requests are served.
    pub async fn open(&self, port: u16) -> Result<u16, Error> {
        let (listener, bound) = self.bind(port).await?;
        let token = self.token.child_token();
        self.publications.insert(bound, None, token.clone());
        self.serve(listener, bound, token);
        debug!("Port {} opened.", bound);
        Ok(bound)
    }

    async fn bind(&self, port: u16) -> Result<(TcpListener, u16), Error> {
        let host = self.config.bind_host.as_str();
        let listener = TcpListener::bind((host, port)).await.map_err(|error| {
            Error::Connection(format!("cannot bind {}:{}: {}", host, port, error))
        })?;
        let bound = listener
            .local_addr()
            .map_err(|error| Error::Connection(error.to_string()))?
            .port();
        Ok((listener, bound))
    }

    /// Accept loop of `listener`, until `token` is cancelled.
    fn serve(&self, listener: TcpListener, port: u16, token: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {} on port {}.", peer, port);
                            let this = this.clone();
                            tokio::spawn(async move {
                                if let Err(error) = this.accept(stream).await {
                                    warn!("Rejected connection from {}: {}", peer, error);
                                }
                            });
                        }
                        Err(error) => {
                            warn!("Failed to accept on port {}: {}", port, error);
                        }
                    }
                }
            }
            debug!("Listener on port {} stopped.", port);
        });
    }

    /// Removes the publication of `handle` at `port`. Proxies already resolved stay valid.
    pub fn unpublish(&self, handle: &ActorHandle, port: u16) -> Result<(), Error> {
        if self.publications.remove_actor(port, &handle.addr()) {
            debug!("Actor {} unpublished from port {}.", handle.addr(), port);
            Ok(())
        } else {
            Err(Error::Resolution(format!(
                "actor {} is not published at port {}",
                handle.addr(),
                port
            )))
        }
    }

    /// Stops the listener at `port`, opened or publishing an actor.
    pub fn close(&self, port: u16) -> Result<(), Error> {
        match self.publications.remove(port) {
            Some(Some(handle)) => {
                debug!("Port {} of actor {} closed.", port, handle.addr());
                Ok(())
            }
            Some(None) => {
                debug!("Port {} closed.", port);
                Ok(())
            }
            None => Err(Error::Resolution(format!("port {}", port))),
        }
    }

    /// Ports currently published by this node.
    pub fn published_ports(&self) -> Vec<u16> {
        self.publications.ports()
    }

    /// Connects to the node listening at `host:port` and returns its identity.
    pub async fn connect(&self, host: &str, port: u16) -> Result<NodeId, Error> {
        match self.connection_to(host, port).await? {
            Some(connection) => Ok(connection.peer()),
            None => Ok(self.node()),
        }
    }

    /// Resolves the actor published at `host:port`.
    ///
    /// Resolving the same endpoint again yields the same proxy. On the own node the published
    /// local handle itself is returned.
    pub async fn remote_actor(&self, host: &str, port: u16) -> Result<ActorHandle, Error> {
        self.lookup_remote(host, port, &Interface::Dynamic).await
    }

    /// Resolves the actor published at `host:port`, requiring the interface of `P`.
    pub async fn remote_actor_typed<P: Protocol>(
        &self,
        host: &str,
        port: u16,
    ) -> Result<TypedHandle<P>, Error> {
        let handle = self.lookup_remote(host, port, &P::interface()).await?;
        Ok(handle.typed())
    }

    async fn lookup_remote(
        &self,
        host: &str,
        port: u16,
        expected: &Interface,
    ) -> Result<ActorHandle, Error> {
        let Some(connection) = self.connection_to(host, port).await? else {
            let (handle, interface) = self.publications.lookup(port)?;
            interface.check(expected)?;
            return Ok(handle);
        };
        let (addr, interface) = connection
            .request(|token| Frame::LookupRequest { token, port })
            .await?;
        interface.check(expected)?;
        self.resolve(addr, &connection).await
    }

    /// Answers a lookup request of the peer.
    pub(crate) fn serve_lookup(&self, connection: &Arc<Connection>, token: u64, port: u16) {
        let result = self.publications.lookup(port).map(|(handle, interface)| {
            connection.export(&handle);
            (handle.addr(), interface)
        });
        if let Err(error) = &result {
            debug!("Lookup of port {} from {} failed: {}", port, connection.peer(), error);
        }
        if connection
            .send(Frame::LookupResponse { token, result })
            .is_err()
        {
            debug!("Connection to {} closed before lookup response.", connection.peer());
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use actor::{Actor, ActorContext, ActorSystem, Handler};

    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl Actor for Idle {
        type Message = ();
        type Response = ();
    }

    #[async_trait]
    impl Handler<Idle> for Idle {
        async fn handle_message(
            &mut self,
            _sender: Option<ActorHandle>,
            _msg: (),
            _ctx: &mut ActorContext<Idle>,
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_one_exit_hook_per_actor() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let idle = system.spawn(Idle).await.unwrap().handle();
        let publications = Publications::default();

        assert!(publications.insert(10, Some(idle.clone()), CancellationToken::new()));
        assert!(!publications.insert(11, Some(idle.clone()), CancellationToken::new()));
        assert!(publications.remove_actor(10, &idle.addr()));
        assert!(!publications.insert(12, Some(idle.clone()), CancellationToken::new()));
        assert!(!publications.insert(13, None, CancellationToken::new()));

        let mut closed = publications.remove_all(&idle.addr());
        closed.sort();
        assert_eq!(closed, vec![11, 12]);
        assert!(publications.ports().is_empty());
        assert!(matches!(publications.lookup(13), Err(Error::Resolution(_))));
        assert_eq!(publications.remove(13), Some(None));

        // The hook is gone with the actor's ports: a new one is needed.
        assert!(publications.insert(14, Some(idle), CancellationToken::new()));
    }
}

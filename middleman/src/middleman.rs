// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Middleman
//!
//! Per-node component that owns the connections to peer nodes. Each connection runs a writer task
//! draining its outbound queue and a reader task dispatching incoming frames; when the reader
//! stops, every proxy bound to the connection terminates with `ConnectionLost`.
//!

use crate::{
    config::MiddlemanConfig,
    connection::{Connection, write_loop},
    frame::{Frame, PROTOCOL_VERSION, framed, read_frame, write_frame},
    proxies::ProxyManager,
    publish::Publications,
};

use actor::{ActorAddr, ActorHandle, Error, ExitReason, NodeId, SystemRef};

use futures::{Stream, StreamExt};

use bytes::BytesMut;

use tokio::{
    net::TcpStream,
    select,
    sync::Mutex,
    time::timeout,
};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};

use tracing::{debug, warn};

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Connects the actor system of this node to the actor systems of other nodes.
#[derive(Clone)]
pub struct Middleman {
    pub(crate) system: SystemRef,
    pub(crate) config: MiddlemanConfig,
    pub(crate) proxies: ProxyManager,
    pub(crate) publications: Publications,
    connections: Arc<Mutex<HashMap<NodeId, Arc<Connection>>>>,
    endpoints: Arc<Mutex<HashMap<(String, u16), NodeId>>>,
    next_connection: Arc<AtomicU64>,
    pub(crate) token: CancellationToken,
}

impl Middleman {
    /// Creates the middleman of `system`. It shuts down with the system.
    pub fn new(system: SystemRef, config: MiddlemanConfig) -> Self {
        let token = system.token().child_token();
        Self {
            system,
            config,
            proxies: ProxyManager::default(),
            publications: Publications::default(),
            connections: Arc::new(Mutex::new(HashMap::new())),
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            next_connection: Arc::new(AtomicU64::new(1)),
            token,
        }
    }

    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    pub fn config(&self) -> &MiddlemanConfig {
        &self.config
    }

    /// Identity of this node.
    pub fn node(&self) -> NodeId {
        self.system.node()
    }

    /// Nodes with an open connection.
    pub async fn connected_nodes(&self) -> Vec<NodeId> {
        let connections = self.connections.lock().await;
        connections
            .iter()
            .filter(|(_, connection)| !connection.is_closed())
            .map(|(node, _)| *node)
            .collect()
    }

    /// Number of live proxies of remote actors.
    pub async fn proxy_count(&self) -> usize {
        self.proxies.count().await
    }

    /// Open connection to `node`, if any.
    pub(crate) async fn connection_of(&self, node: NodeId) -> Option<Arc<Connection>> {
        let connections = self.connections.lock().await;
        connections
            .get(&node)
            .filter(|connection| !connection.is_closed())
            .cloned()
    }

    /// Connection to the node listening at `host:port`, dialing it if needed.
    /// `None` when that node is this node.
    pub(crate) async fn connection_to(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Option<Arc<Connection>>, Error> {
        let endpoint = (host.to_owned(), port);
        let known = self.endpoints.lock().await.get(&endpoint).copied();
        if let Some(node) = known {
            if node == self.node() {
                return Ok(None);
            }
            if let Some(connection) = self.connection_of(node).await {
                return Ok(Some(connection));
            }
        }

        let dial = async {
            let stream = TcpStream::connect((host, port)).await.map_err(|error| {
                Error::Connection(format!("cannot connect to {}:{}: {}", host, port, error))
            })?;
            let mut transport = framed(stream, self.config.max_frame_length);
            let peer = handshake(&mut transport, self.node()).await?;
            Ok::<_, Error>((peer, transport))
        };
        let (peer, transport) = timeout(self.config.connect_timeout, dial)
            .await
            .map_err(|_| {
                Error::Connection(format!("connection to {}:{} timed out", host, port))
            })??;

        self.endpoints.lock().await.insert(endpoint, peer);
        if peer == self.node() {
            debug!("{}:{} is this node.", host, port);
            return Ok(None);
        }
        debug!("Connected to {} at {}:{}.", peer, host, port);
        Ok(Some(self.install(peer, transport, true).await))
    }

    /// Serves a connection accepted by a listener.
    pub(crate) async fn accept(&self, stream: TcpStream) -> Result<(), Error> {
        let mut transport = framed(stream, self.config.max_frame_length);
        let peer = timeout(
            self.config.connect_timeout,
            handshake(&mut transport, self.node()),
        )
        .await
        .map_err(|_| Error::Connection("handshake timed out".to_owned()))??;
        if peer == self.node() {
            debug!("Dropping connection from this node.");
            return Ok(());
        }
        self.install(peer, transport, false).await;
        Ok(())
    }

    /// Starts the reader and writer tasks of a handshaken transport.
    ///
    /// A dialed duplicate of an open connection is dropped in favor of the existing one. An
    /// accepted duplicate is served but the first connection stays the one used for new
    /// requests.
    async fn install(&self, peer: NodeId, transport: Transport, dialed: bool) -> Arc<Connection> {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (connection, outbound) = Connection::new(
            id,
            peer,
            dialed,
            self.config.close_idle,
            self.config.request_timeout,
            self.token.child_token(),
        );
        {
            let mut connections = self.connections.lock().await;
            match connections.get(&peer) {
                Some(existing) if !existing.is_closed() => {
                    if dialed {
                        debug!("Already connected to {}.", peer);
                        return existing.clone();
                    }
                    debug!("Second connection from {} accepted.", peer);
                }
                _ => {
                    connections.insert(peer, connection.clone());
                }
            }
        }

        let (sink, stream) = transport.split();
        tokio::spawn(write_loop(sink, outbound, connection.token().clone()));
        let this = self.clone();
        let reader = connection.clone();
        tokio::spawn(async move {
            this.read_loop(stream, reader).await;
        });
        debug!("Connection {} to {} installed.", id, peer);
        connection
    }

    async fn read_loop<S>(&self, mut stream: S, connection: Arc<Connection>)
    where
        S: Stream<Item = Result<BytesMut, std::io::Error>> + Unpin,
    {
        loop {
            let frame = select! {
                _ = connection.token().cancelled() => break,
                frame = read_frame(&mut stream) => frame,
            };
            match frame {
                Ok(Some(frame)) => self.dispatch(frame, &connection).await,
                Ok(None) => {
                    debug!("Connection to {} closed by peer.", connection.peer());
                    break;
                }
                Err(error) => {
                    warn!("Connection to {} failed: {}", connection.peer(), error);
                    break;
                }
            }
        }
        self.connection_lost(&connection).await;
    }

    async fn dispatch(&self, frame: Frame, connection: &Arc<Connection>) {
        match frame {
            Frame::Hello { .. } => {
                warn!("Unexpected hello from {}.", connection.peer());
            }
            Frame::LookupRequest { token, port } => {
                self.serve_lookup(connection, token, port);
            }
            Frame::LookupResponse { token, result } => {
                connection.resolve(token, result);
            }
            Frame::SpawnResponse { token, result } => {
                connection.resolve_spawn(token, result);
            }
            Frame::SpawnRequest {
                token,
                type_name,
                args,
                expected,
            } => {
                let this = self.clone();
                let connection = connection.clone();
                tokio::spawn(async move {
                    this.serve_spawn(&connection, token, type_name, args, expected)
                        .await;
                });
            }
            Frame::Message {
                token,
                sender,
                dest,
                priority,
                payload,
            } => {
                self.deliver_message(connection, token, sender, dest, priority, payload)
                    .await;
            }
            Frame::Response { token, result } => {
                connection.reply(token, result);
            }
            Frame::Exit {
                sender,
                dest,
                reason,
            } => {
                self.deliver_exit(sender, dest, reason).await;
            }
            Frame::Link { sender, dest } => {
                self.establish_link(connection, sender, dest).await;
            }
            Frame::Unlink { sender, dest } => {
                self.remove_link(sender, dest).await;
            }
            Frame::Down { actor, reason } => {
                debug!("Remote actor {} down: {}", actor, reason);
                self.proxies
                    .notify_remote_down(&actor, reason, &self.system)
                    .await;
            }
        }
    }

    /// Handle of `addr` as seen from this node: the local actor itself, or a proxy bound to
    /// `connection`. Actors of third nodes are not resolved.
    pub(crate) async fn resolve(
        &self,
        addr: ActorAddr,
        connection: &Arc<Connection>,
    ) -> Result<ActorHandle, Error> {
        if addr.node() == self.node() {
            return self
                .system
                .lookup(&addr)
                .await
                .ok_or(Error::Terminated(addr));
        }
        if addr.node() != connection.peer() {
            debug!("Not resolving {} through {}.", addr, connection.peer());
            return Err(Error::Resolution(format!(
                "{} is not reachable through {}",
                addr,
                connection.peer()
            )));
        }
        let proxy = self.proxies.get_or_create(addr, connection).await?;
        Ok(ActorHandle::Proxy(proxy))
    }

    /// Tears down a connection: pending requests fail and its proxies terminate with
    /// `ConnectionLost`.
    pub(crate) async fn connection_lost(&self, connection: &Arc<Connection>) {
        connection.close();
        {
            let mut connections = self.connections.lock().await;
            let current = connections
                .get(&connection.peer())
                .map(|existing| Arc::ptr_eq(existing, connection))
                .unwrap_or(false);
            if current {
                connections.remove(&connection.peer());
            }
        }
        let proxies = self.proxies.detach_connection(connection.id()).await;
        debug!(
            "Connection to {} lost, {} proxies down.",
            connection.peer(),
            proxies.len()
        );
        for proxy in proxies {
            proxy
                .terminate(ExitReason::ConnectionLost, &self.system)
                .await;
        }
    }

    /// Closes the connection to `node`. Returns false when there was none.
    pub async fn disconnect(&self, node: NodeId) -> bool {
        let connection = self.connections.lock().await.get(&node).cloned();
        match connection {
            Some(connection) => {
                self.connection_lost(&connection).await;
                true
            }
            None => false,
        }
    }

    /// Closes every listener and connection of this node.
    pub async fn shutdown(&self) {
        debug!("Middleman of {} shutting down.", self.node());
        self.token.cancel();
        self.publications.clear();
        let connections: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .await
            .values()
            .cloned()
            .collect();
        for connection in connections {
            self.connection_lost(&connection).await;
        }
    }
}

/// Exchanges hello frames and returns the identity of the peer.
pub(crate) async fn handshake(
    transport: &mut Transport,
    node: NodeId,
) -> Result<NodeId, Error> {
    write_frame(
        transport,
        &Frame::Hello {
            version: PROTOCOL_VERSION,
            node,
        },
    )
    .await?;
    match read_frame(transport).await? {
        Some(Frame::Hello { version, node }) if version == PROTOCOL_VERSION => Ok(node),
        Some(Frame::Hello { version, .. }) => Err(Error::Connection(format!(
            "unsupported protocol version {}",
            version
        ))),
        Some(other) => Err(Error::Connection(format!(
            "unexpected {} frame during handshake",
            other.kind()
        ))),
        None => Err(Error::Connection(
            "connection closed during handshake".to_owned(),
        )),
    }
}

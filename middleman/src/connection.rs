// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Connections
//!
//! One [`Connection`] per peer node. It owns the outbound frame queue drained by the writer task,
//! the table of requests waiting for a response frame, and the set of local actors whose
//! identity was sent to the peer (exported) and whose termination must be reported to it.
//!
//! A connection is the [`Forwarder`] of every proxy it created.
//!

use crate::frame::{Frame, Resolved, write_frame};

use actor::{
    ActorAddr, ActorHandle, ActorId, Content, Envelope, Error, ExitReason,
    Forwarder, NodeId, Payload, Rsvp,
};

use bytes::Bytes;

use futures::{Sink, SinkExt};

use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

use tracing::{debug, warn};

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request waiting for its response frame.
enum Pending {
    /// Lookup or spawn.
    Resolve(oneshot::Sender<Resolved>),
    /// Message sent through a proxy by a caller waiting for the response.
    Reply(Rsvp),
}

/// Drops the replies whose caller stopped waiting, after a timeout for instance.
fn discard_abandoned(pending: &mut HashMap<u64, Pending>) {
    pending.retain(|_, entry| match entry {
        Pending::Resolve(_) => true,
        Pending::Reply(rsvp) => !rsvp.is_closed(),
    });
}

pub(crate) struct Connection {
    id: u64,
    peer: NodeId,
    me: Weak<Connection>,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Mutex<HashMap<u64, Pending>>,
    tokens: AtomicU64,
    exported: Mutex<HashSet<ActorId>>,
    proxies: AtomicUsize,
    /// Opened by this node, as opposed to accepted.
    dialed: bool,
    close_idle: bool,
    request_timeout: Option<Duration>,
    token: CancellationToken,
}

impl Connection {
    /// Creates a connection and the receiving end of its outbound queue.
    pub(crate) fn new(
        id: u64,
        peer: NodeId,
        dialed: bool,
        close_idle: bool,
        request_timeout: Option<Duration>,
        token: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let connection = Arc::new_cyclic(|me| Connection {
            id,
            peer,
            me: me.clone(),
            outbound,
            pending: Mutex::new(HashMap::new()),
            tokens: AtomicU64::new(1),
            exported: Mutex::new(HashSet::new()),
            proxies: AtomicUsize::new(0),
            dialed,
            close_idle,
            request_timeout,
            token,
        });
        (connection, receiver)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer(&self) -> NodeId {
        self.peer
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    fn closed_error(&self) -> Error {
        Error::RemoteDown(format!("connection to {} closed", self.peer))
    }

    /// Queues a frame for the writer task.
    pub(crate) fn send(&self, frame: Frame) -> Result<(), Error> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.outbound.send(frame).map_err(|_| self.closed_error())
    }

    fn next_token(&self) -> u64 {
        self.tokens.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends a lookup or spawn request built from a fresh correlation token and waits for the
    /// matching response.
    pub(crate) async fn request<F>(&self, build: F) -> Resolved
    where
        F: FnOnce(u64) -> Frame,
    {
        let token = self.next_token();
        let (sender, receiver) = oneshot::channel();
        lock(&self.pending).insert(token, Pending::Resolve(sender));
        if let Err(error) = self.send(build(token)) {
            lock(&self.pending).remove(&token);
            return Err(error);
        }

        let response = match self.request_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, receiver).await {
                    Ok(response) => response,
                    Err(_) => {
                        debug!("Request {} to {} timed out.", token, self.peer);
                        lock(&self.pending).remove(&token);
                        self.close_if_idle();
                        return Err(Error::Timeout);
                    }
                }
            }
            None => receiver.await,
        };
        response.map_err(|_| self.closed_error())?
    }

    /// Completes a lookup request.
    pub(crate) fn resolve(&self, token: u64, result: Resolved) {
        self.complete(token, result);
    }

    /// Completes a spawn request. An actor spawned for a caller that stopped waiting is killed.
    pub(crate) fn resolve_spawn(&self, token: u64, result: Resolved) {
        let spawned = result.as_ref().ok().map(|(addr, _)| *addr);
        if self.complete(token, result) {
            return;
        }
        if let Some(addr) = spawned {
            debug!("Actor {} was spawned for nobody, killing it.", addr);
            let _ = self.send(Frame::Exit {
                sender: None,
                dest: addr,
                reason: ExitReason::Kill,
            });
        }
    }

    /// Hands `result` to the request waiting on `token`. False if nobody was waiting.
    fn complete(&self, token: u64, result: Resolved) -> bool {
        let pending = lock(&self.pending).remove(&token);
        match pending {
            Some(Pending::Resolve(sender)) => sender.send(result).is_ok(),
            Some(Pending::Reply(rsvp)) => {
                warn!("Token {} from {} is not a lookup.", token, self.peer);
                let _ = rsvp.send(Err(Error::Functional(
                    "unexpected response kind".to_owned(),
                )));
                false
            }
            None => {
                debug!("Late response {} from {}.", token, self.peer);
                false
            }
        }
    }

    /// Completes a request sent through a proxy.
    pub(crate) fn reply(&self, token: u64, result: Result<Payload, Error>) {
        let pending = lock(&self.pending).remove(&token);
        match pending {
            Some(Pending::Reply(rsvp)) => {
                let _ = rsvp.send(result);
            }
            Some(Pending::Resolve(sender)) => {
                warn!("Token {} from {} is not a message.", token, self.peer);
                let _ = sender.send(Err(Error::Functional(
                    "unexpected response kind".to_owned(),
                )));
            }
            None => debug!("Late response {} from {}.", token, self.peer),
        }
        self.close_if_idle();
    }

    /// Closes the connection and fails every pending request.
    pub(crate) fn close(&self) {
        self.token.cancel();
        let pending: Vec<Pending> =
            lock(&self.pending).drain().map(|(_, pending)| pending).collect();
        for pending in pending {
            match pending {
                Pending::Resolve(sender) => {
                    let _ = sender.send(Err(self.closed_error()));
                }
                Pending::Reply(rsvp) => {
                    let _ = rsvp.send(Err(self.closed_error()));
                }
            }
        }
    }

    /// Makes a local actor known to the peer: its termination will be reported with a down
    /// frame.
    pub(crate) fn export(&self, handle: &ActorHandle) {
        let ActorHandle::Local(cell) = handle else {
            return;
        };
        let id = cell.addr().id();
        if !lock(&self.exported).insert(id) {
            return;
        }
        let me = self.me.clone();
        cell.attach_hook(Box::new(move |addr, reason| {
            if let Some(connection) = me.upgrade() {
                lock(&connection.exported).remove(&addr.id());
                let _ = connection.send(Frame::Down {
                    actor: *addr,
                    reason: reason.clone(),
                });
                connection.close_if_idle();
            }
        }));
    }

    /// Identity to put on the wire as sender of a message.
    ///
    /// Local senders are exported. Proxies of the peer itself are sent back as they are.
    /// Proxies of third nodes are not relayed: the message travels without a sender.
    fn wire_sender(&self, sender: Option<ActorHandle>) -> Option<ActorAddr> {
        let sender = sender?;
        if sender.is_local() {
            self.export(&sender);
            Some(sender.addr())
        } else if sender.addr().node() == self.peer {
            Some(sender.addr())
        } else {
            debug!("Not relaying third-party sender {}.", sender.addr());
            None
        }
    }

    /// One more proxy forwards through this connection.
    pub(crate) fn retain(&self) {
        self.proxies.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn proxy_count(&self) -> usize {
        self.proxies.load(Ordering::SeqCst)
    }

    fn close_if_idle(&self) {
        if !self.dialed || !self.close_idle || self.is_closed() {
            return;
        }
        let idle = self.proxy_count() == 0
            && {
                let mut pending = lock(&self.pending);
                discard_abandoned(&mut pending);
                pending.is_empty()
            }
            && lock(&self.exported).is_empty();
        if idle {
            debug!("Connection to {} is idle, closing.", self.peer);
            self.token.cancel();
        }
    }
}

impl Forwarder for Connection {
    fn forward(&self, dest: &ActorAddr, envelope: Envelope) -> Result<(), Error> {
        let Envelope {
            sender,
            priority,
            content,
        } = envelope;
        match content {
            Content::Message { payload, rsvp } => {
                let sender = self.wire_sender(sender);
                let Some(rsvp) = rsvp else {
                    return self.send(Frame::Message {
                        token: None,
                        sender,
                        dest: *dest,
                        priority,
                        payload,
                    });
                };
                let token = self.next_token();
                {
                    let mut pending = lock(&self.pending);
                    discard_abandoned(&mut pending);
                    pending.insert(token, Pending::Reply(rsvp));
                }
                let sent = self.send(Frame::Message {
                    token: Some(token),
                    sender,
                    dest: *dest,
                    priority,
                    payload,
                });
                if let Err(error) = sent {
                    lock(&self.pending).remove(&token);
                    return Err(error);
                }
                Ok(())
            }
            Content::Exit { from, reason } => self.send(Frame::Exit {
                sender: from,
                dest: *dest,
                reason,
            }),
            Content::Down { from, .. } => {
                debug!("Down of {} is never forwarded to {}.", from, dest);
                Ok(())
            }
        }
    }

    fn link(
        &self,
        from: &ActorHandle,
        dest: &ActorAddr,
        establish: bool,
    ) -> Result<(), Error> {
        let sender = from.addr();
        if establish {
            self.export(from);
            self.send(Frame::Link {
                sender,
                dest: *dest,
            })
        } else {
            self.send(Frame::Unlink {
                sender,
                dest: *dest,
            })
        }
    }

    fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    fn release(&self, dest: &ActorAddr) {
        debug!("Proxy {} released.", dest);
        let previous = self.proxies.fetch_sub(1, Ordering::SeqCst);
        if previous <= 1 {
            self.close_if_idle();
        }
    }
}

/// Writer task: drains the outbound queue into the transport until the connection is closed.
pub(crate) async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    token: CancellationToken,
) where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    loop {
        select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                if let Err(error) = write_frame(&mut sink, &frame).await {
                    warn!("Failed to write {} frame: {}", frame.kind(), error);
                    token.cancel();
                    break;
                }
            }
            _ = token.cancelled() => {
                while let Ok(frame) = outbound.try_recv() {
                    if write_frame(&mut sink, &frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

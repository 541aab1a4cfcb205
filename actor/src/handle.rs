// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor handles
//!
//! An [`ActorHandle`] is the location-transparent reference to an actor. A `Local` handle points
//! at the control block of an actor running in this node; a `Proxy` handle points at a local
//! stand-in for an actor living on another node, which forwards everything it receives through
//! the connection that created it.
//!
//! Both variants keep the bookkeeping needed by links and monitors: the set of local actors
//! watching them, and the exit reason once they are known to be terminated.
//!

use crate::{
    ActorAddr, ActorId, Error, Interface, Protocol,
    actor::{ExitReason, Message, Response},
    mailbox::{Envelope, MailboxSender, Payload, Priority},
    runner::StopSender,
    system::SystemRef,
};

use tokio::sync::{oneshot, watch};

use tracing::debug;

use std::{
    fmt::{Debug, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Kind of interest a watcher registered on an actor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interest {
    /// Bidirectional: the watcher receives an exit message.
    Link,
    /// Unidirectional: the watcher receives a down message.
    Monitor,
}

/// Callback run exactly once when an actor terminates.
pub type ExitHook = Box<dyn FnOnce(&ActorAddr, &ExitReason) + Send>;

/// Outbound side of a proxy: the connection that reaches the remote actor.
pub trait Forwarder: Send + Sync + 'static {
    /// Ships an envelope to the remote actor `dest`.
    fn forward(&self, dest: &ActorAddr, envelope: Envelope) -> Result<(), Error>;

    /// Establishes (or removes, if `establish` is false) a link between the local actor `from`
    /// and the remote actor `dest`.
    fn link(
        &self,
        from: &ActorHandle,
        dest: &ActorAddr,
        establish: bool,
    ) -> Result<(), Error>;

    /// The last handle of the proxy for `dest` was dropped.
    fn release(&self, dest: &ActorAddr);

    /// Deadline of a request sent through this forwarder. `None` waits for the response or
    /// the loss of the connection.
    fn request_timeout(&self) -> Option<Duration> {
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn add_watcher(
    watchers: &mut Vec<(ActorId, Interest)>,
    watcher: ActorId,
    interest: Interest,
) {
    if !watchers.contains(&(watcher, interest)) {
        watchers.push((watcher, interest));
    }
}

async fn wait_exit(
    exit: &watch::Sender<Option<ExitReason>>,
) -> ExitReason {
    let mut receiver = exit.subscribe();
    let reason = match receiver.wait_for(|reason| reason.is_some()).await {
        Ok(reason) => reason.clone(),
        Err(_) => None,
    };
    reason.unwrap_or(ExitReason::Unknown)
}

#[derive(Default)]
struct CellState {
    watchers: Vec<(ActorId, Interest)>,
    hooks: Vec<ExitHook>,
    holds: Vec<ActorHandle>,
    exit: Option<ExitReason>,
}

/// Control block of a local actor.
pub struct ActorCell {
    addr: ActorAddr,
    interface: Interface,
    mailbox: MailboxSender,
    stop: StopSender,
    state: Mutex<CellState>,
    exit: watch::Sender<Option<ExitReason>>,
}

impl ActorCell {
    pub(crate) fn new(
        addr: ActorAddr,
        interface: Interface,
        mailbox: MailboxSender,
        stop: StopSender,
    ) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            addr,
            interface,
            mailbox,
            stop,
            state: Mutex::new(CellState::default()),
            exit,
        }
    }

    pub fn addr(&self) -> ActorAddr {
        self.addr
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Registers `watcher`. Returns the exit reason instead if the actor already terminated.
    pub(crate) fn attach(
        &self,
        watcher: ActorId,
        interest: Interest,
    ) -> Option<ExitReason> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.exit {
            return Some(reason.clone());
        }
        add_watcher(&mut state.watchers, watcher, interest);
        None
    }

    pub(crate) fn detach(&self, watcher: ActorId, interest: Interest) {
        lock(&self.state)
            .watchers
            .retain(|entry| *entry != (watcher, interest));
    }

    /// Runs `hook` when the actor terminates, or right away if it already has.
    pub fn attach_hook(&self, hook: ExitHook) {
        let reason = {
            let mut state = lock(&self.state);
            match &state.exit {
                Some(reason) => reason.clone(),
                None => {
                    state.hooks.push(hook);
                    return;
                }
            }
        };
        hook(&self.addr, &reason);
    }

    /// Keeps `handle` alive while this actor watches it.
    pub fn hold(&self, handle: ActorHandle) {
        let mut state = lock(&self.state);
        if state.exit.is_none() {
            state.holds.push(handle);
        }
    }

    /// Drops one hold on `addr`.
    pub fn release_hold(&self, addr: &ActorAddr) {
        let released = {
            let mut state = lock(&self.state);
            state
                .holds
                .iter()
                .position(|held| held.addr() == *addr)
                .map(|index| state.holds.swap_remove(index))
        };
        drop(released);
    }

    /// Drops the holds on `addr` once it is known to be terminated.
    pub(crate) fn forget(&self, addr: &ActorAddr) {
        let released: Vec<ActorHandle> = {
            let mut state = lock(&self.state);
            let (released, kept) = std::mem::take(&mut state.holds)
                .into_iter()
                .partition(|held| {
                    held.addr() == *addr && held.exit_reason().is_some()
                });
            state.holds = kept;
            released
        };
        drop(released);
    }

    /// Marks the actor terminated. Returns the watchers and hooks to notify, or `None` if the
    /// actor was already terminated.
    pub(crate) fn close(
        &self,
        reason: &ExitReason,
    ) -> Option<(Vec<(ActorId, Interest)>, Vec<ExitHook>)> {
        let (watchers, hooks, holds) = {
            let mut state = lock(&self.state);
            if state.exit.is_some() {
                return None;
            }
            state.exit = Some(reason.clone());
            (
                std::mem::take(&mut state.watchers),
                std::mem::take(&mut state.hooks),
                std::mem::take(&mut state.holds),
            )
        };
        drop(holds);
        self.exit.send_replace(Some(reason.clone()));
        Some((watchers, hooks))
    }

    pub(crate) fn exit_reason(&self) -> Option<ExitReason> {
        lock(&self.state).exit.clone()
    }

    pub(crate) async fn wait_for(&self) -> ExitReason {
        wait_exit(&self.exit).await
    }

    pub(crate) fn enqueue(&self, envelope: Envelope) -> Result<(), Error> {
        if self.exit_reason().is_some() {
            debug!("Actor {} has terminated, dropping envelope.", self.addr);
            return Err(Error::Terminated(self.addr));
        }
        self.mailbox
            .send(envelope)
            .map_err(|_| Error::Terminated(self.addr))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Requests a graceful stop. Resolves once the actor terminated.
    pub(crate) async fn ask_stop(&self) -> Result<(), Error> {
        let (ack_sender, ack_receiver) = oneshot::channel();
        if self.stop.send(Some(ack_sender)).await.is_err() {
            Ok(())
        } else {
            ack_receiver
                .await
                .map_err(|error| Error::Send(error.to_string()))
        }
    }

    pub(crate) async fn tell_stop(&self) {
        let _ = self.stop.send(None).await;
    }
}

struct ProxyState {
    watchers: Vec<(ActorId, Interest)>,
    exit: Option<ExitReason>,
}

/// Local stand-in for an actor living on another node.
pub struct Proxy {
    addr: ActorAddr,
    forwarder: Arc<dyn Forwarder>,
    state: Mutex<ProxyState>,
    exit: watch::Sender<Option<ExitReason>>,
}

impl Proxy {
    pub fn new(addr: ActorAddr, forwarder: Arc<dyn Forwarder>) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            addr,
            forwarder,
            state: Mutex::new(ProxyState {
                watchers: vec![],
                exit: None,
            }),
            exit,
        }
    }

    pub fn addr(&self) -> ActorAddr {
        self.addr
    }

    pub fn forwarder(&self) -> &Arc<dyn Forwarder> {
        &self.forwarder
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.state).exit.is_some()
    }

    /// Marks the remote actor terminated and notifies the local actors watching it.
    ///
    /// Returns false if the proxy was already terminated.
    pub async fn terminate(&self, reason: ExitReason, system: &SystemRef) -> bool {
        let watchers = {
            let mut state = lock(&self.state);
            if state.exit.is_some() {
                return false;
            }
            state.exit = Some(reason.clone());
            std::mem::take(&mut state.watchers)
        };
        self.exit.send_replace(Some(reason.clone()));
        debug!("Proxy {} terminated: {}.", self.addr, reason);
        notify_watchers(system, self.addr, watchers, &reason).await;
        true
    }

    /// Registers a local watcher. Returns the exit reason instead if the proxy is terminated.
    pub fn attach(
        &self,
        watcher: ActorId,
        interest: Interest,
    ) -> Option<ExitReason> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.exit {
            return Some(reason.clone());
        }
        add_watcher(&mut state.watchers, watcher, interest);
        None
    }

    pub fn detach(&self, watcher: ActorId, interest: Interest) {
        lock(&self.state)
            .watchers
            .retain(|entry| *entry != (watcher, interest));
    }

    fn enqueue(&self, envelope: Envelope) -> Result<(), Error> {
        if self.is_terminated() {
            return Err(Error::RemoteDown(format!(
                "actor {} is down",
                self.addr
            )));
        }
        self.forwarder.forward(&self.addr, envelope)
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.forwarder.release(&self.addr);
    }
}

/// Notifies local watchers that `from` terminated with `reason`.
pub(crate) async fn notify_watchers(
    system: &SystemRef,
    from: ActorAddr,
    watchers: Vec<(ActorId, Interest)>,
    reason: &ExitReason,
) {
    for (watcher, interest) in watchers {
        let Some(handle) = system.lookup_id(watcher).await else {
            continue;
        };
        let envelope = match interest {
            Interest::Link => Envelope::exit(Some(from), reason.clone()),
            Interest::Monitor => Envelope::down(from, reason.clone()),
        };
        if handle.enqueue(envelope).is_err() {
            debug!("Watcher {} is gone.", handle.addr());
        }
    }
}

/// Reference to a local or remote actor.
#[derive(Clone)]
pub enum ActorHandle {
    Local(Arc<ActorCell>),
    Proxy(Arc<Proxy>),
}

impl ActorHandle {
    pub fn addr(&self) -> ActorAddr {
        match self {
            ActorHandle::Local(cell) => cell.addr,
            ActorHandle::Proxy(proxy) => proxy.addr,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ActorHandle::Local(_))
    }

    /// True if both handles point at the very same cell or proxy object.
    pub fn same_actor(&self, other: &ActorHandle) -> bool {
        match (self, other) {
            (ActorHandle::Local(a), ActorHandle::Local(b)) => Arc::ptr_eq(a, b),
            (ActorHandle::Proxy(a), ActorHandle::Proxy(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Interface of a local actor. Proxies do not know it.
    pub fn interface(&self) -> Option<Interface> {
        match self {
            ActorHandle::Local(cell) => Some(cell.interface().clone()),
            ActorHandle::Proxy(_) => None,
        }
    }

    /// Delivers a raw envelope.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), Error> {
        match self {
            ActorHandle::Local(cell) => cell.enqueue(envelope),
            ActorHandle::Proxy(proxy) => proxy.enqueue(envelope),
        }
    }

    /// Anonymous fire-and-forget message.
    pub async fn tell<M>(&self, message: M) -> Result<(), Error>
    where
        M: Message,
    {
        self.tell_with_priority(message, Priority::Normal).await
    }

    pub async fn tell_with_priority<M>(
        &self,
        message: M,
        priority: Priority,
    ) -> Result<(), Error>
    where
        M: Message,
    {
        let payload = Payload::encode(&message)?;
        self.enqueue(Envelope::message(None, priority, payload, None))
    }

    /// Anonymous request.
    pub async fn ask<M, R>(&self, message: M) -> Result<R, Error>
    where
        M: Message,
        R: Response,
    {
        self.request(None, &message).await
    }

    pub(crate) async fn request<M, R>(
        &self,
        sender: Option<ActorHandle>,
        message: &M,
    ) -> Result<R, Error>
    where
        M: Message,
        R: Response,
    {
        let payload = Payload::encode(message)?;
        let (rsvp, response) = oneshot::channel();
        self.enqueue(Envelope::message(
            sender,
            Priority::Normal,
            payload,
            Some(rsvp),
        ))?;
        let deadline = match self {
            ActorHandle::Local(_) => None,
            ActorHandle::Proxy(proxy) => proxy.forwarder().request_timeout(),
        };
        let response = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, response)
                .await
                .map_err(|_| Error::Timeout)?,
            None => response.await,
        };
        let payload = response.map_err(|error| Error::Send(error.to_string()))??;
        payload.decode()
    }

    /// Sends an exit message on behalf of `from` (`None` for an anonymous exit).
    pub fn send_exit(
        &self,
        from: Option<ActorAddr>,
        reason: ExitReason,
    ) -> Result<(), Error> {
        self.enqueue(Envelope::exit(from, reason))
    }

    /// Graceful stop. A remote actor receives a `UserShutdown` exit instead.
    pub async fn ask_stop(&self) -> Result<(), Error> {
        match self {
            ActorHandle::Local(cell) => cell.ask_stop().await,
            ActorHandle::Proxy(_) => {
                self.send_exit(None, ExitReason::UserShutdown)
            }
        }
    }

    pub async fn tell_stop(&self) {
        match self {
            ActorHandle::Local(cell) => cell.tell_stop().await,
            ActorHandle::Proxy(_) => {
                let _ = self.send_exit(None, ExitReason::UserShutdown);
            }
        }
    }

    /// Resolves once the actor is known to be terminated.
    pub async fn wait_for(&self) -> ExitReason {
        match self {
            ActorHandle::Local(cell) => cell.wait_for().await,
            ActorHandle::Proxy(proxy) => wait_exit(&proxy.exit).await,
        }
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        match self {
            ActorHandle::Local(cell) => cell.exit_reason(),
            ActorHandle::Proxy(proxy) => lock(&proxy.state).exit.clone(),
        }
    }

    /// Registers a watcher on the actor, whatever its location.
    pub(crate) fn attach(
        &self,
        watcher: ActorId,
        interest: Interest,
    ) -> Option<ExitReason> {
        match self {
            ActorHandle::Local(cell) => cell.attach(watcher, interest),
            ActorHandle::Proxy(proxy) => proxy.attach(watcher, interest),
        }
    }

    pub(crate) fn detach(&self, watcher: ActorId, interest: Interest) {
        match self {
            ActorHandle::Local(cell) => cell.detach(watcher, interest),
            ActorHandle::Proxy(proxy) => proxy.detach(watcher, interest),
        }
    }

    /// Typed view of this handle. The caller vouches for the protocol.
    pub fn typed<P: Protocol>(self) -> TypedHandle<P> {
        TypedHandle {
            handle: self,
            _protocol: PhantomData,
        }
    }
}

impl PartialEq for ActorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ActorHandle {}

impl Hash for ActorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl Debug for ActorHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorHandle::Local(cell) => write!(f, "Local({})", cell.addr),
            ActorHandle::Proxy(proxy) => write!(f, "Proxy({})", proxy.addr),
        }
    }
}

/// Handle statically bound to a [`Protocol`].
pub struct TypedHandle<P: Protocol> {
    handle: ActorHandle,
    _protocol: PhantomData<P>,
}

impl<P: Protocol> TypedHandle<P> {
    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    pub fn into_handle(self) -> ActorHandle {
        self.handle
    }

    pub async fn tell(&self, message: P::Message) -> Result<(), Error> {
        self.handle.tell(message).await
    }

    pub async fn ask(&self, message: P::Message) -> Result<P::Response, Error> {
        self.handle.ask(message).await
    }
}

impl<P: Protocol> Clone for TypedHandle<P> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _protocol: PhantomData,
        }
    }
}

impl<P: Protocol> Debug for TypedHandle<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedHandle({:?})", self.handle)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{NodeId, mailbox::Content};

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingForwarder {
        forwarded: AtomicUsize,
        released: AtomicUsize,
    }

    impl Forwarder for CountingForwarder {
        fn forward(
            &self,
            _dest: &ActorAddr,
            _envelope: Envelope,
        ) -> Result<(), Error> {
            self.forwarded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn link(
            &self,
            _from: &ActorHandle,
            _dest: &ActorAddr,
            _establish: bool,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn release(&self, _dest: &ActorAddr) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn addr(id: u64) -> ActorAddr {
        ActorAddr::new(NodeId::new(1, 1), ActorId::new(id))
    }

    #[test]
    fn test_proxy_forwards_and_releases() {
        let forwarder = Arc::new(CountingForwarder::default());
        let proxy = ActorHandle::Proxy(Arc::new(Proxy::new(
            addr(3),
            forwarder.clone(),
        )));
        let copy = proxy.clone();

        proxy.send_exit(None, ExitReason::Kill).unwrap();
        assert_eq!(forwarder.forwarded.load(Ordering::SeqCst), 1);
        assert!(proxy.same_actor(&copy));

        drop(proxy);
        assert_eq!(forwarder.released.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(forwarder.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cell_close_once() {
        let (mailbox, mut receiver) = crate::mailbox::mailbox();
        let (stop, _stop_receiver) = tokio::sync::mpsc::channel(1);
        let cell = ActorCell::new(addr(1), Interface::Dynamic, mailbox, stop);

        assert!(cell.attach(ActorId::new(2), Interest::Link).is_none());
        assert!(cell.attach(ActorId::new(2), Interest::Link).is_none());
        assert!(cell.attach(ActorId::new(2), Interest::Monitor).is_none());

        let (watchers, hooks) = cell.close(&ExitReason::Normal).unwrap();
        assert_eq!(watchers.len(), 2);
        assert!(hooks.is_empty());
        assert!(cell.close(&ExitReason::Kill).is_none());
        assert_eq!(cell.exit_reason(), Some(ExitReason::Normal));

        assert_eq!(
            cell.attach(ActorId::new(4), Interest::Monitor),
            Some(ExitReason::Normal)
        );
        assert_eq!(
            cell.enqueue(Envelope::down(addr(9), ExitReason::Normal)).unwrap_err(),
            Error::Terminated(addr(1))
        );
        receiver.close(&addr(1));
    }

    #[test]
    fn test_hook_runs_after_termination() {
        let (mailbox, _receiver) = crate::mailbox::mailbox();
        let (stop, _stop_receiver) = tokio::sync::mpsc::channel(1);
        let cell = ActorCell::new(addr(1), Interface::Dynamic, mailbox, stop);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        cell.attach_hook(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let (_, hooks) = cell.close(&ExitReason::Kill).unwrap();
        for hook in hooks {
            hook(&addr(1), &ExitReason::Kill);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = calls.clone();
        cell.attach_hook(Box::new(move |_, reason| {
            assert_eq!(*reason, ExitReason::Kill);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exit_envelope_is_high_priority() {
        let envelope = Envelope::exit(Some(addr(2)), ExitReason::Normal);
        assert_eq!(envelope.priority, Priority::High);
        assert!(matches!(envelope.content, Content::Exit { .. }));
    }
}

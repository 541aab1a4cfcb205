// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor runner
//!
//! Each local actor is executed by one `ActorRunner` spawned on the tokio runtime. The runner
//! drives the lifecycle state machine (`Created` -> `Started` -> `Stopped` -> `Terminated`),
//! drains the priority mailbox one envelope at a time, applies exit and down messages, and on
//! termination unregisters the actor, runs its exit hooks and notifies its watchers.
//!

use crate::{
    ActorAddr, Error,
    actor::{
        Actor, ActorContext, ActorLifecycle, ActorRef, ExitReason, Handler,
    },
    handle::{ActorCell, notify_watchers},
    mailbox::{Content, Envelope, MailboxReceiver, Payload, mailbox},
    system::SystemRef,
};

use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, warn};

use std::sync::Arc;

/// Receiver of stop requests. Each request optionally carries an acknowledgement channel.
pub type StopReceiver = mpsc::Receiver<Option<oneshot::Sender<()>>>;

/// Sender of stop requests.
pub type StopSender = mpsc::Sender<Option<oneshot::Sender<()>>>;

/// Execution engine of one local actor.
pub(crate) struct ActorRunner<A: Actor> {
    addr: ActorAddr,
    actor: A,
    lifecycle: ActorLifecycle,
    cell: Arc<ActorCell>,
    receiver: MailboxReceiver,
    stop_receiver: StopReceiver,
    /// Stop requests waiting for the actor to terminate.
    stop_acks: Vec<oneshot::Sender<()>>,
}

impl<A> ActorRunner<A>
where
    A: Actor + Handler<A>,
{
    /// Creates the runner and the typed reference of a new actor.
    pub(crate) fn create(addr: ActorAddr, actor: A) -> (Self, ActorRef<A>) {
        debug!("Creating new actor runner.");
        let (sender, receiver) = mailbox();
        let (stop_sender, stop_receiver) = mpsc::channel(100);
        let cell = Arc::new(ActorCell::new(
            addr,
            A::interface(),
            sender,
            stop_sender,
        ));
        let actor_ref = ActorRef::new(cell.clone());
        let runner = ActorRunner {
            addr,
            actor,
            lifecycle: ActorLifecycle::Created,
            cell,
            receiver,
            stop_receiver,
            stop_acks: vec![],
        };
        (runner, actor_ref)
    }

    /// Runs the whole lifecycle of the actor.
    ///
    /// `sender` is signaled with `true` once the actor started, or `false` if it terminated
    /// before that.
    pub(crate) async fn init(
        &mut self,
        system: SystemRef,
        mut sender: Option<oneshot::Sender<bool>>,
    ) {
        debug!("Initializing actor {} runner.", &self.addr);
        let mut ctx: ActorContext<A> =
            ActorContext::new(self.cell.clone(), system);

        loop {
            match self.lifecycle {
                // State: CREATED
                ActorLifecycle::Created => {
                    debug!("Actor {} is created.", &self.addr);
                    match self.actor.pre_start(&mut ctx).await {
                        Ok(_) => {
                            debug!(
                                "Actor '{}' has started successfully.",
                                &self.addr
                            );
                            self.lifecycle = ActorLifecycle::Started;
                        }
                        Err(err) => {
                            error!(
                                "Actor {} failed to start: {:?}",
                                &self.addr, err
                            );
                            ctx.quit(ExitReason::Error(err.to_string()));
                            self.lifecycle = ActorLifecycle::Failed;
                        }
                    }
                }
                // State: STARTED
                ActorLifecycle::Started => {
                    debug!("Actor {} is started.", &self.addr);
                    if let Some(sender) = sender.take() {
                        sender.send(true).unwrap_or_else(|err| {
                            error!("Failed to send signal: {:?}", err);
                        });
                    }
                    self.run(&mut ctx).await;
                    self.lifecycle = ActorLifecycle::Stopped;
                }
                // State: STOPPED
                ActorLifecycle::Stopped => {
                    debug!("Actor {} is stopped.", &self.addr);
                    if self.actor.post_stop(&mut ctx).await.is_err() {
                        error!("Actor '{}' failed to stop!", &self.addr);
                    }
                    self.lifecycle = ActorLifecycle::Terminated;
                }
                // State: FAILED
                ActorLifecycle::Failed => {
                    debug!("Actor {} is faulty.", &self.addr);
                    self.lifecycle = ActorLifecycle::Terminated;
                }
                // State: TERMINATED
                ActorLifecycle::Terminated => {
                    self.terminate(&ctx).await;
                    if let Some(sender) = sender.take() {
                        sender.send(false).unwrap_or_else(|err| {
                            error!("Failed to send signal: {:?}", err);
                        });
                    }
                    break;
                }
            }
        }
    }

    /// Message loop. Returns once the actor decided to quit.
    async fn run(&mut self, ctx: &mut ActorContext<A>) {
        debug!("Running actor {}.", &self.addr);

        while ctx.exit_reason().is_none() {
            select! {
                biased;
                stop = self.stop_receiver.recv() => {
                    debug!("Stopping actor {}.", &self.addr);
                    if let Some(Some(ack)) = stop {
                        self.stop_acks.push(ack);
                    }
                    if self.actor.pre_stop(ctx).await.is_err() {
                        error!("Failed to stop actor {}!", &self.addr);
                    }
                    ctx.quit(ExitReason::UserShutdown);
                }
                envelope = self.receiver.recv() => {
                    match envelope {
                        Some(envelope) => self.dispatch(envelope, ctx).await,
                        None => ctx.quit(ExitReason::Normal),
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope, ctx: &mut ActorContext<A>) {
        let Envelope {
            sender, content, ..
        } = envelope;
        match content {
            Content::Message { payload, rsvp } => {
                let message = match payload.decode::<A::Message>() {
                    Ok(message) => message,
                    Err(_) => {
                        warn!(
                            "Actor {} cannot handle message {:?}.",
                            &self.addr, payload
                        );
                        if let Some(rsvp) = rsvp {
                            let _ = rsvp.send(Err(Error::Unhandled(format!(
                                "actor {} does not accept this message",
                                &self.addr
                            ))));
                        }
                        return;
                    }
                };
                let result = self
                    .actor
                    .handle_message(sender, message, ctx)
                    .await
                    .and_then(|response| Payload::encode(&response));
                match rsvp {
                    Some(rsvp) => {
                        debug!("Sending back response (if any).");
                        rsvp.send(result).unwrap_or_else(|_failed| {
                            debug!("Requester of {} is gone.", &self.addr);
                        });
                    }
                    None => {
                        if let Err(err) = result {
                            debug!("Actor {} returned {}.", &self.addr, err);
                        }
                    }
                }
            }
            Content::Exit { from, reason } => {
                debug!(
                    "Actor {} received exit from {:?}: {}.",
                    &self.addr, from, reason
                );
                if let Some(from) = &from {
                    self.cell.forget(from);
                }
                if reason == ExitReason::Kill {
                    ctx.quit(reason);
                } else if A::trap_exit() {
                    self.actor.on_exit(from, reason, ctx).await;
                } else if !reason.is_normal() {
                    ctx.quit(reason);
                }
            }
            Content::Down { from, reason } => {
                debug!(
                    "Actor {} received down from {}: {}.",
                    &self.addr, from, reason
                );
                self.cell.forget(&from);
                self.actor.on_down(from, reason, ctx).await;
            }
        }
    }

    /// Unregisters the actor, runs its exit hooks, notifies its watchers and answers pending
    /// requests and stop acknowledgements.
    async fn terminate(&mut self, ctx: &ActorContext<A>) {
        let reason = ctx
            .exit_reason()
            .cloned()
            .unwrap_or(ExitReason::Normal);
        debug!("Actor {} is terminated: {}.", &self.addr, reason);

        if let Some((watchers, hooks)) = self.cell.close(&reason) {
            ctx.system().unregister(&self.addr).await;
            for hook in hooks {
                hook(&self.addr, &reason);
            }
            notify_watchers(ctx.system(), self.addr, watchers, &reason).await;
        }
        self.receiver.close(&self.addr);

        self.stop_receiver.close();
        while let Ok(stop) = self.stop_receiver.try_recv() {
            if let Some(ack) = stop {
                self.stop_acks.push(ack);
            }
        }
        for ack in self.stop_acks.drain(..) {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{ActorHandle, ActorSystem, Message, Response};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    struct Doubler;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Double(u64);

    impl Message for Double {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doubled(u64);

    impl Response for Doubled {}

    #[async_trait]
    impl Actor for Doubler {
        type Message = Double;
        type Response = Doubled;
    }

    #[async_trait]
    impl Handler<Doubler> for Doubler {
        async fn handle_message(
            &mut self,
            _sender: Option<ActorHandle>,
            msg: Double,
            _ctx: &mut ActorContext<Doubler>,
        ) -> Result<Doubled, Error> {
            if msg.0 == 0 {
                return Err(Error::Functional("zero".to_owned()));
            }
            Ok(Doubled(msg.0 * 2))
        }
    }

    struct Broken;

    #[async_trait]
    impl Actor for Broken {
        type Message = ();
        type Response = ();

        async fn pre_start(
            &mut self,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            Err(Error::Start("broken".to_owned()))
        }
    }

    #[async_trait]
    impl Handler<Broken> for Broken {
        async fn handle_message(
            &mut self,
            _sender: Option<ActorHandle>,
            _msg: (),
            _ctx: &mut ActorContext<Broken>,
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unhandled_message_keeps_actor_alive() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let doubler = system.spawn(Doubler).await.unwrap();
        let handle = doubler.handle();

        let result: Result<Doubled, Error> =
            handle.ask("not a number".to_owned()).await;
        assert!(matches!(result, Err(Error::Unhandled(_))));
        assert!(logs_contain("cannot handle message"));

        let result: Doubled = handle.ask(Double(21)).await.unwrap();
        assert_eq!(result, Doubled(42));
        assert_eq!(
            doubler.ask(Double(0)).await,
            Err(Error::Functional("zero".to_owned()))
        );
        assert!(doubler.exit_reason().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_start() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let result = system.spawn(Broken).await;
        assert!(matches!(result, Err(Error::Start(_))));
        assert_eq!(system.actor_count().await, 0);
        assert!(logs_contain("failed to start"));
    }

    #[tokio::test]
    async fn test_stop_acknowledged_twice() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        let doubler = system.spawn(Doubler).await.unwrap();
        let other = doubler.clone();

        let (first, second) = tokio::join!(doubler.ask_stop(), other.ask_stop());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(doubler.ask_stop().await.is_ok());
        assert_eq!(doubler.wait_for().await, ExitReason::UserShutdown);
    }
}

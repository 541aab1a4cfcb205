// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for local links, monitors and exit handling.

use actor::{
    Actor, ActorAddr, ActorContext, ActorHandle, ActorSystem, Error, ExitReason, Handler,
    Message,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

// Defines the watched actor.
pub struct Worker;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerCommand {
    Crash(String),
    Quit,
}

impl Message for WorkerCommand {}

#[async_trait]
impl Actor for Worker {
    type Message = WorkerCommand;
    type Response = i32;
}

#[async_trait]
impl Handler<Worker> for Worker {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: WorkerCommand,
        ctx: &mut ActorContext<Worker>,
    ) -> Result<i32, Error> {
        match msg {
            WorkerCommand::Crash(reason) => {
                ctx.quit(ExitReason::Error(reason));
                Ok(0)
            }
            WorkerCommand::Quit => {
                ctx.quit(ExitReason::Normal);
                Ok(1)
            }
        }
    }
}

// What a probe saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Exit(Option<ActorAddr>, ExitReason),
    Down(ActorAddr, ExitReason),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProbeCommand {
    Unlink,
    Demonitor,
}

impl Message for ProbeCommand {}

// Links to (or monitors) its target when it starts.
pub struct Probe {
    target: ActorHandle,
    link: bool,
    seen: mpsc::UnboundedSender<Seen>,
}

#[async_trait]
impl Actor for Probe {
    type Message = ProbeCommand;
    type Response = ();

    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        if self.link {
            ctx.link_to(&self.target)?;
        } else {
            ctx.monitor(&self.target);
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<Probe> for Probe {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: ProbeCommand,
        ctx: &mut ActorContext<Probe>,
    ) -> Result<(), Error> {
        match msg {
            ProbeCommand::Unlink => ctx.unlink_from(&self.target),
            ProbeCommand::Demonitor => {
                ctx.demonitor(&self.target);
                Ok(())
            }
        }
    }

    async fn on_down(
        &mut self,
        from: ActorAddr,
        reason: ExitReason,
        _ctx: &mut ActorContext<Probe>,
    ) {
        let _ = self.seen.send(Seen::Down(from, reason));
    }
}

// Same as a linking probe, but traps exits.
pub struct Trapper {
    target: ActorHandle,
    seen: mpsc::UnboundedSender<Seen>,
}

#[async_trait]
impl Actor for Trapper {
    type Message = ();
    type Response = ();

    fn trap_exit() -> bool {
        true
    }

    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        ctx.link_to(&self.target)
    }
}

#[async_trait]
impl Handler<Trapper> for Trapper {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        _msg: (),
        _ctx: &mut ActorContext<Trapper>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn on_exit(
        &mut self,
        from: Option<ActorAddr>,
        reason: ExitReason,
        _ctx: &mut ActorContext<Trapper>,
    ) {
        let _ = self.seen.send(Seen::Exit(from, reason));
    }
}

#[tokio::test]
#[traced_test]
async fn test_link_propagates_abnormal_exit() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (seen, _events) = mpsc::unbounded_channel();
    let worker = system.spawn(Worker).await.unwrap();
    let probe = system
        .spawn(Probe {
            target: worker.handle(),
            link: true,
            seen,
        })
        .await
        .unwrap();

    worker
        .tell(WorkerCommand::Crash("disk on fire".to_owned()))
        .await
        .unwrap();
    let reason = ExitReason::Error("disk on fire".to_owned());
    assert_eq!(worker.wait_for().await, reason);
    assert_eq!(probe.wait_for().await, reason);
}

#[tokio::test]
async fn test_link_is_bidirectional() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (seen, _events) = mpsc::unbounded_channel();
    let worker = system.spawn(Worker).await.unwrap();
    let probe = system
        .spawn(Probe {
            target: worker.handle(),
            link: true,
            seen,
        })
        .await
        .unwrap();

    probe.ask_stop().await.unwrap();
    assert_eq!(worker.wait_for().await, ExitReason::UserShutdown);
}

#[tokio::test]
async fn test_normal_exit_does_not_propagate() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (seen, _events) = mpsc::unbounded_channel();
    let worker = system.spawn(Worker).await.unwrap();
    let probe = system
        .spawn(Probe {
            target: worker.handle(),
            link: true,
            seen,
        })
        .await
        .unwrap();

    worker.tell(WorkerCommand::Quit).await.unwrap();
    assert_eq!(worker.wait_for().await, ExitReason::Normal);
    probe.ask(ProbeCommand::Demonitor).await.unwrap();
    assert!(probe.exit_reason().is_none());
}

#[tokio::test]
async fn test_unlink() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (seen, _events) = mpsc::unbounded_channel();
    let worker = system.spawn(Worker).await.unwrap();
    let probe = system
        .spawn(Probe {
            target: worker.handle(),
            link: true,
            seen,
        })
        .await
        .unwrap();

    probe.ask(ProbeCommand::Unlink).await.unwrap();
    worker
        .tell(WorkerCommand::Crash("gone".to_owned()))
        .await
        .unwrap();
    worker.wait_for().await;
    probe.ask(ProbeCommand::Demonitor).await.unwrap();
    assert!(probe.exit_reason().is_none());
}

#[tokio::test]
async fn test_trap_exit() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (seen, mut events) = mpsc::unbounded_channel();
    let worker = system.spawn(Worker).await.unwrap();
    let trapper = system
        .spawn(Trapper {
            target: worker.handle(),
            seen,
        })
        .await
        .unwrap();

    worker
        .tell(WorkerCommand::Crash("oops".to_owned()))
        .await
        .unwrap();
    assert_eq!(
        events.recv().await,
        Some(Seen::Exit(
            Some(worker.addr()),
            ExitReason::Error("oops".to_owned())
        ))
    );
    assert!(trapper.exit_reason().is_none());

    // Kill cannot be trapped.
    trapper
        .handle()
        .send_exit(None, ExitReason::Kill)
        .unwrap();
    assert_eq!(trapper.wait_for().await, ExitReason::Kill);
}

#[tokio::test]
async fn test_monitor_receives_down() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (seen, mut events) = mpsc::unbounded_channel();
    let worker = system.spawn(Worker).await.unwrap();
    let monitor = system
        .spawn(Probe {
            target: worker.handle(),
            link: false,
            seen,
        })
        .await
        .unwrap();

    worker.ask_stop().await.unwrap();
    assert_eq!(
        events.recv().await,
        Some(Seen::Down(worker.addr(), ExitReason::UserShutdown))
    );
    assert!(monitor.exit_reason().is_none());
}

#[tokio::test]
async fn test_interest_in_terminated_actor() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (seen, mut events) = mpsc::unbounded_channel();
    let worker = system.spawn(Worker).await.unwrap();
    worker.ask_stop().await.unwrap();

    let monitor = system
        .spawn(Probe {
            target: worker.handle(),
            link: false,
            seen: seen.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        events.recv().await,
        Some(Seen::Down(worker.addr(), ExitReason::Unknown))
    );
    assert!(monitor.exit_reason().is_none());

    let linked = system
        .spawn(Probe {
            target: worker.handle(),
            link: true,
            seen,
        })
        .await
        .unwrap();
    assert_eq!(linked.wait_for().await, ExitReason::Unknown);
}

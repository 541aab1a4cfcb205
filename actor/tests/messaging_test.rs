// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for local message delivery.

use actor::{
    Actor, ActorContext, ActorHandle, ActorSystem, Error, ExitReason, Handler,
    Interface, Message, Priority, Protocol, Signature,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use std::time::Duration;

// Defines a recording actor.
#[derive(Default)]
pub struct Recorder {
    values: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderCommand {
    Sleep(u64),
    Record(i32),
    Dump,
}

impl Message for RecorderCommand {}

#[async_trait]
impl Actor for Recorder {
    type Message = RecorderCommand;
    type Response = Vec<i32>;
}

#[async_trait]
impl Handler<Recorder> for Recorder {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: RecorderCommand,
        _ctx: &mut ActorContext<Recorder>,
    ) -> Result<Vec<i32>, Error> {
        match msg {
            RecorderCommand::Sleep(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            RecorderCommand::Record(value) => self.values.push(value),
            RecorderCommand::Dump => {}
        }
        Ok(self.values.clone())
    }
}

// Defines an actor answering with the identity of the sender.
pub struct Mirror;

#[async_trait]
impl Actor for Mirror {
    type Message = ();
    type Response = Option<u64>;

    fn interface() -> Interface {
        Interface::typed([Signature::new("()", "Option<u64>")])
    }
}

#[async_trait]
impl Handler<Mirror> for Mirror {
    async fn handle_message(
        &mut self,
        sender: Option<ActorHandle>,
        _msg: (),
        _ctx: &mut ActorContext<Mirror>,
    ) -> Result<Option<u64>, Error> {
        Ok(sender.map(|sender| sender.addr().id().value()))
    }
}

pub struct MirrorProtocol;

impl Protocol for MirrorProtocol {
    type Message = ();
    type Response = Option<u64>;

    fn interface() -> Interface {
        Mirror::interface()
    }
}

// Asks the mirror on behalf of itself.
pub struct Asker {
    mirror: ActorHandle,
}

#[async_trait]
impl Actor for Asker {
    type Message = ();
    type Response = Option<u64>;
}

#[async_trait]
impl Handler<Asker> for Asker {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        _msg: (),
        ctx: &mut ActorContext<Asker>,
    ) -> Result<Option<u64>, Error> {
        ctx.ask(&self.mirror, ()).await
    }
}

#[tokio::test]
#[traced_test]
async fn test_high_priority_overtakes_normal() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let recorder = system.spawn(Recorder::default()).await.unwrap();

    recorder.tell(RecorderCommand::Sleep(100)).await.unwrap();
    for value in [1, 2, 3] {
        recorder.tell(RecorderCommand::Record(value)).await.unwrap();
    }
    for value in [10, 11] {
        recorder
            .tell_with_priority(RecorderCommand::Record(value), Priority::High)
            .await
            .unwrap();
    }

    let values = recorder.ask(RecorderCommand::Dump).await.unwrap();
    assert_eq!(values, vec![10, 11, 1, 2, 3]);
    assert!(logs_contain("Asking message to actor"));
}

#[tokio::test]
async fn test_sender_is_visible() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let mirror = system.spawn(Mirror).await.unwrap();
    let asker = system
        .spawn(Asker {
            mirror: mirror.handle(),
        })
        .await
        .unwrap();

    assert_eq!(asker.ask(()).await.unwrap(), Some(asker.addr().id().value()));
    assert_eq!(mirror.ask(()).await.unwrap(), None);

    let typed = mirror.handle().typed::<MirrorProtocol>();
    assert_eq!(typed.ask(()).await.unwrap(), None);
}

#[tokio::test]
async fn test_unhandled_message_is_reported() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let recorder = system.spawn(Recorder::default()).await.unwrap();

    let result: Result<Vec<i32>, Error> =
        recorder.handle().ask("not a command".to_owned()).await;
    assert!(matches!(result, Err(Error::Unhandled(_))));
    assert!(recorder.exit_reason().is_none());
}

#[tokio::test]
async fn test_named_spawn_and_exit() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    system
        .add_actor_type("mirror", |_: ()| Mirror)
        .await;

    let (mirror, interface) = system
        .spawn_named("mirror", actor::Payload::encode(&()).unwrap())
        .await
        .unwrap();
    assert_eq!(interface, Mirror::interface());
    assert_eq!(mirror.interface(), Some(Mirror::interface()));
    assert_eq!(system.lookup(&mirror.addr()).await, Some(mirror.clone()));

    mirror.send_exit(None, ExitReason::Normal).unwrap();
    mirror
        .send_exit(None, ExitReason::Error("bye".to_owned()))
        .unwrap();
    assert_eq!(
        mirror.wait_for().await,
        ExitReason::Error("bye".to_owned())
    );
}

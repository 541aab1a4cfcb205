// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Shared nodes and actors of the middleman integration tests.

#![allow(dead_code)]

use actor::{
    Actor, ActorAddr, ActorContext, ActorHandle, ActorSystem, Error, ExitReason, Handler,
    Interface, Message, Protocol, Signature, SystemRef,
};
use async_trait::async_trait;
use middleman::{Middleman, MiddlemanConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::time::Duration;

pub const HOST: &str = "127.0.0.1";

// One actor system with its middleman.
pub struct Node {
    pub system: SystemRef,
    pub middleman: Middleman,
}

pub fn node() -> Node {
    node_with(MiddlemanConfig::default())
}

pub fn node_with(config: MiddlemanConfig) -> Node {
    let (system, mut runner) = ActorSystem::create(CancellationToken::new());
    tokio::spawn(async move { runner.run().await });
    let middleman = Middleman::new(system.clone(), config);
    Node { system, middleman }
}

// Increment-and-echo actor.
pub struct Pong;

#[async_trait]
impl Actor for Pong {
    type Message = i32;
    type Response = i32;
}

#[async_trait]
impl Handler<Pong> for Pong {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: i32,
        _ctx: &mut ActorContext<Pong>,
    ) -> Result<i32, Error> {
        Ok(msg + 1)
    }
}

// Asks its target until it answers 3, then quits.
pub struct Pinger {
    pub target: ActorHandle,
}

#[async_trait]
impl Actor for Pinger {
    type Message = i32;
    type Response = Vec<i32>;
}

#[async_trait]
impl Handler<Pinger> for Pinger {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: i32,
        ctx: &mut ActorContext<Pinger>,
    ) -> Result<Vec<i32>, Error> {
        let mut value = msg;
        let mut replies = vec![];
        loop {
            let reply: i32 = ctx.ask(&self.target, value).await?;
            replies.push(reply);
            if reply == 3 {
                ctx.quit(ExitReason::Normal);
                return Ok(replies);
            }
            value = reply;
        }
    }
}

pub struct Sorter;

#[async_trait]
impl Actor for Sorter {
    type Message = Vec<i32>;
    type Response = Vec<i32>;
}

#[async_trait]
impl Handler<Sorter> for Sorter {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        mut msg: Vec<i32>,
        _ctx: &mut ActorContext<Sorter>,
    ) -> Result<Vec<i32>, Error> {
        msg.sort();
        Ok(msg)
    }
}

// Records values; a sleep keeps it busy while the mailbox fills up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderCommand {
    Sleep(u64),
    Record(i32),
    Dump,
}

impl Message for RecorderCommand {}

#[derive(Default)]
pub struct Recorder {
    values: Vec<i32>,
}

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

// Links to or monitors its target on start. Reports trapped exits and downs.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Exit(Option<ActorAddr>, ExitReason),
    Down(ActorAddr, ExitReason),
}

pub struct Watcher {
    pub target: ActorHandle,
    pub link: bool,
    pub events: mpsc::UnboundedSender<Observed>,
}

#[async_trait]
impl Actor for Watcher {
    type Message = ();
    type Response = ();

    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        if self.link {
            ctx.link_to(&self.target)
        } else {
            ctx.monitor(&self.target);
            Ok(())
        }
    }
}

#[async_trait]
impl Handler<Watcher> for Watcher {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        _msg: (),
        _ctx: &mut ActorContext<Watcher>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn on_exit(
        &mut self,
        from: Option<ActorAddr>,
        reason: ExitReason,
        _ctx: &mut ActorContext<Watcher>,
    ) {
        let _ = self.events.send(Observed::Exit(from, reason));
    }

    async fn on_down(
        &mut self,
        from: ActorAddr,
        reason: ExitReason,
        _ctx: &mut ActorContext<Watcher>,
    ) {
        let _ = self.events.send(Observed::Down(from, reason));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CalculatorCommand {
    Add(i32, i32),
    Sub(i32, i32),
}

impl Message for CalculatorCommand {}

fn calculate(msg: CalculatorCommand) -> i32 {
    match msg {
        CalculatorCommand::Add(a, b) => a + b,
        CalculatorCommand::Sub(a, b) => a - b,
    }
}

fn calculator_interface() -> Interface {
    Interface::typed([
        Signature::new("add(i32, i32)", "i32"),
        Signature::new("sub(i32, i32)", "i32"),
    ])
}

// Statically-typed contract of the typed calculator.
pub struct CalculatorProtocol;

impl Protocol for CalculatorProtocol {
    type Message = CalculatorCommand;
    type Response = i32;

    fn interface() -> Interface {
        calculator_interface()
    }
}

// Dynamically-typed calculator.
pub struct Calculator;

#[async_trait]
impl Actor for Calculator {
    type Message = CalculatorCommand;
    type Response = i32;
}

#[async_trait]
impl Handler<Calculator> for Calculator {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: CalculatorCommand,
        _ctx: &mut ActorContext<Calculator>,
    ) -> Result<i32, Error> {
        Ok(calculate(msg))
    }
}

pub struct TypedCalculator;

#[async_trait]
impl Actor for TypedCalculator {
    type Message = CalculatorCommand;
    type Response = i32;

    fn interface() -> Interface {
        calculator_interface()
    }
}

#[async_trait]
impl Handler<TypedCalculator> for TypedCalculator {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: CalculatorCommand,
        _ctx: &mut ActorContext<TypedCalculator>,
    ) -> Result<i32, Error> {
        Ok(calculate(msg))
    }
}

// Adds a base given at spawn time.
pub struct Adder {
    pub base: i32,
}

#[async_trait]
impl Actor for Adder {
    type Message = i32;
    type Response = i32;
}

#[async_trait]
impl Handler<Adder> for Adder {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: i32,
        _ctx: &mut ActorContext<Adder>,
    ) -> Result<i32, Error> {
        Ok(self.base + msg)
    }
}

// Takes a while to start.
pub struct Slow;

#[async_trait]
impl Actor for Slow {
    type Message = ();
    type Response = ();

    async fn pre_start(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    }
}

#[async_trait]
impl Handler<Slow> for Slow {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        _msg: (),
        _ctx: &mut ActorContext<Slow>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

// Polls the actor count of `system` until it reaches `expected`, for at most two seconds.
pub async fn settles(system: &SystemRef, expected: usize) -> bool {
    for _ in 0..200 {
        if system.actor_count().await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

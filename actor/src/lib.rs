// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rush Actor System
//!
//! The local half of a location-transparent actor runtime. Actors exchange typed or
//! dynamically-typed messages through handles that look the same whether the actor runs in this
//! process or on another node reached through the `middleman` crate.
//!
//! ## Core concepts
//!
//! - **Node**: one running [`ActorSystem`], identified by a [`NodeId`].
//! - **Actor identity**: an [`ActorAddr`], the pair of a node and a node-local [`ActorId`]. It is
//!   the only thing ever transmitted to name an actor.
//! - **Handle**: an [`ActorHandle`] is either `Local` (the control block of an actor of this node)
//!   or `Proxy` (a stand-in for a remote actor). Handles are reference counted.
//! - **Mailbox**: two queues per actor; [`Priority::High`] envelopes overtake
//!   [`Priority::Normal`] ones, and order is FIFO inside a priority class.
//! - **Links and monitors**: a link couples the lifecycles of two actors in both directions; a
//!   monitor only delivers a down message to the monitoring side.
//! - **Interfaces**: an actor advertises an [`Interface`], either dynamic or a list of
//!   [`Signature`]s. Typed lookups and remote spawns check it against the caller's expectation.
//!
//! ## Example
//!
//! ```ignore
//! use actor::{Actor, ActorContext, ActorHandle, ActorSystem, Error, Handler};
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Actor for Echo {
//!     type Message = i32;
//!     type Response = i32;
//! }
//!
//! #[async_trait]
//! impl Handler<Echo> for Echo {
//!     async fn handle_message(
//!         &mut self,
//!         _sender: Option<ActorHandle>,
//!         msg: i32,
//!         _ctx: &mut ActorContext<Echo>,
//!     ) -> Result<i32, Error> {
//!         Ok(msg + 1)
//!     }
//! }
//!
//! let (system, mut runner) = ActorSystem::create(CancellationToken::new());
//! tokio::spawn(async move { runner.run().await });
//! let echo = system.spawn(Echo).await?;
//! assert_eq!(echo.ask(41).await?, 42);
//! ```
//!

mod actor;
mod address;
mod error;
mod handle;
mod interface;
mod mailbox;
mod registry;
mod runner;
mod system;

//
// Core Actor System Types
//

/// The fundamental actor trait defining actor behavior and lifecycle hooks.
pub use actor::Actor;

/// Execution context given to every hook and handler of an actor.
pub use actor::ActorContext;

/// Lifecycle states of an actor runner.
pub use actor::ActorLifecycle;

/// Typed reference to a local actor.
pub use actor::ActorRef;

/// Reason carried by exit and down messages.
pub use actor::ExitReason;

/// Message handling trait.
pub use actor::Handler;

/// Trait implemented by all messages that can be sent to actors.
pub use actor::Message;

/// Trait implemented by all responses an actor can produce.
pub use actor::Response;

//
// Identities
//

pub use address::{ActorAddr, ActorId, NodeId};

//
// Handles
//

/// Location-transparent reference to a local actor or to a proxy of a remote one.
pub use handle::ActorHandle;

/// Control block of a local actor, reachable through [`ActorHandle::Local`].
pub use handle::ActorCell;

/// Callback run once when an actor terminates.
pub use handle::ExitHook;

/// Outbound side of a proxy, implemented by network connections.
pub use handle::Forwarder;

/// Link or monitor.
pub use handle::Interest;

/// Local stand-in for a remote actor.
pub use handle::Proxy;

/// Handle bound to a [`Protocol`].
pub use handle::TypedHandle;

//
// Messaging
//

pub use interface::{Interface, Protocol, Signature};

pub use mailbox::{Content, Envelope, Payload, Priority, Rsvp};

//
// Error Handling
//

/// Error type of the actor system, shared with the middleman.
pub use error::Error;

//
// System Management
//

/// Factory of actor systems.
pub use system::ActorSystem;

/// System-level events.
pub use system::SystemEvent;

/// Reference to the actor system providing system-level operations.
pub use system::SystemRef;

/// System runner responsible for executing the actor system event loop.
///
/// Execute using `runner.run().await` in a dedicated async task.
pub use system::SystemRunner;

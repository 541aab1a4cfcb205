// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Middleman
//!
//! Network layer of the actor runtime. A [`Middleman`] publishes local actors on TCP ports,
//! resolves actors published by other nodes into proxies, spawns actors on other nodes and carries
//! messages, responses, exits and termination notices between nodes.
//!
//! Frames are described in [`frame`].
//!

mod config;
mod connection;
pub mod frame;
mod middleman;
mod propagate;
mod proxies;
mod publish;
mod spawn;

pub use config::MiddlemanConfig;
pub use middleman::Middleman;

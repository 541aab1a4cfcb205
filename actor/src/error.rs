// Copyright 2024 Antonio Estévez
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::{ActorAddr, Interface};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor system.
///
/// Shared by the local runtime and the middleman. It is serializable so failures raised on a
/// remote node can travel back in response frames.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An error occurred while sending a message to an actor.
    #[error("An error occurred while sending a message to actor: {0}.")]
    Send(String),
    /// An actor could not be started.
    #[error("An error occurred while starting an actor: {0}.")]
    Start(String),
    /// An error occurred while stopping an actor.
    #[error("An error occurred while stopping an actor.")]
    Stop,
    /// An actor with the same identity is already registered.
    #[error("Actor {0} exists.")]
    Exists(ActorAddr),
    /// The destination actor has already terminated.
    #[error("Actor {0} has terminated.")]
    Terminated(ActorAddr),
    /// The destination behavior does not accept the message shape.
    #[error("Unhandled message: {0}")]
    Unhandled(String),
    /// A payload could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),
    /// Transport unreachable or handshake rejected.
    #[error("Connection error: {0}")]
    Connection(String),
    /// No actor is published at the requested endpoint.
    #[error("No actor published at {0}.")]
    Resolution(String),
    /// The remote actor's messaging interface does not satisfy the caller's expectation.
    #[error("Unexpected messaging interface: expected {expected}, found {actual}.")]
    InterfaceMismatch {
        expected: Interface,
        actual: Interface,
    },
    /// Remote spawn of a type name the target node does not know.
    #[error("Actor type '{0}' is not registered.")]
    TypeNotFound(String),
    /// No response within the deadline.
    #[error("Request timed out.")]
    Timeout,
    /// The connection or the peer was lost while a request or proxy was outstanding.
    #[error("Remote down: {0}")]
    RemoteDown(String),
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Codec(error.to_string())
    }
}

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Messaging interfaces
//!
//! An [`Interface`] describes what an actor accepts. Dynamically-typed actors advertise
//! [`Interface::Dynamic`] and route any message at runtime; statically-typed actors advertise an
//! ordered list of [`Signature`]s. Remote spawn and typed remote lookups compare interfaces before
//! handing a handle to the caller.
//!

use crate::{
    Error,
    actor::{Message, Response},
};

use serde::{Deserialize, Serialize};

use std::fmt::{Display, Formatter};

/// One `input -> output` contract of a statically-typed actor.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    input: String,
    output: String,
}

impl Signature {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.input, self.output)
    }
}

/// Interface descriptor of an actor.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Interface {
    /// No static contract: any message is accepted and routed by the behavior.
    #[default]
    Dynamic,
    /// Ordered set of signatures.
    Typed(Vec<Signature>),
}

impl Interface {
    /// Builds a typed interface from its signatures, keeping their order.
    pub fn typed<I>(signatures: I) -> Self
    where
        I: IntoIterator<Item = Signature>,
    {
        Interface::Typed(signatures.into_iter().collect())
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Interface::Dynamic)
    }

    /// True if an actor advertising `self` can be handed to a caller expecting `expected`.
    ///
    /// A dynamic expectation accepts anything. A typed expectation requires the exact same
    /// ordered signatures.
    pub fn satisfies(&self, expected: &Interface) -> bool {
        match expected {
            Interface::Dynamic => true,
            Interface::Typed(_) => self == expected,
        }
    }

    /// Like [`Interface::satisfies`], as a result carrying both descriptors on mismatch.
    pub fn check(&self, expected: &Interface) -> Result<(), Error> {
        if self.satisfies(expected) {
            Ok(())
        } else {
            Err(Error::InterfaceMismatch {
                expected: expected.clone(),
                actual: self.clone(),
            })
        }
    }
}

impl Display for Interface {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Interface::Dynamic => write!(f, "<dynamic>"),
            Interface::Typed(signatures) => {
                let signatures: Vec<String> =
                    signatures.iter().map(|s| s.to_string()).collect();
                write!(f, "{{{}}}", signatures.join("; "))
            }
        }
    }
}

/// A statically-typed messaging contract.
///
/// Used by callers that want a typed handle on an actor they cannot name, typically one living
/// on another node: the protocol fixes the message and response types and the interface that
/// the remote actor must advertise.
pub trait Protocol: Send + Sync + 'static {
    type Message: Message;

    type Response: Response;

    fn interface() -> Interface;
}

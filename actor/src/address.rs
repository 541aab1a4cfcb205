// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor addressing
//!
//! The `address` module provides the identity types of the actor system. A [`NodeId`] names one
//! running actor system, an [`ActorId`] names one actor inside a node, and an [`ActorAddr`] (the
//! pair of both) is the only value ever transmitted across the network to name an actor.
//!

use serde::{Deserialize, Serialize};

use std::{
    fmt::{Debug, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
};

/// Identity of a running actor system.
///
/// Made of the operating system process id and a random discriminator, so two actor systems
/// living in the same process are still two distinct nodes. Immutable for the lifetime of the
/// actor system.
#[derive(
    Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId {
    process_id: u32,
    discriminator: u64,
}

impl NodeId {
    /// Creates a node identity from its raw parts.
    pub fn new(process_id: u32, discriminator: u64) -> Self {
        Self {
            process_id,
            discriminator,
        }
    }

    /// Generates the identity of a new node in the current process.
    pub fn generate() -> Self {
        Self::new(std::process::id(), rand::random::<u64>())
    }

    /// Operating system process id of the node.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Per-node random discriminator.
    pub fn discriminator(&self) -> u64 {
        self.discriminator
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{:016x}", self.process_id, self.discriminator)
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Node-local actor identifier. Never reused within a node.
#[derive(
    Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorId(u64);

impl ActorId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActorId({})", self.0)
    }
}

/// Location-independent actor identity: the node hosting the actor plus its local id.
#[derive(
    Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorAddr {
    node: NodeId,
    id: ActorId,
}

impl ActorAddr {
    pub fn new(node: NodeId, id: ActorId) -> Self {
        Self { node, id }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    /// True if the actor lives on `node`.
    pub fn is_local_to(&self, node: &NodeId) -> bool {
        self.node == *node
    }
}

impl Display for ActorAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.node)
    }
}

impl Debug for ActorAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActorAddr({})", self)
    }
}

/// Monotonic actor id allocator of one node. Ids start at 1.
#[derive(Debug)]
pub(crate) struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub(crate) fn next(&self) -> ActorId {
        ActorId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn generated_nodes_are_distinct() {
        let first = NodeId::generate();
        let second = NodeId::generate();
        assert_eq!(first.process_id(), second.process_id());
        assert_ne!(first, second);
    }

    #[test]
    fn ids_are_monotonic() {
        let ids = IdGenerator::new();
        let first = ids.next();
        let second = ids.next();
        assert_eq!(first.value(), 1);
        assert!(second > first);
    }

    #[test]
    fn addr_display() {
        let node = NodeId::new(42, 0xff);
        let addr = ActorAddr::new(node, ActorId::new(7));
        assert_eq!(addr.to_string(), "7@42#00000000000000ff");
        assert!(addr.is_local_to(&node));
        assert!(!addr.is_local_to(&NodeId::new(42, 0xfe)));
    }
}

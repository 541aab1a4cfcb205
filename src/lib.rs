

//! Core library for the Rush network actor runtime.
//! Provides location-transparent actors: the local actor model from `actor` and the distributed
//! middleman from `middleman`, which publishes actors on TCP ports, resolves remote actors into
//! proxies, spawns actors on other nodes and propagates links and monitors across connections.

pub use actor::{
    Actor, ActorAddr, ActorContext, ActorHandle, ActorId, ActorRef,
    ActorSystem, Error, ExitReason, Handler, Interface, Message, NodeId,
    Payload, Priority, Protocol, Response, Signature, SystemEvent, SystemRef,
    SystemRunner, TypedHandle,
};

pub use middleman::{Middleman, MiddlemanConfig};

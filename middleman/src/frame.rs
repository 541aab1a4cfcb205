// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Wire frames
//!
//! Everything exchanged between two middlemen is a [`Frame`], bincode-encoded and carried in a
//! length-prefixed transport frame (`LengthDelimitedCodec`, 4 byte big-endian length).
//!
//! Requests (`LookupRequest`, `SpawnRequest`, `Message` with a token) are matched to their
//! responses through a per-connection correlation token, so independent requests can be in
//! flight on the same connection at the same time.
//!

use actor::{
    ActorAddr, Error, ExitReason, Interface, NodeId, Payload, Priority,
};

use bytes::{Bytes, BytesMut};

use futures::{Sink, SinkExt, Stream, StreamExt};

use serde::{Deserialize, Serialize};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Version announced in the handshake. Peers with another version are rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Result of a lookup or spawn request: the identity and interface of the actor.
pub type Resolved = Result<(ActorAddr, Interface), Error>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame sent by both sides of a new connection.
    Hello { version: u32, node: NodeId },
    /// Which actor is published at `port`?
    LookupRequest { token: u64, port: u16 },
    LookupResponse { token: u64, result: Resolved },
    /// Spawn an actor of a registered type.
    SpawnRequest {
        token: u64,
        type_name: String,
        args: Payload,
        expected: Interface,
    },
    SpawnResponse { token: u64, result: Resolved },
    /// User message. `token` is set when the sender waits for a response.
    Message {
        token: Option<u64>,
        sender: Option<ActorAddr>,
        dest: ActorAddr,
        priority: Priority,
        payload: Payload,
    },
    Response {
        token: u64,
        result: Result<Payload, Error>,
    },
    /// Exit message for `dest`.
    Exit {
        sender: Option<ActorAddr>,
        dest: ActorAddr,
        reason: ExitReason,
    },
    /// `sender` linked itself to `dest`.
    Link { sender: ActorAddr, dest: ActorAddr },
    Unlink { sender: ActorAddr, dest: ActorAddr },
    /// `actor` terminated.
    Down { actor: ActorAddr, reason: ExitReason },
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::LookupRequest { .. } => "lookup-request",
            Frame::LookupResponse { .. } => "lookup-response",
            Frame::SpawnRequest { .. } => "spawn-request",
            Frame::SpawnResponse { .. } => "spawn-response",
            Frame::Message { .. } => "message",
            Frame::Response { .. } => "response",
            Frame::Exit { .. } => "exit",
            Frame::Link { .. } => "link",
            Frame::Unlink { .. } => "unlink",
            Frame::Down { .. } => "down",
        }
    }
}

/// Wraps a byte stream into a length-delimited frame transport.
pub fn framed<T>(io: T, max_frame_length: usize) -> Framed<T, LengthDelimitedCodec>
where
    T: AsyncRead + AsyncWrite,
{
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_framed(io)
}

/// Encodes and writes one frame.
pub async fn write_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), Error>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    let bytes = frame.encode()?;
    sink.send(bytes)
        .await
        .map_err(|error| Error::Connection(error.to_string()))
}

/// Reads and decodes the next frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<Frame>, Error>
where
    S: Stream<Item = Result<BytesMut, std::io::Error>> + Unpin,
{
    match stream.next().await {
        Some(Ok(bytes)) => Frame::decode(&bytes).map(Some),
        Some(Err(error)) => Err(Error::Connection(error.to_string())),
        None => Ok(None),
    }
}

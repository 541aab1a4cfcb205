// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! Every actor owns one mailbox with two queues: a high priority queue and a normal priority
//! queue. Messages travel as encoded [`Payload`]s so the same envelope can be delivered to a
//! local actor or serialized onto a connection without knowing the concrete message type.
//!

use crate::{ActorAddr, Error, actor::ExitReason, handle::ActorHandle};

use bincode::Options;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use tokio::{
    select,
    sync::{mpsc, oneshot},
};

use tracing::debug;

use std::fmt::{Debug, Formatter};

/// Encoded message or response content.
#[derive(Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Payload(Vec<u8>);

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
}

impl Payload {
    /// Encodes a value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self(codec().serialize(value)?))
    }

    /// Decodes the whole payload as a `T`. Trailing bytes are an error.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(codec().deserialize(&self.0)?)
    }
}

impl Debug for Payload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

/// Message priority. High priority messages overtake normal ones in the receiver's mailbox.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Normal,
}

/// Response channel of a request.
pub type Rsvp = oneshot::Sender<Result<Payload, Error>>;

/// What an envelope carries.
#[derive(Debug)]
pub enum Content {
    /// User message, with a response channel if the sender is waiting for one.
    Message {
        payload: Payload,
        rsvp: Option<Rsvp>,
    },
    /// Exit signal. `from` is `None` for anonymous exits.
    Exit {
        from: Option<ActorAddr>,
        reason: ExitReason,
    },
    /// A monitored actor terminated.
    Down { from: ActorAddr, reason: ExitReason },
}

/// Unit of delivery into a mailbox.
#[derive(Debug)]
pub struct Envelope {
    pub sender: Option<ActorHandle>,
    pub priority: Priority,
    pub content: Content,
}

impl Envelope {
    pub fn message(
        sender: Option<ActorHandle>,
        priority: Priority,
        payload: Payload,
        rsvp: Option<Rsvp>,
    ) -> Self {
        Self {
            sender,
            priority,
            content: Content::Message { payload, rsvp },
        }
    }

    /// System signals always use the high priority queue.
    pub fn exit(from: Option<ActorAddr>, reason: ExitReason) -> Self {
        Self {
            sender: None,
            priority: Priority::High,
            content: Content::Exit { from, reason },
        }
    }

    pub fn down(from: ActorAddr, reason: ExitReason) -> Self {
        Self {
            sender: None,
            priority: Priority::High,
            content: Content::Down { from, reason },
        }
    }

    /// Answers the pending request, if any, with `result`.
    pub fn reply(self, result: Result<Payload, Error>) {
        if let Content::Message {
            rsvp: Some(rsvp), ..
        } = self.content
        {
            let _ = rsvp.send(result);
        }
    }
}

/// Creates a new mailbox.
pub(crate) fn mailbox() -> (MailboxSender, MailboxReceiver) {
    let (high_sender, high) = mpsc::unbounded_channel();
    let (normal_sender, normal) = mpsc::unbounded_channel();
    (
        MailboxSender {
            high: high_sender,
            normal: normal_sender,
        },
        MailboxReceiver { high, normal },
    )
}

/// Sending side of a mailbox.
#[derive(Clone)]
pub(crate) struct MailboxSender {
    high: mpsc::UnboundedSender<Envelope>,
    normal: mpsc::UnboundedSender<Envelope>,
}

impl MailboxSender {
    pub(crate) fn send(&self, envelope: Envelope) -> Result<(), Error> {
        let queue = match envelope.priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
        };
        queue.send(envelope).map_err(|error| {
            debug!("Failed to enqueue envelope: mailbox closed.");
            Error::Send(error.to_string())
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.normal.is_closed()
    }
}

/// Receiving side of a mailbox.
pub(crate) struct MailboxReceiver {
    high: mpsc::UnboundedReceiver<Envelope>,
    normal: mpsc::UnboundedReceiver<Envelope>,
}

impl MailboxReceiver {
    /// Next envelope, high priority first. `None` once both queues are closed and drained.
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        select! {
            biased;
            Some(envelope) = self.high.recv() => Some(envelope),
            Some(envelope) = self.normal.recv() => Some(envelope),
            else => None,
        }
    }

    /// Closes both queues and fails every request still waiting in them.
    pub(crate) fn close(&mut self, addr: &ActorAddr) {
        self.high.close();
        self.normal.close();
        while let Ok(envelope) = self.high.try_recv() {
            envelope.reply(Err(Error::Terminated(*addr)));
        }
        while let Ok(envelope) = self.normal.try_recv() {
            envelope.reply(Err(Error::Terminated(*addr)));
        }
    }
}

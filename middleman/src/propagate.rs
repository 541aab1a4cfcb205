// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Delivery of messages, exits and link changes received from a peer.

use crate::{connection::Connection, frame::Frame, middleman::Middleman};

use actor::{
    ActorAddr, ActorHandle, Envelope, Error, ExitReason, Interest, Payload, Priority,
};

use tokio::sync::oneshot;

use tracing::debug;

use std::sync::Arc;

impl Middleman {
    /// Tells the peer that `dest` does not exist (anymore) on this node.
    fn unknown_actor(&self, connection: &Connection, dest: ActorAddr) {
        let _ = connection.send(Frame::Down {
            actor: dest,
            reason: ExitReason::Unknown,
        });
    }

    pub(crate) async fn deliver_message(
        &self,
        connection: &Arc<Connection>,
        token: Option<u64>,
        sender: Option<ActorAddr>,
        dest: ActorAddr,
        priority: Priority,
        payload: Payload,
    ) {
        let Some(target) = self.system.lookup(&dest).await else {
            debug!("Message from {} for unknown actor {}.", connection.peer(), dest);
            if let Some(token) = token {
                let _ = connection.send(Frame::Response {
                    token,
                    result: Err(Error::Terminated(dest)),
                });
            }
            self.unknown_actor(connection, dest);
            return;
        };

        let sender = match sender {
            Some(addr) => self.resolve(addr, connection).await.ok(),
            None => None,
        };

        let rsvp = token.map(|token| {
            let (rsvp, response) = oneshot::channel();
            let connection = connection.clone();
            tokio::spawn(async move {
                let result = response
                    .await
                    .unwrap_or_else(|_| Err(Error::Terminated(dest)));
                if connection.send(Frame::Response { token, result }).is_err() {
                    debug!("Response {} for {} dropped.", token, connection.peer());
                }
            });
            rsvp
        });

        // A refused envelope drops its rsvp, answered above with `Terminated`.
        if let Err(error) = target.enqueue(Envelope::message(sender, priority, payload, rsvp)) {
            debug!("Message for {} not delivered: {}", dest, error);
        }
    }

    pub(crate) async fn deliver_exit(
        &self,
        sender: Option<ActorAddr>,
        dest: ActorAddr,
        reason: ExitReason,
    ) {
        match self.system.lookup(&dest).await {
            Some(target) => {
                if target.enqueue(Envelope::exit(sender, reason)).is_err() {
                    debug!("Exit for {} dropped.", dest);
                }
            }
            None => debug!("Exit for unknown actor {} dropped.", dest),
        }
    }

    /// The remote actor `sender` linked itself to the local actor `dest`.
    pub(crate) async fn establish_link(
        &self,
        connection: &Arc<Connection>,
        sender: ActorAddr,
        dest: ActorAddr,
    ) {
        let Some(ActorHandle::Local(cell)) = self.system.lookup(&dest).await else {
            debug!("Link from {} to unknown actor {}.", sender, dest);
            self.unknown_actor(connection, dest);
            return;
        };
        connection.export(&ActorHandle::Local(cell.clone()));
        let Ok(ActorHandle::Proxy(proxy)) = self.resolve(sender, connection).await else {
            return;
        };
        if let Some(reason) = proxy.attach(dest.id(), Interest::Link) {
            let handle = ActorHandle::Local(cell);
            let _ = handle.enqueue(Envelope::exit(Some(sender), reason));
            return;
        }
        cell.hold(ActorHandle::Proxy(proxy));
        debug!("Remote actor {} linked to {}.", sender, dest);
    }

    pub(crate) async fn remove_link(&self, sender: ActorAddr, dest: ActorAddr) {
        if let Some(proxy) = self.proxies.get(&sender).await {
            proxy.detach(dest.id(), Interest::Link);
        }
        if let Some(ActorHandle::Local(cell)) = self.system.lookup(&dest).await {
            cell.release_hold(&sender);
        }
        debug!("Remote actor {} unlinked from {}.", sender, dest);
    }
}

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Remote spawn
//!
//! Spawns an actor of a registered type on another node. The caller states the interface it
//! expects; the spawning node checks it and stops the fresh actor when it does not match.
//!

use crate::{connection::Connection, frame::Frame, middleman::Middleman};

use actor::{ActorHandle, Error, ExitReason, Interface, NodeId, Payload, Protocol, TypedHandle};

use serde::Serialize;

use tracing::{debug, warn};

use std::sync::Arc;

impl Middleman {
    /// Spawns `type_name` on `node` with no interface expectation.
    pub async fn remote_spawn<Args>(
        &self,
        node: NodeId,
        type_name: &str,
        args: &Args,
    ) -> Result<ActorHandle, Error>
    where
        Args: Serialize,
    {
        self.spawn_on(node, type_name, Payload::encode(args)?, Interface::Dynamic)
            .await
    }

    /// Spawns `type_name` on `node`, requiring the interface of `P`.
    pub async fn remote_spawn_typed<P, Args>(
        &self,
        node: NodeId,
        type_name: &str,
        args: &Args,
    ) -> Result<TypedHandle<P>, Error>
    where
        P: Protocol,
        Args: Serialize,
    {
        let handle = self
            .spawn_on(node, type_name, Payload::encode(args)?, P::interface())
            .await?;
        Ok(handle.typed())
    }

    /// Spawns `type_name` on `node` with already encoded arguments.
    pub async fn spawn_on(
        &self,
        node: NodeId,
        type_name: &str,
        args: Payload,
        expected: Interface,
    ) -> Result<ActorHandle, Error> {
        if node == self.node() {
            return self.spawn_checked(type_name, args, &expected).await;
        }
        let connection = self
            .connection_of(node)
            .await
            .ok_or_else(|| Error::Connection(format!("not connected to {}", node)))?;
        let (addr, _) = connection
            .request(|token| Frame::SpawnRequest {
                token,
                type_name: type_name.to_owned(),
                args,
                expected,
            })
            .await?;
        self.resolve(addr, &connection).await.inspect_err(|_| {
            let _ = connection.send(Frame::Exit {
                sender: None,
                dest: addr,
                reason: ExitReason::Kill,
            });
        })
    }

    async fn spawn_checked(
        &self,
        type_name: &str,
        args: Payload,
        expected: &Interface,
    ) -> Result<ActorHandle, Error> {
        let (handle, interface) = self.system.spawn_named(type_name, args).await?;
        if let Err(error) = interface.check(expected) {
            warn!(
                "Actor {} of type '{}' has interface {}, expected {}. Stopping it.",
                handle.addr(),
                type_name,
                interface,
                expected
            );
            let _ = handle.ask_stop().await;
            return Err(error);
        }
        Ok(handle)
    }

    /// Answers a spawn request of the peer.
    pub(crate) async fn serve_spawn(
        &self,
        connection: &Arc<Connection>,
        token: u64,
        type_name: String,
        args: Payload,
        expected: Interface,
    ) {
        let spawned = self.spawn_checked(&type_name, args, &expected).await;
        let result = spawned.as_ref().map_err(Clone::clone).map(|handle| {
            connection.export(handle);
            (handle.addr(), handle.interface().unwrap_or_default())
        });
        match &result {
            Ok((addr, _)) => debug!(
                "Spawned {} of type '{}' for {}.",
                addr,
                type_name,
                connection.peer()
            ),
            Err(error) => debug!(
                "Spawn of '{}' for {} failed: {}",
                type_name,
                connection.peer(),
                error
            ),
        }
        if connection
            .send(Frame::SpawnResponse { token, result })
            .is_err()
        {
            debug!("Connection to {} closed before spawn response.", connection.peer());
            if let Ok(handle) = spawned {
                warn!("Killing {}, its caller is gone.", handle.addr());
                let _ = handle.send_exit(None, ExitReason::Kill);
            }
        }
    }
}

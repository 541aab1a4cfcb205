// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Address registry
//!
//! Maps the local actor ids of a node to their live handles. Actors are registered when they are
//! spawned and unregister themselves exactly once, when they terminate.
//!

use crate::{ActorId, Error, handle::ActorHandle};

use tokio::sync::RwLock;

use tracing::debug;

use std::{collections::HashMap, sync::Arc};

#[derive(Clone, Default)]
pub(crate) struct Registry {
    actors: Arc<RwLock<HashMap<ActorId, ActorHandle>>>,
}

impl Registry {
    pub(crate) async fn register_local(
        &self,
        id: ActorId,
        handle: ActorHandle,
    ) -> Result<(), Error> {
        let mut actors = self.actors.write().await;
        if actors.contains_key(&id) {
            return Err(Error::Exists(handle.addr()));
        }
        actors.insert(id, handle);
        Ok(())
    }

    pub(crate) async fn lookup(&self, id: ActorId) -> Option<ActorHandle> {
        self.actors.read().await.get(&id).cloned()
    }

    /// Removes the entry of `id`. Unregistering an absent id is a no-op.
    pub(crate) async fn unregister(&self, id: ActorId) -> bool {
        let removed = self.actors.write().await.remove(&id).is_some();
        if !removed {
            debug!("Actor {} was not registered.", id);
        }
        removed
    }

    pub(crate) async fn len(&self) -> usize {
        self.actors.read().await.len()
    }

    pub(crate) async fn handles(&self) -> Vec<ActorHandle> {
        self.actors.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{ActorAddr, NodeId, handle::{Forwarder, Proxy}, mailbox::Envelope};

    struct Nowhere;

    impl Forwarder for Nowhere {
        fn forward(&self, _dest: &ActorAddr, _envelope: Envelope) -> Result<(), Error> {
            Ok(())
        }

        fn link(
            &self,
            _from: &ActorHandle,
            _dest: &ActorAddr,
            _establish: bool,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn release(&self, _dest: &ActorAddr) {}
    }

    fn handle(id: u64) -> ActorHandle {
        let addr = ActorAddr::new(NodeId::new(1, 2), ActorId::new(id));
        ActorHandle::Proxy(Arc::new(Proxy::new(addr, Arc::new(Nowhere))))
    }

    #[tokio::test]
    async fn test_register_lookup_unregister() {
        let registry = Registry::default();
        let id = ActorId::new(5);
        registry.register_local(id, handle(5)).await.unwrap();
        assert_eq!(
            registry.register_local(id, handle(5)).await,
            Err(Error::Exists(handle(5).addr()))
        );
        assert_eq!(registry.lookup(id).await, Some(handle(5)));
        assert_eq!(registry.len().await, 1);

        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);
        assert!(registry.lookup(id).await.is_none());
        assert_eq!(registry.len().await, 0);
    }
}

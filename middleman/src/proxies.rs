// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Proxy manager
//!
//! Table of the proxies of remote actors, keyed by actor identity. Entries are weak: a proxy lives
//! as long as some handle (or a watching actor) holds it. Creation happens under the table lock,
//! so two concurrent resolutions of the same identity always share one proxy.
//!

use crate::connection::Connection;

use actor::{ActorAddr, Error, ExitReason, Forwarder, Proxy, SystemRef};

use tokio::sync::Mutex;

use tracing::debug;

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

struct ProxyEntry {
    proxy: Weak<Proxy>,
    connection: u64,
}

#[derive(Clone, Default)]
pub(crate) struct ProxyManager {
    entries: Arc<Mutex<HashMap<ActorAddr, ProxyEntry>>>,
}

impl ProxyManager {
    /// Proxy of `addr`, reusing the live one if any.
    ///
    /// Fails with `RemoteDown` once `connection` is closed. The closed check happens under the
    /// table lock, before `detach_connection` can run.
    pub(crate) async fn get_or_create(
        &self,
        addr: ActorAddr,
        connection: &Arc<Connection>,
    ) -> Result<Arc<Proxy>, Error> {
        let mut entries = self.entries.lock().await;
        if connection.is_closed() {
            return Err(Error::RemoteDown(format!(
                "connection to {} closed",
                connection.peer()
            )));
        }
        entries.retain(|_, entry| entry.proxy.strong_count() > 0);
        let existing = entries
            .get(&addr)
            .and_then(|entry| entry.proxy.upgrade())
            .filter(|proxy| !proxy.is_terminated());
        if let Some(proxy) = existing {
            return Ok(proxy);
        }

        connection.retain();
        let forwarder: Arc<dyn Forwarder> = connection.clone();
        let proxy = Arc::new(Proxy::new(addr, forwarder));
        entries.insert(
            addr,
            ProxyEntry {
                proxy: Arc::downgrade(&proxy),
                connection: connection.id(),
            },
        );
        debug!("Proxy {} created on connection {}.", addr, connection.id());
        Ok(proxy)
    }

    /// The remote actor `addr` terminated: its proxy is marked terminated and its watchers are
    /// notified.
    pub(crate) async fn notify_remote_down(
        &self,
        addr: &ActorAddr,
        reason: ExitReason,
        system: &SystemRef,
    ) {
        let proxy = {
            let mut entries = self.entries.lock().await;
            entries.remove(addr).and_then(|entry| entry.proxy.upgrade())
        };
        if let Some(proxy) = proxy {
            proxy.terminate(reason, system).await;
        }
    }

    /// Looks up the live proxy of `addr`.
    pub(crate) async fn get(&self, addr: &ActorAddr) -> Option<Arc<Proxy>> {
        let entries = self.entries.lock().await;
        entries.get(addr).and_then(|entry| entry.proxy.upgrade())
    }

    /// Removes every entry bound to `connection` and returns the live proxies.
    pub(crate) async fn detach_connection(&self, connection: u64) -> Vec<Arc<Proxy>> {
        let mut entries = self.entries.lock().await;
        let mut detached = vec![];
        entries.retain(|_, entry| {
            if entry.connection != connection {
                return true;
            }
            if let Some(proxy) = entry.proxy.upgrade() {
                detached.push(proxy);
            }
            false
        });
        detached
    }

    /// Number of live proxies.
    pub(crate) async fn count(&self) -> usize {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|entry| entry.proxy.strong_count() > 0)
            .count()
    }
}

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Middleman configuration
//!

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Tunables of a [`Middleman`](crate::Middleman).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlemanConfig {
    /// Deadline for the TCP connect plus the handshake.
    pub connect_timeout: Duration,

    /// Deadline applied to lookup and spawn requests and to requests sent through proxies.
    /// `None` waits until a response arrives or the connection is lost.
    pub request_timeout: Option<Duration>,

    /// Interface listeners bind to.
    pub bind_host: String,

    /// Largest accepted frame, in bytes.
    pub max_frame_length: usize,

    /// Close outbound connections once no proxy, request or exported actor uses them.
    pub close_idle: bool,
}

impl Default for MiddlemanConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
            bind_host: "127.0.0.1".to_owned(),
            max_frame_length: 16 * 1024 * 1024,
            close_idle: true,
        }
    }
}

impl MiddlemanConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_idle(mut self, close_idle: bool) -> Self {
        self.close_idle = close_idle;
        self
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_defaults() {
        let config = MiddlemanConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.request_timeout.is_none());
        assert_eq!(config.bind_host, "127.0.0.1");
        assert!(config.close_idle);

        let config = config.with_request_timeout(Duration::from_millis(10));
        assert_eq!(config.request_timeout, Some(Duration::from_millis(10)));
    }
}

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration shared by all filters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Default bound on thread joins and pool decommits.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// How an output pin hands samples to its peer.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// A dedicated pump thread drains the pending queue.
    #[default]
    Async,
    /// The thread that called into the filter drains the pending queue
    /// before returning.
    Synchronous,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Settings common to every filter.
///
/// # Examples
///
/// ```
/// use pinflow::config::{DeliveryMode, FilterConfig};
///
/// let config = FilterConfig::from_json(r#"{ "delivery": "synchronous" }"#).unwrap();
/// assert_eq!(config.delivery, DeliveryMode::Synchronous);
/// assert_eq!(config.join_timeout_ms, 5000);
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FilterConfig {
    #[serde(default)]
    pub delivery: DeliveryMode,
    /// Upper bound on joining a pump thread.
    #[serde(default = "default_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Upper bound on waiting for leased buffers during decommit.
    #[serde(default = "default_timeout_ms")]
    pub decommit_timeout_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::default(),
            join_timeout_ms: DEFAULT_TIMEOUT_MS,
            decommit_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl FilterConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn synchronous() -> Self {
        Self {
            delivery: DeliveryMode::Synchronous,
            ..Self::default()
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn decommit_timeout(&self) -> Duration {
        Duration::from_millis(self.decommit_timeout_ms)
    }
}

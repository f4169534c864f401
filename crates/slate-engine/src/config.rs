//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the realtime batch updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Debounce window for coalescing realtime notifications.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Maximum ids fetched per batch flush; the remainder waits for the
    /// next flush.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_max_batch() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_batch: default_max_batch(),
        }
    }
}

impl EngineConfig {
    /// The debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

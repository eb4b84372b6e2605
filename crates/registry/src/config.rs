//! Engine tunables.

use std::time::Duration;

use crate::retry::DEFAULT_MAX_ATTEMPTS;

/// Configuration shared by the managers and the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Attempts per guarded mutation before `Contention` is returned.
    pub max_conflict_retries: u32,
    /// Pause between two background expiry passes.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: DEFAULT_MAX_ATTEMPTS,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

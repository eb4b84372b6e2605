//! Bounded re-execution of read-recompute-commit cycles.

use std::future::Future;

use crate::error::{RegistryError, Result};

/// Default number of attempts before a guarded mutation gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Retry policy for optimistic compare-and-update.
///
/// The closure is re-run from scratch on a ledger version conflict, so it must
/// re-read everything it depends on. Any other error is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetry {
    pub max_attempts: u32,
}

impl ConflictRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Runs `op` until it succeeds, fails with a non-conflict error, or the
    /// attempt bound is reached. The closure receives the 1-based attempt.
    pub async fn run<F, Fut, T>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Err(err) if err.is_conflict() => {
                    metrics::counter!("ledger_conflicts_total", "operation" => operation)
                        .increment(1);

                    if attempt >= self.max_attempts {
                        metrics::counter!("ledger_contention_total", "operation" => operation)
                            .increment(1);
                        tracing::warn!(operation, attempt, "retries exhausted");
                        return Err(RegistryError::Contention { attempts: attempt });
                    }

                    tracing::debug!(operation, attempt, error = %err, "version conflict, retrying");
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

//! Controller tuning knobs
//!
//! The binary fills this from its command line; tests use the defaults.

use std::time::Duration;

use crate::teardown::CONVERGENCE_DELAY;

/// Requeue delay after a retryable reconcile error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Server-side watch timeout, kept below the client read timeout
pub const WATCH_TIMEOUT: Duration = Duration::from_secs(25);

/// Timing configuration for the klusterlet works controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Delay between addon convergence checks during teardown
    pub convergence_delay: Duration,
    /// Requeue delay after a retryable error
    pub error_requeue: Duration,
    /// Watch timeout for the ManagedCluster and ManifestWork watches
    pub watch_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            convergence_delay: CONVERGENCE_DELAY,
            error_requeue: ERROR_REQUEUE,
            watch_timeout: WATCH_TIMEOUT,
        }
    }
}

impl ControllerConfig {
    /// Build from whole seconds, as taken from the command line
    ///
    /// Zero is not a usable delay; it falls back to the default for that knob.
    pub fn from_secs(convergence_delay: u64, error_requeue: u64, watch_timeout: u64) -> Self {
        let defaults = Self::default();
        let or = |secs: u64, fallback: Duration| {
            if secs == 0 {
                fallback
            } else {
                Duration::from_secs(secs)
            }
        };
        Self {
            convergence_delay: or(convergence_delay, defaults.convergence_delay),
            error_requeue: or(error_requeue, defaults.error_requeue),
            watch_timeout: or(watch_timeout, defaults.watch_timeout),
        }
    }

    /// Watch timeout in whole seconds, as the watcher config expects
    pub fn watch_timeout_secs(&self) -> u32 {
        u32::try_from(self.watch_timeout.as_secs()).unwrap_or(u32::MAX)
    }
}

//! Delay schedule between retry attempts.

use std::time::Duration;

use conduit_types::BackoffStrategy;
use serde::{Deserialize, Serialize};

/// Base delay and cap applied to a step's [`BackoffStrategy`].
///
/// With the defaults an exponential strategy waits 1s, 2s, 4s, ... capped at
/// 60s. No jitter is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    /// Upper bound for any single delay. `None` leaves delays uncapped.
    pub max_delay_ms: Option<u64>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: Some(60_000),
        }
    }
}

impl BackoffPolicy {
    /// A policy that never waits.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: Some(0),
        }
    }

    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay_for(&self, strategy: BackoffStrategy, attempt: u32) -> Duration {
        let millis = match strategy {
            BackoffStrategy::Exponential => self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt)),
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt) + 1),
            BackoffStrategy::Fixed => self.base_delay_ms,
        };
        let capped = match self.max_delay_ms {
            Some(max_delay_ms) => millis.min(max_delay_ms),
            None => millis,
        };
        Duration::from_millis(capped)
    }
}

//! Consensus configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable parameters of the voting core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Base duration of one round before the local timeout fires.
    pub round_timeout: Duration,

    /// Cap on the exponential back-off applied across consecutive timed-out
    /// views (the timeout is `round_timeout * 2^n` with `n` clamped here).
    pub max_backoff_exponent: u32,

    /// Minimum interval between this replica's own proposals. Broadcasting
    /// is delayed by whatever portion of this has not yet elapsed when the
    /// proposal is ready.
    pub block_rate_delay: Duration,

    /// Capacity of the event-loop channel.
    pub channel_capacity: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_millis(1200),
            max_backoff_exponent: 6,
            block_rate_delay: Duration::from_millis(0),
            channel_capacity: 10_000,
        }
    }
}

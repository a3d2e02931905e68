//! Receiver configuration

use std::time::Duration;

/// Configuration for a receiver session's transport core
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// How long a gap may stay open before a retransmission is requested
    pub retransmit_timeout: Duration,

    /// How long a gap may block emission before it is force-skipped
    pub gap_max_wait: Duration,

    /// Maximum number of in-flight retransmission requests
    pub retransmit_limit: usize,

    /// Minimum spacing between successive retransmission dispatches.
    /// Unthrottled bursts exceed the sender's ~25 req/s processing rate
    /// and the requests get lost.
    pub retransmit_throttle: Duration,

    /// Insert a software volume stage into the decode pipeline
    pub software_volume: bool,

    /// Wire the decode pipeline into an audio sink
    pub output_to_speaker: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_millis(100),
            gap_max_wait: Duration::from_secs(1),
            retransmit_limit: 10,
            retransmit_throttle: Duration::from_millis(5),
            software_volume: false,
            output_to_speaker: true,
        }
    }
}

impl ReceiverConfig {
    /// Set the per-gap retransmission timeout
    #[must_use]
    pub fn retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.retransmit_timeout = timeout;
        self
    }

    /// Set the forced-skip bound for unfillable gaps
    #[must_use]
    pub fn gap_max_wait(mut self, wait: Duration) -> Self {
        self.gap_max_wait = wait;
        self
    }

    /// Set the retransmission concurrency limit
    #[must_use]
    pub fn retransmit_limit(mut self, limit: usize) -> Self {
        self.retransmit_limit = limit;
        self
    }

    /// Set the retransmission throttle interval
    #[must_use]
    pub fn retransmit_throttle(mut self, throttle: Duration) -> Self {
        self.retransmit_throttle = throttle;
        self
    }

    /// Enable or disable the software volume stage
    #[must_use]
    pub fn software_volume(mut self, enabled: bool) -> Self {
        self.software_volume = enabled;
        self
    }

    /// Enable or disable the audio sink stage
    #[must_use]
    pub fn output_to_speaker(mut self, enabled: bool) -> Self {
        self.output_to_speaker = enabled;
        self
    }
}

//! Run timing and the bench-wide relay feedback id

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing of a test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Frame reporting the state of every relay, one byte per relay
    #[serde(with = "crate::plan::frame_id")]
    pub relay_feedback_id: u32,
    /// Wait after each relay edge
    pub debounce_ms: u64,
    /// Deadline for a fresh relay feedback frame
    pub relay_feedback_timeout_ms: u64,
    /// Deadline for a fresh analog feedback frame, per sweep step
    pub sweep_feedback_timeout_ms: u64,
    /// Settle after the prelude put the bench in its safe state
    pub prelude_settle_ms: u64,
    /// Settle after switching the multiplexer
    pub mux_settle_ms: u64,
    /// Pause between two signals
    pub inter_signal_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            relay_feedback_id: 0x30,
            debounce_ms: 100,
            relay_feedback_timeout_ms: 500,
            sweep_feedback_timeout_ms: 300,
            prelude_settle_ms: 1000,
            mux_settle_ms: 10,
            inter_signal_delay_ms: 500,
        }
    }
}

impl RunnerConfig {
    /// Short timings for simulated benches and tests
    pub fn fast() -> Self {
        Self {
            debounce_ms: 20,
            relay_feedback_timeout_ms: 200,
            sweep_feedback_timeout_ms: 100,
            prelude_settle_ms: 10,
            mux_settle_ms: 1,
            inter_signal_delay_ms: 5,
            ..Self::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn relay_feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_feedback_timeout_ms)
    }

    pub fn sweep_feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_feedback_timeout_ms)
    }

    pub fn prelude_settle(&self) -> Duration {
        Duration::from_millis(self.prelude_settle_ms)
    }

    pub fn mux_settle(&self) -> Duration {
        Duration::from_millis(self.mux_settle_ms)
    }

    pub fn inter_signal_delay(&self) -> Duration {
        Duration::from_millis(self.inter_signal_delay_ms)
    }
}

//! Error types for test orchestration

use thiserror::Error;

/// Failures of a hardware capability (GPIO, DAC, ADC)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HardwareError {
    /// Requested voltage outside the output range
    #[error("voltage {volts:.3} V outside 0..={max:.3} V")]
    VoltageOutOfRange { volts: f64, max: f64 },

    /// Multiplexer has channels 0..=7 only
    #[error("multiplexer channel {0} does not exist")]
    InvalidMuxChannel(u8),

    /// Capability is not fitted on this bench
    #[error("{0} not available")]
    Unavailable(&'static str),

    /// Driver reported a failure
    #[error("{device}: {reason}")]
    Driver { device: String, reason: String },
}

/// Problems found in a test-definition document
#[derive(Debug, Error)]
pub enum PlanError {
    /// Document is not valid JSON or does not match the schema
    #[error("invalid test plan: {0}")]
    Json(#[from] serde_json::Error),

    /// Two signals share a name
    #[error("duplicate signal name: {0}")]
    DuplicateSignal(String),

    /// Test method does not fit the signal category
    #[error("test {test:?} of signal {signal:?} uses {method} on a {category} signal")]
    MethodMismatch {
        signal: String,
        test: String,
        method: &'static str,
        category: &'static str,
    },

    /// Parameter outside its allowed range
    #[error("test {test:?} of signal {signal:?}: {reason}")]
    InvalidParameter {
        signal: String,
        test: String,
        reason: String,
    },
}

/// Reasons a run could not start
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    /// No valid bus connection when the run was requested
    #[error("CAN bus is not initialized; check the adapter connection")]
    BusNotInitialized,

    /// A run is already in progress
    #[error("a test run is already in progress")]
    RunInProgress,
}

/// Reasons a manual relay command was refused
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Outputs belong to the run until it ends
    #[error("a test run is in progress")]
    RunInProgress,

    /// Signal has no relay output in the bench wiring
    #[error("no relay output mapped for {0}")]
    UnknownRelay(String),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

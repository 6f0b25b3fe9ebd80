//! Unified event stream for the bench
//!
//! Link status, live sweep data, test outcomes and run progress all travel
//! through one channel so a front end (the CLI, or a GUI) observes them in
//! the order they happened.

use crate::result::{AbortReason, RunReport, SignalResult, TestResult};

/// What went wrong, for the terminal error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A run was requested without a live bus connection
    BusNotInitialized,
    /// A run could not start or failed outside a test case
    Run,
    /// Connection management failed
    Link,
}

/// Unified event enum for all bench activity
#[derive(Debug, Clone)]
pub enum BenchEvent {
    // -------------------------------------------------------------------------
    // Link events
    // -------------------------------------------------------------------------
    /// Result of a health-check cycle
    LinkStatus {
        /// Whether a usable connection exists
        connected: bool,
        /// Interface the connection runs on
        interface: Option<String>,
    },

    /// Supply reference read during the health-check cycle
    ReferenceVoltage {
        /// Volts, `None` when the ADC is absent or the read failed
        volts: Option<f64>,
    },

    // -------------------------------------------------------------------------
    // Run events
    // -------------------------------------------------------------------------
    /// Human-readable progress line
    Progress { message: String },

    /// One step of an analog sweep, for live plotting
    SweepStep {
        signal: String,
        applied: f64,
        /// Voltage reported on the bus, `None` when no fresh frame decoded
        feedback: Option<f64>,
        /// Voltage measured by the bench ADC, `None` when the read failed
        adc: Option<f64>,
    },

    /// A test case finished
    TestCompleted { signal: String, result: TestResult },

    /// All test cases of a signal finished
    SignalCompleted(SignalResult),

    /// The run stopped before the last signal
    RunAborted { reason: AbortReason },

    /// Terminal event of every run that started
    RunFinished(RunReport),

    /// Error outside any single test case
    Error { kind: ErrorKind, message: String },
}

impl BenchEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        BenchEvent::Progress {
            message: message.into(),
        }
    }

    /// Check if this event belongs to a run rather than to link supervision
    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            BenchEvent::Progress { .. }
                | BenchEvent::SweepStep { .. }
                | BenchEvent::TestCompleted { .. }
                | BenchEvent::SignalCompleted(_)
                | BenchEvent::RunAborted { .. }
                | BenchEvent::RunFinished(_)
        )
    }

    /// Check if this is a link supervision event
    pub fn is_link_event(&self) -> bool {
        matches!(
            self,
            BenchEvent::LinkStatus { .. } | BenchEvent::ReferenceVoltage { .. }
        )
    }

    /// Get the signal name if this event concerns a specific signal
    pub fn signal(&self) -> Option<&str> {
        match self {
            BenchEvent::SweepStep { signal, .. } | BenchEvent::TestCompleted { signal, .. } => {
                Some(signal)
            }
            BenchEvent::SignalCompleted(result) => Some(&result.name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SignalCategory;

    #[test]
    fn test_event_classification() {
        let step = BenchEvent::SweepStep {
            signal: "Throttle".to_string(),
            applied: 1.0,
            feedback: Some(1.01),
            adc: None,
        };
        assert!(step.is_run_event());
        assert!(!step.is_link_event());
        assert_eq!(step.signal(), Some("Throttle"));

        let status = BenchEvent::LinkStatus {
            connected: true,
            interface: Some("can0".to_string()),
        };
        assert!(status.is_link_event());
        assert_eq!(status.signal(), None);

        let error = BenchEvent::Error {
            kind: ErrorKind::BusNotInitialized,
            message: "no bus".to_string(),
        };
        assert!(!error.is_run_event());
    }

    #[test]
    fn test_signal_extraction() {
        let done = BenchEvent::SignalCompleted(SignalResult::new("Reverse", SignalCategory::Digital));
        assert_eq!(done.signal(), Some("Reverse"));
        assert_eq!(BenchEvent::progress("Starting tests...").signal(), None);
    }
}

//! Test outcomes
//!
//! A run produces one [`SignalResult`] per evaluated signal, each holding the
//! [`TestResult`] of every test case in plan order. The whole run is wrapped
//! in a [`RunReport`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::SignalCategory;

/// PASS or FAIL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
}

impl Status {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            Status::Pass
        } else {
            Status::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value observed by a test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservedValue {
    /// Payload byte of a relay feedback frame
    Byte(u8),
    /// Decoded voltage
    Volts(f64),
}

impl fmt::Display for ObservedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservedValue::Byte(b) => write!(f, "{}", b),
            ObservedValue::Volts(v) => write!(f, "{:.2}", v),
        }
    }
}

/// Slack added to tolerance comparisons, in volts
pub const TOLERANCE_EPSILON: f64 = 1e-9;

/// One step of an analog sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    /// Voltage written to the analog output
    pub applied: f64,
    /// Voltage reported on the bus, if a fresh frame decoded
    pub feedback: Option<f64>,
    /// Voltage measured by the bench ADC, if the read succeeded
    pub adc: Option<f64>,
}

impl SweepPoint {
    /// Whether the reported voltage lies within `tolerance` of the applied
    /// one. Steps without feedback count as matching.
    pub fn within(&self, tolerance: f64) -> bool {
        match self.feedback {
            Some(feedback) => (self.applied - feedback).abs() <= tolerance + TOLERANCE_EPSILON,
            None => true,
        }
    }
}

/// Outcome of one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub value: Option<ObservedValue>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_trace: Option<Vec<SweepPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    /// FAIL without an observed value
    pub fn failed(test_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            value: None,
            passed: false,
            sweep_trace: None,
            error: Some(error.into()),
        }
    }

    pub fn digital(test_name: impl Into<String>, observed: Option<u8>, passed: bool) -> Self {
        Self {
            test_name: test_name.into(),
            value: observed.map(ObservedValue::Byte),
            passed,
            sweep_trace: None,
            error: None,
        }
    }

    /// Sweep outcome; the value is the feedback of the last step that had one
    pub fn sweep(
        test_name: impl Into<String>,
        passed: bool,
        trace: Vec<SweepPoint>,
        error: Option<String>,
    ) -> Self {
        let value = trace
            .iter()
            .rev()
            .find_map(|point| point.feedback)
            .map(ObservedValue::Volts);
        Self {
            test_name: test_name.into(),
            value,
            passed,
            sweep_trace: Some(trace),
            error,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn status(&self) -> Status {
        Status::from_passed(self.passed)
    }
}

/// Outcome of all test cases of one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    pub name: String,
    pub category: SignalCategory,
    pub status: Status,
    pub tests: Vec<TestResult>,
}

impl SignalResult {
    pub fn new(name: impl Into<String>, category: SignalCategory) -> Self {
        Self {
            name: name.into(),
            category,
            status: Status::Pass,
            tests: Vec::new(),
        }
    }

    /// Append a test outcome. The first failure flips the signal to FAIL.
    pub fn record(&mut self, result: TestResult) {
        if !result.passed {
            self.status = Status::Fail;
        }
        self.tests.push(result);
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Pass
    }
}

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Operator requested a stop
    Cancelled,
    /// The bus connection the run started with went away
    LinkLost,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => f.write_str("stopped by operator"),
            AbortReason::LinkLost => f.write_str("CAN connection lost"),
        }
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Aborted)
    }
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub phase: RunPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub signals: Vec<SignalResult>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn passed_count(&self) -> usize {
        self.signals.iter().filter(|s| s.passed()).count()
    }

    pub fn total(&self) -> usize {
        self.signals.len()
    }

    /// Completed with every signal passing
    pub fn all_passed(&self) -> bool {
        self.phase == RunPhase::Completed && self.signals.iter().all(SignalResult::passed)
    }
}

//! Test-definition document
//!
//! A plan lists the signals of the device under test and, per signal, the
//! test cases to run. It is plain JSON:
//!
//! ```json
//! {
//!   "signals": [
//!     {
//!       "name": "Key Switch",
//!       "category": "digital",
//!       "tests": [
//!         { "test_name": "Key On", "method": "digital_write",
//!           "config": { "data_byte_index": 0, "expected_byte": 1 } }
//!       ]
//!     },
//!     {
//!       "name": "Throttle",
//!       "category": "analog",
//!       "mux_channel": 1,
//!       "tests": [
//!         { "test_name": "Throttle Sweep", "method": "analog_output",
//!           "config": { "feedback_frame_id": "0x40", "data_byte_index": 0,
//!                       "byte_length": 2, "tolerance_volt": 0.1 } }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! The older layout that nests the bus fields under `can_feedback`
//! (`can_id`, `data_index`, `byte_length`, `expected_data_bytes`) is accepted
//! as well.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use eol_protocol::ByteLength;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PlanError;

/// Kind of signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalCategory {
    Digital,
    Analog,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Digital => "digital",
            SignalCategory::Analog => "analog",
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a test case drives the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMethod {
    /// Toggle a relay output and check its reported state
    DigitalWrite,
    /// Sweep the analog output and compare the reported voltage
    AnalogOutput,
}

impl TestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestMethod::DigitalWrite => "digital_write",
            TestMethod::AnalogOutput => "analog_output",
        }
    }

    /// Signal category this method applies to
    pub fn category(&self) -> SignalCategory {
        match self {
            TestMethod::DigitalWrite => SignalCategory::Digital,
            TestMethod::AnalogOutput => SignalCategory::Analog,
        }
    }
}

/// Input of the bench ADC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AdcChannel {
    #[default]
    P0,
    P1,
    P2,
    P3,
}

impl AdcChannel {
    pub fn index(&self) -> u8 {
        match self {
            AdcChannel::P0 => 0,
            AdcChannel::P1 => 1,
            AdcChannel::P2 => 2,
            AdcChannel::P3 => 3,
        }
    }
}

impl fmt::Display for AdcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.index())
    }
}

/// Parameters of a relay test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalConfig {
    /// Feedback frame; the bench-wide relay feedback id when unset
    #[serde(default, with = "opt_frame_id", skip_serializing_if = "Option::is_none")]
    pub feedback_frame_id: Option<u32>,
    /// Payload byte carrying this relay's state
    #[serde(default)]
    pub data_byte_index: usize,
    /// Value reported while the relay is asserted
    pub expected_byte: u8,
}

/// Parameters of an analog sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogConfig {
    #[serde(with = "frame_id")]
    pub feedback_frame_id: u32,
    #[serde(default)]
    pub data_byte_index: usize,
    #[serde(default)]
    pub byte_length: ByteLength,
    #[serde(default = "default_tolerance")]
    pub tolerance_volt: f64,
    #[serde(default)]
    pub adc_channel: AdcChannel,
    #[serde(default = "default_step_millivolt")]
    pub step_millivolt: u32,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl AnalogConfig {
    pub fn step_volts(&self) -> f64 {
        self.step_millivolt as f64 / 1000.0
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn default_tolerance() -> f64 {
    0.1
}

fn default_step_millivolt() -> u32 {
    100
}

fn default_settle_delay_ms() -> u64 {
    200
}

/// Method-specific parameters
#[derive(Debug, Clone, PartialEq)]
pub enum TestKind {
    Digital(DigitalConfig),
    Analog(AnalogConfig),
}

impl TestKind {
    pub fn method(&self) -> TestMethod {
        match self {
            TestKind::Digital(_) => TestMethod::DigitalWrite,
            TestKind::Analog(_) => TestMethod::AnalogOutput,
        }
    }
}

/// One test of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTestCase", into = "RawTestCase")]
pub struct TestCase {
    pub test_name: String,
    pub kind: TestKind,
}

impl TestCase {
    pub fn digital(test_name: impl Into<String>, config: DigitalConfig) -> Self {
        Self {
            test_name: test_name.into(),
            kind: TestKind::Digital(config),
        }
    }

    pub fn analog(test_name: impl Into<String>, config: AnalogConfig) -> Self {
        Self {
            test_name: test_name.into(),
            kind: TestKind::Analog(config),
        }
    }

    pub fn method(&self) -> TestMethod {
        self.kind.method()
    }
}

/// Wire shape of a test case: method tag plus free-form config
#[derive(Serialize, Deserialize)]
struct RawTestCase {
    test_name: String,
    method: TestMethod,
    #[serde(default)]
    config: Value,
}

impl TryFrom<RawTestCase> for TestCase {
    type Error = serde_json::Error;

    fn try_from(raw: RawTestCase) -> Result<Self, Self::Error> {
        let config = flatten_can_feedback(raw.config);
        let kind = match raw.method {
            TestMethod::DigitalWrite => TestKind::Digital(serde_json::from_value(config)?),
            TestMethod::AnalogOutput => TestKind::Analog(serde_json::from_value(config)?),
        };
        Ok(Self {
            test_name: raw.test_name,
            kind,
        })
    }
}

impl From<TestCase> for RawTestCase {
    fn from(case: TestCase) -> Self {
        let method = case.method();
        let config = match &case.kind {
            TestKind::Digital(config) => serde_json::to_value(config),
            TestKind::Analog(config) => serde_json::to_value(config),
        };
        Self {
            test_name: case.test_name,
            method,
            config: config.unwrap_or_default(),
        }
    }
}

/// Lift the fields of a nested `can_feedback` object to the top level
fn flatten_can_feedback(config: Value) -> Value {
    let mut map = match config {
        Value::Object(map) => map,
        other => return other,
    };
    let Some(Value::Object(feedback)) = map.remove("can_feedback") else {
        return Value::Object(map);
    };

    let lift = |from: &str, to: &str, map: &mut Map<String, Value>| {
        if let Some(value) = feedback.get(from) {
            map.entry(to.to_string()).or_insert_with(|| value.clone());
        }
    };
    lift("can_id", "feedback_frame_id", &mut map);
    lift("data_index", "data_byte_index", &mut map);
    lift("byte_length", "byte_length", &mut map);

    if let Some(first) = feedback
        .get("expected_data_bytes")
        .and_then(Value::as_array)
        .and_then(|bytes| bytes.first())
    {
        map.entry("expected_byte".to_string())
            .or_insert_with(|| first.clone());
    }
    Value::Object(map)
}

/// A signal of the device under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub category: SignalCategory,
    /// Multiplexer path routing the analog output to this signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux_channel: Option<u8>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

/// The whole test-definition document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestPlan {
    pub signals: Vec<Signal>,
}

impl TestPlan {
    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        let plan: TestPlan = serde_json::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check structural rules that do not depend on the bench wiring.
    ///
    /// Missing multiplexer channels are not rejected here; they fail the
    /// affected test at run time without touching the hardware.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut names = HashSet::new();
        for signal in &self.signals {
            if !names.insert(signal.name.as_str()) {
                return Err(PlanError::DuplicateSignal(signal.name.clone()));
            }

            for test in &signal.tests {
                let method = test.method();
                if method.category() != signal.category {
                    return Err(PlanError::MethodMismatch {
                        signal: signal.name.clone(),
                        test: test.test_name.clone(),
                        method: method.as_str(),
                        category: signal.category.as_str(),
                    });
                }

                if let TestKind::Analog(config) = &test.kind {
                    let invalid = |reason: &str| PlanError::InvalidParameter {
                        signal: signal.name.clone(),
                        test: test.test_name.clone(),
                        reason: reason.to_string(),
                    };
                    if config.step_millivolt == 0 {
                        return Err(invalid("step_millivolt must be positive"));
                    }
                    if !(config.tolerance_volt >= 0.0) {
                        return Err(invalid("tolerance_volt must be zero or positive"));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|signal| signal.name == name)
    }

    /// Total number of test cases
    pub fn test_count(&self) -> usize {
        self.signals.iter().map(|signal| signal.tests.len()).sum()
    }
}

/// Frame ids are written as `"0x30"` and read from hex strings, decimal
/// strings or plain numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFrameId {
    Number(u64),
    Text(String),
}

impl RawFrameId {
    fn resolve<E: serde::de::Error>(self) -> Result<u32, E> {
        match self {
            RawFrameId::Number(n) => u32::try_from(n)
                .ok()
                .filter(|id| *id <= eol_protocol::frame::MAX_EXTENDED_ID)
                .ok_or_else(|| E::custom(format!("frame id {} out of range", n))),
            RawFrameId::Text(text) => eol_protocol::parse_frame_id(&text).map_err(E::custom),
        }
    }
}

pub(crate) mod frame_id {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::RawFrameId;

    pub fn serialize<S: Serializer>(id: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{:X}", id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        RawFrameId::deserialize(deserializer)?.resolve()
    }
}

mod opt_frame_id {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::RawFrameId;

    pub fn serialize<S: Serializer>(id: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_str(&format!("0x{:X}", id)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u32>, D::Error> {
        Option::<RawFrameId>::deserialize(deserializer)?
            .map(RawFrameId::resolve)
            .transpose()
    }
}

//! Virtual device under test
//!
//! The ECU watches the simulated bench and reports what it "sees" in cyclic
//! status frames:
//!
//! - relay feedback: one byte per relay, set to a configured value while the
//!   relay's output line is asserted
//! - analog feedback: the 12-bit code of `dac * gain + offset`, sent only
//!   while the multiplexer routes the DAC to that input
//!
//! Probe frames from the host are counted so link supervision can be checked.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eol_protocol::feedback::volts_to_code;
use eol_protocol::{ByteLength, Frame};
use eol_runner::{BenchWiring, RunnerConfig, SignalCategory, TestKind, TestPlan};
use tracing::{debug, warn};

use crate::bench::SimBench;

/// Default status period of the virtual ECU
pub const STATUS_PERIOD: Duration = Duration::from_millis(20);

/// Relay whose state the ECU reports
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEcho {
    pub output_line: u8,
    pub frame_id: u32,
    pub byte_index: usize,
    /// Byte sent while the relay is asserted; 0 otherwise
    pub on_value: u8,
}

/// Analog input whose voltage the ECU reports
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogEcho {
    pub mux_channel: u8,
    pub frame_id: u32,
    pub byte_index: usize,
    pub byte_length: ByteLength,
    pub gain: f64,
    pub offset: f64,
}

impl AnalogEcho {
    /// Voltage the ECU believes it sees for a given DAC output
    pub fn measured(&self, dac_volts: f64) -> f64 {
        dac_volts * self.gain + self.offset
    }
}

/// Behaviour of the virtual ECU
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualEcuConfig {
    pub relays: Vec<RelayEcho>,
    pub analog: Vec<AnalogEcho>,
    /// Full scale used to encode analog codes
    pub full_scale_volts: f64,
    /// Id of the host's health probe
    pub probe_id: u32,
    pub period: Duration,
}

impl Default for VirtualEcuConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            analog: Vec::new(),
            full_scale_volts: crate::bench::SIM_DAC_MAX_VOLTAGE,
            probe_id: 0x123,
            period: STATUS_PERIOD,
        }
    }
}

impl VirtualEcuConfig {
    /// An ECU that passes every test of `plan` on a bench wired as `wiring`
    pub fn from_plan(plan: &TestPlan, wiring: &BenchWiring, runner: &RunnerConfig) -> Self {
        let mut config = Self::default();
        for signal in &plan.signals {
            for test in &signal.tests {
                match (&test.kind, signal.category) {
                    (TestKind::Digital(digital), SignalCategory::Digital) => {
                        let Some(output_line) = wiring.relay_output(&signal.name) else {
                            continue;
                        };
                        config.relays.push(RelayEcho {
                            output_line,
                            frame_id: digital.feedback_frame_id.unwrap_or(runner.relay_feedback_id),
                            byte_index: digital.data_byte_index,
                            on_value: digital.expected_byte,
                        });
                    }
                    (TestKind::Analog(analog), SignalCategory::Analog) => {
                        let Some(mux_channel) = signal.mux_channel else {
                            continue;
                        };
                        config.analog.push(AnalogEcho {
                            mux_channel,
                            frame_id: analog.feedback_frame_id,
                            byte_index: analog.data_byte_index,
                            byte_length: analog.byte_length,
                            gain: 1.0,
                            offset: 0.0,
                        });
                    }
                    _ => {}
                }
            }
        }
        config
    }

    /// Apply `gain`/`offset` to every analog input on `mux_channel`
    pub fn with_analog_error(mut self, mux_channel: u8, gain: f64, offset: f64) -> Self {
        for echo in self.analog.iter_mut().filter(|e| e.mux_channel == mux_channel) {
            echo.gain = gain;
            echo.offset = offset;
        }
        self
    }

    /// Stop answering for the relay on `output_line`
    pub fn without_relay(mut self, output_line: u8) -> Self {
        self.relays.retain(|echo| echo.output_line != output_line);
        self
    }
}

/// The simulated ECU
#[derive(Debug)]
pub struct VirtualEcu {
    config: VirtualEcuConfig,
    bench: Arc<SimBench>,
    probes: AtomicU64,
}

impl VirtualEcu {
    pub fn new(config: VirtualEcuConfig, bench: Arc<SimBench>) -> Arc<Self> {
        Arc::new(Self {
            config,
            bench,
            probes: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &VirtualEcuConfig {
        &self.config
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }

    /// Health probes received from the host
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Frames for one status cycle, reflecting the bench right now
    pub fn status_frames(&self) -> Vec<Frame> {
        let mut payloads: BTreeMap<u32, Vec<u8>> = BTreeMap::new();

        for echo in &self.config.relays {
            let payload = payloads.entry(echo.frame_id).or_default();
            if payload.len() <= echo.byte_index {
                payload.resize(echo.byte_index + 1, 0);
            }
            if self.bench.output(echo.output_line) {
                payload[echo.byte_index] = echo.on_value;
            }
        }

        let mux_channel = self.bench.mux_channel();
        let dac_volts = self.bench.dac_voltage();
        for echo in self
            .config
            .analog
            .iter()
            .filter(|echo| echo.mux_channel == mux_channel)
        {
            let code = volts_to_code(echo.measured(dac_volts), self.config.full_scale_volts);
            let payload = payloads.entry(echo.frame_id).or_default();
            let end = echo.byte_index + echo.byte_length.bytes();
            if payload.len() < end {
                payload.resize(end, 0);
            }
            match echo.byte_length {
                ByteLength::One => payload[echo.byte_index] = code.min(u8::MAX as u16) as u8,
                ByteLength::Two => {
                    payload[echo.byte_index..end].copy_from_slice(&code.to_be_bytes())
                }
            }
        }

        payloads
            .into_iter()
            .filter_map(|(id, payload)| match Frame::new(id, &payload) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!("Virtual ECU cannot build frame 0x{:X}: {}", id, e);
                    None
                }
            })
            .collect()
    }

    /// React to a frame from the host
    pub fn handle_frame(&self, frame: &Frame) {
        if frame.id() == self.config.probe_id {
            self.probes.fetch_add(1, Ordering::SeqCst);
            debug!("Virtual ECU received probe {}", frame);
        }
    }
}

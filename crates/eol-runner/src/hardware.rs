//! Hardware capabilities of the test bench
//!
//! The runner never talks to GPIO, DAC or ADC drivers directly. It receives
//! them as trait objects bundled in a [`Bench`] together with the wiring that
//! says which output line drives which relay and which lines select the
//! multiplexer channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ControlError, HardwareError};
use crate::plan::AdcChannel;

/// Channels reachable through the three select lines
pub const MUX_CHANNELS: u8 = 8;

/// Relay and multiplexer select lines
pub trait DigitalOutputs: Send + Sync {
    /// Drive one output line. `asserted` means "relay energised" / "select
    /// bit set"; the driver maps it to the physical level (relays on this
    /// bench are active-low).
    fn set_digital_output(&self, line: u8, asserted: bool) -> Result<(), HardwareError>;
}

/// Bench DAC feeding the multiplexer
pub trait AnalogOutput: Send + Sync {
    fn write_voltage(&self, volts: f64) -> Result<(), HardwareError>;

    /// Full-scale output voltage
    fn max_voltage(&self) -> f64;
}

/// Bench ADC
pub trait AnalogInput: Send + Sync {
    fn read_voltage(&self, channel: AdcChannel) -> Result<f64, HardwareError>;

    /// Supply reference, used for the secondary health readout
    fn read_reference_voltage(&self) -> Result<f64, HardwareError>;
}

/// Which output line does what
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchWiring {
    /// Relay output line per digital signal name
    pub relay_outputs: BTreeMap<String, u8>,
    /// Multiplexer select lines, S0 (LSB) first
    pub mux_select_lines: [u8; 3],
}

impl Default for BenchWiring {
    fn default() -> Self {
        let relay_outputs = [("Key Switch", 17), ("Reverse", 27), ("Boost", 22), ("Forward", 23)]
            .into_iter()
            .map(|(name, line)| (name.to_string(), line))
            .collect();
        Self {
            relay_outputs,
            mux_select_lines: [5, 6, 26],
        }
    }
}

impl BenchWiring {
    pub fn relay_output(&self, signal: &str) -> Option<u8> {
        self.relay_outputs.get(signal).copied()
    }
}

/// The hardware a run may touch
#[derive(Clone)]
pub struct Bench {
    outputs: Arc<dyn DigitalOutputs>,
    analog_out: Option<Arc<dyn AnalogOutput>>,
    analog_in: Option<Arc<dyn AnalogInput>>,
    wiring: BenchWiring,
}

impl Bench {
    pub fn new(outputs: Arc<dyn DigitalOutputs>, wiring: BenchWiring) -> Self {
        Self {
            outputs,
            analog_out: None,
            analog_in: None,
            wiring,
        }
    }

    pub fn with_analog_output(mut self, dac: Arc<dyn AnalogOutput>) -> Self {
        self.analog_out = Some(dac);
        self
    }

    pub fn with_analog_input(mut self, adc: Arc<dyn AnalogInput>) -> Self {
        self.analog_in = Some(adc);
        self
    }

    pub fn wiring(&self) -> &BenchWiring {
        &self.wiring
    }

    pub fn analog_output(&self) -> Option<&dyn AnalogOutput> {
        self.analog_out.as_deref()
    }

    pub fn set_relay(&self, line: u8, asserted: bool) -> Result<(), HardwareError> {
        debug!(
            "Relay line {} {}",
            line,
            if asserted { "asserted" } else { "released" }
        );
        self.outputs.set_digital_output(line, asserted)
    }

    /// Switch the relay of a named signal; returns the output line used
    pub fn set_signal_relay(&self, signal: &str, asserted: bool) -> Result<u8, ControlError> {
        let line = self
            .wiring
            .relay_output(signal)
            .ok_or_else(|| ControlError::UnknownRelay(signal.to_string()))?;
        self.set_relay(line, asserted)?;
        Ok(line)
    }

    /// Drive the select lines for `channel`
    pub fn select_mux_channel(&self, channel: u8) -> Result<(), HardwareError> {
        if channel >= MUX_CHANNELS {
            return Err(HardwareError::InvalidMuxChannel(channel));
        }
        for (bit, line) in self.wiring.mux_select_lines.iter().enumerate() {
            self.outputs
                .set_digital_output(*line, (channel >> bit) & 1 == 1)?;
        }
        debug!("Multiplexer set to channel {}", channel);
        Ok(())
    }

    pub fn read_adc(&self, channel: AdcChannel) -> Result<f64, HardwareError> {
        match &self.analog_in {
            Some(adc) => adc.read_voltage(channel),
            None => Err(HardwareError::Unavailable("analog input")),
        }
    }

    pub fn read_reference_voltage(&self) -> Result<f64, HardwareError> {
        match &self.analog_in {
            Some(adc) => adc.read_reference_voltage(),
            None => Err(HardwareError::Unavailable("analog input")),
        }
    }

    /// Release every mapped relay. All lines are attempted even if one fails.
    pub fn release_relays(&self) -> Vec<HardwareError> {
        self.wiring
            .relay_outputs
            .values()
            .filter_map(|line| self.outputs.set_digital_output(*line, false).err())
            .collect()
    }

    /// Drive every multiplexer select line low (channel 0). All lines are
    /// attempted even if one fails.
    pub fn reset_mux(&self) -> Vec<HardwareError> {
        self.wiring
            .mux_select_lines
            .iter()
            .filter_map(|line| self.outputs.set_digital_output(*line, false).err())
            .collect()
    }

    /// Relays released, multiplexer on channel 0, analog output at 0 V.
    ///
    /// Every step is attempted; failures are logged and returned.
    pub fn force_safe_state(&self) -> Vec<HardwareError> {
        let mut failures = self.release_relays();
        failures.extend(self.reset_mux());
        if let Some(dac) = &self.analog_out {
            if let Err(e) = dac.write_voltage(0.0) {
                failures.push(e);
            }
        }

        for failure in &failures {
            warn!("Safe-state step failed: {}", failure);
        }
        failures
    }
}

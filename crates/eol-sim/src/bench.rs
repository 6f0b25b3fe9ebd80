//! Simulated bench hardware
//!
//! One object stands in for the GPIO expander, the DAC and the ADC. It
//! records every action so tests can check what the runner did to the
//! hardware, and it is shared with the virtual ECU, which reads the relay
//! and multiplexer lines to decide what to report on the bus.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eol_runner::{
    AdcChannel, AnalogInput, AnalogOutput, Bench, BenchWiring, DigitalOutputs, HardwareError,
};
use parking_lot::Mutex;
use tracing::trace;

/// Full-scale output of the simulated DAC (MCP4725 on a 3.3 V rail)
pub const SIM_DAC_MAX_VOLTAGE: f64 = 3.3;

/// Supply reference reported by the simulated ADC
pub const SIM_REFERENCE_VOLTAGE: f64 = 3.3;

/// One thing the runner did to the bench
#[derive(Debug, Clone, PartialEq)]
pub enum BenchAction {
    Output { line: u8, asserted: bool },
    Dac(f64),
    AdcRead(AdcChannel),
}

#[derive(Debug, Default)]
struct SimBenchState {
    outputs: BTreeMap<u8, bool>,
    dac_volts: f64,
    history: Vec<BenchAction>,
}

/// GPIO, DAC and ADC of a bench that exists only in memory
#[derive(Debug)]
pub struct SimBench {
    wiring: BenchWiring,
    max_voltage: f64,
    adc_available: AtomicBool,
    state: Mutex<SimBenchState>,
}

impl SimBench {
    pub fn new(wiring: BenchWiring) -> Arc<Self> {
        Self::with_max_voltage(wiring, SIM_DAC_MAX_VOLTAGE)
    }

    pub fn with_max_voltage(wiring: BenchWiring, max_voltage: f64) -> Arc<Self> {
        Arc::new(Self {
            wiring,
            max_voltage,
            adc_available: AtomicBool::new(true),
            state: Mutex::new(SimBenchState::default()),
        })
    }

    /// Bundle this simulation as the runner's bench
    pub fn bench(self: &Arc<Self>) -> Bench {
        Bench::new(self.clone(), self.wiring.clone())
            .with_analog_output(self.clone())
            .with_analog_input(self.clone())
    }

    pub fn wiring(&self) -> &BenchWiring {
        &self.wiring
    }

    /// Make ADC reads fail, as with a disconnected converter
    pub fn set_adc_available(&self, available: bool) {
        self.adc_available.store(available, Ordering::SeqCst);
    }

    pub fn output(&self, line: u8) -> bool {
        self.state.lock().outputs.get(&line).copied().unwrap_or(false)
    }

    /// Multiplexer channel currently selected by the select lines
    pub fn mux_channel(&self) -> u8 {
        let state = self.state.lock();
        self.wiring
            .mux_select_lines
            .iter()
            .enumerate()
            .filter(|(_, line)| state.outputs.get(*line).copied().unwrap_or(false))
            .fold(0, |channel, (bit, _)| channel | (1 << bit))
    }

    pub fn dac_voltage(&self) -> f64 {
        self.state.lock().dac_volts
    }

    /// Relays released, multiplexer on channel 0, DAC at 0 V
    pub fn is_safe(&self) -> bool {
        let relays_released = self
            .wiring
            .relay_outputs
            .values()
            .all(|line| !self.output(*line));
        relays_released && self.mux_channel() == 0 && self.dac_voltage() == 0.0
    }

    pub fn history(&self) -> Vec<BenchAction> {
        self.state.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    /// Every voltage written to the DAC, in order
    pub fn dac_writes(&self) -> Vec<f64> {
        self.state
            .lock()
            .history
            .iter()
            .filter_map(|action| match action {
                BenchAction::Dac(volts) => Some(*volts),
                _ => None,
            })
            .collect()
    }
}

impl DigitalOutputs for SimBench {
    fn set_digital_output(&self, line: u8, asserted: bool) -> Result<(), HardwareError> {
        trace!("Sim output {} -> {}", line, asserted);
        let mut state = self.state.lock();
        state.outputs.insert(line, asserted);
        state.history.push(BenchAction::Output { line, asserted });
        Ok(())
    }
}

impl AnalogOutput for SimBench {
    fn write_voltage(&self, volts: f64) -> Result<(), HardwareError> {
        if !(0.0..=self.max_voltage).contains(&volts) {
            return Err(HardwareError::VoltageOutOfRange {
                volts,
                max: self.max_voltage,
            });
        }
        let mut state = self.state.lock();
        state.dac_volts = volts;
        state.history.push(BenchAction::Dac(volts));
        Ok(())
    }

    fn max_voltage(&self) -> f64 {
        self.max_voltage
    }
}

impl AnalogInput for SimBench {
    /// P0 is wired to the multiplexed analog line and reads the DAC output;
    /// the other inputs are unconnected and read 0 V.
    fn read_voltage(&self, channel: AdcChannel) -> Result<f64, HardwareError> {
        if !self.adc_available.load(Ordering::SeqCst) {
            return Err(HardwareError::Driver {
                device: "sim-adc".to_string(),
                reason: "no response".to_string(),
            });
        }
        let mut state = self.state.lock();
        state.history.push(BenchAction::AdcRead(channel));
        Ok(match channel {
            AdcChannel::P0 => state.dac_volts,
            _ => 0.0,
        })
    }

    fn read_reference_voltage(&self) -> Result<f64, HardwareError> {
        if !self.adc_available.load(Ordering::SeqCst) {
            return Err(HardwareError::Driver {
                device: "sim-adc".to_string(),
                reason: "no response".to_string(),
            });
        }
        Ok(SIM_REFERENCE_VOLTAGE)
    }
}

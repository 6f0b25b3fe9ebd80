//! Analog output sweep
//!
//! Ramps the bench DAC from 0 V to its full-scale output through one
//! multiplexer channel and compares, at every step, the voltage the device
//! reports on the bus with the voltage applied.

use eol_link::{await_fresh, FrameBuffer};
use eol_protocol::feedback::{decode_volts, round_millivolts};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::events::BenchEvent;
use crate::hardware::Bench;
use crate::plan::AnalogConfig;
use crate::result::{AbortReason, SweepPoint};

/// Error text of a sweep that never saw a usable feedback frame
pub const NO_VALID_FEEDBACK: &str = "no valid feedback";

/// Applied voltages of a sweep: 0, step, 2*step, ... up to `max` inclusive.
///
/// Values are rounded to millivolts and never exceed `max`.
pub fn voltage_steps(max: f64, step: f64) -> Vec<f64> {
    if max.is_nan() || step.is_nan() || max < 0.0 || step <= 0.0 {
        return vec![0.0];
    }
    let count = (max / step + 1e-9).floor() as u64;
    (0..=count)
        .map(|i| round_millivolts(i as f64 * step).min(max))
        .collect()
}

/// Judge a finished trace.
///
/// All-null feedback fails with [`NO_VALID_FEEDBACK`]. Otherwise every step
/// that has feedback must lie within `tolerance` of the applied voltage.
pub fn evaluate_sweep(trace: &[SweepPoint], tolerance: f64) -> (bool, Option<String>) {
    if trace.iter().all(|point| point.feedback.is_none()) {
        return (false, Some(NO_VALID_FEEDBACK.to_string()));
    }

    let outside = trace.iter().filter(|point| !point.within(tolerance)).count();
    if outside == 0 {
        (true, None)
    } else {
        (
            false,
            Some(format!("{} step(s) outside ±{:.2} V", outside, tolerance)),
        )
    }
}

/// Result of one sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    pub passed: bool,
    pub trace: Vec<SweepPoint>,
    pub error: Option<String>,
    /// Set when a checkpoint stopped the sweep early
    pub aborted: Option<AbortReason>,
}

impl SweepOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            trace: Vec::new(),
            error: Some(error.into()),
            aborted: None,
        }
    }
}

/// Drives one sweep at a time against the shared bench
pub struct SweepEngine<'a> {
    bench: &'a Bench,
    frames: &'a FrameBuffer,
    config: &'a RunnerConfig,
    events: &'a mpsc::Sender<BenchEvent>,
}

impl<'a> SweepEngine<'a> {
    pub fn new(
        bench: &'a Bench,
        frames: &'a FrameBuffer,
        config: &'a RunnerConfig,
        events: &'a mpsc::Sender<BenchEvent>,
    ) -> Self {
        Self {
            bench,
            frames,
            config,
            events,
        }
    }

    /// Sweep `signal` through `mux_channel`.
    ///
    /// `checkpoint` is consulted before every step; when it returns a reason
    /// the sweep stops and fails with the partial trace.
    pub async fn sweep<F>(
        &self,
        signal: &str,
        test: &AnalogConfig,
        mux_channel: u8,
        checkpoint: F,
    ) -> SweepOutcome
    where
        F: Fn() -> Option<AbortReason>,
    {
        let Some(dac) = self.bench.analog_output() else {
            return SweepOutcome::failed("no analog output fitted");
        };
        let max_voltage = dac.max_voltage();

        if let Err(e) = self.bench.select_mux_channel(mux_channel) {
            return SweepOutcome::failed(format!("multiplexer: {}", e));
        }
        tokio::time::sleep(self.config.mux_settle()).await;

        let steps = voltage_steps(max_voltage, test.step_volts());
        info!(
            "Sweeping {} on channel {}: {} steps up to {:.2} V",
            signal,
            mux_channel,
            steps.len(),
            max_voltage
        );

        let mut trace = Vec::with_capacity(steps.len());
        for applied in steps {
            if let Some(reason) = checkpoint() {
                info!("Sweep of {} stopped at {:.2} V: {}", signal, applied, reason);
                return SweepOutcome {
                    passed: false,
                    trace,
                    error: Some(format!("sweep aborted: {}", reason)),
                    aborted: Some(reason),
                };
            }

            if let Err(e) = dac.write_voltage(applied) {
                warn!("Analog output write of {:.3} V failed: {}", applied, e);
                return SweepOutcome {
                    passed: false,
                    trace,
                    error: Some(format!("analog output: {}", e)),
                    aborted: None,
                };
            }
            tokio::time::sleep(test.settle_delay()).await;

            let adc = match self.bench.read_adc(test.adc_channel) {
                Ok(volts) => Some(volts),
                Err(e) => {
                    debug!("ADC read on {} failed: {}", test.adc_channel, e);
                    None
                }
            };

            let feedback = await_fresh(
                self.frames,
                test.feedback_frame_id,
                self.config.sweep_feedback_timeout(),
            )
            .await
            .and_then(|frame| {
                decode_volts(&frame, test.data_byte_index, test.byte_length, max_voltage)
                    .map_err(|e| warn!("Feedback frame {} undecodable: {}", frame, e))
                    .ok()
            });

            debug!(
                "{} step: applied {:.3} V, feedback {:?}, adc {:?}",
                signal, applied, feedback, adc
            );
            trace.push(SweepPoint {
                applied,
                feedback,
                adc,
            });
            let _ = self
                .events
                .send(BenchEvent::SweepStep {
                    signal: signal.to_string(),
                    applied,
                    feedback,
                    adc,
                })
                .await;
        }

        let (passed, error) = evaluate_sweep(&trace, test.tolerance_volt);
        SweepOutcome {
            passed,
            trace,
            error,
            aborted: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(applied: f64, feedback: Option<f64>) -> SweepPoint {
        SweepPoint {
            applied,
            feedback,
            adc: None,
        }
    }

    #[test]
    fn test_steps_default() {
        let steps = voltage_steps(3.3, 0.1);
        assert_eq!(steps.len(), 34);
        assert_eq!(steps[0], 0.0);
        assert_eq!(steps[1], 0.1);
        assert_eq!(steps[33], 3.3);
    }

    #[test]
    fn test_steps_not_multiple() {
        let steps = voltage_steps(1.05, 0.2);
        assert_eq!(steps, vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]);
    }

    #[test]
    fn test_steps_degenerate() {
        assert_eq!(voltage_steps(0.0, 0.1), vec![0.0]);
        assert_eq!(voltage_steps(5.0, 0.0), vec![0.0]);
    }

    #[test]
    fn test_all_within_tolerance_passes() {
        let trace = vec![point(0.0, Some(0.02)), point(1.0, Some(0.95)), point(2.0, Some(2.1))];
        assert_eq!(evaluate_sweep(&trace, 0.1), (true, None));
    }

    #[test]
    fn test_all_null_fails() {
        let trace = vec![point(0.0, None), point(0.1, None)];
        let (passed, error) = evaluate_sweep(&trace, 0.1);
        assert!(!passed);
        assert_eq!(error.as_deref(), Some(NO_VALID_FEEDBACK));

        assert!(!evaluate_sweep(&[], 0.1).0);
    }

    #[test]
    fn test_one_step_out_of_tolerance_fails() {
        let trace = vec![point(1.9, Some(1.9)), point(2.0, Some(2.3)), point(2.1, Some(2.1))];
        let (passed, error) = evaluate_sweep(&trace, 0.1);
        assert!(!passed);
        assert!(error.unwrap().starts_with("1 step(s)"));
    }

    #[test]
    fn test_null_steps_do_not_fail() {
        let trace = vec![point(0.0, None), point(0.1, Some(0.1)), point(0.2, None)];
        assert!(evaluate_sweep(&trace, 0.05).0);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn steps_are_monotonic_and_bounded(max in 0.0f64..10.0, step_mv in 1u32..2000) {
                let step = step_mv as f64 / 1000.0;
                let steps = voltage_steps(max, step);

                prop_assert_eq!(steps[0], 0.0);
                let last = *steps.last().unwrap();
                prop_assert!(last <= max);
                prop_assert!(max - last < step + 1e-6);
                for pair in steps.windows(2) {
                    prop_assert!(pair[1] >= pair[0]);
                    prop_assert!((pair[1] - pair[0] - step).abs() < 1e-6);
                }
            }
        }
    }
}

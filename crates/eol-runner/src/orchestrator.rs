//! Test run state machine
//!
//! A [`TestRunner`] walks a [`TestPlan`] signal by signal against the shared
//! bench:
//!
//! ```text
//! Idle ──run()──► Running ──► Completed
//!                    │
//!                    └──stop / link lost──► Aborted
//! ```
//!
//! Cancellation is cooperative. A stop request only sets a flag; the run
//! looks at it before each signal, before each test case and before each
//! sweep step. The same checkpoints notice when the connection the run
//! started with has been torn down.
//!
//! Whatever happens, the bench is left with all relays released, the
//! multiplexer on channel 0 and the analog output at 0 V.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eol_link::{await_fresh, ConnectionHandle, FrameBuffer};
use eol_protocol::feedback::read_byte;
use eol_protocol::Frame;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::RunError;
use crate::events::{BenchEvent, ErrorKind};
use crate::hardware::{Bench, MUX_CHANNELS};
use crate::plan::{AnalogConfig, DigitalConfig, Signal, TestKind, TestPlan};
use crate::result::{AbortReason, RunPhase, RunReport, SignalResult, TestResult};
use crate::sweep::SweepEngine;

/// Shared stop request
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Judge a relay feedback frame
pub fn evaluate_digital(
    test_name: &str,
    frame: Option<&Frame>,
    byte_index: usize,
    expected: u8,
) -> TestResult {
    let Some(frame) = frame else {
        return TestResult::digital(test_name, None, false)
            .with_error("no feedback frame before the deadline");
    };
    match read_byte(frame, byte_index) {
        Ok(observed) => TestResult::digital(test_name, Some(observed), observed == expected),
        Err(e) => TestResult::digital(test_name, None, false).with_error(e.to_string()),
    }
}

/// Puts the bench in its safe state when dropped. A run that is still
/// marked `Running` at that point ended abnormally and becomes `Aborted`.
struct SafeStateGuard {
    bench: Bench,
    phase: Arc<Mutex<RunPhase>>,
}

impl Drop for SafeStateGuard {
    fn drop(&mut self) {
        debug!("Forcing bench safe state");
        let failures = self.bench.force_safe_state();
        if !failures.is_empty() {
            error!("{} safe-state step(s) failed", failures.len());
        }

        let mut phase = self.phase.lock();
        if *phase == RunPhase::Running {
            *phase = RunPhase::Aborted;
        }
    }
}

/// Runs test plans against a bench
pub struct TestRunner {
    bench: Bench,
    frames: FrameBuffer,
    link: watch::Receiver<Option<ConnectionHandle>>,
    config: RunnerConfig,
    events: mpsc::Sender<BenchEvent>,
    stop: StopFlag,
    phase: Arc<Mutex<RunPhase>>,
}

impl TestRunner {
    pub fn new(
        bench: Bench,
        frames: FrameBuffer,
        link: watch::Receiver<Option<ConnectionHandle>>,
        config: RunnerConfig,
        events: mpsc::Sender<BenchEvent>,
    ) -> Self {
        Self {
            bench,
            frames,
            link,
            config,
            events,
            stop: StopFlag::new(),
            phase: Arc::new(Mutex::new(RunPhase::Idle)),
        }
    }

    /// Flag that stops the current run at its next checkpoint. It stays
    /// valid across runs and is cleared when a run ends.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock()
    }

    /// Execute every signal of `plan` in order.
    ///
    /// Fails only when there is no live bus connection to start with. Every
    /// problem after that is part of the returned report.
    pub async fn run(&mut self, plan: &TestPlan) -> Result<RunReport, RunError> {
        if self.phase() == RunPhase::Running {
            return Err(RunError::RunInProgress);
        }
        let guard = SafeStateGuard {
            bench: self.bench.clone(),
            phase: self.phase.clone(),
        };

        let handle = self.link.borrow().clone().filter(ConnectionHandle::is_valid);
        let Some(handle) = handle else {
            error!("Run requested without a CAN connection");
            self.emit(BenchEvent::Error {
                kind: ErrorKind::BusNotInitialized,
                message: RunError::BusNotInitialized.to_string(),
            })
            .await;
            drop(guard);
            return Err(RunError::BusNotInitialized);
        };

        *self.phase.lock() = RunPhase::Running;
        let started = Instant::now();
        info!(
            "Starting run of {} signal(s) on {}",
            plan.signals.len(),
            handle.interface()
        );
        self.emit(BenchEvent::progress("Starting tests...")).await;
        self.prelude().await;

        let mut signals = Vec::with_capacity(plan.signals.len());
        let mut abort_reason = None;
        for signal in &plan.signals {
            if let Some(reason) = self.checkpoint(&handle) {
                abort_reason = Some(reason);
                break;
            }

            let (result, aborted) = self.run_signal(signal, &handle).await;
            if aborted.is_none() || !result.tests.is_empty() {
                info!("{}: {}", result.name, result.status);
                self.emit(BenchEvent::SignalCompleted(result.clone())).await;
                signals.push(result);
            }
            if aborted.is_some() {
                abort_reason = aborted;
                break;
            }
            tokio::time::sleep(self.config.inter_signal_delay()).await;
        }

        drop(guard);

        let report = RunReport {
            phase: if abort_reason.is_some() {
                RunPhase::Aborted
            } else {
                RunPhase::Completed
            },
            abort_reason,
            signals,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if let Some(reason) = abort_reason {
            warn!("Run aborted: {}", reason);
            self.emit(BenchEvent::RunAborted { reason }).await;
            let message = match reason {
                AbortReason::Cancelled => "Tests aborted by user.".to_string(),
                AbortReason::LinkLost => format!("Tests aborted: {}.", reason),
            };
            self.emit(BenchEvent::progress(message)).await;
        }
        let summary = format!(
            "Tests completed: {}/{} passed",
            report.passed_count(),
            report.total()
        );
        info!("{}", summary);
        self.emit(BenchEvent::progress(summary)).await;
        self.emit(BenchEvent::RunFinished(report.clone())).await;

        *self.phase.lock() = report.phase;
        self.stop.clear();
        Ok(report)
    }

    async fn emit(&self, event: BenchEvent) {
        let _ = self.events.send(event).await;
    }

    fn checkpoint(&self, handle: &ConnectionHandle) -> Option<AbortReason> {
        if self.stop.is_requested() {
            Some(AbortReason::Cancelled)
        } else if !handle.is_valid() {
            Some(AbortReason::LinkLost)
        } else {
            None
        }
    }

    /// Relays released, multiplexer on channel 0, then settle
    async fn prelude(&self) {
        let mut failures = self.bench.release_relays();
        failures.extend(self.bench.reset_mux());
        for failure in failures {
            warn!("Prelude step failed: {}", failure);
        }
        tokio::time::sleep(self.config.prelude_settle()).await;
    }

    async fn run_signal(
        &self,
        signal: &Signal,
        handle: &ConnectionHandle,
    ) -> (SignalResult, Option<AbortReason>) {
        info!("Testing {}", signal.name);
        self.emit(BenchEvent::progress(format!("Testing {}...", signal.name)))
            .await;

        let mut result = SignalResult::new(&signal.name, signal.category);
        for test in &signal.tests {
            if let Some(reason) = self.checkpoint(handle) {
                return (result, Some(reason));
            }

            let (outcome, aborted) = match &test.kind {
                TestKind::Digital(config) => {
                    (self.run_digital(signal, &test.test_name, config).await, None)
                }
                TestKind::Analog(config) => {
                    self.run_analog(signal, &test.test_name, config, handle).await
                }
            };

            if let Some(error) = &outcome.error {
                debug!("{} / {}: {}", signal.name, outcome.test_name, error);
            }
            self.emit(BenchEvent::TestCompleted {
                signal: signal.name.clone(),
                result: outcome.clone(),
            })
            .await;
            self.emit(BenchEvent::progress(format!(
                "Completed test: {}",
                outcome.test_name
            )))
            .await;
            result.record(outcome);

            if aborted.is_some() {
                return (result, aborted);
            }
        }
        (result, None)
    }

    /// Assert, debounce, correlate, release, debounce, compare
    async fn run_digital(&self, signal: &Signal, test_name: &str, config: &DigitalConfig) -> TestResult {
        let Some(line) = self.bench.wiring().relay_output(&signal.name) else {
            warn!("No relay output mapped for {}", signal.name);
            return TestResult::failed(
                test_name,
                format!("no relay output mapped for {}", signal.name),
            );
        };
        let feedback_id = config
            .feedback_frame_id
            .unwrap_or(self.config.relay_feedback_id);

        if let Err(e) = self.bench.set_relay(line, true) {
            warn!("Could not assert relay for {}: {}", signal.name, e);
            if let Err(e) = self.bench.set_relay(line, false) {
                warn!("Could not release relay for {}: {}", signal.name, e);
            }
            return TestResult::failed(test_name, format!("relay output: {}", e));
        }
        tokio::time::sleep(self.config.debounce()).await;

        let frame = await_fresh(&self.frames, feedback_id, self.config.relay_feedback_timeout()).await;

        if let Err(e) = self.bench.set_relay(line, false) {
            warn!("Could not release relay for {}: {}", signal.name, e);
        }
        tokio::time::sleep(self.config.debounce()).await;

        match &frame {
            Some(frame) => debug!("{} feedback: {}", signal.name, frame),
            None => warn!(
                "No fresh feedback frame 0x{:X} for {}",
                feedback_id, signal.name
            ),
        }
        evaluate_digital(
            test_name,
            frame.as_ref(),
            config.data_byte_index,
            config.expected_byte,
        )
    }

    async fn run_analog(
        &self,
        signal: &Signal,
        test_name: &str,
        config: &AnalogConfig,
        handle: &ConnectionHandle,
    ) -> (TestResult, Option<AbortReason>) {
        let channel = match signal.mux_channel {
            Some(channel) if channel < MUX_CHANNELS => channel,
            Some(channel) => {
                warn!("{}: multiplexer channel {} does not exist", signal.name, channel);
                return (
                    TestResult::failed(
                        test_name,
                        format!("multiplexer channel {} does not exist", channel),
                    ),
                    None,
                );
            }
            None => {
                warn!("{}: no multiplexer channel mapped", signal.name);
                return (
                    TestResult::failed(test_name, "no multiplexer channel mapped"),
                    None,
                );
            }
        };

        let engine = SweepEngine::new(&self.bench, &self.frames, &self.config, &self.events);
        let outcome = engine
            .sweep(&signal.name, config, channel, || self.checkpoint(handle))
            .await;

        if let Some(dac) = self.bench.analog_output() {
            if let Err(e) = dac.write_voltage(0.0) {
                warn!("Could not park analog output at 0 V: {}", e);
            }
        }

        (
            TestResult::sweep(test_name, outcome.passed, outcome.trace, outcome.error),
            outcome.aborted,
        )
    }
}

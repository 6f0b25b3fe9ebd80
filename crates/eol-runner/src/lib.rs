//! EOL Test Runner
//!
//! Sequences a test plan against the bench and the device under test.
//!
//! # Architecture
//!
//! - **Plan**: the JSON test-definition document (signals and their tests)
//! - **Bench**: capability traits for relays, multiplexer, DAC and ADC plus
//!   the wiring that ties signal names to output lines
//! - **TestRunner**: the `Idle → Running → Completed | Aborted` state machine
//!   with cooperative cancellation and an unconditional safe-state epilogue
//! - **SweepEngine**: the analog ramp with per-step bus correlation
//! - **Station actor**: owns the link and the bench, supervises the
//!   connection and runs one plan at a time
//!
//! All progress is published through a single [`BenchEvent`] stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use eol_link::{default_connectors, ChannelManager, FrameBuffer, LinkConfig};
//! use eol_runner::{Bench, RunnerConfig, TestPlan, TestRunner};
//! use tokio::sync::mpsc;
//!
//! # async fn demo(bench: Bench, plan_json: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config = LinkConfig::default();
//! let mut manager = ChannelManager::new(default_connectors(&config), &config, FrameBuffer::new());
//! manager.establish().await?;
//!
//! let (event_tx, _event_rx) = mpsc::channel(256);
//! let mut runner = TestRunner::new(
//!     bench,
//!     manager.frames(),
//!     manager.subscribe(),
//!     RunnerConfig::default(),
//!     event_tx,
//! );
//! let report = runner.run(&TestPlan::from_json(plan_json)?).await?;
//! println!("{}", eol_runner::render_text_report(&report));
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod error;
pub mod events;
pub mod hardware;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod result;
pub mod sweep;

// Re-export actor types
pub use actor::{run_station_actor, StationCommand, StationContext, StationStatus};

pub use config::RunnerConfig;
pub use error::{ControlError, HardwareError, PlanError, RunError};
pub use events::{BenchEvent, ErrorKind};
pub use hardware::{AnalogInput, AnalogOutput, Bench, BenchWiring, DigitalOutputs, MUX_CHANNELS};
pub use orchestrator::{evaluate_digital, StopFlag, TestRunner};
pub use plan::{
    AdcChannel, AnalogConfig, DigitalConfig, Signal, SignalCategory, TestCase, TestKind,
    TestMethod, TestPlan,
};
pub use report::render_text_report;
pub use result::{
    AbortReason, ObservedValue, RunPhase, RunReport, SignalResult, Status, SweepPoint, TestResult,
};
pub use sweep::{evaluate_sweep, voltage_steps, SweepEngine, SweepOutcome, NO_VALID_FEEDBACK};

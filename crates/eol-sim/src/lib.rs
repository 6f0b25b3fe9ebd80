//! EOL Simulation Library
//!
//! Runs the end-of-line tests without a bench or a device under test:
//!
//! - **SimBench**: GPIO, DAC and ADC in memory, with an action history
//! - **VirtualEcu**: a device under test that reports relay states and
//!   analog readings in cyclic CAN frames
//! - **VirtualAdapter**: an SLCAN adapter that can be unplugged and
//!   plugged back in
//!
//! # Example
//!
//! ```rust
//! use eol_runner::{BenchWiring, RunnerConfig, TestPlan};
//! use eol_sim::Simulation;
//!
//! let plan = TestPlan::from_json(r#"{ "signals": [
//!     { "name": "Key Switch", "category": "digital",
//!       "tests": [ { "test_name": "Key On", "method": "digital_write",
//!                    "config": { "expected_byte": 1 } } ] }
//! ] }"#).unwrap();
//!
//! let simulation = Simulation::for_plan(&plan, BenchWiring::default(), &RunnerConfig::default());
//! assert_eq!(simulation.ecu().config().relays.len(), 1);
//! ```

pub mod adapter;
pub mod bench;
pub mod ecu;
pub mod ecu_task;
pub mod simulation;

pub use adapter::{VirtualAdapter, VirtualConnector, VIRTUAL_INTERFACE};
pub use bench::{BenchAction, SimBench, SIM_DAC_MAX_VOLTAGE, SIM_REFERENCE_VOLTAGE};
pub use ecu::{AnalogEcho, RelayEcho, VirtualEcu, VirtualEcuConfig, STATUS_PERIOD};
pub use ecu_task::run_virtual_ecu;
pub use simulation::Simulation;

//! Complete simulated setup: bench, ECU and adapter wired together

use std::sync::Arc;

use eol_link::Connector;
use eol_runner::{Bench, BenchWiring, RunnerConfig, TestPlan};

use crate::adapter::VirtualAdapter;
use crate::bench::SimBench;
use crate::ecu::{VirtualEcu, VirtualEcuConfig};

#[derive(Debug, Clone)]
pub struct Simulation {
    pub sim: Arc<SimBench>,
    pub adapter: Arc<VirtualAdapter>,
}

impl Simulation {
    pub fn new(config: VirtualEcuConfig, wiring: BenchWiring) -> Self {
        let sim = SimBench::new(wiring);
        let ecu = VirtualEcu::new(config, sim.clone());
        Self {
            sim,
            adapter: VirtualAdapter::new(ecu),
        }
    }

    /// A simulation in which every test of `plan` passes
    pub fn for_plan(plan: &TestPlan, wiring: BenchWiring, runner: &RunnerConfig) -> Self {
        let config = VirtualEcuConfig::from_plan(plan, &wiring, runner);
        Self::new(config, wiring)
    }

    pub fn bench(&self) -> Bench {
        self.sim.bench()
    }

    pub fn ecu(&self) -> &Arc<VirtualEcu> {
        self.adapter.ecu()
    }

    /// Connector list for the channel manager
    pub fn connectors(&self) -> Vec<Box<dyn Connector>> {
        vec![Box::new(self.adapter.connector())]
    }
}

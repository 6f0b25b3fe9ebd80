//! Scenario tests: full runs against the simulated bench and ECU

use std::time::Duration;

use eol_link::{ChannelManager, FrameBuffer, LinkConfig};
use eol_runner::{
    run_station_actor, AbortReason, BenchEvent, BenchWiring, ControlError, ErrorKind,
    ObservedValue, RunError, RunPhase, RunnerConfig, StationCommand, StationContext, Status,
    TestPlan, TestRunner, NO_VALID_FEEDBACK,
};
use eol_sim::{BenchAction, Simulation, VirtualEcuConfig};
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Helpers
// ============================================================================

mod helpers {
    use super::*;

    pub const PLAN: &str = r#"{
        "signals": [
            { "name": "Key Switch", "category": "digital",
              "tests": [ { "test_name": "Key On", "method": "digital_write",
                           "config": { "data_byte_index": 0, "expected_byte": 1 } } ] },
            { "name": "Reverse", "category": "digital",
              "tests": [ { "test_name": "Reverse On", "method": "digital_write",
                           "config": { "data_byte_index": 1, "expected_byte": 1 } } ] },
            { "name": "Throttle", "category": "analog", "mux_channel": 2,
              "tests": [ { "test_name": "Throttle Sweep", "method": "analog_output",
                           "config": { "feedback_frame_id": "0x40", "data_byte_index": 0,
                                       "byte_length": 2, "tolerance_volt": 0.1,
                                       "step_millivolt": 300, "settle_delay_ms": 5 } } ] }
        ]
    }"#;

    pub const RELAYS_PLAN: &str = r#"{
        "signals": [
            { "name": "Key Switch", "category": "digital",
              "tests": [ { "test_name": "Key On", "method": "digital_write",
                           "config": { "data_byte_index": 0, "expected_byte": 1 } } ] },
            { "name": "Reverse", "category": "digital",
              "tests": [ { "test_name": "Reverse On", "method": "digital_write",
                           "config": { "data_byte_index": 1, "expected_byte": 1 } } ] },
            { "name": "Boost", "category": "digital",
              "tests": [ { "test_name": "Boost On", "method": "digital_write",
                           "config": { "data_byte_index": 2, "expected_byte": 1 } } ] },
            { "name": "Forward", "category": "digital",
              "tests": [ { "test_name": "Forward On", "method": "digital_write",
                           "config": { "data_byte_index": 3, "expected_byte": 1 } } ] }
        ]
    }"#;

    /// Sweep steps for a 3.3 V DAC in 300 mV steps: 0.0 ..= 3.3
    pub const SWEEP_STEPS: usize = 12;

    pub fn plan(json: &str) -> TestPlan {
        TestPlan::from_json(json).unwrap()
    }

    pub fn link_config() -> LinkConfig {
        LinkConfig {
            receive_timeout_ms: 20,
            retry_settle_ms: 5,
            ..LinkConfig::default()
        }
    }

    pub struct Rig {
        pub simulation: Simulation,
        pub manager: ChannelManager,
        pub runner: TestRunner,
        pub events: mpsc::Receiver<BenchEvent>,
    }

    /// Simulation plus an established link and a runner on top
    pub async fn rig(ecu: VirtualEcuConfig) -> Rig {
        let simulation = Simulation::new(ecu, BenchWiring::default());
        let mut manager =
            ChannelManager::new(simulation.connectors(), &link_config(), FrameBuffer::new());
        manager.establish().await.unwrap();

        let (event_tx, events) = mpsc::channel(1024);
        let runner = TestRunner::new(
            simulation.bench(),
            manager.frames(),
            manager.subscribe(),
            RunnerConfig::fast(),
            event_tx,
        );
        Rig {
            simulation,
            manager,
            runner,
            events,
        }
    }

    /// ECU answering every test of `json`
    pub fn passing_ecu(json: &str) -> VirtualEcuConfig {
        VirtualEcuConfig::from_plan(&plan(json), &BenchWiring::default(), &RunnerConfig::fast())
    }

    pub fn drain(events: &mut mpsc::Receiver<BenchEvent>) -> Vec<BenchEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn wait_for<F>(events: &mut mpsc::Receiver<BenchEvent>, mut matches: F) -> BenchEvent
    where
        F: FnMut(&BenchEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.expect("event stream ended");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

use helpers::*;

// ============================================================================
// Completed runs
// ============================================================================

#[tokio::test]
async fn test_full_plan_passes() {
    let mut rig = rig(passing_ecu(PLAN)).await;

    let report = rig.runner.run(&plan(PLAN)).await.unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.abort_reason, None);
    assert_eq!(report.total(), 3);
    assert!(report.all_passed(), "report: {:#?}", report);
    assert_eq!(rig.runner.phase(), RunPhase::Completed);

    let key = &report.signals[0];
    assert_eq!(key.tests[0].value, Some(ObservedValue::Byte(1)));

    let sweep = &report.signals[2].tests[0];
    let trace = sweep.sweep_trace.as_ref().unwrap();
    assert_eq!(trace.len(), SWEEP_STEPS);
    assert_eq!(trace[0].applied, 0.0);
    assert_eq!(trace[SWEEP_STEPS - 1].applied, 3.3);
    assert!(trace.iter().all(|point| point.feedback.is_some()));
    assert!(trace.iter().all(|point| point.adc.is_some()));

    assert!(rig.simulation.sim.is_safe());

    let events = drain(&mut rig.events);
    assert!(matches!(
        &events[0],
        BenchEvent::Progress { message } if message == "Starting tests..."
    ));
    let steps = events
        .iter()
        .filter(|e| matches!(e, BenchEvent::SweepStep { .. }))
        .count();
    assert_eq!(steps, SWEEP_STEPS);
    let completed = events
        .iter()
        .filter(|e| matches!(e, BenchEvent::SignalCompleted(_)))
        .count();
    assert_eq!(completed, 3);
    assert!(matches!(events.last(), Some(BenchEvent::RunFinished(_))));
    assert!(events.iter().any(|e| matches!(
        e,
        BenchEvent::Progress { message } if message == "Tests completed: 3/3 passed"
    )));
}

#[tokio::test]
async fn test_relay_mismatch_fails_with_observed_value() {
    let mut ecu = passing_ecu(PLAN);
    ecu.relays[0].on_value = 0x05;
    let mut rig = rig(ecu).await;

    let report = rig.runner.run(&plan(PLAN)).await.unwrap();
    let key = &report.signals[0];
    assert_eq!(key.status, Status::Fail);
    assert_eq!(key.tests[0].value, Some(ObservedValue::Byte(5)));
    assert_eq!(report.signals[1].status, Status::Pass);
    assert_eq!(report.passed_count(), 2);
}

#[tokio::test]
async fn test_relay_without_feedback_fails_with_null() {
    let mut rig = rig(VirtualEcuConfig::default()).await;

    let report = rig.runner.run(&plan(RELAYS_PLAN)).await.unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.passed_count(), 0);
    for signal in &report.signals {
        assert_eq!(signal.tests[0].value, None);
        assert!(signal.tests[0].error.is_some());
    }
    assert!(rig.simulation.sim.is_safe());
}

#[tokio::test]
async fn test_relay_byte_index_out_of_range_fails() {
    // Only the Key Switch byte exists, so Reverse's index 1 is past the payload
    let ecu = passing_ecu(PLAN).without_relay(27);
    let mut rig = rig(ecu).await;

    let report = rig.runner.run(&plan(PLAN)).await.unwrap();
    assert_eq!(report.signals[0].status, Status::Pass);
    let reverse = &report.signals[1].tests[0];
    assert!(!reverse.passed);
    assert_eq!(reverse.value, None);
}

#[tokio::test]
async fn test_sweep_out_of_tolerance_fails() {
    let ecu = passing_ecu(PLAN).with_analog_error(2, 1.0, 0.3);
    let mut rig = rig(ecu).await;

    let report = rig.runner.run(&plan(PLAN)).await.unwrap();
    let throttle = &report.signals[2];
    assert_eq!(throttle.status, Status::Fail);

    let trace = throttle.tests[0].sweep_trace.as_ref().unwrap();
    assert_eq!(trace.len(), SWEEP_STEPS);
    assert!(trace.iter().all(|point| point.feedback.is_some()));
    assert!(throttle.tests[0].error.is_some());
}

#[tokio::test]
async fn test_sweep_without_feedback_fails() {
    let mut ecu = passing_ecu(PLAN);
    ecu.analog.clear();
    let mut rig = rig(ecu).await;

    let report = rig.runner.run(&plan(PLAN)).await.unwrap();
    let sweep = &report.signals[2].tests[0];
    assert!(!sweep.passed);
    assert_eq!(sweep.value, None);
    assert_eq!(sweep.error.as_deref(), Some(NO_VALID_FEEDBACK));
    assert_eq!(sweep.sweep_trace.as_ref().unwrap().len(), SWEEP_STEPS);
}

#[tokio::test]
async fn test_unmapped_signals_fail_without_hardware_access() {
    let json = r#"{
        "signals": [
            { "name": "Horn", "category": "digital",
              "tests": [ { "test_name": "Horn On", "method": "digital_write",
                           "config": { "expected_byte": 1 } } ] },
            { "name": "Brake", "category": "analog",
              "tests": [ { "test_name": "Brake Sweep", "method": "analog_output",
                           "config": { "feedback_frame_id": 64 } } ] },
            { "name": "Pedal", "category": "analog", "mux_channel": 9,
              "tests": [ { "test_name": "Pedal Sweep", "method": "analog_output",
                           "config": { "feedback_frame_id": 65 } } ] }
        ]
    }"#;
    let mut rig = rig(VirtualEcuConfig::default()).await;
    rig.simulation.sim.clear_history();

    let report = rig.runner.run(&plan(json)).await.unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.passed_count(), 0);
    assert!(report
        .signals
        .iter()
        .all(|signal| signal.tests[0].error.is_some()));

    // Only the prelude and epilogue touched the bench
    let history = rig.simulation.sim.history();
    assert!(history
        .iter()
        .all(|action| !matches!(action, BenchAction::Output { asserted: true, .. })));
    assert_eq!(rig.simulation.sim.dac_writes(), vec![0.0]);
    assert!(!history
        .iter()
        .any(|action| matches!(action, BenchAction::AdcRead(_))));
}

// ============================================================================
// Aborted runs
// ============================================================================

#[tokio::test]
async fn test_stop_between_signals() {
    let mut rig = rig(passing_ecu(RELAYS_PLAN)).await;
    let stop = rig.runner.stop_flag();
    let mut runner = rig.runner;
    let task = tokio::spawn(async move {
        let report = runner.run(&plan(RELAYS_PLAN)).await;
        (report, runner.phase())
    });

    wait_for(&mut rig.events, |e| matches!(e, BenchEvent::SignalCompleted(_))).await;
    stop.request();

    let (report, phase) = task.await.unwrap();
    let report = report.unwrap();
    assert_eq!(phase, RunPhase::Aborted);
    assert_eq!(report.phase, RunPhase::Aborted);
    assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
    assert!(!report.signals.is_empty());
    assert!(report.signals.len() < 4);
    assert!(rig.simulation.sim.is_safe());

    let events = drain(&mut rig.events);
    assert!(events.iter().any(|e| matches!(
        e,
        BenchEvent::RunAborted {
            reason: AbortReason::Cancelled
        }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        BenchEvent::Progress { message } if message == "Tests aborted by user."
    )));

    // Flag is cleared once the run has ended
    assert!(!stop.is_requested());
}

#[tokio::test]
async fn test_stop_during_sweep_keeps_partial_trace() {
    let mut rig = rig(passing_ecu(PLAN)).await;
    let stop = rig.runner.stop_flag();
    let sim = rig.simulation.sim.clone();
    let mut runner = rig.runner;
    let task = tokio::spawn(async move { runner.run(&plan(PLAN)).await });

    wait_for(&mut rig.events, |e| matches!(e, BenchEvent::SweepStep { .. })).await;
    stop.request();

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
    assert_eq!(report.signals.len(), 3);

    let sweep = &report.signals[2].tests[0];
    assert!(!sweep.passed);
    let trace = sweep.sweep_trace.as_ref().unwrap();
    assert!(!trace.is_empty() && trace.len() < SWEEP_STEPS);
    assert!(sweep.error.as_ref().unwrap().starts_with("sweep aborted"));

    assert!(sim.is_safe());
}

#[tokio::test]
async fn test_link_lost_aborts_run() {
    let mut rig = rig(passing_ecu(RELAYS_PLAN)).await;
    let mut runner = rig.runner;
    let task = tokio::spawn(async move { runner.run(&plan(RELAYS_PLAN)).await });

    wait_for(&mut rig.events, |e| matches!(e, BenchEvent::SignalCompleted(_))).await;
    rig.simulation.adapter.unplug();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let status = rig.manager.maintain().await;
    assert!(!status.is_connected());

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.phase, RunPhase::Aborted);
    assert_eq!(report.abort_reason, Some(AbortReason::LinkLost));
    assert!(!report.signals.is_empty());
    assert!(report.signals.len() < 4);
    assert!(rig.simulation.sim.is_safe());

    let events = drain(&mut rig.events);
    assert!(events.iter().any(|e| matches!(
        e,
        BenchEvent::RunAborted {
            reason: AbortReason::LinkLost
        }
    )));
}

#[tokio::test]
async fn test_run_without_connection() {
    let mut rig = rig(passing_ecu(PLAN)).await;
    rig.manager.shutdown().await;
    rig.simulation.sim.clear_history();

    let err = rig.runner.run(&plan(PLAN)).await.unwrap_err();
    assert_eq!(err, RunError::BusNotInitialized);

    let events = drain(&mut rig.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        BenchEvent::Error {
            kind: ErrorKind::BusNotInitialized,
            ..
        }
    ));

    // Epilogue still ran
    assert_eq!(rig.simulation.sim.dac_writes(), vec![0.0]);
    assert!(rig.simulation.sim.is_safe());
}

#[tokio::test]
async fn test_dropped_run_can_be_restarted() {
    let mut rig = rig(passing_ecu(PLAN)).await;

    // Cut the run off during the prelude settle
    let cut = tokio::time::timeout(Duration::from_millis(2), rig.runner.run(&plan(PLAN))).await;
    assert!(cut.is_err());
    assert_eq!(rig.runner.phase(), RunPhase::Aborted);
    assert!(rig.simulation.sim.is_safe());

    let report = rig.runner.run(&plan(PLAN)).await.unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
    assert!(report.all_passed(), "report: {:#?}", report);
}

// ============================================================================
// Station actor
// ============================================================================

fn station(simulation: &Simulation) -> StationContext {
    let manager = ChannelManager::new(simulation.connectors(), &link_config(), FrameBuffer::new());
    StationContext {
        health_interval: Duration::from_millis(50),
        ..StationContext::new(manager, simulation.bench(), RunnerConfig::fast())
    }
}

#[tokio::test]
async fn test_station_runs_one_plan_at_a_time() {
    let simulation = Simulation::for_plan(&plan(PLAN), BenchWiring::default(), &RunnerConfig::fast());
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(1024);
    let actor = tokio::spawn(run_station_actor(station(&simulation), cmd_rx, event_tx));

    let connected = wait_for(&mut event_rx, |e| matches!(e, BenchEvent::LinkStatus { .. })).await;
    assert!(matches!(
        connected,
        BenchEvent::LinkStatus {
            connected: true,
            ..
        }
    ));
    let reference = wait_for(&mut event_rx, |e| matches!(e, BenchEvent::ReferenceVoltage { .. })).await;
    assert!(matches!(
        reference,
        BenchEvent::ReferenceVoltage { volts: Some(v) } if (v - 3.3).abs() < 1e-9
    ));

    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(StationCommand::StartRun {
            plan: plan(PLAN),
            response: Some(tx),
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), Ok(()));

    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(StationCommand::StartRun {
            plan: plan(PLAN),
            response: Some(tx),
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), Err(RunError::RunInProgress));

    // Manual relay control is locked out while the run owns the outputs
    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(StationCommand::SetRelay {
            signal: "Boost".to_string(),
            asserted: true,
            response: Some(tx),
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), Err(ControlError::RunInProgress));

    let finished = wait_for(&mut event_rx, |e| matches!(e, BenchEvent::RunFinished(_))).await;
    let BenchEvent::RunFinished(report) = finished else {
        unreachable!()
    };
    assert!(report.all_passed(), "report: {:#?}", report);

    // Give the actor a moment to reap the run task
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(StationCommand::QueryStatus { response: tx })
        .await
        .unwrap();
    let status = rx.await.unwrap();
    assert_eq!(status.phase, RunPhase::Completed);
    assert!(status.interface.is_some());
    assert!(simulation.ecu().probe_count() >= 1);

    cmd_tx.send(StationCommand::Shutdown).await.unwrap();
    actor.await.unwrap();
}

#[tokio::test]
async fn test_station_stop_run() {
    let simulation =
        Simulation::for_plan(&plan(RELAYS_PLAN), BenchWiring::default(), &RunnerConfig::fast());
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(1024);
    let actor = tokio::spawn(run_station_actor(station(&simulation), cmd_rx, event_tx));

    cmd_tx
        .send(StationCommand::StartRun {
            plan: plan(RELAYS_PLAN),
            response: None,
        })
        .await
        .unwrap();
    wait_for(&mut event_rx, |e| matches!(e, BenchEvent::SignalCompleted(_))).await;
    cmd_tx.send(StationCommand::StopRun).await.unwrap();

    let finished = wait_for(&mut event_rx, |e| matches!(e, BenchEvent::RunFinished(_))).await;
    let BenchEvent::RunFinished(report) = finished else {
        unreachable!()
    };
    assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
    assert!(report.signals.len() < 4);

    cmd_tx.send(StationCommand::Shutdown).await.unwrap();
    actor.await.unwrap();
    assert!(simulation.sim.is_safe());
}

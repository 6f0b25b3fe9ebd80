//! Station actor
//!
//! Owns the connection manager and the bench, supervises the link on a fixed
//! cadence and runs at most one test plan at a time. Front ends talk to it
//! through [`StationCommand`]s and observe everything through the unified
//! [`BenchEvent`] stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use eol_runner::actor::{run_station_actor, StationCommand, StationContext};
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(16);
//! let (event_tx, mut event_rx) = mpsc::channel(256);
//!
//! tokio::spawn(run_station_actor(context, cmd_rx, event_tx));
//! cmd_tx.send(StationCommand::StartRun { plan, response: None }).await?;
//! ```

use std::future::pending;

use eol_link::{ChannelManager, LinkStatus};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{ControlError, RunError};
use crate::events::{BenchEvent, ErrorKind};
use crate::hardware::Bench;
use crate::orchestrator::{StopFlag, TestRunner};
use crate::plan::TestPlan;
use crate::result::{RunPhase, RunReport};

/// Default health-check cadence
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the actor owns
pub struct StationContext {
    pub manager: ChannelManager,
    pub bench: Bench,
    pub config: RunnerConfig,
    pub health_interval: Duration,
}

impl StationContext {
    pub fn new(manager: ChannelManager, bench: Bench, config: RunnerConfig) -> Self {
        Self {
            manager,
            bench,
            config,
            health_interval: HEALTH_CHECK_INTERVAL,
        }
    }
}

/// Snapshot returned by [`StationCommand::QueryStatus`]
#[derive(Debug, Clone, PartialEq)]
pub struct StationStatus {
    /// Interface of the live connection, if any
    pub interface: Option<String>,
    pub listener_running: bool,
    /// Phase of the current run, or of the last one
    pub phase: RunPhase,
}

/// Commands sent to the station actor
#[derive(Debug)]
pub enum StationCommand {
    /// Start executing a plan
    StartRun {
        plan: TestPlan,
        /// Told whether the run was accepted
        response: Option<oneshot::Sender<Result<(), RunError>>>,
    },

    /// Ask the current run to stop at its next checkpoint
    StopRun,

    /// Switch one relay by signal name, outside of any run
    SetRelay {
        signal: String,
        asserted: bool,
        /// Told the output line used, or why the command was refused
        response: Option<oneshot::Sender<Result<u8, ControlError>>>,
    },

    /// Run a health-check cycle now
    CheckLink {
        response: Option<oneshot::Sender<LinkStatus>>,
    },

    QueryStatus {
        response: oneshot::Sender<StationStatus>,
    },

    /// Stop any run, close the connection and exit
    Shutdown,
}

struct RunTask {
    stop: StopFlag,
    join: JoinHandle<Result<RunReport, RunError>>,
}

/// Resolves when the current run task ends; never resolves without one
async fn run_finished(
    run: &mut Option<RunTask>,
) -> Result<Result<RunReport, RunError>, tokio::task::JoinError> {
    match run {
        Some(task) => (&mut task.join).await,
        None => pending().await,
    }
}

/// Health check, reconnect if needed, reference voltage readout
async fn health_cycle(ctx: &mut StationContext, event_tx: &mpsc::Sender<BenchEvent>) -> LinkStatus {
    let status = ctx.manager.maintain().await;
    match &status {
        LinkStatus::Healthy { interface } => debug!("CAN link healthy on {}", interface),
        LinkStatus::Reconnected { interface } => info!("CAN link up on {}", interface),
        LinkStatus::Down { reason } => warn!("CAN link down: {}", reason),
    }
    let _ = event_tx
        .send(BenchEvent::LinkStatus {
            connected: status.is_connected(),
            interface: status.interface().map(str::to_string),
        })
        .await;

    let volts = match ctx.bench.read_reference_voltage() {
        Ok(volts) => Some(volts),
        Err(e) => {
            debug!("Reference voltage unavailable: {}", e);
            None
        }
    };
    let _ = event_tx.send(BenchEvent::ReferenceVoltage { volts }).await;

    status
}

/// Run the station actor
///
/// Connects immediately, then processes commands and health checks until a
/// [`StationCommand::Shutdown`] arrives or the command channel closes.
pub async fn run_station_actor(
    mut ctx: StationContext,
    mut cmd_rx: mpsc::Receiver<StationCommand>,
    event_tx: mpsc::Sender<BenchEvent>,
) {
    info!("Station actor started");
    health_cycle(&mut ctx, &event_tx).await;

    let mut health = interval(ctx.health_interval);
    health.set_missed_tick_behavior(MissedTickBehavior::Skip);
    health.reset();

    let mut run: Option<RunTask> = None;
    let mut last_phase = RunPhase::Idle;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                match cmd {
                    StationCommand::StartRun { plan, response } => {
                        if run.is_some() {
                            warn!("Run requested while another is in progress");
                            let _ = event_tx
                                .send(BenchEvent::Error {
                                    kind: ErrorKind::Run,
                                    message: RunError::RunInProgress.to_string(),
                                })
                                .await;
                            if let Some(response) = response {
                                let _ = response.send(Err(RunError::RunInProgress));
                            }
                            continue;
                        }

                        let mut runner = TestRunner::new(
                            ctx.bench.clone(),
                            ctx.manager.frames(),
                            ctx.manager.subscribe(),
                            ctx.config.clone(),
                            event_tx.clone(),
                        );
                        let stop = runner.stop_flag();
                        let join = tokio::spawn(async move { runner.run(&plan).await });
                        run = Some(RunTask { stop, join });
                        last_phase = RunPhase::Running;

                        if let Some(response) = response {
                            let _ = response.send(Ok(()));
                        }
                    }

                    StationCommand::StopRun => match &run {
                        Some(task) => {
                            info!("Stop requested");
                            task.stop.request();
                        }
                        None => debug!("Stop requested with no run in progress"),
                    },

                    StationCommand::SetRelay { signal, asserted, response } => {
                        let state = if asserted { "ON" } else { "OFF" };
                        let result = if run.is_some() {
                            Err(ControlError::RunInProgress)
                        } else {
                            ctx.bench.set_signal_relay(&signal, asserted)
                        };
                        match &result {
                            Ok(line) => {
                                info!("{} {} (line {})", signal, state, line);
                                let _ = event_tx
                                    .send(BenchEvent::progress(format!("{} {}", signal, state)))
                                    .await;
                            }
                            Err(e) => warn!("Relay {} {} refused: {}", signal, state, e),
                        }
                        if let Some(response) = response {
                            let _ = response.send(result);
                        }
                    }

                    StationCommand::CheckLink { response } => {
                        let status = health_cycle(&mut ctx, &event_tx).await;
                        if let Some(response) = response {
                            let _ = response.send(status);
                        }
                    }

                    StationCommand::QueryStatus { response } => {
                        let _ = response.send(StationStatus {
                            interface: ctx
                                .manager
                                .current()
                                .map(|handle| handle.interface().to_string()),
                            listener_running: ctx.manager.listener_running(),
                            phase: last_phase,
                        });
                    }

                    StationCommand::Shutdown => {
                        info!("Station shutdown requested");
                        break;
                    }
                }
            }

            _ = health.tick() => {
                health_cycle(&mut ctx, &event_tx).await;
            }

            finished = run_finished(&mut run) => {
                run = None;
                last_phase = match finished {
                    Ok(Ok(report)) => report.phase,
                    Ok(Err(e)) => {
                        warn!("Run did not start: {}", e);
                        RunPhase::Idle
                    }
                    Err(e) => {
                        error!("Run task failed: {}", e);
                        let _ = event_tx
                            .send(BenchEvent::Error {
                                kind: ErrorKind::Run,
                                message: format!("run task failed: {}", e),
                            })
                            .await;
                        RunPhase::Aborted
                    }
                };
            }
        }
    }

    if let Some(task) = run.take() {
        task.stop.request();
        if let Err(e) = task.join.await {
            error!("Run task failed during shutdown: {}", e);
        }
    }
    ctx.manager.shutdown().await;
    info!("Station actor stopped");
}

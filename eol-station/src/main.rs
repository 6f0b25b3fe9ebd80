//! eolbench - end-of-line test station
//!
//! Command-line front end over the station actor: runs a test plan, switches
//! relays by hand, checks the CAN link and lists the adapters it could use.

mod settings;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use eol_link::{
    default_connectors, list_can_interfaces, ChannelManager, Connector, FrameBuffer, LinkStatus,
    PortScanner,
};
use eol_runner::{
    render_text_report, run_station_actor, BenchEvent, ErrorKind, RunReport, StationCommand,
    StationContext, TestPlan,
};
use eol_sim::Simulation;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "eolbench", version, about = "End-of-line CAN test station")]
struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/eolbench/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a test plan
    Run {
        /// Test plan JSON file
        #[arg(long)]
        plan: PathBuf,
        /// Run against the simulated bench and device under test
        #[arg(long)]
        simulate: bool,
        /// Write the text report here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,
        /// Also write the results as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Switch one relay by signal name
    Relay {
        /// Signal name from the bench wiring (e.g. "Key Switch")
        signal: String,
        state: RelayState,
        #[arg(long)]
        simulate: bool,
    },
    /// Run health-check cycles and print the link status
    Check {
        #[arg(long, default_value_t = 3)]
        count: u32,
        #[arg(long)]
        simulate: bool,
    },
    /// List SocketCAN interfaces and SLCAN adapters
    Interfaces,
    /// Write a settings file with the defaults
    InitSettings {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RelayState {
    On,
    Off,
}

impl RelayState {
    fn asserted(self) -> bool {
        self == RelayState::On
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "eolbench={level},eol_protocol={level},eol_link={level},eol_runner={level},eol_sim={level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let settings_path = cli.settings.as_deref();
    match cli.command {
        Command::Run {
            plan,
            simulate,
            report,
            json,
        } => {
            let settings = Settings::load(settings_path)?;
            run_plan(&settings, &plan, simulate, report.as_deref(), json.as_deref()).await
        }
        Command::Relay {
            signal,
            state,
            simulate,
        } => {
            let settings = Settings::load(settings_path)?;
            let line = switch_relay(&settings, &signal, state, simulate).await?;
            let label = if state.asserted() { "ON" } else { "OFF" };
            println!("{} {} (line {})", signal, label, line);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { count, simulate } => {
            let settings = Settings::load(settings_path)?;
            check_link(&settings, count, simulate).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Interfaces => {
            list_interfaces()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::InitSettings { force } => {
            let path = match settings_path {
                Some(path) => path.to_path_buf(),
                None => Settings::default_path().context("Could not determine settings path")?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let written = Settings::default().save(Some(&path))?;
            println!("Wrote {}", written.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_plan(path: &Path) -> Result<TestPlan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    TestPlan::from_json(&text).with_context(|| format!("Invalid plan {}", path.display()))
}

fn require_simulation(simulate: bool) -> Result<()> {
    if !simulate {
        bail!("hardware I/O drivers are not part of this build; use --simulate");
    }
    Ok(())
}

async fn run_plan(
    settings: &Settings,
    plan_path: &Path,
    simulate: bool,
    report_path: Option<&Path>,
    json_path: Option<&Path>,
) -> Result<ExitCode> {
    let plan = load_plan(plan_path)?;
    require_simulation(simulate)?;
    info!(
        "Loaded {} signal(s), {} test(s) from {}",
        plan.signals.len(),
        plan.test_count(),
        plan_path.display()
    );

    let simulation = Simulation::for_plan(&plan, settings.wiring.clone(), &settings.runner);
    let manager = ChannelManager::new(simulation.connectors(), &settings.link, FrameBuffer::new());
    let mut ctx = StationContext::new(manager, simulation.bench(), settings.runner.clone());
    ctx.health_interval = settings.health_interval();

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(1024);
    let actor = tokio::spawn(run_station_actor(ctx, cmd_rx, event_tx));

    let (accepted_tx, accepted_rx) = oneshot::channel();
    cmd_tx
        .send(StationCommand::StartRun {
            plan,
            response: Some(accepted_tx),
        })
        .await
        .context("Station actor exited")?;
    if let Err(e) = accepted_rx.await.context("Station actor exited")? {
        let _ = cmd_tx.send(StationCommand::Shutdown).await;
        bail!("Run rejected: {}", e);
    }

    let report = watch_run(&cmd_tx, &mut event_rx).await;

    let _ = cmd_tx.send(StationCommand::Shutdown).await;
    if let Err(e) = actor.await {
        warn!("Station actor task failed: {}", e);
    }

    let Some(report) = report else {
        eprintln!("Run did not produce a report");
        return Ok(ExitCode::from(2));
    };

    write_outputs(&report, report_path, json_path)?;
    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print run events until the run ends; Ctrl-C asks the run to stop
async fn watch_run(
    cmd_tx: &mpsc::Sender<StationCommand>,
    event_rx: &mut mpsc::Receiver<BenchEvent>,
) -> Option<RunReport> {
    let mut stop_sent = false;
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let event = event?;
                match event {
                    BenchEvent::Progress { message } => println!("{}", message),
                    BenchEvent::TestCompleted { signal, result } => {
                        let value = result
                            .value
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "None".to_string());
                        println!("  {} / {}: {} -> {}", signal, result.test_name, value, result.status());
                    }
                    BenchEvent::LinkStatus { connected: false, .. } => warn!("CAN link down"),
                    BenchEvent::RunFinished(report) => return Some(report),
                    BenchEvent::Error { kind, message } => {
                        eprintln!("Error: {}", message);
                        if kind == ErrorKind::BusNotInitialized {
                            return None;
                        }
                    }
                    _ => {}
                }
            }
            result = tokio::signal::ctrl_c(), if !stop_sent => {
                if let Err(e) = result {
                    warn!("Could not listen for Ctrl-C: {}", e);
                }
                info!("Stop requested");
                stop_sent = true;
                let _ = cmd_tx.send(StationCommand::StopRun).await;
            }
        }
    }
}

/// Send one manual relay command through the station actor
async fn switch_relay(
    settings: &Settings,
    signal: &str,
    state: RelayState,
    simulate: bool,
) -> Result<u8> {
    require_simulation(simulate)?;

    let simulation =
        Simulation::for_plan(&TestPlan::default(), settings.wiring.clone(), &settings.runner);
    let manager = ChannelManager::new(simulation.connectors(), &settings.link, FrameBuffer::new());
    let mut ctx = StationContext::new(manager, simulation.bench(), settings.runner.clone());
    ctx.health_interval = settings.health_interval();

    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (event_tx, _event_rx) = mpsc::channel(64);
    let actor = tokio::spawn(run_station_actor(ctx, cmd_rx, event_tx));

    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(StationCommand::SetRelay {
            signal: signal.to_string(),
            asserted: state.asserted(),
            response: Some(tx),
        })
        .await
        .context("Station actor exited")?;
    let result = rx.await.context("Station actor exited")?;

    let _ = cmd_tx.send(StationCommand::Shutdown).await;
    if let Err(e) = actor.await {
        warn!("Station actor task failed: {}", e);
    }
    Ok(result?)
}

fn write_outputs(
    report: &RunReport,
    report_path: Option<&Path>,
    json_path: Option<&Path>,
) -> Result<()> {
    let text = render_text_report(report);
    match report_path {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => print!("\n{}", text),
    }

    if let Some(path) = json_path {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize results")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results {}", path.display()))?;
        println!("Results written to {}", path.display());
    }
    Ok(())
}

async fn check_link(settings: &Settings, count: u32, simulate: bool) -> Result<()> {
    let simulation = simulate.then(|| {
        Simulation::for_plan(&TestPlan::default(), settings.wiring.clone(), &settings.runner)
    });
    let connectors: Vec<Box<dyn Connector>> = match &simulation {
        Some(simulation) => simulation.connectors(),
        None => default_connectors(&settings.link),
    };
    let mut manager = ChannelManager::new(connectors, &settings.link, FrameBuffer::new());

    for cycle in 1..=count.max(1) {
        let status = manager.maintain().await;
        match &status {
            LinkStatus::Healthy { interface } => println!("[{}] healthy on {}", cycle, interface),
            LinkStatus::Reconnected { interface } => println!("[{}] connected on {}", cycle, interface),
            LinkStatus::Down { reason } => println!("[{}] down: {}", cycle, reason),
        }
        if let Some(simulation) = &simulation {
            match simulation.bench().read_reference_voltage() {
                Ok(volts) => println!("    reference {:.2} V", volts),
                Err(e) => println!("    reference unavailable: {}", e),
            }
        }
        if cycle < count {
            tokio::time::sleep(settings.health_interval()).await;
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn list_interfaces() -> Result<()> {
    match list_can_interfaces() {
        Ok(interfaces) if interfaces.is_empty() => println!("No SocketCAN interfaces"),
        Ok(interfaces) => {
            println!("SocketCAN interfaces:");
            for interface in interfaces {
                println!("  {}", interface);
            }
        }
        Err(e) => warn!("Could not list SocketCAN interfaces: {}", e),
    }

    let adapters = PortScanner::new()
        .find_slcan_adapters()
        .context("Failed to scan serial ports")?;
    if adapters.is_empty() {
        println!("No SLCAN adapters");
        return Ok(());
    }
    println!("SLCAN adapters:");
    for adapter in adapters {
        let usb_id = match (adapter.vid, adapter.pid) {
            (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
            _ => "----:----".to_string(),
        };
        println!(
            "  {} [{}] {}",
            adapter.port,
            usb_id,
            adapter.adapter.unwrap_or("unknown")
        );
    }
    Ok(())
}

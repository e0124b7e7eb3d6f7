//! CLI command definitions for visit-fleet.
//!
//! `run` drives a full job through the orchestrator; `devices`, `rotate` and
//! `probe` are maintenance commands for the tethered-device setup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use crate::config::{JobSettings, RotationTimings, StrategyKind, StrategySettings, ToggleMethod};
use crate::device::{AdbBridge, DeviceCommandBridge, MultiDeviceRegistry};
use crate::identity::{ProxyPool, RelayService, StrategyDeps, TunnelEndpoint};
use crate::metrics::{export_metrics, init_metrics};
use crate::net::{HttpVisitDriver, IpifyProbe, PublicIpProbe};
use crate::scheduler::{BatchSpec, JobOrchestrator, TracingSink};

/// Default settings file picked up when present in the working directory.
const DEFAULT_SETTINGS_FILE: &str = "visit-fleet.yaml";

/// Schedule page-visit batches across rotating network identities.
#[derive(Parser)]
#[command(name = "visit-fleet")]
#[command(about = "Schedule page-visit batches across rotating network identities")]
#[command(version)]
#[command(
    long_about = "visit-fleet runs a batch of page visits across a pool of workers, each routed through a rotating identity (proxy pool, tunnel endpoint, tethered device, device fleet or relay wave).\n\nExample usage:\n  visit-fleet run --targets urls.csv --cycles 3 --strategy proxy-pool --proxies proxies.txt --threads 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a visit job until it completes or Ctrl-C is pressed.
    Run(Box<RunArgs>),

    /// Scan attached devices and print their status as JSON.
    Devices(DevicesArgs),

    /// Force a rotation on one device or on every attached device.
    Rotate(RotateArgs),

    /// Print the host's current public IP.
    Probe,
}

/// Strategy selector for `run`.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    ProxyPool,
    Tunnel,
    SingleDevice,
    MultiDevice,
    RelayWave,
}

/// Arguments for `visit-fleet run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Targets file: one URL per line, or CSV with the URL in the first column.
    #[arg(short, long)]
    pub targets: PathBuf,

    /// Number of passes over the target list.
    #[arg(short, long, default_value = "1")]
    pub cycles: u32,

    /// Settings file (YAML or JSON). Flags override values from the file.
    #[arg(long, env = "VISIT_FLEET_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Identity strategy. Defaults to the settings file, then proxy-pool.
    #[arg(short, long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Concurrency limit.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Visits between identity rotations.
    #[arg(long)]
    pub rotate_every: Option<u32>,

    /// Proxy list file for the proxy-pool strategy (.json or host:port text).
    #[arg(long)]
    pub proxies: Option<PathBuf>,

    /// Tunnel endpoint as `name` or `name=proxy_url`. Repeatable.
    #[arg(long = "tunnel")]
    pub tunnels: Vec<String>,

    /// Device id for the single-device strategy.
    #[arg(long)]
    pub device: Option<String>,

    /// Use every device at once in the multi-device strategy.
    #[arg(long)]
    pub parallel: bool,

    /// Toggle mobile data instead of airplane mode when rotating devices.
    #[arg(long)]
    pub mobile_data: bool,

    /// Relay service as `name=url_template` ({url} is replaced). Repeatable.
    #[arg(long = "relay")]
    pub relays: Vec<String>,

    /// Browser instances per relay wave.
    #[arg(long)]
    pub browsers: Option<usize>,

    /// Tabs per browser instance in a relay wave.
    #[arg(long)]
    pub tabs: Option<usize>,

    /// Path of the device command tool.
    #[arg(long, default_value = "adb")]
    pub adb: String,

    /// Print Prometheus metrics after the job ends.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `visit-fleet devices`.
#[derive(Parser, Debug)]
pub struct DevicesArgs {
    /// Path of the device command tool.
    #[arg(long, default_value = "adb")]
    pub adb: String,
}

/// Arguments for `visit-fleet rotate`.
#[derive(Parser, Debug)]
pub struct RotateArgs {
    /// Device to rotate. Defaults to the first attached device.
    #[arg(short, long, conflicts_with = "all")]
    pub device: Option<String>,

    /// Rotate every attached device concurrently.
    #[arg(long)]
    pub all: bool,

    /// Toggle mobile data instead of airplane mode.
    #[arg(long)]
    pub mobile_data: bool,

    /// Path of the device command tool.
    #[arg(long, default_value = "adb")]
    pub adb: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_job_command(*args).await,
        Commands::Devices(args) => run_devices_command(args).await,
        Commands::Rotate(args) => run_rotate_command(args).await,
        Commands::Probe => run_probe_command().await,
    }
}

// ============================================================================
// Run
// ============================================================================

async fn run_job_command(args: RunArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics registration failed, continuing without metrics");
    }

    let batch = BatchSpec::from_file(&args.targets, args.cycles)
        .with_context(|| format!("Invalid targets file {}", args.targets.display()))?;
    let settings = apply_flags(load_base_settings(&args)?, &args)?;

    let bridge: Arc<dyn DeviceCommandBridge> = Arc::new(AdbBridge::with_program(&args.adb));
    let deps = StrategyDeps {
        driver: Arc::new(HttpVisitDriver::new()),
        probe: Arc::new(IpifyProbe::new()),
        bridge,
        proxy_pool: Arc::new(ProxyPool::new()),
    };

    let orchestrator = JobOrchestrator::new(deps, Arc::new(TracingSink));
    let job_id = orchestrator
        .start_job(batch.targets().to_vec(), batch.cycles(), settings)
        .await
        .context("Failed to start job")?;

    info!(job_id = %job_id, "Job running, press Ctrl-C to stop");

    tokio::select! {
        _ = orchestrator.wait_idle() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Stop requested");
            orchestrator.stop_job().await;
            orchestrator.wait_idle().await;
        }
    }

    let snapshot = orchestrator.status().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

/// Base settings: the settings file (or `visit-fleet.yaml` when present),
/// then environment overrides.
fn load_base_settings(args: &RunArgs) -> anyhow::Result<JobSettings> {
    let file = args.settings.clone().or_else(|| {
        let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
        default.exists().then_some(default)
    });

    let mut settings = match file {
        Some(path) => JobSettings::from_file(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => JobSettings::default(),
    };
    settings
        .apply_env()
        .context("Invalid environment override")?;
    Ok(settings)
}

/// Applies command-line flags over `settings` and validates the result.
fn apply_flags(mut settings: JobSettings, args: &RunArgs) -> anyhow::Result<JobSettings> {
    if let Some(kind) = args.strategy {
        if settings.strategy.kind() != strategy_kind(kind) {
            settings.strategy = default_strategy(kind);
        }
    }

    let toggle = args.mobile_data.then_some(ToggleMethod::MobileData);
    match &mut settings.strategy {
        StrategySettings::ProxyPool { proxy_file } => {
            if let Some(path) = &args.proxies {
                *proxy_file = Some(path.clone());
            }
        }
        StrategySettings::Tunnel { endpoints, .. } => {
            if !args.tunnels.is_empty() {
                *endpoints = args.tunnels.iter().map(|t| parse_tunnel(t)).collect();
            }
        }
        StrategySettings::SingleDevice {
            device_id,
            toggle: method,
            ..
        } => {
            if args.device.is_some() {
                *device_id = args.device.clone();
            }
            if let Some(t) = toggle {
                *method = t;
            }
        }
        StrategySettings::MultiDevice {
            parallel,
            toggle: method,
            ..
        } => {
            if args.parallel {
                *parallel = true;
            }
            if let Some(t) = toggle {
                *method = t;
            }
        }
        StrategySettings::RelayWave {
            relays,
            browsers,
            tabs,
            ..
        } => {
            if !args.relays.is_empty() {
                *relays = args
                    .relays
                    .iter()
                    .map(|r| parse_relay(r))
                    .collect::<anyhow::Result<_>>()?;
            }
            if let Some(b) = args.browsers {
                *browsers = b;
            }
            if let Some(t) = args.tabs {
                *tabs = t;
            }
        }
    }

    if let Some(threads) = args.threads {
        settings.threads = threads;
    }
    if let Some(every) = args.rotate_every {
        settings.strategy.set_rotate_every(every);
    }

    settings.validate().context("Invalid job settings")?;
    Ok(settings)
}

fn strategy_kind(arg: StrategyArg) -> StrategyKind {
    match arg {
        StrategyArg::ProxyPool => StrategyKind::ProxyPool,
        StrategyArg::Tunnel => StrategyKind::Tunnel,
        StrategyArg::SingleDevice => StrategyKind::SingleDevice,
        StrategyArg::MultiDevice => StrategyKind::MultiDevice,
        StrategyArg::RelayWave => StrategyKind::RelayWave,
    }
}

fn default_strategy(arg: StrategyArg) -> StrategySettings {
    match arg {
        StrategyArg::ProxyPool => StrategySettings::ProxyPool { proxy_file: None },
        StrategyArg::Tunnel => StrategySettings::tunnel_defaults(),
        StrategyArg::SingleDevice => StrategySettings::single_device_defaults(),
        StrategyArg::MultiDevice => StrategySettings::multi_device_defaults(false),
        StrategyArg::RelayWave => StrategySettings::relay_wave_defaults(Vec::new()),
    }
}

fn parse_tunnel(raw: &str) -> TunnelEndpoint {
    match raw.split_once('=') {
        Some((name, url)) => TunnelEndpoint {
            name: name.trim().to_string(),
            proxy_url: Some(url.trim().to_string()),
        },
        None => TunnelEndpoint::named(raw.trim()),
    }
}

fn parse_relay(raw: &str) -> anyhow::Result<RelayService> {
    let (name, template) = raw
        .split_once('=')
        .with_context(|| format!("Relay '{}' must be name=url_template", raw))?;
    Ok(RelayService::new(name.trim(), template.trim()))
}

// ============================================================================
// Device maintenance
// ============================================================================

async fn run_devices_command(args: DevicesArgs) -> anyhow::Result<()> {
    let registry = device_registry(&args.adb, None);
    let found = registry.scan().await.context("Device scan failed")?;
    info!(devices = found, "Device scan complete");

    let status = registry.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_rotate_command(args: RotateArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics registration failed, continuing without metrics");
    }

    let toggle = if args.mobile_data {
        ToggleMethod::MobileData
    } else {
        ToggleMethod::AirplaneMode
    };
    let registry = device_registry(&args.adb, Some(toggle));
    let found = registry.scan().await.context("Device scan failed")?;
    if found == 0 {
        bail!("No online devices attached");
    }

    if args.all {
        let mut report = serde_json::Map::new();
        for (device_id, result) in registry.rotate_all().await {
            let entry = match result {
                Ok(outcome) => serde_json::to_value(outcome)?,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
            report.insert(device_id, entry);
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let device_id = match args.device {
        Some(id) => id,
        None => registry
            .devices()
            .await
            .first()
            .map(|d| d.id.clone())
            .context("No online devices attached")?,
    };
    if registry.identity(&device_id).await.is_none() {
        bail!("Device '{}' is not attached or is offline", device_id);
    }

    let outcome = registry
        .rotate(&device_id)
        .await
        .with_context(|| format!("Rotation failed on {}", device_id))?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_probe_command() -> anyhow::Result<()> {
    let probe = IpifyProbe::new();
    let ip = probe.lookup().await.context("Public IP lookup failed")?;
    println!("{}", ip);
    Ok(())
}

fn device_registry(adb: &str, toggle: Option<ToggleMethod>) -> MultiDeviceRegistry {
    let bridge: Arc<dyn DeviceCommandBridge> = Arc::new(AdbBridge::with_program(adb));
    let probe: Arc<dyn PublicIpProbe> = Arc::new(IpifyProbe::new());
    let registry = MultiDeviceRegistry::new(bridge, probe, RotationTimings::default(), u32::MAX);
    match toggle {
        Some(t) => registry.with_toggle(t),
        None => registry,
    }
}

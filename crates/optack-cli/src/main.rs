use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, warn};

use optack_abstract::{AttackOverride, ExperimentConfig, MonitorOverride, ScenarioOverride};
use optack_attack::AttackClient;
use optack_monitor::{ThroughputLog, read_records, synthesize};

mod run;
mod traffic;

use run::{AttackDisposition, describe_recording};

#[derive(Parser, Debug)]
#[command(author, version, about = "Optimistic ACK attack experiment harness")]
struct Args {
    /// Scenario TOML layered over the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full experiment: background traffic, recording, delayed attack, report.
    Run {
        #[command(flatten)]
        monitor: MonitorArgs,
        #[command(flatten)]
        attack: AttackArgs,
        /// Record and report without starting the attack client.
        #[arg(long, default_value_t = false)]
        no_attack: bool,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        report_json: Option<PathBuf>,
    },
    /// Record the throughput time series only.
    Monitor {
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Run the attack client until Ctrl-C or the victim closes the connection.
    Attack {
        #[command(flatten)]
        attack: AttackArgs,
    },
    /// Rebuild the report from an existing throughput log.
    Report {
        /// Throughput log to read (defaults to the configured log path).
        #[arg(long)]
        log: Option<PathBuf>,
        #[arg(long)]
        attack_offset: Option<f64>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct MonitorArgs {
    /// Sampling interval in seconds.
    #[arg(long)]
    interval: Option<f64>,
    /// Total recording time in seconds.
    #[arg(long)]
    duration: Option<f64>,
    /// Seconds after recording starts at which the attack begins.
    #[arg(long)]
    attack_offset: Option<f64>,
    #[arg(long)]
    log: Option<PathBuf>,
    #[arg(long)]
    target_iface: Option<String>,
    #[arg(long)]
    attacker_iface: Option<String>,
}

#[derive(clap::Args, Debug, Default)]
struct AttackArgs {
    /// Victim address.
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    amplification: Option<u32>,
    /// Fabricated ACKs sent after each payload chunk.
    #[arg(long)]
    ack_burst: Option<u32>,
    #[arg(long)]
    ack_interval_us: Option<u64>,
}

impl MonitorArgs {
    fn apply_to(&self, config: &mut ExperimentConfig) {
        MonitorOverride {
            interval_secs: self.interval,
            duration_secs: self.duration,
            attack_start_offset_secs: self.attack_offset,
            log_path: self.log.clone(),
            ..Default::default()
        }
        .apply_to(config);
        if let Some(iface) = &self.target_iface {
            config.target.interface = iface.clone();
        }
        if let Some(iface) = &self.attacker_iface {
            config.attacker.interface = iface.clone();
        }
    }
}

impl AttackArgs {
    fn apply_to(&self, config: &mut ExperimentConfig) {
        AttackOverride {
            host: self.host.clone(),
            port: self.port,
            chunk_size: self.chunk_size,
            amplification_factor: self.amplification,
            ack_burst: self.ack_burst,
            ack_interval_us: self.ack_interval_us,
            ..Default::default()
        }
        .apply_to(config);
    }
}

impl Command {
    fn apply_to(&self, config: &mut ExperimentConfig) {
        match self {
            Command::Run {
                monitor,
                attack,
                no_attack,
                report,
                report_json,
            } => {
                monitor.apply_to(config);
                attack.apply_to(config);
                if *no_attack {
                    config.attack.enabled = false;
                }
                if let Some(path) = report {
                    config.report.path = path.clone();
                }
                if let Some(path) = report_json {
                    config.report.json_path = Some(path.clone());
                }
            }
            Command::Monitor { monitor } => monitor.apply_to(config),
            Command::Attack { attack } => attack.apply_to(config),
            Command::Report {
                attack_offset,
                out,
                json,
                ..
            } => {
                if let Some(offset) = attack_offset {
                    config.monitor.attack_start_offset_secs = *offset;
                }
                if let Some(path) = out {
                    config.report.path = path.clone();
                }
                if let Some(path) = json {
                    config.report.json_path = Some(path.clone());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("optack starting…");

    let config = build_config(args.config.as_deref(), &args.command)?;

    match &args.command {
        Command::Run { .. } => run_command(&config).await,
        Command::Monitor { .. } => monitor_command(&config).await,
        Command::Attack { .. } => attack_command(&config).await,
        Command::Report { log, .. } => report_command(&config, log.as_deref()),
    }
}

/// Defaults, then the scenario file, then command-line flags.
fn build_config(scenario: Option<&Path>, command: &Command) -> Result<ExperimentConfig> {
    let mut config = ExperimentConfig::default();
    if let Some(path) = scenario {
        let scenario = load_scenario(path)?;
        if let Some(label) = scenario.label() {
            info!("Loaded scenario {}", label);
        }
        scenario.apply_to(&mut config);
    }
    command.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

fn load_scenario(path: &Path) -> Result<ScenarioOverride> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse scenario TOML: {}", path.display()))
}

/// Cancellation flag that flips to `true` on Ctrl-C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping");
            tx.send_replace(true);
        }
    });
    rx
}

async fn run_command(config: &ExperimentConfig) -> Result<()> {
    let summary = run::run_experiment(config, cancel_on_ctrl_c()).await?;
    if let Ok(report) = &summary.report {
        println!("{}", report);
    }
    println!("{}", summary);
    if let Err(e) = &summary.report {
        bail!("report unavailable: {}", e);
    }
    Ok(())
}

async fn monitor_command(config: &ExperimentConfig) -> Result<()> {
    let mut cancel = cancel_on_ctrl_c();
    let mut log = ThroughputLog::create(&config.monitor.log_path).with_context(|| {
        format!(
            "Failed to create throughput log {}",
            config.monitor.log_path.display()
        )
    })?;
    let mut recorder = run::build_recorder(config);
    let disposition = recorder.run(&mut log, &mut cancel).await;
    println!(
        "Recording: {}, log in {}",
        describe_recording(&disposition),
        config.monitor.log_path.display()
    );
    Ok(())
}

async fn attack_command(config: &ExperimentConfig) -> Result<()> {
    let mut cancel = cancel_on_ctrl_c();
    let outcome = AttackClient::new(config.attack.clone())
        .run(&mut cancel)
        .await;
    let aborted = outcome.is_aborted();
    println!("Attack: {}", AttackDisposition::Finished(outcome));
    if aborted {
        bail!("attack aborted");
    }
    Ok(())
}

fn report_command(config: &ExperimentConfig, log: Option<&Path>) -> Result<()> {
    let path = log.unwrap_or(config.monitor.log_path.as_path());
    let file = File::open(path)
        .with_context(|| format!("Failed to open throughput log {}", path.display()))?;
    let offset = config.monitor.attack_start_offset_secs;
    let records = read_records(BufReader::new(file), offset)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!("Read {} records from {}", records.len(), path.display());

    let report = synthesize(&records, offset)?;
    run::write_report(config, &report, None)?;
    println!("{}", report);
    Ok(())
}

//! p2ptest - peer-to-peer connectivity test orchestrator
//!
//! Starts the signaling server, runs each scenario's peers against it and
//! prints a single `TEST SUCCEEDED` / `TEST FAILED` verdict.
//!
//! ## Commands
//!
//! - `run`: execute the configured scenarios
//! - `scenarios`: list configured scenarios and their peers
//! - `check-config`: validate configuration and print it as TOML

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use p2ptest_core::{HarnessConfig, RunResult};
use p2ptest_runner::{Orchestrator, RunGate};
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "p2ptest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Peer-to-peer connectivity test orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "P2PTEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenarios against a fresh signaling server
    Run(RunArgs),

    /// List configured scenarios and their peers
    Scenarios,

    /// Validate the configuration and print it as TOML
    CheckConfig,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Peer executable
    #[arg(long)]
    peer_exe: Option<PathBuf>,

    /// Signaling server executable
    #[arg(long)]
    signaling_exe: Option<PathBuf>,

    /// Signaling server address passed to peers (host:port)
    #[arg(long)]
    signaling_addr: Option<String>,

    /// Seconds each peer may run before it is killed
    #[arg(long)]
    peer_timeout: Option<u64>,

    /// Seconds the signaling server gets to shut down
    #[arg(long)]
    grace: Option<u64>,

    /// Directory for `<tag>.log` files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Run only this scenario (repeatable)
    #[arg(long = "scenario")]
    scenarios: Vec<String>,

    /// Write the run result as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not pass `--log <identity>.verbose.log` to peers
    #[arg(long)]
    no_verbose_logs: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    p2ptest_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(cli.config.as_deref(), args).await,
        Commands::Scenarios => cmd_scenarios(cli.config.as_deref()).map(|_| ExitCode::SUCCESS),
        Commands::CheckConfig => {
            cmd_check_config(cli.config.as_deref()).map(|_| ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let config = HarnessConfig::load_or_default(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to build default configuration".to_string(),
    })?;
    Ok(config)
}

/// Layer command-line flags over the loaded configuration.
fn apply_overrides(config: &mut HarnessConfig, args: &RunArgs) -> Result<()> {
    if let Some(exe) = &args.peer_exe {
        config.peer_executable = exe.clone();
    }
    if let Some(exe) = &args.signaling_exe {
        config.signaling_executable = exe.clone();
    }
    if let Some(addr) = &args.signaling_addr {
        config.signaling_address = addr.clone();
    }
    if let Some(secs) = args.peer_timeout {
        config.peer_timeout_secs = secs;
    }
    if let Some(secs) = args.grace {
        config.grace_timeout_secs = secs;
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    if args.no_verbose_logs {
        config.verbose_peer_logs = false;
    }
    config
        .select_scenarios(&args.scenarios)
        .context("Invalid --scenario selection")?;
    config.validate().context("Invalid configuration")?;
    Ok(())
}

/// Final verdict of a `run` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Succeeded,
    Failed,
}

impl Verdict {
    fn banner(self) -> &'static str {
        match self {
            Verdict::Succeeded => "TEST SUCCEEDED",
            Verdict::Failed => "TEST FAILED",
        }
    }

    fn exit_code(self) -> ExitCode {
        match self {
            Verdict::Succeeded => ExitCode::SUCCESS,
            Verdict::Failed => ExitCode::FAILURE,
        }
    }
}

async fn cmd_run(config_path: Option<&Path>, args: RunArgs) -> Result<ExitCode> {
    let verdict = run_verdict(config_path, &args).await;
    println!("{}", verdict.banner());
    Ok(verdict.exit_code())
}

/// Every failure, including a bad configuration, ends in `Verdict::Failed`.
async fn run_verdict(config_path: Option<&Path>, args: &RunArgs) -> Verdict {
    match run_and_report(config_path, args).await {
        Ok(verdict) => verdict,
        Err(e) => {
            error!(error = %e, "run aborted");
            eprintln!("Error: {e:#}");
            Verdict::Failed
        }
    }
}

async fn run_and_report(config_path: Option<&Path>, args: &RunArgs) -> Result<Verdict> {
    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, args)?;

    info!(
        peer = %config.peer_executable.display(),
        signaling = %config.signaling_executable.display(),
        scenarios = config.scenarios.len(),
        "starting run"
    );

    let mut orchestrator = Orchestrator::new(config)?;
    let result = tokio::select! {
        result = orchestrator.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Interrupted; supervised processes were killed")
        }
    };

    print_summary(&result);

    if let Some(path) = &args.report {
        write_report(&result, path)?;
        println!("Report: {}", path.display());
    }

    let verdict = RunGate::evaluate(&result);
    if !verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
        println!();
    }

    Ok(if verdict.passed {
        Verdict::Succeeded
    } else {
        Verdict::Failed
    })
}

fn print_summary(result: &RunResult) {
    println!();
    println!("Run ID: {}", result.run_id);
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for outcome in &result.outcomes {
        let status = if outcome.succeeded() { "✓" } else { "✗" };
        let exit = match (outcome.exit_code, outcome.timed_out) {
            (_, true) => "timed out".to_string(),
            (Some(code), false) => format!("exit code: {code}"),
            (None, false) => match &outcome.launch_error {
                Some(_) => "not started".to_string(),
                None => "no exit code".to_string(),
            },
        };
        let infra = if outcome.infrastructure {
            " [infrastructure]"
        } else {
            ""
        };
        println!(
            "  {} {}{} ({}ms, {})",
            status, outcome.tag, infra, outcome.duration_ms, exit
        );
    }

    for name in &result.skipped {
        println!("  - {} skipped", name);
    }

    println!();
    println!(
        "Summary: {}/{} peers passed",
        result.passed_count(),
        result.peer_outcomes().count()
    );
}

fn write_report(result: &RunResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize run result")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

fn cmd_scenarios(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    for scenario in &config.scenarios {
        println!("{}: {}", scenario.name, scenario.display_name());
        for peer in &scenario.peers {
            println!("  {} {} -> {}", peer.role.flag(), peer.local, peer.remote);
        }
    }
    Ok(())
}

fn cmd_check_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let rendered = config
        .to_toml_string()
        .context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

//! # conductor
//!
//! Runs configured macros against the modules of a recording session, either
//! once from the command line or behind the JSON-RPC control server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use conductor_core::{MacroRun, ParamMap, RunState, StepStatus};
use conductor_engine::{Orchestrator, bootstrap};
use conductor_settings::ConductorSettings;
use conductor_telemetry::{TelemetryConfig, init_telemetry};

/// Macro orchestration for multi-process recording sessions.
#[derive(Parser, Debug)]
#[command(name = "conductor", version, about)]
struct Cli {
    /// Settings file (default: ~/.conductor/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Setup document with modules and macros (overrides settings).
    #[arg(long, global = true)]
    setup_cfg: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON-RPC control interface.
    Serve {
        /// Port to bind (0 for auto-assign; overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one macro to completion.
    Run {
        /// Macro name as configured, e.g. `run_6d`.
        name: String,
        /// Parameter override `key=value`; the value is read as JSON when it
        /// parses, otherwise as a string.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
        /// Print the run record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List configured macros.
    Macros,
    /// List registered modules.
    Modules,
    /// Validate the setup document and report steps targeting unknown modules.
    Check,
}

fn load_settings(cli: &Cli) -> Result<ConductorSettings> {
    let mut settings = match &cli.settings {
        Some(path) => conductor_settings::load_settings_from_path(path),
        None => conductor_settings::load_settings(),
    }
    .context("Failed to load settings")?;

    if let Some(path) = &cli.setup_cfg {
        settings.setup_cfg_path = path.to_string_lossy().into_owned();
    }
    Ok(settings)
}

/// `key=value` → (key, JSON value, falling back to a string).
fn parse_override(arg: &str) -> Result<(String, serde_json::Value)> {
    let Some((key, raw)) = arg.split_once('=') else {
        bail!("override '{arg}' must be KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("override '{arg}' has an empty key");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!(raw));
    Ok((key.to_string(), value))
}

fn parse_overrides(specs: &[String]) -> Result<ParamMap> {
    specs.iter().map(|s| parse_override(s)).collect()
}

fn print_run(run: &MacroRun) {
    println!("{} [{}] {:?}", run.macro_name, run.run_id, run.state);
    for step in &run.steps {
        let mark = match step.status {
            StepStatus::Ok => "ok",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "skipped",
        };
        print!(
            "  {:>2}. {:<24} {:<16} {:<8} {:>5}ms",
            step.step_index,
            step.target_module,
            step.command,
            mark,
            step.latency.as_millis()
        );
        match &step.error {
            Some(err) => println!("  {err}"),
            None => println!(),
        }
    }
    if let Some(failure) = &run.failure {
        println!(
            "halted at step {} ({} {}): {}",
            failure.step_index, failure.target_module, failure.command, failure.message
        );
    }
}

async fn run_once(
    orchestrator: Arc<Orchestrator>,
    name: &str,
    overrides: &ParamMap,
    json: bool,
) -> Result<ExitCode> {
    let watcher = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling at the next step boundary");
                orchestrator.cancel_all();
            }
        })
    };

    let result = orchestrator.run_macro(name, overrides).await;
    watcher.abort();
    let run = result.with_context(|| format!("macro '{name}' was not started"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }
    Ok(if run.state == RunState::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn serve(
    orchestrator: Arc<Orchestrator>,
    settings: &ConductorSettings,
    port: Option<u16>,
) -> Result<()> {
    let config = conductor_server::ServerConfig {
        host: settings.server.host.clone(),
        port: port.unwrap_or(settings.server.port),
    };
    let handle = conductor_server::start(config, Arc::clone(&orchestrator))
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, "conductor ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    let cancelled = orchestrator.cancel_all();
    if cancelled > 0 {
        tracing::info!(cancelled, "cancelled active runs");
    }
    handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let telemetry = TelemetryConfig::from_settings(&settings.logging);
    init_telemetry(&telemetry).context("Failed to initialize logging")?;

    let orchestrator = Arc::new(
        bootstrap::build_orchestrator(&settings)
            .with_context(|| format!("Failed to load setup from {}", settings.setup_cfg_path))?,
    );

    match cli.command {
        Command::Serve { port } => {
            serve(orchestrator, &settings, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            name,
            overrides,
            json,
        } => {
            let overrides = parse_overrides(&overrides)?;
            run_once(orchestrator, &name, &overrides, json).await
        }
        Command::Macros => {
            for m in orchestrator.list_macros() {
                println!(
                    "{:<20} {:<24} {:>2} steps  {}",
                    m.name, m.display_name, m.steps, m.description
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Modules => {
            for m in orchestrator.list_modules() {
                println!("{:<32} {:<10} {}", m.name, m.role.as_str(), m.address);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let unresolved = orchestrator.unresolved_targets();
            println!(
                "{} modules, {} macros",
                orchestrator.list_modules().len(),
                orchestrator.list_macros().len()
            );
            for target in &unresolved {
                println!(
                    "macro '{}' step {} targets unknown module '{}'",
                    target.macro_name, target.step_index, target.module
                );
            }
            Ok(if unresolved.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

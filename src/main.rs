//! eraflow CLI
//!
//! Entry point for the `eraflow` command-line tool.

use clap::{Args, Parser, Subcommand};
use eraflow::input::{collect_overlay, parse_assignment};
use eraflow::settings::DEFAULT_SETTINGS_PATH;
use eraflow::{
    logging, DebugConfig, EffectiveSettings, EraTracker, RunOutcome, RunnerError, Settings,
    StepRegistry, StepRunner,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "eraflow")]
#[command(about = "Apply and delete workflow steps with era-based garbage collection", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Change to this directory before doing anything else
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Path to settings file (default: .eraflow/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override the state directory
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Debugger configuration passed through to steps (string or JSON object)
    #[arg(long, global = true)]
    dlv: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a step and collect resources it no longer produces
    Apply(RunArgs),

    /// Remove every resource owned by a step
    Delete(RunArgs),

    /// Show the current era and tracked resources
    Status {
        /// Only list resources under this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Step identifier (e.g. foobernetes or namespace/name)
    step: String,

    /// Overlay value as KEY=VALUE with a dotted key (repeatable)
    #[arg(long = "data", short = 'd', value_parser = parse_assignment)]
    data: Vec<(String, String)>,

    /// TOML or JSON file with overlay values
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    if let Some(home) = &cli.home {
        if let Err(e) = std::env::set_current_dir(home) {
            error!(home = %home.display(), error = %e, "unable to change directory");
            eprintln!("Error: unable to change directory to '{}': {}", home.display(), e);
            process::exit(1);
        }
    }

    let settings = match load_settings(cli.config.as_deref(), cli.state_dir.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Apply(args) => run_step(&settings, cli.dlv.as_deref(), args, false),
        Commands::Delete(args) => run_step(&settings, cli.dlv.as_deref(), args, true),
        Commands::Status { prefix, json } => run_status(&settings, &prefix, json),
    }
}

fn load_settings(config: Option<&Path>, state_dir: Option<&Path>) -> Result<Settings, String> {
    if let Some(path) = config {
        if !path.exists() {
            return Err(format!("settings file not found: {}", path.display()));
        }
    }
    let path = config.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_PATH));

    let cli_overrides = state_dir.map(|dir| serde_json::json!({ "state_dir": dir }));
    let effective = EffectiveSettings::build(Some(path), cli_overrides).map_err(|e| e.to_string())?;
    debug!(sources = ?effective.sources, "settings loaded");
    effective.settings().map_err(|e| e.to_string())
}

fn run_step(settings: &Settings, dlv: Option<&str>, args: RunArgs, delete: bool) {
    let dlv = match dlv.map(DebugConfig::parse).transpose() {
        Ok(cfg) => cfg.flatten(),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let overlay = match collect_overlay(args.data_file.as_deref(), &args.data) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let registry = StepRegistry::with_builtins(&settings.workdir);
    let runner = match StepRunner::from_settings(settings, registry) {
        Ok(r) => r.with_dlv(dlv),
        Err(e) => exit_with(e),
    };

    let result = if delete {
        runner.delete(&args.step, overlay)
    } else {
        runner.apply(&args.step, overlay)
    };

    match result {
        Ok(outcome) => {
            print_outcome(&outcome, args.json);
            process::exit(outcome.exit_code());
        }
        Err(e) => exit_with(e),
    }
}

fn print_outcome(outcome: &RunOutcome, json: bool) {
    if json {
        match serde_json::to_string_pretty(outcome) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Error serializing output: {}", e),
        }
        return;
    }

    println!("{} done: {} (era {})", outcome.operation, outcome.step_id, outcome.era);
    if !outcome.sweep.deleted.is_empty() {
        println!("  Removed: {}", outcome.sweep.deleted.join(", "));
    }
    if let Err(e) = outcome.sweep.check() {
        println!("  Warning: {}", e);
    }
}

fn run_status(settings: &Settings, prefix: &str, json: bool) {
    let tracker = match EraTracker::open(&settings.state_dir) {
        Ok(t) => t,
        Err(e) => exit_with(RunnerError::from(e)),
    };
    let resources = tracker.resources(prefix);

    if json {
        let doc = serde_json::json!({
            "era": tracker.current_era(),
            "resources": resources,
        });
        match serde_json::to_string_pretty(&doc) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("Era: {}", tracker.current_era());
    if resources.is_empty() {
        println!("No tracked resources.");
        return;
    }
    for r in &resources {
        println!("  {} (era {})", r.identifier, r.last_touched_era);
    }
}

fn exit_with(e: RunnerError) -> ! {
    error!(error = %e, "run failed");
    eprintln!("Error: {}", e);
    process::exit(e.exit_code());
}

pub mod commands;
pub mod logging;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use poflow_core::config::{AppConfig, LoadOptions};

use commands::{advance, instantiate, progress, route};

#[derive(Debug, Parser)]
#[command(
    name = "poflow",
    about = "Purchase-order approval workflow CLI",
    long_about = "Migrate and seed the workflow database, inspect configuration, and route, \
                  instantiate, and decide purchase-order approval steps.",
    after_help = "Examples:\n  poflow migrate\n  poflow route --company company-demo --amount \
                  5000000 --role field_worker --user u-demo-field\n  poflow progress --order PO-1"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a poflow.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo workflow for `company-demo`")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, and schema migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Decide the approval route for an order without persisting anything")]
    Route(route::RouteArgs),
    #[command(about = "Route an order and create its pending approval steps")]
    Instantiate(instantiate::InstantiateArgs),
    #[command(about = "Approve, reject, or skip a pending approval step")]
    Advance(advance::AdvanceArgs),
    #[command(about = "Show an order's approval steps, progress, and outcome")]
    Progress(progress::ProgressArgs),
}

pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let options = LoadOptions { require_file: cli.config.is_some(), config_path: cli.config };

    // Config errors are reported by the command itself; logging falls back to defaults.
    let logging_config = AppConfig::load(options.clone()).unwrap_or_default();
    logging::init(&logging_config.logging);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed => commands::seed::run(&options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
        Command::Route(args) => route::run(&options, &args),
        Command::Instantiate(args) => instantiate::run(&options, &args),
        Command::Advance(args) => advance::run(&options, &args),
        Command::Progress(args) => progress::run(&options, &args),
    };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", result.output).context("failed to write command output")?;
    Ok(ExitCode::from(result.exit_code))
}

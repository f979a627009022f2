// src/bin/ci-stages.rs

use anyhow::{Context, Result};
use ci_stages::{
    cli::Cli,
    core::stage_executor::{RunnerSettings, StageExecutor},
    models::process_env,
    system::executor::SystemRunner,
};
use clap::Parser;
use colored::*;
use std::env;

/// The main entry point of `ci-stages`.
/// It sets up logging, parses arguments, runs the requested stage(s),
/// and performs centralized error handling.
fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let working_dir = env::current_dir().context("Could not determine the current directory")?;
    let settings = RunnerSettings {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        working_dir,
    };

    let mut executor = StageExecutor::from_settings(&settings, process_env(), SystemRunner)?;
    let options = cli.stage_options();
    match cli.stage {
        Some(stage) => {
            executor.execute_stage(stage, options)?;
        }
        None => executor.execute_all(options)?,
    }
    Ok(())
}

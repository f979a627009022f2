// src/cli.rs

//! Command-line interface.

use crate::constants::{CONFIG_FILENAME, ENV_FILENAME};
use crate::core::stage_executor::StageOptions;
use crate::models::Stage;
use clap::Parser;
use std::path::PathBuf;

/// ci-stages: runs the commands of one CI lifecycle stage, and of every earlier
/// stage that has not run yet, as declared in a single YAML file.
///
/// The active CI provider is detected from the environment (`APPVEYOR`,
/// `TF_BUILD`, `CIRCLECI` or `TRAVIS` set to `true`). The environment built by
/// each stage is saved and carried over to the next invocation.
///
/// Stages, in order: before_install, install, before_build, build, test, after_test.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The stage to execute. When omitted, every stage is executed in order.
    pub stage: Option<Stage>,

    /// Execute the stage even if it already completed.
    #[arg(long)]
    pub force: bool,

    /// Do not execute earlier stages that have not completed yet.
    #[arg(long)]
    pub without_deps: bool,

    /// Delete the saved environment (and with it every completion marker) first.
    #[arg(long)]
    pub clear_cached_env: bool,

    /// Path of the configuration file.
    #[arg(long, value_name = "FILE", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Path of the file the environment is saved to between invocations.
    #[arg(long, value_name = "FILE", default_value = ENV_FILENAME)]
    pub env_file: PathBuf,
}

impl Cli {
    /// Engine options selected by the flags.
    pub fn stage_options(&self) -> StageOptions {
        StageOptions {
            force: self.force,
            with_dependencies: !self.without_deps,
            clear_cache: self.clear_cached_env,
        }
    }
}

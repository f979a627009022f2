//! Runs the commands of a CI lifecycle stage as declared in `ci-stages.yml`.

pub mod cli;
pub mod constants;
/// Configuration, expansion and stage execution.
pub mod core;
pub mod models;
pub mod system;

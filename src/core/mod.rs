// src/core/mod.rs

pub mod command_expander;
/// Reading `ci-stages.yml`.
pub mod config_loader;
/// Layering of the global and provider scopes of a stage.
pub mod config_resolver;
pub mod env_store;
pub mod interpolator;
/// Detection of the CI provider and its operating system.
pub mod provider;
pub mod stage_executor;

// src/core/config_resolver.rs

use crate::constants::CI_NAME_VAR;
use crate::core::provider::Platform;
use crate::models::{
    CiConfig, Command, EnvMap, ProviderId, ProviderScope, ScopeConfig, Stage, StageConfig,
};
use thiserror::Error;

/// A configuration that is well-formed YAML but not acceptable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A scope sets a variable the tool owns.
    #[error("{name} environment variable is reserved and can not be set (stage '{stage}', scope '{scope}')")]
    ReservedVariable {
        name: &'static str,
        stage: Stage,
        scope: String,
    },
}

/// The environment of one configuration scope, in the order scopes are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedEnv {
    /// `global`, a provider name, or `<provider>-<os>`.
    pub scope: String,
    /// Variables exactly as written in that scope.
    pub environment: EnvMap,
}

/// What a stage runs on the current platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedStage {
    /// Stage-global scope first, then the provider (or provider/OS) scope.
    pub layers: Vec<ScopedEnv>,
    /// The layers flattened; a provider value replaces a global value of the same name.
    pub environment: EnvMap,
    /// Global commands followed by provider/OS commands.
    pub commands: Vec<Command>,
}

/// Layers the global, provider and provider/OS scopes of `stage`.
///
/// A stage missing from the document, a provider without a node, or an operating
/// system without a node under a multi-OS provider all contribute nothing.
pub fn resolve(
    config: &CiConfig,
    stage: Stage,
    platform: &Platform,
) -> Result<ResolvedStage, ConfigError> {
    let mut resolved = ResolvedStage::default();

    let Some(stage_config) = config.stage(stage) else {
        log::debug!("Stage '{}' is not configured.", stage);
        return Ok(resolved);
    };

    ensure_no_reserved_anywhere(stage_config, stage)?;

    push_scope(
        &mut resolved,
        stage,
        "global".to_string(),
        &stage_config.environment,
        &stage_config.commands,
    )?;

    let provider = platform.provider;
    let provider_scope = stage_config
        .provider_scope(provider)
        .and_then(|scope| select_scope(scope, platform));

    if let Some((scope_name, scope)) = provider_scope {
        push_scope(
            &mut resolved,
            stage,
            scope_name,
            &scope.environment,
            &scope.commands,
        )?;
    }

    ensure_not_reserved(&resolved.environment, stage, "merged")?;

    log::debug!(
        "Resolved stage '{}': {} layer(s), {} variable(s), {} command(s)",
        stage,
        resolved.layers.len(),
        resolved.environment.len(),
        resolved.commands.len()
    );
    Ok(resolved)
}

/// Picks the node matching the platform, descending into the OS layer when needed.
fn select_scope<'a>(
    scope: ProviderScope<'a>,
    platform: &Platform,
) -> Option<(String, &'a ScopeConfig)> {
    let provider = platform.provider.name();
    match scope {
        ProviderScope::Single(config) => Some((provider.to_string(), config)),
        ProviderScope::PerOs(per_os) => {
            let os = platform.operating_system.as_deref()?;
            let config = per_os.get(os);
            if config.is_none() {
                log::debug!("No '{}' configuration for operating system '{}'.", provider, os);
            }
            config.map(|c| (format!("{}-{}", provider, os), c))
        }
    }
}

fn push_scope(
    resolved: &mut ResolvedStage,
    stage: Stage,
    scope: String,
    environment: &EnvMap,
    commands: &[Command],
) -> Result<(), ConfigError> {
    ensure_not_reserved(environment, stage, &scope)?;

    resolved
        .environment
        .extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())));
    resolved.commands.extend_from_slice(commands);
    if !environment.is_empty() {
        resolved.layers.push(ScopedEnv {
            scope,
            environment: environment.clone(),
        });
    }
    Ok(())
}

/// Rejects a reserved name in any scope of the stage, active on this platform or not.
fn ensure_no_reserved_anywhere(
    stage_config: &StageConfig,
    stage: Stage,
) -> Result<(), ConfigError> {
    ensure_not_reserved(&stage_config.environment, stage, "global")?;
    for provider in ProviderId::ALL {
        match stage_config.provider_scope(provider) {
            None => {}
            Some(ProviderScope::Single(scope)) => {
                ensure_not_reserved(&scope.environment, stage, provider.name())?;
            }
            Some(ProviderScope::PerOs(per_os)) => {
                for (os, scope) in per_os {
                    let name = format!("{}-{}", provider.name(), os);
                    ensure_not_reserved(&scope.environment, stage, &name)?;
                }
            }
        }
    }
    Ok(())
}

fn ensure_not_reserved(environment: &EnvMap, stage: Stage, scope: &str) -> Result<(), ConfigError> {
    if environment.contains_key(CI_NAME_VAR) {
        return Err(ConfigError::ReservedVariable {
            name: CI_NAME_VAR,
            stage,
            scope: scope.to_string(),
        });
    }
    Ok(())
}

// src/core/provider.rs

use crate::core::command_expander::ShellMode;
use crate::models::{EnvMap, ProviderId};
use thiserror::Error;

/// The host environment does not identify a supported provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No detection variable is set.
    #[error("unknown provider: none of the environment variables {vars} is set to 'true'")]
    UnknownProvider { vars: String },
    /// A multi-OS provider without its OS variable.
    #[error("provider '{provider}' runs on several operating systems but '{var}' is not set")]
    MissingOperatingSystem { provider: ProviderId, var: &'static str },
}

/// Determines which provider is active from a snapshot of the host environment.
///
/// A provider is active when its detection variable equals `true`, ignoring case.
/// When several are set, the first one in [`ProviderId::ALL`] wins.
pub fn resolve(host_env: &EnvMap) -> Result<ProviderId, ProviderError> {
    ProviderId::ALL
        .iter()
        .copied()
        .find(|provider| {
            host_env
                .get(provider.detection_var())
                .is_some_and(|value| value.eq_ignore_ascii_case("true"))
        })
        .ok_or_else(|| ProviderError::UnknownProvider {
            vars: ProviderId::ALL
                .iter()
                .map(|p| p.detection_var())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Reads the operating system discriminator for `provider`.
/// Returns `Ok(None)` for providers with a single implicit OS.
pub fn operating_system(
    provider: ProviderId,
    host_env: &EnvMap,
) -> Result<Option<String>, ProviderError> {
    match provider.os_var() {
        None => Ok(None),
        Some(var) => host_env
            .get(var)
            .cloned()
            .map(Some)
            .ok_or(ProviderError::MissingOperatingSystem { provider, var }),
    }
}

/// The resolved provider identity, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// The active provider.
    pub provider: ProviderId,
    /// Set only for providers offering several operating systems.
    pub operating_system: Option<String>,
}

impl Platform {
    /// Builds a platform without looking at the environment.
    pub fn new(provider: ProviderId, operating_system: Option<String>) -> Self {
        Self {
            provider,
            operating_system,
        }
    }

    /// Resolves both the provider and its operating system.
    pub fn detect(host_env: &EnvMap) -> Result<Self, ProviderError> {
        let provider = resolve(host_env)?;
        let operating_system = operating_system(provider, host_env)?;
        log::debug!(
            "Detected provider '{}' (operating system: {:?})",
            provider,
            operating_system
        );
        Ok(Self::new(provider, operating_system))
    }

    /// How command text is tokenized on this platform.
    pub fn shell_mode(&self) -> ShellMode {
        if self
            .provider
            .is_posix_shell(self.operating_system.as_deref())
        {
            ShellMode::Posix
        } else {
            ShellMode::Native
        }
    }
}

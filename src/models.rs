// src/models.rs

//! Configuration document, stages and providers.

use crate::constants::MARKER_PREFIX;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Variable name to value. Keys are case-sensitive and unique.
pub type EnvMap = BTreeMap<String, String>;

/// Takes a snapshot of the current process environment.
///
/// Variables whose name or value is not valid Unicode are skipped.
pub fn process_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

// --- STAGES ---

/// One step of the fixed CI lifecycle. The declaration order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// `before_install`
    BeforeInstall,
    /// `install`
    Install,
    /// `before_build`
    BeforeBuild,
    /// `build`
    Build,
    /// `test`
    Test,
    /// `after_test`
    AfterTest,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Self; 6] = [
        Self::BeforeInstall,
        Self::Install,
        Self::BeforeBuild,
        Self::Build,
        Self::Test,
        Self::AfterTest,
    ];

    /// The name used in the configuration document and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::BeforeInstall => "before_install",
            Self::Install => "install",
            Self::BeforeBuild => "before_build",
            Self::Build => "build",
            Self::Test => "test",
            Self::AfterTest => "after_test",
        }
    }

    /// The last stage of the lifecycle.
    pub fn last() -> Self {
        Self::AfterTest
    }

    /// All stages strictly before `self`, in execution order.
    pub fn dependencies(self) -> Vec<Self> {
        Self::ALL
            .iter()
            .copied()
            .take_while(|stage| *stage != self)
            .collect()
    }

    /// The persisted key flagging this stage as completed, e.g. `CI_STAGES_BEFORE_INSTALL`.
    pub fn marker_key(self) -> String {
        format!("{}{}", MARKER_PREFIX, self.name().to_uppercase())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string does not name a known stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid stage '{name}' (expected one of: before_install, install, before_build, build, test, after_test)")]
pub struct ParseStageError {
    /// The rejected input.
    pub name: String,
}

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| ParseStageError {
                name: s.to_string(),
            })
    }
}

// --- PROVIDERS ---

/// A CI hosting service whose environment selects the configuration scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    /// AppVeyor (Windows, `cmd.exe`).
    Appveyor,
    /// Azure Pipelines (Linux, macOS and Windows agents).
    Azure,
    /// CircleCI.
    Circle,
    /// Travis CI (Linux and macOS).
    Travis,
}

impl ProviderId {
    /// Every provider, in detection order.
    pub const ALL: [Self; 4] = [Self::Appveyor, Self::Azure, Self::Circle, Self::Travis];

    /// The key used for this provider in the configuration document.
    pub fn name(self) -> &'static str {
        match self {
            Self::Appveyor => "appveyor",
            Self::Azure => "azure",
            Self::Circle => "circle",
            Self::Travis => "travis",
        }
    }

    /// The variable set to `true` (any case) when running on this provider.
    pub fn detection_var(self) -> &'static str {
        match self {
            Self::Appveyor => "APPVEYOR",
            Self::Azure => "TF_BUILD",
            Self::Circle => "CIRCLECI",
            Self::Travis => "TRAVIS",
        }
    }

    /// The variable naming the operating system, for providers offering more than one.
    pub fn os_var(self) -> Option<&'static str> {
        match self {
            Self::Azure => Some("AGENT_OS"),
            Self::Travis => Some("TRAVIS_OS_NAME"),
            Self::Appveyor | Self::Circle => None,
        }
    }

    /// Whether commands on this provider/OS go through a POSIX shell.
    pub fn is_posix_shell(self, operating_system: Option<&str>) -> bool {
        match self {
            Self::Appveyor => false,
            Self::Circle => true,
            Self::Azure | Self::Travis => !matches!(operating_system, Some("Windows_NT" | "windows")),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// --- COMMANDS ---

/// One entry of a `commands` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCommand")]
pub enum Command {
    /// Run by the default shell, after placeholder expansion.
    Shell(String),
    /// Fed literally to `interpreter -c`, e.g. `python: print("hi")`.
    Scripted {
        /// The program receiving the body.
        interpreter: String,
        /// The script, single or multi-line.
        body: String,
    },
}

/// The two YAML shapes a command may take.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Shell(String),
    Scripted(BTreeMap<String, String>),
}

impl TryFrom<RawCommand> for Command {
    type Error = String;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        match raw {
            RawCommand::Shell(text) => Ok(Self::Shell(text)),
            RawCommand::Scripted(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((interpreter, body)), None) => Ok(Self::Scripted { interpreter, body }),
                    _ => Err(
                        "a scripted command must have exactly one `interpreter: body` entry"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

// --- CONFIGURATION DOCUMENT (ci-stages.yml) ---

/// The deserialized configuration document.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct CiConfig {
    /// Informational; logged on load.
    #[serde(default)]
    pub schema_version: Option<String>,
    /// `before_install` node.
    #[serde(default)]
    pub before_install: Option<StageConfig>,
    /// `install` node.
    #[serde(default)]
    pub install: Option<StageConfig>,
    /// `before_build` node.
    #[serde(default)]
    pub before_build: Option<StageConfig>,
    /// `build` node.
    #[serde(default)]
    pub build: Option<StageConfig>,
    /// `test` node.
    #[serde(default)]
    pub test: Option<StageConfig>,
    /// `after_test` node.
    #[serde(default)]
    pub after_test: Option<StageConfig>,
}

impl CiConfig {
    /// The node configured for `stage`, if any.
    pub fn stage(&self, stage: Stage) -> Option<&StageConfig> {
        match stage {
            Stage::BeforeInstall => self.before_install.as_ref(),
            Stage::Install => self.install.as_ref(),
            Stage::BeforeBuild => self.before_build.as_ref(),
            Stage::Build => self.build.as_ref(),
            Stage::Test => self.test.as_ref(),
            Stage::AfterTest => self.after_test.as_ref(),
        }
    }
}

/// Environment and commands shared by every provider, plus per-provider overrides.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Variables for every provider.
    #[serde(default, deserialize_with = "deserialize_environment")]
    pub environment: EnvMap,
    /// Commands for every provider, run first.
    #[serde(default, deserialize_with = "deserialize_nullable")]
    pub commands: Vec<Command>,
    /// AppVeyor overrides.
    #[serde(default)]
    pub appveyor: Option<ScopeConfig>,
    /// Keyed by `AGENT_OS`.
    #[serde(default)]
    pub azure: Option<OsScopes>,
    /// CircleCI overrides.
    #[serde(default)]
    pub circle: Option<ScopeConfig>,
    /// Keyed by `TRAVIS_OS_NAME`.
    #[serde(default)]
    pub travis: Option<OsScopes>,
}

/// Overrides for one provider, or for one operating system of a multi-OS provider.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ScopeConfig {
    /// Replaces stage-global values of the same name.
    #[serde(default, deserialize_with = "deserialize_environment")]
    pub environment: EnvMap,
    /// Appended after the stage-global commands.
    #[serde(default, deserialize_with = "deserialize_nullable")]
    pub commands: Vec<Command>,
}

/// Operating system name (e.g. `linux`, `osx`, `Windows_NT`) to its overrides.
pub type OsScopes = BTreeMap<String, ScopeConfig>;

/// A borrowed view of a provider node, shaped by whether the provider is multi-OS.
#[derive(Debug, Clone, Copy)]
pub enum ProviderScope<'a> {
    /// A provider with one implicit operating system.
    Single(&'a ScopeConfig),
    /// A provider keyed further by operating system.
    PerOs(&'a OsScopes),
}

impl StageConfig {
    /// The overrides declared for `provider` under this stage, if any.
    pub fn provider_scope(&self, provider: ProviderId) -> Option<ProviderScope<'_>> {
        match provider {
            ProviderId::Appveyor => self.appveyor.as_ref().map(ProviderScope::Single),
            ProviderId::Circle => self.circle.as_ref().map(ProviderScope::Single),
            ProviderId::Azure => self.azure.as_ref().map(ProviderScope::PerOs),
            ProviderId::Travis => self.travis.as_ref().map(ProviderScope::PerOs),
        }
    }
}

/// Accepts any scalar as an environment value; `null` becomes the empty string.
fn deserialize_environment<'de, D>(deserializer: D) -> Result<EnvMap, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::Null => String::new(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::String(s) => s,
                _ => {
                    return Err(D::Error::custom(format!(
                        "environment variable '{}' must be a scalar value",
                        name
                    )));
                }
            };
            Ok((name, value))
        })
        .collect()
}

/// Treats an explicit `null` like an absent key.
fn deserialize_nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

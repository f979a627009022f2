// src/constants.rs

//! File names and reserved keys.

/// The name of the configuration document looked up in the working directory.
pub const CONFIG_FILENAME: &str = "ci-stages.yml";

/// The name of the file carrying the environment from one stage invocation to the next.
pub const ENV_FILENAME: &str = "env.json";

/// Variable holding the name of the active CI provider. Configuration may never set it.
pub const CI_NAME_VAR: &str = "CI_NAME";

/// Prefix of the persisted completion marker keys (e.g. `CI_STAGES_INSTALL`).
pub const MARKER_PREFIX: &str = "CI_STAGES_";

/// Value written under a completion marker key.
pub const MARKER_VALUE: &str = "1";

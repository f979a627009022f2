// src/core/stage_executor.rs

//! Runs lifecycle stages in order, once each, carrying the environment forward.
//!
//! A stage is done when its completion marker is present in the persisted
//! environment. Asking for a stage first runs every earlier stage that is not
//! done yet, so a CI host may invoke one stage per job step and still get the
//! side effects of the previous ones.

use crate::constants::{CI_NAME_VAR, MARKER_VALUE, CONFIG_FILENAME, ENV_FILENAME};
use crate::core::command_expander::expand_command;
use crate::core::config_loader::{self, ConfigLoadError};
use crate::core::config_resolver::{self, ConfigError};
use crate::core::env_store::{EnvStore, EnvStoreError};
use crate::core::interpolator::expand_recursive;
use crate::core::provider::{Platform, ProviderError};
use crate::models::{CiConfig, Command, EnvMap, Stage};
use crate::system::executor::{CommandRunner, ExecutionError, Invocation};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that stops a stage run.
#[derive(Error, Debug)]
pub enum StageError {
    /// The configuration sets a reserved variable.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// The provider could not be detected.
    #[error(transparent)]
    UnknownProvider(#[from] ProviderError),
    /// A command exited with a non-zero status.
    #[error(
        "A command failed while executing {} stage.\n  Return code:\n    {return_code}\n  Command:\n    {command}\n  Working directory:\n    {}",
        .stage.name().to_uppercase(),
        .cwd.display()
    )]
    StepExecution {
        /// The stage being executed.
        stage: Stage,
        /// `-1` when the command was terminated by a signal.
        return_code: i32,
        /// The command as run, after expansion.
        command: String,
        /// Everything the command printed, stdout then stderr.
        output: String,
        /// Working directory of the command.
        cwd: PathBuf,
    },
    /// The configuration file does not exist.
    #[error("Couldn't find {}", .0.display())]
    MissingConfigurationFile(PathBuf),
    /// The configuration file could not be read or parsed.
    #[error(transparent)]
    InvalidConfiguration(ConfigLoadError),
    /// The persisted environment could not be read or written.
    #[error(transparent)]
    Environment(#[from] EnvStoreError),
    /// A command could not be started.
    #[error(transparent)]
    Spawn(#[from] ExecutionError),
}

impl From<ConfigLoadError> for StageError {
    fn from(e: ConfigLoadError) -> Self {
        match e {
            ConfigLoadError::NotFound(path) => StageError::MissingConfigurationFile(path),
            other => StageError::InvalidConfiguration(other),
        }
    }
}

/// Where the runner reads its configuration, keeps its state and runs commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// The YAML configuration document.
    pub config_path: PathBuf,
    /// The persisted environment.
    pub env_file: PathBuf,
    /// Where every command runs.
    pub working_dir: PathBuf,
}

impl RunnerSettings {
    /// Default file names inside `dir`, which is also the working directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            config_path: dir.join(CONFIG_FILENAME),
            env_file: dir.join(ENV_FILENAME),
            working_dir: dir,
        }
    }
}

/// How one invocation treats completion markers and dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOptions {
    /// Run the stage even if it already completed.
    pub force: bool,
    /// Run earlier stages that have not completed yet.
    pub with_dependencies: bool,
    /// Delete the persisted environment before anything else.
    pub clear_cache: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            force: false,
            with_dependencies: true,
            clear_cache: false,
        }
    }
}

/// What [`StageExecutor::execute_stage`] did with the requested stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Every command ran and succeeded.
    Executed,
    /// The completion marker was already set.
    Skipped,
}

/// Lifecycle of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Not started and no marker persisted.
    Pending,
    /// Commands are being run.
    Running,
    /// Finished, in this run or an earlier one.
    Completed,
    /// A command failed or could not be started.
    Failed,
}

type StageResult<T> = Result<T, StageError>;

/// Runs stages against one configuration, platform and environment file.
pub struct StageExecutor<R: CommandRunner> {
    config: CiConfig,
    platform: Platform,
    store: EnvStore,
    host_env: EnvMap,
    working_dir: PathBuf,
    runner: R,
    states: BTreeMap<Stage, StageState>,
}

impl<R: CommandRunner> std::fmt::Debug for StageExecutor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("platform", &self.platform)
            .field("store", &self.store)
            .field("working_dir", &self.working_dir)
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> StageExecutor<R> {
    /// Creates an executor for an already parsed configuration.
    ///
    /// `host_env` is the environment the runner was started with. It decides the
    /// provider and is the base every stage's environment is built on.
    pub fn new(
        config: CiConfig,
        settings: &RunnerSettings,
        host_env: EnvMap,
        runner: R,
    ) -> StageResult<Self> {
        let platform = Platform::detect(&host_env)?;
        Ok(Self {
            config,
            platform,
            store: EnvStore::new(&settings.env_file),
            host_env,
            working_dir: settings.working_dir.clone(),
            runner,
            states: BTreeMap::new(),
        })
    }

    /// Loads the configuration named by `settings`, then behaves like [`Self::new`].
    pub fn from_settings(settings: &RunnerSettings, host_env: EnvMap, runner: R) -> StageResult<Self> {
        let config = config_loader::load_config(&settings.config_path)?;
        Self::new(config, settings, host_env, runner)
    }

    /// The detected provider identity.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// The persisted environment.
    pub fn store(&self) -> &EnvStore {
        &self.store
    }

    /// The command runner in use.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// State of `stage` as seen by this executor. Stages untouched in this run
    /// report `Completed` when their marker was persisted by an earlier run.
    pub fn state_of(&self, stage: Stage) -> StageResult<StageState> {
        if let Some(state) = self.states.get(&stage) {
            return Ok(*state);
        }
        let persisted = self.store.read()?;
        Ok(if persisted.contains_key(&stage.marker_key()) {
            StageState::Completed
        } else {
            StageState::Pending
        })
    }

    /// Executes `stage`, preceded by its unfinished dependencies unless disabled.
    pub fn execute_stage(&mut self, stage: Stage, options: StageOptions) -> StageResult<StageOutcome> {
        if options.clear_cache {
            self.clear_cache()?;
        }
        self.step(stage, options.force, options.with_dependencies)
    }

    /// Executes every stage in lifecycle order, each at most once.
    pub fn execute_all(&mut self, options: StageOptions) -> StageResult<()> {
        if options.clear_cache {
            self.clear_cache()?;
        }
        if options.with_dependencies {
            // Running the last stage pulls in all the others.
            self.step(Stage::last(), options.force, true)?;
        } else {
            for stage in Stage::ALL {
                self.step(stage, options.force, false)?;
            }
        }
        Ok(())
    }

    fn clear_cache(&self) -> StageResult<()> {
        log::info!("Clearing cached environment '{}'", self.store.path().display());
        self.store.clear()?;
        Ok(())
    }

    fn step(&mut self, stage: Stage, force: bool, with_dependencies: bool) -> StageResult<StageOutcome> {
        if force {
            self.clear_markers(stage, with_dependencies)?;
        }

        let persisted = self.store.read()?;
        if persisted.contains_key(&stage.marker_key()) {
            println!(
                "{} {}",
                "↷".yellow(),
                format!("Skipping '{}' stage: already executed (use --force to run it again)", stage)
                    .dimmed()
            );
            log::debug!("Marker '{}' is set, skipping.", stage.marker_key());
            self.states.insert(stage, StageState::Completed);
            return Ok(StageOutcome::Skipped);
        }

        if with_dependencies {
            let dependencies = stage.dependencies();
            let unfinished = dependencies
                .iter()
                .any(|dep| !persisted.contains_key(&dep.marker_key()));
            if let (true, Some(previous)) = (unfinished, dependencies.last()) {
                log::debug!("'{}' depends on unfinished stages, running '{}' first.", stage, previous);
                self.step(*previous, false, true)?;
            }
        }

        self.states.insert(stage, StageState::Running);
        let result = self.run_stage(stage);
        let state = if result.is_ok() {
            StageState::Completed
        } else {
            StageState::Failed
        };
        self.states.insert(stage, state);
        result.map(|()| StageOutcome::Executed)
    }

    /// Removes the marker of `stage` (and of its dependencies, if asked) from the persisted state.
    fn clear_markers(&self, stage: Stage, with_dependencies: bool) -> StageResult<()> {
        let mut persisted = self.store.read()?;
        let mut stages = vec![stage];
        if with_dependencies {
            stages.extend(stage.dependencies());
        }

        let mut changed = false;
        for stage in stages {
            if persisted.remove(&stage.marker_key()).is_some() {
                log::debug!("Cleared marker '{}'", stage.marker_key());
                changed = true;
            }
        }
        if changed {
            self.store.save(&persisted)?;
        }
        Ok(())
    }

    fn run_stage(&self, stage: Stage) -> StageResult<()> {
        println!(
            "\n{} {}",
            "==>".blue().bold(),
            format!("Executing '{}' stage on {}", stage, self.platform.provider).bold()
        );

        let resolved = config_resolver::resolve(&self.config, stage, &self.platform)?;
        let mut env = self.store.acquire(&self.host_env)?;
        env.insert(CI_NAME_VAR.to_string(), self.platform.provider.name().to_string());

        for layer in &resolved.layers {
            log::debug!("Expanding '{}' environment of '{}'", layer.scope, stage);
            let mut step_env = layer.environment.clone();
            expand_recursive(&mut step_env, &mut env);
        }

        let mode = self.platform.shell_mode();
        for command in &resolved.commands {
            match command {
                Command::Shell(text) => {
                    let expanded = expand_command(text, &env, mode);
                    if expanded.trim().is_empty() {
                        log::debug!("Skipping blank command '{}'", text);
                        continue;
                    }
                    self.dispatch(stage, &Invocation::Shell(&expanded), &env)?;
                }
                Command::Scripted { interpreter, body } => {
                    let invocation = Invocation::Interpreter {
                        program: interpreter,
                        body,
                    };
                    self.dispatch(stage, &invocation, &env)?;
                }
            }
        }

        env.insert(stage.marker_key(), MARKER_VALUE.to_string());
        env.commit()?;
        log::info!("Stage '{}' completed.", stage);
        Ok(())
    }

    fn dispatch(&self, stage: Stage, invocation: &Invocation<'_>, env: &EnvMap) -> StageResult<()> {
        let display = invocation.display();
        println!("{} {}", "→".blue(), display.green());

        let result = self.runner.run(invocation, &self.working_dir, env)?;
        if result.success() {
            return Ok(());
        }

        log::debug!("'{}' failed in stage '{}' with {:?}", display, stage, result.code);
        Err(StageError::StepExecution {
            stage,
            return_code: result.code.unwrap_or(-1),
            command: display,
            output: result.output,
            cwd: self.working_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::executor::CommandOutput;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Records every invocation and fails those containing `fail_on`.
    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<String>>,
        envs: RefCell<Vec<EnvMap>>,
        fail_on: Option<&'static str>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(
            &self,
            invocation: &Invocation<'_>,
            _cwd: &Path,
            env: &EnvMap,
        ) -> Result<CommandOutput, ExecutionError> {
            let text = invocation.display();
            self.calls.borrow_mut().push(text.clone());
            self.envs.borrow_mut().push(env.clone());
            let failed = self.fail_on.is_some_and(|needle| text.contains(needle));
            Ok(CommandOutput {
                code: Some(if failed { 2 } else { 0 }),
                output: if failed { "boom\n".to_string() } else { String::new() },
            })
        }
    }

    const LIFECYCLE: &str = r#"
before_install:
  commands: [echo before_install]
install:
  commands: [echo install]
before_build:
  commands: [echo before_build]
build:
  commands: [echo build]
test:
  commands: [echo test]
after_test:
  commands: [echo after_test]
"#;

    fn circle_env() -> EnvMap {
        [("CIRCLECI".to_string(), "true".to_string())].into_iter().collect()
    }

    fn executor(dir: &TempDir, yaml: &str, runner: RecordingRunner) -> StageExecutor<RecordingRunner> {
        let config = config_loader::parse_config(yaml).unwrap();
        StageExecutor::new(config, &RunnerSettings::in_dir(dir.path()), circle_env(), runner).unwrap()
    }

    fn calls(executor: &StageExecutor<RecordingRunner>) -> Vec<String> {
        executor.runner().calls.borrow().clone()
    }

    fn only(force: bool) -> StageOptions {
        StageOptions {
            force,
            with_dependencies: false,
            clear_cache: false,
        }
    }

    #[test]
    fn test_dependencies_run_first_and_once() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor(&dir, LIFECYCLE, RecordingRunner::default());

        let outcome = executor.execute_stage(Stage::Build, StageOptions::default()).unwrap();
        assert_eq!(outcome, StageOutcome::Executed);
        assert_eq!(
            calls(&executor),
            vec!["echo before_install", "echo install", "echo before_build", "echo build"]
        );

        let again = executor.execute_stage(Stage::Install, StageOptions::default()).unwrap();
        assert_eq!(again, StageOutcome::Skipped);
        assert_eq!(calls(&executor).len(), 4);
        assert_eq!(executor.state_of(Stage::Build).unwrap(), StageState::Completed);
        assert_eq!(executor.state_of(Stage::Test).unwrap(), StageState::Pending);
    }

    #[test]
    fn test_markers_are_persisted() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor(&dir, LIFECYCLE, RecordingRunner::default());
        executor.execute_stage(Stage::Install, StageOptions::default()).unwrap();

        let persisted = executor.store().read().unwrap();
        assert_eq!(persisted.get("CI_STAGES_BEFORE_INSTALL").map(String::as_str), Some("1"));
        assert_eq!(persisted.get("CI_STAGES_INSTALL").map(String::as_str), Some("1"));
        assert!(!persisted.contains_key("CI_STAGES_BEFORE_BUILD"));
    }

    #[test]
    fn test_force_without_dependencies_reruns_only_that_stage() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor(&dir, LIFECYCLE, RecordingRunner::default());
        executor.execute_stage(Stage::Install, StageOptions::default()).unwrap();

        let outcome = executor.execute_stage(Stage::Install, only(true)).unwrap();
        assert_eq!(outcome, StageOutcome::Executed);
        assert_eq!(
            calls(&executor),
            vec!["echo before_install", "echo install", "echo install"]
        );
        assert!(executor.store().read().unwrap().contains_key("CI_STAGES_BEFORE_INSTALL"));
    }

    #[test]
    fn test_force_with_dependencies_reruns_the_chain() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor(&dir, LIFECYCLE, RecordingRunner::default());
        executor.execute_stage(Stage::Install, StageOptions::default()).unwrap();

        let options = StageOptions {
            force: true,
            ..StageOptions::default()
        };
        executor.execute_stage(Stage::Install, options).unwrap();
        assert_eq!(
            calls(&executor),
            vec!["echo before_install", "echo install", "echo before_install", "echo install"]
        );
    }

    #[test]
    fn test_without_dependencies_does_not_run_earlier_stages() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor(&dir, LIFECYCLE, RecordingRunner::default());
        executor.execute_stage(Stage::Build, only(false)).unwrap();
        assert_eq!(calls(&executor), vec!["echo build"]);
    }

    #[test]
    fn test_failing_test_stage_stops_the_lifecycle() {
        let dir = TempDir::new().unwrap();
        let yaml = LIFECYCLE.replace("commands: [echo test]", "commands: [echo test, fail now, echo unreachable]");
        let runner = RecordingRunner {
            fail_on: Some("fail"),
            ..RecordingRunner::default()
        };
        let mut executor = executor(&dir, &yaml, runner);

        let err = executor.execute_stage(Stage::AfterTest, StageOptions::default()).unwrap_err();
        match &err {
            StageError::StepExecution {
                stage,
                return_code,
                command,
                output,
                cwd,
            } => {
                assert_eq!(*stage, Stage::Test);
                assert_eq!(*return_code, 2);
                assert_eq!(command, "fail now");
                assert_eq!(output, "boom\n");
                assert_eq!(cwd, dir.path());
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("TEST stage"));
        assert!(message.contains("Return code:\n    2"));

        let calls = calls(&executor);
        assert!(!calls.iter().any(|c| c == "echo unreachable" || c == "echo after_test"));

        let persisted = executor.store().read().unwrap();
        assert!(persisted.contains_key("CI_STAGES_BUILD"));
        assert!(!persisted.contains_key("CI_STAGES_TEST"));
        assert_eq!(executor.state_of(Stage::Test).unwrap(), StageState::Failed);
        assert_eq!(executor.state_of(Stage::AfterTest).unwrap(), StageState::Pending);
    }

    #[test]
    fn test_reserved_variable_runs_zero_commands() {
        let dir = TempDir::new().unwrap();
        let yaml = "before_install:\n  environment:\n    CI_NAME: foo\n  commands: [echo never]\n";
        let mut executor = executor(&dir, yaml, RecordingRunner::default());

        let err = executor.execute_stage(Stage::BeforeInstall, StageOptions::default()).unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
        assert!(calls(&executor).is_empty());
        assert!(!executor.store().path().exists());
    }

    #[test]
    fn test_reserved_variable_in_another_providers_block_runs_zero_commands() {
        let dir = TempDir::new().unwrap();
        let yaml = "build:\n  commands: [echo never]\n  travis:\n    osx:\n      environment:\n        CI_NAME: foo\n";
        let mut executor = executor(&dir, yaml, RecordingRunner::default());

        let err = executor.execute_stage(Stage::Build, only(false)).unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
        assert!(calls(&executor).is_empty());
    }

    #[test]
    fn test_ci_name_is_available_for_expansion() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
before_install:
  environment:
    FOO: $<CI_NAME>
  commands:
    - echo "ci_name [$<CI_NAME>] foo [$<FOO>]"
"#;
        let mut executor = executor(&dir, yaml, RecordingRunner::default());
        executor.execute_stage(Stage::BeforeInstall, StageOptions::default()).unwrap();

        assert_eq!(calls(&executor), vec![r#"echo "ci_name [circle] foo [circle]""#]);
        let envs = executor.runner().envs.borrow();
        assert_eq!(envs[0]["CI_NAME"], "circle");
        assert_eq!(envs[0]["FOO"], "circle");
    }

    #[test]
    fn test_environment_is_carried_to_later_stages() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
before_install:
  environment:
    FOO: hello
install:
  commands:
    - echo $<FOO>
"#;
        let mut executor = executor(&dir, yaml, RecordingRunner::default());
        executor.execute_stage(Stage::Install, StageOptions::default()).unwrap();
        assert_eq!(calls(&executor), vec!["echo hello"]);
    }

    #[test]
    fn test_clear_cache_forgets_completed_stages() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor(&dir, LIFECYCLE, RecordingRunner::default());
        executor.execute_stage(Stage::BeforeInstall, StageOptions::default()).unwrap();

        let options = StageOptions {
            clear_cache: true,
            ..StageOptions::default()
        };
        let outcome = executor.execute_stage(Stage::BeforeInstall, options).unwrap();
        assert_eq!(outcome, StageOutcome::Executed);
        assert_eq!(calls(&executor).len(), 2);
    }

    #[test]
    fn test_execute_all_runs_each_stage_once() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor(&dir, LIFECYCLE, RecordingRunner::default());
        executor.execute_all(StageOptions::default()).unwrap();
        let expected: Vec<String> = Stage::ALL.iter().map(|s| format!("echo {}", s)).collect();
        assert_eq!(calls(&executor), expected);

        let forced = StageOptions {
            force: true,
            with_dependencies: false,
            clear_cache: false,
        };
        executor.execute_all(forced).unwrap();
        assert_eq!(calls(&executor).len(), 12);
    }

    #[test]
    fn test_scripted_and_blank_commands() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
build:
  commands:
    - "$<UNSET>"
    - python: print("$<NOT_EXPANDED>")
"#;
        let mut executor = executor(&dir, yaml, RecordingRunner::default());
        executor.execute_stage(Stage::Build, only(false)).unwrap();

        let calls = calls(&executor);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("python -c "));
        assert!(calls[0].contains("$<NOT_EXPANDED>"));
    }

    #[test]
    fn test_missing_configuration_file() {
        let dir = TempDir::new().unwrap();
        let settings = RunnerSettings::in_dir(dir.path());
        let result = StageExecutor::from_settings(&settings, circle_env(), RecordingRunner::default());
        assert!(matches!(result, Err(StageError::MissingConfigurationFile(_))));
    }

    #[test]
    fn test_invalid_configuration_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), "deploy:\n  commands: [ls]\n").unwrap();
        let settings = RunnerSettings::in_dir(dir.path());
        let result = StageExecutor::from_settings(&settings, circle_env(), RecordingRunner::default());
        assert!(matches!(result, Err(StageError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_unknown_provider() {
        let dir = TempDir::new().unwrap();
        let config = config_loader::parse_config(LIFECYCLE).unwrap();
        let result = StageExecutor::new(
            config,
            &RunnerSettings::in_dir(dir.path()),
            EnvMap::new(),
            RecordingRunner::default(),
        );
        assert!(matches!(result, Err(StageError::UnknownProvider(_))));
    }

    #[cfg(unix)]
    mod shell {
        use super::*;
        use crate::system::executor::SystemRunner;

        fn host_env(extra: &[(&str, &str)]) -> EnvMap {
            let mut env = circle_env();
            env.insert("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string());
            env.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
            env
        }

        fn run(dir: &TempDir, yaml: &str, host: EnvMap, stages: &[Stage]) -> String {
            let config = config_loader::parse_config(yaml).unwrap();
            let settings = RunnerSettings::in_dir(dir.path());
            let mut executor = StageExecutor::new(config, &settings, host, SystemRunner).unwrap();
            for stage in stages {
                executor.execute_stage(*stage, StageOptions::default()).unwrap();
            }
            fs::read_to_string(dir.path().join("log.txt")).unwrap()
        }

        #[test]
        fn test_provider_override_applies_only_where_declared() {
            let dir = TempDir::new().unwrap();
            let yaml = r#"
before_install:
  environment:
    FOO: hello
  circle:
    environment:
      BAR: under world
  commands:
    - printf '%s\n' "before_install FOO=$FOO BAR=$BAR" >> log.txt
install:
  environment:
    BAR: beautiful world
  commands:
    - printf '%s\n' "install FOO=$FOO BAR=$BAR" >> log.txt
"#;
            let log = run(&dir, yaml, host_env(&[]), &[Stage::BeforeInstall, Stage::Install]);
            assert_eq!(
                log,
                "before_install FOO=hello BAR=under world\ninstall FOO=hello BAR=beautiful world\n"
            );
        }

        #[test]
        fn test_layered_expansion_across_stages() {
            let dir = TempDir::new().unwrap();
            let yaml = r#"
before_install:
  environment:
    SYMBOLS: b;$<SYMBOLS>
  circle:
    environment:
      SYMBOLS: a;$<SYMBOLS>
  commands:
    - printf '%s\n' "before_install [$<SYMBOLS>]" >> log.txt
install:
  environment:
    SYMBOLS: 9;$<SYMBOLS>
  circle:
    environment:
      SYMBOLS: 8;$<SYMBOLS>
  commands:
    - printf '%s\n' "install [$<SYMBOLS>]" >> log.txt
"#;
            let host = host_env(&[("SYMBOLS", "c;d;e")]);
            let log = run(&dir, yaml, host, &[Stage::BeforeInstall, Stage::Install]);
            assert_eq!(log, "before_install [a;b;c;d;e]\ninstall [8;9;a;b;c;d;e]\n");
        }

        #[test]
        fn test_backslashes_survive_double_quoted_substitution() {
            let dir = TempDir::new().unwrap();
            let yaml = r#"
before_install:
  environment:
    WHERE: C:\path\to\the "thing"
  commands:
    - printf '%s\n' "[$<WHERE>]" >> log.txt
"#;
            let log = run(&dir, yaml, host_env(&[]), &[Stage::BeforeInstall]);
            assert_eq!(log, "[C:\\path\\to\\the \"thing\"]\n");
        }

        #[test]
        fn test_multi_line_block_runs_as_one_command() {
            let dir = TempDir::new().unwrap();
            let yaml = r#"
build:
  environment:
    GREETING: hi
  commands:
    - |
      for index in 1 2; do
        # one line per iteration
        printf '%s\n' "$<GREETING> $index" >> log.txt
      done
"#;
            let log = run(&dir, yaml, host_env(&[]), &[Stage::Build]);
            assert!(log.ends_with("hi 1\nhi 2\n"));
        }
    }
}

// src/system/executor.rs

use crate::models::EnvMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command as StdCommand, Stdio};
use thiserror::Error;

/// A command that could not be run at all, as opposed to one that failed.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Spawning the process failed.
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, io::Error),
    /// Reading the child's output or waiting for it failed.
    #[error("Failed to capture output of command '{command}': {source}")]
    Capture {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// What to launch for one command entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation<'a> {
    /// Handed as a whole to the host shell.
    Shell(&'a str),
    /// Run as `<program> -c <body>`.
    Interpreter {
        /// Looked up on `PATH`.
        program: &'a str,
        /// Passed unexpanded.
        body: &'a str,
    },
}

impl Invocation<'_> {
    /// The text shown to the user and reported in errors.
    pub fn display(&self) -> String {
        match self {
            Invocation::Shell(command) => (*command).to_string(),
            Invocation::Interpreter { program, body } => {
                shlex::try_join([*program, "-c", *body])
                    .unwrap_or_else(|_| format!("{} -c {}", program, body))
            }
        }
    }
}

/// Exit status and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    /// Exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs one command to completion. The environment given is the child's whole environment.
pub trait CommandRunner {
    /// Runs `invocation` in `cwd`, returning once the process has exited.
    fn run(
        &self,
        invocation: &Invocation<'_>,
        cwd: &Path,
        env: &EnvMap,
    ) -> Result<CommandOutput, ExecutionError>;
}

/// Spawns real processes, streaming their output to the terminal while capturing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation<'_>,
        cwd: &Path,
        env: &EnvMap,
    ) -> Result<CommandOutput, ExecutionError> {
        let display = invocation.display();
        let mut command = match invocation {
            Invocation::Shell(line) => shell_command(line),
            Invocation::Interpreter { program, body } => {
                let mut command = StdCommand::new(program);
                command.arg("-c").arg(body);
                command
            }
        };

        command
            .current_dir(dunce::simplified(cwd))
            .env_clear()
            .envs(env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!("Spawning '{}' in '{}'", display, cwd.display());
        let child = command
            .spawn()
            .map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?;

        // Make sure the child is not left running if capturing fails midway.
        let mut child = scopeguard::guard(child, |mut child| {
            if let Err(e) = child.kill() {
                log::debug!("Could not kill child process {}: {}", child.id(), e);
            }
            child.wait().ok();
        });

        let captured = capture(&mut child).map_err(|source| ExecutionError::Capture {
            command: display.clone(),
            source,
        })?;

        let mut child = scopeguard::ScopeGuard::into_inner(child);
        let status = child
            .wait()
            .map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?;

        log::debug!("'{}' finished with {}", display, status);
        Ok(CommandOutput {
            code: status.code(),
            output: captured,
        })
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> StdCommand {
    use std::os::windows::process::CommandExt;

    let mut command = StdCommand::new("cmd.exe");
    command.args(["/E:ON", "/V:ON", "/C"]).raw_arg(line);
    command
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> StdCommand {
    let mut command = StdCommand::new("sh");
    command.arg("-c").arg(line);
    command
}

/// Tees the child's stdout and stderr to ours until both pipes close.
/// Returns stdout followed by stderr.
fn capture(child: &mut Child) -> io::Result<String> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (out, err) = std::thread::scope(|scope| {
        let out = scope.spawn(move || match stdout {
            Some(pipe) => tee(pipe, io::stdout()),
            None => Ok(Vec::new()),
        });
        let err = scope.spawn(move || match stderr {
            Some(pipe) => tee(pipe, io::stderr()),
            None => Ok(Vec::new()),
        });
        (join(out), join(err))
    });

    let mut captured = out?;
    captured.extend(err?);
    Ok(String::from_utf8_lossy(&captured).into_owned())
}

fn join(handle: std::thread::ScopedJoinHandle<'_, io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output reader thread panicked")))
}

fn tee(mut source: impl Read, mut sink: impl Write) -> io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let chunk = buf.get(..n).unwrap_or_default();
        captured.extend_from_slice(chunk);
        // Terminal write failures (closed stdout) must not kill the command.
        if sink.write_all(chunk).and_then(|()| sink.flush()).is_err() {
            log::trace!("Could not echo child output to the terminal");
        }
    }
    Ok(captured)
}

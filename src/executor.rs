//! Blocking execution of external commands with a timeout.
//!
//! The source client is driven strictly one command at a time; the only
//! suspension point of a run is waiting on one of these commands.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::MigrateError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Program, arguments and working directory of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// First argument, typically the subcommand
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Value of a `--name=value` argument
    pub fn option(&self, name: &str) -> Option<&str> {
        let prefix = format!("--{}=", name);
        self.args.iter().find_map(|a| a.strip_prefix(prefix.as_str()))
    }

    /// Human readable command line for diagnostics
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            }
            else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// What happened to one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success(Vec<u8>),
    Failed {
        status: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
}

/// Runs external commands
pub trait CommandExecutor {
    fn execute(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutcome>;
}

/// Executor backed by real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutcome> {
        debug!(command = %command.display(), "Running command");

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = command.current_dir {
            process.current_dir(dir);
        }

        let mut child = process
            .spawn()
            .with_context(|| format!("Failed to execute `{}`", command.display()))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_timeout(&mut child, timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout.join();
                let _ = stderr.join();
                return Ok(CommandOutcome::TimedOut);
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if status.success() {
            Ok(CommandOutcome::Success(stdout))
        }
        else {
            Ok(CommandOutcome::Failed {
                status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        }
    }
}

/// Read a pipe to the end on a helper thread so the child never blocks on a full pipe
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<std::process::ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("Failed to wait for child process")? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run a command, retrying only on timeout; never returns `TimedOut`
pub fn run_with_retry(
    executor: &dyn CommandExecutor,
    command: &CommandSpec,
    timeout: Duration,
    attempts: u32,
) -> Result<CommandOutcome> {
    for attempt in 1..=attempts {
        match executor.execute(command, timeout)? {
            CommandOutcome::TimedOut => {
                warn!(
                    command = %command.display(),
                    attempt,
                    attempts,
                    "Command timed out"
                );
            }
            outcome => return Ok(outcome),
        }
    }

    Err(MigrateError::CommandTimedOut {
        command: command.display(),
        attempts,
    }
    .into())
}

/// Turn a non-success outcome into the fatal command error
pub fn expect_success(command: &CommandSpec, outcome: CommandOutcome) -> Result<Vec<u8>> {
    match outcome {
        CommandOutcome::Success(stdout) => Ok(stdout),
        CommandOutcome::Failed { status, stderr, .. } => Err(MigrateError::CommandFailed {
            command: command.display(),
            status,
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        }
        .into()),
        CommandOutcome::TimedOut => Err(MigrateError::CommandTimedOut {
            command: command.display(),
            attempts: 1,
        }
        .into()),
    }
}

use anyhow::Result;
use std::path::Path;
use tracing::{debug, warn};

use crate::charset;
use crate::config::Config;
use crate::error::MigrateError;
use crate::executor::{self, CommandExecutor, CommandOutcome, CommandSpec};
use crate::fs_utils;

/// Result of creating a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Ready,
    /// The client reported its known "general failure" but populated the sandbox
    Broken { status: i32 },
}

/// `si` invocations against one source project
pub struct SourceClient<'a> {
    executor: &'a dyn CommandExecutor,
    config: &'a Config,
    project: String,
}

impl<'a> SourceClient<'a> {
    pub fn new(executor: &'a dyn CommandExecutor, config: &'a Config, project: impl Into<String>) -> Self {
        Self {
            executor,
            config,
            project: project.into(),
        }
    }

    pub fn executor(&self) -> &'a dyn CommandExecutor {
        self.executor
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    /// File name of the project's metadata file, e.g. `project.pj`
    pub fn project_file_name(&self) -> String {
        Path::new(&self.project)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("project.{}", self.config.metadata_extension))
    }

    fn si(&self, subcommand: &str) -> CommandSpec {
        CommandSpec::new(&self.config.si_command).arg(subcommand)
    }

    fn run(&self, command: &CommandSpec) -> Result<Vec<u8>> {
        let outcome = executor::run_with_retry(
            self.executor,
            command,
            self.config.command_timeout(),
            self.config.command_attempts,
        )?;
        executor::expect_success(command, outcome)
    }

    /// History listing of the mainline, or of one devpath, without its header line
    pub fn project_history(&self, devpath: Option<&str>) -> Result<String> {
        let filter = match devpath {
            Some(name) => format!("--rfilter=devpath:{}", name),
            None => "--rfilter=devpath::current".to_string(),
        };
        let command = self
            .si("viewprojecthistory")
            .arg(filter)
            .arg(format!("--project={}", self.project));

        let stdout = self.run(&command)?;
        let text = charset::decode(&stdout, &self.config.history_encoding);
        Ok(text.split_once('\n').map(|(_, rest)| rest).unwrap_or_default().to_string())
    }

    /// Raw devpath listing of the project
    pub fn devpath_listing(&self) -> Result<String> {
        let command = self
            .si("projectinfo")
            .arg("--devpaths")
            .arg("--noacl")
            .arg("--noattributes")
            .arg("--noshowCheckpointDescription")
            .arg("--noassociatedIssues")
            .arg(format!("--project={}", self.project));

        let stdout = self.run(&command)?;
        Ok(charset::decode(&stdout, &self.config.history_encoding))
    }

    /// Populate `dir` with a sandbox of `revision`.
    ///
    /// Timeouts are retried after clearing the partial sandbox. The configured
    /// benign exit status yields `Broken`; any other failure is fatal.
    pub fn create_sandbox(&self, revision: &str, dir: &Path) -> Result<SandboxStatus> {
        let parent = dir.parent().unwrap_or(Path::new("."));
        fs_utils::ensure_dir(parent)?;

        let command = self
            .si("createsandbox")
            .arg("--populate")
            .arg("--recurse")
            .arg("--yes")
            .arg(format!("--project={}", self.project))
            .arg(format!("--projectRevision={}", revision))
            .arg(dir.to_string_lossy())
            .current_dir(parent);

        let attempts = self.config.command_attempts;
        for attempt in 1..=attempts {
            fs_utils::remove_dir_if_exists(dir)?;

            match self.executor.execute(&command, self.config.command_timeout())? {
                CommandOutcome::Success(_) => return Ok(SandboxStatus::Ready),
                CommandOutcome::Failed { status, .. } if Some(status) == self.config.benign_exit_code => {
                    warn!(revision, status, "Sandbox creation reported a general failure, continuing");
                    return Ok(SandboxStatus::Broken { status });
                }
                CommandOutcome::TimedOut => {
                    warn!(revision, attempt, attempts, "Sandbox creation timed out");
                }
                failed => {
                    executor::expect_success(&command, failed)?;
                }
            }
        }

        Err(MigrateError::CommandTimedOut {
            command: command.display(),
            attempts,
        }
        .into())
    }

    /// Drop the sandbox in `dir` and delete its files
    pub fn drop_sandbox(&self, dir: &Path) -> Result<()> {
        let sandbox_file = dir.join(self.project_file_name());
        let parent = dir.parent().unwrap_or(Path::new("."));

        let command = self
            .si("dropsandbox")
            .arg("--yes")
            .arg("-f")
            .arg("--delete=all")
            .arg(sandbox_file.to_string_lossy())
            .current_dir(parent);

        self.run(&command)?;
        fs_utils::remove_dir_if_exists(dir)?;
        debug!(dir = %dir.display(), "Dropped sandbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::{HistoryFormat, parse_history};
    use crate::stream::encode_message;
    use crate::testing::{FakeExecutor, FakeServer, history_line};
    use tempfile::TempDir;

    fn failure(status: i32) -> CommandOutcome {
        CommandOutcome::Failed {
            status,
            stdout: Vec::new(),
            stderr: b"general failure".to_vec(),
        }
    }

    #[test]
    fn test_project_history_strips_header() {
        let executor = FakeServer::new()
            .mainline(&[history_line("1.1", "Alice", "", "first")])
            .into_executor();
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "/srv/proj/project.pj");

        let history = source.project_history(None).unwrap();
        assert!(history.starts_with("1.1\tAlice"));

        let call = &executor.calls()[0];
        assert_eq!(call.option("rfilter"), Some("devpath::current"));
        assert_eq!(call.option("project"), Some("/srv/proj/project.pj"));
    }

    #[test]
    fn test_project_history_decodes_console_codepage() {
        let executor = FakeExecutor::new(|_| {
            CommandOutcome::Success(b"header\n1.1\tJ\x81rgen\t01.01.2020 10:00:00\t\t\t\tGr\x94\xe1e\n".to_vec())
        });
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "project.pj");
        let format = HistoryFormat {
            date_format: config.history_date_format.clone(),
            offset: config.offset().unwrap(),
        };

        let checkpoints = parse_history(&source.project_history(None).unwrap(), &format, false);
        assert_eq!(checkpoints[0].author, "Juergen");
        assert_eq!(checkpoints[0].description, "Größe");

        let message = encode_message(&checkpoints[0].message(), &config.message_encoding);
        assert!(message.windows(5).any(|w| w == b"Gr\xf6\xdfe"));
    }

    #[test]
    fn test_devpath_listing_decodes_console_codepage() {
        let executor = FakeExecutor::new(|_| CommandOutcome::Success(b"Development Paths:\n    M\x81ller (1.3)\n".to_vec()));
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "project.pj");

        assert!(source.devpath_listing().unwrap().contains("Müller (1.3)"));
    }

    #[test]
    fn test_devpath_history_uses_devpath_filter() {
        let executor = FakeServer::new()
            .devpath("Feature X", "1.2", &[history_line("1.2.1.1", "Bob", "", "d")])
            .into_executor();
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "project.pj");

        let history = source.project_history(Some("Feature X")).unwrap();
        assert!(history.starts_with("1.2.1.1"));
        assert_eq!(executor.calls()[0].option("rfilter"), Some("devpath:Feature X"));
    }

    #[test]
    fn test_project_file_name() {
        let executor = FakeExecutor::new(|_| CommandOutcome::Success(Vec::new()));
        let config = Config::default();
        assert_eq!(
            SourceClient::new(&executor, &config, "/srv/a/b/project.pj").project_file_name(),
            "project.pj"
        );
    }

    #[test]
    fn test_create_sandbox_tolerates_benign_status() {
        let temp_dir = TempDir::new().unwrap();
        let executor = FakeServer::new()
            .files("1.2", &[("a.c", "int a;")])
            .failing("1.2", 128)
            .into_executor();
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "project.pj");

        let dir = temp_dir.path().join("sandbox");
        let status = source.create_sandbox("1.2", &dir).unwrap();
        assert_eq!(status, SandboxStatus::Broken { status: 128 });
        assert!(dir.join("a.c").exists());
    }

    #[test]
    fn test_create_sandbox_other_status_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let executor = FakeExecutor::new(|_| failure(1));
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "project.pj");

        let err = source.create_sandbox("1.2", &temp_dir.path().join("sandbox")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::CommandFailed { status: 1, .. })
        ));
        assert_eq!(executor.calls().len(), 1);
    }

    #[test]
    fn test_create_sandbox_retries_timeouts_then_fails() {
        let temp_dir = TempDir::new().unwrap();
        let executor = FakeExecutor::new(|_| CommandOutcome::TimedOut);
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "project.pj");

        let err = source.create_sandbox("1.2", &temp_dir.path().join("sandbox")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::CommandTimedOut { attempts: 3, .. })
        ));
        assert_eq!(executor.calls_to("createsandbox").len(), 3);
    }

    #[test]
    fn test_create_sandbox_clears_leftovers_before_each_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sandbox");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stale.txt"), b"old").unwrap();

        let executor = FakeServer::new().files("1.1", &[("new.txt", "new")]).into_executor();
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "project.pj");

        source.create_sandbox("1.1", &dir).unwrap();
        assert!(!dir.join("stale.txt").exists());
        assert!(dir.join("new.txt").exists());
    }

    #[test]
    fn test_drop_sandbox_removes_directory() {
        let temp_dir = TempDir::new().unwrap();
        let executor = FakeServer::new().into_executor();
        let config = Config::default();
        let source = SourceClient::new(&executor, &config, "/srv/project.pj");

        let dir = temp_dir.path().join("sandbox");
        source.create_sandbox("1.1", &dir).unwrap();
        source.drop_sandbox(&dir).unwrap();

        assert!(!dir.exists());
        let drop_call = &executor.calls_to("dropsandbox")[0];
        assert!(drop_call.args.last().unwrap().ends_with("project.pj"));
        assert_eq!(drop_call.current_dir.as_deref(), Some(temp_dir.path()));
    }
}

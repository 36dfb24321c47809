use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Config;
use crate::error::MigrateError;
use crate::executor::{self, CommandExecutor, CommandSpec};
use crate::state::parse_mark_line;

/// The git repository receiving the import stream
#[derive(Debug, Clone)]
pub struct TargetRepo {
    root: PathBuf,
}

impl TargetRepo {
    /// Open an existing repository; a work tree with `.git` or a bare repository
    pub fn open(root: &Path) -> Result<Self> {
        let is_work_tree = root.join(".git").exists();
        let is_bare = root.join("HEAD").is_file() && root.join("objects").is_dir();
        if !root.is_dir() || !(is_work_tree || is_bare) {
            return Err(MigrateError::MissingTargetRepository(root.to_path_buf()).into());
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Force the work tree to the commit `sha`, detached
    pub fn checkout_detached(&self, executor: &dyn CommandExecutor, config: &Config, sha: &str) -> Result<()> {
        let command = CommandSpec::new(&config.git_command)
            .arg("checkout")
            .arg("--force")
            .arg("--detach")
            .arg(sha)
            .current_dir(&self.root);

        let outcome = executor::run_with_retry(
            executor,
            &command,
            config.command_timeout(),
            config.command_attempts,
        )?;
        executor::expect_success(&command, outcome)?;
        debug!(sha, "Checked out target commit");
        Ok(())
    }
}

/// Marks file written by `git fast-import --export-marks`: `:<mark> <sha>`
pub fn read_marks_file(path: &Path) -> Result<BTreeMap<u32, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read marks file: {}", path.display()))?;

    let mut marks = BTreeMap::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (mark, sha) = parse_mark_line(line)
            .with_context(|| format!("Invalid marks file: {}", path.display()))?;
        marks.insert(mark, sha);
    }
    Ok(marks)
}

/// Highest mark the target repository already holds
pub fn last_mark(marks: &BTreeMap<u32, String>) -> Option<u32> {
    marks.keys().next_back().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutcome;
    use crate::testing::FakeExecutor;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_repository() {
        let temp_dir = TempDir::new().unwrap();
        let err = TargetRepo::open(temp_dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::MissingTargetRepository(_))
        ));

        let missing = temp_dir.path().join("nope");
        assert!(TargetRepo::open(&missing).is_err());
    }

    #[test]
    fn test_open_work_tree_and_bare() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("work");
        fs::create_dir_all(work.join(".git")).unwrap();
        assert!(TargetRepo::open(&work).is_ok());

        let bare = temp_dir.path().join("bare.git");
        fs::create_dir_all(bare.join("objects")).unwrap();
        fs::write(bare.join("HEAD"), "ref: refs/heads/master\n").unwrap();
        assert!(TargetRepo::open(&bare).is_ok());
    }

    #[test]
    fn test_read_marks_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("marks");
        fs::write(&path, ":2 bbbb\n:1 aaaa\n\n:10 cccc\n").unwrap();

        let marks = read_marks_file(&path).unwrap();
        assert_eq!(marks.get(&1).map(String::as_str), Some("aaaa"));
        assert_eq!(marks.len(), 3);
        assert_eq!(last_mark(&marks), Some(10));
        assert_eq!(last_mark(&BTreeMap::new()), None);
    }

    #[test]
    fn test_read_marks_file_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("marks");
        fs::write(&path, "not a mark\n").unwrap();
        assert!(read_marks_file(&path).is_err());
    }

    #[test]
    fn test_checkout_detached_runs_in_repository() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(".git")).unwrap();
        let repo = TargetRepo::open(temp_dir.path()).unwrap();

        let executor = FakeExecutor::new(|_| CommandOutcome::Success(Vec::new()));
        repo.checkout_detached(&executor, &Config::default(), "abc123").unwrap();

        let call = &executor.calls()[0];
        assert_eq!(call.program, "git");
        assert_eq!(call.args, vec!["checkout", "--force", "--detach", "abc123"]);
        assert_eq!(call.current_dir.as_deref(), Some(temp_dir.path()));
    }

    #[test]
    fn test_checkout_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(".git")).unwrap();
        let repo = TargetRepo::open(temp_dir.path()).unwrap();

        let executor = FakeExecutor::new(|_| CommandOutcome::Failed {
            status: 128,
            stdout: Vec::new(),
            stderr: b"fatal: reference is not a tree".to_vec(),
        });
        let err = repo.checkout_detached(&executor, &Config::default(), "dead").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::CommandFailed { status: 128, .. })
        ));
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes, one per precondition plus a shared fatal code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidArgument,
    MissingTargetRepository,
    CompareSetup,
    ConsistencyCheck,
    Fatal,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InvalidArgument => 1,
            ExitCode::MissingTargetRepository => 2,
            ExitCode::CompareSetup => 3,
            ExitCode::ConsistencyCheck => 4,
            ExitCode::Fatal => 10,
        }
    }
}

/// Errors that stop a migration run
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Target repository not found: {}", .0.display())]
    MissingTargetRepository(PathBuf),

    #[error("Compare mode requires {0}")]
    CompareSetup(String),

    #[error("Checkpoint count mismatch: project history holds {planned} exportable checkpoints, target records {recorded} marks")]
    CountMismatch { planned: usize, recorded: usize },

    #[error(
        "Mark mapping holds {} checkpoint(s) missing from the project history (list lost devpaths in missing_devpaths.txt): {}",
        .0.len(),
        .0.join(", ")
    )]
    UnplannedCheckpoints(Vec<String>),

    #[error("Command `{command}` failed with exit status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {attempts} attempt(s)")]
    CommandTimedOut { command: String, attempts: u32 },

    #[error("Checkpoint {0} was already exported")]
    DuplicateExport(String),

    #[error("Checkpoint {0} was already compared")]
    DuplicateCompare(String),

    #[error("Mark :{mark} is recorded for revision {recorded} but recomputes to {computed}")]
    MarkMismatch {
        mark: u32,
        recorded: String,
        computed: String,
    },

    #[error("Mark mapping is not dense: expected :{expected}, found :{found}")]
    MarkSequence { expected: u32, found: u32 },

    #[error("Devpath '{devpath}' branches from {ancestor}, which has no recorded mark")]
    MissingAncestor { devpath: String, ancestor: String },

    #[error("Mark :{0} has no commit in the marks file")]
    UnknownMark(u32),

    #[error(
        "Checkpoint {revision} differs from commit :{mark} in {} path(s):\n{}",
        .differences.len(),
        .differences.join("\n")
    )]
    CompareMismatch {
        revision: String,
        mark: u32,
        differences: Vec<String>,
    },
}

impl MigrateError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            MigrateError::InvalidArgument(_) => ExitCode::InvalidArgument,
            MigrateError::MissingTargetRepository(_) => ExitCode::MissingTargetRepository,
            MigrateError::CompareSetup(_) => ExitCode::CompareSetup,
            MigrateError::CountMismatch { .. } | MigrateError::UnplannedCheckpoints(_) => ExitCode::ConsistencyCheck,
            _ => ExitCode::Fatal,
        }
    }
}

/// Map any error chain to the process exit code
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<MigrateError>())
        .map(|e| e.exit_code())
        .unwrap_or(ExitCode::Fatal)
        .code()
}

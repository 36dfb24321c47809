use clap::Parser;
use std::path::PathBuf;

use crate::migrate::Mode;

#[derive(Parser, Debug)]
#[command(name = "mks2git")]
#[command(author, version, about = "Replay MKS checkpoints into a git fast-import stream", long_about = None)]
pub struct Cli {
    /// Export checkpoints or compare exported commits
    #[arg(value_enum, value_name = "MODE")]
    pub mode: Mode,

    /// Source project, e.g. /path/on/server/project.pj
    #[arg(value_name = "PROJECT")]
    pub project: String,

    /// Target git repository
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    /// Marks file written by `git fast-import --export-marks`
    #[arg(value_name = "MARK_FILE")]
    pub mark_file: Option<PathBuf>,

    /// Maximum number of checkpoints to process in this run (0 = no limit)
    #[arg(value_name = "LIMIT")]
    pub limit: Option<u32>,

    /// Directory for compare checkouts (required in compare mode)
    #[arg(value_name = "COMPARE_SANDBOX")]
    pub compare_sandbox: Option<PathBuf>,

    /// Show debug output on stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Force enable progress bar
    #[arg(long = "progress")]
    pub progress: bool,

    /// Force disable progress bar
    #[arg(long = "no-progress", conflicts_with = "progress")]
    pub no_progress: bool,

    /// Configuration file (default: .mks2git.toml in the target repository)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Batch limit with `0` meaning unlimited
    pub fn effective_limit(&self) -> Option<u32> {
        self.limit.filter(|limit| *limit > 0)
    }
}

mod charset;
mod cli;
mod compare;
mod config;
mod devpath;
mod error;
mod executor;
mod export;
mod file_hash;
mod fs_utils;
mod logging;
mod marks;
mod migrate;
mod progress;
mod revision;
mod sandbox;
mod session;
mod source;
mod state;
mod stream;
mod target;

#[cfg(test)]
mod testing;

// Re-export public APIs
pub use cli::Cli;
pub use compare::{CompareStats, Difference, compare_trees};
pub use config::{CONFIG_FILENAME, Config};
pub use error::{ExitCode, MigrateError, exit_code_for};
pub use executor::{CommandExecutor, CommandOutcome, CommandSpec, ProcessExecutor};
pub use export::ExportStats;
pub use logging::init_logging;
pub use marks::MarkAllocator;
pub use migrate::{Mode, RunOptions, RunSummary, run};
pub use progress::{ProgressConfig, Timer};
pub use revision::{Checkpoint, parse_history};

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::charset;

pub const CONFIG_FILENAME: &str = ".mks2git.toml";
pub const DEFAULT_STATE_DIR: &str = ".mks2git";
pub const SANDBOX_DIR: &str = "sandbox";

/// Configuration loaded from .mks2git.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source VCS client executable
    #[serde(default = "default_si_command")]
    pub si_command: String,

    /// git executable used for detached checkouts in compare mode
    #[serde(default = "default_git_command")]
    pub git_command: String,

    /// Timeout for one external command invocation
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Attempts per external command before a timeout is fatal
    #[serde(default = "default_command_attempts")]
    pub command_attempts: u32,

    /// Exit status of the source client's "general failure" that still leaves a usable sandbox
    #[serde(default = "default_benign_exit_code")]
    pub benign_exit_code: Option<i32>,

    /// Fixed UTC offset of the source server's history timestamps
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset: String,

    /// Charset declared for commit messages
    #[serde(default = "default_message_encoding")]
    pub message_encoding: String,

    /// Charset of the source client's console output
    #[serde(default = "default_history_encoding")]
    pub history_encoding: String,

    /// chrono format of the history listing's date column
    #[serde(default = "default_history_date_format")]
    pub history_date_format: String,

    /// Extension of the project's own metadata files
    #[serde(default = "default_metadata_extension")]
    pub metadata_extension: String,

    /// State directory, relative to the target repository
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Extra glob patterns excluded from export and comparison
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Show progress bars (default: auto-detect TTY)
    #[serde(default)]
    pub progress: Option<bool>,
}

fn default_si_command() -> String { "si".to_string() }
fn default_git_command() -> String { "git".to_string() }
fn default_command_timeout_secs() -> u64 { 300 }
fn default_command_attempts() -> u32 { 3 }
fn default_benign_exit_code() -> Option<i32> { Some(128) }
fn default_timezone_offset() -> String { "+0100".to_string() }
fn default_message_encoding() -> String { "iso-8859-15".to_string() }
fn default_history_encoding() -> String { "cp850".to_string() }
fn default_history_date_format() -> String { "%d.%m.%Y %H:%M:%S".to_string() }
fn default_metadata_extension() -> String { "pj".to_string() }
fn default_state_dir() -> String { DEFAULT_STATE_DIR.to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            si_command: default_si_command(),
            git_command: default_git_command(),
            command_timeout_secs: default_command_timeout_secs(),
            command_attempts: default_command_attempts(),
            benign_exit_code: default_benign_exit_code(),
            timezone_offset: default_timezone_offset(),
            message_encoding: default_message_encoding(),
            history_encoding: default_history_encoding(),
            history_date_format: default_history_date_format(),
            metadata_extension: default_metadata_extension(),
            state_dir: default_state_dir(),
            exclude: Vec::new(),
            progress: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Configuration file not found: {}", config_path.display());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load the explicit config file, or `.mks2git.toml` in the target if present, or defaults
    pub fn resolve(explicit: Option<&Path>, target: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidate = target.join(CONFIG_FILENAME);
        if candidate.exists() {
            Self::load(&candidate)
        }
        else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.command_attempts == 0 {
            bail!("Configuration error: 'command_attempts' must be at least 1");
        }

        if self.command_timeout_secs == 0 {
            bail!("Configuration error: 'command_timeout_secs' must be greater than 0");
        }

        if self.state_dir.trim().is_empty() {
            bail!("Configuration error: 'state_dir' is empty");
        }
        if self.state_dir.contains("..") {
            bail!(
                "Configuration error: state_dir '{}' contains '..', which is not allowed",
                self.state_dir
            );
        }

        self.offset()?;

        if !charset::is_supported(&self.history_encoding) {
            bail!(
                "Configuration error: history_encoding '{}' is not one of {}",
                self.history_encoding,
                charset::SUPPORTED.join(", ")
            );
        }

        for pattern in &self.exclude {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Configuration error: invalid exclude pattern '{}'", pattern))?;
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Parse `timezone_offset` (`+0100`, `-0530`)
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone_offset)
    }

    /// Get the state directory path inside the target repository
    pub fn state_path(&self, target: &Path) -> PathBuf {
        target.join(&self.state_dir)
    }

    /// Get the export sandbox directory path
    pub fn sandbox_path(&self, target: &Path) -> PathBuf {
        self.state_path(target).join(SANDBOX_DIR)
    }
}

fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 5
        && (bytes[0] == b'+' || bytes[0] == b'-')
        && bytes[1..].iter().all(u8::is_ascii_digit);
    if !well_formed {
        bail!("Configuration error: timezone_offset '{}' is not of the form +HHMM", raw);
    }

    let hours: i32 = raw[1..3].parse()?;
    let minutes: i32 = raw[3..5].parse()?;
    if minutes >= 60 {
        bail!("Configuration error: timezone_offset '{}' has invalid minutes", raw);
    }

    let seconds = hours * 3600 + minutes * 60;
    let offset = if bytes[0] == b'-' {
        FixedOffset::west_opt(seconds)
    }
    else {
        FixedOffset::east_opt(seconds)
    };

    offset.with_context(|| format!("Configuration error: timezone_offset '{}' out of range", raw))
}

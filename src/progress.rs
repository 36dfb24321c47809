use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// Whether progress bars are drawn on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressConfig {
    /// Draw when stderr is a terminal
    Auto,
    ForceEnable,
    ForceDisable,
}

impl ProgressConfig {
    /// CLI flags win over the config file, which wins over auto-detection
    pub fn from_flags(progress_flag: bool, no_progress_flag: bool, config_value: Option<bool>) -> Self {
        if progress_flag {
            ProgressConfig::ForceEnable
        }
        else if no_progress_flag {
            ProgressConfig::ForceDisable
        }
        else {
            match config_value {
                Some(true) => ProgressConfig::ForceEnable,
                Some(false) => ProgressConfig::ForceDisable,
                None => ProgressConfig::Auto,
            }
        }
    }

    pub fn should_show_progress(&self) -> bool {
        match self {
            ProgressConfig::Auto => atty::is(atty::Stream::Stderr),
            ProgressConfig::ForceEnable => true,
            ProgressConfig::ForceDisable => false,
        }
    }
}

/// Wall clock time of a run
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time as `12.34s`
    pub fn elapsed_string(&self) -> String {
        format!("{:.2}s", self.elapsed().as_secs_f64())
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bar over all planned checkpoints, showing the one being processed
pub struct CheckpointProgress {
    bar: Option<ProgressBar>,
}

impl CheckpointProgress {
    pub fn new(total: u64, config: ProgressConfig) -> Self {
        let bar = config.should_show_progress().then(|| {
            let pb = ProgressBar::new(total);
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} checkpoints {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        });

        Self { bar }
    }

    /// Show `revision` as the current checkpoint
    pub fn start(&self, revision: &str) {
        if let Some(ref bar) = self.bar {
            bar.set_message(revision.to_string());
        }
    }

    /// Count one checkpoint as done
    pub fn advance(&self) {
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bar.is_some()
    }
}

/// Spinner while the project history is queried
pub struct Spinner {
    bar: Option<ProgressBar>,
}

impl Spinner {
    pub fn new(config: ProgressConfig, message: &str) -> Self {
        let bar = config.should_show_progress().then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        Self { bar }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bar.is_some()
    }
}

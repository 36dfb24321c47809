use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::devpath::{Devpath, MissingDevpath};
use crate::fs_utils;

pub const IGNORE_CHECKPOINTS_FILE: &str = "ignore_checkpoints.txt";
pub const IGNORE_DEVPATHS_FILE: &str = "ignore_devpaths.txt";
pub const MISSING_DEVPATHS_FILE: &str = "missing_devpaths.txt";
pub const EXPORTED_FILE: &str = "exported.txt";
pub const COMPARED_FILE: &str = "compared.txt";
pub const BROKEN_FILE: &str = "broken.txt";
pub const MARKS_FILE: &str = "marks.txt";
pub const COMPARED_COUNT_FILE: &str = "compared_count.txt";
pub const REMAINING_COMPARE_COUNT_FILE: &str = "remaining_compare_count.txt";
pub const REMAINING_EXPORT_COUNT_FILE: &str = "remaining_export_count.txt";
pub const ALL_CHECKPOINTS_FILE: &str = "all_checkpoints.txt";
pub const ALL_CHECKPOINTS_COUNT_FILE: &str = "all_checkpoints_count.txt";
pub const TO_PROCESS_FILE: &str = "to_process.txt";
pub const TO_PROCESS_COUNT_FILE: &str = "to_process_count.txt";

/// Everything a run needs to resume where the previous one stopped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub ignore_checkpoints: BTreeSet<String>,
    pub ignore_devpaths: Vec<Devpath>,
    pub missing_devpaths: Vec<MissingDevpath>,
    pub exported: Vec<String>,
    pub compared: Vec<String>,
    pub broken: Vec<String>,
    /// `(mark, revision)` in mark order
    pub marks: Vec<(u32, String)>,
    pub compared_count: u32,
}

/// Completion counters written at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub all_checkpoints: Vec<String>,
    pub to_process: Vec<String>,
    pub remaining_export: usize,
    pub remaining_compare: usize,
}

/// Flat-file store under the target repository's state directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read every state file; missing files are empty
    pub fn load(&self) -> Result<State> {
        let ignore_checkpoints = read_lines(&self.path(IGNORE_CHECKPOINTS_FILE))?
            .into_iter()
            .collect();

        let ignore_devpaths = read_lines(&self.path(IGNORE_DEVPATHS_FILE))?
            .iter()
            .map(|line| parse_devpath_line(line))
            .collect::<Result<Vec<_>>>()?;

        let missing_devpaths = read_lines(&self.path(MISSING_DEVPATHS_FILE))?
            .iter()
            .map(|line| parse_missing_devpath_line(line))
            .collect::<Result<Vec<_>>>()?;

        let marks = read_lines(&self.path(MARKS_FILE))?
            .iter()
            .map(|line| parse_mark_line(line))
            .collect::<Result<Vec<_>>>()?;

        let state = State {
            ignore_checkpoints,
            ignore_devpaths,
            missing_devpaths,
            exported: read_lines(&self.path(EXPORTED_FILE))?,
            compared: read_lines(&self.path(COMPARED_FILE))?,
            broken: read_lines(&self.path(BROKEN_FILE))?,
            marks,
            compared_count: read_count(&self.path(COMPARED_COUNT_FILE))?.unwrap_or(0),
        };

        debug!(
            dir = %self.dir.display(),
            marks = state.marks.len(),
            exported = state.exported.len(),
            compared = state.compared.len(),
            "Loaded state"
        );
        Ok(state)
    }

    /// Rewrite every state file as a whole
    pub fn save(&self, state: &State) -> Result<()> {
        fs_utils::ensure_dir(&self.dir)?;

        write_lines(&self.path(IGNORE_CHECKPOINTS_FILE), state.ignore_checkpoints.iter())?;
        write_lines(
            &self.path(IGNORE_DEVPATHS_FILE),
            state
                .ignore_devpaths
                .iter()
                .map(|d| format!("{};{}", d.name, d.start_revision)),
        )?;
        write_lines(
            &self.path(MISSING_DEVPATHS_FILE),
            state.missing_devpaths.iter().map(|m| {
                format!(
                    "{};{};{}",
                    m.devpath.name,
                    m.devpath.start_revision,
                    escape_history(&m.history)
                )
            }),
        )?;
        write_lines(&self.path(EXPORTED_FILE), state.exported.iter())?;
        write_lines(&self.path(COMPARED_FILE), state.compared.iter())?;
        write_lines(&self.path(BROKEN_FILE), state.broken.iter())?;
        write_lines(
            &self.path(MARKS_FILE),
            state.marks.iter().map(|(mark, revision)| format!(":{} {}", mark, revision)),
        )?;
        write_count(&self.path(COMPARED_COUNT_FILE), state.compared_count as usize)?;

        debug!(dir = %self.dir.display(), "Saved state");
        Ok(())
    }

    pub fn save_counters(&self, counters: &Counters) -> Result<()> {
        fs_utils::ensure_dir(&self.dir)?;

        write_lines(&self.path(ALL_CHECKPOINTS_FILE), counters.all_checkpoints.iter())?;
        write_count(&self.path(ALL_CHECKPOINTS_COUNT_FILE), counters.all_checkpoints.len())?;
        write_lines(&self.path(TO_PROCESS_FILE), counters.to_process.iter())?;
        write_count(&self.path(TO_PROCESS_COUNT_FILE), counters.to_process.len())?;
        write_count(&self.path(REMAINING_EXPORT_COUNT_FILE), counters.remaining_export)?;
        write_count(&self.path(REMAINING_COMPARE_COUNT_FILE), counters.remaining_compare)?;
        Ok(())
    }
}

/// Non-empty, right-trimmed lines of a file; a missing file has none
fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

fn write_lines<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut content = String::new();
    for line in lines {
        content.push_str(line.as_ref());
        content.push('\n');
    }
    fs_utils::atomic_write(path, content.as_bytes())
        .with_context(|| format!("Failed to write state file: {}", path.display()))
}

fn read_count(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let count = trimmed
        .parse()
        .with_context(|| format!("Invalid count '{}' in {}", trimmed, path.display()))?;
    Ok(Some(count))
}

fn write_count(path: &Path, count: usize) -> Result<()> {
    fs_utils::atomic_write(path, format!("{}\n", count).as_bytes())
        .with_context(|| format!("Failed to write state file: {}", path.display()))
}

/// Parse `:<mark> <revision>`
pub fn parse_mark_line(line: &str) -> Result<(u32, String)> {
    let Some(rest) = line.strip_prefix(':') else {
        bail!("Invalid mark line '{}': missing ':'", line);
    };
    let Some((mark, value)) = rest.split_once(' ') else {
        bail!("Invalid mark line '{}': missing value", line);
    };
    let mark = mark
        .parse()
        .with_context(|| format!("Invalid mark line '{}': bad mark number", line))?;
    let value = value.trim();
    if value.is_empty() {
        bail!("Invalid mark line '{}': empty value", line);
    }
    Ok((mark, value.to_string()))
}

fn parse_devpath_line(line: &str) -> Result<Devpath> {
    match line.split_once(';') {
        Some((name, start)) if !name.is_empty() && !start.is_empty() => {
            Ok(Devpath::new(name, start.trim()))
        }
        _ => bail!("Invalid devpath line '{}': expected name;start_revision", line),
    }
}

fn parse_missing_devpath_line(line: &str) -> Result<MissingDevpath> {
    let mut parts = line.splitn(3, ';');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(start), Some(history)) if !name.is_empty() && !start.is_empty() => {
            Ok(MissingDevpath {
                devpath: Devpath::new(name, start),
                history: unescape_history(history),
            })
        }
        _ => bail!(
            "Invalid missing devpath line '{}': expected name;start_revision;history",
            line
        ),
    }
}

/// Encode history text on a single line: `\\`, `\n`, `\t`, `\r`
pub fn escape_history(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn unescape_history(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

//! Checkpoint replay into the import stream.
//!
//! Every checkpoint of a branch goes through [`decide`], which applies the
//! resume, ignore, batch-limit and branch-point rules against the session.
//! Only an `Export` decision touches the source server.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::MigrateError;
use crate::progress::CheckpointProgress;
use crate::revision::Checkpoint;
use crate::sandbox::{Exclusions, Sandbox};
use crate::session::Session;
use crate::source::SourceClient;
use crate::stream::{self, CommitHeader, ImportStream};

pub const MASTER_REF: &str = "refs/heads/master";

/// Per-branch replay position
#[derive(Debug, Clone)]
pub struct DevpathCursor {
    branch_ref: String,
    devpath: Option<String>,
    ancestor: Option<String>,
    ancestor_consumed: bool,
    previous_mark: Option<u32>,
    needs_from: bool,
}

impl DevpathCursor {
    pub fn mainline() -> Self {
        Self {
            branch_ref: MASTER_REF.to_string(),
            devpath: None,
            ancestor: None,
            ancestor_consumed: false,
            previous_mark: None,
            needs_from: false,
        }
    }

    /// Cursor for a devpath branching from `ancestor`
    pub fn devpath(name: &str, branch_ref: String, ancestor: &str) -> Self {
        Self {
            branch_ref,
            devpath: Some(name.to_string()),
            ancestor: Some(ancestor.to_string()),
            ancestor_consumed: false,
            previous_mark: None,
            needs_from: false,
        }
    }

    pub fn branch_ref(&self) -> &str {
        &self.branch_ref
    }

    fn consume_ancestor(&mut self) {
        self.ancestor_consumed = true;
    }
}

/// What happens to one checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// On the ignore list
    Ignored,
    /// Already in the target; visited only to reproduce mark numbering
    Replay { mark: u32, reconstructed: bool },
    /// Beyond this run's batch limit
    Deferred,
    Export { mark: u32, from: Option<u32> },
}

/// Decide the fate of `revision` and advance the cursor accordingly
pub fn decide(session: &mut Session, cursor: &mut DevpathCursor, revision: &str) -> Result<Decision, MigrateError> {
    if session.is_ignored(revision) {
        cursor.needs_from = true;
        return Ok(Decision::Ignored);
    }

    session.visit(revision)?;

    let resume = session.resume_mark();
    let count = session.marks().current_mark_count();

    match session.marks().mark_of(revision) {
        Some(mark) if mark <= resume => {
            let reconstructed = session.record_replay(revision);
            cursor.consume_ancestor();
            cursor.previous_mark = Some(mark);
            cursor.needs_from = true;
            return Ok(Decision::Replay { mark, reconstructed });
        }
        None if count < resume => {
            let mark = session.marks_mut().mark_for(revision);
            let reconstructed = session.record_replay(revision);
            cursor.consume_ancestor();
            cursor.previous_mark = Some(mark);
            cursor.needs_from = true;
            return Ok(Decision::Replay { mark, reconstructed });
        }
        _ => {}
    }

    if session.is_exported(revision) {
        return Err(MigrateError::DuplicateExport(revision.to_string()));
    }

    let candidate = session.marks().mark_of(revision).unwrap_or(count + 1);
    if let Some(limit) = session.limit() {
        if candidate > resume.saturating_add(limit) {
            return Ok(Decision::Deferred);
        }
    }

    let from = match cursor.ancestor.as_deref() {
        Some(ancestor) if !cursor.ancestor_consumed => {
            let mark = session.marks().mark_of(ancestor).ok_or_else(|| MigrateError::MissingAncestor {
                devpath: cursor.devpath.clone().unwrap_or_default(),
                ancestor: ancestor.to_string(),
            })?;
            Some(mark)
        }
        _ if cursor.needs_from => cursor.previous_mark,
        _ => None,
    };

    let mark = session.marks_mut().mark_for(revision);
    cursor.consume_ancestor();
    cursor.previous_mark = Some(mark);
    cursor.needs_from = false;

    Ok(Decision::Export { mark, from })
}

/// Per-run export counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportStats {
    pub exported: usize,
    pub replayed: usize,
    pub reconstructed: usize,
    pub ignored: usize,
    pub deferred: usize,
    pub broken: usize,
}

pub struct ExportEngine<'a, W: Write> {
    source: &'a SourceClient<'a>,
    exclusions: &'a Exclusions,
    stream: ImportStream<W>,
    sandbox_dir: PathBuf,
    offset: String,
    encoding: String,
    stats: ExportStats,
}

impl<'a, W: Write> ExportEngine<'a, W> {
    pub fn new(
        source: &'a SourceClient<'a>,
        exclusions: &'a Exclusions,
        stream: ImportStream<W>,
        sandbox_dir: PathBuf,
        config: &Config,
    ) -> Self {
        Self {
            source,
            exclusions,
            stream,
            sandbox_dir,
            offset: config.timezone_offset.clone(),
            encoding: config.message_encoding.clone(),
            stats: ExportStats::default(),
        }
    }

    pub fn stats(&self) -> ExportStats {
        self.stats
    }

    pub fn into_stream(self) -> ImportStream<W> {
        self.stream
    }

    /// Walk one branch's checkpoints, oldest first
    pub fn run_branch(
        &mut self,
        session: &mut Session,
        cursor: &mut DevpathCursor,
        checkpoints: &[Checkpoint],
        progress: &CheckpointProgress,
    ) -> Result<()> {
        for checkpoint in checkpoints {
            progress.start(&checkpoint.number);

            match decide(session, cursor, &checkpoint.number)? {
                Decision::Ignored => {
                    debug!(revision = %checkpoint.number, "Ignored checkpoint");
                    self.stats.ignored += 1;
                }
                Decision::Replay { mark, reconstructed } => {
                    debug!(revision = %checkpoint.number, mark, "Already exported");
                    self.stats.replayed += 1;
                    if reconstructed {
                        self.stats.reconstructed += 1;
                    }
                }
                Decision::Deferred => {
                    self.stats.deferred += 1;
                }
                Decision::Export { mark, from } => {
                    let branch_ref = cursor.branch_ref().to_string();
                    self.export(session, &branch_ref, checkpoint, mark, from)?;
                }
            }

            progress.advance();
        }
        Ok(())
    }

    fn export(
        &mut self,
        session: &mut Session,
        branch_ref: &str,
        checkpoint: &Checkpoint,
        mark: u32,
        from: Option<u32>,
    ) -> Result<()> {
        let sandbox = Sandbox::create(self.source, self.sandbox_dir.clone(), &checkpoint.number)?;
        if sandbox.is_broken() {
            session.record_broken(&checkpoint.number);
            self.stats.broken += 1;
        }

        // nothing reaches the stream until the checkout is read and dropped
        let contents = sandbox.files(self.exclusions).and_then(|files| {
            files
                .into_iter()
                .map(|file| file.read().map(|content| (file, content)))
                .collect::<Result<Vec<_>>>()
        });
        sandbox.teardown(self.source)?;
        let contents = contents?;

        let message = stream::encode_message(&checkpoint.message(), &self.encoding);
        self.stream
            .begin_commit(&CommitHeader {
                branch_ref,
                mark,
                committer: &checkpoint.author,
                timestamp: checkpoint.timestamp,
                offset: &self.offset,
                encoding: &self.encoding,
                message: &message,
                from,
            })
            .context("Failed to write commit to import stream")?;

        for (file, content) in &contents {
            self.stream
                .inline_file(file.mode, &file.relative, content)
                .with_context(|| format!("Failed to write {} to import stream", file.relative))?;
        }

        self.stream
            .tag(&checkpoint.tag_name(), mark)
            .context("Failed to write tag to import stream")?;
        self.stream.flush().context("Failed to flush import stream")?;

        session.record_export(&checkpoint.number)?;
        self.stats.exported += 1;

        info!(
            revision = %checkpoint.number,
            mark,
            from = ?from,
            files = contents.len(),
            branch = branch_ref,
            "Exported checkpoint"
        );
        Ok(())
    }
}

use anyhow::Result;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::MigrateError;
use crate::file_hash;
use crate::marks::MarkAllocator;
use crate::progress::CheckpointProgress;
use crate::revision::Checkpoint;
use crate::sandbox::{self, Exclusions, Sandbox};
use crate::session::Session;
use crate::source::SourceClient;
use crate::target::TargetRepo;

/// One path that differs between a checkout and its commit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Difference {
    OnlyInSource(String),
    OnlyInTarget(String),
    ContentDiffers(String),
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difference::OnlyInSource(path) => write!(f, "only in checkpoint: {}", path),
            Difference::OnlyInTarget(path) => write!(f, "only in commit: {}", path),
            Difference::ContentDiffers(path) => write!(f, "content differs: {}", path),
        }
    }
}

/// Compare two trees file by file.
///
/// Directories are not compared; git does not track them, so an empty or
/// metadata-only directory in the source never counts as a difference.
pub fn compare_trees(source_root: &Path, target_root: &Path, exclusions: &Exclusions) -> Result<Vec<Difference>> {
    let source: BTreeMap<String, PathBuf> = sandbox::collect_files(source_root, exclusions)?
        .into_iter()
        .map(|f| (f.relative, f.absolute))
        .collect();
    let target: BTreeMap<String, PathBuf> = sandbox::collect_files(target_root, exclusions)?
        .into_iter()
        .map(|f| (f.relative, f.absolute))
        .collect();

    let mut differences: Vec<Difference> = Vec::new();
    let mut common = Vec::new();

    let paths: BTreeSet<&String> = source.keys().chain(target.keys()).collect();
    for path in paths {
        match (source.get(path), target.get(path)) {
            (Some(a), Some(b)) => common.push((path.clone(), a, b)),
            (Some(_), None) => differences.push(Difference::OnlyInSource(path.clone())),
            (None, Some(_)) => differences.push(Difference::OnlyInTarget(path.clone())),
            (None, None) => {}
        }
    }

    let changed: Vec<Result<Option<Difference>>> = common
        .par_iter()
        .map(|(path, a, b)| {
            let same = file_hash::hash_entry(a)? == file_hash::hash_entry(b)?;
            Ok((!same).then(|| Difference::ContentDiffers(path.clone())))
        })
        .collect();

    for result in changed {
        if let Some(difference) = result? {
            differences.push(difference);
        }
    }

    differences.sort();
    Ok(differences)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompareStats {
    pub compared: usize,
    pub ignored: usize,
    pub outside_window: usize,
    pub not_exported: usize,
}

/// Re-checks exported checkpoints against the commits in the target
pub struct CompareEngine<'a> {
    source: &'a SourceClient<'a>,
    exclusions: &'a Exclusions,
    target: &'a TargetRepo,
    git_marks: &'a BTreeMap<u32, String>,
    sandbox_dir: PathBuf,
    recomputed: MarkAllocator,
    start: u32,
    stats: CompareStats,
}

impl<'a> CompareEngine<'a> {
    /// `start` is the compared-mark count at the beginning of the run
    pub fn new(
        source: &'a SourceClient<'a>,
        exclusions: &'a Exclusions,
        target: &'a TargetRepo,
        git_marks: &'a BTreeMap<u32, String>,
        sandbox_dir: PathBuf,
        start: u32,
    ) -> Self {
        Self {
            source,
            exclusions,
            target,
            git_marks,
            sandbox_dir,
            recomputed: MarkAllocator::new(),
            start,
            stats: CompareStats::default(),
        }
    }

    pub fn stats(&self) -> CompareStats {
        self.stats
    }

    fn in_window(&self, mark: u32, limit: Option<u32>) -> bool {
        mark > self.start && limit.is_none_or(|limit| mark <= self.start.saturating_add(limit))
    }

    pub fn run_branch(&mut self, session: &mut Session, checkpoints: &[Checkpoint], progress: &CheckpointProgress) -> Result<()> {
        for checkpoint in checkpoints {
            progress.start(&checkpoint.number);
            self.visit(session, checkpoint)?;
            progress.advance();
        }
        Ok(())
    }

    fn visit(&mut self, session: &mut Session, checkpoint: &Checkpoint) -> Result<()> {
        let revision = checkpoint.number.as_str();
        if session.is_ignored(revision) {
            self.stats.ignored += 1;
            return Ok(());
        }

        let mark = self.recomputed.mark_for(revision);
        if !self.in_window(mark, session.limit()) {
            self.stats.outside_window += 1;
            return Ok(());
        }

        let recorded = match session.marks().revision_of(mark) {
            Some(recorded) => recorded,
            None => {
                debug!(revision, mark, "Not exported yet, nothing to compare");
                self.stats.not_exported += 1;
                return Ok(());
            }
        };
        if recorded != revision {
            return Err(MigrateError::MarkMismatch {
                mark,
                recorded: recorded.to_string(),
                computed: revision.to_string(),
            }
            .into());
        }

        if session.is_compared(revision) {
            return Err(MigrateError::DuplicateCompare(revision.to_string()).into());
        }

        let sha = self.git_marks.get(&mark).ok_or(MigrateError::UnknownMark(mark))?;

        let sandbox = Sandbox::create(self.source, self.sandbox_dir.clone(), revision)?;
        if sandbox.is_broken() {
            warn!(revision, "Comparing a checkout the source client reported as broken");
            session.record_broken(revision);
        }

        let checked = self
            .target
            .checkout_detached(self.source.executor(), self.source.config(), sha)
            .and_then(|()| compare_trees(sandbox.dir(), self.target.root(), self.exclusions));
        sandbox.teardown(self.source)?;
        let differences = checked?;

        if !differences.is_empty() {
            return Err(MigrateError::CompareMismatch {
                revision: revision.to_string(),
                mark,
                differences: differences.iter().map(ToString::to_string).collect(),
            }
            .into());
        }

        session.record_compare(revision, mark)?;
        info!(revision, mark, sha = %sha, "Checkpoint matches commit");
        self.stats.compared += 1;
        Ok(())
    }
}

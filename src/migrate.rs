//! Top-level driver for one export or compare run.

use anyhow::Result;
use clap::ValueEnum;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::compare::{CompareEngine, CompareStats};
use crate::config::{Config, SANDBOX_DIR};
use crate::devpath::{self, BranchNames, Devpath};
use crate::error::MigrateError;
use crate::executor::CommandExecutor;
use crate::export::{DevpathCursor, ExportEngine, ExportStats, MASTER_REF};
use crate::progress::{CheckpointProgress, ProgressConfig, Spinner, Timer};
use crate::revision::{self, Checkpoint, HistoryFormat};
use crate::sandbox::Exclusions;
use crate::session::Session;
use crate::source::SourceClient;
use crate::state::{Counters, State, StateStore};
use crate::stream::ImportStream;
use crate::target::{self, TargetRepo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Write a fast-import stream for the next checkpoints
    Export,
    /// Check exported commits against fresh checkouts
    Compare,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: Mode,
    pub project: String,
    pub target: PathBuf,
    pub mark_file: Option<PathBuf>,
    pub limit: Option<u32>,
    pub compare_sandbox: Option<PathBuf>,
    pub progress: ProgressConfig,
}

/// One branch to replay: the mainline or a devpath
#[derive(Debug, Clone)]
pub struct Branch {
    pub devpath: Option<Devpath>,
    pub branch_ref: String,
    pub checkpoints: Vec<Checkpoint>,
}

impl Branch {
    fn cursor(&self) -> DevpathCursor {
        match self.devpath {
            Some(ref devpath) => {
                DevpathCursor::devpath(&devpath.name, self.branch_ref.clone(), &devpath.start_revision)
            }
            None => DevpathCursor::mainline(),
        }
    }
}

/// Every branch of the project in replay order
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub branches: Vec<Branch>,
}

impl Plan {
    /// Query the mainline and all devpaths; missing devpaths use their recorded history
    pub fn build(source: &SourceClient, state: &State, format: &HistoryFormat) -> Result<Self> {
        let mainline = revision::parse_history(&source.project_history(None)?, format, false);
        let mut branches = vec![Branch {
            devpath: None,
            branch_ref: MASTER_REF.to_string(),
            checkpoints: mainline,
        }];

        let listed = devpath::parse_devpath_listing(&source.devpath_listing()?);
        let devpaths = devpath::build_registry(listed, &state.missing_devpaths, &state.ignore_devpaths);

        let mut names = BranchNames::new();
        for entry in devpaths {
            let recorded = state
                .missing_devpaths
                .iter()
                .find(|m| m.devpath == entry)
                .map(|m| m.history.clone());

            let history = match recorded {
                Some(history) => history,
                None => source.project_history(Some(&entry.name))?,
            };

            let checkpoints = revision::parse_history(&history, format, true);
            let branch_ref = devpath::branch_ref(&names.assign(&entry.name));
            debug!(
                devpath = %entry.name,
                start = %entry.start_revision,
                branch = %branch_ref,
                checkpoints = checkpoints.len(),
                "Planned devpath"
            );

            branches.push(Branch {
                devpath: Some(entry),
                branch_ref,
                checkpoints,
            });
        }

        Ok(Self { branches })
    }

    pub fn checkpoint_count(&self) -> usize {
        self.branches.iter().map(|b| b.checkpoints.len()).sum()
    }

    /// Every checkpoint number in replay order
    pub fn all_checkpoints(&self) -> Vec<String> {
        self.branches
            .iter()
            .flat_map(|b| b.checkpoints.iter().map(|c| c.number.clone()))
            .collect()
    }

    /// Checkpoints neither ignored nor exported yet
    pub fn to_process(&self, state: &State) -> Vec<String> {
        self.all_checkpoints()
            .into_iter()
            .filter(|r| !state.ignore_checkpoints.contains(r) && !state.exported.contains(r))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: Mode,
    pub checkpoints: usize,
    pub export: Option<ExportStats>,
    pub compare: Option<CompareStats>,
    /// Checkpoints whose checkout was reported broken during this run
    pub broken: Vec<String>,
    pub remaining_export: usize,
    pub remaining_compare: usize,
    pub elapsed: String,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Export(ExportStats),
    Compare(CompareStats),
}

/// Run one migration step, writing the import stream to `out`
pub fn run<W: Write>(
    options: &RunOptions,
    config: &Config,
    executor: &dyn CommandExecutor,
    out: W,
) -> Result<RunSummary> {
    let timer = Timer::new();

    if options.project.trim().is_empty() {
        return Err(MigrateError::InvalidArgument("source project must not be empty".to_string()).into());
    }
    let target = TargetRepo::open(&options.target)?;

    if options.mode == Mode::Compare {
        if options.compare_sandbox.is_none() {
            return Err(MigrateError::CompareSetup("a compare sandbox path".to_string()).into());
        }
        match options.mark_file {
            Some(ref path) if path.is_file() => {}
            Some(ref path) => {
                return Err(MigrateError::CompareSetup(format!("an existing marks file, {} not found", path.display())).into());
            }
            None => return Err(MigrateError::CompareSetup("a marks file".to_string()).into()),
        }
    }

    let git_marks = match options.mark_file {
        Some(ref path) if path.is_file() => target::read_marks_file(path)?,
        Some(ref path) => {
            debug!(path = %path.display(), "Marks file does not exist yet, starting without one");
            BTreeMap::new()
        }
        None => BTreeMap::new(),
    };
    let resume_mark = target::last_mark(&git_marks);

    let store = StateStore::new(config.state_path(target.root()));
    let state = store.load()?;
    let broken_before = state.broken.len();

    let source = SourceClient::new(executor, config, options.project.clone());
    let format = HistoryFormat {
        date_format: config.history_date_format.clone(),
        offset: config.offset()?,
    };

    let spinner = Spinner::new(options.progress, "Reading project history");
    let plan = Plan::build(&source, &state, &format)?;
    spinner.finish();

    let all_checkpoints = plan.all_checkpoints();
    let to_process = plan.to_process(&state);
    info!(
        checkpoints = all_checkpoints.len(),
        devpaths = plan.branches.len() - 1,
        to_process = to_process.len(),
        resume_mark = ?resume_mark,
        "Planned run"
    );

    check_consistency(&plan, &state, resume_mark)?;

    let mut session = Session::new(state, resume_mark, options.limit)?;
    let exclusions = Exclusions::new(config)?;
    let progress = CheckpointProgress::new(plan.checkpoint_count() as u64, options.progress);

    let result = match options.mode {
        Mode::Export => {
            let sandbox_dir = config.sandbox_path(target.root());
            run_export(&plan, &mut session, &source, &exclusions, sandbox_dir, config, out, &progress)
                .map(Outcome::Export)
        }
        Mode::Compare => {
            let sandbox_dir = options
                .compare_sandbox
                .as_ref()
                .map(|dir| dir.join(SANDBOX_DIR))
                .unwrap_or_default();
            run_compare(&plan, &mut session, &source, &exclusions, &target, &git_marks, sandbox_dir, &progress)
                .map(Outcome::Compare)
        }
    };
    progress.finish();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            let discarded = session.discard_unexported_marks();
            if !discarded.is_empty() {
                debug!(revisions = ?discarded, "Released marks of checkpoints that were not exported");
            }
            warn!("Run aborted, saving progress of completed checkpoints");
            store.save(&session.into_state())?;
            return Err(e);
        }
    };

    let state = session.into_state();
    store.save(&state)?;

    let remaining_export = match outcome {
        Outcome::Export(stats) => stats.deferred,
        Outcome::Compare(_) => to_process.len(),
    };
    let remaining_compare = state.marks.len().saturating_sub(state.compared_count as usize);

    store.save_counters(&Counters {
        all_checkpoints: all_checkpoints.clone(),
        to_process,
        remaining_export,
        remaining_compare,
    })?;

    let (export, compare) = match outcome {
        Outcome::Export(stats) => (Some(stats), None),
        Outcome::Compare(stats) => (None, Some(stats)),
    };

    Ok(RunSummary {
        mode: options.mode,
        checkpoints: all_checkpoints.len(),
        export,
        compare,
        broken: state.broken[broken_before.min(state.broken.len())..].to_vec(),
        remaining_export,
        remaining_compare,
        elapsed: timer.elapsed_string(),
    })
}

/// Check the marks recorded for the target against the recomputed plan.
///
/// Every mapped checkpoint must still be in the project history, and the
/// target cannot hold more marks than there are checkpoints to give them to.
fn check_consistency(plan: &Plan, state: &State, resume_mark: Option<u32>) -> Result<(), MigrateError> {
    let planned: HashSet<&str> = plan
        .branches
        .iter()
        .flat_map(|b| b.checkpoints.iter().map(|c| c.number.as_str()))
        .collect();

    let unplanned: Vec<String> = state
        .marks
        .iter()
        .filter(|(_, revision)| !planned.contains(revision.as_str()))
        .map(|(_, revision)| revision.clone())
        .collect();
    if !unplanned.is_empty() {
        return Err(MigrateError::UnplannedCheckpoints(unplanned));
    }

    let mapped: HashSet<&str> = state.marks.iter().map(|(_, revision)| revision.as_str()).collect();
    let exportable = planned
        .iter()
        .filter(|revision| !state.ignore_checkpoints.contains(**revision) || mapped.contains(**revision))
        .count();
    let recorded = resume_mark.map_or(0, |mark| mark as usize).max(state.marks.len());

    if recorded > exportable {
        return Err(MigrateError::CountMismatch {
            planned: exportable,
            recorded,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_export<W: Write>(
    plan: &Plan,
    session: &mut Session,
    source: &SourceClient,
    exclusions: &Exclusions,
    sandbox_dir: PathBuf,
    config: &Config,
    out: W,
    progress: &CheckpointProgress,
) -> Result<ExportStats> {
    let mut engine = ExportEngine::new(source, exclusions, ImportStream::new(out), sandbox_dir, config);

    for branch in &plan.branches {
        let mut cursor = branch.cursor();
        engine.run_branch(session, &mut cursor, &branch.checkpoints, progress)?;
    }

    let stats = engine.stats();
    let mut stream = engine.into_stream();
    stream.flush()?;
    info!(
        exported = stats.exported,
        replayed = stats.replayed,
        deferred = stats.deferred,
        "Export finished"
    );
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
fn run_compare(
    plan: &Plan,
    session: &mut Session,
    source: &SourceClient,
    exclusions: &Exclusions,
    target: &TargetRepo,
    git_marks: &BTreeMap<u32, String>,
    sandbox_dir: PathBuf,
    progress: &CheckpointProgress,
) -> Result<CompareStats> {
    let start = session.compared_count();
    let mut engine = CompareEngine::new(source, exclusions, target, git_marks, sandbox_dir, start);

    for branch in &plan.branches {
        engine.run_branch(session, &branch.checkpoints, progress)?;
    }

    let stats = engine.stats();
    info!(compared = stats.compared, "Compare finished");
    Ok(stats)
}

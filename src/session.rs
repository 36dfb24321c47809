//! Run-wide mutable state of one migration run.
//!
//! The state files are read into a `Session` once at startup; every engine
//! records its progress here and the orchestrator writes the result back
//! when the run ends, successfully or not.

use std::collections::HashSet;

use crate::error::MigrateError;
use crate::marks::MarkAllocator;
use crate::state::State;

#[derive(Debug)]
pub struct Session {
    state: State,
    marks: MarkAllocator,
    exported: HashSet<String>,
    compared: HashSet<String>,
    visited: HashSet<String>,
    preloaded: u32,
    resume_mark: u32,
    limit: Option<u32>,
}

impl Session {
    /// Build a session from loaded state.
    ///
    /// `resume_mark` is the highest mark the target already holds; without it
    /// the persisted mapping is taken as complete.
    pub fn new(state: State, resume_mark: Option<u32>, limit: Option<u32>) -> Result<Self, MigrateError> {
        let mut marks = MarkAllocator::new();
        marks.preload(state.marks.iter().map(|(mark, revision)| (*mark, revision.as_str())))?;

        let preloaded = marks.current_mark_count();
        let resume_mark = resume_mark.unwrap_or(preloaded);
        let exported = state.exported.iter().cloned().collect();
        let compared = state.compared.iter().cloned().collect();

        Ok(Self {
            exported,
            compared,
            visited: HashSet::new(),
            state,
            marks,
            preloaded,
            resume_mark,
            limit,
        })
    }

    pub fn marks(&self) -> &MarkAllocator {
        &self.marks
    }

    pub fn marks_mut(&mut self) -> &mut MarkAllocator {
        &mut self.marks
    }

    pub fn resume_mark(&self) -> u32 {
        self.resume_mark
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn compared_count(&self) -> u32 {
        self.state.compared_count
    }

    pub fn is_ignored(&self, revision: &str) -> bool {
        self.state.ignore_checkpoints.contains(revision)
    }

    pub fn is_exported(&self, revision: &str) -> bool {
        self.exported.contains(revision)
    }

    pub fn is_compared(&self, revision: &str) -> bool {
        self.compared.contains(revision)
    }

    /// Register the first visit of `revision` in this run
    pub fn visit(&mut self, revision: &str) -> Result<(), MigrateError> {
        if !self.visited.insert(revision.to_string()) {
            return Err(MigrateError::DuplicateExport(revision.to_string()));
        }
        Ok(())
    }

    pub fn record_export(&mut self, revision: &str) -> Result<(), MigrateError> {
        if !self.exported.insert(revision.to_string()) {
            return Err(MigrateError::DuplicateExport(revision.to_string()));
        }
        self.state.exported.push(revision.to_string());
        Ok(())
    }

    /// Note a checkpoint replayed for mark numbering; returns whether it was new to the exported list
    pub fn record_replay(&mut self, revision: &str) -> bool {
        if self.exported.insert(revision.to_string()) {
            self.state.exported.push(revision.to_string());
            true
        }
        else {
            false
        }
    }

    pub fn record_broken(&mut self, revision: &str) {
        if !self.state.broken.iter().any(|r| r == revision) {
            self.state.broken.push(revision.to_string());
        }
    }

    pub fn record_compare(&mut self, revision: &str, mark: u32) -> Result<(), MigrateError> {
        if !self.compared.insert(revision.to_string()) {
            return Err(MigrateError::DuplicateCompare(revision.to_string()));
        }
        self.state.compared.push(revision.to_string());
        self.state.compared_count = mark;
        Ok(())
    }

    /// Release marks allocated in this run for checkpoints that never reached the stream.
    ///
    /// Marks are handed out before a checkpoint is checked out, so an aborted
    /// run holds at most one such mark at the top of the mapping.
    pub fn discard_unexported_marks(&mut self) -> Vec<String> {
        let mut discarded = Vec::new();
        while self.marks.current_mark_count() > self.preloaded {
            let pending = self.marks.last().is_some_and(|r| !self.exported.contains(r));
            if !pending {
                break;
            }
            if let Some(revision) = self.marks.pop() {
                discarded.push(revision);
            }
        }
        discarded
    }

    /// Final state with the mark mapping as extended by this run
    pub fn into_state(self) -> State {
        let mut state = self.state;
        state.marks = self
            .marks
            .entries()
            .map(|(mark, revision)| (mark, revision.to_string()))
            .collect();
        state
    }
}

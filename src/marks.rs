use std::collections::HashMap;

use crate::error::MigrateError;

/// Assigns 1-based import marks to checkpoint numbers in first-reference order
#[derive(Debug, Default, Clone)]
pub struct MarkAllocator {
    revisions: Vec<String>,
    index: HashMap<String, u32>,
}

impl MarkAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the allocator from a persisted `:<mark> <revision>` mapping.
    ///
    /// Marks must be exactly `1..=n` in order; anything else means the mapping
    /// was edited or truncated and numbering can no longer be reproduced.
    pub fn preload<'a, I>(&mut self, entries: I) -> Result<(), MigrateError>
    where
        I: IntoIterator<Item = (u32, &'a str)>,
    {
        for (mark, revision) in entries {
            let expected = self.current_mark_count() + 1;
            if mark != expected {
                return Err(MigrateError::MarkSequence { expected, found: mark });
            }
            if let Some(existing) = self.index.get(revision) {
                return Err(MigrateError::MarkMismatch {
                    mark,
                    recorded: revision.to_string(),
                    computed: format!(":{}", existing),
                });
            }
            self.push(revision);
        }
        Ok(())
    }

    /// Existing mark of `revision`, allocating the next one on first use
    pub fn mark_for(&mut self, revision: &str) -> u32 {
        match self.index.get(revision) {
            Some(mark) => *mark,
            None => self.push(revision),
        }
    }

    /// Mark of `revision` without allocating
    pub fn mark_of(&self, revision: &str) -> Option<u32> {
        self.index.get(revision).copied()
    }

    /// Revision that owns `mark`
    pub fn revision_of(&self, mark: u32) -> Option<&str> {
        let index = usize::try_from(mark).ok()?.checked_sub(1)?;
        self.revisions.get(index).map(String::as_str)
    }

    pub fn current_mark_count(&self) -> u32 {
        self.revisions.len() as u32
    }

    /// All `(mark, revision)` pairs in mark order
    pub fn entries(&self) -> impl Iterator<Item = (u32, &str)> {
        self.revisions
            .iter()
            .enumerate()
            .map(|(i, revision)| (i as u32 + 1, revision.as_str()))
    }

    /// Revision holding the highest mark
    pub fn last(&self) -> Option<&str> {
        self.revisions.last().map(String::as_str)
    }

    /// Release the highest mark so the next allocation reuses it
    pub fn pop(&mut self) -> Option<String> {
        let revision = self.revisions.pop()?;
        self.index.remove(&revision);
        Some(revision)
    }

    fn push(&mut self, revision: &str) -> u32 {
        self.revisions.push(revision.to_string());
        let mark = self.current_mark_count();
        self.index.insert(revision.to_string(), mark);
        mark
    }
}

//! Test doubles for the source client and the target repository.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::executor::{CommandExecutor, CommandOutcome, CommandSpec};

type Handler = Box<dyn Fn(&CommandSpec) -> CommandOutcome>;

/// Executor answering every command through a closure and recording calls
pub struct FakeExecutor {
    handler: Handler,
    calls: RefCell<Vec<CommandSpec>>,
}

impl FakeExecutor {
    pub fn new(handler: impl Fn(&CommandSpec) -> CommandOutcome + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Calls whose first argument is `subcommand`
    pub fn calls_to(&self, subcommand: &str) -> Vec<CommandSpec> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.subcommand() == Some(subcommand))
            .cloned()
            .collect()
    }
}

impl CommandExecutor for FakeExecutor {
    fn execute(&self, command: &CommandSpec, _timeout: Duration) -> Result<CommandOutcome> {
        self.calls.borrow_mut().push(command.clone());
        Ok((self.handler)(command))
    }
}

/// In-memory source server: histories, devpaths and per-revision file trees
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    pub mainline: Vec<String>,
    pub devpaths: Vec<(String, String, Vec<String>)>,
    pub files: HashMap<String, Vec<(String, String)>>,
    /// Revisions whose sandbox creation exits with this status but still populates
    pub failing: HashMap<String, i32>,
}

/// History line in the server's tab separated format
pub fn history_line(number: &str, author: &str, label: &str, description: &str) -> String {
    format!("{}\t{}\t01.01.2020 10:00:00\t\t\t{}\t{}", number, author, label, description)
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mainline(mut self, lines: &[String]) -> Self {
        self.mainline = lines.to_vec();
        self
    }

    pub fn devpath(mut self, name: &str, start: &str, lines: &[String]) -> Self {
        self.devpaths.push((name.to_string(), start.to_string(), lines.to_vec()));
        self
    }

    pub fn files(mut self, revision: &str, files: &[(&str, &str)]) -> Self {
        self.files.insert(
            revision.to_string(),
            files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
        );
        self
    }

    pub fn failing(mut self, revision: &str, status: i32) -> Self {
        self.failing.insert(revision.to_string(), status);
        self
    }

    /// Newest-first history listing with the client's header line
    fn history(lines: &[String]) -> Vec<u8> {
        let mut text = String::from("Project history header\n");
        for line in lines.iter().rev() {
            text.push_str(line);
            text.push('\n');
        }
        text.into_bytes()
    }

    pub fn respond(&self, command: &CommandSpec) -> CommandOutcome {
        match command.subcommand() {
            Some("viewprojecthistory") => {
                let filter = command.option("rfilter").unwrap_or_default();
                if filter == "devpath::current" {
                    return CommandOutcome::Success(Self::history(&self.mainline));
                }
                let name = filter.strip_prefix("devpath:").unwrap_or_default();
                match self.devpaths.iter().find(|(n, _, _)| n == name) {
                    Some((_, _, lines)) => CommandOutcome::Success(Self::history(lines)),
                    None => failed(1, "unknown devpath"),
                }
            }
            Some("projectinfo") => {
                let mut text = String::from("Development Paths:\n");
                for (name, start, _) in &self.devpaths {
                    text.push_str(&format!("    {} ({})\n", name, start));
                }
                CommandOutcome::Success(text.into_bytes())
            }
            Some("createsandbox") => {
                let revision = command.option("projectRevision").unwrap_or_default();
                let Some(dir) = command.args.last().map(PathBuf::from) else {
                    return failed(1, "no sandbox directory");
                };
                if let Err(e) = self.populate(revision, &dir) {
                    return failed(1, &e.to_string());
                }
                match self.failing.get(revision) {
                    Some(status) => failed(*status, "general failure"),
                    None => CommandOutcome::Success(Vec::new()),
                }
            }
            Some("dropsandbox") => {
                let sandbox_file = command.args.last().map(PathBuf::from).unwrap_or_default();
                if let Some(dir) = sandbox_file.parent() {
                    let _ = fs::remove_dir_all(dir);
                }
                CommandOutcome::Success(Vec::new())
            }
            _ => CommandOutcome::Success(Vec::new()),
        }
    }

    pub fn populate(&self, revision: &str, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("project.pj"), b"--MKS Project--\n")?;
        for (path, content) in self.files.get(revision).into_iter().flatten() {
            let full = dir.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(full, content)?;
        }
        Ok(())
    }

    pub fn into_executor(self) -> FakeExecutor {
        let server = Rc::new(self);
        FakeExecutor::new(move |command| server.respond(command))
    }
}

fn failed(status: i32, message: &str) -> CommandOutcome {
    CommandOutcome::Failed {
        status,
        stdout: Vec::new(),
        stderr: message.as_bytes().to_vec(),
    }
}

use anyhow::Result;
use clap::Parser;
use std::io::{self, BufWriter};

use mks2git::{
    Cli,
    Config,
    Mode,
    ProcessExecutor,
    ProgressConfig,
    RunOptions, RunSummary,
    exit_code_for, init_logging, run,
};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Warning: {:#}", e);
    }

    match execute(&cli) {
        Ok(summary) => print_summary(&summary),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn execute(cli: &Cli) -> Result<RunSummary> {
    let config = Config::resolve(cli.config.as_deref(), &cli.target)?;
    let progress = ProgressConfig::from_flags(cli.progress, cli.no_progress, config.progress);

    let options = RunOptions {
        mode: cli.mode,
        project: cli.project.clone(),
        target: cli.target.clone(),
        mark_file: cli.mark_file.clone(),
        limit: cli.effective_limit(),
        compare_sandbox: cli.compare_sandbox.clone(),
        progress,
    };

    let stdout = io::stdout();
    let out = BufWriter::new(stdout.lock());
    run(&options, &config, &ProcessExecutor, out)
}

fn print_summary(summary: &RunSummary) {
    match summary.mode {
        Mode::Export => eprintln!("Export complete"),
        Mode::Compare => eprintln!("Compare complete"),
    }
    eprintln!("  Checkpoints:  {}", summary.checkpoints);

    if let Some(stats) = summary.export {
        eprintln!("  Exported:     {}", stats.exported);
        eprintln!("  Replayed:     {}", stats.replayed);
        eprintln!("  Ignored:      {}", stats.ignored);
        eprintln!("  Deferred:     {}", stats.deferred);
    }
    if let Some(stats) = summary.compare {
        eprintln!("  Compared:     {}", stats.compared);
        eprintln!("  Not exported: {}", stats.not_exported);
    }

    eprintln!("  Remaining:    {} to export, {} to compare", summary.remaining_export, summary.remaining_compare);
    eprintln!("  Time:         {}", summary.elapsed);

    if !summary.broken.is_empty() {
        eprintln!("\nBroken checkouts:");
        for revision in &summary.broken {
            eprintln!("  {}", revision);
        }
    }
}

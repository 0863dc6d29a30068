//! Batch job scripts.

use std::fmt::Write as _;
use std::path::PathBuf;

use jobqueue_core::ResourceConfiguration;

/// Everything needed to submit one worker job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
    pub name: String,
    pub resources: ResourceConfiguration,
    /// The command the job runs once its prologue has finished.
    pub command: String,
    pub prologue: Vec<String>,
    pub log_directory: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
}

impl JobScript {
    /// Create a script for `name` running `command`.
    pub fn new(
        name: impl Into<String>,
        resources: ResourceConfiguration,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resources,
            command: command.into(),
            prologue: Vec::new(),
            log_directory: None,
            working_directory: None,
        }
    }

    /// Render as an sbatch script.
    pub fn render(&self) -> String {
        let r = &self.resources;
        let mut out = String::from("#!/usr/bin/env bash\n\n");

        let mut directive = |line: String| {
            let _ = writeln!(out, "#SBATCH {line}");
        };
        directive(format!("-J {}", self.name));
        directive(format!("-p {}", r.queue()));
        directive("-n 1".to_string());
        directive(format!("--cpus-per-task={}", r.cores()));
        directive(format!("--mem={}", r.memory().to_slurm()));
        directive(format!("-t {}", r.walltime()));
        if let Some(reservation) = r.reservation() {
            directive(format!("--reservation={reservation}"));
        }
        if let Some(dir) = &self.log_directory {
            directive(format!("-e {}/{}-%J.err", dir.display(), self.name));
            directive(format!("-o {}/{}-%J.out", dir.display(), self.name));
        }
        if let Some(dir) = &self.working_directory {
            directive(format!("-D {}", dir.display()));
        }
        for extra in r.extra_directives() {
            directive(extra.trim_start_matches("#SBATCH").trim().to_string());
        }

        out.push('\n');
        for line in &self.prologue {
            out.push_str(line);
            out.push('\n');
        }

        out.push_str(&self.command);
        for arg in r.worker_args() {
            out.push(' ');
            out.push_str(arg);
        }
        out.push('\n');
        out
    }
}

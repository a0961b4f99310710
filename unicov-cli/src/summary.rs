//! Post-run summary: per-project outcomes, merge diagnostics, publish
//! status.

use std::fmt::Write as _;
use std::path::PathBuf;

use coverage_engine::merge::MergeDiagnostics;
use serde::Serialize;

use crate::config::FailureMode;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProjectStatus {
    Collected { files: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectOutcome {
    pub project: String,
    #[serde(flatten)]
    pub status: ProjectStatus,
}

impl ProjectOutcome {
    pub fn failed(&self) -> bool {
        matches!(self.status, ProjectStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PublishStatus {
    Published { target: PathBuf },
    Skipped { reason: String },
    Failed { reason: String },
}

/// Everything the run wants to tell the user once the pipeline finishes.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub failure_mode: FailureMode,
    pub projects: Vec<ProjectOutcome>,
    pub merged_files: usize,
    pub passthrough_symbols: usize,
    pub merge_conflicts: Vec<String>,
    pub publish: PublishStatus,
}

impl RunSummary {
    pub fn failed_projects(&self) -> usize {
        self.projects.iter().filter(|p| p.failed()).count()
    }

    /// Exit policy: all projects succeeded, or lenient mode published a
    /// partial result. A failed or skipped publish is never a success.
    pub fn succeeded(&self) -> bool {
        let published = matches!(self.publish, PublishStatus::Published { .. });
        match self.failure_mode {
            FailureMode::Strict => published && self.failed_projects() == 0,
            FailureMode::Lenient => published,
        }
    }

    pub fn record_merge_diagnostics(&mut self, diagnostics: &MergeDiagnostics) {
        self.merge_conflicts = diagnostics
            .conflicts
            .iter()
            .map(|c| c.to_string())
            .collect();
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Coverage aggregation summary");
        let _ = writeln!(out, "============================");
        for outcome in &self.projects {
            match &outcome.status {
                ProjectStatus::Collected { files } => {
                    let _ = writeln!(out, "  {:<20} ok      ({files} files)", outcome.project);
                }
                ProjectStatus::Failed { reason } => {
                    let _ = writeln!(out, "  {:<20} FAILED  {reason}", outcome.project);
                }
            }
        }
        let _ = writeln!(
            out,
            "Merged {} files from {} of {} projects",
            self.merged_files,
            self.projects.len() - self.failed_projects(),
            self.projects.len(),
        );
        if self.passthrough_symbols > 0 {
            let _ = writeln!(
                out,
                "  {} symbols passed through without normalization",
                self.passthrough_symbols,
            );
        }
        for conflict in &self.merge_conflicts {
            let _ = writeln!(out, "  merge conflict: {conflict}");
        }
        match &self.publish {
            PublishStatus::Published { target } => {
                let _ = writeln!(out, "Published to {}", target.display());
            }
            PublishStatus::Skipped { reason } => {
                let _ = writeln!(out, "Publish skipped: {reason}");
            }
            PublishStatus::Failed { reason } => {
                let _ = writeln!(out, "Publish FAILED: {reason}");
            }
        }
        out
    }
}

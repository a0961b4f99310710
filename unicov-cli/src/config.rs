//! Run configuration.
//!
//! A run is described by a `unicov.json` file listing the sub-projects to
//! collect from, the failure policy, and the publish target. CLI flags
//! override the policy fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Pipeline-wide policy for project collection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Any project failure fails the whole run; nothing is published.
    #[default]
    Strict,
    /// Partial results are merged and published; failures surface as
    /// warnings in the summary.
    Lenient,
}

/// One sub-project of the multi-component build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    /// Project root directory; the collection command runs here.
    pub root: PathBuf,
    /// Target toolchain triple the project is instrumented for.
    pub toolchain: String,
    /// Location of the raw coverage artifact, relative to `root`.
    #[serde(default = "default_artifact")]
    pub artifact: PathBuf,
    /// Instrumented test/build command. When absent, a `cargo test` cycle
    /// with coverage instrumentation is derived from the toolchain.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl ProjectSpec {
    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(&self.artifact)
    }
}

/// Full configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub projects: Vec<ProjectSpec>,
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Per-project collection timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bound on concurrent project collections. Defaults to the number of
    /// available cores.
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Renderer command; `{input}` expands to the merged tracefile and
    /// `{output}` to the report directory. When absent, `genhtml` is used if
    /// present on PATH.
    #[serde(default)]
    pub renderer: Option<Vec<String>>,
    /// Directory the rendered report is published to, atomically.
    pub publish_target: PathBuf,
    /// Scratch space for per-project records, the merged tracefile, and the
    /// staged report.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

fn default_artifact() -> PathBuf {
    PathBuf::from("target/coverage/coverage.lcov")
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("target/unicov")
}

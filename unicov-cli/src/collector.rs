//! Per-project coverage collection.
//!
//! Each project runs its instrumented test/build cycle in isolation; one
//! project failing (or timing out) never aborts the others. The collector
//! parses the project's raw LCOV artifact, rewrites symbols to canonical
//! form, and stores the normalized record atomically: the file at the output
//! path is either the complete record or absent, never a partial write.

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use coverage_engine::model::CoverageRecord;
use coverage_engine::{lcov, normalize};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ProjectSpec;

/// Why a project's collection failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FailureReason {
    /// The instrumented run exceeded the per-project timeout and was killed.
    Timeout { secs: u64 },
    /// The toolchain command could not be spawned or exited non-zero.
    Toolchain { detail: String },
    /// The coverage artifact could not be read, or the record could not be
    /// written.
    Io { detail: String },
    /// The coverage artifact was malformed.
    Parse { detail: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { secs } => write!(f, "timed out after {secs}s"),
            Self::Toolchain { detail } => write!(f, "toolchain error: {detail}"),
            Self::Io { detail } => write!(f, "io error: {detail}"),
            Self::Parse { detail } => write!(f, "parse error: {detail}"),
        }
    }
}

/// Collection failure for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{project}: {reason}")]
pub struct CollectFailure {
    pub project: String,
    pub reason: FailureReason,
}

/// Successful collection: the normalized record plus diagnostics.
#[derive(Debug, Clone)]
pub struct CollectedProject {
    pub project: String,
    pub record: CoverageRecord,
    /// Mangled-looking symbols the normalizer passed through undecoded.
    pub passthrough_symbols: usize,
    /// Where the normalized record was persisted.
    pub output: PathBuf,
}

/// Outcome of running the collector for one project: a record or a failure
/// reason, never both.
pub type ProjectResult = Result<CollectedProject, CollectFailure>;

/// Run collection for one project and persist the normalized record at
/// `output`.
pub async fn collect_project(
    spec: &ProjectSpec,
    run_timeout: Duration,
    output: &Path,
) -> ProjectResult {
    let fail = |reason| CollectFailure {
        project: spec.name.clone(),
        reason,
    };

    info!(project = %spec.name, root = %spec.root.display(), "collecting coverage");

    run_instrumented_cycle(spec, run_timeout)
        .await
        .map_err(&fail)?;

    let artifact = spec.artifact_path();
    let raw = std::fs::read_to_string(&artifact).map_err(|err| {
        fail(FailureReason::Io {
            detail: format!("{}: {err}", artifact.display()),
        })
    })?;

    let mut record = lcov::parse(&raw).map_err(|err| {
        fail(FailureReason::Parse {
            detail: format!("{}: {err}", artifact.display()),
        })
    })?;
    record.project = spec.name.clone();

    let (record, passthrough_symbols) = normalize::normalize_record(record);
    if passthrough_symbols > 0 {
        warn!(
            project = %spec.name,
            passthrough_symbols,
            "symbols passed through without normalization",
        );
    }

    write_atomic(output, &lcov::write_record(&record)).map_err(|err| {
        fail(FailureReason::Io {
            detail: format!("{}: {err}", output.display()),
        })
    })?;

    info!(
        project = %spec.name,
        files = record.files.len(),
        output = %output.display(),
        "collection finished",
    );

    Ok(CollectedProject {
        project: spec.name.clone(),
        record,
        passthrough_symbols,
        output: output.to_path_buf(),
    })
}

/// Run the project's instrumented test/build command under the timeout.
///
/// The child is spawned with kill-on-drop, so abandoning the wait (timeout
/// or pipeline cancellation) tears the process down rather than leaking it.
async fn run_instrumented_cycle(
    spec: &ProjectSpec,
    run_timeout: Duration,
) -> Result<(), FailureReason> {
    let invocation = match &spec.command {
        Some(command) => command.clone(),
        None => default_command(spec),
    };
    let (program, args) = invocation.split_first().ok_or_else(|| {
        FailureReason::Toolchain {
            detail: "empty collection command".into(),
        }
    })?;

    debug!(project = %spec.name, command = ?invocation, "running instrumented cycle");

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(&spec.root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if spec.command.is_none() {
        // The derived cargo cycle needs the instrumentation environment the
        // way an explicit project command would set it up itself.
        cmd.env("RUSTFLAGS", "-C instrument-coverage").env(
            "LLVM_PROFILE_FILE",
            spec.root.join("target/coverage/prof-%p-%m.profraw"),
        );
    }

    let child = cmd.spawn().map_err(|err| FailureReason::Toolchain {
        detail: format!("failed to spawn {program}: {err}"),
    })?;

    let result = timeout(run_timeout, child.wait_with_output()).await;
    match result {
        Err(_) => Err(FailureReason::Timeout {
            secs: run_timeout.as_secs(),
        }),
        Ok(Err(err)) => Err(FailureReason::Io {
            detail: format!("waiting on {program}: {err}"),
        }),
        Ok(Ok(output)) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(FailureReason::Toolchain {
                detail: format!("{program} exited with {}: {}", output.status, tail(&stderr)),
            })
        }
        Ok(Ok(_)) => Ok(()),
    }
}

/// Derived collection command: the project's cargo test cycle for its
/// toolchain, instrumented for coverage.
fn default_command(spec: &ProjectSpec) -> Vec<String> {
    vec![
        "cargo".into(),
        "test".into(),
        "--target".into(),
        spec.toolchain.clone(),
    ]
}

/// Last few lines of process output, enough to diagnose without flooding
/// the summary.
fn tail(text: &str) -> String {
    const KEEP: usize = 5;
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(KEEP);
    lines[start..].join(" | ")
}

/// Write `contents` to `path` via a temporary file in the same directory,
/// persisted by rename. On any failure the destination is untouched.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(contents.as_bytes())?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}

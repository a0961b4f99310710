//! Pipeline orchestration.
//!
//! Collection fans out across projects as independent tasks bounded by a
//! semaphore; a join barrier gathers every outcome before anything merges.
//! The merge engine is the single writer of the unified model, so no locking
//! happens past the barrier. Publishing sits strictly after the barrier and
//! is never reached on cancellation.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use coverage_engine::{lcov, merge::merge};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::collector::{self, CollectFailure, FailureReason, ProjectResult};
use crate::config::{FailureMode, RunConfig};
use crate::publisher;
use crate::summary::{ProjectOutcome, ProjectStatus, PublishStatus, RunSummary};

/// Run the full pipeline: collect every project, merge, render, publish.
pub async fn run(config: &RunConfig) -> Result<RunSummary> {
    let results = collect_all(config).await;

    let mut summary = RunSummary {
        failure_mode: config.failure_mode,
        projects: Vec::with_capacity(results.len()),
        merged_files: 0,
        passthrough_symbols: 0,
        merge_conflicts: Vec::new(),
        publish: PublishStatus::Skipped {
            reason: "publish not reached".into(),
        },
    };

    let mut records = Vec::new();
    for result in results {
        match result {
            Ok(collected) => {
                summary.projects.push(ProjectOutcome {
                    project: collected.project.clone(),
                    status: ProjectStatus::Collected {
                        files: collected.record.files.len(),
                    },
                });
                summary.passthrough_symbols += collected.passthrough_symbols;
                records.push(collected.record);
            }
            Err(failure) => {
                error!(project = %failure.project, reason = %failure.reason, "collection failed");
                summary.projects.push(ProjectOutcome {
                    project: failure.project,
                    status: ProjectStatus::Failed {
                        reason: failure.reason.to_string(),
                    },
                });
            }
        }
    }

    let failed = summary.failed_projects();
    if failed > 0 && config.failure_mode == FailureMode::Strict {
        summary.publish = PublishStatus::Skipped {
            reason: format!("strict mode: {failed} of {} projects failed", summary.projects.len()),
        };
        return Ok(summary);
    }
    if failed > 0 {
        warn!(failed, "continuing with partial results (lenient mode)");
    }

    let (model, diagnostics) = merge(records);
    summary.merged_files = model.file_count();
    summary.record_merge_diagnostics(&diagnostics);
    info!(
        files = model.file_count(),
        records = diagnostics.records_merged,
        conflicts = diagnostics.conflicts.len(),
        "records merged",
    );

    let merged_path = config.work_dir.join("merged.lcov");
    collector::write_atomic(&merged_path, &lcov::write_model(&model))
        .with_context(|| format!("failed to write merged tracefile at {}", merged_path.display()))?;

    let report_dir = render_report(config, &merged_path).await?;

    match publisher::publish(&report_dir, &config.publish_target) {
        Ok(()) => {
            summary.publish = PublishStatus::Published {
                target: config.publish_target.clone(),
            };
        }
        Err(err) => {
            error!(error = %err, "publish failed; previous report left untouched");
            summary.publish = PublishStatus::Failed {
                reason: err.to_string(),
            };
        }
    }

    Ok(summary)
}

/// Run the pipeline, cancelling everything in flight when `shutdown`
/// resolves. Cancellation aborts collector tasks (their child processes are
/// killed on drop) and never leaves a partially published target: the
/// publisher only runs after the collection barrier, inside the pipeline
/// future that gets dropped here.
pub async fn run_with_shutdown(
    config: &RunConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<RunSummary> {
    tokio::select! {
        result = run(config) => result,
        () = shutdown => {
            warn!("run cancelled; in-flight collection aborted, nothing published");
            anyhow::bail!("pipeline run cancelled")
        }
    }
}

/// Collect every project concurrently, bounded by the configured job limit.
/// Returns once all projects completed or timed out (the merge barrier).
async fn collect_all(config: &RunConfig) -> Vec<ProjectResult> {
    let semaphore = Arc::new(Semaphore::new(config.jobs().max(1)));
    let records_dir = config.work_dir.join("records");
    let timeout = config.timeout();

    let mut tasks: JoinSet<ProjectResult> = JoinSet::new();
    for spec in config.projects.clone() {
        let semaphore = Arc::clone(&semaphore);
        let output = records_dir.join(format!("{}.lcov", spec.name));
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| CollectFailure {
                    project: spec.name.clone(),
                    reason: FailureReason::Io {
                        detail: "collection pool closed".into(),
                    },
                })?;
            collector::collect_project(&spec, timeout, &output).await
        });
    }

    let mut results = Vec::with_capacity(config.projects.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            // A panicked collector counts as a failed project, not a
            // pipeline crash; the project name is gone with the task.
            Err(err) => results.push(Err(CollectFailure {
                project: "<unknown>".into(),
                reason: FailureReason::Io {
                    detail: format!("collector task failed: {err}"),
                },
            })),
        }
    }

    // Tasks finish in arbitrary order; report in config order so summaries
    // are stable run to run.
    let position = |name: &str| {
        config
            .projects
            .iter()
            .position(|p| p.name == name)
            .unwrap_or(usize::MAX)
    };
    results.sort_by_key(|result| match result {
        Ok(collected) => position(&collected.project),
        Err(failure) => position(&failure.project),
    });
    results
}

/// Produce the report directory handed to the publisher.
///
/// The merged tracefile is always part of the report. When a renderer is
/// configured (or `genhtml` is on PATH) it runs on top; a renderer failure
/// degrades the report to the tracefile alone rather than failing the run -
/// rendering is an external concern.
async fn render_report(config: &RunConfig, merged: &Path) -> Result<PathBuf> {
    let report_dir = config.work_dir.join("report");
    match std::fs::remove_dir_all(&report_dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to clear report directory {}", report_dir.display())
            })
        }
    }
    std::fs::create_dir_all(&report_dir)
        .with_context(|| format!("failed to create report directory {}", report_dir.display()))?;

    std::fs::copy(merged, report_dir.join("merged.lcov"))
        .with_context(|| format!("failed to copy {} into report", merged.display()))?;

    let command = renderer_command(config, merged, &report_dir);
    let Some(command) = command else {
        info!("no renderer available; report carries the merged tracefile only");
        return Ok(report_dir);
    };

    info!(command = ?command, "rendering report");
    let status = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            warn!(%status, "renderer failed; publishing merged tracefile only");
        }
        Err(err) => {
            warn!(error = %err, "renderer could not run; publishing merged tracefile only");
        }
    }

    Ok(report_dir)
}

fn renderer_command(config: &RunConfig, merged: &Path, report_dir: &Path) -> Option<Vec<String>> {
    if let Some(template) = &config.renderer {
        let expanded = template
            .iter()
            .map(|arg| {
                arg.replace("{input}", &merged.to_string_lossy())
                    .replace("{output}", &report_dir.to_string_lossy())
            })
            .collect::<Vec<_>>();
        return (!expanded.is_empty()).then_some(expanded);
    }
    if which::which("genhtml").is_ok() {
        return Some(vec![
            "genhtml".into(),
            merged.to_string_lossy().into_owned(),
            "-o".into(),
            report_dir.to_string_lossy().into_owned(),
        ]);
    }
    None
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                ctrl_c.await;
                info!("received SIGINT, cancelling run");
                return;
            }
        };
        tokio::select! {
            () = ctrl_c => info!("received SIGINT, cancelling run"),
            _ = terminate.recv() => info!("received SIGTERM, cancelling run"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received SIGINT, cancelling run");
    }
}

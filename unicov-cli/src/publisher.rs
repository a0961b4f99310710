//! Atomic report publishing.
//!
//! The rendered report is staged next to the target and committed with a
//! single directory rename, so the target is observed either fully updated
//! or completely unchanged - never half-written. A failed publish leaves the
//! previous successful publish in place.
//!
//! A run-level lock file serializes concurrent pipeline runs against the
//! same target; two simultaneous swaps racing on the same rename would be
//! undefined.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("another run holds the publish lock: {path}")]
    Locked { path: PathBuf },
    #[error("report directory not found: {0}")]
    ReportMissing(PathBuf),
    #[error("failed to stage report at {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to commit report to {target}: {source}")]
    Commit {
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PublishError {
    fn stage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Stage {
            path: path.into(),
            source,
        }
    }
}

/// Exclusive lock over a publish target, held for the duration of a run.
/// Released (the lock file removed) on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `target`. Fails fast when another run holds it;
    /// the caller reports the failure rather than queueing behind an
    /// unknown-length run.
    pub fn acquire(target: &Path) -> Result<Self, PublishError> {
        let path = lock_path(target);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PublishError::stage(parent, err))?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write as _;
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(PublishError::Locked { path })
            }
            Err(err) => Err(PublishError::stage(path, err)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release publish lock");
        }
    }
}

/// Publish `report_dir` to `target` atomically.
///
/// Staging copies the report into a sibling of the target; the commit is a
/// single rename. The previous target is moved aside first and restored if
/// the commit rename fails.
pub fn publish(report_dir: &Path, target: &Path) -> Result<(), PublishError> {
    let _lock = RunLock::acquire(target)?;
    publish_locked(report_dir, target)
}

fn publish_locked(report_dir: &Path, target: &Path) -> Result<(), PublishError> {
    if !report_dir.is_dir() {
        return Err(PublishError::ReportMissing(report_dir.to_path_buf()));
    }

    let staging = sibling(target, "staging");
    let previous = sibling(target, "prev");

    // Stale leftovers from an interrupted run never block a fresh publish.
    remove_dir_if_present(&staging)?;
    remove_dir_if_present(&previous)?;

    copy_dir(report_dir, &staging)?;

    let had_previous = target.exists();
    if had_previous {
        std::fs::rename(target, &previous).map_err(|err| PublishError::Commit {
            target: target.to_path_buf(),
            source: err,
        })?;
    }

    // The commit point: a single rename makes the new report visible.
    if let Err(err) = std::fs::rename(&staging, target) {
        if had_previous {
            if let Err(restore_err) = std::fs::rename(&previous, target) {
                warn!(
                    target = %target.display(),
                    error = %restore_err,
                    "failed to restore previous report after commit failure",
                );
            }
        }
        return Err(PublishError::Commit {
            target: target.to_path_buf(),
            source: err,
        });
    }

    if had_previous {
        if let Err(err) = std::fs::remove_dir_all(&previous) {
            warn!(path = %previous.display(), error = %err, "failed to clean up previous report");
        }
    }

    info!(target = %target.display(), "report published");
    Ok(())
}

fn lock_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "publish".to_string());
    parent_of(target).join(format!(".{name}.lock"))
}

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "publish".to_string());
    parent_of(target).join(format!("{name}.{suffix}"))
}

fn parent_of(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn remove_dir_if_present(path: &Path) -> Result<(), PublishError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PublishError::stage(path, err)),
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), PublishError> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|err| {
            let path = err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| from.to_path_buf());
            PublishError::stage(path, err.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .expect("walkdir yields children of the walk root");
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(|err| PublishError::stage(&dest, err))?;
        } else {
            std::fs::copy(entry.path(), &dest)
                .map_err(|err| PublishError::stage(&dest, err))
                .map(|_| ())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use tempfile::TempDir;

    fn make_report(dir: &Path, marker: &str) -> PathBuf {
        let report = dir.join("report");
        std::fs::create_dir_all(report.join("nested")).expect("mkdir");
        std::fs::write(report.join("index.html"), marker).expect("write");
        std::fs::write(report.join("nested/data.lcov"), marker).expect("write");
        report
    }

    #[test]
    fn publish__fresh_target__then_report_copied() {
        let dir = TempDir::new().expect("tempdir");
        let report = make_report(dir.path(), "v1");
        let target = dir.path().join("site");

        publish(&report, &target).expect("publish");

        assert_eq!(
            std::fs::read_to_string(target.join("index.html")).expect("read"),
            "v1"
        );
        assert_eq!(
            std::fs::read_to_string(target.join("nested/data.lcov")).expect("read"),
            "v1"
        );
        assert!(!sibling(&target, "staging").exists());
        assert!(!sibling(&target, "prev").exists());
    }

    #[test]
    fn publish__existing_target__then_fully_replaced() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("site");

        let report_v1 = make_report(&dir.path().join("one"), "v1");
        publish(&report_v1, &target).expect("first publish");

        let report_v2 = make_report(&dir.path().join("two"), "v2");
        publish(&report_v2, &target).expect("second publish");

        assert_eq!(
            std::fs::read_to_string(target.join("index.html")).expect("read"),
            "v2"
        );
        assert!(!sibling(&target, "prev").exists());
    }

    #[test]
    fn publish__report_missing__then_error_and_target_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("site");
        let report = make_report(dir.path(), "v1");
        publish(&report, &target).expect("publish");

        let err = publish(&dir.path().join("nonexistent"), &target).unwrap_err();

        assert!(matches!(err, PublishError::ReportMissing(_)));
        assert_eq!(
            std::fs::read_to_string(target.join("index.html")).expect("read"),
            "v1"
        );
    }

    #[test]
    fn run_lock__held__then_second_acquire_fails_until_released() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("site");

        let lock = RunLock::acquire(&target).expect("first acquire");
        let err = RunLock::acquire(&target).unwrap_err();
        assert!(matches!(err, PublishError::Locked { .. }));

        drop(lock);
        RunLock::acquire(&target).expect("acquire after release");
    }

    #[test]
    fn publish__while_locked__then_locked_error() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("site");
        let report = make_report(dir.path(), "v1");

        let _lock = RunLock::acquire(&target).expect("acquire");
        let err = publish(&report, &target).unwrap_err();

        assert!(matches!(err, PublishError::Locked { .. }));
        assert!(!target.exists());
    }
}

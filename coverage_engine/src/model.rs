//! In-memory coverage data model.
//!
//! A [`CoverageRecord`] holds what one project's test run measured. The
//! [`UnifiedCoverageModel`] is the merged view across projects, keyed by
//! canonical file path. Hit count 0 means "instrumented but never executed";
//! absence of a line means "not instrumented" - the two are never conflated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::merge::MergeConflict;

/// Coverage entry for one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCoverage {
    pub line: u32,
    pub hits: u64,
}

/// Coverage entry for one function, keyed by its canonical symbol name.
///
/// A start line of 0 means the record carried hit data for the function but
/// no declaration entry; the merge fills the line in when another record
/// supplies one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCoverage {
    pub name: String,
    pub start_line: u32,
    pub hits: u64,
}

/// Per-file coverage: line entries plus function entries.
///
/// Input order is unconstrained; the writer and the merge restore ascending,
/// duplicate-free ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: String,
    pub lines: Vec<LineCoverage>,
    pub functions: Vec<FunctionCoverage>,
}

impl FileCoverage {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
            functions: Vec::new(),
        }
    }
}

/// One project's coverage measurements. File paths are unique within a
/// record (the parser enforces this).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    /// Project the record belongs to. Empty for records parsed straight from
    /// a tracefile; the collector fills it in.
    #[serde(default)]
    pub project: String,
    pub files: Vec<FileCoverage>,
}

impl CoverageRecord {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            files: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Merged per-file coverage inside the unified model.
///
/// Lines and functions live in ordered maps so the model is identical no
/// matter what order records were merged in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedFile {
    /// line number -> summed hit count
    pub lines: BTreeMap<u32, u64>,
    /// canonical symbol -> (start line, summed hit count)
    pub functions: BTreeMap<String, MergedFunction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedFunction {
    pub start_line: u32,
    pub hits: u64,
}

/// The unified coverage view across all merged records, keyed by canonical
/// file path. Owned solely by the merge engine while it runs; afterwards it
/// is serialized for the renderer and discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedCoverageModel {
    pub files: BTreeMap<String, MergedFile>,
}

impl UnifiedCoverageModel {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of files covered by the model.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Flatten the model into a sorted, duplicate-free [`CoverageRecord`].
    ///
    /// Files come out in lexicographic path order, lines ascending, functions
    /// ordered by (start line, name). This is the storage order the writer
    /// relies on for byte-stable output.
    pub fn to_record(&self) -> CoverageRecord {
        let files = self
            .files
            .iter()
            .map(|(path, merged)| {
                let lines = merged
                    .lines
                    .iter()
                    .map(|(&line, &hits)| LineCoverage { line, hits })
                    .collect();
                let mut functions: Vec<FunctionCoverage> = merged
                    .functions
                    .iter()
                    .map(|(name, f)| FunctionCoverage {
                        name: name.clone(),
                        start_line: f.start_line,
                        hits: f.hits,
                    })
                    .collect();
                functions.sort_by(|a, b| {
                    a.start_line
                        .cmp(&b.start_line)
                        .then_with(|| a.name.cmp(&b.name))
                });
                FileCoverage {
                    path: path.clone(),
                    lines,
                    functions,
                }
            })
            .collect();
        CoverageRecord {
            project: String::new(),
            files,
        }
    }

    /// Build a model from a single record. Equivalent to merging the record
    /// alone; used by round-trip comparisons.
    pub fn from_record(record: &CoverageRecord) -> Self {
        let mut model = Self::default();
        let mut conflicts = Vec::new();
        model.absorb(record, &mut conflicts);
        model
    }

    /// Fold one record's entries into the model.
    ///
    /// Line hits are additive: each record is a distinct execution, so counts
    /// sum. A line present in any record is instrumented in the model even
    /// when another record never instrumented it. Functions merge by
    /// canonical symbol; on start-line disagreement the lowest known line is
    /// kept and a [`MergeConflict`] is pushed instead of failing.
    pub(crate) fn absorb(&mut self, record: &CoverageRecord, conflicts: &mut Vec<MergeConflict>) {
        for file in &record.files {
            let merged = self.files.entry(file.path.clone()).or_default();
            for lc in &file.lines {
                *merged.lines.entry(lc.line).or_insert(0) += lc.hits;
            }
            for fc in &file.functions {
                let entry = merged.functions.entry(fc.name.clone()).or_default();
                entry.hits += fc.hits;
                // Start line 0 is "unknown" (hit data without a declaration
                // entry) and never counts as a disagreement.
                if entry.start_line == 0 {
                    entry.start_line = fc.start_line;
                } else if fc.start_line != 0 && fc.start_line != entry.start_line {
                    let kept = entry.start_line.min(fc.start_line);
                    conflicts.push(MergeConflict {
                        file: file.path.clone(),
                        symbol: fc.name.clone(),
                        kept_line: kept,
                        dropped_line: entry.start_line.max(fc.start_line),
                    });
                    entry.start_line = kept;
                }
            }
        }
    }
}

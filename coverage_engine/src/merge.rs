//! Order-independent merge of per-project coverage records.
//!
//! Every record reflects a distinct execution, so line and function hit
//! counts are additive evidence and always sum - never max, never overwrite.
//! A line instrumented in any record is instrumented in the merged model:
//! "present with 0 hits" beats "absent" when toolchain settings diverge
//! across projects.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{CoverageRecord, UnifiedCoverageModel};

/// Non-fatal disagreement observed while merging. The merge always proceeds;
/// conflicts surface in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub file: String,
    pub symbol: String,
    pub kept_line: u32,
    pub dropped_line: u32,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: function {} declared at line {} and line {}; kept {}",
            self.file, self.symbol, self.kept_line, self.dropped_line, self.kept_line
        )
    }
}

/// Diagnostics accumulated across one merge run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDiagnostics {
    pub records_merged: usize,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeDiagnostics {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Merge any number of coverage records into one unified model.
///
/// The result is independent of record order: entries land in ordered maps
/// keyed by file path, line number, and canonical symbol, and hit counts
/// sum. Merging zero records yields an empty model.
pub fn merge(
    records: impl IntoIterator<Item = CoverageRecord>,
) -> (UnifiedCoverageModel, MergeDiagnostics) {
    let mut model = UnifiedCoverageModel::default();
    let mut diagnostics = MergeDiagnostics::default();

    for record in records {
        model.absorb(&record, &mut diagnostics.conflicts);
        diagnostics.records_merged += 1;
    }

    // Sorted and deduplicated so diagnostics render in a stable order.
    diagnostics.conflicts.sort_by(|a, b| {
        (&a.file, &a.symbol, a.kept_line, a.dropped_line).cmp(&(
            &b.file,
            &b.symbol,
            b.kept_line,
            b.dropped_line,
        ))
    });
    diagnostics.conflicts.dedup();

    for conflict in &diagnostics.conflicts {
        warn!(
            file = %conflict.file,
            symbol = %conflict.symbol,
            kept_line = conflict.kept_line,
            dropped_line = conflict.dropped_line,
            "start line mismatch while merging function coverage",
        );
    }

    (model, diagnostics)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::model::{FileCoverage, FunctionCoverage, LineCoverage};

    fn record(project: &str, path: &str, lines: &[(u32, u64)]) -> CoverageRecord {
        CoverageRecord {
            project: project.into(),
            files: vec![FileCoverage {
                path: path.into(),
                lines: lines
                    .iter()
                    .map(|&(line, hits)| LineCoverage { line, hits })
                    .collect(),
                functions: Vec::new(),
            }],
        }
    }

    #[test]
    fn merge__zero_records__then_empty_model() {
        let (model, diagnostics) = merge(Vec::new());
        assert!(model.is_empty());
        assert_eq!(diagnostics.records_merged, 0);
        assert!(!diagnostics.has_conflicts());
    }

    #[test]
    fn merge__overlapping_lines__then_hits_sum() {
        let a = record("p1", "src/a.rs", &[(10, 2)]);
        let b = record("p2", "src/a.rs", &[(10, 3)]);
        let (model, _) = merge([a, b]);
        assert_eq!(model.files["src/a.rs"].lines[&10], 5);
    }

    #[test]
    fn merge__instrumented_zero_vs_absent__then_line_kept() {
        let a = record("p1", "src/a.rs", &[(4, 0)]);
        let b = record("p2", "src/a.rs", &[]);
        let (model, _) = merge([a, b]);
        assert_eq!(model.files["src/a.rs"].lines.get(&4), Some(&0));
    }

    #[test]
    fn merge__two_project_scenario__then_expected_unified_model() {
        let p1 = record("p1", "src/a.rs", &[(1, 1)]);
        let mut p2 = record("p2", "src/a.rs", &[(1, 4)]);
        p2.files.push(FileCoverage {
            path: "src/b.rs".into(),
            lines: vec![LineCoverage { line: 5, hits: 0 }],
            functions: Vec::new(),
        });

        let (model, diagnostics) = merge([p1, p2]);

        assert_eq!(model.file_count(), 2);
        assert_eq!(model.files["src/a.rs"].lines[&1], 5);
        assert_eq!(model.files["src/b.rs"].lines[&5], 0);
        assert!(!diagnostics.has_conflicts());
    }

    #[test]
    fn merge__record_order_permuted__then_models_identical() {
        let a = record("a", "src/x.rs", &[(1, 1), (2, 0)]);
        let b = record("b", "src/x.rs", &[(1, 2), (3, 7)]);
        let c = record("c", "src/y.rs", &[(1, 9)]);

        let (abc, _) = merge([a.clone(), b.clone(), c.clone()]);
        let (cab, _) = merge([c.clone(), a.clone(), b.clone()]);
        let (bac, _) = merge([b, a, c]);

        assert_eq!(abc, cab);
        assert_eq!(abc, bac);
    }

    #[test]
    fn merge__with_empty_record__then_identity() {
        let a = record("a", "src/x.rs", &[(1, 1)]);
        let empty = CoverageRecord::new("empty");
        let (with_empty, _) = merge([a.clone(), empty]);
        let (alone, _) = merge([a]);
        assert_eq!(with_empty, alone);
    }

    #[test]
    fn merge__function_start_line_mismatch__then_lowest_kept_and_flagged() {
        let mk = |project: &str, start_line: u32, hits: u64| CoverageRecord {
            project: project.into(),
            files: vec![FileCoverage {
                path: "src/lib.rs".into(),
                lines: Vec::new(),
                functions: vec![FunctionCoverage {
                    name: "alpha::run".into(),
                    start_line,
                    hits,
                }],
            }],
        };

        let (model, diagnostics) = merge([mk("p1", 14, 2), mk("p2", 18, 3)]);

        let f = &model.files["src/lib.rs"].functions["alpha::run"];
        assert_eq!(f.start_line, 14);
        assert_eq!(f.hits, 5);
        assert_eq!(
            diagnostics.conflicts,
            vec![MergeConflict {
                file: "src/lib.rs".into(),
                symbol: "alpha::run".into(),
                kept_line: 14,
                dropped_line: 18,
            }]
        );
    }

    #[test]
    fn merge__function_hits_across_projects__then_summed_by_symbol() {
        let mk = |project: &str, hits: u64| CoverageRecord {
            project: project.into(),
            files: vec![FileCoverage {
                path: "src/shared.rs".into(),
                lines: Vec::new(),
                functions: vec![FunctionCoverage {
                    name: "shared::init".into(),
                    start_line: 3,
                    hits,
                }],
            }],
        };

        let (model, diagnostics) = merge([mk("p1", 1), mk("p2", 0), mk("p3", 6)]);

        let f = &model.files["src/shared.rs"].functions["shared::init"];
        assert_eq!(f.hits, 7);
        assert_eq!(f.start_line, 3);
        assert!(!diagnostics.has_conflicts());
    }
}

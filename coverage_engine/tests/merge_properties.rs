//! Property-based tests for the merge engine and the LCOV codec.
//!
//! Uses proptest to verify the merge contract holds for arbitrary records:
//! order independence, empty-record identity, hit-count additivity, and
//! write/parse round-trip stability.

use coverage_engine::lcov;
use coverage_engine::merge::merge;
use coverage_engine::model::{
    CoverageRecord, FileCoverage, FunctionCoverage, LineCoverage, UnifiedCoverageModel,
};
use proptest::prelude::*;

fn arb_line() -> impl Strategy<Value = LineCoverage> {
    (1u32..500, 0u64..50).prop_map(|(line, hits)| LineCoverage { line, hits })
}

fn arb_function() -> impl Strategy<Value = FunctionCoverage> {
    ("[a-z]{1,8}(::[a-z]{1,8})?", 1u32..200, 0u64..50).prop_map(|(name, start_line, hits)| {
        FunctionCoverage {
            name,
            start_line,
            hits,
        }
    })
}

fn arb_file() -> impl Strategy<Value = FileCoverage> {
    (
        "src/[a-z]{1,6}\\.rs",
        prop::collection::vec(arb_line(), 0..12),
        prop::collection::vec(arb_function(), 0..6),
    )
        .prop_map(|(path, lines, functions)| FileCoverage {
            path,
            lines,
            functions,
        })
}

fn arb_record() -> impl Strategy<Value = CoverageRecord> {
    prop::collection::vec(arb_file(), 0..5).prop_map(|files| {
        // File paths are unique within one record; keep the first of any
        // colliding path the generator produced.
        let mut seen = std::collections::HashSet::new();
        let files = files
            .into_iter()
            .filter(|f| seen.insert(f.path.clone()))
            .collect();
        CoverageRecord {
            project: String::new(),
            files,
        }
    })
}

proptest! {
    /// Merge is commutative: any permutation of the record list produces an
    /// identical unified model.
    #[test]
    fn prop_merge_commutative(
        a in arb_record(),
        b in arb_record(),
        c in arb_record(),
    ) {
        let (abc, _) = merge([a.clone(), b.clone(), c.clone()]);
        let (cab, _) = merge([c.clone(), a.clone(), b.clone()]);
        let (bac, _) = merge([b, a, c]);
        prop_assert_eq!(&abc, &cab);
        prop_assert_eq!(&abc, &bac);
    }

    /// Merging an empty record is an identity.
    #[test]
    fn prop_merge_empty_identity(a in arb_record()) {
        let (with_empty, _) = merge([a.clone(), CoverageRecord::default()]);
        let (alone, _) = merge([a]);
        prop_assert_eq!(with_empty, alone);
    }

    /// Merge is associative: folding a pre-merged pair with the third record
    /// equals merging all three at once.
    #[test]
    fn prop_merge_associative(
        a in arb_record(),
        b in arb_record(),
        c in arb_record(),
    ) {
        let (ab, _) = merge([a.clone(), b.clone()]);
        let (ab_then_c, _) = merge([ab.to_record(), c.clone()]);
        let (abc, _) = merge([a, b, c]);
        prop_assert_eq!(ab_then_c, abc);
    }

    /// Per-line hit counts in the merged model are the sum across records.
    #[test]
    fn prop_merge_additive(
        hits_a in 0u64..1000,
        hits_b in 0u64..1000,
    ) {
        let mk = |hits| CoverageRecord {
            project: String::new(),
            files: vec![FileCoverage {
                path: "src/a.rs".into(),
                lines: vec![LineCoverage { line: 10, hits }],
                functions: Vec::new(),
            }],
        };
        let (model, _) = merge([mk(hits_a), mk(hits_b)]);
        prop_assert_eq!(model.files["src/a.rs"].lines[&10], hits_a + hits_b);
    }

    /// Writing a model and parsing the output reproduces the model exactly.
    #[test]
    fn prop_write_parse_roundtrip(a in arb_record(), b in arb_record()) {
        let (model, _) = merge([a, b]);
        let written = lcov::write_model(&model);
        let reparsed = lcov::parse(&written).expect("written output parses");
        prop_assert_eq!(UnifiedCoverageModel::from_record(&reparsed), model);
    }

    /// The writer is deterministic: two serializations are byte-identical.
    #[test]
    fn prop_write_deterministic(a in arb_record()) {
        let (model, _) = merge([a]);
        prop_assert_eq!(lcov::write_model(&model), lcov::write_model(&model));
    }
}

//! Canonical symbol names across toolchains.
//!
//! Independent compilations of the same logical function mangle its name
//! differently (the legacy scheme appends a per-compilation `h<hash>`
//! disambiguator), so records from two projects only merge correctly after
//! every function name is rewritten to one canonical form.
//!
//! Normalization is a pure function over the input string: identical input
//! always yields identical output, across projects and runs. Formats the
//! normalizer does not understand pass through unchanged - a record never
//! fails because of an exotic symbol - and the number of such passthroughs
//! is reported for diagnostics.

use std::borrow::Cow;

use rustc_demangle::try_demangle;
use tracing::debug;

use crate::model::CoverageRecord;

/// Rewrite one raw symbol to its canonical display name.
///
/// - Rust mangled names (legacy `_ZN..E` and v0 `_R..`, with or without an
///   extra leading underscore) demangle with the trailing disambiguator hash
///   dropped.
/// - Already-demangled names carrying a `::h<16 hex>` suffix have the suffix
///   stripped.
/// - Everything else is returned as-is.
pub fn normalize_symbol(raw: &str) -> Cow<'_, str> {
    if let Ok(demangled) = try_demangle(raw) {
        // Alternate formatting omits the trailing hash.
        return Cow::Owned(format!("{demangled:#}"));
    }
    if let Some(stripped) = strip_hash_suffix(raw) {
        return Cow::Borrowed(stripped);
    }
    Cow::Borrowed(raw)
}

/// True when the symbol carries a mangling prefix the normalizer failed to
/// decode (e.g. Itanium C++). These count as passthroughs in the run summary.
pub fn is_passthrough(raw: &str) -> bool {
    let looks_mangled = ["_Z", "__Z", "_R", "__R"]
        .iter()
        .any(|prefix| raw.starts_with(prefix));
    looks_mangled && try_demangle(raw).is_err()
}

/// Normalize every function symbol in a record.
///
/// Returns the normalized record and the count of mangled-looking symbols
/// that passed through undecoded.
pub fn normalize_record(mut record: CoverageRecord) -> (CoverageRecord, usize) {
    let mut passthrough = 0usize;
    for file in &mut record.files {
        for function in &mut file.functions {
            if is_passthrough(&function.name) {
                passthrough += 1;
                debug!(
                    file = %file.path,
                    symbol = %function.name,
                    "symbol format not recognized, passing through",
                );
                continue;
            }
            let canonical = normalize_symbol(&function.name);
            if canonical != function.name {
                function.name = canonical.into_owned();
            }
        }
        // Distinct mangled names can collapse to one canonical symbol;
        // re-register so the record keeps one entry per name.
        if has_duplicate_names(&file.functions) {
            let mut collapsed: Vec<crate::model::FunctionCoverage> = Vec::new();
            for f in file.functions.drain(..) {
                if let Some(existing) = collapsed.iter_mut().find(|c| c.name == f.name) {
                    existing.hits += f.hits;
                    if existing.start_line == 0
                        || (f.start_line != 0 && f.start_line < existing.start_line)
                    {
                        existing.start_line = f.start_line;
                    }
                } else {
                    collapsed.push(f);
                }
            }
            file.functions = collapsed;
        }
    }
    (record, passthrough)
}

/// Strip a trailing `::h<16 hex>` disambiguator from an already-demangled
/// name. Returns `None` when no such suffix is present.
fn strip_hash_suffix(name: &str) -> Option<&str> {
    let idx = name.rfind("::h")?;
    let hash = &name[idx + 3..];
    if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(&name[..idx])
    } else {
        None
    }
}

fn has_duplicate_names(functions: &[crate::model::FunctionCoverage]) -> bool {
    let mut seen = std::collections::HashSet::new();
    functions.iter().any(|f| !seen.insert(f.name.as_str()))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::model::{FileCoverage, FunctionCoverage};

    #[test]
    fn normalize_symbol__legacy_rust_mangling__then_canonical_without_hash() {
        let raw = "_ZN4core3fmt5write17h0123456789abcdefE";
        assert_eq!(normalize_symbol(raw), "core::fmt::write");
    }

    #[test]
    fn normalize_symbol__v0_rust_mangling__then_canonical() {
        let raw = "_RNvCskwGfYPst2Cb_3foo16example_function";
        assert_eq!(normalize_symbol(raw), "foo::example_function");
    }

    #[test]
    fn normalize_symbol__demangled_with_hash_suffix__then_suffix_stripped() {
        assert_eq!(
            normalize_symbol("alpha::run::h0123456789abcdef"),
            "alpha::run"
        );
    }

    #[test]
    fn normalize_symbol__plain_name__then_unchanged() {
        assert_eq!(normalize_symbol("main"), "main");
        assert!(!is_passthrough("main"));
    }

    #[test]
    fn normalize_symbol__itanium_cpp__then_passthrough_counted() {
        let raw = "_ZN3fooC1Ev";
        assert_eq!(normalize_symbol(raw), raw);
        assert!(is_passthrough(raw));
    }

    #[test]
    fn normalize_symbol__is_pure__then_identical_across_calls() {
        let raw = "_ZN4core3fmt5write17h0123456789abcdefE";
        assert_eq!(normalize_symbol(raw), normalize_symbol(raw));
    }

    #[test]
    fn normalize_record__two_compilations_of_same_function__then_collapsed() {
        let record = CoverageRecord {
            project: "p".into(),
            files: vec![FileCoverage {
                path: "src/shared.rs".into(),
                lines: Vec::new(),
                functions: vec![
                    FunctionCoverage {
                        name: "_ZN6shared4init17haaaaaaaaaaaaaaaaE".into(),
                        start_line: 4,
                        hits: 2,
                    },
                    FunctionCoverage {
                        name: "_ZN6shared4init17hbbbbbbbbbbbbbbbbE".into(),
                        start_line: 4,
                        hits: 3,
                    },
                ],
            }],
        };

        let (normalized, passthrough) = normalize_record(record);

        assert_eq!(passthrough, 0);
        assert_eq!(
            normalized.files[0].functions,
            vec![FunctionCoverage {
                name: "shared::init".into(),
                start_line: 4,
                hits: 5,
            }]
        );
    }

    #[test]
    fn normalize_record__unknown_formats__then_counted_not_failed() {
        let record = CoverageRecord {
            project: "p".into(),
            files: vec![FileCoverage {
                path: "native/lib.cpp".into(),
                lines: Vec::new(),
                functions: vec![
                    FunctionCoverage {
                        name: "_ZN3fooC1Ev".into(),
                        start_line: 1,
                        hits: 1,
                    },
                    FunctionCoverage {
                        name: "plain_c_symbol".into(),
                        start_line: 8,
                        hits: 0,
                    },
                ],
            }],
        };

        let (normalized, passthrough) = normalize_record(record);

        assert_eq!(passthrough, 1);
        assert_eq!(normalized.files[0].functions[0].name, "_ZN3fooC1Ev");
        assert_eq!(normalized.files[0].functions[1].name, "plain_c_symbol");
    }
}

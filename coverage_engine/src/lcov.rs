//! LCOV tracefile parser and deterministic writer.
//!
//! The interchange format between collectors, the merge engine, and the
//! renderer is the LCOV tracefile subset emitted by `llvm-cov export
//! -format=lcov`: one `SF:`..`end_of_record` block per source file with
//! `FN:`/`FNDA:` function entries and `DA:` line entries. Branch tags and
//! the derived summary tags (`LF`, `LH`, `FNF`, `FNH`) are skipped on parse
//! and recomputed on write.
//!
//! Writing is byte-stable: the same model always serializes to identical
//! output, so downstream diffs of the merged tracefile stay meaningful.

use std::collections::{btree_map::Entry, BTreeMap, HashSet};
use std::fmt::Write as _;

use thiserror::Error;

use crate::model::{
    CoverageRecord, FileCoverage, FunctionCoverage, LineCoverage, UnifiedCoverageModel,
};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: unknown tag: {content}")]
    UnknownTag { line: usize, content: String },
    #[error("line {line}: entry outside of a file record: {content}")]
    OutsideRecord { line: usize, content: String },
    #[error("line {line}: malformed {tag} entry: {content}")]
    Malformed {
        line: usize,
        tag: &'static str,
        content: String,
    },
    #[error("line {line}: duplicate file record: {path}")]
    DuplicateFile { line: usize, path: String },
    #[error("unterminated file record: {path} (missing end_of_record)")]
    Unterminated { path: String },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse an LCOV tracefile into a [`CoverageRecord`].
///
/// Malformed entries are rejected with the 1-based line number and the
/// offending content; data is never silently dropped. Duplicate or unordered
/// `DA:` lines within a file are accepted - ordering and uniqueness are
/// restored when the record is merged or written.
pub fn parse(source: &str) -> ParseResult<CoverageRecord> {
    let mut record = CoverageRecord::default();
    let mut seen_paths: HashSet<String> = HashSet::new();
    let mut current: Option<FileCoverage> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix("SF:") {
            if let Some(open) = current.take() {
                // An SF while a record is open means the previous record
                // never closed.
                return Err(ParseError::Unterminated { path: open.path });
            }
            if !seen_paths.insert(path.to_string()) {
                return Err(ParseError::DuplicateFile {
                    line: line_no,
                    path: path.to_string(),
                });
            }
            current = Some(FileCoverage::new(path));
        } else if line == "end_of_record" {
            match current.take() {
                Some(file) => record.files.push(file),
                None => {
                    return Err(ParseError::OutsideRecord {
                        line: line_no,
                        content: line.to_string(),
                    })
                }
            }
        } else if let Some(rest) = line.strip_prefix("DA:") {
            let file = open_record(&mut current, line_no, line)?;
            let (line_str, hits_str) =
                rest.split_once(',')
                    .ok_or_else(|| ParseError::Malformed {
                        line: line_no,
                        tag: "DA",
                        content: line.to_string(),
                    })?;
            let entry = LineCoverage {
                line: parse_number(line_str, line_no, "DA", line)?,
                hits: parse_number(hits_str, line_no, "DA", line)?,
            };
            file.lines.push(entry);
        } else if let Some(rest) = line.strip_prefix("FN:") {
            let file = open_record(&mut current, line_no, line)?;
            let (start_str, name) =
                rest.split_once(',')
                    .ok_or_else(|| ParseError::Malformed {
                        line: line_no,
                        tag: "FN",
                        content: line.to_string(),
                    })?;
            let start_line: u32 = parse_number(start_str, line_no, "FN", line)?;
            register_function(file, name, start_line, 0);
        } else if let Some(rest) = line.strip_prefix("FNDA:") {
            let file = open_record(&mut current, line_no, line)?;
            let (hits_str, name) =
                rest.split_once(',')
                    .ok_or_else(|| ParseError::Malformed {
                        line: line_no,
                        tag: "FNDA",
                        content: line.to_string(),
                    })?;
            let hits: u64 = parse_number(hits_str, line_no, "FNDA", line)?;
            register_function(file, name, 0, hits);
        } else if is_skipped_tag(line) {
            // Test names, branch data, and derived summaries carry no
            // information the model keeps.
        } else {
            return Err(ParseError::UnknownTag {
                line: line_no,
                content: line.to_string(),
            });
        }
    }

    if let Some(open) = current {
        return Err(ParseError::Unterminated { path: open.path });
    }

    Ok(record)
}

/// Serialize a record in storage order: files lexicographic by path, lines
/// ascending with duplicate entries summed, `FN:` by (start line, symbol),
/// `FNDA:` by symbol, summary tags recomputed.
pub fn write_record(record: &CoverageRecord) -> String {
    let mut files: Vec<&FileCoverage> = record.files.iter().collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut out = String::new();
    for file in files {
        let _ = writeln!(out, "SF:{}", file.path);

        // Canonicalize within the file: duplicate entries collapse exactly
        // the way the merge collapses them.
        let mut lines: BTreeMap<u32, u64> = BTreeMap::new();
        for lc in &file.lines {
            *lines.entry(lc.line).or_insert(0) += lc.hits;
        }
        let mut functions: BTreeMap<&str, (u32, u64)> = BTreeMap::new();
        for fc in &file.functions {
            match functions.entry(fc.name.as_str()) {
                Entry::Vacant(slot) => {
                    slot.insert((fc.start_line, fc.hits));
                }
                Entry::Occupied(mut slot) => {
                    let (start_line, hits) = slot.get_mut();
                    *hits += fc.hits;
                    if *start_line == 0 || (fc.start_line != 0 && fc.start_line < *start_line) {
                        *start_line = fc.start_line;
                    }
                }
            }
        }

        let mut declarations: Vec<(&str, u32)> = functions
            .iter()
            .map(|(name, &(start_line, _))| (*name, start_line))
            .collect();
        declarations.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        for (name, start_line) in declarations {
            let _ = writeln!(out, "FN:{start_line},{name}");
        }
        for (name, (_, hits)) in &functions {
            let _ = writeln!(out, "FNDA:{hits},{name}");
        }
        let _ = writeln!(out, "FNF:{}", functions.len());
        let _ = writeln!(
            out,
            "FNH:{}",
            functions.values().filter(|(_, hits)| *hits > 0).count()
        );

        for (line, hits) in &lines {
            let _ = writeln!(out, "DA:{line},{hits}");
        }
        let _ = writeln!(out, "LF:{}", lines.len());
        let _ = writeln!(out, "LH:{}", lines.values().filter(|hits| **hits > 0).count());
        let _ = writeln!(out, "end_of_record");
    }
    out
}

/// Serialize the unified model. Equivalent to writing its storage-order
/// record flattening.
pub fn write_model(model: &UnifiedCoverageModel) -> String {
    write_record(&model.to_record())
}

fn open_record<'a>(
    current: &'a mut Option<FileCoverage>,
    line_no: usize,
    content: &str,
) -> ParseResult<&'a mut FileCoverage> {
    current.as_mut().ok_or_else(|| ParseError::OutsideRecord {
        line: line_no,
        content: content.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(
    value: &str,
    line_no: usize,
    tag: &'static str,
    content: &str,
) -> ParseResult<T> {
    value.trim().parse().map_err(|_| ParseError::Malformed {
        line: line_no,
        tag,
        content: content.to_string(),
    })
}

/// Combine `FN:` declarations and `FNDA:` hit entries that name the same
/// symbol. `FNDA:` before `FN:` is tolerated (lcov itself accepts it); the
/// start line stays 0 until a declaration supplies one.
fn register_function(file: &mut FileCoverage, name: &str, start_line: u32, hits: u64) {
    if let Some(existing) = file.functions.iter_mut().find(|f| f.name == name) {
        existing.hits += hits;
        if existing.start_line == 0 {
            existing.start_line = start_line;
        }
        return;
    }
    file.functions.push(FunctionCoverage {
        name: name.to_string(),
        start_line,
        hits,
    });
}

fn is_skipped_tag(line: &str) -> bool {
    const SKIPPED: [&str; 8] = [
        "TN:", "BRDA:", "BRF:", "BRH:", "LF:", "LH:", "FNF:", "FNH:",
    ];
    SKIPPED.iter().any(|tag| line.starts_with(tag))
}

//! Coverage aggregation engine.
//!
//! Building blocks for combining per-project coverage measurements into a
//! single unified report:
//!
//! - [`model`] - in-memory coverage data model
//! - [`lcov`] - LCOV tracefile parser and deterministic writer
//! - [`normalize`] - canonical symbol names across toolchains
//! - [`merge`] - order-independent merge of N records into one model
//!
//! The engine is purely computational: it never touches the filesystem or
//! spawns processes. Collection and publishing live in the CLI crate.

pub mod lcov;
pub mod merge;
pub mod model;
pub mod normalize;

pub use lcov::ParseError;
pub use merge::{merge, MergeConflict, MergeDiagnostics};
pub use model::{
    CoverageRecord, FileCoverage, FunctionCoverage, LineCoverage, UnifiedCoverageModel,
};

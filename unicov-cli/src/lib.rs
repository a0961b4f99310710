//! Unicov pipeline: per-project collection, merge, render, and atomic
//! publish of multi-project coverage reports.
//!
//! The computational core (model, LCOV codec, normalization, merge) lives in
//! the `coverage_engine` crate; this crate owns everything that touches the
//! outside world - processes, the filesystem, and the publish target.

pub mod collector;
pub mod config;
pub mod pipeline;
pub mod publisher;
pub mod summary;

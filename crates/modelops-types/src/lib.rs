//! # modelops-types
//!
//! Core type definitions for the modelops lifecycle orchestrator.
//!
//! This crate is the foundation of the dependency graph -- all other
//! modelops crates depend on it. It contains:
//!
//! - **[`error`]** -- [`ModelOpsError`] error type
//! - **[`config`]** -- Configuration schema (thresholds, retry policy, families)
//! - **[`run`]** -- Pipeline runs, stages and their results
//! - **[`model`]** -- Model versions, registry stage labels, evaluation metrics
//! - **[`decision`]** -- Promotion decisions and reason codes
//! - **[`job`]** -- External training/evaluation job descriptors
//! - **[`event`]** -- Terminal-run notifications

pub mod config;
pub mod decision;
pub mod error;
pub mod event;
pub mod job;
pub mod model;
pub mod run;

pub use error::{ModelOpsError, Result};

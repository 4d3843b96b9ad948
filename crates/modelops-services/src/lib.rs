//! Orchestration core for modelops.
//!
//! Drives each model family through the lifecycle pipeline: data
//! preparation, training, evaluation, registration, A/B decision,
//! promotion and notification. Runs, registry transitions, metrics and
//! decisions are persisted as append-only JSONL logs under the storage
//! directory.
//!
//! The [`orchestrator::Orchestrator`] wires the stores and services
//! together; the CLI is a thin layer over it.

pub mod decision;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod runs;
pub mod scheduler;
pub mod storage;

//! mediagate - cost-gated assessment for generated media
//!
//! Identifies each file by the SHA-256 of its bytes, reuses cached verdicts,
//! and runs the configured stages cheapest first under a shared budget.

pub mod asset;
pub mod budget;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod observe;
pub mod pipeline;
pub mod report;
pub mod stage;
pub mod ui;

pub use error::{MediagateError, MediagateResult};

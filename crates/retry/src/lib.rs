//! Retry orchestration for fallible async operations.
//!
//! This crate provides:
//! - [`Backoff`] strategies (fixed, linear, exponential) with optional jitter
//! - [`Retrier`], which drives an attempt function under a [`RetryPolicy`],
//!   a pluggable [`Classifier`] and a cancellation token
//! - [`RetryError`], the two synthetic failure kinds a retrier reports
//!   (plus cancellation), each carrying the underlying cause

pub mod backoff;
pub mod error;
pub mod retrier;

pub use backoff::Backoff;
pub use error::RetryError;
pub use retrier::{AlwaysRetry, Classifier, Retrier, RetryPolicy};
pub use tokio_util::sync::CancellationToken;

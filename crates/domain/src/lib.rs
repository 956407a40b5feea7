//! Order service layer.
//!
//! [`OrderService`] sits between the ingestion consumer, the HTTP handlers
//! and the [`order_store::AggregateStore`]: writes go through to storage and
//! into a bounded read cache, reads try the cache first.
//! [`AggregateValidator`] and [`StoreErrorClassifier`] are plain values the
//! caller constructs and passes where they are needed.

pub mod classifier;
pub mod error;
pub mod service;
pub mod validation;

pub use classifier::{StoreErrorClassifier, StoreRetrier};
pub use error::ValidationError;
pub use service::OrderService;
pub use validation::AggregateValidator;

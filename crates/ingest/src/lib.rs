//! Order ingestion.
//!
//! A [`Consumer`] pulls JSON payloads from a [`MessageSource`], decodes and
//! validates them, and hands each aggregate to the order service under a
//! retry policy. Malformed or invalid payloads are logged and skipped; the
//! loop only stops on cancellation or when the source is exhausted.

pub mod consumer;
pub mod source;

pub use consumer::{Consumer, ConsumerState, ConsumerStats};
pub use source::{ChannelSource, KafkaSource, KafkaSourceConfig, MessageSource, SourceError};

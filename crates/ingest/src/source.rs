//! Message sources feeding the consumer.

use std::sync::{Arc, Mutex as StdMutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rdkafka::{
    Message,
    config::ClientConfig,
    consumer::{Consumer as _, StreamConsumer},
    error::KafkaError,
};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

/// Errors produced while reading from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source is exhausted or was closed; no further messages will arrive.
    #[error("message source closed")]
    Closed,

    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// A recoverable read failure from any other transport.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A lazy, possibly unbounded sequence of byte payloads.
///
/// `next_message` must be safe to drop mid-await so the consumer can race it
/// against cancellation.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Waits for the next payload.
    async fn next_message(&self) -> Result<Vec<u8>, SourceError>;

    /// Marks the last payload returned by `next_message` as handled.
    ///
    /// A payload that is never acknowledged is delivered again after a
    /// restart.
    async fn ack(&self) -> Result<(), SourceError>;

    /// Releases the underlying resources. Safe to call more than once.
    async fn close(&self) -> Result<(), SourceError>;
}

#[async_trait]
impl<M: MessageSource + ?Sized> MessageSource for Arc<M> {
    async fn next_message(&self) -> Result<Vec<u8>, SourceError> {
        (**self).next_message().await
    }

    async fn ack(&self) -> Result<(), SourceError> {
        (**self).ack().await
    }

    async fn close(&self) -> Result<(), SourceError> {
        (**self).close().await
    }
}

/// Connection settings for [`KafkaSource`].
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

/// Partition and offset of a received, not yet acknowledged message.
#[derive(Debug, Clone, Copy)]
struct Position {
    partition: i32,
    offset: i64,
}

/// Reads payloads from a Kafka topic as part of a consumer group.
///
/// Offsets are stored only on [`MessageSource::ack`]; auto-commit then
/// flushes whatever was stored.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    pending: StdMutex<Option<Position>>,
    closed: AtomicBool,
}

impl KafkaSource {
    /// Creates the consumer and subscribes to the configured topic.
    pub fn new(config: &KafkaSourceConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;
        tracing::info!(
            topic = %config.topic,
            group_id = %config.group_id,
            "subscribed to kafka topic"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            pending: StdMutex::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn next_message(&self) -> Result<Vec<u8>, SourceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SourceError::Closed);
        }
        let message = self.consumer.recv().await?;
        let position = Position {
            partition: message.partition(),
            offset: message.offset(),
        };
        *self
            .pending
            .lock()
            .map_err(|_| SourceError::Transport("offset tracker poisoned".to_string()))? =
            Some(position);
        Ok(message.payload().map(<[u8]>::to_vec).unwrap_or_default())
    }

    async fn ack(&self) -> Result<(), SourceError> {
        let position = self
            .pending
            .lock()
            .map_err(|_| SourceError::Transport("offset tracker poisoned".to_string()))?
            .take();
        if let Some(Position { partition, offset }) = position {
            self.consumer.store_offset(&self.topic, partition, offset)?;
            tracing::debug!(partition, offset, "offset stored");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.consumer.unsubscribe();
            tracing::info!(topic = %self.topic, "kafka source closed");
        }
        Ok(())
    }
}

/// An in-process source backed by a tokio channel.
///
/// Reports [`SourceError::Closed`] once every sender is dropped and the
/// buffer is drained, or after [`MessageSource::close`].
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl ChannelSource {
    /// Creates a source and the sender that feeds it.
    pub fn new(buffer: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::from_receiver(rx))
    }

    pub fn from_receiver(receiver: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&self) -> Result<Vec<u8>, SourceError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.as_mut() {
            Some(rx) => rx.recv().await.ok_or(SourceError::Closed),
            None => Err(SourceError::Closed),
        }
    }

    async fn ack(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.receiver.lock().await.take();
        Ok(())
    }
}

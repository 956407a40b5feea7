use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::OrderAggregate;
use domain::{AggregateValidator, OrderService, StoreRetrier};
use order_store::AggregateStore;
use retry::{CancellationToken, RetryError};

use crate::{MessageSource, SourceError};

/// Whether a consumer loop is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    Stopped,
}

/// Per-outcome message counts for one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages stored (or recognised as already stored).
    pub processed: u64,
    /// Messages dropped because they failed to decode or validate.
    pub skipped: u64,
    /// Valid messages that could not be stored within the retry budget.
    pub failed: u64,
}

enum Outcome {
    Processed,
    Skipped,
    Failed,
    Cancelled,
}

/// Feeds decoded, validated aggregates from a source into the order service.
pub struct Consumer<S, M> {
    source: M,
    service: Arc<OrderService<S>>,
    retrier: StoreRetrier,
    validator: AggregateValidator,
    running: AtomicBool,
}

impl<S, M> Consumer<S, M>
where
    S: AggregateStore,
    M: MessageSource,
{
    pub fn new(
        source: M,
        service: Arc<OrderService<S>>,
        retrier: StoreRetrier,
        validator: AggregateValidator,
    ) -> Self {
        Self {
            source,
            service,
            retrier,
            validator,
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConsumerState {
        if self.running.load(Ordering::SeqCst) {
            ConsumerState::Running
        } else {
            ConsumerState::Stopped
        }
    }

    /// Processes messages until `cancel` fires or the source is exhausted.
    pub async fn run(&self, cancel: &CancellationToken) -> ConsumerStats {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("consumer started");
        let mut stats = ConsumerStats::default();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("consumer stopped by cancellation");
                    break;
                }
                next = self.source.next_message() => next,
            };

            let payload = match next {
                Ok(payload) => payload,
                Err(SourceError::Closed) => {
                    tracing::info!("message source exhausted, consumer stopping");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "error reading message");
                    continue;
                }
            };

            let outcome = self.handle(&payload, cancel).await;
            if !matches!(outcome, Outcome::Cancelled)
                && let Err(err) = self.source.ack().await
            {
                tracing::error!(error = %err, "failed to acknowledge message");
            }

            match outcome {
                Outcome::Processed => {
                    stats.processed += 1;
                    metrics::counter!("consumer_messages_total", "outcome" => "processed")
                        .increment(1);
                }
                Outcome::Skipped => {
                    stats.skipped += 1;
                    metrics::counter!("consumer_messages_total", "outcome" => "skipped")
                        .increment(1);
                }
                Outcome::Failed => {
                    stats.failed += 1;
                    metrics::counter!("consumer_messages_total", "outcome" => "failed")
                        .increment(1);
                }
                Outcome::Cancelled => {
                    // left unacknowledged so the message is redelivered
                    tracing::info!("consumer stopped by cancellation");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!(
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "consumer stopped"
        );
        stats
    }

    /// Releases the source. Safe to call more than once.
    pub async fn close(&self) -> Result<(), SourceError> {
        self.source.close().await
    }

    async fn handle(&self, payload: &[u8], cancel: &CancellationToken) -> Outcome {
        let aggregate: OrderAggregate = match serde_json::from_slice(payload) {
            Ok(aggregate) => aggregate,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    payload = %String::from_utf8_lossy(payload),
                    "invalid order json, skipping message"
                );
                return Outcome::Skipped;
            }
        };

        if let Err(err) = self.validator.validate(&aggregate) {
            tracing::warn!(error = %err, "invalid order, skipping message");
            return Outcome::Skipped;
        }

        let order_uid = aggregate.order.order_uid.as_str();
        tracing::info!(order_uid, "creating order");

        let service = &*self.service;
        let result = self
            .retrier
            .run(cancel, |_attempt| {
                let mut aggregate = aggregate.clone();
                async move { service.create(&mut aggregate).await }
            })
            .await;

        match result {
            Ok(id) => {
                tracing::info!(order_id = %id, order_uid, "order created");
                Outcome::Processed
            }
            Err(RetryError::Cancelled) => Outcome::Cancelled,
            Err(err) => {
                tracing::error!(order_uid, error = %err, "failed to create order");
                Outcome::Failed
            }
        }
    }
}

//! Consumer tests driving the full ingestion path over in-process sources.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, fixtures::sample_aggregate};
use domain::{AggregateValidator, OrderService, StoreErrorClassifier, StoreRetrier};
use ingest::{ChannelSource, Consumer, ConsumerState, ConsumerStats, MessageSource, SourceError};
use order_store::{ErrorKind, InMemoryAggregateStore, Operation};
use retry::{Backoff, CancellationToken, RetryPolicy};
use tokio::sync::Mutex;

fn retrier(max_attempts: u32) -> StoreRetrier {
    StoreRetrier::from_policy(
        RetryPolicy {
            max_attempts,
            backoff: Backoff::fixed(Duration::from_millis(1)),
        },
        StoreErrorClassifier,
    )
}

fn service() -> Arc<OrderService<InMemoryAggregateStore>> {
    Arc::new(OrderService::new(InMemoryAggregateStore::new(), 100))
}

fn payload(order_uid: &str, items: usize) -> Vec<u8> {
    serde_json::to_vec(&sample_aggregate(order_uid, items, 0)).unwrap()
}

/// Replays a fixed script of read results, then reports closed.
struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<u8>, SourceError>>>,
    acks: AtomicU32,
}

impl ScriptedSource {
    fn new(script: impl IntoIterator<Item = Result<Vec<u8>, SourceError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            acks: AtomicU32::new(0),
        }
    }

    fn acks(&self) -> u32 {
        self.acks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn next_message(&self) -> Result<Vec<u8>, SourceError> {
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(SourceError::Closed))
    }

    async fn ack(&self) -> Result<(), SourceError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.script.lock().await.clear();
        Ok(())
    }
}

#[tokio::test]
async fn malformed_payload_is_skipped_and_next_is_stored() {
    let service = service();
    let (tx, source) = ChannelSource::new(8);
    let consumer = Consumer::new(
        source,
        Arc::clone(&service),
        retrier(3),
        AggregateValidator::new(),
    );

    tx.send(b"{not json".to_vec()).await.unwrap();
    tx.send(payload("e2e-valid", 3)).await.unwrap();
    drop(tx);

    let stats = consumer.run(&CancellationToken::new()).await;

    assert_eq!(
        stats,
        ConsumerStats {
            processed: 1,
            skipped: 1,
            failed: 0,
        }
    );
    let stored = service.get(OrderId::new(1)).await.unwrap();
    assert_eq!(stored.order.order_uid, "e2e-valid");
    assert_eq!(stored.items.len(), 3);
}

#[tokio::test]
async fn invalid_aggregate_is_skipped() {
    let service = service();
    let (tx, source) = ChannelSource::new(8);
    let consumer = Consumer::new(
        source,
        Arc::clone(&service),
        retrier(3),
        AggregateValidator::new(),
    );

    let no_items = sample_aggregate("no-items", 0, 0);
    tx.send(serde_json::to_vec(&no_items).unwrap()).await.unwrap();
    drop(tx);

    let stats = consumer.run(&CancellationToken::new()).await;

    assert_eq!(stats.skipped, 1);
    assert_eq!(service.store().transactions_started(), 0);
}

#[tokio::test]
async fn redelivered_message_stores_once() {
    let service = service();
    let (tx, source) = ChannelSource::new(8);
    let consumer = Consumer::new(
        source,
        Arc::clone(&service),
        retrier(3),
        AggregateValidator::new(),
    );

    tx.send(payload("twice", 2)).await.unwrap();
    tx.send(payload("twice", 2)).await.unwrap();
    drop(tx);

    let stats = consumer.run(&CancellationToken::new()).await;

    assert_eq!(stats.processed, 2);
    assert_eq!(service.store().counts().await.orders, 1);
}

#[tokio::test]
async fn exhausted_create_is_counted_and_loop_continues() {
    let service = service();
    service
        .store()
        .fail_next(Operation::InsertDelivery, ErrorKind::Unavailable, 2);
    let (tx, source) = ChannelSource::new(8);
    let consumer = Consumer::new(
        source,
        Arc::clone(&service),
        retrier(2),
        AggregateValidator::new(),
    );

    tx.send(payload("unlucky", 1)).await.unwrap();
    tx.send(payload("lucky", 1)).await.unwrap();
    drop(tx);

    let stats = consumer.run(&CancellationToken::new()).await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(service.store().counts().await.orders, 1);
}

#[tokio::test]
async fn transport_errors_do_not_stop_the_loop() {
    let service = service();
    let source = ScriptedSource::new([
        Err(SourceError::Transport("broker went away".to_string())),
        Ok(payload("after-error", 1)),
    ]);
    let consumer = Consumer::new(
        source,
        Arc::clone(&service),
        retrier(3),
        AggregateValidator::new(),
    );

    let stats = consumer.run(&CancellationToken::new()).await;

    assert_eq!(stats.processed, 1);
}

#[tokio::test]
async fn cancellation_stops_an_idle_consumer() {
    let (_tx, source) = ChannelSource::new(8);
    let consumer = Arc::new(Consumer::new(
        source,
        service(),
        retrier(3),
        AggregateValidator::new(),
    ));
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        let cancel = cancel.clone();
        async move { consumer.run(&cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(consumer.state(), ConsumerState::Running);

    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stats, ConsumerStats::default());
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    consumer.close().await.unwrap();
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn cancellation_during_backoff_stops_the_loop() {
    let service = service();
    service
        .store()
        .fail_next(Operation::Begin, ErrorKind::Unavailable, 100);
    let (tx, source) = ChannelSource::new(8);
    let slow = StoreRetrier::from_policy(
        RetryPolicy {
            max_attempts: 0,
            backoff: Backoff::fixed(Duration::from_secs(30)),
        },
        StoreErrorClassifier,
    );
    let consumer = Consumer::new(source, service, slow, AggregateValidator::new());
    tx.send(payload("stuck", 1)).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let stats = tokio::time::timeout(Duration::from_secs(5), consumer.run(&cancel))
        .await
        .unwrap();

    assert_eq!(stats.processed + stats.failed, 0);
}

#[tokio::test]
async fn every_finished_message_is_acknowledged() {
    let service = service();
    service
        .store()
        .fail_next(Operation::Begin, ErrorKind::Unavailable, 1);
    let source = Arc::new(ScriptedSource::new([
        Ok(b"{not json".to_vec()),
        Ok(payload("acked-failed", 1)),
        Ok(payload("acked-stored", 1)),
    ]));
    let consumer = Consumer::new(
        Arc::clone(&source),
        Arc::clone(&service),
        retrier(1),
        AggregateValidator::new(),
    );

    let stats = consumer.run(&CancellationToken::new()).await;

    assert_eq!(
        stats,
        ConsumerStats {
            processed: 1,
            skipped: 1,
            failed: 1,
        }
    );
    assert_eq!(source.acks(), 3);
}

#[tokio::test]
async fn message_interrupted_by_cancellation_is_not_acknowledged() {
    let service = service();
    service
        .store()
        .fail_next(Operation::Begin, ErrorKind::Unavailable, 100);
    let source = Arc::new(ScriptedSource::new([Ok(payload("in-flight", 1))]));
    let slow = StoreRetrier::from_policy(
        RetryPolicy {
            max_attempts: 0,
            backoff: Backoff::fixed(Duration::from_secs(30)),
        },
        StoreErrorClassifier,
    );
    let consumer = Consumer::new(
        Arc::clone(&source),
        service,
        slow,
        AggregateValidator::new(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), consumer.run(&cancel))
        .await
        .unwrap();

    assert_eq!(source.acks(), 0);
}

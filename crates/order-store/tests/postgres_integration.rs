//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::fixtures::sample_aggregate;
use order_store::{
    AggregateStore, DeliveryStore, ErrorKind, ItemStore, OrderId, OrderStore, PgAggregateStore,
    TxScope,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_orders_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PgAggregateStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE items, orders, payment, delivery RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    PgAggregateStore::new(pool)
}

fn unique_uid() -> String {
    format!("order-{}", uuid::Uuid::new_v4().simple())
}

async fn count(store: &PgAggregateStore, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn create_and_read_back_aggregate() {
    let store = get_test_store().await;
    let mut aggregate = sample_aggregate(&unique_uid(), 3, 0);

    let id = store.create_aggregate(&mut aggregate).await.unwrap();
    let loaded = store.get_aggregate(id).await.unwrap();

    assert_eq!(loaded.items.len(), 3);
    assert_eq!(loaded.order.delivery_id, loaded.delivery.id);
    assert_eq!(loaded.order.payment_id, loaded.payment.id);
    assert!(loaded.items.iter().all(|item| item.order_id == id.as_i64()));
    assert_eq!(loaded, aggregate);
}

#[tokio::test]
async fn duplicate_uid_returns_existing_and_writes_nothing() {
    let store = get_test_store().await;
    let uid = unique_uid();
    let mut first = sample_aggregate(&uid, 2, 0);
    let mut second = sample_aggregate(&uid, 4, 30);

    let first_id = store.create_aggregate(&mut first).await.unwrap();
    let second_id = store.create_aggregate(&mut second).await.unwrap();

    assert_eq!(first_id, second_id);
    assert_eq!(second, first);
    assert_eq!(count(&store, "orders").await, 1);
    assert_eq!(count(&store, "delivery").await, 1);
    assert_eq!(count(&store, "payment").await, 1);
    assert_eq!(count(&store, "items").await, 2);
}

#[tokio::test]
async fn missing_and_invalid_ids() {
    let store = get_test_store().await;

    let err = store.get_aggregate(OrderId::new(987_654)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store.get_aggregate(OrderId::new(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
}

#[tokio::test]
async fn recent_aggregates_are_newest_first() {
    let store = get_test_store().await;
    for offset in [0, 300, 100, 200] {
        store
            .create_aggregate(&mut sample_aggregate(&unique_uid(), 2, offset))
            .await
            .unwrap();
    }

    let recent = store.recent_aggregates(3).await.unwrap();

    assert_eq!(recent.len(), 3);
    assert!(
        recent
            .windows(2)
            .all(|w| w[0].order.date_created >= w[1].order.date_created)
    );
    assert!(recent.iter().all(|a| a.items.len() == 2));
    assert!(store.recent_aggregates(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn item_with_unknown_order_is_foreign_key_violation() {
    let store = get_test_store().await;
    let mut item = sample_aggregate(&unique_uid(), 1, 0).items.remove(0);
    item.order_id = 424_242;

    let mut scope = TxScope::begin(&store).await.unwrap();
    let err = store
        .insert_items(scope.tx(), std::slice::from_ref(&item))
        .await
        .unwrap_err();
    scope.rollback().await.unwrap();

    assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
}

#[tokio::test]
async fn referenced_delivery_cannot_be_deleted() {
    let store = get_test_store().await;
    let mut aggregate = sample_aggregate(&unique_uid(), 1, 0);
    store.create_aggregate(&mut aggregate).await.unwrap();

    let mut scope = TxScope::begin(&store).await.unwrap();
    let err = store
        .delete_delivery(scope.tx(), aggregate.delivery.id)
        .await
        .unwrap_err();
    scope.rollback().await.unwrap();

    assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
}

#[tokio::test]
async fn update_missing_order_affects_no_rows() {
    let store = get_test_store().await;
    let mut aggregate = sample_aggregate(&unique_uid(), 1, 0);
    aggregate.order.id = 31_337;

    let mut scope = TxScope::begin(&store).await.unwrap();
    let err = store
        .update_order(scope.tx(), &aggregate.order)
        .await
        .unwrap_err();
    scope.rollback().await.unwrap();

    assert_eq!(err.kind(), ErrorKind::NoRowsAffected);
}

#[tokio::test]
async fn delete_order_cascades_to_items() {
    let store = get_test_store().await;
    let mut aggregate = sample_aggregate(&unique_uid(), 3, 0);
    let id = store.create_aggregate(&mut aggregate).await.unwrap();

    let mut scope = TxScope::begin(&store).await.unwrap();
    store.delete_order(scope.tx(), id).await.unwrap();
    scope.commit().await.unwrap();

    assert_eq!(count(&store, "items").await, 0);
    let err = store.get_aggregate(id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn items_beyond_one_statement_bind_limit_are_all_stored() {
    let store = get_test_store().await;
    // 12 binds per row: more than 65535 / 12 rows needs two statements
    let mut aggregate = sample_aggregate(&unique_uid(), 6_000, 0);

    let id = store.create_aggregate(&mut aggregate).await.unwrap();

    assert_eq!(count(&store, "items").await, 6_000);
    assert!(aggregate.items.iter().all(|item| item.id > 0));
    let loaded = store.get_aggregate(id).await.unwrap();
    assert_eq!(loaded.items.len(), 6_000);
    assert_eq!(loaded, aggregate);
}

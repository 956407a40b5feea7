//! Order service: write-through to storage, cache-first reads.

use std::sync::Arc;

use cache::BoundedCache;
use common::{OrderAggregate, OrderId};
use order_store::{AggregateStore, StoreError};

/// Coordinates the aggregate store and the read cache.
///
/// Shared between the ingestion task and every HTTP request; all methods
/// take `&self`.
pub struct OrderService<S> {
    store: S,
    cache: BoundedCache<OrderId, Arc<OrderAggregate>>,
}

impl<S: AggregateStore> OrderService<S> {
    /// Creates a service whose cache holds at most `cache_size` aggregates.
    pub fn new(store: S, cache_size: usize) -> Self {
        Self {
            store,
            cache: BoundedCache::new(cache_size),
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the read cache.
    pub fn cache(&self) -> &BoundedCache<OrderId, Arc<OrderAggregate>> {
        &self.cache
    }

    /// Persists the aggregate and caches it under its order id.
    ///
    /// On return `aggregate` carries its generated ids. If the `order_uid`
    /// was already stored, `aggregate` is replaced by the stored copy.
    #[tracing::instrument(skip(self, aggregate), fields(order_uid = %aggregate.order.order_uid))]
    pub async fn create(&self, aggregate: &mut OrderAggregate) -> Result<OrderId, StoreError> {
        let id = self.store.create_aggregate(aggregate).await?;

        self.cache.add(id, Arc::new(aggregate.clone()));
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %id, "order stored and cached");

        Ok(id)
    }

    /// Returns the aggregate, from the cache when present.
    ///
    /// A miss reads from storage but does not populate the cache.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: OrderId) -> Result<Arc<OrderAggregate>, StoreError> {
        if let Some(aggregate) = self.cache.get(&id) {
            metrics::counter!("orders_cache_hits_total").increment(1);
            tracing::debug!(order_id = %id, "order served from cache");
            return Ok(aggregate);
        }

        metrics::counter!("orders_cache_misses_total").increment(1);
        let aggregate = self.store.get_aggregate(id).await?;
        tracing::debug!(order_id = %id, "order loaded from storage");
        Ok(Arc::new(aggregate))
    }

    /// Warms the cache with up to `limit` of the newest aggregates.
    ///
    /// Returns how many were loaded. On failure the cache is cleared so it
    /// never holds a partial warm-up.
    #[tracing::instrument(skip(self))]
    pub async fn load_recent(&self, limit: usize) -> Result<usize, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let aggregates = match self.store.recent_aggregates(limit).await {
            Ok(aggregates) => aggregates,
            Err(err) => {
                self.cache.clear();
                tracing::error!(error = %err, "failed to load recent orders");
                return Err(err);
            }
        };

        if aggregates.is_empty() {
            tracing::info!("no recent orders to cache");
            return Ok(0);
        }

        let count = aggregates.len();
        for aggregate in aggregates {
            self.cache
                .add(OrderId::new(aggregate.order.id), Arc::new(aggregate));
        }
        tracing::info!(count, "recent orders loaded into cache");
        Ok(count)
    }
}

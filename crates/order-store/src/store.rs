use std::collections::HashMap;

use async_trait::async_trait;
use common::{Delivery, Item, Order, OrderAggregate, OrderId, Payment};

use crate::{Result, StoreError};

/// Transaction scoping for a backend.
///
/// Dropping a transaction without committing it must discard its changes, so
/// an early return or panic can never leave a partial write visible.
#[async_trait]
pub trait Transactional: Send + Sync {
    /// An open transaction.
    type Tx: Send;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Makes the transaction's changes visible.
    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    /// Discards the transaction's changes.
    async fn rollback(&self, tx: Self::Tx) -> Result<()>;
}

/// An open transaction bound to the store that created it.
///
/// Consumed by [`TxScope::commit`], [`TxScope::rollback`] or
/// [`TxScope::finish`]; if it is simply dropped, the backend rolls back.
pub struct TxScope<'s, S: Transactional + ?Sized> {
    store: &'s S,
    tx: S::Tx,
}

impl<'s, S: Transactional + ?Sized> TxScope<'s, S> {
    /// Begins a new transaction on `store`.
    pub async fn begin(store: &'s S) -> Result<Self> {
        let tx = store.begin().await?;
        Ok(Self { store, tx })
    }

    /// Returns the transaction handle for record-level calls.
    pub fn tx(&mut self) -> &mut S::Tx {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.store.commit(self.tx).await
    }

    pub async fn rollback(self) -> Result<()> {
        self.store.rollback(self.tx).await
    }

    /// Commits on `Ok`, rolls back on `Err`.
    ///
    /// A failed rollback is logged; the original error is returned.
    pub async fn finish<T: Send>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Result of an order upsert keyed on `order_uid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Id of the inserted or already existing row.
    pub id: OrderId,
    /// False when a row with the same `order_uid` already existed.
    pub created: bool,
}

#[async_trait]
pub trait DeliveryStore: Transactional {
    /// Inserts a delivery, returning its generated id.
    async fn insert_delivery(&self, tx: &mut Self::Tx, delivery: &Delivery) -> Result<i64>;

    async fn get_delivery(&self, tx: &mut Self::Tx, id: i64) -> Result<Delivery>;

    async fn update_delivery(&self, tx: &mut Self::Tx, delivery: &Delivery) -> Result<()>;

    async fn delete_delivery(&self, tx: &mut Self::Tx, id: i64) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Transactional {
    /// Inserts a payment, returning its generated id.
    async fn insert_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<i64>;

    async fn get_payment(&self, tx: &mut Self::Tx, id: i64) -> Result<Payment>;

    async fn update_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<()>;

    async fn delete_payment(&self, tx: &mut Self::Tx, id: i64) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Transactional {
    /// Inserts the order, or finds the existing row with the same `order_uid`.
    async fn upsert_order(&self, tx: &mut Self::Tx, order: &Order) -> Result<UpsertOutcome>;

    async fn get_order(&self, tx: &mut Self::Tx, id: OrderId) -> Result<Order>;

    /// Returns up to `limit` orders, newest `date_created` first.
    async fn recent_orders(&self, tx: &mut Self::Tx, limit: i64) -> Result<Vec<Order>>;

    async fn update_order(&self, tx: &mut Self::Tx, order: &Order) -> Result<()>;

    async fn delete_order(&self, tx: &mut Self::Tx, id: OrderId) -> Result<()>;
}

#[async_trait]
pub trait ItemStore: Transactional {
    /// Inserts items in batched round trips, returning their ids in input order.
    async fn insert_items(&self, tx: &mut Self::Tx, items: &[Item]) -> Result<Vec<i64>>;

    async fn get_item(&self, tx: &mut Self::Tx, id: i64) -> Result<Item>;

    async fn items_for_order(&self, tx: &mut Self::Tx, order_id: OrderId) -> Result<Vec<Item>>;

    async fn items_for_orders(
        &self,
        tx: &mut Self::Tx,
        order_ids: &[OrderId],
    ) -> Result<Vec<Item>>;

    async fn update_item(&self, tx: &mut Self::Tx, item: &Item) -> Result<()>;

    async fn delete_item(&self, tx: &mut Self::Tx, id: i64) -> Result<()>;
}

/// Persists and reads whole order aggregates atomically.
///
/// The provided methods implement the protocol on top of the record-level
/// capabilities. Backends may override the `load_*` methods with cheaper
/// joined queries.
#[async_trait]
pub trait AggregateStore: OrderStore + DeliveryStore + PaymentStore + ItemStore {
    /// Persists the aggregate in one transaction and returns its order id.
    ///
    /// Generated ids are back-filled into `aggregate`. Creating an aggregate
    /// whose `order_uid` is already stored writes nothing and replaces
    /// `aggregate` with the stored copy, so the same id is returned.
    #[tracing::instrument(skip(self, aggregate), fields(order_uid = %aggregate.order.order_uid))]
    async fn create_aggregate(&self, aggregate: &mut OrderAggregate) -> Result<OrderId> {
        if aggregate.items.is_empty() {
            return Err(StoreError::nil_input("aggregate has no items"));
        }

        let mut scope = TxScope::begin(self).await?;

        let written: Result<Written> = async {
            aggregate.delivery.id = self.insert_delivery(scope.tx(), &aggregate.delivery).await?;
            aggregate.payment.id = self.insert_payment(scope.tx(), &aggregate.payment).await?;
            aggregate.link_delivery_and_payment();

            let upsert = self.upsert_order(scope.tx(), &aggregate.order).await?;
            if !upsert.created {
                let stored = self.load_aggregate(scope.tx(), upsert.id).await?;
                return Ok(Written::AlreadyStored(Box::new(stored)));
            }

            aggregate.stamp_items(upsert.id);
            let item_ids = self.insert_items(scope.tx(), &aggregate.items).await?;
            for (item, id) in aggregate.items.iter_mut().zip(item_ids) {
                item.id = id;
            }
            Ok(Written::Created(upsert.id))
        }
        .await;

        match written {
            Ok(Written::Created(id)) => {
                scope.commit().await?;
                tracing::debug!(order_id = %id, "aggregate committed");
                Ok(id)
            }
            Ok(Written::AlreadyStored(stored)) => {
                // Drops the delivery and payment rows inserted by this attempt.
                scope.rollback().await?;
                let id = OrderId::new(stored.order.id);
                tracing::info!(order_id = %id, "order_uid already stored, keeping existing aggregate");
                *aggregate = *stored;
                Ok(id)
            }
            Err(err) => scope.finish(Err(err)).await,
        }
    }

    /// Reads one aggregate in a single read transaction.
    #[tracing::instrument(skip(self))]
    async fn get_aggregate(&self, id: OrderId) -> Result<OrderAggregate> {
        if !id.is_valid() {
            return Err(StoreError::invalid_id(id.as_i64()));
        }
        let mut scope = TxScope::begin(self).await?;
        let result = self.load_aggregate(scope.tx(), id).await;
        scope.finish(result).await
    }

    /// Returns up to `limit` of the most recently created aggregates.
    ///
    /// A zero limit returns nothing without touching storage.
    #[tracing::instrument(skip(self))]
    async fn recent_aggregates(&self, limit: i64) -> Result<Vec<OrderAggregate>> {
        if limit < 0 {
            return Err(StoreError::nil_input(format!("negative limit {limit}")));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut scope = TxScope::begin(self).await?;
        let result = self.load_recent(scope.tx(), limit).await;
        scope.finish(result).await
    }

    /// Loads one aggregate inside an open transaction.
    async fn load_aggregate(
        &self,
        tx: &mut <Self as Transactional>::Tx,
        id: OrderId,
    ) -> Result<OrderAggregate> {
        if !id.is_valid() {
            return Err(StoreError::invalid_id(id.as_i64()));
        }
        let order = self.get_order(tx, id).await?;
        let delivery = self.get_delivery(tx, order.delivery_id).await?;
        let payment = self.get_payment(tx, order.payment_id).await?;
        let items = self.items_for_order(tx, id).await?;
        Ok(OrderAggregate {
            order,
            delivery,
            payment,
            items,
        })
    }

    /// Loads the newest aggregates inside an open transaction.
    async fn load_recent(
        &self,
        tx: &mut <Self as Transactional>::Tx,
        limit: i64,
    ) -> Result<Vec<OrderAggregate>> {
        let orders = self.recent_orders(tx, limit).await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<OrderId> = orders.iter().map(|o| OrderId::new(o.id)).collect();
        let mut items = group_items(self.items_for_orders(tx, &ids).await?);

        let mut aggregates = Vec::with_capacity(orders.len());
        for order in orders {
            let delivery = self.get_delivery(tx, order.delivery_id).await?;
            let payment = self.get_payment(tx, order.payment_id).await?;
            let items = items.remove(&order.id).unwrap_or_default();
            aggregates.push(OrderAggregate {
                order,
                delivery,
                payment,
                items,
            });
        }
        Ok(aggregates)
    }
}

enum Written {
    Created(OrderId),
    AlreadyStored(Box<OrderAggregate>),
}

/// Groups items by owning order id, preserving their order.
pub(crate) fn group_items(items: Vec<Item>) -> HashMap<i64, Vec<Item>> {
    let mut grouped: HashMap<i64, Vec<Item>> = HashMap::new();
    for item in items {
        grouped.entry(item.order_id).or_default().push(item);
    }
    grouped
}

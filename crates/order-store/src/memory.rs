use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Delivery, ErrorKind, Item, Order, OrderId, Payment, Result, StoreError,
    store::{
        AggregateStore, DeliveryStore, ItemStore, OrderStore, PaymentStore, Transactional,
        UpsertOutcome,
    },
};

/// Store operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Begin,
    Commit,
    InsertDelivery,
    InsertPayment,
    UpsertOrder,
    InsertItems,
    ReadOrder,
    ReadItems,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    deliveries: BTreeMap<i64, Delivery>,
    payments: BTreeMap<i64, Payment>,
    orders: BTreeMap<i64, Order>,
    items: BTreeMap<i64, Item>,
}

/// Id generators live outside the tables so, like database sequences, they
/// are not rolled back.
#[derive(Debug, Default)]
struct Sequences {
    delivery: AtomicI64,
    payment: AtomicI64,
    order: AtomicI64,
    item: AtomicI64,
}

impl Sequences {
    fn next(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    kind: ErrorKind,
    remaining: u32,
}

/// Row counts per table, for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub deliveries: usize,
    pub payments: usize,
    pub orders: usize,
    pub items: usize,
}

/// An open in-memory transaction.
///
/// Holds the store lock for its whole lifetime, so transactions run one at a
/// time. Writes go to a staged copy that replaces the tables on commit and is
/// discarded on rollback or drop.
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

/// In-memory aggregate store with the same constraint behavior as the
/// PostgreSQL schema. Useful for testing.
#[derive(Clone, Default)]
pub struct InMemoryAggregateStore {
    tables: Arc<Mutex<Tables>>,
    sequences: Arc<Sequences>,
    faults: Arc<std::sync::Mutex<Vec<Fault>>>,
    transactions: Arc<AtomicU64>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls of `operation` fail with `kind`.
    pub fn fail_next(&self, operation: Operation, kind: ErrorKind, times: u32) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Fault {
                operation,
                kind,
                remaining: times,
            });
    }

    /// Number of transactions begun so far.
    pub fn transactions_started(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Returns the committed row count of every table.
    pub async fn counts(&self) -> RecordCounts {
        let tables = self.tables.lock().await;
        RecordCounts {
            deliveries: tables.deliveries.len(),
            payments: tables.payments.len(),
            orders: tables.orders.len(),
            items: tables.items.len(),
        }
    }

    fn check(&self, operation: Operation) -> Result<()> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(fault) = faults
            .iter_mut()
            .find(|f| f.operation == operation && f.remaining > 0)
        else {
            return Ok(());
        };
        fault.remaining -= 1;
        let kind = fault.kind;
        faults.retain(|f| f.remaining > 0);
        Err(StoreError::new(kind, format!("injected failure in {operation:?}")))
    }
}

fn ensure_valid(id: i64) -> Result<()> {
    if id <= 0 {
        return Err(StoreError::invalid_id(id));
    }
    Ok(())
}

fn foreign_key(message: String) -> StoreError {
    StoreError::new(ErrorKind::ForeignKeyViolation, message)
}

impl Tables {
    fn check_order_references(&self, order: &Order) -> Result<()> {
        if !self.deliveries.contains_key(&order.delivery_id) {
            return Err(foreign_key(format!(
                "delivery {} referenced by order {} does not exist",
                order.delivery_id, order.order_uid
            )));
        }
        if !self.payments.contains_key(&order.payment_id) {
            return Err(foreign_key(format!(
                "payment {} referenced by order {} does not exist",
                order.payment_id, order.order_uid
            )));
        }
        Ok(())
    }

    fn check_item_reference(&self, item: &Item) -> Result<()> {
        if !self.orders.contains_key(&item.order_id) {
            return Err(foreign_key(format!(
                "order {} referenced by item does not exist",
                item.order_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transactional for InMemoryAggregateStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        self.check(Operation::Begin)?;
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let staged = guard.clone();
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryTx { guard, staged })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        self.check(Operation::Commit)?;
        let InMemoryTx { mut guard, staged } = tx;
        *guard = staged;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryAggregateStore {
    async fn insert_delivery(&self, tx: &mut Self::Tx, delivery: &Delivery) -> Result<i64> {
        self.check(Operation::InsertDelivery)?;
        let id = Sequences::next(&self.sequences.delivery);
        let mut row = delivery.clone();
        row.id = id;
        tx.staged.deliveries.insert(id, row);
        Ok(id)
    }

    async fn get_delivery(&self, tx: &mut Self::Tx, id: i64) -> Result<Delivery> {
        ensure_valid(id)?;
        tx.staged
            .deliveries
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("delivery {id}")))
    }

    async fn update_delivery(&self, tx: &mut Self::Tx, delivery: &Delivery) -> Result<()> {
        ensure_valid(delivery.id)?;
        match tx.staged.deliveries.get_mut(&delivery.id) {
            Some(row) => {
                *row = delivery.clone();
                Ok(())
            }
            None => Err(StoreError::no_rows_affected(format!("delivery {}", delivery.id))),
        }
    }

    async fn delete_delivery(&self, tx: &mut Self::Tx, id: i64) -> Result<()> {
        ensure_valid(id)?;
        if tx.staged.orders.values().any(|o| o.delivery_id == id) {
            return Err(foreign_key(format!("delivery {id} is still referenced")));
        }
        tx.staged
            .deliveries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::no_rows_affected(format!("delivery {id}")))
    }
}

#[async_trait]
impl PaymentStore for InMemoryAggregateStore {
    async fn insert_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<i64> {
        self.check(Operation::InsertPayment)?;
        let id = Sequences::next(&self.sequences.payment);
        let mut row = payment.clone();
        row.id = id;
        tx.staged.payments.insert(id, row);
        Ok(id)
    }

    async fn get_payment(&self, tx: &mut Self::Tx, id: i64) -> Result<Payment> {
        ensure_valid(id)?;
        tx.staged
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("payment {id}")))
    }

    async fn update_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<()> {
        ensure_valid(payment.id)?;
        match tx.staged.payments.get_mut(&payment.id) {
            Some(row) => {
                *row = payment.clone();
                Ok(())
            }
            None => Err(StoreError::no_rows_affected(format!("payment {}", payment.id))),
        }
    }

    async fn delete_payment(&self, tx: &mut Self::Tx, id: i64) -> Result<()> {
        ensure_valid(id)?;
        if tx.staged.orders.values().any(|o| o.payment_id == id) {
            return Err(foreign_key(format!("payment {id} is still referenced")));
        }
        tx.staged
            .payments
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::no_rows_affected(format!("payment {id}")))
    }
}

#[async_trait]
impl OrderStore for InMemoryAggregateStore {
    async fn upsert_order(&self, tx: &mut Self::Tx, order: &Order) -> Result<UpsertOutcome> {
        self.check(Operation::UpsertOrder)?;
        tx.staged.check_order_references(order)?;

        if let Some(existing) = tx
            .staged
            .orders
            .values()
            .find(|o| o.order_uid == order.order_uid)
        {
            return Ok(UpsertOutcome {
                id: OrderId::new(existing.id),
                created: false,
            });
        }

        let id = Sequences::next(&self.sequences.order);
        let mut row = order.clone();
        row.id = id;
        tx.staged.orders.insert(id, row);
        Ok(UpsertOutcome {
            id: OrderId::new(id),
            created: true,
        })
    }

    async fn get_order(&self, tx: &mut Self::Tx, id: OrderId) -> Result<Order> {
        ensure_valid(id.as_i64())?;
        self.check(Operation::ReadOrder)?;
        tx.staged
            .orders
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("order {id}")))
    }

    async fn recent_orders(&self, tx: &mut Self::Tx, limit: i64) -> Result<Vec<Order>> {
        self.check(Operation::ReadOrder)?;
        let mut orders: Vec<Order> = tx.staged.orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            b.date_created
                .cmp(&a.date_created)
                .then_with(|| b.id.cmp(&a.id))
        });
        orders.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orders)
    }

    async fn update_order(&self, tx: &mut Self::Tx, order: &Order) -> Result<()> {
        ensure_valid(order.id)?;
        if !tx.staged.orders.contains_key(&order.id) {
            return Err(StoreError::no_rows_affected(format!("order {}", order.id)));
        }
        tx.staged.check_order_references(order)?;
        if tx
            .staged
            .orders
            .values()
            .any(|o| o.id != order.id && o.order_uid == order.order_uid)
        {
            return Err(StoreError::new(
                ErrorKind::Duplicate,
                format!("order_uid {} already exists", order.order_uid),
            ));
        }
        tx.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn delete_order(&self, tx: &mut Self::Tx, id: OrderId) -> Result<()> {
        ensure_valid(id.as_i64())?;
        if tx.staged.orders.remove(&id.as_i64()).is_none() {
            return Err(StoreError::no_rows_affected(format!("order {id}")));
        }
        tx.staged.items.retain(|_, item| item.order_id != id.as_i64());
        Ok(())
    }
}

#[async_trait]
impl ItemStore for InMemoryAggregateStore {
    async fn insert_items(&self, tx: &mut Self::Tx, items: &[Item]) -> Result<Vec<i64>> {
        self.check(Operation::InsertItems)?;
        for item in items {
            tx.staged.check_item_reference(item)?;
        }

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = Sequences::next(&self.sequences.item);
            let mut row = item.clone();
            row.id = id;
            tx.staged.items.insert(id, row);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_item(&self, tx: &mut Self::Tx, id: i64) -> Result<Item> {
        ensure_valid(id)?;
        tx.staged
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("item {id}")))
    }

    async fn items_for_order(&self, tx: &mut Self::Tx, order_id: OrderId) -> Result<Vec<Item>> {
        ensure_valid(order_id.as_i64())?;
        self.check(Operation::ReadItems)?;
        Ok(tx
            .staged
            .items
            .values()
            .filter(|item| item.order_id == order_id.as_i64())
            .cloned()
            .collect())
    }

    async fn items_for_orders(
        &self,
        tx: &mut Self::Tx,
        order_ids: &[OrderId],
    ) -> Result<Vec<Item>> {
        self.check(Operation::ReadItems)?;
        Ok(tx
            .staged
            .items
            .values()
            .filter(|item| order_ids.contains(&OrderId::new(item.order_id)))
            .cloned()
            .collect())
    }

    async fn update_item(&self, tx: &mut Self::Tx, item: &Item) -> Result<()> {
        ensure_valid(item.id)?;
        if !tx.staged.items.contains_key(&item.id) {
            return Err(StoreError::no_rows_affected(format!("item {}", item.id)));
        }
        tx.staged.check_item_reference(item)?;
        tx.staged.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn delete_item(&self, tx: &mut Self::Tx, id: i64) -> Result<()> {
        ensure_valid(id)?;
        tx.staged
            .items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::no_rows_affected(format!("item {id}")))
    }
}

impl AggregateStore for InMemoryAggregateStore {}

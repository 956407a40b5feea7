//! Transactional persistence for order aggregates.
//!
//! Each record kind has its own capability trait ([`DeliveryStore`],
//! [`PaymentStore`], [`OrderStore`], [`ItemStore`]); every method takes a
//! required transaction handle. [`AggregateStore`] composes them and owns the
//! multi-record write and read protocol. Two backends are provided:
//! [`PgAggregateStore`] on PostgreSQL and [`InMemoryAggregateStore`] for tests.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{Delivery, Item, Order, OrderAggregate, OrderId, Payment};
pub use error::{ErrorKind, Result, StoreError};
pub use memory::{InMemoryAggregateStore, InMemoryTx, Operation, RecordCounts};
pub use postgres::PgAggregateStore;
pub use store::{
    AggregateStore, DeliveryStore, ItemStore, OrderStore, PaymentStore, Transactional, TxScope,
    UpsertOutcome,
};

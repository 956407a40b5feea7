//! Shared identifiers and the order aggregate model.
//!
//! An [`OrderAggregate`] is the unit of consistency for the whole workspace:
//! one [`Order`] with exactly one [`Delivery`], one [`Payment`] and at least
//! one [`Item`], persisted and read as a single atomic unit.

#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
pub mod model;
pub mod types;

pub use model::{Delivery, Item, Order, OrderAggregate, Payment};
pub use types::OrderId;

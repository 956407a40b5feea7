//! Order aggregate records.
//!
//! Field names follow the relational columns; serde renames keep the JSON
//! shape produced by the upstream order feed. Generated ids default to zero
//! on inbound payloads and are back-filled by the store on insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::OrderId;

/// An order together with its delivery, payment and line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OrderAggregate {
    #[serde(flatten)]
    #[validate(nested)]
    pub order: Order,
    #[validate(nested)]
    pub delivery: Delivery,
    #[validate(nested)]
    pub payment: Payment,
    #[validate(length(min = 1, message = "an order needs at least one item"), nested)]
    pub items: Vec<Item>,
}

impl OrderAggregate {
    /// Returns the internal id, if the aggregate has been persisted.
    pub fn id(&self) -> Option<OrderId> {
        let id = OrderId::new(self.order.id);
        id.is_valid().then_some(id)
    }

    /// Returns the external idempotency key.
    pub fn order_uid(&self) -> &str {
        &self.order.order_uid
    }

    /// Copies the generated delivery and payment ids into the order record.
    pub fn link_delivery_and_payment(&mut self) {
        self.order.delivery_id = self.delivery.id;
        self.order.payment_id = self.payment.id;
    }

    /// Stamps every item with the owning order's id.
    pub fn stamp_items(&mut self, order_id: OrderId) {
        self.order.id = order_id.as_i64();
        for item in &mut self.items {
            item.order_id = order_id.as_i64();
        }
    }
}

/// The order header record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Order {
    #[serde(default)]
    pub id: i64,
    #[validate(length(min = 1))]
    pub order_uid: String,
    #[validate(length(min = 1))]
    pub track_number: String,
    pub entry: String,
    #[serde(default)]
    pub delivery_id: i64,
    #[serde(default)]
    pub payment_id: i64,
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[validate(length(min = 1))]
    pub customer_id: String,
    pub delivery_service: String,
    #[serde(rename = "shard_key")]
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

/// Delivery details owned by exactly one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Delivery {
    #[serde(default)]
    pub id: i64,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub phone: String,
    pub zip: String,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub address: String,
    pub region: String,
    #[validate(email)]
    pub email: String,
}

/// Payment details owned by exactly one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Payment {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "transaction_id")]
    #[validate(length(min = 1))]
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub provider: String,
    #[validate(range(min = 0.0))]
    pub amount: f64,
    #[serde(rename = "payment_date")]
    pub payment_dt: DateTime<Utc>,
    pub bank: String,
    #[validate(range(min = 0.0))]
    pub delivery_cost: f64,
    #[validate(range(min = 0.0))]
    pub goods_total: f64,
    #[validate(range(min = 0.0))]
    pub custom_fee: f64,
}

/// A single line item of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Item {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub order_id: i64,
    pub chrt_id: i64,
    pub track_number: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    pub rid: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub sale: i32,
    pub size: String,
    #[validate(range(min = 0.0))]
    pub total_price: f64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

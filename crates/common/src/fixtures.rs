//! Ready-made aggregates for tests in downstream crates.

use chrono::{DateTime, Utc};

use crate::{Delivery, Item, Order, OrderAggregate, Payment};

const BASE_TIMESTAMP: i64 = 1_637_907_739;

/// Returns a valid, unsaved aggregate with `item_count` items.
///
/// `created_offset_secs` shifts `date_created` forward so callers can control
/// recency ordering.
pub fn sample_aggregate(
    order_uid: &str,
    item_count: usize,
    created_offset_secs: i64,
) -> OrderAggregate {
    let created = DateTime::<Utc>::from_timestamp(BASE_TIMESTAMP + created_offset_secs, 0)
        .expect("fixture timestamp in range");

    let items = (0..item_count)
        .map(|i| Item {
            id: 0,
            order_id: 0,
            chrt_id: 9_934_930 + i as i64,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453.0,
            rid: format!("{order_uid}-rid-{i}"),
            name: format!("Item {i}"),
            sale: 30,
            size: "0".to_string(),
            total_price: 317.0,
            nm_id: 2_389_212 + i as i64,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        })
        .collect();

    OrderAggregate {
        order: Order {
            id: 0,
            order_uid: order_uid.to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery_id: 0,
            payment_id: 0,
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: created,
            oof_shard: "1".to_string(),
        },
        delivery: Delivery {
            id: 0,
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            id: 0,
            transaction: order_uid.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817.0,
            payment_dt: created,
            bank: "alpha".to_string(),
            delivery_cost: 1500.0,
            goods_total: 317.0,
            custom_fee: 0.0,
        },
        items,
    }
}

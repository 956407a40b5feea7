use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction, postgres::PgRow};

use crate::{
    Delivery, Item, Order, OrderAggregate, OrderId, Payment, Result, StoreError,
    store::{
        AggregateStore, DeliveryStore, ItemStore, OrderStore, PaymentStore, Transactional,
        UpsertOutcome, group_items,
    },
};

macro_rules! order_columns {
    () => {
        "o.id, o.order_uid, o.track_number, o.entry, o.delivery_id, o.payment_id, o.locale, \
         o.internal_signature, o.customer_id, o.delivery_service, o.shardkey, o.sm_id, \
         o.date_created, o.oof_shard"
    };
}

macro_rules! delivery_columns {
    () => {
        "d.id AS d_id, d.name AS d_name, d.phone AS d_phone, d.zip AS d_zip, d.city AS d_city, \
         d.address AS d_address, d.region AS d_region, d.email AS d_email"
    };
}

macro_rules! payment_columns {
    () => {
        "p.id AS p_id, p.transaction AS p_transaction, p.request_id AS p_request_id, \
         p.currency AS p_currency, p.provider AS p_provider, p.amount AS p_amount, \
         p.payment_dt AS p_payment_dt, p.bank AS p_bank, p.delivery_cost AS p_delivery_cost, \
         p.goods_total AS p_goods_total, p.custom_fee AS p_custom_fee"
    };
}

macro_rules! item_columns {
    () => {
        "id, order_id, chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, \
         brand, status"
    };
}

const AGGREGATE_JOIN: &str = concat!(
    "SELECT ",
    order_columns!(),
    ", ",
    delivery_columns!(),
    ", ",
    payment_columns!(),
    " FROM orders o",
    " JOIN delivery d ON d.id = o.delivery_id",
    " JOIN payment p ON p.id = o.payment_id"
);

/// Bind parameters per inserted item row.
const ITEM_BINDS: usize = 12;

/// Rows per `INSERT INTO items` statement, bounded by the protocol's
/// `u16::MAX` bind parameters.
const ITEMS_PER_INSERT: usize = u16::MAX as usize / ITEM_BINDS;

/// PostgreSQL-backed aggregate store.
#[derive(Clone)]
pub struct PgAggregateStore {
    pool: PgPool,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        Ok(Order {
            id: row.try_get("id")?,
            order_uid: row.try_get("order_uid")?,
            track_number: row.try_get("track_number")?,
            entry: row.try_get("entry")?,
            delivery_id: row.try_get("delivery_id")?,
            payment_id: row.try_get("payment_id")?,
            locale: row.try_get("locale")?,
            internal_signature: row.try_get("internal_signature")?,
            customer_id: row.try_get("customer_id")?,
            delivery_service: row.try_get("delivery_service")?,
            shardkey: row.try_get("shardkey")?,
            sm_id: row.try_get("sm_id")?,
            date_created: row.try_get("date_created")?,
            oof_shard: row.try_get("oof_shard")?,
        })
    }

    fn row_to_delivery(row: &PgRow) -> Result<Delivery> {
        Ok(Delivery {
            id: row.try_get("d_id")?,
            name: row.try_get("d_name")?,
            phone: row.try_get("d_phone")?,
            zip: row.try_get("d_zip")?,
            city: row.try_get("d_city")?,
            address: row.try_get("d_address")?,
            region: row.try_get("d_region")?,
            email: row.try_get("d_email")?,
        })
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        Ok(Payment {
            id: row.try_get("p_id")?,
            transaction: row.try_get("p_transaction")?,
            request_id: row.try_get("p_request_id")?,
            currency: row.try_get("p_currency")?,
            provider: row.try_get("p_provider")?,
            amount: row.try_get("p_amount")?,
            payment_dt: row.try_get("p_payment_dt")?,
            bank: row.try_get("p_bank")?,
            delivery_cost: row.try_get("p_delivery_cost")?,
            goods_total: row.try_get("p_goods_total")?,
            custom_fee: row.try_get("p_custom_fee")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<Item> {
        Ok(Item {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            chrt_id: row.try_get("chrt_id")?,
            track_number: row.try_get("track_number")?,
            price: row.try_get("price")?,
            rid: row.try_get("rid")?,
            name: row.try_get("name")?,
            sale: row.try_get("sale")?,
            size: row.try_get("size")?,
            total_price: row.try_get("total_price")?,
            nm_id: row.try_get("nm_id")?,
            brand: row.try_get("brand")?,
            status: row.try_get("status")?,
        })
    }

    fn row_to_aggregate(row: &PgRow) -> Result<OrderAggregate> {
        Ok(OrderAggregate {
            order: Self::row_to_order(row)?,
            delivery: Self::row_to_delivery(row)?,
            payment: Self::row_to_payment(row)?,
            items: Vec::new(),
        })
    }
}

fn ensure_valid(id: i64) -> Result<()> {
    if id <= 0 {
        return Err(StoreError::invalid_id(id));
    }
    Ok(())
}

fn ensure_affected(rows: u64, table: &str, id: i64) -> Result<()> {
    if rows == 0 {
        return Err(StoreError::no_rows_affected(format!("{table} {id}")));
    }
    Ok(())
}

#[async_trait]
impl Transactional for PgAggregateStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for PgAggregateStore {
    async fn insert_delivery(&self, tx: &mut Self::Tx, delivery: &Delivery) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO delivery (name, phone, zip, city, address, region, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&delivery.name)
        .bind(&delivery.phone)
        .bind(&delivery.zip)
        .bind(&delivery.city)
        .bind(&delivery.address)
        .bind(&delivery.region)
        .bind(&delivery.email)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    async fn get_delivery(&self, tx: &mut Self::Tx, id: i64) -> Result<Delivery> {
        ensure_valid(id)?;
        let row = sqlx::query(concat!(
            "SELECT ",
            delivery_columns!(),
            " FROM delivery d WHERE d.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("delivery {id}")))?;
        Self::row_to_delivery(&row)
    }

    async fn update_delivery(&self, tx: &mut Self::Tx, delivery: &Delivery) -> Result<()> {
        ensure_valid(delivery.id)?;
        let result = sqlx::query(
            r#"
            UPDATE delivery
            SET name = $2, phone = $3, zip = $4, city = $5, address = $6, region = $7, email = $8
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(&delivery.name)
        .bind(&delivery.phone)
        .bind(&delivery.zip)
        .bind(&delivery.city)
        .bind(&delivery.address)
        .bind(&delivery.region)
        .bind(&delivery.email)
        .execute(&mut **tx)
        .await?;
        ensure_affected(result.rows_affected(), "delivery", delivery.id)
    }

    async fn delete_delivery(&self, tx: &mut Self::Tx, id: i64) -> Result<()> {
        ensure_valid(id)?;
        let result = sqlx::query("DELETE FROM delivery WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        ensure_affected(result.rows_affected(), "delivery", id)
    }
}

#[async_trait]
impl PaymentStore for PgAggregateStore {
    async fn insert_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO payment (transaction, request_id, currency, provider, amount, payment_dt,
                                 bank, delivery_cost, goods_total, custom_fee)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&payment.transaction)
        .bind(&payment.request_id)
        .bind(&payment.currency)
        .bind(&payment.provider)
        .bind(payment.amount)
        .bind(payment.payment_dt)
        .bind(&payment.bank)
        .bind(payment.delivery_cost)
        .bind(payment.goods_total)
        .bind(payment.custom_fee)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    async fn get_payment(&self, tx: &mut Self::Tx, id: i64) -> Result<Payment> {
        ensure_valid(id)?;
        let row = sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payment p WHERE p.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("payment {id}")))?;
        Self::row_to_payment(&row)
    }

    async fn update_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<()> {
        ensure_valid(payment.id)?;
        let result = sqlx::query(
            r#"
            UPDATE payment
            SET transaction = $2, request_id = $3, currency = $4, provider = $5, amount = $6,
                payment_dt = $7, bank = $8, delivery_cost = $9, goods_total = $10, custom_fee = $11
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(&payment.transaction)
        .bind(&payment.request_id)
        .bind(&payment.currency)
        .bind(&payment.provider)
        .bind(payment.amount)
        .bind(payment.payment_dt)
        .bind(&payment.bank)
        .bind(payment.delivery_cost)
        .bind(payment.goods_total)
        .bind(payment.custom_fee)
        .execute(&mut **tx)
        .await?;
        ensure_affected(result.rows_affected(), "payment", payment.id)
    }

    async fn delete_payment(&self, tx: &mut Self::Tx, id: i64) -> Result<()> {
        ensure_valid(id)?;
        let result = sqlx::query("DELETE FROM payment WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        ensure_affected(result.rows_affected(), "payment", id)
    }
}

#[async_trait]
impl OrderStore for PgAggregateStore {
    async fn upsert_order(&self, tx: &mut Self::Tx, order: &Order) -> Result<UpsertOutcome> {
        // The no-op update makes RETURNING yield the existing row on conflict;
        // xmax is zero only for a freshly inserted tuple.
        let row = sqlx::query(
            r#"
            INSERT INTO orders (order_uid, track_number, entry, delivery_id, payment_id, locale,
                                internal_signature, customer_id, delivery_service, shardkey,
                                sm_id, date_created, oof_shard)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (order_uid) DO UPDATE SET order_uid = EXCLUDED.order_uid
            RETURNING id, (xmax = 0) AS created
            "#,
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(order.delivery_id)
        .bind(order.payment_id)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .fetch_one(&mut **tx)
        .await?;

        Ok(UpsertOutcome {
            id: OrderId::new(row.try_get("id")?),
            created: row.try_get("created")?,
        })
    }

    async fn get_order(&self, tx: &mut Self::Tx, id: OrderId) -> Result<Order> {
        ensure_valid(id.as_i64())?;
        let row = sqlx::query(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders o WHERE o.id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("order {id}")))?;
        Self::row_to_order(&row)
    }

    async fn recent_orders(&self, tx: &mut Self::Tx, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders o ORDER BY o.date_created DESC, o.id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn update_order(&self, tx: &mut Self::Tx, order: &Order) -> Result<()> {
        ensure_valid(order.id)?;
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET order_uid = $2, track_number = $3, entry = $4, delivery_id = $5, payment_id = $6,
                locale = $7, internal_signature = $8, customer_id = $9, delivery_service = $10,
                shardkey = $11, sm_id = $12, date_created = $13, oof_shard = $14
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(order.delivery_id)
        .bind(order.payment_id)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .execute(&mut **tx)
        .await?;
        ensure_affected(result.rows_affected(), "order", order.id)
    }

    async fn delete_order(&self, tx: &mut Self::Tx, id: OrderId) -> Result<()> {
        ensure_valid(id.as_i64())?;
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_i64())
            .execute(&mut **tx)
            .await?;
        ensure_affected(result.rows_affected(), "order", id.as_i64())
    }
}

#[async_trait]
impl ItemStore for PgAggregateStore {
    async fn insert_items(&self, tx: &mut Self::Tx, items: &[Item]) -> Result<Vec<i64>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(items.len());
        for chunk in items.chunks(ITEMS_PER_INSERT) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO items (order_id, chrt_id, track_number, price, rid, name, sale, \
                 size, total_price, nm_id, brand, status) ",
            );
            builder.push_values(chunk, |mut row, item| {
                row.push_bind(item.order_id)
                    .push_bind(item.chrt_id)
                    .push_bind(&item.track_number)
                    .push_bind(item.price)
                    .push_bind(&item.rid)
                    .push_bind(&item.name)
                    .push_bind(item.sale)
                    .push_bind(&item.size)
                    .push_bind(item.total_price)
                    .push_bind(item.nm_id)
                    .push_bind(&item.brand)
                    .push_bind(item.status);
            });
            builder.push(" RETURNING id");

            let chunk_ids: Vec<i64> = builder
                .build_query_scalar()
                .fetch_all(&mut **tx)
                .await?;
            ids.extend(chunk_ids);
        }
        tracing::trace!(count = ids.len(), "inserted items");
        Ok(ids)
    }

    async fn get_item(&self, tx: &mut Self::Tx, id: i64) -> Result<Item> {
        ensure_valid(id)?;
        let row = sqlx::query(concat!("SELECT ", item_columns!(), " FROM items WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("item {id}")))?;
        Self::row_to_item(&row)
    }

    async fn items_for_order(&self, tx: &mut Self::Tx, order_id: OrderId) -> Result<Vec<Item>> {
        ensure_valid(order_id.as_i64())?;
        let rows = sqlx::query(concat!(
            "SELECT ",
            item_columns!(),
            " FROM items WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id.as_i64())
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_item).collect()
    }

    async fn items_for_orders(
        &self,
        tx: &mut Self::Tx,
        order_ids: &[OrderId],
    ) -> Result<Vec<Item>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = order_ids.iter().map(OrderId::as_i64).collect();
        let rows = sqlx::query(concat!(
            "SELECT ",
            item_columns!(),
            " FROM items WHERE order_id = ANY($1) ORDER BY order_id, id"
        ))
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_item).collect()
    }

    async fn update_item(&self, tx: &mut Self::Tx, item: &Item) -> Result<()> {
        ensure_valid(item.id)?;
        let result = sqlx::query(
            r#"
            UPDATE items
            SET order_id = $2, chrt_id = $3, track_number = $4, price = $5, rid = $6, name = $7,
                sale = $8, size = $9, total_price = $10, nm_id = $11, brand = $12, status = $13
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut **tx)
        .await?;
        ensure_affected(result.rows_affected(), "item", item.id)
    }

    async fn delete_item(&self, tx: &mut Self::Tx, id: i64) -> Result<()> {
        ensure_valid(id)?;
        let result = sqlx::query("DELETE FROM items WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        ensure_affected(result.rows_affected(), "item", id)
    }
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    async fn load_aggregate(&self, tx: &mut Self::Tx, id: OrderId) -> Result<OrderAggregate> {
        ensure_valid(id.as_i64())?;
        let sql = format!("{AGGREGATE_JOIN} WHERE o.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("order {id}")))?;

        let mut aggregate = Self::row_to_aggregate(&row)?;
        aggregate.items = self.items_for_order(tx, id).await?;
        Ok(aggregate)
    }

    async fn load_recent(&self, tx: &mut Self::Tx, limit: i64) -> Result<Vec<OrderAggregate>> {
        let sql = format!("{AGGREGATE_JOIN} ORDER BY o.date_created DESC, o.id DESC LIMIT $1");
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&mut **tx).await?;
        let mut aggregates = rows
            .iter()
            .map(Self::row_to_aggregate)
            .collect::<Result<Vec<_>>>()?;
        if aggregates.is_empty() {
            return Ok(aggregates);
        }

        let ids: Vec<OrderId> = aggregates
            .iter()
            .map(|a| OrderId::new(a.order.id))
            .collect();
        let mut items = group_items(self.items_for_orders(tx, &ids).await?);
        for aggregate in &mut aggregates {
            aggregate.items = items.remove(&aggregate.order.id).unwrap_or_default();
        }
        Ok(aggregates)
    }
}

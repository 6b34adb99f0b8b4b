//! Postgres store
//!
//! All contended mutations are conditional single-statement updates
//! (`... WHERE stock_quantity >= $q`, `... WHERE used_count < usage_limit`)
//! executed inside one transaction, so row-level locking serializes
//! concurrent checkouts. Serialization failures and order-number unique
//! violations surface as `TransientConflict` for the engine to retry.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::cart::{CartLine, CartSnapshot};
use crate::domain::coupon::{Coupon, DiscountKind};
use crate::domain::order::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};
use crate::error::{EngineError, Result};
use crate::store::{CheckoutPlan, CheckoutStore, Page};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY id",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in rows {
            by_order.entry(item.order_id).or_default().push(item);
        }
        Ok(by_order)
    }
}

/// Postgres error codes the engine treats as retriable: serialization
/// failure, deadlock, and the order-number unique violation.
fn map_db_err(e: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db) = &e {
        if let Some(code) = db.code() {
            if code == "40001" || code == "40P01" || code == "23505" {
                return EngineError::TransientConflict;
            }
        }
    }
    EngineError::Storage(e)
}

fn decode_err(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> EngineError {
    EngineError::Storage(sqlx::Error::Decode(e.into()))
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    status: String,
    subtotal: Decimal,
    discount_amount: Decimal,
    shipping_fee: Decimal,
    total_amount: Decimal,
    coupon_id: Option<Uuid>,
    coupon_code: Option<String>,
    payment_method: String,
    payment_status: String,
    shipping_name: String,
    shipping_phone: String,
    shipping_address: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            status: OrderStatus::from_str(&self.status).map_err(decode_err)?,
            subtotal: self.subtotal,
            discount_amount: self.discount_amount,
            shipping_fee: self.shipping_fee,
            total_amount: self.total_amount,
            coupon_id: self.coupon_id,
            coupon_code: self.coupon_code,
            payment_method: PaymentMethod::from_str(&self.payment_method).map_err(decode_err)?,
            payment_status: PaymentStatus::from_str(&self.payment_status).map_err(decode_err)?,
            shipping_name: self.shipping_name,
            shipping_phone: self.shipping_phone,
            shipping_address: self.shipping_address,
            note: self.note,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    description: Option<String>,
    kind: String,
    discount_value: Decimal,
    min_order_amount: Decimal,
    max_discount_amount: Option<Decimal>,
    usage_limit: Option<i32>,
    used_count: i32,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl CouponRow {
    fn into_coupon(self) -> Result<Coupon> {
        Ok(Coupon {
            id: self.id,
            code: self.code,
            description: self.description,
            kind: DiscountKind::from_str(&self.kind).map_err(decode_err)?,
            value: self.discount_value,
            min_order_amount: self.min_order_amount,
            max_discount_amount: self.max_discount_amount,
            usage_limit: self.usage_limit,
            used_count: self.used_count,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl CheckoutStore for PgStore {
    async fn cart_snapshot(&self, user_id: Uuid) -> Result<CartSnapshot> {
        let cart_id: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM carts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        let (cart_id,) = cart_id.ok_or(EngineError::CartNotFound)?;

        let lines = sqlx::query_as::<_, CartLine>(
            "SELECT ci.product_id, p.name AS product_name, p.image_url AS product_image, \
                    p.price AS unit_price, ci.quantity \
             FROM cart_items ci JOIN products p ON p.id = ci.product_id \
             WHERE ci.cart_id = $1 ORDER BY ci.created_at",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(CartSnapshot { user_id, lines })
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(
            "SELECT * FROM coupons WHERE code = $1 AND is_active",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.map(CouponRow::into_coupon).transpose()
    }

    async fn commit_checkout(&self, plan: CheckoutPlan) -> Result<Order> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        // Coupon reservation: conditional increment, re-asserting validity
        // under the row lock. Zero rows means the window closed or the
        // limit was reached since pre-validation.
        if let Some(cu) = &plan.coupon {
            let res = sqlx::query(
                "UPDATE coupons SET used_count = used_count + 1 \
                 WHERE id = $1 AND is_active \
                   AND (starts_at IS NULL OR starts_at <= NOW()) \
                   AND (ends_at IS NULL OR ends_at >= NOW()) \
                   AND (usage_limit IS NULL OR used_count < usage_limit)",
            )
            .bind(cu.id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(EngineError::CouponExpired);
            }
        }

        // Stock reservation in ascending product-id order.
        let mut lines = plan.lines.clone();
        lines.sort_by_key(|l| l.product_id);
        for line in &lines {
            let res = sqlx::query(
                "UPDATE products SET stock_quantity = stock_quantity - $2, \
                        sold_quantity = sold_quantity + $2, updated_at = NOW() \
                 WHERE id = $1 AND stock_quantity >= $2",
            )
            .bind(line.product_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(EngineError::InsufficientStock {
                    product_id: line.product_id,
                });
            }
        }

        let order_id = Uuid::now_v7();
        let row = sqlx::query_as::<_, OrderRow>(
            "INSERT INTO orders (id, order_number, user_id, status, subtotal, discount_amount, \
                shipping_fee, total_amount, coupon_id, coupon_code, payment_method, \
                payment_status, shipping_name, shipping_phone, shipping_address, note, \
                created_at, updated_at) \
             VALUES ($1, $2, $3, 'PENDING', $4, $5, $6, $7, $8, $9, $10, 'PENDING', $11, $12, \
                $13, $14, NOW(), NOW()) RETURNING *",
        )
        .bind(order_id)
        .bind(&plan.order_number)
        .bind(plan.user_id)
        .bind(plan.totals.subtotal)
        .bind(plan.totals.discount)
        .bind(plan.totals.shipping_fee)
        .bind(plan.totals.total)
        .bind(plan.coupon.as_ref().map(|c| c.id))
        .bind(plan.coupon.as_ref().map(|c| c.code.as_str()))
        .bind(plan.payment_method.as_str())
        .bind(&plan.shipping_name)
        .bind(&plan.shipping_phone)
        .bind(&plan.shipping_address)
        .bind(plan.note.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        let mut items = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            let item = sqlx::query_as::<_, OrderItem>(
                "INSERT INTO order_items (id, order_id, product_id, product_name, \
                    product_image, unit_price, quantity, subtotal) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
            )
            .bind(Uuid::now_v7())
            .bind(order_id)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(line.product_image.as_deref())
            .bind(line.unit_price)
            .bind(line.quantity)
            .bind(line.subtotal())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?;
            items.push(item);
        }

        sqlx::query(
            "DELETE FROM cart_items WHERE cart_id = (SELECT id FROM carts WHERE user_id = $1)",
        )
        .bind(plan.user_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        row.into_order(items)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let mut items = self.fetch_items(&[order_id]).await?;
                Ok(Some(row.into_order(items.remove(&order_id).unwrap_or_default())?))
            }
        }
    }

    async fn list_orders(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<Page<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(i64::from(page_size))
        .bind(i64::from(page.saturating_sub(1)) * i64::from(page_size))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = self.fetch_items(&ids).await?;
        let data = rows
            .into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { data, total: total.0, page })
    }

    async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Order> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_err)?
            .ok_or(EngineError::OrderNotFound)?;
        if row.user_id != user_id {
            return Err(EngineError::Unauthorized);
        }
        let status = OrderStatus::from_str(&row.status).map_err(decode_err)?;
        if !status.can_cancel() {
            return Err(EngineError::InvalidTransition {
                from: status,
                to: OrderStatus::Cancelled,
            });
        }

        let mut items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY product_id",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_err)?;

        // Inventory release, sold clamped at zero.
        for item in &items {
            sqlx::query(
                "UPDATE products SET stock_quantity = stock_quantity + $2, \
                        sold_quantity = GREATEST(sold_quantity - $2, 0), updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind(item.product_id)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET status = 'CANCELLED', updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        items.sort_by_key(|i| i.id);
        row.into_order(items)
    }

    async fn update_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET status = $2, \
                    payment_status = CASE WHEN $3 THEN 'PAID' ELSE payment_status END, \
                    updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(order_id)
        .bind(status.as_str())
        .bind(status == OrderStatus::Delivered)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or(EngineError::OrderNotFound)?;

        let mut items = self.fetch_items(&[order_id]).await?;
        row.into_order(items.remove(&order_id).unwrap_or_default())
    }
}

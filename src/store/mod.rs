//! Persistence ports
//!
//! [`CheckoutStore`] is the transactional boundary of the engine. Each
//! method is atomic: `commit_checkout` in particular applies the coupon
//! increment, the stock decrements, the order insert and the cart clear as
//! one unit that commits or rolls back together.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::cart::{CartLine, CartSnapshot};
use crate::domain::coupon::Coupon;
use crate::domain::money::OrderTotals;
use crate::domain::order::{Order, OrderStatus, PaymentMethod};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

/// Coupon chosen for an order, carried into the commit so the store can
/// re-assert validity with a conditional increment.
#[derive(Clone, Debug)]
pub struct CouponUse {
    pub id: Uuid,
    pub code: String,
}

/// Everything the store needs to turn a cart snapshot into an order.
/// Built by the engine from already-validated inputs; the store re-checks
/// the contended guards (stock, coupon limit) atomically at commit time.
#[derive(Clone, Debug)]
pub struct CheckoutPlan {
    pub user_id: Uuid,
    pub order_number: String,
    pub totals: OrderTotals,
    pub coupon: Option<CouponUse>,
    pub payment_method: PaymentMethod,
    pub shipping_name: String,
    pub shipping_phone: String,
    pub shipping_address: String,
    pub note: Option<String>,
    pub lines: Vec<CartLine>,
}

#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Read the user's cart as a frozen snapshot. Fails with `CartNotFound`
    /// if the user has no cart; an empty snapshot is returned as-is and
    /// rejected by the engine.
    async fn cart_snapshot(&self, user_id: Uuid) -> Result<CartSnapshot>;

    /// Look up an active coupon by code. Inactive codes read as absent.
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>>;

    /// Atomically: reserve the coupon use (if any), reserve stock for every
    /// line, persist the order with its item snapshots and clear the cart.
    /// Any failure rolls the whole unit back. Stock updates are applied in
    /// ascending product-id order so concurrent checkouts cannot deadlock.
    /// A line whose product no longer exists fails with `InsufficientStock`.
    async fn commit_checkout(&self, plan: CheckoutPlan) -> Result<Order>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;

    /// Orders for one user, newest first. `page` is 1-based.
    async fn list_orders(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<Page<Order>>;

    /// Atomically cancel a `PENDING` order owned by `user_id` and release
    /// its reserved stock. Fails with `Unauthorized` for a non-owner and
    /// `InvalidTransition` when the order is no longer pending.
    async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Order>;

    /// Administrative transition. Moving to `DELIVERED` also marks the
    /// order paid.
    async fn update_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order>;
}

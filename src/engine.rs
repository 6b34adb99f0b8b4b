//! Order lifecycle manager
//!
//! Orchestrates checkout: cart snapshot, coupon validation, pricing,
//! order-number assignment and the atomic store commit. The engine owns
//! the bounded retry on transient conflicts; everything else is surfaced
//! to the caller as a typed failure with no partial state left behind.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::coupon::{Coupon, DiscountKind};
use crate::domain::money::compute_totals;
use crate::domain::order::{generate_order_number, Order, OrderStatus, PaymentMethod};
use crate::error::{EngineError, Result};
use crate::store::{CheckoutPlan, CheckoutStore, CouponUse, Page};

/// Whole-checkout attempts before a transient conflict is surfaced.
const MAX_CHECKOUT_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1))]
    pub shipping_name: String,
    #[validate(length(min = 1))]
    pub shipping_phone: String,
    #[validate(length(min = 1))]
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub note: Option<String>,
}

/// Read-only preview of what a coupon would yield against an amount.
#[derive(Debug, Serialize)]
pub struct CouponQuote {
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub discount: Decimal,
}

#[derive(Clone)]
pub struct CheckoutEngine {
    store: Arc<dyn CheckoutStore>,
}

impl CheckoutEngine {
    pub fn new(store: Arc<dyn CheckoutStore>) -> Self {
        Self { store }
    }

    /// Turn the caller's cart into a durable order.
    ///
    /// Steps 2-8 of the checkout (pricing, coupon reservation, stock
    /// reservation, order insert, cart clear) are one atomic unit inside
    /// the store; a failure at any point leaves cart, stock and coupon
    /// counters untouched. Transient conflicts retry the whole checkout,
    /// including a fresh order number.
    pub async fn create_order(&self, user_id: Uuid, request: CreateOrderRequest) -> Result<Order> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_create_order(user_id, &request).await {
                Err(EngineError::TransientConflict) if attempt < MAX_CHECKOUT_ATTEMPTS => {
                    warn!(%user_id, attempt, "checkout hit transient conflict, retrying");
                }
                Ok(order) => {
                    info!(%user_id, order_number = %order.order_number, total = %order.total_amount, "order created");
                    return Ok(order);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_create_order(&self, user_id: Uuid, request: &CreateOrderRequest) -> Result<Order> {
        let snapshot = self.store.cart_snapshot(user_id).await?;
        if snapshot.is_empty() {
            return Err(EngineError::EmptyCart);
        }
        let subtotal = snapshot.subtotal();

        let coupon = match &request.coupon_code {
            Some(code) if !code.is_empty() => Some(self.validate_coupon(code, subtotal).await?),
            _ => None,
        };
        let totals = compute_totals(subtotal, coupon.as_ref())?;

        let plan = CheckoutPlan {
            user_id,
            order_number: generate_order_number(),
            totals,
            coupon: coupon.map(|c| CouponUse { id: c.id, code: c.code }),
            payment_method: request.payment_method,
            shipping_name: request.shipping_name.clone(),
            shipping_phone: request.shipping_phone.clone(),
            shipping_address: request.shipping_address.clone(),
            note: request.note.clone(),
            lines: snapshot.lines,
        };
        self.store.commit_checkout(plan).await
    }

    async fn validate_coupon(&self, code: &str, subtotal: Decimal) -> Result<Coupon> {
        let coupon = self
            .store
            .find_coupon(code)
            .await?
            .ok_or(EngineError::CouponNotFound)?;
        if !coupon.is_valid_at(Utc::now()) {
            return Err(EngineError::CouponExpired);
        }
        if subtotal < coupon.min_order_amount {
            return Err(EngineError::MinimumNotMet {
                subtotal,
                minimum: coupon.min_order_amount,
            });
        }
        Ok(coupon)
    }

    /// Preview a coupon against an order amount without reserving it.
    pub async fn quote_coupon(&self, code: &str, order_amount: Decimal) -> Result<CouponQuote> {
        let coupon = self.validate_coupon(code, order_amount).await?;
        let discount = coupon.discount_for(order_amount);
        Ok(CouponQuote {
            code: coupon.code,
            kind: coupon.kind,
            value: coupon.value,
            min_order_amount: coupon.min_order_amount,
            max_discount_amount: coupon.max_discount_amount,
            discount,
        })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound)
    }

    pub async fn list_orders(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<Page<Order>> {
        self.store.list_orders(user_id, page, page_size).await
    }

    /// Owner-initiated cancellation; releases reserved stock atomically.
    pub async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Order> {
        let order = self.store.cancel_order(order_id, user_id).await?;
        info!(%order_id, %user_id, "order cancelled, stock released");
        Ok(order)
    }

    /// Administrative transition; the status string must name a known
    /// state. Delivering an order marks it paid.
    pub async fn update_order_status(&self, order_id: Uuid, status: &str) -> Result<Order> {
        let status = OrderStatus::from_str(status)?;
        self.store.update_order_status(order_id, status).await
    }
}

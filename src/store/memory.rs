//! In-memory store
//!
//! Backs the integration tests and local development without Postgres.
//! One mutex guards all state, so every store operation is trivially
//! serializable; `commit_checkout` validates every guard before mutating
//! anything, which gives the same all-or-nothing behavior as the SQL
//! transaction.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::cart::{CartLine, CartSnapshot};
use crate::domain::coupon::Coupon;
use crate::domain::order::{Order, OrderItem, OrderStatus, PaymentStatus};
use crate::domain::product::Product;
use crate::error::{EngineError, Result};
use crate::store::{CheckoutPlan, CheckoutStore, Page};

#[derive(Default)]
struct Inner {
    products: HashMap<Uuid, Product>,
    coupons: HashMap<String, Coupon>,
    // user_id -> (product_id, quantity), insertion-ordered
    carts: HashMap<Uuid, Vec<(Uuid, i32)>>,
    orders: HashMap<Uuid, Order>,
    order_numbers: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_product(&self, product: Product) {
        self.lock().products.insert(product.id, product);
    }

    pub fn insert_coupon(&self, coupon: Coupon) {
        self.lock().coupons.insert(coupon.code.clone(), coupon);
    }

    /// Create the cart lazily and add (or merge) a line.
    pub fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        let mut inner = self.lock();
        let cart = inner.carts.entry(user_id).or_default();
        if let Some(line) = cart.iter_mut().find(|(p, _)| *p == product_id) {
            line.1 += quantity;
        } else {
            cart.push((product_id, quantity));
        }
    }

    /// Create an empty cart without items.
    pub fn create_cart(&self, user_id: Uuid) {
        self.lock().carts.entry(user_id).or_default();
    }

    pub fn product(&self, id: Uuid) -> Option<Product> {
        self.lock().products.get(&id).cloned()
    }

    pub fn coupon_used_count(&self, code: &str) -> Option<i32> {
        self.lock().coupons.get(code).map(|c| c.used_count)
    }
}

#[async_trait]
impl CheckoutStore for MemoryStore {
    async fn cart_snapshot(&self, user_id: Uuid) -> Result<CartSnapshot> {
        let inner = self.lock();
        let cart = inner.carts.get(&user_id).ok_or(EngineError::CartNotFound)?;
        let mut lines = Vec::with_capacity(cart.len());
        for (product_id, quantity) in cart {
            let product = inner
                .products
                .get(product_id)
                .ok_or(EngineError::ProductNotFound)?;
            lines.push(CartLine {
                product_id: *product_id,
                product_name: product.name.clone(),
                product_image: product.image_url.clone(),
                unit_price: product.price,
                quantity: *quantity,
            });
        }
        Ok(CartSnapshot { user_id, lines })
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.lock().coupons.get(code).filter(|c| c.is_active).cloned())
    }

    async fn commit_checkout(&self, plan: CheckoutPlan) -> Result<Order> {
        let mut inner = self.lock();
        let now = Utc::now();

        if inner.order_numbers.contains(&plan.order_number) {
            return Err(EngineError::TransientConflict);
        }

        // Validate every guard before touching state.
        if let Some(cu) = &plan.coupon {
            let coupon = inner
                .coupons
                .get(&cu.code)
                .ok_or(EngineError::CouponNotFound)?;
            if !coupon.is_valid_at(now) {
                return Err(EngineError::CouponExpired);
            }
        }
        for line in &plan.lines {
            // A product that vanished since the snapshot reads as out of
            // stock, same as the conditional update in the SQL store.
            let product = inner.products.get(&line.product_id).ok_or(
                EngineError::InsufficientStock {
                    product_id: line.product_id,
                },
            )?;
            if product.stock_quantity < line.quantity {
                return Err(EngineError::InsufficientStock {
                    product_id: line.product_id,
                });
            }
        }

        // All guards hold; apply under the same lock.
        if let Some(cu) = &plan.coupon {
            if let Some(coupon) = inner.coupons.get_mut(&cu.code) {
                coupon.used_count += 1;
            }
        }
        for line in &plan.lines {
            if let Some(product) = inner.products.get_mut(&line.product_id) {
                product.stock_quantity -= line.quantity;
                product.sold_quantity += line.quantity;
                product.updated_at = now;
            }
        }

        let order_id = Uuid::now_v7();
        let items = plan
            .lines
            .iter()
            .map(|line| OrderItem {
                id: Uuid::now_v7(),
                order_id,
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                product_image: line.product_image.clone(),
                unit_price: line.unit_price,
                quantity: line.quantity,
                subtotal: line.subtotal(),
            })
            .collect();
        let order = Order {
            id: order_id,
            order_number: plan.order_number.clone(),
            user_id: plan.user_id,
            status: OrderStatus::Pending,
            subtotal: plan.totals.subtotal,
            discount_amount: plan.totals.discount,
            shipping_fee: plan.totals.shipping_fee,
            total_amount: plan.totals.total,
            coupon_id: plan.coupon.as_ref().map(|c| c.id),
            coupon_code: plan.coupon.as_ref().map(|c| c.code.clone()),
            payment_method: plan.payment_method,
            payment_status: PaymentStatus::Pending,
            shipping_name: plan.shipping_name,
            shipping_phone: plan.shipping_phone,
            shipping_address: plan.shipping_address,
            note: plan.note,
            items,
            created_at: now,
            updated_at: now,
        };

        inner.order_numbers.insert(plan.order_number);
        inner.orders.insert(order_id, order.clone());
        if let Some(cart) = inner.carts.get_mut(&plan.user_id) {
            cart.clear();
        }
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<Page<Order>> {
        let inner = self.lock();
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = orders.len() as i64;
        let offset = (page.saturating_sub(1) as usize) * page_size as usize;
        let data = orders
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Ok(Page { data, total, page })
    }

    async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Order> {
        let mut inner = self.lock();
        let now = Utc::now();

        let order = inner.orders.get(&order_id).ok_or(EngineError::OrderNotFound)?;
        if order.user_id != user_id {
            return Err(EngineError::Unauthorized);
        }
        if !order.status.can_cancel() {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let restock: Vec<(Uuid, i32)> = order
            .items
            .iter()
            .map(|i| (i.product_id, i.quantity))
            .collect();
        for (product_id, quantity) in restock {
            if let Some(product) = inner.products.get_mut(&product_id) {
                product.stock_quantity += quantity;
                product.sold_quantity = (product.sold_quantity - quantity).max(0);
                product.updated_at = now;
            }
        }

        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound)?;
        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        Ok(order.clone())
    }

    async fn update_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound)?;
        order.status = status;
        if status == OrderStatus::Delivered {
            order.payment_status = PaymentStatus::Paid;
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

//! Checkout engine integration tests, run against the in-memory store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use storefront_engine::domain::order::generate_order_number;
use storefront_engine::domain::{
    CartLine, CartSnapshot, Coupon, DiscountKind, Order, OrderStatus, OrderTotals, PaymentMethod,
    PaymentStatus, Product,
};
use storefront_engine::engine::{CheckoutEngine, CreateOrderRequest};
use storefront_engine::error::{EngineError, Result};
use storefront_engine::store::{CheckoutPlan, CheckoutStore, MemoryStore, Page};
use uuid::Uuid;

fn product(price: i64, stock: i32) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::new_v4(),
        name: "Widget".into(),
        description: None,
        price: Decimal::from(price),
        original_price: None,
        image_url: Some("https://cdn.example/widget.png".into()),
        stock_quantity: stock,
        sold_quantity: 0,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn coupon(code: &str, kind: DiscountKind, value: i64, min: i64, max: Option<i64>, limit: Option<i32>) -> Coupon {
    Coupon {
        id: Uuid::new_v4(),
        code: code.into(),
        description: None,
        kind,
        value: Decimal::from(value),
        min_order_amount: Decimal::from(min),
        max_discount_amount: max.map(Decimal::from),
        usage_limit: limit,
        used_count: 0,
        starts_at: None,
        ends_at: None,
        is_active: true,
        created_at: Utc::now(),
    }
}

fn request(coupon_code: Option<&str>) -> CreateOrderRequest {
    CreateOrderRequest {
        shipping_name: "Alex Tran".into(),
        shipping_phone: "0900000000".into(),
        shipping_address: "12 Market St".into(),
        payment_method: PaymentMethod::Cod,
        coupon_code: coupon_code.map(String::from),
        note: None,
    }
}

fn setup() -> (Arc<MemoryStore>, CheckoutEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = CheckoutEngine::new(store.clone());
    (store, engine)
}

/// Store whose next `failures_left` commits fail transiently, as a stand-in
/// for serialization failures the SQL store reports under contention.
struct FlakyCommits {
    inner: MemoryStore,
    failures_left: AtomicU32,
}

impl FlakyCommits {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl CheckoutStore for FlakyCommits {
    async fn cart_snapshot(&self, user_id: Uuid) -> Result<CartSnapshot> {
        self.inner.cart_snapshot(user_id).await
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        self.inner.find_coupon(code).await
    }

    async fn commit_checkout(&self, plan: CheckoutPlan) -> Result<Order> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(EngineError::TransientConflict);
        }
        self.inner.commit_checkout(plan).await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        self.inner.get_order(order_id).await
    }

    async fn list_orders(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<Page<Order>> {
        self.inner.list_orders(user_id, page, page_size).await
    }

    async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Order> {
        self.inner.cancel_order(order_id, user_id).await
    }

    async fn update_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
        self.inner.update_order_status(order_id, status).await
    }
}

#[tokio::test]
async fn sale20_scenario_prices_and_reserves() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);
    store.insert_coupon(coupon("SALE20", DiscountKind::Percentage, 20, 50_000, Some(50_000), Some(500)));

    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 2);

    let order = engine.create_order(user, request(Some("SALE20"))).await.unwrap();

    assert_eq!(order.subtotal, Decimal::from(200_000));
    assert_eq!(order.discount_amount, Decimal::from(40_000));
    assert_eq!(order.shipping_fee, Decimal::from(30_000));
    assert_eq!(order.total_amount, Decimal::from(190_000));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.coupon_code.as_deref(), Some("SALE20"));

    // total == subtotal - discount + shipping_fee, and items sum to subtotal
    assert_eq!(order.total_amount, order.subtotal - order.discount_amount + order.shipping_fee);
    let item_sum: Decimal = order.items.iter().map(|i| i.subtotal).sum();
    assert_eq!(item_sum, order.subtotal);

    // stock reserved, coupon spent, cart cleared
    let p = store.product(product_id).unwrap();
    assert_eq!(p.stock_quantity, 3);
    assert_eq!(p.sold_quantity, 2);
    assert_eq!(store.coupon_used_count("SALE20"), Some(1));
    let err = engine.create_order(user, request(None)).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyCart));
}

#[tokio::test]
async fn order_items_snapshot_survives_product_edits() {
    let (store, engine) = setup();
    let mut p = product(40_000, 10);
    let product_id = p.id;
    p.name = "Original name".into();
    store.insert_product(p);
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 1);

    let order = engine.create_order(user, request(None)).await.unwrap();

    // Later catalog edit must not rewrite the order snapshot.
    let mut edited = store.product(product_id).unwrap();
    edited.name = "Renamed".into();
    edited.price = Decimal::from(99_000);
    store.insert_product(edited);

    let fetched = engine.get_order(order.id).await.unwrap();
    assert_eq!(fetched.items[0].product_name, "Original name");
    assert_eq!(fetched.items[0].unit_price, Decimal::from(40_000));
}

#[tokio::test]
async fn free_shipping_above_threshold() {
    let (store, engine) = setup();
    let p = product(250_000, 10);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 2);

    let order = engine.create_order(user, request(None)).await.unwrap();
    assert_eq!(order.subtotal, Decimal::from(500_000));
    assert_eq!(order.shipping_fee, Decimal::ZERO);
    assert_eq!(order.total_amount, Decimal::from(500_000));
}

#[tokio::test]
async fn freeship_minimum_not_met_leaves_cart_untouched() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);
    store.insert_coupon(coupon("FREESHIP", DiscountKind::FixedAmount, 50_000, 300_000, None, None));
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 2);

    let err = engine.create_order(user, request(Some("FREESHIP"))).await.unwrap_err();
    assert!(matches!(err, EngineError::MinimumNotMet { .. }));

    // nothing moved
    assert_eq!(store.coupon_used_count("FREESHIP"), Some(0));
    let p = store.product(product_id).unwrap();
    assert_eq!(p.stock_quantity, 5);
    assert_eq!(p.sold_quantity, 0);
    let list = engine.list_orders(user, 1, 20).await.unwrap();
    assert_eq!(list.total, 0);
    // cart still has its line
    let order = engine.create_order(user, request(None)).await.unwrap();
    assert_eq!(order.subtotal, Decimal::from(200_000));
}

#[tokio::test]
async fn zero_stock_fails_without_spending_coupon() {
    let (store, engine) = setup();
    let p = product(100_000, 0);
    let product_id = p.id;
    store.insert_product(p);
    store.insert_coupon(coupon("SALE20", DiscountKind::Percentage, 20, 50_000, Some(50_000), Some(500)));
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 1);

    let err = engine.create_order(user, request(Some("SALE20"))).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock { product_id: id } if id == product_id));

    assert_eq!(store.coupon_used_count("SALE20"), Some(0));
    let list = engine.list_orders(user, 1, 20).await.unwrap();
    assert_eq!(list.total, 0);
}

#[tokio::test]
async fn missing_and_empty_carts_are_typed_failures() {
    let (store, engine) = setup();
    let user = Uuid::new_v4();
    let err = engine.create_order(user, request(None)).await.unwrap_err();
    assert!(matches!(err, EngineError::CartNotFound));

    store.create_cart(user);
    let err = engine.create_order(user, request(None)).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyCart));
}

#[tokio::test]
async fn unknown_coupon_code_rejected() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 1);

    let err = engine.create_order(user, request(Some("NOPE"))).await.unwrap_err();
    assert!(matches!(err, EngineError::CouponNotFound));

    // inactive coupons read as absent
    let mut c = coupon("DEAD", DiscountKind::Percentage, 10, 0, None, None);
    c.is_active = false;
    store.insert_coupon(c);
    let err = engine.create_order(user, request(Some("DEAD"))).await.unwrap_err();
    assert!(matches!(err, EngineError::CouponNotFound));
}

#[tokio::test]
async fn cancel_restores_stock_and_rejects_second_cancel() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 3);

    let order = engine.create_order(user, request(None)).await.unwrap();
    let p = store.product(product_id).unwrap();
    assert_eq!((p.stock_quantity, p.sold_quantity), (2, 3));

    let cancelled = engine.cancel_order(order.id, user).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    let p = store.product(product_id).unwrap();
    assert_eq!((p.stock_quantity, p.sold_quantity), (5, 0));

    let err = engine.cancel_order(order.id, user).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { from: OrderStatus::Cancelled, .. }));
}

#[tokio::test]
async fn only_the_owner_may_cancel() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 1);
    let order = engine.create_order(user, request(None)).await.unwrap();

    let err = engine.cancel_order(order.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized));
    // untouched
    assert_eq!(engine.get_order(order.id).await.unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn confirmed_orders_cannot_be_cancelled_by_owner() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 1);
    let order = engine.create_order(user, request(None)).await.unwrap();

    engine.update_order_status(order.id, "CONFIRMED").await.unwrap();
    let err = engine.cancel_order(order.id, user).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { from: OrderStatus::Confirmed, .. }));
}

#[tokio::test]
async fn delivered_marks_order_paid_and_unknown_status_rejected() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();
    store.add_to_cart(user, product_id, 1);
    let order = engine.create_order(user, request(None)).await.unwrap();

    let updated = engine.update_order_status(order.id, "DELIVERED").await.unwrap();
    assert_eq!(updated.status, OrderStatus::Delivered);
    assert_eq!(updated.payment_status, PaymentStatus::Paid);

    let err = engine.update_order_status(order.id, "SHIPPED").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidStatus(s) if s == "SHIPPED"));
}

#[tokio::test]
async fn coupon_quote_previews_without_spending() {
    let (store, engine) = setup();
    store.insert_coupon(coupon("SALE20", DiscountKind::Percentage, 20, 50_000, Some(50_000), Some(500)));

    let quote = engine.quote_coupon("SALE20", Decimal::from(200_000)).await.unwrap();
    assert_eq!(quote.discount, Decimal::from(40_000));
    assert_eq!(store.coupon_used_count("SALE20"), Some(0));

    let err = engine.quote_coupon("SALE20", Decimal::from(40_000)).await.unwrap_err();
    assert!(matches!(err, EngineError::MinimumNotMet { .. }));
}

#[tokio::test]
async fn listing_is_paginated_newest_first() {
    let (store, engine) = setup();
    let p = product(100_000, 100);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();

    let mut created = Vec::new();
    for _ in 0..3 {
        store.add_to_cart(user, product_id, 1);
        created.push(engine.create_order(user, request(None)).await.unwrap());
        // distinct created_at timestamps keep the newest-first assertion exact
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let page1 = engine.list_orders(user, 1, 2).await.unwrap();
    assert_eq!(page1.total, 3);
    assert_eq!(page1.data.len(), 2);
    let page2 = engine.list_orders(user, 2, 2).await.unwrap();
    assert_eq!(page2.data.len(), 1);
    // newest first: the last created order leads
    assert_eq!(page1.data[0].id, created[2].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_checkouts_never_oversell() {
    let (store, engine) = setup();
    let p = product(100_000, 5);
    let product_id = p.id;
    store.insert_product(p);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let user = Uuid::new_v4();
        store.add_to_cart(user, product_id, 1);
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_order(user, request(None)).await
        }));
    }

    let mut ok = 0;
    let mut out_of_stock = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::InsufficientStock { .. }) => out_of_stock += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 5);
    assert_eq!(out_of_stock, 5);
    let p = store.product(product_id).unwrap();
    assert_eq!(p.stock_quantity, 0);
    assert_eq!(p.sold_quantity, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_redemptions_respect_usage_limit() {
    let (store, engine) = setup();
    let p = product(100_000, 100);
    let product_id = p.id;
    store.insert_product(p);
    store.insert_coupon(coupon("LIMIT3", DiscountKind::FixedAmount, 10_000, 0, None, Some(3)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let user = Uuid::new_v4();
        store.add_to_cart(user, product_id, 1);
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_order(user, request(Some("LIMIT3"))).await
        }));
    }

    let mut ok = 0;
    let mut expired = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(order) => {
                assert_eq!(order.discount_amount, Decimal::from(10_000));
                ok += 1;
            }
            Err(EngineError::CouponExpired) => expired += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 3);
    assert_eq!(expired, 5);
    assert_eq!(store.coupon_used_count("LIMIT3"), Some(3));
}

#[tokio::test]
async fn checkout_retries_past_transient_conflicts() {
    let store = Arc::new(FlakyCommits::new(2));
    let engine = CheckoutEngine::new(store.clone());
    let p = product(100_000, 5);
    let product_id = p.id;
    store.inner.insert_product(p);
    let user = Uuid::new_v4();
    store.inner.add_to_cart(user, product_id, 2);

    // Two transient failures, then the third attempt lands.
    let order = engine.create_order(user, request(None)).await.unwrap();
    assert_eq!(order.subtotal, Decimal::from(200_000));
    assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);

    // Failed attempts reserved nothing.
    let p = store.inner.product(product_id).unwrap();
    assert_eq!((p.stock_quantity, p.sold_quantity), (3, 2));
}

#[tokio::test]
async fn checkout_gives_up_after_bounded_retries() {
    let store = Arc::new(FlakyCommits::new(3));
    let engine = CheckoutEngine::new(store.clone());
    let p = product(100_000, 5);
    let product_id = p.id;
    store.inner.insert_product(p);
    let user = Uuid::new_v4();
    store.inner.add_to_cart(user, product_id, 1);

    let err = engine.create_order(user, request(None)).await.unwrap_err();
    assert!(matches!(err, EngineError::TransientConflict));
    // Exactly three attempts were made before surfacing the conflict.
    assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);

    // Cart and stock untouched; a resubmission succeeds.
    let p = store.inner.product(product_id).unwrap();
    assert_eq!((p.stock_quantity, p.sold_quantity), (5, 0));
    let order = engine.create_order(user, request(None)).await.unwrap();
    assert_eq!(order.subtotal, Decimal::from(100_000));
}

#[tokio::test]
async fn vanished_product_reads_as_out_of_stock_at_commit() {
    let (store, _engine) = setup();
    let missing = Uuid::new_v4();
    let plan = CheckoutPlan {
        user_id: Uuid::new_v4(),
        order_number: generate_order_number(),
        totals: OrderTotals {
            subtotal: Decimal::from(100_000),
            discount: Decimal::ZERO,
            shipping_fee: Decimal::from(30_000),
            total: Decimal::from(130_000),
        },
        coupon: None,
        payment_method: PaymentMethod::Cod,
        shipping_name: "Alex Tran".into(),
        shipping_phone: "0900000000".into(),
        shipping_address: "12 Market St".into(),
        note: None,
        lines: vec![CartLine {
            product_id: missing,
            product_name: "Widget".into(),
            product_image: None,
            unit_price: Decimal::from(100_000),
            quantity: 1,
        }],
    };

    let err = store.commit_checkout(plan).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock { product_id } if product_id == missing));
}

#[tokio::test]
async fn order_numbers_unique_across_10k_checkouts() {
    let (store, engine) = setup();
    let p = product(10_000, 10_000);
    let product_id = p.id;
    store.insert_product(p);
    let user = Uuid::new_v4();

    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        store.add_to_cart(user, product_id, 1);
        // A client resubmits on the rare exhausted retry; the store's
        // uniqueness guard means every accepted order has a fresh number.
        let order = loop {
            match engine.create_order(user, request(None)).await {
                Ok(order) => break order,
                Err(EngineError::TransientConflict) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        };
        assert!(seen.insert(order.order_number), "duplicate order number issued");
    }
    assert_eq!(seen.len(), 10_000);
}

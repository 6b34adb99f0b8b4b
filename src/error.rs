//! Engine error taxonomy
//!
//! Every failure the checkout engine can surface is a typed variant here.
//! Nothing is swallowed; the only error the engine recovers from internally
//! is [`EngineError::TransientConflict`], which is retried a bounded number
//! of times before being returned to the caller.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::order::OrderStatus;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cart not found")]
    CartNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Product not found")]
    ProductNotFound,

    #[error("Coupon not found")]
    CouponNotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: Uuid },

    #[error("Coupon expired or usage limit reached")]
    CouponExpired,

    #[error("Order amount {subtotal} below coupon minimum {minimum}")]
    MinimumNotMet { subtotal: Decimal, minimum: Decimal },

    #[error("Not authorized to act on this order")]
    Unauthorized,

    #[error("Cannot change order status from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Invalid order status: {0}")]
    InvalidStatus(String),

    #[error("Transient conflict, safe to retry")]
    TransientConflict,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

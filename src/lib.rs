//! Storefront checkout and inventory-consistency engine
//!
//! The core of an online-storefront backend: the sequence that turns a
//! shopping cart into a durable order while atomically reserving stock,
//! applying a coupon and recording a reversible financial summary.
//!
//! ## Layout
//! - [`domain`] — pure types and money/discount calculation
//! - [`store`] — the transactional persistence port, with Postgres and
//!   in-memory implementations
//! - [`engine`] — checkout orchestration and the order status lifecycle
//! - [`http`] — the axum surface exposed to external collaborators

pub mod domain;
pub mod engine;
pub mod error;
pub mod http;
pub mod store;

pub use engine::{CheckoutEngine, CreateOrderRequest};
pub use error::{EngineError, Result};

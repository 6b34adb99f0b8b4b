//! Domain layer: pure types and calculation, no I/O.

pub mod cart;
pub mod coupon;
pub mod events;
pub mod money;
pub mod order;
pub mod product;

pub use cart::{CartLine, CartSnapshot};
pub use coupon::{Coupon, DiscountKind};
pub use events::OrderEvent;
pub use money::OrderTotals;
pub use order::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};
pub use product::Product;

//! Cart snapshot
//!
//! The immutable view of a user's cart taken at checkout time. Prices and
//! names are frozen here and passed forward into the commit; the cart is
//! never re-queried mid-checkout, so concurrent edits by the same user
//! cannot affect an in-flight order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::money::round_money;

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl CartLine {
    pub fn subtotal(&self) -> Decimal {
        round_money(self.unit_price * Decimal::from(self.quantity))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::subtotal).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: i64, qty: i32) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            product_name: "Widget".into(),
            product_image: None,
            unit_price: Decimal::from(price),
            quantity: qty,
        }
    }

    #[test]
    fn subtotal_sums_line_subtotals() {
        let snapshot = CartSnapshot {
            user_id: Uuid::new_v4(),
            lines: vec![line(100_000, 2), line(45_000, 1)],
        };
        assert_eq!(snapshot.subtotal(), Decimal::from(245_000));
        assert_eq!(
            snapshot.subtotal(),
            snapshot.lines.iter().map(CartLine::subtotal).sum()
        );
    }
}

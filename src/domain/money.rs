//! Money and discount calculation
//!
//! Pure functions over `Decimal` amounts in currency minor units. All
//! results carry two-decimal precision with half-up rounding; percentage
//! division always goes through an explicit rounding strategy.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::domain::coupon::Coupon;
use crate::error::{EngineError, Result};

/// Orders at or above this subtotal ship for free.
const FREE_SHIPPING_THRESHOLD: i64 = 500_000;
/// Flat fee below the free-shipping threshold.
const FLAT_SHIPPING_FEE: i64 = 30_000;

/// Round to currency precision, half-up.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn shipping_fee(subtotal: Decimal) -> Decimal {
    if subtotal >= Decimal::from(FREE_SHIPPING_THRESHOLD) {
        Decimal::ZERO
    } else {
        Decimal::from(FLAT_SHIPPING_FEE)
    }
}

/// The money fields of an order, computed once at checkout.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
}

/// Compute discount, shipping fee and total for a subtotal.
///
/// The caller is expected to have already rejected a coupon whose minimum
/// order amount is not met; this function enforces it again and fails with
/// [`EngineError::MinimumNotMet`] rather than silently pricing at zero.
pub fn compute_totals(subtotal: Decimal, coupon: Option<&Coupon>) -> Result<OrderTotals> {
    let discount = match coupon {
        None => Decimal::ZERO,
        Some(c) => {
            if subtotal < c.min_order_amount {
                return Err(EngineError::MinimumNotMet {
                    subtotal,
                    minimum: c.min_order_amount,
                });
            }
            c.discount_for(subtotal)
        }
    };
    // Clamping in Coupon::discount_for guarantees 0 <= discount <= subtotal.
    debug_assert!(discount >= Decimal::ZERO && discount <= subtotal);

    let shipping_fee = shipping_fee(subtotal);
    let total = round_money(subtotal - discount + shipping_fee);
    debug_assert!(total >= Decimal::ZERO);

    Ok(OrderTotals { subtotal, discount, shipping_fee, total })
}

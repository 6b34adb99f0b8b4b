//! Coupon definition
//!
//! A coupon is valid while active, inside its [starts_at, ends_at] window
//! and under its usage limit. The usage counter itself is only ever
//! incremented by the store, conditionally, inside the checkout transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::money::round_money;

/// Canonical discount kinds. Legacy synonyms (`PERCENT`, `FIXED`) are
/// normalized on the way in and never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    #[serde(alias = "PERCENT")]
    Percentage,
    #[serde(alias = "FIXED")]
    FixedAmount,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "PERCENTAGE",
            Self::FixedAmount => "FIXED_AMOUNT",
        }
    }
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DiscountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERCENTAGE" | "PERCENT" => Ok(Self::Percentage),
            "FIXED_AMOUNT" | "FIXED" => Ok(Self::FixedAmount),
            other => Err(format!("unknown discount kind: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    /// True while active, inside the validity window and under the limit.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |s| s <= now)
            && self.ends_at.map_or(true, |e| now <= e)
            && self
                .usage_limit
                .map_or(true, |limit| self.used_count < limit)
    }

    /// Discount yielded against `subtotal`, assuming the minimum order
    /// amount was already checked. Percentage discounts divide with an
    /// explicit half-up rounding; both kinds are clamped so the result
    /// stays in `[0, subtotal]`.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match self.kind {
            DiscountKind::Percentage => round_money(subtotal * self.value / Decimal::from(100)),
            DiscountKind::FixedAmount => round_money(self.value),
        };
        let capped = match self.max_discount_amount {
            Some(max) => raw.min(max),
            None => raw,
        };
        capped.min(subtotal)
    }
}

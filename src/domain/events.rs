//! Order lifecycle events
//!
//! Published to NATS after a successful commit, best-effort. Subscribers
//! (analytics, notifications) are external collaborators.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::order::OrderStatus;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order_id: Uuid,
        user_id: Uuid,
        order_number: String,
        total: Decimal,
    },
    Cancelled {
        order_id: Uuid,
        user_id: Uuid,
    },
    StatusChanged {
        order_id: Uuid,
        status: OrderStatus,
    },
}

impl OrderEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "orders.created",
            Self::Cancelled { .. } => "orders.cancelled",
            Self::StatusChanged { .. } => "orders.status_changed",
        }
    }
}

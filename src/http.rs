//! HTTP surface
//!
//! Thin axum layer over the engine. The caller's user id is an explicit
//! path parameter on every owner-scoped route; there is no ambient
//! security context.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::domain::events::OrderEvent;
use crate::domain::order::Order;
use crate::engine::{CheckoutEngine, CreateOrderRequest};
use crate::error::EngineError;
use crate::store::Page;

#[derive(Clone)]
pub struct AppState {
    pub engine: CheckoutEngine,
    pub nats: Option<async_nats::Client>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-engine"})) }))
        .route("/api/v1/users/:user_id/orders", post(create_order).get(list_orders))
        .route("/api/v1/users/:user_id/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", put(update_status))
        .route("/api/v1/coupons/validate", post(validate_coupon))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::CartNotFound
            | EngineError::OrderNotFound
            | EngineError::ProductNotFound
            | EngineError::CouponNotFound => StatusCode::NOT_FOUND,
            EngineError::EmptyCart
            | EngineError::CouponExpired
            | EngineError::MinimumNotMet { .. }
            | EngineError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            EngineError::InsufficientStock { .. } | EngineError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::Unauthorized => StatusCode::FORBIDDEN,
            EngineError::TransientConflict => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

async fn publish(state: &AppState, event: OrderEvent) {
    let Some(nats) = &state.nats else { return };
    match serde_json::to_vec(&event) {
        Ok(payload) => {
            if let Err(e) = nats.publish(event.subject(), payload.into()).await {
                tracing::warn!(error = %e, subject = event.subject(), "event publish failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "event serialization failed"),
    }
}

async fn create_order(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<CreateOrderRequest>) -> Result<(StatusCode, Json<Order>), Response> {
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e.to_string()}))).into_response())?;
    let order = s.engine.create_order(user_id, r).await.map_err(IntoResponse::into_response)?;
    publish(&s, OrderEvent::Created { order_id: order.id, user_id, order_number: order.order_number.clone(), total: order.total_amount }).await;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams { pub page: Option<u32>, pub page_size: Option<u32> }

async fn list_orders(State(s): State<AppState>, Path(user_id): Path<Uuid>, Query(p): Query<ListParams>) -> Result<Json<Page<Order>>, EngineError> {
    let page = p.page.unwrap_or(1).max(1);
    let page_size = p.page_size.unwrap_or(20).min(100);
    Ok(Json(s.engine.list_orders(user_id, page, page_size).await?))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, EngineError> {
    Ok(Json(s.engine.get_order(id).await?))
}

async fn cancel_order(State(s): State<AppState>, Path((user_id, id)): Path<(Uuid, Uuid)>) -> Result<Json<Order>, EngineError> {
    let order = s.engine.cancel_order(id, user_id).await?;
    publish(&s, OrderEvent::Cancelled { order_id: order.id, user_id }).await;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest { pub status: String }

async fn update_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<UpdateStatusRequest>) -> Result<Json<Order>, EngineError> {
    let order = s.engine.update_order_status(id, &r.status).await?;
    publish(&s, OrderEvent::StatusChanged { order_id: order.id, status: order.status }).await;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest { pub code: String, pub order_amount: Decimal }

async fn validate_coupon(State(s): State<AppState>, Json(r): Json<ValidateCouponRequest>) -> Result<Json<crate::engine::CouponQuote>, EngineError> {
    Ok(Json(s.engine.quote_coupon(&r.code, r.order_amount).await?))
}

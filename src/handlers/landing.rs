//! Payment-return landing routes.
//!
//! The success page locates the order server-side from the `order_id` or
//! `session_id` query parameter. Nothing else in the URL is trusted, and a
//! URL with neither parameter renders "no identifiable order" without
//! issuing any lookup; there is deliberately no most-recent-order fallback.

use crate::{
    errors::ServiceError,
    handlers::success_response,
    services::orders::resolve_return_reference,
    AppState,
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub fn landing_routes() -> Router<AppState> {
    Router::new()
        .route("/payment-success", get(payment_success))
        .route("/payment-failed", get(payment_failed))
        .route("/payment-cancelled", get(payment_cancelled))
}

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    #[serde(default, alias = "orderId")]
    pub order_id: Option<String>,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
}

/// View model rendered by the landing pages.
#[derive(Debug, Serialize, ToSchema)]
pub struct LandingView {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: uuid::Uuid,
    pub order_number: String,
    pub total_amount: rust_decimal::Decimal,
    pub currency: String,
    pub customer_email: String,
}

async fn payment_success(
    State(state): State<AppState>,
    Query(query): Query<ReturnQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    // Resolve the reference before touching storage: with no identifying
    // parameter this returns IdentificationError and no query is issued.
    let reference = resolve_return_reference(
        query.order_id.as_deref(),
        query.session_id.as_deref(),
    )?;

    let order = state.services.orders.find_by_reference(&reference).await?;
    Ok(success_response(LandingView {
        status: "confirmed",
        message: format!("Confirmation sent to {}", order.customer_email),
        order: Some(OrderSummary {
            id: order.id,
            order_number: order.order_number,
            total_amount: order.total_amount,
            currency: order.currency,
            customer_email: order.customer_email,
        }),
    }))
}

#[derive(Debug, Deserialize)]
pub struct FailureQuery {
    #[serde(default)]
    pub error: Option<String>,
}

async fn payment_failed(Query(query): Query<FailureQuery>) -> impl IntoResponse {
    success_response(LandingView {
        status: "failed",
        message: query
            .error
            .unwrap_or_else(|| "Your payment could not be processed.".to_string()),
        order: None,
    })
}

async fn payment_cancelled() -> impl IntoResponse {
    success_response(LandingView {
        status: "cancelled",
        message: "Your payment was cancelled. No charge was made.".to_string(),
        order: None,
    })
}

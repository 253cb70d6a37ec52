//! Checkout entry point and the drop-in / terminal control surface consumed
//! by the widget shell.

use crate::{
    errors::ServiceError,
    handlers::success_response,
    models::{Answer, CustomQuestion, CustomerInfo},
    services::providers::dropin::{WalletKind, WidgetEventKind},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(start_checkout))
        .route("/:cart_id/status", get(checkout_status))
        .route("/:cart_id/widget", get(widget_config))
        .route("/:cart_id/widget-events", post(widget_event))
        .route("/:cart_id/terminal/cancel", post(cancel_terminal))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub cart_id: Uuid,
    pub customer: CustomerInfo,
    #[serde(default)]
    pub answers: HashMap<String, Answer>,
    #[serde(default)]
    pub questions: Vec<CustomQuestion>,
}

async fn start_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let started = state
        .services
        .checkout
        .checkout(
            payload.cart_id,
            payload.customer,
            payload.answers,
            payload.questions,
        )
        .await?;
    Ok(success_response(started))
}

async fn checkout_status(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.checkout.status(cart_id)))
}

async fn widget_config(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.checkout.widget_config(cart_id)?,
    ))
}

/// Widget callback relayed by the embed shell.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WidgetEventRequest {
    /// Attempt the callback belongs to; callbacks from superseded attempts
    /// are ignored by the adapter.
    pub attempt: u64,
    #[serde(flatten)]
    pub event: WidgetEventBody,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum WidgetEventBody {
    /// Provider globals are registered in the shell's document.
    Ready,
    Success {
        status: String,
    },
    Error {
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    WalletSuccess {
        wallet: WalletKind,
        status: String,
    },
    WalletError {
        wallet: WalletKind,
        #[serde(default)]
        message: Option<String>,
    },
}

impl From<WidgetEventBody> for WidgetEventKind {
    fn from(body: WidgetEventBody) -> Self {
        match body {
            WidgetEventBody::Ready => WidgetEventKind::ScriptsReady,
            WidgetEventBody::Success { status } => WidgetEventKind::Success { status },
            WidgetEventBody::Error { stage, message } => WidgetEventKind::Error {
                stage: stage.unwrap_or_else(|| "payment".to_string()),
                message,
            },
            WidgetEventBody::WalletSuccess { wallet, status } => {
                WidgetEventKind::WalletSuccess { wallet, status }
            }
            WidgetEventBody::WalletError { wallet, message } => {
                WidgetEventKind::WalletError { wallet, message }
            }
        }
    }
}

async fn widget_event(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<WidgetEventRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .checkout
        .widget_event(cart_id, payload.attempt, payload.event.into())
        .await?;
    Ok(success_response(serde_json::json!({ "accepted": true })))
}

async fn cancel_terminal(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.checkout.cancel_terminal(cart_id).await?;
    Ok(success_response(serde_json::json!({ "cancelled": true })))
}

//! Cart mutation API consumed by the ticket/merchandise/seat-selection UI.

use crate::{
    errors::ServiceError,
    handlers::{created_response, no_content_response, success_response},
    models::{MerchandiseItem, SeatId, TicketType, Variant},
    services::cart::SeatResolution,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cart))
        .route("/:id", get(get_cart))
        .route("/:id/totals", get(get_totals))
        .route("/:id/tickets", post(add_ticket))
        .route("/:id/seat-selections/:intent_id", post(resolve_seat_selection))
        .route("/:id/merchandise", post(add_merchandise))
        .route("/:id/items/:line_id", put(update_line_quantity))
        .route("/:id/items/:line_id", delete(remove_line))
        .route("/:id/items/:line_id/seats", post(attach_seats))
        .route("/:id/clear", post(clear_cart))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCartRequest {
    pub event_id: Uuid,
    #[serde(default)]
    pub currency: Option<String>,
}

async fn create_cart(
    State(state): State<AppState>,
    Json(payload): Json<CreateCartRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let currency = payload
        .currency
        .unwrap_or_else(|| state.config.organizer.currency.clone());
    let cart = state.services.cart.create_cart(payload.event_id, currency).await;
    Ok(created_response(cart))
}

async fn get_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.cart.get_cart(id)?))
}

async fn get_totals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let totals = state
        .services
        .cart
        .totals(id, state.config.processing_fee_percent())?;
    Ok(success_response(totals))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddTicketRequest {
    pub ticket_type: TicketType,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

async fn add_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddTicketRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .cart
        .add_ticket(id, &payload.ticket_type, payload.quantity)
        .await?;
    Ok(success_response(outcome))
}

async fn resolve_seat_selection(
    State(state): State<AppState>,
    Path((id, intent_id)): Path<(Uuid, Uuid)>,
    Json(resolution): Json<SeatResolution>,
) -> Result<impl IntoResponse, ServiceError> {
    let line = state
        .services
        .cart
        .resolve_seat_intent(id, intent_id, resolution)
        .await?;
    Ok(success_response(line))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMerchandiseRequest {
    pub item: MerchandiseItem,
    #[serde(default)]
    pub variant: Option<Variant>,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

async fn add_merchandise(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddMerchandiseRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let line = state
        .services
        .cart
        .add_merchandise(id, &payload.item, payload.variant, payload.quantity)
        .await?;
    Ok(success_response(line))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

async fn update_line_quantity(
    State(state): State<AppState>,
    Path((id, line_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .cart
        .update_quantity(id, line_id, payload.quantity)
        .await?;
    Ok(success_response(state.services.cart.get_cart(id)?))
}

async fn remove_line(
    State(state): State<AppState>,
    Path((id, line_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.cart.remove_line(id, line_id).await?;
    Ok(no_content_response())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachSeatsRequest {
    pub seats: Vec<SeatId>,
}

async fn attach_seats(
    State(state): State<AppState>,
    Path((id, line_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AttachSeatsRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .cart
        .attach_seats(id, line_id, payload.seats)
        .await?;
    Ok(success_response(state.services.cart.get_cart(id)?))
}

async fn clear_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.cart.clear_cart(id).await?;
    Ok(no_content_response())
}

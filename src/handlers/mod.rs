pub mod carts;
pub mod checkout;
pub mod landing;
pub mod payment_webhooks;

use crate::{
    clients::{stripe::StripeClient, windcave::{WindcaveClient, WindcaveTerminalGateway}},
    config::AppConfig,
    events::EventSender,
    services::{
        cart::CartService,
        checkout::CheckoutService,
        orders::OrderService,
        providers::{dropin::DropInSessionApi, redirect::RedirectSessionApi, terminal::TerminalApi},
    },
    ApiResponse,
};
use axum::{http::StatusCode, response::IntoResponse, Json};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Services shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    /// Builds the service graph. Provider clients are constructed only when
    /// their credentials are configured; the selector blocks checkout for a
    /// selected provider whose client could not be built.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let cart = Arc::new(CartService::new(event_sender.clone()));
        let orders = Arc::new(OrderService::new(db, event_sender.clone()));

        let settings = &config.organizer;
        let redirect_api: Option<Arc<dyn RedirectSessionApi>> =
            match StripeClient::from_settings(settings) {
                Ok(client) => Some(Arc::new(client)),
                Err(_) => None,
            };
        let dropin_api: Option<Arc<dyn DropInSessionApi>> =
            match WindcaveClient::from_settings(settings) {
                Ok(client) => Some(Arc::new(client)),
                Err(_) => None,
            };
        let terminal_api: Option<Arc<dyn TerminalApi>> =
            match WindcaveTerminalGateway::from_settings(settings) {
                Ok(gateway) => Some(Arc::new(gateway)),
                Err(_) => None,
            };
        info!(
            provider = %settings.payment_provider,
            redirect = redirect_api.is_some(),
            dropin = dropin_api.is_some(),
            terminal = terminal_api.is_some(),
            "Provider clients initialized"
        );

        let checkout = Arc::new(CheckoutService::new(
            cart.clone(),
            orders.clone(),
            event_sender,
            config,
            redirect_api,
            dropin_api,
            terminal_api,
        ));

        Self {
            cart,
            orders,
            checkout,
        }
    }

    /// Test/composition hook: wires explicit provider seams instead of the
    /// credential-derived clients.
    pub fn with_provider_apis(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        redirect_api: Option<Arc<dyn RedirectSessionApi>>,
        dropin_api: Option<Arc<dyn DropInSessionApi>>,
        terminal_api: Option<Arc<dyn TerminalApi>>,
    ) -> Self {
        let cart = Arc::new(CartService::new(event_sender.clone()));
        let orders = Arc::new(OrderService::new(db, event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            cart.clone(),
            orders.clone(),
            event_sender,
            config,
            redirect_api,
            dropin_api,
            terminal_api,
        ));
        Self {
            cart,
            orders,
            checkout,
        }
    }
}

pub(crate) fn success_response<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub(crate) fn created_response<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

pub(crate) fn no_content_response() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

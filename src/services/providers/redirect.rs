//! Hosted redirect checkout adapter.
//!
//! Creates a server-side session and hands the browser to the provider's
//! hosted page. On return, the landing route locates the order server-side
//! from the `order_id`/`session_id` query parameters; nothing embedded in
//! the URL is trusted beyond the identifiers themselves.

use super::PaymentSession;
use crate::{
    config::CheckoutConfig,
    errors::ServiceError,
    models::CustomerInfo,
    services::cart::{CartLine, CartTotals},
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Request for a hosted checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct RedirectSessionRequest {
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub items: Vec<RedirectLineItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedirectLineItem {
    pub name: String,
    /// Minor units (cents).
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirectSessionCreated {
    pub session_id: String,
    pub hosted_url: String,
}

/// Provider seam for the hosted checkout flow.
#[async_trait::async_trait]
pub trait RedirectSessionApi: Send + Sync {
    async fn create_session(
        &self,
        request: &RedirectSessionRequest,
    ) -> Result<RedirectSessionCreated, ServiceError>;
}

#[derive(Clone)]
pub struct RedirectAdapter {
    api: Arc<dyn RedirectSessionApi>,
    checkout: CheckoutConfig,
}

impl RedirectAdapter {
    pub fn new(api: Arc<dyn RedirectSessionApi>, checkout: CheckoutConfig) -> Self {
        Self { api, checkout }
    }

    /// Creates a hosted checkout session for the current cart snapshot.
    #[instrument(skip(self, lines, totals, customer))]
    pub async fn create_session(
        &self,
        lines: &[CartLine],
        totals: &CartTotals,
        customer: &CustomerInfo,
    ) -> Result<PaymentSession, ServiceError> {
        let mut items: Vec<RedirectLineItem> = lines
            .iter()
            .map(|line| RedirectLineItem {
                name: line.description.clone(),
                unit_amount: to_minor_units(line.unit_price),
                quantity: i64::from(line.quantity),
            })
            .collect();
        if totals.processing_fee > Decimal::ZERO {
            items.push(RedirectLineItem {
                name: "Processing fee".to_string(),
                unit_amount: to_minor_units(totals.processing_fee),
                quantity: 1,
            });
        }

        let request = RedirectSessionRequest {
            currency: totals.currency.to_lowercase(),
            customer_email: customer.email.clone(),
            // The provider substitutes the session id on return; the landing
            // route resolves the order from it server-side.
            success_url: format!(
                "{}?session_id={{CHECKOUT_SESSION_ID}}",
                self.checkout.success_url
            ),
            cancel_url: self.checkout.cancel_url.clone(),
            items,
        };

        let created = self.api.create_session(&request).await?;
        info!(session_id = %created.session_id, "Hosted checkout session created");

        Ok(PaymentSession::Redirect {
            session_id: created.session_id,
            hosted_url: created.hosted_url,
        })
    }
}

fn to_minor_units(amount: Decimal) -> i64 {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .unwrap_or(0)
}

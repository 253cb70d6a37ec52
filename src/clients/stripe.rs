//! Stripe Checkout client for the hosted redirect flow. Sessions are created
//! server-side; the browser is then navigated to the returned hosted URL.

use crate::{
    errors::ServiceError,
    models::OrganizerSettings,
    services::providers::redirect::{
        RedirectSessionApi, RedirectSessionCreated, RedirectSessionRequest,
    },
};
use serde::Deserialize;
use tracing::{debug, instrument};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn from_settings(settings: &OrganizerSettings) -> Result<Self, ServiceError> {
        let secret_key = settings.stripe_secret_key.clone().ok_or_else(|| {
            ServiceError::ConfigurationError("Stripe secret key is not configured".to_string())
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: STRIPE_API_BASE.to_string(),
            secret_key,
        })
    }

    /// Points the client at a different base URL. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: String,
}

#[async_trait::async_trait]
impl RedirectSessionApi for StripeClient {
    #[instrument(skip(self, request))]
    async fn create_session(
        &self,
        request: &RedirectSessionRequest,
    ) -> Result<RedirectSessionCreated, ServiceError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("customer_email".to_string(), request.customer_email.clone()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];
        for (index, item) in request.items.iter().enumerate() {
            form.push((
                format!("line_items[{}][price_data][currency]", index),
                request.currency.clone(),
            ));
            form.push((
                format!("line_items[{}][price_data][unit_amount]", index),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("line_items[{}][price_data][product_data][name]", index),
                item.name.clone(),
            ));
            form.push((format!("line_items[{}][quantity]", index), item.quantity.to_string()));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("Stripe request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalApiError(format!(
                "Stripe API error: status {} - {}",
                status, body
            )));
        }

        let session: CheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("Invalid Stripe response: {}", e)))?;
        debug!(session_id = %session.id, "Stripe Checkout session created");

        Ok(RedirectSessionCreated {
            session_id: session.id,
            hosted_url: session.url,
        })
    }
}

//! Windcave REST client. Serves both the embedded drop-in flow (session
//! create) and the HIT terminal flow (session with terminal node, status
//! polling, terminal_action cancel).

use crate::{
    errors::ServiceError,
    models::OrganizerSettings,
    services::providers::{
        dropin::{DropInSessionApi, DropInSessionCreated, DropInSessionRequest},
        terminal::{TerminalApi, TerminalInitiated, TerminalPurchaseRequest, TerminalStatusResponse},
        PaymentLink,
    },
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct WindcaveClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    api_key: String,
}

impl WindcaveClient {
    /// REST credentials for the drop-in flow.
    pub fn from_settings(settings: &OrganizerSettings) -> Result<Self, ServiceError> {
        let username = settings.windcave_username.clone().ok_or_else(|| {
            ServiceError::ConfigurationError("Windcave username is not configured".to_string())
        })?;
        let api_key = settings.windcave_api_key.clone().ok_or_else(|| {
            ServiceError::ConfigurationError("Windcave API key is not configured".to_string())
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: settings.windcave_endpoint.base_url().to_string(),
            username,
            api_key,
        })
    }

    /// HIT credentials for the terminal flow.
    pub fn terminal_from_settings(settings: &OrganizerSettings) -> Result<Self, ServiceError> {
        let username = settings.windcave_hit_username.clone().ok_or_else(|| {
            ServiceError::ConfigurationError("Windcave HIT username is not configured".to_string())
        })?;
        let api_key = settings.windcave_hit_key.clone().ok_or_else(|| {
            ServiceError::ConfigurationError("Windcave HIT key is not configured".to_string())
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: settings.windcave_endpoint.base_url().to_string(),
            username,
            api_key,
        })
    }

    /// Points the client at a different base URL. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.username, self.api_key);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    fn sessions_url(&self) -> String {
        format!("{}/api/v1/sessions", self.base_url)
    }

    async fn create_session(
        &self,
        payload: &SessionPayload,
    ) -> Result<SessionResponse, ServiceError> {
        let response = self
            .http
            .post(self.sessions_url())
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("Windcave request failed: {}", e)))?;

        Self::parse(response).await
    }

    #[instrument(skip(self))]
    pub async fn session_status(&self, session_id: &str) -> Result<SessionResponse, ServiceError> {
        let response = self
            .http
            .get(format!("{}/{}", self.sessions_url(), session_id))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("Windcave request failed: {}", e)))?;

        Self::parse(response).await
    }

    #[instrument(skip(self))]
    pub async fn terminal_cancel(&self, session_id: &str) -> Result<(), ServiceError> {
        let response = self
            .http
            .post(format!("{}/{}/terminal_action", self.sessions_url(), session_id))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "action": "cancel" }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("Windcave request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalApiError(format!(
                "Windcave API error: status {} - {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn parse(response: reqwest::Response) -> Result<SessionResponse, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalApiError(format!(
                "Windcave API error: status {} - {}",
                status, body
            )));
        }
        response
            .json::<SessionResponse>()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("Invalid Windcave response: {}", e)))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    #[serde(rename = "type")]
    session_type: String,
    amount: String,
    currency: String,
    callback_urls: CallbackUrls,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal: Option<TerminalNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackUrls {
    approved: String,
    declined: String,
    cancelled: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TerminalNode {
    station: String,
    slot_id: i32,
    enable_tip: i32,
    skip_surcharge: i32,
    pay_at_table: i32,
    one_swipe: i32,
    cardholder_present: i32,
    auth_type: String,
    complete_type: String,
    billing_id: String,
    txn_data1: String,
    txn_data2: String,
    txn_data3: String,
    receipt_email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub links: Option<Vec<PaymentLink>>,
    #[serde(default)]
    pub terminal: Option<TerminalResponseNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResponseNode {
    #[serde(default)]
    pub pinpad: Option<Pinpad>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pinpad {
    #[serde(default)]
    pub display_line1: Option<String>,
    #[serde(default)]
    pub display_line2: Option<String>,
}

#[async_trait::async_trait]
impl DropInSessionApi for WindcaveClient {
    async fn create_session(
        &self,
        request: &DropInSessionRequest,
    ) -> Result<DropInSessionCreated, ServiceError> {
        let payload = SessionPayload {
            session_type: "purchase".to_string(),
            amount: format!("{:.2}", request.amount.round_dp(2)),
            currency: request.currency.clone(),
            callback_urls: CallbackUrls {
                approved: request.approved_url.clone(),
                declined: request.declined_url.clone(),
                cancelled: request.cancelled_url.clone(),
            },
            terminal: None,
        };

        let response = WindcaveClient::create_session(self, &payload).await?;
        debug!(session_id = %response.id, "Windcave drop-in session created");

        let links = response.links.unwrap_or_default();
        if links.is_empty() {
            return Err(ServiceError::ExternalApiError(
                "Invalid Windcave response: missing links array".to_string(),
            ));
        }
        Ok(DropInSessionCreated {
            session_id: response.id,
            links,
        })
    }
}

/// [`TerminalApi`] implementation over the Windcave HIT REST surface.
#[derive(Clone)]
pub struct WindcaveTerminalGateway {
    client: WindcaveClient,
    station_id: String,
}

impl WindcaveTerminalGateway {
    pub fn from_settings(settings: &OrganizerSettings) -> Result<Self, ServiceError> {
        let station_id = settings.windcave_station_id.clone().ok_or_else(|| {
            ServiceError::ConfigurationError(
                "Terminal station ID is not configured for this organization".to_string(),
            )
        })?;
        Ok(Self {
            client: WindcaveClient::terminal_from_settings(settings)?,
            station_id,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(base_url);
        self
    }
}

#[async_trait::async_trait]
impl TerminalApi for WindcaveTerminalGateway {
    async fn initiate(
        &self,
        request: &TerminalPurchaseRequest,
    ) -> Result<TerminalInitiated, ServiceError> {
        let payload = SessionPayload {
            session_type: "purchase".to_string(),
            amount: format!("{:.2}", request.amount.round_dp(2)),
            currency: request.currency.clone(),
            callback_urls: CallbackUrls {
                approved: String::new(),
                declined: String::new(),
                cancelled: String::new(),
            },
            terminal: Some(TerminalNode {
                station: self.station_id.clone(),
                slot_id: 1,
                enable_tip: 0,
                skip_surcharge: 0,
                pay_at_table: 0,
                one_swipe: 0,
                cardholder_present: 1,
                auth_type: "Purchase".to_string(),
                complete_type: "Final".to_string(),
                billing_id: request.billing_id.clone(),
                txn_data1: request.event_name.clone(),
                txn_data2: request.customer_name.clone(),
                txn_data3: request.customer_email.clone(),
                receipt_email: request.receipt_email.clone(),
            }),
        };

        let response = self.client.create_session(&payload).await?;
        Ok(TerminalInitiated {
            txn_ref: response.id,
            message: Some("Present card to terminal".to_string()),
        })
    }

    async fn status(&self, txn_ref: &str) -> Result<TerminalStatusResponse, ServiceError> {
        let response = self.client.session_status(txn_ref).await?;
        let state = response
            .state
            .as_deref()
            .unwrap_or("")
            .to_ascii_lowercase();

        let (complete, transaction_success, message) = match state.as_str() {
            "complete" | "completed" | "done" => {
                (true, Some(true), Some("Payment completed successfully".to_string()))
            }
            "failed" | "declined" => (true, Some(false), Some("Payment declined".to_string())),
            "cancelled" | "expired" => (true, Some(false), Some("Payment cancelled".to_string())),
            _ => (false, None, None),
        };

        let pinpad = response.terminal.and_then(|terminal| terminal.pinpad);
        Ok(TerminalStatusResponse {
            complete,
            transaction_success,
            display_line1: pinpad.as_ref().and_then(|p| p.display_line1.clone()),
            display_line2: pinpad.and_then(|p| p.display_line2),
            message,
        })
    }

    async fn cancel(&self, txn_ref: &str) -> Result<(), ServiceError> {
        self.client.terminal_cancel(txn_ref).await
    }
}

//! Domain types shared across the checkout engine.
//!
//! These mirror what the storefront configures per organizer: ticket types,
//! merchandise, organizer-defined questions, and the payment-provider
//! settings that drive adapter selection.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Seat identifier as assigned by the seat-map editor (e.g. "A-12").
pub type SeatId = String;

/// A purchasable ticket tier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    pub quantity_available: i32,
    #[serde(default)]
    pub quantity_sold: i32,
    /// When true, adding this ticket yields a pending seat-selection intent
    /// instead of committing a cart line directly.
    #[serde(default)]
    pub seat_maps_enabled: bool,
}

impl TicketType {
    pub fn remaining(&self) -> i32 {
        self.quantity_available - self.quantity_sold
    }
}

/// Merchandise sold alongside tickets (shirts, posters, ...).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MerchandiseItem {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
}

/// Size/color selection for a merchandise line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Variant {
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Organizer-defined checkout question.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomQuestion {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    Email,
    Phone,
    Select,
    /// Multi-select; an empty selection counts as unanswered.
    CheckboxGroup,
    Checkbox,
}

/// Answer to a custom question. The wire form is either a string, a string
/// array (checkbox groups) or a boolean (single checkboxes).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Answer {
    Text(String),
    Selections(Vec<String>),
    Flag(bool),
}

impl Answer {
    /// Trimmed string form used by the required-field rule. Checkbox groups
    /// reduce to empty when nothing is selected.
    pub fn trimmed(&self) -> String {
        match self {
            Answer::Text(s) => s.trim().to_string(),
            Answer::Selections(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(","),
            Answer::Flag(true) => "true".to_string(),
            Answer::Flag(false) => String::new(),
        }
    }
}

/// Contact details collected before payment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Windcave environment selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindcaveEndpoint {
    #[default]
    Uat,
    Sec,
}

impl WindcaveEndpoint {
    pub fn base_url(&self) -> &'static str {
        match self {
            WindcaveEndpoint::Sec => "https://sec.windcave.com",
            WindcaveEndpoint::Uat => "https://uat.windcave.com",
        }
    }
}

/// Per-organizer payment configuration, as set up in the dashboard.
///
/// The provider selector reads `payment_provider` and verifies the matching
/// credential set is complete before any session is created.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrganizerSettings {
    pub organization_name: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// "stripe", "windcave" or "windcave_terminal"
    pub payment_provider: String,
    #[serde(default)]
    pub stripe_publishable_key: Option<String>,
    #[serde(default)]
    pub stripe_secret_key: Option<String>,
    #[serde(default)]
    pub windcave_enabled: bool,
    #[serde(default)]
    pub windcave_username: Option<String>,
    #[serde(default)]
    pub windcave_api_key: Option<String>,
    #[serde(default)]
    pub windcave_endpoint: WindcaveEndpoint,
    #[serde(default)]
    pub windcave_hit_username: Option<String>,
    #[serde(default)]
    pub windcave_hit_key: Option<String>,
    #[serde(default)]
    pub windcave_station_id: Option<String>,
    /// Wallet sub-flows are configured into the drop-in widget only when the
    /// corresponding merchant identifier is present.
    #[serde(default)]
    pub apple_pay_merchant_id: Option<String>,
    #[serde(default)]
    pub google_pay_merchant_id: Option<String>,
}

fn default_currency() -> String {
    "NZD".to_string()
}

impl Default for OrganizerSettings {
    fn default() -> Self {
        Self {
            organization_name: "Event Tickets".to_string(),
            currency: default_currency(),
            payment_provider: "stripe".to_string(),
            stripe_publishable_key: None,
            stripe_secret_key: None,
            windcave_enabled: false,
            windcave_username: None,
            windcave_api_key: None,
            windcave_endpoint: WindcaveEndpoint::default(),
            windcave_hit_username: None,
            windcave_hit_key: None,
            windcave_station_id: None,
            apple_pay_merchant_id: None,
            google_pay_merchant_id: None,
        }
    }
}

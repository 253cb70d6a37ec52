//! Payment provider adapters.
//!
//! Exactly one adapter is active per checkout attempt, chosen by
//! [`select_provider`] from organizer configuration. There is no fallback:
//! incomplete configuration blocks the pay action before any remote call.

pub mod dropin;
pub mod redirect;
pub mod terminal;

use crate::{errors::ServiceError, models::OrganizerSettings};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    /// Hosted payment page; browser is handed off and returns via redirect.
    StripeCheckout,
    /// Embedded drop-in widget with async script loading and 3-D Secure.
    WindcaveDropIn,
    /// Physical card terminal driven by a polling loop.
    WindcaveTerminal,
}

/// Maps organizer configuration to an adapter, verifying the prerequisite
/// credentials exist. Missing prerequisites are a `ConfigurationError`, never
/// a silent downgrade to another provider.
pub fn select_provider(settings: &OrganizerSettings) -> Result<ProviderKind, ServiceError> {
    match settings.payment_provider.as_str() {
        "stripe" => {
            if settings.stripe_secret_key.is_none() || settings.stripe_publishable_key.is_none() {
                return Err(ServiceError::ConfigurationError(
                    "Stripe is selected but no API keys are configured".to_string(),
                ));
            }
            Ok(ProviderKind::StripeCheckout)
        }
        "windcave" => {
            if !settings.windcave_enabled {
                return Err(ServiceError::ConfigurationError(
                    "Windcave is selected but not enabled for this organization".to_string(),
                ));
            }
            if settings.windcave_username.is_none() || settings.windcave_api_key.is_none() {
                return Err(ServiceError::ConfigurationError(
                    "Windcave is enabled but REST credentials are missing".to_string(),
                ));
            }
            Ok(ProviderKind::WindcaveDropIn)
        }
        "windcave_terminal" => {
            if !settings.windcave_enabled {
                return Err(ServiceError::ConfigurationError(
                    "Windcave terminal is selected but Windcave is not enabled".to_string(),
                ));
            }
            if settings.windcave_hit_username.is_none() || settings.windcave_hit_key.is_none() {
                return Err(ServiceError::ConfigurationError(
                    "Windcave HIT terminal credentials are missing".to_string(),
                ));
            }
            if settings.windcave_station_id.is_none() {
                return Err(ServiceError::ConfigurationError(
                    "Terminal station ID is not configured for this organization".to_string(),
                ));
            }
            Ok(ProviderKind::WindcaveTerminal)
        }
        other => Err(ServiceError::ConfigurationError(format!(
            "Unknown payment provider '{}'",
            other
        ))),
    }
}

/// Hypermedia action returned by the drop-in session endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentLink {
    pub href: String,
    pub rel: String,
    pub method: String,
}

/// Provider-specific payment session handle. Created once per checkout
/// attempt and never reused across retries.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "provider")]
pub enum PaymentSession {
    Redirect {
        session_id: String,
        hosted_url: String,
    },
    DropIn {
        session_id: String,
        links: Vec<PaymentLink>,
        /// Provider-mandated string-encoded decimal, two places.
        total_value: String,
    },
    Terminal {
        txn_ref: String,
    },
}

impl PaymentSession {
    pub fn session_ref(&self) -> &str {
        match self {
            PaymentSession::Redirect { session_id, .. } => session_id,
            PaymentSession::DropIn { session_id, .. } => session_id,
            PaymentSession::Terminal { txn_ref } => txn_ref,
        }
    }
}

/// Extracts the session reference embedded in the last hypermedia link.
///
/// Both the success-callback path and the reconciliation path must use this
/// same extraction so duplicate finalize calls are detectable.
pub fn session_ref_from_links(links: &[PaymentLink]) -> Option<String> {
    let href = &links.last()?.href;
    if let Ok(parsed) = url::Url::parse(href) {
        return parsed
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .last()
            .map(|segment| segment.to_string());
    }
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}

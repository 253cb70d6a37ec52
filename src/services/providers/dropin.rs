//! Embedded drop-in payment widget adapter.
//!
//! The most intricate state machine in the engine. Script loading and widget
//! mounting live behind [`DropInRuntime`] so the same machine drives the HTTP
//! embed bridge and test harnesses. Provider callbacks arrive on an mpsc
//! channel as [`WidgetEvent`]s stamped with the attempt id; callbacks from a
//! superseded attempt are ignored.

use super::{session_ref_from_links, PaymentLink};
use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::OrganizerSettings,
    services::orders::{FinalizeContext, OrderService},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

/// Success-callback status that signals a 3-D Secure challenge step. The
/// provider fires the same callback for the intermediate challenge and for
/// true completion; only the status string distinguishes them.
pub const THREE_D_SECURE_STATUS: &str = "3DSecure";

/// Provider script paths, loaded relative to the environment base URL.
pub const DROPIN_SCRIPT_PATHS: [&str; 6] = [
    "/js/lib/drop-in-v1.js",
    "/js/windcavepayments-dropin-v1.js",
    "/js/lib/hosted-fields-v1.js",
    "/js/windcavepayments-hostedfields-v1.js",
    "/js/windcavepayments-applepay-v1.js",
    "/js/windcavepayments-googlepay-v1.js",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DropInState {
    Idle,
    ScriptsLoading,
    WidgetReady,
    AwaitingInput,
    ChallengeRequired,
    Completing,
    Succeeded,
    Failed,
}

/// Card-input display flags. These must be set consistently: mis-set flags
/// break card auto-fill on certain browsers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardOptions {
    pub enable_auto_complete: bool,
    pub enable_secure_form: bool,
    pub enable_form_validation: bool,
    pub enable_card_validation: bool,
    pub enable_card_formatting: bool,
    pub supported_cards: Vec<String>,
}

impl Default for CardOptions {
    fn default() -> Self {
        Self {
            enable_auto_complete: true,
            enable_secure_form: true,
            enable_form_validation: true,
            enable_card_validation: true,
            enable_card_formatting: true,
            supported_cards: vec!["visa".into(), "mastercard".into(), "amex".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    ApplePay,
    GooglePay,
}

/// Mobile-wallet sub-flow configuration. Only built when the merchant
/// identifier is present; each wallet has its own callback pair because
/// wallet completion can occur without the card form ever submitting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    pub merchant_id: String,
    pub merchant_name: String,
    pub country_code: String,
    pub currency_code: String,
    pub supported_networks: Vec<String>,
}

/// Everything the embed shell needs to construct the widget once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    pub container: String,
    pub session_id: String,
    pub links: Vec<PaymentLink>,
    /// String-encoded decimal, two places, as the provider mandates.
    pub total_value: String,
    pub card: CardOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apple_pay: Option<WalletConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_pay: Option<WalletConfig>,
    pub script_urls: Vec<String>,
}

/// Builds the widget configuration for one session. Wallet sub-flows are
/// included only when their merchant identifiers are configured.
pub fn build_widget_config(
    settings: &OrganizerSettings,
    session_id: &str,
    links: Vec<PaymentLink>,
    total: Decimal,
) -> WidgetConfig {
    let base_url = settings.windcave_endpoint.base_url();
    let wallet = |merchant_id: &str| WalletConfig {
        merchant_id: merchant_id.to_string(),
        merchant_name: settings.organization_name.clone(),
        country_code: "NZ".to_string(),
        currency_code: settings.currency.clone(),
        supported_networks: vec!["visa".into(), "mastercard".into(), "amex".into()],
    };

    WidgetConfig {
        container: "windcave-drop-in".to_string(),
        session_id: session_id.to_string(),
        links,
        total_value: format!("{:.2}", total.round_dp(2)),
        card: CardOptions::default(),
        apple_pay: settings
            .apple_pay_merchant_id
            .as_deref()
            .map(wallet),
        google_pay: settings
            .google_pay_merchant_id
            .as_deref()
            .map(wallet),
        script_urls: DROPIN_SCRIPT_PATHS
            .iter()
            .map(|path| format!("{}{}", base_url, path))
            .collect(),
    }
}

/// Callback relayed from the widget, stamped with the attempt it belongs to.
#[derive(Debug, Clone)]
pub struct WidgetEvent {
    pub attempt: u64,
    pub kind: WidgetEventKind,
}

#[derive(Debug, Clone)]
pub enum WidgetEventKind {
    /// Embed shell reports the provider globals are registered.
    ScriptsReady,
    Success {
        status: String,
    },
    Error {
        stage: String,
        message: Option<String>,
    },
    WalletSuccess {
        wallet: WalletKind,
        status: String,
    },
    WalletError {
        wallet: WalletKind,
        message: Option<String>,
    },
}

/// Seam to the environment hosting the widget (browser shell or test).
#[async_trait::async_trait]
pub trait DropInRuntime: Send + Sync {
    /// Whether provider scripts are already present in the document.
    async fn scripts_present(&self) -> bool;
    /// Requests injection of the provider scripts.
    async fn inject_scripts(&self, urls: &[String]) -> Result<(), ServiceError>;
    /// Whether the globally-registered provider objects exist yet.
    async fn globals_ready(&self) -> bool;
    /// Constructs the widget. Called once per checkout attempt.
    async fn mount_widget(&self, config: &WidgetConfig) -> Result<(), ServiceError>;
    /// Tears the widget down. The single disposal path for completion,
    /// error and unmount.
    async fn dispose_widget(&self);
}

/// Terminal outcome of driving one drop-in attempt.
#[derive(Debug)]
pub enum DropInOutcome {
    Succeeded {
        order: crate::entities::order::Model,
    },
    /// Payment captured but order creation failed. Not a payment failure:
    /// the caller must present "processed, confirmation pending" and must
    /// not resubmit payment.
    ProcessedPendingConfirmation {
        session_ref: String,
        reason: String,
    },
    /// Provider rejected the payment; retry requires a brand-new session.
    Declined {
        message: String,
    },
    /// Event channel closed before completion (teardown / superseded).
    TornDown,
}

pub struct DropInAdapter {
    attempt: u64,
    session_id: String,
    links: Vec<PaymentLink>,
    runtime: Arc<dyn DropInRuntime>,
    orders: Arc<OrderService>,
    event_sender: Arc<EventSender>,
    state: DropInState,
    ready_attempts: u32,
    ready_interval: Duration,
}

impl DropInAdapter {
    pub fn new(
        attempt: u64,
        session_id: String,
        links: Vec<PaymentLink>,
        runtime: Arc<dyn DropInRuntime>,
        orders: Arc<OrderService>,
        event_sender: Arc<EventSender>,
        ready_attempts: u32,
        ready_interval: Duration,
    ) -> Self {
        Self {
            attempt,
            session_id,
            links,
            runtime,
            orders,
            event_sender,
            state: DropInState::Idle,
            ready_attempts,
            ready_interval,
        }
    }

    pub fn state(&self) -> DropInState {
        self.state
    }

    /// Loads scripts (skipping reinjection when already present), waits for
    /// provider globals with bounded fixed-interval retries, then mounts the
    /// widget. Exhausting the retries fails loudly; it never hangs silently.
    #[instrument(skip(self, config), fields(attempt = self.attempt))]
    pub async fn prepare(&mut self, config: &WidgetConfig) -> Result<(), ServiceError> {
        self.state = DropInState::ScriptsLoading;

        if self.runtime.scripts_present().await {
            debug!("Provider scripts already present; skipping injection");
        } else {
            self.runtime.inject_scripts(&config.script_urls).await?;
        }

        let mut probes = 0u32;
        while !self.runtime.globals_ready().await {
            probes += 1;
            if probes >= self.ready_attempts {
                self.state = DropInState::Failed;
                return Err(ServiceError::ScriptLoadError(format!(
                    "Payment scripts did not become ready after {} attempts",
                    self.ready_attempts
                )));
            }
            tokio::time::sleep(self.ready_interval).await;
        }
        self.state = DropInState::WidgetReady;

        self.runtime.mount_widget(config).await?;
        self.state = DropInState::AwaitingInput;
        Ok(())
    }

    /// Consumes widget callbacks until the attempt reaches a terminal
    /// outcome. A success callback with the 3-D Secure status returns control
    /// to the widget; any other success status completes the attempt.
    #[instrument(skip(self, rx, context), fields(attempt = self.attempt, session = %self.session_id))]
    pub async fn drive(
        &mut self,
        rx: &mut mpsc::Receiver<WidgetEvent>,
        context: FinalizeContext,
    ) -> DropInOutcome {
        while let Some(event) = rx.recv().await {
            if event.attempt != self.attempt {
                debug!(
                    stale_attempt = event.attempt,
                    "Ignoring callback from superseded session"
                );
                continue;
            }

            match event.kind {
                WidgetEventKind::ScriptsReady => {
                    // Readiness is observed in `prepare`; nothing to do here.
                }
                WidgetEventKind::Success { status }
                | WidgetEventKind::WalletSuccess { status, .. } => {
                    if status == THREE_D_SECURE_STATUS {
                        // Non-terminal: the shopper still has to complete the
                        // challenge inside the widget. No disposal, no
                        // navigation, no finalization.
                        self.state = DropInState::ChallengeRequired;
                        self.event_sender
                            .send_or_log(Event::PaymentChallengeRequired {
                                session_ref: self.session_id.clone(),
                            })
                            .await;
                        continue;
                    }

                    self.state = DropInState::Completing;
                    self.runtime.dispose_widget().await;

                    let session_ref = session_ref_from_links(&self.links)
                        .unwrap_or_else(|| self.session_id.clone());

                    match self.orders.finalize(&session_ref, &context).await {
                        Ok(order) => {
                            self.state = DropInState::Succeeded;
                            self.event_sender
                                .send_or_log(Event::PaymentCaptured {
                                    session_ref: session_ref.clone(),
                                })
                                .await;
                            info!(order_id = %order.id, "Drop-in payment completed");
                            return DropInOutcome::Succeeded { order };
                        }
                        Err(err) => {
                            // The provider has already captured the payment.
                            self.state = DropInState::Succeeded;
                            let reason = err.to_string();
                            warn!(
                                session_ref = %session_ref,
                                error = %reason,
                                "Payment captured but finalization failed"
                            );
                            self.event_sender
                                .send_or_log(Event::FinalizationDeferred {
                                    session_ref: session_ref.clone(),
                                    reason: reason.clone(),
                                })
                                .await;
                            return DropInOutcome::ProcessedPendingConfirmation {
                                session_ref,
                                reason,
                            };
                        }
                    }
                }
                WidgetEventKind::Error { stage, message } => {
                    return self.fail(Some(stage), message).await;
                }
                WidgetEventKind::WalletError { wallet, message } => {
                    debug!(?wallet, "Wallet sub-flow reported an error");
                    return self.fail(None, message).await;
                }
            }
        }

        // Channel closed: the attempt was superseded or the component
        // unmounted. Same teardown path as every other exit.
        self.runtime.dispose_widget().await;
        DropInOutcome::TornDown
    }

    async fn fail(&mut self, stage: Option<String>, message: Option<String>) -> DropInOutcome {
        self.runtime.dispose_widget().await;
        self.state = DropInState::Failed;

        // Provider message verbatim when available, generic otherwise.
        let message = match (message, stage) {
            (Some(message), _) => message,
            (None, Some(stage)) => format!("Payment failed at {}", stage),
            (None, None) => "Payment failed. Please try again.".to_string(),
        };
        self.event_sender
            .send_or_log(Event::PaymentDeclined {
                session_ref: self.session_id.clone(),
                message: message.clone(),
            })
            .await;
        DropInOutcome::Declined { message }
    }
}

/// [`DropInRuntime`] backing the HTTP deployment: the browser shell performs
/// the actual script loading and widget construction, and reports readiness
/// through the widget-event endpoint. The engine observes that state here.
#[derive(Default)]
pub struct EmbedBridgeRuntime {
    scripts_requested: AtomicBool,
    ready: AtomicBool,
    mounted: RwLock<Option<WidgetConfig>>,
    disposed: AtomicBool,
}

impl EmbedBridgeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the shell reports the provider globals are registered.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Widget configuration for the shell to construct from, once mounted.
    pub fn mounted_config(&self) -> Option<WidgetConfig> {
        self.mounted.read().unwrap().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DropInRuntime for EmbedBridgeRuntime {
    async fn scripts_present(&self) -> bool {
        self.scripts_requested.load(Ordering::SeqCst)
    }

    async fn inject_scripts(&self, _urls: &[String]) -> Result<(), ServiceError> {
        self.scripts_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn globals_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn mount_widget(&self, config: &WidgetConfig) -> Result<(), ServiceError> {
        *self.mounted.write().unwrap() = Some(config.clone());
        Ok(())
    }

    async fn dispose_widget(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        *self.mounted.write().unwrap() = None;
    }
}

/// Request for a drop-in payment session.
#[derive(Debug, Clone, Serialize)]
pub struct DropInSessionRequest {
    pub amount: Decimal,
    pub currency: String,
    pub customer_name: String,
    pub customer_email: String,
    pub approved_url: String,
    pub declined_url: String,
    pub cancelled_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DropInSessionCreated {
    pub session_id: String,
    pub links: Vec<PaymentLink>,
}

/// Provider seam for creating drop-in sessions.
#[async_trait::async_trait]
pub trait DropInSessionApi: Send + Sync {
    async fn create_session(
        &self,
        request: &DropInSessionRequest,
    ) -> Result<DropInSessionCreated, ServiceError>;
}

//! Checkout orchestrator.
//!
//! Sequences one checkout attempt strictly: validate, select provider,
//! create session, await payment, finalize. A per-cart attempt counter makes
//! retries create brand-new sessions and lets callbacks from superseded
//! sessions be ignored; no two payment sessions are ever open concurrently
//! for the same cart.

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{Answer, CustomQuestion, CustomerInfo},
    services::{
        cart::CartService,
        orders::{merchant_reference, FinalizeContext, OrderService},
        providers::{
            dropin::{
                build_widget_config, DropInAdapter, DropInOutcome, DropInSessionApi,
                DropInSessionRequest, EmbedBridgeRuntime, WidgetConfig, WidgetEvent,
                WidgetEventKind,
            },
            redirect::{RedirectAdapter, RedirectSessionApi},
            select_provider, session_ref_from_links,
            terminal::{
                TerminalAdapter, TerminalApi, TerminalPhase, TerminalPurchaseRequest,
                TerminalSession, TerminalTimings,
            },
            PaymentSession, ProviderKind,
        },
        validation::validate_checkout_details,
    },
};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Provider-agnostic progress phases consumed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutPhase {
    Idle,
    Validating,
    AwaitingPayment,
    Challenge,
    Succeeded,
    Failed,
}

/// State shared between the attempt record and its background task.
struct AttemptShared {
    phase_tx: watch::Sender<CheckoutPhase>,
    last_message: RwLock<Option<String>>,
    order_id: RwLock<Option<Uuid>>,
}

impl AttemptShared {
    fn set_phase(&self, phase: CheckoutPhase) {
        let _ = self.phase_tx.send(phase);
    }

    fn set_message(&self, message: impl Into<String>) {
        *self.last_message.write().unwrap() = Some(message.into());
    }
}

/// One active checkout attempt for a cart. Dropping this record closes the
/// widget-event channel (disposing the widget) and aborts any terminal poll
/// task, so superseding an attempt invalidates everything it left pending.
pub struct ActiveAttempt {
    pub attempt: u64,
    pub provider: ProviderKind,
    pub session_ref: String,
    shared: Arc<AttemptShared>,
    phase_rx: watch::Receiver<CheckoutPhase>,
    widget: Option<WidgetConfig>,
    widget_tx: Option<mpsc::Sender<WidgetEvent>>,
    runtime: Option<Arc<EmbedBridgeRuntime>>,
    terminal: Option<TerminalSession>,
}

/// Response to the checkout entry point.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutStarted {
    pub attempt: u64,
    pub provider: ProviderKind,
    pub session: PaymentSession,
    /// Present for the drop-in provider: what the embed shell mounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetConfig>,
}

/// Current progress of a cart's checkout, for the UI.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutStatus {
    pub phase: CheckoutPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalPhase>,
}

#[derive(Clone)]
pub struct CheckoutService {
    carts: Arc<CartService>,
    orders: Arc<OrderService>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    redirect_api: Option<Arc<dyn RedirectSessionApi>>,
    dropin_api: Option<Arc<dyn DropInSessionApi>>,
    terminal_api: Option<Arc<dyn TerminalApi>>,
    attempts: Arc<DashMap<Uuid, Arc<ActiveAttempt>>>,
    counters: Arc<DashMap<Uuid, u64>>,
}

impl CheckoutService {
    pub fn new(
        carts: Arc<CartService>,
        orders: Arc<OrderService>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        redirect_api: Option<Arc<dyn RedirectSessionApi>>,
        dropin_api: Option<Arc<dyn DropInSessionApi>>,
        terminal_api: Option<Arc<dyn TerminalApi>>,
    ) -> Self {
        Self {
            carts,
            orders,
            event_sender,
            config,
            redirect_api,
            dropin_api,
            terminal_api,
            attempts: Arc::new(DashMap::new()),
            counters: Arc::new(DashMap::new()),
        }
    }

    /// The checkout entry point consumed by the widget shell.
    #[instrument(skip(self, customer, answers, questions))]
    pub async fn checkout(
        &self,
        cart_id: Uuid,
        customer: CustomerInfo,
        answers: HashMap<String, Answer>,
        questions: Vec<CustomQuestion>,
    ) -> Result<CheckoutStarted, ServiceError> {
        let cart = self.carts.get_cart(cart_id)?;

        // Validation is pure and runs before anything else; an invalid cart
        // never costs a session-creation round trip.
        let report = validate_checkout_details(&customer, &answers, &questions);
        if !report.valid {
            return Err(ServiceError::ValidationError(report.errors));
        }
        cart.ready_for_checkout()?;

        let settings = &self.config.organizer;
        let provider = select_provider(settings)?;

        // A new attempt supersedes whatever was pending: prior widget-event
        // channels close and prior terminal polls stop.
        self.attempts.remove(&cart_id);
        let attempt = {
            let mut counter = self.counters.entry(cart_id).or_insert(0);
            *counter += 1;
            *counter
        };

        let totals = cart.totals(self.config.processing_fee_percent());
        let context = FinalizeContext {
            event_id: cart.event_id,
            provider: provider.to_string(),
            customer: customer.clone(),
            lines: cart.lines.clone(),
            totals: totals.clone(),
        };
        let pending_context = context.clone();

        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                cart_id,
                attempt,
                provider: provider.to_string(),
            })
            .await;

        let (phase_tx, phase_rx) = watch::channel(CheckoutPhase::AwaitingPayment);
        let shared = Arc::new(AttemptShared {
            phase_tx,
            last_message: RwLock::new(None),
            order_id: RwLock::new(None),
        });

        let record = match provider {
            ProviderKind::StripeCheckout => {
                let api = self.redirect_api.clone().ok_or_else(|| {
                    ServiceError::ConfigurationError(
                        "Redirect checkout client is not configured".to_string(),
                    )
                })?;
                let adapter = RedirectAdapter::new(api, self.config.checkout.clone());
                let session = adapter
                    .create_session(&cart.lines, &totals, &customer)
                    .await?;
                ActiveAttempt {
                    attempt,
                    provider,
                    session_ref: session.session_ref().to_string(),
                    shared,
                    phase_rx,
                    widget: None,
                    widget_tx: None,
                    runtime: None,
                    terminal: None,
                }
                .into_started(session, None)
            }
            ProviderKind::WindcaveDropIn => {
                let api = self.dropin_api.clone().ok_or_else(|| {
                    ServiceError::ConfigurationError(
                        "Drop-in session client is not configured".to_string(),
                    )
                })?;
                let request = DropInSessionRequest {
                    amount: totals.total,
                    currency: totals.currency.clone(),
                    customer_name: customer.name.clone(),
                    customer_email: customer.email.clone(),
                    approved_url: self.config.checkout.success_url.clone(),
                    declined_url: self.config.checkout.failure_url.clone(),
                    cancelled_url: self.config.checkout.cancel_url.clone(),
                };
                let created = api.create_session(&request).await?;
                // The success callback extracts its reference from the links;
                // keep the reconciliation path in step with it.
                if let Some(extracted) = session_ref_from_links(&created.links) {
                    if extracted != created.session_id {
                        self.orders.register_pending(&extracted, context.clone());
                    }
                }
                let widget = build_widget_config(
                    settings,
                    &created.session_id,
                    created.links.clone(),
                    totals.total,
                );

                let runtime = Arc::new(EmbedBridgeRuntime::new());
                let (widget_tx, widget_rx) = mpsc::channel(32);
                let adapter = DropInAdapter::new(
                    attempt,
                    created.session_id.clone(),
                    created.links.clone(),
                    runtime.clone(),
                    self.orders.clone(),
                    self.event_sender.clone(),
                    self.config.checkout.script_ready_attempts,
                    Duration::from_millis(self.config.checkout.script_ready_interval_ms),
                );
                self.spawn_dropin_task(
                    adapter,
                    widget.clone(),
                    widget_rx,
                    context,
                    shared.clone(),
                    cart_id,
                );

                let session = PaymentSession::DropIn {
                    session_id: created.session_id,
                    links: created.links,
                    total_value: widget.total_value.clone(),
                };
                ActiveAttempt {
                    attempt,
                    provider,
                    session_ref: session.session_ref().to_string(),
                    shared,
                    phase_rx,
                    widget: Some(widget.clone()),
                    widget_tx: Some(widget_tx),
                    runtime: Some(runtime),
                    terminal: None,
                }
                .into_started(session, Some(widget))
            }
            ProviderKind::WindcaveTerminal => {
                let api = self.terminal_api.clone().ok_or_else(|| {
                    ServiceError::ConfigurationError(
                        "Terminal client is not configured".to_string(),
                    )
                })?;
                let adapter = TerminalAdapter::new(
                    api,
                    self.carts.clone(),
                    self.orders.clone(),
                    self.event_sender.clone(),
                    self.terminal_timings(),
                );
                let request = TerminalPurchaseRequest {
                    amount: totals.total,
                    currency: totals.currency.clone(),
                    billing_id: merchant_reference("HIT"),
                    event_name: settings.organization_name.clone(),
                    customer_name: customer.name.clone(),
                    customer_email: customer.email.clone(),
                    receipt_email: customer.email.clone(),
                };
                let session = adapter.start(cart_id, request, context).await?;
                let txn_ref = session.txn_ref.clone();
                ActiveAttempt {
                    attempt,
                    provider,
                    session_ref: txn_ref.clone(),
                    shared,
                    phase_rx,
                    widget: None,
                    widget_tx: None,
                    runtime: None,
                    terminal: Some(session),
                }
                .into_started(PaymentSession::Terminal { txn_ref }, None)
            }
        };

        let (record, started) = record;
        self.orders
            .register_pending(&record.session_ref, pending_context);
        self.event_sender
            .send_or_log(Event::PaymentSessionCreated {
                cart_id,
                session_ref: record.session_ref.clone(),
                provider: provider.to_string(),
            })
            .await;
        self.attempts.insert(cart_id, Arc::new(record));
        info!(
            cart_id = %cart_id,
            attempt,
            provider = %provider,
            "Checkout attempt started"
        );
        Ok(started)
    }

    fn terminal_timings(&self) -> TerminalTimings {
        TerminalTimings {
            initial_delay: Duration::from_secs(self.config.checkout.terminal_poll_initial_delay_secs),
            interval: Duration::from_secs(self.config.checkout.terminal_poll_interval_secs),
            max_duration: Duration::from_secs(self.config.checkout.terminal_poll_timeout_secs),
        }
    }

    fn spawn_dropin_task(
        &self,
        mut adapter: DropInAdapter,
        widget: WidgetConfig,
        mut widget_rx: mpsc::Receiver<WidgetEvent>,
        context: FinalizeContext,
        shared: Arc<AttemptShared>,
        cart_id: Uuid,
    ) {
        let carts = self.carts.clone();
        tokio::spawn(async move {
            if let Err(err) = adapter.prepare(&widget).await {
                warn!(cart_id = %cart_id, "Drop-in preparation failed: {}", err);
                shared.set_message(err.response_message());
                shared.set_phase(CheckoutPhase::Failed);
                return;
            }

            match adapter.drive(&mut widget_rx, context).await {
                DropInOutcome::Succeeded { order } => {
                    if let Err(err) = carts.clear_cart(cart_id).await {
                        warn!("Failed to clear cart after capture: {}", err);
                    }
                    *shared.order_id.write().unwrap() = Some(order.id);
                    shared.set_phase(CheckoutPhase::Succeeded);
                }
                DropInOutcome::ProcessedPendingConfirmation { reason, .. } => {
                    // Payment captured: clearing the cart prevents an
                    // accidental second charge while support reconciles.
                    if let Err(err) = carts.clear_cart(cart_id).await {
                        warn!("Failed to clear cart after capture: {}", err);
                    }
                    shared.set_message(
                        ServiceError::FinalizationError(reason).response_message(),
                    );
                    shared.set_phase(CheckoutPhase::Succeeded);
                }
                DropInOutcome::Declined { message } => {
                    shared.set_message(message);
                    shared.set_phase(CheckoutPhase::Failed);
                }
                DropInOutcome::TornDown => {}
            }
        });
    }

    /// Forwards a widget callback from the embed shell into the adapter.
    /// Readiness reports update the runtime bridge instead.
    #[instrument(skip(self, kind))]
    pub async fn widget_event(
        &self,
        cart_id: Uuid,
        attempt: u64,
        kind: WidgetEventKind,
    ) -> Result<(), ServiceError> {
        let record = self
            .attempts
            .get(&cart_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No active checkout for cart {}", cart_id))
            })?;

        if matches!(kind, WidgetEventKind::ScriptsReady) {
            if let Some(runtime) = &record.runtime {
                runtime.mark_ready();
            }
            return Ok(());
        }

        // Track the challenge phase here so the status endpoint reflects it
        // while the adapter waits for the shopper.
        if let WidgetEventKind::Success { status } | WidgetEventKind::WalletSuccess { status, .. } =
            &kind
        {
            if attempt == record.attempt
                && status.as_str() == crate::services::providers::dropin::THREE_D_SECURE_STATUS
            {
                record.shared.set_phase(CheckoutPhase::Challenge);
            }
        }

        let tx = record.widget_tx.as_ref().ok_or_else(|| {
            ServiceError::InvalidOperation(
                "Active checkout is not using the drop-in provider".to_string(),
            )
        })?;
        tx.send(WidgetEvent { attempt, kind })
            .await
            .map_err(|_| ServiceError::InvalidOperation("Checkout attempt has ended".to_string()))
    }

    /// Widget configuration for the embed shell (drop-in attempts only).
    pub fn widget_config(&self, cart_id: Uuid) -> Result<WidgetConfig, ServiceError> {
        let record = self
            .attempts
            .get(&cart_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No active checkout for cart {}", cart_id))
            })?;
        record.widget.clone().ok_or_else(|| {
            ServiceError::InvalidOperation(
                "Active checkout is not using the drop-in provider".to_string(),
            )
        })
    }

    /// Cancels an in-flight terminal transaction. The poll loop stops locally
    /// even when the remote cancel fails.
    #[instrument(skip(self))]
    pub async fn cancel_terminal(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let record = self
            .attempts
            .get(&cart_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No active checkout for cart {}", cart_id))
            })?;
        let session = record.terminal.as_ref().ok_or_else(|| {
            ServiceError::InvalidOperation(
                "Active checkout is not using the terminal provider".to_string(),
            )
        })?;
        let api = self.terminal_api.clone().ok_or_else(|| {
            ServiceError::ConfigurationError("Terminal client is not configured".to_string())
        })?;
        let adapter = TerminalAdapter::new(
            api,
            self.carts.clone(),
            self.orders.clone(),
            self.event_sender.clone(),
            self.terminal_timings(),
        );
        adapter.cancel(session).await;
        Ok(())
    }

    /// Current progress for a cart's checkout.
    pub fn status(&self, cart_id: Uuid) -> CheckoutStatus {
        let record = match self.attempts.get(&cart_id) {
            Some(record) => record,
            None => {
                return CheckoutStatus {
                    phase: CheckoutPhase::Idle,
                    provider: None,
                    session_ref: None,
                    attempt: None,
                    message: None,
                    order_id: None,
                    terminal: None,
                }
            }
        };

        // Terminal attempts read their phase straight from the poll loop.
        let (phase, message, terminal) = if let Some(session) = &record.terminal {
            let terminal_phase = session.phase();
            let (phase, message) = match &terminal_phase {
                TerminalPhase::Processing { display } => {
                    (CheckoutPhase::AwaitingPayment, Some(display.clone()))
                }
                TerminalPhase::Succeeded { message } => {
                    (CheckoutPhase::Succeeded, message.clone())
                }
                TerminalPhase::Failed { message } => {
                    (CheckoutPhase::Failed, Some(message.clone()))
                }
                TerminalPhase::Cancelled => {
                    (CheckoutPhase::Idle, Some("Payment cancelled".to_string()))
                }
                TerminalPhase::TimedOut => (
                    CheckoutPhase::Failed,
                    Some("Terminal timed out. Please check the device.".to_string()),
                ),
            };
            (phase, message, Some(terminal_phase))
        } else {
            (
                *record.phase_rx.borrow(),
                record.shared.last_message.read().unwrap().clone(),
                None,
            )
        };

        let order_id = *record.shared.order_id.read().unwrap();
        CheckoutStatus {
            phase,
            provider: Some(record.provider),
            session_ref: Some(record.session_ref.clone()),
            attempt: Some(record.attempt),
            message,
            order_id,
            terminal,
        }
    }
}

impl ActiveAttempt {
    fn into_started(
        self,
        session: PaymentSession,
        widget: Option<WidgetConfig>,
    ) -> (ActiveAttempt, CheckoutStarted) {
        let started = CheckoutStarted {
            attempt: self.attempt,
            provider: self.provider,
            session,
            widget,
        };
        (self, started)
    }
}

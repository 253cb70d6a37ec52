//! Physical terminal (HIT) payment adapter.
//!
//! `initiate` starts the transaction and returns immediately; a spawned poll
//! task then watches the terminal status endpoint until completion. Display
//! lines from the terminal pinpad are surfaced verbatim so staff can read to
//! the customer exactly what the device is showing.

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        orders::{FinalizeContext, OrderService},
    },
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Terminal purchase request sent to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalPurchaseRequest {
    pub amount: Decimal,
    pub currency: String,
    pub billing_id: String,
    pub event_name: String,
    pub customer_name: String,
    pub customer_email: String,
    pub receipt_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminalInitiated {
    pub txn_ref: String,
    pub message: Option<String>,
}

/// One poll of the terminal status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalStatusResponse {
    pub complete: bool,
    pub transaction_success: Option<bool>,
    pub display_line1: Option<String>,
    pub display_line2: Option<String>,
    pub message: Option<String>,
}

impl TerminalStatusResponse {
    /// The pinpad display, joined verbatim. Empty when the terminal sent
    /// no display lines.
    pub fn display(&self) -> String {
        let mut parts = vec![];
        if let Some(line) = self.display_line1.as_deref() {
            parts.push(line);
        }
        if let Some(line) = self.display_line2.as_deref() {
            parts.push(line);
        }
        parts.join(" ").trim().to_string()
    }
}

/// Provider seam for the terminal flow.
#[async_trait::async_trait]
pub trait TerminalApi: Send + Sync {
    async fn initiate(
        &self,
        request: &TerminalPurchaseRequest,
    ) -> Result<TerminalInitiated, ServiceError>;
    async fn status(&self, txn_ref: &str) -> Result<TerminalStatusResponse, ServiceError>;
    async fn cancel(&self, txn_ref: &str) -> Result<(), ServiceError>;
}

/// State exposed to the operator UI.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum TerminalPhase {
    Processing { display: String },
    Succeeded { message: Option<String> },
    Failed { message: String },
    Cancelled,
    /// The bounded poll window elapsed without the terminal completing.
    TimedOut,
}

impl TerminalPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TerminalPhase::Processing { .. })
    }
}

/// Poll cadence. Defaults mirror the storefront: first poll after 2s, then
/// every 3s, bounded at five minutes.
#[derive(Debug, Clone, Copy)]
pub struct TerminalTimings {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_duration: Duration,
}

impl Default for TerminalTimings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            interval: Duration::from_secs(3),
            max_duration: Duration::from_secs(300),
        }
    }
}

/// Handle to one in-flight terminal transaction.
pub struct TerminalSession {
    pub txn_ref: String,
    phase_rx: watch::Receiver<TerminalPhase>,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TerminalSession {
    pub fn phase(&self) -> TerminalPhase {
        self.phase_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TerminalPhase> {
        self.phase_rx.clone()
    }

    /// Stops the poll loop without waiting for the remote side.
    fn stop_locally(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        // Component teardown must not leave an orphaned poll task behind.
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct TerminalAdapter {
    api: Arc<dyn TerminalApi>,
    carts: Arc<CartService>,
    orders: Arc<OrderService>,
    event_sender: Arc<EventSender>,
    timings: TerminalTimings,
}

impl TerminalAdapter {
    pub fn new(
        api: Arc<dyn TerminalApi>,
        carts: Arc<CartService>,
        orders: Arc<OrderService>,
        event_sender: Arc<EventSender>,
        timings: TerminalTimings,
    ) -> Self {
        Self {
            api,
            carts,
            orders,
            event_sender,
            timings,
        }
    }

    /// Starts a terminal transaction and the poll loop that watches it.
    #[instrument(skip(self, request, context))]
    pub async fn start(
        &self,
        cart_id: Uuid,
        request: TerminalPurchaseRequest,
        context: FinalizeContext,
    ) -> Result<TerminalSession, ServiceError> {
        let initiated = self.api.initiate(&request).await?;
        info!(txn_ref = %initiated.txn_ref, "Terminal transaction initiated");

        let initial = TerminalPhase::Processing {
            display: initiated
                .message
                .clone()
                .unwrap_or_else(|| "Present card to terminal".to_string()),
        };
        let (phase_tx, phase_rx) = watch::channel(initial);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(poll_loop(
            self.api.clone(),
            self.carts.clone(),
            self.orders.clone(),
            self.event_sender.clone(),
            self.timings,
            cart_id,
            initiated.txn_ref.clone(),
            context,
            phase_tx,
            cancel_rx,
        ));

        Ok(TerminalSession {
            txn_ref: initiated.txn_ref,
            phase_rx,
            cancel_tx,
            task,
        })
    }

    /// Cancels an in-flight transaction. Local state takes priority: the poll
    /// loop is stopped first, so the UI can never be stuck in "processing"
    /// because the remote cancel call failed.
    #[instrument(skip(self, session), fields(txn_ref = %session.txn_ref))]
    pub async fn cancel(&self, session: &TerminalSession) {
        session.stop_locally();

        if let Err(err) = self.api.cancel(&session.txn_ref).await {
            warn!("Remote terminal cancel failed: {}", err);
        }

        self.event_sender
            .send_or_log(Event::PaymentCancelled {
                session_ref: session.txn_ref.clone(),
            })
            .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    api: Arc<dyn TerminalApi>,
    carts: Arc<CartService>,
    orders: Arc<OrderService>,
    event_sender: Arc<EventSender>,
    timings: TerminalTimings,
    cart_id: Uuid,
    txn_ref: String,
    context: FinalizeContext,
    phase_tx: watch::Sender<TerminalPhase>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let deadline = tokio::time::Instant::now() + timings.max_duration;

    tokio::select! {
        _ = tokio::time::sleep(timings.initial_delay) => {}
        _ = cancel_rx.changed() => {
            let _ = phase_tx.send(TerminalPhase::Cancelled);
            return;
        }
    }

    loop {
        if tokio::time::Instant::now() >= deadline {
            warn!(txn_ref = %txn_ref, "Terminal poll window elapsed");
            event_sender
                .send_or_log(Event::TerminalTimedOut {
                    txn_ref: txn_ref.clone(),
                })
                .await;
            let _ = phase_tx.send(TerminalPhase::TimedOut);
            return;
        }

        let status = tokio::select! {
            result = api.status(&txn_ref) => result,
            _ = cancel_rx.changed() => {
                let _ = phase_tx.send(TerminalPhase::Cancelled);
                return;
            }
        };

        match status {
            Ok(status) => {
                let display = status.display();
                if !display.is_empty() {
                    event_sender
                        .send_or_log(Event::TerminalDisplayUpdated {
                            txn_ref: txn_ref.clone(),
                            display: display.clone(),
                        })
                        .await;
                }

                if status.complete {
                    // Completion observed exactly once; no further polls.
                    if status.transaction_success.unwrap_or(false) {
                        if let Err(err) = orders.finalize(&txn_ref, &context).await {
                            warn!(txn_ref = %txn_ref, "Finalization failed after capture: {}", err);
                            event_sender
                                .send_or_log(Event::FinalizationDeferred {
                                    session_ref: txn_ref.clone(),
                                    reason: err.to_string(),
                                })
                                .await;
                        }
                        if let Err(err) = carts.clear_cart(cart_id).await {
                            warn!("Failed to clear cart after capture: {}", err);
                        }
                        event_sender
                            .send_or_log(Event::PaymentCaptured {
                                session_ref: txn_ref.clone(),
                            })
                            .await;
                        let _ = phase_tx.send(TerminalPhase::Succeeded {
                            message: status.message,
                        });
                    } else {
                        let message = status
                            .message
                            .unwrap_or_else(|| "Payment was declined".to_string());
                        event_sender
                            .send_or_log(Event::PaymentDeclined {
                                session_ref: txn_ref.clone(),
                                message: message.clone(),
                            })
                            .await;
                        let _ = phase_tx.send(TerminalPhase::Failed { message });
                    }
                    return;
                }

                let _ = phase_tx.send(TerminalPhase::Processing {
                    display: if display.is_empty() {
                        status
                            .message
                            .unwrap_or_else(|| "Processing payment...".to_string())
                    } else {
                        display
                    },
                });
            }
            Err(err) => {
                // Transient poll failures keep the loop alive; the terminal
                // may still be mid-transaction.
                warn!(txn_ref = %txn_ref, "Status poll failed: {}", err);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(timings.interval) => {}
            _ = cancel_rx.changed() => {
                let _ = phase_tx.send(TerminalPhase::Cancelled);
                return;
            }
        }
    }
}

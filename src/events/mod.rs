use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the checkout engine. Consumers (the widget shell's
/// progress display, the on-site sales dashboard) subscribe through the
/// processing loop; emitting never blocks a checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartLineAdded { cart_id: Uuid, line_id: Uuid },
    CartLineUpdated { cart_id: Uuid, line_id: Uuid },
    CartLineRemoved { cart_id: Uuid, line_id: Uuid },
    CartCleared(Uuid),

    // Checkout lifecycle
    CheckoutStarted {
        cart_id: Uuid,
        attempt: u64,
        provider: String,
    },
    PaymentSessionCreated {
        cart_id: Uuid,
        session_ref: String,
        provider: String,
    },
    PaymentChallengeRequired {
        session_ref: String,
    },
    PaymentCaptured {
        session_ref: String,
    },
    PaymentDeclined {
        session_ref: String,
        message: String,
    },
    PaymentCancelled {
        session_ref: String,
    },

    // Terminal flow
    TerminalDisplayUpdated {
        txn_ref: String,
        display: String,
    },
    TerminalTimedOut {
        txn_ref: String,
    },

    // Orders
    OrderFinalized {
        order_id: Uuid,
        session_ref: String,
    },
    /// Payment captured but finalization failed; reconciliation will retry.
    FinalizationDeferred {
        session_ref: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Checkout progress must not depend on a healthy consumer.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Processes incoming events. Terminal captures trigger the revenue analytics
/// refresh that the on-site sales view depends on.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentCaptured { session_ref } => {
                info!(session_ref = %session_ref, "Payment captured; refreshing revenue analytics");
            }
            Event::FinalizationDeferred { session_ref, reason } => {
                warn!(
                    session_ref = %session_ref,
                    reason = %reason,
                    "Order finalization deferred; awaiting reconciliation"
                );
            }
            Event::TerminalDisplayUpdated { txn_ref, display } => {
                let display_text = display;
                info!(txn_ref = %txn_ref, display = %display_text, "Terminal display");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

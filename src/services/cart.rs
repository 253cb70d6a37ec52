use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{MerchandiseItem, SeatId, TicketType, Variant},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// In-memory shopping cart service.
///
/// Carts hold ticket and merchandise lines plus unresolved seat-selection
/// intents. Totals are never stored: they are recomputed from the lines on
/// every read, so a quantity change can never leave a stale cached total.
/// The service issues no network calls.
#[derive(Clone)]
pub struct CartService {
    carts: Arc<DashMap<Uuid, Cart>>,
    event_sender: Arc<EventSender>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Ticket,
    Merchandise,
}

/// A committed cart line.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub id: Uuid,
    pub kind: LineKind,
    /// Ticket type or merchandise item this line was created from.
    pub reference_id: Uuid,
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    /// Seat assignments; when present, its length equals `quantity`.
    #[serde(default)]
    pub selected_seats: Option<Vec<SeatId>>,
    #[serde(default)]
    pub variant: Option<Variant>,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A ticket added for a seated ticket type; no cart line exists until the
/// intent is resolved (seats chosen, or explicitly skipped).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingSeatSelection {
    pub intent_id: Uuid,
    pub ticket_type_id: Uuid,
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub id: Uuid,
    pub event_id: Uuid,
    pub currency: String,
    pub lines: Vec<CartLine>,
    pub pending_seat_selections: Vec<PendingSeatSelection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Recomputes totals from current lines. `fee_percent` is the organizer's
    /// processing fee in percent.
    pub fn totals(&self, fee_percent: Decimal) -> CartTotals {
        let subtotal: Decimal = self.lines.iter().map(|line| line.line_total()).sum();
        let processing_fee = subtotal * fee_percent / Decimal::from(100);
        CartTotals {
            subtotal,
            processing_fee,
            total: subtotal + processing_fee,
            currency: self.currency.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Seated lines must carry exactly one seat per ticket, and every seat
    /// intent must be resolved before checkout may proceed.
    pub fn ready_for_checkout(&self) -> Result<(), ServiceError> {
        if self.lines.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }
        if !self.pending_seat_selections.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Seat selection is still pending for one or more tickets".to_string(),
            ));
        }
        for line in &self.lines {
            if let Some(seats) = &line.selected_seats {
                if seats.len() != line.quantity as usize {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Line {} has {} seats for {} tickets",
                        line.id,
                        seats.len(),
                        line.quantity
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Derived totals; always freshly computed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub processing_fee: Decimal,
    pub total: Decimal,
    pub currency: String,
}

/// Outcome of adding a ticket type to a cart.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AddTicketOutcome {
    LineAdded { line: CartLine },
    SeatSelectionPending { intent: PendingSeatSelection },
}

/// How a pending seat-selection intent is resolved.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeatResolution {
    /// Seats chosen; must match the intent quantity.
    Seats(Vec<SeatId>),
    /// Explicitly proceed without seat assignments.
    Skip,
}

impl CartService {
    pub fn new(event_sender: Arc<EventSender>) -> Self {
        Self {
            carts: Arc::new(DashMap::new()),
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_cart(&self, event_id: Uuid, currency: String) -> Cart {
        let now = Utc::now();
        let cart = Cart {
            id: Uuid::new_v4(),
            event_id,
            currency,
            lines: vec![],
            pending_seat_selections: vec![],
            created_at: now,
            updated_at: now,
        };
        self.carts.insert(cart.id, cart.clone());
        self.event_sender
            .send_or_log(Event::CartCreated(cart.id))
            .await;
        info!("Created cart: {}", cart.id);
        cart
    }

    pub fn get_cart(&self, cart_id: Uuid) -> Result<Cart, ServiceError> {
        self.carts
            .get(&cart_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))
    }

    /// Current totals, recomputed from the live lines.
    pub fn totals(&self, cart_id: Uuid, fee_percent: Decimal) -> Result<CartTotals, ServiceError> {
        Ok(self.get_cart(cart_id)?.totals(fee_percent))
    }

    /// Adds a ticket type. When the type has seat maps enabled this yields a
    /// pending seat-selection intent instead of committing a line directly.
    #[instrument(skip(self, ticket_type))]
    pub async fn add_ticket(
        &self,
        cart_id: Uuid,
        ticket_type: &TicketType,
        quantity: i32,
    ) -> Result<AddTicketOutcome, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidInput(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let mut cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if ticket_type.seat_maps_enabled {
            let intent = PendingSeatSelection {
                intent_id: Uuid::new_v4(),
                ticket_type_id: ticket_type.id,
                description: ticket_type.name.clone(),
                unit_price: ticket_type.price,
                quantity,
            };
            cart.pending_seat_selections.push(intent.clone());
            cart.updated_at = Utc::now();
            return Ok(AddTicketOutcome::SeatSelectionPending { intent });
        }

        // Unseated tickets merge into an existing line for the same type.
        let line = if let Some(existing) = cart
            .lines
            .iter_mut()
            .find(|line| line.kind == LineKind::Ticket && line.reference_id == ticket_type.id)
        {
            existing.quantity += quantity;
            existing.clone()
        } else {
            let line = CartLine {
                id: Uuid::new_v4(),
                kind: LineKind::Ticket,
                reference_id: ticket_type.id,
                description: ticket_type.name.clone(),
                unit_price: ticket_type.price,
                quantity,
                selected_seats: None,
                variant: None,
            };
            cart.lines.push(line.clone());
            line
        };
        cart.updated_at = Utc::now();
        drop(cart);

        self.event_sender
            .send_or_log(Event::CartLineAdded {
                cart_id,
                line_id: line.id,
            })
            .await;
        Ok(AddTicketOutcome::LineAdded { line })
    }

    /// Resolves a pending seat-selection intent into a committed line.
    #[instrument(skip(self, resolution))]
    pub async fn resolve_seat_intent(
        &self,
        cart_id: Uuid,
        intent_id: Uuid,
        resolution: SeatResolution,
    ) -> Result<CartLine, ServiceError> {
        let mut cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let position = cart
            .pending_seat_selections
            .iter()
            .position(|intent| intent.intent_id == intent_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Seat selection intent {} not found", intent_id))
            })?;

        let intent = cart.pending_seat_selections[position].clone();
        let selected_seats = match resolution {
            SeatResolution::Seats(seats) => {
                if seats.len() != intent.quantity as usize {
                    return Err(ServiceError::validation(
                        "seats",
                        format!(
                            "Expected {} seats, got {}",
                            intent.quantity,
                            seats.len()
                        ),
                    ));
                }
                Some(seats)
            }
            SeatResolution::Skip => None,
        };

        cart.pending_seat_selections.remove(position);
        let line = CartLine {
            id: Uuid::new_v4(),
            kind: LineKind::Ticket,
            reference_id: intent.ticket_type_id,
            description: intent.description,
            unit_price: intent.unit_price,
            quantity: intent.quantity,
            selected_seats,
            variant: None,
        };
        cart.lines.push(line.clone());
        cart.updated_at = Utc::now();
        drop(cart);

        self.event_sender
            .send_or_log(Event::CartLineAdded {
                cart_id,
                line_id: line.id,
            })
            .await;
        Ok(line)
    }

    /// Adds merchandise; lines merge when the item and variant both match.
    #[instrument(skip(self, item, variant))]
    pub async fn add_merchandise(
        &self,
        cart_id: Uuid,
        item: &MerchandiseItem,
        variant: Option<Variant>,
        quantity: i32,
    ) -> Result<CartLine, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidInput(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let mut cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let line = if let Some(existing) = cart.lines.iter_mut().find(|line| {
            line.kind == LineKind::Merchandise
                && line.reference_id == item.id
                && line.variant == variant
        }) {
            existing.quantity += quantity;
            existing.clone()
        } else {
            let line = CartLine {
                id: Uuid::new_v4(),
                kind: LineKind::Merchandise,
                reference_id: item.id,
                description: item.name.clone(),
                unit_price: item.price,
                quantity,
                selected_seats: None,
                variant,
            };
            cart.lines.push(line.clone());
            line
        };
        cart.updated_at = Utc::now();
        drop(cart);

        self.event_sender
            .send_or_log(Event::CartLineAdded {
                cart_id,
                line_id: line.id,
            })
            .await;
        Ok(line)
    }

    /// Updates a line's quantity. Zero or negative removes the line. Changing
    /// the quantity of a seated line clears its seat assignment; seats must be
    /// re-selected to match the new quantity.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        cart_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return self.remove_line(cart_id, line_id).await;
        }

        let mut cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let line = cart
            .lines
            .iter_mut()
            .find(|line| line.id == line_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart line {} not found", line_id)))?;

        line.quantity = quantity;
        if line
            .selected_seats
            .as_ref()
            .map(|seats| seats.len() != quantity as usize)
            .unwrap_or(false)
        {
            line.selected_seats = None;
        }
        cart.updated_at = Utc::now();
        drop(cart);

        self.event_sender
            .send_or_log(Event::CartLineUpdated { cart_id, line_id })
            .await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_line(&self, cart_id: Uuid, line_id: Uuid) -> Result<(), ServiceError> {
        let mut cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let before = cart.lines.len();
        cart.lines.retain(|line| line.id != line_id);
        if cart.lines.len() == before {
            return Err(ServiceError::NotFound(format!(
                "Cart line {} not found",
                line_id
            )));
        }
        cart.updated_at = Utc::now();
        drop(cart);

        self.event_sender
            .send_or_log(Event::CartLineRemoved { cart_id, line_id })
            .await;
        Ok(())
    }

    /// Attaches seat assignments to a committed ticket line.
    #[instrument(skip(self, seats))]
    pub async fn attach_seats(
        &self,
        cart_id: Uuid,
        line_id: Uuid,
        seats: Vec<SeatId>,
    ) -> Result<(), ServiceError> {
        let mut cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let line = cart
            .lines
            .iter_mut()
            .find(|line| line.id == line_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart line {} not found", line_id)))?;

        if line.kind != LineKind::Ticket {
            return Err(ServiceError::InvalidOperation(
                "Seats can only be attached to ticket lines".to_string(),
            ));
        }
        if seats.len() != line.quantity as usize {
            return Err(ServiceError::validation(
                "seats",
                format!("Expected {} seats, got {}", line.quantity, seats.len()),
            ));
        }

        line.selected_seats = Some(seats);
        cart.updated_at = Utc::now();
        drop(cart);

        self.event_sender
            .send_or_log(Event::CartLineUpdated { cart_id, line_id })
            .await;
        Ok(())
    }

    /// Clears lines and pending intents. Called on successful finalization
    /// and on explicit cancel.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let mut cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
        cart.lines.clear();
        cart.pending_seat_selections.clear();
        cart.updated_at = Utc::now();
        drop(cart);

        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        info!("Cleared cart: {}", cart_id);
        Ok(())
    }
}

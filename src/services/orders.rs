use crate::{
    entities::{order, order_item, Order},
    errors::ServiceError,
    events::{Event, EventSender},
    models::CustomerInfo,
    services::cart::{CartLine, CartTotals, LineKind},
};
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Snapshot of the attempt being finalized: the cart lines and totals as they
/// were when the payment session was created.
#[derive(Debug, Clone)]
pub struct FinalizeContext {
    pub event_id: Uuid,
    pub provider: String,
    pub customer: CustomerInfo,
    pub lines: Vec<CartLine>,
    pub totals: CartTotals,
}

/// Reference used to locate an order from a payment-return URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    OrderId(Uuid),
    SessionRef(String),
}

/// Resolves the identifying query parameters of a payment-return URL.
///
/// With neither parameter present this is an `IdentificationError`: the page
/// shows "no identifiable order" and no lookup is issued. Falling back to the
/// most recent order is forbidden.
pub fn resolve_return_reference(
    order_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<OrderRef, ServiceError> {
    if let Some(order_id) = order_id.map(str::trim).filter(|s| !s.is_empty()) {
        let id = Uuid::parse_str(order_id).map_err(|_| ServiceError::IdentificationError)?;
        return Ok(OrderRef::OrderId(id));
    }
    if let Some(session_id) = session_id.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(OrderRef::SessionRef(session_id.to_string()));
    }
    Err(ServiceError::IdentificationError)
}

/// Short human-readable reference for terminal billing ids and order numbers.
pub fn merchant_reference(prefix: &str) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}-{}", prefix, suffix)
}

/// Order finalization gateway.
///
/// Converts a completed payment session into a persisted order exactly once.
/// Creation ownership is shared between the payment-success callback path and
/// the webhook reconciliation path, so `finalize` is idempotent keyed by the
/// unique `session_ref`.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    /// Finalization context per open payment session, so the reconciliation
    /// path can finalize sessions whose success callback never arrived.
    pending: Arc<DashMap<String, FinalizeContext>>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            event_sender,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Records the finalization context for a newly created payment session.
    pub fn register_pending(&self, session_ref: &str, context: FinalizeContext) {
        self.pending.insert(session_ref.to_string(), context);
    }

    /// Reconciliation entry point (webhook path). Finalizes the session from
    /// its registered context; already-finalized sessions return the
    /// existing order.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, session_ref: &str) -> Result<order::Model, ServiceError> {
        if let Some(existing) = Order::find()
            .filter(order::Column::SessionRef.eq(session_ref))
            .one(&*self.db)
            .await?
        {
            return Ok(existing);
        }

        let context = self
            .pending
            .get(session_ref)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No pending checkout session {} to reconcile",
                    session_ref
                ))
            })?;
        self.finalize(session_ref, &context).await
    }

    /// Finalizes the payment session into an order. Calling this again for
    /// the same `session_ref` returns the existing order instead of creating
    /// a duplicate or double-decrementing ticket inventory.
    #[instrument(skip(self, context))]
    pub async fn finalize(
        &self,
        session_ref: &str,
        context: &FinalizeContext,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        if let Some(existing) = Order::find()
            .filter(order::Column::SessionRef.eq(session_ref))
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            info!(
                order_id = %existing.id,
                "Finalize called again for session {}; returning existing order",
                session_ref
            );
            return Ok(existing);
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            session_ref: Set(session_ref.to_string()),
            order_number: Set(merchant_reference("ORD")),
            event_id: Set(context.event_id),
            provider: Set(context.provider.clone()),
            customer_name: Set(context.customer.name.clone()),
            customer_email: Set(context.customer.email.clone()),
            customer_phone: Set(context.customer.phone.clone()),
            subtotal: Set(context.totals.subtotal),
            processing_fee: Set(context.totals.processing_fee),
            total_amount: Set(context.totals.total),
            currency: Set(context.totals.currency.clone()),
            status: Set("completed".to_string()),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let inserted = match order.insert(&txn).await {
            Ok(order) => order,
            Err(err) => {
                // Unique session_ref: a concurrent finalize may have won.
                warn!("Order insert failed for session {}: {}", session_ref, err);
                txn.rollback().await?;
                if let Some(existing) = Order::find()
                    .filter(order::Column::SessionRef.eq(session_ref))
                    .one(&*self.db)
                    .await?
                {
                    return Ok(existing);
                }
                return Err(err.into());
            }
        };

        for line in &context.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                ticket_type_id: Set(match line.kind {
                    LineKind::Ticket => Some(line.reference_id),
                    LineKind::Merchandise => None,
                }),
                description: Set(line.description.clone()),
                item_type: Set(match line.kind {
                    LineKind::Ticket => "ticket".to_string(),
                    LineKind::Merchandise => "merchandise".to_string(),
                }),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total()),
                seats: Set(line
                    .selected_seats
                    .as_ref()
                    .and_then(|seats| serde_json::to_string(seats).ok())),
                created_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        txn.commit().await?;
        self.pending.remove(session_ref);

        self.event_sender
            .send_or_log(Event::OrderFinalized {
                order_id,
                session_ref: session_ref.to_string(),
            })
            .await;

        info!(order_id = %order_id, "Order finalized for session {}", session_ref);
        Ok(inserted)
    }

    /// Looks an order up by the reference extracted from a return URL.
    #[instrument(skip(self))]
    pub async fn find_by_reference(&self, reference: &OrderRef) -> Result<order::Model, ServiceError> {
        let found = match reference {
            OrderRef::OrderId(id) => Order::find_by_id(*id).one(&*self.db).await?,
            OrderRef::SessionRef(session_ref) => {
                Order::find()
                    .filter(order::Column::SessionRef.eq(session_ref.clone()))
                    .one(&*self.db)
                    .await?
            }
        };
        found.ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    pub async fn items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(crate::entities::OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }
}

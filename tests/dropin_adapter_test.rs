//! Drop-in adapter state machine tests: script readiness, the 3-D Secure
//! intermediate status, completion, declines, and stale-callback guarding.

mod common;

use assert_matches::assert_matches;
use common::connect_test_db;
use eventgate_api::{
    errors::ServiceError,
    events::EventSender,
    models::{CustomerInfo, OrganizerSettings},
    services::{
        cart::{CartLine, CartTotals, LineKind},
        orders::{FinalizeContext, OrderService},
        providers::{
            dropin::{
                build_widget_config, DropInAdapter, DropInOutcome, DropInRuntime, DropInState,
                WalletKind, WidgetConfig, WidgetEvent, WidgetEventKind,
            },
            PaymentLink,
        },
    },
};
use rust_decimal_macros::dec;
use sea_orm::ConnectionTrait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

struct RecordingRuntime {
    scripts_present: bool,
    ready_after: AtomicUsize,
    inject_calls: AtomicUsize,
    mount_calls: AtomicUsize,
    dispose_calls: AtomicUsize,
}

impl RecordingRuntime {
    fn ready() -> Arc<Self> {
        Arc::new(Self {
            scripts_present: false,
            ready_after: AtomicUsize::new(0),
            inject_calls: AtomicUsize::new(0),
            mount_calls: AtomicUsize::new(0),
            dispose_calls: AtomicUsize::new(0),
        })
    }

    fn never_ready() -> Arc<Self> {
        Arc::new(Self {
            scripts_present: false,
            ready_after: AtomicUsize::new(usize::MAX),
            inject_calls: AtomicUsize::new(0),
            mount_calls: AtomicUsize::new(0),
            dispose_calls: AtomicUsize::new(0),
        })
    }

    fn with_scripts_present() -> Arc<Self> {
        Arc::new(Self {
            scripts_present: true,
            ready_after: AtomicUsize::new(0),
            inject_calls: AtomicUsize::new(0),
            mount_calls: AtomicUsize::new(0),
            dispose_calls: AtomicUsize::new(0),
        })
    }

    fn disposals(&self) -> usize {
        self.dispose_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DropInRuntime for RecordingRuntime {
    async fn scripts_present(&self) -> bool {
        self.scripts_present
    }

    async fn inject_scripts(&self, _urls: &[String]) -> Result<(), ServiceError> {
        self.inject_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn globals_ready(&self) -> bool {
        let remaining = self.ready_after.load(Ordering::SeqCst);
        if remaining == 0 {
            true
        } else {
            if remaining != usize::MAX {
                self.ready_after.store(remaining - 1, Ordering::SeqCst);
            }
            false
        }
    }

    async fn mount_widget(&self, _config: &WidgetConfig) -> Result<(), ServiceError> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose_widget(&self) {
        self.dispose_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn links(session_id: &str) -> Vec<PaymentLink> {
    vec![PaymentLink {
        href: format!("https://uat.windcave.com/api/v1/sessions/{}", session_id),
        rel: "ajaxSubmitCard".into(),
        method: "POST".into(),
    }]
}

fn context() -> FinalizeContext {
    FinalizeContext {
        event_id: Uuid::new_v4(),
        provider: "windcave_drop_in".into(),
        customer: CustomerInfo {
            name: "Jamie Rivera".into(),
            email: "jamie@example.com".into(),
            phone: None,
        },
        lines: vec![CartLine {
            id: Uuid::new_v4(),
            kind: LineKind::Ticket,
            reference_id: Uuid::new_v4(),
            description: "General".into(),
            unit_price: dec!(25.00),
            quantity: 2,
            selected_seats: None,
            variant: None,
        }],
        totals: CartTotals {
            subtotal: dec!(50.00),
            processing_fee: dec!(1.50),
            total: dec!(51.50),
            currency: "NZD".into(),
        },
    }
}

fn event_sender() -> Arc<EventSender> {
    let (tx, mut rx) = mpsc::channel(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    Arc::new(EventSender::new(tx))
}

async fn adapter_with(
    runtime: Arc<RecordingRuntime>,
    attempt: u64,
    session_id: &str,
) -> (DropInAdapter, Arc<OrderService>, WidgetConfig) {
    let db = connect_test_db().await;
    let orders = Arc::new(OrderService::new(db, event_sender()));
    let widget = build_widget_config(
        &OrganizerSettings::default(),
        session_id,
        links(session_id),
        dec!(51.50),
    );
    let adapter = DropInAdapter::new(
        attempt,
        session_id.to_string(),
        links(session_id),
        runtime,
        orders.clone(),
        event_sender(),
        10,
        Duration::from_millis(1),
    );
    (adapter, orders, widget)
}

#[tokio::test]
async fn three_d_secure_status_is_not_completion() {
    let runtime = RecordingRuntime::ready();
    let (mut adapter, orders, widget) = adapter_with(runtime.clone(), 1, "sess_3ds").await;
    adapter.prepare(&widget).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let ctx = context();
    let task = tokio::spawn(async move {
        let outcome = adapter.drive(&mut rx, ctx).await;
        (outcome, adapter)
    });

    tx.send(WidgetEvent {
        attempt: 1,
        kind: WidgetEventKind::Success {
            status: "3DSecure".into(),
        },
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The challenge is non-terminal: no disposal, no finalization.
    assert_eq!(runtime.disposals(), 0);
    assert!(orders
        .find_by_reference(&eventgate_api::services::orders::OrderRef::SessionRef(
            "sess_3ds".into()
        ))
        .await
        .is_err());

    // True completion afterwards finishes the attempt exactly once.
    tx.send(WidgetEvent {
        attempt: 1,
        kind: WidgetEventKind::Success {
            status: "done".into(),
        },
    })
    .await
    .unwrap();
    let (outcome, adapter) = task.await.unwrap();

    assert_matches!(outcome, DropInOutcome::Succeeded { .. });
    assert_eq!(adapter.state(), DropInState::Succeeded);
    assert_eq!(runtime.disposals(), 1);
}

#[tokio::test]
async fn callbacks_from_superseded_attempts_are_ignored() {
    let runtime = RecordingRuntime::ready();
    let (mut adapter, orders, widget) = adapter_with(runtime.clone(), 2, "sess_stale").await;
    adapter.prepare(&widget).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let ctx = context();
    let task = tokio::spawn(async move { adapter.drive(&mut rx, ctx).await });

    // A completion callback from attempt 1 must not act on attempt 2.
    tx.send(WidgetEvent {
        attempt: 1,
        kind: WidgetEventKind::Success {
            status: "done".into(),
        },
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runtime.disposals(), 0);

    let db_check = orders
        .find_by_reference(&eventgate_api::services::orders::OrderRef::SessionRef(
            "sess_stale".into(),
        ))
        .await;
    assert!(db_check.is_err());

    drop(tx);
    let outcome = task.await.unwrap();
    assert_matches!(outcome, DropInOutcome::TornDown);
    // Teardown runs the shared disposal path.
    assert_eq!(runtime.disposals(), 1);
}

#[tokio::test]
async fn decline_surfaces_the_provider_message_verbatim() {
    let runtime = RecordingRuntime::ready();
    let (mut adapter, _orders, widget) = adapter_with(runtime.clone(), 1, "sess_decline").await;
    adapter.prepare(&widget).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(WidgetEvent {
        attempt: 1,
        kind: WidgetEventKind::Error {
            stage: "submitCard".into(),
            message: Some("Card declined by issuer".into()),
        },
    })
    .await
    .unwrap();

    let outcome = adapter.drive(&mut rx, context()).await;
    assert_matches!(
        outcome,
        DropInOutcome::Declined { message } if message == "Card declined by issuer"
    );
    assert_eq!(adapter.state(), DropInState::Failed);
    assert_eq!(runtime.disposals(), 1);
}

#[tokio::test]
async fn wallet_completion_finishes_without_the_card_form() {
    let runtime = RecordingRuntime::ready();
    let (mut adapter, _orders, widget) = adapter_with(runtime.clone(), 1, "sess_wallet").await;
    adapter.prepare(&widget).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(WidgetEvent {
        attempt: 1,
        kind: WidgetEventKind::WalletSuccess {
            wallet: WalletKind::ApplePay,
            status: "done".into(),
        },
    })
    .await
    .unwrap();

    let outcome = adapter.drive(&mut rx, context()).await;
    assert_matches!(outcome, DropInOutcome::Succeeded { .. });
}

#[tokio::test]
async fn readiness_retries_are_bounded_and_fail_loudly() {
    let runtime = RecordingRuntime::never_ready();
    let (mut adapter, _orders, widget) = adapter_with(runtime.clone(), 1, "sess_slow").await;

    let err = adapter.prepare(&widget).await.unwrap_err();
    assert_matches!(err, ServiceError::ScriptLoadError(_));
    assert_eq!(adapter.state(), DropInState::Failed);
    assert_eq!(runtime.inject_calls.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.mount_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn present_scripts_are_not_reinjected() {
    let runtime = RecordingRuntime::with_scripts_present();
    let (mut adapter, _orders, widget) = adapter_with(runtime.clone(), 1, "sess_dedup").await;

    adapter.prepare(&widget).await.unwrap();
    assert_eq!(runtime.inject_calls.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.mount_calls.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.state(), DropInState::AwaitingInput);
}

#[tokio::test]
async fn finalization_failure_is_not_presented_as_payment_failure() {
    let runtime = RecordingRuntime::ready();
    let db = connect_test_db().await;
    let orders = Arc::new(OrderService::new(db.clone(), event_sender()));
    let widget = build_widget_config(
        &OrganizerSettings::default(),
        "sess_pending",
        links("sess_pending"),
        dec!(51.50),
    );
    let mut adapter = DropInAdapter::new(
        1,
        "sess_pending".to_string(),
        links("sess_pending"),
        runtime.clone(),
        orders,
        event_sender(),
        10,
        Duration::from_millis(1),
    );
    adapter.prepare(&widget).await.unwrap();

    // Break order persistence: the payment is captured regardless.
    db.execute_unprepared("DROP TABLE order_items").await.unwrap();
    db.execute_unprepared("DROP TABLE orders").await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(WidgetEvent {
        attempt: 1,
        kind: WidgetEventKind::Success {
            status: "done".into(),
        },
    })
    .await
    .unwrap();

    let outcome = adapter.drive(&mut rx, context()).await;
    assert_matches!(
        outcome,
        DropInOutcome::ProcessedPendingConfirmation { session_ref, .. }
            if session_ref == "sess_pending"
    );
    // The widget is still torn down, but the attempt is not a decline.
    assert_eq!(runtime.disposals(), 1);
}

#[tokio::test]
async fn wallet_configs_require_merchant_identifiers() {
    let mut settings = OrganizerSettings::default();
    let widget = build_widget_config(&settings, "s", links("s"), dec!(10.00));
    assert!(widget.apple_pay.is_none());
    assert!(widget.google_pay.is_none());

    settings.apple_pay_merchant_id = Some("merchant.nz.eventgate".into());
    let widget = build_widget_config(&settings, "s", links("s"), dec!(10.00));
    assert!(widget.apple_pay.is_some());
    assert!(widget.google_pay.is_none());
    assert_eq!(widget.total_value, "10.00");
}

#[tokio::test]
async fn completion_extracts_the_session_ref_from_the_last_link() {
    let runtime = RecordingRuntime::ready();
    let db = connect_test_db().await;
    let orders = Arc::new(OrderService::new(db, event_sender()));
    // Widget session id differs from the link-embedded reference.
    let link_set = vec![
        PaymentLink {
            href: "https://uat.windcave.com/api/v1/sessions/other".into(),
            rel: "self".into(),
            method: "GET".into(),
        },
        PaymentLink {
            href: "https://uat.windcave.com/api/v1/sessions/sess_linked".into(),
            rel: "ajaxSubmitCard".into(),
            method: "POST".into(),
        },
    ];
    let widget = build_widget_config(
        &OrganizerSettings::default(),
        "widget_id",
        link_set.clone(),
        dec!(51.50),
    );
    let mut adapter = DropInAdapter::new(
        1,
        "widget_id".to_string(),
        link_set,
        runtime,
        orders.clone(),
        event_sender(),
        10,
        Duration::from_millis(1),
    );
    adapter.prepare(&widget).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(WidgetEvent {
        attempt: 1,
        kind: WidgetEventKind::Success {
            status: "done".into(),
        },
    })
    .await
    .unwrap();
    let outcome = adapter.drive(&mut rx, context()).await;

    let order = match outcome {
        DropInOutcome::Succeeded { order } => order,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(order.session_ref, "sess_linked");
}

#[tokio::test]
async fn torn_down_channel_creates_no_order() {
    let runtime = RecordingRuntime::ready();
    let (mut adapter, orders, widget) = adapter_with(runtime, 1, "sess_gone").await;
    adapter.prepare(&widget).await.unwrap();

    let (tx, mut rx) = mpsc::channel::<WidgetEvent>(8);
    drop(tx);
    let outcome = adapter.drive(&mut rx, context()).await;
    assert_matches!(outcome, DropInOutcome::TornDown);

    let lookup = orders
        .find_by_reference(&eventgate_api::services::orders::OrderRef::SessionRef(
            "sess_gone".into(),
        ))
        .await;
    assert!(lookup.is_err());
}

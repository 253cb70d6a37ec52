//! End-to-end checkout flow tests over the HTTP surface: validation gating,
//! configuration blocking, session-per-attempt semantics, the drop-in
//! widget-event bridge, and the payment-return landing rules.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    response_json, stripe_settings, terminal_settings, windcave_settings, ScriptedTerminalApi,
    StubDropInApi, StubRedirectApi, TestApp,
};
use eventgate_api::models::OrganizerSettings;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn cart_with_ticket(app: &TestApp) -> String {
    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "event_id": Uuid::new_v4() })),
        )
        .await;
    let body = response_json(response).await;
    let cart_id = body["data"]["id"].as_str().unwrap().to_string();

    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/tickets", cart_id),
        Some(json!({
            "ticket_type": {
                "id": Uuid::new_v4(),
                "event_id": Uuid::new_v4(),
                "name": "General",
                "price": "25.00",
                "quantity_available": 100
            },
            "quantity": 2
        })),
    )
    .await;
    cart_id
}

fn customer() -> serde_json::Value {
    json!({ "name": "Jamie Rivera", "email": "jamie@example.com" })
}

#[tokio::test]
async fn invalid_customer_blocks_checkout_before_any_session_is_created() {
    let redirect = Arc::new(StubRedirectApi::default());
    let app = TestApp::builder(stripe_settings())
        .redirect_api(redirect.clone())
        .build()
        .await;
    let cart_id = cart_with_ticket(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "cart_id": cart_id,
                "customer": { "name": "", "email": "not-an-email" },
                "questions": [
                    { "id": "dietary", "label": "Dietary requirements", "type": "text", "required": true }
                ]
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    let details = &body["details"];
    assert!(details["name"].is_string());
    assert!(details["email"].is_string());
    assert!(details["dietary"].is_string());
    // No network round trip was spent on the invalid cart.
    assert_eq!(redirect.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn misconfigured_provider_blocks_the_pay_action() {
    // Windcave selected but not enabled: no silent fallback to Stripe.
    let settings = OrganizerSettings {
        payment_provider: "windcave".into(),
        windcave_enabled: false,
        ..OrganizerSettings::default()
    };
    let redirect = Arc::new(StubRedirectApi::default());
    let app = TestApp::builder(settings)
        .redirect_api(redirect.clone())
        .build()
        .await;
    let cart_id = cart_with_ticket(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "cart_id": cart_id, "customer": customer() })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(redirect.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn redirect_checkout_returns_a_hosted_url() {
    let app = TestApp::builder(stripe_settings())
        .redirect_api(Arc::new(StubRedirectApi::default()))
        .build()
        .await;
    let cart_id = cart_with_ticket(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "cart_id": cart_id, "customer": customer() })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["provider"], "stripe_checkout");
    assert_eq!(body["data"]["session"]["session_id"], "cs_test_1");
    assert!(body["data"]["session"]["hosted_url"]
        .as_str()
        .unwrap()
        .starts_with("https://checkout.stripe.test/"));
}

#[tokio::test]
async fn retry_after_decline_creates_a_brand_new_session() {
    let dropin = Arc::new(StubDropInApi::default());
    let app = TestApp::builder(windcave_settings())
        .dropin_api(dropin.clone())
        .build()
        .await;
    let cart_id = cart_with_ticket(&app).await;

    let start = |app: &TestApp, cart_id: &str| {
        let cart_id = cart_id.to_string();
        let payload = json!({ "cart_id": cart_id, "customer": customer() });
        let app = app.router.clone();
        async move {
            let request = axum::http::Request::builder()
                .method(Method::POST)
                .uri("/api/v1/checkout")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(payload.to_string()))
                .unwrap();
            tower::ServiceExt::oneshot(app, request).await.unwrap()
        }
    };

    let first = response_json(start(&app, &cart_id).await).await;
    let first_session = first["data"]["session"]["session_id"].as_str().unwrap().to_string();
    let first_attempt = first["data"]["attempt"].as_u64().unwrap();

    // Shell reports readiness, then the provider declines the attempt.
    app.request(
        Method::POST,
        &format!("/api/v1/checkout/{}/widget-events", cart_id),
        Some(json!({ "attempt": first_attempt, "type": "ready" })),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/widget-events", cart_id),
            Some(json!({
                "attempt": first_attempt,
                "type": "error",
                "stage": "submitCard",
                "message": "Card declined by issuer"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut status = serde_json::Value::Null;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = response_json(
            app.request(
                Method::GET,
                &format!("/api/v1/checkout/{}/status", cart_id),
                None,
            )
            .await,
        )
        .await;
        if status["data"]["phase"] == "failed" {
            break;
        }
    }
    assert_eq!(status["data"]["phase"], "failed");
    assert_eq!(status["data"]["message"], "Card declined by issuer");

    // The retry never reuses the failed session.
    let second = response_json(start(&app, &cart_id).await).await;
    let second_session = second["data"]["session"]["session_id"].as_str().unwrap();
    assert_ne!(first_session, second_session);
    assert_eq!(second["data"]["attempt"].as_u64().unwrap(), first_attempt + 1);
    assert_eq!(dropin.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dropin_completion_finalizes_once_and_clears_the_cart() {
    let app = TestApp::builder(windcave_settings())
        .dropin_api(Arc::new(StubDropInApi::default()))
        .build()
        .await;
    let cart_id = cart_with_ticket(&app).await;

    let started = response_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "cart_id": cart_id, "customer": customer() })),
        )
        .await,
    )
    .await;
    let attempt = started["data"]["attempt"].as_u64().unwrap();
    let session_id = started["data"]["session"]["session_id"].as_str().unwrap().to_string();
    assert_eq!(started["data"]["widget"]["totalValue"], "51.50");

    // The shell reports readiness, then a 3-D Secure pass, then completion.
    for event in [
        json!({ "attempt": attempt, "type": "ready" }),
        json!({ "attempt": attempt, "type": "success", "status": "3DSecure" }),
    ] {
        let response = app
            .request(
                Method::POST,
                &format!("/api/v1/checkout/{}/widget-events", cart_id),
                Some(event),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The challenge is visible but nothing has completed yet.
    let status = response_json(
        app.request(
            Method::GET,
            &format!("/api/v1/checkout/{}/status", cart_id),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status["data"]["phase"], "challenge");

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/widget-events", cart_id),
            Some(json!({ "attempt": attempt, "type": "success", "status": "done" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Wait for the attempt to settle.
    let mut phase = String::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = response_json(
            app.request(
                Method::GET,
                &format!("/api/v1/checkout/{}/status", cart_id),
                None,
            )
            .await,
        )
        .await;
        phase = status["data"]["phase"].as_str().unwrap().to_string();
        if phase == "succeeded" {
            break;
        }
    }
    assert_eq!(phase, "succeeded");

    // Cart cleared on successful finalization.
    let cart = response_json(
        app.request(Method::GET, &format!("/api/v1/carts/{}", cart_id), None).await,
    )
    .await;
    assert_eq!(cart["data"]["lines"].as_array().unwrap().len(), 0);

    // The landing page resolves the order by session reference.
    let landing = app
        .request(
            Method::GET,
            &format!("/payment-success?session_id={}", session_id),
            None,
        )
        .await;
    assert_eq!(landing.status(), StatusCode::OK);
    let landing = response_json(landing).await;
    assert_eq!(landing["data"]["status"], "confirmed");
    assert!(landing["data"]["order"]["order_number"]
        .as_str()
        .unwrap()
        .starts_with("ORD-"));
}

#[tokio::test]
async fn terminal_checkout_exposes_progress_and_cancel() {
    let api = Arc::new(ScriptedTerminalApi::new(vec![
        eventgate_api::services::providers::terminal::TerminalStatusResponse {
            complete: false,
            transaction_success: None,
            display_line1: Some("PRESENT CARD".into()),
            display_line2: None,
            message: None,
        },
    ]));
    let app = TestApp::builder(terminal_settings())
        .terminal_api(api.clone())
        .build()
        .await;
    let cart_id = cart_with_ticket(&app).await;

    let started = response_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "cart_id": cart_id, "customer": customer() })),
        )
        .await,
    )
    .await;
    assert_eq!(started["data"]["provider"], "windcave_terminal");
    assert_eq!(started["data"]["session"]["txn_ref"], "txn_0001");

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/terminal/cancel", cart_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = response_json(
        app.request(
            Method::GET,
            &format!("/api/v1/checkout/{}/status", cart_id),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status["data"]["terminal"]["phase"], "cancelled");
    assert_eq!(status["data"]["phase"], "idle");
}

#[tokio::test]
async fn landing_page_without_identifiers_shows_no_order_found() {
    let app = TestApp::new(stripe_settings()).await;

    let response = app.request(Method::GET, "/payment-success", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["message"], "No identifiable order");

    // An unknown-but-present reference is a lookup miss, not a guess.
    let response = app
        .request(Method::GET, "/payment-success?session_id=sess_unknown", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("Order not found"));
}

#[tokio::test]
async fn cancelled_and_failed_landing_pages_render_their_views() {
    let app = TestApp::new(stripe_settings()).await;

    let body = response_json(
        app.request(Method::GET, "/payment-cancelled", None).await,
    )
    .await;
    assert_eq!(body["data"]["status"], "cancelled");

    let body = response_json(
        app.request(
            Method::GET,
            "/payment-failed?error=Insufficient%20funds",
            None,
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["status"], "failed");
    assert_eq!(body["data"]["message"], "Insufficient funds");
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let app = TestApp::builder(stripe_settings())
        .redirect_api(Arc::new(StubRedirectApi::default()))
        .build()
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "event_id": Uuid::new_v4() })),
        )
        .await;
    let body = response_json(response).await;
    let cart_id = body["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "cart_id": cart_id, "customer": customer() })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

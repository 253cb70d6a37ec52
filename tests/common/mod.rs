//! Shared test harness: an in-process app over in-memory SQLite with
//! scriptable provider seams.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, Response, StatusCode},
    Router,
};
use eventgate_api::{
    self as api,
    config::{AppConfig, CheckoutConfig},
    errors::ServiceError,
    models::OrganizerSettings,
    services::providers::{
        dropin::{DropInSessionApi, DropInSessionCreated, DropInSessionRequest},
        redirect::{RedirectSessionApi, RedirectSessionCreated, RedirectSessionRequest},
        terminal::{TerminalApi, TerminalInitiated, TerminalPurchaseRequest, TerminalStatusResponse},
        PaymentLink,
    },
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower::ServiceExt;

pub async fn connect_test_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .test_before_acquire(false)
        .sqlx_logging(false);
    let db = Database::connect(options).await.expect("sqlite connect");
    api::db::init_schema(&db).await.expect("schema init");
    Arc::new(db)
}

/// Like [`connect_test_db`], but safe to call from a test running on paused
/// virtual time (`#[tokio::test(start_paused = true)]`).
///
/// Establishing the sqlx pool parks the runtime while it waits on the SQLite
/// worker thread; with the clock frozen, tokio auto-advances virtual time
/// straight to the pool's acquire-timeout and spuriously trips `PoolTimedOut`.
/// Resuming real time just for the connect — on the caller's own runtime, so
/// the connection stays usable for later queries — sidesteps that. Once the
/// pool holds a warm connection, queries register no timer and run fine under
/// the frozen clock again.
pub async fn connect_test_db_virtual_time() -> Arc<DatabaseConnection> {
    tokio::time::resume();
    let db = connect_test_db().await;
    tokio::time::pause();
    db
}

pub fn test_config(organizer: OrganizerSettings) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        environment: "development".into(),
        log_level: "info".into(),
        log_json: false,
        cors_allowed_origins: None,
        cors_allow_any_origin: false,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        payment_webhook_secret: None,
        payment_webhook_tolerance_secs: None,
        checkout: CheckoutConfig {
            // Readiness probes stay bounded but fast under test.
            script_ready_interval_ms: 25,
            ..CheckoutConfig::default()
        },
        organizer,
    }
}

pub fn stripe_settings() -> OrganizerSettings {
    OrganizerSettings {
        payment_provider: "stripe".into(),
        stripe_publishable_key: Some("pk_test_123".into()),
        stripe_secret_key: Some("sk_test_123".into()),
        currency: "USD".into(),
        ..OrganizerSettings::default()
    }
}

pub fn windcave_settings() -> OrganizerSettings {
    OrganizerSettings {
        payment_provider: "windcave".into(),
        windcave_enabled: true,
        windcave_username: Some("merchant".into()),
        windcave_api_key: Some("key".into()),
        ..OrganizerSettings::default()
    }
}

pub fn terminal_settings() -> OrganizerSettings {
    OrganizerSettings {
        payment_provider: "windcave_terminal".into(),
        windcave_enabled: true,
        windcave_hit_username: Some("hit".into()),
        windcave_hit_key: Some("hitkey".into()),
        windcave_station_id: Some("3801234567".into()),
        ..OrganizerSettings::default()
    }
}

/// Redirect provider stub issuing sequential session ids.
#[derive(Default)]
pub struct StubRedirectApi {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl RedirectSessionApi for StubRedirectApi {
    async fn create_session(
        &self,
        _request: &RedirectSessionRequest,
    ) -> Result<RedirectSessionCreated, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RedirectSessionCreated {
            session_id: format!("cs_test_{}", n),
            hosted_url: format!("https://checkout.stripe.test/pay/cs_test_{}", n),
        })
    }
}

/// Drop-in provider stub issuing sequential sessions with hypermedia links.
#[derive(Default)]
pub struct StubDropInApi {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl DropInSessionApi for StubDropInApi {
    async fn create_session(
        &self,
        _request: &DropInSessionRequest,
    ) -> Result<DropInSessionCreated, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("sess_{:04}", n);
        Ok(DropInSessionCreated {
            links: vec![
                PaymentLink {
                    href: format!("https://uat.windcave.com/api/v1/sessions/{}", session_id),
                    rel: "self".into(),
                    method: "GET".into(),
                },
                PaymentLink {
                    href: format!("https://uat.windcave.com/api/v1/sessions/{}", session_id),
                    rel: "ajaxSubmitCard".into(),
                    method: "POST".into(),
                },
            ],
            session_id,
        })
    }
}

/// Terminal stub that replays a scripted sequence of status responses and
/// counts every call.
pub struct ScriptedTerminalApi {
    statuses: Mutex<VecDeque<TerminalStatusResponse>>,
    pub status_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub fail_cancel: bool,
}

impl ScriptedTerminalApi {
    pub fn new(statuses: Vec<TerminalStatusResponse>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            status_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            fail_cancel: false,
        }
    }

    pub fn failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    pub fn polls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TerminalApi for ScriptedTerminalApi {
    async fn initiate(
        &self,
        _request: &TerminalPurchaseRequest,
    ) -> Result<TerminalInitiated, ServiceError> {
        Ok(TerminalInitiated {
            txn_ref: "txn_0001".into(),
            message: Some("Present card to terminal".into()),
        })
    }

    async fn status(&self, _txn_ref: &str) -> Result<TerminalStatusResponse, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        // The last scripted response repeats if polling continues.
        if statuses.len() > 1 {
            Ok(statuses.pop_front().unwrap())
        } else {
            Ok(statuses
                .front()
                .cloned()
                .unwrap_or_default())
        }
    }

    async fn cancel(&self, _txn_ref: &str) -> Result<(), ServiceError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel {
            Err(ServiceError::ExternalApiError(
                "terminal offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: api::AppState,
}

impl TestApp {
    pub async fn new(organizer: OrganizerSettings) -> Self {
        Self::builder(organizer).build().await
    }

    pub fn builder(organizer: OrganizerSettings) -> TestAppBuilder {
        TestAppBuilder {
            organizer,
            redirect: None,
            dropin: None,
            terminal: None,
            webhook_secret: None,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                builder.body(Body::from(json.to_string())).unwrap()
            }
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub struct TestAppBuilder {
    organizer: OrganizerSettings,
    redirect: Option<Arc<dyn RedirectSessionApi>>,
    dropin: Option<Arc<dyn DropInSessionApi>>,
    terminal: Option<Arc<dyn TerminalApi>>,
    webhook_secret: Option<String>,
}

impl TestAppBuilder {
    pub fn redirect_api(mut self, api: Arc<dyn RedirectSessionApi>) -> Self {
        self.redirect = Some(api);
        self
    }

    pub fn dropin_api(mut self, api: Arc<dyn DropInSessionApi>) -> Self {
        self.dropin = Some(api);
        self
    }

    pub fn terminal_api(mut self, api: Arc<dyn TerminalApi>) -> Self {
        self.terminal = Some(api);
        self
    }

    pub fn webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }

    pub async fn build(self) -> TestApp {
        let db = connect_test_db().await;
        let mut config = test_config(self.organizer);
        config.payment_webhook_secret = self.webhook_secret;
        let config = Arc::new(config);

        let (event_tx, mut event_rx) = mpsc::channel(256);
        // Drain events so senders never block.
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
        let event_sender = api::events::EventSender::new(event_tx);

        let services = api::handlers::AppServices::with_provider_apis(
            db.clone(),
            Arc::new(event_sender.clone()),
            config.clone(),
            self.redirect,
            self.dropin,
            self.terminal,
        );

        let state = api::AppState {
            db,
            config,
            event_sender,
            cache: Arc::new(api::cache::InMemoryCache::new()),
            services,
        };

        let router = Router::new()
            .merge(api::root_routes())
            .nest("/api/v1", api::api_v1_routes())
            .with_state(state.clone());

        TestApp { router, state }
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}

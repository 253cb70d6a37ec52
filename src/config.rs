use crate::models::OrganizerSettings;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Checkout engine tunables. Defaults mirror the storefront behavior:
/// 500ms × 10 readiness probes for provider scripts, terminal polling at a
/// 3s cadence after a 2s head start, bounded at five minutes.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    /// Processing fee applied on top of the subtotal, percent.
    #[serde(default = "default_processing_fee_percent")]
    pub processing_fee_percent: f64,

    #[serde(default = "default_script_ready_attempts")]
    pub script_ready_attempts: u32,
    #[serde(default = "default_script_ready_interval_ms")]
    pub script_ready_interval_ms: u64,

    #[serde(default = "default_terminal_poll_initial_delay_secs")]
    pub terminal_poll_initial_delay_secs: u64,
    #[serde(default = "default_terminal_poll_interval_secs")]
    pub terminal_poll_interval_secs: u64,
    #[serde(default = "default_terminal_poll_timeout_secs")]
    pub terminal_poll_timeout_secs: u64,

    /// Absolute URLs the hosted payment page redirects back to.
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
    #[serde(default = "default_failure_url")]
    pub failure_url: String,
}

fn default_processing_fee_percent() -> f64 {
    3.0
}
fn default_script_ready_attempts() -> u32 {
    10
}
fn default_script_ready_interval_ms() -> u64 {
    500
}
fn default_terminal_poll_initial_delay_secs() -> u64 {
    2
}
fn default_terminal_poll_interval_secs() -> u64 {
    3
}
fn default_terminal_poll_timeout_secs() -> u64 {
    300
}
fn default_success_url() -> String {
    "http://localhost:8080/payment-success".to_string()
}
fn default_cancel_url() -> String {
    "http://localhost:8080/payment-cancelled".to_string()
}
fn default_failure_url() -> String {
    "http://localhost:8080/payment-failed".to_string()
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            processing_fee_percent: default_processing_fee_percent(),
            script_ready_attempts: default_script_ready_attempts(),
            script_ready_interval_ms: default_script_ready_interval_ms(),
            terminal_poll_initial_delay_secs: default_terminal_poll_initial_delay_secs(),
            terminal_poll_interval_secs: default_terminal_poll_interval_secs(),
            terminal_poll_timeout_secs: default_terminal_poll_timeout_secs(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
            failure_url: default_failure_url(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Shared secret for verifying inbound payment webhooks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,
    /// Accepted webhook timestamp skew (seconds)
    #[serde(default)]
    pub payment_webhook_tolerance_secs: Option<u64>,

    /// Checkout engine tunables
    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    /// Organizer payment-provider settings for this deployment
    #[serde(default)]
    pub organizer: OrganizerSettings,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("dev")
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Processing fee as an exact decimal fraction.
    pub fn processing_fee_percent(&self) -> rust_decimal::Decimal {
        rust_decimal::Decimal::from_f64_retain(self.checkout.processing_fee_percent)
            .unwrap_or(rust_decimal::Decimal::ZERO)
    }

    /// Additional constraints that plain field validation cannot express.
    pub fn validate_additional_constraints(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        if !(0.0..=100.0).contains(&self.checkout.processing_fee_percent) {
            let mut err = validator::ValidationError::new("range");
            err.message = Some("processing_fee_percent must be between 0 and 100".into());
            errors.add("checkout", err);
        }

        if !self.is_development()
            && self.cors_allowed_origins.is_none()
            && !self.cors_allow_any_origin
        {
            let mut err = validator::ValidationError::new("cors");
            err.message = Some(
                "set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true outside development"
                    .into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("eventgate_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://eventgate.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

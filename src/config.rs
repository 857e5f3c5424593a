use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::db::transaction::RetryConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_TAX_RATE: f64 = 0.10;
const DEFAULT_CART_TTL_DAYS: i64 = 30;
const DEFAULT_MAX_ITEM_QUANTITY: i32 = 100;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ORDER_NUMBER_PREFIX: &str = "ORD";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Application configuration
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Runtime environment (development, staging, production)
    pub environment: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Run embedded migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Sales tax applied to the cart subtotal (as decimal, e.g., 0.08 for 8%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_tax_rate")]
    pub tax_rate: f64,

    /// Days a cart may sit untouched before its reservations are released
    #[serde(default = "default_cart_ttl_days")]
    #[validate(range(min = 1, max = 365))]
    pub cart_ttl_days: i64,

    /// Upper bound for the quantity of a single cart line
    #[serde(default = "default_max_item_quantity")]
    #[validate(range(min = 1, max = 10000))]
    pub max_item_quantity: i32,

    /// Attempts per transactional operation before a conflict is surfaced
    #[serde(default = "default_retry_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub retry_max_attempts: u32,

    /// Fixed pause between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a single transaction attempt
    #[serde(default = "default_transaction_timeout_secs")]
    #[validate(range(min = 1))]
    pub transaction_timeout_secs: u64,

    #[serde(default = "default_order_number_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub order_number_prefix: String,

    /// Interval of the background expired-cart sweep; 0 disables it
    #[serde(default)]
    pub cart_sweep_interval_secs: u64,

    /// Capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

/// Typed knobs consumed by the cart, checkout and order services.
#[derive(Debug, Clone)]
pub struct CommerceSettings {
    pub tax_rate: Decimal,
    pub cart_ttl: chrono::Duration,
    pub max_item_quantity: i32,
    pub order_number_prefix: String,
    pub retry: RetryConfig,
}

impl Default for CommerceSettings {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(10, 2),
            cart_ttl: chrono::Duration::days(DEFAULT_CART_TTL_DAYS),
            max_item_quantity: DEFAULT_MAX_ITEM_QUANTITY,
            order_number_prefix: DEFAULT_ORDER_NUMBER_PREFIX.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the connection target.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            tax_rate: DEFAULT_TAX_RATE,
            cart_ttl_days: DEFAULT_CART_TTL_DAYS,
            max_item_quantity: DEFAULT_MAX_ITEM_QUANTITY,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            transaction_timeout_secs: DEFAULT_TRANSACTION_TIMEOUT_SECS,
            order_number_prefix: DEFAULT_ORDER_NUMBER_PREFIX.to_string(),
            cart_sweep_interval_secs: 0,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn commerce_settings(&self) -> CommerceSettings {
        // validate() bounds tax_rate to a finite [0, 1], so conversion only fails on NaN
        let tax_rate = Decimal::from_f64(self.tax_rate)
            .map(|rate| rate.round_dp(4))
            .unwrap_or_else(|| Decimal::new(10, 2));

        CommerceSettings {
            tax_rate,
            cart_ttl: chrono::Duration::days(self.cart_ttl_days),
            max_item_quantity: self.max_item_quantity,
            order_number_prefix: self.order_number_prefix.clone(),
            retry: RetryConfig {
                max_attempts: self.retry_max_attempts,
                backoff: Duration::from_millis(self.retry_backoff_ms),
                attempt_timeout: Duration::from_secs(self.transaction_timeout_secs),
            },
        }
    }

    pub fn cart_sweep_interval(&self) -> Option<Duration> {
        (self.cart_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.cart_sweep_interval_secs))
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}

fn default_cart_ttl_days() -> i64 {
    DEFAULT_CART_TTL_DAYS
}

fn default_max_item_quantity() -> i32 {
    DEFAULT_MAX_ITEM_QUANTITY
}

fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_transaction_timeout_secs() -> u64 {
    DEFAULT_TRANSACTION_TIMEOUT_SECS
}

fn default_order_number_prefix() -> String {
    DEFAULT_ORDER_NUMBER_PREFIX.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("tax_rate");
        err.message = Some("tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("checkout_engine={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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
        .set_default("database_url", "sqlite://checkout.db?mode=rwc")?
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

    info!("Configuration loaded successfully");
    Ok(app_config)
}

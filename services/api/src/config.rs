//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub gemini_api_key: String,
    pub ai_api_base: String,
    pub ai_model: String,
    pub storage_url: String,
    pub storage_key: String,
    pub storage_bucket: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_price_id: String,
    pub app_url: String,
    pub cors_origin: String,
    /// Wait before the single profile reload after login or signup.
    pub profile_retry_delay: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required =
            |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Load Server and Database Settings ---
        let bind_address_str = or_default("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required("DATABASE_URL")?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- AI provider ---
        let gemini_api_key = required("GEMINI_API_KEY")?;
        let ai_api_base = or_default(
            "AI_API_BASE",
            "https://generativelanguage.googleapis.com/v1beta/openai",
        );
        let ai_model = or_default("AI_MODEL", "gemini-1.5-flash");

        // --- Object storage ---
        let storage_url = required("STORAGE_URL")?.trim_end_matches('/').to_string();
        let storage_key = required("STORAGE_KEY")?;
        let storage_bucket = or_default("STORAGE_BUCKET", "exam_images");

        // --- Billing ---
        let stripe_secret_key = required("STRIPE_SECRET_KEY")?;
        let stripe_webhook_secret = required("STRIPE_WEBHOOK_SECRET")?;
        let stripe_price_id = required("STRIPE_PRICE_ID")?;

        // --- Web ---
        let app_url = or_default("APP_URL", "http://localhost:5173");
        let cors_origin = or_default("CORS_ORIGIN", "http://localhost:5173");

        let retry_str = or_default("PROFILE_RETRY_DELAY_MS", "2000");
        let profile_retry_delay = retry_str
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| {
                ConfigError::InvalidValue("PROFILE_RETRY_DELAY_MS".to_string(), e.to_string())
            })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            gemini_api_key,
            ai_api_base,
            ai_model,
            storage_url,
            storage_key,
            storage_bucket,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_price_id,
            app_url,
            cors_origin,
            profile_retry_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/exams"),
            ("GEMINI_API_KEY", "key"),
            ("STORAGE_URL", "https://storage.example.com/storage/v1/"),
            ("STORAGE_KEY", "service-key"),
            ("STRIPE_SECRET_KEY", "sk_test"),
            ("STRIPE_WEBHOOK_SECRET", "whsec_test"),
            ("STRIPE_PRICE_ID", "price_1"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_are_applied() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.ai_model, "gemini-1.5-flash");
        assert_eq!(config.storage_bucket, "exam_images");
        assert_eq!(config.app_url, "http://localhost:5173");
        assert_eq!(config.profile_retry_delay, Duration::from_secs(2));
        assert_eq!(config.storage_url, "https://storage.example.com/storage/v1");
    }

    #[test]
    fn missing_ai_key_is_reported() {
        let mut env = base_env();
        env.remove("GEMINI_API_KEY");
        let err = load(&env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "GEMINI_API_KEY"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut env = base_env();
        env.insert("PROFILE_RETRY_DELAY_MS", "soon");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(..))));

        let mut env = base_env();
        env.insert("RUST_LOG", "chatty");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(..))));
    }
}

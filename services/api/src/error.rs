//! services/api/src/error.rs
//!
//! Startup and wiring errors for the api binary. Request handlers answer with
//! `(StatusCode, String)` instead and never produce an `ApiError`.

use crate::config::ConfigError;
use exam_report_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service port error: {0}")]
    Port(#[from] PortError),

    /// Pool creation or migrations.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The shared outbound HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid CORS origin: {0}")]
    CorsOrigin(#[from] axum::http::header::InvalidHeaderValue),

    /// Binding or serving the listener.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

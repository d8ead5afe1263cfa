//! crates/exam_report_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to stay independent of the database, the AI provider, object storage and billing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ExamAnalysis, ExamImage, Identity, NewAnalysisRecord, Patient, Plan, Profile, Subscription,
    UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl PortError {
    /// The bare message carried by the error, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            PortError::NotFound(m) | PortError::Unexpected(m) => {
                let m = m.trim();
                (!m.is_empty()).then_some(m)
            }
            PortError::Unauthorized => None,
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth Methods ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        full_name: Option<&str>,
    ) -> PortResult<Identity>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Profiles ---
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile>;

    async fn get_profile_by_customer(&self, customer_id: &str) -> PortResult<Profile>;

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> PortResult<()>;

    /// Writes plan, active flag and subscription id in one statement.
    async fn update_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        plan_active: bool,
        subscription_id: &str,
    ) -> PortResult<()>;

    // --- Analyses ---
    async fn save_analysis(&self, record: NewAnalysisRecord) -> PortResult<()>;

    async fn get_analysis(&self, user_id: Uuid, analysis_id: Uuid) -> PortResult<ExamAnalysis>;

    async fn list_analyses(&self, user_id: Uuid) -> PortResult<Vec<ExamAnalysis>>;
}

#[async_trait]
pub trait ExamAnalysisService: Send + Sync {
    /// Sends the exam image and patient data to the model and returns its free text.
    async fn analyze_exam(&self, image: &ExamImage, patient: &Patient) -> PortResult<String>;
}

#[async_trait]
pub trait ImageStorageService: Send + Sync {
    /// Stores the bytes at `path` and returns a durable public URL.
    async fn upload(&self, path: &str, bytes: &[u8], mime_type: &str) -> PortResult<String>;
}

#[async_trait]
pub trait BillingService: Send + Sync {
    async fn create_customer(&self, email: Option<&str>, user_id: Uuid) -> PortResult<String>;

    /// Returns the checkout-session identifier.
    async fn create_checkout_session(&self, customer_id: &str) -> PortResult<String>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> PortResult<Subscription>;
}

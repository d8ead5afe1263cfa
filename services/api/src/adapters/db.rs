//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_report_core::domain::{
    AnalysisStatus, ExamAnalysis, Identity, NewAnalysisRecord, Patient, Plan, Profile,
    UserCredentials,
};
use exam_report_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn not_found_or_unexpected(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}
impl UserRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ProfileRecord {
    id: Uuid,
    full_name: Option<String>,
    email: Option<String>,
    plan: String,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    stripe_plan_active: bool,
}
impl ProfileRecord {
    fn to_domain(self) -> Profile {
        Profile {
            id: self.id,
            full_name: self.full_name,
            email: self.email,
            plan: Plan::from_db(&self.plan),
            stripe_customer_id: self.stripe_customer_id,
            stripe_subscription_id: self.stripe_subscription_id,
            plan_active: self.stripe_plan_active,
        }
    }
}

#[derive(FromRow)]
struct AnalysisRecord {
    id: Uuid,
    patient_name: String,
    patient_age: i32,
    patient_symptoms: Option<String>,
    image_url: String,
    analysis_text: String,
    recommendations_text: String,
    created_at: DateTime<Utc>,
}
impl AnalysisRecord {
    fn to_domain(self) -> ExamAnalysis {
        ExamAnalysis {
            id: self.id,
            patient: Patient {
                name: self.patient_name,
                age: self.patient_age.clamp(0, u16::MAX as i32) as u16,
                symptoms: self.patient_symptoms,
            },
            image_url: self.image_url,
            analysis: self.analysis_text,
            recommendations: self.recommendations_text,
            created_at: self.created_at,
            // Only completed analyses are ever stored.
            status: AnalysisStatus::Completed,
        }
    }
}

const PROFILE_COLUMNS: &str = "id, full_name, email, plan, stripe_customer_id, stripe_subscription_id, stripe_plan_active";
const ANALYSIS_COLUMNS: &str = "id, patient_name, patient_age, patient_symptoms, image_url, analysis_text, recommendations_text, created_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        full_name: Option<&str>,
    ) -> PortResult<Identity> {
        let user_id = Uuid::new_v4();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        sqlx::query("INSERT INTO users (user_id, email, hashed_password) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(email)
            .bind(hashed_password)
            .execute(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Every account starts on the free plan.
        sqlx::query("INSERT INTO profiles (id, full_name, email, plan) VALUES ($1, $2, $3, $4)")
            .bind(user_id)
            .bind(full_name)
            .bind(email)
            .bind(Plan::Free.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(Identity {
            user_id,
            email: Some(email.to_string()),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("User with email {} not found", email)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        user_id.ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "SELECT {} FROM profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Profile {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn get_profile_by_customer(&self, customer_id: &str) -> PortResult<Profile> {
        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "SELECT {} FROM profiles WHERE stripe_customer_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            not_found_or_unexpected(e, format!("Profile not found for customer {}", customer_id))
        })?;
        Ok(record.to_domain())
    }

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(customer_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", user_id)));
        }
        Ok(())
    }

    async fn update_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        plan_active: bool,
        subscription_id: &str,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET plan = $1, stripe_plan_active = $2, stripe_subscription_id = $3, updated_at = NOW() WHERE id = $4",
        )
        .bind(plan.as_str())
        .bind(plan_active)
        .bind(subscription_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", user_id)));
        }
        Ok(())
    }

    async fn save_analysis(&self, record: NewAnalysisRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO analyses (id, user_id, patient_name, patient_age, patient_symptoms, image_url, analysis_text, recommendations_text, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.patient_name)
        .bind(i32::from(record.patient_age))
        .bind(&record.patient_symptoms)
        .bind(&record.image_url)
        .bind(&record.analysis_text)
        .bind(&record.recommendations_text)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn get_analysis(&self, user_id: Uuid, analysis_id: Uuid) -> PortResult<ExamAnalysis> {
        let record = sqlx::query_as::<_, AnalysisRecord>(&format!(
            "SELECT {} FROM analyses WHERE id = $1 AND user_id = $2",
            ANALYSIS_COLUMNS
        ))
        .bind(analysis_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Analysis {} not found", analysis_id)))?;
        Ok(record.to_domain())
    }

    async fn list_analyses(&self, user_id: Uuid) -> PortResult<Vec<ExamAnalysis>> {
        let records = sqlx::query_as::<_, AnalysisRecord>(&format!(
            "SELECT {} FROM analyses WHERE user_id = $1 ORDER BY created_at DESC",
            ANALYSIS_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let analyses = records.into_iter().map(|r| r.to_domain()).collect();
        Ok(analyses)
    }
}

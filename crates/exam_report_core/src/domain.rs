//! crates/exam_report_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database driver or HTTP framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The patient data captured by the exam form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub name: String,
    pub age: u16,
    pub symptoms: Option<String>,
}

impl Patient {
    /// The symptoms text as shown in prompts and reports.
    pub fn symptoms_or_default(&self) -> &str {
        match self.symptoms.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => "Não informado",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Analyzing,
    Completed,
    Error,
}

/// The result of one AI-assisted report generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamAnalysis {
    pub id: Uuid,
    pub patient: Patient,
    pub image_url: String,
    pub analysis: String,
    pub recommendations: String,
    pub created_at: DateTime<Utc>,
    pub status: AnalysisStatus,
}

/// Flattened record written to the analysis store. There is no update path.
#[derive(Debug, Clone)]
pub struct NewAnalysisRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub patient_name: String,
    pub patient_age: u16,
    pub patient_symptoms: Option<String>,
    pub image_url: String,
    pub analysis_text: String,
    pub recommendations_text: String,
    pub created_at: DateTime<Utc>,
}

impl NewAnalysisRecord {
    pub fn from_analysis(user_id: Uuid, analysis: &ExamAnalysis, image_url: &str) -> Self {
        Self {
            id: analysis.id,
            user_id,
            patient_name: analysis.patient.name.clone(),
            patient_age: analysis.patient.age,
            patient_symptoms: analysis.patient.symptoms.clone(),
            image_url: image_url.to_string(),
            analysis_text: analysis.analysis.clone(),
            recommendations_text: analysis.recommendations.clone(),
            created_at: analysis.created_at,
        }
    }
}

/// Subscription tier gating the submission flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Premium => "premium",
        }
    }

    /// Parses the stored text form. Anything unrecognised is treated as `free`.
    pub fn from_db(value: &str) -> Self {
        if value.eq_ignore_ascii_case("premium") {
            Plan::Premium
        } else {
            Plan::Free
        }
    }
}

/// The stored per-user record holding plan and billing linkage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub plan: Plan,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan_active: bool,
}

impl Profile {
    pub fn is_premium(&self) -> bool {
        self.plan == Plan::Premium
    }
}

/// The raw identity record, distinct from the profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// Authentication state for one connected client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub authenticated: bool,
    pub loading: bool,
}

impl Session {
    pub fn loading() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn signed_in(identity: Identity, profile: Profile) -> Self {
        Self {
            identity: Some(identity),
            profile: Some(profile),
            authenticated: true,
            loading: false,
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> Plan {
        self.profile.as_ref().map(|p| p.plan).unwrap_or_default()
    }
}

/// An uploaded exam image.
#[derive(Clone, PartialEq, Eq)]
pub struct ExamImage {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ExamImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamImage")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Raw, unvalidated input from the exam form.
#[derive(Debug, Clone, Default)]
pub struct ExamForm {
    pub name: String,
    pub age: Option<i64>,
    pub symptoms: Option<String>,
    pub image: Option<ExamImage>,
}

/// Subscription status as reported by the billing provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub status: String,
}

//! crates/exam_report_core/src/test_support.rs
//!
//! In-memory port implementations that count calls, for tests in this crate and in
//! the api service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    AnalysisStatus, ExamAnalysis, ExamImage, Identity, NewAnalysisRecord, Patient, Plan, Profile,
    Subscription, UserCredentials,
};
use crate::ports::{
    BillingService, DatabaseService, ExamAnalysisService, ImageStorageService, PortError,
    PortResult,
};

//=========================================================================================
// AI
//=========================================================================================

pub struct FakeAnalyzer {
    reply: Result<String, String>,
    calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExamAnalysisService for FakeAnalyzer {
    async fn analyze_exam(&self, _image: &ExamImage, _patient: &Patient) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(PortError::Unexpected)
    }
}

//=========================================================================================
// Storage
//=========================================================================================

#[derive(Default)]
pub struct FakeStorage {
    uploads: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl FakeStorage {
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageStorageService for FakeStorage {
    async fn upload(&self, path: &str, _bytes: &[u8], _mime_type: &str) -> PortResult<String> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unexpected("storage unavailable".to_string()));
        }
        self.uploads.lock().unwrap().push(path.to_string());
        Ok(format!("https://storage.test/{}", path))
    }
}

//=========================================================================================
// Database
//=========================================================================================

#[derive(Default)]
pub struct FakeDb {
    users: Mutex<HashMap<String, UserCredentials>>,
    sessions: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
    profiles: Mutex<HashMap<Uuid, Profile>>,
    delayed_profile: Mutex<Option<(Profile, usize)>>,
    analyses: Mutex<Vec<NewAnalysisRecord>>,
    profile_reads: AtomicUsize,
    plan_updates: AtomicUsize,
    fail_saves: AtomicBool,
    fail_profile_reads: AtomicBool,
}

impl FakeDb {
    /// A fresh profile on the given plan. Not stored; see `insert_profile`.
    pub fn profile(plan: Plan) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            full_name: Some("Dra. Ana Souza".to_string()),
            email: Some("medica@example.com".to_string()),
            plan,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            plan_active: plan == Plan::Premium,
        }
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.profiles.lock().unwrap().insert(profile.id, profile);
    }

    /// The profile only becomes readable once `reads` lookups have failed.
    pub fn insert_profile_after_reads(&self, profile: Profile, reads: usize) {
        *self.delayed_profile.lock().unwrap() = Some((profile, reads));
    }

    pub fn stored_profile(&self, user_id: Uuid) -> Option<Profile> {
        self.profiles.lock().unwrap().get(&user_id).cloned()
    }

    /// Registers a login and a stored profile in one step; returns the session id.
    pub fn sign_in(&self, profile: &Profile) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.insert_profile(profile.clone());
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), (profile.id, Utc::now() + chrono::Duration::days(1)));
        session_id
    }

    pub fn insert_analysis(&self, record: NewAnalysisRecord) {
        self.analyses.lock().unwrap().push(record);
    }

    pub fn saved_analyses(&self) -> Vec<NewAnalysisRecord> {
        self.analyses.lock().unwrap().clone()
    }

    pub fn profile_reads(&self) -> usize {
        self.profile_reads.load(Ordering::SeqCst)
    }

    pub fn plan_updates(&self) -> usize {
        self.plan_updates.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    /// Every later `get_profile` fails as if the database were down.
    pub fn fail_profile_reads(&self) {
        self.fail_profile_reads.store(true, Ordering::SeqCst);
    }
}

fn to_analysis(record: &NewAnalysisRecord) -> ExamAnalysis {
    ExamAnalysis {
        id: record.id,
        patient: Patient {
            name: record.patient_name.clone(),
            age: record.patient_age,
            symptoms: record.patient_symptoms.clone(),
        },
        image_url: record.image_url.clone(),
        analysis: record.analysis_text.clone(),
        recommendations: record.recommendations_text.clone(),
        created_at: record.created_at,
        status: AnalysisStatus::Completed,
    }
}

#[async_trait]
impl DatabaseService for FakeDb {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        full_name: Option<&str>,
    ) -> PortResult<Identity> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(email) {
            return Err(PortError::Unexpected("email already registered".to_string()));
        }
        let id = Uuid::new_v4();
        users.insert(
            email.to_string(),
            UserCredentials {
                user_id: id,
                email: email.to_string(),
                hashed_password: hashed_password.to_string(),
            },
        );
        let mut profile = FakeDb::profile(Plan::Free);
        profile.id = id;
        profile.email = Some(email.to_string());
        profile.full_name = full_name.map(str::to_string);
        self.insert_profile(profile);
        Ok(Identity {
            user_id: id,
            email: Some(email.to_string()),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.users
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User with email {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        match self.sessions.lock().unwrap().get(session_id) {
            Some((user_id, expires_at)) if *expires_at > Utc::now() => Ok(*user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        let reads = self.profile_reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_profile_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("connection reset".to_string()));
        }
        let mut delayed = self.delayed_profile.lock().unwrap();
        if matches!(&*delayed, Some((_, after)) if reads > *after) {
            if let Some((profile, _)) = delayed.take() {
                self.insert_profile(profile);
            }
        }
        drop(delayed);
        self.stored_profile(user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
    }

    async fn get_profile_by_customer(&self, customer_id: &str) -> PortResult<Profile> {
        self.profiles
            .lock()
            .unwrap()
            .values()
            .find(|p| p.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("No profile for customer {}", customer_id)))
    }

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> PortResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        profile.stripe_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn update_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        plan_active: bool,
        subscription_id: &str,
    ) -> PortResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        profile.plan = plan;
        profile.plan_active = plan_active;
        profile.stripe_subscription_id = Some(subscription_id.to_string());
        self.plan_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_analysis(&self, record: NewAnalysisRecord) -> PortResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("insert failed".to_string()));
        }
        self.insert_analysis(record);
        Ok(())
    }

    async fn get_analysis(&self, user_id: Uuid, analysis_id: Uuid) -> PortResult<ExamAnalysis> {
        self.analyses
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == analysis_id && r.user_id == user_id)
            .map(to_analysis)
            .ok_or_else(|| PortError::NotFound(format!("Analysis {} not found", analysis_id)))
    }

    async fn list_analyses(&self, user_id: Uuid) -> PortResult<Vec<ExamAnalysis>> {
        let mut list: Vec<ExamAnalysis> = self
            .analyses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(to_analysis)
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}

//=========================================================================================
// Billing
//=========================================================================================

pub struct FakeBilling {
    subscription: Subscription,
    customers: AtomicUsize,
    checkouts: AtomicUsize,
}

impl FakeBilling {
    pub fn with_subscription(id: &str, status: &str) -> Self {
        Self {
            subscription: Subscription {
                id: id.to_string(),
                status: status.to_string(),
            },
            customers: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
        }
    }

    pub fn customers_created(&self) -> usize {
        self.customers.load(Ordering::SeqCst)
    }

    pub fn checkouts_created(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingService for FakeBilling {
    async fn create_customer(&self, _email: Option<&str>, _user_id: Uuid) -> PortResult<String> {
        let n = self.customers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cus_test_{}", n))
    }

    async fn create_checkout_session(&self, customer_id: &str) -> PortResult<String> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cs_test_{}", customer_id))
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> PortResult<Subscription> {
        if subscription_id == self.subscription.id {
            Ok(self.subscription.clone())
        } else {
            Err(PortError::NotFound(format!("Subscription {} not found", subscription_id)))
        }
    }
}

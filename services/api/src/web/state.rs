//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the auth notices fanned out to
//! every open WebSocket connection.

use crate::config::Config;
use exam_report_core::ports::{
    BillingService, DatabaseService, ExamAnalysisService, ImageStorageService,
};
use exam_report_core::report::LayoutConfig;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the auth-notice channel. Lagging receivers only lose old notices.
const NOTICE_CAPACITY: usize = 64;

//=========================================================================================
// Auth Notices
//=========================================================================================

/// Identity-side changes that open connections must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthNotice {
    SignedOut { user_id: Uuid },
    /// The stored profile changed, e.g. after a billing webhook.
    ProfileChanged { user_id: Uuid },
}

impl AuthNotice {
    pub fn user_id(&self) -> Uuid {
        match self {
            AuthNotice::SignedOut { user_id } | AuthNotice::ProfileChanged { user_id } => *user_id,
        }
    }
}

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub analyzer: Arc<dyn ExamAnalysisService>,
    pub storage: Arc<dyn ImageStorageService>,
    pub billing: Arc<dyn BillingService>,
    pub layout: LayoutConfig,
    pub notices: broadcast::Sender<AuthNotice>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        db: Arc<dyn DatabaseService>,
        analyzer: Arc<dyn ExamAnalysisService>,
        storage: Arc<dyn ImageStorageService>,
        billing: Arc<dyn BillingService>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            db,
            config,
            analyzer,
            storage,
            billing,
            layout: LayoutConfig::default(),
            notices,
        }
    }

    /// Publishes a notice. Having no open connection is not an error.
    pub fn publish(&self, notice: AuthNotice) {
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use exam_report_core::test_support::{FakeAnalyzer, FakeBilling, FakeDb, FakeStorage};

    pub const WEBHOOK_SECRET: &str = "whsec_test";

    pub fn test_config() -> Config {
        Config::from_lookup(|key| {
            let value = match key {
                "DATABASE_URL" => "postgres://localhost/exams_test",
                "GEMINI_API_KEY" => "test-key",
                "STORAGE_URL" => "https://storage.test",
                "STORAGE_KEY" => "service-key",
                "STRIPE_SECRET_KEY" => "sk_test",
                "STRIPE_WEBHOOK_SECRET" => WEBHOOK_SECRET,
                "STRIPE_PRICE_ID" => "price_test",
                "PROFILE_RETRY_DELAY_MS" => "0",
                _ => return None,
            };
            Some(value.to_string())
        })
        .expect("test config is complete")
    }

    /// The fakes behind an `AppState`, kept so tests can inspect them.
    pub struct Harness {
        pub state: Arc<AppState>,
        pub db: Arc<FakeDb>,
        pub analyzer: Arc<FakeAnalyzer>,
        pub storage: Arc<FakeStorage>,
        pub billing: Arc<FakeBilling>,
    }

    pub fn harness(analyzer: FakeAnalyzer, billing: FakeBilling) -> Harness {
        let db = Arc::new(FakeDb::default());
        let analyzer = Arc::new(analyzer);
        let storage = Arc::new(FakeStorage::default());
        let billing = Arc::new(billing);
        let state = Arc::new(AppState::new(
            Arc::new(test_config()),
            db.clone(),
            analyzer.clone(),
            storage.clone(),
            billing.clone(),
        ));
        Harness {
            state,
            db,
            analyzer,
            storage,
            billing,
        }
    }
}

//! crates/exam_report_core/src/session.rs
//!
//! The session/plan state machine that decides which screen a client sees, and the
//! pure function that renders a screen into a serializable view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ExamAnalysis, Identity, Patient, Plan, Profile, Session};
use crate::ports::{DatabaseService, PortError, PortResult};
use crate::report::{report_file_name, ReportVariant};
use crate::submission::{FieldErrors, SubmissionState};
use crate::text::format_for_display;

/// Delay before the single profile reload after login or signup.
pub const PROFILE_RETRY_DELAY: Duration = Duration::from_secs(2);

pub const PROFILE_LOAD_ERROR: &str = "Não foi possível carregar o perfil do usuário.";

//=========================================================================================
// Events and Screens
//=========================================================================================

/// Changes delivered by the identity side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { identity: Identity, profile: Profile },
    /// The identity is valid but its profile could not be loaded.
    ProfileMissing { message: String },
    SignedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    Loading,
    Unauthenticated { error: Option<String> },
    Form { errors: FieldErrors },
    Analyzing,
    Result { analysis: ExamAnalysis },
    Error { message: String },
    UpgradePrompt { error: Option<String> },
}

impl Screen {
    pub fn name(&self) -> &'static str {
        match self {
            Screen::Loading => "loading",
            Screen::Unauthenticated { .. } => "unauthenticated",
            Screen::Form { .. } => "form",
            Screen::Analyzing => "analyzing",
            Screen::Result { .. } => "result",
            Screen::Error { .. } => "error",
            Screen::UpgradePrompt { .. } => "upgrade_prompt",
        }
    }

    fn empty_form() -> Self {
        Screen::Form {
            errors: FieldErrors::default(),
        }
    }
}

/// Marker left in the return URL by the checkout flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentReturn {
    Success,
    Cancelled,
}

/// Finds a `payment=success|cancelled` pair in a query string. Returns the marker
/// and the query with the pair removed, or `None` when there is no marker.
pub fn take_payment_marker(query: &str) -> Option<(PaymentReturn, String)> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut marker = None;
    let mut kept = Vec::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair {
            "payment=success" if marker.is_none() => marker = Some(PaymentReturn::Success),
            "payment=cancelled" if marker.is_none() => marker = Some(PaymentReturn::Cancelled),
            _ => kept.push(pair),
        }
    }

    marker.map(|m| (m, kept.join("&")))
}

//=========================================================================================
// State Machine
//=========================================================================================

/// One client's session and current screen. Created in `Loading`; the session value
/// is replaced wholesale on every auth event.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    session: Session,
    screen: Screen,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            session: Session::loading(),
            screen: Screen::Loading,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.authenticated
    }

    pub fn on_auth_event(&mut self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn { identity, profile } => {
                info!(
                    user_id = %identity.user_id,
                    plan = profile.plan.as_str(),
                    "Auth event: signed in."
                );
                self.session = Session::signed_in(identity, profile);
                if matches!(self.screen, Screen::Loading | Screen::Unauthenticated { .. }) {
                    self.screen = Screen::empty_form();
                }
            }
            AuthEvent::ProfileMissing { message } => {
                warn!("Auth event: profile unavailable.");
                self.session = Session::signed_out();
                self.screen = Screen::Unauthenticated {
                    error: Some(message),
                };
            }
            AuthEvent::SignedOut => {
                info!("Auth event: signed out.");
                self.session = Session::signed_out();
                self.screen = Screen::Unauthenticated { error: None };
            }
        }
    }

    /// Mirrors the submission flow onto the authenticated screens.
    pub fn apply_submission(&mut self, state: &SubmissionState) {
        if !self.is_authenticated() {
            warn!("Ignoring submission state for an unauthenticated session.");
            return;
        }
        self.screen = match state {
            SubmissionState::Form { errors } => Screen::Form {
                errors: errors.clone(),
            },
            SubmissionState::Analyzing => Screen::Analyzing,
            SubmissionState::Result { analysis } => Screen::Result {
                analysis: analysis.clone(),
            },
            SubmissionState::Error { message } => Screen::Error {
                message: message.clone(),
            },
            SubmissionState::UpgradeRequired => Screen::UpgradePrompt { error: None },
        };
    }

    /// Direct user action from the form.
    pub fn request_upgrade(&mut self) {
        if self.is_authenticated() {
            self.screen = Screen::UpgradePrompt { error: None };
        }
    }

    /// Shown on the upgrade screen when the checkout could not be started.
    pub fn upgrade_failed(&mut self, message: String) {
        if let Screen::UpgradePrompt { error } = &mut self.screen {
            *error = Some(message);
        }
    }

    /// Leaves the upgrade prompt for the form, optionally with a refreshed profile.
    pub fn leave_upgrade(&mut self, refreshed: Option<Profile>) {
        if !matches!(self.screen, Screen::UpgradePrompt { .. }) {
            return;
        }
        if let Some(profile) = refreshed {
            self.replace_profile(profile);
        }
        self.screen = Screen::empty_form();
    }

    /// Installs a re-fetched profile, e.g. after a payment redirect or a plan change.
    /// A premium profile waiting on the upgrade prompt is sent back to the form.
    pub fn refresh_profile(&mut self, profile: Profile) {
        if !self.is_authenticated() {
            return;
        }
        let premium = profile.is_premium();
        self.replace_profile(profile);
        if premium && matches!(self.screen, Screen::UpgradePrompt { .. }) {
            self.screen = Screen::empty_form();
        }
    }

    fn replace_profile(&mut self, profile: Profile) {
        if let Some(identity) = self.session.identity.clone() {
            self.session = Session::signed_in(identity, profile);
        }
    }
}

/// Loads a profile, retrying exactly once after `delay` when the first read fails.
/// A profile can lag behind a fresh signup.
pub async fn load_profile_with_retry(
    db: &dyn DatabaseService,
    user_id: Uuid,
    delay: Duration,
) -> PortResult<Profile> {
    match db.get_profile(user_id).await {
        Ok(profile) => Ok(profile),
        Err(PortError::Unauthorized) => Err(PortError::Unauthorized),
        Err(e) => {
            warn!("Profile for {} not available yet ({}); retrying once.", user_id, e);
            tokio::time::sleep(delay).await;
            db.get_profile(user_id).await
        }
    }
}

//=========================================================================================
// Rendering
//=========================================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DownloadLink {
    pub variant: &'static str,
    pub file_name: String,
    pub href: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultView {
    pub id: Uuid,
    pub patient: Patient,
    pub image_url: String,
    pub analysis_html: String,
    pub recommendations_html: String,
    pub created_at: DateTime<Utc>,
    pub downloads: Vec<DownloadLink>,
}

impl ResultView {
    pub fn from_analysis(analysis: &ExamAnalysis) -> Self {
        let downloads = [
            ReportVariant::Combined,
            ReportVariant::AnalysisOnly,
            ReportVariant::RecommendationsOnly,
            ReportVariant::PlainText,
        ]
        .into_iter()
        .map(|variant| DownloadLink {
            variant: variant.slug(),
            file_name: report_file_name(variant, analysis),
            href: format!("/exams/{}/report/{}", analysis.id, variant.slug()),
        })
        .collect();

        Self {
            id: analysis.id,
            patient: analysis.patient.clone(),
            image_url: analysis.image_url.clone(),
            analysis_html: format_for_display(&analysis.analysis),
            recommendations_html: format_for_display(&analysis.recommendations),
            created_at: analysis.created_at,
            downloads,
        }
    }
}

/// Everything a client needs to draw the current screen.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScreenView {
    pub screen: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultView>,
}

pub fn render(machine: &SessionMachine) -> ScreenView {
    let session = machine.session();
    let profile = session.profile.as_ref();

    let mut view = ScreenView {
        screen: machine.screen().name(),
        plan: profile.map(|p| p.plan),
        display_name: profile
            .and_then(|p| p.full_name.clone())
            .or_else(|| session.identity.as_ref().and_then(|i| i.email.clone())),
        field_errors: None,
        message: None,
        result: None,
    };

    match machine.screen() {
        Screen::Form { errors } if !errors.is_empty() => view.field_errors = Some(errors.clone()),
        Screen::Result { analysis } => view.result = Some(ResultView::from_analysis(analysis)),
        Screen::Error { message } => view.message = Some(message.clone()),
        Screen::Unauthenticated { error } | Screen::UpgradePrompt { error } => {
            view.message = error.clone()
        }
        _ => {}
    }

    view
}

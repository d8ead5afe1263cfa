//! services/api/src/web/session_driver.rs
//!
//! Drives one connection's `SessionMachine` and `ExamSubmissionFlow` from client
//! messages and auth notices. Everything the client must see is pushed onto an
//! outbox channel; the socket task only forwards it.

use exam_report_core::billing::start_checkout;
use exam_report_core::domain::{ExamForm, ExamImage, Identity};
use exam_report_core::session::{
    load_profile_with_retry, render, take_payment_marker, AuthEvent, PaymentReturn, Screen,
    SessionMachine, PROFILE_LOAD_ERROR,
};
use exam_report_core::submission::{ExamSubmissionFlow, SubmissionState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::web::billing::checkout_failure_message;
use crate::web::protocol::{ClientMessage, ServerMessage};
use crate::web::state::{AppState, AuthNotice};

/// Form data announced by `submit_exam`, waiting for its image frame.
#[derive(Debug)]
struct PendingExam {
    name: String,
    age: Option<i64>,
    symptoms: Option<String>,
    file_name: String,
    mime_type: String,
}

pub struct SessionDriver {
    app_state: Arc<AppState>,
    user_id: Uuid,
    auth_session_id: String,
    machine: SessionMachine,
    flow: ExamSubmissionFlow,
    pending: Option<PendingExam>,
    outbox: mpsc::UnboundedSender<ServerMessage>,
    closed: bool,
}

impl SessionDriver {
    pub fn new(
        app_state: Arc<AppState>,
        user_id: Uuid,
        auth_session_id: String,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let flow = ExamSubmissionFlow::new(
            app_state.analyzer.clone(),
            app_state.storage.clone(),
            app_state.db.clone(),
        );
        Self {
            app_state,
            user_id,
            auth_session_id,
            machine: SessionMachine::new(),
            flow,
            pending: None,
            outbox,
            closed: false,
        }
    }

    /// True once the session has signed out; the connection should end.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    fn send(&self, message: ServerMessage) {
        if self.outbox.send(message).is_err() {
            warn!("Outbox closed; dropping message for user {}.", self.user_id);
        }
    }

    fn send_screen(&self) {
        self.send(ServerMessage::Screen {
            view: render(&self.machine),
        });
    }

    /// Loads the profile (with the single retry) and emits the first screen.
    pub async fn start(&mut self) {
        self.send_screen();

        let event = match load_profile_with_retry(
            self.app_state.db.as_ref(),
            self.user_id,
            self.app_state.config.profile_retry_delay,
        )
        .await
        {
            Ok(profile) => AuthEvent::SignedIn {
                identity: Identity {
                    user_id: self.user_id,
                    email: profile.email.clone(),
                },
                profile,
            },
            Err(e) => {
                warn!("Profile for {} could not be loaded: {:?}", self.user_id, e);
                AuthEvent::ProfileMissing {
                    message: PROFILE_LOAD_ERROR.to_string(),
                }
            }
        };

        self.machine.on_auth_event(event);
        self.send_screen();
    }

    /// Handles one text frame.
    pub async fn on_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.on_message(message).await,
            Err(e) => {
                warn!("Unparsable client message: {}", e);
                self.send(ServerMessage::Error {
                    message: "Mensagem inválida.".to_string(),
                });
            }
        }
    }

    pub async fn on_message(&mut self, message: ClientMessage) {
        if self.closed {
            return;
        }
        match message {
            ClientMessage::Navigate { query } => self.on_navigate(&query).await,
            ClientMessage::Logout => self.logout().await,
            _ if !self.machine.is_authenticated() => {
                warn!("Ignoring client action for an unauthenticated session.");
            }
            ClientMessage::SubmitExam {
                name,
                age,
                symptoms,
                file_name,
                mime_type,
            } => {
                self.pending = None;
                let Some(profile) = self.machine.session().profile.clone() else {
                    return;
                };
                let state = self.flow.begin(&profile).clone();
                self.machine.apply_submission(&state);
                if state == SubmissionState::Analyzing {
                    self.pending = Some(PendingExam {
                        name,
                        age,
                        symptoms,
                        file_name,
                        mime_type,
                    });
                }
                self.send_screen();
            }
            ClientMessage::NewAnalysis => {
                self.pending = None;
                self.flow.new_analysis();
                self.machine.apply_submission(self.flow.state());
                self.send_screen();
            }
            ClientMessage::RequestUpgrade => {
                self.machine.request_upgrade();
                self.send_screen();
            }
            ClientMessage::StartCheckout => self.checkout().await,
            ClientMessage::LeaveUpgrade => {
                let refreshed = self.app_state.db.get_profile(self.user_id).await.ok();
                self.flow.new_analysis();
                self.machine.leave_upgrade(refreshed);
                self.send_screen();
            }
        }
    }

    /// Handles one binary frame: the image for the pending submission.
    pub async fn on_binary(&mut self, bytes: Vec<u8>) {
        let Some(pending) = self.pending.take() else {
            warn!("Image frame without a pending submission; ignoring.");
            return;
        };

        let form = ExamForm {
            name: pending.name,
            age: pending.age,
            symptoms: pending.symptoms,
            image: Some(ExamImage {
                file_name: pending.file_name,
                mime_type: pending.mime_type,
                bytes,
            }),
        };

        let state = self.flow.complete(self.user_id, form).await.clone();
        self.machine.apply_submission(&state);
        self.send_screen();
    }

    /// Reacts to identity changes published by other requests.
    pub async fn on_notice(&mut self, notice: &AuthNotice) {
        if notice.user_id() != self.user_id || self.closed {
            return;
        }
        match notice {
            AuthNotice::SignedOut { .. } => self.sign_out(),
            AuthNotice::ProfileChanged { .. } => self.reload_profile().await,
        }
    }

    async fn on_navigate(&mut self, query: &str) {
        let Some((marker, cleaned)) = take_payment_marker(query) else {
            return;
        };
        match marker {
            PaymentReturn::Success => info!(user_id = %self.user_id, "Returned from checkout."),
            PaymentReturn::Cancelled => info!(user_id = %self.user_id, "Checkout cancelled."),
        }
        self.send(ServerMessage::ClearPaymentMarker { query: cleaned });
        self.reload_profile().await;
    }

    async fn reload_profile(&mut self) {
        match self.app_state.db.get_profile(self.user_id).await {
            Ok(profile) => {
                self.machine.refresh_profile(profile);
                self.send_screen();
            }
            Err(e) => warn!("Failed to reload profile for {}: {:?}", self.user_id, e),
        }
    }

    async fn checkout(&mut self) {
        if !matches!(self.machine.screen(), Screen::UpgradePrompt { .. }) {
            self.machine.request_upgrade();
        }
        let Some(profile) = self.machine.session().profile.clone() else {
            return;
        };
        let email = self
            .machine
            .session()
            .identity
            .as_ref()
            .and_then(|i| i.email.clone());

        match start_checkout(
            self.app_state.db.as_ref(),
            self.app_state.billing.as_ref(),
            &profile,
            email.as_deref(),
        )
        .await
        {
            Ok(session_id) => {
                // The customer id may have just been stored.
                if let Ok(profile) = self.app_state.db.get_profile(self.user_id).await {
                    self.machine.refresh_profile(profile);
                }
                self.send(ServerMessage::Checkout { session_id });
            }
            Err(e) => {
                warn!("Checkout failed for {}: {:?}", self.user_id, e);
                self.machine.upgrade_failed(checkout_failure_message(&e));
                self.send_screen();
            }
        }
    }

    async fn logout(&mut self) {
        if let Err(e) = self
            .app_state
            .db
            .delete_auth_session(&self.auth_session_id)
            .await
        {
            warn!("Failed to delete auth session on logout: {:?}", e);
        }
        self.sign_out();
        self.app_state.publish(AuthNotice::SignedOut {
            user_id: self.user_id,
        });
    }

    fn sign_out(&mut self) {
        self.pending = None;
        self.flow.new_analysis();
        self.machine.on_auth_event(AuthEvent::SignedOut);
        self.send_screen();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::state::testing::{harness, Harness};
    use exam_report_core::domain::Plan;
    use exam_report_core::test_support::{FakeAnalyzer, FakeBilling, FakeDb};
    use tokio::sync::mpsc::UnboundedReceiver;

    const REPLY: &str = "1. ANÁLISE\nSem alterações.\n2. RECOMENDAÇÕES\nRetorno em 6 meses.";

    struct Connected {
        harness: Harness,
        driver: SessionDriver,
        rx: UnboundedReceiver<ServerMessage>,
        user_id: Uuid,
    }

    async fn connect(plan: Plan) -> Connected {
        let harness = harness(
            FakeAnalyzer::replying(REPLY),
            FakeBilling::with_subscription("sub_1", "active"),
        );
        let profile = FakeDb::profile(plan);
        let auth_session_id = harness.db.sign_in(&profile);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut driver = SessionDriver::new(harness.state.clone(), profile.id, auth_session_id, tx);
        driver.start().await;
        Connected {
            harness,
            driver,
            rx,
            user_id: profile.id,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn screens(messages: &[ServerMessage]) -> Vec<&'static str> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Screen { view } => Some(view.screen),
                _ => None,
            })
            .collect()
    }

    fn submit() -> ClientMessage {
        ClientMessage::SubmitExam {
            name: "Maria Silva".to_string(),
            age: Some(45),
            symptoms: None,
            file_name: "torax.png".to_string(),
            mime_type: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn start_moves_from_loading_to_form() {
        let mut c = connect(Plan::Premium).await;
        assert_eq!(screens(&drain(&mut c.rx)), vec!["loading", "form"]);
        assert!(c.driver.machine().is_authenticated());
    }

    #[tokio::test]
    async fn missing_profile_ends_unauthenticated_with_message() {
        let harness = harness(
            FakeAnalyzer::replying(REPLY),
            FakeBilling::with_subscription("s", "active"),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver =
            SessionDriver::new(harness.state.clone(), Uuid::new_v4(), "x".to_string(), tx);
        driver.start().await;

        let messages = drain(&mut rx);
        match messages.last() {
            Some(ServerMessage::Screen { view }) => {
                assert_eq!(view.screen, "unauthenticated");
                assert_eq!(view.message.as_deref(), Some(PROFILE_LOAD_ERROR));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(harness.db.profile_reads(), 2);
    }

    #[tokio::test]
    async fn premium_submission_shows_analyzing_then_result() {
        let mut c = connect(Plan::Premium).await;
        drain(&mut c.rx);

        c.driver.on_message(submit()).await;
        assert_eq!(screens(&drain(&mut c.rx)), vec!["analyzing"]);

        c.driver.on_binary(b"\x89PNG".to_vec()).await;
        let messages = drain(&mut c.rx);
        match messages.last() {
            Some(ServerMessage::Screen { view }) => {
                assert_eq!(view.screen, "result");
                let result = view.result.as_ref().unwrap();
                assert_eq!(result.downloads.len(), 4);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(c.harness.analyzer.calls(), 1);
        assert_eq!(c.harness.storage.uploads().len(), 1);
        assert_eq!(c.harness.db.saved_analyses().len(), 1);
    }

    #[tokio::test]
    async fn free_submission_goes_to_upgrade_prompt_and_ignores_the_image() {
        let mut c = connect(Plan::Free).await;
        drain(&mut c.rx);

        c.driver.on_message(submit()).await;
        assert_eq!(screens(&drain(&mut c.rx)), vec!["upgrade_prompt"]);

        c.driver.on_binary(b"\x89PNG".to_vec()).await;
        assert!(drain(&mut c.rx).is_empty());
        assert_eq!(c.harness.analyzer.calls(), 0);
        assert!(c.harness.storage.uploads().is_empty());
    }

    #[tokio::test]
    async fn payment_marker_is_cleared_and_profile_refreshed() {
        let mut c = connect(Plan::Free).await;
        c.driver.on_message(ClientMessage::RequestUpgrade).await;
        drain(&mut c.rx);

        let mut upgraded = c.harness.db.stored_profile(c.user_id).unwrap();
        upgraded.plan = Plan::Premium;
        c.harness.db.insert_profile(upgraded);

        c.driver
            .on_message(ClientMessage::Navigate {
                query: "?payment=success&tab=1".to_string(),
            })
            .await;
        let messages = drain(&mut c.rx);
        assert_eq!(
            messages.first(),
            Some(&ServerMessage::ClearPaymentMarker {
                query: "tab=1".to_string()
            })
        );
        match messages.last() {
            Some(ServerMessage::Screen { view }) => {
                assert_eq!(view.screen, "form");
                assert_eq!(view.plan, Some(Plan::Premium));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // The cleaned query carries no marker, so nothing happens the second time.
        c.driver
            .on_message(ClientMessage::Navigate {
                query: "tab=1".to_string(),
            })
            .await;
        assert!(drain(&mut c.rx).is_empty());
    }

    #[tokio::test]
    async fn checkout_creates_one_customer_across_attempts() {
        let mut c = connect(Plan::Free).await;
        c.driver.on_message(ClientMessage::RequestUpgrade).await;
        drain(&mut c.rx);

        c.driver.on_message(ClientMessage::StartCheckout).await;
        c.driver.on_message(ClientMessage::StartCheckout).await;

        let checkouts = drain(&mut c.rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::Checkout { .. }))
            .count();
        assert_eq!(checkouts, 2);
        assert_eq!(c.harness.billing.customers_created(), 1);
        assert_eq!(c.harness.billing.checkouts_created(), 2);
    }

    #[tokio::test]
    async fn logout_deletes_the_session_and_publishes_a_notice() {
        let mut c = connect(Plan::Premium).await;
        let mut notices = c.harness.state.notices.subscribe();
        drain(&mut c.rx);

        c.driver.on_message(ClientMessage::Logout).await;

        assert_eq!(screens(&drain(&mut c.rx)), vec!["unauthenticated"]);
        assert!(c.driver.is_closed());
        assert_eq!(
            notices.try_recv().ok(),
            Some(AuthNotice::SignedOut { user_id: c.user_id })
        );
    }

    #[tokio::test]
    async fn notices_for_other_users_are_ignored() {
        let mut c = connect(Plan::Premium).await;
        drain(&mut c.rx);

        c.driver
            .on_notice(&AuthNotice::SignedOut {
                user_id: Uuid::new_v4(),
            })
            .await;
        assert!(drain(&mut c.rx).is_empty());
        assert!(!c.driver.is_closed());

        c.driver
            .on_notice(&AuthNotice::SignedOut { user_id: c.user_id })
            .await;
        assert_eq!(screens(&drain(&mut c.rx)), vec!["unauthenticated"]);
        assert!(c.driver.is_closed());
    }

    #[tokio::test]
    async fn invalid_json_is_reported_without_changing_the_screen() {
        let mut c = connect(Plan::Premium).await;
        drain(&mut c.rx);

        c.driver.on_text("{\"type\":\"dance\"}").await;
        assert!(matches!(
            drain(&mut c.rx).as_slice(),
            [ServerMessage::Error { .. }]
        ));
        assert!(matches!(c.driver.machine().screen(), Screen::Form { .. }));
    }
}

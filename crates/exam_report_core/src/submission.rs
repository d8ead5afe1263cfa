//! crates/exam_report_core/src/submission.rs
//!
//! The exam submission flow: plan gate, form validation, AI call, image upload and
//! persistence, run strictly in that order. Every collaborator failure ends the
//! attempt; nothing is retried.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    AnalysisStatus, ExamAnalysis, ExamForm, ExamImage, NewAnalysisRecord, Patient, Profile,
};
use crate::ports::{DatabaseService, ExamAnalysisService, ImageStorageService};
use crate::text::split_sections;

/// Largest accepted exam image.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub const MIN_AGE: i64 = 1;
pub const MAX_AGE: i64 = 150;

/// Shown when the AI collaborator fails without a message of its own.
pub const GENERIC_ANALYSIS_ERROR: &str = "Erro desconhecido";
pub const UPLOAD_ERROR: &str = "Falha ao fazer upload da imagem do exame.";
pub const SAVE_ERROR: &str = "Falha ao salvar a análise no banco de dados.";

//=========================================================================================
// Validation
//=========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.age.is_none() && self.image.is_none()
    }
}

/// Checks the raw form and turns it into a patient and an image.
pub fn validate_form(form: ExamForm) -> Result<(Patient, ExamImage), FieldErrors> {
    let mut errors = FieldErrors::default();

    let name = form.name.trim().to_string();
    if name.is_empty() {
        errors.name = Some("Nome do paciente é obrigatório".to_string());
    }

    let age = match form.age {
        Some(age) if (MIN_AGE..=MAX_AGE).contains(&age) => Some(age as u16),
        _ => {
            errors.age = Some("Idade deve estar entre 1 e 150 anos".to_string());
            None
        }
    };

    match &form.image {
        None => errors.image = Some("Imagem do exame é obrigatória".to_string()),
        Some(image) if image.bytes.len() > MAX_IMAGE_BYTES => {
            errors.image = Some("Arquivo muito grande. Máximo 10MB.".to_string());
        }
        Some(image) if !image.mime_type.starts_with("image/") => {
            errors.image = Some("Por favor, selecione apenas arquivos de imagem.".to_string());
        }
        Some(_) => {}
    }

    match (age, form.image) {
        (Some(age), Some(image)) if errors.is_empty() => {
            let symptoms = form
                .symptoms
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            Ok((Patient { name, age, symptoms }, image))
        }
        _ => Err(errors),
    }
}

/// Object key for an uploaded image: `<userId>/<epoch-millis>_<file name>`.
pub fn storage_path(user_id: Uuid, at: DateTime<Utc>, file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("exam");
    format!("{}/{}_{}", user_id, at.timestamp_millis(), base)
}

/// A `data:` URL for showing the image right away, before the stored copy is used.
pub fn preview_url(image: &ExamImage) -> String {
    format!(
        "data:{};base64,{}",
        image.mime_type,
        base64::engine::general_purpose::STANDARD.encode(&image.bytes)
    )
}

//=========================================================================================
// Flow
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionState {
    Form { errors: FieldErrors },
    Analyzing,
    Result { analysis: ExamAnalysis },
    Error { message: String },
    UpgradeRequired,
}

impl Default for SubmissionState {
    fn default() -> Self {
        SubmissionState::Form {
            errors: FieldErrors::default(),
        }
    }
}

/// Drives one client's submissions. Holds the current state and the collaborators.
pub struct ExamSubmissionFlow {
    analyzer: Arc<dyn ExamAnalysisService>,
    storage: Arc<dyn ImageStorageService>,
    db: Arc<dyn DatabaseService>,
    state: SubmissionState,
}

impl ExamSubmissionFlow {
    pub fn new(
        analyzer: Arc<dyn ExamAnalysisService>,
        storage: Arc<dyn ImageStorageService>,
        db: Arc<dyn DatabaseService>,
    ) -> Self {
        Self {
            analyzer,
            storage,
            db,
            state: SubmissionState::default(),
        }
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    /// Applies the plan gate. A non-premium profile goes straight to
    /// `UpgradeRequired`; otherwise the flow enters `Analyzing`.
    pub fn begin(&mut self, profile: &Profile) -> &SubmissionState {
        if profile.is_premium() {
            self.state = SubmissionState::Analyzing;
        } else {
            info!(user_id = %profile.id, "Submission blocked: plan is not premium.");
            self.state = SubmissionState::UpgradeRequired;
        }
        &self.state
    }

    /// Runs validation and the collaborator calls. Only acts in `Analyzing`.
    pub async fn complete(&mut self, user_id: Uuid, form: ExamForm) -> &SubmissionState {
        if self.state != SubmissionState::Analyzing {
            warn!("complete() called outside of the analyzing state; ignoring.");
            return &self.state;
        }
        self.state = self.run(user_id, form).await;
        &self.state
    }

    /// `begin` followed by `complete` when the gate lets the submission through.
    pub async fn submit(
        &mut self,
        user_id: Uuid,
        profile: &Profile,
        form: ExamForm,
    ) -> &SubmissionState {
        if self.begin(profile) == &SubmissionState::Analyzing {
            self.complete(user_id, form).await
        } else {
            &self.state
        }
    }

    /// Discards any previous analysis and returns to an empty form.
    pub fn new_analysis(&mut self) {
        self.state = SubmissionState::default();
    }

    async fn run(&self, user_id: Uuid, form: ExamForm) -> SubmissionState {
        let (patient, image) = match validate_form(form) {
            Ok(valid) => valid,
            Err(errors) => {
                info!("Exam form rejected by validation.");
                return SubmissionState::Form { errors };
            }
        };

        let raw = match self.analyzer.analyze_exam(&image, &patient).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("AI analysis failed: {:?}", e);
                return SubmissionState::Error {
                    message: e.message().unwrap_or(GENERIC_ANALYSIS_ERROR).to_string(),
                };
            }
        };

        let outcome = split_sections(&raw);
        if !outcome.is_split() {
            warn!("AI response carried no recommendations marker; using fallback text.");
        }
        let (analysis_text, recommendations) = outcome.into_sections();

        let created_at = Utc::now();
        let path = storage_path(user_id, created_at, &image.file_name);
        let durable_url = match self.storage.upload(&path, &image.bytes, &image.mime_type).await {
            Ok(url) => url,
            Err(e) => {
                error!("Image upload to {} failed: {:?}", path, e);
                return SubmissionState::Error {
                    message: UPLOAD_ERROR.to_string(),
                };
            }
        };

        let analysis = ExamAnalysis {
            id: Uuid::new_v4(),
            patient,
            image_url: preview_url(&image),
            analysis: analysis_text,
            recommendations,
            created_at,
            status: AnalysisStatus::Completed,
        };

        let record = NewAnalysisRecord::from_analysis(user_id, &analysis, &durable_url);
        if let Err(e) = self.db.save_analysis(record).await {
            error!("Failed to persist analysis {}: {:?}", analysis.id, e);
            return SubmissionState::Error {
                message: SAVE_ERROR.to_string(),
            };
        }

        info!(analysis_id = %analysis.id, "Exam analysis completed.");
        SubmissionState::Result { analysis }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Plan;
    use chrono::TimeZone;
    use crate::test_support::{FakeAnalyzer, FakeDb, FakeStorage};

    fn png(size: usize) -> ExamImage {
        ExamImage {
            file_name: "torax.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![7u8; size],
        }
    }

    fn form(name: &str, age: i64, image: Option<ExamImage>) -> ExamForm {
        ExamForm {
            name: name.to_string(),
            age: Some(age),
            symptoms: Some("dor torácica".to_string()),
            image,
        }
    }

    struct Harness {
        analyzer: Arc<FakeAnalyzer>,
        storage: Arc<FakeStorage>,
        db: Arc<FakeDb>,
        flow: ExamSubmissionFlow,
    }

    fn harness(analyzer: FakeAnalyzer) -> Harness {
        let analyzer = Arc::new(analyzer);
        let storage = Arc::new(FakeStorage::default());
        let db = Arc::new(FakeDb::default());
        let flow = ExamSubmissionFlow::new(analyzer.clone(), storage.clone(), db.clone());
        Harness {
            analyzer,
            storage,
            db,
            flow,
        }
    }

    fn no_collaborator_calls(h: &Harness) {
        assert_eq!(h.analyzer.calls(), 0);
        assert_eq!(h.storage.uploads().len(), 0);
        assert_eq!(h.db.saved_analyses().len(), 0);
    }

    #[tokio::test]
    async fn free_plan_never_reaches_the_ai_call() {
        let mut h = harness(FakeAnalyzer::replying("irrelevante"));
        let profile = FakeDb::profile(Plan::Free);

        let state = h
            .flow
            .submit(profile.id, &profile, form("Maria Silva", 45, Some(png(10))))
            .await
            .clone();

        assert_eq!(state, SubmissionState::UpgradeRequired);
        no_collaborator_calls(&h);
    }

    #[tokio::test]
    async fn out_of_range_age_and_empty_name_block_submission() {
        let profile = FakeDb::profile(Plan::Premium);
        let cases = [
            (form("Maria Silva", 0, Some(png(10))), "age"),
            (form("Maria Silva", 151, Some(png(10))), "age"),
            (form("   ", 45, Some(png(10))), "name"),
        ];

        for (input, field) in cases {
            let mut h = harness(FakeAnalyzer::replying("irrelevante"));
            let state = h.flow.submit(profile.id, &profile, input).await.clone();
            let SubmissionState::Form { errors } = state else {
                panic!("expected the form state, got {state:?}");
            };
            match field {
                "age" => {
                    assert!(errors.age.is_some());
                    assert!(errors.name.is_none());
                }
                _ => {
                    assert!(errors.name.is_some());
                    assert!(errors.age.is_none());
                }
            }
            assert!(errors.image.is_none());
            no_collaborator_calls(&h);
        }
    }

    #[tokio::test]
    async fn oversized_image_is_rejected_before_any_call() {
        let mut h = harness(FakeAnalyzer::replying("irrelevante"));
        let profile = FakeDb::profile(Plan::Premium);

        let state = h
            .flow
            .submit(profile.id, &profile, form("Maria Silva", 45, Some(png(11 * 1024 * 1024))))
            .await
            .clone();

        let SubmissionState::Form { errors } = state else {
            panic!("expected the form state");
        };
        assert_eq!(errors.image.as_deref(), Some("Arquivo muito grande. Máximo 10MB."));
        no_collaborator_calls(&h);
    }

    #[tokio::test]
    async fn missing_or_non_image_file_is_rejected() {
        let profile = FakeDb::profile(Plan::Premium);

        let mut h = harness(FakeAnalyzer::replying("irrelevante"));
        let state = h.flow.submit(profile.id, &profile, form("Maria", 45, None)).await.clone();
        assert!(matches!(state, SubmissionState::Form { errors } if errors.image.is_some()));

        let mut pdf = png(10);
        pdf.mime_type = "application/pdf".to_string();
        let mut h = harness(FakeAnalyzer::replying("irrelevante"));
        let state = h.flow.submit(profile.id, &profile, form("Maria", 45, Some(pdf))).await.clone();
        assert!(matches!(state, SubmissionState::Form { errors } if errors.image.is_some()));
        no_collaborator_calls(&h);
    }

    #[tokio::test]
    async fn successful_submission_produces_a_completed_analysis() {
        let mut h = harness(FakeAnalyzer::replying(
            "1. ANÁLISE TÉCNICA: achado X\n2. RECOMENDAÇÕES: acompanhar Y",
        ));
        let profile = FakeDb::profile(Plan::Premium);

        let state = h
            .flow
            .submit(profile.id, &profile, form("Maria Silva", 45, Some(png(64))))
            .await
            .clone();

        let SubmissionState::Result { analysis } = state else {
            panic!("expected a result");
        };
        assert_eq!(analysis.analysis, "achado X");
        assert_eq!(analysis.recommendations, "acompanhar Y");
        assert_eq!(analysis.status, AnalysisStatus::Completed);
        assert_eq!(analysis.patient.name, "Maria Silva");
        assert_eq!(analysis.patient.age, 45);
        assert_eq!(analysis.patient.symptoms.as_deref(), Some("dor torácica"));
        assert!(analysis.image_url.starts_with("data:image/png;base64,"));

        assert_eq!(h.analyzer.calls(), 1);
        let uploads = h.storage.uploads();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].starts_with(&format!("{}/", profile.id)));
        assert!(uploads[0].ends_with("_torax.png"));

        let saved = h.db.saved_analyses();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, analysis.id);
        assert_eq!(saved[0].patient_name, "Maria Silva");
        assert_eq!(saved[0].image_url, format!("https://storage.test/{}", uploads[0]));
        assert_eq!(saved[0].recommendations_text, "acompanhar Y");
    }

    #[tokio::test]
    async fn ai_failure_surfaces_its_message_or_a_generic_one() {
        let profile = FakeDb::profile(Plan::Premium);

        let message = "Erro ao processar análise do exame. Tente novamente.";
        let mut h = harness(FakeAnalyzer::failing(message));
        let state = h
            .flow
            .submit(profile.id, &profile, form("Maria", 45, Some(png(10))))
            .await
            .clone();
        assert_eq!(
            state,
            SubmissionState::Error {
                message: "Erro ao processar análise do exame. Tente novamente.".to_string()
            }
        );
        assert_eq!(h.storage.uploads().len(), 0);

        let mut h = harness(FakeAnalyzer::failing(""));
        let state = h
            .flow
            .submit(profile.id, &profile, form("Maria", 45, Some(png(10))))
            .await
            .clone();
        assert_eq!(
            state,
            SubmissionState::Error {
                message: GENERIC_ANALYSIS_ERROR.to_string()
            }
        );
    }

    #[tokio::test]
    async fn upload_and_save_failures_end_in_error() {
        let profile = FakeDb::profile(Plan::Premium);

        let mut h = harness(FakeAnalyzer::replying("texto"));
        h.storage.fail_next();
        let state = h
            .flow
            .submit(profile.id, &profile, form("Maria", 45, Some(png(10))))
            .await
            .clone();
        assert_eq!(state, SubmissionState::Error { message: UPLOAD_ERROR.to_string() });
        assert_eq!(h.db.saved_analyses().len(), 0);

        let mut h = harness(FakeAnalyzer::replying("texto"));
        h.db.fail_saves();
        let state = h
            .flow
            .submit(profile.id, &profile, form("Maria", 45, Some(png(10))))
            .await
            .clone();
        assert_eq!(state, SubmissionState::Error { message: SAVE_ERROR.to_string() });
    }

    #[tokio::test]
    async fn new_analysis_resets_to_an_empty_form() {
        let mut h = harness(FakeAnalyzer::replying("texto"));
        let profile = FakeDb::profile(Plan::Premium);
        h.flow.submit(profile.id, &profile, form("Maria", 45, Some(png(10)))).await;
        assert!(matches!(h.flow.state(), SubmissionState::Result { .. }));

        h.flow.new_analysis();
        assert_eq!(h.flow.state(), &SubmissionState::default());
    }

    #[tokio::test]
    async fn complete_is_ignored_unless_analyzing() {
        let mut h = harness(FakeAnalyzer::replying("texto"));
        let state = h
            .flow
            .complete(Uuid::new_v4(), form("Maria", 45, Some(png(10))))
            .await
            .clone();
        assert_eq!(state, SubmissionState::default());
        assert_eq!(h.analyzer.calls(), 0);
    }

    #[test]
    fn storage_path_uses_only_the_file_name() {
        let user = Uuid::nil();
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            storage_path(user, at, "../../etc/raio-x.jpg"),
            format!("{user}/1700000000123_raio-x.jpg")
        );
    }
}

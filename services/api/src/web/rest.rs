//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::adapters::pdf::export_report;
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::{DateTime, Utc};
use exam_report_core::domain::{ExamAnalysis, ExamForm, ExamImage, Profile};
use exam_report_core::ports::PortError;
use exam_report_core::report::ReportVariant;
use exam_report_core::session::{load_profile_with_retry, PROFILE_LOAD_ERROR};
use exam_report_core::submission::{ExamSubmissionFlow, FieldErrors, SubmissionState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        get_profile_handler,
        submit_exam_handler,
        list_exams_handler,
        download_report_handler,
        crate::web::billing::checkout_handler,
        crate::web::billing::webhook_handler,
    ),
    components(
        schemas(
            crate::web::auth::SignupRequest,
            crate::web::auth::LoginRequest,
            crate::web::auth::AuthResponse,
            ProfileResponse,
            ExamSummary,
            FieldErrorsResponse,
            SubmissionResponse,
            crate::web::billing::CheckoutResponse,
            crate::web::billing::WebhookAck,
        )
    ),
    tags(
        (name = "Exam Report API", description = "AI-assisted exam analysis and report downloads.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The caller's profile, as stored.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub email: Option<String>,
    /// `free` or `premium`.
    pub plan: String,
    pub plan_active: bool,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            full_name: profile.full_name,
            email: profile.email,
            plan: profile.plan.as_str().to_string(),
            plan_active: profile.plan_active,
        }
    }
}

/// A stored analysis.
#[derive(Debug, Serialize, ToSchema)]
pub struct ExamSummary {
    pub id: Uuid,
    pub patient_name: String,
    pub patient_age: u16,
    pub symptoms: Option<String>,
    pub image_url: String,
    pub analysis: String,
    pub recommendations: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ExamAnalysis> for ExamSummary {
    fn from(analysis: &ExamAnalysis) -> Self {
        Self {
            id: analysis.id,
            patient_name: analysis.patient.name.clone(),
            patient_age: analysis.patient.age,
            symptoms: analysis.patient.symptoms.clone(),
            image_url: analysis.image_url.clone(),
            analysis: analysis.analysis.clone(),
            recommendations: analysis.recommendations.clone(),
            created_at: analysis.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldErrorsResponse {
    pub name: Option<String>,
    pub age: Option<String>,
    pub image: Option<String>,
}

impl From<&FieldErrors> for FieldErrorsResponse {
    fn from(errors: &FieldErrors) -> Self {
        Self {
            name: errors.name.clone(),
            age: errors.age.clone(),
            image: errors.image.clone(),
        }
    }
}

/// Outcome of one exam submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionResponse {
    /// `result`, `form`, `error` or `upgrade_required`.
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ExamSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrorsResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmissionResponse {
    fn from_state(state: &SubmissionState) -> (StatusCode, Self) {
        let mut response = Self {
            state: String::new(),
            analysis: None,
            field_errors: None,
            message: None,
        };
        let status = match state {
            SubmissionState::Result { analysis } => {
                response.state = "result".to_string();
                response.analysis = Some(analysis.into());
                StatusCode::OK
            }
            SubmissionState::Form { errors } => {
                response.state = "form".to_string();
                response.field_errors = Some(errors.into());
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SubmissionState::UpgradeRequired => {
                response.state = "upgrade_required".to_string();
                StatusCode::PAYMENT_REQUIRED
            }
            SubmissionState::Error { message } => {
                response.state = "error".to_string();
                response.message = Some(message.clone());
                StatusCode::BAD_GATEWAY
            }
            // `submit` never stops in the analyzing state.
            SubmissionState::Analyzing => {
                response.state = "analyzing".to_string();
                StatusCode::ACCEPTED
            }
        };
        (status, response)
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

pub(crate) fn port_error_status(e: &PortError) -> StatusCode {
    match e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn multipart_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    (
        StatusCode::BAD_REQUEST,
        format!("Failed to read multipart data: {}", e),
    )
}

/// Reads the exam form. Unknown parts are skipped; an unparsable age is left empty
/// so validation reports it.
async fn read_exam_form(mut multipart: Multipart) -> Result<ExamForm, (StatusCode, String)> {
    let mut form = ExamForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or_default() {
            "name" => form.name = field.text().await.map_err(multipart_error)?,
            "age" => {
                let text = field.text().await.map_err(multipart_error)?;
                form.age = text.trim().parse::<i64>().ok();
            }
            "symptoms" => form.symptoms = Some(field.text().await.map_err(multipart_error)?),
            "image" => {
                let file_name = field.file_name().unwrap_or("exam").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                form.image = Some(ExamImage {
                    file_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

/// `attachment` disposition with an ASCII fallback and the UTF-8 name.
fn content_disposition(file_name: &str) -> Option<HeaderValue> {
    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    let encoded: String = file_name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect();
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    ))
    .ok()
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Get the caller's profile.
///
/// A missing profile is retried once after a short delay before giving up.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "The caller's profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Profile not available")
    )
)]
pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    load_profile_with_retry(state.db.as_ref(), user_id, state.config.profile_retry_delay)
        .await
        .map(|profile| Json(ProfileResponse::from(profile)))
        .map_err(|e| {
            error!("Failed to load profile for {}: {:?}", user_id, e);
            match e {
                PortError::NotFound(_) => (StatusCode::NOT_FOUND, PROFILE_LOAD_ERROR.to_string()),
                other => (port_error_status(&other), PROFILE_LOAD_ERROR.to_string()),
            }
        })
}

/// Submit an exam for analysis.
///
/// Accepts multipart/form-data with `name`, `age`, optional `symptoms` and an
/// `image` file part. Only premium profiles are analyzed.
#[utoipa::path(
    post,
    path = "/exams",
    request_body(
        content_type = "multipart/form-data",
        description = "Patient data and the exam image."
    ),
    responses(
        (status = 200, description = "Analysis completed", body = SubmissionResponse),
        (status = 402, description = "Premium plan required", body = SubmissionResponse),
        (status = 422, description = "Form validation failed", body = SubmissionResponse),
        (status = 502, description = "Analysis, upload or save failed", body = SubmissionResponse)
    )
)]
pub async fn submit_exam_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let form = read_exam_form(multipart).await?;

    let profile = state.db.get_profile(user_id).await.map_err(|e| {
        error!("Failed to load profile for submission: {:?}", e);
        (port_error_status(&e), PROFILE_LOAD_ERROR.to_string())
    })?;

    let mut flow = ExamSubmissionFlow::new(
        state.analyzer.clone(),
        state.storage.clone(),
        state.db.clone(),
    );
    let (status, response) =
        SubmissionResponse::from_state(flow.submit(user_id, &profile, form).await);
    info!(user_id = %user_id, state = %response.state, "Exam submission finished.");

    Ok((status, Json(response)))
}

/// List the caller's analyses, newest first.
#[utoipa::path(
    get,
    path = "/exams",
    responses(
        (status = 200, description = "Stored analyses", body = [ExamSummary]),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_exams_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let analyses = state.db.list_analyses(user_id).await.map_err(|e| {
        error!("Failed to list analyses: {:?}", e);
        (port_error_status(&e), "Failed to list analyses".to_string())
    })?;

    let summaries: Vec<ExamSummary> = analyses.iter().map(ExamSummary::from).collect();
    Ok(Json(summaries))
}

/// Download one report variant of a stored analysis.
///
/// `variant` is one of `combined`, `analysis`, `recommendations` or `text`.
#[utoipa::path(
    get,
    path = "/exams/{id}/report/{variant}",
    params(
        ("id" = Uuid, Path, description = "The analysis id."),
        ("variant" = String, Path, description = "combined | analysis | recommendations | text")
    ),
    responses(
        (status = 200, description = "The report file"),
        (status = 400, description = "Unknown report variant"),
        (status = 404, description = "Analysis not found"),
        (status = 500, description = "Report could not be rendered")
    )
)]
pub async fn download_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((analysis_id, variant)): Path<(Uuid, String)>,
) -> Result<Response, (StatusCode, String)> {
    let variant = ReportVariant::from_slug(&variant).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("Unknown report variant '{}'", variant),
        )
    })?;

    let analysis = state
        .db
        .get_analysis(user_id, analysis_id)
        .await
        .map_err(|e| {
            error!("Failed to load analysis {}: {:?}", analysis_id, e);
            (port_error_status(&e), "Analysis not found".to_string())
        })?;

    let report = export_report(&analysis, variant, &state.layout).map_err(|e| {
        error!("Failed to render report: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to render report".to_string(),
        )
    })?;

    let disposition = content_disposition(&report.file_name).ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid report file name".to_string(),
        )
    })?;

    let mut response = report.bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(report.content_type),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

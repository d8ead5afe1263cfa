//! services/api/src/web/billing.rs
//!
//! Checkout and billing-provider webhook endpoints.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use bytes::Bytes;
use chrono::Utc;
use exam_report_core::billing::{
    start_checkout, WebhookError, WebhookOutcome, WebhookProcessor,
};
use exam_report_core::ports::PortError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::rest::port_error_status;
use crate::web::state::{AppState, AuthNotice};

/// Header carrying `t=<unix seconds>,v1=<hex hmac>`.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub session_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

/// Message shown when a checkout cannot be opened.
pub fn checkout_failure_message(e: &PortError) -> String {
    format!(
        "Falha ao redirecionar para o pagamento: {}",
        e.message().unwrap_or("erro desconhecido")
    )
}

/// Start a subscription checkout for the caller.
///
/// Creates the billing customer on first use.
#[utoipa::path(
    post,
    path = "/billing/checkout",
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Profile not found"),
        (status = 500, description = "Profile could not be loaded"),
        (status = 502, description = "Billing provider unavailable")
    )
)]
pub async fn checkout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = state.db.get_profile(user_id).await.map_err(|e| {
        error!("Failed to load profile for checkout: {:?}", e);
        (port_error_status(&e), checkout_failure_message(&e))
    })?;

    let session_id = start_checkout(state.db.as_ref(), state.billing.as_ref(), &profile, None)
        .await
        .map_err(|e| {
            error!("Failed to start checkout: {:?}", e);
            (StatusCode::BAD_GATEWAY, checkout_failure_message(&e))
        })?;

    info!(user_id = %user_id, "Checkout session created.");
    Ok(Json(CheckoutResponse { session_id }))
}

/// Receive billing-provider events.
///
/// The raw body is verified against the signature header before anything is parsed.
#[utoipa::path(
    post,
    path = "/billing/webhook",
    request_body(content_type = "application/json", description = "Signed provider event."),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Invalid signature or payload"),
        (status = 500, description = "Event could not be applied")
    )
)]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let processor = WebhookProcessor::new(
        state.db.clone(),
        state.billing.clone(),
        state.config.stripe_webhook_secret.clone(),
    );

    match processor.handle(&body, signature, Utc::now().timestamp()).await {
        Ok(WebhookOutcome::PlanUpdated { user_id, .. }) => {
            state.publish(AuthNotice::ProfileChanged { user_id });
        }
        Ok(WebhookOutcome::Ignored { .. }) => {}
        Err(e) => {
            let status = match &e {
                WebhookError::Signature(_) | WebhookError::Payload(_) => StatusCode::BAD_REQUEST,
                WebhookError::Port(PortError::NotFound(_)) => StatusCode::BAD_REQUEST,
                WebhookError::Port(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!("Webhook failed with {}: {}", status, e);
            return Err((status, format!("Webhook Error: {}", e)));
        }
    }

    Ok(Json(WebhookAck { received: true }))
}

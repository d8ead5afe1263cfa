//! services/api/src/web/router.rs
//!
//! Builds the HTTP router: public auth and webhook routes, and the routes behind
//! `require_auth`.

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use exam_report_core::submission::MAX_IMAGE_BYTES;
use std::sync::Arc;

use crate::web::{
    auth::{login_handler, logout_handler, signup_handler},
    billing::{checkout_handler, webhook_handler},
    middleware::require_auth,
    rest::{download_report_handler, get_profile_handler, list_exams_handler, submit_exam_handler},
    state::AppState,
    ws_handler::ws_handler,
};

/// Room for the multipart envelope and text fields around the largest image.
const BODY_LIMIT: usize = MAX_IMAGE_BYTES + 2 * 1024 * 1024;

pub fn app_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/billing/webhook", post(webhook_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/profile", get(get_profile_handler))
        .route("/exams", get(list_exams_handler).post(submit_exam_handler))
        .route("/exams/{id}/report/{variant}", get(download_report_handler))
        .route("/billing/checkout", post(checkout_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(app_state)
}

//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use exam_report_core::session::load_profile_with_retry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use utoipa::ToSchema;

use crate::web::middleware::session_id_from_headers;
use crate::web::rest::ProfileResponse;
use crate::web::state::{AppState, AuthNotice};

const SESSION_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 6;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    /// Absent when the profile could not be loaded even after the retry.
    pub profile: Option<ProfileResponse>,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn session_cookie(auth_session_id: &str) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id,
        Duration::days(SESSION_DAYS).num_seconds()
    )
}

/// Creates a login session and returns its cookie.
async fn open_session(state: &AppState, user_id: Uuid) -> Result<String, (StatusCode, String)> {
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(SESSION_DAYS);

    state
        .db
        .create_auth_session(&auth_session_id, user_id, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Falha ao criar a sessão".to_string())
        })?;

    Ok(session_cookie(&auth_session_id))
}

/// Loads the profile with the single delayed retry. A missing profile is logged and
/// reported as `None`; the login itself still succeeds.
async fn profile_for(state: &AppState, user_id: Uuid) -> Option<ProfileResponse> {
    let delay = state.config.profile_retry_delay;
    match load_profile_with_retry(state.db.as_ref(), user_id, delay).await {
        Ok(profile) => Some(profile.into()),
        Err(e) => {
            warn!("Profile for {} unavailable after retry: {:?}", user_id, e);
            None
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account on the free plan
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid request"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err((StatusCode::BAD_REQUEST, "E-mail inválido".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("A senha deve ter pelo menos {} caracteres", MIN_PASSWORD_LEN),
        ));
    }

    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Falha ao criar a conta".to_string())
        })?
        .to_string();

    // 2. Create user and its free profile
    let full_name = req
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    let identity = state
        .db
        .create_user_with_email(&email, &password_hash, full_name)
        .await
        .map_err(|e| {
            error!("Failed to create user: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Falha ao criar a conta".to_string())
        })?;

    // 3. Open a session
    let cookie = open_session(&state, identity.user_id).await?;
    info!(user_id = %identity.user_id, "User signed up.");

    let response = AuthResponse {
        user_id: identity.user_id,
        email: identity.email.unwrap_or(email),
        profile: profile_for(&state, identity.user_id).await,
    };

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(response),
    ))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let invalid = || (StatusCode::UNAUTHORIZED, "E-mail ou senha inválidos".to_string());

    // 1. Get user by email
    let user_creds = state
        .db
        .get_user_by_email(req.email.trim().to_lowercase().as_str())
        .await
        .map_err(|e| {
            error!("Failed to get user: {:?}", e);
            invalid()
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Erro de autenticação".to_string())
    })?;

    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();

    if !valid {
        return Err(invalid());
    }

    // 3. Open a session
    let cookie = open_session(&state, user_creds.user_id).await?;
    info!(user_id = %user_creds.user_id, "User logged in.");

    let response = AuthResponse {
        user_id: user_creds.user_id,
        email: user_creds.email,
        profile: profile_for(&state, user_creds.user_id).await,
    };

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(response),
    ))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let auth_session_id = session_id_from_headers(&headers)
        .ok_or((StatusCode::UNAUTHORIZED, "Nenhuma sessão encontrada".to_string()))?;

    // Resolve the owner first so open connections can be signed out.
    let user_id = state.db.validate_auth_session(&auth_session_id).await.ok();

    state
        .db
        .delete_auth_session(&auth_session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Falha ao sair".to_string())
        })?;

    if let Some(user_id) = user_id {
        info!(user_id = %user_id, "User logged out.");
        state.publish(AuthNotice::SignedOut { user_id });
    }

    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]))
}

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    Json,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::ApiError;
use super::extract::ApiJson;
use crate::db::{NewUser, Session, TokenRequest, TokenResponse, User, ValidationErrors};
use crate::AppState;

const INVALID_CREDENTIALS: &str = "Unable to authenticate with provided credentials";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Pull the token out of an `Authorization: Bearer <token>` (or `Token <token>`) header
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("bearer") && !scheme.eq_ignore_ascii_case("token") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Check credentials, returning the active user they belong to
pub async fn authenticate(
    db: &sqlx::SqlitePool,
    email: &str,
    password: &str,
) -> Result<Option<User>, sqlx::Error> {
    let Some(user) = User::find_by_email(db, email).await? else {
        return Ok(None);
    };

    if !user.is_active || !verify_password(password, &user.password_hash) {
        return Ok(None);
    }

    Ok(Some(user))
}

/// Create a session for the user and return the plaintext token
pub async fn issue_token(
    db: &sqlx::SqlitePool,
    user: &User,
    ttl_days: i64,
) -> Result<TokenResponse, sqlx::Error> {
    let purged = Session::delete_expired_for_user(db, user.id).await?;
    if purged > 0 {
        tracing::debug!(user_id = user.id, purged, "Purged expired sessions");
    }

    let token = generate_token();
    let expires_at = (chrono::Utc::now() + chrono::Duration::days(ttl_days))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    Session::create(db, user.id, &hash_token(&token), &expires_at).await?;

    Ok(TokenResponse { token, expires_at })
}

/// Resolve a token to the active user owning it
pub async fn get_current_user(db: &sqlx::SqlitePool, token: &str) -> Result<User, ApiError> {
    let session = Session::find_active(db, &hash_token(token))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    match User::find_by_id(db, session.user_id).await? {
        Some(user) if user.is_active => Ok(user),
        _ => Err(ApiError::unauthorized("Invalid or expired token")),
    }
}

/// Exchange email and password for a bearer token
///
/// POST /api/user/token/
pub async fn obtain_token(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let mut errors = ValidationErrors::new();
    if request.email.trim().is_empty() {
        errors.add("email", "This field may not be blank.");
    }
    if request.password.is_empty() {
        errors.add("password", "This field may not be blank.");
    }
    errors.finish()?;

    let user = authenticate(&state.db, &request.email, &request.password)
        .await?
        .ok_or_else(|| ApiError::unauthorized(INVALID_CREDENTIALS))?;

    let token = issue_token(&state.db, &user, state.config.auth.token_ttl_days).await?;
    tracing::info!(user_id = user.id, "Issued token");

    Ok(Json(token))
}

/// Make sure the configured superuser exists and carries both flags
pub async fn ensure_superuser(
    db: &sqlx::SqlitePool,
    email: &str,
    password: &str,
) -> anyhow::Result<()> {
    if let Some(existing) = User::find_by_email(db, email).await? {
        if !existing.is_staff || !existing.is_superuser {
            User::promote_to_superuser(db, existing.id).await?;
            tracing::info!(email = %existing.email, "Promoted existing user to superuser");
        }
        return Ok(());
    }

    let password_hash = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    let user = User::create(
        db,
        &NewUser {
            email: email.to_string(),
            password_hash,
            name: String::new(),
            is_staff: true,
            is_superuser: true,
        },
    )
    .await?;

    tracing::info!(email = %user.email, "Created superuser");
    Ok(())
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication credentials were not provided"))?;
        get_current_user(&state.db, token).await
    }
}

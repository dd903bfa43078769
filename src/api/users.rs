use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use super::auth::hash_password;
use super::error::ApiError;
use super::extract::ApiJson;
use crate::db::{CreateUserRequest, NewUser, User, UserResponse, ValidationErrors};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 5;

/// Register a new account
///
/// POST /api/user/create/
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let mut errors = ValidationErrors::new();
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!("Ensure this field has at least {} characters.", MIN_PASSWORD_LEN),
        );
    }
    errors.finish()?;

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let user = User::create(
        &state.db,
        &NewUser {
            email: request.email,
            password_hash,
            name: request.name.trim().to_string(),
            is_staff: false,
            is_superuser: false,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// List every account; staff only
///
/// GET /api/user/
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    if !user.is_staff {
        return Err(ApiError::forbidden(
            "You do not have permission to perform this action.",
        ));
    }

    let users = User::list_all(&state.db).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

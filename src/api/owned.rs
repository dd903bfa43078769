//! Handlers shared by every owner-scoped collection.
//!
//! Each handler takes the authenticated [`User`] and passes its id to the
//! repository, which filters on it. A row belonging to another user comes
//! back as `None` and is reported exactly like a missing one.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use super::error::ApiError;
use super::extract::{ApiJson, ApiPath, ApiQuery};
use crate::db::{OwnedRepository, User};
use crate::AppState;

pub(super) fn not_found<R: OwnedRepository>() -> ApiError {
    ApiError::not_found(format!("No {} matches the given query.", R::RESOURCE))
}

/// GET /api/recipe/{collection}/
pub async fn list<R: OwnedRepository>(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiQuery(filter): ApiQuery<R::Filter>,
) -> Result<Json<Vec<R::Summary>>, ApiError> {
    let items = R::list_for_owner(&state.db, user.id, &filter).await?;
    Ok(Json(items))
}

/// GET /api/recipe/{collection}/:id/
pub async fn retrieve<R: OwnedRepository>(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<R::Detail>, ApiError> {
    R::get_for_owner(&state.db, user.id, id)
        .await?
        .map(Json)
        .ok_or_else(not_found::<R>)
}

/// POST /api/recipe/{collection}/
pub async fn create<R: OwnedRepository>(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiJson(input): ApiJson<R::Create>,
) -> Result<(StatusCode, Json<R::Summary>), ApiError> {
    let created = R::create(&state.db, user.id, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /api/recipe/{collection}/:id/
pub async fn update<R: OwnedRepository>(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<R::Create>,
) -> Result<Json<R::Summary>, ApiError> {
    // Unknown ids win over a bad body
    if R::get_for_owner(&state.db, user.id, id).await?.is_none() {
        return Err(not_found::<R>());
    }
    R::validate_create(&input)?;

    R::update(&state.db, user.id, id, R::Patch::from(input))
        .await?
        .map(Json)
        .ok_or_else(not_found::<R>)
}

/// PATCH /api/recipe/{collection}/:id/
pub async fn partial_update<R: OwnedRepository>(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<R::Patch>,
) -> Result<Json<R::Summary>, ApiError> {
    R::update(&state.db, user.id, id, patch)
        .await?
        .map(Json)
        .ok_or_else(not_found::<R>)
}

/// DELETE /api/recipe/{collection}/:id/
pub async fn destroy<R: OwnedRepository>(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    if !R::delete(&state.db, user.id, id).await? {
        return Err(not_found::<R>());
    }
    Ok(StatusCode::NO_CONTENT)
}

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::error::ApiError;
use super::extract::ApiPath;
use super::owned::not_found;
use crate::db::{OwnedRepository, RecipeImage, Recipes, User};
use crate::AppState;

const IMAGE_FIELD: &str = "image";

/// Delete a recipe along with its stored image
///
/// DELETE /api/recipe/recipes/:id/
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let existing = Recipes::find_image(&state.db, user.id, id)
        .await?
        .ok_or_else(not_found::<Recipes>)?;

    if !Recipes::delete(&state.db, user.id, id).await? {
        return Err(not_found::<Recipes>());
    }

    if let Some(image) = existing.image {
        state.media.remove(&image).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Attach an uploaded image to a recipe, replacing any previous one
///
/// POST /api/recipe/recipes/:id/upload-image/
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiPath(id): ApiPath<i64>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecipeImage>, ApiError> {
    let previous = Recipes::find_image(&state.db, user.id, id)
        .await?
        .ok_or_else(not_found::<Recipes>)?;

    let mut multipart = multipart?;
    let mut data = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            data = Some(field.bytes().await?);
            break;
        }
    }

    let data = data.ok_or_else(|| {
        ApiError::validation_field(IMAGE_FIELD, "No file was submitted.")
    })?;
    if data.is_empty() {
        return Err(ApiError::validation_field(
            IMAGE_FIELD,
            "The submitted file is empty.",
        ));
    }

    let stored = state.media.save_recipe_image(data).await?;

    let updated = match Recipes::set_image(&state.db, user.id, id, &stored.url).await {
        Ok(Some(updated)) => updated,
        // The recipe went away while the upload was in flight
        Ok(None) => {
            state.media.remove(&stored.url).await;
            return Err(not_found::<Recipes>());
        }
        Err(e) => {
            state.media.remove(&stored.url).await;
            return Err(e.into());
        }
    };

    if let Some(old) = previous.image {
        state.media.remove(&old).await;
    }

    tracing::info!(recipe_id = id, owner_id = user.id, image = %stored.url, "Recipe image uploaded");
    Ok(Json(updated))
}

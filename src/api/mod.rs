pub mod auth;
pub mod error;
mod extract;
mod owned;
mod recipes;
mod users;

pub use error::{ApiError, ErrorCode, ErrorResponse};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::db::{Ingredients, Recipes, Tags};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Accounts (create and token are public)
    let user_routes = Router::new()
        .route("/api/user/", get(users::list_users))
        .route("/api/user/create/", post(users::create_user))
        .route("/api/user/token/", post(auth::obtain_token));

    // Owner-scoped collections; every handler requires a token
    let recipe_routes = Router::new()
        // Tags
        .route("/tags/", get(owned::list::<Tags>).post(owned::create::<Tags>))
        .route(
            "/tags/:id/",
            get(owned::retrieve::<Tags>)
                .put(owned::update::<Tags>)
                .patch(owned::partial_update::<Tags>)
                .delete(owned::destroy::<Tags>),
        )
        // Ingredients
        .route(
            "/ingredients/",
            get(owned::list::<Ingredients>).post(owned::create::<Ingredients>),
        )
        .route(
            "/ingredients/:id/",
            get(owned::retrieve::<Ingredients>)
                .put(owned::update::<Ingredients>)
                .patch(owned::partial_update::<Ingredients>)
                .delete(owned::destroy::<Ingredients>),
        )
        // Recipes
        .route(
            "/recipes/",
            get(owned::list::<Recipes>).post(owned::create::<Recipes>),
        )
        .route(
            "/recipes/:id/",
            get(owned::retrieve::<Recipes>)
                .put(owned::update::<Recipes>)
                .patch(owned::partial_update::<Recipes>)
                .delete(recipes::destroy),
        )
        .route(
            "/recipes/:id/upload-image/",
            post(recipes::upload_image)
                .layer(DefaultBodyLimit::max(state.config.media.max_upload_bytes)),
        );

    let media = ServeDir::new(state.media.root());

    Router::new()
        .route("/health", get(health_check))
        .merge(user_routes)
        .nest("/api/recipe", recipe_routes)
        .nest_service(state.media.url_prefix(), media)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

//! API layer - HTTP handlers and routing
//!
//! All endpoints live under `/api/v1`:
//! - User endpoints (account creation, tokens, current user)
//! - Tag and Topic endpoints
//! - Post endpoints, including image upload
//!
//! Uploaded media is served read-only under `/media`.

pub mod middleware;
pub mod posts;
pub mod taxonomy;
pub mod users;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::config::Config;
use crate::db::repositories::{
    SqlxPostRepository, SqlxSessionRepository, SqlxTaxonomyRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::{Tag, Topic};
use crate::services::{MediaStore, PostService, TagService, TopicService, UserService};

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Wire repositories and services over one pool
pub fn build_state(pool: DynDatabasePool, config: &Config) -> AppState {
    let user_service = Arc::new(UserService::with_session_expiration(
        SqlxUserRepository::boxed(pool.clone()),
        SqlxSessionRepository::boxed(pool.clone()),
        config.auth.session_days,
    ));
    let tag_service = Arc::new(TagService::new(SqlxTaxonomyRepository::boxed(pool.clone())));
    let topic_service = Arc::new(TopicService::new(SqlxTaxonomyRepository::boxed(pool.clone())));
    let post_service = Arc::new(PostService::new(
        SqlxPostRepository::boxed(pool),
        tag_service.clone(),
        topic_service.clone(),
        MediaStore::from_config(&config.upload),
    ));

    AppState {
        user_service,
        tag_service,
        topic_service,
        post_service,
        upload_config: Arc::new(config.upload.clone()),
        session_days: config.auth.session_days,
    }
}

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Protected routes (need a valid session)
    let protected_routes = Router::new()
        .merge(users::protected_router())
        .merge(taxonomy::router::<Tag>())
        .merge(taxonomy::router::<Topic>())
        .merge(posts::router(state.upload_config.max_file_size))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .merge(users::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    // Cookie auth needs credentials, so the origin must be explicit
    let cors = CorsLayer::new()
        .allow_origin(cors_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    let media = ServeDir::new(&state.upload_config.media_root);

    Ok(Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .nest_service("/media", media)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

//! Tag and Topic API endpoints
//!
//! One set of handlers serves both kinds:
//! - GET /api/v1/tags, GET /api/v1/topics - Owner's terms, `?assigned_only=1`
//!   keeps only terms attached to a post
//! - POST /api/v1/tags, POST /api/v1/topics - Create a term

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{CreateTermInput, Tag, Taxonomy, Topic};
use crate::services::TaxonomyService;

/// Access to the service for one term kind
pub trait TaxonomyState<T: Taxonomy> {
    fn taxonomy_service(&self) -> &Arc<TaxonomyService<T>>;
}

impl TaxonomyState<Tag> for AppState {
    fn taxonomy_service(&self) -> &Arc<TaxonomyService<Tag>> {
        &self.tag_service
    }
}

impl TaxonomyState<Topic> for AppState {
    fn taxonomy_service(&self) -> &Arc<TaxonomyService<Topic>> {
        &self.topic_service
    }
}

/// Query parameters for term listing
#[derive(Debug, Default, Deserialize)]
pub struct ListTermsQuery {
    /// `0` or absent lists everything, any other integer filters
    pub assigned_only: Option<String>,
}

impl ListTermsQuery {
    fn assigned_only(&self) -> Result<bool, ApiError> {
        match self.assigned_only.as_deref().map(str::trim) {
            None | Some("") => Ok(false),
            Some(raw) => raw.parse::<i64>().map(|v| v != 0).map_err(|_| {
                ApiError::validation_error(format!(
                    "assigned_only must be an integer, got '{}'",
                    raw
                ))
            }),
        }
    }
}

/// Build the router for one term kind, mounted at `/<field>`
pub fn router<T: Taxonomy>() -> Router<AppState>
where
    AppState: TaxonomyState<T>,
{
    let path = format!("/{}", T::FIELD);
    Router::new().route(&path, get(list_terms::<T>).post(create_term::<T>))
}

async fn list_terms<T: Taxonomy>(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListTermsQuery>,
) -> Result<Json<Vec<T>>, ApiError>
where
    AppState: TaxonomyState<T>,
{
    let assigned_only = query.assigned_only()?;
    let terms = state
        .taxonomy_service()
        .list(user.0.id, assigned_only)
        .await?;

    Ok(Json(terms))
}

async fn create_term<T: Taxonomy>(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<CreateTermInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    AppState: TaxonomyState<T>,
{
    let Json(body) = payload?;
    let term = state
        .taxonomy_service()
        .create(user.0.id, &body.title)
        .await?;

    Ok((StatusCode::CREATED, Json(term)))
}

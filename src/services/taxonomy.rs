//! Taxonomy service
//!
//! Business logic shared by Tags and Topics:
//! - create a term for an owner with a trimmed, non-empty title
//! - list an owner's terms, optionally only those assigned to a post
//! - resolve term ids for post payload validation
//! - read the terms attached to posts
//!
//! `TagService` and `TopicService` are the two instantiations.

use crate::db::repositories::TaxonomyRepository;
use crate::models::{Tag, Taxonomy, Topic, TITLE_MAX_LEN};
use crate::services::{clean_title, FieldErrors};
use anyhow::Context;
use std::sync::Arc;

/// Error types for taxonomy service operations
#[derive(Debug, thiserror::Error)]
pub enum TaxonomyServiceError {
    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(FieldErrors),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Term service for one taxonomy kind
pub struct TaxonomyService<T: Taxonomy> {
    repo: Arc<dyn TaxonomyRepository<T>>,
}

/// Service managing tags
pub type TagService = TaxonomyService<Tag>;

/// Service managing topics
pub type TopicService = TaxonomyService<Topic>;

impl<T: Taxonomy> TaxonomyService<T> {
    pub fn new(repo: Arc<dyn TaxonomyRepository<T>>) -> Self {
        Self { repo }
    }

    /// Create a term owned by `owner`.
    ///
    /// # Errors
    /// - `ValidationError` if the trimmed title is empty or too long;
    ///   nothing is persisted in that case
    pub async fn create(&self, owner: i64, title: &str) -> Result<T, TaxonomyServiceError> {
        let title = clean_title("title", title, TITLE_MAX_LEN)
            .map_err(TaxonomyServiceError::ValidationError)?;

        let term = self
            .repo
            .create(owner, &title)
            .await
            .with_context(|| format!("Failed to create {}", T::DISPLAY_NAME))?;

        tracing::info!(
            "{} {} created by user {}",
            T::DISPLAY_NAME,
            term.id(),
            owner
        );
        Ok(term)
    }

    /// List the owner's terms, title descending.
    ///
    /// With `assigned_only`, only terms attached to at least one post are
    /// returned, each once.
    pub async fn list(
        &self,
        owner: i64,
        assigned_only: bool,
    ) -> Result<Vec<T>, TaxonomyServiceError> {
        let terms = self
            .repo
            .list_by_owner(owner, assigned_only)
            .await
            .with_context(|| format!("Failed to list {}s", T::DISPLAY_NAME))?;
        Ok(terms)
    }

    /// Ids that do not resolve to a term of this kind, any owner
    pub async fn find_missing(&self, ids: &[i64]) -> Result<Vec<i64>, TaxonomyServiceError> {
        let missing = self
            .repo
            .find_missing(ids)
            .await
            .with_context(|| format!("Failed to resolve {} ids", T::DISPLAY_NAME))?;
        Ok(missing)
    }

    /// Check that every id resolves, reporting unknown ids against the
    /// kind's payload field (`tags` / `topics`).
    pub async fn check_ids(
        &self,
        ids: &[i64],
        errors: &mut FieldErrors,
    ) -> Result<(), TaxonomyServiceError> {
        for id in self.find_missing(ids).await? {
            errors.add(
                T::FIELD,
                format!("Invalid pk \"{}\" - object does not exist.", id),
            );
        }
        Ok(())
    }

    /// Terms attached to a post
    pub async fn for_post(&self, post_id: i64) -> Result<Vec<T>, TaxonomyServiceError> {
        let terms = self
            .repo
            .list_for_post(post_id)
            .await
            .with_context(|| format!("Failed to load {}s for post", T::DISPLAY_NAME))?;
        Ok(terms)
    }

    /// Terms attached to each of the given posts, as `(post_id, term)` pairs
    pub async fn for_posts(
        &self,
        post_ids: &[i64],
    ) -> Result<Vec<(i64, T)>, TaxonomyServiceError> {
        let pairs = self
            .repo
            .list_for_posts(post_ids)
            .await
            .with_context(|| format!("Failed to load {}s for posts", T::DISPLAY_NAME))?;
        Ok(pairs)
    }
}

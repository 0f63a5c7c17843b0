//! Business logic services
//!
//! Services sit between the HTTP handlers and the repositories. Every
//! operation takes the caller's user id as the owner explicitly; nothing is
//! read or written outside that owner's scope except id existence checks.

pub mod media;
pub mod password;
pub mod post;
pub mod taxonomy;
pub mod user;

use std::collections::BTreeMap;
use std::fmt;

pub use media::{MediaError, MediaStore};
pub use post::{PostService, PostServiceError};
pub use taxonomy::{TagService, TaxonomyService, TaxonomyServiceError, TopicService};
pub use user::{UserService, UserServiceError};

/// Field-level validation failures, keyed by payload field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single failure on one field
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    /// `Ok` when nothing was recorded
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Trim a title and check it is non-empty and within `max` characters.
pub(crate) fn clean_title(field: &str, title: &str, max: usize) -> Result<String, FieldErrors> {
    let title = title.trim();
    if title.is_empty() {
        return Err(FieldErrors::single(field, "This field may not be blank."));
    }
    if title.chars().count() > max {
        return Err(FieldErrors::single(
            field,
            format!("Ensure this field has no more than {} characters.", max),
        ));
    }
    Ok(title.to_string())
}

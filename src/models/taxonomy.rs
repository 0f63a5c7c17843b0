//! Taxonomy models
//!
//! Tags and Topics are the two kinds of user-owned terms a Post can carry.
//! They share shape, storage layout and rules, so everything above the model
//! layer is written once against the [`Taxonomy`] trait.

use serde::{Deserialize, Serialize};

/// Maximum length of a term or post title.
pub const TITLE_MAX_LEN: usize = 255;

/// A kind of term that can be attached to posts.
///
/// Each implementation names its own table and its join table with posts,
/// so repositories and services can be instantiated per kind.
pub trait Taxonomy: Clone + Send + Sync + Serialize + 'static {
    /// Table holding the terms
    const TABLE: &'static str;
    /// Join table linking terms to posts
    const LINK_TABLE: &'static str;
    /// Term id column in the join table
    const LINK_COLUMN: &'static str;
    /// Payload field carrying term ids on a post
    const FIELD: &'static str;
    /// Human-readable singular name, used in messages and logs
    const DISPLAY_NAME: &'static str;

    fn from_row(id: i64, title: String, user_id: i64) -> Self;

    fn id(&self) -> i64;
}

/// Tag entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub title: String,
    /// Owner
    #[serde(skip_serializing)]
    pub user_id: i64,
}

impl Taxonomy for Tag {
    const TABLE: &'static str = "tags";
    const LINK_TABLE: &'static str = "post_tags";
    const LINK_COLUMN: &'static str = "tag_id";
    const FIELD: &'static str = "tags";
    const DISPLAY_NAME: &'static str = "Tag";

    fn from_row(id: i64, title: String, user_id: i64) -> Self {
        Self { id, title, user_id }
    }

    fn id(&self) -> i64 {
        self.id
    }
}

/// Topic entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub id: i64,
    pub title: String,
    /// Owner
    #[serde(skip_serializing)]
    pub user_id: i64,
}

impl Taxonomy for Topic {
    const TABLE: &'static str = "topics";
    const LINK_TABLE: &'static str = "post_topics";
    const LINK_COLUMN: &'static str = "topic_id";
    const FIELD: &'static str = "topics";
    const DISPLAY_NAME: &'static str = "Topic";

    fn from_row(id: i64, title: String, user_id: i64) -> Self {
        Self { id, title, user_id }
    }

    fn id(&self) -> i64 {
        self.id
    }
}

/// Input for creating a term of either kind
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTermInput {
    #[serde(default)]
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_serializes_without_owner() {
        let tag = Tag::from_row(3, "Tech".to_string(), 9);
        let json = serde_json::to_value(&tag).unwrap();

        assert_eq!(json, serde_json::json!({"id": 3, "title": "Tech"}));
    }

    #[test]
    fn test_topic_from_row() {
        let topic = Topic::from_row(5, "History".to_string(), 2);

        assert_eq!(topic.id(), 5);
        assert_eq!(topic.title, "History");
        assert_eq!(topic.user_id, 2);
    }

    #[test]
    fn test_kinds_use_distinct_storage() {
        assert_ne!(Tag::TABLE, Topic::TABLE);
        assert_ne!(Tag::LINK_TABLE, Topic::LINK_TABLE);
        assert_eq!(Tag::FIELD, "tags");
        assert_eq!(Topic::FIELD, "topics");
    }

    #[test]
    fn test_create_term_input_missing_title_defaults_empty() {
        let input: CreateTermInput = serde_json::from_str("{}").unwrap();
        assert_eq!(input.title, "");
    }
}

//! Post model
//!
//! A Post belongs to one user and carries unordered, duplicate-free sets of
//! Tags and Topics plus an optional image stored under the media root.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::taxonomy::{Tag, Topic};

/// URL prefix under which stored media paths are served.
pub const MEDIA_URL: &str = "/media/";

/// Maximum length of post content.
pub const CONTENT_MAX_LEN: usize = 255;

/// Post entity as stored
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    /// Owner
    pub user_id: i64,
    pub title: String,
    /// May be empty
    pub content: String,
    /// Refreshed on every save
    pub date: DateTime<Utc>,
    /// Path relative to the media root, e.g. `uploads/post/<uuid>.png`
    pub image: Option<String>,
}

impl Post {
    /// Create a new unsaved Post owned by `user_id`
    pub fn new(user_id: i64, title: String, content: String) -> Self {
        Self {
            id: 0, // Will be set by the database
            user_id,
            title,
            content,
            date: Utc::now(),
            image: None,
        }
    }

    /// Public URL of the attached image
    pub fn image_url(&self) -> Option<String> {
        self.image.as_ref().map(|path| format!("{}{}", MEDIA_URL, path))
    }
}

/// A Post together with its Tags and Topics
#[derive(Debug, Clone)]
pub struct PostDetail {
    pub post: Post,
    pub tags: Vec<Tag>,
    pub topics: Vec<Topic>,
}

/// Detail representation: tags and topics nested as `{id, title}`
#[derive(Debug, Clone, Serialize)]
pub struct PostDetailResponse {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub date: NaiveDate,
    pub tags: Vec<Tag>,
    pub topics: Vec<Topic>,
    pub image: Option<String>,
}

impl From<PostDetail> for PostDetailResponse {
    fn from(detail: PostDetail) -> Self {
        let image = detail.post.image_url();
        Self {
            id: detail.post.id,
            title: detail.post.title,
            content: detail.post.content,
            date: detail.post.date.date_naive(),
            tags: detail.tags,
            topics: detail.topics,
            image,
        }
    }
}

/// List representation: tags and topics as bare ids
#[derive(Debug, Clone, Serialize)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub date: NaiveDate,
    pub tags: Vec<i64>,
    pub topics: Vec<i64>,
    pub image: Option<String>,
}

impl From<PostDetail> for PostSummary {
    fn from(detail: PostDetail) -> Self {
        let image = detail.post.image_url();
        Self {
            id: detail.post.id,
            title: detail.post.title,
            content: detail.post.content,
            date: detail.post.date.date_naive(),
            tags: detail.tags.iter().map(|t| t.id).collect(),
            topics: detail.topics.iter().map(|t| t.id).collect(),
            image,
        }
    }
}

/// Response body of an image upload
#[derive(Debug, Clone, Serialize)]
pub struct PostImageResponse {
    pub id: i64,
    pub image: Option<String>,
}

impl From<&Post> for PostImageResponse {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id,
            image: post.image_url(),
        }
    }
}

/// Write payload for creating or updating a post.
///
/// Every field is optional at the wire level; which omissions are errors,
/// defaults or "leave unchanged" depends on the operation and [`UpdateMode`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<i64>>,
    #[serde(default)]
    pub topics: Option<Vec<i64>>,
}

/// How an update treats omitted fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Replace the whole resource: omitted content becomes empty and
    /// omitted association lists are cleared
    Full,
    /// Only supplied fields change
    Partial,
}

/// Owner-scoped post listing filters. Empty lists mean "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    pub tag_ids: Vec<i64>,
    pub topic_ids: Vec<i64>,
}

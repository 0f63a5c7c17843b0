//! Data models
//!
//! This module contains the data structures used throughout Postboard.
//! Models represent:
//! - Database entities (User, Session, Tag, Topic, Post)
//! - API request/response types
//! - Internal data transfer objects

mod post;
mod session;
mod taxonomy;
mod user;

pub use post::{
    Post, PostDetail, PostDetailResponse, PostFilter, PostImageResponse, PostInput, PostSummary,
    UpdateMode, CONTENT_MAX_LEN, MEDIA_URL,
};
pub use session::Session;
pub use taxonomy::{CreateTermInput, Tag, Taxonomy, Topic, TITLE_MAX_LEN};
pub use user::{normalize_email, CreateUserInput, LoginInput, User, EMAIL_MAX_LEN, NAME_MAX_LEN};

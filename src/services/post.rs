//! Post service
//!
//! Owner-scoped post operations:
//! - create and update (full or partial) with tag/topic membership
//! - filtered listing and detail reads
//! - image attachment through the media store
//!
//! Tag and topic ids in a payload must exist, but may belong to any user.

use crate::db::repositories::PostRepository;
use crate::models::{
    Post, PostDetail, PostFilter, PostInput, Tag, Taxonomy, Topic, UpdateMode, CONTENT_MAX_LEN,
    TITLE_MAX_LEN,
};
use crate::services::{
    clean_title, FieldErrors, MediaError, MediaStore, TagService, TaxonomyServiceError,
    TopicService,
};
use anyhow::Context;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

const REQUIRED: &str = "This field is required.";

/// Error types for post service operations
#[derive(Debug, thiserror::Error)]
pub enum PostServiceError {
    /// Post does not exist or belongs to another user
    #[error("Post not found")]
    NotFound,

    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(FieldErrors),

    /// Upload is not a decodable image
    #[error("{0}")]
    InvalidImage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<TaxonomyServiceError> for PostServiceError {
    fn from(err: TaxonomyServiceError) -> Self {
        match err {
            TaxonomyServiceError::ValidationError(errors) => Self::ValidationError(errors),
            TaxonomyServiceError::InternalError(e) => Self::InternalError(e),
        }
    }
}

impl From<MediaError> for PostServiceError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Io(e) => {
                Self::InternalError(anyhow::Error::new(e).context("Failed to store image"))
            }
            too_large @ MediaError::TooLarge { .. } => {
                Self::ValidationError(FieldErrors::single("image", too_large.to_string()))
            }
            invalid @ MediaError::InvalidImage(_) => Self::InvalidImage(invalid.to_string()),
        }
    }
}

/// Post service
pub struct PostService {
    posts: Arc<dyn PostRepository>,
    tags: Arc<TagService>,
    topics: Arc<TopicService>,
    media: MediaStore,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        tags: Arc<TagService>,
        topics: Arc<TopicService>,
        media: MediaStore,
    ) -> Self {
        Self {
            posts,
            tags,
            topics,
            media,
        }
    }

    /// Create a post owned by `owner`.
    ///
    /// # Errors
    /// - `ValidationError` when the title is missing or blank, a field is
    ///   too long, or a tag/topic id does not exist; nothing is persisted
    pub async fn create(
        &self,
        owner: i64,
        input: PostInput,
    ) -> Result<PostDetail, PostServiceError> {
        let mut errors = FieldErrors::new();

        let title = match input.title.as_deref() {
            Some(title) => check_title(title, &mut errors),
            None => {
                errors.add("title", REQUIRED);
                None
            }
        };
        let content = input.content.unwrap_or_default();
        check_content(&content, &mut errors);

        let tag_ids = input.tags.unwrap_or_default();
        let topic_ids = input.topics.unwrap_or_default();
        self.tags.check_ids(&tag_ids, &mut errors).await?;
        self.topics.check_ids(&topic_ids, &mut errors).await?;

        errors.into_result().map_err(PostServiceError::ValidationError)?;
        let title = title.unwrap_or_default();

        let post = Post::new(owner, title, content);
        let created = self
            .posts
            .create(&post, &tag_ids, &topic_ids)
            .await
            .context("Failed to create post")?;

        tracing::info!("Post {} created by user {}", created.id, owner);
        self.detail(created).await
    }

    /// Update one of the owner's posts.
    ///
    /// `UpdateMode::Full` requires a title, empties omitted content and
    /// clears omitted tag/topic sets. `UpdateMode::Partial` only touches the
    /// supplied fields. Supplied id lists always replace the whole set.
    ///
    /// # Errors
    /// - `NotFound` if the post is missing or owned by someone else
    /// - `ValidationError` as for `create`
    pub async fn update(
        &self,
        post_id: i64,
        owner: i64,
        input: PostInput,
        mode: UpdateMode,
    ) -> Result<PostDetail, PostServiceError> {
        let mut post = self.owned(post_id, owner).await?;
        let mut errors = FieldErrors::new();

        match (input.title.as_deref(), mode) {
            (Some(title), _) => {
                if let Some(title) = check_title(title, &mut errors) {
                    post.title = title;
                }
            }
            (None, UpdateMode::Full) => errors.add("title", REQUIRED),
            (None, UpdateMode::Partial) => {}
        }

        match (input.content, mode) {
            (Some(content), _) => post.content = content,
            (None, UpdateMode::Full) => post.content = String::new(),
            (None, UpdateMode::Partial) => {}
        }
        check_content(&post.content, &mut errors);

        let (tag_ids, topic_ids) = match mode {
            UpdateMode::Full => (
                Some(input.tags.unwrap_or_default()),
                Some(input.topics.unwrap_or_default()),
            ),
            UpdateMode::Partial => (input.tags, input.topics),
        };
        if let Some(ids) = &tag_ids {
            self.tags.check_ids(ids, &mut errors).await?;
        }
        if let Some(ids) = &topic_ids {
            self.topics.check_ids(ids, &mut errors).await?;
        }

        errors.into_result().map_err(PostServiceError::ValidationError)?;

        post.date = Utc::now();
        let updated = self
            .posts
            .update(&post, tag_ids.as_deref(), topic_ids.as_deref())
            .await
            .context("Failed to update post")?;

        tracing::info!("Post {} updated ({:?})", post_id, mode);
        self.detail(updated).await
    }

    /// Validate and store an image, then point the post at it.
    ///
    /// On any failure the post keeps its previous image.
    pub async fn attach_image(
        &self,
        post_id: i64,
        owner: i64,
        filename: Option<&str>,
        bytes: &[u8],
    ) -> Result<Post, PostServiceError> {
        let mut post = self.owned(post_id, owner).await?;

        let path = self
            .media
            .store_post_image(filename, bytes)
            .await
            .inspect_err(|e| tracing::debug!("Rejected image for post {}: {:?}", post_id, e))?;

        self.posts
            .set_image(post.id, &path)
            .await
            .context("Failed to set post image")?;

        tracing::info!("Post {} image set to {}", post_id, path);
        post.image = Some(path);
        Ok(post)
    }

    /// The owner's posts by id ascending, with their tags and topics.
    pub async fn list(
        &self,
        owner: i64,
        filter: &PostFilter,
    ) -> Result<Vec<PostDetail>, PostServiceError> {
        let posts = self
            .posts
            .list(owner, filter)
            .await
            .context("Failed to list posts")?;

        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        let mut tags = group_by_post(self.tags.for_posts(&ids).await?);
        let mut topics = group_by_post(self.topics.for_posts(&ids).await?);

        Ok(posts
            .into_iter()
            .map(|post| PostDetail {
                tags: tags.remove(&post.id).unwrap_or_default(),
                topics: topics.remove(&post.id).unwrap_or_default(),
                post,
            })
            .collect())
    }

    /// One of the owner's posts with its tags and topics
    pub async fn get(&self, post_id: i64, owner: i64) -> Result<PostDetail, PostServiceError> {
        let post = self.owned(post_id, owner).await?;
        self.detail(post).await
    }

    async fn owned(&self, post_id: i64, owner: i64) -> Result<Post, PostServiceError> {
        self.posts
            .get_by_id(post_id)
            .await
            .context("Failed to get post")?
            .filter(|post| post.user_id == owner)
            .ok_or(PostServiceError::NotFound)
    }

    async fn detail(&self, post: Post) -> Result<PostDetail, PostServiceError> {
        let tags: Vec<Tag> = self.tags.for_post(post.id).await?;
        let topics: Vec<Topic> = self.topics.for_post(post.id).await?;
        Ok(PostDetail { post, tags, topics })
    }
}

fn check_title(title: &str, errors: &mut FieldErrors) -> Option<String> {
    match clean_title("title", title, TITLE_MAX_LEN) {
        Ok(title) => Some(title),
        Err(e) => {
            for message in e.fields().values().flatten() {
                errors.add("title", message.clone());
            }
            None
        }
    }
}

fn check_content(content: &str, errors: &mut FieldErrors) {
    if content.chars().count() > CONTENT_MAX_LEN {
        errors.add(
            "content",
            format!("Ensure this field has no more than {} characters.", CONTENT_MAX_LEN),
        );
    }
}

fn group_by_post<T: Taxonomy>(pairs: Vec<(i64, T)>) -> HashMap<i64, Vec<T>> {
    let mut grouped: HashMap<i64, Vec<T>> = HashMap::new();
    for (post_id, term) in pairs {
        grouped.entry(post_id).or_default().push(term);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxPostRepository, SqlxTaxonomyRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::services::media::test_images;
    use tempfile::TempDir;

    struct Fixture {
        pool: DynDatabasePool,
        service: PostService,
        tags: Arc<TagService>,
        topics: Arc<TopicService>,
        media_dir: TempDir,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let tags = Arc::new(TagService::new(SqlxTaxonomyRepository::boxed(pool.clone())));
        let topics = Arc::new(TopicService::new(SqlxTaxonomyRepository::boxed(pool.clone())));
        let media_dir = tempfile::tempdir().unwrap();
        let service = PostService::new(
            SqlxPostRepository::boxed(pool.clone()),
            tags.clone(),
            topics.clone(),
            MediaStore::new(media_dir.path(), 64 * 1024),
        );

        Fixture {
            pool,
            service,
            tags,
            topics,
            media_dir,
        }
    }

    async fn create_user(pool: &DynDatabasePool, email: &str) -> i64 {
        sqlx::query("INSERT INTO users (email, password_hash) VALUES (?, ?)")
            .bind(email)
            .bind("hash")
            .execute(pool.sqlite().unwrap())
            .await
            .unwrap()
            .last_insert_rowid()
    }

    fn payload(title: &str, tags: Option<Vec<i64>>, topics: Option<Vec<i64>>) -> PostInput {
        PostInput {
            title: Some(title.to_string()),
            content: None,
            tags,
            topics,
        }
    }

    fn tag_titles(detail: &PostDetail) -> Vec<String> {
        let mut titles: Vec<String> = detail.tags.iter().map(|t| t.title.clone()).collect();
        titles.sort();
        titles
    }

    // ========================================================================
    // Create
    // ========================================================================

    #[tokio::test]
    async fn test_create_with_two_tags() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let tech = f.tags.create(owner, "Tech").await.unwrap();
        let history = f.tags.create(owner, "History").await.unwrap();

        let detail = f
            .service
            .create(owner, payload("Sample", Some(vec![tech.id, history.id]), None))
            .await
            .unwrap();

        assert_eq!(detail.post.content, "");
        assert_eq!(detail.post.user_id, owner);
        assert_eq!(tag_titles(&detail), vec!["History", "Tech"]);
        assert!(detail.topics.is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_title() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;

        let result = f.service.create(owner, PostInput::default()).await;

        match result {
            Err(PostServiceError::ValidationError(errors)) => {
                assert_eq!(errors.fields()["title"], vec![REQUIRED.to_string()]);
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_unknown_ids_persist_nothing() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let topic = f.topics.create(owner, "Rust").await.unwrap();

        let result = f
            .service
            .create(owner, payload("Post", Some(vec![999]), Some(vec![topic.id, 998])))
            .await;

        match result {
            Err(PostServiceError::ValidationError(errors)) => {
                assert!(errors.fields().contains_key("tags"));
                assert!(errors.fields()["topics"][0].contains("998"));
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
        let listed = f.service.list(owner, &PostFilter::default()).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_create_content_too_long() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let mut input = payload("Post", None, None);
        input.content = Some("c".repeat(CONTENT_MAX_LEN + 1));

        let result = f.service.create(owner, input).await;

        assert!(matches!(result, Err(PostServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_create_with_foreign_tag_is_allowed() {
        let f = setup().await;
        let alice = create_user(&f.pool, "alice@x.com").await;
        let bob = create_user(&f.pool, "bob@x.com").await;
        let bobs_tag = f.tags.create(bob, "Theirs").await.unwrap();

        let detail = f
            .service
            .create(alice, payload("Mine", Some(vec![bobs_tag.id]), None))
            .await
            .unwrap();

        assert_eq!(detail.tags, vec![bobs_tag]);
    }

    // ========================================================================
    // Update
    // ========================================================================

    #[tokio::test]
    async fn test_full_update_clears_omitted_fields() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let tag = f.tags.create(owner, "Tech").await.unwrap();
        let mut input = payload("Old", Some(vec![tag.id]), None);
        input.content = Some("body".to_string());
        let created = f.service.create(owner, input).await.unwrap();

        let updated = f
            .service
            .update(created.post.id, owner, payload("New", None, None), UpdateMode::Full)
            .await
            .unwrap();

        assert_eq!(updated.post.title, "New");
        assert_eq!(updated.post.content, "");
        assert!(updated.tags.is_empty());
        assert!(updated.post.date >= created.post.date);
    }

    #[tokio::test]
    async fn test_full_update_requires_title() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let created = f.service.create(owner, payload("Old", None, None)).await.unwrap();

        let result = f
            .service
            .update(created.post.id, owner, PostInput::default(), UpdateMode::Full)
            .await;

        assert!(matches!(result, Err(PostServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_omitted_and_replaces_lists() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let tech = f.tags.create(owner, "Tech").await.unwrap();
        let history = f.tags.create(owner, "History").await.unwrap();
        let topic = f.topics.create(owner, "Rust").await.unwrap();
        let created = f
            .service
            .create(owner, payload("Old", Some(vec![tech.id]), Some(vec![topic.id])))
            .await
            .unwrap();

        let untouched = f
            .service
            .update(
                created.post.id,
                owner,
                PostInput {
                    content: Some("edited".to_string()),
                    ..PostInput::default()
                },
                UpdateMode::Partial,
            )
            .await
            .unwrap();
        assert_eq!(untouched.post.title, "Old");
        assert_eq!(untouched.post.content, "edited");
        assert_eq!(untouched.tags, vec![tech.clone()]);
        assert_eq!(untouched.topics, vec![topic.clone()]);

        let replaced = f
            .service
            .update(
                created.post.id,
                owner,
                PostInput {
                    tags: Some(vec![history.id]),
                    ..PostInput::default()
                },
                UpdateMode::Partial,
            )
            .await
            .unwrap();
        assert_eq!(replaced.tags, vec![history]);
        assert_eq!(replaced.topics, vec![topic]);
    }

    #[tokio::test]
    async fn test_partial_update_blank_title_fails() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let created = f.service.create(owner, payload("Old", None, None)).await.unwrap();

        let result = f
            .service
            .update(created.post.id, owner, payload("  ", None, None), UpdateMode::Partial)
            .await;

        assert!(matches!(result, Err(PostServiceError::ValidationError(_))));
        let fetched = f.service.get(created.post.id, owner).await.unwrap();
        assert_eq!(fetched.post.title, "Old");
    }

    #[tokio::test]
    async fn test_update_foreign_post_is_not_found() {
        let f = setup().await;
        let alice = create_user(&f.pool, "alice@x.com").await;
        let bob = create_user(&f.pool, "bob@x.com").await;
        let created = f.service.create(alice, payload("Hers", None, None)).await.unwrap();

        let update = f
            .service
            .update(created.post.id, bob, payload("Mine", None, None), UpdateMode::Full)
            .await;
        let get = f.service.get(created.post.id, bob).await;
        let missing = f.service.get(4040, alice).await;

        assert!(matches!(update, Err(PostServiceError::NotFound)));
        assert!(matches!(get, Err(PostServiceError::NotFound)));
        assert!(matches!(missing, Err(PostServiceError::NotFound)));
    }

    // ========================================================================
    // Listing
    // ========================================================================

    #[tokio::test]
    async fn test_list_filters_and_owner_scope() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let other = create_user(&f.pool, "b@x.com").await;
        let tech = f.tags.create(owner, "Tech").await.unwrap();
        let rust = f.topics.create(owner, "Rust").await.unwrap();

        let tagged = f
            .service
            .create(owner, payload("Tagged", Some(vec![tech.id]), None))
            .await
            .unwrap();
        let both = f
            .service
            .create(owner, payload("Both", Some(vec![tech.id]), Some(vec![rust.id])))
            .await
            .unwrap();
        f.service.create(owner, payload("Plain", None, None)).await.unwrap();
        f.service
            .create(other, payload("Foreign", Some(vec![tech.id]), None))
            .await
            .unwrap();

        let all = f.service.list(owner, &PostFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].post.id < w[1].post.id));

        let by_tag = f
            .service
            .list(
                owner,
                &PostFilter {
                    tag_ids: vec![tech.id],
                    topic_ids: vec![],
                },
            )
            .await
            .unwrap();
        let ids: Vec<i64> = by_tag.iter().map(|d| d.post.id).collect();
        assert_eq!(ids, vec![tagged.post.id, both.post.id]);

        let intersection = f
            .service
            .list(
                owner,
                &PostFilter {
                    tag_ids: vec![tech.id],
                    topic_ids: vec![rust.id],
                },
            )
            .await
            .unwrap();
        assert_eq!(intersection.len(), 1);
        assert_eq!(intersection[0].post.id, both.post.id);
        assert_eq!(intersection[0].topics, vec![rust]);
    }

    #[tokio::test]
    async fn test_list_with_large_filter() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let tech = f.tags.create(owner, "Tech").await.unwrap();
        let tagged = f
            .service
            .create(owner, payload("Tagged", Some(vec![tech.id]), None))
            .await
            .unwrap();
        let filter = PostFilter {
            tag_ids: (1..=40_000).collect(),
            topic_ids: vec![],
        };

        let listed = f.service.list(owner, &filter).await.expect("Large filter failed");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].post.id, tagged.post.id);
        assert_eq!(listed[0].tags, vec![tech]);
    }

    #[tokio::test]
    async fn test_create_with_large_unknown_id_list_is_validation_error() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;

        let result = f
            .service
            .create(owner, payload("Post", Some((1..=40_000).collect()), None))
            .await;

        match result {
            Err(PostServiceError::ValidationError(errors)) => {
                assert_eq!(errors.fields()["tags"].len(), 40_000);
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_many_posts_loads_terms_in_chunks() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let rust = f.topics.create(owner, "Rust").await.unwrap();
        let count = 1_200;
        for n in 0..count {
            let topics = (n % 2 == 0).then(|| vec![rust.id]);
            f.service
                .create(owner, payload(&format!("Post {}", n), None, topics))
                .await
                .unwrap();
        }

        let listed = f.service.list(owner, &PostFilter::default()).await.unwrap();

        assert_eq!(listed.len(), count);
        assert_eq!(listed.iter().filter(|d| d.topics == vec![rust.clone()]).count(), count / 2);
    }

    // ========================================================================
    // Images
    // ========================================================================

    #[tokio::test]
    async fn test_attach_image_sets_path() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let created = f.service.create(owner, payload("Pic", None, None)).await.unwrap();

        let post = f
            .service
            .attach_image(created.post.id, owner, Some("shot.png"), &test_images::png())
            .await
            .unwrap();

        let path = post.image.clone().unwrap();
        assert!(path.starts_with("uploads/post/"));
        assert!(f.media_dir.path().join(&path).exists());
        let fetched = f.service.get(created.post.id, owner).await.unwrap();
        assert_eq!(fetched.post.image, Some(path));
    }

    #[tokio::test]
    async fn test_attach_invalid_image_keeps_previous() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let created = f.service.create(owner, payload("Pic", None, None)).await.unwrap();
        let first = f
            .service
            .attach_image(created.post.id, owner, Some("a.png"), &test_images::png())
            .await
            .unwrap();

        let result = f
            .service
            .attach_image(created.post.id, owner, Some("a.txt"), b"plain text")
            .await;

        assert!(matches!(result, Err(PostServiceError::InvalidImage(_))));
        let fetched = f.service.get(created.post.id, owner).await.unwrap();
        assert_eq!(fetched.post.image, first.image);
    }

    #[tokio::test]
    async fn test_attach_oversized_image_is_validation_error() {
        let f = setup().await;
        let owner = create_user(&f.pool, "a@x.com").await;
        let created = f.service.create(owner, payload("Pic", None, None)).await.unwrap();
        let big = vec![0u8; 64 * 1024 + 1];

        let result = f
            .service
            .attach_image(created.post.id, owner, Some("big.png"), &big)
            .await;

        match result {
            Err(PostServiceError::ValidationError(errors)) => {
                assert!(errors.fields().contains_key("image"));
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attach_image_to_foreign_post_is_not_found() {
        let f = setup().await;
        let alice = create_user(&f.pool, "alice@x.com").await;
        let bob = create_user(&f.pool, "bob@x.com").await;
        let created = f.service.create(alice, payload("Hers", None, None)).await.unwrap();

        let result = f
            .service
            .attach_image(created.post.id, bob, Some("a.png"), &test_images::png())
            .await;

        assert!(matches!(result, Err(PostServiceError::NotFound)));
    }
}

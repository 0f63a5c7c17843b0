//! Post repository
//!
//! Database operations for posts.
//!
//! This module provides:
//! - `PostRepository` trait defining the interface for post data access
//! - `SqlxPostRepository` implementing the trait for SQLite and MySQL
//!
//! Post writes touch the `posts` row and the `post_tags` / `post_topics`
//! link tables inside one transaction. Listing filters resolve the matching
//! post ids per taxonomy in bounded chunks, then narrow the owner's posts.

use crate::config::DatabaseDriver;
use crate::db::repositories::taxonomy::{
    dedup_ids, placeholders, replace_links_mysql, replace_links_sqlite, BIND_CHUNK,
};
use crate::db::DynDatabasePool;
use crate::models::{Post, PostFilter, Tag, Taxonomy, Topic};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;

/// Post repository trait
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a post together with its initial tag and topic sets
    async fn create(&self, post: &Post, tag_ids: &[i64], topic_ids: &[i64]) -> Result<Post>;

    /// Update title, content and date of an existing post.
    ///
    /// `Some` link lists replace the corresponding set, `None` leaves it.
    async fn update(
        &self,
        post: &Post,
        tag_ids: Option<&[i64]>,
        topic_ids: Option<&[i64]>,
    ) -> Result<Post>;

    /// Set the stored image path of a post
    async fn set_image(&self, post_id: i64, image: &str) -> Result<()>;

    /// Get post by ID regardless of owner
    async fn get_by_id(&self, id: i64) -> Result<Option<Post>>;

    /// List the owner's posts by id ascending, narrowed by the filter
    async fn list(&self, user_id: i64, filter: &PostFilter) -> Result<Vec<Post>>;
}

/// SQLx-based post repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    /// Create a new SQLx post repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, post: &Post, tag_ids: &[i64], topic_ids: &[i64]) -> Result<Post> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_post_sqlite(self.pool.sqlite()?, post, tag_ids, topic_ids).await
            }
            DatabaseDriver::Mysql => {
                create_post_mysql(self.pool.mysql()?, post, tag_ids, topic_ids).await
            }
        }
    }

    async fn update(
        &self,
        post: &Post,
        tag_ids: Option<&[i64]>,
        topic_ids: Option<&[i64]>,
    ) -> Result<Post> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                update_post_sqlite(self.pool.sqlite()?, post, tag_ids, topic_ids).await
            }
            DatabaseDriver::Mysql => {
                update_post_mysql(self.pool.mysql()?, post, tag_ids, topic_ids).await
            }
        }
    }

    async fn set_image(&self, post_id: i64, image: &str) -> Result<()> {
        let sql = "UPDATE posts SET image = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(image)
                    .bind(post_id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to set post image")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(image)
                    .bind(post_id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to set post image")?;
            }
        }
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_post_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_post_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn list(&self, user_id: i64, filter: &PostFilter) -> Result<Vec<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_posts_sqlite(self.pool.sqlite()?, user_id, filter).await,
            DatabaseDriver::Mysql => list_posts_mysql(self.pool.mysql()?, user_id, filter).await,
        }
    }
}

const POST_COLUMNS: &str = "id, user_id, title, content, date, image";

/// Owner's posts whose `T` links hit any id of one chunk
fn linked_post_ids_sql<T: Taxonomy>(n: usize) -> String {
    format!(
        "SELECT DISTINCT {link}.post_id FROM {link} \
         JOIN posts ON posts.id = {link}.post_id \
         WHERE posts.user_id = ? AND {link}.{col} IN ({ph})",
        link = T::LINK_TABLE,
        col = T::LINK_COLUMN,
        ph = placeholders(n),
    )
}

/// Keep posts present in every resolved filter set; `None` means unfiltered
fn retain_linked(
    posts: Vec<Post>,
    tagged: Option<&HashSet<i64>>,
    topical: Option<&HashSet<i64>>,
) -> Vec<Post> {
    posts
        .into_iter()
        .filter(|post| {
            tagged.map_or(true, |ids| ids.contains(&post.id))
                && topical.map_or(true, |ids| ids.contains(&post.id))
        })
        .collect()
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_post_sqlite(
    pool: &SqlitePool,
    post: &Post,
    tag_ids: &[i64],
    topic_ids: &[i64],
) -> Result<Post> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(
        r#"
        INSERT INTO posts (user_id, title, content, date, image)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(post.user_id)
    .bind(&post.title)
    .bind(&post.content)
    .bind(post.date)
    .bind(&post.image)
    .execute(&mut *tx)
    .await
    .context("Failed to create post")?
    .last_insert_rowid();

    replace_links_sqlite::<Tag>(&mut *tx, id, tag_ids).await?;
    replace_links_sqlite::<Topic>(&mut *tx, id, topic_ids).await?;

    tx.commit().await.context("Failed to commit post")?;

    Ok(Post { id, ..post.clone() })
}

async fn update_post_sqlite(
    pool: &SqlitePool,
    post: &Post,
    tag_ids: Option<&[i64]>,
    topic_ids: Option<&[i64]>,
) -> Result<Post> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("UPDATE posts SET title = ?, content = ?, date = ? WHERE id = ?")
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.date)
        .bind(post.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update post")?;

    if let Some(ids) = tag_ids {
        replace_links_sqlite::<Tag>(&mut *tx, post.id, ids).await?;
    }
    if let Some(ids) = topic_ids {
        replace_links_sqlite::<Topic>(&mut *tx, post.id, ids).await?;
    }

    tx.commit().await.context("Failed to commit post")?;

    Ok(post.clone())
}

async fn get_post_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    row.map(|row| row_to_post_sqlite(&row)).transpose()
}

async fn linked_post_ids_sqlite<T: Taxonomy>(
    pool: &SqlitePool,
    user_id: i64,
    term_ids: &[i64],
) -> Result<HashSet<i64>> {
    let mut found = HashSet::new();
    for chunk in dedup_ids(term_ids).chunks(BIND_CHUNK) {
        let sql = linked_post_ids_sql::<T>(chunk.len());
        let mut query = sqlx::query(&sql).bind(user_id);
        for id in chunk {
            query = query.bind(*id);
        }
        for row in query
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to filter posts by {}", T::DISPLAY_NAME))?
        {
            found.insert(row.try_get::<i64, _>("post_id")?);
        }
    }
    Ok(found)
}

async fn list_posts_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    filter: &PostFilter,
) -> Result<Vec<Post>> {
    let tagged = if filter.tag_ids.is_empty() {
        None
    } else {
        Some(linked_post_ids_sqlite::<Tag>(pool, user_id, &filter.tag_ids).await?)
    };
    let topical = if filter.topic_ids.is_empty() {
        None
    } else {
        Some(linked_post_ids_sqlite::<Topic>(pool, user_id, &filter.topic_ids).await?)
    };

    let posts = sqlx::query(&format!(
        "SELECT {} FROM posts WHERE user_id = ? ORDER BY id ASC",
        POST_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("Failed to list posts")?
    .iter()
    .map(row_to_post_sqlite)
    .collect::<Result<Vec<_>>>()?;

    Ok(retain_linked(posts, tagged.as_ref(), topical.as_ref()))
}

fn row_to_post_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        date: row.try_get("date")?,
        image: row.try_get("image")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_post_mysql(
    pool: &MySqlPool,
    post: &Post,
    tag_ids: &[i64],
    topic_ids: &[i64],
) -> Result<Post> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(
        r#"
        INSERT INTO posts (user_id, title, content, date, image)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(post.user_id)
    .bind(&post.title)
    .bind(&post.content)
    .bind(post.date)
    .bind(&post.image)
    .execute(&mut *tx)
    .await
    .context("Failed to create post")?
    .last_insert_id() as i64;

    replace_links_mysql::<Tag>(&mut *tx, id, tag_ids).await?;
    replace_links_mysql::<Topic>(&mut *tx, id, topic_ids).await?;

    tx.commit().await.context("Failed to commit post")?;

    Ok(Post { id, ..post.clone() })
}

async fn update_post_mysql(
    pool: &MySqlPool,
    post: &Post,
    tag_ids: Option<&[i64]>,
    topic_ids: Option<&[i64]>,
) -> Result<Post> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("UPDATE posts SET title = ?, content = ?, date = ? WHERE id = ?")
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.date)
        .bind(post.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update post")?;

    if let Some(ids) = tag_ids {
        replace_links_mysql::<Tag>(&mut *tx, post.id, ids).await?;
    }
    if let Some(ids) = topic_ids {
        replace_links_mysql::<Topic>(&mut *tx, post.id, ids).await?;
    }

    tx.commit().await.context("Failed to commit post")?;

    Ok(post.clone())
}

async fn get_post_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    row.map(|row| row_to_post_mysql(&row)).transpose()
}

async fn linked_post_ids_mysql<T: Taxonomy>(
    pool: &MySqlPool,
    user_id: i64,
    term_ids: &[i64],
) -> Result<HashSet<i64>> {
    let mut found = HashSet::new();
    for chunk in dedup_ids(term_ids).chunks(BIND_CHUNK) {
        let sql = linked_post_ids_sql::<T>(chunk.len());
        let mut query = sqlx::query(&sql).bind(user_id);
        for id in chunk {
            query = query.bind(*id);
        }
        for row in query
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to filter posts by {}", T::DISPLAY_NAME))?
        {
            found.insert(row.try_get::<i64, _>("post_id")?);
        }
    }
    Ok(found)
}

async fn list_posts_mysql(pool: &MySqlPool, user_id: i64, filter: &PostFilter) -> Result<Vec<Post>> {
    let tagged = if filter.tag_ids.is_empty() {
        None
    } else {
        Some(linked_post_ids_mysql::<Tag>(pool, user_id, &filter.tag_ids).await?)
    };
    let topical = if filter.topic_ids.is_empty() {
        None
    } else {
        Some(linked_post_ids_mysql::<Topic>(pool, user_id, &filter.topic_ids).await?)
    };

    let posts = sqlx::query(&format!(
        "SELECT {} FROM posts WHERE user_id = ? ORDER BY id ASC",
        POST_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("Failed to list posts")?
    .iter()
    .map(row_to_post_mysql)
    .collect::<Result<Vec<_>>>()?;

    Ok(retain_linked(posts, tagged.as_ref(), topical.as_ref()))
}

fn row_to_post_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        date: row.try_get("date")?,
        image: row.try_get("image")?,
    })
}

//! Taxonomy repository
//!
//! Database operations for Tags and Topics.
//!
//! This module provides:
//! - `TaxonomyRepository<T>` trait defining term data access for one kind
//! - `SqlxTaxonomyRepository<T>` implementing it for SQLite and MySQL
//! - link helpers that rewrite a post's membership set inside an existing
//!   transaction, shared with the post repository
//!
//! Table and column names come from the [`Taxonomy`] constants of the kind,
//! never from user input. Id lists are bound in chunks of [`BIND_CHUNK`] so
//! a single statement stays under the driver's placeholder limit.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Taxonomy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlConnection, Row, SqliteConnection};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Term repository trait, one instance per taxonomy kind
#[async_trait]
pub trait TaxonomyRepository<T: Taxonomy>: Send + Sync {
    /// Create a term owned by `user_id`
    async fn create(&self, user_id: i64, title: &str) -> Result<T>;

    /// List the owner's terms, title descending then id ascending.
    ///
    /// With `assigned_only`, only terms linked to at least one post are
    /// returned, each once.
    async fn list_by_owner(&self, user_id: i64, assigned_only: bool) -> Result<Vec<T>>;

    /// Return the ids (of any owner) that do not resolve to a term,
    /// in first-seen order without duplicates
    async fn find_missing(&self, ids: &[i64]) -> Result<Vec<i64>>;

    /// Terms linked to a post, by term id
    async fn list_for_post(&self, post_id: i64) -> Result<Vec<T>>;

    /// Terms linked to any of the given posts, as `(post_id, term)` pairs
    async fn list_for_posts(&self, post_ids: &[i64]) -> Result<Vec<(i64, T)>>;
}

/// SQLx-based term repository implementation
pub struct SqlxTaxonomyRepository<T> {
    pool: DynDatabasePool,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Taxonomy> SqlxTaxonomyRepository<T> {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self {
            pool,
            _kind: PhantomData,
        }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TaxonomyRepository<T>> {
        Arc::new(Self::new(pool))
    }
}

/// Maximum number of ids bound into one `IN (...)` list
pub(crate) const BIND_CHUNK: usize = 500;

/// `?, ?, ?` with `n` placeholders
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Collapse duplicate ids, keeping first-seen order
pub(crate) fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn term_columns<T: Taxonomy>() -> String {
    format!("{t}.id, {t}.title, {t}.user_id", t = T::TABLE)
}

fn list_by_owner_sql<T: Taxonomy>(assigned_only: bool) -> String {
    let assigned = if assigned_only {
        format!(
            " AND EXISTS (SELECT 1 FROM {link} WHERE {link}.{col} = {t}.id)",
            link = T::LINK_TABLE,
            col = T::LINK_COLUMN,
            t = T::TABLE,
        )
    } else {
        String::new()
    };
    format!(
        "SELECT {cols} FROM {t} WHERE {t}.user_id = ?{assigned} ORDER BY {t}.title DESC, {t}.id ASC",
        cols = term_columns::<T>(),
        t = T::TABLE,
        assigned = assigned,
    )
}

fn for_posts_sql<T: Taxonomy>(n: usize) -> String {
    format!(
        "SELECT {link}.post_id, {cols} FROM {link} \
         JOIN {t} ON {t}.id = {link}.{col} \
         WHERE {link}.post_id IN ({ph}) \
         ORDER BY {link}.post_id, {t}.id",
        link = T::LINK_TABLE,
        cols = term_columns::<T>(),
        t = T::TABLE,
        col = T::LINK_COLUMN,
        ph = placeholders(n),
    )
}

fn missing_from(requested: &[i64], found: &HashSet<i64>) -> Vec<i64> {
    dedup_ids(requested)
        .into_iter()
        .filter(|id| !found.contains(id))
        .collect()
}

#[async_trait]
impl<T: Taxonomy> TaxonomyRepository<T> for SqlxTaxonomyRepository<T> {
    async fn create(&self, user_id: i64, title: &str) -> Result<T> {
        let sql = format!("INSERT INTO {} (title, user_id) VALUES (?, ?)", T::TABLE);
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(title)
                .bind(user_id)
                .execute(self.pool.sqlite()?)
                .await
                .with_context(|| format!("Failed to create {}", T::DISPLAY_NAME))?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(title)
                .bind(user_id)
                .execute(self.pool.mysql()?)
                .await
                .with_context(|| format!("Failed to create {}", T::DISPLAY_NAME))?
                .last_insert_id() as i64,
        };
        Ok(T::from_row(id, title.to_string(), user_id))
    }

    async fn list_by_owner(&self, user_id: i64, assigned_only: bool) -> Result<Vec<T>> {
        let sql = list_by_owner_sql::<T>(assigned_only);
        let context = || format!("Failed to list {}s", T::DISPLAY_NAME);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .with_context(context)?
                .iter()
                .map(row_to_term_sqlite::<T>)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(self.pool.mysql()?)
                .await
                .with_context(context)?
                .iter()
                .map(row_to_term_mysql::<T>)
                .collect(),
        }
    }

    async fn find_missing(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let ids = dedup_ids(ids);
        let context = || format!("Failed to resolve {} ids", T::DISPLAY_NAME);
        let mut found = HashSet::new();

        for chunk in ids.chunks(BIND_CHUNK) {
            let sql = format!(
                "SELECT id FROM {} WHERE id IN ({})",
                T::TABLE,
                placeholders(chunk.len())
            );
            match self.pool.driver() {
                DatabaseDriver::Sqlite => {
                    let mut query = sqlx::query(&sql);
                    for id in chunk {
                        query = query.bind(*id);
                    }
                    for row in query
                        .fetch_all(self.pool.sqlite()?)
                        .await
                        .with_context(context)?
                    {
                        found.insert(row.try_get::<i64, _>("id")?);
                    }
                }
                DatabaseDriver::Mysql => {
                    let mut query = sqlx::query(&sql);
                    for id in chunk {
                        query = query.bind(*id);
                    }
                    for row in query
                        .fetch_all(self.pool.mysql()?)
                        .await
                        .with_context(context)?
                    {
                        found.insert(row.try_get::<i64, _>("id")?);
                    }
                }
            }
        }

        Ok(missing_from(&ids, &found))
    }

    async fn list_for_post(&self, post_id: i64) -> Result<Vec<T>> {
        Ok(self
            .list_for_posts(&[post_id])
            .await?
            .into_iter()
            .map(|(_, term)| term)
            .collect())
    }

    async fn list_for_posts(&self, post_ids: &[i64]) -> Result<Vec<(i64, T)>> {
        let context = || format!("Failed to load {}s for posts", T::DISPLAY_NAME);
        let mut pairs = Vec::new();

        for chunk in post_ids.chunks(BIND_CHUNK) {
            let sql = for_posts_sql::<T>(chunk.len());
            match self.pool.driver() {
                DatabaseDriver::Sqlite => {
                    let mut query = sqlx::query(&sql);
                    for id in chunk {
                        query = query.bind(*id);
                    }
                    for row in query
                        .fetch_all(self.pool.sqlite()?)
                        .await
                        .with_context(context)?
                    {
                        pairs.push((row.try_get("post_id")?, row_to_term_sqlite::<T>(&row)?));
                    }
                }
                DatabaseDriver::Mysql => {
                    let mut query = sqlx::query(&sql);
                    for id in chunk {
                        query = query.bind(*id);
                    }
                    for row in query
                        .fetch_all(self.pool.mysql()?)
                        .await
                        .with_context(context)?
                    {
                        pairs.push((row.try_get("post_id")?, row_to_term_mysql::<T>(&row)?));
                    }
                }
            }
        }

        Ok(pairs)
    }
}

fn row_to_term_sqlite<T: Taxonomy>(row: &sqlx::sqlite::SqliteRow) -> Result<T> {
    Ok(T::from_row(
        row.try_get("id")?,
        row.try_get("title")?,
        row.try_get("user_id")?,
    ))
}

fn row_to_term_mysql<T: Taxonomy>(row: &sqlx::mysql::MySqlRow) -> Result<T> {
    Ok(T::from_row(
        row.try_get("id")?,
        row.try_get("title")?,
        row.try_get("user_id")?,
    ))
}

/// Delete-then-insert a post's links on an open SQLite connection.
///
/// Callers own the transaction; duplicates in `ids` are collapsed.
pub(crate) async fn replace_links_sqlite<T: Taxonomy>(
    conn: &mut SqliteConnection,
    post_id: i64,
    ids: &[i64],
) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE post_id = ?", T::LINK_TABLE))
        .bind(post_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to clear {} links", T::DISPLAY_NAME))?;

    let insert = format!(
        "INSERT INTO {} (post_id, {}) VALUES (?, ?)",
        T::LINK_TABLE,
        T::LINK_COLUMN
    );
    for id in dedup_ids(ids) {
        sqlx::query(&insert)
            .bind(post_id)
            .bind(id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to link {} {}", T::DISPLAY_NAME, id))?;
    }
    Ok(())
}

/// MySQL counterpart of [`replace_links_sqlite`]
pub(crate) async fn replace_links_mysql<T: Taxonomy>(
    conn: &mut MySqlConnection,
    post_id: i64,
    ids: &[i64],
) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE post_id = ?", T::LINK_TABLE))
        .bind(post_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to clear {} links", T::DISPLAY_NAME))?;

    let insert = format!(
        "INSERT INTO {} (post_id, {}) VALUES (?, ?)",
        T::LINK_TABLE,
        T::LINK_COLUMN
    );
    for id in dedup_ids(ids) {
        sqlx::query(&insert)
            .bind(post_id)
            .bind(id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to link {} {}", T::DISPLAY_NAME, id))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Tag, Topic};
    use proptest::prelude::*;
    use sqlx::SqlitePool;

    async fn setup_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    async fn create_test_user(pool: &SqlitePool, email: &str) -> i64 {
        sqlx::query("INSERT INTO users (email, password_hash) VALUES (?, ?)")
            .bind(email)
            .bind("hash123")
            .execute(pool)
            .await
            .expect("Failed to create test user")
            .last_insert_rowid()
    }

    async fn create_test_post(pool: &SqlitePool, user_id: i64) -> i64 {
        sqlx::query("INSERT INTO posts (user_id, title) VALUES (?, 'Post')")
            .bind(user_id)
            .execute(pool)
            .await
            .expect("Failed to create test post")
            .last_insert_rowid()
    }

    /// Rewrite a post's links in a transaction of its own
    async fn link<T: Taxonomy>(pool: &SqlitePool, post_id: i64, ids: &[i64]) -> Result<()> {
        let mut tx = pool.begin().await?;
        replace_links_sqlite::<T>(&mut *tx, post_id, ids).await?;
        tx.commit().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_tag() {
        let pool = setup_pool().await;
        let user_id = create_test_user(pool.sqlite().unwrap(), "a@x.com").await;
        let repo = SqlxTaxonomyRepository::<Tag>::new(pool.clone());

        let created = repo.create(user_id, "Tech").await.expect("Failed to create tag");
        let listed = repo.list_by_owner(user_id, false).await.unwrap();

        assert!(created.id > 0);
        assert_eq!(created.user_id, user_id);
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn test_list_by_owner_scoped_and_ordered() {
        let pool = setup_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let alice = create_test_user(sqlite, "alice@x.com").await;
        let bob = create_test_user(sqlite, "bob@x.com").await;
        let repo = SqlxTaxonomyRepository::<Topic>::new(pool.clone());

        let first_b = repo.create(alice, "B").await.unwrap();
        repo.create(alice, "A").await.unwrap();
        repo.create(alice, "C").await.unwrap();
        let second_b = repo.create(alice, "B").await.unwrap();
        repo.create(bob, "Z").await.unwrap();

        let listed = repo.list_by_owner(alice, false).await.unwrap();
        let titles: Vec<&str> = listed.iter().map(|t| t.title.as_str()).collect();

        assert_eq!(titles, vec!["C", "B", "B", "A"]);
        assert_eq!(listed[1].id, first_b.id);
        assert_eq!(listed[2].id, second_b.id);
    }

    #[tokio::test]
    async fn test_list_assigned_only_returns_each_term_once() {
        let pool = setup_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let user_id = create_test_user(sqlite, "a@x.com").await;
        let first_post = create_test_post(sqlite, user_id).await;
        let second_post = create_test_post(sqlite, user_id).await;
        let repo = SqlxTaxonomyRepository::<Topic>::new(pool.clone());

        let used = repo.create(user_id, "Used").await.unwrap();
        repo.create(user_id, "Unused").await.unwrap();
        link::<Topic>(sqlite, first_post, &[used.id]).await.unwrap();
        link::<Topic>(sqlite, second_post, &[used.id]).await.unwrap();

        let assigned = repo.list_by_owner(user_id, true).await.unwrap();

        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].id, used.id);
    }

    #[tokio::test]
    async fn test_find_missing() {
        let pool = setup_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let alice = create_test_user(sqlite, "alice@x.com").await;
        let bob = create_test_user(sqlite, "bob@x.com").await;
        let repo = SqlxTaxonomyRepository::<Tag>::new(pool.clone());

        let mine = repo.create(alice, "Mine").await.unwrap();
        let theirs = repo.create(bob, "Theirs").await.unwrap();

        let missing = repo
            .find_missing(&[mine.id, 999, theirs.id, 999, 998])
            .await
            .unwrap();

        assert_eq!(missing, vec![999, 998]);
        assert!(repo.find_missing(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_links_replaces_and_dedups() {
        let pool = setup_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let user_id = create_test_user(sqlite, "a@x.com").await;
        let post_id = create_test_post(sqlite, user_id).await;
        let repo = SqlxTaxonomyRepository::<Tag>::new(pool.clone());

        let tech = repo.create(user_id, "Tech").await.unwrap();
        let history = repo.create(user_id, "History").await.unwrap();
        let art = repo.create(user_id, "Art").await.unwrap();

        link::<Tag>(sqlite, post_id, &[tech.id, history.id, tech.id])
            .await
            .unwrap();
        let linked = repo.list_for_post(post_id).await.unwrap();
        assert_eq!(linked.iter().map(|t| t.id).collect::<Vec<_>>(), vec![tech.id, history.id]);

        link::<Tag>(sqlite, post_id, &[art.id]).await.unwrap();
        let linked = repo.list_for_post(post_id).await.unwrap();
        assert_eq!(linked, vec![art]);

        link::<Tag>(sqlite, post_id, &[]).await.unwrap();
        assert!(repo.list_for_post(post_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_links_unknown_id_rolls_back() {
        let pool = setup_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let user_id = create_test_user(sqlite, "a@x.com").await;
        let post_id = create_test_post(sqlite, user_id).await;
        let repo = SqlxTaxonomyRepository::<Tag>::new(pool.clone());
        let tech = repo.create(user_id, "Tech").await.unwrap();
        link::<Tag>(sqlite, post_id, &[tech.id]).await.unwrap();

        let result = link::<Tag>(sqlite, post_id, &[9999]).await;

        assert!(result.is_err());
        assert_eq!(repo.list_for_post(post_id).await.unwrap(), vec![tech]);
    }

    #[tokio::test]
    async fn test_list_for_posts_groups_by_post() {
        let pool = setup_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let user_id = create_test_user(sqlite, "a@x.com").await;
        let first = create_test_post(sqlite, user_id).await;
        let second = create_test_post(sqlite, user_id).await;
        let repo = SqlxTaxonomyRepository::<Topic>::new(pool.clone());
        let travel = repo.create(user_id, "Travel").await.unwrap();
        let food = repo.create(user_id, "Food").await.unwrap();

        link::<Topic>(sqlite, first, &[travel.id]).await.unwrap();
        link::<Topic>(sqlite, second, &[travel.id, food.id]).await.unwrap();

        let pairs = repo.list_for_posts(&[first, second]).await.unwrap();
        let flattened: Vec<(i64, i64)> = pairs.iter().map(|(p, t)| (*p, t.id)).collect();

        assert_eq!(
            flattened,
            vec![(first, travel.id), (second, travel.id), (second, food.id)]
        );
    }

    #[tokio::test]
    async fn test_find_missing_beyond_placeholder_limit() {
        let pool = setup_pool().await;
        let user_id = create_test_user(pool.sqlite().unwrap(), "a@x.com").await;
        let repo = SqlxTaxonomyRepository::<Tag>::new(pool.clone());
        let tech = repo.create(user_id, "Tech").await.unwrap();
        let ids: Vec<i64> = (1..=40_000).collect();

        let missing = repo.find_missing(&ids).await.expect("Large id list failed");

        assert_eq!(missing.len(), ids.len() - 1);
        assert!(!missing.contains(&tech.id));
    }

    #[tokio::test]
    async fn test_list_for_posts_beyond_placeholder_limit() {
        let pool = setup_pool().await;
        let sqlite = pool.sqlite().unwrap();
        let user_id = create_test_user(sqlite, "a@x.com").await;
        let repo = SqlxTaxonomyRepository::<Topic>::new(pool.clone());
        let travel = repo.create(user_id, "Travel").await.unwrap();
        let post = create_test_post(sqlite, user_id).await;
        link::<Topic>(sqlite, post, &[travel.id]).await.unwrap();
        let mut post_ids: Vec<i64> = (100_000..140_000).collect();
        post_ids.push(post);

        let pairs = repo.list_for_posts(&post_ids).await.expect("Large id list failed");

        assert_eq!(pairs, vec![(post, travel)]);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_list_sql_uses_kind_tables() {
        let sql = list_by_owner_sql::<Topic>(true);
        assert!(sql.contains("FROM topics"));
        assert!(sql.contains("post_topics.topic_id = topics.id"));

        let sql = list_by_owner_sql::<Tag>(false);
        assert!(!sql.contains("EXISTS"));
    }

    proptest! {
        #[test]
        fn prop_dedup_ids_keeps_first_occurrence(ids in proptest::collection::vec(0i64..20, 0..40)) {
            let deduped = dedup_ids(&ids);
            let unique: HashSet<i64> = ids.iter().copied().collect();

            prop_assert_eq!(deduped.len(), unique.len());
            for (idx, id) in deduped.iter().enumerate() {
                let first = ids.iter().position(|x| x == id).unwrap();
                prop_assert!(deduped[..idx].iter().all(|prev| ids.iter().position(|x| x == prev).unwrap() < first));
            }
        }
    }
}

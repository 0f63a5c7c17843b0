//! Post API endpoints
//!
//! - GET /api/v1/posts - Owner's posts, `?tags=1,2&topics=3` filters
//! - POST /api/v1/posts - Create a post
//! - GET /api/v1/posts/{id} - Post detail with nested tags and topics
//! - PUT /api/v1/posts/{id} - Full update
//! - PATCH /api/v1/posts/{id} - Partial update
//! - POST /api/v1/posts/{id}/upload-image - Attach an image (multipart
//!   field `image`)

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{
    PostDetailResponse, PostFilter, PostImageResponse, PostInput, PostSummary, UpdateMode,
};
use crate::services::FieldErrors;

/// Multipart overhead allowed on top of the configured file size
const MULTIPART_SLACK: usize = 64 * 1024;

/// Query parameters for post listing
#[derive(Debug, Default, Deserialize)]
pub struct ListPostsQuery {
    /// Comma-separated tag ids
    pub tags: Option<String>,
    /// Comma-separated topic ids
    pub topics: Option<String>,
}

impl ListPostsQuery {
    fn to_filter(&self) -> Result<PostFilter, ApiError> {
        Ok(PostFilter {
            tag_ids: parse_id_list("tags", self.tags.as_deref())?,
            topic_ids: parse_id_list("topics", self.topics.as_deref())?,
        })
    }
}

/// Parse `"1,2,3"` into ids. Absent or empty means no filter.
fn parse_id_list(param: &str, raw: Option<&str>) -> Result<Vec<i64>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(|part| {
            part.trim().parse::<i64>().map_err(|_| {
                ApiError::validation_error(format!(
                    "{} must be a comma-separated list of ids, got '{}'",
                    param, raw
                ))
            })
        })
        .collect()
}

/// Build the posts router
pub fn router(max_file_size: u64) -> Router<AppState> {
    let upload_limit = usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK);

    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/{id}",
            get(get_post).put(replace_post).patch(patch_post),
        )
        .route(
            "/posts/{id}/upload-image",
            post(upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
}

/// GET /api/v1/posts
async fn list_posts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<Vec<PostSummary>>, ApiError> {
    let filter = query.to_filter()?;
    let posts = state.post_service.list(user.0.id, &filter).await?;

    Ok(Json(posts.into_iter().map(PostSummary::from).collect()))
}

/// POST /api/v1/posts
async fn create_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<PostInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    let detail = state.post_service.create(user.0.id, body).await?;

    Ok((StatusCode::CREATED, Json(PostDetailResponse::from(detail))))
}

/// GET /api/v1/posts/{id}
async fn get_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<PostDetailResponse>, ApiError> {
    let Path(id) = path?;
    let detail = state.post_service.get(id, user.0.id).await?;

    Ok(Json(detail.into()))
}

/// PUT /api/v1/posts/{id}
async fn replace_post(
    state: State<AppState>,
    user: AuthenticatedUser,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PostInput>, JsonRejection>,
) -> Result<Json<PostDetailResponse>, ApiError> {
    update_post(state, user, path, payload, UpdateMode::Full).await
}

/// PATCH /api/v1/posts/{id}
async fn patch_post(
    state: State<AppState>,
    user: AuthenticatedUser,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PostInput>, JsonRejection>,
) -> Result<Json<PostDetailResponse>, ApiError> {
    update_post(state, user, path, payload, UpdateMode::Partial).await
}

async fn update_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PostInput>, JsonRejection>,
    mode: UpdateMode,
) -> Result<Json<PostDetailResponse>, ApiError> {
    let Path(id) = path?;
    let Json(body) = payload?;
    let detail = state
        .post_service
        .update(id, user.0.id, body, mode)
        .await?;

    Ok(Json(detail.into()))
}

/// POST /api/v1/posts/{id}/upload-image
async fn upload_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    path: Result<Path<i64>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PostImageResponse>, ApiError> {
    let Path(id) = path?;
    let mut multipart = multipart?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await?;

        let post = state
            .post_service
            .attach_image(id, user.0.id, filename.as_deref(), &data)
            .await?;

        return Ok(Json(PostImageResponse::from(&post)));
    }

    // Ownership is checked before complaining about the payload
    state.post_service.get(id, user.0.id).await?;
    Err(ApiError::invalid_fields(&FieldErrors::single(
        "image",
        "No file was submitted.",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{get, json_request, multipart_request, send, signup, TestApp};
    use crate::services::media::test_images;
    use axum::http::Method;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    async fn create(app: &TestApp, token: &str, uri: &str, body: Value) -> Value {
        let (status, body) = send(
            &app.router,
            json_request(Method::POST, uri, Some(token), body),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }

    fn ids(list: &Value) -> Vec<i64> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("tags", None).unwrap(), Vec::<i64>::new());
        assert_eq!(parse_id_list("tags", Some("")).unwrap(), Vec::<i64>::new());
        assert_eq!(parse_id_list("tags", Some("1, 2,3")).unwrap(), vec![1, 2, 3]);
        assert!(parse_id_list("tags", Some("1,x")).is_err());
        assert!(parse_id_list("tags", Some("1,,2")).is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_id_list_accepts_joined_ids(values in proptest::collection::vec(any::<i64>(), 1..8)) {
            let raw = values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",");
            prop_assert_eq!(parse_id_list("topics", Some(&raw)).unwrap(), values);
        }
    }

    #[tokio::test]
    async fn test_create_post_with_two_tags() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;
        let tech = create(&app, &token, "/api/v1/tags", json!({"title": "Tech"})).await;
        let history = create(&app, &token, "/api/v1/tags", json!({"title": "History"})).await;

        let post = create(
            &app,
            &token,
            "/api/v1/posts",
            json!({"title": "Sample post", "tags": [tech["id"], history["id"]]}),
        )
        .await;

        assert_eq!(post["content"], "");
        assert_eq!(post["tags"].as_array().unwrap().len(), 2);
        assert!(post["tags"][0]["title"].is_string());
        assert_eq!(post["image"], Value::Null);

        let uri = format!("/api/v1/posts/{}", post["id"]);
        let (status, detail) = send(&app.router, get(&uri, Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        let mut titles: Vec<&str> = detail["tags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["History", "Tech"]);
    }

    #[tokio::test]
    async fn test_create_post_unknown_tag_is_400() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;

        let (status, body) = send(
            &app.router,
            json_request(
                Method::POST,
                "/api/v1/posts",
                Some(&token),
                json!({"title": "Post", "tags": [12345]}),
            ),
        )
        .await;
        let (_, listed) = send(&app.router, get("/api/v1/posts", Some(&token))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["tags"].is_array());
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn test_list_filters_by_tags_and_topics() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;
        let tech = create(&app, &token, "/api/v1/tags", json!({"title": "Tech"})).await;
        let rust = create(&app, &token, "/api/v1/topics", json!({"title": "Rust"})).await;
        let tagged = create(
            &app,
            &token,
            "/api/v1/posts",
            json!({"title": "Tagged", "tags": [tech["id"]]}),
        )
        .await;
        let both = create(
            &app,
            &token,
            "/api/v1/posts",
            json!({"title": "Both", "tags": [tech["id"]], "topics": [rust["id"]]}),
        )
        .await;
        create(&app, &token, "/api/v1/posts", json!({"title": "Plain"})).await;

        let by_tag = format!("/api/v1/posts?tags={}", tech["id"]);
        let (_, listed) = send(&app.router, get(&by_tag, Some(&token))).await;
        assert_eq!(
            ids(&listed),
            vec![tagged["id"].as_i64().unwrap(), both["id"].as_i64().unwrap()]
        );
        assert_eq!(listed[0]["tags"], json!([tech["id"]]));

        let by_both = format!("/api/v1/posts?tags={}&topics={}", tech["id"], rust["id"]);
        let (_, listed) = send(&app.router, get(&by_both, Some(&token))).await;
        assert_eq!(ids(&listed), vec![both["id"].as_i64().unwrap()]);

        let (status, _) = send(&app.router, get("/api/v1/posts?tags=1,abc", Some(&token))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_with_many_filter_ids() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;
        let tech = create(&app, &token, "/api/v1/tags", json!({"title": "Tech"})).await;
        let tagged = create(
            &app,
            &token,
            "/api/v1/posts",
            json!({"title": "Tagged", "tags": [tech["id"]]}),
        )
        .await;
        let many: Vec<String> = (1..=40_000).map(|id| id.to_string()).collect();

        let uri = format!("/api/v1/posts?tags={}", many.join(","));
        let (status, listed) = send(&app.router, get(&uri, Some(&token))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&listed), vec![tagged["id"].as_i64().unwrap()]);
    }

    #[tokio::test]
    async fn test_put_clears_and_patch_replaces_tags() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;
        let tech = create(&app, &token, "/api/v1/tags", json!({"title": "Tech"})).await;
        let history = create(&app, &token, "/api/v1/tags", json!({"title": "History"})).await;
        let post = create(
            &app,
            &token,
            "/api/v1/posts",
            json!({"title": "Post", "content": "body", "tags": [tech["id"]]}),
        )
        .await;
        let uri = format!("/api/v1/posts/{}", post["id"]);

        let (status, patched) = send(
            &app.router,
            json_request(Method::PATCH, &uri, Some(&token), json!({"title": "Renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["title"], "Renamed");
        assert_eq!(patched["content"], "body");
        assert_eq!(patched["tags"].as_array().unwrap().len(), 1);

        let (_, patched) = send(
            &app.router,
            json_request(Method::PATCH, &uri, Some(&token), json!({"tags": [history["id"]]})),
        )
        .await;
        assert_eq!(patched["tags"], json!([{"id": history["id"], "title": "History"}]));

        let (status, put) = send(
            &app.router,
            json_request(Method::PUT, &uri, Some(&token), json!({"title": "Full"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(put["content"], "");
        assert_eq!(put["tags"], json!([]));

        let (status, _) = send(
            &app.router,
            json_request(Method::PUT, &uri, Some(&token), json!({"content": "no title"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_foreign_post_is_404() {
        let app = TestApp::new().await;
        let alice = signup(&app.router, "alice@x.com").await;
        let bob = signup(&app.router, "bob@x.com").await;
        let post = create(&app, &alice, "/api/v1/posts", json!({"title": "Hers"})).await;
        let uri = format!("/api/v1/posts/{}", post["id"]);

        let (read, _) = send(&app.router, get(&uri, Some(&bob))).await;
        let (write, _) = send(
            &app.router,
            json_request(Method::PATCH, &uri, Some(&bob), json!({"title": "Mine"})),
        )
        .await;
        let upload_uri = format!("{}/upload-image", uri);
        let (upload, _) = send(
            &app.router,
            multipart_request(&upload_uri, &bob, "image", "a.png", &test_images::png()),
        )
        .await;
        let (_, listed) = send(&app.router, get("/api/v1/posts", Some(&bob))).await;

        assert_eq!(read, StatusCode::NOT_FOUND);
        assert_eq!(write, StatusCode::NOT_FOUND);
        assert_eq!(upload, StatusCode::NOT_FOUND);
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn test_non_numeric_post_id_is_404() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;

        let (status, _) = send(&app.router, get("/api/v1/posts/abc", Some(&token))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cross_owner_tag_is_accepted() {
        let app = TestApp::new().await;
        let alice = signup(&app.router, "alice@x.com").await;
        let bob = signup(&app.router, "bob@x.com").await;
        let bobs = create(&app, &bob, "/api/v1/tags", json!({"title": "Bob's"})).await;

        let post = create(
            &app,
            &alice,
            "/api/v1/posts",
            json!({"title": "Borrowed", "tags": [bobs["id"]]}),
        )
        .await;

        assert_eq!(post["tags"][0]["id"], bobs["id"]);
    }

    #[tokio::test]
    async fn test_upload_image_and_reject_non_image() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;
        let post = create(&app, &token, "/api/v1/posts", json!({"title": "Pic"})).await;
        let uri = format!("/api/v1/posts/{}/upload-image", post["id"]);

        let (status, uploaded) = send(
            &app.router,
            multipart_request(&uri, &token, "image", "photo.PNG", &test_images::png()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(uploaded["id"], post["id"]);
        let url = uploaded["image"].as_str().unwrap().to_string();
        assert!(url.starts_with("/media/uploads/post/"));
        assert!(url.ends_with(".png"));
        let stored = url.trim_start_matches("/media/");
        assert!(app.media_dir.path().join(stored).exists());

        let (status, body) = send(
            &app.router,
            multipart_request(&uri, &token, "image", "notes.txt", b"not an image"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_IMAGE");

        let detail_uri = format!("/api/v1/posts/{}", post["id"]);
        let (_, detail) = send(&app.router, get(&detail_uri, Some(&token))).await;
        assert_eq!(detail["image"], Value::String(url.clone()));

        let (status, _) = send(&app.router, get(&url, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_without_image_field_is_400() {
        let app = TestApp::new().await;
        let token = signup(&app.router, "a@x.com").await;
        let post = create(&app, &token, "/api/v1/posts", json!({"title": "Pic"})).await;
        let uri = format!("/api/v1/posts/{}/upload-image", post["id"]);

        let (status, body) = send(
            &app.router,
            multipart_request(&uri, &token, "file", "a.png", &test_images::png()),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["image"].is_array());
    }

    #[tokio::test]
    async fn test_posts_require_auth() {
        let app = TestApp::new().await;

        for (method, uri) in [
            (Method::GET, "/api/v1/posts"),
            (Method::POST, "/api/v1/posts"),
            (Method::GET, "/api/v1/posts/1"),
            (Method::PUT, "/api/v1/posts/1"),
            (Method::PATCH, "/api/v1/posts/1"),
            (Method::POST, "/api/v1/posts/1/upload-image"),
        ] {
            let (status, _) =
                send(&app.router, json_request(method, uri, None, json!({"title": "x"}))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}

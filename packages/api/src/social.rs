//! Community feed: posts, likes and comments.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use store::models::{CommentEntry, FeedEntry, NewComment, NewPost, NotificationKind, User};
use store::{Page, PageRequest};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::messaging::MAX_BODY_CHARS;
use crate::notifications::{self, Notice};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PostInput {
    pub body: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentInput {
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: i32,
}

fn validate_text(body: &str, what: &str) -> ApiResult<String> {
    let body = body.trim();
    let len = body.chars().count();
    if len == 0 || len > MAX_BODY_CHARS {
        return Err(ApiError::bad_request(format!(
            "{what} must be between 1 and {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(body.to_string())
}

/// A post that is not deleted, as seen by `viewer`.
async fn visible_post(state: &AppState, viewer: Uuid, post_id: Uuid) -> ApiResult<FeedEntry> {
    state
        .store
        .feed_entry(viewer, post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post"))
}

pub async fn create_post(state: &AppState, user: &User, input: PostInput) -> ApiResult<FeedEntry> {
    let body = validate_text(&input.body, "Post")?;
    let post = state
        .store
        .create_post(NewPost {
            author_id: user.id,
            body,
            image_url: input.image_url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
            created_at: Utc::now(),
        })
        .await?;
    visible_post(state, user.id, post.id).await
}

pub async fn feed(state: &AppState, viewer: Uuid, page: PageRequest) -> ApiResult<Page<FeedEntry>> {
    let (items, total) = state
        .store
        .feed(viewer, page.offset(), page.per_page())
        .await?;
    Ok(Page::new(items, page, total))
}

pub async fn delete_post(state: &AppState, user: &User, post_id: Uuid) -> ApiResult<()> {
    let post = state
        .store
        .find_post(post_id)
        .await?
        .filter(|p| p.deleted_at.is_none() && (p.author_id == user.id || user.is_admin()))
        .ok_or_else(|| ApiError::not_found("Post"))?;
    state.store.soft_delete_post(post.id, Utc::now()).await?;
    Ok(())
}

pub async fn like(state: &AppState, user_id: Uuid, post_id: Uuid) -> ApiResult<LikeState> {
    visible_post(state, user_id, post_id).await?;
    state.store.like_post(post_id, user_id, Utc::now()).await?;
    let entry = visible_post(state, user_id, post_id).await?;
    Ok(LikeState {
        liked: entry.liked_by_me,
        like_count: entry.post.like_count,
    })
}

pub async fn unlike(state: &AppState, user_id: Uuid, post_id: Uuid) -> ApiResult<LikeState> {
    visible_post(state, user_id, post_id).await?;
    state.store.unlike_post(post_id, user_id).await?;
    let entry = visible_post(state, user_id, post_id).await?;
    Ok(LikeState {
        liked: entry.liked_by_me,
        like_count: entry.post.like_count,
    })
}

pub async fn comment(state: &AppState, user: &User, post_id: Uuid, body: &str) -> ApiResult<CommentEntry> {
    let body = validate_text(body, "Comment")?;
    let post = visible_post(state, user.id, post_id).await?.post;
    let comment = state
        .store
        .add_comment(NewComment {
            post_id,
            author_id: user.id,
            body,
            created_at: Utc::now(),
        })
        .await?;

    if post.author_id != user.id {
        notifications::notify(
            state,
            post.author_id,
            Notice::new(
                NotificationKind::Social,
                format!("{} commented on your post", user.name),
                comment.body.chars().take(120).collect::<String>(),
            )
            .link(format!("/feed/{post_id}")),
        )
        .await?;
    }
    Ok(CommentEntry {
        comment,
        author: user.to_summary(),
    })
}

pub async fn list_comments(state: &AppState, viewer: Uuid, post_id: Uuid) -> ApiResult<Vec<CommentEntry>> {
    visible_post(state, viewer, post_id).await?;
    Ok(state.store.comments(post_id).await?)
}

async fn index(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<Page<FeedEntry>>> {
    feed(&state, user.id, page).await.map(Json)
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<PostInput>,
) -> ApiResult<(StatusCode, Json<FeedEntry>)> {
    let entry = create_post(&state, &user, input).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<FeedEntry>> {
    visible_post(&state, user.id, id).await.map(Json)
}

async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    delete_post(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LikeState>> {
    like(&state, user.id, id).await.map(Json)
}

async fn unlike_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LikeState>> {
    unlike(&state, user.id, id).await.map(Json)
}

async fn comments(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<CommentEntry>>> {
    list_comments(&state, user.id, id).await.map(Json)
}

async fn add_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<CommentInput>,
) -> ApiResult<(StatusCode, Json<CommentEntry>)> {
    let entry = comment(&state, &user, id, &input.body).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feed", get(index).post(create))
        .route("/feed/{id}", get(show).delete(delete))
        .route("/feed/{id}/like", post(like_handler).delete(unlike_handler))
        .route("/feed/{id}/comments", get(comments).post(add_comment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use store::models::Role;

    fn post_input(body: &str) -> PostInput {
        PostInput {
            body: body.into(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let state = testing::state();
        let author = testing::user(&state, "mara@example.org", Role::Member).await;
        let fan = testing::user(&state, "nell@example.org", Role::Member).await;
        let post = create_post(&state, &author, post_input("First day on the job!")).await.unwrap();

        let once = like(&state, fan.id, post.post.id).await.unwrap();
        let twice = like(&state, fan.id, post.post.id).await.unwrap();
        assert!(once.liked && twice.liked);
        assert_eq!(twice.like_count, 1);

        let gone = unlike(&state, fan.id, post.post.id).await.unwrap();
        assert!(!gone.liked);
        assert_eq!(gone.like_count, 0);
        assert_eq!(unlike(&state, fan.id, post.post.id).await.unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn test_comments_notify_author() {
        let state = testing::state();
        let author = testing::user(&state, "mara@example.org", Role::Member).await;
        let friend = testing::user(&state, "nell@example.org", Role::Member).await;
        let post = create_post(&state, &author, post_input("Hello mob")).await.unwrap().post;

        comment(&state, &author, post.id, "own comment").await.unwrap();
        comment(&state, &friend, post.id, "Deadly!").await.unwrap();

        let comments = list_comments(&state, friend.id, post.id).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].comment.body, "Deadly!");
        assert_eq!(visible_post(&state, author.id, post.id).await.unwrap().post.comment_count, 2);
        assert_eq!(state.store.list_notifications(author.id, false, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_author_or_admin_deletes() {
        let state = testing::state();
        let author = testing::user(&state, "mara@example.org", Role::Member).await;
        let other = testing::user(&state, "nell@example.org", Role::Member).await;
        let admin = testing::user(&state, "admin@example.org", Role::Admin).await;
        let first = create_post(&state, &author, post_input("one")).await.unwrap().post;
        let second = create_post(&state, &author, post_input("two")).await.unwrap().post;

        assert!(matches!(delete_post(&state, &other, first.id).await, Err(ApiError::NotFound(_))));
        delete_post(&state, &author, first.id).await.unwrap();
        delete_post(&state, &admin, second.id).await.unwrap();

        assert!(matches!(visible_post(&state, author.id, first.id).await, Err(ApiError::NotFound(_))));
        assert_eq!(feed(&state, author.id, PageRequest::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_empty_post_rejected() {
        let state = testing::state();
        let author = testing::user(&state, "mara@example.org", Role::Member).await;
        assert!(matches!(
            create_post(&state, &author, post_input("   ")).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}

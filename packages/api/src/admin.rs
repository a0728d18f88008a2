//! Admin dashboard: platform statistics and user management.
//!
//! Every route takes [`AdminUser`], so non-admins get a 403 before any work is done.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use store::models::{PlatformStats, Role, TokenKind, User, UserInfo};
use store::{Page, PageRequest};
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Window for the "new" counters on the dashboard.
pub const STATS_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Default, Deserialize)]
pub struct UserSearch {
    pub q: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RoleInput {
    pub role: Role,
}

pub async fn stats(state: &AppState) -> ApiResult<PlatformStats> {
    let since = Utc::now() - Duration::days(STATS_WINDOW_DAYS);
    Ok(state.store.platform_stats(since).await?)
}

pub async fn list_users(state: &AppState, search: UserSearch) -> ApiResult<Page<UserInfo>> {
    let page = PageRequest {
        page: search.page,
        per_page: search.per_page,
    };
    let query = search.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let (users, total) = state
        .store
        .list_users(query, page.offset(), page.per_page())
        .await?;
    Ok(Page::new(users.iter().map(User::to_info).collect(), page, total))
}

pub async fn set_role(state: &AppState, admin: &User, user_id: Uuid, role: Role) -> ApiResult<UserInfo> {
    if admin.id == user_id && role != Role::Admin {
        return Err(ApiError::bad_request("You cannot remove your own admin role"));
    }
    let user = state.store.set_role(user_id, role, Utc::now()).await?;
    tracing::info!(admin_id = %admin.id, user_id = %user_id, role = %role, "role changed");
    Ok(user.to_info())
}

pub async fn deactivate_user(state: &AppState, admin: &User, user_id: Uuid) -> ApiResult<()> {
    if admin.id == user_id {
        return Err(ApiError::bad_request("You cannot deactivate your own account"));
    }
    state.store.deactivate_user(user_id, Utc::now()).await?;
    state
        .store
        .revoke_user_tokens(
            user_id,
            &[TokenKind::Access, TokenKind::Refresh, TokenKind::PasswordReset],
        )
        .await?;
    tracing::info!(admin_id = %admin.id, user_id = %user_id, "user deactivated");
    Ok(())
}

async fn stats_handler(State(state): State<AppState>, AdminUser(_): AdminUser) -> ApiResult<Json<PlatformStats>> {
    stats(&state).await.map(Json)
}

async fn users(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(search): Query<UserSearch>,
) -> ApiResult<Json<Page<UserInfo>>> {
    list_users(&state, search).await.map(Json)
}

async fn role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(input): Json<RoleInput>,
) -> ApiResult<Json<UserInfo>> {
    set_role(&state, &admin, id, input.role).await.map(Json)
}

async fn deactivate(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deactivate_user(&state, &admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(stats_handler))
        .route("/admin/users", get(users))
        .route("/admin/users/{id}/role", patch(role))
        .route("/admin/users/{id}/deactivate", post(deactivate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens;
    use crate::testing;

    #[tokio::test]
    async fn test_stats_count_by_role() {
        let state = testing::state();
        testing::user(&state, "admin@example.org", Role::Admin).await;
        testing::user(&state, "a@example.org", Role::Member).await;
        testing::user(&state, "b@example.org", Role::Member).await;
        let stats = stats(&state).await.unwrap();
        assert_eq!(stats.users_by_role.get("member"), Some(&2));
        assert_eq!(stats.new_users, 3);
    }

    #[tokio::test]
    async fn test_deactivate_revokes_access() {
        let state = testing::state();
        let admin = testing::user(&state, "admin@example.org", Role::Admin).await;
        let user = testing::user(&state, "a@example.org", Role::Member).await;
        let pair = tokens::issue_pair(&state, user.id).await.unwrap();

        assert!(matches!(
            deactivate_user(&state, &admin, admin.id).await,
            Err(ApiError::BadRequest(_))
        ));
        deactivate_user(&state, &admin, user.id).await.unwrap();
        assert!(tokens::authenticate(&state, &pair.access_token).await.is_err());
        assert_eq!(list_users(&state, UserSearch::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_set_role() {
        let state = testing::state();
        let admin = testing::user(&state, "admin@example.org", Role::Admin).await;
        let user = testing::user(&state, "a@example.org", Role::Member).await;
        let updated = set_role(&state, &admin, user.id, Role::Mentor).await.unwrap();
        assert_eq!(updated.role, Role::Mentor);
        assert!(set_role(&state, &admin, admin.id, Role::Member).await.is_err());
    }
}

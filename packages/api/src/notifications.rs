//! In-app notifications.
//!
//! Every notification is stored, then pushed to the owner's open sockets as a
//! `notification:new` event.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use store::models::{NewNotification, Notification, NotificationKind};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::realtime::{Event, NOTIFICATION_NEW};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

/// Content of a notification before it is addressed and stamped.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

impl Notice {
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            link: None,
        }
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Store a notification for the user and publish it.
pub async fn notify(state: &AppState, user_id: Uuid, notice: Notice) -> ApiResult<Notification> {
    let notification = state
        .store
        .create_notification(NewNotification {
            user_id,
            kind: notice.kind,
            title: notice.title,
            body: notice.body,
            link: notice.link,
            created_at: Utc::now(),
        })
        .await?;
    state
        .hub
        .publish(user_id, Event::new(NOTIFICATION_NEW, &notification));
    Ok(notification)
}

pub async fn notify_all(state: &AppState, user_ids: impl IntoIterator<Item = Uuid>, notice: Notice) -> ApiResult<()> {
    for user_id in user_ids {
        notify(state, user_id, notice.clone()).await?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub items: Vec<Notification>,
    /// All of the user's unread notifications, not just those in `items`.
    pub unread_count: i64,
}

pub async fn list_notifications(state: &AppState, user_id: Uuid, params: ListParams) -> ApiResult<NotificationList> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let items = state
        .store
        .list_notifications(user_id, params.unread_only, limit)
        .await?;
    let unread_count = state.store.count_unread_notifications(user_id).await?;
    Ok(NotificationList { items, unread_count })
}

async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<NotificationList>> {
    list_notifications(&state, user.id, params).await.map(Json)
}

async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.store.mark_notification_read(id, user.id, Utc::now()).await? {
        return Err(ApiError::not_found("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<serde_json::Value>> {
    let updated = state
        .store
        .mark_all_notifications_read(user.id, Utc::now())
        .await?;
    Ok(Json(json!({ "updated": updated })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}/read", post(mark_read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use store::models::Role;

    #[tokio::test]
    async fn test_notify_stores_and_publishes() {
        let state = testing::state();
        let user = testing::user(&state, "ngaire@example.org", Role::Member).await;
        let mut subscription = state.hub.subscribe(user.id);

        let created = notify(
            &state,
            user.id,
            Notice::new(NotificationKind::System, "Hello", "Welcome aboard").link("/feed"),
        )
        .await
        .unwrap();

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.event, NOTIFICATION_NEW);
        assert_eq!(event.data["id"], created.id.to_string());

        let stored = state.store.list_notifications(user.id, true, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].link.as_deref(), Some("/feed"));
    }

    #[tokio::test]
    async fn test_unread_count_covers_more_than_one_page() {
        let state = testing::state();
        let user = testing::user(&state, "odette@example.org", Role::Member).await;
        for i in 0..3 {
            notify(&state, user.id, Notice::new(NotificationKind::System, "Ping", format!("#{i}")))
                .await
                .unwrap();
        }

        let page = list_notifications(&state, user.id, ListParams { unread_only: false, limit: Some(1) })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.unread_count, 3);

        state.store.mark_notification_read(page.items[0].id, user.id, Utc::now()).await.unwrap();
        let page = list_notifications(&state, user.id, ListParams::default()).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.unread_count, 2);
    }
}

//! # Direct and group messaging
//!
//! Every read and write checks that the caller participates in the conversation.
//! Outsiders get a 404, so the existence of a conversation is never revealed.
//!
//! Sending a message is one store call that inserts the row, stamps the
//! conversation's activity and bumps the unread counters of the other members.
//! The message is then pushed to every member's sockets and the other members
//! get a notification.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use store::models::{
    ConversationKind, ConversationSummary, Message, NewConversation, NewMessage, NotificationKind, Participant,
};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::notifications::{self, Notice};
use crate::realtime::{Event, CONVERSATION_READ, MESSAGE_DELETED, MESSAGE_NEW};
use crate::state::AppState;

pub const DEFAULT_MESSAGE_LIMIT: i64 = 50;
pub const MAX_MESSAGE_LIMIT: i64 = 100;
pub const MAX_BODY_CHARS: usize = 5000;
const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Deserialize)]
pub struct CreateConversationInput {
    pub participant_ids: Vec<Uuid>,
    pub title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedConversation {
    #[serde(flatten)]
    pub conversation: ConversationSummary,
    /// True when an existing direct conversation was returned instead of a new one.
    #[serde(rename = "isExisting", alias = "is_existing")]
    pub is_existing: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// One page of messages in chronological order.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    pub items: Vec<Message>,
    pub has_more: bool,
    /// Pass as `before` to fetch the next older page.
    pub next_cursor: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct MessageInput {
    pub body: String,
}

/// Trimmed body, checked for length.
pub fn validate_body(body: &str) -> ApiResult<String> {
    let body = body.trim();
    let len = body.chars().count();
    if len == 0 || len > MAX_BODY_CHARS {
        return Err(ApiError::bad_request(format!(
            "Message must be between 1 and {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(body.to_string())
}

fn preview(body: &str) -> String {
    let mut preview: String = body.chars().take(PREVIEW_CHARS).collect();
    if body.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

async fn require_participant(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> ApiResult<Participant> {
    state
        .store
        .participant(conversation_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation"))
}

async fn member_ids(state: &AppState, conversation_id: Uuid) -> ApiResult<Vec<Uuid>> {
    Ok(state
        .store
        .participants(conversation_id)
        .await?
        .into_iter()
        .map(|p| p.user_id)
        .collect())
}

/// A non-deleted message sent by the user; anything else is a 404.
async fn own_message(state: &AppState, user_id: Uuid, message_id: Uuid) -> ApiResult<Message> {
    state
        .store
        .find_message(message_id)
        .await?
        .filter(|m| m.sender_id == user_id && m.deleted_at.is_none())
        .ok_or_else(|| ApiError::not_found("Message"))
}

pub async fn list_conversations(state: &AppState, user_id: Uuid) -> ApiResult<Vec<ConversationSummary>> {
    Ok(state.store.list_conversations(user_id).await?)
}

pub async fn create_conversation(
    state: &AppState,
    user_id: Uuid,
    input: CreateConversationInput,
) -> ApiResult<CreatedConversation> {
    let others: BTreeSet<Uuid> = input
        .participant_ids
        .into_iter()
        .filter(|id| *id != user_id)
        .collect();
    if others.is_empty() {
        return Err(ApiError::bad_request("At least one other participant is required"));
    }

    let ids: Vec<Uuid> = others.iter().copied().collect();
    let found = state.store.users_by_ids(&ids).await?;
    if found.len() != ids.len() {
        return Err(ApiError::not_found("User"));
    }

    if let [other] = ids.as_slice() {
        if let Some(existing) = state.store.find_direct_conversation(user_id, *other).await? {
            let conversation = state
                .store
                .conversation_summary(existing.id, user_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Conversation"))?;
            return Ok(CreatedConversation {
                conversation,
                is_existing: true,
            });
        }
    }

    let kind = if ids.len() == 1 {
        ConversationKind::Direct
    } else {
        ConversationKind::Group
    };
    let title = input
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && kind == ConversationKind::Group);

    let mut participant_ids = vec![user_id];
    participant_ids.extend(ids);
    let conversation = state
        .store
        .create_conversation(NewConversation {
            kind,
            title,
            created_by: user_id,
            participant_ids,
            created_at: Utc::now(),
        })
        .await?;
    tracing::info!(conversation_id = %conversation.id, kind = %kind, "conversation created");

    let conversation = state
        .store
        .conversation_summary(conversation.id, user_id)
        .await?
        .ok_or_else(|| ApiError::Internal("created conversation has no summary".into()))?;
    Ok(CreatedConversation {
        conversation,
        is_existing: false,
    })
}

pub async fn get_conversation(state: &AppState, user_id: Uuid, conversation_id: Uuid) -> ApiResult<ConversationSummary> {
    state
        .store
        .conversation_summary(conversation_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation"))
}

pub async fn list_messages(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    query: MessageQuery,
) -> ApiResult<MessagePage> {
    require_participant(state, conversation_id, user_id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MESSAGE_LIMIT)
        .clamp(1, MAX_MESSAGE_LIMIT);

    // One extra row tells whether an older page exists.
    let mut items = state
        .store
        .list_messages(conversation_id, query.before, limit + 1)
        .await?;
    let has_more = items.len() as i64 > limit;
    items.truncate(limit as usize);
    items.reverse();

    let next_cursor = if has_more {
        items.first().map(|m| m.created_at)
    } else {
        None
    };
    Ok(MessagePage {
        items,
        has_more,
        next_cursor,
    })
}

pub async fn send_message(state: &AppState, user_id: Uuid, conversation_id: Uuid, body: &str) -> ApiResult<Message> {
    let body = validate_body(body)?;
    require_participant(state, conversation_id, user_id).await?;

    let message = state
        .store
        .insert_message(NewMessage {
            conversation_id,
            sender_id: user_id,
            body,
            created_at: Utc::now(),
        })
        .await?;

    let members = member_ids(state, conversation_id).await?;
    state
        .hub
        .publish_many(members.iter().copied(), &Event::new(MESSAGE_NEW, &message));

    let sender_name = state
        .store
        .find_user(user_id)
        .await?
        .map(|u| u.name)
        .unwrap_or_default();
    notifications::notify_all(
        state,
        members.into_iter().filter(|id| *id != user_id),
        Notice::new(
            NotificationKind::Message,
            format!("New message from {sender_name}"),
            preview(&message.body),
        )
        .link(format!("/messages/{conversation_id}")),
    )
    .await?;

    Ok(message)
}

pub async fn mark_read(state: &AppState, user_id: Uuid, conversation_id: Uuid) -> ApiResult<()> {
    require_participant(state, conversation_id, user_id).await?;
    state.store.mark_read(conversation_id, user_id, Utc::now()).await?;
    let members = member_ids(state, conversation_id).await?;
    state.hub.publish_many(
        members,
        &Event::new(
            CONVERSATION_READ,
            json!({ "conversation_id": conversation_id, "user_id": user_id }),
        ),
    );
    Ok(())
}

pub async fn edit_message(state: &AppState, user_id: Uuid, message_id: Uuid, body: &str) -> ApiResult<Message> {
    let message = own_message(state, user_id, message_id).await?;
    let body = validate_body(body)?;
    Ok(state
        .store
        .update_message_body(message.id, &body, Utc::now())
        .await?)
}

pub async fn delete_message(state: &AppState, user_id: Uuid, message_id: Uuid) -> ApiResult<()> {
    let message = own_message(state, user_id, message_id).await?;
    state.store.soft_delete_message(message.id, Utc::now()).await?;
    let members = member_ids(state, message.conversation_id).await?;
    state.hub.publish_many(
        members,
        &Event::new(
            MESSAGE_DELETED,
            json!({ "conversation_id": message.conversation_id, "message_id": message.id }),
        ),
    );
    Ok(())
}

async fn conversations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    list_conversations(&state, user.id).await.map(Json)
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateConversationInput>,
) -> ApiResult<(StatusCode, Json<CreatedConversation>)> {
    let created = create_conversation(&state, user.id, input).await?;
    let status = if created.is_existing {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(created)))
}

async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConversationSummary>> {
    get_conversation(&state, user.id, id).await.map(Json)
}

async fn messages(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<MessagePage>> {
    list_messages(&state, user.id, id, query).await.map(Json)
}

async fn send(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<MessageInput>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = send_message(&state, user.id, id, &input.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    mark_read(&state, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unread(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<serde_json::Value>> {
    let total = state.store.unread_total(user.id).await?;
    Ok(Json(json!({ "unread": total })))
}

async fn edit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<MessageInput>,
) -> ApiResult<Json<Message>> {
    edit_message(&state, user.id, id, &input.body).await.map(Json)
}

async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    delete_message(&state, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(conversations).post(create))
        .route("/conversations/unread", get(unread))
        .route("/conversations/{id}", get(show))
        .route("/conversations/{id}/messages", get(messages).post(send))
        .route("/conversations/{id}/read", post(read))
        .route("/messages/{id}", patch(edit).delete(delete))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use store::models::{Role, User};

    async fn pair(state: &AppState) -> (User, User) {
        (
            testing::user(state, "alinta@example.org", Role::Member).await,
            testing::user(state, "bindi@example.org", Role::Member).await,
        )
    }

    fn with(ids: &[Uuid]) -> CreateConversationInput {
        CreateConversationInput {
            participant_ids: ids.to_vec(),
            title: None,
        }
    }

    #[tokio::test]
    async fn test_direct_conversation_is_reused() {
        let state = testing::state();
        let (a, b) = pair(&state).await;

        let first = create_conversation(&state, a.id, with(&[b.id])).await.unwrap();
        assert!(!first.is_existing);
        assert_eq!(first.conversation.conversation.kind, ConversationKind::Direct);

        let again = create_conversation(&state, b.id, with(&[a.id, b.id])).await.unwrap();
        assert!(again.is_existing);
        assert_eq!(again.conversation.conversation.id, first.conversation.conversation.id);
    }

    #[tokio::test]
    async fn test_create_conversation_validation() {
        let state = testing::state();
        let (a, _) = pair(&state).await;
        assert!(matches!(
            create_conversation(&state, a.id, with(&[a.id])).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            create_conversation(&state, a.id, with(&[Uuid::new_v4()])).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_group_conversation_keeps_title() {
        let state = testing::state();
        let (a, b) = pair(&state).await;
        let c = testing::user(&state, "cooper@example.org", Role::Member).await;
        let mut input = with(&[b.id, c.id]);
        input.title = Some(" Rangers ".into());
        let created = create_conversation(&state, a.id, input).await.unwrap();
        assert_eq!(created.conversation.conversation.kind, ConversationKind::Group);
        assert_eq!(created.conversation.conversation.title.as_deref(), Some("Rangers"));
        assert_eq!(created.conversation.participants.len(), 3);
    }

    #[tokio::test]
    async fn test_outsider_sees_not_found() {
        let state = testing::state();
        let (a, b) = pair(&state).await;
        let outsider = testing::user(&state, "dana@example.org", Role::Member).await;
        let id = create_conversation(&state, a.id, with(&[b.id]))
            .await
            .unwrap()
            .conversation
            .conversation
            .id;

        assert!(matches!(
            list_messages(&state, outsider.id, id, MessageQuery::default()).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            send_message(&state, outsider.id, id, "hi").await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(get_conversation(&state, outsider.id, id).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unread_counters_and_events() {
        let state = testing::state();
        let (a, b) = pair(&state).await;
        let id = create_conversation(&state, a.id, with(&[b.id]))
            .await
            .unwrap()
            .conversation
            .conversation
            .id;
        let mut b_socket = state.hub.subscribe(b.id);

        send_message(&state, a.id, id, "  yaama  ").await.unwrap();
        send_message(&state, a.id, id, "are you there?").await.unwrap();

        let event = b_socket.recv().await.unwrap();
        assert_eq!(event.event, MESSAGE_NEW);
        assert_eq!(event.data["body"], "yaama");

        assert_eq!(state.store.unread_total(b.id).await.unwrap(), 2);
        assert_eq!(state.store.unread_total(a.id).await.unwrap(), 0);
        assert_eq!(state.store.list_notifications(b.id, true, 10).await.unwrap().len(), 2);

        mark_read(&state, b.id, id).await.unwrap();
        assert_eq!(state.store.unread_total(b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_message_pages_follow_cursor() {
        let state = testing::state();
        let (a, b) = pair(&state).await;
        let id = create_conversation(&state, a.id, with(&[b.id]))
            .await
            .unwrap()
            .conversation
            .conversation
            .id;
        for body in ["one", "two", "three"] {
            send_message(&state, a.id, id, body).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let latest = list_messages(&state, b.id, id, MessageQuery { before: None, limit: Some(2) })
            .await
            .unwrap();
        let bodies: Vec<&str> = latest.items.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["two", "three"]);
        assert!(latest.has_more);
        assert_eq!(latest.next_cursor, Some(latest.items[0].created_at));

        let older = list_messages(&state, b.id, id, MessageQuery { before: latest.next_cursor, limit: Some(2) })
            .await
            .unwrap();
        let bodies: Vec<&str> = older.items.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["one"]);
        assert!(!older.has_more);
        assert_eq!(older.next_cursor, None);
    }

    #[tokio::test]
    async fn test_body_limits() {
        assert!(validate_body("   ").is_err());
        assert!(validate_body(&"x".repeat(MAX_BODY_CHARS)).is_ok());
        assert!(validate_body(&"x".repeat(MAX_BODY_CHARS + 1)).is_err());
    }

    #[tokio::test]
    async fn test_only_sender_may_edit_or_delete() {
        let state = testing::state();
        let (a, b) = pair(&state).await;
        let id = create_conversation(&state, a.id, with(&[b.id]))
            .await
            .unwrap()
            .conversation
            .conversation
            .id;
        let message = send_message(&state, a.id, id, "first draft").await.unwrap();

        assert!(matches!(
            delete_message(&state, b.id, message.id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            edit_message(&state, b.id, message.id, "hijack").await,
            Err(ApiError::NotFound(_))
        ));

        let edited = edit_message(&state, a.id, message.id, "final").await.unwrap();
        assert_eq!(edited.body, "final");
        assert!(edited.edited_at.is_some());

        delete_message(&state, a.id, message.id).await.unwrap();
        assert!(matches!(
            delete_message(&state, a.id, message.id).await,
            Err(ApiError::NotFound(_))
        ));
        let page = list_messages(&state, a.id, id, MessageQuery::default()).await.unwrap();
        assert!(page.items.is_empty());
    }
}

//! # Realtime hub
//!
//! Pushes events to connected browsers over a WebSocket at `GET /api/realtime`.
//!
//! The hub keeps one [`broadcast`] channel per connected user. Every socket of
//! that user (one per tab) holds a [`Subscription`] on the channel. Publishing to
//! a user without subscribers does nothing; a subscriber that falls behind skips
//! the events it missed. The channel is dropped with its last subscriber.
//!
//! Frames in both directions are JSON objects `{"event": "...", "data": {...}}`.
//! The only client frame acted on is `typing`, relayed to the other participants
//! of the conversation once the sender's membership is checked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::{tokens, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const MESSAGE_NEW: &str = "message:new";
pub const MESSAGE_DELETED: &str = "message:deleted";
pub const CONVERSATION_READ: &str = "conversation:read";
pub const NOTIFICATION_NEW: &str = "notification:new";
pub const TYPING: &str = "typing";

const CHANNEL_CAPACITY: usize = 64;

/// One frame on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(event: &str, data: impl Serialize) -> Self {
        Self {
            event: event.to_string(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

/// Per-user fan-out of realtime events.
#[derive(Clone, Default)]
pub struct Hub {
    channels: Arc<Mutex<HashMap<Uuid, broadcast::Sender<Event>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, broadcast::Sender<Event>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new receiver for the user.
    pub fn subscribe(&self, user_id: Uuid) -> Subscription {
        let receiver = self
            .lock()
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription {
            hub: self.clone(),
            user_id,
            receiver,
        }
    }

    /// Send to every socket of the user. Returns the number of receivers reached.
    pub fn publish(&self, user_id: Uuid, event: Event) -> usize {
        match self.lock().get(&user_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn publish_many(&self, user_ids: impl IntoIterator<Item = Uuid>, event: &Event) {
        for user_id in user_ids {
            self.publish(user_id, event.clone());
        }
    }

    /// Number of live sockets of the user.
    pub fn connections(&self, user_id: Uuid) -> usize {
        self.lock().get(&user_id).map_or(0, broadcast::Sender::receiver_count)
    }
}

/// A live receiver on a user's channel. Dropping the last one removes the channel.
pub struct Subscription {
    hub: Hub,
    user_id: Uuid,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Next event, skipping over anything lost to lag. `None` once the channel closes.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %self.user_id, skipped, "realtime subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = self.hub.lock();
        // Our own receiver is still alive here.
        if channels
            .get(&self.user_id)
            .is_some_and(|sender| sender.receiver_count() <= 1)
        {
            channels.remove(&self.user_id);
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Access token for clients that cannot set headers on the upgrade request.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypingData {
    conversation_id: Uuid,
}

/// `GET /api/realtime`
pub async fn connect(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    caller: Option<CurrentUser>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let user = match (params.token.as_deref(), caller) {
        (Some(token), _) => tokens::authenticate(&state, token).await?,
        (None, Some(CurrentUser(user))) => user,
        (None, None) => return Err(ApiError::unauthorized()),
    };
    tracing::debug!(user_id = %user.id, "realtime connection");
    Ok(ws.on_upgrade(move |socket| serve_socket(state, user.id, socket)))
}

async fn serve_socket(state: AppState, user_id: Uuid, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let mut subscription = state.hub.subscribe(user_id);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode realtime event: {}", e);
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => handle_client_frame(&state, user_id, text.as_str()).await,
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(user_id = %user_id, "realtime connection closed");
}

/// React to a frame sent by the browser. Unknown or malformed frames are ignored.
pub async fn handle_client_frame(state: &AppState, user_id: Uuid, text: &str) {
    let Ok(frame) = serde_json::from_str::<Event>(text) else {
        return;
    };
    if frame.event != TYPING {
        return;
    }
    let Ok(data) = serde_json::from_value::<TypingData>(frame.data) else {
        return;
    };
    if let Err(e) = relay_typing(state, user_id, data.conversation_id).await {
        tracing::warn!(user_id = %user_id, "typing relay failed: {}", e);
    }
}

async fn relay_typing(state: &AppState, user_id: Uuid, conversation_id: Uuid) -> ApiResult<()> {
    if state.store.participant(conversation_id, user_id).await?.is_none() {
        return Ok(());
    }
    let others = state
        .store
        .participants(conversation_id)
        .await?
        .into_iter()
        .map(|p| p.user_id)
        .filter(|id| *id != user_id);
    let event = Event::new(
        TYPING,
        json!({ "conversation_id": conversation_id, "user_id": user_id }),
    );
    state.hub.publish_many(others, &event);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let mut first = hub.subscribe(user);
        let mut second = hub.subscribe(user);

        assert_eq!(hub.publish(user, Event::new(MESSAGE_NEW, json!({ "n": 1 }))), 2);
        assert_eq!(first.recv().await.unwrap().event, MESSAGE_NEW);
        assert_eq!(second.recv().await.unwrap().data["n"], 1);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = Hub::new();
        assert_eq!(hub.publish(Uuid::new_v4(), Event::new(TYPING, json!({}))), 0);
    }

    #[test]
    fn test_channel_removed_with_last_subscriber() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let first = hub.subscribe(user);
        let second = hub.subscribe(user);
        assert_eq!(hub.connections(user), 2);
        drop(first);
        assert_eq!(hub.connections(user), 1);
        drop(second);
        assert_eq!(hub.connections(user), 0);
        assert!(hub.lock().is_empty());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_missed_events() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let mut subscription = hub.subscribe(user);
        for n in 0..CHANNEL_CAPACITY + 10 {
            hub.publish(user, Event::new(MESSAGE_NEW, json!({ "n": n })));
        }
        let first = subscription.recv().await.unwrap();
        assert_eq!(first.data["n"], 10);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = Event::new(CONVERSATION_READ, json!({ "conversation_id": "c1" }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({ "event": "conversation:read", "data": { "conversation_id": "c1" } }));
    }
}

//! # Mentorship scheduling
//!
//! Members request sessions with mentors; the mentor confirms (adding a
//! meeting link), either side may cancel, and the mentor marks it complete.
//!
//! ```text
//! requested ──confirm──→ confirmed ──complete──→ completed
//!     └───────cancel────────┴──→ cancelled
//! ```
//!
//! A mentor never has two active (`requested` or `confirmed`) sessions that
//! overlap; the store rejects the second booking with a conflict.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use store::models::{MentorSession, NewMentorSession, NotificationKind, Role, SessionStatus, User, UserSummary};
use store::StoreError;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::email::{self, EmailTemplate};
use crate::error::{ApiError, ApiResult};
use crate::notifications::{self, Notice};
use crate::state::AppState;

pub const MIN_DURATION_MINUTES: i32 = 15;
pub const MAX_DURATION_MINUTES: i32 = 240;

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub mentor_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub topic: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmInput {
    pub meeting_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub upcoming: bool,
}

fn session_link(id: Uuid) -> String {
    format!("/mentorship/sessions/{id}")
}

async fn find_session(state: &AppState, id: Uuid) -> ApiResult<MentorSession> {
    state
        .store
        .find_session(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Session"))
}

pub async fn list_mentors(state: &AppState) -> ApiResult<Vec<UserSummary>> {
    Ok(state
        .store
        .users_with_role(Role::Mentor)
        .await?
        .iter()
        .map(User::to_summary)
        .collect())
}

pub async fn request_session(state: &AppState, mentee: &User, request: SessionRequest) -> ApiResult<MentorSession> {
    let mentor = state
        .store
        .find_user(request.mentor_id)
        .await?
        .filter(|u| u.is_active() && u.role == Role::Mentor)
        .ok_or_else(|| ApiError::not_found("Mentor"))?;
    if mentor.id == mentee.id {
        return Err(ApiError::bad_request("You cannot book a session with yourself"));
    }
    let now = Utc::now();
    if request.scheduled_at <= now {
        return Err(ApiError::bad_request("Sessions must be scheduled in the future"));
    }
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&request.duration_minutes) {
        return Err(ApiError::bad_request(format!(
            "Duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(ApiError::bad_request("Topic is required"));
    }

    let session = state
        .store
        .create_session(NewMentorSession {
            mentor_id: mentor.id,
            mentee_id: mentee.id,
            scheduled_at: request.scheduled_at,
            duration_minutes: request.duration_minutes,
            topic: topic.to_string(),
            created_at: now,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ApiError::Conflict("The mentor is already booked at that time".into()),
            other => other.into(),
        })?;

    notifications::notify(
        state,
        mentor.id,
        Notice::new(
            NotificationKind::Mentorship,
            "New session request",
            format!("{} asked for a session: {}", mentee.name, session.topic),
        )
        .link(session_link(session.id)),
    )
    .await?;
    tracing::info!(session_id = %session.id, mentor_id = %mentor.id, "session requested");
    Ok(session)
}

pub async fn confirm_session(
    state: &AppState,
    mentor: &User,
    id: Uuid,
    meeting_url: Option<String>,
) -> ApiResult<MentorSession> {
    let session = find_session(state, id).await?;
    if session.mentor_id != mentor.id {
        return Err(ApiError::not_found("Session"));
    }
    if session.status != SessionStatus::Requested {
        return Err(ApiError::bad_request(format!(
            "Only requested sessions can be confirmed; this one is {}",
            session.status
        )));
    }
    let meeting_url = meeting_url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
    let session = state
        .store
        .set_session_status(id, SessionStatus::Confirmed, meeting_url, Utc::now())
        .await?;

    notifications::notify(
        state,
        session.mentee_id,
        Notice::new(
            NotificationKind::Mentorship,
            "Session confirmed",
            format!("{} confirmed your session: {}", mentor.name, session.topic),
        )
        .link(session_link(session.id)),
    )
    .await?;
    if let Some(mentee) = state.store.find_user(session.mentee_id).await? {
        email::deliver(
            state,
            &mentee.email,
            EmailTemplate::SessionConfirmed {
                name: mentee.name.clone(),
                mentor_name: mentor.name.clone(),
                topic: session.topic.clone(),
                scheduled_at: session.scheduled_at,
                meeting_url: session.meeting_url.clone(),
            },
        )
        .await;
    }
    Ok(session)
}

pub async fn cancel_session(state: &AppState, user: &User, id: Uuid) -> ApiResult<MentorSession> {
    let session = find_session(state, id).await?;
    let other = if session.mentor_id == user.id {
        session.mentee_id
    } else if session.mentee_id == user.id {
        session.mentor_id
    } else {
        return Err(ApiError::not_found("Session"));
    };
    if !session.status.is_active() {
        return Err(ApiError::bad_request(format!(
            "A {} session cannot be cancelled",
            session.status
        )));
    }
    let session = state
        .store
        .set_session_status(id, SessionStatus::Cancelled, None, Utc::now())
        .await?;
    notifications::notify(
        state,
        other,
        Notice::new(
            NotificationKind::Mentorship,
            "Session cancelled",
            format!("{} cancelled the session: {}", user.name, session.topic),
        )
        .link(session_link(session.id)),
    )
    .await?;
    Ok(session)
}

pub async fn complete_session(state: &AppState, mentor: &User, id: Uuid) -> ApiResult<MentorSession> {
    let session = find_session(state, id).await?;
    if session.mentor_id != mentor.id {
        return Err(ApiError::not_found("Session"));
    }
    if session.status != SessionStatus::Confirmed {
        return Err(ApiError::bad_request("Only confirmed sessions can be completed"));
    }
    Ok(state
        .store
        .set_session_status(id, SessionStatus::Completed, None, Utc::now())
        .await?)
}

pub async fn my_sessions(state: &AppState, user_id: Uuid, upcoming_only: bool) -> ApiResult<Vec<MentorSession>> {
    let from = upcoming_only.then(Utc::now);
    Ok(state.store.sessions_for_user(user_id, from).await?)
}

async fn mentors(State(state): State<AppState>) -> ApiResult<Json<Vec<UserSummary>>> {
    list_mentors(&state).await.map(Json)
}

async fn sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Vec<MentorSession>>> {
    my_sessions(&state, user.id, query.upcoming).await.map(Json)
}

async fn request(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<SessionRequest>,
) -> ApiResult<(StatusCode, Json<MentorSession>)> {
    let session = request_session(&state, &user, input).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn confirm(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<MentorSession>> {
    // The body is optional; an empty one confirms without a meeting link.
    let input: ConfirmInput = if body.is_empty() {
        ConfirmInput::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("Invalid body: {e}")))?
    };
    let meeting_url = input.meeting_url;
    confirm_session(&state, &user, id, meeting_url).await.map(Json)
}

async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MentorSession>> {
    cancel_session(&state, &user, id).await.map(Json)
}

async fn complete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MentorSession>> {
    complete_session(&state, &user, id).await.map(Json)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mentors", get(mentors))
        .route("/mentorship/sessions", get(sessions).post(request))
        .route("/mentorship/sessions/{id}/confirm", post(confirm))
        .route("/mentorship/sessions/{id}/cancel", post(cancel))
        .route("/mentorship/sessions/{id}/complete", post(complete))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        let day = (Utc::now() + Duration::days(2)).date_naive();
        day.and_hms_opt(10, 0, 0).unwrap().and_utc()
    }

    fn slot(mentor: Uuid, start: DateTime<Utc>, minutes: i32) -> SessionRequest {
        SessionRequest {
            mentor_id: mentor,
            scheduled_at: start,
            duration_minutes: minutes,
            topic: "Career planning".into(),
        }
    }

    #[tokio::test]
    async fn test_request_validation() {
        let state = testing::state();
        let mentor = testing::user(&state, "june@example.org", Role::Mentor).await;
        let member = testing::user(&state, "kai@example.org", Role::Member).await;

        assert!(matches!(
            request_session(&state, &member, slot(member.id, base(), 60)).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            request_session(&state, &mentor, slot(mentor.id, base(), 60)).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            request_session(&state, &member, slot(mentor.id, base(), 10)).await,
            Err(ApiError::BadRequest(_))
        ));
        let past = slot(mentor.id, Utc::now() - Duration::minutes(5), 60);
        assert!(matches!(request_session(&state, &member, past).await, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_overlap_conflicts_until_cancelled() {
        let state = testing::state();
        let mentor = testing::user(&state, "june@example.org", Role::Mentor).await;
        let first_mentee = testing::user(&state, "kai@example.org", Role::Member).await;
        let second_mentee = testing::user(&state, "lia@example.org", Role::Member).await;

        let booked = request_session(&state, &first_mentee, slot(mentor.id, base(), 60)).await.unwrap();
        let clash = slot(mentor.id, booked.scheduled_at + Duration::minutes(30), 30);
        assert!(matches!(
            request_session(&state, &second_mentee, clash).await,
            Err(ApiError::Conflict(_))
        ));

        let adjacent = slot(mentor.id, booked.ends_at(), 30);
        assert!(request_session(&state, &second_mentee, adjacent).await.is_ok());

        cancel_session(&state, &first_mentee, booked.id).await.unwrap();
        assert!(request_session(&state, &second_mentee, slot(mentor.id, base(), 60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_confirm_and_complete() {
        let (state, mailer) = testing::state_with_mailer();
        let mentor = testing::user(&state, "june@example.org", Role::Mentor).await;
        let mentee = testing::user(&state, "kai@example.org", Role::Member).await;
        let session = request_session(&state, &mentee, slot(mentor.id, base(), 45)).await.unwrap();

        assert!(matches!(
            complete_session(&state, &mentor, session.id).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            confirm_session(&state, &mentee, session.id, None).await,
            Err(ApiError::NotFound(_))
        ));

        let confirmed = confirm_session(&state, &mentor, session.id, Some("https://meet.example.org/x".into()))
            .await
            .unwrap();
        assert_eq!(confirmed.status, SessionStatus::Confirmed);
        assert_eq!(confirmed.meeting_url.as_deref(), Some("https://meet.example.org/x"));
        assert!(mailer.sent().iter().any(|m| m.to == "kai@example.org"));

        let done = complete_session(&state, &mentor, session.id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert!(matches!(
            cancel_session(&state, &mentee, session.id).await,
            Err(ApiError::BadRequest(_))
        ));

        let mine = my_sessions(&state, mentee.id, false).await.unwrap();
        assert_eq!(mine.len(), 1);
    }
}

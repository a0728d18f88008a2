//! # Repository traits: the data-access seam of the platform
//!
//! The service layer talks to storage only through these traits. Two
//! implementations exist: [`crate::MemoryStore`] (tests, local demos) and `PgStore`
//! in the `api` crate (production, PostgreSQL via SQLx).
//!
//! Each trait covers one aggregate. [`Store`] is the union that `AppState` holds
//! as `Arc<dyn Store>`; it is implemented automatically for any type that
//! implements every repository.
//!
//! ## Contract
//!
//! - Methods that change several rows (inserting a message and bumping unread
//!   counters, creating a conversation with its participants, liking a post) are
//!   atomic.
//! - Uniqueness violations surface as [`StoreError::Conflict`]; updates addressed at
//!   a missing row surface as [`StoreError::NotFound`]. Lookups return `Option`.
//! - Timestamps are supplied by the caller so behaviour is reproducible in tests.
//! - List methods return rows already ordered as documented on the method.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::*;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new account. Conflict if the email or provider identity is taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Insert or refresh an account keyed on `(provider, provider_id)`.
    async fn upsert_oauth_user(&self, user: NewUser) -> StoreResult<User>;

    /// Lookup by id, including deactivated accounts.
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Lookup of an active account by normalised email.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Active accounts among `ids`, in no particular order.
    async fn users_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<User>>;

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate, at: DateTime<Utc>) -> StoreResult<User>;

    async fn set_password_hash(&self, id: Uuid, hash: &str, at: DateTime<Utc>) -> StoreResult<()>;

    async fn set_role(&self, id: Uuid, role: Role, at: DateTime<Utc>) -> StoreResult<User>;

    /// Soft delete.
    async fn deactivate_user(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Active accounts matching `query` (name or email substring), newest first, with total.
    async fn list_users(
        &self,
        query: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> StoreResult<(Vec<User>, i64)>;

    /// Active accounts with `role`, ordered by name.
    async fn users_with_role(&self, role: Role) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert_token(&self, token: AuthToken) -> StoreResult<()>;

    /// Unexpired token of `kind` with `hash`, left in place.
    async fn find_token(&self, hash: &str, kind: TokenKind, now: DateTime<Utc>) -> StoreResult<Option<AuthToken>>;

    /// Remove and return an unexpired token. A second call for the same hash returns `None`.
    async fn take_token(&self, hash: &str, kind: TokenKind, now: DateTime<Utc>) -> StoreResult<Option<AuthToken>>;

    /// Delete every token of the given kinds owned by the user. Returns the number removed.
    async fn revoke_user_tokens(&self, user_id: Uuid, kinds: &[TokenKind]) -> StoreResult<u64>;

    async fn insert_oauth_state(&self, state: OAuthState) -> StoreResult<()>;

    /// Remove an unexpired state and return its PKCE verifier.
    async fn take_oauth_state(
        &self,
        state: &str,
        provider: AuthProvider,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<String>>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// The direct conversation whose members are exactly `a` and `b`.
    async fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<Option<Conversation>>;

    async fn create_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation>;

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    async fn participant(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<Participant>>;

    async fn participants(&self, conversation_id: Uuid) -> StoreResult<Vec<Participant>>;

    /// The user's inbox, most recent activity first.
    async fn list_conversations(&self, user_id: Uuid) -> StoreResult<Vec<ConversationSummary>>;

    /// Summary of one conversation as seen by `user_id`.
    async fn conversation_summary(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<ConversationSummary>>;

    /// Non-deleted messages created strictly before `before`, newest first.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<Message>>;

    /// Insert a message, stamp the conversation's activity and increment `unread_count`
    /// for every participant except the sender.
    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    async fn find_message(&self, id: Uuid) -> StoreResult<Option<Message>>;

    async fn update_message_body(&self, id: Uuid, body: &str, at: DateTime<Utc>) -> StoreResult<Message>;

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Message>;

    /// Reset the participant's unread counter.
    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn unread_total(&self, user_id: Uuid) -> StoreResult<i64>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: NewJob) -> StoreResult<Job>;

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>>;

    async fn update_job(&self, id: Uuid, update: JobUpdate, at: DateTime<Utc>) -> StoreResult<Job>;

    /// Matching jobs, newest first, with the total number of matches.
    async fn search_jobs(&self, filter: JobFilter) -> StoreResult<(Vec<Job>, i64)>;

    /// Conflict if the applicant already applied to the job.
    async fn create_application(&self, application: NewApplication) -> StoreResult<JobApplication>;

    async fn find_application(&self, id: Uuid) -> StoreResult<Option<JobApplication>>;

    /// Oldest first.
    async fn applications_for_job(&self, job_id: Uuid) -> StoreResult<Vec<JobApplication>>;

    /// Newest first.
    async fn applications_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ApplicationWithJob>>;

    async fn set_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<JobApplication>;
}

#[async_trait]
pub trait MentorshipRepository: Send + Sync {
    /// Conflict if the slot overlaps an active session of the same mentor.
    async fn create_session(&self, session: NewMentorSession) -> StoreResult<MentorSession>;

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<MentorSession>>;

    /// `meeting_url` of `None` keeps the stored value.
    async fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        meeting_url: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<MentorSession>;

    /// Sessions where the user is mentor or mentee, starting at or after `from`
    /// when given, ordered by `scheduled_at`.
    async fn sessions_for_user(
        &self,
        user_id: Uuid,
        from: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<MentorSession>>;
}

#[async_trait]
pub trait SocialRepository: Send + Sync {
    async fn create_post(&self, post: NewPost) -> StoreResult<SocialPost>;

    /// Lookup including soft-deleted posts.
    async fn find_post(&self, id: Uuid) -> StoreResult<Option<SocialPost>>;

    /// Non-deleted posts, newest first, with total. `liked_by_me` is relative to `viewer`.
    async fn feed(&self, viewer: Uuid, offset: i64, limit: i64) -> StoreResult<(Vec<FeedEntry>, i64)>;

    async fn feed_entry(&self, viewer: Uuid, post_id: Uuid) -> StoreResult<Option<FeedEntry>>;

    async fn soft_delete_post(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Returns `true` if a like row was inserted.
    async fn like_post(&self, post_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Returns `true` if a like row was removed.
    async fn unlike_post(&self, post_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Insert a comment and bump the post's `comment_count`.
    async fn add_comment(&self, comment: NewComment) -> StoreResult<PostComment>;

    /// Oldest first.
    async fn comments(&self, post_id: Uuid) -> StoreResult<Vec<CommentEntry>>;
}

#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn find_subscription(&self, user_id: Uuid) -> StoreResult<Option<Subscription>>;

    async fn find_subscription_by_customer(&self, customer_id: &str) -> StoreResult<Option<Subscription>>;

    /// Insert or replace the user's subscription row.
    async fn upsert_subscription(&self, subscription: Subscription) -> StoreResult<Subscription>;

    /// Record a webhook event id. Returns `false` if it was already recorded.
    async fn record_stripe_event(&self, event_id: &str, kind: &str, at: DateTime<Utc>) -> StoreResult<bool>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(&self, notification: NewNotification) -> StoreResult<Notification>;

    /// Newest first.
    async fn list_notifications(&self, user_id: Uuid, unread_only: bool, limit: i64) -> StoreResult<Vec<Notification>>;

    async fn count_unread_notifications(&self, user_id: Uuid) -> StoreResult<i64>;

    /// Returns `false` if no notification with `id` belongs to the user.
    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn mark_all_notifications_read(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    /// Dashboard counters; "new" counts include rows created at or after `since`.
    async fn platform_stats(&self, since: DateTime<Utc>) -> StoreResult<PlatformStats>;
}

/// Every repository the application needs.
pub trait Store:
    UserRepository
    + TokenRepository
    + ConversationRepository
    + JobRepository
    + MentorshipRepository
    + SocialRepository
    + BillingRepository
    + NotificationRepository
    + AnalyticsRepository
{
}

impl<T> Store for T where
    T: UserRepository
        + TokenRepository
        + ConversationRepository
        + JobRepository
        + MentorshipRepository
        + SocialRepository
        + BillingRepository
        + NotificationRepository
        + AnalyticsRepository
{
}

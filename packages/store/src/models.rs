//! # Domain records for Ngurra Pathways
//!
//! Every persisted entity of the platform is a plain struct here. The same types
//! are returned by every [`crate::Store`] implementation, so the service layer in
//! the `api` crate never sees a backend-specific row type.
//!
//! With the `postgres` feature the records derive [`sqlx::FromRow`] and the status
//! enums derive [`sqlx::Type`] against the Postgres enum types declared in the
//! `api` crate's migrations. Without it the crate has no database dependency.
//!
//! ## Records
//!
//! | Struct | Table |
//! |--------|-------|
//! | [`User`] | `users` |
//! | [`AuthToken`] / [`OAuthState`] | `auth_tokens` / `oauth_states` |
//! | [`Conversation`] / [`Participant`] / [`Message`] | `conversations` / `conversation_participants` / `messages` |
//! | [`Job`] / [`JobApplication`] | `jobs` / `job_applications` |
//! | [`MentorSession`] | `mentor_sessions` |
//! | [`SocialPost`] / [`PostComment`] | `social_posts` / `post_comments` (+ `post_likes`) |
//! | [`Subscription`] | `subscriptions` (+ `stripe_events`) |
//! | [`Notification`] | `notifications` |
//!
//! `New*` structs carry the caller-supplied columns of an insert; `*Update` structs
//! carry a partial update where `None` means "leave unchanged".

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a closed set of lowercase string values backed by a Postgres enum.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $pg:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        #[cfg_attr(feature = "postgres", derive(sqlx::Type))]
        #[cfg_attr(feature = "postgres", sqlx(type_name = $pg, rename_all = "snake_case"))]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Storage and wire representation.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Users & auth
// ---------------------------------------------------------------------------

string_enum! {
    /// Platform role. Employers post jobs, mentors accept sessions, admins see the dashboard.
    Role as "user_role" {
        Member => "member",
        Mentor => "mentor",
        Employer => "employer",
        Admin => "admin",
    }
}

string_enum! {
    /// Identity provider that owns the account.
    AuthProvider as "auth_provider" {
        Local => "local",
        Linkedin => "linkedin",
    }
}

/// Full user record.
///
/// For `local` accounts `provider_id` equals the normalised email; for `linkedin`
/// it is the OpenID `sub` claim.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
    pub provider_id: String,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Convert to UserInfo for client consumption.
    pub fn to_info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            headline: self.headline.clone(),
            avatar_url: self.avatar_url.clone(),
            role: self.role,
            provider: self.provider,
        }
    }

    /// Public card shown next to messages, posts and comments.
    pub fn to_summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            headline: self.headline.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// User information safe to send to the account owner (never includes the password hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
}

/// What other users get to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
    pub provider_id: String,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
}

string_enum! {
    TokenKind as "token_kind" {
        Access => "access",
        Refresh => "refresh",
        PasswordReset => "password_reset",
    }
}

/// A bearer credential. Only the SHA-256 hex digest of the secret is stored.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct AuthToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Pending OAuth authorization: CSRF state plus PKCE verifier.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct OAuthState {
    pub state: String,
    pub provider: AuthProvider,
    pub pkce_verifier: String,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

string_enum! {
    ConversationKind as "conversation_kind" {
        Direct => "direct",
        Group => "group",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Sort key for conversation lists: last activity, or creation for empty threads.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread_count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Row in the caller's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<Message>,
    pub unread_count: i32,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_by: Uuid,
    /// Every member, creator included.
    pub participant_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

string_enum! {
    JobStatus as "job_status" {
        Draft => "draft",
        Open => "open",
        Closed => "closed",
    }
}

string_enum! {
    EmploymentType as "employment_type" {
        FullTime => "full_time",
        PartTime => "part_time",
        Contract => "contract",
        Casual => "casual",
        Internship => "internship",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Job {
    pub id: Uuid,
    pub employer_id: Uuid,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub employment_type: EmploymentType,
    pub remote: bool,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub employer_id: Uuid,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub employment_type: EmploymentType,
    pub remote: bool,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<EmploymentType>,
    pub remote: Option<bool>,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub status: Option<JobStatus>,
}

impl JobUpdate {
    /// Apply the patch to an in-memory job.
    pub fn apply_to(&self, job: &mut Job, at: DateTime<Utc>) {
        if let Some(title) = &self.title {
            job.title = title.clone();
        }
        if let Some(description) = &self.description {
            job.description = description.clone();
        }
        if let Some(location) = &self.location {
            job.location = Some(location.clone());
        }
        if let Some(employment_type) = self.employment_type {
            job.employment_type = employment_type;
        }
        if let Some(remote) = self.remote {
            job.remote = remote;
        }
        if let Some(min) = self.salary_min {
            job.salary_min = Some(min);
        }
        if let Some(max) = self.salary_max {
            job.salary_max = Some(max);
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        job.updated_at = at;
    }
}

/// Search over open jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub query: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<EmploymentType>,
    pub remote: Option<bool>,
    pub offset: i64,
    pub limit: i64,
}

impl JobFilter {
    /// In-memory evaluation of the filter. `PgStore` expresses the same predicate in SQL.
    pub fn matches(&self, job: &Job) -> bool {
        if job.status != JobStatus::Open {
            return false;
        }
        if let Some(q) = self.query.as_deref().map(str::to_lowercase) {
            if !job.title.to_lowercase().contains(&q) && !job.description.to_lowercase().contains(&q) {
                return false;
            }
        }
        if let Some(loc) = self.location.as_deref().map(str::to_lowercase) {
            match &job.location {
                Some(l) if l.to_lowercase().contains(&loc) => {}
                _ => return false,
            }
        }
        if self.employment_type.is_some_and(|t| t != job.employment_type) {
            return false;
        }
        if self.remote.is_some_and(|r| r != job.remote) {
            return false;
        }
        true
    }
}

string_enum! {
    /// Hiring pipeline of one application.
    ///
    /// ```text
    /// submitted → reviewing → interview → offered
    ///     └──────────┴────────────┴─────────┴──→ rejected
    /// any non-final ──(applicant)──→ withdrawn
    /// ```
    ApplicationStatus as "application_status" {
        Submitted => "submitted",
        Reviewing => "reviewing",
        Interview => "interview",
        Offered => "offered",
        Rejected => "rejected",
        Withdrawn => "withdrawn",
    }
}

impl ApplicationStatus {
    /// States an employer may move an application to from the current state.
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Submitted => &[Self::Reviewing, Self::Rejected],
            Self::Reviewing => &[Self::Interview, Self::Rejected],
            Self::Interview => &[Self::Offered, Self::Rejected],
            Self::Offered => &[Self::Rejected],
            Self::Rejected | Self::Withdrawn => &[],
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    pub const fn is_final(self) -> bool {
        matches!(self, Self::Rejected | Self::Withdrawn)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct JobApplication {
    pub id: Uuid,
    pub job_id: Uuid,
    pub applicant_id: Uuid,
    pub cover_letter: Option<String>,
    pub resume_url: Option<String>,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An application as listed for its applicant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationWithJob {
    #[serde(flatten)]
    pub application: JobApplication,
    pub job_title: String,
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub job_id: Uuid,
    pub applicant_id: Uuid,
    pub cover_letter: Option<String>,
    pub resume_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Mentorship
// ---------------------------------------------------------------------------

string_enum! {
    SessionStatus as "session_status" {
        Requested => "requested",
        Confirmed => "confirmed",
        Cancelled => "cancelled",
        Completed => "completed",
    }
}

impl SessionStatus {
    /// Sessions that still hold the mentor's time slot.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Requested | Self::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct MentorSession {
    pub id: Uuid,
    pub mentor_id: Uuid,
    pub mentee_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub topic: String,
    pub status: SessionStatus,
    pub meeting_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MentorSession {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Half-open interval overlap: back-to-back sessions do not collide.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.scheduled_at < end && start < self.ends_at()
    }
}

#[derive(Debug, Clone)]
pub struct NewMentorSession {
    pub mentor_id: Uuid,
    pub mentee_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

impl NewMentorSession {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(i64::from(self.duration_minutes))
    }
}

// ---------------------------------------------------------------------------
// Social feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct SocialPost {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub image_url: Option<String>,
    pub like_count: i32,
    pub comment_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(flatten)]
    pub post: SocialPost,
    pub author: UserSummary,
    pub liked_by_me: bool,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: Uuid,
    pub body: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct PostComment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentEntry {
    #[serde(flatten)]
    pub comment: PostComment,
    pub author: UserSummary,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Billing
// ---------------------------------------------------------------------------

string_enum! {
    Plan as "subscription_plan" {
        Free => "free",
        Pro => "pro",
        Employer => "employer",
    }
}

string_enum! {
    SubscriptionStatus as "subscription_status" {
        Active => "active",
        Trialing => "trialing",
        PastDue => "past_due",
        Canceled => "canceled",
        Incomplete => "incomplete",
    }
}

impl SubscriptionStatus {
    /// Statuses that grant the plan's features.
    pub const fn is_entitled(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Subscription {
    pub user_id: Uuid,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Implicit record for users who never subscribed.
    pub fn free(user_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            plan: Plan::Free,
            status: SubscriptionStatus::Active,
            current_period_end: None,
            cancel_at_period_end: false,
            updated_at: at,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

string_enum! {
    NotificationKind as "notification_kind" {
        Message => "message",
        Application => "application",
        Mentorship => "mentorship",
        Social => "social",
        Billing => "billing",
        System => "system",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// Admin dashboard counters. Maps are keyed by the enum's storage string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub users_by_role: BTreeMap<String, i64>,
    pub new_users: i64,
    pub jobs_by_status: BTreeMap<String, i64>,
    pub applications_by_status: BTreeMap<String, i64>,
    pub sessions_by_status: BTreeMap<String, i64>,
    pub new_posts: i64,
    pub new_messages: i64,
    pub active_subscriptions_by_plan: BTreeMap<String, i64>,
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use store::models::*;
use store::repo::*;
use store::{StoreError, StoreResult};
use uuid::Uuid;

/// [`store::Store`] backed by PostgreSQL.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `%needle%` for ILIKE with the wildcard characters of the input escaped.
fn contains_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn kind_names(kinds: &[TokenKind]) -> Vec<String> {
    kinds.iter().map(|k| k.as_str().to_string()).collect()
}

#[derive(FromRow)]
struct ConversationRow {
    #[sqlx(flatten)]
    conversation: Conversation,
    unread_count: i32,
}

#[derive(FromRow)]
struct MemberRow {
    conversation_id: Uuid,
    #[sqlx(flatten)]
    user: UserSummary,
}

#[derive(FromRow)]
struct FeedRow {
    #[sqlx(flatten)]
    post: SocialPost,
    author_name: String,
    author_headline: Option<String>,
    author_avatar_url: Option<String>,
    liked_by_me: bool,
}

impl From<FeedRow> for FeedEntry {
    fn from(row: FeedRow) -> Self {
        Self {
            author: UserSummary {
                id: row.post.author_id,
                name: row.author_name,
                headline: row.author_headline,
                avatar_url: row.author_avatar_url,
            },
            post: row.post,
            liked_by_me: row.liked_by_me,
        }
    }
}

#[derive(FromRow)]
struct CommentRow {
    #[sqlx(flatten)]
    comment: PostComment,
    author_name: String,
    author_headline: Option<String>,
    author_avatar_url: Option<String>,
}

#[derive(FromRow)]
struct ApplicationRow {
    #[sqlx(flatten)]
    application: JobApplication,
    job_title: String,
}

const FEED_SELECT: &str = "SELECT p.*, u.name AS author_name, u.headline AS author_headline, \
     u.avatar_url AS author_avatar_url, \
     EXISTS (SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = $1) AS liked_by_me \
     FROM social_posts p JOIN users u ON u.id = p.author_id";

impl PgStore {
    /// Attach members and the latest visible message to each conversation row.
    async fn summarize(&self, rows: Vec<ConversationRow>) -> StoreResult<Vec<ConversationSummary>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.conversation.id).collect();

        let members: Vec<MemberRow> = sqlx::query_as(
            "SELECT p.conversation_id, u.id, u.name, u.headline, u.avatar_url
             FROM conversation_participants p JOIN users u ON u.id = p.user_id
             WHERE p.conversation_id = ANY($1)
             ORDER BY p.joined_at, u.name",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let last_messages: Vec<Message> = sqlx::query_as(
            "SELECT DISTINCT ON (conversation_id) * FROM messages
             WHERE conversation_id = ANY($1) AND deleted_at IS NULL
             ORDER BY conversation_id, created_at DESC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut members_by_id: HashMap<Uuid, Vec<UserSummary>> = HashMap::new();
        for member in members {
            members_by_id
                .entry(member.conversation_id)
                .or_default()
                .push(member.user);
        }
        let mut last_by_id: HashMap<Uuid, Message> = last_messages
            .into_iter()
            .map(|m| (m.conversation_id, m))
            .collect();

        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                participants: members_by_id.remove(&row.conversation.id).unwrap_or_default(),
                last_message: last_by_id.remove(&row.conversation.id),
                unread_count: row.unread_count,
                conversation: row.conversation,
            })
            .collect())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let now = Utc::now();
        Ok(sqlx::query_as(
            "INSERT INTO users (id, email, name, avatar_url, role, provider, provider_id, password_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.avatar_url)
        .bind(user.role)
        .bind(user.provider)
        .bind(&user.provider_id)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn upsert_oauth_user(&self, user: NewUser) -> StoreResult<User> {
        let now = Utc::now();
        Ok(sqlx::query_as(
            "INSERT INTO users (id, email, name, avatar_url, role, provider, provider_id, password_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
             ON CONFLICT (provider, provider_id) DO UPDATE SET
                email = EXCLUDED.email,
                name = EXCLUDED.name,
                avatar_url = EXCLUDED.avatar_url,
                updated_at = EXCLUDED.updated_at
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.avatar_url)
        .bind(user.role)
        .bind(user.provider)
        .bind(&user.provider_id)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(
            sqlx::query_as("SELECT * FROM users WHERE email = $1 AND deleted_at IS NULL")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        Ok(
            sqlx::query_as("SELECT * FROM users WHERE id = ANY($1) AND deleted_at IS NULL")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate, at: DateTime<Utc>) -> StoreResult<User> {
        sqlx::query_as(
            "UPDATE users SET
                name = COALESCE($2, name),
                headline = COALESCE($3, headline),
                avatar_url = COALESCE($4, avatar_url),
                updated_at = $5
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.name)
        .bind(update.headline)
        .bind(update.avatar_url)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role, at: DateTime<Utc>) -> StoreResult<User> {
        sqlx::query_as(
            "UPDATE users SET role = $2, updated_at = $3
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING *",
        )
        .bind(id)
        .bind(role)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn deactivate_user(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_users(&self, query: Option<&str>, offset: i64, limit: i64) -> StoreResult<(Vec<User>, i64)> {
        let pattern = query.map(contains_pattern);
        let users = sqlx::query_as(
            "SELECT * FROM users
             WHERE deleted_at IS NULL AND ($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1)
             ORDER BY created_at DESC
             OFFSET $2 LIMIT $3",
        )
        .bind(&pattern)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users
             WHERE deleted_at IS NULL AND ($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1)",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;
        Ok((users, total))
    }

    async fn users_with_role(&self, role: Role) -> StoreResult<Vec<User>> {
        Ok(sqlx::query_as(
            "SELECT * FROM users WHERE role = $1 AND deleted_at IS NULL ORDER BY name",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn insert_token(&self, token: AuthToken) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO auth_tokens (token_hash, user_id, kind, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.kind)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_token(&self, hash: &str, kind: TokenKind, now: DateTime<Utc>) -> StoreResult<Option<AuthToken>> {
        Ok(sqlx::query_as(
            "SELECT * FROM auth_tokens WHERE token_hash = $1 AND kind = $2 AND expires_at > $3",
        )
        .bind(hash)
        .bind(kind)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn take_token(&self, hash: &str, kind: TokenKind, now: DateTime<Utc>) -> StoreResult<Option<AuthToken>> {
        // A single DELETE makes concurrent takes of the same token race-free.
        Ok(sqlx::query_as(
            "DELETE FROM auth_tokens WHERE token_hash = $1 AND kind = $2 AND expires_at > $3 RETURNING *",
        )
        .bind(hash)
        .bind(kind)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn revoke_user_tokens(&self, user_id: Uuid, kinds: &[TokenKind]) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1 AND kind::text = ANY($2)")
            .bind(user_id)
            .bind(kind_names(kinds))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_oauth_state(&self, state: OAuthState) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO oauth_states (state, provider, pkce_verifier, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&state.state)
        .bind(state.provider)
        .bind(&state.pkce_verifier)
        .bind(state.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        state: &str,
        provider: AuthProvider,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "DELETE FROM oauth_states WHERE state = $1 AND provider = $2 AND expires_at > $3
             RETURNING pkce_verifier",
        )
        .bind(state)
        .bind(provider)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(verifier,)| verifier))
    }
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(sqlx::query_as(
            "SELECT c.* FROM conversations c
             WHERE c.kind = 'direct'
               AND EXISTS (SELECT 1 FROM conversation_participants p WHERE p.conversation_id = c.id AND p.user_id = $1)
               AND EXISTS (SELECT 1 FROM conversation_participants p WHERE p.conversation_id = c.id AND p.user_id = $2)
               AND (SELECT COUNT(*) FROM conversation_participants p WHERE p.conversation_id = c.id) = 2
             ORDER BY c.created_at
             LIMIT 1",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation> {
        let mut tx = self.pool.begin().await?;
        let record: Conversation = sqlx::query_as(
            "INSERT INTO conversations (id, kind, title, created_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(conversation.kind)
        .bind(&conversation.title)
        .bind(conversation.created_by)
        .bind(conversation.created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
             SELECT $1, member, $3 FROM UNNEST($2::uuid[]) AS member
             ON CONFLICT DO NOTHING",
        )
        .bind(record.id)
        .bind(&conversation.participant_ids)
        .bind(conversation.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(sqlx::query_as("SELECT * FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn participant(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<Participant>> {
        Ok(sqlx::query_as(
            "SELECT * FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn participants(&self, conversation_id: Uuid) -> StoreResult<Vec<Participant>> {
        Ok(sqlx::query_as(
            "SELECT * FROM conversation_participants WHERE conversation_id = $1 ORDER BY joined_at",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_conversations(&self, user_id: Uuid) -> StoreResult<Vec<ConversationSummary>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            "SELECT c.*, p.unread_count FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = $1
             ORDER BY COALESCE(c.last_message_at, c.created_at) DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.summarize(rows).await
    }

    async fn conversation_summary(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<ConversationSummary>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT c.*, p.unread_count FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE c.id = $1 AND p.user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(self.summarize(row.into_iter().collect()).await?.pop())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        Ok(sqlx::query_as(
            "SELECT * FROM messages
             WHERE conversation_id = $1 AND deleted_at IS NULL
               AND ($2::timestamptz IS NULL OR created_at < $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query(
            "UPDATE conversations SET last_message_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(message.conversation_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        let record: Message = sqlx::query_as(
            "INSERT INTO messages (id, conversation_id, sender_id, body, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversation_participants SET unread_count = unread_count + 1
             WHERE conversation_id = $1 AND user_id <> $2",
        )
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn find_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        Ok(sqlx::query_as("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_message_body(&self, id: Uuid, body: &str, at: DateTime<Utc>) -> StoreResult<Message> {
        sqlx::query_as(
            "UPDATE messages SET body = $2, edited_at = $3
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING *",
        )
        .bind(id)
        .bind(body)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Message> {
        sqlx::query_as(
            "UPDATE messages SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE conversation_participants SET unread_count = 0, last_read_at = $3
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn unread_total(&self, user_id: Uuid) -> StoreResult<i64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(unread_count), 0)::bigint FROM conversation_participants WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

#[async_trait]
impl JobRepository for PgStore {
    async fn create_job(&self, job: NewJob) -> StoreResult<Job> {
        Ok(sqlx::query_as(
            "INSERT INTO jobs (id, employer_id, title, description, location, employment_type, remote,
                               salary_min, salary_max, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(job.employer_id)
        .bind(&job.title)
        .bind(&job.description)
        .bind(&job.location)
        .bind(job.employment_type)
        .bind(job.remote)
        .bind(job.salary_min)
        .bind(job.salary_max)
        .bind(job.status)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate, at: DateTime<Utc>) -> StoreResult<Job> {
        sqlx::query_as(
            "UPDATE jobs SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                location = COALESCE($4, location),
                employment_type = COALESCE($5, employment_type),
                remote = COALESCE($6, remote),
                salary_min = COALESCE($7, salary_min),
                salary_max = COALESCE($8, salary_max),
                status = COALESCE($9, status),
                updated_at = $10
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.title)
        .bind(update.description)
        .bind(update.location)
        .bind(update.employment_type)
        .bind(update.remote)
        .bind(update.salary_min)
        .bind(update.salary_max)
        .bind(update.status)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn search_jobs(&self, filter: JobFilter) -> StoreResult<(Vec<Job>, i64)> {
        const PREDICATE: &str = "status = 'open'
               AND ($1::text IS NULL OR title ILIKE $1 OR description ILIKE $1)
               AND ($2::text IS NULL OR location ILIKE $2)
               AND ($3::employment_type IS NULL OR employment_type = $3)
               AND ($4::boolean IS NULL OR remote = $4)";

        let query = filter.query.as_deref().map(contains_pattern);
        let location = filter.location.as_deref().map(contains_pattern);

        let jobs = sqlx::query_as(&format!(
            "SELECT * FROM jobs WHERE {PREDICATE} ORDER BY created_at DESC OFFSET $5 LIMIT $6"
        ))
        .bind(&query)
        .bind(&location)
        .bind(filter.employment_type)
        .bind(filter.remote)
        .bind(filter.offset)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM jobs WHERE {PREDICATE}"))
            .bind(&query)
            .bind(&location)
            .bind(filter.employment_type)
            .bind(filter.remote)
            .fetch_one(&self.pool)
            .await?;

        Ok((jobs, total))
    }

    async fn create_application(&self, application: NewApplication) -> StoreResult<JobApplication> {
        Ok(sqlx::query_as(
            "INSERT INTO job_applications (id, job_id, applicant_id, cover_letter, resume_url, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 'submitted', $6, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(application.job_id)
        .bind(application.applicant_id)
        .bind(&application.cover_letter)
        .bind(&application.resume_url)
        .bind(application.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_application(&self, id: Uuid) -> StoreResult<Option<JobApplication>> {
        Ok(sqlx::query_as("SELECT * FROM job_applications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn applications_for_job(&self, job_id: Uuid) -> StoreResult<Vec<JobApplication>> {
        Ok(
            sqlx::query_as("SELECT * FROM job_applications WHERE job_id = $1 ORDER BY created_at")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn applications_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ApplicationWithJob>> {
        let rows: Vec<ApplicationRow> = sqlx::query_as(
            "SELECT a.*, j.title AS job_title FROM job_applications a
             JOIN jobs j ON j.id = a.job_id
             WHERE a.applicant_id = $1
             ORDER BY a.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ApplicationWithJob {
                application: row.application,
                job_title: row.job_title,
            })
            .collect())
    }

    async fn set_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<JobApplication> {
        sqlx::query_as(
            "UPDATE job_applications SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl MentorshipRepository for PgStore {
    async fn create_session(&self, session: NewMentorSession) -> StoreResult<MentorSession> {
        let mut tx = self.pool.begin().await?;

        // Serialises bookings per mentor so the overlap check and insert are atomic.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(session.mentor_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        let (clash,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                SELECT 1 FROM mentor_sessions
                WHERE mentor_id = $1
                  AND status IN ('requested', 'confirmed')
                  AND scheduled_at < $3
                  AND $2 < scheduled_at + make_interval(mins => duration_minutes)
             )",
        )
        .bind(session.mentor_id)
        .bind(session.scheduled_at)
        .bind(session.ends_at())
        .fetch_one(&mut *tx)
        .await?;
        if clash {
            return Err(StoreError::Conflict("mentor is already booked for that time".into()));
        }

        let record: MentorSession = sqlx::query_as(
            "INSERT INTO mentor_sessions (id, mentor_id, mentee_id, scheduled_at, duration_minutes, topic,
                                          status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'requested', $7, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(session.mentor_id)
        .bind(session.mentee_id)
        .bind(session.scheduled_at)
        .bind(session.duration_minutes)
        .bind(&session.topic)
        .bind(session.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<MentorSession>> {
        Ok(sqlx::query_as("SELECT * FROM mentor_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        meeting_url: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<MentorSession> {
        sqlx::query_as(
            "UPDATE mentor_sessions SET status = $2, meeting_url = COALESCE($3, meeting_url), updated_at = $4
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(meeting_url)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn sessions_for_user(
        &self,
        user_id: Uuid,
        from: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<MentorSession>> {
        Ok(sqlx::query_as(
            "SELECT * FROM mentor_sessions
             WHERE (mentor_id = $1 OR mentee_id = $1)
               AND ($2::timestamptz IS NULL OR scheduled_at >= $2)
             ORDER BY scheduled_at",
        )
        .bind(user_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl SocialRepository for PgStore {
    async fn create_post(&self, post: NewPost) -> StoreResult<SocialPost> {
        Ok(sqlx::query_as(
            "INSERT INTO social_posts (id, author_id, body, image_url, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(post.author_id)
        .bind(&post.body)
        .bind(&post.image_url)
        .bind(post.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_post(&self, id: Uuid) -> StoreResult<Option<SocialPost>> {
        Ok(sqlx::query_as("SELECT * FROM social_posts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn feed(&self, viewer: Uuid, offset: i64, limit: i64) -> StoreResult<(Vec<FeedEntry>, i64)> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            "{FEED_SELECT} WHERE p.deleted_at IS NULL ORDER BY p.created_at DESC OFFSET $2 LIMIT $3"
        ))
        .bind(viewer)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM social_posts WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok((rows.into_iter().map(FeedEntry::from).collect(), total))
    }

    async fn feed_entry(&self, viewer: Uuid, post_id: Uuid) -> StoreResult<Option<FeedEntry>> {
        let row: Option<FeedRow> = sqlx::query_as(&format!(
            "{FEED_SELECT} WHERE p.id = $2 AND p.deleted_at IS NULL"
        ))
        .bind(viewer)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedEntry::from))
    }

    async fn soft_delete_post(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE social_posts SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn like_post(&self, post_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO post_likes (post_id, user_id, created_at) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(post_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;
        if inserted {
            sqlx::query("UPDATE social_posts SET like_count = like_count + 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn unlike_post(&self, post_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        if removed {
            sqlx::query("UPDATE social_posts SET like_count = like_count - 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn add_comment(&self, comment: NewComment) -> StoreResult<PostComment> {
        let mut tx = self.pool.begin().await?;
        let bumped = sqlx::query(
            "UPDATE social_posts SET comment_count = comment_count + 1 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(comment.post_id)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        let record: PostComment = sqlx::query_as(
            "INSERT INTO post_comments (id, post_id, author_id, body, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(comment.post_id)
        .bind(comment.author_id)
        .bind(&comment.body)
        .bind(comment.created_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn comments(&self, post_id: Uuid) -> StoreResult<Vec<CommentEntry>> {
        let rows: Vec<CommentRow> = sqlx::query_as(
            "SELECT c.*, u.name AS author_name, u.headline AS author_headline, u.avatar_url AS author_avatar_url
             FROM post_comments c JOIN users u ON u.id = c.author_id
             WHERE c.post_id = $1
             ORDER BY c.created_at",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| CommentEntry {
                author: UserSummary {
                    id: row.comment.author_id,
                    name: row.author_name,
                    headline: row.author_headline,
                    avatar_url: row.author_avatar_url,
                },
                comment: row.comment,
            })
            .collect())
    }
}

#[async_trait]
impl BillingRepository for PgStore {
    async fn find_subscription(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_subscription_by_customer(&self, customer_id: &str) -> StoreResult<Option<Subscription>> {
        Ok(
            sqlx::query_as("SELECT * FROM subscriptions WHERE stripe_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn upsert_subscription(&self, subscription: Subscription) -> StoreResult<Subscription> {
        Ok(sqlx::query_as(
            "INSERT INTO subscriptions (user_id, stripe_customer_id, stripe_subscription_id, plan, status,
                                        current_period_end, cancel_at_period_end, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (user_id) DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                plan = EXCLUDED.plan,
                status = EXCLUDED.status,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                updated_at = EXCLUDED.updated_at
             RETURNING *",
        )
        .bind(subscription.user_id)
        .bind(&subscription.stripe_customer_id)
        .bind(&subscription.stripe_subscription_id)
        .bind(subscription.plan)
        .bind(subscription.status)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.updated_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn record_stripe_event(&self, event_id: &str, kind: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO stripe_events (id, kind, received_at) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(kind)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn create_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        Ok(sqlx::query_as(
            "INSERT INTO notifications (id, user_id, kind, title, body, link, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(notification.user_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.link)
        .bind(notification.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_notifications(&self, user_id: Uuid, unread_only: bool, limit: i64) -> StoreResult<Vec<Notification>> {
        Ok(sqlx::query_as(
            "SELECT * FROM notifications
             WHERE user_id = $1 AND (NOT $2 OR read_at IS NULL)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = COALESCE(read_at, $3) WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = $2 WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl PgStore {
    async fn counts(&self, sql: &str) -> StoreResult<std::collections::BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    async fn count_since(&self, sql: &str, since: DateTime<Utc>) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(sql).bind(since).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[async_trait]
impl AnalyticsRepository for PgStore {
    async fn platform_stats(&self, since: DateTime<Utc>) -> StoreResult<PlatformStats> {
        Ok(PlatformStats {
            users_by_role: self
                .counts("SELECT role::text, COUNT(*) FROM users WHERE deleted_at IS NULL GROUP BY role")
                .await?,
            new_users: self
                .count_since(
                    "SELECT COUNT(*) FROM users WHERE deleted_at IS NULL AND created_at >= $1",
                    since,
                )
                .await?,
            jobs_by_status: self
                .counts("SELECT status::text, COUNT(*) FROM jobs GROUP BY status")
                .await?,
            applications_by_status: self
                .counts("SELECT status::text, COUNT(*) FROM job_applications GROUP BY status")
                .await?,
            sessions_by_status: self
                .counts("SELECT status::text, COUNT(*) FROM mentor_sessions GROUP BY status")
                .await?,
            new_posts: self
                .count_since(
                    "SELECT COUNT(*) FROM social_posts WHERE deleted_at IS NULL AND created_at >= $1",
                    since,
                )
                .await?,
            new_messages: self
                .count_since(
                    "SELECT COUNT(*) FROM messages WHERE deleted_at IS NULL AND created_at >= $1",
                    since,
                )
                .await?,
            active_subscriptions_by_plan: self
                .counts(
                    "SELECT plan::text, COUNT(*) FROM subscriptions
                     WHERE status IN ('active', 'trialing') GROUP BY plan",
                )
                .await?,
        })
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::*;
use crate::page::slice;
use crate::repo::*;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tokens: HashMap<String, AuthToken>,
    oauth_states: HashMap<String, OAuthState>,
    conversations: HashMap<Uuid, Conversation>,
    participants: Vec<Participant>,
    messages: Vec<Message>,
    jobs: HashMap<Uuid, Job>,
    applications: HashMap<Uuid, JobApplication>,
    sessions: HashMap<Uuid, MentorSession>,
    posts: HashMap<Uuid, SocialPost>,
    likes: HashSet<(Uuid, Uuid)>,
    comments: Vec<PostComment>,
    subscriptions: HashMap<Uuid, Subscription>,
    stripe_events: HashSet<String>,
    notifications: Vec<Notification>,
}

impl Tables {
    fn active_user(&self, id: Uuid) -> Option<&User> {
        self.users.get(&id).filter(|u| u.is_active())
    }

    fn summary_of(&self, id: Uuid) -> UserSummary {
        match self.users.get(&id) {
            Some(user) => user.to_summary(),
            None => UserSummary {
                id,
                name: String::new(),
                headline: None,
                avatar_url: None,
            },
        }
    }

    fn members(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .map(|p| p.user_id)
            .collect()
    }

    fn summary(&self, conversation: &Conversation, user_id: Uuid) -> Option<ConversationSummary> {
        let me = self
            .participants
            .iter()
            .find(|p| p.conversation_id == conversation.id && p.user_id == user_id)?;
        let participants = self
            .members(conversation.id)
            .into_iter()
            .map(|id| self.summary_of(id))
            .collect();
        let last_message = self
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation.id && m.deleted_at.is_none())
            .max_by_key(|m| m.created_at)
            .cloned();
        Some(ConversationSummary {
            conversation: conversation.clone(),
            participants,
            last_message,
            unread_count: me.unread_count,
        })
    }

    fn feed_entry(&self, post: &SocialPost, viewer: Uuid) -> FeedEntry {
        FeedEntry {
            post: post.clone(),
            author: self.summary_of(post.author_id),
            liked_by_me: self.likes.contains(&(post.id, viewer)),
        }
    }
}

/// In-memory [`Store`] for tests and local demos.
///
/// All tables sit behind one mutex, so every repository method is atomic with
/// respect to every other.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut t = self.lock();
        let taken = t.users.values().any(|u| {
            (u.is_active() && u.email == user.email)
                || (u.provider == user.provider && u.provider_id == user.provider_id)
        });
        if taken {
            return Err(StoreError::Conflict("account already exists".into()));
        }
        let now = Utc::now();
        let record = User {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            headline: None,
            avatar_url: user.avatar_url,
            role: user.role,
            provider: user.provider,
            provider_id: user.provider_id,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn upsert_oauth_user(&self, user: NewUser) -> StoreResult<User> {
        let existing = {
            let mut t = self.lock();
            let found = t
                .users
                .values_mut()
                .find(|u| u.provider == user.provider && u.provider_id == user.provider_id);
            found.map(|u| {
                u.email = user.email.clone();
                u.name = user.name.clone();
                u.avatar_url = user.avatar_url.clone();
                u.updated_at = Utc::now();
                u.clone()
            })
        };
        match existing {
            Some(u) => Ok(u),
            None => self.create_user(user).await,
        }
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.is_active() && u.email == email)
            .cloned())
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        let t = self.lock();
        Ok(ids.iter().filter_map(|id| t.active_user(*id).cloned()).collect())
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate, at: DateTime<Utc>) -> StoreResult<User> {
        let mut t = self.lock();
        let user = t.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(headline) = update.headline {
            user.headline = Some(headline);
        }
        if let Some(avatar_url) = update.avatar_url {
            user.avatar_url = Some(avatar_url);
        }
        user.updated_at = at;
        Ok(user.clone())
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.lock();
        let user = t.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = Some(hash.to_string());
        user.updated_at = at;
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role, at: DateTime<Utc>) -> StoreResult<User> {
        let mut t = self.lock();
        let user = t
            .users
            .get_mut(&id)
            .filter(|u| u.is_active())
            .ok_or(StoreError::NotFound)?;
        user.role = role;
        user.updated_at = at;
        Ok(user.clone())
    }

    async fn deactivate_user(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.lock();
        let user = t
            .users
            .get_mut(&id)
            .filter(|u| u.is_active())
            .ok_or(StoreError::NotFound)?;
        user.deleted_at = Some(at);
        user.updated_at = at;
        Ok(())
    }

    async fn list_users(&self, query: Option<&str>, offset: i64, limit: i64) -> StoreResult<(Vec<User>, i64)> {
        let t = self.lock();
        let needle = query.map(str::to_lowercase);
        let mut users: Vec<User> = t
            .users
            .values()
            .filter(|u| u.is_active())
            .filter(|u| match &needle {
                Some(q) => u.name.to_lowercase().contains(q) || u.email.contains(q),
                None => true,
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = users.len() as i64;
        Ok((slice(&users, offset, limit), total))
    }

    async fn users_with_role(&self, role: Role) -> StoreResult<Vec<User>> {
        let t = self.lock();
        let mut users: Vec<User> = t
            .users
            .values()
            .filter(|u| u.is_active() && u.role == role)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert_token(&self, token: AuthToken) -> StoreResult<()> {
        self.lock().tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn find_token(&self, hash: &str, kind: TokenKind, now: DateTime<Utc>) -> StoreResult<Option<AuthToken>> {
        Ok(self
            .lock()
            .tokens
            .get(hash)
            .filter(|t| t.kind == kind && t.expires_at > now)
            .cloned())
    }

    async fn take_token(&self, hash: &str, kind: TokenKind, now: DateTime<Utc>) -> StoreResult<Option<AuthToken>> {
        let mut t = self.lock();
        let matches = t
            .tokens
            .get(hash)
            .is_some_and(|t| t.kind == kind && t.expires_at > now);
        Ok(if matches { t.tokens.remove(hash) } else { None })
    }

    async fn revoke_user_tokens(&self, user_id: Uuid, kinds: &[TokenKind]) -> StoreResult<u64> {
        let mut t = self.lock();
        let before = t.tokens.len();
        t.tokens
            .retain(|_, tok| !(tok.user_id == user_id && kinds.contains(&tok.kind)));
        Ok((before - t.tokens.len()) as u64)
    }

    async fn insert_oauth_state(&self, state: OAuthState) -> StoreResult<()> {
        self.lock().oauth_states.insert(state.state.clone(), state);
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        state: &str,
        provider: AuthProvider,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<String>> {
        let mut t = self.lock();
        let valid = t
            .oauth_states
            .get(state)
            .is_some_and(|s| s.provider == provider && s.expires_at > now);
        Ok(if valid {
            t.oauth_states.remove(state).map(|s| s.pkce_verifier)
        } else {
            None
        })
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<Option<Conversation>> {
        let t = self.lock();
        let mut wanted = [a, b];
        wanted.sort();
        Ok(t.conversations
            .values()
            .filter(|c| c.kind == ConversationKind::Direct)
            .find(|c| {
                let mut members = t.members(c.id);
                members.sort();
                members == wanted
            })
            .cloned())
    }

    async fn create_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation> {
        let mut t = self.lock();
        let record = Conversation {
            id: Uuid::new_v4(),
            kind: conversation.kind,
            title: conversation.title,
            created_by: conversation.created_by,
            created_at: conversation.created_at,
            updated_at: conversation.created_at,
            last_message_at: None,
        };
        let mut seen = HashSet::new();
        for user_id in conversation.participant_ids {
            if seen.insert(user_id) {
                t.participants.push(Participant {
                    conversation_id: record.id,
                    user_id,
                    joined_at: conversation.created_at,
                    last_read_at: None,
                    unread_count: 0,
                });
            }
        }
        t.conversations.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.lock().conversations.get(&id).cloned())
    }

    async fn participant(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<Participant>> {
        Ok(self
            .lock()
            .participants
            .iter()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
            .cloned())
    }

    async fn participants(&self, conversation_id: Uuid) -> StoreResult<Vec<Participant>> {
        Ok(self
            .lock()
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn list_conversations(&self, user_id: Uuid) -> StoreResult<Vec<ConversationSummary>> {
        let t = self.lock();
        let mut summaries: Vec<ConversationSummary> = t
            .conversations
            .values()
            .filter_map(|c| t.summary(c, user_id))
            .collect();
        summaries.sort_by(|a, b| b.conversation.activity_at().cmp(&a.conversation.activity_at()));
        Ok(summaries)
    }

    async fn conversation_summary(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<ConversationSummary>> {
        let t = self.lock();
        Ok(t.conversations
            .get(&conversation_id)
            .and_then(|c| t.summary(c, user_id)))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        let t = self.lock();
        let mut messages: Vec<Message> = t
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.deleted_at.is_none())
            .filter(|m| before.is_none_or(|cursor| m.created_at < cursor))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(slice(&messages, 0, limit))
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut t = self.lock();
        let conversation = t
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(StoreError::NotFound)?;
        conversation.last_message_at = Some(message.created_at);
        conversation.updated_at = message.created_at;
        for p in t
            .participants
            .iter_mut()
            .filter(|p| p.conversation_id == message.conversation_id && p.user_id != message.sender_id)
        {
            p.unread_count += 1;
        }
        let record = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at: message.created_at,
            edited_at: None,
            deleted_at: None,
        };
        t.messages.push(record.clone());
        Ok(record)
    }

    async fn find_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        Ok(self.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn update_message_body(&self, id: Uuid, body: &str, at: DateTime<Utc>) -> StoreResult<Message> {
        let mut t = self.lock();
        let message = t
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.deleted_at.is_none())
            .ok_or(StoreError::NotFound)?;
        message.body = body.to_string();
        message.edited_at = Some(at);
        Ok(message.clone())
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Message> {
        let mut t = self.lock();
        let message = t
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.deleted_at.is_none())
            .ok_or(StoreError::NotFound)?;
        message.deleted_at = Some(at);
        Ok(message.clone())
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.lock();
        let p = t
            .participants
            .iter_mut()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
            .ok_or(StoreError::NotFound)?;
        p.unread_count = 0;
        p.last_read_at = Some(at);
        Ok(())
    }

    async fn unread_total(&self, user_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .lock()
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| i64::from(p.unread_count))
            .sum())
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn create_job(&self, job: NewJob) -> StoreResult<Job> {
        let record = Job {
            id: Uuid::new_v4(),
            employer_id: job.employer_id,
            title: job.title,
            description: job.description,
            location: job.location,
            employment_type: job.employment_type,
            remote: job.remote,
            salary_min: job.salary_min,
            salary_max: job.salary_max,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.created_at,
        };
        self.lock().jobs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate, at: DateTime<Utc>) -> StoreResult<Job> {
        let mut t = self.lock();
        let job = t.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        update.apply_to(job, at);
        Ok(job.clone())
    }

    async fn search_jobs(&self, filter: JobFilter) -> StoreResult<(Vec<Job>, i64)> {
        let t = self.lock();
        let mut jobs: Vec<Job> = t.jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = jobs.len() as i64;
        Ok((slice(&jobs, filter.offset, filter.limit), total))
    }

    async fn create_application(&self, application: NewApplication) -> StoreResult<JobApplication> {
        let mut t = self.lock();
        if t
            .applications
            .values()
            .any(|a| a.job_id == application.job_id && a.applicant_id == application.applicant_id)
        {
            return Err(StoreError::Conflict("already applied to this job".into()));
        }
        let record = JobApplication {
            id: Uuid::new_v4(),
            job_id: application.job_id,
            applicant_id: application.applicant_id,
            cover_letter: application.cover_letter,
            resume_url: application.resume_url,
            status: ApplicationStatus::Submitted,
            created_at: application.created_at,
            updated_at: application.created_at,
        };
        t.applications.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_application(&self, id: Uuid) -> StoreResult<Option<JobApplication>> {
        Ok(self.lock().applications.get(&id).cloned())
    }

    async fn applications_for_job(&self, job_id: Uuid) -> StoreResult<Vec<JobApplication>> {
        let t = self.lock();
        let mut apps: Vec<JobApplication> = t
            .applications
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(apps)
    }

    async fn applications_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ApplicationWithJob>> {
        let t = self.lock();
        let mut apps: Vec<ApplicationWithJob> = t
            .applications
            .values()
            .filter(|a| a.applicant_id == user_id)
            .map(|a| ApplicationWithJob {
                application: a.clone(),
                job_title: t.jobs.get(&a.job_id).map(|j| j.title.clone()).unwrap_or_default(),
            })
            .collect();
        apps.sort_by(|a, b| b.application.created_at.cmp(&a.application.created_at));
        Ok(apps)
    }

    async fn set_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<JobApplication> {
        let mut t = self.lock();
        let app = t.applications.get_mut(&id).ok_or(StoreError::NotFound)?;
        app.status = status;
        app.updated_at = at;
        Ok(app.clone())
    }
}

#[async_trait]
impl MentorshipRepository for MemoryStore {
    async fn create_session(&self, session: NewMentorSession) -> StoreResult<MentorSession> {
        let mut t = self.lock();
        let (start, end) = (session.scheduled_at, session.ends_at());
        let clash = t.sessions.values().any(|s| {
            s.mentor_id == session.mentor_id && s.status.is_active() && s.overlaps(start, end)
        });
        if clash {
            return Err(StoreError::Conflict("mentor is already booked for that time".into()));
        }
        let record = MentorSession {
            id: Uuid::new_v4(),
            mentor_id: session.mentor_id,
            mentee_id: session.mentee_id,
            scheduled_at: session.scheduled_at,
            duration_minutes: session.duration_minutes,
            topic: session.topic,
            status: SessionStatus::Requested,
            meeting_url: None,
            created_at: session.created_at,
            updated_at: session.created_at,
        };
        t.sessions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<MentorSession>> {
        Ok(self.lock().sessions.get(&id).cloned())
    }

    async fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        meeting_url: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<MentorSession> {
        let mut t = self.lock();
        let session = t.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.status = status;
        if meeting_url.is_some() {
            session.meeting_url = meeting_url;
        }
        session.updated_at = at;
        Ok(session.clone())
    }

    async fn sessions_for_user(
        &self,
        user_id: Uuid,
        from: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<MentorSession>> {
        let t = self.lock();
        let mut sessions: Vec<MentorSession> = t
            .sessions
            .values()
            .filter(|s| s.mentor_id == user_id || s.mentee_id == user_id)
            .filter(|s| from.is_none_or(|f| s.scheduled_at >= f))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(sessions)
    }
}

#[async_trait]
impl SocialRepository for MemoryStore {
    async fn create_post(&self, post: NewPost) -> StoreResult<SocialPost> {
        let record = SocialPost {
            id: Uuid::new_v4(),
            author_id: post.author_id,
            body: post.body,
            image_url: post.image_url,
            like_count: 0,
            comment_count: 0,
            created_at: post.created_at,
            updated_at: post.created_at,
            deleted_at: None,
        };
        self.lock().posts.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_post(&self, id: Uuid) -> StoreResult<Option<SocialPost>> {
        Ok(self.lock().posts.get(&id).cloned())
    }

    async fn feed(&self, viewer: Uuid, offset: i64, limit: i64) -> StoreResult<(Vec<FeedEntry>, i64)> {
        let t = self.lock();
        let mut posts: Vec<&SocialPost> = t.posts.values().filter(|p| p.deleted_at.is_none()).collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = posts.len() as i64;
        let entries: Vec<FeedEntry> = posts.into_iter().map(|p| t.feed_entry(p, viewer)).collect();
        Ok((slice(&entries, offset, limit), total))
    }

    async fn feed_entry(&self, viewer: Uuid, post_id: Uuid) -> StoreResult<Option<FeedEntry>> {
        let t = self.lock();
        Ok(t.posts
            .get(&post_id)
            .filter(|p| p.deleted_at.is_none())
            .map(|p| t.feed_entry(p, viewer)))
    }

    async fn soft_delete_post(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.lock();
        let post = t
            .posts
            .get_mut(&id)
            .filter(|p| p.deleted_at.is_none())
            .ok_or(StoreError::NotFound)?;
        post.deleted_at = Some(at);
        post.updated_at = at;
        Ok(())
    }

    async fn like_post(&self, post_id: Uuid, user_id: Uuid, _at: DateTime<Utc>) -> StoreResult<bool> {
        let mut t = self.lock();
        if !t.posts.contains_key(&post_id) {
            return Err(StoreError::NotFound);
        }
        let inserted = t.likes.insert((post_id, user_id));
        if inserted {
            if let Some(post) = t.posts.get_mut(&post_id) {
                post.like_count += 1;
            }
        }
        Ok(inserted)
    }

    async fn unlike_post(&self, post_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut t = self.lock();
        let removed = t.likes.remove(&(post_id, user_id));
        if removed {
            if let Some(post) = t.posts.get_mut(&post_id) {
                post.like_count -= 1;
            }
        }
        Ok(removed)
    }

    async fn add_comment(&self, comment: NewComment) -> StoreResult<PostComment> {
        let mut t = self.lock();
        let post = t
            .posts
            .get_mut(&comment.post_id)
            .filter(|p| p.deleted_at.is_none())
            .ok_or(StoreError::NotFound)?;
        post.comment_count += 1;
        let record = PostComment {
            id: Uuid::new_v4(),
            post_id: comment.post_id,
            author_id: comment.author_id,
            body: comment.body,
            created_at: comment.created_at,
        };
        t.comments.push(record.clone());
        Ok(record)
    }

    async fn comments(&self, post_id: Uuid) -> StoreResult<Vec<CommentEntry>> {
        let t = self.lock();
        let mut comments: Vec<CommentEntry> = t
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .map(|c| CommentEntry {
                comment: c.clone(),
                author: t.summary_of(c.author_id),
            })
            .collect();
        comments.sort_by(|a, b| a.comment.created_at.cmp(&b.comment.created_at));
        Ok(comments)
    }
}

#[async_trait]
impl BillingRepository for MemoryStore {
    async fn find_subscription(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self.lock().subscriptions.get(&user_id).cloned())
    }

    async fn find_subscription_by_customer(&self, customer_id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .find(|s| s.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn upsert_subscription(&self, subscription: Subscription) -> StoreResult<Subscription> {
        self.lock()
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(subscription)
    }

    async fn record_stripe_event(&self, event_id: &str, _kind: &str, _at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.lock().stripe_events.insert(event_id.to_string()))
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn create_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        let record = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            link: notification.link,
            read_at: None,
            created_at: notification.created_at,
        };
        self.lock().notifications.push(record.clone());
        Ok(record)
    }

    async fn list_notifications(&self, user_id: Uuid, unread_only: bool, limit: i64) -> StoreResult<Vec<Notification>> {
        let t = self.lock();
        let mut items: Vec<Notification> = t
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && (!unread_only || n.read_at.is_none()))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(slice(&items, 0, limit))
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> StoreResult<i64> {
        let t = self.lock();
        let unread = t
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && n.read_at.is_none())
            .count();
        Ok(unread as i64)
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut t = self.lock();
        match t
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        {
            Some(n) => {
                n.read_at.get_or_insert(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.lock();
        let mut changed = 0;
        for n in t
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && n.read_at.is_none())
        {
            n.read_at = Some(at);
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl AnalyticsRepository for MemoryStore {
    async fn platform_stats(&self, since: DateTime<Utc>) -> StoreResult<PlatformStats> {
        let t = self.lock();
        let mut stats = PlatformStats::default();
        for user in t.users.values().filter(|u| u.is_active()) {
            *stats.users_by_role.entry(user.role.to_string()).or_default() += 1;
            if user.created_at >= since {
                stats.new_users += 1;
            }
        }
        for job in t.jobs.values() {
            *stats.jobs_by_status.entry(job.status.to_string()).or_default() += 1;
        }
        for app in t.applications.values() {
            *stats
                .applications_by_status
                .entry(app.status.to_string())
                .or_default() += 1;
        }
        for session in t.sessions.values() {
            *stats
                .sessions_by_status
                .entry(session.status.to_string())
                .or_default() += 1;
        }
        stats.new_posts = t
            .posts
            .values()
            .filter(|p| p.deleted_at.is_none() && p.created_at >= since)
            .count() as i64;
        stats.new_messages = t
            .messages
            .iter()
            .filter(|m| m.deleted_at.is_none() && m.created_at >= since)
            .count() as i64;
        for sub in t.subscriptions.values().filter(|s| s.status.is_entitled()) {
            *stats
                .active_subscriptions_by_plan
                .entry(sub.plan.to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            avatar_url: None,
            role,
            provider: AuthProvider::Local,
            provider_id: email.to_string(),
            password_hash: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store.create_user(new_user("ada@example.org", Role::Member)).await.unwrap();
        let err = store
            .create_user(new_user("ada@example.org", Role::Member))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_insert_message_bumps_other_participants_only() {
        let store = MemoryStore::new();
        let a = store.create_user(new_user("a@example.org", Role::Member)).await.unwrap();
        let b = store.create_user(new_user("b@example.org", Role::Member)).await.unwrap();
        let now = Utc::now();
        let convo = store
            .create_conversation(NewConversation {
                kind: ConversationKind::Direct,
                title: None,
                created_by: a.id,
                participant_ids: vec![a.id, b.id],
                created_at: now,
            })
            .await
            .unwrap();

        store
            .insert_message(NewMessage {
                conversation_id: convo.id,
                sender_id: a.id,
                body: "yaama".into(),
                created_at: now + Duration::seconds(1),
            })
            .await
            .unwrap();

        assert_eq!(store.unread_total(a.id).await.unwrap(), 0);
        assert_eq!(store.unread_total(b.id).await.unwrap(), 1);

        let found = store.find_direct_conversation(b.id, a.id).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(convo.id));

        let inbox = store.list_conversations(b.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].unread_count, 1);
        assert_eq!(inbox[0].last_message.as_ref().map(|m| m.body.as_str()), Some("yaama"));

        store.mark_read(convo.id, b.id, Utc::now()).await.unwrap();
        assert_eq!(store.unread_total(b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_take_token_is_single_use() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_token(AuthToken {
                token_hash: "abc".into(),
                user_id: Uuid::new_v4(),
                kind: TokenKind::Refresh,
                expires_at: now + Duration::days(1),
                created_at: now,
            })
            .await
            .unwrap();
        assert!(store.find_token("abc", TokenKind::Access, now).await.unwrap().is_none());
        assert!(store.take_token("abc", TokenKind::Refresh, now).await.unwrap().is_some());
        assert!(store.take_token("abc", TokenKind::Refresh, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("c@example.org", Role::Member)).await.unwrap();
        let post = store
            .create_post(NewPost {
                author_id: user.id,
                body: "Deadly news".into(),
                image_url: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.like_post(post.id, user.id, Utc::now()).await.unwrap());
        assert!(!store.like_post(post.id, user.id, Utc::now()).await.unwrap());
        let entry = store.feed_entry(user.id, post.id).await.unwrap().unwrap();
        assert_eq!(entry.post.like_count, 1);
        assert!(entry.liked_by_me);
        assert!(store.unlike_post(post.id, user.id).await.unwrap());
        assert!(!store.unlike_post(post.id, user.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_session_conflicts() {
        let store = MemoryStore::new();
        let mentor = Uuid::new_v4();
        let start = Utc::now() + Duration::days(1);
        let request = |mentee: Uuid, at: DateTime<Utc>| NewMentorSession {
            mentor_id: mentor,
            mentee_id: mentee,
            scheduled_at: at,
            duration_minutes: 60,
            topic: "Interview prep".into(),
            created_at: Utc::now(),
        };
        let first = store.create_session(request(Uuid::new_v4(), start)).await.unwrap();
        let err = store
            .create_session(request(Uuid::new_v4(), start + Duration::minutes(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .set_session_status(first.id, SessionStatus::Cancelled, None, Utc::now())
            .await
            .unwrap();
        store
            .create_session(request(Uuid::new_v4(), start + Duration::minutes(30)))
            .await
            .unwrap();
    }
}

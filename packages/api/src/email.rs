//! # Transactional email
//!
//! [`EmailTemplate`] renders a subject, a plain-text body and an HTML body.
//! Values supplied by users (names, job titles, topics) are escaped in the HTML.
//!
//! Delivery goes through the [`Mailer`] trait. The server installs [`LogMailer`],
//! which writes each message to the tracing log; tests use [`MemoryMailer`].
//! [`deliver`] never fails: a delivery error is logged and the request carries on.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use store::models::{ApplicationStatus, Plan};
use thiserror::Error;

use crate::state::AppState;

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub enum EmailTemplate {
    Welcome {
        name: String,
    },
    PasswordReset {
        name: String,
        reset_url: String,
        expires_minutes: i64,
    },
    ApplicationStatus {
        name: String,
        job_title: String,
        status: ApplicationStatus,
    },
    SessionConfirmed {
        name: String,
        mentor_name: String,
        topic: String,
        scheduled_at: DateTime<Utc>,
        meeting_url: Option<String>,
    },
    PaymentFailed {
        name: String,
        plan: Plan,
        billing_url: String,
    },
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn status_phrase(status: ApplicationStatus) -> &'static str {
    match status {
        ApplicationStatus::Submitted => "has been received",
        ApplicationStatus::Reviewing => "is being reviewed",
        ApplicationStatus::Interview => "has progressed to interview",
        ApplicationStatus::Offered => "has resulted in an offer",
        ApplicationStatus::Rejected => "was not successful this time",
        ApplicationStatus::Withdrawn => "has been withdrawn",
    }
}

impl EmailTemplate {
    pub fn subject(&self) -> String {
        match self {
            Self::Welcome { .. } => "Welcome to Ngurra Pathways".to_string(),
            Self::PasswordReset { .. } => "Reset your Ngurra Pathways password".to_string(),
            Self::ApplicationStatus { job_title, .. } => format!("Update on your application: {job_title}"),
            Self::SessionConfirmed { .. } => "Your mentoring session is confirmed".to_string(),
            Self::PaymentFailed { .. } => "Payment failed for your subscription".to_string(),
        }
    }

    /// Paragraphs of the message; each is `(text, html)`.
    fn paragraphs(&self) -> Vec<(String, String)> {
        match self {
            Self::Welcome { name } => vec![
                (format!("Hi {name},"), format!("Hi {},", escape_html(name))),
                (
                    "Welcome to Ngurra Pathways. Your account is ready: browse jobs, connect with mentors and join the conversation.".to_string(),
                    "Welcome to Ngurra Pathways. Your account is ready: browse jobs, connect with mentors and join the conversation.".to_string(),
                ),
            ],
            Self::PasswordReset { name, reset_url, expires_minutes } => vec![
                (format!("Hi {name},"), format!("Hi {},", escape_html(name))),
                (
                    format!("Reset your password here: {reset_url}"),
                    format!(
                        "<a href=\"{}\">Reset your password</a>",
                        escape_html(reset_url)
                    ),
                ),
                (
                    format!("This link expires in {expires_minutes} minutes. If you did not ask for it, ignore this email."),
                    format!("This link expires in {expires_minutes} minutes. If you did not ask for it, ignore this email."),
                ),
            ],
            Self::ApplicationStatus { name, job_title, status } => vec![
                (format!("Hi {name},"), format!("Hi {},", escape_html(name))),
                (
                    format!("Your application for {job_title} {}.", status_phrase(*status)),
                    format!(
                        "Your application for <strong>{}</strong> {}.",
                        escape_html(job_title),
                        status_phrase(*status)
                    ),
                ),
            ],
            Self::SessionConfirmed { name, mentor_name, topic, scheduled_at, meeting_url } => {
                let when = scheduled_at.format("%A %-d %B %Y, %H:%M UTC").to_string();
                let mut paragraphs = vec![
                    (format!("Hi {name},"), format!("Hi {},", escape_html(name))),
                    (
                        format!("{mentor_name} confirmed your session \"{topic}\" on {when}."),
                        format!(
                            "{} confirmed your session <em>{}</em> on {when}.",
                            escape_html(mentor_name),
                            escape_html(topic)
                        ),
                    ),
                ];
                if let Some(url) = meeting_url {
                    paragraphs.push((
                        format!("Join here: {url}"),
                        format!("<a href=\"{}\">Join the meeting</a>", escape_html(url)),
                    ));
                }
                paragraphs
            }
            Self::PaymentFailed { name, plan, billing_url } => vec![
                (format!("Hi {name},"), format!("Hi {},", escape_html(name))),
                (
                    format!("We could not process the payment for your {plan} plan. Update your payment details: {billing_url}"),
                    format!(
                        "We could not process the payment for your {plan} plan. <a href=\"{}\">Update your payment details</a>.",
                        escape_html(billing_url)
                    ),
                ),
            ],
        }
    }

    pub fn render(&self, to: &str) -> Email {
        let paragraphs = self.paragraphs();
        let text = paragraphs
            .iter()
            .map(|(text, _)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let body: String = paragraphs
            .iter()
            .map(|(_, html)| format!("<p>{html}</p>"))
            .collect();
        Email {
            to: to.to_string(),
            subject: self.subject(),
            text: format!("{text}\n\nNgurra Pathways"),
            html: format!("<!doctype html><html><body>{body}<p>Ngurra Pathways</p></body></html>"),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Writes each message to the log instead of sending it.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        tracing::info!(from = %self.from, to = %email.to, subject = %email.subject, "email");
        tracing::debug!(body = %email.text);
        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(email);
        Ok(())
    }
}

/// Render and send, logging failures.
pub async fn deliver(state: &AppState, to: &str, template: EmailTemplate) {
    let email = template.render(to);
    let subject = email.subject.clone();
    if let Err(e) = state.mailer.send(email).await {
        tracing::error!(to = %to, subject = %subject, "Failed to send email: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_user_values_escaped_in_html_only() {
        let email = EmailTemplate::ApplicationStatus {
            name: "Ash <script>".into(),
            job_title: "Ranger & Guide".into(),
            status: ApplicationStatus::Interview,
        }
        .render("ash@example.org");

        assert_eq!(email.subject, "Update on your application: Ranger & Guide");
        assert!(email.text.contains("Ranger & Guide has progressed to interview"));
        assert!(email.html.contains("Ranger &amp; Guide"));
        assert!(email.html.contains("Ash &lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
    }

    #[test]
    fn test_session_confirmed_includes_meeting_link() {
        let email = EmailTemplate::SessionConfirmed {
            name: "Kai".into(),
            mentor_name: "Aunty June".into(),
            topic: "Resume review".into(),
            scheduled_at: "2030-03-04T05:00:00Z".parse().unwrap(),
            meeting_url: Some("https://meet.example.org/abc".into()),
        }
        .render("kai@example.org");
        assert!(email.text.contains("Monday 4 March 2030, 05:00 UTC"));
        assert!(email.html.contains("href=\"https://meet.example.org/abc\""));
    }

    #[tokio::test]
    async fn test_memory_mailer_captures() {
        let mailer = MemoryMailer::default();
        mailer
            .send(EmailTemplate::Welcome { name: "Lee".into() }.render("lee@example.org"))
            .await
            .unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "lee@example.org");
    }
}

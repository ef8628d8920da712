//! Inbox access for the magic-link flow: a transport seam over an external
//! mailbox API, plus the bounded-wait poller that extracts verification
//! tokens from delivered messages.
//!
//! Delivery is asynchronous and the consumer has no push channel, so the
//! poller re-queries the inbox at a fixed interval until the deadline passes.

use crate::error::{AppError, AppResult};
use crate::mail::{Mailer, OutboundMail};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Interval between inbox polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Message summary returned by a mailbox listing.
#[derive(Debug, Clone)]
pub struct MailboxMessage {
    pub id: String,
    pub to_email: String,
    pub subject: String,
}

/// External mailbox contract: list, fetch bodies, delete. All operations are
/// idempotent and safe to retry.
#[async_trait]
pub trait MailboxTransport: Send + Sync {
    async fn list_messages(&self) -> AppResult<Vec<MailboxMessage>>;
    async fn text_body(&self, id: &str) -> AppResult<Option<String>>;
    async fn html_body(&self, id: &str) -> AppResult<Option<String>>;
    async fn delete_message(&self, id: &str) -> AppResult<()>;
}

static VERIFY_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/auth/verify/([a-f0-9]{64})").unwrap());

/// Extract a 64-character lowercase-hex verification token from a message
/// body containing a verification URL.
pub fn extract_verification_token(body: &str) -> Option<String> {
    VERIFY_TOKEN_RE
        .captures(body)
        .map(|c| c[1].to_string())
}

/// Poll the mailbox until a message addressed to `recipient` carries a
/// verification token, then delete the message and return the token.
///
/// The plain-text body is preferred; the rich body is only consulted when the
/// text body is missing or yields no match. Fails with `Timeout` once the
/// deadline passes; no partial extraction happens on that path.
pub async fn await_token(
    transport: &dyn MailboxTransport,
    recipient: &str,
    timeout: Duration,
) -> AppResult<String> {
    let deadline = Instant::now() + timeout;
    let recipient = recipient.to_lowercase();

    loop {
        for msg in transport.list_messages().await? {
            if !msg.to_email.to_lowercase().contains(&recipient) {
                continue;
            }

            let mut body = transport.text_body(&msg.id).await?.unwrap_or_default();
            if extract_verification_token(&body).is_none() {
                if let Some(html) = transport.html_body(&msg.id).await? {
                    body = html;
                }
            }

            if let Some(token) = extract_verification_token(&body) {
                transport.delete_message(&msg.id).await?;
                debug!(target: "mailbox", %recipient, "verification token extracted");
                return Ok(token);
            }
        }

        if Instant::now() >= deadline {
            return Err(AppError::Timeout(timeout));
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

// ---------------------------------------------------------------------------
// Mailtrap sandbox client
// ---------------------------------------------------------------------------

/// Mailbox transport over the Mailtrap sandbox API.
pub struct MailtrapClient {
    base_url: String,
    api_token: String,
    http: reqwest::Client,
}

impl MailtrapClient {
    pub fn new(account_id: &str, inbox_id: &str, api_token: &str) -> Self {
        Self {
            base_url: format!(
                "https://sandbox.api.mailtrap.io/api/accounts/{}/inboxes/{}/messages",
                account_id, inbox_id
            ),
            api_token: api_token.to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_body(&self, id: &str, kind: &str) -> AppResult<Option<String>> {
        let resp = self
            .http
            .get(format!("{}/{}/body.{}", self.base_url, id, kind))
            .header("Api-Token", &self.api_token)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(Some(resp.text().await?))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl MailboxTransport for MailtrapClient {
    async fn list_messages(&self) -> AppResult<Vec<MailboxMessage>> {
        let resp = self
            .http
            .get(&self.base_url)
            .header("Api-Token", &self.api_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            // transient listing failures are survivable; the poller retries
            return Ok(Vec::new());
        }
        let raw: Vec<serde_json::Value> = resp.json().await?;
        Ok(raw
            .into_iter()
            .filter_map(|m| {
                Some(MailboxMessage {
                    id: m.get("id")?.to_string(),
                    to_email: m
                        .get("to_email")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    subject: m
                        .get("subject")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }

    async fn text_body(&self, id: &str) -> AppResult<Option<String>> {
        self.fetch_body(id, "txt").await
    }

    async fn html_body(&self, id: &str) -> AppResult<Option<String>> {
        self.fetch_body(id, "html").await
    }

    async fn delete_message(&self, id: &str) -> AppResult<()> {
        self.http
            .delete(format!("{}/{}", self.base_url, id))
            .header("Api-Token", &self.api_token)
            .send()
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process mailbox (outbox + inbox in one)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    to: String,
    subject: String,
    text_body: String,
    html_body: Option<String>,
}

/// In-memory mailbox implementing both the outbound `Mailer` seam and the
/// inbound `MailboxTransport` seam, so the full issue -> deliver -> poll ->
/// verify loop runs without a network.
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    inner: Arc<MemoryMailboxInner>,
}

#[derive(Default)]
struct MemoryMailboxInner {
    next_id: AtomicU64,
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self) -> usize {
        self.inner.messages.read().len()
    }
}

#[async_trait]
impl Mailer for MemoryMailbox {
    async fn send(&self, mail: OutboundMail) -> AppResult<()> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.messages.write().push(StoredMessage {
            id,
            to: mail.to,
            subject: mail.subject,
            text_body: mail.text_body,
            html_body: mail.html_body,
        });
        Ok(())
    }
}

#[async_trait]
impl MailboxTransport for MemoryMailbox {
    async fn list_messages(&self) -> AppResult<Vec<MailboxMessage>> {
        Ok(self
            .inner
            .messages
            .read()
            .iter()
            .map(|m| MailboxMessage {
                id: m.id.to_string(),
                to_email: m.to.clone(),
                subject: m.subject.clone(),
            })
            .collect())
    }

    async fn text_body(&self, id: &str) -> AppResult<Option<String>> {
        Ok(self
            .inner
            .messages
            .read()
            .iter()
            .find(|m| m.id.to_string() == id)
            .map(|m| m.text_body.clone()))
    }

    async fn html_body(&self, id: &str) -> AppResult<Option<String>> {
        Ok(self
            .inner
            .messages
            .read()
            .iter()
            .find(|m| m.id.to_string() == id)
            .and_then(|m| m.html_body.clone()))
    }

    async fn delete_message(&self, id: &str) -> AppResult<()> {
        self.inner
            .messages
            .write()
            .retain(|m| m.id.to_string() != id);
        Ok(())
    }
}

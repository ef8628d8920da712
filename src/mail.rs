//! Outbound mail: the `Mailer` seam, message templates and the HTTP mail-API
//! transport used in production deployments.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tracing::{error, info};

/// A fully rendered outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

/// Delivery seam. Production wires `HttpMailer`; tests wire the in-process
/// `MemoryMailbox`, which is both the outbox and the inbox.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutboundMail) -> AppResult<()>;
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

const MAGIC_LINK_TEMPLATE: &str = "\
Sign in to LalaSearch

Click the link below to sign in. The link is valid for {{expiry_minutes}} minutes
and can be used once.

{{verify_link}}

If you did not request this email you can safely ignore it.
";

const INVITATION_TEMPLATE: &str = "\
{{inviter_email}} invited you to join {{org_name}} on LalaSearch.

Accept the invitation within {{expiry_days}} days:

{{invite_link}}

If you were not expecting this invitation you can safely ignore it.
";

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

/// Render the magic-link message for `email`. The verification URL embeds the
/// raw token; this is the only place the raw token leaves the process.
pub fn magic_link_mail(
    base_url: &str,
    email: &str,
    raw_token: &str,
    expiry_minutes: u64,
) -> OutboundMail {
    let verify_link = format!("{}/auth/verify/{}", base_url, raw_token);
    let text_body = render(
        MAGIC_LINK_TEMPLATE,
        &[
            ("verify_link", verify_link.as_str()),
            ("expiry_minutes", &expiry_minutes.to_string()),
        ],
    );
    OutboundMail {
        to: email.to_string(),
        subject: "Sign in to LalaSearch".to_string(),
        html_body: Some(format!(
            "<p>Sign in to LalaSearch:</p><p><a href=\"{0}\">{0}</a></p>",
            verify_link
        )),
        text_body,
    }
}

/// Render the invitation message pointing at the accept endpoint.
pub fn invitation_mail(
    base_url: &str,
    email: &str,
    org_name: &str,
    inviter_email: &str,
    raw_token: &str,
    expiry_days: u64,
) -> OutboundMail {
    let invite_link = format!("{}/auth/invitations/{}/accept", base_url, raw_token);
    let text_body = render(
        INVITATION_TEMPLATE,
        &[
            ("inviter_email", inviter_email),
            ("org_name", org_name),
            ("invite_link", invite_link.as_str()),
            ("expiry_days", &expiry_days.to_string()),
        ],
    );
    OutboundMail {
        to: email.to_string(),
        subject: format!("Join {} on LalaSearch", org_name),
        html_body: Some(format!(
            "<p>{1} invited you to join {2}:</p><p><a href=\"{0}\">{0}</a></p>",
            invite_link, inviter_email, org_name
        )),
        text_body,
    }
}

// ---------------------------------------------------------------------------
// HTTP mail API transport
// ---------------------------------------------------------------------------

/// Mailer speaking a JSON send-mail API (bearer-token authenticated).
pub struct HttpMailer {
    endpoint: String,
    api_token: String,
    from_email: String,
    from_name: String,
    http: reqwest::Client,
}

impl HttpMailer {
    pub fn new(endpoint: &str, api_token: &str, from_email: &str, from_name: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_token: api_token.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: OutboundMail) -> AppResult<()> {
        let payload = json!({
            "from": { "email": self.from_email, "name": self.from_name },
            "to": [{ "email": mail.to }],
            "subject": mail.subject,
            "text": mail.text_body,
            "html": mail.html_body,
        });

        let t0 = Instant::now();
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Mail(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            info!(
                target: "mail",
                to = %mail.to,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "message accepted by mail API"
            );
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            error!(target: "mail", to = %mail.to, %status, "mail API rejected message");
            Err(AppError::Mail(format!("mail API returned {status}: {body}")))
        }
    }
}

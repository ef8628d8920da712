//! In-memory auth record store.
//!
//! All maps sit behind `parking_lot::RwLock`. Token consumption is a single
//! check-and-set under one write lock, so concurrent verification attempts
//! against the same token observe at most one success; the rest fail with
//! `TokenAlreadyConsumed`.

use crate::error::{AppError, AppResult};
use crate::identity::records::{
    InvitationToken, Membership, Role, SessionRecord, User, VerificationToken,
};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Default)]
pub struct AuthStore {
    users: RwLock<HashMap<Uuid, User>>,
    users_by_email: RwLock<HashMap<String, Uuid>>,
    magic_tokens: RwLock<HashMap<String, VerificationToken>>,
    invitations: RwLock<HashMap<String, InvitationToken>>,
    memberships: RwLock<HashMap<(String, Uuid), Membership>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- users ----

    pub fn get_user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.users_by_email.read().get(&email.to_lowercase())?;
        self.users.read().get(&id).cloned()
    }

    pub fn get_user(&self, user_id: Uuid) -> Option<User> {
        self.users.read().get(&user_id).cloned()
    }

    /// Fetch the account for an email, creating it on first sight. The email
    /// is considered verified: reaching this point required control of the
    /// mailbox.
    pub fn get_or_create_user(&self, email: &str) -> User {
        let email = email.to_lowercase();
        let mut by_email = self.users_by_email.write();
        let mut users = self.users.write();
        if let Some(id) = by_email.get(&email) {
            let user = users.get_mut(id).unwrap();
            user.email_verified = true;
            user.last_login_at = Some(now_ms());
            return user.clone();
        }
        let user = User {
            user_id: Uuid::new_v4(),
            email: email.clone(),
            email_verified: true,
            created_at: now_ms(),
            last_login_at: Some(now_ms()),
        };
        by_email.insert(email, user.user_id);
        users.insert(user.user_id, user.clone());
        user
    }

    // ---- magic-link tokens ----

    /// Record a freshly issued verification token. Prior unconsumed tokens
    /// for the same email stay live until they expire or are consumed.
    pub fn create_magic_token(&self, token: VerificationToken) {
        self.magic_tokens
            .write()
            .insert(token.token_hash.clone(), token);
    }

    /// Atomically consume a verification token. Exactly one caller can win;
    /// every other state surfaces as its own error.
    pub fn consume_magic_token(&self, token_hash: &str) -> AppResult<VerificationToken> {
        let mut tokens = self.magic_tokens.write();
        let token = tokens.get_mut(token_hash).ok_or(AppError::TokenNotFound)?;
        if token.used {
            return Err(AppError::TokenAlreadyConsumed);
        }
        if token.is_expired(now_ms()) {
            return Err(AppError::TokenExpired);
        }
        token.used = true;
        Ok(token.clone())
    }

    // ---- invitations ----

    pub fn create_invitation(&self, invitation: InvitationToken) {
        self.invitations
            .write()
            .insert(invitation.token_hash.clone(), invitation);
    }

    /// Atomically consume an invitation token; same discipline as magic-link
    /// consumption.
    pub fn consume_invitation(&self, token_hash: &str) -> AppResult<InvitationToken> {
        let mut invitations = self.invitations.write();
        let invitation = invitations
            .get_mut(token_hash)
            .ok_or(AppError::TokenNotFound)?;
        if invitation.accepted {
            return Err(AppError::TokenAlreadyConsumed);
        }
        if invitation.is_expired(now_ms()) {
            return Err(AppError::TokenExpired);
        }
        invitation.accepted = true;
        Ok(invitation.clone())
    }

    // ---- memberships ----

    pub fn upsert_membership(
        &self,
        tenant_id: &str,
        user_id: Uuid,
        role: Role,
        invited_by: Option<Uuid>,
    ) {
        let mut memberships = self.memberships.write();
        memberships
            .entry((tenant_id.to_string(), user_id))
            .or_insert_with(|| Membership {
                tenant_id: tenant_id.to_string(),
                user_id,
                role,
                joined_at: now_ms(),
                invited_by,
            });
    }

    pub fn membership(&self, tenant_id: &str, user_id: Uuid) -> Option<Membership> {
        self.memberships
            .read()
            .get(&(tenant_id.to_string(), user_id))
            .cloned()
    }

    pub fn user_memberships(&self, user_id: Uuid) -> Vec<Membership> {
        self.memberships
            .read()
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn tenant_members(&self, tenant_id: &str) -> Vec<Membership> {
        self.memberships
            .read()
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn remove_membership(&self, tenant_id: &str, user_id: Uuid) -> bool {
        self.memberships
            .write()
            .remove(&(tenant_id.to_string(), user_id))
            .is_some()
    }

    // ---- sessions ----

    pub fn create_session(&self, session: SessionRecord) {
        self.sessions
            .write()
            .insert(session.session_hash.clone(), session);
    }

    /// Look up a live session. Expired records are pruned on sight so a stale
    /// cookie can never resolve a tenant.
    pub fn get_live_session(&self, session_hash: &str) -> Option<SessionRecord> {
        let now = now_ms();
        let found = {
            let sessions = self.sessions.read();
            sessions.get(session_hash).cloned()
        };
        match found {
            Some(s) if s.is_expired(now) => {
                self.sessions.write().remove(session_hash);
                None
            }
            Some(mut s) => {
                s.last_active_at = now;
                self.sessions
                    .write()
                    .insert(session_hash.to_string(), s.clone());
                Some(s)
            }
            None => None,
        }
    }

    pub fn delete_session(&self, session_hash: &str) -> bool {
        self.sessions.write().remove(session_hash).is_some()
    }

    pub fn delete_user_sessions(&self, user_id: Uuid) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        before - sessions.len()
    }
}

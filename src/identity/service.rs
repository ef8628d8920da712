//! Auth orchestration: magic-link issuance and verification, invitation
//! acceptance, session issuance and member management.
//!
//! Raw tokens are 32 random bytes rendered as 64 lowercase hex characters.
//! Only SHA-256 digests ever reach the store, so a store dump cannot be
//! replayed into a session.

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::identity::records::{
    AuthUser, InvitationToken, Membership, Role, SessionRecord, User, VerificationToken,
};
use crate::identity::store::{now_ms, AuthStore};
use crate::mail::{invitation_mail, magic_link_mail, Mailer};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MINUTE_MS: i64 = 60 * 1000;
const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

/// Generate a fresh raw token and its storage digest.
pub fn generate_token() -> AppResult<(String, String)> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| AppError::internal(format!("entropy source failed: {e}")))?;
    let raw = hex::encode(bytes);
    let hash = hash_token(&raw);
    Ok((raw, hash))
}

/// Digest a raw token for storage or lookup.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

pub struct AuthService {
    store: Arc<AuthStore>,
    mailer: Arc<dyn Mailer>,
    config: AuthConfig,
    base_url: String,
    default_tenant_id: String,
}

impl AuthService {
    pub fn new(
        store: Arc<AuthStore>,
        mailer: Arc<dyn Mailer>,
        config: AuthConfig,
        base_url: &str,
        default_tenant_id: &str,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_tenant_id: default_tenant_id.to_string(),
        }
    }

    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    pub fn default_tenant_id(&self) -> &str {
        &self.default_tenant_id
    }

    // ---- magic link ----

    /// Issue a magic-link token for `email` and mail the verification URL.
    /// Earlier unconsumed links stay usable until they expire on their own.
    pub async fn request_magic_link(&self, email: &str) -> AppResult<()> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("a valid email address is required"));
        }

        let (raw, hash) = generate_token()?;
        let now = now_ms();
        self.store.create_magic_token(VerificationToken {
            token_hash: hash,
            email: email.clone(),
            tenant_id: None,
            created_at: now,
            expires_at: now + self.config.magic_link_expiry_minutes as i64 * MINUTE_MS,
            used: false,
        });

        let mail = magic_link_mail(
            &self.base_url,
            &email,
            &raw,
            self.config.magic_link_expiry_minutes,
        );
        self.mailer.send(mail).await?;
        info!(target: "auth", %email, "magic link issued");
        Ok(())
    }

    /// Consume a magic-link token and issue a session. The session tenant is
    /// the token's bound tenant, or the deployment default when unbound.
    pub async fn verify_magic_link(&self, raw_token: &str) -> AppResult<(String, AuthUser)> {
        let token = self.store.consume_magic_token(&hash_token(raw_token))?;
        let user = self.store.get_or_create_user(&token.email);
        let tenant_id = token
            .tenant_id
            .unwrap_or_else(|| self.default_tenant_id.clone());

        // first sign-in into a tenant makes the user its owner
        self.store
            .upsert_membership(&tenant_id, user.user_id, Role::Owner, None);

        let session = self.issue_session(&user, &tenant_id)?;
        let auth_user = self.resolve_auth_user(&user, &tenant_id);
        info!(target: "auth", email = %user.email, %tenant_id, "magic link verified");
        Ok((session, auth_user))
    }

    // ---- invitations ----

    /// Create an invitation into the inviter's tenant and mail the accept
    /// link. Requires invite permission in that tenant.
    pub async fn invite_user(
        &self,
        inviter: &AuthUser,
        email: &str,
        role: Role,
    ) -> AppResult<()> {
        if !inviter.can_invite() {
            return Err(AppError::forbidden(
                "only owners and admins can invite users",
            ));
        }
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("a valid email address is required"));
        }
        if role == Role::Owner {
            return Err(AppError::validation("cannot invite a user as owner"));
        }

        let (raw, hash) = generate_token()?;
        let now = now_ms();
        self.store.create_invitation(InvitationToken {
            token_hash: hash,
            tenant_id: inviter.tenant_id.clone(),
            email: email.clone(),
            role,
            invited_by: inviter.user_id,
            created_at: now,
            expires_at: now + self.config.invitation_expiry_days as i64 * DAY_MS,
            accepted: false,
        });

        let mail = invitation_mail(
            &self.base_url,
            &email,
            &inviter.tenant_id,
            &inviter.email,
            &raw,
            self.config.invitation_expiry_days,
        );
        self.mailer.send(mail).await?;
        info!(target: "auth", %email, tenant_id = %inviter.tenant_id, "invitation issued");
        Ok(())
    }

    /// Seed a pre-issued invitation with a known raw token. Used by deployment
    /// bootstrap fixtures.
    pub fn seed_invitation(&self, raw_token: &str, tenant_id: &str, email: &str, role: Role) {
        let now = now_ms();
        self.store.create_invitation(InvitationToken {
            token_hash: hash_token(raw_token),
            tenant_id: tenant_id.to_string(),
            email: email.to_lowercase(),
            role,
            invited_by: Uuid::nil(),
            created_at: now,
            expires_at: now + self.config.invitation_expiry_days as i64 * DAY_MS,
            accepted: false,
        });
    }

    /// Consume an invitation token, join the invitee to the invitation's
    /// tenant and issue a session scoped to that tenant.
    pub async fn accept_invitation(&self, raw_token: &str) -> AppResult<(String, AuthUser)> {
        let invitation = self.store.consume_invitation(&hash_token(raw_token))?;
        let user = self.store.get_or_create_user(&invitation.email);

        self.store.upsert_membership(
            &invitation.tenant_id,
            user.user_id,
            invitation.role,
            Some(invitation.invited_by),
        );

        let session = self.issue_session(&user, &invitation.tenant_id)?;
        let auth_user = self.resolve_auth_user(&user, &invitation.tenant_id);
        info!(
            target: "auth",
            email = %user.email,
            tenant_id = %invitation.tenant_id,
            "invitation accepted"
        );
        Ok((session, auth_user))
    }

    // ---- sessions ----

    fn issue_session(&self, user: &User, tenant_id: &str) -> AppResult<String> {
        let (raw, hash) = generate_token()?;
        let now = now_ms();
        self.store.create_session(SessionRecord {
            session_hash: hash,
            user_id: user.user_id,
            tenant_id: tenant_id.to_string(),
            created_at: now,
            expires_at: now + self.config.session_max_age_days as i64 * DAY_MS,
            last_active_at: now,
        });
        Ok(raw)
    }

    fn resolve_auth_user(&self, user: &User, tenant_id: &str) -> AuthUser {
        let role = self
            .store
            .membership(tenant_id, user.user_id)
            .map(|m| m.role)
            .unwrap_or(Role::Member);
        AuthUser {
            user_id: user.user_id,
            email: user.email.clone(),
            tenant_id: tenant_id.to_string(),
            role,
        }
    }

    /// Resolve a session cookie value to its authenticated context, or `None`
    /// for an unknown, expired or membership-less session.
    pub fn validate_session(&self, raw_session: &str) -> Option<AuthUser> {
        let session = self.store.get_live_session(&hash_token(raw_session))?;
        let user = self.store.get_user(session.user_id)?;
        let membership = self.store.membership(&session.tenant_id, session.user_id);
        if membership.is_none() {
            warn!(
                target: "auth",
                user_id = %session.user_id,
                tenant_id = %session.tenant_id,
                "session for revoked membership rejected"
            );
            return None;
        }
        Some(AuthUser {
            user_id: user.user_id,
            email: user.email,
            tenant_id: session.tenant_id,
            role: membership.map(|m| m.role).unwrap_or(Role::Member),
        })
    }

    /// Drop the session for a cookie value. Missing sessions are a no-op.
    pub fn sign_out(&self, raw_session: &str) {
        self.store.delete_session(&hash_token(raw_session));
    }

    // ---- members ----

    pub fn user_memberships(&self, user_id: Uuid) -> Vec<Membership> {
        self.store.user_memberships(user_id)
    }

    /// List members of the caller's tenant. Requires member-management
    /// permission.
    pub fn tenant_members(&self, caller: &AuthUser) -> AppResult<Vec<(Membership, User)>> {
        if !caller.can_manage_members() {
            return Err(AppError::forbidden(
                "only owners and admins can list members",
            ));
        }
        let mut members: Vec<_> = self
            .store
            .tenant_members(&caller.tenant_id)
            .into_iter()
            .filter_map(|m| self.store.get_user(m.user_id).map(|u| (m, u)))
            .collect();
        members.sort_by(|a, b| a.1.email.cmp(&b.1.email));
        Ok(members)
    }

    /// Remove a member from the caller's tenant and revoke their sessions
    /// there. Owners cannot be removed, nobody removes themselves, and admins
    /// are only removable by owners.
    pub fn remove_member(&self, caller: &AuthUser, target_user_id: Uuid) -> AppResult<()> {
        if !caller.can_manage_members() {
            return Err(AppError::forbidden(
                "only owners and admins can remove members",
            ));
        }
        if target_user_id == caller.user_id {
            return Err(AppError::validation("cannot remove yourself"));
        }
        let target = self
            .store
            .membership(&caller.tenant_id, target_user_id)
            .ok_or_else(|| AppError::not_found("member not found in this organization"))?;
        match target.role {
            Role::Owner => {
                return Err(AppError::forbidden("owners cannot be removed"));
            }
            Role::Admin if caller.role != Role::Owner => {
                return Err(AppError::forbidden("only owners can remove admins"));
            }
            _ => {}
        }

        self.store.remove_membership(&caller.tenant_id, target_user_id);
        let revoked = self.store.delete_user_sessions(target_user_id);
        info!(
            target: "auth",
            tenant_id = %caller.tenant_id,
            target = %target_user_id,
            revoked_sessions = revoked,
            "member removed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailbox;

    fn service() -> (Arc<AuthService>, MemoryMailbox) {
        let mailbox = MemoryMailbox::new();
        let service = AuthService::new(
            Arc::new(AuthStore::new()),
            Arc::new(mailbox.clone()),
            AuthConfig::default(),
            "http://localhost:3000",
            "lalasearch",
        );
        (Arc::new(service), mailbox)
    }

    #[test]
    fn generated_tokens_are_64_lowercase_hex() {
        let (raw, hash) = generate_token().unwrap();
        assert_eq!(raw.len(), 64);
        assert!(raw.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, hash_token(&raw));
        assert_ne!(raw, hash);
    }

    #[tokio::test]
    async fn request_rejects_invalid_email() {
        let (service, mailbox) = service();
        assert!(service.request_magic_link("").await.is_err());
        assert!(service.request_magic_link("not-an-email").await.is_err());
        assert_eq!(mailbox.message_count(), 0);
    }

    #[tokio::test]
    async fn verify_issues_default_tenant_session() {
        let (service, mailbox) = service();
        service.request_magic_link("user@test.e2e").await.unwrap();
        assert_eq!(mailbox.message_count(), 1);

        let token =
            crate::mailbox::await_token(&mailbox, "user@test.e2e", std::time::Duration::from_secs(5))
                .await
                .unwrap();
        let (session, auth_user) = service.verify_magic_link(&token).await.unwrap();

        assert_eq!(auth_user.tenant_id, "lalasearch");
        assert_eq!(auth_user.role, Role::Owner);
        let resolved = service.validate_session(&session).unwrap();
        assert_eq!(resolved.user_id, auth_user.user_id);
    }

    #[tokio::test]
    async fn second_verify_fails_without_session() {
        let (service, mailbox) = service();
        service.request_magic_link("user@test.e2e").await.unwrap();
        let token =
            crate::mailbox::await_token(&mailbox, "user@test.e2e", std::time::Duration::from_secs(5))
                .await
                .unwrap();

        assert!(service.verify_magic_link(&token).await.is_ok());
        assert!(matches!(
            service.verify_magic_link(&token).await,
            Err(AppError::TokenAlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn invitation_binds_to_inviting_tenant() {
        let (service, _mailbox) = service();
        service.seed_invitation("e2e-test-tenant2-invite-0001", "tenant2", "b@test.e2e", Role::Member);

        let (session, auth_user) = service
            .accept_invitation("e2e-test-tenant2-invite-0001")
            .await
            .unwrap();
        assert_eq!(auth_user.tenant_id, "tenant2");
        assert_eq!(auth_user.role, Role::Member);
        assert_eq!(
            service.validate_session(&session).unwrap().tenant_id,
            "tenant2"
        );
    }

    #[tokio::test]
    async fn member_cannot_invite() {
        let (service, _mailbox) = service();
        let member = AuthUser {
            user_id: Uuid::new_v4(),
            email: "m@test.e2e".into(),
            tenant_id: "tenant2".into(),
            role: Role::Member,
        };
        assert!(matches!(
            service.invite_user(&member, "x@test.e2e", Role::Member).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn removal_revokes_sessions_and_membership() {
        let (service, _mailbox) = service();
        service.seed_invitation("seed-owner", "tenant2", "owner@test.e2e", Role::Owner);
        service.seed_invitation("seed-member", "tenant2", "member@test.e2e", Role::Member);

        let (_owner_session, owner) = service.accept_invitation("seed-owner").await.unwrap();
        let (member_session, member) = service.accept_invitation("seed-member").await.unwrap();

        service.remove_member(&owner, member.user_id).unwrap();
        assert!(service.validate_session(&member_session).is_none());
        assert!(service
            .store()
            .membership("tenant2", member.user_id)
            .is_none());
    }

    #[tokio::test]
    async fn owner_cannot_be_removed() {
        let (service, _mailbox) = service();
        service.seed_invitation("seed-owner-a", "tenant2", "a@test.e2e", Role::Owner);
        service.seed_invitation("seed-owner-b", "tenant2", "b@test.e2e", Role::Owner);

        let (_sa, a) = service.accept_invitation("seed-owner-a").await.unwrap();
        let (_sb, b) = service.accept_invitation("seed-owner-b").await.unwrap();

        assert!(matches!(
            service.remove_member(&a, b.user_id),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            service.remove_member(&a, a.user_id),
            Err(AppError::Validation(_))
        ));
    }
}

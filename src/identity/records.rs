//! Account, membership, token and session records held by the auth store.
//!
//! Token records carry their full lifecycle state: Issued -> (Consumed |
//! Expired), both terminal. The store performs the transition; the records
//! only answer validity questions against a caller-supplied clock.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a user within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Can delete the tenant, transfer ownership, manage all settings.
    Owner,
    /// Can manage members, settings, invite users.
    Admin,
    /// Can use search features and view data.
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }

    pub fn can_invite(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }

    pub fn can_manage_members(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

/// User account record.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub email_verified: bool,
    pub created_at: i64,
    pub last_login_at: Option<i64>,
}

/// Membership of a user in a tenant.
#[derive(Debug, Clone)]
pub struct Membership {
    pub tenant_id: String,
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: i64,
    pub invited_by: Option<Uuid>,
}

/// Single-use magic-link token. Keyed by SHA-256 digest; the raw token only
/// ever travels in the emailed verification URL.
#[derive(Debug, Clone)]
pub struct VerificationToken {
    pub token_hash: String,
    pub email: String,
    /// Tenant override; `None` means the deployment's default tenant.
    pub tenant_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub used: bool,
}

impl VerificationToken {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at < now_ms
    }

    pub fn is_valid(&self, now_ms: i64) -> bool {
        !self.used && !self.is_expired(now_ms)
    }
}

/// Single-use invitation token, pre-bound to a target tenant. Created by an
/// administrator of that tenant; consuming it joins the invitee and issues a
/// session scoped to the invitation's tenant, never the invitee's default.
#[derive(Debug, Clone)]
pub struct InvitationToken {
    pub token_hash: String,
    pub tenant_id: String,
    pub email: String,
    pub role: Role,
    pub invited_by: Uuid,
    pub created_at: i64,
    pub expires_at: i64,
    pub accepted: bool,
}

impl InvitationToken {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at < now_ms
    }

    pub fn is_valid(&self, now_ms: i64) -> bool {
        !self.accepted && !self.is_expired(now_ms)
    }
}

/// Server-side session record. The cookie carries the raw bearer value; only
/// its digest is stored. A session binds exactly one (user, tenant) pair for
/// its whole lifetime.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_hash: String,
    pub user_id: Uuid,
    pub tenant_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_active_at: i64,
}

impl SessionRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at < now_ms
    }
}

/// Authenticated request context resolved from a session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub tenant_id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn can_invite(&self) -> bool {
        self.role.can_invite()
    }

    pub fn can_manage_members(&self) -> bool {
        self.role.can_manage_members()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrip() {
        for role in [Role::Owner, Role::Admin, Role::Member] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superadmin"), None);
    }

    #[test]
    fn role_permissions() {
        assert!(Role::Owner.can_invite());
        assert!(Role::Admin.can_invite());
        assert!(!Role::Member.can_invite());
        assert!(!Role::Member.can_manage_members());
    }

    #[test]
    fn verification_token_validity() {
        let mut token = VerificationToken {
            token_hash: "h".into(),
            email: "a@example.com".into(),
            tenant_id: None,
            created_at: 0,
            expires_at: 1_000,
            used: false,
        };
        assert!(token.is_valid(500));
        assert!(!token.is_valid(1_001));
        token.used = true;
        assert!(!token.is_valid(500));
    }

    #[test]
    fn invitation_validity() {
        let mut invite = InvitationToken {
            token_hash: "h".into(),
            tenant_id: "tenant2".into(),
            email: "b@example.com".into(),
            role: Role::Member,
            invited_by: Uuid::new_v4(),
            created_at: 0,
            expires_at: 1_000,
            accepted: false,
        };
        assert!(invite.is_valid(999));
        invite.accepted = true;
        assert!(!invite.is_valid(999));
    }

    #[test]
    fn session_expiry() {
        let session = SessionRecord {
            session_hash: "h".into(),
            user_id: Uuid::new_v4(),
            tenant_id: "lalasearch".into(),
            created_at: 0,
            expires_at: 100,
            last_active_at: 0,
        };
        assert!(!session.is_expired(100));
        assert!(session.is_expired(101));
    }
}

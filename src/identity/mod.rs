//! Identity and session management for the agent. Keep the public surface
//! thin and split implementation across sub-modules.

mod records;
mod service;
mod store;

pub use records::{
    AuthUser, InvitationToken, Membership, Role, SessionRecord, User, VerificationToken,
};
pub use service::{generate_token, hash_token, AuthService};
pub use store::{now_ms, AuthStore};

pub mod config;
pub mod error;
pub mod identity;
pub mod mail;
pub mod mailbox;
pub mod search;
pub mod server;
pub mod store;

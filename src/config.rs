//! Environment-driven agent configuration and the deployment mode switch.

use anyhow::{Context, Result};
use std::env;

/// Deployment mode controlling single-tenant vs multi-tenant operation.
///
/// Single-tenant: one data partition per installation; no authentication and
/// no tenant isolation is exercised. Multi-tenant: one partition per customer;
/// every data route resolves its tenant from the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    SingleTenant,
    MultiTenant,
}

impl DeploymentMode {
    /// Parse the DEPLOYMENT_MODE environment variable.
    /// Panics if the variable is unset or has an invalid value.
    pub fn from_env() -> Self {
        let mode =
            env::var("DEPLOYMENT_MODE").expect("DEPLOYMENT_MODE environment variable must be set");
        Self::parse(&mode)
    }

    pub fn parse(mode: &str) -> Self {
        match mode {
            "single_tenant" => DeploymentMode::SingleTenant,
            "multi_tenant" => DeploymentMode::MultiTenant,
            _ => panic!(
                "DEPLOYMENT_MODE must be 'single_tenant' or 'multi_tenant', got: {}",
                mode
            ),
        }
    }

    pub fn is_multi_tenant(&self) -> bool {
        matches!(self, DeploymentMode::MultiTenant)
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::SingleTenant => write!(f, "single_tenant"),
            DeploymentMode::MultiTenant => write!(f, "multi_tenant"),
        }
    }
}

/// Token and session lifetimes.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub session_max_age_days: u64,
    pub magic_link_expiry_minutes: u64,
    pub invitation_expiry_days: u64,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            session_max_age_days: env_or("SESSION_MAX_AGE_DAYS", 365),
            magic_link_expiry_minutes: env_or("MAGIC_LINK_EXPIRY_MINUTES", 15),
            invitation_expiry_days: env_or("INVITATION_EXPIRY_DAYS", 7),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_max_age_days: 365,
            magic_link_expiry_minutes: 15,
            invitation_expiry_days: 7,
        }
    }
}

/// Outbound mail API configuration. Required in multi-tenant mode.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_token: String,
    pub from_email: String,
    pub from_name: String,
}

impl MailConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: env::var("MAIL_API_URL").context("MAIL_API_URL must be set")?,
            api_token: env::var("MAIL_API_TOKEN").context("MAIL_API_TOKEN must be set")?,
            from_email: env::var("MAIL_FROM_EMAIL").context("MAIL_FROM_EMAIL must be set")?,
            from_name: env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "LalaSearch".to_string()),
        })
    }
}

/// Top-level agent configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub http_port: u16,
    pub deployment_mode: DeploymentMode,
    /// Tenant partition used in single-tenant mode and as the magic-link
    /// default tenant in multi-tenant mode.
    pub default_tenant_id: String,
    /// Base URL embedded into verification and invitation links.
    pub app_base_url: String,
    pub auth: AuthConfig,
    pub mail: Option<MailConfig>,
    pub search_host: Option<String>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let deployment_mode = DeploymentMode::from_env();

        let mail = if deployment_mode.is_multi_tenant() {
            Some(MailConfig::from_env().context("multi-tenant mode requires mail configuration")?)
        } else {
            MailConfig::from_env().ok()
        };

        Ok(Self {
            http_port: env_or("HTTP_PORT", 3000u16),
            deployment_mode,
            default_tenant_id: env::var("DEFAULT_TENANT_ID")
                .unwrap_or_else(|_| "lalasearch".to_string()),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            auth: AuthConfig::from_env(),
            mail,
            search_host: env::var("SEARCH_HOST").ok(),
        })
    }
}

fn env_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_tenant() {
        assert_eq!(
            DeploymentMode::parse("single_tenant"),
            DeploymentMode::SingleTenant
        );
        assert!(!DeploymentMode::SingleTenant.is_multi_tenant());
    }

    #[test]
    fn parse_multi_tenant() {
        assert_eq!(
            DeploymentMode::parse("multi_tenant"),
            DeploymentMode::MultiTenant
        );
        assert!(DeploymentMode::MultiTenant.is_multi_tenant());
    }

    #[test]
    #[should_panic(expected = "DEPLOYMENT_MODE must be 'single_tenant' or 'multi_tenant'")]
    fn parse_invalid_panics() {
        DeploymentMode::parse("saas");
    }

    #[test]
    fn display_produces_snake_case() {
        assert_eq!(DeploymentMode::SingleTenant.to_string(), "single_tenant");
        assert_eq!(DeploymentMode::MultiTenant.to_string(), "multi_tenant");
    }

    #[test]
    fn auth_config_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.session_max_age_days, 365);
        assert_eq!(config.magic_link_expiry_minutes, 15);
        assert_eq!(config.invitation_expiry_days, 7);
    }
}

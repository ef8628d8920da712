use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use lala_agent::config::AgentConfig;
use lala_agent::identity::{AuthService, AuthStore};
use lala_agent::mail::HttpMailer;
use lala_agent::search::SearchClient;
use lala_agent::server::{create_router, AppState, VERSION};
use lala_agent::store::TenantStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let config = AgentConfig::from_env()?;

    // Startup banner at info level so something always prints at default verbosity
    info!(
        target: "agent",
        "LalaSearch agent v{} starting: mode={}, http_port={}, default_tenant='{}'",
        VERSION,
        config.deployment_mode,
        config.http_port,
        config.default_tenant_id
    );

    let auth = if config.deployment_mode.is_multi_tenant() {
        let mail = config
            .mail
            .as_ref()
            .context("multi-tenant mode requires mail configuration")?;
        let mailer = Arc::new(HttpMailer::new(
            &mail.api_url,
            &mail.api_token,
            &mail.from_email,
            &mail.from_name,
        ));
        Some(Arc::new(AuthService::new(
            Arc::new(AuthStore::new()),
            mailer,
            config.auth.clone(),
            &config.app_base_url,
            &config.default_tenant_id,
        )))
    } else {
        None
    };

    let search = config
        .search_host
        .as_deref()
        .map(|host| Arc::new(SearchClient::new(host, std::env::var("SEARCH_API_KEY").ok())));

    let state = AppState {
        auth,
        store: Arc::new(TenantStore::new()),
        search,
        deployment_mode: config.deployment_mode,
        default_tenant_id: config.default_tenant_id.clone(),
        session_max_age_days: config.auth.session_max_age_days,
    };

    let router = create_router(state);
    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(target: "agent", "listening on http://{addr}");
    axum::serve(listener, router).await?;
    Ok(())
}

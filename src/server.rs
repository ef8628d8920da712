//!
//! LalaSearch agent HTTP server
//! ----------------------------
//! This module defines the Axum-based HTTP API for the agent.
//!
//! Responsibilities:
//! - Magic-link sign-in and invitation acceptance endpoints, issuing the
//!   `lala_session` cookie on success.
//! - Per-request tenant resolution: the session cookie in multi-tenant mode,
//!   the configured default tenant in single-tenant mode.
//! - Allowed-domain management, crawl-queue admission and tenant settings.
//! - Search gateway endpoints forwarding to the external engine.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::DeploymentMode;
use crate::error::AppError;
use crate::identity::{AuthService, AuthUser, Role};
use crate::search::{SearchClient, SearchRequest};
use crate::store::TenantStore;

const SESSION_COOKIE: &str = "lala_session";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared server state injected into all handlers.
///
/// `auth` and `search` are optional: single-tenant deployments run without an
/// auth service, and deployments without a configured engine serve 503 on the
/// search routes.
#[derive(Clone)]
pub struct AppState {
    pub auth: Option<Arc<AuthService>>,
    pub store: Arc<TenantStore>,
    pub search: Option<Arc<SearchClient>>,
    pub deployment_mode: DeploymentMode,
    pub default_tenant_id: String,
    pub session_max_age_days: u64,
}

impl AppState {
    pub fn single_tenant(default_tenant_id: &str) -> Self {
        Self {
            auth: None,
            store: Arc::new(TenantStore::new()),
            search: None,
            deployment_mode: DeploymentMode::SingleTenant,
            default_tenant_id: default_tenant_id.to_string(),
            session_max_age_days: 365,
        }
    }
}

/// Extract the value of a named cookie from the request headers.
fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(name).and_then(|r| r.strip_prefix('=')) {
            return Some(value.to_string());
        }
    }
    None
}

fn session_cookie(value: &str, max_age_days: u64) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        value,
        max_age_days * 24 * 60 * 60
    ))
    .unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static(
        "lala_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
    )
}

/// Tenant context resolved for the current request.
///
/// In single-tenant mode every request maps to the default tenant with no
/// user attached. In multi-tenant mode the session cookie is mandatory and
/// the tenant comes from the session, never from the payload.
#[derive(Debug, Clone)]
pub struct TenantCtx {
    pub tenant_id: String,
    pub user: Option<AuthUser>,
}

impl TenantCtx {
    fn actor_email(&self) -> String {
        self.user
            .as_ref()
            .map(|u| u.email.clone())
            .unwrap_or_else(|| "system".to_string())
    }

    fn require_user(&self) -> Result<&AuthUser, Response> {
        self.user
            .as_ref()
            .ok_or_else(|| error_response(&AppError::Unauthenticated))
    }
}

impl FromRequestParts<AppState> for TenantCtx {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if !state.deployment_mode.is_multi_tenant() {
            return Ok(TenantCtx {
                tenant_id: state.default_tenant_id.clone(),
                user: None,
            });
        }

        let auth = state
            .auth
            .as_ref()
            .ok_or_else(|| error_response(&AppError::Unauthenticated))?;
        let raw = parse_cookie(&parts.headers, SESSION_COOKIE)
            .ok_or_else(|| error_response(&AppError::Unauthenticated))?;
        let user = auth
            .validate_session(&raw)
            .ok_or_else(|| error_response(&AppError::Unauthenticated))?;

        Ok(TenantCtx {
            tenant_id: user.tenant_id.clone(),
            user: Some(user),
        })
    }
}

fn error_response(err: &AppError) -> Response {
    (err.http_status(), Json(json!({ "error": err.to_string() }))).into_response()
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RequestLinkRequest {
    email: String,
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    message: String,
}

impl MessageResponse {
    fn ok<S: Into<String>>(message: S) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct VersionResponse {
    agent: &'static str,
    version: &'static str,
    deployment_mode: String,
}

#[derive(Deserialize)]
struct AddDomainRequest {
    domain: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Serialize)]
struct DomainInfo {
    domain: String,
    added_by: String,
    notes: Option<String>,
    added_at: i64,
}

#[derive(Serialize)]
struct ListDomainsResponse {
    domains: Vec<DomainInfo>,
    count: usize,
}

#[derive(Deserialize)]
struct AddToQueueRequest {
    url: String,
    #[serde(default = "default_priority")]
    priority: i32,
}

fn default_priority() -> i32 {
    1
}

#[derive(Serialize)]
struct CrawlingEnabledResponse {
    crawling_enabled: bool,
}

#[derive(Deserialize)]
struct SetCrawlingEnabledRequest {
    enabled: bool,
}

#[derive(Serialize)]
struct OrgInfo {
    tenant_id: String,
    role: String,
}

#[derive(Serialize)]
struct MeResponse {
    user_id: Uuid,
    email: String,
    tenant_id: String,
    role: String,
}

#[derive(Deserialize)]
struct InviteUserRequest {
    email: String,
    #[serde(default = "default_invite_role")]
    role: String,
}

fn default_invite_role() -> String {
    "member".to_string()
}

#[derive(Serialize)]
struct MemberInfo {
    user_id: Uuid,
    email: String,
    role: String,
    joined_at: i64,
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_search_limit() -> usize {
    20
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        agent: "lala-agent",
        version: VERSION,
        deployment_mode: state.deployment_mode.to_string(),
    })
}

async fn request_link(
    State(state): State<AppState>,
    Json(body): Json<RequestLinkRequest>,
) -> Response {
    let Some(auth) = state.auth.as_ref() else {
        return error_response(&AppError::not_found("authentication is not enabled"));
    };
    match auth.request_magic_link(&body.email).await {
        Ok(()) => Json(MessageResponse::ok(
            "If the address is valid, a sign-in link has been sent.",
        ))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Consume a magic-link token. Success is a 302 to the app root carrying the
/// session cookie; every failure is a non-302 without any cookie.
async fn verify_magic_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    let Some(auth) = state.auth.as_ref() else {
        return error_response(&AppError::not_found("authentication is not enabled"));
    };
    match auth.verify_magic_link(&token).await {
        Ok((session, user)) => {
            info!(target: "server", email = %user.email, tenant_id = %user.tenant_id, "sign-in");
            redirect_with_session(&session, state.session_max_age_days)
        }
        Err(err) => {
            warn!(target: "server", error = %err, "magic link verification failed");
            error_response(&err)
        }
    }
}

/// Consume an invitation token. Same response contract as magic-link
/// verification, with the session bound to the invitation's tenant.
async fn accept_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    let Some(auth) = state.auth.as_ref() else {
        return error_response(&AppError::not_found("authentication is not enabled"));
    };
    match auth.accept_invitation(&token).await {
        Ok((session, user)) => {
            info!(
                target: "server",
                email = %user.email,
                tenant_id = %user.tenant_id,
                "invitation accepted"
            );
            redirect_with_session(&session, state.session_max_age_days)
        }
        Err(err) => {
            warn!(target: "server", error = %err, "invitation acceptance failed");
            error_response(&err)
        }
    }
}

fn redirect_with_session(session: &str, max_age_days: u64) -> Response {
    let mut response = (
        StatusCode::FOUND,
        [(header::LOCATION, HeaderValue::from_static("/"))],
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, session_cookie(session, max_age_days));
    response
}

async fn me(ctx: TenantCtx) -> Response {
    match ctx.require_user() {
        Ok(user) => Json(MeResponse {
            user_id: user.user_id,
            email: user.email.clone(),
            tenant_id: user.tenant_id.clone(),
            role: user.role.as_str().to_string(),
        })
        .into_response(),
        Err(resp) => resp,
    }
}

async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let (Some(auth), Some(raw)) = (
        state.auth.as_ref(),
        parse_cookie(&headers, SESSION_COOKIE),
    ) {
        auth.sign_out(&raw);
    }
    let mut response = Json(MessageResponse::ok("signed out")).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie());
    response
}

async fn organizations(State(state): State<AppState>, ctx: TenantCtx) -> Response {
    let user = match ctx.require_user() {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Some(auth) = state.auth.as_ref() else {
        return error_response(&AppError::not_found("authentication is not enabled"));
    };
    let orgs: Vec<OrgInfo> = auth
        .user_memberships(user.user_id)
        .into_iter()
        .map(|m| OrgInfo {
            tenant_id: m.tenant_id,
            role: m.role.as_str().to_string(),
        })
        .collect();
    Json(json!({ "organizations": orgs })).into_response()
}

/// Reject requests whose path tenant does not match the session's tenant.
/// The session is the only authority on tenant scope; the path segment is
/// just addressing.
fn check_path_tenant(ctx: &TenantCtx, tenant_id: &str) -> Result<(), Response> {
    if ctx.tenant_id == tenant_id {
        Ok(())
    } else {
        Err(error_response(&AppError::forbidden(
            "not a member of this organization",
        )))
    }
}

async fn list_members(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Path(tenant_id): Path<String>,
) -> Response {
    let user = match ctx.require_user() {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_path_tenant(&ctx, &tenant_id) {
        return resp;
    }
    let Some(auth) = state.auth.as_ref() else {
        return error_response(&AppError::not_found("authentication is not enabled"));
    };
    match auth.tenant_members(user) {
        Ok(members) => {
            let members: Vec<MemberInfo> = members
                .into_iter()
                .map(|(m, u)| MemberInfo {
                    user_id: u.user_id,
                    email: u.email,
                    role: m.role.as_str().to_string(),
                    joined_at: m.joined_at,
                })
                .collect();
            Json(json!({ "members": members })).into_response()
        }
        Err(err) => error_response(&err),
    }
}

async fn invite_member(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Path(tenant_id): Path<String>,
    Json(body): Json<InviteUserRequest>,
) -> Response {
    let user = match ctx.require_user() {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_path_tenant(&ctx, &tenant_id) {
        return resp;
    }
    let Some(auth) = state.auth.as_ref() else {
        return error_response(&AppError::not_found("authentication is not enabled"));
    };
    let Some(role) = Role::parse(&body.role) else {
        return error_response(&AppError::validation(format!(
            "unknown role: {}",
            body.role
        )));
    };
    match auth.invite_user(user, &body.email, role).await {
        Ok(()) => Json(MessageResponse::ok(format!(
            "Invitation sent to {}",
            body.email.trim().to_lowercase()
        )))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn remove_member(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Path((tenant_id, user_id)): Path<(String, Uuid)>,
) -> Response {
    let user = match ctx.require_user() {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_path_tenant(&ctx, &tenant_id) {
        return resp;
    }
    let Some(auth) = state.auth.as_ref() else {
        return error_response(&AppError::not_found("authentication is not enabled"));
    };
    match auth.remove_member(user, user_id) {
        Ok(()) => Json(MessageResponse::ok("member removed")).into_response(),
        Err(err) => error_response(&err),
    }
}

// ---- domains ----

async fn add_domain(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Json(body): Json<AddDomainRequest>,
) -> Response {
    let domain = body.domain.trim().to_lowercase();
    if domain.is_empty() {
        return error_response(&AppError::validation("domain must not be empty"));
    }
    let added = state
        .store
        .add_domain(&ctx.tenant_id, &domain, &ctx.actor_email(), body.notes);
    let message = if added {
        format!("Domain '{}' added to allowed list", domain)
    } else {
        format!("Domain '{}' is already in the allowed list", domain)
    };
    Json(json!({ "success": added, "domain": domain, "message": message })).into_response()
}

async fn list_domains(State(state): State<AppState>, ctx: TenantCtx) -> Json<ListDomainsResponse> {
    let domains: Vec<DomainInfo> = state
        .store
        .list_domains(&ctx.tenant_id)
        .into_iter()
        .map(|d| DomainInfo {
            domain: d.domain,
            added_by: d.added_by,
            notes: d.notes,
            added_at: d.added_at,
        })
        .collect();
    let count = domains.len();
    Json(ListDomainsResponse { domains, count })
}

async fn delete_domain(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Path(domain): Path<String>,
) -> Response {
    if state.store.delete_domain(&ctx.tenant_id, &domain) {
        Json(json!({
            "success": true,
            "message": format!("Domain '{}' removed", domain.to_lowercase()),
        }))
        .into_response()
    } else {
        error_response(&AppError::not_found(format!(
            "Domain '{}' is not in the allowed list",
            domain.to_lowercase()
        )))
    }
}

// ---- settings ----

async fn get_crawling_enabled(
    State(state): State<AppState>,
    ctx: TenantCtx,
) -> Json<CrawlingEnabledResponse> {
    Json(CrawlingEnabledResponse {
        crawling_enabled: state.store.crawling_enabled(&ctx.tenant_id),
    })
}

async fn set_crawling_enabled(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Json(body): Json<SetCrawlingEnabledRequest>,
) -> Json<CrawlingEnabledResponse> {
    state
        .store
        .set_crawling_enabled(&ctx.tenant_id, body.enabled);
    info!(
        target: "server",
        tenant_id = %ctx.tenant_id,
        enabled = body.enabled,
        "crawling toggled"
    );
    Json(CrawlingEnabledResponse {
        crawling_enabled: body.enabled,
    })
}

// ---- crawl queue ----

/// Admit a URL to the tenant's crawl queue. The URL's host must be on the
/// tenant's allow list; admission never crosses tenants.
async fn add_to_queue(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Json(body): Json<AddToQueueRequest>,
) -> Response {
    let parsed = match Url::parse(body.url.trim()) {
        Ok(u) => u,
        Err(_) => return error_response(&AppError::validation("invalid URL")),
    };
    let Some(domain) = parsed.host_str().map(|h| h.to_lowercase()) else {
        return error_response(&AppError::validation("URL has no host"));
    };

    if !state.store.is_domain_allowed(&ctx.tenant_id, &domain) {
        return error_response(&AppError::forbidden(format!(
            "Domain '{}' is not in the allowed domains list",
            domain
        )));
    }

    let entry = state
        .store
        .enqueue(&ctx.tenant_id, parsed.as_str(), &domain, body.priority);
    Json(json!({
        "success": true,
        "message": "URL added to crawl queue",
        "url": entry.url,
        "domain": entry.domain,
        "priority": entry.priority,
    }))
    .into_response()
}

// ---- search ----

async fn run_search(state: &AppState, tenant_id: &str, request: SearchRequest) -> Response {
    let Some(search) = state.search.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "search engine is not configured" })),
        )
            .into_response();
    };
    match search.search(tenant_id, &request).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn search_post(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Json(request): Json<SearchRequest>,
) -> Response {
    run_search(&state, &ctx.tenant_id, request).await
}

async fn search_get(
    State(state): State<AppState>,
    ctx: TenantCtx,
    Query(params): Query<SearchParams>,
) -> Response {
    let request = SearchRequest {
        query: params.q,
        limit: params.limit,
        offset: params.offset,
    };
    run_search(&state, &ctx.tenant_id, request).await
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the agent router. Auth routes are mounted only when an auth service
/// is wired; single-tenant deployments expose the data surface directly.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/version", get(version))
        .route("/admin/allowed-domains", post(add_domain).get(list_domains))
        .route("/admin/allowed-domains/{domain}", delete(delete_domain))
        .route(
            "/admin/settings/crawling-enabled",
            get(get_crawling_enabled).put(set_crawling_enabled),
        )
        .route("/queue/add", post(add_to_queue))
        .route("/search", post(search_post).get(search_get));

    if state.auth.is_some() {
        router = router
            .route("/auth/request-link", post(request_link))
            .route("/auth/verify/{token}", get(verify_magic_link))
            .route("/auth/invitations/{token}/accept", get(accept_invitation))
            .route("/auth/me", get(me))
            .route("/auth/signout", post(sign_out))
            .route("/auth/organizations", get(organizations))
            .route(
                "/auth/organizations/{tenant_id}/members",
                get(list_members),
            )
            .route(
                "/auth/organizations/{tenant_id}/invite",
                post(invite_member),
            )
            .route(
                "/auth/organizations/{tenant_id}/members/{user_id}",
                delete(remove_member),
            );
    }

    router.with_state(state)
}

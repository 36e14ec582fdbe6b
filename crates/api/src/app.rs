use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header},
    middleware::from_fn_with_state,
    response::{Html, IntoResponse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;

use quotegate_auth::{
    CachedPermissionCheck, IdentityProvider, Permission, PermissionCache, PermissionCheck, PermissionSource, Role,
    RoleGuard,
};
use quotegate_core::{PeriodicTask, SystemClock};
use quotegate_security::{
    ClientAttributes, MonitorConfig, NetworkOrigin, RiskAssessor, RiskLevel, SecurityContext, SecurityMonitor,
};

use crate::authz::guarded;
use crate::config::GateConfig;
use crate::context::RequestIdentity;
use crate::middleware::{IdentityLayer, SecurityHeaders, client_ip, identity_middleware, security_headers};
use crate::remote::{BaasClient, BaasRiskAssessor, GeoIpLookup, http_client};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<PermissionCache>,
    pub identity: Arc<dyn IdentityProvider>,
    pub permissions: Arc<dyn PermissionSource>,
    pub security: Arc<SecurityContext>,
    pub headers: SecurityHeaders,
}

impl AppState {
    fn permission_check(&self) -> Arc<dyn PermissionCheck> {
        Arc::new(CachedPermissionCheck::new(self.cache.clone(), self.permissions.clone()))
    }
}

/// Running gateway: the router plus the background work it owns.
pub struct Gateway {
    pub state: AppState,
    cache_cleanup: PeriodicTask,
    monitor: SecurityMonitor,
}

impl Gateway {
    pub fn router(&self) -> anyhow::Result<Router> {
        build_app(self.state.clone())
    }

    pub async fn shutdown(self) {
        self.cache_cleanup.shutdown().await;
        self.monitor.shutdown().await;
    }
}

/// Wire the BaaS clients, the shared cache and the security monitor from
/// configuration. Must be called inside a tokio runtime.
pub fn bootstrap(config: &GateConfig) -> anyhow::Result<Gateway> {
    let http = http_client().context("failed to build HTTP client")?;
    let baas = BaasClient::new(http.clone(), &config.baas_url, &config.baas_anon_key);

    let cache = Arc::new(PermissionCache::new(config.permission_ttl));
    let cache_cleanup = cache.spawn_cleanup(config.cache_cleanup_interval);

    let assessor: Arc<dyn RiskAssessor> = Arc::new(BaasRiskAssessor::new(baas.clone()));
    let security = Arc::new(SecurityContext::new(&host_attributes(), assessor, Arc::new(SystemClock)));
    let monitor = SecurityMonitor::start(
        security.clone(),
        Arc::new(GeoIpLookup::new(http, &config.geo_url)),
        MonitorConfig {
            prune_interval: config.alert_prune_interval,
            max_alert_age: config.alert_max_age,
            ..MonitorConfig::default()
        },
    );

    let headers = SecurityHeaders::new(&config.content_security_policy)
        .context("QUOTEGATE_CSP is not a valid header value")?;

    let baas = Arc::new(baas);
    let state = AppState {
        cache,
        identity: baas.clone(),
        permissions: baas,
        security,
        headers,
    };

    Ok(Gateway {
        state,
        cache_cleanup,
        monitor,
    })
}

/// Stable attributes of this process, used as the session's device identity.
fn host_attributes() -> ClientAttributes {
    ClientAttributes {
        user_agent: format!("quotegate-api/{}", env!("CARGO_PKG_VERSION")),
        language: "en".to_string(),
        platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        timezone: "UTC".to_string(),
        hardware_concurrency: std::thread::available_parallelism()
            .map(|n| n.get().min(u16::MAX as usize) as u16)
            .unwrap_or(1),
        ..ClientAttributes::default()
    }
}

fn guard(roles: impl IntoIterator<Item = Role>, required: &[&'static str]) -> anyhow::Result<RoleGuard> {
    let required = required
        .iter()
        .map(|name| Permission::new(*name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoleGuard::new(roles)?.with_required_permissions(required))
}

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let check = state.permission_check();

    let customer = guarded(
        Router::new()
            .route("/dashboard", get(page("Your quotes")))
            .route("/session/refresh", post(refresh_session)),
        guard([Role::User, Role::Insurer, Role::Admin], &[])?,
        check.clone(),
    );
    let billing = guarded(
        Router::new().route("/billing", get(page("Billing"))),
        guard([Role::User, Role::Admin], &["billing:read"])?,
        check.clone(),
    );
    let insurer = guarded(
        Router::new().route("/insurer", get(page("Insurer workspace"))),
        guard([Role::Insurer], &[])?,
        check.clone(),
    );
    let admin = guarded(
        Router::new()
            .route("/admin", get(page("Administration")))
            .route("/admin/cache", get(cache_stats))
            .route("/admin/cache/clear", post(clear_cache))
            .route("/admin/security", get(security_signal)),
        guard([Role::Admin], &["admin:access"])?,
        check,
    );

    let app = Router::new()
        .route("/", get(page("Compare insurance offers")))
        .route("/unauthorized", get(unauthorized))
        .route("/whoami", get(whoami))
        .route("/security/assess", post(assess_risk))
        .merge(customer)
        .merge(billing)
        .merge(insurer)
        .merge(admin)
        .layer(
            // Outermost first: headers wrap every response, including guard redirects.
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.headers.clone(), security_headers))
                .layer(from_fn_with_state(
                    IdentityLayer {
                        provider: state.identity.clone(),
                    },
                    identity_middleware,
                )),
        )
        .with_state(state);

    Ok(app)
}

fn page(title: &'static str) -> impl Fn() -> std::future::Ready<Html<String>> + Clone + Send + Sync + 'static {
    move || std::future::ready(Html(format!("<!doctype html><title>{title}</title><h1>{title}</h1>")))
}

async fn unauthorized() -> impl IntoResponse {
    (
        StatusCode::FORBIDDEN,
        Html("<!doctype html><title>Unauthorized</title><h1>You do not have access to this page</h1>"),
    )
}

#[derive(Debug, Serialize)]
struct WhoAmI {
    authenticated: bool,
    subject_id: Option<String>,
    role: Option<Role>,
}

async fn whoami(Extension(identity): Extension<RequestIdentity>) -> Json<WhoAmI> {
    let subject = identity.subject();
    Json(WhoAmI {
        authenticated: subject.is_some(),
        subject_id: subject.map(|s| s.id.to_string()),
        role: subject.map(|s| s.role),
    })
}

/// Drop the caller's cached permissions after a role change on the client.
async fn refresh_session(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
) -> StatusCode {
    if let Some(subject) = identity.subject() {
        state.cache.invalidate(&subject.id);
    }
    StatusCode::NO_CONTENT
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats())
}

async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.cache.invalidate_all();
    StatusCode::NO_CONTENT
}

async fn security_signal(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.security.snapshot())
}

#[derive(Debug, Deserialize)]
struct AssessRequest {
    identifier: String,
}

#[derive(Debug, Serialize)]
struct AssessResponse {
    risk_level: Option<RiskLevel>,
    require_captcha: bool,
}

/// Scores the caller, not this process: the collaborator sees the request's
/// agent string and client address. Session-wide risk state is not touched.
async fn assess_risk(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<AssessRequest>,
) -> Json<AssessResponse> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let origin = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr.ip())).map(NetworkOrigin::new);

    let risk_level = state
        .security
        .assess_request(&body.identifier, user_agent, origin)
        .await;
    Json(AssessResponse {
        risk_level,
        require_captcha: state.security.should_require_captcha(risk_level),
    })
}

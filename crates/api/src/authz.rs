//! Route-level access guard.
//!
//! Wraps a [`RoleGuard`] as axum middleware: allowed requests reach the
//! handler, denied ones get a `303 See Other` to the guard's redirect target.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Redirect, Response},
};

use quotegate_auth::{GuardOutcome, IdentityState, PermissionCheck, RoleGuard};

use crate::context::RequestIdentity;

#[derive(Clone)]
pub struct GuardState {
    guard: Arc<RoleGuard>,
    check: Arc<dyn PermissionCheck>,
}

impl GuardState {
    pub fn new(guard: RoleGuard, check: Arc<dyn PermissionCheck>) -> Self {
        Self {
            guard: Arc::new(guard),
            check,
        }
    }
}

pub async fn require_access(
    State(state): State<GuardState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let identity = req
        .extensions()
        .get::<RequestIdentity>()
        .map(|r| r.state().clone())
        .unwrap_or(IdentityState::Resolved(None));

    match state.guard.evaluate(&identity, state.check.as_ref()).await {
        GuardOutcome::Allow => next.run(req).await,
        GuardOutcome::Deny { kind, redirect_to } => {
            tracing::info!(path = %req.uri().path(), ?kind, redirect_to = %redirect_to, "access denied");
            Redirect::to(&redirect_to).into_response()
        }
        GuardOutcome::Pending => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            "resolving identity",
        )
            .into_response(),
    }
}

/// Put every route of `router` behind `guard`.
pub fn guarded<S>(router: Router<S>, guard: RoleGuard, check: Arc<dyn PermissionCheck>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(from_fn_with_state(GuardState::new(guard, check), require_access))
}

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};

use quotegate_auth::{IdentityProvider, resolve_identity};

use crate::context::RequestIdentity;

/// Response headers applied to every page.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    csp: HeaderValue,
}

impl SecurityHeaders {
    pub fn new(content_security_policy: &str) -> Result<Self, header::InvalidHeaderValue> {
        Ok(Self {
            csp: HeaderValue::from_str(content_security_policy)?,
        })
    }
}

pub async fn security_headers(
    State(headers): State<SecurityHeaders>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let mut res = next.run(req).await;

    let out = res.headers_mut();
    out.insert(header::CONTENT_SECURITY_POLICY, headers.csp.clone());
    out.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    out.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    out.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    res
}

#[derive(Clone)]
pub struct IdentityLayer {
    pub provider: Arc<dyn IdentityProvider>,
}

/// Resolve the bearer token (if any) into a [`RequestIdentity`].
///
/// Never rejects: an absent, invalid or unverifiable token yields an
/// anonymous identity and the route guards decide what that means.
pub async fn identity_middleware(
    State(layer): State<IdentityLayer>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let state = resolve_identity(layer.provider.as_ref(), extract_bearer(req.headers())).await;
    req.extensions_mut().insert(RequestIdentity::new(state));
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Client address for risk signals: the first `X-Forwarded-For` hop when it
/// parses as an IP, otherwise the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
    forwarded.or(peer).map(|ip| ip.to_string())
}

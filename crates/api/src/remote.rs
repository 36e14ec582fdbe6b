//! HTTP clients for the external collaborators.
//!
//! The BaaS exposes a PostgREST-style RPC endpoint and a GoTrue-style auth
//! endpoint; both require the project's anon key in the `apikey` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use quotegate_auth::{IdentityProvider, Permission, PermissionSet, PermissionSource, Role, Subject};
use quotegate_core::{RemoteError, SubjectId};
use quotegate_security::{NetworkOrigin, NetworkOriginLookup, RiskAssessor, RiskContext, RiskLevel};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn http_client() -> Result<Client, RemoteError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RemoteError::network(e.to_string()))
}

async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
    let response = request
        .send()
        .await
        .map_err(|e| RemoteError::network(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::unauthorized(message)),
        _ => Err(RemoteError::server(status.as_u16(), message)),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    response.json::<T>().await.map_err(|e| RemoteError::decode(e.to_string()))
}

/// Client for the BaaS auth and RPC endpoints.
#[derive(Debug, Clone)]
pub struct BaasClient {
    http: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    role: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

impl BaasClient {
    pub fn new(http: Client, base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    fn rpc(&self, function: &str) -> RequestBuilder {
        self.http
            .post(format!("{}/rest/v1/rpc/{function}", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }
}

#[async_trait]
impl PermissionSource for BaasClient {
    async fn fetch_permissions(&self, subject: &SubjectId) -> Result<PermissionSet, RemoteError> {
        let request = self
            .rpc("get_user_permissions")
            .json(&json!({ "user_id": subject.as_str() }));
        let names: Vec<String> = decode(send(request).await?).await?;
        PermissionSet::parse(names).map_err(|e| RemoteError::decode(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for BaasClient {
    async fn resolve(&self, token: &str) -> Result<Option<Subject>, RemoteError> {
        let request = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token);

        let user: AuthUser = match send(request).await {
            Ok(response) => decode(response).await?,
            Err(RemoteError::Unauthorized(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let id = SubjectId::parse(&user.id).map_err(|e| RemoteError::decode(e.to_string()))?;
        let role = match user.app_metadata.role.as_deref() {
            Some(raw) => raw.parse::<Role>().map_err(|e| RemoteError::decode(e.to_string()))?,
            None => Role::User,
        };
        let permissions = embedded_permissions(&id, user.app_metadata.permissions);

        Ok(Some(Subject::new(id, role).with_permissions(permissions)))
    }
}

/// Permissions carried in the session payload. Malformed names are logged and
/// skipped; they must not cost the user their session.
fn embedded_permissions(subject: &SubjectId, names: Vec<String>) -> PermissionSet {
    let mut permissions = PermissionSet::new();
    for name in names {
        match Permission::new(name) {
            Ok(permission) => {
                permissions.insert(permission);
            }
            Err(err) => tracing::warn!(subject = %subject, "ignoring malformed session permission: {err}"),
        }
    }
    permissions
}

/// Risk scoring through the BaaS `assess_login_risk` RPC.
///
/// The captcha policy lives here, with the collaborator: levels at or above
/// `captcha_from` require one.
#[derive(Debug, Clone)]
pub struct BaasRiskAssessor {
    client: BaasClient,
    captcha_from: RiskLevel,
}

#[derive(Debug, Deserialize)]
struct RiskResponse {
    level: RiskLevel,
}

impl BaasRiskAssessor {
    pub fn new(client: BaasClient) -> Self {
        Self {
            client,
            captcha_from: RiskLevel::High,
        }
    }

    pub fn with_captcha_from(mut self, level: RiskLevel) -> Self {
        self.captcha_from = level;
        self
    }
}

#[async_trait]
impl RiskAssessor for BaasRiskAssessor {
    async fn assess_risk(&self, identifier: &str, context: &RiskContext) -> Result<RiskLevel, RemoteError> {
        let request = self.client.rpc("assess_login_risk").json(&json!({
            "identifier": identifier,
            "context": context,
        }));
        let response: RiskResponse = decode(send(request).await?).await?;
        Ok(response.level)
    }

    fn should_require_captcha(&self, level: RiskLevel) -> bool {
        level >= self.captcha_from
    }
}

/// Geolocation-by-IP over a public JSON endpoint.
#[derive(Debug, Clone)]
pub struct GeoIpLookup {
    http: Client,
    url: String,
}

impl GeoIpLookup {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }
}

#[async_trait]
impl NetworkOriginLookup for GeoIpLookup {
    async fn lookup(&self) -> Result<NetworkOrigin, RemoteError> {
        decode(send(self.http.get(&self.url)).await?).await
    }
}

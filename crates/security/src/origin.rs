use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quotegate_core::RemoteError;

/// Coarse network origin of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOrigin {
    pub ip: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl NetworkOrigin {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            city: None,
            region: None,
            country: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

/// Geolocation-by-IP lookup. Best effort: callers log failures and move on.
#[async_trait]
pub trait NetworkOriginLookup: Send + Sync {
    async fn lookup(&self) -> Result<NetworkOrigin, RemoteError>;
}

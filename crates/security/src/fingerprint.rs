use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable attributes reported by the client.
///
/// Only attributes that survive a reload belong here; anything per-session
/// would make the fingerprint useless for recognising a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAttributes {
    pub user_agent: String,
    pub language: String,
    pub platform: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u8,
    pub timezone: String,
    pub hardware_concurrency: u16,
}

/// Lowercase hex SHA-256 digest identifying a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Pure function of the attributes: same input, same fingerprint.
    pub fn compute(attrs: &ClientAttributes) -> Self {
        let canonical = format!(
            "{}\n{}\n{}\n{}x{}\n{}\n{}\n{}",
            attrs.user_agent,
            attrs.language,
            attrs.platform,
            attrs.screen_width,
            attrs.screen_height,
            attrs.color_depth,
            attrs.timezone,
            attrs.hardware_concurrency,
        );

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines. Shorter fingerprints are returned whole.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl core::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

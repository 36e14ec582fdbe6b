use core::str::FromStr;

use serde::{Deserialize, Serialize};

use quotegate_core::DomainError;

/// Role of an authenticated subject.
///
/// The set is closed: every dashboard of the product belongs to exactly one of
/// these audiences. Wire form is `USER` / `INSURER` / `ADMIN`; parsing accepts
/// any casing since the identity provider stores roles in lower case.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum Role {
    /// A consumer comparing quotes.
    User,
    /// Staff of a partner insurer publishing offers.
    Insurer,
    /// Platform administrator.
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Insurer, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Insurer => "INSURER",
            Role::Admin => "ADMIN",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown role '{s}'")))
    }
}

impl TryFrom<String> for Role {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_any_casing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Insurer".parse::<Role>().unwrap(), Role::Insurer);
        assert_eq!(" USER ".parse::<Role>().unwrap(), Role::User);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Insurer).unwrap(), "\"INSURER\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }
}

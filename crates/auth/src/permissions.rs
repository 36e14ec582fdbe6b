use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use quotegate_core::DomainError;

const MAX_PERMISSION_LEN: usize = 128;

/// Permission identifier.
///
/// Permissions are opaque names such as `"billing:read"` or `"quotes:write"`.
/// The special wildcard permission `"*"` grants everything; the identity
/// provider hands it to platform administrators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: &'static str = "*";

    /// Validate a permission name: non-empty, no whitespace, bounded length.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::validation("permission name must not be empty"));
        }
        if name.len() > MAX_PERMISSION_LEN {
            return Err(DomainError::validation(format!(
                "permission name exceeds {MAX_PERMISSION_LEN} bytes"
            )));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "permission name '{name}' contains whitespace"
            )));
        }
        Ok(Self(name))
    }

    pub fn wildcard() -> Self {
        Self(Cow::Borrowed(Self::WILDCARD))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == Self::WILDCARD
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Permission {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_owned())
    }
}

impl TryFrom<String> for Permission {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0.into_owned()
    }
}

/// Ordered, duplicate-free collection of permissions.
///
/// Order is the order the identity provider returned them in (first occurrence
/// wins); it only matters for display and audit output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Permission>", into = "Vec<Permission>")]
pub struct PermissionSet {
    items: Vec<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of raw names, failing on the first invalid one.
    pub fn parse<I, S>(names: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|n| n.as_ref().parse::<Permission>())
            .collect()
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        if self.items.contains(&permission) {
            return false;
        }
        self.items.push(permission);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.items.iter()
    }

    /// Exact membership, ignoring the wildcard.
    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|p| p.as_str() == name)
    }

    pub fn has_wildcard(&self) -> bool {
        self.items.iter().any(Permission::is_wildcard)
    }

    /// Whether this set grants `name`, honouring the wildcard.
    pub fn grants(&self, name: &str) -> bool {
        self.has_wildcard() || self.contains(name)
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        let mut seen = HashSet::new();
        let items = iter
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
        Self { items }
    }
}

impl From<Vec<Permission>> for PermissionSet {
    fn from(value: Vec<Permission>) -> Self {
        value.into_iter().collect()
    }
}

impl From<PermissionSet> for Vec<Permission> {
    fn from(value: PermissionSet) -> Self {
        value.items
    }
}

impl<'a> IntoIterator for &'a PermissionSet {
    type Item = &'a Permission;
    type IntoIter = std::slice::Iter<'a, Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

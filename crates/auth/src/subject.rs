use serde::{Deserialize, Serialize};

use quotegate_core::SubjectId;

use crate::{PermissionSet, Role};

/// An authenticated identity.
///
/// Created once the identity provider confirms a session, replaced wholesale
/// when it pushes a role or permission change, dropped on sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub role: Role,
    #[serde(default)]
    pub permissions: PermissionSet,
}

impl Subject {
    pub fn new(id: SubjectId, role: Role) -> Self {
        Self {
            id,
            role,
            permissions: PermissionSet::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Check against the permissions carried by the session itself.
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.grants(name)
    }
}

//! Request-time role/permission gate for protected views.
//!
//! The guard never mutates identity or cache state and never returns an
//! error: a denial is an outcome carrying the location to redirect to.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use quotegate_core::RemoteError;

use crate::{IdentityState, Permission, Role, Subject};

pub const DEFAULT_REDIRECT: &str = "/";
pub const UNAUTHORIZED_REDIRECT: &str = "/unauthorized";

/// The subject's permission-check capability, as seen by the guard.
#[async_trait]
pub trait PermissionCheck: Send + Sync {
    async fn has_permission(&self, subject: &Subject, permission: &Permission) -> Result<bool, RemoteError>;
}

/// Checks against the permissions embedded in the session. Never fails.
#[derive(Debug, Default, Copy, Clone)]
pub struct SubjectGrants;

#[async_trait]
impl PermissionCheck for SubjectGrants {
    async fn has_permission(&self, subject: &Subject, permission: &Permission) -> Result<bool, RemoteError> {
        Ok(subject.has_permission(permission.as_str()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardConfigError {
    #[error("a guard needs at least one allowed role")]
    NoAllowedRoles,

    #[error("redirect target '{0}' must be an absolute path")]
    InvalidRedirect(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No subject: not signed in, or the session expired.
    NotAuthenticated,
    /// Signed in with a role this view does not admit.
    RoleNotAllowed,
    /// Right role, but at least one required permission is not granted.
    MissingPermission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GuardOutcome {
    /// Identity is still being resolved; render a neutral waiting state.
    Pending,
    Allow,
    Deny { kind: DenialKind, redirect_to: String },
}

impl GuardOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardOutcome::Allow)
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            GuardOutcome::Deny { redirect_to, .. } => Some(redirect_to),
            _ => None,
        }
    }
}

/// Declarative access requirement for one protected view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGuard {
    allowed_roles: BTreeSet<Role>,
    required_permissions: Vec<Permission>,
    default_redirect: String,
    unauthorized_redirect: String,
}

impl RoleGuard {
    pub fn new(allowed_roles: impl IntoIterator<Item = Role>) -> Result<Self, GuardConfigError> {
        let allowed_roles: BTreeSet<Role> = allowed_roles.into_iter().collect();
        if allowed_roles.is_empty() {
            return Err(GuardConfigError::NoAllowedRoles);
        }
        Ok(Self {
            allowed_roles,
            required_permissions: Vec::new(),
            default_redirect: DEFAULT_REDIRECT.to_string(),
            unauthorized_redirect: UNAUTHORIZED_REDIRECT.to_string(),
        })
    }

    pub fn with_required_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.required_permissions = permissions.into_iter().collect();
        self
    }

    pub fn with_default_redirect(mut self, to: impl Into<String>) -> Result<Self, GuardConfigError> {
        self.default_redirect = validate_redirect(to.into())?;
        Ok(self)
    }

    pub fn with_unauthorized_redirect(mut self, to: impl Into<String>) -> Result<Self, GuardConfigError> {
        self.unauthorized_redirect = validate_redirect(to.into())?;
        Ok(self)
    }

    pub fn allowed_roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.allowed_roles.iter().copied()
    }

    pub fn required_permissions(&self) -> &[Permission] {
        &self.required_permissions
    }

    fn deny(&self, kind: DenialKind) -> GuardOutcome {
        let redirect_to = match kind {
            DenialKind::MissingPermission => self.unauthorized_redirect.clone(),
            DenialKind::NotAuthenticated | DenialKind::RoleNotAllowed => self.default_redirect.clone(),
        };
        GuardOutcome::Deny { kind, redirect_to }
    }

    /// Decide access for the current identity state.
    ///
    /// Required permissions are checked in declaration order and the first
    /// one not granted ends the evaluation. A check that errors counts as not
    /// granted.
    pub async fn evaluate(&self, identity: &IdentityState, check: &dyn PermissionCheck) -> GuardOutcome {
        let subject = match identity {
            IdentityState::Initializing => return GuardOutcome::Pending,
            IdentityState::Resolved(None) => {
                tracing::debug!("guard denied: no subject");
                return self.deny(DenialKind::NotAuthenticated);
            }
            IdentityState::Resolved(Some(subject)) => subject,
        };

        if !self.allowed_roles.contains(&subject.role) {
            tracing::debug!(subject = %subject.id, role = %subject.role, "guard denied: role not allowed");
            return self.deny(DenialKind::RoleNotAllowed);
        }

        for permission in &self.required_permissions {
            let granted = match check.has_permission(subject, permission).await {
                Ok(granted) => granted,
                Err(err) => {
                    tracing::warn!(
                        subject = %subject.id,
                        permission = %permission,
                        "permission check failed, treating as not granted: {err}"
                    );
                    false
                }
            };

            if !granted {
                tracing::debug!(subject = %subject.id, permission = %permission, "guard denied: missing permission");
                return self.deny(DenialKind::MissingPermission);
            }
        }

        GuardOutcome::Allow
    }

    /// Like [`RoleGuard::evaluate`], but discards the outcome if `mount` was
    /// unmounted while the checks were in flight.
    pub async fn evaluate_mounted(
        &self,
        mount: &GuardMount,
        identity: &IdentityState,
        check: &dyn PermissionCheck,
    ) -> Option<GuardOutcome> {
        let outcome = self.evaluate(identity, check).await;
        if mount.is_mounted() {
            Some(outcome)
        } else {
            tracing::debug!("guard outcome discarded: view unmounted");
            None
        }
    }
}

fn validate_redirect(to: String) -> Result<String, GuardConfigError> {
    if to.starts_with('/') && !to.starts_with("//") {
        Ok(to)
    } else {
        Err(GuardConfigError::InvalidRedirect(to))
    }
}

/// Liveness flag for the view consuming a guard outcome.
///
/// Clones share the flag. Dropping the last clone does not unmount; call
/// [`GuardMount::unmount`] explicitly when the view goes away.
#[derive(Debug, Clone)]
pub struct GuardMount {
    mounted: Arc<AtomicBool>,
}

impl Default for GuardMount {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardMount {
    pub fn new() -> Self {
        Self {
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::PermissionSet;

    fn user_with(role: Role, perms: &[&str]) -> IdentityState {
        let subject = Subject::new("u1".parse().unwrap(), role)
            .with_permissions(PermissionSet::parse(perms.iter().copied()).unwrap());
        IdentityState::Resolved(Some(subject))
    }

    fn p(name: &str) -> Permission {
        name.parse().unwrap()
    }

    /// Always fails, recording which permissions were asked for.
    #[derive(Default)]
    struct BrokenCheck {
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PermissionCheck for BrokenCheck {
        async fn has_permission(&self, _subject: &Subject, permission: &Permission) -> Result<bool, RemoteError> {
            self.asked.lock().unwrap().push(permission.to_string());
            Err(RemoteError::network("offline"))
        }
    }

    #[tokio::test]
    async fn wrong_role_is_denied_to_default_location() {
        let guard = RoleGuard::new([Role::Admin]).unwrap();
        let outcome = guard.evaluate(&user_with(Role::User, &[]), &SubjectGrants).await;
        assert_eq!(
            outcome,
            GuardOutcome::Deny {
                kind: DenialKind::RoleNotAllowed,
                redirect_to: "/".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_permission_redirects_to_unauthorized() {
        let guard = RoleGuard::new([Role::User, Role::Admin])
            .unwrap()
            .with_required_permissions([p("billing:read")]);
        let outcome = guard.evaluate(&user_with(Role::User, &["quotes:read"]), &SubjectGrants).await;
        assert_eq!(outcome.redirect_target(), Some("/unauthorized"));
        assert!(matches!(
            outcome,
            GuardOutcome::Deny {
                kind: DenialKind::MissingPermission,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn allowed_role_without_requirements_is_allowed() {
        let guard = RoleGuard::new([Role::User]).unwrap().with_required_permissions([]);
        let outcome = guard.evaluate(&user_with(Role::User, &[]), &SubjectGrants).await;
        assert!(outcome.is_allowed());
    }

    #[tokio::test]
    async fn no_subject_is_denied_regardless_of_roles() {
        let guard = RoleGuard::new(Role::ALL).unwrap();
        let outcome = guard.evaluate(&IdentityState::Resolved(None), &SubjectGrants).await;
        assert_eq!(
            outcome,
            GuardOutcome::Deny {
                kind: DenialKind::NotAuthenticated,
                redirect_to: "/".to_string()
            }
        );
    }

    #[tokio::test]
    async fn initializing_identity_yields_pending() {
        let guard = RoleGuard::new([Role::User]).unwrap();
        let outcome = guard.evaluate(&IdentityState::Initializing, &SubjectGrants).await;
        assert_eq!(outcome, GuardOutcome::Pending);
    }

    #[tokio::test]
    async fn all_required_permissions_must_hold() {
        let guard = RoleGuard::new([Role::Insurer])
            .unwrap()
            .with_required_permissions([p("offers:write"), p("quotes:read")]);

        let partial = guard.evaluate(&user_with(Role::Insurer, &["offers:write"]), &SubjectGrants).await;
        assert!(!partial.is_allowed());

        let full = guard
            .evaluate(&user_with(Role::Insurer, &["quotes:read", "offers:write"]), &SubjectGrants)
            .await;
        assert!(full.is_allowed());

        let wildcard = guard.evaluate(&user_with(Role::Insurer, &["*"]), &SubjectGrants).await;
        assert!(wildcard.is_allowed());
    }

    #[tokio::test]
    async fn failing_check_is_fail_closed_and_short_circuits() {
        let guard = RoleGuard::new([Role::User])
            .unwrap()
            .with_required_permissions([p("billing:read"), p("quotes:read")]);
        let check = BrokenCheck::default();

        let outcome = guard.evaluate(&user_with(Role::User, &["billing:read", "quotes:read"]), &check).await;
        assert_eq!(outcome.redirect_target(), Some("/unauthorized"));
        assert_eq!(*check.asked.lock().unwrap(), vec!["billing:read".to_string()]);
    }

    #[tokio::test]
    async fn unmounted_view_discards_outcome() {
        let guard = RoleGuard::new([Role::User]).unwrap();
        let mount = GuardMount::new();
        let identity = user_with(Role::User, &[]);

        assert_eq!(
            guard.evaluate_mounted(&mount, &identity, &SubjectGrants).await,
            Some(GuardOutcome::Allow)
        );

        mount.clone().unmount();
        assert_eq!(guard.evaluate_mounted(&mount, &identity, &SubjectGrants).await, None);
    }

    #[test]
    fn construction_is_validated() {
        assert_eq!(RoleGuard::new([]).unwrap_err(), GuardConfigError::NoAllowedRoles);
        let guard = RoleGuard::new([Role::User]).unwrap();
        assert!(guard.clone().with_default_redirect("https://evil.example").is_err());
        assert!(guard.clone().with_unauthorized_redirect("//evil.example").is_err());
        assert!(guard.with_default_redirect("/login").is_ok());
    }

    #[tokio::test]
    async fn custom_redirects_are_used() {
        let guard = RoleGuard::new([Role::Admin])
            .unwrap()
            .with_default_redirect("/login")
            .unwrap()
            .with_unauthorized_redirect("/forbidden")
            .unwrap()
            .with_required_permissions([p("admin:access")]);

        let denied_role = guard.evaluate(&user_with(Role::User, &[]), &SubjectGrants).await;
        assert_eq!(denied_role.redirect_target(), Some("/login"));

        let denied_perm = guard.evaluate(&user_with(Role::Admin, &[]), &SubjectGrants).await;
        assert_eq!(denied_perm.redirect_target(), Some("/forbidden"));
    }
}

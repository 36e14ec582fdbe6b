//! Session identity state shared by all guards.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use quotegate_core::RemoteError;

use crate::{PermissionCache, Subject};

/// Identity resolution as observed by guards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    /// Session start; the identity provider has not answered yet.
    #[default]
    Initializing,
    /// Resolved: `None` means nobody is signed in.
    Resolved(Option<Subject>),
}

impl IdentityState {
    pub fn subject(&self) -> Option<&Subject> {
        match self {
            IdentityState::Resolved(Some(subject)) => Some(subject),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, IdentityState::Resolved(_))
    }
}

/// Resolves a session token into a subject.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` for an unknown or expired session.
    async fn resolve(&self, token: &str) -> Result<Option<Subject>, RemoteError>;
}

/// Resolve an optional session token into an identity state.
///
/// No token means nobody is signed in. A provider failure is logged and also
/// resolves to nobody, so guards stop waiting and fail closed.
pub async fn resolve_identity(provider: &dyn IdentityProvider, token: Option<&str>) -> IdentityState {
    let Some(token) = token else {
        return IdentityState::Resolved(None);
    };
    match provider.resolve(token).await {
        Ok(subject) => IdentityState::Resolved(subject),
        Err(err) => {
            tracing::warn!("identity resolution failed: {err}");
            IdentityState::Resolved(None)
        }
    }
}

/// Publishes identity changes and keeps the permission cache consistent with
/// them.
///
/// Role/permission pushes invalidate the affected subject's cache entry;
/// sign-out clears the whole cache.
#[derive(Debug)]
pub struct IdentityStore {
    state: watch::Sender<IdentityState>,
    cache: Arc<PermissionCache>,
}

impl IdentityStore {
    pub fn new(cache: Arc<PermissionCache>) -> Self {
        let (state, _) = watch::channel(IdentityState::Initializing);
        Self { state, cache }
    }

    pub fn current(&self) -> IdentityState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.state.subscribe()
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    /// Finish session start with the given subject (or nobody).
    pub fn resolve(&self, subject: Option<Subject>) {
        if let Some(subject) = &subject {
            tracing::info!(subject = %subject.id, role = %subject.role, "identity resolved");
        } else {
            tracing::info!("identity resolved: anonymous");
        }
        self.state.send_replace(IdentityState::Resolved(subject));
    }

    /// Resolve the session through the identity provider; see
    /// [`resolve_identity`].
    pub async fn resolve_with(&self, provider: &dyn IdentityProvider, token: &str) {
        let subject = match resolve_identity(provider, Some(token)).await {
            IdentityState::Resolved(subject) => subject,
            IdentityState::Initializing => None,
        };
        self.resolve(subject);
    }

    /// Apply a role/permission change pushed by the identity provider.
    pub fn update(&self, subject: Subject) {
        self.cache.invalidate(&subject.id);
        tracing::info!(subject = %subject.id, role = %subject.role, "identity updated");
        self.state.send_replace(IdentityState::Resolved(Some(subject)));
    }

    /// Sign-out or session expiry.
    pub fn sign_out(&self) {
        self.cache.invalidate_all();
        tracing::info!("signed out");
        self.state.send_replace(IdentityState::Resolved(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PermissionSet, Role};

    fn subject(role: Role) -> Subject {
        Subject::new("u1".parse().unwrap(), role)
    }

    async fn warm(cache: &PermissionCache, id: &str) {
        cache
            .get_permissions(&id.parse().unwrap(), || async {
                PermissionSet::parse(["quotes:read"]).map_err(|e| RemoteError::decode(e.to_string()))
            })
            .await
            .unwrap();
    }

    struct FixedProvider(Result<Option<Subject>, RemoteError>);

    #[async_trait]
    impl IdentityProvider for FixedProvider {
        async fn resolve(&self, _token: &str) -> Result<Option<Subject>, RemoteError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn starts_initializing_and_notifies_subscribers() {
        let store = IdentityStore::new(Arc::new(PermissionCache::default()));
        let mut rx = store.subscribe();
        assert_eq!(store.current(), IdentityState::Initializing);

        store.resolve(Some(subject(Role::User)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().subject().map(|s| s.role), Some(Role::User));
    }

    #[tokio::test]
    async fn update_invalidates_only_that_subject() {
        let cache = Arc::new(PermissionCache::default());
        warm(&cache, "u1").await;
        warm(&cache, "u2").await;
        let store = IdentityStore::new(cache.clone());

        store.update(subject(Role::Admin));
        assert_eq!(cache.len(), 1);
        assert_eq!(store.current().subject().map(|s| s.role), Some(Role::Admin));
    }

    #[tokio::test]
    async fn sign_out_clears_cache() {
        let cache = Arc::new(PermissionCache::default());
        warm(&cache, "u1").await;
        warm(&cache, "u2").await;
        let store = IdentityStore::new(cache.clone());
        store.resolve(Some(subject(Role::User)));

        store.sign_out();
        assert!(cache.is_empty());
        assert_eq!(store.current(), IdentityState::Resolved(None));
    }

    #[tokio::test]
    async fn provider_failure_resolves_to_anonymous() {
        let store = IdentityStore::new(Arc::new(PermissionCache::default()));
        let provider = FixedProvider(Err(RemoteError::network("down")));
        store.resolve_with(&provider, "token").await;
        assert_eq!(store.current(), IdentityState::Resolved(None));

        let provider = FixedProvider(Ok(Some(subject(Role::Insurer))));
        store.resolve_with(&provider, "token").await;
        assert!(store.current().is_resolved());
        assert_eq!(store.current().subject().map(|s| s.role), Some(Role::Insurer));
    }

    #[tokio::test]
    async fn missing_token_is_anonymous_without_calling_provider() {
        let provider = FixedProvider(Ok(Some(subject(Role::Admin))));
        assert_eq!(resolve_identity(&provider, None).await, IdentityState::Resolved(None));
        assert_eq!(
            resolve_identity(&provider, Some("t")).await.subject().map(|s| s.role),
            Some(Role::Admin)
        );
    }
}

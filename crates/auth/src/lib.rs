//! `quotegate-auth`: role/permission gated access control.
//!
//! This crate is decoupled from HTTP: remote collaborators are reached through
//! the [`PermissionSource`] and [`IdentityProvider`] traits.

pub mod cache;
pub mod guard;
pub mod identity;
pub mod permissions;
pub mod roles;
pub mod subject;

pub use cache::{
    CacheStats, CachedPermissionCheck, Freshness, PermissionCache, PermissionLookup,
    PermissionSource, DEFAULT_PERMISSION_TTL,
};
pub use guard::{
    DenialKind, GuardConfigError, GuardMount, GuardOutcome, PermissionCheck, RoleGuard,
    SubjectGrants,
};
pub use identity::{resolve_identity, IdentityProvider, IdentityState, IdentityStore};
pub use permissions::{Permission, PermissionSet};
pub use roles::Role;
pub use subject::Subject;

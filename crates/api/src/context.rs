use quotegate_auth::{IdentityState, Subject};

/// Identity resolved for the current request.
///
/// Inserted into request extensions by the identity middleware; guards treat
/// a request without it as unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity(IdentityState);

impl RequestIdentity {
    pub fn new(state: IdentityState) -> Self {
        Self(state)
    }

    pub fn state(&self) -> &IdentityState {
        &self.0
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.0.subject()
    }
}

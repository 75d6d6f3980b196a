//! Identity resolution seam.
//!
//! Author identity is re-resolved at approval time, never cached: the
//! account may have been renamed or deleted while the change sat in the
//! queue, and the replayed revision must be attributed to whatever the
//! account is called now.

use async_trait::async_trait;

use crate::change::UserRef;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a user reference to its current form.
    ///
    /// Must tolerate renamed and deleted accounts: a deleted registered
    /// account resolves to an anonymous reference keeping the recorded
    /// name, never to an error.
    async fn resolve(&self, user: &UserRef) -> UserRef;
}

/// Resolver that returns the reference unchanged. Suitable for tests and
/// for deployments where the platform guarantees stable identities.
pub struct PassthroughResolver;

#[async_trait]
impl IdentityResolver for PassthroughResolver {
    async fn resolve(&self, user: &UserRef) -> UserRef {
        user.clone()
    }
}

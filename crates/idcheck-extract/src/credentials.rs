//! Remote-service credentials and the rotation pool.
//!
//! The pool is immutable and shared across requests; every rotation draws an
//! independent uniform random key, so concurrent retries never contend on
//! shared cursor state.

use rand::seq::SliceRandom;
use std::fmt;

/// An extraction-service API key. Redacted in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(***)")
    }
}

/// A primary credential plus fallbacks for quota rotation.
pub struct CredentialPool {
    primary: ApiKey,
    fallbacks: Vec<ApiKey>,
}

impl CredentialPool {
    pub fn new(primary: ApiKey, fallbacks: Vec<ApiKey>) -> Self {
        Self { primary, fallbacks }
    }

    /// The key every request starts with.
    pub fn primary(&self) -> &ApiKey {
        &self.primary
    }

    /// Draw a key for a retry: uniform random over the fallback pool, with
    /// repeats allowed. An empty pool falls back to the primary key.
    pub fn rotate(&self) -> &ApiKey {
        self.fallbacks
            .choose(&mut rand::thread_rng())
            .unwrap_or(&self.primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let key = ApiKey::new("super-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
    }

    #[test]
    fn test_rotate_empty_pool_returns_primary() {
        let pool = CredentialPool::new(ApiKey::new("primary"), vec![]);
        assert_eq!(pool.rotate(), pool.primary());
    }

    #[test]
    fn test_rotate_draws_from_fallbacks() {
        let fallbacks: Vec<ApiKey> = (0..3).map(|i| ApiKey::new(format!("key-{i}"))).collect();
        let pool = CredentialPool::new(ApiKey::new("primary"), fallbacks.clone());
        for _ in 0..50 {
            let drawn = pool.rotate();
            assert!(fallbacks.contains(drawn));
        }
    }
}

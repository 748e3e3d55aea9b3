//! Shared setup for the gateway integration tests
//!
//! Provides a store wrapper that counts lookups and a gateway built with
//! cheap Argon2 parameters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repogate_lib::auth::{
    AuthGateway, CredentialCodec, CredentialHash, CredentialStore, GatewayOptions,
    MemoryCredentialStore, ResourceLimiter, StoredCredential,
};
use repogate_lib::error::AuthError;
use zeroize::Zeroizing;

pub const FAST: CredentialCodec = CredentialCodec::with_params(64, 1, 1);

/// Delegates to an in-memory store, counting how often a hash is looked up
pub struct CountingStore {
    pub inner: MemoryCredentialStore,
    pub lookups: AtomicUsize,
    /// Extra latency per lookup, widening the coalescing window
    pub delay: Duration,
}

impl CountingStore {
    pub fn new(inner: MemoryCredentialStore, delay: Duration) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn lookup(&self, host: &str, user: &str) -> Option<StoredCredential> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.lookup(host, user).await
    }

    async fn store(&self, host: &str, user: &str, hash: CredentialHash) -> Result<(), AuthError> {
        self.inner.store(host, user, hash).await
    }

    async fn invalidate(&self, host: &str, user: &str) -> usize {
        self.inner.invalidate(host, user).await
    }

    async fn secret(&self, host: &str) -> Option<Arc<Zeroizing<Vec<u8>>>> {
        self.inner.secret(host).await
    }
}

/// Gateway over `store` with a 1 MiB ceiling and the given admission timeout
pub fn gateway_with(store: Arc<dyn CredentialStore>, acquire_timeout: Duration) -> AuthGateway {
    let limiter = ResourceLimiter::new(1024 * 1024, FAST.expected_cost()).unwrap();
    let options = GatewayOptions {
        acquire_timeout,
        ..GatewayOptions::default()
    };
    AuthGateway::new(store, FAST, limiter, options).unwrap()
}

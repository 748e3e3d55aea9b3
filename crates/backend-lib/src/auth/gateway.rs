// ============================
// crates/backend-lib/src/auth/gateway.rs
// ============================
//! Composition root of the authentication core.
//!
//! Request path: denial pre-filter, then the coalescer, whose owner looks the
//! credential up, waits for memory admission and runs Argon2 on the blocking
//! pool.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use repogate_common::split_credentials;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::codec::{CredentialCodec, CredentialHash};
use super::coalesce::AuthCoalescer;
use super::denial::{DenialCache, DEFAULT_SLOTS};
use super::fingerprint::RotatingNonce;
use super::limiter::ResourceLimiter;
use super::store::CredentialStore;
use crate::config::AuthSettings;
use crate::error::AuthError;
use crate::metrics::{
    AUTH_DENIAL_CACHE_HIT, AUTH_DENIED, AUTH_GRANTED, AUTH_INVALIDATED, AUTH_TAINTED,
};

#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    /// Longest wait for memory admission
    pub acquire_timeout: Duration,
    /// Denial pre-filter size
    pub denial_slots: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            denial_slots: DEFAULT_SLOTS,
        }
    }
}

impl From<&AuthSettings> for GatewayOptions {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            acquire_timeout: settings.acquire_timeout(),
            denial_slots: settings.denial_cache_slots,
        }
    }
}

pub struct AuthGateway {
    store: Arc<dyn CredentialStore>,
    codec: CredentialCodec,
    limiter: ResourceLimiter,
    coalescer: AuthCoalescer,
    denials: DenialCache,
    nonce: RotatingNonce,
    acquire_timeout: Duration,
}

impl AuthGateway {
    /// Fails when the limiter could never admit one run of `codec`.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: CredentialCodec,
        limiter: ResourceLimiter,
        options: GatewayOptions,
    ) -> Result<Self, AuthError> {
        let expected = codec.expected_cost();
        if expected > limiter.ceiling() {
            return Err(AuthError::Capacity {
                requested: expected,
                ceiling: limiter.ceiling(),
            });
        }
        Ok(Self {
            store,
            codec,
            limiter,
            coalescer: AuthCoalescer::new(),
            denials: DenialCache::new(options.denial_slots),
            nonce: RotatingNonce::generate()?,
            acquire_timeout: options.acquire_timeout,
        })
    }

    /// Check raw `user:password` bytes for `host`.
    ///
    /// Bad credentials, unknown users and hosts, and a tainted transport all
    /// yield `Ok(false)`. Errors mean the check itself could not be made.
    /// Zeroing `credentials` afterwards is the caller's job.
    pub async fn authorized(
        &self,
        host: &str,
        credentials: &[u8],
        taint: bool,
    ) -> Result<bool, AuthError> {
        let Some((user, password)) = split_credentials(credentials) else {
            counter!(AUTH_DENIED).increment(1);
            return Ok(false);
        };

        let fingerprint = self.nonce.fingerprint(host, user, password);
        if self.denials.is_denied(&fingerprint) {
            counter!(AUTH_DENIAL_CACHE_HIT).increment(1);
            counter!(AUTH_DENIED).increment(1);
            return Ok(false);
        }

        let verdict = self
            .coalescer
            .authorize(fingerprint, taint, || {
                verify_stored(
                    Arc::clone(&self.store),
                    self.limiter.clone(),
                    self.acquire_timeout,
                    host.to_string(),
                    user.to_string(),
                    Zeroizing::new(password.to_vec()),
                )
            })
            .await?;

        if !verdict.verified {
            self.denials.deny(&fingerprint);
        } else if verdict.tainted {
            let removed = self.store.invalidate(host, user).await;
            counter!(AUTH_TAINTED).increment(1);
            counter!(AUTH_INVALIDATED).increment(removed as u64);
            warn!(host, user, removed, "credential seen over insecure transport, invalidated");
        }

        if verdict.granted() {
            counter!(AUTH_GRANTED).increment(1);
        } else {
            counter!(AUTH_DENIED).increment(1);
        }
        Ok(verdict.granted())
    }

    /// Hash `password` with the secret of `host` and store it for `user`.
    pub async fn provision(
        &self,
        host: &str,
        user: &str,
        password: &[u8],
    ) -> Result<CredentialHash, AuthError> {
        let secret = self
            .store
            .secret(host)
            .await
            .ok_or_else(|| AuthError::UnknownHost(host.to_string()))?;
        let mut reservation = self
            .limiter
            .acquire_timeout(self.codec.expected_cost(), self.acquire_timeout)
            .await?;

        let codec = self.codec;
        let password = Zeroizing::new(password.to_vec());
        let hash = tokio::task::spawn_blocking(move || codec.generate(&password, &secret))
            .await
            .map_err(|_| AuthError::Abandoned)??;
        reservation.release();

        self.install(host, user, hash.clone()).await?;
        info!(host, user, "credential provisioned");
        Ok(hash)
    }

    /// Store an already hashed credential for `user`.
    ///
    /// Recorded denials and settled verdicts may refer to the replaced
    /// credential, so both caches are emptied once the store accepts it.
    pub async fn install(
        &self,
        host: &str,
        user: &str,
        hash: CredentialHash,
    ) -> Result<(), AuthError> {
        self.store.store(host, user, hash).await?;
        self.denials.clear();
        let swept = self.coalescer.sweep();
        debug!(host, user, swept, "verdict caches reset after credential change");
        Ok(())
    }

    /// Replace the fingerprint nonce, which also voids every recorded denial.
    pub fn rotate_nonce(&self) -> Result<(), AuthError> {
        self.nonce.rotate()?;
        self.denials.clear();
        info!(generation = self.nonce.generation(), "fingerprint nonce rotated");
        Ok(())
    }

    /// Clear the coalescing map
    pub fn sweep(&self) -> usize {
        self.coalescer.sweep()
    }

    pub fn limiter(&self) -> &ResourceLimiter {
        &self.limiter
    }

    pub fn coalescer(&self) -> &AuthCoalescer {
        &self.coalescer
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn nonce_generation(&self) -> u64 {
        self.nonce.generation()
    }
}

async fn verify_stored(
    store: Arc<dyn CredentialStore>,
    limiter: ResourceLimiter,
    timeout: Duration,
    host: String,
    user: String,
    password: Zeroizing<Vec<u8>>,
) -> Result<bool, AuthError> {
    let Some(stored) = store.lookup(&host, &user).await else {
        return Ok(false);
    };
    let decoded = stored.hash.decode().inspect_err(|err| {
        error!(%host, %user, error = %err, "stored credential is corrupt");
    })?;

    let mut reservation = limiter
        .acquire_timeout(decoded.params.reservation_cost(), timeout)
        .await?;
    let secret = stored.secret;
    let verified = tokio::task::spawn_blocking(move || decoded.verify(&password, &secret))
        .await
        .map_err(|_| AuthError::Abandoned)??;
    reservation.release();
    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::{MemoryCredentialStore, WILDCARD_HOST};

    const FAST: CredentialCodec = CredentialCodec::with_params(64, 1, 1);

    fn gateway() -> AuthGateway {
        let store = MemoryCredentialStore::new();
        store.add_host(WILDCARD_HOST, b"pepper".to_vec());
        let limiter = ResourceLimiter::new(1024 * 1024, FAST.expected_cost()).unwrap();
        AuthGateway::new(Arc::new(store), FAST, limiter, GatewayOptions::default()).unwrap()
    }

    #[test]
    fn test_construction_checks_limiter_ceiling() {
        let limiter = ResourceLimiter::new(1024, 0).unwrap();
        let result = AuthGateway::new(
            Arc::new(MemoryCredentialStore::new()),
            FAST,
            limiter,
            GatewayOptions::default(),
        );
        assert!(matches!(result, Err(AuthError::Capacity { .. })));
    }

    #[tokio::test]
    async fn test_provision_then_authorize() {
        let gateway = gateway();
        let hash = gateway.provision(WILDCARD_HOST, "alice", b"s3cret").await.unwrap();
        assert!(hash.as_str().starts_with("$argon2id$v=19$m=64,t=1,p=1$"));

        assert!(gateway.authorized("repo", b"alice:s3cret", false).await.unwrap());
        assert!(!gateway.authorized("repo", b"alice:wrong", false).await.unwrap());
        assert!(!gateway.authorized("repo", b"bob:s3cret", false).await.unwrap());
        assert!(!gateway.authorized("repo", b"no-separator", false).await.unwrap());
        assert_eq!(gateway.limiter().allocated(), 0);
    }

    #[tokio::test]
    async fn test_nonce_rotation_clears_denials() {
        let gateway = gateway();
        gateway.provision(WILDCARD_HOST, "alice", b"s3cret").await.unwrap();
        assert!(!gateway.authorized("repo", b"alice:wrong", false).await.unwrap());

        gateway.rotate_nonce().unwrap();
        assert_eq!(gateway.nonce_generation(), 1);
        assert!(gateway.authorized("repo", b"alice:s3cret", false).await.unwrap());
    }
}

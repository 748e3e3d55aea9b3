// ============================
// crates/backend-lib/src/auth/store.rs
// ============================
//! Credential storage seam.
//!
//! Hosts own a secret and a table of users. A host with no entry of its own
//! is served by the wildcard host's table and secret.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use zeroize::Zeroizing;

use super::codec::CredentialHash;
use crate::config::HostSettings;
use crate::error::{AppError, AuthError};

/// Name of the host consulted when a request's host is not configured
pub const WILDCARD_HOST: &str = "*";

/// A stored hash together with the secret it must be verified with
#[derive(Clone)]
pub struct StoredCredential {
    pub hash: CredentialHash,
    pub secret: Arc<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredential")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolve the credential of `user` on `host`, falling back to the
    /// wildcard host when `host` is not configured.
    async fn lookup(&self, host: &str, user: &str) -> Option<StoredCredential>;

    /// Set the credential of `user` on `host`, which must be configured.
    async fn store(&self, host: &str, user: &str, hash: CredentialHash) -> Result<(), AuthError>;

    /// Drop `user` from `host` and from the wildcard host, returning how
    /// many entries were removed.
    async fn invalidate(&self, host: &str, user: &str) -> usize;

    /// Secret used for new hashes on `host`, with the same fallback as `lookup`
    async fn secret(&self, host: &str) -> Option<Arc<Zeroizing<Vec<u8>>>>;
}

struct HostEntry {
    secret: Arc<Zeroizing<Vec<u8>>>,
    users: DashMap<String, CredentialHash>,
}

/// In-memory store seeded from configuration
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    hosts: Arc<DashMap<String, Arc<HostEntry>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `host` with `secret` and no users, replacing any previous entry.
    pub fn add_host(&self, host: impl Into<String>, secret: Vec<u8>) {
        self.hosts.insert(
            host.into(),
            Arc::new(HostEntry {
                secret: Arc::new(Zeroizing::new(secret)),
                users: DashMap::new(),
            }),
        );
    }

    pub fn from_settings(hosts: &BTreeMap<String, HostSettings>) -> Result<Self, AppError> {
        let store = Self::new();
        for (name, settings) in hosts {
            let secret = settings.decoded_secret()?;
            let users = settings
                .users
                .iter()
                .map(|(user, hash)| (user.clone(), hash.clone()))
                .collect();
            store.hosts.insert(
                name.clone(),
                Arc::new(HostEntry {
                    secret: Arc::new(secret),
                    users,
                }),
            );
        }
        Ok(store)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    fn resolve(&self, host: &str) -> Option<Arc<HostEntry>> {
        self.hosts
            .get(host)
            .or_else(|| self.hosts.get(WILDCARD_HOST))
            .map(|entry| Arc::clone(entry.value()))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn lookup(&self, host: &str, user: &str) -> Option<StoredCredential> {
        let entry = self.resolve(host)?;
        let hash = entry.users.get(user)?.value().clone();
        Some(StoredCredential {
            hash,
            secret: Arc::clone(&entry.secret),
        })
    }

    async fn store(&self, host: &str, user: &str, hash: CredentialHash) -> Result<(), AuthError> {
        let entry = self
            .hosts
            .get(host)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AuthError::UnknownHost(host.to_string()))?;
        entry.users.insert(user.to_string(), hash);
        Ok(())
    }

    async fn invalidate(&self, host: &str, user: &str) -> usize {
        let mut removed = 0;
        if let Some(entry) = self.hosts.get(host).map(|entry| Arc::clone(entry.value())) {
            removed += usize::from(entry.users.remove(user).is_some());
        }
        if host != WILDCARD_HOST {
            if let Some(entry) = self
                .hosts
                .get(WILDCARD_HOST)
                .map(|entry| Arc::clone(entry.value()))
            {
                removed += usize::from(entry.users.remove(user).is_some());
            }
        }
        removed
    }

    async fn secret(&self, host: &str) -> Option<Arc<Zeroizing<Vec<u8>>>> {
        self.resolve(host).map(|entry| Arc::clone(&entry.secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "$argon2id$v=19$m=64,t=1,p=1$c2FsdHNhbHQ$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    fn hash() -> CredentialHash {
        HASH.parse().unwrap()
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_wildcard_host() {
        let store = MemoryCredentialStore::new();
        store.add_host(WILDCARD_HOST, b"wild".to_vec());
        store.add_host("repo", b"repo".to_vec());
        store.store(WILDCARD_HOST, "alice", hash()).await.unwrap();

        let found = store.lookup("elsewhere", "alice").await.unwrap();
        assert_eq!(found.hash, hash());
        assert_eq!(&found.secret[..], b"wild");

        // A configured host does not inherit wildcard users.
        assert!(store.lookup("repo", "alice").await.is_none());
        assert_eq!(&store.secret("repo").await.unwrap()[..], b"repo");
        assert_eq!(&store.secret("elsewhere").await.unwrap()[..], b"wild");
    }

    #[tokio::test]
    async fn test_unknown_host_without_wildcard() {
        let store = MemoryCredentialStore::new();
        store.add_host("repo", b"repo".to_vec());
        assert!(store.lookup("other", "alice").await.is_none());
        assert!(store.secret("other").await.is_none());

        let err = store.store("other", "alice", hash()).await.unwrap_err();
        assert_eq!(err, AuthError::UnknownHost("other".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_clears_host_and_wildcard() {
        let store = MemoryCredentialStore::new();
        store.add_host(WILDCARD_HOST, b"wild".to_vec());
        store.add_host("repo", b"repo".to_vec());
        store.store(WILDCARD_HOST, "alice", hash()).await.unwrap();
        store.store("repo", "alice", hash()).await.unwrap();

        assert_eq!(store.invalidate("repo", "alice").await, 2);
        assert_eq!(store.invalidate("repo", "alice").await, 0);
        assert!(store.lookup("repo", "alice").await.is_none());
        assert!(store.lookup("elsewhere", "alice").await.is_none());
    }

    #[tokio::test]
    async fn test_from_settings() {
        let mut users = BTreeMap::new();
        users.insert("alice".to_string(), hash());
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "repo".to_string(),
            HostSettings {
                secret: "c2VjcmV0".to_string(),
                users,
            },
        );

        let store = MemoryCredentialStore::from_settings(&hosts).unwrap();
        assert_eq!(store.host_count(), 1);
        let found = store.lookup("repo", "alice").await.unwrap();
        assert_eq!(&found.secret[..], b"secret");
    }
}

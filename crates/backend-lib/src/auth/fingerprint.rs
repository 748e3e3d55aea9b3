// ============================
// crates/backend-lib/src/auth/fingerprint.rs
// ============================
//! Short-lived coalescing keys.
//!
//! A [`Fingerprint`] is a SHA-256 digest over the host, user, password and
//! the current server nonce. Rotating the nonce makes every earlier
//! fingerprint unreachable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::secret::fill_random;
use crate::error::AuthError;

/// Nonce size in bytes
pub const NONCE_LEN: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest the request material. Each part is length-prefixed so that
    /// shifting bytes between fields yields a different key.
    pub fn derive(host: &str, user: &str, password: &[u8], nonce: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        for part in [host.as_bytes(), user.as_bytes(), password, nonce] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Two independent 64-bit words taken from the digest: (tag, index).
    pub(crate) fn words(&self) -> (u64, u64) {
        let mut tag = [0u8; 8];
        let mut index = [0u8; 8];
        tag.copy_from_slice(&self.0[..8]);
        index.copy_from_slice(&self.0[8..16]);
        (u64::from_le_bytes(tag), u64::from_le_bytes(index))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fingerprint(..)")
    }
}

/// Server-side nonce mixed into every fingerprint
pub struct RotatingNonce {
    bytes: RwLock<Zeroizing<[u8; NONCE_LEN]>>,
    generation: AtomicU64,
}

impl RotatingNonce {
    pub fn generate() -> Result<Self, AuthError> {
        let mut bytes = Zeroizing::new([0u8; NONCE_LEN]);
        fill_random(&mut bytes[..])?;
        Ok(Self {
            bytes: RwLock::new(bytes),
            generation: AtomicU64::new(0),
        })
    }

    /// Replace the nonce with fresh random bytes.
    pub fn rotate(&self) -> Result<(), AuthError> {
        let mut fresh = Zeroizing::new([0u8; NONCE_LEN]);
        fill_random(&mut fresh[..])?;
        *self.bytes.write() = fresh;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Number of completed rotations
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn fingerprint(&self, host: &str, user: &str, password: &[u8]) -> Fingerprint {
        let nonce = self.bytes.read();
        Fingerprint::derive(host, user, password, &nonce[..])
    }
}

impl fmt::Debug for RotatingNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingNonce")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::derive("repo", "alice", b"pw", b"nonce");
        let b = Fingerprint::derive("repo", "alice", b"pw", b"nonce");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        let joined = Fingerprint::derive("repo", "alice", b"pw", b"nonce");
        let shifted = Fingerprint::derive("rep", "oalice", b"pw", b"nonce");
        let moved = Fingerprint::derive("repo", "alic", b"epw", b"nonce");
        assert_ne!(joined, shifted);
        assert_ne!(joined, moved);
        assert_ne!(joined, Fingerprint::derive("repo", "alice", b"pw", b"other"));
    }

    #[test]
    fn test_rotation_changes_fingerprints() {
        let nonce = RotatingNonce::generate().unwrap();
        let before = nonce.fingerprint("repo", "alice", b"pw");
        assert_eq!(before, nonce.fingerprint("repo", "alice", b"pw"));

        nonce.rotate().unwrap();
        assert_eq!(nonce.generation(), 1);
        assert_ne!(before, nonce.fingerprint("repo", "alice", b"pw"));
    }

    #[test]
    fn test_debug_hides_digest() {
        let fp = Fingerprint::derive("repo", "alice", b"pw", b"nonce");
        assert_eq!(format!("{fp:?}"), "Fingerprint(..)");
    }
}

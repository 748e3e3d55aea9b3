// ============================
// crates/backend-lib/src/auth/denial.rs
// ============================
//! Direct-mapped table of recently rejected fingerprints.
//!
//! Each slot holds a 64-bit tag. A new denial simply overwrites whatever
//! occupied its slot; there is no other eviction. A false positive needs a
//! full tag collision within one slot.

use std::sync::atomic::{AtomicU64, Ordering};

use super::fingerprint::Fingerprint;

pub const DEFAULT_SLOTS: usize = 64;

const EMPTY: u64 = 0;

#[derive(Debug)]
pub struct DenialCache {
    slots: Box<[AtomicU64]>,
    mask: u64,
}

impl DenialCache {
    /// Table with `slots` entries, rounded up to a power of two
    pub fn new(slots: usize) -> Self {
        let len = slots.max(1).next_power_of_two();
        Self {
            slots: (0..len).map(|_| AtomicU64::new(EMPTY)).collect(),
            mask: len as u64 - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn deny(&self, fingerprint: &Fingerprint) {
        let (tag, slot) = self.locate(fingerprint);
        slot.store(tag, Ordering::Release);
    }

    pub fn is_denied(&self, fingerprint: &Fingerprint) -> bool {
        let (tag, slot) = self.locate(fingerprint);
        slot.load(Ordering::Acquire) == tag
    }

    /// Forget every denial
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.store(EMPTY, Ordering::Release);
        }
    }

    fn locate(&self, fingerprint: &Fingerprint) -> (u64, &AtomicU64) {
        let (tag, index) = fingerprint.words();
        // Low bit set keeps a real tag distinct from an empty slot.
        (tag | 1, &self.slots[(index & self.mask) as usize])
    }
}

impl Default for DenialCache {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(password: &str) -> Fingerprint {
        Fingerprint::derive("repo", "alice", password.as_bytes(), b"nonce")
    }

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(DenialCache::new(0).capacity(), 1);
        assert_eq!(DenialCache::new(48).capacity(), 64);
        assert_eq!(DenialCache::default().capacity(), DEFAULT_SLOTS);
    }

    #[test]
    fn test_deny_and_clear() {
        let cache = DenialCache::default();
        let bad = fp("wrong");
        assert!(!cache.is_denied(&bad));

        cache.deny(&bad);
        assert!(cache.is_denied(&bad));
        assert!(!cache.is_denied(&fp("right")));

        cache.clear();
        assert!(!cache.is_denied(&bad));
    }

    #[test]
    fn test_single_slot_overwrites() {
        let cache = DenialCache::new(1);
        let first = fp("one");
        let second = fp("two");
        cache.deny(&first);
        cache.deny(&second);
        assert!(cache.is_denied(&second));
        assert!(!cache.is_denied(&first));
    }
}

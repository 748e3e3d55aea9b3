// ============================
// crates/backend-lib/src/auth/coalesce.rs
// ============================
//! Singleflight over credential fingerprints.
//!
//! The first caller for a fingerprint becomes the owner and starts the
//! verification; every concurrent caller with the same fingerprint waits for
//! that one result. Completed entries linger until the next sweep so that
//! near-simultaneous duplicates still share the work.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use metrics::counter;
use tokio::sync::Notify;
use tracing::{debug, error};

use super::fingerprint::Fingerprint;
use crate::error::AuthError;
use crate::metrics::AUTH_COALESCED;

/// Outcome delivered to one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Result of the underlying password check
    pub verified: bool,
    /// Some participant reported an insecure transport
    pub tainted: bool,
    /// This participant ran the verification
    pub owner: bool,
}

impl Verdict {
    pub fn granted(&self) -> bool {
        self.verified && !self.tainted
    }
}

/// State shared by every caller racing on one fingerprint
struct PendingVerification {
    outcome: OnceLock<Result<bool, AuthError>>,
    tainted: AtomicBool,
    done: Notify,
}

impl PendingVerification {
    fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            tainted: AtomicBool::new(false),
            done: Notify::new(),
        }
    }

    fn taint(&self) {
        self.tainted.store(true, Ordering::Release);
    }

    fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::Acquire)
    }

    /// Publish the outcome and wake every waiter.
    ///
    /// # Panics
    /// When the verification was already completed. That is a coalescer bug.
    fn complete(&self, outcome: Result<bool, AuthError>) {
        if self.outcome.set(outcome).is_err() {
            error!("pending verification completed twice");
            panic!("illegal state: pending verification completed twice");
        }
        self.done.notify_waiters();
    }

    async fn wait(&self) -> Result<bool, AuthError> {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }
}

/// Fingerprint-keyed coalescing map
#[derive(Clone, Default)]
pub struct AuthCoalescer {
    pending: Arc<DashMap<Fingerprint, Arc<PendingVerification>>>,
}

impl AuthCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` once for all concurrent callers sharing `fingerprint`.
    ///
    /// Only the owner's closure is invoked; followers' closures are dropped.
    /// The computation runs on its own task, so cancelling any caller,
    /// owner included, leaves the others waiting on a result that will
    /// still arrive. An error from the computation is delivered to every
    /// participant and the entry is dropped so later callers retry.
    ///
    /// Each participant reads the taint flag when its result is delivered.
    /// A participant that joins after the result was published still taints
    /// the entry for everyone after it, but verdicts already handed out are
    /// not revised.
    pub async fn authorize<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        taint: bool,
        compute: F,
    ) -> Result<Verdict, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, AuthError>> + Send + 'static,
    {
        // Taint is recorded while the shard lock is held, so it is visible to
        // every participant that joins afterwards.
        let (pending, owner) = match self.pending.entry(fingerprint) {
            Entry::Occupied(entry) => {
                let pending = Arc::clone(entry.get());
                if taint {
                    pending.taint();
                }
                (pending, false)
            },
            Entry::Vacant(entry) => {
                let pending = Arc::new(PendingVerification::new());
                if taint {
                    pending.taint();
                }
                entry.insert(Arc::clone(&pending));
                (pending, true)
            },
        };

        if owner {
            let work = compute();
            let map = Arc::clone(&self.pending);
            let shared = Arc::clone(&pending);
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(work)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        error!("verification panicked before publishing a result");
                        Err(AuthError::Abandoned)
                    });
                // Unlink a failed entry before publishing so no caller
                // released by this failure can rejoin it.
                if outcome.is_err() {
                    map.remove_if(&fingerprint, |_, current| Arc::ptr_eq(current, &shared));
                }
                shared.complete(outcome);
            });
        } else {
            counter!(AUTH_COALESCED).increment(1);
            debug!("joined in-flight verification");
        }

        let verified = pending.wait().await?;
        Ok(Verdict {
            verified,
            tainted: pending.is_tainted(),
            owner,
        })
    }

    /// Drop every entry, returning how many were held.
    ///
    /// Callers already waiting keep their own handle and still get a result.
    pub fn sweep(&self) -> usize {
        let swept = self.pending.len();
        self.pending.clear();
        swept
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

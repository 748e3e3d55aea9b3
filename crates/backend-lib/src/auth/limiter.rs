// ============================
// crates/backend-lib/src/auth/limiter.rs
// ============================
//! Memory-budget admission control for Argon2 runs.
//!
//! A counting semaphore over bytes. Callers declare what a computation will
//! hold, and the sum of all granted reservations never exceeds the ceiling.
//! Waiters that cannot fit are parked on a wait list and admitted by later
//! releases in ticket order, skipping any that still do not fit.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::gauge;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::AuthError;
use crate::metrics::{LIMITER_ALLOCATED, LIMITER_WAITING};

// Hold lifecycle. WAITING -> CLAIMED is taken by one scanner at a time; the
// scanner then either grants or puts the hold back. WAITING -> CANCELLED is
// taken by a waiter that gave up. Whoever wins removes the wait-list entry.
const WAITING: u8 = 0;
const CLAIMED: u8 = 1;
const GRANTED: u8 = 2;
const CANCELLED: u8 = 3;

/// Memory admission gate shared by every verification
#[derive(Clone)]
pub struct ResourceLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    /// Sum of granted, unreleased reservations
    allocated: AtomicU64,
    ceiling: u64,
    /// Parked waiters keyed by arrival ticket
    holds: DashMap<u64, Arc<Hold>>,
    tickets: AtomicU64,
}

struct Hold {
    amount: u64,
    state: AtomicU8,
    notify: Notify,
}

impl ResourceLimiter {
    /// Create a limiter admitting at most `limit` bytes at once.
    ///
    /// Fails when `expected`, the largest reservation the caller plans to
    /// make, could never be admitted.
    pub fn new(limit: u64, expected: u64) -> Result<Self, AuthError> {
        if limit < expected {
            return Err(AuthError::Capacity {
                requested: expected,
                ceiling: limit,
            });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                allocated: AtomicU64::new(0),
                ceiling: limit,
                holds: DashMap::new(),
                tickets: AtomicU64::new(0),
            }),
        })
    }

    /// Create a limiter from a total budget minus a fixed reserve
    pub fn with_budget(total: u64, reserve: u64, expected: u64) -> Result<Self, AuthError> {
        Self::new(total.saturating_sub(reserve), expected)
    }

    pub fn ceiling(&self) -> u64 {
        self.inner.ceiling
    }

    /// Bytes currently granted
    pub fn allocated(&self) -> u64 {
        self.inner.allocated.load(Ordering::Acquire)
    }

    /// Number of parked waiters
    pub fn waiting(&self) -> usize {
        self.inner.holds.len()
    }

    /// Reserve `amount` bytes, waiting for releases if the budget is spent.
    ///
    /// A request above the ceiling fails at once with `Capacity`. Dropping
    /// the returned future cancels the wait without leaking budget.
    pub async fn acquire(&self, amount: u64) -> Result<Reservation, AuthError> {
        if amount > self.inner.ceiling {
            return Err(AuthError::Capacity {
                requested: amount,
                ceiling: self.inner.ceiling,
            });
        }
        if !self.inner.try_lease(amount) {
            self.inner.hold(amount).await;
        }
        self.inner.publish();
        Ok(Reservation {
            limiter: Arc::clone(&self.inner),
            held: Some(amount),
        })
    }

    /// Like [`acquire`](Self::acquire), failing with `Interrupted` after `timeout`.
    pub async fn acquire_timeout(
        &self,
        amount: u64,
        timeout: Duration,
    ) -> Result<Reservation, AuthError> {
        tokio::time::timeout(timeout, self.acquire(amount))
            .await
            .map_err(|_| AuthError::Interrupted)?
    }
}

impl fmt::Debug for ResourceLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLimiter")
            .field("ceiling", &self.ceiling())
            .field("allocated", &self.allocated())
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl Inner {
    /// Add `amount` to the running total unless that would pass the ceiling.
    fn try_lease(&self, amount: u64) -> bool {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(amount)
                    .filter(|total| *total <= self.ceiling)
            })
            .is_ok()
    }

    /// Park until a scan grants `amount`.
    async fn hold(&self, amount: u64) {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let hold = Arc::new(Hold {
            amount,
            state: AtomicU8::new(WAITING),
            notify: Notify::new(),
        });
        self.holds.insert(ticket, Arc::clone(&hold));
        let mut guard = HoldGuard {
            inner: self,
            ticket,
            hold: Arc::clone(&hold),
            settled: false,
        };
        debug!(amount, waiting = self.holds.len(), "waiting for memory budget");
        self.publish();

        // A release that finished before the insert above had nobody to wake.
        self.wake();

        while hold.state.load(Ordering::Acquire) != GRANTED {
            hold.notify.notified().await;
        }
        guard.settled = true;
    }

    /// Return `amount` to the budget and admit whoever now fits.
    fn give_back(&self, amount: u64) {
        self.allocated.fetch_sub(amount, Ordering::AcqRel);
        self.wake();
        self.publish();
    }

    /// Scan the wait list oldest first, granting every hold that fits.
    fn wake(&self) {
        loop {
            if self.holds.is_empty() {
                return;
            }
            let mut tickets: Vec<u64> = self.holds.iter().map(|entry| *entry.key()).collect();
            tickets.sort_unstable();

            let mut contended = false;
            for ticket in tickets {
                let Some(hold) = self.holds.get(&ticket).map(|entry| Arc::clone(entry.value()))
                else {
                    continue;
                };
                if let Err(state) = hold.state.compare_exchange(
                    WAITING,
                    CLAIMED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    contended |= state == CLAIMED;
                    continue;
                }
                if self.try_lease(hold.amount) {
                    self.holds.remove(&ticket);
                    hold.state.store(GRANTED, Ordering::Release);
                    hold.notify.notify_one();
                } else {
                    hold.state.store(WAITING, Ordering::Release);
                }
            }

            // Another scanner had a hold claimed and may have judged it
            // against a total this release has since lowered.
            if !contended {
                return;
            }
            std::thread::yield_now();
        }
    }

    fn publish(&self) {
        gauge!(LIMITER_ALLOCATED).set(self.allocated.load(Ordering::Relaxed) as f64);
        gauge!(LIMITER_WAITING).set(self.holds.len() as f64);
    }
}

/// Settles a parked hold when its wait is abandoned.
struct HoldGuard<'a> {
    inner: &'a Inner,
    ticket: u64,
    hold: Arc<Hold>,
    settled: bool,
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        loop {
            match self.hold.state.compare_exchange(
                WAITING,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.inner.holds.remove(&self.ticket);
                    self.inner.publish();
                    return;
                },
                Err(CLAIMED) => std::hint::spin_loop(),
                Err(GRANTED) => {
                    // Granted between the last poll and the cancellation.
                    self.inner.give_back(self.hold.amount);
                    return;
                },
                Err(_) => return,
            }
        }
    }
}

/// Budget held by one caller, returned on [`release`](Self::release) or drop
pub struct Reservation {
    limiter: Arc<Inner>,
    held: Option<u64>,
}

impl Reservation {
    /// Bytes still held by this reservation
    pub fn amount(&self) -> u64 {
        self.held.unwrap_or(0)
    }

    /// Return the reservation to the budget. Calling it again is a no-op.
    pub fn release(&mut self) {
        if let Some(amount) = self.held.take() {
            self.limiter.give_back(amount);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation").field("held", &self.held).finish()
    }
}

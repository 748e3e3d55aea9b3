// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const AUTH_GRANTED: &str = "auth.granted";
pub const AUTH_DENIED: &str = "auth.denied";
pub const AUTH_COALESCED: &str = "auth.coalesced";
pub const AUTH_DENIAL_CACHE_HIT: &str = "auth.denial_cache_hit";
pub const AUTH_TAINTED: &str = "auth.tainted";
pub const AUTH_INVALIDATED: &str = "auth.invalidated";
pub const LIMITER_ALLOCATED: &str = "limiter.allocated_bytes";
pub const LIMITER_WAITING: &str = "limiter.waiting";

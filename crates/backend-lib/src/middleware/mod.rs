// crates/backend-lib/src/middleware/mod.rs

//! Middleware for the `repogate` HTTP surface.

pub mod auth;

pub use auth::require_auth;

#[cfg(test)]
mod tests;

// ============================
// repogate-lib/src/lib.rs
// ============================
//! Core functionality of the `repogate` authentication front.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod router;

use std::sync::Arc;

use crate::auth::{AuthGateway, CredentialCodec, GatewayOptions, MemoryCredentialStore, ResourceLimiter};
use crate::config::Settings;
use crate::error::AppError;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Authentication engine
    pub gateway: Arc<AuthGateway>,
    /// Loaded settings
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Build the production engine from validated settings
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        let codec = CredentialCodec::default();
        let limiter = ResourceLimiter::with_budget(
            settings.auth.memory_budget_bytes,
            settings.auth.memory_reserve_bytes,
            codec.expected_cost(),
        )?;
        let store = MemoryCredentialStore::from_settings(&settings.hosts)?;
        let gateway = AuthGateway::new(
            Arc::new(store),
            codec,
            limiter,
            GatewayOptions::from(&settings.auth),
        )?;
        Ok(Self::with_gateway(Arc::new(gateway), settings))
    }

    /// Wrap an already built gateway
    pub fn with_gateway(gateway: Arc<AuthGateway>, settings: Settings) -> Self {
        Self {
            gateway,
            settings: Arc::new(settings),
        }
    }
}

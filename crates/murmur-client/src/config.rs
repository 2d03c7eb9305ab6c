//! Client configuration.
//!
//! Everything has a sensible default so the client can be constructed
//! with `ClientConfig::default()` and no further tuning.

use std::time::Duration;

use murmur_content::ResolverConfig;
use murmur_ledger::GatewayConfig;
use murmur_shared::constants::{DEFAULT_OVERLAY_TIMEOUT, MAX_THREAD_DEPTH};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ledger read gateway tuning (TTL, timeout, fan-out width).
    pub gateway: GatewayConfig,

    /// Content resolution cache tuning (capacity, fetch timeout).
    pub resolver: ResolverConfig,

    /// How long an optimistic overlay entry survives without a ledger
    /// read confirming it.
    pub overlay_timeout: Duration,

    /// Depth cap for reply subtrees and ancestor chains. Guarantees
    /// termination even if stored parent pointers form a cycle.
    pub max_thread_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            resolver: ResolverConfig::default(),
            overlay_timeout: DEFAULT_OVERLAY_TIMEOUT,
            max_thread_depth: MAX_THREAD_DEPTH,
        }
    }
}

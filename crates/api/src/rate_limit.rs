//! Rate Limiting Middleware using GCRA Algorithm
//!
//! Limits requests per peer IP using tower_governor. Requires the service
//! to be served with `into_make_service_with_connect_info::<SocketAddr>()`.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

/// Governor config with X-RateLimit-* headers enabled
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether the limiter layer is installed at all
    pub enabled: bool,
    /// Seconds between quota replenishments
    pub per_second: u64,
    /// Burst size (max requests that can be made immediately)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_second: 2,
            burst_size: 5,
        }
    }
}

/// Build the governor config. Fails when the period or burst size is zero.
pub fn create_governor_config(
    config: &RateLimitConfig,
) -> Result<Arc<DefaultGovernorConfig>, anyhow::Error> {
    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "invalid rate limit: per_second={} burst_size={}",
                config.per_second,
                config.burst_size
            )
        })
}

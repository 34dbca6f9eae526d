//! Router engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the router cache engine.
///
/// The staleness windows govern how long prefetched route data may be served
/// without refetching; the concurrency limit bounds simultaneous outbound
/// prefetch fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Origin of the application. Absolute URLs with a different origin are
    /// handled as full-page navigations.
    pub origin: String,
    /// Window in which prefetched dynamic data is served without refetching.
    pub dynamic_stale: Duration,
    /// Window in which static prefetch data (loading boundaries, full static
    /// prerenders) remains usable.
    pub static_stale: Duration,
    /// Maximum simultaneous outbound prefetch fetches.
    pub prefetch_concurrency: usize,
    /// Whether navigations use the partial prerendering task graph.
    pub ppr_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            dynamic_stale: Duration::from_secs(30),
            static_stale: Duration::from_secs(300),
            prefetch_concurrency: 5,
            ppr_enabled: false,
        }
    }
}

impl RouterConfig {
    /// Create a configuration for the given application origin.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Default::default()
        }
    }

    /// Set the dynamic staleness window.
    pub fn with_dynamic_stale(mut self, window: Duration) -> Self {
        self.dynamic_stale = window;
        self
    }

    /// Set the static staleness window.
    pub fn with_static_stale(mut self, window: Duration) -> Self {
        self.static_stale = window;
        self
    }

    /// Set the prefetch concurrency limit.
    pub fn with_prefetch_concurrency(mut self, limit: usize) -> Self {
        self.prefetch_concurrency = limit;
        self
    }

    /// Enable or disable partial prerendering navigations.
    pub fn with_ppr(mut self, enabled: bool) -> Self {
        self.ppr_enabled = enabled;
        self
    }

    /// The dynamic window in milliseconds.
    pub fn dynamic_stale_ms(&self) -> u64 {
        self.dynamic_stale.as_millis() as u64
    }

    /// The static window in milliseconds.
    pub fn static_stale_ms(&self) -> u64 {
        self.static_stale.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.dynamic_stale_ms(), 30_000);
        assert_eq!(config.static_stale_ms(), 300_000);
        assert_eq!(config.prefetch_concurrency, 5);
        assert!(!config.ppr_enabled);
    }

    #[test]
    fn test_builder() {
        let config = RouterConfig::new("https://shop.example")
            .with_dynamic_stale(Duration::from_secs(10))
            .with_prefetch_concurrency(2)
            .with_ppr(true);
        assert_eq!(config.origin, "https://shop.example");
        assert_eq!(config.dynamic_stale_ms(), 10_000);
        assert_eq!(config.prefetch_concurrency, 2);
        assert!(config.ppr_enabled);
    }
}

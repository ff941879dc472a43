//! Observability hooks and TTL policies for cached views.
//!
//! - **Metrics (`CacheMetrics`)**: hits, misses, writes, invalidations, errors
//! - **TTL Policies (`TtlPolicy`)**: how long an own-fields entry may live
//!
//! # Metrics
//!
//! ```ignore
//! use view_kit::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _key: &str, _duration: Duration) {
//!         // counter!("view_cache_hits").inc();
//!     }
//! }
//!
//! // let config = ViewConfig::new(backend).with_metrics(Arc::new(PrometheusMetrics));
//! ```
//!
//! The default, [`LogMetrics`], writes every event to the `log` facade at
//! debug level.
//!
//! # TTL Policies
//!
//! Invalidation keeps entries correct, so the default is to let entries live
//! until the owning entity is saved. A TTL bounds memory for rarely read
//! entities:
//!
//! ```
//! use view_kit::observability::TtlPolicy;
//! use std::time::Duration;
//!
//! let _policy = TtlPolicy::Fixed(Duration::from_secs(3600));
//!
//! let _policy = TtlPolicy::PerType(|entity_type| match entity_type {
//!     "artwork" => Duration::from_secs(86_400),
//!     _ => Duration::from_secs(600),
//! });
//! ```

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a cache miss (the view was computed).
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a cache set operation.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record the invalidation of one entity's entries.
    fn record_invalidate(&self, entity_type: &str, entity_id: &str, keys: usize) {
        debug!(
            "Cache INVALIDATE: {}/{} ({} keys)",
            entity_type, entity_id, keys
        );
    }

    /// Record an error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Metrics implementation that only logs.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}

/// Metrics implementation that drops everything.
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_invalidate(&self, _entity_type: &str, _entity_id: &str, _keys: usize) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// TTL (Time-to-Live) policy for cached views.
#[derive(Clone, Debug, Default)]
pub enum TtlPolicy {
    /// Use backend's default TTL
    #[default]
    Default,

    /// Fixed duration for all entries
    Fixed(Duration),

    /// Custom per-entity-type policy
    PerType(fn(&str) -> Duration),
}

impl TtlPolicy {
    /// Get TTL for an entity type.
    pub fn get_ttl(&self, entity_type: &str) -> Option<Duration> {
        match self {
            TtlPolicy::Default => None,
            TtlPolicy::Fixed(d) => Some(*d),
            TtlPolicy::PerType(f) => Some(f(entity_type)),
        }
    }
}

//! Process-wide engine configuration.
//!
//! Built once at startup and handed to [`ViewEngine::new`](crate::ViewEngine::new).
//! Nothing here changes after views start being served.
//!
//! ```ignore
//! use view_kit::{ViewConfig, backend::InMemoryBackend};
//! use view_kit::observability::TtlPolicy;
//! use std::time::Duration;
//!
//! let config = ViewConfig::new(InMemoryBackend::new())
//!     .with_transform(|_name, spec, value| {
//!         if spec.flag("markdown") && value.is_null() { json!("") } else { value }
//!     })
//!     .with_ttl_policy(TtlPolicy::Fixed(Duration::from_secs(3600)))
//!     .with_env_overrides();
//! ```

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::observability::{CacheMetrics, LogMetrics, TtlPolicy};
use crate::schema::FieldSpec;
use crate::tier::TierSet;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable that disables caching when set to `1` or `true`.
pub const DISABLE_CACHING_ENV: &str = "VIEWKIT_DISABLE_CACHING";

/// Default bound on reference nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Transform applied to every computed value before it is cached.
///
/// Receives `(field_name, field_spec, raw_value)`.
pub type TransformFn = Arc<dyn Fn(&str, &FieldSpec, Value) -> Value + Send + Sync>;

/// Engine configuration.
pub struct ViewConfig<B: CacheBackend> {
    pub(crate) backend: B,
    pub(crate) tiers: Arc<TierSet>,
    pub(crate) disable_caching: bool,
    pub(crate) transforms: Vec<TransformFn>,
    pub(crate) ttl_policy: TtlPolicy,
    pub(crate) metrics: Arc<dyn CacheMetrics>,
    pub(crate) max_depth: usize,
    pub(crate) store_timeout: Option<Duration>,
}

impl<B: CacheBackend> ViewConfig<B> {
    /// Configuration with default tiers (`short < public < all`), caching
    /// enabled, no transforms.
    pub fn new(backend: B) -> Self {
        ViewConfig {
            backend,
            tiers: Arc::new(TierSet::default()),
            disable_caching: false,
            transforms: Vec::new(),
            ttl_policy: TtlPolicy::default(),
            metrics: Arc::new(LogMetrics),
            max_depth: DEFAULT_MAX_DEPTH,
            store_timeout: None,
        }
    }

    /// Replace the tier set.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the names are empty or repeat.
    pub fn with_tiers<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tiers = Arc::new(TierSet::new(names)?);
        Ok(self)
    }

    /// Always compute views; never read or write the cache.
    pub fn with_disable_caching(mut self, disable: bool) -> Self {
        self.disable_caching = disable;
        self
    }

    /// Append a transform. Transforms run in the order they were added.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str, &FieldSpec, Value) -> Value + Send + Sync + 'static,
    {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Set custom TTL policy.
    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Bound reference nesting. Exceeding it fails with `Error::RecursionLimit`.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Fail store calls that take longer than `timeout` with `Error::Timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Apply overrides from the environment.
    ///
    /// Reads [`DISABLE_CACHING_ENV`]; unset or unparsable values leave the
    /// current setting alone.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(disable) = std::env::var(DISABLE_CACHING_ENV)
            .ok()
            .and_then(|v| parse_flag(&v))
        {
            info!("{} = {}", DISABLE_CACHING_ENV, disable);
            self.disable_caching = disable;
        }
        self
    }

    pub fn tiers(&self) -> &Arc<TierSet> {
        &self.tiers
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn caching_disabled(&self) -> bool {
        self.disable_caching
    }

    /// Run every transform over a raw value, in order.
    pub fn transform(&self, field: &FieldSpec, value: Value) -> Value {
        self.transforms
            .iter()
            .fold(value, |value, t| t(&field.name, field, value))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

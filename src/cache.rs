//! Get-or-compute layer over a [`CacheBackend`].
//!
//! Only *own-fields* views pass through here. Composed views (own fields plus
//! resolved references) are never cached, so invalidating one entity is enough
//! to refresh every view that embeds it.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::key::CacheKey;
use crate::observability::{CacheMetrics, TtlPolicy};
use crate::serialization::{decode_view, encode_view, View};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Cached own-fields views, keyed by [`CacheKey`].
///
/// A cached `None` means the entity was hidden or missing when computed. It is
/// a hit like any other and is distinct from "not cached".
pub struct ViewCache<B: CacheBackend> {
    backend: B,
    ttl_policy: TtlPolicy,
    metrics: Arc<dyn CacheMetrics>,
    bypass: bool,
}

impl<B: CacheBackend> ViewCache<B> {
    pub fn new(
        backend: B,
        ttl_policy: TtlPolicy,
        metrics: Arc<dyn CacheMetrics>,
        bypass: bool,
    ) -> Self {
        ViewCache {
            backend,
            ttl_policy,
            metrics,
            bypass,
        }
    }

    /// Return the cached view under `key`, or run `compute` and store its result.
    ///
    /// With caching disabled `compute` always runs and the backend is neither
    /// read nor written. Entries that fail envelope validation are evicted and
    /// recomputed. Two callers racing on the same key may both compute; the
    /// last write wins.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `compute` fails, or the backend fails to read or write.
    pub async fn fetch<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<Option<View>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<View>>>,
    {
        if self.bypass {
            debug!("Caching disabled, computing {}", key);
            return compute().await;
        }

        let timer = Instant::now();
        let rendered = key.to_string();

        match self.read(&rendered).await {
            Ok(Some(view)) => {
                self.metrics.record_hit(&rendered, timer.elapsed());
                return Ok(view);
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.record_error(&rendered, &e.to_string());
                return Err(e);
            }
        }

        let view = compute().await?;
        self.metrics.record_miss(&rendered, timer.elapsed());

        let write_timer = Instant::now();
        let ttl = self.ttl_policy.get_ttl(&key.entity_type);
        let stored = match encode_view(view.as_ref()) {
            Ok(bytes) => self.backend.set(&rendered, bytes, ttl).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            self.metrics.record_error(&rendered, &e.to_string());
            return Err(e);
        }
        self.metrics.record_set(&rendered, write_timer.elapsed());

        Ok(view)
    }

    /// `Ok(None)` is a miss; `Ok(Some(None))` is a cached hidden view.
    async fn read(&self, key: &str) -> Result<Option<Option<View>>> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };

        match decode_view(&bytes) {
            Ok(view) => Ok(Some(view)),
            Err(e) if e.is_corrupt_entry() => {
                warn!("Evicting unreadable cache entry {}: {}", key, e);
                self.backend.delete(key).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

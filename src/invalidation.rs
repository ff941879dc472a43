//! Per-entity cache invalidation.
//!
//! Saving an entity drops its own-fields entries for every tier, top-level or
//! not. Nothing else is touched: views that embed the entity are composed on
//! every read and pick up the change on their own.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::key::CacheKey;
use crate::observability::CacheMetrics;
use crate::store::SaveHook;
use crate::tier::TierSet;
use futures::FutureExt;
use std::sync::Arc;

/// Deletes every cached view of one entity.
#[derive(Clone)]
pub struct Invalidator<B: CacheBackend> {
    backend: B,
    tiers: Arc<TierSet>,
    metrics: Arc<dyn CacheMetrics>,
}

impl<B: CacheBackend + 'static> Invalidator<B> {
    pub fn new(backend: B, tiers: Arc<TierSet>, metrics: Arc<dyn CacheMetrics>) -> Self {
        Invalidator {
            backend,
            tiers,
            metrics,
        }
    }

    /// All keys an entity can be cached under, `tiers x {true, false}`.
    pub fn keys(&self, entity_type: &str, entity_id: &str) -> Vec<CacheKey> {
        self.tiers
            .iter()
            .filter_map(|tier| self.tiers.name(tier))
            .flat_map(|name| {
                [true, false]
                    .into_iter()
                    .map(move |top_level| CacheKey::new(entity_type, entity_id, name, top_level))
            })
            .collect()
    }

    /// Delete every cached view of `entity_type`/`entity_id` in one batch.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend delete fails. The save must then be aborted.
    pub async fn invalidate(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        let keys: Vec<String> = self
            .keys(entity_type, entity_id)
            .iter()
            .map(CacheKey::to_string)
            .collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();

        if let Err(e) = self.backend.mdelete(&refs).await {
            self.metrics
                .record_error(&format!("{}/{}", entity_type, entity_id), &e.to_string());
            return Err(e);
        }

        self.metrics
            .record_invalidate(entity_type, entity_id, keys.len());
        Ok(())
    }

    /// Pre-save hook that invalidates the saved entity.
    pub fn hook(&self) -> SaveHook {
        let invalidator = self.clone();
        Arc::new(move |entity_type: &str, entity_id: &str| {
            let invalidator = invalidator.clone();
            let entity_type = entity_type.to_string();
            let entity_id = entity_id.to_string();
            async move { invalidator.invalidate(&entity_type, &entity_id).await }.boxed()
        })
    }
}

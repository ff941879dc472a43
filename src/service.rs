//! Shared view service for web applications.
//!
//! Provides a convenient wrapper around [`ViewEngine`] with `Arc` for easy
//! sharing.

use crate::backend::CacheBackend;
use crate::engine::{ViewEngine, ViewOptions};
use crate::entity::EntityRef;
use crate::error::Result;
use crate::serialization::View;
use crate::store::EntityStore;
use std::sync::Arc;

/// Cloneable handle to a fully registered [`ViewEngine`].
///
/// Registration needs `&mut ViewEngine`, so register every entity type first
/// and then wrap the engine. Every method takes `&self`; no `Mutex` is needed.
///
/// # Example
///
/// ```ignore
/// use view_kit::{ViewConfig, ViewEngine, ViewOptions, ViewService};
///
/// let mut engine = ViewEngine::new(ViewConfig::new(InMemoryBackend::new()), store);
/// engine.register(artwork_schema())?;
/// let views = ViewService::new(engine);
///
/// // In your web service struct
/// pub struct ArtworkHandler {
///     views: ViewService<InMemoryBackend, PgStore>,
/// }
///
/// impl ArtworkHandler {
///     pub async fn get(&self, id: &str) -> Result<Option<View>> {
///         self.views.view_by_id("artwork", id, &ViewOptions::new("public")).await
///     }
/// }
/// ```
pub struct ViewService<B: CacheBackend, S: EntityStore> {
    engine: Arc<ViewEngine<B, S>>,
}

impl<B: CacheBackend, S: EntityStore> Clone for ViewService<B, S> {
    fn clone(&self) -> Self {
        ViewService {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<B: CacheBackend + 'static, S: EntityStore> ViewService<B, S> {
    pub fn new(engine: ViewEngine<B, S>) -> Self {
        ViewService {
            engine: Arc::new(engine),
        }
    }

    /// See [`ViewEngine::view`].
    ///
    /// # Errors
    ///
    /// Same as [`ViewEngine::view`].
    pub async fn view(&self, entity: &EntityRef, options: &ViewOptions) -> Result<Option<View>> {
        self.engine.view(entity, options).await
    }

    /// See [`ViewEngine::view_by_id`].
    ///
    /// # Errors
    ///
    /// Same as [`ViewEngine::view`].
    pub async fn view_by_id(
        &self,
        entity_type: &str,
        id: &str,
        options: &ViewOptions,
    ) -> Result<Option<View>> {
        self.engine.view_by_id(entity_type, id, options).await
    }

    /// See [`ViewEngine::invalidate`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend delete fails.
    pub async fn invalidate(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        self.engine.invalidate(entity_type, entity_id).await
    }

    /// Get a reference to the underlying engine.
    pub fn engine(&self) -> &ViewEngine<B, S> {
        &self.engine
    }
}

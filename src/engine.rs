//! The view engine: materialization and reference resolution.
//!
//! A view of an entity at a tier is built in two halves:
//!
//! 1. **Own fields.** The computed fields of the tier, read through
//!    [`ViewCache`] under `as_json/{type}/{id}/{tier}/{top_level}`.
//! 2. **References.** Resolved on every call by recursing into the referenced
//!    entities, whose own fields are themselves cached.
//!
//! Because composed views are never cached, saving an entity only has to drop
//! that entity's own entries; every parent picks up the change on its next
//! read.
//!
//! References follow one of two paths:
//!
//! - **Fast path**: the association was reflected at registration, so the
//!   foreign key(s) on the owner are enough to materialize the target by id.
//!   Targets are nested views and may be hidden by their type's
//!   hide-as-child predicate.
//! - **Slow path**: the related entities are loaded through the store (or a
//!   loader function) and each is viewed as if requested at the top level. The
//!   hide-as-child predicate therefore never applies on this path.
//!
//! ```ignore
//! let mut engine = ViewEngine::new(ViewConfig::new(InMemoryBackend::new()), store);
//! engine.register(EntityTypeDef::new("artwork").field(FieldDef::new("name")))?;
//!
//! let view = engine.view(&artwork, &ViewOptions::new("short")).await?;
//! ```

use crate::backend::CacheBackend;
use crate::cache::ViewCache;
use crate::config::ViewConfig;
use crate::entity::{Entity, EntityId, EntityRef, Related};
use crate::error::{Error, Result};
use crate::invalidation::Invalidator;
use crate::key::CacheKey;
use crate::schema::{EntitySchema, EntityTypeDef, ReferenceSource, ReferenceSpec, SchemaRegistry};
use crate::serialization::View;
use crate::store::{AssociationMetadata, Cardinality, EntityStore};
use crate::tier::{Tier, TierSet};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Options accepted by [`ViewEngine::view`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewOptions {
    /// Tier name. Required.
    pub properties: Option<String>,
}

impl ViewOptions {
    pub fn new(tier: impl Into<String>) -> Self {
        ViewOptions {
            properties: Some(tier.into()),
        }
    }
}

/// What to materialize: an entity already in hand, or a `(type, id)` pair.
#[derive(Clone)]
pub enum Subject {
    Loaded(EntityRef),
    Id {
        entity_type: String,
        id: EntityId,
    },
}

impl Subject {
    pub fn by_id(entity_type: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Subject::Id {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    fn into_parts(self) -> (String, EntityId, Option<EntityRef>) {
        match self {
            Subject::Loaded(entity) => (
                entity.entity_type().to_string(),
                entity.id().to_string(),
                Some(entity),
            ),
            Subject::Id { entity_type, id } => (entity_type, id, None),
        }
    }
}

/// Builds tiered views of registered entity types.
///
/// Register every type before serving views; after that the engine is read-only
/// and can be shared (see [`ViewService`](crate::ViewService)).
pub struct ViewEngine<B: CacheBackend, S: EntityStore> {
    config: ViewConfig<B>,
    store: S,
    registry: SchemaRegistry,
    cache: ViewCache<B>,
    invalidator: Invalidator<B>,
}

impl<B: CacheBackend + 'static, S: EntityStore> ViewEngine<B, S> {
    pub fn new(config: ViewConfig<B>, store: S) -> Self {
        let cache = ViewCache::new(
            config.backend.clone(),
            config.ttl_policy.clone(),
            Arc::clone(&config.metrics),
            config.disable_caching,
        );
        let invalidator = Invalidator::new(
            config.backend.clone(),
            Arc::clone(&config.tiers),
            Arc::clone(&config.metrics),
        );
        let registry = SchemaRegistry::new(Arc::clone(&config.tiers));

        info!(
            "✓ View engine ready (tiers: {}, caching {})",
            config.tiers,
            if config.disable_caching {
                "disabled"
            } else {
                "enabled"
            }
        );

        ViewEngine {
            config,
            store,
            registry,
            cache,
            invalidator,
        }
    }

    /// Register an entity type and hook its saves up to invalidation.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for invalid or duplicate definitions.
    pub fn register(&mut self, def: EntityTypeDef) -> Result<()> {
        self.registry
            .register(def, &self.store, self.invalidator.hook())
    }

    /// View `entity` at the tier named in `options`.
    ///
    /// The entity is viewed at the top level, so it is never hidden.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: `properties` is missing or not a tier name
    /// - `Error::ConfigError`: the entity's type is not registered
    /// - `Error::RecursionLimit`: references nest deeper than `max_depth`
    /// - Backend, store, and timeout errors are passed through
    pub async fn view(&self, entity: &EntityRef, options: &ViewOptions) -> Result<Option<View>> {
        let tier = self.tier_from(options)?;
        self.materialize(tier, true, Subject::Loaded(Arc::clone(entity)))
            .await
    }

    /// Load an entity by id and view it. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`view`](Self::view).
    pub async fn view_by_id(
        &self,
        entity_type: &str,
        id: &str,
        options: &ViewOptions,
    ) -> Result<Option<View>> {
        let tier = self.tier_from(options)?;
        self.registry.require(entity_type)?;

        match self.find(entity_type, id).await? {
            Some(entity) => {
                self.materialize(tier, true, Subject::Loaded(entity))
                    .await
            }
            None => Ok(None),
        }
    }

    /// Materialize `subject` at `tier`.
    ///
    /// Nested (non top-level) subjects below the highest tier are hidden when
    /// their type's hide-as-child predicate holds. A [`Subject::Id`] with an
    /// empty id is `Ok(None)` without a lookup.
    ///
    /// # Errors
    ///
    /// Same as [`view`](Self::view). `Error::ValidationError` here means
    /// `tier` belongs to another [`TierSet`].
    pub async fn materialize(
        &self,
        tier: Tier,
        top_level: bool,
        subject: Subject,
    ) -> Result<Option<View>> {
        self.materialize_at(tier, top_level, subject, 0).await
    }

    /// Resolve one reference of `owner`, viewing the targets at `tier`.
    ///
    /// # Errors
    ///
    /// Same as [`materialize`](Self::materialize).
    pub async fn resolve_reference(
        &self,
        tier: Tier,
        reference: &ReferenceSpec,
        owner: &EntityRef,
    ) -> Result<Value> {
        self.resolve_at(tier, reference, owner, 1).await
    }

    /// Drop every cached view of one entity.
    ///
    /// Saves through the store do this already; call it for changes made
    /// behind the store's back.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend delete fails.
    pub async fn invalidate(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        self.invalidator.invalidate(entity_type, entity_id).await
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ViewConfig<B> {
        &self.config
    }

    pub fn tiers(&self) -> &TierSet {
        &self.config.tiers
    }

    fn tier_from(&self, options: &ViewOptions) -> Result<Tier> {
        let name = options.properties.as_deref().ok_or_else(|| {
            Error::ValidationError("missing properties option".to_string())
        })?;

        self.tiers().parse(name).ok_or_else(|| {
            Error::ValidationError(format!(
                "unknown properties option {} (expected one of {})",
                name,
                self.tiers()
            ))
        })
    }

    fn materialize_at(
        &self,
        tier: Tier,
        top_level: bool,
        subject: Subject,
        depth: usize,
    ) -> BoxFuture<'_, Result<Option<View>>> {
        async move {
            if depth > self.config.max_depth {
                warn!(
                    "Reference nesting exceeded {} levels; the reference graph probably has a cycle",
                    self.config.max_depth
                );
                return Err(Error::RecursionLimit {
                    max_depth: self.config.max_depth,
                });
            }

            if let Subject::Id { id, .. } = &subject {
                if id.is_empty() {
                    return Ok(None);
                }
            }

            let tiers = self.tiers();
            let tier_name = tiers.name(tier).ok_or_else(|| {
                Error::ValidationError(format!(
                    "tier of rank {} is not one of {}",
                    tier.rank(),
                    tiers
                ))
            })?;

            let (entity_type, id, mut entity) = subject.into_parts();
            let schema = Arc::clone(self.registry.require(&entity_type)?);
            let key = CacheKey::new(&entity_type, &id, tier_name, top_level);
            debug!("» Materializing {}", key);

            let own = {
                let slot = &mut entity;
                let (ty, eid, schema) = (entity_type.as_str(), id.as_str(), &schema);
                self.cache
                    .fetch(&key, move || async move {
                        if slot.is_none() {
                            *slot = self.find(ty, eid).await?;
                        }
                        Ok(match slot.as_deref() {
                            Some(e) if self.eligible(schema, tier, top_level, e) => {
                                Some(self.own_fields(schema, tier, e))
                            }
                            _ => None,
                        })
                    })
                    .await?
            };

            let Some(mut own) = own else {
                return Ok(None);
            };

            let references = schema.references_at(tier);
            if references.is_empty() {
                return Ok(Some(own));
            }

            if entity.is_none() {
                entity = self.find(&entity_type, &id).await?;
            }
            let Some(entity) = entity else {
                debug!(
                    "{}/{} is gone since its view was cached, omitting references",
                    entity_type, id
                );
                return Ok(Some(own));
            };
            if !self.eligible(&schema, tier, top_level, entity.as_ref()) {
                return Ok(Some(own));
            }

            let next_tier = tiers.nested(tier);
            let pending: Vec<_> = references
                .iter()
                .map(|reference| self.resolve_at(next_tier, reference, &entity, depth + 1))
                .collect();
            let resolved = try_join_all(pending).await?;

            for (reference, value) in references.iter().zip(resolved) {
                own.insert(reference.name.clone(), value);
            }
            Ok(Some(own))
        }
        .boxed()
    }

    fn resolve_at<'a>(
        &'a self,
        tier: Tier,
        reference: &'a ReferenceSpec,
        owner: &'a EntityRef,
        depth: usize,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            match &reference.metadata {
                Some(metadata) => self.resolve_by_id(tier, metadata, owner.as_ref(), depth).await,
                None => self.resolve_loaded(tier, reference, owner, depth).await,
            }
        }
        .boxed()
    }

    /// Fast path. Targets are nested views and may be hidden.
    async fn resolve_by_id(
        &self,
        tier: Tier,
        metadata: &AssociationMetadata,
        owner: &dyn Entity,
        depth: usize,
    ) -> Result<Value> {
        match metadata.cardinality {
            Cardinality::ToOne => {
                let Some(id) = owner.foreign_key(&metadata.foreign_key) else {
                    return Ok(Value::Null);
                };
                let view = self
                    .materialize_at(
                        tier,
                        false,
                        Subject::by_id(metadata.target_type.as_str(), id),
                        depth,
                    )
                    .await?;
                Ok(view.map_or(Value::Null, Value::Object))
            }
            Cardinality::ToMany => {
                let pending: Vec<_> = owner
                    .foreign_keys(&metadata.foreign_key)
                    .into_iter()
                    .map(|id| {
                        self.materialize_at(
                            tier,
                            false,
                            Subject::by_id(metadata.target_type.as_str(), id),
                            depth,
                        )
                    })
                    .collect();
                let views = try_join_all(pending).await?;
                Ok(Value::Array(
                    views.into_iter().flatten().map(Value::Object).collect(),
                ))
            }
        }
    }

    /// Slow path. Each related entity is viewed at the top level, so the
    /// hide-as-child predicate does not apply.
    async fn resolve_loaded(
        &self,
        tier: Tier,
        reference: &ReferenceSpec,
        owner: &EntityRef,
        depth: usize,
    ) -> Result<Value> {
        let related = match &reference.source {
            ReferenceSource::Association(name) => {
                self.bounded(self.store.load_related(owner.as_ref(), name))
                    .await?
            }
            ReferenceSource::Function(load) => self.bounded(load(Arc::clone(owner))).await?,
        };

        match related {
            Related::None => Ok(Value::Null),
            Related::One(entity) => {
                let view = self
                    .materialize_at(tier, true, Subject::Loaded(entity), depth)
                    .await?;
                Ok(view.map_or(Value::Null, Value::Object))
            }
            Related::Many(entities) => {
                let pending: Vec<_> = entities
                    .into_iter()
                    .map(|entity| self.materialize_at(tier, true, Subject::Loaded(entity), depth))
                    .collect();
                let views = try_join_all(pending).await?;
                Ok(Value::Array(
                    views
                        .into_iter()
                        .map(|view| view.map_or(Value::Null, Value::Object))
                        .collect(),
                ))
            }
        }
    }

    fn eligible(&self, schema: &EntitySchema, tier: Tier, top_level: bool, entity: &dyn Entity) -> bool {
        top_level || tier == self.tiers().highest() || !schema.hides_as_child(entity)
    }

    fn own_fields(&self, schema: &EntitySchema, tier: Tier, entity: &dyn Entity) -> View {
        schema
            .computed_at(tier)
            .iter()
            .map(|field| {
                let value = self.config.transform(field, field.evaluate(entity));
                (field.name.clone(), value)
            })
            .collect()
    }

    async fn find(&self, entity_type: &str, id: &str) -> Result<Option<EntityRef>> {
        self.bounded(self.store.find_by_id(entity_type, id)).await
    }

    /// Apply the configured store timeout, if any.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.store_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await?,
            None => call.await,
        }
    }
}

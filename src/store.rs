//! Entity store trait for abstracting persistence.
//!
//! The `EntityStore` trait decouples the view engine from the database that
//! actually holds entities. The engine needs four things from it:
//!
//! - point lookups by `(entity_type, id)`
//! - association reflection, so references can use the id-only fast path
//! - loading related entities directly, for the slow path
//! - a pre-save hook, so cached views are purged before a change commits
//!
//! # Mocking for Tests
//!
//! [`InMemoryEntityStore`] implements the trait over a `DashMap`:
//!
//! ```ignore
//! use view_kit::store::{Association, InMemoryEntityStore};
//! use view_kit::entity::Record;
//! use serde_json::json;
//!
//! let store = InMemoryEntityStore::new();
//! store.define_association("image", "artwork", Association::belongs_to("artwork", "artwork_id"));
//! store.insert(Record::new("artwork", "1").with("name", json!("Mona Lisa")));
//! store.save(Record::new("image", "1").with("artwork_id", json!("1"))).await?;
//! ```
//!
//! # Error Handling
//!
//! Return `Ok(None)` / `Related::None` for missing data. Return `Err` only for
//! real failures (connectivity, timeouts, unknown associations); the engine
//! surfaces them to the caller of the top-level view without retrying.

use crate::entity::{Entity, EntityId, EntityRef, Record, Related};
use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Callback run before an entity of a given type is persisted.
///
/// Receives `(entity_type, entity_id)`. The store must await it, and abort the
/// save if it fails, before committing.
pub type SaveHook = Arc<dyn Fn(&str, &str) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// How many entities an association points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// Reflection data for an association whose foreign keys live on the owner.
///
/// Present only for associations the fast path can follow using ids alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssociationMetadata {
    pub target_type: String,
    /// Attribute on the owner holding the foreign key (or keys).
    pub foreign_key: String,
    pub cardinality: Cardinality,
}

/// Trait for entity store implementations.
///
/// All methods use `&self`; implementations should use interior mutability.
pub trait EntityStore: Send + Sync {
    /// Fetch an entity by type and id.
    ///
    /// # Returns
    /// - `Ok(Some(entity))` - Entity found
    /// - `Ok(None)` - Entity not found (not an error)
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the lookup fails
    fn find_by_id(
        &self,
        entity_type: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<EntityRef>>> + Send;

    /// Reflect on a named association of `entity_type`.
    ///
    /// Returns `None` when the name is not an association, or when its
    /// foreign key is not stored on the owner (has-one, has-many).
    fn reflect_association(&self, entity_type: &str, name: &str) -> Option<AssociationMetadata>;

    /// Load whatever the association `name` of `owner` points at.
    ///
    /// # Errors
    /// Returns `Err` if the store fails or `name` is not an association
    fn load_related(
        &self,
        owner: &dyn Entity,
        name: &str,
    ) -> impl Future<Output = Result<Related>> + Send;

    /// Register a hook to run when an entity of `entity_type` is saved.
    ///
    /// The hook must complete before the change commits. Stores that let
    /// readers run concurrently with a save should also run it again after
    /// the commit, so a view cached from the old data in between is dropped.
    fn before_save(&self, entity_type: &str, hook: SaveHook);
}

// ============================================================================
// In-Memory Entity Store
// ============================================================================

/// Association definitions understood by [`InMemoryEntityStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Association {
    /// Owner holds the target's id in `foreign_key`. Reflectable (to-one).
    BelongsTo {
        target_type: String,
        foreign_key: String,
    },
    /// Owner holds a list of target ids in `foreign_keys`. Reflectable (to-many).
    ManyToMany {
        target_type: String,
        foreign_keys: String,
    },
    /// Target holds the owner's id in `inverse_key`; at most one target.
    HasOne {
        target_type: String,
        inverse_key: String,
    },
    /// Targets hold the owner's id in `inverse_key`.
    HasMany {
        target_type: String,
        inverse_key: String,
    },
}

impl Association {
    pub fn belongs_to(target_type: &str, foreign_key: &str) -> Self {
        Association::BelongsTo {
            target_type: target_type.to_string(),
            foreign_key: foreign_key.to_string(),
        }
    }

    pub fn many_to_many(target_type: &str, foreign_keys: &str) -> Self {
        Association::ManyToMany {
            target_type: target_type.to_string(),
            foreign_keys: foreign_keys.to_string(),
        }
    }

    pub fn has_one(target_type: &str, inverse_key: &str) -> Self {
        Association::HasOne {
            target_type: target_type.to_string(),
            inverse_key: inverse_key.to_string(),
        }
    }

    pub fn has_many(target_type: &str, inverse_key: &str) -> Self {
        Association::HasMany {
            target_type: target_type.to_string(),
            inverse_key: inverse_key.to_string(),
        }
    }

    fn metadata(&self) -> Option<AssociationMetadata> {
        match self {
            Association::BelongsTo {
                target_type,
                foreign_key,
            } => Some(AssociationMetadata {
                target_type: target_type.clone(),
                foreign_key: foreign_key.clone(),
                cardinality: Cardinality::ToOne,
            }),
            Association::ManyToMany {
                target_type,
                foreign_keys,
            } => Some(AssociationMetadata {
                target_type: target_type.clone(),
                foreign_key: foreign_keys.clone(),
                cardinality: Cardinality::ToMany,
            }),
            Association::HasOne { .. } | Association::HasMany { .. } => None,
        }
    }
}

type RecordKey = (String, EntityId);

#[derive(Default)]
struct StoreInner {
    records: DashMap<RecordKey, Arc<Record>>,
    associations: DashMap<(String, String), Association>,
    hooks: DashMap<String, Vec<SaveHook>>,
}

/// Simple in-memory entity store.
///
/// Cloning is cheap and clones share the same data, like
/// [`InMemoryBackend`](crate::backend::InMemoryBackend).
///
/// - [`insert`](Self::insert) seeds data without running hooks.
/// - [`save`](Self::save) runs the pre-save hooks, then commits.
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    inner: Arc<StoreInner>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an association of `owner_type` named `name`.
    pub fn define_association(&self, owner_type: &str, name: &str, association: Association) {
        self.inner
            .associations
            .insert((owner_type.to_string(), name.to_string()), association);
    }

    /// Store a record without running save hooks.
    pub fn insert(&self, record: Record) {
        let key = (record.entity_type().to_string(), record.id().to_string());
        self.inner.records.insert(key, Arc::new(record));
    }

    /// Persist a record: run every save hook for its type, commit, then run
    /// the hooks once more.
    ///
    /// A view computed between the first run and the commit reads the old
    /// record and may cache it; the second run drops that entry. Hooks must
    /// therefore be idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first hook error. A failure before the commit leaves the
    /// old record in place; a failure after it leaves the new one committed.
    pub async fn save(&self, record: Record) -> Result<()> {
        let hooks: Vec<SaveHook> = self
            .inner
            .hooks
            .get(record.entity_type())
            .map(|hooks| hooks.value().clone())
            .unwrap_or_default();
        let (entity_type, id) = (record.entity_type().to_string(), record.id().to_string());

        for hook in &hooks {
            hook(&entity_type, &id).await?;
        }

        self.insert(record);
        debug!(
            "✓ Store SAVE {}/{} ({} hooks)",
            entity_type,
            id,
            hooks.len()
        );

        for hook in &hooks {
            hook(&entity_type, &id).await?;
        }
        Ok(())
    }

    /// Remove a record. Hooks are not run.
    pub fn remove(&self, entity_type: &str, id: &str) -> Option<Record> {
        self.inner
            .records
            .remove(&(entity_type.to_string(), id.to_string()))
            .map(|(_, record)| (*record).clone())
    }

    /// Copy of a stored record, for local modification before `save`.
    pub fn get(&self, entity_type: &str, id: &str) -> Option<Record> {
        self.inner
            .records
            .get(&(entity_type.to_string(), id.to_string()))
            .map(|record| (**record).clone())
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    fn lookup(&self, entity_type: &str, id: &str) -> Option<EntityRef> {
        self.inner
            .records
            .get(&(entity_type.to_string(), id.to_string()))
            .map(|record| Arc::clone(record.value()) as EntityRef)
    }

    /// Records of `entity_type` whose `key` attribute references `owner_id`,
    /// ordered by id.
    fn inverse(&self, entity_type: &str, key: &str, owner_id: &str) -> Vec<EntityRef> {
        let mut found: Vec<Arc<Record>> = self
            .inner
            .records
            .iter()
            .filter(|entry| entry.key().0 == entity_type)
            .filter(|entry| entry.value().foreign_key(key).as_deref() == Some(owner_id))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id().cmp(b.id()));
        found.into_iter().map(|r| r as EntityRef).collect()
    }
}

impl EntityStore for InMemoryEntityStore {
    async fn find_by_id(&self, entity_type: &str, id: &str) -> Result<Option<EntityRef>> {
        Ok(self.lookup(entity_type, id))
    }

    fn reflect_association(&self, entity_type: &str, name: &str) -> Option<AssociationMetadata> {
        self.inner
            .associations
            .get(&(entity_type.to_string(), name.to_string()))
            .and_then(|association| association.metadata())
    }

    async fn load_related(&self, owner: &dyn Entity, name: &str) -> Result<Related> {
        let association = self
            .inner
            .associations
            .get(&(owner.entity_type().to_string(), name.to_string()))
            .map(|association| association.value().clone())
            .ok_or_else(|| {
                Error::StoreError(format!(
                    "{} has no association named {}",
                    owner.entity_type(),
                    name
                ))
            })?;

        let related: Related = match association {
            Association::BelongsTo {
                target_type,
                foreign_key,
            } => owner
                .foreign_key(&foreign_key)
                .and_then(|id| self.lookup(&target_type, &id))
                .into(),
            Association::ManyToMany {
                target_type,
                foreign_keys,
            } => Related::Many(
                owner
                    .foreign_keys(&foreign_keys)
                    .iter()
                    .filter_map(|id| self.lookup(&target_type, id))
                    .collect(),
            ),
            Association::HasOne {
                target_type,
                inverse_key,
            } => self
                .inverse(&target_type, &inverse_key, owner.id())
                .into_iter()
                .next()
                .into(),
            Association::HasMany {
                target_type,
                inverse_key,
            } => Related::Many(self.inverse(&target_type, &inverse_key, owner.id())),
        };
        Ok(related)
    }

    fn before_save(&self, entity_type: &str, hook: SaveHook) {
        self.inner
            .hooks
            .entry(entity_type.to_string())
            .or_default()
            .push(hook);
    }
}

//! Per-entity-type field schemas.
//!
//! An entity type declares its view fields once at startup. Each field is
//! either *computed* (a value read or derived from the entity) or a
//! *reference* (the view of a related entity or collection). Every field has a
//! minimum tier; the registry partitions fields into cumulative per-tier sets
//! so materialization never filters at request time.
//!
//! ```ignore
//! use view_kit::schema::{EntityTypeDef, FieldDef};
//! use serde_json::json;
//!
//! let def = EntityTypeDef::new("foobar")
//!     .field(FieldDef::new("foo"))
//!     .field(FieldDef::new("baz").properties("public"))
//!     .field(FieldDef::new("renamed_baz").source("baz").properties("all"))
//!     .field(FieldDef::computed("computed", |e| {
//!         json!(format!("{}{}", e.attribute("foo").as_str().unwrap_or(""),
//!                                e.attribute("bar").as_str().unwrap_or("")))
//!     }).properties("all"));
//! ```

use crate::entity::{Entity, EntityRef, Related};
use crate::error::{Error, Result};
use crate::store::{AssociationMetadata, EntityStore, SaveHook};
use crate::tier::{Tier, TierSet};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Function computing a field value from an entity.
pub type ComputeFn = Arc<dyn Fn(&dyn Entity) -> Value + Send + Sync>;

/// Function loading related entities from an owner.
pub type RelatedFn = Arc<dyn Fn(EntityRef) -> BoxFuture<'static, Result<Related>> + Send + Sync>;

/// Predicate deciding whether an entity is hidden when nested in a parent view.
pub type HidePredicate = Arc<dyn Fn(&dyn Entity) -> bool + Send + Sync>;

/// Default hide-as-child predicate: never hide.
pub fn never_hide(_entity: &dyn Entity) -> bool {
    false
}

/// Kind of a view field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Computed,
    Reference,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Computed => write!(f, "computed"),
            FieldKind::Reference => write!(f, "reference"),
        }
    }
}

/// Where a computed field's value comes from.
#[derive(Clone)]
pub enum FieldSource {
    /// Read the named attribute.
    Attribute(String),
    /// Call a function of the entity.
    Function(ComputeFn),
}

/// Where a reference field's related entities come from.
#[derive(Clone)]
pub enum ReferenceSource {
    /// A named association. Eligible for the fast path when reflectable.
    Association(String),
    /// An arbitrary loader. Always resolved through the slow path.
    Function(RelatedFn),
}

/// Source as written in a [`FieldDef`], before the kind is settled.
#[derive(Clone)]
enum DefSource {
    Named(String),
    Compute(ComputeFn),
    Related(RelatedFn),
}

/// Declaration of one view field.
#[derive(Clone)]
pub struct FieldDef {
    name: String,
    kind: Option<FieldKind>,
    properties: Option<String>,
    source: Option<DefSource>,
    options: Map<String, Value>,
}

impl FieldDef {
    /// Field read from the attribute of the same name, at the lowest tier.
    pub fn new(name: impl Into<String>) -> Self {
        FieldDef {
            name: name.into(),
            kind: None,
            properties: None,
            source: None,
            options: Map::new(),
        }
    }

    /// Computed field backed by a function of the entity.
    pub fn computed<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn Entity) -> Value + Send + Sync + 'static,
    {
        let mut def = FieldDef::new(name);
        def.kind = Some(FieldKind::Computed);
        def.source = Some(DefSource::Compute(Arc::new(f)));
        def
    }

    /// Reference following the association of the same name.
    pub fn reference(name: impl Into<String>) -> Self {
        let mut def = FieldDef::new(name);
        def.kind = Some(FieldKind::Reference);
        def
    }

    /// Reference backed by an async loader. Always uses the slow path.
    pub fn reference_with<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(EntityRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Related>> + Send + 'static,
    {
        let mut def = FieldDef::reference(name);
        def.source = Some(DefSource::Related(Arc::new(move |owner| f(owner).boxed())));
        def
    }

    /// Read from a differently named attribute or association.
    pub fn source(mut self, attribute: impl Into<String>) -> Self {
        self.source = Some(DefSource::Named(attribute.into()));
        self
    }

    /// Minimum tier at which the field is included.
    pub fn properties(mut self, tier: impl Into<String>) -> Self {
        self.properties = Some(tier.into());
        self
    }

    /// Attach an option visible to transform hooks.
    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build from a declarative description.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `kind` is neither `computed` nor `reference`.
    pub fn from_decl(decl: FieldDecl) -> Result<Self> {
        let kind = match decl.kind.as_deref() {
            None | Some("computed") | Some("callable") => FieldKind::Computed,
            Some("reference") => FieldKind::Reference,
            Some(other) => {
                return Err(Error::ConfigError(format!(
                    "field {}: unknown kind {}",
                    decl.name, other
                )))
            }
        };

        let mut def = FieldDef::new(decl.name);
        def.kind = Some(kind);
        def.properties = decl.properties;
        def.source = decl.definition.map(DefSource::Named);
        def.options = decl.options;
        Ok(def)
    }
}

/// Serializable field declaration, e.g. loaded from JSON.
///
/// ```
/// use view_kit::schema::FieldDecl;
///
/// let decls: Vec<FieldDecl> = serde_json::from_str(r#"[
///     {"name": "name"},
///     {"name": "ssn", "properties": "all"},
///     {"name": "employees", "type": "reference"}
/// ]"#).unwrap();
/// assert_eq!(decls.len(), 3);
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub properties: Option<String>,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// A computed field after registration.
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub min_tier: Tier,
    pub source: FieldSource,
    pub options: Map<String, Value>,
}

impl FieldSpec {
    pub fn kind(&self) -> FieldKind {
        FieldKind::Computed
    }

    /// Raw value of the field for `entity`, before transforms.
    pub fn evaluate(&self, entity: &dyn Entity) -> Value {
        match &self.source {
            FieldSource::Attribute(name) => entity.attribute(name),
            FieldSource::Function(f) => f(entity),
        }
    }

    /// True if the option `key` is set to `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.options.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// A reference field after registration.
#[derive(Clone)]
pub struct ReferenceSpec {
    pub name: String,
    pub min_tier: Tier,
    pub source: ReferenceSource,
    /// Reflection data, present only for fast-path eligible associations.
    pub metadata: Option<AssociationMetadata>,
    pub options: Map<String, Value>,
}

impl ReferenceSpec {
    pub fn kind(&self) -> FieldKind {
        FieldKind::Reference
    }
}

/// Immutable field layout of one entity type.
pub struct EntitySchema {
    entity_type: String,
    computed: Vec<Vec<Arc<FieldSpec>>>,
    references: Vec<Vec<Arc<ReferenceSpec>>>,
    hide_as_child: HidePredicate,
}

impl EntitySchema {
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Computed fields included at `tier`, in declaration order.
    pub fn computed_at(&self, tier: Tier) -> &[Arc<FieldSpec>] {
        self.computed
            .get(tier.rank())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Reference fields included at `tier`, in declaration order.
    pub fn references_at(&self, tier: Tier) -> &[Arc<ReferenceSpec>] {
        self.references
            .get(tier.rank())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn hides_as_child(&self, entity: &dyn Entity) -> bool {
        (self.hide_as_child)(entity)
    }
}

/// Everything needed to register one entity type.
pub struct EntityTypeDef {
    entity_type: String,
    fields: Vec<FieldDef>,
    hide_as_child: HidePredicate,
}

impl EntityTypeDef {
    pub fn new(entity_type: impl Into<String>) -> Self {
        EntityTypeDef {
            entity_type: entity_type.into(),
            fields: Vec::new(),
            hide_as_child: Arc::new(never_hide),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Hide entities of this type when reached as a nested reference below
    /// the highest tier.
    pub fn hide_as_child_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn Entity) -> bool + Send + Sync + 'static,
    {
        self.hide_as_child = Arc::new(predicate);
        self
    }

    /// Build from declarative field descriptions.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for an unknown field kind.
    pub fn from_decls(
        entity_type: impl Into<String>,
        decls: impl IntoIterator<Item = FieldDecl>,
    ) -> Result<Self> {
        let fields = decls
            .into_iter()
            .map(FieldDef::from_decl)
            .collect::<Result<Vec<_>>>()?;
        Ok(EntityTypeDef::new(entity_type).fields(fields))
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }
}

/// Registry of entity schemas, keyed by entity type.
///
/// Populated at startup, read-only once views are served.
pub struct SchemaRegistry {
    tiers: Arc<TierSet>,
    schemas: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new(tiers: Arc<TierSet>) -> Self {
        SchemaRegistry {
            tiers,
            schemas: HashMap::new(),
        }
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    /// Register an entity type.
    ///
    /// Validates the fields, partitions them by tier, reflects on every named
    /// reference once, then installs `on_save` as the store's pre-save hook for
    /// the type.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for duplicate field names, unknown tiers,
    /// or a type that is already registered.
    pub fn register<S: EntityStore>(
        &mut self,
        def: EntityTypeDef,
        store: &S,
        on_save: SaveHook,
    ) -> Result<()> {
        if self.schemas.contains_key(&def.entity_type) {
            return Err(Error::ConfigError(format!(
                "entity type {} is already registered",
                def.entity_type
            )));
        }

        let schema = self.build(def, store)?;
        let entity_type = schema.entity_type.clone();

        info!(
            "✓ Registered view schema for {} ({} tiers)",
            entity_type,
            self.tiers.len()
        );

        store.before_save(&entity_type, on_save);
        self.schemas.insert(entity_type, Arc::new(schema));
        Ok(())
    }

    pub fn get(&self, entity_type: &str) -> Option<&Arc<EntitySchema>> {
        self.schemas.get(entity_type)
    }

    /// Schema for `entity_type`, or a configuration error.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the type was never registered.
    pub fn require(&self, entity_type: &str) -> Result<&Arc<EntitySchema>> {
        self.get(entity_type).ok_or_else(|| {
            Error::ConfigError(format!("no view schema registered for {}", entity_type))
        })
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    fn build<S: EntityStore>(&self, def: EntityTypeDef, store: &S) -> Result<EntitySchema> {
        let tier_count = self.tiers.len();
        let mut computed: Vec<Vec<Arc<FieldSpec>>> = vec![Vec::new(); tier_count];
        let mut references: Vec<Vec<Arc<ReferenceSpec>>> = vec![Vec::new(); tier_count];
        let mut seen = HashSet::new();

        for field in def.fields {
            if !seen.insert(field.name.clone()) {
                return Err(Error::ConfigError(format!(
                    "{}: duplicate field {}",
                    def.entity_type, field.name
                )));
            }

            let min_tier = match &field.properties {
                None => self.tiers.lowest(),
                Some(name) => self.tiers.parse(name).ok_or_else(|| {
                    Error::ConfigError(format!(
                        "{}: field {} uses unknown tier {} (expected one of {})",
                        def.entity_type, field.name, name, self.tiers
                    ))
                })?,
            };

            match field.kind.unwrap_or(FieldKind::Computed) {
                FieldKind::Computed => {
                    let source = match field.source {
                        None => FieldSource::Attribute(field.name.clone()),
                        Some(DefSource::Named(attr)) => FieldSource::Attribute(attr),
                        Some(DefSource::Compute(f)) => FieldSource::Function(f),
                        Some(DefSource::Related(_)) => {
                            return Err(Error::ConfigError(format!(
                                "{}: computed field {} has a reference loader",
                                def.entity_type, field.name
                            )))
                        }
                    };
                    let spec = Arc::new(FieldSpec {
                        name: field.name,
                        min_tier,
                        source,
                        options: field.options,
                    });
                    for tier in self.tiers.iter().filter(|t| *t >= min_tier) {
                        computed[tier.rank()].push(spec.clone());
                    }
                }
                FieldKind::Reference => {
                    let source = match field.source {
                        None => ReferenceSource::Association(field.name.clone()),
                        Some(DefSource::Named(assoc)) => ReferenceSource::Association(assoc),
                        Some(DefSource::Related(f)) => ReferenceSource::Function(f),
                        Some(DefSource::Compute(_)) => {
                            return Err(Error::ConfigError(format!(
                                "{}: reference {} has a computed value",
                                def.entity_type, field.name
                            )))
                        }
                    };
                    let metadata = match &source {
                        ReferenceSource::Association(name) => {
                            store.reflect_association(&def.entity_type, name)
                        }
                        ReferenceSource::Function(_) => None,
                    };
                    debug!(
                        "{}.{}: {} path",
                        def.entity_type,
                        field.name,
                        if metadata.is_some() { "fast" } else { "slow" }
                    );
                    let spec = Arc::new(ReferenceSpec {
                        name: field.name,
                        min_tier,
                        source,
                        metadata,
                        options: field.options,
                    });
                    for tier in self.tiers.iter().filter(|t| *t >= min_tier) {
                        references[tier.rank()].push(spec.clone());
                    }
                }
            }
        }

        Ok(EntitySchema {
            entity_type: def.entity_type,
            computed,
            references,
            hide_as_child: def.hide_as_child,
        })
    }
}

//! Entity model consumed by the view engine.
//!
//! The engine never owns entities. It reads attributes and foreign keys from
//! whatever the [`EntityStore`](crate::store::EntityStore) hands back, through
//! the [`Entity`] trait. [`Record`] is a map-backed implementation used by the
//! in-memory store and by tests.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Entity identifier.
pub type EntityId = String;

/// Shared handle to a loaded entity.
pub type EntityRef = Arc<dyn Entity>;

/// Trait that every viewable entity implements.
///
/// # Example
///
/// ```
/// use view_kit::entity::Entity;
/// use serde_json::{json, Value};
///
/// struct Image {
///     id: String,
///     name: String,
///     artwork_id: Option<String>,
/// }
///
/// impl Entity for Image {
///     fn entity_type(&self) -> &str {
///         "image"
///     }
///
///     fn id(&self) -> &str {
///         &self.id
///     }
///
///     fn attribute(&self, name: &str) -> Value {
///         match name {
///             "name" => json!(self.name),
///             "artwork_id" => json!(self.artwork_id),
///             _ => Value::Null,
///         }
///     }
/// }
/// ```
pub trait Entity: Send + Sync {
    /// Registered type name of this entity.
    fn entity_type(&self) -> &str;

    /// Identifier, unique within the entity type.
    fn id(&self) -> &str;

    /// Read an attribute. Unknown attributes read as `Value::Null`.
    fn attribute(&self, name: &str) -> Value;

    /// Read a single foreign key.
    ///
    /// Default: the attribute named `accessor`, if it is a string or number.
    fn foreign_key(&self, accessor: &str) -> Option<EntityId> {
        id_from_value(&self.attribute(accessor))
    }

    /// Read a list of foreign keys.
    ///
    /// Default: the attribute named `accessor`, if it is an array of strings
    /// or numbers. Other elements are skipped.
    fn foreign_keys(&self, accessor: &str) -> Vec<EntityId> {
        match self.attribute(accessor) {
            Value::Array(values) => values.iter().filter_map(id_from_value).collect(),
            _ => Vec::new(),
        }
    }
}

fn id_from_value(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Result of following a reference from an owner entity.
#[derive(Clone, Default)]
pub enum Related {
    /// Nothing is referenced.
    #[default]
    None,
    /// A single related entity.
    One(EntityRef),
    /// A collection of related entities, possibly empty.
    Many(Vec<EntityRef>),
}

impl Related {
    pub fn is_none(&self) -> bool {
        matches!(self, Related::None)
    }
}

impl From<Option<EntityRef>> for Related {
    fn from(entity: Option<EntityRef>) -> Self {
        entity.map(Related::One).unwrap_or_default()
    }
}

impl From<Vec<EntityRef>> for Related {
    fn from(entities: Vec<EntityRef>) -> Self {
        Related::Many(entities)
    }
}

/// Map-backed entity.
///
/// # Example
///
/// ```
/// use view_kit::entity::{Entity, Record};
/// use serde_json::json;
///
/// let image = Record::new("image", "1")
///     .with("name", json!("Picture of Mona Lisa"))
///     .with("artwork_id", json!("7"));
///
/// assert_eq!(image.attribute("name"), json!("Picture of Mona Lisa"));
/// assert_eq!(image.foreign_key("artwork_id"), Some("7".to_string()));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    entity_type: String,
    id: EntityId,
    attributes: Map<String, Value>,
}

impl Record {
    pub fn new(entity_type: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Record {
            entity_type: entity_type.into(),
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Set an attribute in place (a local, uncommitted change).
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }
}

impl Entity for Record {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn attribute(&self, name: &str) -> Value {
        self.attributes.get(name).cloned().unwrap_or(Value::Null)
    }
}

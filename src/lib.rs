//! # view-kit
//!
//! Tiered, cached JSON views of entity graphs.
//!
//! ## Features
//!
//! - **Tiered views:** every field has a minimum tier (`short < public < all` by
//!   default); a wider tier always contains the narrower ones
//! - **References:** fields can embed the view of a related entity or collection
//! - **Own-fields caching:** each entity's computed fields are cached per tier;
//!   composed views never are, so one save refreshes every parent view
//! - **Save-time invalidation:** a pre-save hook purges the saved entity's
//!   entries before the store commits
//! - **Backend Agnostic:** any [`CacheBackend`]; [`InMemoryBackend`](backend::InMemoryBackend) included
//! - **Store Agnostic:** any [`EntityStore`]; [`InMemoryEntityStore`](store::InMemoryEntityStore) included
//!
//! ## Quick Start
//!
//! ```ignore
//! use view_kit::{
//!     EntityTypeDef, FieldDef, ViewConfig, ViewEngine, ViewOptions, ViewService,
//!     backend::InMemoryBackend,
//!     entity::Record,
//!     store::{Association, InMemoryEntityStore},
//! };
//! use serde_json::json;
//!
//! // 1. Describe your data
//! let store = InMemoryEntityStore::new();
//! store.define_association("image", "artwork", Association::belongs_to("artwork", "artwork_id"));
//!
//! // 2. Register view schemas
//! let mut engine = ViewEngine::new(ViewConfig::new(InMemoryBackend::new()), store.clone());
//! engine.register(
//!     EntityTypeDef::new("artwork")
//!         .field(FieldDef::new("name"))
//!         .field(FieldDef::new("price").properties("all")),
//! )?;
//! engine.register(
//!     EntityTypeDef::new("image")
//!         .field(FieldDef::new("name"))
//!         .field(FieldDef::reference("artwork")),
//! )?;
//!
//! // 3. Share the engine and serve views
//! let views = ViewService::new(engine);
//! store.save(Record::new("artwork", "1").with("name", json!("Mona Lisa"))).await?;
//! let view = views.view_by_id("artwork", "1", &ViewOptions::new("short")).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod observability;
pub mod schema;
pub mod serialization;
pub mod service;
pub mod store;
pub mod tier;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use config::ViewConfig;
pub use engine::{Subject, ViewEngine, ViewOptions};
pub use entity::{Entity, EntityRef, Related};
pub use error::{Error, Result};
pub use schema::{EntityTypeDef, FieldDef};
pub use serialization::View;
pub use service::ViewService;
pub use store::EntityStore;
pub use tier::{Tier, TierSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

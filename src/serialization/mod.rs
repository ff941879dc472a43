//! Postcard-based cache serialization with versioned envelopes.
//!
//! Every own-fields view written to the cache is wrapped in an envelope:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "VKIT"              u32                postcard::to_allocvec(T)
//! ```
//!
//! Views are arbitrary JSON, and Postcard is not self-describing, so the view
//! payload is `Option<String>` holding JSON text. `None` is a cached *hidden*
//! view, which is different from a cache miss.
//!
//! # Example
//!
//! ```rust
//! use view_kit::serialization::{decode_view, encode_view};
//! use serde_json::{json, Map};
//!
//! # fn main() -> view_kit::Result<()> {
//! let mut view = Map::new();
//! view.insert("name".to_string(), json!("Mona Lisa"));
//!
//! let bytes = encode_view(Some(&view))?;
//! assert_eq!(decode_view(&bytes)?, Some(view));
//!
//! let hidden = encode_view(None)?;
//! assert_eq!(decode_view(&hidden)?, None);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object produced for one entity.
pub type View = Map<String, Value>;

/// Magic header for cached views: b"VKIT"
///
/// Any entry without this magic is rejected during deserialization.
pub const CACHE_MAGIC: [u8; 4] = *b"VKIT";

/// Current schema version.
///
/// **CRITICAL:** Increment when the envelope or payload layout changes.
/// Old entries are then evicted and recomputed on first read.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for cache entries.
///
/// # Example
///
/// ```rust
/// use view_kit::serialization::CacheEnvelope;
///
/// let envelope = CacheEnvelope::new("data");
/// assert_eq!(envelope.magic, *b"VKIT");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"VKIT"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The actual cached data
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value with envelope for cache storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from cache storage with validation.
///
/// 1. Decodes the envelope
/// 2. Checks magic header matches b"VKIT"
/// 3. Checks version matches CURRENT_SCHEMA_VERSION
///
/// # Errors
///
/// - `Error::DeserializationError`: Corrupted Postcard bytes
/// - `Error::InvalidCacheEntry`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        log::error!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        log::warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC,
            envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}

/// Encode an own-fields view (or a hidden marker) for the cache.
///
/// # Errors
///
/// Returns `Error::SerializationError` if encoding fails.
pub fn encode_view(view: Option<&View>) -> Result<Vec<u8>> {
    let json = view.map(serde_json::to_string).transpose()?;
    serialize_for_cache(&json)
}

/// Decode bytes written by [`encode_view`].
///
/// # Errors
///
/// Same as [`deserialize_from_cache`], plus `Error::DeserializationError` when
/// the JSON text is not an object.
pub fn decode_view(bytes: &[u8]) -> Result<Option<View>> {
    let json: Option<String> = deserialize_from_cache(bytes)?;
    json.map(|text| serde_json::from_str::<View>(&text))
        .transpose()
        .map_err(|e| Error::DeserializationError(e.to_string()))
}

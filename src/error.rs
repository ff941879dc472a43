//! Error types for the view engine.

use std::fmt;

/// Result type for view operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the view engine.
///
/// A missing entity is never an error: lookups that find nothing surface as
/// `Ok(None)`, a `null` reference, or an entry compacted out of a sequence.
/// Everything below is a real failure.
#[derive(Debug, Clone)]
pub enum Error {
    /// Schema or engine configuration is invalid.
    ///
    /// Raised at startup and never recovered:
    /// - Duplicate field name within one entity type
    /// - Unknown field kind in a declarative schema
    /// - Unknown tier name on a field, or an invalid tier set
    /// - Entity type registered twice, or used without being registered
    ConfigError(String),

    /// The caller passed invalid view options.
    ///
    /// Returned synchronously by the entry point when the tier (`properties`)
    /// is missing or not a recognized tier name. Never cached.
    ValidationError(String),

    /// Cache backend failed (connection lost, protocol error, ...).
    ///
    /// **Recovery:** belongs to the backend adapter; the engine does not retry.
    BackendError(String),

    /// Entity store failed to load an entity or association.
    ///
    /// **Recovery:** belongs to the store adapter; the engine does not retry.
    StoreError(String),

    /// A store call exceeded the configured timeout.
    Timeout(String),

    /// Serialization failed when encoding a view for the cache.
    SerializationError(String),

    /// Deserialization failed when decoding cache bytes.
    ///
    /// **Recovery:** the entry is evicted and recomputed on read.
    DeserializationError(String),

    /// Invalid cache entry: bad magic or corrupted envelope.
    ///
    /// **Recovery:** the entry is evicted and recomputed on read.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    ///
    /// **Recovery:** the entry is evicted and recomputed on read.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Reference resolution nested deeper than the configured limit.
    ///
    /// The reference graph is expected to be acyclic; hitting this almost
    /// always means a cycle.
    RecursionLimit {
        /// Configured maximum depth
        max_depth: usize,
    },

    /// Feature not implemented by this backend or store.
    NotImplemented(String),
}

impl Error {
    /// True for errors raised while decoding a cached entry.
    ///
    /// Such entries are evicted and recomputed instead of failing the read.
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(
            self,
            Error::DeserializationError(_)
                | Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::StoreError(msg) => write!(f, "Store error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::RecursionLimit { max_depth } => {
                write!(f, "Reference depth exceeded limit of {}", max_depth)
            }
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

//! Cache backend implementations.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

pub mod inmemory;

pub use inmemory::InMemoryBackend;

/// Trait for cache backend implementations.
///
/// The view engine only ever stores encoded own-field views here, keyed by
/// [`CacheKey`](crate::key::CacheKey). Any key/value store with get, set and
/// delete can back it: in-memory (provided), Redis, Memcached, ...
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Backend implementations should use interior mutability or external storage. The engine
/// takes no locks of its own, so concurrent `get`/`set`/`delete` on the same key must be
/// safe inside the backend.
///
/// **ASYNC:** All methods return `Send` futures, so views can be materialized from any task.
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve value from cache by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found in cache
    /// - `Ok(None)` - Cache miss (key not found)
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, etc.)
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store value in cache with optional TTL.
    ///
    /// # Arguments
    /// - `key`: Cache key
    /// - `value`: Encoded view bytes
    /// - `ttl`: Time-to-live. None = use backend default or infinite
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove value from cache. Deleting a missing key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Bulk delete operation, used by invalidation.
    ///
    /// Default implementation calls `delete()` for each key.
    /// Override for batch efficiency (e.g., Redis DEL).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mdelete(&self, keys: &[&str]) -> impl Future<Output = Result<()>> + Send {
        async move {
            for key in keys {
                self.delete(key).await?;
            }
            Ok(())
        }
    }

    /// Optional: Clear all cache (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if operation is not implemented or fails
    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send {
        async {
            Err(crate::error::Error::NotImplemented(
                "clear_all not implemented for this backend".to_string(),
            ))
        }
    }
}

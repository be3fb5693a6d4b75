//! Storage trait definitions for Spiral Memory
//!
//! These traits define the core storage abstractions:
//! - `KvStore`: Prefix-listable key/value snapshots (nodes, partitions, sigils)
//! - `LeaseStore`: Time-boxed exclusive leases used for GC leadership
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// Prefix for memory node snapshots.
pub const NODE_PREFIX: &str = "mem:";
/// Prefix for partition snapshots.
pub const PARTITION_PREFIX: &str = "spiral:";
/// Prefix for sigil registry entries.
pub const SIGIL_PREFIX: &str = "sigil:";
/// Prefix for GC leadership leases.
pub const LEASE_PREFIX: &str = "gc-lease:";

/// `mem:<id>`
pub fn node_key(id: &str) -> String {
    format!("{NODE_PREFIX}{id}")
}

/// `spiral:<id>`
pub fn partition_key(id: &str) -> String {
    format!("{PARTITION_PREFIX}{id}")
}

/// `sigil:<signature>`
pub fn sigil_key(signature: &str) -> String {
    format!("{SIGIL_PREFIX}{signature}")
}

/// `gc-lease:<shard>`
pub fn lease_key(shard_id: u32) -> String {
    format!("{LEASE_PREFIX}{shard_id}")
}

/// Reject empty keys and keys containing control characters.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.chars().any(char::is_control) {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Run a storage future under a deadline.
///
/// Returns `StorageError::Timeout` if `deadline` elapses first; the
/// underlying operation is dropped, never awaited past the deadline.
pub async fn with_deadline<T, F>(op: &str, deadline: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            op: op.to_string(),
            millis: deadline.as_millis() as u64,
        }),
    }
}

// ---------------------------------------------------------------------------
// KvStore: snapshot persistence
// ---------------------------------------------------------------------------

/// Key/value snapshot store.
///
/// Guarantees:
/// - `set(k, v)` followed by `get(k)` returns `Some(v)`.
/// - `delete(k)` is a no-op for absent keys.
/// - `keys(prefix)` lists every live key starting with `prefix`, sorted.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Prepare the backend (schema, directories). Safe to call repeatedly.
    async fn init(&self) -> StorageResult<()>;

    /// Fetch a value. Absent keys return `Ok(None)`.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Remove a value.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys beginning with `prefix`.
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// LeaseStore: leadership leases
// ---------------------------------------------------------------------------

/// Exclusive, expiring leases.
///
/// Semantics:
/// - `try_acquire` succeeds when the lease is free, expired, or already held
///   by `holder` (in which case it is renewed for another `ttl`).
/// - At most one holder owns an unexpired lease at any instant.
/// - `release` only clears a lease owned by `holder`.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Attempt to acquire or renew `key` for `holder`. Returns `true` on success.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> StorageResult<bool>;

    /// Release `key` if `holder` owns it.
    async fn release(&self, key: &str, holder: &str) -> StorageResult<()>;

    /// Current unexpired holder of `key`, if any.
    async fn holder(&self, key: &str) -> StorageResult<Option<String>>;
}

/// A backend that provides both snapshots and leases.
pub trait Backend: KvStore + LeaseStore {}

impl<T: KvStore + LeaseStore> Backend for T {}

//! In-memory fakes for storage traits
//!
//! Provides `MemoryKvStore`, which satisfies both the `KvStore` and
//! `LeaseStore` contracts without any external dependencies. It backs unit
//! tests and ephemeral (`memory`) deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

/// In-memory key/value store backed by a `BTreeMap<key, value>`.
///
/// Share one instance behind an `Arc` to simulate several processes talking
/// to the same backend.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, Value>>,
    leases: Mutex<HashMap<String, Lease>>,
    fail_writes: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`delete` fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.check_writable()?;
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.check_writable()?;
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[async_trait]
impl LeaseStore for MemoryKvStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> StorageResult<bool> {
        validate_key(key)?;
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();
        let available = match leases.get(key) {
            None => true,
            Some(lease) => lease.holder == holder || lease.expires_at <= now,
        };
        if available {
            leases.insert(
                key.to_string(),
                Lease {
                    holder: holder.to_string(),
                    expires_at: now + ttl,
                },
            );
        }
        Ok(available)
    }

    async fn release(&self, key: &str, holder: &str) -> StorageResult<()> {
        let mut leases = self.leases.lock().unwrap();
        if leases.get(key).is_some_and(|l| l.holder == holder) {
            leases.remove(key);
        }
        Ok(())
    }

    async fn holder(&self, key: &str) -> StorageResult<Option<String>> {
        let now = Instant::now();
        let leases = self.leases.lock().unwrap();
        Ok(leases
            .get(key)
            .filter(|l| l.expires_at > now)
            .map(|l| l.holder.clone()))
    }
}

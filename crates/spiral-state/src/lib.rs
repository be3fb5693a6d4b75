//! Spiral-State: Persistence Layer for Spiral Memory
//!
//! This crate provides the persistence adapter for the Spiral Memory engine.
//! Every stateful component mirrors its snapshots here while the process is
//! live and reloads them from here on cold start.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: a uniform get/set/delete/keys-by-prefix contract over
//! interchangeable backends, plus expiring leases for GC leadership.
//!
//! ## Key Components
//!
//! - `KvStore` / `LeaseStore`: backend-agnostic traits
//! - `MemoryKvStore`: pure in-memory implementation
//! - `SurrealKvStore`: SurrealDB (`mem://`, `surrealkv://`, `ws://`)

mod error;
pub mod fakes;
mod handle;
mod migrations;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryKvStore;
pub use handle::{RemoteConfig, SurrealKvStore, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
pub use storage_traits::{
    lease_key, node_key, partition_key, sigil_key, validate_key, with_deadline, Backend, KvStore,
    LeaseStore, StorageResult, LEASE_PREFIX, NODE_PREFIX, PARTITION_PREFIX, SIGIL_PREFIX,
};

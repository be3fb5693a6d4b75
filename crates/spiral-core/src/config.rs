//! Engine configuration.
//!
//! Loaded from a TOML file and overridden by `SPIRAL_*` environment
//! variables. Every field has a default, so an empty file is a valid config.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spiral_state::{KvStore, LeaseStore, MemoryKvStore, RemoteConfig, SurrealKvStore};
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Guards a node must pass (all of them) before the collector may evict it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityThresholds {
    /// Node must be older than this.
    pub min_age_secs: u64,
    /// Node must have been read fewer times than this.
    pub min_access_count: u64,
    /// Node strength must be below this.
    pub min_strength: f64,
    /// Node may have at most this many associations.
    pub max_associations: usize,
    /// Node must not have been read for this long.
    pub min_idle_secs: u64,
}

impl Default for EligibilityThresholds {
    fn default() -> Self {
        Self {
            min_age_secs: 24 * 60 * 60,
            min_access_count: 3,
            min_strength: 0.3,
            max_associations: 2,
            min_idle_secs: 6 * 60 * 60,
        }
    }
}

/// Garbage collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Wall-clock budget of one collector run.
    pub budget_ms: u64,
    /// Period of the background tick.
    pub interval_ms: u64,
    /// Evictions between leadership re-checks.
    pub batch_size: usize,
    /// First re-check delay for a popped-but-ineligible node.
    pub recheck_base_ms: u64,
    /// Upper bound of the doubling re-check delay.
    pub recheck_max_ms: u64,
    pub thresholds: EligibilityThresholds,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            budget_ms: 25,
            interval_ms: 60_000,
            batch_size: 32,
            recheck_base_ms: 5 * 60 * 1000,
            recheck_max_ms: 6 * 60 * 60 * 1000,
            thresholds: EligibilityThresholds::default(),
        }
    }
}

impl GcConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Lease-based GC leadership settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// When false the process is always the leader.
    pub clustered: bool,
    pub shard_id: u32,
    /// Lease holder identity; a random one is generated when unset.
    pub holder_id: Option<String>,
    pub lease_ttl_ms: u64,
    pub renew_interval_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            clustered: false,
            shard_id: 0,
            holder_id: None,
            lease_ttl_ms: 30_000,
            renew_interval_ms: 20_000,
        }
    }
}

impl CoordinationConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    /// The configured holder id, or `<hostname-ish>-<uuid>` when unset.
    pub fn resolve_holder_id(&self) -> String {
        self.holder_id.clone().unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "spiral".to_string());
            format!("{host}-{}", uuid::Uuid::new_v4())
        })
    }
}

/// Which persistence backend to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Pure in-memory map; nothing survives a restart.
    Memory,
    /// Embedded on-disk SurrealKV store (single-process default).
    Embedded { path: PathBuf },
    /// Networked SurrealDB (multi-instance deployments).
    Remote(RemoteConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Embedded {
            path: PathBuf::from(".spiral/db"),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard cap on the number of partitions.
    pub max_partitions: usize,
    /// Capacity of every new partition.
    pub max_nodes_per_partition: usize,
    /// Below this best-candidate score a new partition is created (while under the cap).
    pub min_placement_score: f64,
    /// Placements per spiral turn.
    pub turns_per_partition: u64,
    /// Associations beyond this count are linked in a background task.
    pub deferred_association_threshold: usize,
    /// Entries held by the signature lookup cache.
    pub sigil_cache_size: usize,
    /// Deadline applied to every persistence call.
    pub persistence_timeout_ms: u64,
    /// Capacity of the notification channel.
    pub event_buffer: usize,
    pub gc: GcConfig,
    pub coordination: CoordinationConfig,
    pub backend: BackendConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_partitions: 89,
            max_nodes_per_partition: 144,
            min_placement_score: 0.5,
            turns_per_partition: 21,
            deferred_association_threshold: 5,
            sigil_cache_size: 1000,
            persistence_timeout_ms: 2000,
            event_buffer: 256,
            gc: GcConfig::default(),
            coordination: CoordinationConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl EngineConfig {
    /// An in-memory configuration, convenient for tests.
    pub fn in_memory() -> Self {
        Self {
            backend: BackendConfig::Memory,
            ..Self::default()
        }
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Load from an optional file, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SPIRAL_*` environment variables.
    ///
    /// Recognised: `SPIRAL_MAX_PARTITIONS`, `SPIRAL_MAX_NODES_PER_PARTITION`,
    /// `SPIRAL_SIGIL_CACHE_SIZE`, `SPIRAL_GC_BUDGET_MS`, `SPIRAL_GC_INTERVAL_MS`,
    /// `SPIRAL_CLUSTERED`, `SPIRAL_SHARD_ID`, `SPIRAL_HOLDER_ID`,
    /// `SPIRAL_BACKEND` (`memory` | `embedded` | `remote`), `SPIRAL_DB_PATH`.
    /// A remote backend reads its connection from `SURREALDB_*`.
    pub fn apply_env_overrides(&mut self) -> EngineResult<()> {
        if let Some(v) = env_parse("SPIRAL_MAX_PARTITIONS")? {
            self.max_partitions = v;
        }
        if let Some(v) = env_parse("SPIRAL_MAX_NODES_PER_PARTITION")? {
            self.max_nodes_per_partition = v;
        }
        if let Some(v) = env_parse("SPIRAL_SIGIL_CACHE_SIZE")? {
            self.sigil_cache_size = v;
        }
        if let Some(v) = env_parse("SPIRAL_GC_BUDGET_MS")? {
            self.gc.budget_ms = v;
        }
        if let Some(v) = env_parse("SPIRAL_GC_INTERVAL_MS")? {
            self.gc.interval_ms = v;
        }
        if let Some(v) = env_parse("SPIRAL_CLUSTERED")? {
            self.coordination.clustered = v;
        }
        if let Some(v) = env_parse("SPIRAL_SHARD_ID")? {
            self.coordination.shard_id = v;
        }
        if let Ok(v) = std::env::var("SPIRAL_HOLDER_ID") {
            self.coordination.holder_id = Some(v);
        }

        if let Ok(kind) = std::env::var("SPIRAL_BACKEND") {
            self.backend = match kind.to_lowercase().as_str() {
                "memory" => BackendConfig::Memory,
                "embedded" => BackendConfig::Embedded {
                    path: std::env::var("SPIRAL_DB_PATH")
                        .map(PathBuf::from)
                        .unwrap_or_else(|_| PathBuf::from(".spiral/db")),
                },
                "remote" => BackendConfig::Remote(
                    RemoteConfig::from_env().map_err(EngineError::Config)?,
                ),
                other => {
                    return Err(EngineError::Config(format!(
                        "unknown SPIRAL_BACKEND '{other}'"
                    )))
                }
            };
        } else if let Ok(path) = std::env::var("SPIRAL_DB_PATH") {
            if let BackendConfig::Embedded { path: p } = &mut self.backend {
                *p = PathBuf::from(path);
            }
        }
        Ok(())
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_partitions == 0 {
            return Err(EngineError::Config("max_partitions must be > 0".into()));
        }
        if self.max_nodes_per_partition == 0 {
            return Err(EngineError::Config(
                "max_nodes_per_partition must be > 0".into(),
            ));
        }
        if self.turns_per_partition == 0 {
            return Err(EngineError::Config("turns_per_partition must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.min_placement_score) {
            return Err(EngineError::Config(
                "min_placement_score must be within [0, 1]".into(),
            ));
        }
        if self.gc.batch_size == 0 {
            return Err(EngineError::Config("gc.batch_size must be > 0".into()));
        }
        if self.gc.recheck_base_ms > self.gc.recheck_max_ms {
            return Err(EngineError::Config(
                "gc.recheck_base_ms must not exceed gc.recheck_max_ms".into(),
            ));
        }
        if self.coordination.clustered
            && self.coordination.renew_interval_ms >= self.coordination.lease_ttl_ms
        {
            return Err(EngineError::Config(
                "coordination.renew_interval_ms must be shorter than lease_ttl_ms".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> EngineResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// The two views of one connected backend.
#[derive(Clone)]
pub struct BackendHandles {
    pub kv: Arc<dyn KvStore>,
    pub leases: Arc<dyn LeaseStore>,
}

impl BackendHandles {
    fn from_backend<B: KvStore + LeaseStore + 'static>(backend: B) -> Self {
        let backend = Arc::new(backend);
        Self {
            kv: backend.clone(),
            leases: backend,
        }
    }
}

/// Connect the configured backend.
pub async fn connect_backend(config: &BackendConfig) -> EngineResult<BackendHandles> {
    match config {
        BackendConfig::Memory => {
            info!(backend = "memory", "Using in-memory persistence");
            Ok(BackendHandles::from_backend(MemoryKvStore::new()))
        }
        BackendConfig::Embedded { path } => {
            let store = SurrealKvStore::connect_embedded(path).await?;
            Ok(BackendHandles::from_backend(store))
        }
        BackendConfig::Remote(remote) => {
            let store = SurrealKvStore::connect_remote(remote).await?;
            Ok(BackendHandles::from_backend(store))
        }
    }
}

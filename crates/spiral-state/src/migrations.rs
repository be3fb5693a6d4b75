//! SurrealDB schema migrations and initialization
//!
//! Sets up the two tables Spiral Memory needs. Record ids are derived from
//! the logical key (`type::thing('kv', $key)`), so every write is an upsert
//! on a single record.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize all Spiral Memory tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing Spiral Memory SurrealDB schema");

    init_kv_table(db).await?;
    init_lease_table(db).await?;

    info!("Spiral Memory schema initialization complete");
    Ok(())
}

/// Initialize `kv` table
///
/// Schema:
/// ```text
/// TABLE kv {
///   key:        STRING (unique, prefix-scanned)
///   payload:    STRING (JSON-encoded snapshot)
///   updated_at: DATETIME
/// }
/// ```
async fn init_kv_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing kv table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS kv SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS key ON TABLE kv TYPE string;
        DEFINE FIELD IF NOT EXISTS payload ON TABLE kv TYPE string;
        DEFINE FIELD IF NOT EXISTS updated_at ON TABLE kv TYPE datetime;
        DEFINE INDEX IF NOT EXISTS idx_kv_key ON TABLE kv COLUMNS key UNIQUE;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;

    debug!("kv table initialized");
    Ok(())
}

/// Initialize `lease` table
///
/// Schema:
/// ```text
/// TABLE lease {
///   key:           STRING (unique)
///   holder:        STRING
///   expires_at_ms: INT (unix millis, holder's clock)
/// }
/// ```
async fn init_lease_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing lease table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS lease SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS key ON TABLE lease TYPE string;
        DEFINE FIELD IF NOT EXISTS holder ON TABLE lease TYPE string;
        DEFINE FIELD IF NOT EXISTS expires_at_ms ON TABLE lease TYPE int;
        DEFINE INDEX IF NOT EXISTS idx_lease_key ON TABLE lease COLUMNS key UNIQUE;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;

    debug!("lease table initialized");
    Ok(())
}

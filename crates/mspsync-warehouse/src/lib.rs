//! # mspsync Warehouse
//!
//! DuckDB-backed persistence for the mspsync integration engine.
//!
//! ## Overview
//!
//! The warehouse owns every durable table the sync engine touches:
//!
//! - integration connections and their encrypted credential blobs
//! - canonical PSA/RMM records synchronized from upstream platforms
//! - the external identity map that ties provider ids to local ids
//! - the audit log and per-connection sync leases
//!
//! Every write goes through a short transaction and all caller-provided values
//! are bound as query parameters.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `organizations` | Local owning entities |
//! | `integration_connections` | Connection settings and last-sync outcome |
//! | `psa_companies` / `psa_contacts` / `psa_tickets` | Canonical PSA records |
//! | `rmm_devices` / `rmm_alerts` / `rmm_software` | Canonical RMM records |
//! | `external_identity_map` | (connection, external type, external id) → local record |
//! | `audit_log` | Append-only audit events |
//! | `sync_leases` | Per-connection sync mutual exclusion |

pub mod audit;
pub mod connections;
pub mod duckdb;
pub mod identity;
pub mod leases;
pub mod migrations;
pub mod organizations;
pub mod records;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub use audit::AuditEntry;
pub use connections::{ConnectionRecord, EntityToggles, NewConnection, SyncOutcomeUpdate};
pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use identity::{IdentityKey, IdentityMapping, ORGANIZATION_EXTERNAL_TYPE, ORGANIZATION_LOCAL_TYPE};
pub use organizations::Organization;
pub use records::{
    AlertRow, CompanyRow, ContactRow, DeviceRow, LocalRecord, MappedDevice, RecordKind, RecordLinks,
    SoftwareRow, TicketRow, UpsertOutcome,
};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Lookup by primary key found nothing.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A guarded write lost a race with another writer.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Stored data failed to decode.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for mspsync data.
    pub mspsync_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::in_home(resolve_mspsync_home())
    }
}

impl WarehouseConfig {
    /// Configuration rooted at an explicit home directory.
    pub fn in_home(mspsync_home: impl Into<PathBuf>) -> Self {
        let mspsync_home = mspsync_home.into();
        let db_path = mspsync_home.join("data").join("mspsync.duckdb");
        Self {
            mspsync_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// The main warehouse handle. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Run `work` inside one transaction, committing on success and rolling
    /// back on any error.
    pub(crate) fn write<T>(
        &self,
        work: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = work(&connection);
        finalize_transaction(&connection, result)
    }

    pub(crate) fn read<T>(
        &self,
        work: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let connection = self.manager.acquire()?;
        work(&connection)
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Current UTC time as an RFC3339 string, the storage format for timestamps.
pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub(crate) fn format_rfc3339(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

pub(crate) fn parse_rfc3339(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

/// Resolve the mspsync home directory from environment or default.
fn resolve_mspsync_home() -> PathBuf {
    if let Some(path) = env::var_os("MSPSYNC_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".mspsync");
    }

    PathBuf::from(".mspsync")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    pub fn open_temp() -> (TempDir, Warehouse) {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse =
            Warehouse::open(WarehouseConfig::in_home(temp.path().join("home"))).expect("open");
        (temp, warehouse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn initializes_schema_in_fresh_home() {
        let temp = tempdir().expect("tempdir");
        let config = WarehouseConfig::in_home(temp.path().join("mspsync-home"));
        let warehouse = Warehouse::open(config).expect("warehouse open");

        let count: i64 = warehouse
            .read(|connection| {
                Ok(connection.query_row(
                    "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'external_identity_map'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .expect("query");
        assert_eq!(count, 1);
        assert!(warehouse.db_path().ends_with("data/mspsync.duckdb"));
    }

    #[test]
    fn reopening_an_existing_database_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let config = WarehouseConfig::in_home(temp.path().join("home"));
        drop(Warehouse::open(config.clone()).expect("first open"));
        let warehouse = Warehouse::open(config).expect("second open");
        warehouse.initialize().expect("re-initialize");
    }

    #[test]
    fn failed_write_rolls_back() {
        let (_temp, warehouse) = test_support::open_temp();
        let result: Result<(), WarehouseError> = warehouse.write(|connection| {
            connection.execute(
                "INSERT INTO organizations (name, created_at) VALUES (?, ?)",
                ::duckdb::params!["Rollback Co", "2024-01-01T00:00:00Z"],
            )?;
            Err(WarehouseError::Conflict(String::from("forced")))
        });
        assert!(result.is_err());
        assert!(warehouse.list_organizations().expect("list").is_empty());
    }
}

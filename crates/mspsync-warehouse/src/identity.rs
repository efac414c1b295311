//! External identity map.
//!
//! One row per `(connection_id, external_type, external_id)`; the row points at
//! the local record that mirrors the upstream object and carries the hash of
//! the last normalized payload written for it.

use ::duckdb::{params, Connection, Row};
use serde::Serialize;

use crate::connections::no_rows_to_none;
use crate::{now_rfc3339, Warehouse, WarehouseError};

/// External type tag for upstream organization groupings (PSA companies, RMM
/// clients or sites) that operators pin to a local organization.
pub const ORGANIZATION_EXTERNAL_TYPE: &str = "organization";
/// Local type tag of an organization override row.
pub const ORGANIZATION_LOCAL_TYPE: &str = "organization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityKey<'a> {
    pub connection_id: i64,
    pub external_type: &'a str,
    pub external_id: &'a str,
}

impl<'a> IdentityKey<'a> {
    pub const fn new(connection_id: i64, external_type: &'a str, external_id: &'a str) -> Self {
        Self {
            connection_id,
            external_type,
            external_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityMapping {
    pub connection_id: i64,
    pub external_type: String,
    pub external_id: String,
    pub local_type: String,
    pub local_id: i64,
    pub last_synced_at: String,
    pub sync_hash: Option<String>,
}

const SELECT_COLUMNS: &str =
    "connection_id, external_type, external_id, local_type, local_id, last_synced_at, sync_hash";

impl Warehouse {
    pub fn lookup_mapping(
        &self,
        key: IdentityKey<'_>,
    ) -> Result<Option<IdentityMapping>, WarehouseError> {
        self.read(|db| find_mapping(db, key))
    }

    /// Local id mapped to an external object, if the object has been synced.
    pub fn resolve_local_id(&self, key: IdentityKey<'_>) -> Result<Option<i64>, WarehouseError> {
        Ok(self.lookup_mapping(key)?.map(|mapping| mapping.local_id))
    }

    pub fn list_mappings(
        &self,
        connection_id: i64,
        external_type: Option<&str>,
    ) -> Result<Vec<IdentityMapping>, WarehouseError> {
        self.read(|db| {
            let mappings = match external_type {
                Some(external_type) => {
                    let sql = format!(
                        "SELECT {SELECT_COLUMNS} FROM external_identity_map \
                         WHERE connection_id = ? AND external_type = ? ORDER BY external_id"
                    );
                    let mut statement = db.prepare(&sql)?;
                    let rows =
                        statement.query_map(params![connection_id, external_type], read_mapping)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!(
                        "SELECT {SELECT_COLUMNS} FROM external_identity_map \
                         WHERE connection_id = ? ORDER BY external_type, external_id"
                    );
                    let mut statement = db.prepare(&sql)?;
                    let rows = statement.query_map(params![connection_id], read_mapping)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(mappings)
        })
    }

    pub fn count_mappings(
        &self,
        connection_id: i64,
        external_type: &str,
    ) -> Result<i64, WarehouseError> {
        self.read(|db| {
            Ok(db.query_row(
                "SELECT COUNT(*) FROM external_identity_map WHERE connection_id = ? AND external_type = ?",
                params![connection_id, external_type],
                |row| row.get(0),
            )?)
        })
    }

    /// Pin an upstream organization grouping to a local organization.
    ///
    /// The organization must exist; the pin replaces any earlier one.
    pub fn pin_organization(
        &self,
        connection_id: i64,
        external_id: &str,
        organization_id: i64,
    ) -> Result<IdentityMapping, WarehouseError> {
        self.write(|db| {
            let exists: i64 = db.query_row(
                "SELECT COUNT(*) FROM organizations WHERE id = ?",
                params![organization_id],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(WarehouseError::NotFound {
                    entity: "organization",
                    id: organization_id.to_string(),
                });
            }

            let mapping = IdentityMapping {
                connection_id,
                external_type: ORGANIZATION_EXTERNAL_TYPE.to_owned(),
                external_id: external_id.to_owned(),
                local_type: ORGANIZATION_LOCAL_TYPE.to_owned(),
                local_id: organization_id,
                last_synced_at: now_rfc3339(),
                sync_hash: None,
            };
            save_mapping(db, &mapping)?;
            Ok(mapping)
        })
    }

    /// Organization an operator pinned for an upstream grouping, if any.
    pub fn organization_override(
        &self,
        connection_id: i64,
        external_id: &str,
    ) -> Result<Option<i64>, WarehouseError> {
        let key = IdentityKey::new(connection_id, ORGANIZATION_EXTERNAL_TYPE, external_id);
        Ok(self
            .lookup_mapping(key)?
            .filter(|mapping| mapping.local_type == ORGANIZATION_LOCAL_TYPE)
            .map(|mapping| mapping.local_id))
    }
}

pub(crate) fn find_mapping(
    db: &Connection,
    key: IdentityKey<'_>,
) -> Result<Option<IdentityMapping>, WarehouseError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM external_identity_map \
         WHERE connection_id = ? AND external_type = ? AND external_id = ?"
    );
    Ok(db
        .query_row(
            &sql,
            params![key.connection_id, key.external_type, key.external_id],
            read_mapping,
        )
        .map(Some)
        .or_else(no_rows_to_none)?)
}

/// Insert or refresh a mapping row. Key columns are never updated in place.
pub(crate) fn save_mapping(db: &Connection, mapping: &IdentityMapping) -> Result<(), WarehouseError> {
    let key = IdentityKey::new(
        mapping.connection_id,
        &mapping.external_type,
        &mapping.external_id,
    );
    if find_mapping(db, key)?.is_some() {
        db.execute(
            "UPDATE external_identity_map SET local_type = ?, local_id = ?, last_synced_at = ?, \
             sync_hash = ? WHERE connection_id = ? AND external_type = ? AND external_id = ?",
            params![
                mapping.local_type,
                mapping.local_id,
                mapping.last_synced_at,
                mapping.sync_hash,
                mapping.connection_id,
                mapping.external_type,
                mapping.external_id
            ],
        )?;
    } else {
        db.execute(
            "INSERT INTO external_identity_map \
             (connection_id, external_type, external_id, local_type, local_id, last_synced_at, sync_hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                mapping.connection_id,
                mapping.external_type,
                mapping.external_id,
                mapping.local_type,
                mapping.local_id,
                mapping.last_synced_at,
                mapping.sync_hash
            ],
        )?;
    }
    Ok(())
}

pub(crate) fn touch_mapping(
    db: &Connection,
    key: IdentityKey<'_>,
    synced_at: &str,
) -> Result<(), WarehouseError> {
    db.execute(
        "UPDATE external_identity_map SET last_synced_at = ? \
         WHERE connection_id = ? AND external_type = ? AND external_id = ?",
        params![synced_at, key.connection_id, key.external_type, key.external_id],
    )?;
    Ok(())
}

fn read_mapping(row: &Row<'_>) -> Result<IdentityMapping, ::duckdb::Error> {
    Ok(IdentityMapping {
        connection_id: row.get(0)?,
        external_type: row.get(1)?,
        external_id: row.get(2)?,
        local_type: row.get(3)?,
        local_id: row.get(4)?,
        last_synced_at: row.get(5)?,
        sync_hash: row.get(6)?,
    })
}

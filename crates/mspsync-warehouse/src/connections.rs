//! Integration connection storage.
//!
//! The `credentials` column holds a JSON object whose values are individually
//! encrypted; this crate never sees plaintext and never decodes the values.

use std::fmt::{Debug, Formatter};

use ::duckdb::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::{now_rfc3339, parse_rfc3339, Warehouse, WarehouseError};

/// Per-entity sync switches of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityToggles {
    pub companies: bool,
    pub contacts: bool,
    pub tickets: bool,
    pub devices: bool,
    pub alerts: bool,
    pub software: bool,
}

/// Insert payload for a new connection. `credentials` must already be encrypted.
#[derive(Clone)]
pub struct NewConnection {
    pub provider_type: String,
    pub name: String,
    pub base_url: String,
    pub credentials: String,
    pub toggles: EntityToggles,
    pub sync_interval_minutes: i64,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub organization_id: Option<i64>,
    pub import_organizations: bool,
    pub organization_prefix: Option<String>,
}

impl Debug for NewConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewConnection")
            .field("provider_type", &self.provider_type)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("credentials", &"<encrypted>")
            .finish_non_exhaustive()
    }
}

/// A stored integration connection.
#[derive(Clone, Serialize)]
pub struct ConnectionRecord {
    pub id: i64,
    pub provider_type: String,
    pub name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub credentials: String,
    pub toggles: EntityToggles,
    pub sync_interval_minutes: i64,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub organization_id: Option<i64>,
    pub import_organizations: bool,
    pub organization_prefix: Option<String>,
    pub last_sync_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_sync_status: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Debug for ConnectionRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("provider_type", &self.provider_type)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("credentials", &"<encrypted>")
            .field("last_sync_at", &self.last_sync_at)
            .field("last_sync_status", &self.last_sync_status)
            .finish_non_exhaustive()
    }
}

/// Outcome of one sync run, written back onto the connection row.
#[derive(Debug, Clone, Copy)]
pub struct SyncOutcomeUpdate<'a> {
    /// Start time of a run that fetched records. Becomes `last_success_at` on
    /// success, so records edited upstream mid-run stay newer than it. `None`
    /// for runs that fetched nothing.
    pub watermark: Option<&'a str>,
    pub finished_at: &'a str,
    pub status: &'a str,
    pub error: Option<&'a str>,
}

const SELECT_COLUMNS: &str = "id, provider_type, name, base_url, credentials, \
    sync_companies, sync_contacts, sync_tickets, sync_devices, sync_alerts, sync_software, \
    sync_interval_minutes, is_active, sync_enabled, organization_id, import_organizations, \
    organization_prefix, last_sync_at, last_success_at, last_sync_status, last_error, \
    created_at, updated_at";

impl Warehouse {
    /// Insert a connection and return its id.
    pub fn insert_connection(&self, connection: &NewConnection) -> Result<i64, WarehouseError> {
        let now = now_rfc3339();
        self.write(|db| {
            let id = db.query_row(
                "INSERT INTO integration_connections \
                 (provider_type, name, base_url, credentials, sync_companies, sync_contacts, \
                  sync_tickets, sync_devices, sync_alerts, sync_software, sync_interval_minutes, \
                  is_active, sync_enabled, organization_id, import_organizations, \
                  organization_prefix, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
                params![
                    connection.provider_type,
                    connection.name,
                    connection.base_url,
                    connection.credentials,
                    connection.toggles.companies,
                    connection.toggles.contacts,
                    connection.toggles.tickets,
                    connection.toggles.devices,
                    connection.toggles.alerts,
                    connection.toggles.software,
                    connection.sync_interval_minutes,
                    connection.is_active,
                    connection.sync_enabled,
                    connection.organization_id,
                    connection.import_organizations,
                    connection.organization_prefix,
                    now,
                    now,
                ],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(id)
        })
    }

    pub fn get_connection(&self, id: i64) -> Result<ConnectionRecord, WarehouseError> {
        self.read(|db| load_connection(db, id))
    }

    pub fn list_connections(&self) -> Result<Vec<ConnectionRecord>, WarehouseError> {
        self.read(|db| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM integration_connections ORDER BY id");
            let mut statement = db.prepare(&sql)?;
            let rows = statement.query_map([], read_connection)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Persist the outcome of a sync run.
    ///
    /// `last_sync_at` never moves backwards: a finish time older than the stored
    /// one leaves the stored timestamp in place. `last_success_at` only advances
    /// on a successful run that carries a watermark.
    pub fn record_sync_outcome(
        &self,
        id: i64,
        outcome: SyncOutcomeUpdate<'_>,
    ) -> Result<(), WarehouseError> {
        self.write(|db| {
            let current = load_connection(db, id)?;
            let finished_at = later_of(current.last_sync_at.as_deref(), outcome.finished_at);
            let success_at = match outcome.watermark {
                Some(watermark) if outcome.status == "success" => {
                    Some(later_of(current.last_success_at.as_deref(), watermark))
                }
                _ => current.last_success_at.clone(),
            };

            db.execute(
                "UPDATE integration_connections SET last_sync_at = ?, last_success_at = ?, \
                 last_sync_status = ?, last_error = ?, updated_at = ? WHERE id = ?",
                params![
                    finished_at,
                    success_at,
                    outcome.status,
                    outcome.error,
                    now_rfc3339(),
                    id
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_connection_flags(
        &self,
        id: i64,
        is_active: bool,
        sync_enabled: bool,
    ) -> Result<(), WarehouseError> {
        self.write(|db| {
            let updated = db.execute(
                "UPDATE integration_connections SET is_active = ?, sync_enabled = ?, updated_at = ? \
                 WHERE id = ?",
                params![is_active, sync_enabled, now_rfc3339(), id],
            )?;
            if updated == 0 {
                return Err(not_found(id));
            }
            Ok(())
        })
    }

    /// Every connection's encrypted credential blob, keyed by connection id.
    pub fn list_credential_blobs(&self) -> Result<Vec<(i64, String)>, WarehouseError> {
        self.read(|db| {
            let mut statement =
                db.prepare("SELECT id, credentials FROM integration_connections ORDER BY id")?;
            let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Swap a credential blob in its own transaction, only if it still holds
    /// `previous`.
    pub fn replace_credentials(
        &self,
        id: i64,
        previous: &str,
        replacement: &str,
    ) -> Result<(), WarehouseError> {
        self.write(|db| {
            let stored: Option<String> = db
                .query_row(
                    "SELECT credentials FROM integration_connections WHERE id = ?",
                    params![id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(no_rows_to_none)?;

            match stored {
                None => Err(not_found(id)),
                Some(stored) if stored != previous => Err(WarehouseError::Conflict(format!(
                    "credentials of connection {id} changed during rotation"
                ))),
                Some(_) => {
                    db.execute(
                        "UPDATE integration_connections SET credentials = ?, updated_at = ? WHERE id = ?",
                        params![replacement, now_rfc3339(), id],
                    )?;
                    Ok(())
                }
            }
        })
    }
}

fn load_connection(db: &Connection, id: i64) -> Result<ConnectionRecord, WarehouseError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM integration_connections WHERE id = ?");
    db.query_row(&sql, params![id], read_connection)
        .map(Some)
        .or_else(no_rows_to_none)?
        .ok_or_else(|| not_found(id))
}

fn read_connection(row: &Row<'_>) -> Result<ConnectionRecord, ::duckdb::Error> {
    Ok(ConnectionRecord {
        id: row.get(0)?,
        provider_type: row.get(1)?,
        name: row.get(2)?,
        base_url: row.get(3)?,
        credentials: row.get(4)?,
        toggles: EntityToggles {
            companies: row.get(5)?,
            contacts: row.get(6)?,
            tickets: row.get(7)?,
            devices: row.get(8)?,
            alerts: row.get(9)?,
            software: row.get(10)?,
        },
        sync_interval_minutes: row.get(11)?,
        is_active: row.get(12)?,
        sync_enabled: row.get(13)?,
        organization_id: row.get(14)?,
        import_organizations: row.get(15)?,
        organization_prefix: row.get(16)?,
        last_sync_at: row.get(17)?,
        last_success_at: row.get(18)?,
        last_sync_status: row.get(19)?,
        last_error: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
    })
}

fn later_of(stored: Option<&str>, candidate: &str) -> String {
    match stored {
        Some(stored) => match (parse_rfc3339(stored), parse_rfc3339(candidate)) {
            (Some(previous), Some(next)) if previous > next => stored.to_owned(),
            _ => candidate.to_owned(),
        },
        None => candidate.to_owned(),
    }
}

fn not_found(id: i64) -> WarehouseError {
    WarehouseError::NotFound {
        entity: "connection",
        id: id.to_string(),
    }
}

pub(crate) fn no_rows_to_none<T>(error: ::duckdb::Error) -> Result<Option<T>, ::duckdb::Error> {
    match error {
        ::duckdb::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn new_connection(provider_type: &str) -> NewConnection {
        NewConnection {
            provider_type: provider_type.to_owned(),
            name: String::from("Primary PSA"),
            base_url: String::from("https://psa.example.test"),
            credentials: String::from(r#"{"api_key":"c2VhbGVk"}"#),
            toggles: EntityToggles {
                companies: true,
                contacts: true,
                tickets: true,
                ..EntityToggles::default()
            },
            sync_interval_minutes: 60,
            is_active: true,
            sync_enabled: true,
            organization_id: None,
            import_organizations: false,
            organization_prefix: None,
        }
    }
}

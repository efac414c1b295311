//! Canonical record tables and the identity-mapped upsert.
//!
//! Cross-record references (`company_id`, `contact_id`, `device_id`) are local
//! ids; callers translate provider ids through the identity map first.

use ::duckdb::{params, Connection, Row};
use serde::Serialize;

use crate::connections::no_rows_to_none;
use crate::identity::{find_mapping, save_mapping, touch_mapping};
use crate::{now_rfc3339, IdentityKey, IdentityMapping, Warehouse, WarehouseError};

/// Local record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Company,
    Contact,
    Ticket,
    Device,
    Alert,
    Software,
}

impl RecordKind {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Company => "psa_companies",
            Self::Contact => "psa_contacts",
            Self::Ticket => "psa_tickets",
            Self::Device => "rmm_devices",
            Self::Alert => "rmm_alerts",
            Self::Software => "rmm_software",
        }
    }

    /// Tag used for both the external and local type in the identity map.
    pub const fn type_tag(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Contact => "contact",
            Self::Ticket => "ticket",
            Self::Device => "device",
            Self::Alert => "alert",
            Self::Software => "software",
        }
    }
}

/// Result of an identity-mapped upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Updated(i64),
    Unchanged(i64),
}

impl UpsertOutcome {
    pub const fn local_id(self) -> i64 {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Unchanged(id) => id,
        }
    }
}

/// Local ids a row points at.
///
/// The sync hash covers only the upstream record, so these are compared
/// separately before a row is treated as unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordLinks {
    pub organization_id: Option<i64>,
    pub company_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub device_id: Option<i64>,
}

/// A row type stored in one of the canonical record tables.
pub trait LocalRecord: Sized {
    const KIND: RecordKind;

    fn external_id(&self) -> &str;

    fn links(&self) -> RecordLinks;

    fn insert(&self, db: &Connection, connection_id: i64, now: &str) -> Result<i64, WarehouseError>;

    fn update(&self, db: &Connection, local_id: i64, now: &str) -> Result<(), WarehouseError>;

    fn load(db: &Connection, local_id: i64) -> Result<Option<Self>, WarehouseError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyRow {
    pub external_id: String,
    pub organization_id: Option<i64>,
    pub name: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub raw_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactRow {
    pub external_id: String,
    pub organization_id: Option<i64>,
    pub company_id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub raw_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketRow {
    pub external_id: String,
    pub organization_id: Option<i64>,
    pub company_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub ticket_number: Option<String>,
    pub subject: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub external_created_at: Option<String>,
    pub external_updated_at: Option<String>,
    pub raw_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRow {
    pub external_id: String,
    pub organization_id: Option<i64>,
    pub device_name: String,
    pub device_type: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub os_type: String,
    pub os_version: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub raw_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRow {
    pub external_id: String,
    pub organization_id: Option<i64>,
    pub device_id: Option<i64>,
    pub alert_type: Option<String>,
    pub message: Option<String>,
    pub severity: String,
    pub status: String,
    pub triggered_at: Option<String>,
    pub resolved_at: Option<String>,
    pub raw_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftwareRow {
    pub external_id: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub vendor: Option<String>,
    pub install_date: Option<String>,
    pub raw_data: String,
}

/// A device known locally, with the upstream id needed to fetch its software.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedDevice {
    pub local_id: i64,
    pub external_id: String,
    pub organization_id: Option<i64>,
}

impl Warehouse {
    /// Create or overwrite the local record for `record`'s external id and
    /// point the identity map at it, all in one transaction.
    ///
    /// With `skip_unchanged`, a record whose hash matches the stored mapping
    /// and whose resolved links match the stored row only refreshes the
    /// mapping timestamp.
    pub fn upsert_record<R: LocalRecord>(
        &self,
        connection_id: i64,
        record: &R,
        sync_hash: &str,
        skip_unchanged: bool,
    ) -> Result<UpsertOutcome, WarehouseError> {
        let tag = R::KIND.type_tag();
        let now = now_rfc3339();
        self.write(|db| {
            let key = IdentityKey::new(connection_id, tag, record.external_id());
            let mapped = match find_mapping(db, key)?.filter(|mapping| mapping.local_type == tag) {
                Some(mapping) if row_exists(db, R::KIND, mapping.local_id)? => Some(mapping),
                _ => None,
            };

            if let Some(mapping) = &mapped {
                if skip_unchanged
                    && mapping.sync_hash.as_deref() == Some(sync_hash)
                    && R::load(db, mapping.local_id)?.is_some_and(|stored| stored.links() == record.links())
                {
                    touch_mapping(db, key, &now)?;
                    return Ok(UpsertOutcome::Unchanged(mapping.local_id));
                }
            }

            let outcome = match mapped {
                Some(mapping) => {
                    record.update(db, mapping.local_id, &now)?;
                    UpsertOutcome::Updated(mapping.local_id)
                }
                None => match find_local_id(db, R::KIND, connection_id, record.external_id())? {
                    // Local row survived a lost mapping; adopt it instead of duplicating.
                    Some(local_id) => {
                        record.update(db, local_id, &now)?;
                        UpsertOutcome::Updated(local_id)
                    }
                    None => UpsertOutcome::Created(record.insert(db, connection_id, &now)?),
                },
            };

            save_mapping(
                db,
                &IdentityMapping {
                    connection_id,
                    external_type: tag.to_owned(),
                    external_id: record.external_id().to_owned(),
                    local_type: tag.to_owned(),
                    local_id: outcome.local_id(),
                    last_synced_at: now.clone(),
                    sync_hash: Some(sync_hash.to_owned()),
                },
            )?;
            Ok(outcome)
        })
    }

    pub fn load_record<R: LocalRecord>(&self, local_id: i64) -> Result<Option<R>, WarehouseError> {
        self.read(|db| R::load(db, local_id))
    }

    /// Organization a local record was attached to.
    pub fn record_organization(
        &self,
        kind: RecordKind,
        local_id: i64,
    ) -> Result<Option<i64>, WarehouseError> {
        self.read(|db| {
            let sql = format!("SELECT organization_id FROM {} WHERE id = ?", kind.table());
            Ok(db
                .query_row(&sql, params![local_id], |row| row.get::<_, Option<i64>>(0))
                .map(Some)
                .or_else(no_rows_to_none)?
                .flatten())
        })
    }

    pub fn count_records(&self, kind: RecordKind, connection_id: i64) -> Result<i64, WarehouseError> {
        self.read(|db| {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE connection_id = ?", kind.table());
            Ok(db.query_row(&sql, params![connection_id], |row| row.get(0))?)
        })
    }

    pub fn list_mapped_devices(&self, connection_id: i64) -> Result<Vec<MappedDevice>, WarehouseError> {
        self.read(|db| {
            let mut statement = db.prepare(
                "SELECT d.id, m.external_id, d.organization_id \
                 FROM external_identity_map m JOIN rmm_devices d ON d.id = m.local_id \
                 WHERE m.connection_id = ? AND m.external_type = 'device' AND m.local_type = 'device' \
                 ORDER BY d.id",
            )?;
            let rows = statement.query_map(params![connection_id], |row| {
                Ok(MappedDevice {
                    local_id: row.get(0)?,
                    external_id: row.get(1)?,
                    organization_id: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Replace a device's software inventory with `items` in one transaction.
    pub fn replace_device_software(
        &self,
        connection_id: i64,
        device: &MappedDevice,
        items: &[SoftwareRow],
    ) -> Result<usize, WarehouseError> {
        let now = now_rfc3339();
        self.write(|db| {
            db.execute(
                "DELETE FROM rmm_software WHERE connection_id = ? AND device_id = ?",
                params![connection_id, device.local_id],
            )?;
            for item in items {
                db.execute(
                    "INSERT INTO rmm_software \
                     (connection_id, device_id, organization_id, external_id, name, version, vendor, \
                      install_date, raw_data, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        connection_id,
                        device.local_id,
                        device.organization_id,
                        item.external_id,
                        item.name,
                        item.version,
                        item.vendor,
                        item.install_date,
                        item.raw_data,
                        now
                    ],
                )?;
            }
            Ok(items.len())
        })
    }

    pub fn list_device_software(&self, device_id: i64) -> Result<Vec<SoftwareRow>, WarehouseError> {
        self.read(|db| {
            let mut statement = db.prepare(
                "SELECT external_id, name, version, vendor, install_date, raw_data \
                 FROM rmm_software WHERE device_id = ? ORDER BY name, id",
            )?;
            let rows = statement.query_map(params![device_id], |row| {
                Ok(SoftwareRow {
                    external_id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    vendor: row.get(3)?,
                    install_date: row.get(4)?,
                    raw_data: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn row_exists(db: &Connection, kind: RecordKind, local_id: i64) -> Result<bool, WarehouseError> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", kind.table());
    let count: i64 = db.query_row(&sql, params![local_id], |row| row.get(0))?;
    Ok(count > 0)
}

fn find_local_id(
    db: &Connection,
    kind: RecordKind,
    connection_id: i64,
    external_id: &str,
) -> Result<Option<i64>, WarehouseError> {
    let sql = format!(
        "SELECT id FROM {} WHERE connection_id = ? AND external_id = ?",
        kind.table()
    );
    Ok(db
        .query_row(&sql, params![connection_id, external_id], |row| row.get(0))
        .map(Some)
        .or_else(no_rows_to_none)?)
}

fn load_one<R>(
    db: &Connection,
    sql: &str,
    local_id: i64,
    read: impl FnOnce(&Row<'_>) -> Result<R, ::duckdb::Error>,
) -> Result<Option<R>, WarehouseError> {
    Ok(db
        .query_row(sql, params![local_id], read)
        .map(Some)
        .or_else(no_rows_to_none)?)
}

impl LocalRecord for CompanyRow {
    const KIND: RecordKind = RecordKind::Company;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn links(&self) -> RecordLinks {
        RecordLinks {
            organization_id: self.organization_id,
            ..RecordLinks::default()
        }
    }

    fn insert(&self, db: &Connection, connection_id: i64, now: &str) -> Result<i64, WarehouseError> {
        Ok(db.query_row(
            "INSERT INTO psa_companies \
             (connection_id, external_id, organization_id, name, phone, website, address, raw_data, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                connection_id,
                self.external_id,
                self.organization_id,
                self.name,
                self.phone,
                self.website,
                self.address,
                self.raw_data,
                now,
                now
            ],
            |row| row.get(0),
        )?)
    }

    fn update(&self, db: &Connection, local_id: i64, now: &str) -> Result<(), WarehouseError> {
        db.execute(
            "UPDATE psa_companies SET organization_id = ?, name = ?, phone = ?, website = ?, \
             address = ?, raw_data = ?, updated_at = ? WHERE id = ?",
            params![
                self.organization_id,
                self.name,
                self.phone,
                self.website,
                self.address,
                self.raw_data,
                now,
                local_id
            ],
        )?;
        Ok(())
    }

    fn load(db: &Connection, local_id: i64) -> Result<Option<Self>, WarehouseError> {
        load_one(
            db,
            "SELECT external_id, organization_id, name, phone, website, address, raw_data \
             FROM psa_companies WHERE id = ?",
            local_id,
            |row| {
                Ok(Self {
                    external_id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                    phone: row.get(3)?,
                    website: row.get(4)?,
                    address: row.get(5)?,
                    raw_data: row.get(6)?,
                })
            },
        )
    }
}

impl LocalRecord for ContactRow {
    const KIND: RecordKind = RecordKind::Contact;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn links(&self) -> RecordLinks {
        RecordLinks {
            organization_id: self.organization_id,
            company_id: self.company_id,
            ..RecordLinks::default()
        }
    }

    fn insert(&self, db: &Connection, connection_id: i64, now: &str) -> Result<i64, WarehouseError> {
        Ok(db.query_row(
            "INSERT INTO psa_contacts \
             (connection_id, external_id, organization_id, company_id, first_name, last_name, email, \
              phone, title, raw_data, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                connection_id,
                self.external_id,
                self.organization_id,
                self.company_id,
                self.first_name,
                self.last_name,
                self.email,
                self.phone,
                self.title,
                self.raw_data,
                now,
                now
            ],
            |row| row.get(0),
        )?)
    }

    fn update(&self, db: &Connection, local_id: i64, now: &str) -> Result<(), WarehouseError> {
        db.execute(
            "UPDATE psa_contacts SET organization_id = ?, company_id = ?, first_name = ?, \
             last_name = ?, email = ?, phone = ?, title = ?, raw_data = ?, updated_at = ? WHERE id = ?",
            params![
                self.organization_id,
                self.company_id,
                self.first_name,
                self.last_name,
                self.email,
                self.phone,
                self.title,
                self.raw_data,
                now,
                local_id
            ],
        )?;
        Ok(())
    }

    fn load(db: &Connection, local_id: i64) -> Result<Option<Self>, WarehouseError> {
        load_one(
            db,
            "SELECT external_id, organization_id, company_id, first_name, last_name, email, phone, \
             title, raw_data FROM psa_contacts WHERE id = ?",
            local_id,
            |row| {
                Ok(Self {
                    external_id: row.get(0)?,
                    organization_id: row.get(1)?,
                    company_id: row.get(2)?,
                    first_name: row.get(3)?,
                    last_name: row.get(4)?,
                    email: row.get(5)?,
                    phone: row.get(6)?,
                    title: row.get(7)?,
                    raw_data: row.get(8)?,
                })
            },
        )
    }
}

impl LocalRecord for TicketRow {
    const KIND: RecordKind = RecordKind::Ticket;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn links(&self) -> RecordLinks {
        RecordLinks {
            organization_id: self.organization_id,
            company_id: self.company_id,
            contact_id: self.contact_id,
            device_id: None,
        }
    }

    fn insert(&self, db: &Connection, connection_id: i64, now: &str) -> Result<i64, WarehouseError> {
        Ok(db.query_row(
            "INSERT INTO psa_tickets \
             (connection_id, external_id, organization_id, company_id, contact_id, ticket_number, \
              subject, description, status, priority, external_created_at, external_updated_at, \
              raw_data, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                connection_id,
                self.external_id,
                self.organization_id,
                self.company_id,
                self.contact_id,
                self.ticket_number,
                self.subject,
                self.description,
                self.status,
                self.priority,
                self.external_created_at,
                self.external_updated_at,
                self.raw_data,
                now,
                now
            ],
            |row| row.get(0),
        )?)
    }

    fn update(&self, db: &Connection, local_id: i64, now: &str) -> Result<(), WarehouseError> {
        db.execute(
            "UPDATE psa_tickets SET organization_id = ?, company_id = ?, contact_id = ?, \
             ticket_number = ?, subject = ?, description = ?, status = ?, priority = ?, \
             external_created_at = ?, external_updated_at = ?, raw_data = ?, updated_at = ? \
             WHERE id = ?",
            params![
                self.organization_id,
                self.company_id,
                self.contact_id,
                self.ticket_number,
                self.subject,
                self.description,
                self.status,
                self.priority,
                self.external_created_at,
                self.external_updated_at,
                self.raw_data,
                now,
                local_id
            ],
        )?;
        Ok(())
    }

    fn load(db: &Connection, local_id: i64) -> Result<Option<Self>, WarehouseError> {
        load_one(
            db,
            "SELECT external_id, organization_id, company_id, contact_id, ticket_number, subject, \
             description, status, priority, external_created_at, external_updated_at, raw_data \
             FROM psa_tickets WHERE id = ?",
            local_id,
            |row| {
                Ok(Self {
                    external_id: row.get(0)?,
                    organization_id: row.get(1)?,
                    company_id: row.get(2)?,
                    contact_id: row.get(3)?,
                    ticket_number: row.get(4)?,
                    subject: row.get(5)?,
                    description: row.get(6)?,
                    status: row.get(7)?,
                    priority: row.get(8)?,
                    external_created_at: row.get(9)?,
                    external_updated_at: row.get(10)?,
                    raw_data: row.get(11)?,
                })
            },
        )
    }
}

impl LocalRecord for DeviceRow {
    const KIND: RecordKind = RecordKind::Device;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn links(&self) -> RecordLinks {
        RecordLinks {
            organization_id: self.organization_id,
            ..RecordLinks::default()
        }
    }

    fn insert(&self, db: &Connection, connection_id: i64, now: &str) -> Result<i64, WarehouseError> {
        Ok(db.query_row(
            "INSERT INTO rmm_devices \
             (connection_id, external_id, organization_id, device_name, device_type, manufacturer, \
              model, serial_number, os_type, os_version, hostname, ip_address, mac_address, \
              is_online, last_seen, raw_data, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                connection_id,
                self.external_id,
                self.organization_id,
                self.device_name,
                self.device_type,
                self.manufacturer,
                self.model,
                self.serial_number,
                self.os_type,
                self.os_version,
                self.hostname,
                self.ip_address,
                self.mac_address,
                self.is_online,
                self.last_seen,
                self.raw_data,
                now,
                now
            ],
            |row| row.get(0),
        )?)
    }

    fn update(&self, db: &Connection, local_id: i64, now: &str) -> Result<(), WarehouseError> {
        db.execute(
            "UPDATE rmm_devices SET organization_id = ?, device_name = ?, device_type = ?, \
             manufacturer = ?, model = ?, serial_number = ?, os_type = ?, os_version = ?, \
             hostname = ?, ip_address = ?, mac_address = ?, is_online = ?, last_seen = ?, \
             raw_data = ?, updated_at = ? WHERE id = ?",
            params![
                self.organization_id,
                self.device_name,
                self.device_type,
                self.manufacturer,
                self.model,
                self.serial_number,
                self.os_type,
                self.os_version,
                self.hostname,
                self.ip_address,
                self.mac_address,
                self.is_online,
                self.last_seen,
                self.raw_data,
                now,
                local_id
            ],
        )?;
        Ok(())
    }

    fn load(db: &Connection, local_id: i64) -> Result<Option<Self>, WarehouseError> {
        load_one(
            db,
            "SELECT external_id, organization_id, device_name, device_type, manufacturer, model, \
             serial_number, os_type, os_version, hostname, ip_address, mac_address, is_online, \
             last_seen, raw_data FROM rmm_devices WHERE id = ?",
            local_id,
            |row| {
                Ok(Self {
                    external_id: row.get(0)?,
                    organization_id: row.get(1)?,
                    device_name: row.get(2)?,
                    device_type: row.get(3)?,
                    manufacturer: row.get(4)?,
                    model: row.get(5)?,
                    serial_number: row.get(6)?,
                    os_type: row.get(7)?,
                    os_version: row.get(8)?,
                    hostname: row.get(9)?,
                    ip_address: row.get(10)?,
                    mac_address: row.get(11)?,
                    is_online: row.get(12)?,
                    last_seen: row.get(13)?,
                    raw_data: row.get(14)?,
                })
            },
        )
    }
}

impl LocalRecord for AlertRow {
    const KIND: RecordKind = RecordKind::Alert;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn links(&self) -> RecordLinks {
        RecordLinks {
            organization_id: self.organization_id,
            device_id: self.device_id,
            ..RecordLinks::default()
        }
    }

    fn insert(&self, db: &Connection, connection_id: i64, now: &str) -> Result<i64, WarehouseError> {
        Ok(db.query_row(
            "INSERT INTO rmm_alerts \
             (connection_id, external_id, organization_id, device_id, alert_type, message, severity, \
              status, triggered_at, resolved_at, raw_data, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                connection_id,
                self.external_id,
                self.organization_id,
                self.device_id,
                self.alert_type,
                self.message,
                self.severity,
                self.status,
                self.triggered_at,
                self.resolved_at,
                self.raw_data,
                now,
                now
            ],
            |row| row.get(0),
        )?)
    }

    fn update(&self, db: &Connection, local_id: i64, now: &str) -> Result<(), WarehouseError> {
        db.execute(
            "UPDATE rmm_alerts SET organization_id = ?, device_id = ?, alert_type = ?, message = ?, \
             severity = ?, status = ?, triggered_at = ?, resolved_at = ?, raw_data = ?, \
             updated_at = ? WHERE id = ?",
            params![
                self.organization_id,
                self.device_id,
                self.alert_type,
                self.message,
                self.severity,
                self.status,
                self.triggered_at,
                self.resolved_at,
                self.raw_data,
                now,
                local_id
            ],
        )?;
        Ok(())
    }

    fn load(db: &Connection, local_id: i64) -> Result<Option<Self>, WarehouseError> {
        load_one(
            db,
            "SELECT external_id, organization_id, device_id, alert_type, message, severity, status, \
             triggered_at, resolved_at, raw_data FROM rmm_alerts WHERE id = ?",
            local_id,
            |row| {
                Ok(Self {
                    external_id: row.get(0)?,
                    organization_id: row.get(1)?,
                    device_id: row.get(2)?,
                    alert_type: row.get(3)?,
                    message: row.get(4)?,
                    severity: row.get(5)?,
                    status: row.get(6)?,
                    triggered_at: row.get(7)?,
                    resolved_at: row.get(8)?,
                    raw_data: row.get(9)?,
                })
            },
        )
    }
}

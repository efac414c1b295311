//! Append-only audit log.

use ::duckdb::params;
use serde::Serialize;

use crate::{Warehouse, WarehouseError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
    pub success: bool,
    pub created_at: String,
}

impl Warehouse {
    pub fn append_audit(&self, entry: &AuditEntry) -> Result<(), WarehouseError> {
        self.write(|db| {
            db.execute(
                "INSERT INTO audit_log \
                 (id, actor, action, resource_type, resource_id, description, success, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id,
                    entry.actor,
                    entry.action,
                    entry.resource_type,
                    entry.resource_id,
                    entry.description,
                    entry.success,
                    entry.created_at
                ],
            )?;
            Ok(())
        })
    }

    /// Most recent entries for one resource, newest first.
    pub fn list_audit(
        &self,
        resource_type: &str,
        resource_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, WarehouseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(|db| {
            let mut statement = db.prepare(
                "SELECT id, actor, action, resource_type, resource_id, description, success, created_at \
                 FROM audit_log WHERE resource_type = ? AND resource_id = ? \
                 ORDER BY created_at DESC, id LIMIT ?",
            )?;
            let rows = statement.query_map(params![resource_type, resource_id, limit], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    actor: row.get(1)?,
                    action: row.get(2)?,
                    resource_type: row.get(3)?,
                    resource_id: row.get(4)?,
                    description: row.get(5)?,
                    success: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

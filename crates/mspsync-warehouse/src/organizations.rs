//! Local organizations: the owning entities synced records attach to.

use ::duckdb::{params, Connection};
use serde::Serialize;

use crate::connections::no_rows_to_none;
use crate::{now_rfc3339, Warehouse, WarehouseError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

impl Warehouse {
    /// Create an organization; names are unique.
    pub fn create_organization(&self, name: &str) -> Result<i64, WarehouseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WarehouseError::InvalidData(String::from(
                "organization name must not be empty",
            )));
        }
        self.write(|db| {
            if find_by_name(db, name)?.is_some() {
                return Err(WarehouseError::Conflict(format!(
                    "organization '{name}' already exists"
                )));
            }
            insert(db, name)
        })
    }

    /// Look an organization up by exact display name, creating it when absent.
    pub fn find_or_create_organization(&self, name: &str) -> Result<i64, WarehouseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WarehouseError::InvalidData(String::from(
                "organization name must not be empty",
            )));
        }
        self.write(|db| match find_by_name(db, name)? {
            Some(id) => Ok(id),
            None => insert(db, name),
        })
    }

    pub fn list_organizations(&self) -> Result<Vec<Organization>, WarehouseError> {
        self.read(|db| {
            let mut statement =
                db.prepare("SELECT id, name, created_at FROM organizations ORDER BY id")?;
            let rows = statement.query_map([], |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn find_by_name(db: &Connection, name: &str) -> Result<Option<i64>, WarehouseError> {
    Ok(db
        .query_row(
            "SELECT id FROM organizations WHERE name = ?",
            params![name],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(no_rows_to_none)?)
}

fn insert(db: &Connection, name: &str) -> Result<i64, WarehouseError> {
    Ok(db.query_row(
        "INSERT INTO organizations (name, created_at) VALUES (?, ?) RETURNING id",
        params![name, now_rfc3339()],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;

    #[test]
    fn find_or_create_reuses_existing_names() {
        let (_temp, warehouse) = open_temp();
        let first = warehouse
            .find_or_create_organization("MSP - Acme")
            .expect("create");
        let again = warehouse
            .find_or_create_organization("  MSP - Acme ")
            .expect("reuse");
        assert_eq!(first, again);
        assert_eq!(warehouse.list_organizations().expect("list").len(), 1);
    }

    #[test]
    fn duplicate_explicit_create_is_a_conflict() {
        let (_temp, warehouse) = open_temp();
        warehouse.create_organization("Acme").expect("create");
        let error = warehouse.create_organization("Acme").expect_err("duplicate");
        assert!(matches!(error, WarehouseError::Conflict(_)));
    }
}

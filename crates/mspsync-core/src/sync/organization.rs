//! Owning-organization resolution for records of one connection.
//!
//! Order: an operator-pinned override for the upstream grouping, then (when
//! the connection imports organizations) a local organization named after the
//! grouping, then the connection's fixed `organization_id`.

use std::collections::HashMap;

use mspsync_warehouse::{ConnectionRecord, Warehouse, WarehouseError};
use tracing::debug;

pub(crate) struct OrganizationResolver<'a> {
    warehouse: &'a Warehouse,
    connection: &'a ConnectionRecord,
    resolved: HashMap<(Option<String>, Option<String>), Option<i64>>,
}

impl<'a> OrganizationResolver<'a> {
    pub(crate) fn new(warehouse: &'a Warehouse, connection: &'a ConnectionRecord) -> Self {
        Self {
            warehouse,
            connection,
            resolved: HashMap::new(),
        }
    }

    pub(crate) fn fallback(&self) -> Option<i64> {
        self.connection.organization_id
    }

    pub(crate) fn resolve(
        &mut self,
        external_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<i64>, WarehouseError> {
        let key = (external_id.map(str::to_owned), name.map(str::to_owned));
        if let Some(organization_id) = self.resolved.get(&key) {
            return Ok(*organization_id);
        }

        let organization_id = self.lookup(external_id, name)?;
        self.resolved.insert(key, organization_id);
        Ok(organization_id)
    }

    fn lookup(&self, external_id: Option<&str>, name: Option<&str>) -> Result<Option<i64>, WarehouseError> {
        if let Some(external_id) = external_id {
            if let Some(pinned) = self.warehouse.organization_override(self.connection.id, external_id)? {
                return Ok(Some(pinned));
            }
        }

        if self.connection.import_organizations {
            if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
                let prefix = self.connection.organization_prefix.as_deref().unwrap_or_default();
                let full_name = format!("{prefix}{name}");
                let organization_id = self.warehouse.find_or_create_organization(&full_name)?;
                debug!(connection_id = self.connection.id, organization = %full_name, organization_id, "imported organization");
                return Ok(Some(organization_id));
            }
        }

        Ok(self.fallback())
    }
}

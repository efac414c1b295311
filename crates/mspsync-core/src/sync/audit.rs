//! Audit events emitted by sync runs.

use mspsync_warehouse::{AuditEntry, Warehouse, WarehouseError};
use uuid::Uuid;

use crate::UtcDateTime;

pub const SYNC_ACTION: &str = "sync";
pub const CONNECTION_RESOURCE: &str = "integration_connection";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
    pub success: bool,
    pub timestamp: UtcDateTime,
}

impl AuditEvent {
    /// Event recorded when a sync run of `connection_id` finishes.
    pub fn sync_finished(connection_id: i64, success: bool, description: impl Into<String>) -> Self {
        Self {
            actor: None,
            action: SYNC_ACTION.to_owned(),
            resource_type: CONNECTION_RESOURCE.to_owned(),
            resource_id: connection_id.to_string(),
            description: description.into(),
            success,
            timestamp: UtcDateTime::now(),
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), WarehouseError>;
}

impl AuditSink for Warehouse {
    fn record(&self, event: &AuditEvent) -> Result<(), WarehouseError> {
        self.append_audit(&AuditEntry {
            id: Uuid::new_v4().to_string(),
            actor: event.actor.clone(),
            action: event.action.clone(),
            resource_type: event.resource_type.clone(),
            resource_id: event.resource_id.clone(),
            description: event.description.clone(),
            success: event.success,
            created_at: event.timestamp.format_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::open_temp;

    #[test]
    fn warehouse_sink_appends_entries() {
        let (_temp, warehouse) = open_temp();
        let event = AuditEvent::sync_finished(12, false, "sync failed: upstream returned 500");

        warehouse.record(&event).expect("record");
        warehouse.record(&event).expect("ids are unique per entry");

        let entries = warehouse
            .list_audit(CONNECTION_RESOURCE, "12", 10)
            .expect("list");
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].id, entries[1].id);
        assert!(!entries[0].success);
        assert_eq!(entries[0].action, SYNC_ACTION);
    }
}

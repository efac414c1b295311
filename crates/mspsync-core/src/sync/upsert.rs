//! Canonical record → warehouse row conversion.

use mspsync_warehouse::{
    AlertRow, CompanyRow, ContactRow, DeviceRow, LocalRecord, SoftwareRow, TicketRow, UpsertOutcome,
    Warehouse, WarehouseError,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::change_hash;
use crate::{Alert, Company, Contact, Device, SoftwareItem, Ticket, UtcDateTime};

/// Failure persisting one record; counted on the entity report.
#[derive(Debug, Error)]
pub(crate) enum RecordError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Hash `canonical`, then upsert `row` under it.
pub(crate) fn upsert<C, R>(
    warehouse: &Warehouse,
    connection_id: i64,
    canonical: &C,
    row: &R,
    skip_unchanged: bool,
) -> Result<UpsertOutcome, RecordError>
where
    C: Serialize,
    R: LocalRecord,
{
    let hash = change_hash(canonical)?;
    Ok(warehouse.upsert_record(connection_id, row, &hash, skip_unchanged)?)
}

fn timestamp(value: Option<UtcDateTime>) -> Option<String> {
    value.map(UtcDateTime::format_rfc3339)
}

pub(crate) fn company_row(company: &Company, organization_id: Option<i64>) -> Result<CompanyRow, RecordError> {
    Ok(CompanyRow {
        external_id: company.external_id.clone(),
        organization_id,
        name: company.name.clone(),
        phone: company.phone.clone(),
        website: company.website.clone(),
        address: company.address.clone(),
        raw_data: serde_json::to_string(&company.raw_data)?,
    })
}

/// `company_id` is the already-translated local company id.
pub(crate) fn contact_row(
    contact: &Contact,
    organization_id: Option<i64>,
    company_id: Option<i64>,
) -> Result<ContactRow, RecordError> {
    Ok(ContactRow {
        external_id: contact.external_id.clone(),
        organization_id,
        company_id,
        first_name: contact.first_name.clone(),
        last_name: contact.last_name.clone(),
        email: contact.email.clone(),
        phone: contact.phone.clone(),
        title: contact.title.clone(),
        raw_data: serde_json::to_string(&contact.raw_data)?,
    })
}

pub(crate) fn ticket_row(
    ticket: &Ticket,
    organization_id: Option<i64>,
    company_id: Option<i64>,
    contact_id: Option<i64>,
) -> Result<TicketRow, RecordError> {
    Ok(TicketRow {
        external_id: ticket.external_id.clone(),
        organization_id,
        company_id,
        contact_id,
        ticket_number: ticket.ticket_number.clone(),
        subject: ticket.subject.clone(),
        description: ticket.description.clone(),
        status: ticket.status.as_str().to_owned(),
        priority: ticket.priority.as_str().to_owned(),
        external_created_at: timestamp(ticket.external_created_at),
        external_updated_at: timestamp(ticket.external_updated_at),
        raw_data: serde_json::to_string(&ticket.raw_data)?,
    })
}

pub(crate) fn device_row(device: &Device, organization_id: Option<i64>) -> Result<DeviceRow, RecordError> {
    Ok(DeviceRow {
        external_id: device.external_id.clone(),
        organization_id,
        device_name: device.device_name.clone(),
        device_type: device.device_type.as_str().to_owned(),
        manufacturer: device.manufacturer.clone(),
        model: device.model.clone(),
        serial_number: device.serial_number.clone(),
        os_type: device.os_type.as_str().to_owned(),
        os_version: device.os_version.clone(),
        hostname: device.hostname.clone(),
        ip_address: device.ip_address.clone(),
        mac_address: device.mac_address.clone(),
        is_online: device.is_online,
        last_seen: timestamp(device.last_seen),
        raw_data: serde_json::to_string(&device.raw_data)?,
    })
}

pub(crate) fn alert_row(
    alert: &Alert,
    organization_id: Option<i64>,
    device_id: Option<i64>,
) -> Result<AlertRow, RecordError> {
    Ok(AlertRow {
        external_id: alert.external_id.clone(),
        organization_id,
        device_id,
        alert_type: alert.alert_type.clone(),
        message: alert.message.clone(),
        severity: alert.severity.as_str().to_owned(),
        status: alert.status.as_str().to_owned(),
        triggered_at: timestamp(alert.triggered_at),
        resolved_at: timestamp(alert.resolved_at),
        raw_data: serde_json::to_string(&alert.raw_data)?,
    })
}

pub(crate) fn software_row(item: &SoftwareItem) -> Result<SoftwareRow, RecordError> {
    Ok(SoftwareRow {
        external_id: item.external_id.clone(),
        name: item.name.clone(),
        version: item.version.clone(),
        vendor: item.vendor.clone(),
        install_date: timestamp(item.install_date),
        raw_data: serde_json::to_string(&item.raw_data)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sync::test_support::{insert_connection, open_temp};
    use crate::{TicketPriority, TicketStatus};

    fn ticket(subject: &str) -> Ticket {
        Ticket {
            external_id: String::from("T-1"),
            company_id: Some(String::from("C-1")),
            contact_id: None,
            ticket_number: Some(String::from("1001")),
            subject: subject.to_owned(),
            description: None,
            status: TicketStatus::InProgress,
            priority: TicketPriority::High,
            external_created_at: UtcDateTime::parse("2024-05-01T08:00:00Z").ok(),
            external_updated_at: None,
            raw_data: json!({"id": "T-1"}),
        }
    }

    #[test]
    fn ticket_rows_store_canonical_labels() {
        let row = ticket_row(&ticket("Printer jam"), Some(3), Some(9), None).expect("row");
        assert_eq!(row.status, "in_progress");
        assert_eq!(row.priority, "high");
        assert_eq!(row.company_id, Some(9));
        assert_eq!(row.external_created_at.as_deref(), Some("2024-05-01T08:00:00Z"));
        assert_eq!(row.raw_data, r#"{"id":"T-1"}"#);
    }

    #[test]
    fn hash_gating_only_applies_when_asked() {
        let (_temp, warehouse) = open_temp();
        let id = insert_connection(&warehouse, "syncro");
        let first = ticket("Printer jam");
        let row = ticket_row(&first, None, None, None).expect("row");

        let created = upsert(&warehouse, id, &first, &row, true).expect("create");
        assert!(matches!(created, UpsertOutcome::Created(_)));
        assert!(matches!(
            upsert(&warehouse, id, &first, &row, true).expect("same"),
            UpsertOutcome::Unchanged(_)
        ));
        assert!(matches!(
            upsert(&warehouse, id, &first, &row, false).expect("overwrite"),
            UpsertOutcome::Updated(_)
        ));

        let changed = ticket("Printer on fire");
        let changed_row = ticket_row(&changed, None, None, None).expect("row");
        let updated = upsert(&warehouse, id, &changed, &changed_row, true).expect("changed");
        assert_eq!(updated, UpsertOutcome::Updated(created.local_id()));
    }
}

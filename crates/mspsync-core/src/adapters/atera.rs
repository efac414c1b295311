//! Atera API v3 (`https://app.atera.com/api/v3`).
//!
//! `X-API-KEY` header; lists take `page`/`itemsInPage` and report
//! `totalPages`. Atera exposes no per-device software inventory.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::normalize::{boolean, first_text, integer, items, paginate, reference, required_text, text, timestamp};
use crate::credentials::ApiKeyCredentials;
use crate::http::ApiClient;
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, RmmProvider};
use crate::{Alert, AlertSeverity, AlertStatus, Device, DeviceType, OsType, ProviderError, ProviderType};

/// Atera rejects `itemsInPage` above 50.
const MAX_ITEMS_IN_PAGE: usize = 50;

#[derive(Debug, Clone)]
pub struct AteraAdapter {
    api: ApiClient,
}

impl AteraAdapter {
    pub fn new(api: ApiClient, credentials: ApiKeyCredentials) -> Self {
        Self {
            api: api.with_header("X-API-KEY", credentials.api_key.expose()),
        }
    }

    async fn list_raw(&self, resource: &str, request: &ListRequest) -> Result<Vec<Value>, ProviderError> {
        let items_in_page = request.page_size.min(MAX_ITEMS_IN_PAGE);

        paginate(request, 1_u32, |page| async move {
            let query = [("page", page.to_string()), ("itemsInPage", items_in_page.to_string())];
            let body = self.api.get_json(resource, &query, &request.cancel).await?;
            let page_items = items(&body, "items")?;

            let total_pages = integer(&body, "totalPages").unwrap_or(1);
            let next = (i64::from(page) < total_pages).then_some(page + 1);
            Ok((page_items, next))
        })
        .await
    }
}

/// Device id used for linking: the agent's device GUID when present.
fn device_key(raw: &Value) -> Option<String> {
    first_text(raw, &["DeviceGuid", "AgentID"])
}

impl Provider for AteraAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Atera
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::rmm(true, true, false)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let body = self
                .api
                .get_json("customers", &[("itemsInPage", String::from("1"))], &CancellationToken::new())
                .await?;
            Ok(body.get("items").is_some())
        })
    }
}

impl RmmProvider for AteraAdapter {
    fn list_devices<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Device>> {
        Box::pin(async move {
            let raw = self.list_raw("agents", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_device(value)))
        })
    }

    fn list_alerts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Alert>> {
        Box::pin(async move {
            let raw = self.list_raw("alerts", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_alert(value)))
        })
    }

    fn get_device<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Device> {
        Box::pin(async move {
            // Agents are addressed by numeric id upstream but linked by GUID here.
            let raw = self.list_raw("agents", &ListRequest::default()).await?;
            let agent = raw
                .iter()
                .find(|agent| device_key(agent).as_deref() == Some(external_id))
                .ok_or_else(|| ProviderError::upstream_status(404, format!("agent {external_id} not found")))?;
            self.normalize_device(agent)
        })
    }

    fn get_alert<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Alert> {
        Box::pin(async move {
            let path = format!("alerts/{}", urlencoding::encode(external_id));
            let raw = self.api.get_json(&path, &[], &CancellationToken::new()).await?;
            self.normalize_alert(&raw)
        })
    }

    fn normalize_device(&self, raw: &Value) -> Result<Device, ProviderError> {
        let os = text(raw, "OS");
        Ok(Device {
            external_id: device_key(raw).ok_or_else(|| ProviderError::normalization("agent has no id"))?,
            device_name: first_text(raw, &["MachineName", "AgentName"])
                .ok_or_else(|| ProviderError::normalization("agent is missing 'MachineName'"))?,
            device_type: text(raw, "OSType").map_or(DeviceType::Unknown, |label| DeviceType::from_label(&label)),
            manufacturer: text(raw, "Vendor"),
            model: text(raw, "VendorBrandModel"),
            serial_number: text(raw, "VendorSerialNumber"),
            os_type: os.as_deref().map_or(OsType::Other, OsType::from_label),
            os_version: text(raw, "OSVersion").or(os),
            hostname: text(raw, "MachineName"),
            ip_address: text(raw, "IpAddresses.0").or_else(|| text(raw, "IpAddress")),
            mac_address: text(raw, "MacAddresses.0"),
            is_online: boolean(raw, "Online").unwrap_or(false),
            last_seen: timestamp(raw, "LastSeen"),
            organization_external_id: reference(raw, "CustomerID"),
            organization_name: text(raw, "CustomerName"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_alert(&self, raw: &Value) -> Result<Alert, ProviderError> {
        let archived = boolean(raw, "Archived").unwrap_or(false);
        Ok(Alert {
            external_id: required_text(raw, "AlertID", "alert")?,
            device_id: reference(raw, "DeviceGuid"),
            alert_type: text(raw, "AlertCategoryID"),
            message: first_text(raw, &["Title", "AlertMessage"]),
            severity: text(raw, "Severity").map_or(AlertSeverity::Info, |label| AlertSeverity::from_label(&label)),
            status: if archived {
                AlertStatus::Closed
            } else {
                AlertStatus::Active
            },
            triggered_at: timestamp(raw, "Created"),
            resolved_at: if archived { timestamp(raw, "ArchivedDate") } else { None },
            raw_data: raw.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::adapters::test_api;
    use crate::credentials::SecretString;
    use crate::http::{HttpMethod, ScriptedHttpClient};
    use crate::provider::EntityKind;
    use crate::ProviderErrorKind;

    fn adapter(transport: Arc<ScriptedHttpClient>) -> AteraAdapter {
        AteraAdapter::new(
            test_api(ProviderType::Atera, "https://app.atera.com/api/v3", transport),
            ApiKeyCredentials {
                api_key: SecretString::new("atera-key"),
            },
        )
    }

    #[tokio::test]
    async fn agents_page_until_total_pages() {
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on_json(
                    HttpMethod::Get,
                    "agents?page=1",
                    json!({"items": [{"AgentID": 1, "DeviceGuid": "g-1", "MachineName": "PC-1", "OSType": "Work Station", "OS": "Windows 11", "Online": true, "CustomerID": 4, "CustomerName": "Acme"}], "totalPages": 2}),
                )
                .on_json(
                    HttpMethod::Get,
                    "agents?page=2",
                    json!({"items": [{"AgentID": 2, "MachineName": "SRV-1", "OSType": "Server"}], "totalPages": 2}),
                ),
        );

        let batch = adapter(Arc::clone(&transport))
            .list_devices(&ListRequest::default())
            .await
            .expect("agents");

        assert_eq!(batch.records[0].external_id, "g-1");
        assert_eq!(batch.records[0].device_type, DeviceType::Workstation);
        assert_eq!(batch.records[1].external_id, "2");
        assert!(transport.requests()[0].url.contains("itemsInPage=50"));
        assert_eq!(transport.requests()[0].header("x-api-key"), Some("atera-key"));
    }

    #[tokio::test]
    async fn software_is_not_supported() {
        let adapter = adapter(Arc::new(ScriptedHttpClient::new()));
        assert!(!adapter.capabilities().supports(EntityKind::Software));

        let error = adapter
            .list_software("g-1", &ListRequest::default())
            .await
            .expect_err("unsupported");
        assert_eq!(error.kind(), ProviderErrorKind::Unsupported);
    }

    #[test]
    fn archived_alerts_are_closed() {
        let adapter = adapter(Arc::new(ScriptedHttpClient::new()));
        let alert = adapter
            .normalize_alert(&json!({
                "AlertID": 55, "DeviceGuid": "g-1", "Severity": "Warning", "Title": "Disk space low",
                "Created": "2024-05-01T08:00:00Z", "Archived": true, "ArchivedDate": "2024-05-01T09:30:00Z"
            }))
            .expect("alert");
        assert_eq!(alert.status, AlertStatus::Closed);
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert!(alert.resolved_at.is_some());
    }
}

//! NinjaOne public API v2 (`https://{region}.ninjarmm.com`).
//!
//! OAuth2 client credentials against `/ws/oauth/token` with the `monitoring`
//! scope. Devices and organizations page with an `after` cursor holding the
//! last id seen; organization names come from the `/v2/organizations` listing.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::normalize::{boolean, first_text, items, paginate, reference, required_text, text, timestamp};
use crate::credentials::OAuthClientCredentials;
use crate::http::{ApiClient, OAuthGrant, OAuthTokenSource};
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, RmmProvider};
use crate::{
    Alert, AlertSeverity, AlertStatus, Device, DeviceType, OsType, ProviderError, ProviderType, SoftwareItem,
};

const DEFAULT_SCOPE: &str = "monitoring";
/// Injected into raw device payloads so normalization can see the name.
const ORGANIZATION_NAME_FIELD: &str = "organizationName";

#[derive(Debug, Clone)]
pub struct NinjaOneAdapter {
    api: ApiClient,
}

impl NinjaOneAdapter {
    pub fn new(api: ApiClient, credentials: OAuthClientCredentials) -> Result<Self, ProviderError> {
        let token_url = api.url("ws/oauth/token", &[])?;
        let tokens = OAuthTokenSource::new(
            token_url,
            OAuthGrant::ClientCredentials,
            credentials.client_id,
            credentials.client_secret,
            api.transport(),
        )
        .with_scope(credentials.scope.unwrap_or_else(|| String::from(DEFAULT_SCOPE)))
        .with_timeout_ms(api.timeout_ms());

        Ok(Self {
            api: api.with_oauth(Arc::new(tokens)),
        })
    }

    async fn organization_names(&self, request: &ListRequest) -> Result<HashMap<String, String>, ProviderError> {
        Ok(self
            .list_after_cursor("v2/organizations", "organizations", request)
            .await?
            .iter()
            .filter_map(|organization| Some((text(organization, "id")?, text(organization, "name")?)))
            .collect())
    }

    /// Page `path` with `pageSize` + `after`, where `after` is the id of the
    /// last item on a full page.
    async fn list_after_cursor(
        &self,
        path: &'static str,
        key: &'static str,
        request: &ListRequest,
    ) -> Result<Vec<Value>, ProviderError> {
        let page_size = request.page_size;

        paginate(request, None::<String>, |after| async move {
            let mut query = vec![("pageSize", page_size.to_string())];
            if let Some(after) = after {
                query.push(("after", after));
            }
            let body = self.api.get_json(path, &query, &request.cancel).await?;
            let page_items = items(&body, key)?;

            let next = if page_items.len() >= page_size {
                page_items.last().and_then(|last| text(last, "id")).map(Some)
            } else {
                None
            };
            Ok((page_items, next))
        })
        .await
    }

    async fn list_raw_alerts(&self, cancel: &CancellationToken) -> Result<Vec<Value>, ProviderError> {
        let body = self.api.get_json("v2/alerts", &[], cancel).await?;
        items(&body, "alerts")
    }
}

/// Copy the organization name into each device payload that lacks one.
fn with_organization_names(mut devices: Vec<Value>, names: &HashMap<String, String>) -> Vec<Value> {
    for device in &mut devices {
        let name = text(device, "organizationId").and_then(|id| names.get(&id).cloned());
        if let (Some(name), Value::Object(map)) = (name, device) {
            map.entry(ORGANIZATION_NAME_FIELD).or_insert(Value::String(name));
        }
    }
    devices
}

fn alert_severity(raw: &Value) -> AlertSeverity {
    match text(raw, "severity").as_deref() {
        Some("CRITICAL") => AlertSeverity::Critical,
        Some("MAJOR") => AlertSeverity::Error,
        Some("MODERATE" | "MINOR") => AlertSeverity::Warning,
        Some(label) => AlertSeverity::from_label(label),
        None => AlertSeverity::Info,
    }
}

impl Provider for NinjaOneAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ninjaone
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::rmm(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let body = self
                .api
                .get_json("v2/organizations", &[("pageSize", String::from("1"))], &CancellationToken::new())
                .await?;
            Ok(body.is_array())
        })
    }
}

impl RmmProvider for NinjaOneAdapter {
    fn list_devices<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Device>> {
        Box::pin(async move {
            let names = self.organization_names(request).await?;
            let devices = self.list_after_cursor("v2/devices-detailed", "devices", request).await?;
            let raw = with_organization_names(devices, &names);
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_device(value)))
        })
    }

    fn list_alerts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Alert>> {
        Box::pin(async move {
            request.check_cancelled()?;
            let raw = self.list_raw_alerts(&request.cancel).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_alert(value)))
        })
    }

    fn list_software<'a>(
        &'a self,
        device_external_id: &'a str,
        request: &'a ListRequest,
    ) -> ProviderFuture<'a, FetchBatch<SoftwareItem>> {
        Box::pin(async move {
            request.check_cancelled()?;
            let path = format!("v2/device/{}/software", urlencoding::encode(device_external_id));
            let body = self.api.get_json(&path, &[], &request.cancel).await?;
            let raw = items(&body, "software")?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_software(value)))
        })
    }

    fn get_device<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Device> {
        Box::pin(async move {
            let cancel = CancellationToken::new();
            let path = format!("v2/device/{}", urlencoding::encode(external_id));
            let device = self.api.get_json(&path, &[], &cancel).await?;
            let names = self.organization_names(&ListRequest::default()).await?;
            let mut enriched = with_organization_names(vec![device], &names);
            match enriched.pop() {
                Some(device) => self.normalize_device(&device),
                None => Err(ProviderError::malformed_response("device response was empty")),
            }
        })
    }

    fn get_alert<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Alert> {
        Box::pin(async move {
            let raw = self.list_raw_alerts(&CancellationToken::new()).await?;
            let alert = raw
                .iter()
                .find(|alert| text(alert, "uid").as_deref() == Some(external_id))
                .ok_or_else(|| ProviderError::upstream_status(404, format!("alert {external_id} is not active")))?;
            self.normalize_alert(alert)
        })
    }

    fn normalize_device(&self, raw: &Value) -> Result<Device, ProviderError> {
        let node_class = text(raw, "nodeClass");
        let os_name = text(raw, "os.name");
        let device_name = first_text(raw, &["displayName", "systemName", "dnsName"])
            .ok_or_else(|| ProviderError::normalization("device has no display or system name"))?;

        Ok(Device {
            external_id: required_text(raw, "id", "device")?,
            device_name,
            device_type: node_class.as_deref().map_or(DeviceType::Unknown, DeviceType::from_label),
            manufacturer: text(raw, "system.manufacturer"),
            model: text(raw, "system.model"),
            serial_number: text(raw, "system.serialNumber"),
            os_type: os_name
                .as_deref()
                .or(node_class.as_deref())
                .map_or(OsType::Other, OsType::from_label),
            os_version: text(raw, "os.buildNumber").or(os_name),
            hostname: text(raw, "dnsName").or_else(|| text(raw, "systemName")),
            ip_address: text(raw, "ipAddresses.0"),
            mac_address: text(raw, "macAddresses.0"),
            is_online: boolean(raw, "offline") == Some(false),
            last_seen: timestamp(raw, "lastContact"),
            organization_external_id: reference(raw, "organizationId"),
            organization_name: text(raw, ORGANIZATION_NAME_FIELD),
            raw_data: raw.clone(),
        })
    }

    fn normalize_alert(&self, raw: &Value) -> Result<Alert, ProviderError> {
        Ok(Alert {
            external_id: required_text(raw, "uid", "alert")?,
            device_id: reference(raw, "deviceId"),
            alert_type: text(raw, "sourceType"),
            message: text(raw, "message").or_else(|| text(raw, "subject")),
            severity: alert_severity(raw),
            status: AlertStatus::Active,
            triggered_at: timestamp(raw, "createTime"),
            resolved_at: None,
            raw_data: raw.clone(),
        })
    }

    fn normalize_software(&self, raw: &Value) -> Result<SoftwareItem, ProviderError> {
        Ok(SoftwareItem {
            external_id: text(raw, "productCode"),
            name: required_text(raw, "name", "software")?,
            version: text(raw, "version"),
            vendor: text(raw, "publisher"),
            install_date: timestamp(raw, "installDate"),
            raw_data: raw.clone(),
        })
    }
}

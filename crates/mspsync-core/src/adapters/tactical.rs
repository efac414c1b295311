//! Tactical RMM API (self-hosted, `https://api.{domain}`).
//!
//! `X-API-KEY` header. `/agents/` returns every agent in one response; alerts
//! are queried with a `PATCH /alerts/` filter body.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::normalize::{boolean, first_text, items, reference, required_text, text, timestamp};
use crate::credentials::ApiKeyCredentials;
use crate::http::{ApiClient, HttpMethod};
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, RmmProvider};
use crate::{
    Alert, AlertSeverity, AlertStatus, Device, DeviceType, OsType, ProviderError, ProviderType, SoftwareItem,
};

/// Alert lookback in days sent in the filter body.
const ALERT_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub struct TacticalRmmAdapter {
    api: ApiClient,
}

impl TacticalRmmAdapter {
    pub fn new(api: ApiClient, credentials: ApiKeyCredentials) -> Self {
        Self {
            api: api.with_header("X-API-KEY", credentials.api_key.expose()),
        }
    }

    async fn list_raw_alerts(&self, cancel: &CancellationToken) -> Result<Vec<Value>, ProviderError> {
        let filter = json!({
            "timeFilter": ALERT_WINDOW_DAYS,
            "snoozedFilter": false,
            "resolvedFilter": false,
        });
        let body = self
            .api
            .send_json(HttpMethod::Patch, "alerts/", &[], &filter, cancel)
            .await?;
        items(&body, "alerts")
    }
}

fn alert_status(raw: &Value) -> AlertStatus {
    if boolean(raw, "resolved").unwrap_or(false) {
        AlertStatus::Resolved
    } else if boolean(raw, "snoozed").unwrap_or(false) {
        AlertStatus::Acknowledged
    } else {
        AlertStatus::Active
    }
}

impl Provider for TacticalRmmAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::TacticalRmm
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::rmm(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let body = self.api.get_json("core/version/", &[], &CancellationToken::new()).await?;
            Ok(!body.is_null())
        })
    }
}

impl RmmProvider for TacticalRmmAdapter {
    fn list_devices<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Device>> {
        Box::pin(async move {
            request.check_cancelled()?;
            let body = self.api.get_json("agents/", &[], &request.cancel).await?;
            let raw = items(&body, "agents")?;
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
            let path = format!("software/{}/", urlencoding::encode(device_external_id));
            let body = self.api.get_json(&path, &[], &request.cancel).await?;
            let raw = items(&body, "software")?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_software(value)))
        })
    }

    fn get_device<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Device> {
        Box::pin(async move {
            let path = format!("agents/{}/", urlencoding::encode(external_id));
            let raw = self.api.get_json(&path, &[], &CancellationToken::new()).await?;
            self.normalize_device(&raw)
        })
    }

    fn get_alert<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Alert> {
        Box::pin(async move {
            let raw = self.list_raw_alerts(&CancellationToken::new()).await?;
            let alert = raw
                .iter()
                .find(|alert| text(alert, "id").as_deref() == Some(external_id))
                .ok_or_else(|| ProviderError::upstream_status(404, format!("alert {external_id} not found")))?;
            self.normalize_alert(alert)
        })
    }

    fn normalize_device(&self, raw: &Value) -> Result<Device, ProviderError> {
        let operating_system = text(raw, "operating_system");
        let os_type = first_text(raw, &["plat", "operating_system"])
            .map_or(OsType::Other, |label| OsType::from_label(&label));
        let (manufacturer, model) = split_make_model(text(raw, "make_model"));

        Ok(Device {
            external_id: required_text(raw, "agent_id", "agent")?,
            device_name: required_text(raw, "hostname", "agent")?,
            device_type: text(raw, "monitoring_type").map_or(DeviceType::Unknown, |label| DeviceType::from_label(&label)),
            manufacturer,
            model,
            serial_number: text(raw, "serial_number"),
            os_type,
            os_version: operating_system,
            hostname: text(raw, "hostname"),
            ip_address: text(raw, "local_ips").and_then(|ips| ips.split(',').next().map(|ip| ip.trim().to_owned())),
            mac_address: None,
            is_online: text(raw, "status").is_some_and(|status| status.eq_ignore_ascii_case("online")),
            last_seen: timestamp(raw, "last_seen"),
            organization_external_id: first_text(raw, &["client", "client_name"]),
            organization_name: text(raw, "client_name"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_alert(&self, raw: &Value) -> Result<Alert, ProviderError> {
        Ok(Alert {
            external_id: required_text(raw, "id", "alert")?,
            device_id: first_text(raw, &["agent_id", "agent"]),
            alert_type: text(raw, "alert_type"),
            message: text(raw, "message"),
            severity: text(raw, "severity").map_or(AlertSeverity::Info, |label| AlertSeverity::from_label(&label)),
            status: alert_status(raw),
            triggered_at: timestamp(raw, "alert_time"),
            resolved_at: timestamp(raw, "resolved_on"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_software(&self, raw: &Value) -> Result<SoftwareItem, ProviderError> {
        Ok(SoftwareItem {
            external_id: reference(raw, "id"),
            name: required_text(raw, "name", "software")?,
            version: text(raw, "version"),
            vendor: text(raw, "publisher"),
            install_date: timestamp(raw, "install_date"),
            raw_data: raw.clone(),
        })
    }
}

/// `make_model` is free text such as `"Dell Inc. OptiPlex 7090"`.
fn split_make_model(make_model: Option<String>) -> (Option<String>, Option<String>) {
    let Some(make_model) = make_model else {
        return (None, None);
    };
    for suffix in [" Inc.", " Inc", " Corporation", " Corp."] {
        if let Some(index) = make_model.find(suffix) {
            let split = index + suffix.len();
            let model = make_model[split..].trim();
            return (
                Some(make_model[..split].to_owned()),
                (!model.is_empty()).then(|| model.to_owned()),
            );
        }
    }
    (None, Some(make_model))
}

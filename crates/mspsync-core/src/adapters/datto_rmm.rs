//! Datto RMM API v2 (`https://{platform}-api.centrastage.net`).
//!
//! Tokens come from the OAuth2 password grant at `/auth/oauth/token`, with the
//! API key and secret as username/password and the fixed `public-client`
//! client sent as a Basic header. Lists chain through `pageDetails.nextPageUrl`.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::normalize::{boolean, first_text, items, paginate, reference, required_text, text, timestamp};
use crate::credentials::{DattoCredentials, SecretString};
use crate::http::{ApiClient, ClientAuthentication, OAuthGrant, OAuthTokenSource};
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, RmmProvider};
use crate::{
    Alert, AlertSeverity, AlertStatus, Device, DeviceType, OsType, ProviderError, ProviderType, SoftwareItem,
};

const PUBLIC_CLIENT_ID: &str = "public-client";
const PUBLIC_CLIENT_SECRET: &str = "public";
/// Datto caps `max` at 250 per page.
const MAX_PAGE: usize = 250;

#[derive(Debug, Clone)]
pub struct DattoRmmAdapter {
    api: ApiClient,
}

impl DattoRmmAdapter {
    pub fn new(api: ApiClient, credentials: DattoCredentials) -> Result<Self, ProviderError> {
        let token_url = api.url("auth/oauth/token", &[])?;
        let grant = OAuthGrant::Password {
            username: credentials.api_key,
            password: credentials.api_secret,
        };
        let tokens = OAuthTokenSource::new(
            token_url,
            grant,
            PUBLIC_CLIENT_ID,
            SecretString::new(PUBLIC_CLIENT_SECRET),
            api.transport(),
        )
        .with_client_authentication(ClientAuthentication::BasicHeader)
        .with_timeout_ms(api.timeout_ms());

        Ok(Self {
            api: api.with_oauth(Arc::new(tokens)),
        })
    }

    async fn follow_pages(&self, path: &str, key: &str, request: &ListRequest) -> Result<Vec<Value>, ProviderError> {
        let max = request.page_size.min(MAX_PAGE).to_string();
        let max = max.as_str();

        paginate(request, None::<String>, |link| async move {
            let body = match link {
                Some(link) => self.api.get_json_url(&link, &request.cancel).await?,
                None => {
                    self.api
                        .get_json(path, &[("max", max.to_owned()), ("page", String::from("0"))], &request.cancel)
                        .await?
                }
            };
            let next = text(&body, "pageDetails.nextPageUrl").map(Some);
            Ok((items(&body, key)?, next))
        })
        .await
    }

    async fn get_raw(&self, path: String) -> Result<Value, ProviderError> {
        self.api.get_json(&path, &[], &CancellationToken::new()).await
    }
}

impl Provider for DattoRmmAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::DattoRmm
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::rmm(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let body = self.get_raw(String::from("api/v2/account")).await?;
            Ok(body.get("uid").is_some() || body.get("id").is_some())
        })
    }
}

impl RmmProvider for DattoRmmAdapter {
    fn list_devices<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Device>> {
        Box::pin(async move {
            let raw = self.follow_pages("api/v2/account/devices", "devices", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_device(value)))
        })
    }

    fn list_alerts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Alert>> {
        Box::pin(async move {
            let mut raw = self.follow_pages("api/v2/account/alerts/open", "alerts", request).await?;
            raw.extend(self.follow_pages("api/v2/account/alerts/resolved", "alerts", request).await?);
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_alert(value)))
        })
    }

    fn list_software<'a>(
        &'a self,
        device_external_id: &'a str,
        request: &'a ListRequest,
    ) -> ProviderFuture<'a, FetchBatch<SoftwareItem>> {
        Box::pin(async move {
            let path = format!("api/v2/audit/device/{}/software", urlencoding::encode(device_external_id));
            let raw = self.follow_pages(&path, "software", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_software(value)))
        })
    }

    fn get_device<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Device> {
        Box::pin(async move {
            let raw = self
                .get_raw(format!("api/v2/device/{}", urlencoding::encode(external_id)))
                .await?;
            self.normalize_device(&raw)
        })
    }

    fn get_alert<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Alert> {
        Box::pin(async move {
            let raw = self
                .get_raw(format!("api/v2/alert/{}", urlencoding::encode(external_id)))
                .await?;
            self.normalize_alert(&raw)
        })
    }

    fn normalize_device(&self, raw: &Value) -> Result<Device, ProviderError> {
        let hostname = text(raw, "hostname");
        let operating_system = text(raw, "operatingSystem");
        let device_type = first_text(raw, &["deviceType.category", "deviceType.type"])
            .map_or(DeviceType::Unknown, |label| DeviceType::from_label(&label));

        Ok(Device {
            external_id: required_text(raw, "uid", "device")?,
            device_name: first_text(raw, &["hostname", "description"])
                .ok_or_else(|| ProviderError::normalization("device is missing 'hostname'"))?,
            device_type,
            manufacturer: text(raw, "manufacturer"),
            model: text(raw, "model"),
            serial_number: text(raw, "serialNumber"),
            os_type: operating_system.as_deref().map_or(OsType::Other, OsType::from_label),
            os_version: operating_system,
            hostname,
            ip_address: text(raw, "intIpAddress"),
            mac_address: None,
            is_online: boolean(raw, "online").unwrap_or(false),
            last_seen: timestamp(raw, "lastSeen"),
            organization_external_id: reference(raw, "siteUid"),
            organization_name: text(raw, "siteName"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_alert(&self, raw: &Value) -> Result<Alert, ProviderError> {
        let resolved = boolean(raw, "resolved").unwrap_or(false);
        Ok(Alert {
            external_id: required_text(raw, "alertUid", "alert")?,
            device_id: reference(raw, "alertSourceInfo.deviceUid"),
            alert_type: first_text(raw, &["alertContext.@class", "alertContext.type"]),
            message: first_text(raw, &["diagnostics", "alertMessage"]),
            severity: text(raw, "priority").map_or(AlertSeverity::Info, |label| AlertSeverity::from_label(&label)),
            status: if resolved {
                AlertStatus::Resolved
            } else {
                AlertStatus::Active
            },
            triggered_at: timestamp(raw, "timestamp"),
            resolved_at: timestamp(raw, "resolvedOn"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_software(&self, raw: &Value) -> Result<SoftwareItem, ProviderError> {
        Ok(SoftwareItem {
            external_id: None,
            name: required_text(raw, "name", "software")?,
            version: text(raw, "version"),
            vendor: text(raw, "publisher"),
            install_date: timestamp(raw, "installDate"),
            raw_data: raw.clone(),
        })
    }
}

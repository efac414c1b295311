//! Provider adapter contract.
//!
//! Each upstream platform implements [`Provider`] plus exactly one of
//! [`PsaProvider`] or [`RmmProvider`]. Adapters own their pagination loop and
//! hand back fully materialized batches of canonical records; records that
//! fail normalization are returned alongside as [`RejectedRecord`]s so one bad
//! record never sinks a page.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    Alert, Company, Contact, Device, ProviderFamily, ProviderType, SoftwareItem, Ticket,
    UtcDateTime, ValidationError,
};

/// Boxed future returned by provider trait methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Entity collections a provider can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Companies,
    Contacts,
    Tickets,
    Devices,
    Alerts,
    Software,
}

impl EntityKind {
    pub const PSA: [Self; 3] = [Self::Companies, Self::Contacts, Self::Tickets];
    pub const RMM: [Self; 3] = [Self::Devices, Self::Alerts, Self::Software];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::Contacts => "contacts",
            Self::Tickets => "tickets",
            Self::Devices => "devices",
            Self::Alerts => "alerts",
            Self::Software => "software",
        }
    }

    pub const fn family(self) -> ProviderFamily {
        match self {
            Self::Companies | Self::Contacts | Self::Tickets => ProviderFamily::Psa,
            Self::Devices | Self::Alerts | Self::Software => ProviderFamily::Rmm,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity support advertised by an adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub companies: bool,
    pub contacts: bool,
    pub tickets: bool,
    pub devices: bool,
    pub alerts: bool,
    pub software: bool,
}

impl Capabilities {
    pub const fn psa(companies: bool, contacts: bool, tickets: bool) -> Self {
        Self {
            companies,
            contacts,
            tickets,
            devices: false,
            alerts: false,
            software: false,
        }
    }

    pub const fn rmm(devices: bool, alerts: bool, software: bool) -> Self {
        Self {
            companies: false,
            contacts: false,
            tickets: false,
            devices,
            alerts,
            software,
        }
    }

    pub const fn supports(self, entity: EntityKind) -> bool {
        match entity {
            EntityKind::Companies => self.companies,
            EntityKind::Contacts => self.contacts,
            EntityKind::Tickets => self.tickets,
            EntityKind::Devices => self.devices,
            EntityKind::Alerts => self.alerts,
            EntityKind::Software => self.software,
        }
    }

    pub fn supported_entities(self) -> Vec<EntityKind> {
        EntityKind::PSA
            .into_iter()
            .chain(EntityKind::RMM)
            .filter(|entity| self.supports(*entity))
            .collect()
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Authentication,
    RateLimited,
    Upstream,
    MalformedResponse,
    UrlRejected,
    InvalidCredentials,
    Unsupported,
    Cancelled,
    Normalization,
}

/// Structured provider error with a stable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
    retryable: bool,
    status: Option<u16>,
}

impl ProviderError {
    fn new(kind: ProviderErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            status: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Authentication, message, false)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        let mut error = Self::new(ProviderErrorKind::RateLimited, message, true);
        error.status = Some(429);
        error
    }

    /// Transport failure without an HTTP status.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Upstream, message, true)
    }

    /// Non-success HTTP status; only 5xx is considered transient.
    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        let mut error = Self::new(ProviderErrorKind::Upstream, message, status >= 500);
        error.status = Some(status);
        error
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::MalformedResponse, message, false)
    }

    pub fn url_rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::UrlRejected, message, false)
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidCredentials, message, false)
    }

    pub fn unsupported(provider: ProviderType, entity: EntityKind) -> Self {
        Self::new(
            ProviderErrorKind::Unsupported,
            format!("entity '{entity}' is not supported by provider '{provider}'"),
            false,
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ProviderErrorKind::Cancelled, "sync was cancelled", false)
    }

    pub fn normalization(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Normalization, message, false)
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::Authentication => "provider.authentication",
            ProviderErrorKind::RateLimited => "provider.rate_limited",
            ProviderErrorKind::Upstream => "provider.upstream",
            ProviderErrorKind::MalformedResponse => "provider.malformed_response",
            ProviderErrorKind::UrlRejected => "provider.url_rejected",
            ProviderErrorKind::InvalidCredentials => "provider.invalid_credentials",
            ProviderErrorKind::Unsupported => "provider.unsupported",
            ProviderErrorKind::Cancelled => "provider.cancelled",
            ProviderErrorKind::Normalization => "provider.normalization",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

/// Parameters shared by every list call.
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub updated_since: Option<UtcDateTime>,
    pub page_size: usize,
    pub cancel: CancellationToken,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            updated_since: None,
            page_size: DEFAULT_PAGE_SIZE,
            cancel: CancellationToken::new(),
        }
    }
}

impl ListRequest {
    pub fn new(page_size: usize) -> Result<Self, ValidationError> {
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ValidationError::InvalidPageSize { max: MAX_PAGE_SIZE });
        }
        Ok(Self {
            page_size,
            ..Self::default()
        })
    }

    pub fn with_updated_since(mut self, updated_since: Option<UtcDateTime>) -> Self {
        self.updated_since = updated_since;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fails with `Cancelled` once the token has fired.
    pub fn check_cancelled(&self) -> Result<(), ProviderError> {
        if self.cancel.is_cancelled() {
            Err(ProviderError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// A raw record that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub external_id: Option<String>,
    pub message: String,
}

/// Result of one list call: canonical records plus rejects.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchBatch<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RejectedRecord>,
}

impl<T> Default for FetchBatch<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<T> FetchBatch<T> {
    /// Normalize every raw value, keeping failures as rejects.
    pub fn from_raw<F>(raw: &[Value], normalize: F) -> Self
    where
        F: Fn(&Value) -> Result<T, ProviderError>,
    {
        let mut batch = Self::default();
        for value in raw {
            match normalize(value) {
                Ok(record) => batch.records.push(record),
                Err(error) => batch.rejected.push(RejectedRecord {
                    external_id: raw_id(value),
                    message: error.message().to_owned(),
                }),
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.rejected.is_empty()
    }
}

fn raw_id(value: &Value) -> Option<String> {
    ["id", "uid", "Id", "agent_id", "AgentID", "AlertID"]
        .into_iter()
        .find_map(|key| match value.get(key)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
}

/// Common surface of every adapter.
pub trait Provider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn capabilities(&self) -> Capabilities;

    /// Cheap authenticated check. `Ok(false)` means the API answered but
    /// refused the check.
    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool>;
}

fn unsupported<'a, T: Send + 'a>(provider: ProviderType, entity: EntityKind) -> ProviderFuture<'a, T> {
    let error = ProviderError::unsupported(provider, entity);
    Box::pin(async move { Err(error) })
}

/// Professional services automation platforms.
pub trait PsaProvider: Provider {
    fn list_companies<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Company>> {
        let _ = request;
        unsupported(self.provider_type(), EntityKind::Companies)
    }

    fn list_contacts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Contact>> {
        let _ = request;
        unsupported(self.provider_type(), EntityKind::Contacts)
    }

    fn list_tickets<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Ticket>> {
        let _ = request;
        unsupported(self.provider_type(), EntityKind::Tickets)
    }

    fn get_company<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Company> {
        let _ = external_id;
        unsupported(self.provider_type(), EntityKind::Companies)
    }

    fn get_contact<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Contact> {
        let _ = external_id;
        unsupported(self.provider_type(), EntityKind::Contacts)
    }

    fn get_ticket<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Ticket> {
        let _ = external_id;
        unsupported(self.provider_type(), EntityKind::Tickets)
    }

    fn normalize_company(&self, raw: &Value) -> Result<Company, ProviderError> {
        let _ = raw;
        Err(ProviderError::unsupported(self.provider_type(), EntityKind::Companies))
    }

    fn normalize_contact(&self, raw: &Value) -> Result<Contact, ProviderError> {
        let _ = raw;
        Err(ProviderError::unsupported(self.provider_type(), EntityKind::Contacts))
    }

    fn normalize_ticket(&self, raw: &Value) -> Result<Ticket, ProviderError> {
        let _ = raw;
        Err(ProviderError::unsupported(self.provider_type(), EntityKind::Tickets))
    }
}

/// Remote monitoring and management platforms.
pub trait RmmProvider: Provider {
    fn list_devices<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Device>> {
        let _ = request;
        unsupported(self.provider_type(), EntityKind::Devices)
    }

    fn list_alerts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Alert>> {
        let _ = request;
        unsupported(self.provider_type(), EntityKind::Alerts)
    }

    /// Installed software of one device, addressed by its provider id.
    fn list_software<'a>(
        &'a self,
        device_external_id: &'a str,
        request: &'a ListRequest,
    ) -> ProviderFuture<'a, FetchBatch<SoftwareItem>> {
        let _ = (device_external_id, request);
        unsupported(self.provider_type(), EntityKind::Software)
    }

    fn get_device<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Device> {
        let _ = external_id;
        unsupported(self.provider_type(), EntityKind::Devices)
    }

    fn get_alert<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Alert> {
        let _ = external_id;
        unsupported(self.provider_type(), EntityKind::Alerts)
    }

    fn normalize_device(&self, raw: &Value) -> Result<Device, ProviderError> {
        let _ = raw;
        Err(ProviderError::unsupported(self.provider_type(), EntityKind::Devices))
    }

    fn normalize_alert(&self, raw: &Value) -> Result<Alert, ProviderError> {
        let _ = raw;
        Err(ProviderError::unsupported(self.provider_type(), EntityKind::Alerts))
    }

    fn normalize_software(&self, raw: &Value) -> Result<SoftwareItem, ProviderError> {
        let _ = raw;
        Err(ProviderError::unsupported(self.provider_type(), EntityKind::Software))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ProviderError::authentication("no").code(), "provider.authentication");
        assert_eq!(
            ProviderError::unsupported(ProviderType::Atera, EntityKind::Software).to_string(),
            "entity 'software' is not supported by provider 'atera' (provider.unsupported)"
        );
        assert!(ProviderError::upstream_status(503, "down").retryable());
        assert!(!ProviderError::upstream_status(404, "gone").retryable());
    }

    #[test]
    fn capabilities_list_supported_entities() {
        let caps = Capabilities::rmm(true, true, false);
        assert_eq!(caps.supported_entities(), vec![EntityKind::Devices, EntityKind::Alerts]);
        assert!(!caps.supports(EntityKind::Companies));
    }

    #[test]
    fn page_size_bounds_are_enforced() {
        assert!(ListRequest::new(0).is_err());
        assert!(ListRequest::new(MAX_PAGE_SIZE + 1).is_err());
        assert_eq!(ListRequest::new(50).expect("valid").page_size, 50);
    }

    #[test]
    fn batches_keep_rejects_with_their_ids() {
        let raw = vec![json!({"id": 1, "name": "ok"}), json!({"id": 2})];
        let batch = FetchBatch::from_raw(&raw, |value| {
            value
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| ProviderError::normalization("name missing"))
        });
        assert_eq!(batch.records, vec![String::from("ok")]);
        assert_eq!(batch.rejected[0].external_id.as_deref(), Some("2"));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn cancelled_requests_fail_fast() {
        let request = ListRequest::default();
        request.cancel.cancel();
        assert_eq!(
            request.check_cancelled().map_err(|error| error.kind()),
            Err(ProviderErrorKind::Cancelled)
        );
    }
}

//! Connection registration.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;

use mspsync_warehouse::{EntityToggles, NewConnection, Warehouse};
use tracing::info;

use crate::credentials::parse_credentials;
use crate::http::NetworkPolicy;
use crate::provider::EntityKind;
use crate::secrets::SecretsManager;
use crate::{ProviderFamily, ProviderType, SyncError, ValidationError};

pub const DEFAULT_SYNC_INTERVAL_MINUTES: i64 = 60;

/// A connection as entered by an operator, credentials still in plaintext.
#[derive(Clone)]
pub struct ConnectionDraft {
    pub provider_type: String,
    pub name: String,
    pub base_url: String,
    pub credentials: BTreeMap<String, String>,
    /// `None` enables every entity of the provider's family.
    pub entities: Option<Vec<EntityKind>>,
    pub sync_interval_minutes: i64,
    pub organization_id: Option<i64>,
    pub import_organizations: bool,
    pub organization_prefix: Option<String>,
}

impl Debug for ConnectionDraft {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDraft")
            .field("provider_type", &self.provider_type)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("credential_fields", &self.credentials.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ConnectionDraft {
    pub fn new(
        provider_type: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
        credentials: BTreeMap<String, String>,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            name: name.into(),
            base_url: base_url.into(),
            credentials,
            entities: None,
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            organization_id: None,
            import_organizations: false,
            organization_prefix: None,
        }
    }
}

/// Toggles for `entities`, rejecting entities outside the provider's family.
pub fn entity_toggles(
    provider_type: ProviderType,
    entities: Option<&[EntityKind]>,
) -> Result<EntityToggles, ValidationError> {
    let family_entities = match provider_type.family() {
        ProviderFamily::Psa => EntityKind::PSA,
        ProviderFamily::Rmm => EntityKind::RMM,
    };
    let entities = entities.unwrap_or(&family_entities);

    let mut toggles = EntityToggles::default();
    for entity in entities {
        if entity.family() != provider_type.family() {
            return Err(ValidationError::EntityNotSupported {
                provider: provider_type.to_string(),
                entity: entity.to_string(),
            });
        }
        match entity {
            EntityKind::Companies => toggles.companies = true,
            EntityKind::Contacts => toggles.contacts = true,
            EntityKind::Tickets => toggles.tickets = true,
            EntityKind::Devices => toggles.devices = true,
            EntityKind::Alerts => toggles.alerts = true,
            EntityKind::Software => toggles.software = true,
        }
    }
    Ok(toggles)
}

/// Validate `draft`, encrypt its credentials and store it. Returns the new id.
///
/// Nothing is written unless the name, interval, provider type, credential
/// fields and base URL all pass.
pub async fn register_connection(
    warehouse: &Warehouse,
    secrets: &SecretsManager,
    network: &NetworkPolicy,
    draft: ConnectionDraft,
) -> Result<i64, SyncError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyConnectionName.into());
    }
    if draft.sync_interval_minutes < 1 {
        return Err(ValidationError::InvalidSyncInterval.into());
    }
    let provider_type = ProviderType::from_str(draft.provider_type.trim())?;
    let toggles = entity_toggles(provider_type, draft.entities.as_deref())?;
    parse_credentials(provider_type, &draft.credentials)?;
    let base_url = network.validate(&draft.base_url).await?;

    let connection = NewConnection {
        provider_type: provider_type.as_str().to_owned(),
        name: name.to_owned(),
        base_url: base_url.to_string(),
        credentials: secrets.encrypt_blob(&draft.credentials)?,
        toggles,
        sync_interval_minutes: draft.sync_interval_minutes,
        is_active: true,
        sync_enabled: true,
        organization_id: draft.organization_id,
        import_organizations: draft.import_organizations,
        organization_prefix: draft.organization_prefix.filter(|prefix| !prefix.is_empty()),
    };
    let id = warehouse.insert_connection(&connection)?;

    info!(connection_id = id, provider = %provider_type, name = %connection.name, "registered connection");
    Ok(id)
}

//! # Sync Engine
//!
//! | Module | Role |
//! |--------|------|
//! | [`orchestrator`] | Per-connection runs and bounded fan-out over all connections |
//! | [`connections`] | Validated, encrypted connection registration |
//! | [`options`] / [`report`] | Run inputs and outputs |
//! | [`state`] | Run phase machine |
//! | [`audit`] | Audit events and sinks |
//!
//! Organization resolution, the sync lease and row conversion are internal.

pub mod audit;
pub mod connections;
mod lease;
pub mod options;
pub mod orchestrator;
mod organization;
pub mod report;
pub mod state;
mod upsert;

pub use audit::{AuditEvent, AuditSink};
pub use connections::{register_connection, ConnectionDraft};
pub use lease::DEFAULT_LEASE_TTL;
pub use options::SyncOptions;
pub use orchestrator::SyncOrchestrator;
pub use report::{BatchSyncReport, ConnectionSyncReport, EntityReport, RunStatus, SkipReason};
pub use state::SyncPhase;

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use mspsync_warehouse::{EntityToggles, NewConnection, Warehouse, WarehouseConfig};
    use tempfile::TempDir;

    use super::connections::{register_connection, ConnectionDraft};
    use crate::http::{NetworkPolicy, RetryConfig, ScriptedHttpClient};
    use crate::registry::ProviderRegistry;
    use crate::secrets::SecretsManager;

    const MASTER_KEY: [u8; 32] = [7; 32];

    pub fn open_temp() -> (TempDir, Warehouse) {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::in_home(temp.path().join("home"))).expect("open");
        (temp, warehouse)
    }

    pub fn secrets() -> SecretsManager {
        SecretsManager::from_key_bytes(&MASTER_KEY).expect("key")
    }

    pub fn scripted_registry(transport: Arc<ScriptedHttpClient>) -> ProviderRegistry {
        ProviderRegistry::builder()
            .with_http_client(transport)
            .with_network_policy(NetworkPolicy::new(true))
            .with_retry(RetryConfig::no_retry())
            .without_throttling()
            .build()
            .expect("registry")
    }

    /// Register through the real validation path with the shared test key.
    pub async fn register(warehouse: &Warehouse, provider: &str, base_url: &str, fields: &[(&str, &str)]) -> i64 {
        let credentials: BTreeMap<String, String> = fields
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        register_connection(
            warehouse,
            &secrets(),
            &NetworkPolicy::new(true),
            ConnectionDraft::new(provider, format!("{provider} test"), base_url, credentials),
        )
        .await
        .expect("register")
    }

    pub fn insert_connection(warehouse: &Warehouse, provider: &str) -> i64 {
        insert_connection_with(warehouse, provider, |_| {})
    }

    pub fn insert_connection_with(
        warehouse: &Warehouse,
        provider: &str,
        customize: impl FnOnce(&mut NewConnection),
    ) -> i64 {
        let mut connection = NewConnection {
            provider_type: provider.to_owned(),
            name: format!("{provider} test"),
            base_url: String::from("https://api.example.test"),
            credentials: String::from("{}"),
            toggles: EntityToggles::default(),
            sync_interval_minutes: 60,
            is_active: true,
            sync_enabled: true,
            organization_id: None,
            import_organizations: false,
            organization_prefix: None,
        };
        customize(&mut connection);
        warehouse.insert_connection(&connection).expect("insert")
    }
}

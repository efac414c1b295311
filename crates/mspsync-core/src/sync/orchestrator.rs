//! Runs sync for one connection or all of them.

use std::sync::Arc;
use std::time::Duration;

use mspsync_warehouse::{
    ConnectionRecord, EntityToggles, IdentityKey, MappedDevice, RecordKind, SyncOutcomeUpdate, UpsertOutcome,
    Warehouse, WarehouseError,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::audit::{AuditEvent, AuditSink};
use super::lease::{SyncLeaseGuard, DEFAULT_LEASE_TTL};
use super::options::SyncOptions;
use super::organization::OrganizationResolver;
use super::report::{BatchSyncReport, ConnectionSyncReport, EntityReport, EntityTally, RunStatus, SkipReason};
use super::state::{PhaseTracker, SyncPhase};
use super::upsert::{
    alert_row, company_row, contact_row, device_row, software_row, ticket_row, upsert, RecordError,
};
use crate::config::{EngineConfig, DEFAULT_MAX_CONCURRENT_SYNCS};
use crate::provider::{EntityKind, FetchBatch, ListRequest, RejectedRecord};
use crate::registry::{AnyProvider, ProviderRegistry};
use crate::secrets::SecretsManager;
use crate::{Alert, Company, Contact, Device, ProviderError, SoftwareItem, SyncError, Ticket, UtcDateTime};

/// `last_error` is cut to this many characters before it is stored.
pub const MAX_LAST_ERROR_CHARS: usize = 1000;

#[derive(Clone)]
pub struct SyncOrchestrator {
    warehouse: Warehouse,
    secrets: Arc<SecretsManager>,
    registry: ProviderRegistry,
    audit: Arc<dyn AuditSink>,
    max_concurrent_connections: usize,
    lease_ttl: Duration,
}

impl SyncOrchestrator {
    pub fn new(warehouse: Warehouse, secrets: SecretsManager, registry: ProviderRegistry) -> Self {
        Self {
            audit: Arc::new(warehouse.clone()),
            warehouse,
            secrets: Arc::new(secrets),
            registry,
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_SYNCS,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Open the configured warehouse and wire the production registry.
    pub fn from_config(config: &EngineConfig) -> Result<Self, SyncError> {
        let warehouse = Warehouse::open(config.warehouse_config())?;
        Ok(Self::new(warehouse, config.secrets_manager()?, config.registry()?)
            .with_max_concurrent_connections(config.max_concurrent_syncs))
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_max_concurrent_connections(mut self, limit: usize) -> Self {
        self.max_concurrent_connections = limit.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Sync every stored connection, at most `max_concurrent_connections` at a
    /// time. A failing connection shows up in the batch report and never stops
    /// the others.
    pub async fn sync_all(
        &self,
        options: &SyncOptions,
        cancel: CancellationToken,
    ) -> Result<BatchSyncReport, SyncError> {
        let connections = self.warehouse.list_connections()?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_connections));
        let mut tasks = JoinSet::new();

        for connection in connections {
            let orchestrator = self.clone();
            let options = options.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = orchestrator.sync_connection(connection.id, &options, cancel).await;
                (connection, result)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((connection, Err(error))) => {
                    warn!(connection_id = connection.id, %error, "sync aborted before an outcome was recorded");
                    reports.push(aborted_report(&connection, &error));
                }
                Err(error) => error!(%error, "sync task panicked"),
            }
        }

        let batch = BatchSyncReport::from_reports(reports);
        info!(
            succeeded = batch.succeeded,
            failed = batch.failed,
            skipped = batch.skipped,
            "batch sync finished"
        );
        Ok(batch)
    }

    /// Sync one connection.
    ///
    /// Provider failures end the run with an `error` report that is persisted
    /// on the connection and audited. `Err` is reserved for failures of the
    /// local store itself.
    pub async fn sync_connection(
        &self,
        connection_id: i64,
        options: &SyncOptions,
        cancel: CancellationToken,
    ) -> Result<ConnectionSyncReport, SyncError> {
        let connection = self.warehouse.get_connection(connection_id).map_err(|error| match error {
            WarehouseError::NotFound { .. } => SyncError::ConnectionNotFound(connection_id),
            other => SyncError::Warehouse(other),
        })?;
        let started_at = UtcDateTime::now();

        if let Some(reason) = skip_reason(&connection, options.force, started_at) {
            info!(connection_id, ?reason, "skipping connection");
            return Ok(skipped_report(&connection, reason, started_at));
        }
        let Some(lease) = SyncLeaseGuard::acquire(&self.warehouse, connection_id, self.lease_ttl)? else {
            info!(connection_id, "sync already running elsewhere");
            return Ok(skipped_report(&connection, SkipReason::AlreadyRunning, started_at));
        };

        info!(connection_id, provider = %connection.provider_type, name = %connection.name, "sync started");
        let mut tracker = PhaseTracker::new(connection_id);
        let mut entities = Vec::new();
        let result = self
            .run(&connection, options, &cancel, &lease, &mut tracker, &mut entities)
            .await;
        tracker.finish(result.is_ok());
        let finished_at = UtcDateTime::now();

        let (status, error) = match &result {
            Ok(()) => (RunStatus::Success, None),
            Err(error) => (RunStatus::Error, Some(truncate_chars(&error.summary(), MAX_LAST_ERROR_CHARS))),
        };
        let watermark = (!options.test_only).then(|| started_at.format_rfc3339());
        self.warehouse.record_sync_outcome(
            connection_id,
            SyncOutcomeUpdate {
                watermark: watermark.as_deref(),
                finished_at: &finished_at.format_rfc3339(),
                status: status.as_str(),
                error: error.as_deref(),
            },
        )?;

        let description = describe(&connection, options, &entities, error.as_deref());
        match &error {
            None => info!(connection_id, %description, "sync finished"),
            Some(_) => warn!(connection_id, %description, "sync failed"),
        }
        let event = AuditEvent::sync_finished(connection_id, error.is_none(), description);
        if let Err(audit_error) = self.audit.record(&event) {
            warn!(connection_id, error = %audit_error, "failed to record audit event");
        }

        Ok(ConnectionSyncReport {
            connection_id,
            connection_name: connection.name.clone(),
            provider_type: connection.provider_type.clone(),
            status,
            skip_reason: None,
            error,
            entities,
            started_at,
            finished_at,
        })
    }

    async fn run(
        &self,
        connection: &ConnectionRecord,
        options: &SyncOptions,
        cancel: &CancellationToken,
        lease: &SyncLeaseGuard,
        tracker: &mut PhaseTracker,
        entities: &mut Vec<EntityReport>,
    ) -> Result<(), SyncError> {
        let request = options.list_request()?.with_cancel(cancel.clone());

        tracker.advance(SyncPhase::Testing)?;
        let provider = self.registry.create_for_connection(connection, &self.secrets).await?;
        if !provider.test_connection().await? {
            return Err(ProviderError::authentication("connection test was rejected by the provider").into());
        }
        if options.test_only {
            return Ok(());
        }

        let capabilities = provider.capabilities();
        let enabled = |entity: EntityKind| toggled(connection.toggles, entity) && capabilities.supports(entity);
        let incremental = request
            .clone()
            .with_updated_since(connection.last_success_at.as_deref().and_then(UtcDateTime::parse_lenient));
        let windowed = request
            .clone()
            .with_updated_since(Some(UtcDateTime::now().saturating_sub(options.trailing_window)));
        let mut writer = RecordWriter {
            warehouse: &self.warehouse,
            connection_id: connection.id,
            skip_unchanged: options.skip_unchanged,
            organizations: OrganizationResolver::new(&self.warehouse, connection),
        };

        match &provider {
            AnyProvider::Psa(psa) => {
                if enabled(EntityKind::Companies) {
                    begin_entity(tracker, &request, lease)?;
                    let batch = psa.list_companies(&incremental).await?;
                    tracker.advance(SyncPhase::Upserting)?;
                    entities.push(writer.store(EntityKind::Companies, batch, RecordWriter::company));
                }
                if enabled(EntityKind::Contacts) {
                    begin_entity(tracker, &request, lease)?;
                    let batch = psa.list_contacts(&incremental).await?;
                    tracker.advance(SyncPhase::Upserting)?;
                    entities.push(writer.store(EntityKind::Contacts, batch, RecordWriter::contact));
                }
                if enabled(EntityKind::Tickets) {
                    begin_entity(tracker, &request, lease)?;
                    let batch = psa.list_tickets(&windowed).await?;
                    tracker.advance(SyncPhase::Upserting)?;
                    entities.push(writer.store(EntityKind::Tickets, batch, RecordWriter::ticket));
                }
            }
            AnyProvider::Rmm(rmm) => {
                if enabled(EntityKind::Devices) {
                    begin_entity(tracker, &request, lease)?;
                    let batch = rmm.list_devices(&incremental).await?;
                    tracker.advance(SyncPhase::Upserting)?;
                    entities.push(writer.store(EntityKind::Devices, batch, RecordWriter::device));
                }
                if enabled(EntityKind::Alerts) {
                    begin_entity(tracker, &request, lease)?;
                    let batch = rmm.list_alerts(&windowed).await?;
                    tracker.advance(SyncPhase::Upserting)?;
                    entities.push(writer.store(EntityKind::Alerts, batch, RecordWriter::alert));
                }
                if enabled(EntityKind::Software) {
                    let mut tally = EntityTally::new(EntityKind::Software);
                    for device in self.warehouse.list_mapped_devices(connection.id)? {
                        begin_entity(tracker, &request, lease)?;
                        let batch = rmm.list_software(&device.external_id, &request).await?;
                        tracker.advance(SyncPhase::Upserting)?;
                        writer.software(&mut tally, &device, batch);
                    }
                    entities.push(log_entity(connection.id, tally.finish()));
                }
            }
        }
        Ok(())
    }
}

fn begin_entity(tracker: &mut PhaseTracker, request: &ListRequest, lease: &SyncLeaseGuard) -> Result<(), SyncError> {
    request.check_cancelled()?;
    if !lease.renew()? {
        return Err(SyncError::LeaseLost(lease.connection_id()));
    }
    tracker.advance(SyncPhase::Fetching)
}

fn toggled(toggles: EntityToggles, entity: EntityKind) -> bool {
    match entity {
        EntityKind::Companies => toggles.companies,
        EntityKind::Contacts => toggles.contacts,
        EntityKind::Tickets => toggles.tickets,
        EntityKind::Devices => toggles.devices,
        EntityKind::Alerts => toggles.alerts,
        EntityKind::Software => toggles.software,
    }
}

trait Keyed {
    fn key(&self) -> &str;
}

macro_rules! keyed {
    ($($record:ty),*) => {
        $(impl Keyed for $record {
            fn key(&self) -> &str {
                &self.external_id
            }
        })*
    };
}

keyed!(Company, Contact, Ticket, Device, Alert);

/// Persists one connection's records, translating provider references to
/// local ids through the identity map.
struct RecordWriter<'a> {
    warehouse: &'a Warehouse,
    connection_id: i64,
    skip_unchanged: bool,
    organizations: OrganizationResolver<'a>,
}

impl RecordWriter<'_> {
    fn store<T: Keyed>(
        &mut self,
        entity: EntityKind,
        batch: FetchBatch<T>,
        mut write: impl FnMut(&mut Self, &T) -> Result<UpsertOutcome, RecordError>,
    ) -> EntityReport {
        let mut tally = EntityTally::new(entity);
        self.reject(&mut tally, entity, &batch.rejected);
        for record in &batch.records {
            match write(&mut *self, record) {
                Ok(UpsertOutcome::Created(_)) => tally.created(1),
                Ok(UpsertOutcome::Updated(_)) => tally.updated(),
                Ok(UpsertOutcome::Unchanged(_)) => tally.unchanged(),
                Err(error) => {
                    let external_id = record.key();
                    warn!(connection_id = self.connection_id, %entity, external_id, %error, "record failed to persist");
                    tally.error(format!("{external_id}: {error}"));
                }
            }
        }
        log_entity(self.connection_id, tally.finish())
    }

    fn reject(&self, tally: &mut EntityTally, entity: EntityKind, rejected: &[RejectedRecord]) {
        for record in rejected {
            let external_id = record.external_id.as_deref().unwrap_or("<unknown>");
            warn!(connection_id = self.connection_id, %entity, external_id, message = %record.message, "record rejected");
            tally.error(format!("{external_id}: {}", record.message));
        }
    }

    fn local_id(&self, kind: RecordKind, external_id: Option<&str>) -> Result<Option<i64>, WarehouseError> {
        match external_id {
            Some(external_id) => self.warehouse.resolve_local_id(IdentityKey::new(
                self.connection_id,
                kind.type_tag(),
                external_id,
            )),
            None => Ok(None),
        }
    }

    /// Organization of an already stored parent record, else the fixed owner.
    fn inherited_organization(&self, kind: RecordKind, parent: Option<i64>) -> Result<Option<i64>, WarehouseError> {
        let inherited = match parent {
            Some(local_id) => self.warehouse.record_organization(kind, local_id)?,
            None => None,
        };
        Ok(inherited.or_else(|| self.organizations.fallback()))
    }

    fn company(&mut self, company: &Company) -> Result<UpsertOutcome, RecordError> {
        let organization_id = self
            .organizations
            .resolve(Some(&company.external_id), Some(&company.name))?;
        let row = company_row(company, organization_id)?;
        upsert(self.warehouse, self.connection_id, company, &row, self.skip_unchanged)
    }

    fn contact(&mut self, contact: &Contact) -> Result<UpsertOutcome, RecordError> {
        let company_id = self.local_id(RecordKind::Company, contact.company_id.as_deref())?;
        let organization_id = self.inherited_organization(RecordKind::Company, company_id)?;
        let row = contact_row(contact, organization_id, company_id)?;
        upsert(self.warehouse, self.connection_id, contact, &row, self.skip_unchanged)
    }

    fn ticket(&mut self, ticket: &Ticket) -> Result<UpsertOutcome, RecordError> {
        let company_id = self.local_id(RecordKind::Company, ticket.company_id.as_deref())?;
        let contact_id = self.local_id(RecordKind::Contact, ticket.contact_id.as_deref())?;
        let organization_id = self.inherited_organization(RecordKind::Company, company_id)?;
        let row = ticket_row(ticket, organization_id, company_id, contact_id)?;
        upsert(self.warehouse, self.connection_id, ticket, &row, self.skip_unchanged)
    }

    fn device(&mut self, device: &Device) -> Result<UpsertOutcome, RecordError> {
        let organization_id = self.organizations.resolve(
            device.organization_external_id.as_deref(),
            device.organization_name.as_deref(),
        )?;
        let row = device_row(device, organization_id)?;
        upsert(self.warehouse, self.connection_id, device, &row, self.skip_unchanged)
    }

    fn alert(&mut self, alert: &Alert) -> Result<UpsertOutcome, RecordError> {
        let device_id = self.local_id(RecordKind::Device, alert.device_id.as_deref())?;
        let organization_id = self.inherited_organization(RecordKind::Device, device_id)?;
        let row = alert_row(alert, organization_id, device_id)?;
        upsert(self.warehouse, self.connection_id, alert, &row, self.skip_unchanged)
    }

    /// Replace `device`'s inventory with every item of `batch` that converts.
    fn software(&self, tally: &mut EntityTally, device: &MappedDevice, batch: FetchBatch<SoftwareItem>) {
        self.reject(tally, EntityKind::Software, &batch.rejected);
        let mut rows = Vec::with_capacity(batch.records.len());
        for item in &batch.records {
            match software_row(item) {
                Ok(row) => rows.push(row),
                Err(error) => tally.error(format!("{}: {error}", item.name)),
            }
        }
        match self.warehouse.replace_device_software(self.connection_id, device, &rows) {
            Ok(inserted) => tally.created(inserted),
            Err(error) => {
                warn!(connection_id = self.connection_id, device = %device.external_id, %error, "software replace failed");
                tally.error(format!("{}: {error}", device.external_id));
            }
        }
    }
}

fn log_entity(connection_id: i64, report: EntityReport) -> EntityReport {
    info!(
        connection_id,
        entity = %report.entity,
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        errors = report.errors,
        "entity synced"
    );
    report
}

/// Why `connection` should not run now, if anything. `force` only bypasses
/// the schedule.
fn skip_reason(connection: &ConnectionRecord, force: bool, now: UtcDateTime) -> Option<SkipReason> {
    if !connection.is_active {
        return Some(SkipReason::Inactive);
    }
    if !connection.sync_enabled {
        return Some(SkipReason::Disabled);
    }
    if force {
        return None;
    }

    let last_sync_at = connection.last_sync_at.as_deref().and_then(UtcDateTime::parse_lenient)?;
    let minutes = u64::try_from(connection.sync_interval_minutes.max(1)).unwrap_or(1);
    let next_due_at = last_sync_at.saturating_add(Duration::from_secs(minutes * 60));
    (next_due_at > now).then_some(SkipReason::NotDue { next_due_at })
}

fn skipped_report(connection: &ConnectionRecord, reason: SkipReason, at: UtcDateTime) -> ConnectionSyncReport {
    ConnectionSyncReport {
        connection_id: connection.id,
        connection_name: connection.name.clone(),
        provider_type: connection.provider_type.clone(),
        status: RunStatus::Skipped,
        skip_reason: Some(reason),
        error: None,
        entities: Vec::new(),
        started_at: at,
        finished_at: at,
    }
}

fn aborted_report(connection: &ConnectionRecord, error: &SyncError) -> ConnectionSyncReport {
    let now = UtcDateTime::now();
    ConnectionSyncReport {
        connection_id: connection.id,
        connection_name: connection.name.clone(),
        provider_type: connection.provider_type.clone(),
        status: RunStatus::Error,
        skip_reason: None,
        error: Some(truncate_chars(&error.summary(), MAX_LAST_ERROR_CHARS)),
        entities: Vec::new(),
        started_at: now,
        finished_at: now,
    }
}

fn describe(
    connection: &ConnectionRecord,
    options: &SyncOptions,
    entities: &[EntityReport],
    error: Option<&str>,
) -> String {
    if let Some(error) = error {
        return format!("sync of '{}' failed: {error}", connection.name);
    }
    if options.test_only {
        return format!("connection test of '{}' succeeded", connection.name);
    }
    let processed: usize = entities.iter().map(EntityReport::processed).sum();
    let errors: usize = entities.iter().map(|report| report.errors).sum();
    format!(
        "synced '{}' ({}): {processed} records, {errors} errors",
        connection.name, connection.provider_type
    )
}

fn truncate_chars(message: &str, max: usize) -> String {
    message.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::{HttpMethod, HttpResponse, ScriptedHttpClient};
    use crate::sync::audit::CONNECTION_RESOURCE;
    use crate::sync::test_support::{open_temp, register, scripted_registry, secrets};

    const SYNCRO: &str = "https://acme.syncromsp.com/api/v1";

    fn syncro_script() -> ScriptedHttpClient {
        ScriptedHttpClient::new()
            .on_json(HttpMethod::Get, "/me", json!({"user_id": 1}))
            .on_json(
                HttpMethod::Get,
                "/customers?",
                json!({"customers": [{"id": 10, "business_name": "Acme Dental"}], "meta": {"total_pages": 1}}),
            )
            .on_json(
                HttpMethod::Get,
                "/contacts?",
                json!({"contacts": [{"id": 20, "customer_id": 10, "name": "Ada Lovelace"}, {"customer_id": 10}],
                       "meta": {"total_pages": 1}}),
            )
            .on_json(
                HttpMethod::Get,
                "/tickets?",
                json!({"tickets": [{"id": 30, "customer_id": 10, "contact_id": 20, "subject": "VPN down", "status": "In Progress"}],
                       "meta": {"total_pages": 1}}),
            )
    }

    async fn orchestrator(transport: Arc<ScriptedHttpClient>) -> (tempfile::TempDir, SyncOrchestrator, i64) {
        let (temp, warehouse) = open_temp();
        let id = register(&warehouse, "syncro", SYNCRO, &[("api_key", "syncro-key")]).await;
        let orchestrator = SyncOrchestrator::new(warehouse, secrets(), scripted_registry(transport));
        (temp, orchestrator, id)
    }

    #[tokio::test]
    async fn psa_run_links_records_and_records_success() {
        let transport = Arc::new(syncro_script());
        let (_temp, orchestrator, id) = orchestrator(Arc::clone(&transport)).await;
        let organization = orchestrator.warehouse().create_organization("Acme").expect("org");
        orchestrator
            .warehouse()
            .pin_organization(id, "10", organization)
            .expect("pin");

        let report = orchestrator
            .sync_connection(id, &SyncOptions::default(), CancellationToken::new())
            .await
            .expect("sync");

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.entity(EntityKind::Companies).map(|r| r.created), Some(1));
        let contacts = report.entity(EntityKind::Contacts).expect("contacts");
        assert_eq!((contacts.created, contacts.errors), (1, 1));

        let warehouse = orchestrator.warehouse();
        let ticket_id = warehouse
            .resolve_local_id(IdentityKey::new(id, "ticket", "30"))
            .expect("lookup")
            .expect("ticket mapped");
        let ticket: mspsync_warehouse::TicketRow = warehouse.load_record(ticket_id).expect("load").expect("row");
        assert_eq!(ticket.status, "in_progress");
        assert_eq!(ticket.organization_id, Some(organization));
        assert!(ticket.company_id.is_some() && ticket.contact_id.is_some());

        let stored = warehouse.get_connection(id).expect("connection");
        assert_eq!(stored.last_sync_status.as_deref(), Some("success"));
        assert!(stored.last_error.is_none());
        assert!(transport.requests()[1].url.contains("page=1"));
        let tickets_url = transport
            .requests()
            .into_iter()
            .find(|request| request.url.contains("/tickets?"))
            .expect("tickets request")
            .url;
        assert!(tickets_url.contains("since_updated_at="));

        let audit = warehouse.list_audit(CONNECTION_RESOURCE, &id.to_string(), 5).expect("audit");
        assert_eq!(audit.len(), 1);
        assert!(audit[0].success);
    }

    #[tokio::test]
    async fn second_run_updates_and_skip_unchanged_leaves_rows() {
        let transport = Arc::new(syncro_script());
        let (_temp, orchestrator, id) = orchestrator(transport).await;

        orchestrator
            .sync_connection(id, &SyncOptions::forced(), CancellationToken::new())
            .await
            .expect("first");
        let overwrite = orchestrator
            .sync_connection(id, &SyncOptions::forced(), CancellationToken::new())
            .await
            .expect("second");
        assert_eq!(overwrite.entity(EntityKind::Companies).map(|r| r.updated), Some(1));

        let gated = orchestrator
            .sync_connection(id, &SyncOptions::forced().with_skip_unchanged(true), CancellationToken::new())
            .await
            .expect("third");
        assert_eq!(gated.entity(EntityKind::Companies).map(|r| r.unchanged), Some(1));
        assert_eq!(
            orchestrator.warehouse().count_records(RecordKind::Company, id).expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn schedule_and_flags_gate_runs() {
        let transport = Arc::new(syncro_script());
        let (_temp, orchestrator, id) = orchestrator(Arc::clone(&transport)).await;

        orchestrator
            .sync_connection(id, &SyncOptions::default(), CancellationToken::new())
            .await
            .expect("first");
        let before = transport.requests().len();

        let report = orchestrator
            .sync_connection(id, &SyncOptions::default(), CancellationToken::new())
            .await
            .expect("not due");
        assert!(matches!(report.skip_reason, Some(SkipReason::NotDue { .. })));
        assert_eq!(transport.requests().len(), before);

        orchestrator
            .warehouse()
            .set_connection_flags(id, true, false)
            .expect("disable");
        let report = orchestrator
            .sync_connection(id, &SyncOptions::forced(), CancellationToken::new())
            .await
            .expect("disabled");
        assert_eq!(report.skip_reason, Some(SkipReason::Disabled));
    }

    #[tokio::test]
    async fn provider_failure_is_persisted_and_audited() {
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on_json(HttpMethod::Get, "/me", json!({"user_id": 1}))
                .on(HttpMethod::Get, "/customers?", HttpResponse::new(401, "bad token")),
        );
        let (_temp, orchestrator, id) = orchestrator(transport).await;

        let report = orchestrator
            .sync_connection(id, &SyncOptions::default(), CancellationToken::new())
            .await
            .expect("report");

        assert_eq!(report.status, RunStatus::Error);
        let stored = orchestrator.warehouse().get_connection(id).expect("connection");
        assert_eq!(stored.last_sync_status.as_deref(), Some("error"));
        assert!(stored.last_error.as_deref().is_some_and(|error| error.contains("provider.authentication")));
        assert!(stored.last_success_at.is_none());
        assert!(!stored.credentials.contains("syncro-key"));
        assert_eq!(orchestrator.warehouse().count_mappings(id, "company").expect("count"), 0);

        let audit = orchestrator
            .warehouse()
            .list_audit(CONNECTION_RESOURCE, &id.to_string(), 5)
            .expect("audit");
        assert!(!audit[0].success);
    }

    #[tokio::test]
    async fn test_only_stops_after_the_connection_check() {
        let transport = Arc::new(syncro_script());
        let (_temp, orchestrator, id) = orchestrator(Arc::clone(&transport)).await;

        let report = orchestrator
            .sync_connection(id, &SyncOptions::default().with_test_only(true), CancellationToken::new())
            .await
            .expect("test");

        assert!(report.is_success());
        assert!(report.entities.is_empty());
        assert_eq!(transport.request_count("/customers"), 0);

        let stored = orchestrator.warehouse().get_connection(id).expect("connection");
        assert_eq!(stored.last_sync_status.as_deref(), Some("success"));
        assert!(stored.last_success_at.is_none());
    }

    #[tokio::test]
    async fn success_watermark_is_the_start_of_the_run() {
        let transport = Arc::new(syncro_script());
        let (_temp, orchestrator, id) = orchestrator(transport).await;

        let report = orchestrator
            .sync_connection(id, &SyncOptions::forced(), CancellationToken::new())
            .await
            .expect("sync");

        let stored = orchestrator.warehouse().get_connection(id).expect("connection");
        let started_at = report.started_at.format_rfc3339();
        assert_eq!(stored.last_success_at.as_deref(), Some(started_at.as_str()));
        assert_eq!(stored.last_sync_at, Some(report.finished_at.format_rfc3339()));
    }

    #[tokio::test]
    async fn held_lease_skips_the_run() {
        let transport = Arc::new(syncro_script());
        let (_temp, orchestrator, id) = orchestrator(Arc::clone(&transport)).await;
        assert!(orchestrator
            .warehouse()
            .try_acquire_lease(id, "other-worker", DEFAULT_LEASE_TTL)
            .expect("lease"));

        let report = orchestrator
            .sync_connection(id, &SyncOptions::forced(), CancellationToken::new())
            .await
            .expect("report");

        assert_eq!(report.skip_reason, Some(SkipReason::AlreadyRunning));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn last_error_is_cut_on_char_boundaries() {
        let message = "é".repeat(1_500);
        assert_eq!(truncate_chars(&message, MAX_LAST_ERROR_CHARS).chars().count(), 1_000);
    }
}

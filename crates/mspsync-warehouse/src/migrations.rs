use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_connections",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS seq_organizations START 1;
CREATE SEQUENCE IF NOT EXISTS seq_connections START 1;

CREATE TABLE IF NOT EXISTS organizations (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_organizations'),
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS integration_connections (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_connections'),
    provider_type TEXT NOT NULL,
    name TEXT NOT NULL,
    base_url TEXT NOT NULL,
    credentials TEXT NOT NULL,
    sync_companies BOOLEAN NOT NULL DEFAULT FALSE,
    sync_contacts BOOLEAN NOT NULL DEFAULT FALSE,
    sync_tickets BOOLEAN NOT NULL DEFAULT FALSE,
    sync_devices BOOLEAN NOT NULL DEFAULT FALSE,
    sync_alerts BOOLEAN NOT NULL DEFAULT FALSE,
    sync_software BOOLEAN NOT NULL DEFAULT FALSE,
    sync_interval_minutes BIGINT NOT NULL DEFAULT 60,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    sync_enabled BOOLEAN NOT NULL DEFAULT TRUE,
    organization_id BIGINT,
    import_organizations BOOLEAN NOT NULL DEFAULT FALSE,
    organization_prefix TEXT,
    last_sync_at TEXT,
    last_success_at TEXT,
    last_sync_status TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_canonical_records",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS seq_psa_companies START 1;
CREATE SEQUENCE IF NOT EXISTS seq_psa_contacts START 1;
CREATE SEQUENCE IF NOT EXISTS seq_psa_tickets START 1;
CREATE SEQUENCE IF NOT EXISTS seq_rmm_devices START 1;
CREATE SEQUENCE IF NOT EXISTS seq_rmm_alerts START 1;
CREATE SEQUENCE IF NOT EXISTS seq_rmm_software START 1;

CREATE TABLE IF NOT EXISTS psa_companies (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_psa_companies'),
    connection_id BIGINT NOT NULL,
    external_id TEXT NOT NULL,
    organization_id BIGINT,
    name TEXT NOT NULL,
    phone TEXT,
    website TEXT,
    address TEXT,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS psa_contacts (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_psa_contacts'),
    connection_id BIGINT NOT NULL,
    external_id TEXT NOT NULL,
    organization_id BIGINT,
    company_id BIGINT,
    first_name TEXT,
    last_name TEXT,
    email TEXT,
    phone TEXT,
    title TEXT,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS psa_tickets (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_psa_tickets'),
    connection_id BIGINT NOT NULL,
    external_id TEXT NOT NULL,
    organization_id BIGINT,
    company_id BIGINT,
    contact_id BIGINT,
    ticket_number TEXT,
    subject TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    external_created_at TEXT,
    external_updated_at TEXT,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS rmm_devices (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_rmm_devices'),
    connection_id BIGINT NOT NULL,
    external_id TEXT NOT NULL,
    organization_id BIGINT,
    device_name TEXT NOT NULL,
    device_type TEXT NOT NULL,
    manufacturer TEXT,
    model TEXT,
    serial_number TEXT,
    os_type TEXT NOT NULL,
    os_version TEXT,
    hostname TEXT,
    ip_address TEXT,
    mac_address TEXT,
    is_online BOOLEAN NOT NULL DEFAULT FALSE,
    last_seen TEXT,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS rmm_alerts (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_rmm_alerts'),
    connection_id BIGINT NOT NULL,
    external_id TEXT NOT NULL,
    organization_id BIGINT,
    device_id BIGINT,
    alert_type TEXT,
    message TEXT,
    severity TEXT NOT NULL,
    status TEXT NOT NULL,
    triggered_at TEXT,
    resolved_at TEXT,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS rmm_software (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_rmm_software'),
    connection_id BIGINT NOT NULL,
    device_id BIGINT NOT NULL,
    organization_id BIGINT,
    external_id TEXT,
    name TEXT NOT NULL,
    version TEXT,
    vendor TEXT,
    install_date TEXT,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0003_identity_audit_leases",
        sql: r#"
CREATE TABLE IF NOT EXISTS external_identity_map (
    connection_id BIGINT NOT NULL,
    external_type TEXT NOT NULL,
    external_id TEXT NOT NULL,
    local_type TEXT NOT NULL,
    local_id BIGINT NOT NULL,
    last_synced_at TEXT NOT NULL,
    sync_hash TEXT,
    PRIMARY KEY(connection_id, external_type, external_id)
);

CREATE TABLE IF NOT EXISTS audit_log (
    id TEXT PRIMARY KEY,
    actor TEXT,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    description TEXT NOT NULL,
    success BOOLEAN NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_leases (
    connection_id BIGINT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at_unix BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0004_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_rmm_software_device ON rmm_software(device_id);
CREATE INDEX IF NOT EXISTS idx_audit_log_resource ON audit_log(resource_type, resource_id);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        apply_migrations(&connection).expect("first pass");
        apply_migrations(&connection).expect("second pass");

        let applied: i64 = connection
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}

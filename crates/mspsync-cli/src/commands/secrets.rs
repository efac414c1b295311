use mspsync_core::config::EngineConfig;
use mspsync_core::secrets::rotation::rotate_keys;
use mspsync_core::SecretsManager;
use serde_json::json;
use tracing::info;

use super::{open_warehouse, CommandOutcome};
use crate::cli::SecretsCommand;
use crate::error::CliError;

pub fn run(command: &SecretsCommand) -> Result<CommandOutcome, CliError> {
    match command {
        SecretsCommand::GenerateKey => Ok(CommandOutcome::ok(json!({
            "master_key": SecretsManager::generate_master_key(),
        }))),
        SecretsCommand::Rotate(args) => rotate(&EngineConfig::from_env()?, &args.new_key),
    }
}

/// Re-seal every stored credential blob from the configured key to `new_key`.
fn rotate(config: &EngineConfig, new_key: &str) -> Result<CommandOutcome, CliError> {
    let old = config.secrets_manager()?;
    let new = SecretsManager::from_base64_key(new_key)?;
    let warehouse = open_warehouse(config)?;

    let report = rotate_keys(&warehouse, &old, &new)?;
    info!(
        rotated = report.rotated_count,
        failed = report.failed_count,
        "master key rotation finished"
    );
    Ok(CommandOutcome {
        failed: report.failed_count > 0,
        value: serde_json::to_value(report)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use mspsync_core::Warehouse;
    use mspsync_warehouse::{EntityToggles, NewConnection};

    use super::*;

    fn config(home: &std::path::Path, master_key: &str) -> EngineConfig {
        let home = home.to_string_lossy().into_owned();
        let master_key = master_key.to_owned();
        EngineConfig::from_lookup(move |name| match name {
            "MSPSYNC_HOME" => Some(home.clone()),
            "MSPSYNC_MASTER_KEY" => Some(master_key.clone()),
            _ => None,
        })
        .expect("config")
    }

    fn store(warehouse: &Warehouse, name: &str, credentials: String) {
        warehouse
            .insert_connection(&NewConnection {
                provider_type: String::from("syncro"),
                name: name.to_owned(),
                base_url: String::from("https://acme.syncromsp.com/api/v1"),
                credentials,
                toggles: EntityToggles::default(),
                sync_interval_minutes: 60,
                is_active: true,
                sync_enabled: true,
                organization_id: None,
                import_organizations: false,
                organization_prefix: None,
            })
            .expect("insert");
    }

    #[test]
    fn rotate_reseals_the_store_and_flags_unreadable_blobs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (old_key, new_key) = (SecretsManager::generate_master_key(), SecretsManager::generate_master_key());
        let config = config(temp.path(), &old_key);
        let old = SecretsManager::from_base64_key(&old_key).expect("old");
        let foreign = SecretsManager::from_key_bytes(&[9; 32]).expect("foreign");
        let fields = BTreeMap::from([(String::from("api_key"), String::from("syncro-key"))]);
        {
            let warehouse = open_warehouse(&config).expect("warehouse");
            store(&warehouse, "Syncro", old.encrypt_blob(&fields).expect("seal"));
            store(&warehouse, "Stray", foreign.encrypt_blob(&fields).expect("seal"));
        }

        let outcome = rotate(&config, &new_key).expect("rotate");

        assert!(outcome.failed);
        assert_eq!(outcome.value["rotated_count"], 1);
        assert_eq!(outcome.value["failed_count"], 1);
        assert!(!outcome.value.to_string().contains("syncro-key"));

        let new = SecretsManager::from_base64_key(&new_key).expect("new");
        let warehouse = open_warehouse(&config).expect("reopen");
        let opened = warehouse
            .list_credential_blobs()
            .expect("blobs")
            .into_iter()
            .filter(|(_, blob)| new.decrypt_blob(blob).is_ok())
            .count();
        assert_eq!(opened, 1);
    }

    #[test]
    fn rotate_rejects_a_malformed_new_key_before_touching_the_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config(temp.path(), &SecretsManager::generate_master_key());

        let error = rotate(&config, "not-a-key").expect_err("bad key");

        assert_eq!(error.exit_code(), 5);
        assert!(!config.db_path.exists());
    }
}

use mspsync_core::config::EngineConfig;
use serde_json::json;
use tracing::info;

use super::{open_warehouse, CommandOutcome};
use crate::cli::IdentityCommand;
use crate::error::CliError;

pub fn run(command: &IdentityCommand) -> Result<CommandOutcome, CliError> {
    let config = EngineConfig::from_env()?;
    let warehouse = open_warehouse(&config)?;

    match command {
        IdentityCommand::List(args) => {
            let mappings = warehouse.list_mappings(args.connection, args.external_type.as_deref())?;
            Ok(CommandOutcome::ok(serde_json::to_value(mappings)?))
        }
        IdentityCommand::Pin(args) => {
            warehouse.get_connection(args.connection)?;
            let external_id = args.external_id.trim();
            if external_id.is_empty() {
                return Err(CliError::Command(String::from("--external-id must not be empty")));
            }

            let mapping = warehouse.pin_organization(args.connection, external_id, args.organization)?;
            info!(
                connection_id = args.connection,
                external_id,
                organization_id = args.organization,
                "pinned organization"
            );
            Ok(CommandOutcome::ok(json!({ "pinned": mapping })))
        }
    }
}

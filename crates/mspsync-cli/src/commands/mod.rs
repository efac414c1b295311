mod connection;
mod identity;
mod secrets;
mod sync;

use mspsync_core::config::EngineConfig;
use mspsync_core::Warehouse;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Rendered command result. `failed` marks partial failures that still
/// produced output, such as a batch sync with failed connections.
#[derive(Debug)]
pub struct CommandOutcome {
    pub value: Value,
    pub failed: bool,
}

impl CommandOutcome {
    fn ok(value: Value) -> Self {
        Self { value, failed: false }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutcome, CliError> {
    match &cli.command {
        Command::Connection(command) => connection::run(command).await,
        Command::Sync(command) => sync::run(command).await,
        Command::Secrets(command) => secrets::run(command),
        Command::Identity(command) => identity::run(command),
    }
}

fn open_warehouse(config: &EngineConfig) -> Result<Warehouse, CliError> {
    Ok(Warehouse::open(config.warehouse_config())?)
}

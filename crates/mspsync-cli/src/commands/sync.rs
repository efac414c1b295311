use mspsync_core::config::EngineConfig;
use mspsync_core::sync::{RunStatus, SyncOptions, SyncOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::CommandOutcome;
use crate::cli::{SyncCommand, SyncRunArgs};
use crate::error::CliError;

pub async fn run(command: &SyncCommand) -> Result<CommandOutcome, CliError> {
    match command {
        SyncCommand::Run(args) => sync_run(args).await,
    }
}

async fn sync_run(args: &SyncRunArgs) -> Result<CommandOutcome, CliError> {
    let options = options_from(args);
    options.list_request()?;

    let config = EngineConfig::from_env()?;
    let orchestrator = SyncOrchestrator::from_config(&config)?;
    let cancel = cancel_on_ctrl_c();

    match args.connection {
        Some(connection_id) => {
            let report = orchestrator.sync_connection(connection_id, &options, cancel).await?;
            Ok(CommandOutcome {
                failed: report.status == RunStatus::Error,
                value: serde_json::to_value(report)?,
            })
        }
        None => {
            let batch = orchestrator.sync_all(&options, cancel).await?;
            Ok(CommandOutcome {
                failed: batch.failed > 0,
                value: serde_json::to_value(batch)?,
            })
        }
    }
}

fn options_from(args: &SyncRunArgs) -> SyncOptions {
    SyncOptions {
        force: args.force,
        ..SyncOptions::default()
    }
    .with_page_size(args.page_size)
    .with_test_only(args.test_only)
    .with_skip_unchanged(args.skip_unchanged)
}

/// In-flight runs stop at the next page boundary after Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling sync");
            trigger.cancel();
        }
    });
    cancel
}

use std::collections::BTreeMap;
use std::env;

use mspsync_core::config::EngineConfig;
use mspsync_core::sync::{register_connection, ConnectionDraft};
use mspsync_core::EntityKind;
use serde_json::json;

use super::{open_warehouse, CommandOutcome};
use crate::cli::{ConnectionAddArgs, ConnectionCommand};
use crate::error::CliError;

pub async fn run(command: &ConnectionCommand) -> Result<CommandOutcome, CliError> {
    let config = EngineConfig::from_env()?;
    match command {
        ConnectionCommand::Add(args) => add(&config, args).await,
        ConnectionCommand::List => {
            let connections = open_warehouse(&config)?.list_connections()?;
            Ok(CommandOutcome::ok(serde_json::to_value(connections)?))
        }
        ConnectionCommand::Show(args) => {
            let connection = open_warehouse(&config)?.get_connection(args.id)?;
            Ok(CommandOutcome::ok(serde_json::to_value(connection)?))
        }
    }
}

async fn add(config: &EngineConfig, args: &ConnectionAddArgs) -> Result<CommandOutcome, CliError> {
    let credentials = collect_credentials(&args.credentials, &args.credential_env, |name| env::var(name).ok())?;

    let mut draft = ConnectionDraft::new(&args.provider, &args.name, &args.base_url, credentials);
    if !args.entities.is_empty() {
        draft.entities = Some(args.entities.iter().copied().map(EntityKind::from).collect());
    }
    draft.sync_interval_minutes = args.interval_minutes;
    draft.organization_id = args.organization_id;
    draft.import_organizations = args.import_organizations;
    draft.organization_prefix = args.organization_prefix.clone();

    let warehouse = open_warehouse(config)?;
    let secrets = config.secrets_manager()?;
    let id = register_connection(&warehouse, &secrets, &config.network_policy(), draft).await?;

    let connection = warehouse.get_connection(id)?;
    Ok(CommandOutcome::ok(json!({ "id": id, "connection": connection })))
}

/// Merge `name=value` pairs and `name=VAR` environment references.
///
/// Error messages name the field or variable, never the value.
fn collect_credentials<F>(
    inline: &[String],
    from_env: &[String],
    lookup: F,
) -> Result<BTreeMap<String, String>, CliError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut credentials = BTreeMap::new();

    for pair in inline {
        let (name, value) = split_pair(pair, "--credential")?;
        credentials.insert(name.to_owned(), value.to_owned());
    }
    for pair in from_env {
        let (name, variable) = split_pair(pair, "--credential-env")?;
        let value = lookup(variable)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CliError::Command(format!("environment variable {variable} is not set")))?;
        credentials.insert(name.to_owned(), value);
    }

    Ok(credentials)
}

fn split_pair<'a>(pair: &'a str, flag: &str) -> Result<(&'a str, &'a str), CliError> {
    match pair.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(CliError::Command(format!("{flag} expects NAME=VALUE"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_and_environment_credentials_merge() {
        let credentials = collect_credentials(
            &[String::from("client_id=abc"), String::from("scope=monitoring management")],
            &[String::from("client_secret=NINJA_SECRET")],
            |name| (name == "NINJA_SECRET").then(|| String::from("s3cr3t")),
        )
        .expect("credentials");

        assert_eq!(credentials["client_id"], "abc");
        assert_eq!(credentials["scope"], "monitoring management");
        assert_eq!(credentials["client_secret"], "s3cr3t");
    }

    #[test]
    fn missing_variable_names_the_variable_only() {
        let error = collect_credentials(&[], &[String::from("api_key=SYNCRO_KEY")], |_| None)
            .expect_err("unset variable");
        assert!(error.to_string().contains("SYNCRO_KEY"));
    }

    #[test]
    fn malformed_pair_does_not_echo_the_value() {
        let error = collect_credentials(&[String::from("hunter2")], &[], |_| None).expect_err("no '='");
        assert!(matches!(error, CliError::Command(_)));

        let error = collect_credentials(&[String::from("=hunter2")], &[], |_| None).expect_err("empty name");
        assert!(!error.to_string().contains("hunter2"));
    }
}

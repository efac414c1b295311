//! CLI argument definitions for mspsync.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `connection add\|list\|show` | Register and inspect integration connections |
//! | `sync run` | Sync one connection or all of them |
//! | `secrets generate-key\|rotate` | Master key management |
//! | `identity list\|pin` | Inspect the identity map and pin organizations |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-json` | `false` | Emit logs as JSON lines on stderr |
//!
//! # Examples
//!
//! ```bash
//! mspsync connection add --provider syncro --name "Syncro" \
//!     --base-url https://acme.syncromsp.com/api/v1 --credential-env api_key=SYNCRO_API_KEY
//! mspsync sync run --all --pretty
//! mspsync identity pin --connection 3 --external-id 1042 --organization 7
//! ```

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use mspsync_core::EntityKind;

/// mspsync - PSA and RMM integration sync engine
#[derive(Debug, Parser)]
#[command(
    name = "mspsync",
    author,
    version,
    about = "Sync PSA and RMM platforms into a local warehouse",
    long_about = "mspsync mirrors companies, contacts and tickets from PSA platforms and devices, \
alerts and software from RMM platforms into a local DuckDB warehouse.\n\
\n\
Configuration is read from the environment (and a .env file): MSPSYNC_HOME, \
MSPSYNC_DB_PATH, MSPSYNC_MASTER_KEY, MSPSYNC_ALLOW_PRIVATE_NETWORKS."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Write logs as JSON lines instead of human-readable text.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage integration connections.
    #[command(subcommand)]
    Connection(ConnectionCommand),

    /// Run synchronization.
    #[command(subcommand)]
    Sync(SyncCommand),

    /// Master key management.
    #[command(subcommand)]
    Secrets(SecretsCommand),

    /// External identity map.
    #[command(subcommand)]
    Identity(IdentityCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConnectionCommand {
    /// Validate, encrypt and store a new connection.
    Add(ConnectionAddArgs),
    /// List stored connections (credentials are never shown).
    List,
    /// Show one connection.
    Show(ConnectionShowArgs),
}

#[derive(Debug, Args)]
pub struct ConnectionAddArgs {
    /// Provider type, e.g. `syncro`, `ninjaone`, `connectwise_manage`.
    #[arg(long)]
    pub provider: String,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub base_url: String,

    /// Credential field as `name=value`. Repeatable.
    #[arg(long = "credential", value_name = "NAME=VALUE")]
    pub credentials: Vec<String>,

    /// Credential field read from an environment variable, as `name=VAR`.
    #[arg(long = "credential-env", value_name = "NAME=VAR")]
    pub credential_env: Vec<String>,

    /// Entities to sync. Defaults to every entity of the provider's family.
    #[arg(long = "entity", value_enum)]
    pub entities: Vec<EntityArg>,

    #[arg(long, default_value_t = 60)]
    pub interval_minutes: i64,

    /// Fixed owning organization for records without a better match.
    #[arg(long)]
    pub organization_id: Option<i64>,

    /// Create local organizations from upstream companies/sites.
    #[arg(long, default_value_t = false)]
    pub import_organizations: bool,

    /// Prefix for imported organization names.
    #[arg(long)]
    pub organization_prefix: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConnectionShowArgs {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EntityArg {
    Companies,
    Contacts,
    Tickets,
    Devices,
    Alerts,
    Software,
}

impl From<EntityArg> for EntityKind {
    fn from(value: EntityArg) -> Self {
        match value {
            EntityArg::Companies => Self::Companies,
            EntityArg::Contacts => Self::Contacts,
            EntityArg::Tickets => Self::Tickets,
            EntityArg::Devices => Self::Devices,
            EntityArg::Alerts => Self::Alerts,
            EntityArg::Software => Self::Software,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    /// Sync one connection (`--connection`) or every connection (`--all`).
    Run(SyncRunArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("target").required(true).args(["connection", "all"])))]
pub struct SyncRunArgs {
    #[arg(long)]
    pub connection: Option<i64>,

    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Ignore the connection schedule.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Only test the connection.
    #[arg(long, default_value_t = false)]
    pub test_only: bool,

    /// Leave records whose content did not change untouched.
    #[arg(long, default_value_t = false)]
    pub skip_unchanged: bool,

    #[arg(long, default_value_t = 100)]
    pub page_size: usize,
}

#[derive(Debug, Subcommand)]
pub enum SecretsCommand {
    /// Print a fresh base64 master key.
    GenerateKey,
    /// Re-encrypt every stored credential under a new master key.
    Rotate(RotateArgs),
}

#[derive(Debug, Args)]
pub struct RotateArgs {
    /// New base64 master key. The current key comes from `MSPSYNC_MASTER_KEY`.
    #[arg(long, env = "MSPSYNC_NEW_MASTER_KEY", hide_env_values = true)]
    pub new_key: String,
}

#[derive(Debug, Subcommand)]
pub enum IdentityCommand {
    /// List identity mappings of a connection.
    List(IdentityListArgs),
    /// Pin an upstream company/site to a local organization.
    Pin(IdentityPinArgs),
}

#[derive(Debug, Args)]
pub struct IdentityListArgs {
    #[arg(long)]
    pub connection: i64,

    /// Only mappings of this external type, e.g. `company` or `device`.
    #[arg(long)]
    pub external_type: Option<String>,
}

#[derive(Debug, Args)]
pub struct IdentityPinArgs {
    #[arg(long)]
    pub connection: i64,

    /// Upstream company or site id.
    #[arg(long)]
    pub external_id: String,

    /// Local organization id.
    #[arg(long)]
    pub organization: i64,
}

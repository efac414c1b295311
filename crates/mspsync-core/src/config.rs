//! Engine configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `MSPSYNC_HOME` | `~/.mspsync` |
//! | `MSPSYNC_DB_PATH` | `$MSPSYNC_HOME/data/mspsync.duckdb` |
//! | `MSPSYNC_MASTER_KEY` | unset (required for anything touching credentials) |
//! | `MSPSYNC_ALLOW_PRIVATE_NETWORKS` | `false` |
//! | `MSPSYNC_HTTP_TIMEOUT_SECS` | `30` |
//! | `MSPSYNC_HTTP_MAX_RETRIES` | `3` |
//! | `MSPSYNC_MAX_CONCURRENT_SYNCS` | `4` |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mspsync_warehouse::WarehouseConfig;

use crate::credentials::SecretString;
use crate::http::{NetworkPolicy, RetryConfig};
use crate::registry::ProviderRegistry;
use crate::secrets::{EncryptionError, SecretsManager};
use crate::{ProviderError, ValidationError};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 4;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub home: PathBuf,
    pub db_path: PathBuf,
    pub master_key: Option<SecretString>,
    pub allow_private_networks: bool,
    pub http_timeout: Duration,
    pub http_max_retries: u32,
    pub max_concurrent_syncs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_warehouse(WarehouseConfig::default())
    }
}

impl EngineConfig {
    fn from_warehouse(warehouse: WarehouseConfig) -> Self {
        Self {
            home: warehouse.mspsync_home,
            db_path: warehouse.db_path,
            master_key: None,
            allow_private_networks: false,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            http_max_retries: DEFAULT_MAX_RETRIES,
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
        }
    }

    /// Read the process environment.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let warehouse = match get("MSPSYNC_HOME") {
            Some(home) => WarehouseConfig::in_home(home.trim()),
            None => WarehouseConfig::default(),
        };
        let mut config = Self::from_warehouse(warehouse);

        if let Some(path) = get("MSPSYNC_DB_PATH") {
            config.db_path = PathBuf::from(path.trim());
        }
        config.master_key = get("MSPSYNC_MASTER_KEY").map(|key| SecretString::new(key.trim()));
        if let Some(value) = get("MSPSYNC_ALLOW_PRIVATE_NETWORKS") {
            config.allow_private_networks = parse_flag("MSPSYNC_ALLOW_PRIVATE_NETWORKS", &value)?;
        }
        if let Some(value) = get("MSPSYNC_HTTP_TIMEOUT_SECS") {
            let secs: u64 = parse_positive("MSPSYNC_HTTP_TIMEOUT_SECS", &value)?;
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = get("MSPSYNC_HTTP_MAX_RETRIES") {
            config.http_max_retries = parse_number("MSPSYNC_HTTP_MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("MSPSYNC_MAX_CONCURRENT_SYNCS") {
            config.max_concurrent_syncs = parse_positive("MSPSYNC_MAX_CONCURRENT_SYNCS", &value)?;
        }

        Ok(config)
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig {
            mspsync_home: self.home.clone(),
            db_path: self.db_path.clone(),
            ..WarehouseConfig::in_home(&self.home)
        }
    }

    /// Secrets manager for the configured master key.
    ///
    /// # Errors
    /// `MissingMasterKey` when no key is configured, or the key's own
    /// validation error.
    pub fn secrets_manager(&self) -> Result<SecretsManager, EncryptionError> {
        let key = self.master_key.as_ref().ok_or(EncryptionError::MissingMasterKey)?;
        SecretsManager::from_base64_key(key.expose())
    }

    pub fn retry_config(&self) -> RetryConfig {
        if self.http_max_retries == 0 {
            return RetryConfig::no_retry();
        }
        RetryConfig::exponential(self.http_max_retries)
    }

    pub fn network_policy(&self) -> NetworkPolicy {
        NetworkPolicy::new(self.allow_private_networks)
    }

    /// Registry using the production transport and these network settings.
    ///
    /// # Errors
    /// The production HTTP client failed to build.
    pub fn registry(&self) -> Result<ProviderRegistry, ProviderError> {
        ProviderRegistry::builder()
            .with_network_policy(self.network_policy())
            .with_retry(self.retry_config())
            .with_timeout_ms(u64::try_from(self.http_timeout.as_millis()).unwrap_or(u64::MAX))
            .build()
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ValidationError> {
    value.trim().parse().map_err(|_| invalid(name, value))
}

fn parse_positive<T>(name: &'static str, value: &str) -> Result<T, ValidationError>
where
    T: FromStr + PartialOrd + Default,
{
    let parsed: T = parse_number(name, value)?;
    if parsed > T::default() {
        Ok(parsed)
    } else {
        Err(invalid(name, value))
    }
}

fn invalid(name: &'static str, value: &str) -> ValidationError {
    ValidationError::InvalidSetting {
        name,
        value: value.to_owned(),
    }
}

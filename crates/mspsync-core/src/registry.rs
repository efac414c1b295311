//! Adapter construction.
//!
//! [`ProviderRegistry`] turns a provider type, base URL and decrypted
//! credentials into a ready adapter: the URL is vetted by the
//! [`NetworkPolicy`] first, then an [`ApiClient`] is assembled with the shared
//! transport, retry policy, timeout and per-provider throttle.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use mspsync_warehouse::ConnectionRecord;
use tracing::debug;

use crate::adapters::{
    AteraAdapter, AutotaskAdapter, ConnectwiseAdapter, DattoRmmAdapter, FreshserviceAdapter, HaloAdapter,
    NinjaOneAdapter, SyncroAdapter, TacticalRmmAdapter,
};
use crate::credentials::{parse_credentials, ProviderCredentials};
use crate::http::{
    ApiClient, HttpClient, NetworkPolicy, ProviderPolicy, ReqwestHttpClient, RequestThrottle, RetryConfig,
    DEFAULT_TIMEOUT_MS,
};
use crate::provider::{Capabilities, PsaProvider, RmmProvider};
use crate::secrets::SecretsManager;
use crate::{ProviderError, ProviderFamily, ProviderType, SyncError};

/// A constructed adapter of either family.
pub enum AnyProvider {
    Psa(Box<dyn PsaProvider>),
    Rmm(Box<dyn RmmProvider>),
}

impl AnyProvider {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::Psa(provider) => provider.provider_type(),
            Self::Rmm(provider) => provider.provider_type(),
        }
    }

    pub fn family(&self) -> ProviderFamily {
        self.provider_type().family()
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Psa(provider) => provider.capabilities(),
            Self::Rmm(provider) => provider.capabilities(),
        }
    }

    pub async fn test_connection(&self) -> Result<bool, ProviderError> {
        match self {
            Self::Psa(provider) => provider.test_connection().await,
            Self::Rmm(provider) => provider.test_connection().await,
        }
    }
}

impl std::fmt::Debug for AnyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnyProvider").field(&self.provider_type()).finish()
    }
}

/// Builder for [`ProviderRegistry`].
#[derive(Debug, Clone)]
pub struct ProviderRegistryBuilder {
    transport: Option<Arc<dyn HttpClient>>,
    network: NetworkPolicy,
    retry: RetryConfig,
    timeout_ms: u64,
    throttling: bool,
}

impl Default for ProviderRegistryBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            network: NetworkPolicy::default(),
            retry: RetryConfig::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            throttling: true,
        }
    }
}

impl ProviderRegistryBuilder {
    pub fn with_http_client(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_network_policy(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn without_throttling(mut self) -> Self {
        self.throttling = false;
        self
    }

    /// # Errors
    /// No transport was supplied and the production client failed to build.
    pub fn build(self) -> Result<ProviderRegistry, ProviderError> {
        let transport: Arc<dyn HttpClient> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestHttpClient::new().map_err(|error| ProviderError::upstream(error.to_string()))?),
        };
        Ok(ProviderRegistry {
            transport,
            network: self.network,
            retry: self.retry,
            timeout_ms: self.timeout_ms,
            throttling: self.throttling,
        })
    }
}

/// Maps provider types to adapter constructors.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    transport: Arc<dyn HttpClient>,
    network: NetworkPolicy,
    retry: RetryConfig,
    timeout_ms: u64,
    throttling: bool,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn network_policy(&self) -> &NetworkPolicy {
        &self.network
    }

    /// Every provider type this registry can construct.
    pub fn supported_types(&self) -> &'static [ProviderType] {
        &ProviderType::ALL
    }

    /// Build an adapter for `provider_type`.
    ///
    /// # Errors
    /// `UrlRejected` when the base URL fails the network policy,
    /// `InvalidCredentials` when `credentials` belong to another provider.
    pub async fn create(
        &self,
        provider_type: ProviderType,
        base_url: &str,
        credentials: ProviderCredentials,
    ) -> Result<AnyProvider, ProviderError> {
        let base_url = self.network.validate(base_url).await?;
        debug!(provider = %provider_type, host = base_url.host_str().unwrap_or_default(), "building adapter");

        let throttle = self
            .throttling
            .then(|| RequestThrottle::from_policy(&ProviderPolicy::default_for(provider_type)));
        let api = ApiClient::new(provider_type, base_url, Arc::clone(&self.transport))
            .with_retry(self.retry.clone())
            .with_throttle(throttle)
            .with_timeout_ms(self.timeout_ms);

        Ok(match (provider_type, credentials) {
            (ProviderType::ConnectwiseManage, ProviderCredentials::Connectwise(credentials)) => {
                AnyProvider::Psa(Box::new(ConnectwiseAdapter::new(api, credentials)))
            }
            (ProviderType::Autotask, ProviderCredentials::Autotask(credentials)) => {
                AnyProvider::Psa(Box::new(AutotaskAdapter::new(api, credentials)))
            }
            (ProviderType::Halopsa, ProviderCredentials::Halopsa(credentials)) => {
                AnyProvider::Psa(Box::new(HaloAdapter::new(api, credentials)?))
            }
            (ProviderType::Syncro, ProviderCredentials::Syncro(credentials)) => {
                AnyProvider::Psa(Box::new(SyncroAdapter::new(api, credentials)))
            }
            (ProviderType::Freshservice, ProviderCredentials::Freshservice(credentials)) => {
                AnyProvider::Psa(Box::new(FreshserviceAdapter::new(api, credentials)))
            }
            (ProviderType::Ninjaone, ProviderCredentials::Ninjaone(credentials)) => {
                AnyProvider::Rmm(Box::new(NinjaOneAdapter::new(api, credentials)?))
            }
            (ProviderType::DattoRmm, ProviderCredentials::DattoRmm(credentials)) => {
                AnyProvider::Rmm(Box::new(DattoRmmAdapter::new(api, credentials)?))
            }
            (ProviderType::Atera, ProviderCredentials::Atera(credentials)) => {
                AnyProvider::Rmm(Box::new(AteraAdapter::new(api, credentials)))
            }
            (ProviderType::TacticalRmm, ProviderCredentials::TacticalRmm(credentials)) => {
                AnyProvider::Rmm(Box::new(TacticalRmmAdapter::new(api, credentials)))
            }
            (provider_type, _) => {
                return Err(ProviderError::invalid_credentials(format!(
                    "credentials do not match provider '{provider_type}'"
                )))
            }
        })
    }

    /// Build an adapter from plaintext credential fields.
    pub async fn create_from_fields(
        &self,
        provider_type: ProviderType,
        base_url: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<AnyProvider, ProviderError> {
        let credentials = parse_credentials(provider_type, fields)?;
        self.create(provider_type, base_url, credentials).await
    }

    /// Build the adapter of a stored connection. Credentials are decrypted
    /// here and live only inside the returned adapter.
    pub async fn create_for_connection(
        &self,
        connection: &ConnectionRecord,
        secrets: &SecretsManager,
    ) -> Result<AnyProvider, SyncError> {
        let provider_type = ProviderType::from_str(&connection.provider_type)?;
        let fields = secrets.decrypt_blob(&connection.credentials)?;
        Ok(self
            .create_from_fields(provider_type, &connection.base_url, &fields)
            .await?)
    }

    /// Check that `fields` parse and the adapter authenticates upstream.
    pub async fn validate_credentials(
        &self,
        provider_type: ProviderType,
        base_url: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<bool, ProviderError> {
        self.create_from_fields(provider_type, base_url, fields)
            .await?
            .test_connection()
            .await
    }
}

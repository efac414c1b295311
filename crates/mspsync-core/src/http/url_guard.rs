//! Outbound URL validation.
//!
//! Base URLs come from operators and are fetched server-side, so every host
//! is resolved and each resolved address is checked against private,
//! loopback, link-local and other internal ranges before any request is made.
//! Hosts that cannot be resolved are rejected.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;
use url::{Host, Url};

use crate::ProviderError;

pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<IpAddr>, String>> + Send + 'a>>;

/// Name resolution used by the guard.
pub trait HostResolver: Send + Sync {
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> ResolveFuture<'a>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> ResolveFuture<'a> {
        Box::pin(async move {
            tokio::net::lookup_host((host, port))
                .await
                .map(|addresses| addresses.map(|address| address.ip()).collect())
                .map_err(|error| error.to_string())
        })
    }
}

/// Fixed host table for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, addresses: Vec<IpAddr>) -> Self {
        self.entries
            .insert(host.into().to_ascii_lowercase(), addresses);
        self
    }
}

impl HostResolver for StaticResolver {
    fn resolve<'a>(&'a self, host: &'a str, _port: u16) -> ResolveFuture<'a> {
        let result = self
            .entries
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| format!("no address for host '{host}'"));
        Box::pin(async move { result })
    }
}

/// Rules applied to outbound base URLs.
#[derive(Clone)]
pub struct NetworkPolicy {
    pub allow_private_networks: bool,
    resolver: Arc<dyn HostResolver>,
}

impl Debug for NetworkPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkPolicy")
            .field("allow_private_networks", &self.allow_private_networks)
            .finish_non_exhaustive()
    }
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self::new(false)
    }
}

impl NetworkPolicy {
    pub fn new(allow_private_networks: bool) -> Self {
        Self {
            allow_private_networks,
            resolver: Arc::new(SystemResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Parse and vet `raw`, returning the URL safe to send requests to.
    ///
    /// # Errors
    /// `UrlRejected` for bad schemes, missing hosts, unresolvable hosts and
    /// hosts with any internal address.
    pub async fn validate(&self, raw: &str) -> Result<Url, ProviderError> {
        let url = Url::parse(raw.trim())
            .map_err(|error| ProviderError::url_rejected(format!("invalid URL '{raw}': {error}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProviderError::url_rejected(format!(
                "URL scheme '{}' is not allowed",
                url.scheme()
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ProviderError::url_rejected("URL must not embed credentials"));
        }

        let host = url
            .host()
            .ok_or_else(|| ProviderError::url_rejected(format!("URL '{raw}' has no host")))?;
        if self.allow_private_networks {
            return Ok(url);
        }

        let addresses = match &host {
            Host::Ipv4(address) => vec![IpAddr::V4(*address)],
            Host::Ipv6(address) => vec![IpAddr::V6(*address)],
            Host::Domain(domain) => {
                let port = url.port_or_known_default().unwrap_or(443);
                self.resolver.resolve(domain, port).await.map_err(|error| {
                    ProviderError::url_rejected(format!("host '{domain}' could not be resolved: {error}"))
                })?
            }
        };

        if addresses.is_empty() {
            return Err(ProviderError::url_rejected(format!(
                "host '{host}' resolved to no addresses"
            )));
        }
        if let Some(blocked) = addresses.iter().find(|address| is_internal_address(**address)) {
            warn!(host = %host, address = %blocked, "rejected URL resolving to an internal address");
            return Err(ProviderError::url_rejected(format!(
                "host '{host}' resolves to internal address {blocked}"
            )));
        }

        Ok(url)
    }
}

/// True for addresses an operator-supplied URL must never reach.
pub fn is_internal_address(address: IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => is_internal_v6(v6),
    }
}

fn is_internal_v4(address: Ipv4Addr) -> bool {
    let [a, b, ..] = address.octets();
    address.is_private()
        || address.is_loopback()
        || address.is_link_local()
        || address.is_unspecified()
        || address.is_broadcast()
        || address.is_multicast()
        || address.is_documentation()
        || a == 0
        // shared address space (carrier-grade NAT), 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 64)
        // benchmarking, 198.18.0.0/15
        || (a == 198 && (b & 0xfe) == 18)
        || a >= 240
}

fn is_internal_v6(address: Ipv6Addr) -> bool {
    if let Some(mapped) = address.to_ipv4_mapped() {
        return is_internal_v4(mapped);
    }
    let first = address.segments()[0];
    address.is_loopback()
        || address.is_unspecified()
        || address.is_multicast()
        // unique local, fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local, fe80::/10
        || (first & 0xffc0) == 0xfe80
        // documentation, 2001:db8::/32
        || (first == 0x2001 && address.segments()[1] == 0x0db8)
}

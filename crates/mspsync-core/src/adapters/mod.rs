//! # Provider Adapters
//!
//! | Adapter | Family | Auth | Pagination |
//! |---------|--------|------|------------|
//! | [`ConnectwiseAdapter`] | PSA | Basic + `clientId` header | page number |
//! | [`AutotaskAdapter`] | PSA | integration headers | `nextPageUrl` |
//! | [`HaloAdapter`] | PSA | OAuth2 client credentials | page number (`record_count`) |
//! | [`SyncroAdapter`] | PSA | Bearer API key | page number (`meta.total_pages`) |
//! | [`FreshserviceAdapter`] | PSA | Basic `api_key:X` | page number (short page ends) |
//! | [`NinjaOneAdapter`] | RMM | OAuth2 client credentials | `after` cursor |
//! | [`DattoRmmAdapter`] | RMM | OAuth2 password grant | `nextPageUrl` |
//! | [`AteraAdapter`] | RMM | `X-API-KEY` | page number (`totalPages`) |
//! | [`TacticalRmmAdapter`] | RMM | `X-API-KEY` | single dump |

mod atera;
mod autotask;
mod connectwise;
mod datto_rmm;
mod freshservice;
mod halo;
mod ninjaone;
pub(crate) mod normalize;
mod syncro;
mod tactical;

pub use atera::AteraAdapter;
pub use autotask::AutotaskAdapter;
pub use connectwise::ConnectwiseAdapter;
pub use datto_rmm::DattoRmmAdapter;
pub use freshservice::FreshserviceAdapter;
pub use halo::HaloAdapter;
pub use ninjaone::NinjaOneAdapter;
pub use syncro::SyncroAdapter;
pub use tactical::TacticalRmmAdapter;

#[cfg(test)]
pub(crate) fn test_api(
    provider: crate::ProviderType,
    base_url: &str,
    transport: std::sync::Arc<crate::http::ScriptedHttpClient>,
) -> crate::http::ApiClient {
    crate::http::ApiClient::new(
        provider,
        url::Url::parse(base_url).expect("base url"),
        transport,
    )
    .with_retry(crate::http::RetryConfig::no_retry())
}

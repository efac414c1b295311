//! Outbound HTTP: transport, retries, URL vetting, OAuth, throttling, and
//! the JSON [`ApiClient`] adapters are built on.

pub mod api;
pub mod client;
pub mod mock;
pub mod oauth;
pub mod retry;
pub mod throttle;
pub mod url_guard;

pub use api::{ApiAuth, ApiClient, DEFAULT_TIMEOUT_MS};
pub use client::{HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use mock::ScriptedHttpClient;
pub use oauth::{ClientAuthentication, OAuthGrant, OAuthTokenSource};
pub use retry::{Backoff, RetryConfig};
pub use throttle::{ProviderPolicy, RequestThrottle};
pub use url_guard::{is_internal_address, HostResolver, NetworkPolicy, StaticResolver, SystemResolver};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::client::{HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use super::oauth::OAuthTokenSource;
use super::retry::RetryConfig;
use super::throttle::RequestThrottle;
use crate::{ProviderError, ProviderType};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const ERROR_BODY_SNIPPET: usize = 200;

/// How requests of one client are authenticated.
#[derive(Debug, Clone)]
pub enum ApiAuth {
    Static(HttpAuth),
    OAuth(Arc<OAuthTokenSource>),
}

/// JSON API client bound to one validated base URL.
///
/// Every request checks the cancellation token, waits for throttle budget,
/// applies auth and default headers, and is retried per [`RetryConfig`].
/// A 401 on an OAuth client drops the cached token and re-authenticates once.
#[derive(Clone)]
pub struct ApiClient {
    provider: ProviderType,
    base_url: Url,
    transport: Arc<dyn HttpClient>,
    auth: ApiAuth,
    headers: BTreeMap<String, String>,
    retry: RetryConfig,
    throttle: Option<RequestThrottle>,
    timeout_ms: u64,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url.as_str())
            .field("auth", &self.auth)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(provider: ProviderType, base_url: Url, transport: Arc<dyn HttpClient>) -> Self {
        Self {
            provider,
            base_url,
            transport,
            auth: ApiAuth::Static(HttpAuth::None),
            headers: BTreeMap::new(),
            retry: RetryConfig::default(),
            throttle: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = ApiAuth::Static(auth);
        self
    }

    pub fn with_oauth(mut self, tokens: Arc<OAuthTokenSource>) -> Self {
        self.auth = ApiAuth::OAuth(tokens);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle(mut self, throttle: Option<RequestThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub const fn provider(&self) -> ProviderType {
        self.provider
    }

    pub fn transport(&self) -> Arc<dyn HttpClient> {
        Arc::clone(&self.transport)
    }

    pub const fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// `path` appended to the base URL path, plus query pairs.
    pub fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ProviderError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let joined = if path.is_empty() {
            base.to_owned()
        } else {
            format!("{base}/{path}")
        };

        let mut url = Url::parse(&joined)
            .map_err(|error| ProviderError::url_rejected(format!("invalid request URL: {error}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, ProviderError> {
        let url = self.url(path, query)?;
        let response = self.execute(HttpMethod::Get, url, None, cancel).await?;
        parse_json(&response)
    }

    /// GET an absolute URL handed out by the API (e.g. a next-page link).
    /// The URL must share the base URL's origin.
    pub async fn get_json_url(&self, raw: &str, cancel: &CancellationToken) -> Result<Value, ProviderError> {
        let url = Url::parse(raw)
            .map_err(|error| ProviderError::malformed_response(format!("invalid page link '{raw}': {error}")))?;
        if url.origin() != self.base_url.origin() {
            return Err(ProviderError::url_rejected(format!(
                "page link '{raw}' leaves the configured host"
            )));
        }
        let response = self.execute(HttpMethod::Get, url, None, cancel).await?;
        parse_json(&response)
    }

    /// Request with a JSON body. Non-idempotent methods are never retried.
    pub async fn send_json(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, String)],
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ProviderError> {
        let url = self.url(path, query)?;
        let response = self
            .execute(method, url, Some(body.to_string()), cancel)
            .await?;
        parse_json(&response)
    }

    async fn execute(
        &self,
        method: HttpMethod,
        url: Url,
        body: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ProviderError> {
        let mut attempt = 0_u32;
        let mut reauthenticated = false;

        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::cancelled());
            }
            if let Some(throttle) = &self.throttle {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
                    _ = throttle.until_ready() => {}
                }
            }

            let request = self.build_request(method, &url, body.as_deref()).await?;
            debug!(provider = %self.provider, %method, path = url.path(), attempt, "sending request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
                outcome = self.transport.execute(request) => outcome,
            };

            let delay = match outcome {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if response.status == 401 => {
                    if let ApiAuth::OAuth(tokens) = &self.auth {
                        if !reauthenticated {
                            reauthenticated = true;
                            tokens.invalidate().await;
                            continue;
                        }
                    }
                    return Err(ProviderError::authentication(format!(
                        "{} rejected the credentials (HTTP 401)",
                        self.provider
                    )));
                }
                Ok(response) => {
                    if !(self.retry.allows_retry(method, attempt)
                        && self.retry.should_retry_status(response.status))
                    {
                        return Err(self.status_error(&response, attempt));
                    }
                    warn!(provider = %self.provider, status = response.status, attempt, "retrying request");
                    self.retry.delay_for_response(attempt, &response)
                }
                Err(error) => {
                    if !(self.retry.retry_on_transport
                        && error.retryable()
                        && self.retry.allows_retry(method, attempt))
                    {
                        return Err(ProviderError::upstream(format!(
                            "{} request failed: {error}",
                            self.provider
                        )));
                    }
                    warn!(provider = %self.provider, %error, attempt, "retrying after transport error");
                    self.retry.delay_for_attempt(attempt)
                }
            };

            attempt += 1;
            sleep_or_cancel(delay, cancel).await?;
        }
    }

    async fn build_request(
        &self,
        method: HttpMethod,
        url: &Url,
        body: Option<&str>,
    ) -> Result<HttpRequest, ProviderError> {
        let mut request = HttpRequest::new(method, url.as_str())
            .with_timeout_ms(self.timeout_ms)
            .with_header("accept", "application/json");
        for (name, value) in &self.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request
                .with_header("content-type", "application/json")
                .with_body(body);
        }

        let request = match &self.auth {
            ApiAuth::Static(auth) => request.with_auth(auth),
            ApiAuth::OAuth(tokens) => {
                let token = tokens.access_token().await?;
                request.with_auth(&HttpAuth::BearerToken(token))
            }
        };
        Ok(request)
    }

    fn status_error(&self, response: &HttpResponse, attempt: u32) -> ProviderError {
        if response.status == 429 {
            return ProviderError::rate_limited(format!(
                "{} rate limit still exceeded after {} attempt(s)",
                self.provider,
                attempt + 1
            ));
        }
        let snippet: String = response.body.chars().take(ERROR_BODY_SNIPPET).collect();
        ProviderError::upstream_status(
            response.status,
            format!("{} returned HTTP {}: {snippet}", self.provider, response.status),
        )
    }
}

fn parse_json(response: &HttpResponse) -> Result<Value, ProviderError> {
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body)
        .map_err(|error| ProviderError::malformed_response(format!("response is not valid JSON: {error}")))
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), ProviderError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::cancelled()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SecretString;
    use crate::http::mock::ScriptedHttpClient;
    use crate::http::oauth::OAuthGrant;
    use crate::ProviderErrorKind;

    fn client(transport: Arc<ScriptedHttpClient>) -> ApiClient {
        ApiClient::new(
            ProviderType::Syncro,
            Url::parse("https://acme.syncromsp.com/api/v1").expect("url"),
            transport,
        )
        .with_auth(HttpAuth::BearerToken(String::from("key")))
        .with_retry(RetryConfig::fixed(Duration::from_millis(1), 3))
    }

    #[test]
    fn urls_extend_the_base_path() {
        let api = client(Arc::new(ScriptedHttpClient::new()));
        let url = api
            .url("/customers", &[("page", String::from("2")), ("q", String::from("a b"))])
            .expect("url");
        assert_eq!(url.as_str(), "https://acme.syncromsp.com/api/v1/customers?page=2&q=a+b");
    }

    #[tokio::test]
    async fn transient_statuses_are_retried() {
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on(HttpMethod::Get, "/customers", HttpResponse::new(503, "busy"))
                .on(HttpMethod::Get, "/customers", HttpResponse::new(429, "slow down"))
                .on_json(HttpMethod::Get, "/customers", serde_json::json!({"customers": []})),
        );
        let api = client(Arc::clone(&transport));

        let body = api
            .get_json("customers", &[], &CancellationToken::new())
            .await
            .expect("eventually succeeds");
        assert_eq!(body["customers"], serde_json::json!([]));
        assert_eq!(transport.request_count("/customers"), 3);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_is_reported_as_such() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Get,
            "/customers",
            HttpResponse::new(429, ""),
        ));
        let error = client(Arc::clone(&transport))
            .get_json("customers", &[], &CancellationToken::new())
            .await
            .expect_err("rate limited");

        assert_eq!(error.kind(), ProviderErrorKind::RateLimited);
        assert_eq!(transport.request_count("/customers"), 4);
    }

    #[tokio::test]
    async fn unauthorized_is_never_retried() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Get,
            "/customers",
            HttpResponse::new(401, ""),
        ));
        let error = client(Arc::clone(&transport))
            .get_json("customers", &[], &CancellationToken::new())
            .await
            .expect_err("unauthorized");

        assert_eq!(error.kind(), ProviderErrorKind::Authentication);
        assert_eq!(transport.request_count("/customers"), 1);
    }

    #[tokio::test]
    async fn posts_are_not_retried() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Patch,
            "/alerts",
            HttpResponse::new(503, ""),
        ));
        let error = client(Arc::clone(&transport))
            .send_json(HttpMethod::Patch, "alerts", &[], &serde_json::json!({}), &CancellationToken::new())
            .await
            .expect_err("unavailable");

        assert_eq!(error.status(), Some(503));
        assert_eq!(transport.request_count("/alerts"), 1);
    }

    #[tokio::test]
    async fn invalid_json_is_a_malformed_response() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Get,
            "/customers",
            HttpResponse::ok_json("<html>"),
        ));
        let error = client(transport)
            .get_json("customers", &[], &CancellationToken::new())
            .await
            .expect_err("html");
        assert_eq!(error.kind(), ProviderErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_sending() {
        let transport = Arc::new(ScriptedHttpClient::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = client(Arc::clone(&transport))
            .get_json("customers", &[], &cancel)
            .await
            .expect_err("cancelled");
        assert_eq!(error.kind(), ProviderErrorKind::Cancelled);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn page_links_must_stay_on_the_base_origin() {
        let api = client(Arc::new(ScriptedHttpClient::new()));
        let error = api
            .get_json_url("https://evil.example.net/api/v1/customers", &CancellationToken::new())
            .await
            .expect_err("foreign host");
        assert_eq!(error.kind(), ProviderErrorKind::UrlRejected);
    }

    #[tokio::test]
    async fn oauth_clients_reauthenticate_once_on_401() {
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on_json(HttpMethod::Post, "/auth/token", serde_json::json!({"access_token": "t1"}))
                .on_json(HttpMethod::Post, "/auth/token", serde_json::json!({"access_token": "t2"}))
                .on(HttpMethod::Get, "/api/Client", HttpResponse::new(401, ""))
                .on_json(HttpMethod::Get, "/api/Client", serde_json::json!({"clients": []})),
        );
        let tokens = OAuthTokenSource::new(
            Url::parse("https://halo.example.com/auth/token").expect("url"),
            OAuthGrant::ClientCredentials,
            "id",
            SecretString::new("secret"),
            Arc::clone(&transport) as Arc<dyn HttpClient>,
        );
        let api = ApiClient::new(
            ProviderType::Halopsa,
            Url::parse("https://halo.example.com").expect("url"),
            Arc::clone(&transport) as Arc<dyn HttpClient>,
        )
        .with_oauth(Arc::new(tokens));

        api.get_json("api/Client", &[], &CancellationToken::new())
            .await
            .expect("second token works");

        let sent = transport.requests();
        let authorizations: Vec<_> = sent
            .iter()
            .filter(|request| request.url.contains("/api/Client"))
            .filter_map(|request| request.header("authorization").map(str::to_owned))
            .collect();
        assert_eq!(authorizations, ["Bearer t1", "Bearer t2"]);
    }
}

//! OAuth2 token acquisition with an in-memory cache.
//!
//! Tokens are refreshed 60 seconds before they expire and dropped when the
//! API answers 401. The cache lock is held across the token request so
//! concurrent callers share one refresh.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::client::{HttpAuth, HttpClient, HttpRequest};
use crate::credentials::SecretString;
use crate::ProviderError;

const REFRESH_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_EXPIRES_IN: u64 = 3_600;

/// Grant used to obtain access tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthGrant {
    ClientCredentials,
    Password {
        username: String,
        password: SecretString,
    },
}

/// Where the client id and secret travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthentication {
    /// `client_id`/`client_secret` form fields.
    RequestBody,
    /// HTTP Basic header.
    BasicHeader,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct OAuthTokenSource {
    token_url: Url,
    grant: OAuthGrant,
    client_id: String,
    client_secret: SecretString,
    scope: Option<String>,
    client_authentication: ClientAuthentication,
    transport: Arc<dyn HttpClient>,
    timeout_ms: u64,
    cache: Mutex<Option<CachedToken>>,
}

impl Debug for OAuthTokenSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenSource")
            .field("token_url", &self.token_url.as_str())
            .field("grant", &self.grant)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl OAuthTokenSource {
    pub fn new(
        token_url: Url,
        grant: OAuthGrant,
        client_id: impl Into<String>,
        client_secret: SecretString,
        transport: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            token_url,
            grant,
            client_id: client_id.into(),
            client_secret,
            scope: None,
            client_authentication: ClientAuthentication::RequestBody,
            transport,
            timeout_ms: 30_000,
            cache: Mutex::new(None),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_client_authentication(mut self, client_authentication: ClientAuthentication) -> Self {
        self.client_authentication = client_authentication;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// A valid access token, fetched when none is cached or the cached one is
    /// about to expire.
    pub async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_SKEW {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *cache = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    async fn request_token(&self) -> Result<CachedToken, ProviderError> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(6);
        match &self.grant {
            OAuthGrant::ClientCredentials => form.push(("grant_type", "client_credentials")),
            OAuthGrant::Password { username, password } => {
                form.push(("grant_type", "password"));
                form.push(("username", username.as_str()));
                form.push(("password", password.expose()));
            }
        }
        if self.client_authentication == ClientAuthentication::RequestBody {
            form.push(("client_id", self.client_id.as_str()));
            form.push(("client_secret", self.client_secret.expose()));
        }
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let body = form
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        let mut request = HttpRequest::post(self.token_url.as_str())
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_header("accept", "application/json")
            .with_body(body)
            .with_timeout_ms(self.timeout_ms);
        if self.client_authentication == ClientAuthentication::BasicHeader {
            request = request.with_auth(&HttpAuth::Basic {
                username: self.client_id.clone(),
                password: self.client_secret.expose().to_owned(),
            });
        }

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|error| ProviderError::upstream(format!("token request failed: {error}")))?;

        match response.status {
            200..=299 => {}
            400 | 401 | 403 => {
                return Err(ProviderError::authentication(format!(
                    "token endpoint rejected the credentials (HTTP {})",
                    response.status
                )))
            }
            429 => return Err(ProviderError::rate_limited("token endpoint is rate limiting")),
            status => {
                return Err(ProviderError::upstream_status(
                    status,
                    format!("token endpoint returned HTTP {status}"),
                ))
            }
        }

        let parsed: TokenResponse = serde_json::from_str(&response.body).map_err(|error| {
            ProviderError::malformed_response(format!("token response is not valid: {error}"))
        })?;
        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        debug!(token_url = %self.token_url, expires_in, "obtained access token");

        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::ScriptedHttpClient;
    use crate::http::client::{HttpMethod, HttpResponse};

    fn source(transport: Arc<ScriptedHttpClient>) -> OAuthTokenSource {
        OAuthTokenSource::new(
            Url::parse("https://halo.example.com/auth/token").expect("url"),
            OAuthGrant::ClientCredentials,
            "client",
            SecretString::new("s3cret"),
            transport,
        )
        .with_scope("all")
    }

    #[tokio::test]
    async fn tokens_are_cached_until_close_to_expiry() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Post,
            "/auth/token",
            HttpResponse::ok_json(r#"{"access_token":"abc","expires_in":3600}"#),
        ));
        let tokens = source(Arc::clone(&transport));

        assert_eq!(tokens.access_token().await.expect("token"), "abc");
        assert_eq!(tokens.access_token().await.expect("token"), "abc");
        assert_eq!(transport.request_count("/auth/token"), 1);

        let sent = transport.requests();
        let body = sent[0].body.as_deref().unwrap_or_default();
        assert!(body.contains("grant_type=client_credentials"));
        assert!(body.contains("client_secret=s3cret"));
        assert!(body.contains("scope=all"));
    }

    #[tokio::test]
    async fn short_lived_tokens_refresh_proactively() {
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on(
                    HttpMethod::Post,
                    "/auth/token",
                    HttpResponse::ok_json(r#"{"access_token":"first","expires_in":30}"#),
                )
                .on(
                    HttpMethod::Post,
                    "/auth/token",
                    HttpResponse::ok_json(r#"{"access_token":"second","expires_in":30}"#),
                ),
        );
        let tokens = source(Arc::clone(&transport));

        assert_eq!(tokens.access_token().await.expect("token"), "first");
        assert_eq!(tokens.access_token().await.expect("token"), "second");
    }

    #[tokio::test]
    async fn invalidation_forces_a_new_token() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Post,
            "/auth/token",
            HttpResponse::ok_json(r#"{"access_token":"abc"}"#),
        ));
        let tokens = source(Arc::clone(&transport));

        tokens.access_token().await.expect("token");
        tokens.invalidate().await;
        tokens.access_token().await.expect("token");
        assert_eq!(transport.request_count("/auth/token"), 2);
    }

    #[tokio::test]
    async fn rejected_credentials_are_authentication_errors() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Post,
            "/auth/token",
            HttpResponse::new(400, r#"{"error":"invalid_client"}"#),
        ));
        let error = source(transport).access_token().await.expect_err("rejected");
        assert_eq!(error.code(), "provider.authentication");
    }

    #[tokio::test]
    async fn password_grant_uses_basic_client_authentication() {
        let transport = Arc::new(ScriptedHttpClient::new().on(
            HttpMethod::Post,
            "/auth/oauth/token",
            HttpResponse::ok_json(r#"{"access_token":"dat"}"#),
        ));
        let tokens = OAuthTokenSource::new(
            Url::parse("https://zinfandel-api.centrastage.net/auth/oauth/token").expect("url"),
            OAuthGrant::Password {
                username: String::from("key"),
                password: SecretString::new("secret"),
            },
            "public-client",
            SecretString::new("public"),
            Arc::clone(&transport) as Arc<dyn HttpClient>,
        )
        .with_client_authentication(ClientAuthentication::BasicHeader);

        tokens.access_token().await.expect("token");
        let sent = &transport.requests()[0];
        assert!(sent.header("authorization").is_some_and(|value| value.starts_with("Basic ")));
        assert!(!sent.body.as_deref().unwrap_or_default().contains("client_secret"));
    }
}

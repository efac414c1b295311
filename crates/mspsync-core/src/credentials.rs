//! Typed provider credentials.
//!
//! Decrypted credential field maps are parsed into one struct per platform
//! before an adapter is built, so a missing field fails before any network
//! attempt. Secret values are wrapped in [`SecretString`], whose `Debug`
//! output is redacted.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

use crate::{ProviderError, ProviderType};

/// A credential value that must never reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectwiseCredentials {
    pub company_id: String,
    pub public_key: String,
    pub private_key: SecretString,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutotaskCredentials {
    pub username: String,
    pub secret: SecretString,
    pub integration_code: SecretString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: Option<String>,
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyCredentials {
    pub api_key: SecretString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DattoCredentials {
    pub api_key: String,
    pub api_secret: SecretString,
}

/// Parsed credentials for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCredentials {
    Connectwise(ConnectwiseCredentials),
    Autotask(AutotaskCredentials),
    Halopsa(OAuthClientCredentials),
    Syncro(ApiKeyCredentials),
    Freshservice(ApiKeyCredentials),
    Ninjaone(OAuthClientCredentials),
    DattoRmm(DattoCredentials),
    Atera(ApiKeyCredentials),
    TacticalRmm(ApiKeyCredentials),
}

/// Field names each platform requires.
pub const fn required_fields(provider: ProviderType) -> &'static [&'static str] {
    match provider {
        ProviderType::ConnectwiseManage => &["company_id", "public_key", "private_key", "client_id"],
        ProviderType::Autotask => &["username", "secret", "integration_code"],
        ProviderType::Halopsa | ProviderType::Ninjaone => &["client_id", "client_secret"],
        ProviderType::DattoRmm => &["api_key", "api_secret"],
        ProviderType::Syncro
        | ProviderType::Freshservice
        | ProviderType::Atera
        | ProviderType::TacticalRmm => &["api_key"],
    }
}

/// Build the typed credentials of `provider` from a decrypted field map.
///
/// # Errors
/// `InvalidCredentials` naming the first missing or blank field.
pub fn parse_credentials(
    provider: ProviderType,
    fields: &BTreeMap<String, String>,
) -> Result<ProviderCredentials, ProviderError> {
    let fields = Fields { provider, fields };

    Ok(match provider {
        ProviderType::ConnectwiseManage => ProviderCredentials::Connectwise(ConnectwiseCredentials {
            company_id: fields.required("company_id")?,
            public_key: fields.required("public_key")?,
            private_key: fields.secret("private_key")?,
            client_id: fields.required("client_id")?,
        }),
        ProviderType::Autotask => ProviderCredentials::Autotask(AutotaskCredentials {
            username: fields.required("username")?,
            secret: fields.secret("secret")?,
            integration_code: fields.secret("integration_code")?,
        }),
        ProviderType::Halopsa => ProviderCredentials::Halopsa(fields.oauth_client()?),
        ProviderType::Ninjaone => ProviderCredentials::Ninjaone(fields.oauth_client()?),
        ProviderType::Syncro => ProviderCredentials::Syncro(fields.api_key()?),
        ProviderType::Freshservice => ProviderCredentials::Freshservice(fields.api_key()?),
        ProviderType::Atera => ProviderCredentials::Atera(fields.api_key()?),
        ProviderType::TacticalRmm => ProviderCredentials::TacticalRmm(fields.api_key()?),
        ProviderType::DattoRmm => ProviderCredentials::DattoRmm(DattoCredentials {
            api_key: fields.required("api_key")?,
            api_secret: fields.secret("api_secret")?,
        }),
    })
}

struct Fields<'a> {
    provider: ProviderType,
    fields: &'a BTreeMap<String, String>,
}

impl Fields<'_> {
    fn optional(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }

    fn required(&self, name: &str) -> Result<String, ProviderError> {
        self.optional(name).ok_or_else(|| {
            ProviderError::invalid_credentials(format!(
                "credential field '{name}' is required for provider '{}'",
                self.provider
            ))
        })
    }

    fn secret(&self, name: &str) -> Result<SecretString, ProviderError> {
        self.required(name).map(SecretString::new)
    }

    fn api_key(&self) -> Result<ApiKeyCredentials, ProviderError> {
        Ok(ApiKeyCredentials {
            api_key: self.secret("api_key")?,
        })
    }

    fn oauth_client(&self) -> Result<OAuthClientCredentials, ProviderError> {
        Ok(OAuthClientCredentials {
            client_id: self.required("client_id")?,
            client_secret: self.secret("client_secret")?,
            scope: self.optional("scope"),
            tenant: self.optional("tenant"),
        })
    }
}

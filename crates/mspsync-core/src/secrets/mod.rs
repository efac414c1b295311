//! Credential encryption.
//!
//! Values are sealed with AES-256-GCM under a 32-byte master key. Each call
//! draws a fresh 96-bit nonce from the OS CSPRNG; the stored form is
//! `base64(nonce || ciphertext || tag)`. Empty strings pass through unchanged
//! so optional credential fields stay empty.

pub mod rotation;

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use thiserror::Error;

/// Length of the AES-256 master key in bytes.
pub const KEY_LENGTH: usize = 32;

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// Failures of the secrets layer. Messages never carry key or plaintext bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("master key is not configured")]
    MissingMasterKey,

    #[error("master key must be base64 encoding {KEY_LENGTH} bytes, got {actual}")]
    InvalidMasterKey { actual: usize },

    #[error("master key is not valid base64")]
    MasterKeyNotBase64,

    #[error("ciphertext is malformed: {0}")]
    MalformedCiphertext(&'static str),

    #[error("ciphertext failed authentication (wrong key or tampered data)")]
    TamperedCiphertext,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("credential blob is not a JSON object of strings")]
    MalformedBlob,
}

/// Envelope cipher bound to one master key.
#[derive(Clone)]
pub struct SecretsManager {
    cipher: Aes256Gcm,
}

impl Debug for SecretsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretsManager { key: <redacted> }")
    }
}

impl SecretsManager {
    /// Build from raw key bytes; anything but exactly 32 bytes is rejected.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != KEY_LENGTH {
            return Err(EncryptionError::InvalidMasterKey { actual: key.len() });
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| EncryptionError::InvalidMasterKey { actual: key.len() })?;
        Ok(Self { cipher })
    }

    /// Build from a standard-base64 master key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, EncryptionError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| EncryptionError::MasterKeyNotBase64)?;
        Self::from_key_bytes(&bytes)
    }

    /// A fresh random master key, base64 encoded.
    pub fn generate_master_key() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        STANDARD.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| EncryptionError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_LENGTH + sealed.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);
        Ok(STANDARD.encode(envelope))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, EncryptionError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let envelope = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| EncryptionError::MalformedCiphertext("not base64"))?;
        if envelope.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(EncryptionError::MalformedCiphertext("too short"));
        }

        let (nonce, sealed) = envelope.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| EncryptionError::TamperedCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::MalformedCiphertext("not UTF-8"))
    }

    pub fn encrypt_fields(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, EncryptionError> {
        fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.encrypt(value)?)))
            .collect()
    }

    pub fn decrypt_fields(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, EncryptionError> {
        fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.decrypt(value)?)))
            .collect()
    }

    /// Encrypt a field map into the JSON blob stored on a connection.
    pub fn encrypt_blob(&self, fields: &BTreeMap<String, String>) -> Result<String, EncryptionError> {
        let sealed = self.encrypt_fields(fields)?;
        let object: Map<String, Value> = sealed
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        Ok(Value::Object(object).to_string())
    }

    /// Decrypt a stored connection credential blob into its field map.
    pub fn decrypt_blob(&self, blob: &str) -> Result<BTreeMap<String, String>, EncryptionError> {
        self.decrypt_fields(&parse_blob(blob)?)
    }
}

/// Parse a credential blob into its (still encrypted) field map.
pub fn parse_blob(blob: &str) -> Result<BTreeMap<String, String>, EncryptionError> {
    let value: Value = serde_json::from_str(blob).map_err(|_| EncryptionError::MalformedBlob)?;
    let Value::Object(object) = value else {
        return Err(EncryptionError::MalformedBlob);
    };
    object
        .into_iter()
        .map(|(name, value)| match value {
            Value::String(value) => Ok((name, value)),
            _ => Err(EncryptionError::MalformedBlob),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SecretsManager {
        SecretsManager::from_key_bytes(&[7u8; KEY_LENGTH]).expect("key")
    }

    #[test]
    fn nonces_differ_between_calls() {
        let secrets = manager();
        let first = secrets.encrypt("hunter2").expect("encrypt");
        let second = secrets.encrypt("hunter2").expect("encrypt");
        assert_ne!(first, second);
        assert_eq!(secrets.decrypt(&first).expect("decrypt"), "hunter2");
    }

    #[test]
    fn short_and_non_base64_ciphertexts_are_malformed() {
        let secrets = manager();
        assert!(matches!(
            secrets.decrypt("%%%"),
            Err(EncryptionError::MalformedCiphertext(_))
        ));
        assert!(matches!(
            secrets.decrypt(&STANDARD.encode([0u8; 8])),
            Err(EncryptionError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn wrong_length_keys_are_rejected() {
        assert_eq!(
            SecretsManager::from_base64_key(&STANDARD.encode([1u8; 16])).map(|_| ()),
            Err(EncryptionError::InvalidMasterKey { actual: 16 })
        );
        assert_eq!(
            SecretsManager::from_base64_key("not base64!").map(|_| ()),
            Err(EncryptionError::MasterKeyNotBase64)
        );
    }

    #[test]
    fn generated_keys_are_usable() {
        let key = SecretsManager::generate_master_key();
        let secrets = SecretsManager::from_base64_key(&key).expect("generated key");
        let sealed = secrets.encrypt("value").expect("encrypt");
        assert_eq!(secrets.decrypt(&sealed).expect("decrypt"), "value");
    }

    #[test]
    fn blob_round_trip_keeps_empty_fields_empty() {
        let secrets = manager();
        let mut fields = BTreeMap::new();
        fields.insert(String::from("api_key"), String::from("k-123"));
        fields.insert(String::from("tenant"), String::new());

        let blob = secrets.encrypt_blob(&fields).expect("blob");
        assert!(!blob.contains("k-123"));
        let sealed = parse_blob(&blob).expect("parse");
        assert_eq!(sealed.get("tenant").map(String::as_str), Some(""));
        assert_eq!(secrets.decrypt_blob(&blob).expect("open"), fields);
    }

    #[test]
    fn debug_output_hides_the_key() {
        assert_eq!(format!("{:?}", manager()), "SecretsManager { key: <redacted> }");
    }
}

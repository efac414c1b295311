//! Master key rotation.
//!
//! Every stored value is opened under the old key, resealed under the new
//! key, and written back through the store one record at a time. A record that
//! fails is reported and skipped; rotation continues with the next one.

use std::fmt::Display;

use mspsync_warehouse::{Warehouse, WarehouseError};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{parse_blob, EncryptionError, SecretsManager};

/// One encrypted value held by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
    pub id: String,
    pub ciphertext: String,
}

/// Storage holding encrypted values that can be rotated.
pub trait EncryptedValueStore {
    type Error: Display;

    fn encrypted_values(&self) -> Result<Vec<StoredSecret>, Self::Error>;

    /// Replace one value in its own transaction, failing if it no longer holds
    /// `previous`.
    fn replace_encrypted_value(
        &self,
        id: &str,
        previous: &str,
        replacement: &str,
    ) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub rotated_count: usize,
    pub failed_count: usize,
    pub failures: Vec<RotationFailure>,
}

/// Re-encrypt everything in `store` from `old` to `new`.
///
/// Values that are JSON objects of strings are treated as credential blobs and
/// resealed field by field; anything else is a single ciphertext.
///
/// # Errors
/// Fails only when the store cannot enumerate its values.
pub fn rotate_keys<S: EncryptedValueStore>(
    store: &S,
    old: &SecretsManager,
    new: &SecretsManager,
) -> Result<RotationReport, S::Error> {
    let mut report = RotationReport::default();

    for secret in store.encrypted_values()? {
        let outcome = reseal(&secret.ciphertext, old, new)
            .map_err(|error| error.to_string())
            .and_then(|replacement| {
                store
                    .replace_encrypted_value(&secret.id, &secret.ciphertext, &replacement)
                    .map_err(|error| error.to_string())
            });

        match outcome {
            Ok(()) => report.rotated_count += 1,
            Err(reason) => {
                warn!(record = %secret.id, %reason, "key rotation failed for record");
                report.failed_count += 1;
                report.failures.push(RotationFailure {
                    id: secret.id,
                    reason,
                });
            }
        }
    }

    info!(
        rotated = report.rotated_count,
        failed = report.failed_count,
        "key rotation finished"
    );
    Ok(report)
}

fn reseal(
    ciphertext: &str,
    old: &SecretsManager,
    new: &SecretsManager,
) -> Result<String, EncryptionError> {
    if ciphertext.trim_start().starts_with('{') {
        let fields = parse_blob(ciphertext)?;
        let mut resealed = Map::new();
        for (name, value) in fields {
            let plaintext = old.decrypt(&value)?;
            resealed.insert(name, Value::String(new.encrypt(&plaintext)?));
        }
        return Ok(Value::Object(resealed).to_string());
    }

    new.encrypt(&old.decrypt(ciphertext)?)
}

/// Connection credential blobs are the warehouse's encrypted values.
impl EncryptedValueStore for Warehouse {
    type Error = WarehouseError;

    fn encrypted_values(&self) -> Result<Vec<StoredSecret>, Self::Error> {
        Ok(self
            .list_credential_blobs()?
            .into_iter()
            .map(|(id, ciphertext)| StoredSecret {
                id: id.to_string(),
                ciphertext,
            })
            .collect())
    }

    fn replace_encrypted_value(
        &self,
        id: &str,
        previous: &str,
        replacement: &str,
    ) -> Result<(), Self::Error> {
        let id = id
            .parse::<i64>()
            .map_err(|_| WarehouseError::InvalidData(format!("connection id '{id}'")))?;
        self.replace_credentials(id, previous, replacement)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use super::*;
    use crate::secrets::KEY_LENGTH;

    /// In-memory store keyed by position.
    struct MemoryStore {
        values: RefCell<Vec<String>>,
    }

    impl EncryptedValueStore for MemoryStore {
        type Error = String;

        fn encrypted_values(&self) -> Result<Vec<StoredSecret>, Self::Error> {
            Ok(self
                .values
                .borrow()
                .iter()
                .enumerate()
                .map(|(index, ciphertext)| StoredSecret {
                    id: index.to_string(),
                    ciphertext: ciphertext.clone(),
                })
                .collect())
        }

        fn replace_encrypted_value(&self, id: &str, previous: &str, replacement: &str) -> Result<(), Self::Error> {
            let index: usize = id.parse().map_err(|_| format!("bad id {id}"))?;
            let mut values = self.values.borrow_mut();
            match values.get_mut(index) {
                Some(slot) if slot == previous => {
                    *slot = replacement.to_owned();
                    Ok(())
                }
                _ => Err(format!("value {id} changed")),
            }
        }
    }

    #[test]
    fn one_corrupt_value_does_not_stop_the_rest() {
        let old = SecretsManager::from_key_bytes(&[1u8; KEY_LENGTH]).expect("old");
        let new = SecretsManager::from_key_bytes(&[2u8; KEY_LENGTH]).expect("new");
        let mut values: Vec<String> = (0..10)
            .map(|index| old.encrypt(&format!("secret-{index}")).expect("seal"))
            .collect();
        values[3] = String::from("AAAA-not-a-ciphertext");
        let store = MemoryStore {
            values: RefCell::new(values),
        };

        let report = rotate_keys(&store, &old, &new).expect("rotation");

        assert_eq!((report.rotated_count, report.failed_count), (9, 1));
        assert_eq!(report.failures[0].id, "3");
        let values = store.values.borrow();
        assert_eq!(new.decrypt(&values[9]).expect("rotated"), "secret-9");
        assert_eq!(values[3], "AAAA-not-a-ciphertext");
    }

    #[test]
    fn blobs_are_resealed_field_by_field() {
        let old = SecretsManager::from_key_bytes(&[1u8; KEY_LENGTH]).expect("old");
        let new = SecretsManager::from_key_bytes(&[2u8; KEY_LENGTH]).expect("new");
        let mut fields = BTreeMap::new();
        fields.insert(String::from("client_id"), String::from("abc"));
        fields.insert(String::from("client_secret"), String::from("xyz"));

        let blob = old.encrypt_blob(&fields).expect("blob");
        let resealed = reseal(&blob, &old, &new).expect("reseal");

        assert_eq!(new.decrypt_blob(&resealed).expect("open"), fields);
        assert!(old.decrypt_blob(&resealed).is_err());
    }
}

//! Behavior-driven tests for credential encryption and key rotation.
//!
//! These tests verify what an operator observes: credentials never rest in
//! plaintext, a wrong key is refused, and rotation moves every blob to the new
//! key while reporting the ones it could not move.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mspsync_core::secrets::rotation::rotate_keys;
use mspsync_core::{EncryptionError, SecretsManager, Warehouse};
use mspsync_tests::temp_warehouse;
use mspsync_warehouse::{EntityToggles, NewConnection};

fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
        .collect()
}

fn manager(byte: u8) -> SecretsManager {
    SecretsManager::from_key_bytes(&[byte; 32]).expect("valid key")
}

fn store_blob(warehouse: &Warehouse, name: &str, credentials: String) -> i64 {
    warehouse
        .insert_connection(&NewConnection {
            provider_type: String::from("syncro"),
            name: name.to_owned(),
            base_url: String::from("https://acme.syncromsp.com/api/v1"),
            credentials,
            toggles: EntityToggles::default(),
            sync_interval_minutes: 60,
            is_active: true,
            sync_enabled: true,
            organization_id: None,
            import_organizations: false,
            organization_prefix: None,
        })
        .expect("insert connection")
}

// =============================================================================
// Secrets: Master Key Handling
// =============================================================================

#[test]
fn when_operator_generates_a_key_it_is_accepted_back() {
    // Given: A freshly generated key
    let key = SecretsManager::generate_master_key();

    // Then: It decodes to a usable manager and differs on every call
    assert!(SecretsManager::from_base64_key(&key).is_ok());
    assert_ne!(key, SecretsManager::generate_master_key());
}

#[test]
fn when_operator_supplies_a_short_or_garbled_key_it_is_rejected() {
    assert_eq!(
        SecretsManager::from_key_bytes(&[1; 16]).expect_err("16 bytes"),
        EncryptionError::InvalidMasterKey { actual: 16 }
    );
    assert_eq!(
        SecretsManager::from_base64_key("not base64 at all!").expect_err("garbled"),
        EncryptionError::MasterKeyNotBase64
    );
}

#[test]
fn when_a_manager_is_debug_printed_no_key_material_shows() {
    let rendered = format!("{:?}", manager(9));
    assert!(rendered.contains("redacted"));
    assert!(!rendered.contains('9'));
}

// =============================================================================
// Secrets: Credential Blobs
// =============================================================================

#[test]
fn when_credentials_are_sealed_the_blob_hides_values_but_keeps_field_names() {
    // Given: Plaintext credentials
    let secrets = manager(1);
    let plaintext = fields(&[("client_id", "acme-client"), ("client_secret", "s3cr3t-value")]);

    // When: They are sealed into a blob
    let blob = secrets.encrypt_blob(&plaintext).expect("seal");

    // Then: Field names are readable, values are not, and the blob opens again
    assert!(blob.contains("client_secret"));
    assert!(!blob.contains("s3cr3t-value"));
    assert!(!blob.contains("acme-client"));
    assert_eq!(secrets.decrypt_blob(&blob).expect("open"), plaintext);
}

#[test]
fn when_the_same_value_is_sealed_twice_the_ciphertexts_differ() {
    let secrets = manager(1);
    let first = secrets.encrypt("same secret").expect("seal");
    let second = secrets.encrypt("same secret").expect("seal");
    assert_ne!(first, second);
}

#[test]
fn when_a_single_ciphertext_bit_flips_decryption_refuses_it() {
    // Given: A sealed value
    let secrets = manager(1);
    let sealed = secrets.encrypt("connectwise-private-key").expect("seal");

    // When: The last byte (inside the tag) is flipped
    let mut bytes = STANDARD.decode(&sealed).expect("base64");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let tampered = STANDARD.encode(bytes);

    // Then: Authentication fails instead of yielding garbage
    assert_eq!(secrets.decrypt(&tampered).expect_err("tampered"), EncryptionError::TamperedCiphertext);
}

#[test]
fn when_an_empty_value_is_sealed_it_stays_empty() {
    let secrets = manager(1);
    assert_eq!(secrets.encrypt("").expect("seal"), "");
    assert_eq!(secrets.decrypt("").expect("open"), "");
}

#[test]
fn when_a_blob_is_opened_with_another_key_it_fails_authentication() {
    let blob = manager(1).encrypt_blob(&fields(&[("api_key", "k")])).expect("seal");
    assert_eq!(
        manager(2).decrypt_blob(&blob).expect_err("wrong key"),
        EncryptionError::TamperedCiphertext
    );
}

#[test]
fn when_a_stored_blob_is_not_an_object_it_is_reported_as_malformed() {
    assert_eq!(
        manager(1).decrypt_blob("[1, 2, 3]").expect_err("array"),
        EncryptionError::MalformedBlob
    );
}

// =============================================================================
// Secrets: Key Rotation
// =============================================================================

#[test]
fn when_operator_rotates_keys_every_readable_blob_moves_to_the_new_key() {
    // Given: Two connections sealed under the old key and one under a foreign key
    let (_temp, warehouse) = temp_warehouse();
    let (old, new, foreign) = (manager(1), manager(2), manager(3));

    let syncro = fields(&[("api_key", "syncro-key")]);
    let ninja = fields(&[("client_id", "ninja-id"), ("client_secret", "ninja-secret")]);
    let first = store_blob(&warehouse, "Syncro", old.encrypt_blob(&syncro).expect("seal"));
    let second = store_blob(&warehouse, "NinjaOne", old.encrypt_blob(&ninja).expect("seal"));
    let stray = store_blob(&warehouse, "Stray", foreign.encrypt_blob(&syncro).expect("seal"));

    // When: Rotation runs from old to new
    let report = rotate_keys(&warehouse, &old, &new).expect("rotation");

    // Then: Two blobs rotate, the foreign one is reported by connection id
    assert_eq!(report.rotated_count, 2);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.failures[0].id, stray.to_string());

    // And: Rotated blobs open only under the new key
    let blobs: BTreeMap<i64, String> = warehouse.list_credential_blobs().expect("blobs").into_iter().collect();
    assert_eq!(new.decrypt_blob(&blobs[&first]).expect("syncro"), syncro);
    assert_eq!(new.decrypt_blob(&blobs[&second]).expect("ninja"), ninja);
    assert!(old.decrypt_blob(&blobs[&first]).is_err());

    // And: The failed blob is left exactly as it was
    assert!(foreign.decrypt_blob(&blobs[&stray]).is_ok());
}

#[test]
fn when_rotation_runs_twice_with_the_same_keys_nothing_is_double_sealed() {
    let (_temp, warehouse) = temp_warehouse();
    let (old, new) = (manager(1), manager(2));
    store_blob(&warehouse, "Syncro", old.encrypt_blob(&fields(&[("api_key", "k")])).expect("seal"));

    assert_eq!(rotate_keys(&warehouse, &old, &new).expect("first").rotated_count, 1);

    // Second pass under the same old key cannot open the already-rotated blob
    let again = rotate_keys(&warehouse, &old, &new).expect("second");
    assert_eq!((again.rotated_count, again.failed_count), (0, 1));
    let (_, blob) = warehouse.list_credential_blobs().expect("blobs").remove(0);
    assert_eq!(new.decrypt_blob(&blob).expect("still new")["api_key"], "k");
}

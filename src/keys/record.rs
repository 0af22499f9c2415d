//! Key pair <-> `Secret` encoding.

use super::KeyStoreError;
use crate::codec::KeyPair;
use crate::constants::{
    KEY_PAIR_SECRET_NAME, LABEL_MANAGED_BY, MANAGED_BY_VALUE, PRIVATE_KEY_FIELD, PUBLIC_KEY_FIELD,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Build the `Secret` that stores `pair` for `namespace`
pub fn key_pair_secret(namespace: &str, pair: &KeyPair) -> Secret {
    let data = BTreeMap::from([
        (
            PUBLIC_KEY_FIELD.to_owned(),
            ByteString(pair.public_key.as_bytes().to_vec()),
        ),
        (
            PRIVATE_KEY_FIELD.to_owned(),
            ByteString(pair.private_key.as_bytes().to_vec()),
        ),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(KEY_PAIR_SECRET_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_owned(),
                MANAGED_BY_VALUE.to_owned(),
            )])),
            ..Default::default()
        },
        type_: Some("Opaque".to_owned()),
        data: Some(data),
        ..Default::default()
    }
}

fn field<'a>(namespace: &str, secret: &'a Secret, key: &str) -> Result<&'a [u8], KeyStoreError> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| bytes.0.as_slice())
        .ok_or_else(|| KeyStoreError::CorruptRecord {
            namespace: namespace.to_owned(),
            reason: format!("missing '{key}'"),
        })
}

fn utf8(namespace: &str, key: &str, bytes: &[u8]) -> Result<String, KeyStoreError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| KeyStoreError::CorruptRecord {
        namespace: namespace.to_owned(),
        reason: format!("'{key}' is not valid UTF-8"),
    })
}

/// Read both halves back out of a stored `Secret`
///
/// # Errors
///
/// Returns [`KeyStoreError::CorruptRecord`] if a field is missing or not text.
pub fn decode_key_pair_secret(namespace: &str, secret: &Secret) -> Result<KeyPair, KeyStoreError> {
    let public_key = utf8(
        namespace,
        PUBLIC_KEY_FIELD,
        field(namespace, secret, PUBLIC_KEY_FIELD)?,
    )?;
    let private_key = Zeroizing::new(utf8(
        namespace,
        PRIVATE_KEY_FIELD,
        field(namespace, secret, PRIVATE_KEY_FIELD)?,
    )?);
    Ok(KeyPair {
        public_key,
        private_key,
    })
}

/// Only the public half; does not require the private field to be readable
pub(super) fn decode_public_key(namespace: &str, secret: &Secret) -> Result<String, KeyStoreError> {
    utf8(namespace, PUBLIC_KEY_FIELD, field(namespace, secret, PUBLIC_KEY_FIELD)?)
}

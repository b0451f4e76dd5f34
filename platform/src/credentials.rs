//! Unwrapping of platform API keys stored alongside webhook records.
//!
//! Keys are encrypted with AES-256-GCM under a key derived with scrypt from a
//! service-wide secret and a per-record salt. All four parts are stored as
//! base64 strings; the authentication tag is kept separate from the
//! ciphertext.

use crate::errors::DecryptionError;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce, Tag};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SALT_LEN: usize = 16;

/// An encrypted API key as persisted in a webhook record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedApiKey {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,
    pub salt: String,
}

/// scrypt cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    // N = 16384, r = 8, p = 1
    fn default() -> Self {
        KdfParams {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

pub struct CredentialUnwrapper {
    secret: String,
    params: KdfParams,
}

impl CredentialUnwrapper {
    pub fn new(secret: impl Into<String>) -> Self {
        Self::with_params(secret, KdfParams::default())
    }

    pub fn with_params(secret: impl Into<String>, params: KdfParams) -> Self {
        CredentialUnwrapper {
            secret: secret.into(),
            params,
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN], DecryptionError> {
        let params = scrypt::Params::new(self.params.log_n, self.params.r, self.params.p, KEY_LEN)
            .map_err(|_| DecryptionError::KeyDerivation)?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(self.secret.as_bytes(), salt, &params, &mut key)
            .map_err(|_| DecryptionError::KeyDerivation)?;
        Ok(key)
    }

    /// Decrypts a stored API key. A tag mismatch means the record was tampered
    /// with or the secret is wrong; either way it is not retryable.
    pub fn unwrap(&self, encrypted: &EncryptedApiKey) -> Result<String, DecryptionError> {
        let salt = decode("salt", &encrypted.salt)?;
        let nonce = decode_exact("nonce", &encrypted.nonce, NONCE_LEN)?;
        let tag = decode_exact("tag", &encrypted.tag, TAG_LEN)?;
        let mut buffer = decode("ciphertext", &encrypted.ciphertext)?;

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| DecryptionError::KeyDerivation)?;
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| DecryptionError::TagMismatch)?;

        String::from_utf8(buffer).map_err(|_| DecryptionError::InvalidPlaintext)
    }

    /// Encrypts an API key with a fresh random salt and nonce, producing the
    /// form stored in webhook records.
    pub fn wrap(&self, api_key: &str) -> Result<EncryptedApiKey, DecryptionError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| DecryptionError::KeyDerivation)?;
        let mut buffer = api_key.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| DecryptionError::Encryption)?;

        Ok(EncryptedApiKey {
            ciphertext: BASE64.encode(&buffer),
            nonce: BASE64.encode(nonce),
            tag: BASE64.encode(tag),
            salt: BASE64.encode(salt),
        })
    }
}

fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, DecryptionError> {
    BASE64
        .decode(value.trim())
        .map_err(|_| DecryptionError::InvalidEncoding { field })
}

fn decode_exact(
    field: &'static str,
    value: &str,
    expected: usize,
) -> Result<Vec<u8>, DecryptionError> {
    let bytes = decode(field, value)?;
    if bytes.len() != expected {
        return Err(DecryptionError::InvalidLength {
            field,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

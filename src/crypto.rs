//! Social account token sealing with AES-256-GCM.
//!
//! Sealed payloads are `version || nonce || ciphertext+tag`, with the owning
//! organization, platform, and account bound in as additional authenticated
//! data so a token copied onto another account row fails to open.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// 32-byte AES key wiped from memory on drop.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    sealed.push(VERSION_ENCRYPTED);
    sealed.extend_from_slice(&nonce);
    sealed.append(&mut ciphertext);
    Ok(sealed)
}

/// Opens a sealed payload. Bytes without the version marker are returned as-is.
pub fn decrypt_bytes(key: &CryptoKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let Some(&version) = sealed.first() else {
        return Err(CryptoError::EmptyCiphertext);
    };
    if version != VERSION_ENCRYPTED {
        return Ok(sealed.to_vec());
    }
    if sealed.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&sealed[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let body = &sealed[VERSION_FIELD_LEN + NONCE_LEN..];
    debug_assert!(body.len() >= TAG_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(nonce, Payload { msg: body, aad })
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

pub fn is_encrypted_payload(sealed: &[u8]) -> bool {
    sealed.len() >= MIN_ENCRYPTED_LEN && sealed[0] == VERSION_ENCRYPTED
}

/// Seals and opens social account tokens. Without a key, tokens are stored as
/// UTF-8 bytes, which stays readable once a key is introduced later.
#[derive(Debug, Clone, Default)]
pub struct TokenVault {
    key: Option<CryptoKey>,
}

impl TokenVault {
    pub fn new(key: Option<CryptoKey>) -> Self {
        Self { key }
    }

    pub fn from_config_key(bytes: Option<&[u8]>) -> Result<Self, CryptoError> {
        let key = bytes.map(|b| CryptoKey::new(b.to_vec())).transpose()?;
        Ok(Self { key })
    }

    pub fn is_encrypting(&self) -> bool {
        self.key.is_some()
    }

    pub fn seal(&self, binding: &AccountBinding, token: &str) -> Result<Vec<u8>, CryptoError> {
        match &self.key {
            Some(key) => encrypt_bytes(key, binding.aad().as_bytes(), token.as_bytes()),
            None => Ok(token.as_bytes().to_vec()),
        }
    }

    pub fn open(&self, binding: &AccountBinding, sealed: &[u8]) -> Result<String, CryptoError> {
        let bytes = match &self.key {
            Some(key) => decrypt_bytes(key, binding.aad().as_bytes(), sealed)?,
            None if is_encrypted_payload(sealed) => {
                return Err(CryptoError::DecryptionFailed(
                    "token is encrypted but no key is configured".to_string(),
                ));
            }
            None => sealed.to_vec(),
        };
        String::from_utf8(bytes)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {e}")))
    }
}

/// Identity a sealed token is bound to.
#[derive(Debug, Clone, Copy)]
pub struct AccountBinding<'a> {
    pub organization_id: Uuid,
    pub platform: &'a str,
    pub account_id: Uuid,
}

impl AccountBinding<'_> {
    fn aad(&self) -> String {
        format!(
            "{}|{}|{}",
            self.organization_id, self.platform, self.account_id
        )
    }
}

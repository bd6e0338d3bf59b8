//! Secret values and the at-rest cipher for signing key passphrases.

use std::{convert::Infallible, fmt, str::FromStr};

use base64::{Engine, prelude::BASE64_STANDARD};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("Invalid base64 key: {0}")]
    InvalidKeyEncoding(#[from] base64::DecodeError),
    #[error("Failed to encrypt secret")]
    Encryption,
    #[error("Failed to decrypt secret")]
    Decryption,
    #[error("Decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

/// [`SecretString`] which can be compared, cloned and parsed from command line arguments.
#[derive(Clone)]
pub struct SecretStringWrapper(SecretString);

impl SecretStringWrapper {
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl fmt::Debug for SecretStringWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretStringWrapper([REDACTED])")
    }
}

impl PartialEq for SecretStringWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.expose_secret() == other.expose_secret()
    }
}

impl Eq for SecretStringWrapper {}

impl From<String> for SecretStringWrapper {
    fn from(value: String) -> Self {
        Self(SecretString::from(value))
    }
}

impl FromStr for SecretStringWrapper {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

/// Symmetric cipher used to keep signing key passphrases encrypted at rest.
///
/// Sealed values are laid out as `nonce || ciphertext`.
pub struct PassphraseCipher {
    cipher: ChaCha20Poly1305,
}

#[cfg(test)]
impl std::fmt::Debug for PassphraseCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseCipher").finish_non_exhaustive()
    }
}

impl PassphraseCipher {
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, SecretError> {
        if key.len() != KEY_LEN {
            return Err(SecretError::InvalidKeyLength(key.len()));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| SecretError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Build the cipher from a base64-encoded 32 byte key.
    pub fn from_base64(key: &SecretStringWrapper) -> Result<Self, SecretError> {
        let decoded = BASE64_STANDARD.decode(key.expose_secret().trim())?;
        Self::from_key_bytes(&decoded)
    }

    pub fn seal(&self, secret: &SecretStringWrapper) -> Result<Vec<u8>, SecretError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, secret.expose_secret().as_bytes())
            .map_err(|_| SecretError::Encryption)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<SecretStringWrapper, SecretError> {
        if sealed.len() <= NONCE_LEN {
            return Err(SecretError::Decryption);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Decryption)?;
        String::from_utf8(plaintext)
            .map(SecretStringWrapper::from)
            .map_err(|_| SecretError::InvalidUtf8)
    }
}

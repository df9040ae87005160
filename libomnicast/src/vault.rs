//! Credential vault for OAuth secrets
//!
//! Every token that reaches the database passes through [`CredentialVault::encrypt`].
//! The cipher is AES-256-GCM with a fresh random 96-bit IV per call; the 128-bit
//! authentication tag is stored next to the ciphertext rather than appended to it,
//! so each stored secret (access token, refresh token) carries its own IV and tag
//! and can be decrypted, or fail, independently of the others.
//!
//! # Example
//!
//! ```
//! use libomnicast::vault::CredentialVault;
//! use secrecy::ExposeSecret;
//!
//! let vault = CredentialVault::from_base64_key(&CredentialVault::generate_key()).unwrap();
//! let sealed = vault.encrypt("ya29.token").unwrap();
//! assert_eq!(vault.decrypt(&sealed).unwrap().expose_secret(), "ya29.token");
//! ```

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::VaultError;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Ciphertext, IV and authentication tag of one secret, each base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSecret {
    pub cipher: String,
    pub iv: String,
    pub auth_tag: String,
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from a base64 encoded 32-byte key
    pub fn from_base64_key(key: &str) -> Result<Self, VaultError> {
        let key_bytes = Zeroizing::new(
            BASE64
                .decode(key.trim())
                .map_err(|e| VaultError::InvalidKey(format!("Invalid base64 key: {}", e)))?,
        );

        if key_bytes.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "Key must be {} bytes, got {}",
                KEY_LEN,
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Generate a new random key, base64 encoded
    pub fn generate_key() -> String {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        BASE64.encode(&key[..])
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedSecret {
            cipher: BASE64.encode(&sealed),
            iv: BASE64.encode(nonce.as_slice()),
            auth_tag: BASE64.encode(&tag),
        })
    }

    /// Decrypt a stored secret
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Decryption`] when the tag does not authenticate the
    /// ciphertext (tampering, wrong key) and [`VaultError::Encoding`] when a field
    /// is not valid base64 or has the wrong length.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<SecretString, VaultError> {
        let iv = decode_field("iv", &secret.iv)?;
        let tag = decode_field("authTag", &secret.auth_tag)?;
        let mut sealed = decode_field("cipher", &secret.cipher)?;

        if iv.len() != IV_LEN {
            return Err(VaultError::Encoding(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(VaultError::Encoding(format!(
                "authTag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }

        sealed.extend_from_slice(&tag);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
                .map_err(|_| VaultError::Decryption)?,
        );

        let text = std::str::from_utf8(&plaintext).map_err(|_| VaultError::Decryption)?;
        Ok(SecretString::from(text.to_string()))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, VaultError> {
    BASE64
        .decode(value)
        .map_err(|e| VaultError::Encoding(format!("{} is not valid base64: {}", name, e)))
}

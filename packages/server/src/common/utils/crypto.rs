//! Encryption at rest for platform access tokens.
//!
//! ChaCha20-Poly1305 with a random 12-byte nonce per value. The stored form is
//! `base64(nonce || ciphertext || tag)`.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct CredentialCipher {
    cipher: ChaCha20Poly1305,
}

impl CredentialCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Builds a cipher from the base64 `CREDENTIAL_KEY` setting.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .context("CREDENTIAL_KEY is not valid base64")?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow!("CREDENTIAL_KEY must be 32 bytes, got {}", b.len()))?;
        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| anyhow!("credential encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed)
            .context("stored credential is not valid base64")?;
        if bytes.len() <= NONCE_LEN {
            return Err(anyhow!("stored credential is truncated"));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("credential decryption failed (wrong key or tampered value)"))?;

        String::from_utf8(plaintext).context("decrypted credential is not UTF-8")
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new(&[7u8; KEY_LEN])
    }

    #[test]
    fn decrypts_what_it_encrypts() {
        let cipher = cipher();
        let sealed = cipher.encrypt("IGQVJ-token").unwrap();
        assert_ne!(sealed, "IGQVJ-token");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "IGQVJ-token");
    }

    #[test]
    fn same_plaintext_gets_fresh_nonce() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("t").unwrap(), cipher.encrypt("t").unwrap());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = cipher().encrypt("secret").unwrap();
        let other = CredentialCipher::new(&[9u8; KEY_LEN]);
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn key_must_be_32_bytes() {
        assert!(CredentialCipher::from_base64_key(&STANDARD.encode([1u8; 16])).is_err());
        assert!(CredentialCipher::from_base64_key(&STANDARD.encode([1u8; 32])).is_ok());
        assert!(CredentialCipher::from_base64_key("***").is_err());
    }
}

//! Secret handling: hashing of API keys, envelope encryption of webhook
//! signing secrets, and per-purpose key derivation from the master key.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

const NONCE_LEN: usize = 12;

/// Root key from which purpose-specific keys are derived.
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; 32],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|_| AppError::Internal("Master key must be hex encoded".into()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("Master key must be 32 bytes".into()))?;
        Ok(Self { key })
    }

    /// Random key, for development and tests only (secrets do not survive restarts).
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Derive a 32-byte key bound to `purpose`.
    pub fn derive(&self, purpose: &str) -> Result<[u8; 32]> {
        let hk = Hkdf::<Sha256>::new(Some(b"gateflow-v1"), &self.key);
        let mut okm = [0u8; 32];
        hk.expand(purpose.as_bytes(), &mut okm)
            .map_err(|_| AppError::Internal("Key derivation failed".into()))?;
        Ok(okm)
    }

    /// Encrypt with AES-256-GCM. Output layout: nonce (12 bytes) || ciphertext.
    pub fn encrypt(&self, purpose: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.derive(purpose)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| AppError::Internal("Invalid encryption key".into()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| AppError::Internal("Encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, purpose: &str, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() <= NONCE_LEN {
            return Err(AppError::Internal("Ciphertext too short".into()));
        }
        let key = self.derive(purpose)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| AppError::Internal("Invalid encryption key".into()))?;
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Internal("Decryption failed".into()))
    }

    pub fn encrypt_string(&self, purpose: &str, plaintext: &str) -> Result<Vec<u8>> {
        self.encrypt(purpose, plaintext.as_bytes())
    }

    pub fn decrypt_string(&self, purpose: &str, data: &[u8]) -> Result<String> {
        let bytes = self.decrypt(purpose, data)?;
        String::from_utf8(bytes).map_err(|_| AppError::Internal("Decrypted secret is not UTF-8".into()))
    }
}

/// Purpose label for webhook endpoint signing secrets.
pub const WEBHOOK_SECRET_PURPOSE: &str = "webhook-endpoint-secret";

/// Purpose label for signed download tokens.
pub const DOWNLOAD_TOKEN_PURPOSE: &str = "download-token";

/// SHA-256 hex digest used to store API keys (never stored in plaintext).
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random token: `prefix` followed by `bytes` random bytes, hex encoded.
pub fn generate_token(prefix: &str, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    format!("{}{}", prefix, hex::encode(buf))
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = MasterKey::generate();
        let encrypted = key.encrypt_string(WEBHOOK_SECRET_PURPOSE, "whsec_abc").unwrap();
        assert_ne!(&encrypted[NONCE_LEN..], b"whsec_abc");
        let decrypted = key.decrypt_string(WEBHOOK_SECRET_PURPOSE, &encrypted).unwrap();
        assert_eq!(decrypted, "whsec_abc");
    }

    #[test]
    fn test_decrypt_with_other_purpose_fails() {
        let key = MasterKey::generate();
        let encrypted = key.encrypt(WEBHOOK_SECRET_PURPOSE, b"secret").unwrap();
        assert!(key.decrypt(DOWNLOAD_TOKEN_PURPOSE, &encrypted).is_err());
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let a = MasterKey::generate();
        let b = MasterKey::generate();
        let encrypted = a.encrypt(WEBHOOK_SECRET_PURPOSE, b"secret").unwrap();
        assert!(b.decrypt(WEBHOOK_SECRET_PURPOSE, &encrypted).is_err());
    }

    #[test]
    fn test_from_hex_validates_length() {
        assert!(MasterKey::from_hex("abcd").is_err());
        assert!(MasterKey::from_hex("zz").is_err());
        assert!(MasterKey::from_hex(&"11".repeat(32)).is_ok());
    }

    #[test]
    fn test_hash_secret_is_stable() {
        assert_eq!(hash_secret("gf_key"), hash_secret("gf_key"));
        assert_ne!(hash_secret("gf_key"), hash_secret("gf_other"));
        assert_eq!(hash_secret("x").len(), 64);
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token("whsec_", 24);
        assert!(token.starts_with("whsec_"));
        assert_eq!(token.len(), "whsec_".len() + 48);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}

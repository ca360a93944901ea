use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::database::error::{EncryptionError, EncryptionResult};

const NONCE_LEN: usize = 12;

/// AES-256-GCM secret box for credential fields at rest.
///
/// Ciphertext layout is `nonce || sealed bytes`, base64-encoded so it can be
/// stored in plain `text` columns. The GCM tag authenticates the payload, so
/// tampering fails decryption rather than yielding garbage.
///
/// The key is fixed for the lifetime of the process; there is no mid-run
/// rotation.
pub struct SecretBox {
    key: [u8; 32],
}

impl SecretBox {
    /// Build a secret box from the `ENCRYPTION_KEY` material.
    ///
    /// Accepts either base64 of exactly 32 bytes or an arbitrary passphrase,
    /// which is stretched to 32 bytes with SHA-256.
    pub fn from_key_material(material: &str) -> EncryptionResult<Self> {
        if material.is_empty() {
            return Err(EncryptionError::InvalidKey(
                "encryption key is empty".to_string(),
            ));
        }

        let key = match general_purpose::STANDARD.decode(material) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                key
            }
            _ => Sha256::digest(material.as_bytes()).into(),
        };

        Ok(Self { key })
    }

    /// Encrypt a plaintext string. Empty input stays empty ("unset").
    pub fn encrypt(&self, plaintext: &str) -> EncryptionResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + sealed.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&sealed);

        Ok(general_purpose::STANDARD.encode(combined))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt). Empty input
    /// stays empty.
    pub fn decrypt(&self, ciphertext: &str) -> EncryptionResult<String> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let combined = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|_| EncryptionError::InvalidFormat)?;
        if combined.len() < NONCE_LEN {
            return Err(EncryptionError::InvalidFormat);
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;

        let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| EncryptionError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
    }

    /// Whether `value` is already a ciphertext produced with this key.
    ///
    /// Used by the registry to keep partial updates idempotent: a field that
    /// arrives still encrypted must not be wrapped a second time.
    pub fn is_ciphertext(&self, value: &str) -> bool {
        !value.is_empty() && self.decrypt(value).is_ok()
    }

    /// Encrypt `value` unless it is already ciphertext under this key.
    ///
    /// Doubly-encrypted fields (a historical bug class) are repaired here:
    /// if the decrypted payload itself decrypts again, the inner plaintext
    /// is re-encrypted once.
    pub fn encrypt_if_plain(&self, value: &str) -> EncryptionResult<String> {
        if value.is_empty() {
            return Ok(String::new());
        }

        match self.decrypt(value) {
            Err(_) => self.encrypt(value),
            Ok(inner) => {
                if let Ok(repaired) = self.decrypt(&inner) {
                    tracing::error!("doubly-encrypted credential detected, re-encrypting once");
                    return self.encrypt(&repaired);
                }
                Ok(value.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_box() -> SecretBox {
        SecretBox::from_key_material("unit-test-key").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let sb = secret_box();
        for plain in ["p@ss", "пароль", "a", &"x".repeat(4096)] {
            let enc = sb.encrypt(plain).unwrap();
            assert_ne!(enc, plain);
            assert_eq!(sb.decrypt(&enc).unwrap(), plain);
        }
    }

    #[test]
    fn test_empty_is_unset() {
        let sb = secret_box();
        assert_eq!(sb.encrypt("").unwrap(), "");
        assert_eq!(sb.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_nonce_uniqueness() {
        let sb = secret_box();
        assert_ne!(sb.encrypt("same").unwrap(), sb.encrypt("same").unwrap());
    }

    #[test]
    fn test_tampering_is_detected() {
        let sb = secret_box();
        let enc = sb.encrypt("sensitive").unwrap();
        let mut raw = general_purpose::STANDARD.decode(&enc).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = general_purpose::STANDARD.encode(&raw);
            assert!(
                matches!(
                    sb.decrypt(&tampered),
                    Err(EncryptionError::DecryptionFailed(_))
                ),
                "tampered byte {} was accepted",
                i
            );
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_garbage_is_invalid_format() {
        let sb = secret_box();
        assert!(matches!(
            sb.decrypt("not base64 at all!"),
            Err(EncryptionError::InvalidFormat)
        ));
        assert!(matches!(
            sb.decrypt(&general_purpose::STANDARD.encode([1u8; 4])),
            Err(EncryptionError::InvalidFormat)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sb = secret_box();
        let other = SecretBox::from_key_material("a different key").unwrap();
        let enc = sb.encrypt("secret").unwrap();
        assert!(other.decrypt(&enc).is_err());
    }

    #[test]
    fn test_encrypt_if_plain_is_idempotent() {
        let sb = secret_box();
        let once = sb.encrypt_if_plain("p@ss").unwrap();
        let twice = sb.encrypt_if_plain(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(sb.decrypt(&twice).unwrap(), "p@ss");
    }

    #[test]
    fn test_encrypt_if_plain_repairs_double_encryption() {
        let sb = secret_box();
        let double = sb.encrypt(&sb.encrypt("p@ss").unwrap()).unwrap();
        let repaired = sb.encrypt_if_plain(&double).unwrap();
        assert_eq!(sb.decrypt(&repaired).unwrap(), "p@ss");
    }

    #[test]
    fn test_base64_key_material() {
        let raw = general_purpose::STANDARD.encode([7u8; 32]);
        let sb = SecretBox::from_key_material(&raw).unwrap();
        let enc = sb.encrypt("x").unwrap();
        assert_eq!(sb.decrypt(&enc).unwrap(), "x");
    }
}

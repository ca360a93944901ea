use base64::engine::general_purpose;
use base64::Engine;
use russh_keys::key::{KeyPair, SignatureHash};
use russh_keys::PublicKeyBase64;
use sha2::{Digest, Sha256};

use crate::database::error::{SshError, SshResult};
use crate::models::ssh_key::KeyType;

const DEFAULT_RSA_BITS: usize = 2048;
const MIN_RSA_BITS: usize = 2048;
const MAX_RSA_BITS: usize = 8192;
/// PBKDF rounds for passphrase-protected PKCS#8 encoding.
const PEM_ENCRYPTION_ROUNDS: u32 = 100_000;
const PUBLIC_KEY_COMMENT: &str = "pgfleet";

/// Key material ready to be stored in the registry.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub key_type: KeyType,
    pub private_key_pem: String,
    pub public_key: String,
    pub fingerprint: String,
    pub has_passphrase: bool,
}

/// Generate a new key pair in PEM form (PKCS#8, optionally encrypted with
/// the passphrase) together with its OpenSSH public key and fingerprint.
pub fn generate_key_pair(
    key_type: KeyType,
    key_size: Option<usize>,
    passphrase: Option<&str>,
) -> SshResult<KeyMaterial> {
    let key_pair = match key_type {
        KeyType::Ed25519 => KeyPair::generate_ed25519()
            .ok_or_else(|| SshError::PrivateKeyError("ed25519 generation failed".to_string()))?,
        KeyType::Rsa => {
            let bits = key_size.unwrap_or(DEFAULT_RSA_BITS);
            if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) {
                return Err(SshError::PrivateKeyError(format!(
                    "rsa key size must be between {} and {} bits",
                    MIN_RSA_BITS, MAX_RSA_BITS
                )));
            }
            KeyPair::generate_rsa(bits, SignatureHash::SHA2_256)
                .ok_or_else(|| SshError::PrivateKeyError("rsa generation failed".to_string()))?
        }
    };

    let private_key_pem = encode_private_key(&key_pair, passphrase)?;
    describe_key_pair(&key_pair, private_key_pem, passphrase.is_some())
}

/// Validate an imported private key: parse it with the given passphrase and
/// derive its public key and fingerprint.
pub fn validate_private_key(pem: &str, passphrase: Option<&str>) -> SshResult<KeyMaterial> {
    let key_pair = parse_private_key(pem, passphrase)?;
    describe_key_pair(&key_pair, pem.to_string(), passphrase.is_some())
}

/// Parse a private key in any supported encoding (OpenSSH, PKCS#8, PKCS#1).
pub fn parse_private_key(pem: &str, passphrase: Option<&str>) -> SshResult<KeyPair> {
    russh_keys::decode_secret_key(pem, passphrase).map_err(|e| {
        SshError::PrivateKeyError(format!(
            "could not parse private key (wrong passphrase or unsupported format): {}",
            e
        ))
    })
}

fn encode_private_key(key_pair: &KeyPair, passphrase: Option<&str>) -> SshResult<String> {
    let mut pem = Vec::new();
    let encoded = match passphrase {
        Some(pass) if !pass.is_empty() => russh_keys::encode_pkcs8_pem_encrypted(
            key_pair,
            pass.as_bytes(),
            PEM_ENCRYPTION_ROUNDS,
            &mut pem,
        ),
        _ => russh_keys::encode_pkcs8_pem(key_pair, &mut pem),
    };
    encoded.map_err(|e| SshError::PrivateKeyError(e.to_string()))?;
    String::from_utf8(pem)
        .map_err(|e| SshError::PrivateKeyError(format!("non-utf8 PEM output: {}", e)))
}

fn describe_key_pair(
    key_pair: &KeyPair,
    private_key_pem: String,
    has_passphrase: bool,
) -> SshResult<KeyMaterial> {
    let key_type = match key_pair {
        KeyPair::Ed25519(_) => KeyType::Ed25519,
        KeyPair::RSA { .. } => KeyType::Rsa,
        _ => {
            return Err(SshError::PrivateKeyError(
                "unsupported key algorithm; only rsa and ed25519 keys are accepted".to_string(),
            ))
        }
    };

    let public_key_wire = key_pair.public_key_bytes();
    let public_key = format!(
        "{} {} {}",
        key_pair.name(),
        general_purpose::STANDARD.encode(&public_key_wire),
        PUBLIC_KEY_COMMENT
    );

    Ok(KeyMaterial {
        key_type,
        private_key_pem,
        public_key,
        fingerprint: fingerprint(&public_key_wire),
        has_passphrase,
    })
}

/// `SHA256:` + unpadded base64 of SHA-256 over the public key wire bytes,
/// the same shape `ssh-keygen -lf` prints.
pub fn fingerprint(public_key_wire: &[u8]) -> String {
    let digest = Sha256::digest(public_key_wire);
    format!(
        "SHA256:{}",
        general_purpose::STANDARD_NO_PAD.encode(digest)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ed25519() {
        let key = generate_key_pair(KeyType::Ed25519, None, None).unwrap();
        assert_eq!(key.key_type, KeyType::Ed25519);
        assert!(key.fingerprint.starts_with("SHA256:"));
        assert!(!key.fingerprint.ends_with('='));
        assert!(key.public_key.starts_with("ssh-ed25519 "));
        assert!(key.public_key.ends_with(PUBLIC_KEY_COMMENT));
        assert!(key.private_key_pem.contains("PRIVATE KEY"));
        assert!(!key.has_passphrase);
    }

    #[test]
    fn test_generated_keys_do_not_collide() {
        let a = generate_key_pair(KeyType::Ed25519, None, None).unwrap();
        let b = generate_key_pair(KeyType::Ed25519, None, None).unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_rsa_size_bounds() {
        assert!(generate_key_pair(KeyType::Rsa, Some(1024), None).is_err());
        assert!(generate_key_pair(KeyType::Rsa, Some(16384), None).is_err());
    }

    #[test]
    fn test_import_round_trip() {
        let generated = generate_key_pair(KeyType::Ed25519, None, None).unwrap();
        let imported = validate_private_key(&generated.private_key_pem, None).unwrap();
        assert_eq!(imported.fingerprint, generated.fingerprint);
        assert_eq!(imported.key_type, KeyType::Ed25519);
        assert_eq!(imported.public_key, generated.public_key);
    }

    #[test]
    fn test_passphrase_protection() {
        let generated = generate_key_pair(KeyType::Ed25519, None, Some("s3cret")).unwrap();
        assert!(generated.has_passphrase);
        assert!(validate_private_key(&generated.private_key_pem, None).is_err());
        assert!(validate_private_key(&generated.private_key_pem, Some("wrong")).is_err());
        let imported =
            validate_private_key(&generated.private_key_pem, Some("s3cret")).unwrap();
        assert_eq!(imported.fingerprint, generated.fingerprint);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(validate_private_key("definitely not a key", None).is_err());
    }
}

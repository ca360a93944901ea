use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::error::DatabaseError;

/// Supported SSH key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Rsa => write!(f, "rsa"),
            KeyType::Ed25519 => write!(f, "ed25519"),
        }
    }
}

impl FromStr for KeyType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa" => Ok(KeyType::Rsa),
            "ed25519" => Ok(KeyType::Ed25519),
            other => Err(DatabaseError::ValidationError(format!(
                "unknown key type: {}",
                other
            ))),
        }
    }
}

/// Stored SSH key metadata. The private key never leaves the registry except
/// through [`get_decrypted_private_key`](crate::database::warehouse::Warehouse::get_decrypted_private_key).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    pub id: Uuid,
    pub name: String,
    /// `SHA256:` + unpadded base64 of SHA-256 over the public key wire bytes.
    pub fingerprint: String,
    pub key_type: KeyType,
    pub public_key: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub has_passphrase: bool,
    pub description: Option<String>,
    /// Number of servers referencing this key. Derived by query, never stored.
    pub servers_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateKeyRequest {
    pub name: String,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
    /// RSA modulus size; ignored for ed25519.
    pub key_size: Option<usize>,
    pub passphrase: Option<String>,
    pub description: Option<String>,
}

fn default_key_type() -> KeyType {
    KeyType::Rsa
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportKeyRequest {
    pub name: String,
    pub private_key: String,
    pub passphrase: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

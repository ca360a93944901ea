use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::error::DatabaseError;

/// How the SSH executor authenticates against a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SshAuthType {
    Password,
    Key,
}

impl fmt::Display for SshAuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuthType::Password => write!(f, "password"),
            SshAuthType::Key => write!(f, "key"),
        }
    }
}

impl FromStr for SshAuthType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(SshAuthType::Password),
            "key" => Ok(SshAuthType::Key),
            other => Err(DatabaseError::ValidationError(format!(
                "unknown ssh auth type: {}",
                other
            ))),
        }
    }
}

/// A monitored PostgreSQL instance, as held in memory by the collectors.
///
/// Credential fields are decrypted on read by the registry; the struct is
/// deliberately not serializable so secrets cannot leak through an API
/// response by accident.
#[derive(Debug, Clone)]
pub struct Server {
    /// Stable unique name; join key for all collected rows.
    pub name: String,
    pub host: String,
    pub pg_port: u16,
    pub pg_user: String,
    pub password: String,
    pub ssh_user: String,
    pub ssh_password: String,
    pub ssh_port: u16,
    pub ssh_auth_type: SshAuthType,
    pub ssh_key_id: Option<Uuid>,
    pub ssh_key_passphrase: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Server {
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn has_ssh_password(&self) -> bool {
        !self.ssh_password.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerRequest {
    pub name: String,
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub pg_port: u16,
    pub pg_user: String,
    #[serde(default)]
    pub password: String,
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_password: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_auth_type")]
    pub ssh_auth_type: SshAuthType,
    pub ssh_key_id: Option<Uuid>,
    #[serde(default)]
    pub ssh_key_passphrase: String,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ssh_port() -> u16 {
    22
}

fn default_auth_type() -> SshAuthType {
    SshAuthType::Password
}

impl CreateServerRequest {
    /// Reject obviously broken registrations before touching the warehouse.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.name.trim().is_empty() || self.name.eq_ignore_ascii_case("test") {
            return Err(DatabaseError::ValidationError(
                "invalid server name".to_string(),
            ));
        }
        if self.host.trim().is_empty() || self.host.eq_ignore_ascii_case("test") {
            return Err(DatabaseError::ValidationError(
                "invalid host address".to_string(),
            ));
        }
        match self.ssh_auth_type {
            SshAuthType::Key if self.ssh_key_id.is_none() => Err(DatabaseError::ValidationError(
                "ssh_key_id is required for key authentication".to_string(),
            )),
            SshAuthType::Password if self.ssh_key_id.is_some() => {
                Err(DatabaseError::ValidationError(
                    "ssh_key_id must not be set for password authentication".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Partial update: only non-null fields overwrite the stored row.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerRequest {
    pub host: Option<String>,
    pub pg_port: Option<u16>,
    pub pg_user: Option<String>,
    pub password: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_auth_type: Option<SshAuthType>,
    pub ssh_key_id: Option<Uuid>,
    pub ssh_key_passphrase: Option<String>,
}

impl UpdateServerRequest {
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.pg_port.is_none()
            && self.pg_user.is_none()
            && self.password.is_none()
            && self.ssh_user.is_none()
            && self.ssh_password.is_none()
            && self.ssh_port.is_none()
            && self.ssh_auth_type.is_none()
            && self.ssh_key_id.is_none()
            && self.ssh_key_passphrase.is_none()
    }

    /// Whether the patch touches anything the remote pool key depends on.
    pub fn changes_connection(&self, current: &Server) -> bool {
        self.host.as_ref().is_some_and(|h| *h != current.host)
            || self.pg_port.is_some_and(|p| p != current.pg_port)
            || self.pg_user.as_ref().is_some_and(|u| *u != current.pg_user)
            || self.password.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateServerRequest {
        CreateServerRequest {
            name: "prod-1".to_string(),
            host: "10.0.0.5".to_string(),
            pg_port: 5432,
            pg_user: "monitor".to_string(),
            password: "pw".to_string(),
            ssh_user: "root".to_string(),
            ssh_password: "pw".to_string(),
            ssh_port: 22,
            ssh_auth_type: SshAuthType::Password,
            ssh_key_id: None,
            ssh_key_passphrase: String::new(),
        }
    }

    #[test]
    fn test_validate_rejects_placeholder_names() {
        let mut req = request();
        req.name = "test".to_string();
        assert!(req.validate().is_err());

        let mut req = request();
        req.host = "  ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_enforces_auth_exclusivity() {
        let mut req = request();
        req.ssh_auth_type = SshAuthType::Key;
        assert!(req.validate().is_err(), "key auth without key id");

        req.ssh_key_id = Some(Uuid::new_v4());
        assert!(req.validate().is_ok());

        req.ssh_auth_type = SshAuthType::Password;
        assert!(req.validate().is_err(), "password auth with key id");
    }

    #[test]
    fn test_auth_type_round_trip() {
        for t in [SshAuthType::Password, SshAuthType::Key] {
            assert_eq!(t.to_string().parse::<SshAuthType>().unwrap(), t);
        }
        assert!("agent".parse::<SshAuthType>().is_err());
    }
}

pub mod keygen;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use russh::client::{Config as ClientConfig, Handle, Handler};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::time::timeout;

use crate::database::error::{SshError, SshResult};
use crate::database::warehouse::Warehouse;
use crate::models::server::{Server, SshAuthType};
use crate::services::cache::TtlCache;

/// Connect, banner and auth time limit per session.
const SSH_TIMEOUT: Duration = Duration::from_secs(10);
/// `df` results stay valid this long per `(host, ssh_port)`.
const DF_CACHE_TTL: Duration = Duration::from_secs(30);
const DF_CACHE_CAPACITY: usize = 256;

/// Accepts any server key. Inherited behavior: operators control the
/// network between the monitor and its targets. A known-hosts policy would
/// be the stricter choice here.
struct AcceptingClient;

#[async_trait]
impl Handler for AcceptingClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Short-lived SSH sessions against target hosts, currently used for
/// host-level disk metrics (`df -B1`).
#[derive(Clone)]
pub struct SshExecutor {
    warehouse: Warehouse,
    df_cache: TtlCache<String, (i64, i64)>,
}

impl SshExecutor {
    pub fn new(warehouse: Warehouse) -> Self {
        Self {
            warehouse,
            df_cache: TtlCache::new(DF_CACHE_TTL, DF_CACHE_CAPACITY),
        }
    }

    /// `(free_bytes, total_bytes)` of the filesystem holding `data_dir`.
    ///
    /// The derived mount point is validated before any connection is made;
    /// results are cached for a short TTL per `(host, ssh_port)`.
    pub async fn df_bytes(&self, server: &Server, data_dir: &str) -> SshResult<(i64, i64)> {
        let mount = mount_point(data_dir)?;

        let cache_key = format!("{}:{}", server.host, server.ssh_port);
        if let Some(cached) = self.df_cache.get(&cache_key) {
            tracing::debug!(server = %server.name, "df served from cache");
            return Ok(cached);
        }

        let output = self.exec(server, &format!("df -B1 {}", mount)).await?;
        let parsed = parse_df_output(&output)?;
        self.df_cache.insert(cache_key, parsed);
        Ok(parsed)
    }

    /// Establish a session, run one command, tear the session down.
    async fn exec(&self, server: &Server, command: &str) -> SshResult<String> {
        let session = self.connect(server).await?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        loop {
            let msg = match timeout(SSH_TIMEOUT, channel.wait()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(_) => return Err(SshError::Timeout),
            };
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        let _ = channel.close().await;
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;

        if exit_status.unwrap_or(0) != 0 {
            let err = String::from_utf8_lossy(&stderr);
            return Err(SshError::ChannelError(format!(
                "command exited with status {}: {}",
                exit_status.unwrap_or(0),
                err.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn connect(&self, server: &Server) -> SshResult<Handle<AcceptingClient>> {
        let config = Arc::new(ClientConfig {
            inactivity_timeout: Some(SSH_TIMEOUT),
            ..Default::default()
        });

        let mut session = timeout(
            SSH_TIMEOUT,
            russh::client::connect(
                config,
                (server.host.as_str(), server.ssh_port),
                AcceptingClient,
            ),
        )
        .await
        .map_err(|_| SshError::Timeout)?
        .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        let authenticated = match server.ssh_auth_type {
            SshAuthType::Password => timeout(
                SSH_TIMEOUT,
                session.authenticate_password(&server.ssh_user, &server.ssh_password),
            )
            .await
            .map_err(|_| SshError::Timeout)?
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            SshAuthType::Key => {
                let key_pair = self.load_key_pair(server).await?;
                timeout(
                    SSH_TIMEOUT,
                    session.authenticate_publickey(&server.ssh_user, Arc::new(key_pair)),
                )
                .await
                .map_err(|_| SshError::Timeout)?
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated {
            return Err(SshError::AuthenticationFailed(format!(
                "server rejected credentials for user '{}'",
                server.ssh_user
            )));
        }
        Ok(session)
    }

    async fn load_key_pair(&self, server: &Server) -> SshResult<russh_keys::key::KeyPair> {
        let key_id = server.ssh_key_id.ok_or_else(|| {
            SshError::PrivateKeyError("server uses key auth but has no key assigned".to_string())
        })?;

        let pem = self
            .warehouse
            .get_decrypted_private_key(key_id)
            .await
            .map_err(|e| SshError::PrivateKeyError(e.to_string()))?
            .ok_or_else(|| SshError::PrivateKeyError(format!("key {} not found", key_id)))?;

        let passphrase = match server.ssh_key_passphrase.is_empty() {
            true => None,
            false => Some(server.ssh_key_passphrase.as_str()),
        };
        keygen::parse_private_key(&pem, passphrase)
    }
}

/// Derive and validate the mount point queried over SSH.
///
/// Instances keep their data under a `/DB` tree on a dedicated volume; for
/// anything else the data directory itself is the argument. The result must
/// look like a plain absolute path before it is ever placed in a command.
pub fn mount_point(data_dir: &str) -> SshResult<String> {
    static ALLOWED: OnceLock<Regex> = OnceLock::new();
    let allowed = ALLOWED.get_or_init(|| Regex::new(r"^[a-zA-Z0-9/_.-]+$").expect("static regex"));

    let mount = match data_dir.find("/DB") {
        Some(idx) => &data_dir[..idx],
        None => data_dir,
    };

    if mount.is_empty() || !mount.starts_with('/') || mount.contains("..") {
        return Err(SshError::InvalidPath(format!("invalid path: {}", data_dir)));
    }
    if !allowed.is_match(mount) {
        return Err(SshError::InvalidPath(format!(
            "path contains unexpected characters: {}",
            data_dir
        )));
    }
    Ok(mount.to_string())
}

/// Parse `df -B1 <mount>` output into `(free_bytes, total_bytes)`.
pub fn parse_df_output(output: &str) -> SshResult<(i64, i64)> {
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| SshError::ChannelError("unexpected df output".to_string()))?;

    let columns: Vec<&str> = line.split_whitespace().collect();
    if columns.len() < 4 {
        return Err(SshError::ChannelError("unexpected df output".to_string()));
    }

    let total: i64 = columns[1]
        .parse()
        .map_err(|_| SshError::ChannelError(format!("unparsable df total: {}", columns[1])))?;
    let free: i64 = columns[3]
        .parse()
        .map_err(|_| SshError::ChannelError(format!("unparsable df free: {}", columns[3])))?;
    Ok((free, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_point_splits_on_db_tree() {
        assert_eq!(mount_point("/storage/DB/pg16/data").unwrap(), "/storage");
        assert_eq!(
            mount_point("/var/lib/postgresql/16/main").unwrap(),
            "/var/lib/postgresql/16/main"
        );
    }

    #[test]
    fn test_mount_point_rejects_suspicious_paths() {
        assert!(mount_point("relative/path").is_err());
        assert!(mount_point("/data/../etc").is_err());
        assert!(mount_point("").is_err());
        assert!(mount_point("/data; rm -rf /").is_err());
        assert!(mount_point("/data$(reboot)").is_err());
        assert!(mount_point("/data dir").is_err());
    }

    #[test]
    fn test_parse_df_output() {
        let output = "Filesystem      1B-blocks        Used   Available Use% Mounted on\n\
                      /dev/sda1    105089261568 33636851712 66064175104  34% /storage\n";
        assert_eq!(
            parse_df_output(output).unwrap(),
            (66_064_175_104, 105_089_261_568)
        );
    }

    #[test]
    fn test_parse_df_output_rejects_garbage() {
        assert!(parse_df_output("").is_err());
        assert!(parse_df_output("df: /storage: No such file or directory").is_err());
        assert!(parse_df_output("header\n/dev/sda1 only three cols?").is_err());
        assert!(parse_df_output("header\na b c d").is_err());
    }
}

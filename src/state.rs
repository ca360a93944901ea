use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::Config;
use crate::database::encryption::SecretBox;
use crate::database::error::DatabaseResult;
use crate::database::warehouse::Warehouse;
use crate::models::user::UserRole;
use crate::services::auth::AuthService;
use crate::services::cache::TtlCache;
use crate::services::remote::RemotePool;
use crate::services::ssh::SshExecutor;
use crate::services::status::ServerStatus;

/// Live server status stays valid this long per `(host, pg_port)`.
const STATUS_CACHE_TTL: Duration = Duration::from_secs(5);
const STATUS_CACHE_CAPACITY: usize = 256;

/// Everything the scheduler, the collectors, and the HTTP handlers share.
/// One value, passed explicitly; all teardown goes through [`shutdown`].
///
/// [`shutdown`]: AppContext::shutdown
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub warehouse: Warehouse,
    pub remote: RemotePool,
    pub ssh: SshExecutor,
    pub auth: AuthService,
    pub status_cache: TtlCache<String, ServerStatus>,
}

impl AppContext {
    pub async fn new(config: Config) -> DatabaseResult<Self> {
        let secrets = SecretBox::from_key_material(&config.encryption_key)?;
        let warehouse = Warehouse::connect(&config.local_db_dsn, secrets).await?;
        warehouse.seed_settings(&config).await?;

        let ctx = Self {
            auth: AuthService::new(&config.secret_key),
            ssh: SshExecutor::new(warehouse.clone()),
            remote: RemotePool::new(),
            status_cache: TtlCache::new(STATUS_CACHE_TTL, STATUS_CACHE_CAPACITY),
            warehouse,
            config: Arc::new(config),
        };
        ctx.bootstrap_admin().await?;
        Ok(ctx)
    }

    /// First start on an empty warehouse: create an admin account with a
    /// one-time random password. The password is printed to the log once;
    /// operators are expected to rotate it immediately.
    async fn bootstrap_admin(&self) -> DatabaseResult<()> {
        if self.warehouse.count_users().await? > 0 {
            return Ok(());
        }

        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let hash = AuthService::hash_password(&password)
            .map_err(|e| crate::database::error::DatabaseError::Internal(anyhow::anyhow!("{e}")))?;

        self.warehouse
            .create_user("admin", &hash, UserRole::Admin, None)
            .await?;
        tracing::warn!(
            "no users found, created 'admin' with password '{}' - change it now",
            password
        );
        Ok(())
    }

    /// Drain all outbound pools and close the warehouse.
    pub async fn shutdown(&self) {
        self.remote.close_all().await;
        self.warehouse.close().await;
    }
}

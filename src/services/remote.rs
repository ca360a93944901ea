use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::models::server::Server;

/// Key of one remote pool. A target may own several pools when queries go to
/// a specific database rather than the maintenance `postgres` one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    host: String,
    port: u16,
    user: String,
    database: String,
}

/// Per-target bounded connection pools towards the monitored instances.
///
/// Pools are created lazily on first use and kept until the target is
/// updated, deleted, or the service shuts down. Connections are validated
/// with a round-trip on checkout (`test_before_acquire`), which replaces a
/// dead connection once before surfacing an error.
#[derive(Clone)]
pub struct RemotePool {
    pools: Arc<Mutex<HashMap<PoolKey, PgPool>>>,
}

impl RemotePool {
    pub fn new() -> Self {
        Self {
            pools: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get or create the pool for `server`, towards `database` (defaults to
    /// `postgres`).
    pub fn get_pool(&self, server: &Server, database: Option<&str>) -> DatabaseResult<PgPool> {
        let database = database.unwrap_or("postgres");
        let key = PoolKey {
            host: server.host.clone(),
            port: server.pg_port,
            user: server.pg_user.clone(),
            database: database.to_string(),
        };

        let mut pools = self.pools.lock().expect("remote pool lock poisoned");
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        tracing::info!(server = %server.name, database, "creating remote connection pool");

        let options = PgConnectOptions::new()
            .host(&server.host)
            .port(server.pg_port)
            .username(&server.pg_user)
            .password(&server.password)
            .database(database)
            .application_name("pgfleet")
            .options([("statement_timeout", "5s")]);

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .test_before_acquire(true)
            .connect_lazy_with(options);

        pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// Close and drop every pool belonging to `server`. Called when a target
    /// is updated or deleted.
    pub async fn close_pools(&self, server: &Server) {
        let removed: Vec<(PoolKey, PgPool)> = {
            let mut pools = self.pools.lock().expect("remote pool lock poisoned");
            let keys: Vec<PoolKey> = pools
                .keys()
                .filter(|k| k.host == server.host && k.port == server.pg_port)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| pools.remove_entry(&k))
                .collect()
        };

        for (key, pool) in removed {
            tracing::info!(server = %server.name, database = %key.database, "closing remote pool");
            pool.close().await;
        }
    }

    /// Close everything; used on shutdown.
    pub async fn close_all(&self) {
        let removed: Vec<PgPool> = {
            let mut pools = self.pools.lock().expect("remote pool lock poisoned");
            pools.drain().map(|(_, pool)| pool).collect()
        };
        tracing::info!(count = removed.len(), "closing all remote pools");
        for pool in removed {
            pool.close().await;
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().expect("remote pool lock poisoned").len()
    }
}

impl Default for RemotePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniform error text for unreachable targets; used by collectors so the
/// per-target result lists stay readable.
pub fn describe_remote_error(err: &sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::PoolTimedOut => {
            DatabaseError::ConnectionFailed("host unreachable or connect timeout".to_string())
        }
        sqlx::Error::Io(e) => DatabaseError::ConnectionFailed(format!("host unreachable: {}", e)),
        other => DatabaseError::QueryFailed(other.to_string()),
    }
}

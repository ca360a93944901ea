use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::database::warehouse::Warehouse;
use crate::models::server::{CreateServerRequest, Server, UpdateServerRequest};

const SERVER_COLUMNS: &str = "name, host, port, pg_user, password_enc, ssh_user, \
     ssh_password_enc, ssh_port, ssh_auth_type, ssh_key_id, ssh_key_passphrase_enc, \
     created_at, updated_at";

/// Target registry: CRUD over the `servers` table with credential fields
/// encrypted at rest and decrypted on read.
impl Warehouse {
    pub async fn list_servers(&self) -> DatabaseResult<Vec<Server>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM servers ORDER BY name",
            SERVER_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(|row| self.row_to_server(row)).collect()
    }

    pub async fn get_server(&self, name: &str) -> DatabaseResult<Option<Server>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM servers WHERE name = $1",
            SERVER_COLUMNS
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(|r| self.row_to_server(r)).transpose()
    }

    pub async fn create_server(&self, request: CreateServerRequest) -> DatabaseResult<Server> {
        request.validate()?;

        let password_enc = self.encrypt_field(&request.password)?;
        let ssh_password_enc = self.encrypt_field(&request.ssh_password)?;
        let passphrase_enc = self.encrypt_field(&request.ssh_key_passphrase)?;

        let row = sqlx::query(&format!(
            "INSERT INTO servers \
             (name, host, port, pg_user, password_enc, ssh_user, ssh_password_enc, \
              ssh_port, ssh_auth_type, ssh_key_id, ssh_key_passphrase_enc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {}",
            SERVER_COLUMNS
        ))
        .bind(&request.name)
        .bind(&request.host)
        .bind(request.pg_port as i32)
        .bind(&request.pg_user)
        .bind(&password_enc)
        .bind(&request.ssh_user)
        .bind(&ssh_password_enc)
        .bind(request.ssh_port as i32)
        .bind(request.ssh_auth_type.to_string())
        .bind(request.ssh_key_id)
        .bind(&passphrase_enc)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match unique_violation(&e) {
            true => DatabaseError::ValidationError(format!(
                "server with name '{}' already exists",
                request.name
            )),
            false => DatabaseError::from(e),
        })?;

        tracing::info!(server = %request.name, host = %request.host, "server created");
        self.row_to_server(&row)
    }

    /// Partial update. Only non-null patch fields overwrite; an empty string
    /// clears a credential field; credential values that are already
    /// ciphertext are stored as-is, never wrapped a second time.
    pub async fn update_server(
        &self,
        name: &str,
        patch: UpdateServerRequest,
    ) -> DatabaseResult<Option<Server>> {
        let Some(current) = self.get_server_stored(name).await? else {
            return Ok(None);
        };

        if patch.is_empty() {
            return self.get_server(name).await;
        }

        let host = patch.host.as_deref().unwrap_or(&current.host);
        let port = patch.pg_port.map(|p| p as i32).unwrap_or(current.port);
        let pg_user = patch.pg_user.as_deref().unwrap_or(&current.pg_user);
        let ssh_user = patch.ssh_user.as_deref().unwrap_or(&current.ssh_user);
        let ssh_port = patch.ssh_port.map(|p| p as i32).unwrap_or(current.ssh_port);
        let ssh_auth_type = patch
            .ssh_auth_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| current.ssh_auth_type.clone());
        let ssh_key_id = patch.ssh_key_id.or(current.ssh_key_id);

        let password_enc = self.patched_secret(&patch.password, &current.password_enc)?;
        let ssh_password_enc =
            self.patched_secret(&patch.ssh_password, &current.ssh_password_enc)?;
        let passphrase_enc =
            self.patched_secret(&patch.ssh_key_passphrase, &current.ssh_key_passphrase_enc)?;

        let row = sqlx::query(&format!(
            "UPDATE servers SET host = $2, port = $3, pg_user = $4, password_enc = $5, \
             ssh_user = $6, ssh_password_enc = $7, ssh_port = $8, ssh_auth_type = $9, \
             ssh_key_id = $10, ssh_key_passphrase_enc = $11, updated_at = now() \
             WHERE name = $1 RETURNING {}",
            SERVER_COLUMNS
        ))
        .bind(name)
        .bind(host)
        .bind(port)
        .bind(pg_user)
        .bind(&password_enc)
        .bind(ssh_user)
        .bind(&ssh_password_enc)
        .bind(ssh_port)
        .bind(&ssh_auth_type)
        .bind(ssh_key_id)
        .bind(&passphrase_enc)
        .fetch_optional(self.pool())
        .await?;

        if row.is_some() {
            tracing::info!(server = %name, "server updated");
        }
        row.as_ref().map(|r| self.row_to_server(r)).transpose()
    }

    /// Remove the registry row. The caller cascades to collected data and
    /// remote pools.
    pub async fn delete_server(&self, name: &str) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM servers WHERE name = $1")
            .bind(name)
            .execute(self.pool())
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(server = %name, "server deleted");
        }
        Ok(deleted)
    }

    fn encrypt_field(&self, value: &str) -> DatabaseResult<Option<String>> {
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.secrets().encrypt_if_plain(value)?))
    }

    fn patched_secret(
        &self,
        patch: &Option<String>,
        stored: &Option<String>,
    ) -> DatabaseResult<Option<String>> {
        match patch {
            None => Ok(stored.clone()),
            Some(value) => self.encrypt_field(value),
        }
    }

    async fn get_server_stored(&self, name: &str) -> DatabaseResult<Option<StoredServer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM servers WHERE name = $1",
            SERVER_COLUMNS
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| StoredServer {
            host: row.get("host"),
            port: row.get("port"),
            pg_user: row.get("pg_user"),
            password_enc: row.get("password_enc"),
            ssh_user: row.get("ssh_user"),
            ssh_password_enc: row.get("ssh_password_enc"),
            ssh_port: row.get("ssh_port"),
            ssh_auth_type: row.get("ssh_auth_type"),
            ssh_key_id: row.get("ssh_key_id"),
            ssh_key_passphrase_enc: row.get("ssh_key_passphrase_enc"),
        }))
    }

    fn row_to_server(&self, row: &PgRow) -> DatabaseResult<Server> {
        let decrypt = |column: &str| -> DatabaseResult<String> {
            let stored: Option<String> = row.get(column);
            match stored {
                None => Ok(String::new()),
                Some(cipher) => Ok(self.secrets().decrypt(&cipher)?),
            }
        };

        let auth_type: String = row.get("ssh_auth_type");
        Ok(Server {
            name: row.get("name"),
            host: row.get("host"),
            pg_port: row.get::<i32, _>("port") as u16,
            pg_user: row.get("pg_user"),
            password: decrypt("password_enc")?,
            ssh_user: row.get("ssh_user"),
            ssh_password: decrypt("ssh_password_enc")?,
            ssh_port: row.get::<i32, _>("ssh_port") as u16,
            ssh_auth_type: auth_type.parse()?,
            ssh_key_id: row.get("ssh_key_id"),
            ssh_key_passphrase: decrypt("ssh_key_passphrase_enc")?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Stored (still encrypted) server row, used to apply partial updates.
struct StoredServer {
    host: String,
    port: i32,
    pg_user: String,
    password_enc: Option<String>,
    ssh_user: String,
    ssh_password_enc: Option<String>,
    ssh_port: i32,
    ssh_auth_type: String,
    ssh_key_id: Option<uuid::Uuid>,
    ssh_key_passphrase_enc: Option<String>,
}

pub(crate) fn unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "23505")
}

use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::database::servers::unique_violation;
use crate::database::warehouse::Warehouse;
use crate::models::ssh_key::{SshKey, UpdateKeyRequest};

const KEY_COLUMNS: &str = "id, name, fingerprint, key_type, public_key, created_by, \
     created_at, has_passphrase, description, \
     (SELECT count(*) FROM servers s WHERE s.ssh_key_id = ssh_keys.id) AS servers_count";

/// New key material produced by the generator or the importer.
#[derive(Debug)]
pub struct NewSshKey {
    pub name: String,
    pub fingerprint: String,
    pub key_type: crate::models::ssh_key::KeyType,
    pub public_key: String,
    pub private_key_pem: String,
    pub has_passphrase: bool,
    pub created_by: String,
    pub description: Option<String>,
}

/// SSH key store. Private keys are encrypted at rest; `servers_count` is
/// always derived by query so the key row never has to track its referrers.
impl Warehouse {
    pub async fn list_keys(&self) -> DatabaseResult<Vec<SshKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ssh_keys ORDER BY created_at",
            KEY_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(row_to_key).collect::<Result<_, _>>()?)
    }

    pub async fn get_key(&self, id: Uuid) -> DatabaseResult<Option<SshKey>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ssh_keys WHERE id = $1",
            KEY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_key).transpose()
    }

    pub async fn create_key(&self, key: NewSshKey) -> DatabaseResult<SshKey> {
        if let Some(existing) = self.find_key_by_fingerprint(&key.fingerprint).await? {
            return Err(DatabaseError::ValidationError(format!(
                "a key with the same fingerprint already exists: '{}'",
                existing
            )));
        }

        let private_key_enc = self.secrets().encrypt(&key.private_key_pem)?;
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO ssh_keys \
             (id, name, fingerprint, key_type, public_key, private_key_enc, \
              created_by, has_passphrase, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id)
        .bind(&key.name)
        .bind(&key.fingerprint)
        .bind(key.key_type.to_string())
        .bind(&key.public_key)
        .bind(&private_key_enc)
        .bind(&key.created_by)
        .bind(key.has_passphrase)
        .bind(&key.description)
        .execute(self.pool())
        .await
        .map_err(|e| match unique_violation(&e) {
            true => DatabaseError::ValidationError(format!(
                "key with name '{}' already exists",
                key.name
            )),
            false => DatabaseError::from(e),
        })?;

        tracing::info!(key = %key.name, key_type = %key.key_type, %id, "ssh key stored");
        self.get_key(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("stored key vanished".to_string()))
    }

    /// Only name and description are mutable; key material is immutable.
    pub async fn update_key(
        &self,
        id: Uuid,
        patch: UpdateKeyRequest,
    ) -> DatabaseResult<Option<SshKey>> {
        if patch.name.is_none() && patch.description.is_none() {
            return self.get_key(id).await;
        }

        let result = sqlx::query(
            "UPDATE ssh_keys SET name = COALESCE($2, name), \
             description = COALESCE($3, description) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.description)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_key(id).await
    }

    /// Refuses to delete a key that any server still references.
    pub async fn delete_key(&self, id: Uuid) -> DatabaseResult<bool> {
        let referenced = self.key_servers_count(id).await?;
        if referenced > 0 {
            return Err(DatabaseError::ValidationError(format!(
                "key is in use by {} server(s)",
                referenced
            )));
        }

        let result = sqlx::query("DELETE FROM ssh_keys WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(%id, "ssh key deleted");
        }
        Ok(deleted)
    }

    /// Decrypted private key PEM for SSH authentication.
    pub async fn get_decrypted_private_key(&self, id: Uuid) -> DatabaseResult<Option<String>> {
        let row = sqlx::query("SELECT private_key_enc FROM ssh_keys WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let cipher: String = row.get("private_key_enc");
                Ok(Some(self.secrets().decrypt(&cipher)?))
            }
        }
    }

    pub async fn key_servers_count(&self, id: Uuid) -> DatabaseResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM servers WHERE ssh_key_id = $1")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn find_key_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> DatabaseResult<Option<String>> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT name FROM ssh_keys WHERE fingerprint = $1")
                .bind(fingerprint)
                .fetch_optional(self.pool())
                .await?;
        Ok(name)
    }
}

fn row_to_key(row: &PgRow) -> DatabaseResult<SshKey> {
    let key_type: String = row.get("key_type");
    Ok(SshKey {
        id: row.get("id"),
        name: row.get("name"),
        fingerprint: row.get("fingerprint"),
        key_type: key_type.parse()?,
        public_key: row.get("public_key"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        has_passphrase: row.get("has_passphrase"),
        description: row.get("description"),
        servers_count: row.get("servers_count"),
    })
}

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::database::servers::unique_violation;
use crate::database::warehouse::Warehouse;
use crate::models::user::{UpdateUserRequest, User, UserRole};

const USER_COLUMNS: &str =
    "login, password_hash, role, email, is_active, created_at, updated_at, last_login";

impl Warehouse {
    pub async fn get_user(&self, login: &str) -> DatabaseResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE login = $1",
            USER_COLUMNS
        ))
        .bind(login)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn list_users(&self) -> DatabaseResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at",
            USER_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_user).collect()
    }

    pub async fn count_users(&self) -> DatabaseResult<i64> {
        Ok(sqlx::query_scalar("SELECT count(*) FROM users")
            .fetch_one(self.pool())
            .await?)
    }

    pub async fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        role: UserRole,
        email: Option<&str>,
    ) -> DatabaseResult<User> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (login, password_hash, role, email) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(login)
        .bind(password_hash)
        .bind(role.to_string())
        .bind(email)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match unique_violation(&e) {
            true => DatabaseError::ValidationError(format!("user '{}' already exists", login)),
            false => DatabaseError::from(e),
        })?;

        tracing::info!(user = %login, %role, "user created");
        row_to_user(&row)
    }

    /// Partial update; `password_hash` is pre-hashed by the caller.
    pub async fn update_user(
        &self,
        login: &str,
        patch: UpdateUserRequest,
        password_hash: Option<String>,
    ) -> DatabaseResult<Option<User>> {
        let row = sqlx::query(&format!(
            "UPDATE users SET \
             password_hash = COALESCE($2, password_hash), \
             role = COALESCE($3, role), \
             email = COALESCE($4, email), \
             is_active = COALESCE($5, is_active), \
             updated_at = now() \
             WHERE login = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(login)
        .bind(password_hash)
        .bind(patch.role.map(|r| r.to_string()))
        .bind(patch.email)
        .bind(patch.is_active)
        .fetch_optional(self.pool())
        .await?;

        if row.is_some() {
            tracing::info!(user = %login, "user updated");
        }
        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn delete_user(&self, login: &str) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE login = $1")
            .bind(login)
            .execute(self.pool())
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(user = %login, "user deleted");
        }
        Ok(deleted)
    }

    pub async fn update_last_login(&self, login: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE users SET last_login = now() WHERE login = $1")
            .bind(login)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn row_to_user(row: &PgRow) -> DatabaseResult<User> {
    let role: String = row.get("role");
    Ok(User {
        login: row.get("login"),
        password_hash: row.get("password_hash"),
        role: role.parse()?,
        email: row.get("email"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_login: row.get("last_login"),
    })
}

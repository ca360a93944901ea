use thiserror::Error;

/// Warehouse and registry operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(#[from] EncryptionError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => {
                DatabaseError::ConnectionFailed("pool acquire timed out".to_string())
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        }
    }
}

/// Secret-box errors
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid ciphertext format")]
    InvalidFormat,
}

/// SSH executor errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Private key error: {0}")]
    PrivateKeyError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Timeout")]
    Timeout,
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
pub type EncryptionResult<T> = Result<T, EncryptionError>;
pub type SshResult<T> = Result<T, SshError>;

pub mod audit;
pub mod server;
pub mod settings;
pub mod ssh_key;
pub mod stats;
pub mod user;

pub use audit::{AuditEvent, AuditQuery, LogLevel, LogQuery, SystemLogEntry};
pub use server::{CreateServerRequest, Server, SshAuthType, UpdateServerRequest};
pub use settings::{Setting, SettingValue, SettingsUpdate};
pub use ssh_key::{GenerateKeyRequest, ImportKeyRequest, KeyType, SshKey, UpdateKeyRequest};
pub use stats::{ActivityRow, DatabaseInfo, DbTimelinePoint, TimelinePoint};
pub use user::{CreateUserRequest, UpdateUserRequest, User, UserRole};

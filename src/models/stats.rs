use chrono::{DateTime, Utc};
use serde::Serialize;

/// One backend from a live `pg_stat_activity` snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    pub pid: i32,
    pub usename: Option<String>,
    pub datname: Option<String>,
    pub query: Option<String>,
    pub state: Option<String>,
}

/// Current `db_info` row: a database known to exist (or to have existed) on
/// a target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub server_name: String,
    pub datname: String,
    pub oid: i64,
    pub creation_time: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Presence of a database within a queried statistics range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabasePresence {
    pub name: String,
    /// Whether the database still exists on the target (per latest sync).
    pub is_live: bool,
    pub creation_time: Option<DateTime<Utc>>,
}

/// One point of a per-server timeline. For bucketed ranges the values are
/// bucket averages; for raw ranges they are the stored samples.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub ts: DateTime<Utc>,
    pub datname: String,
    pub connections: i64,
    pub size_bytes: Option<i64>,
}

/// One point of a per-database timeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTimelinePoint {
    pub ts: DateTime<Utc>,
    pub connections: i64,
    pub size_bytes: Option<i64>,
    pub commits: Option<i64>,
}

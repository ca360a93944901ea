use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use crate::database::error::DatabaseResult;
use crate::database::warehouse::Warehouse;
use crate::models::stats::{DatabaseInfo, DatabasePresence, DbTimelinePoint, TimelinePoint};

/// Time-truncation granularity for timeline queries, picked from the query
/// range. The SQL expressions form a fixed allow-list; nothing user-supplied
/// is ever interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeBucket {
    Raw,
    Hour,
    FourHour,
    Day,
}

impl TimeBucket {
    pub fn for_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let span = to - from;
        if span <= Duration::days(2) {
            TimeBucket::Raw
        } else if span <= Duration::days(14) {
            TimeBucket::Hour
        } else if span <= Duration::days(90) {
            TimeBucket::FourHour
        } else {
            TimeBucket::Day
        }
    }

    fn ts_expr(&self) -> &'static str {
        match self {
            TimeBucket::Raw => "ts",
            TimeBucket::Hour => "date_trunc('hour', ts)",
            TimeBucket::FourHour => {
                "to_timestamp(floor(extract(epoch from ts) / 14400) * 14400)"
            }
            TimeBucket::Day => "date_trunc('day', ts)",
        }
    }
}

/// Range summary for one server.
#[derive(Debug, Clone)]
pub struct ServerStatsSummary {
    pub last_update: Option<DateTime<Utc>>,
    pub total_connections: i64,
    pub total_size_bytes: i64,
}

/// Range summary for one database.
#[derive(Debug, Clone)]
pub struct DbStatsSummary {
    pub last_update: Option<DateTime<Utc>>,
    pub total_connections: i64,
    pub total_commits: i64,
    pub total_size_bytes: i64,
    pub max_connections: i64,
    pub min_connections: i64,
}

/// Latest stored sample of one database.
#[derive(Debug, Clone)]
pub struct LatestDbSample {
    pub ts: DateTime<Utc>,
    pub connections: i64,
    pub size_bytes: Option<i64>,
    pub commits: Option<i64>,
}

impl Warehouse {
    // ------------------------------------------------------------------ //
    //  Collector write path
    // ------------------------------------------------------------------ //

    /// Append one activity sample. `db_size` stays null here; the size
    /// collector backfills it.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_stat_sample(
        &self,
        server_name: &str,
        ts: DateTime<Utc>,
        datname: &str,
        numbackends: i32,
        xact_commit: i64,
        disk_free: Option<i64>,
        disk_total: Option<i64>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT INTO statistics \
             (server_name, ts, datname, numbackends, xact_commit, disk_free, disk_total) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(server_name)
        .bind(ts)
        .bind(datname)
        .bind(numbackends)
        .bind(xact_commit)
        .bind(disk_free)
        .bind(disk_total)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fill `db_size` on every sample of a database that does not have one
    /// yet. Returns the number of rows updated.
    pub async fn backfill_db_size(
        &self,
        server_name: &str,
        datname: &str,
        db_size: i64,
    ) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE statistics SET db_size = $1 \
             WHERE server_name = $2 AND datname = $3 AND db_size IS NULL",
        )
        .bind(db_size)
        .bind(server_name)
        .bind(datname)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_db_info(&self, server_name: &str) -> DatabaseResult<Vec<DatabaseInfo>> {
        let rows = sqlx::query(
            "SELECT server_name, datname, oid, creation_time, first_seen, last_seen \
             FROM db_info WHERE server_name = $1 ORDER BY datname",
        )
        .bind(server_name)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DatabaseInfo {
                server_name: row.get("server_name"),
                datname: row.get("datname"),
                oid: row.get("oid"),
                creation_time: row.get("creation_time"),
                first_seen: row.get("first_seen"),
                last_seen: row.get("last_seen"),
            })
            .collect())
    }

    pub async fn touch_last_seen(
        &self,
        server_name: &str,
        datnames: &[String],
    ) -> DatabaseResult<()> {
        if datnames.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE db_info SET last_seen = now() \
             WHERE server_name = $1 AND datname = ANY($2)",
        )
        .bind(server_name)
        .bind(datnames)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_db_info(
        &self,
        server_name: &str,
        datname: &str,
        oid: i64,
        creation_time: Option<DateTime<Utc>>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT INTO db_info (server_name, datname, oid, creation_time, first_seen, last_seen) \
             VALUES ($1, $2, $3, $4, now(), now())",
        )
        .bind(server_name)
        .bind(datname)
        .bind(oid)
        .bind(creation_time)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// A database was dropped and recreated under the same name: its old
    /// sample history no longer describes the current instance, so it is
    /// erased together with the oid switch.
    pub async fn replace_recreated_db(
        &self,
        server_name: &str,
        datname: &str,
        new_oid: i64,
        creation_time: Option<DateTime<Utc>>,
    ) -> DatabaseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM statistics WHERE server_name = $1 AND datname = $2")
            .bind(server_name)
            .bind(datname)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE db_info SET oid = $1, creation_time = $2, first_seen = now(), last_seen = now() \
             WHERE server_name = $3 AND datname = $4",
        )
        .bind(new_oid)
        .bind(creation_time)
        .bind(server_name)
        .bind(datname)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// A database disappeared from the target: purge samples and topology.
    pub async fn remove_database(&self, server_name: &str, datname: &str) -> DatabaseResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM statistics WHERE server_name = $1 AND datname = $2")
            .bind(server_name)
            .bind(datname)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM db_info WHERE server_name = $1 AND datname = $2")
            .bind(server_name)
            .bind(datname)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// `(datname, oid)` pairs still missing a creation time.
    pub async fn db_info_missing_creation_time(
        &self,
        server_name: &str,
    ) -> DatabaseResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT datname, oid FROM db_info \
             WHERE server_name = $1 AND creation_time IS NULL",
        )
        .bind(server_name)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("datname"), row.get("oid")))
            .collect())
    }

    pub async fn set_db_creation_time(
        &self,
        server_name: &str,
        datname: &str,
        creation_time: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE db_info SET creation_time = $1 WHERE server_name = $2 AND datname = $3",
        )
        .bind(creation_time)
        .bind(server_name)
        .bind(datname)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------ //
    //  Read path (HTTP API)
    // ------------------------------------------------------------------ //

    /// Per-server timeline; one point per bucket per database.
    pub async fn server_timeline(
        &self,
        server_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DatabaseResult<Vec<TimelinePoint>> {
        let bucket = TimeBucket::for_range(from, to);
        let sql = match bucket {
            TimeBucket::Raw => "SELECT ts, datname, \
                 CAST(COALESCE(numbackends, 0) AS bigint) AS connections, \
                 db_size AS size_bytes \
                 FROM statistics \
                 WHERE server_name = $1 AND ts BETWEEN $2 AND $3 \
                 ORDER BY ts, datname"
                .to_string(),
            bucketed => format!(
                "SELECT {expr} AS ts, datname, \
                 CAST(round(COALESCE(avg(numbackends), 0)) AS bigint) AS connections, \
                 CAST(avg(db_size) AS bigint) AS size_bytes \
                 FROM statistics \
                 WHERE server_name = $1 AND ts BETWEEN $2 AND $3 \
                 GROUP BY 1, datname ORDER BY 1, datname",
                expr = bucketed.ts_expr()
            ),
        };

        let rows = sqlx::query(&sql)
            .bind(server_name)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| TimelinePoint {
                ts: row.get("ts"),
                datname: row.get("datname"),
                connections: row.get("connections"),
                size_bytes: row.get("size_bytes"),
            })
            .collect())
    }

    /// Per-database timeline; one point per bucket.
    pub async fn database_timeline(
        &self,
        server_name: &str,
        datname: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DatabaseResult<Vec<DbTimelinePoint>> {
        let bucket = TimeBucket::for_range(from, to);
        let sql = match bucket {
            TimeBucket::Raw => "SELECT ts, \
                 CAST(COALESCE(numbackends, 0) AS bigint) AS connections, \
                 db_size AS size_bytes, xact_commit AS commits \
                 FROM statistics \
                 WHERE server_name = $1 AND datname = $2 AND ts BETWEEN $3 AND $4 \
                 ORDER BY ts"
                .to_string(),
            bucketed => format!(
                "SELECT {expr} AS ts, \
                 CAST(round(COALESCE(avg(numbackends), 0)) AS bigint) AS connections, \
                 CAST(avg(db_size) AS bigint) AS size_bytes, \
                 CAST(sum(xact_commit) AS bigint) AS commits \
                 FROM statistics \
                 WHERE server_name = $1 AND datname = $2 AND ts BETWEEN $3 AND $4 \
                 GROUP BY 1 ORDER BY 1",
                expr = bucketed.ts_expr()
            ),
        };

        let rows = sqlx::query(&sql)
            .bind(server_name)
            .bind(datname)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| DbTimelinePoint {
                ts: row.get("ts"),
                connections: row.get("connections"),
                size_bytes: row.get("size_bytes"),
                commits: row.get("commits"),
            })
            .collect())
    }

    pub async fn server_stats_summary(
        &self,
        server_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DatabaseResult<ServerStatsSummary> {
        let row = sqlx::query(
            "SELECT max(ts) AS last_update, \
             CAST(COALESCE(sum(numbackends), 0) AS bigint) AS total_connections, \
             CAST(COALESCE(sum(db_size), 0) AS bigint) AS total_size_bytes \
             FROM statistics \
             WHERE server_name = $1 AND ts BETWEEN $2 AND $3",
        )
        .bind(server_name)
        .bind(from)
        .bind(to)
        .fetch_one(self.pool())
        .await?;

        Ok(ServerStatsSummary {
            last_update: row.get("last_update"),
            total_connections: row.get("total_connections"),
            total_size_bytes: row.get("total_size_bytes"),
        })
    }

    pub async fn database_stats_summary(
        &self,
        server_name: &str,
        datname: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DatabaseResult<DbStatsSummary> {
        let row = sqlx::query(
            "SELECT max(ts) AS last_update, \
             CAST(COALESCE(sum(numbackends), 0) AS bigint) AS total_connections, \
             CAST(COALESCE(sum(xact_commit), 0) AS bigint) AS total_commits, \
             CAST(COALESCE(sum(db_size), 0) AS bigint) AS total_size_bytes, \
             CAST(COALESCE(max(numbackends), 0) AS bigint) AS max_connections, \
             CAST(COALESCE(min(numbackends), 0) AS bigint) AS min_connections \
             FROM statistics \
             WHERE server_name = $1 AND datname = $2 AND ts BETWEEN $3 AND $4",
        )
        .bind(server_name)
        .bind(datname)
        .bind(from)
        .bind(to)
        .fetch_one(self.pool())
        .await?;

        Ok(DbStatsSummary {
            last_update: row.get("last_update"),
            total_connections: row.get("total_connections"),
            total_commits: row.get("total_commits"),
            total_size_bytes: row.get("total_size_bytes"),
            max_connections: row.get("max_connections"),
            min_connections: row.get("min_connections"),
        })
    }

    pub async fn get_db_info(
        &self,
        server_name: &str,
        datname: &str,
    ) -> DatabaseResult<Option<DatabaseInfo>> {
        let row = sqlx::query(
            "SELECT server_name, datname, oid, creation_time, first_seen, last_seen \
             FROM db_info WHERE server_name = $1 AND datname = $2",
        )
        .bind(server_name)
        .bind(datname)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| DatabaseInfo {
            server_name: row.get("server_name"),
            datname: row.get("datname"),
            oid: row.get("oid"),
            creation_time: row.get("creation_time"),
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
        }))
    }

    /// Databases observed in the range, annotated with whether they still
    /// exist on the target according to the latest topology sync.
    pub async fn databases_in_range(
        &self,
        server_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DatabaseResult<Vec<DatabasePresence>> {
        let rows = sqlx::query(
            "SELECT DISTINCT s.datname, d.creation_time, (d.datname IS NOT NULL) AS is_live \
             FROM statistics s \
             LEFT JOIN db_info d \
               ON d.server_name = s.server_name AND d.datname = s.datname \
             WHERE s.server_name = $1 AND s.ts BETWEEN $2 AND $3 \
             ORDER BY s.datname",
        )
        .bind(server_name)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DatabasePresence {
                name: row.get("datname"),
                is_live: row.get("is_live"),
                creation_time: row.get("creation_time"),
            })
            .collect())
    }

    /// Newest sample that already carries a size, for quick summaries.
    pub async fn latest_db_sample(
        &self,
        server_name: &str,
        datname: &str,
    ) -> DatabaseResult<Option<LatestDbSample>> {
        let row = sqlx::query(
            "SELECT ts, CAST(COALESCE(numbackends, 0) AS bigint) AS connections, \
             db_size AS size_bytes, xact_commit AS commits \
             FROM statistics \
             WHERE server_name = $1 AND datname = $2 AND db_size IS NOT NULL \
             ORDER BY ts DESC LIMIT 1",
        )
        .bind(server_name)
        .bind(datname)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| LatestDbSample {
            ts: row.get("ts"),
            connections: row.get("connections"),
            size_bytes: row.get("size_bytes"),
            commits: row.get("commits"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let to = Utc::now();
        (to - Duration::days(days), to)
    }

    #[test]
    fn test_bucket_thresholds() {
        let (from, to) = range(1);
        assert_eq!(TimeBucket::for_range(from, to), TimeBucket::Raw);
        let (from, to) = range(2);
        assert_eq!(TimeBucket::for_range(from, to), TimeBucket::Raw);
        let (from, to) = range(10);
        assert_eq!(TimeBucket::for_range(from, to), TimeBucket::Hour);
        let (from, to) = range(14);
        assert_eq!(TimeBucket::for_range(from, to), TimeBucket::Hour);
        let (from, to) = range(60);
        assert_eq!(TimeBucket::for_range(from, to), TimeBucket::FourHour);
        let (from, to) = range(90);
        assert_eq!(TimeBucket::for_range(from, to), TimeBucket::FourHour);
        let (from, to) = range(180);
        assert_eq!(TimeBucket::for_range(from, to), TimeBucket::Day);
    }

    #[test]
    fn test_bucket_is_monotonic_in_range() {
        let mut last = TimeBucket::Raw;
        for days in 0..400 {
            let (from, to) = range(days);
            let bucket = TimeBucket::for_range(from, to);
            assert!(bucket >= last, "bucket shrank at {} days", days);
            last = bucket;
        }
    }

    #[test]
    fn test_bucket_exprs_are_fixed() {
        // The allow-list must never interpolate user input.
        for bucket in [
            TimeBucket::Raw,
            TimeBucket::Hour,
            TimeBucket::FourHour,
            TimeBucket::Day,
        ] {
            assert!(!bucket.ts_expr().contains('$'));
        }
        assert_eq!(TimeBucket::Hour.ts_expr(), "date_trunc('hour', ts)");
    }
}

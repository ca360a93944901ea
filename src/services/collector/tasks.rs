use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::database::error::DatabaseResult;
use crate::models::server::Server;
use crate::services::collector::CollectOutcome;
use crate::services::remote::describe_remote_error;
use crate::state::AppContext;

/// One `pg_stat_database` row read from a target.
struct ActivitySample {
    datname: String,
    numbackends: i32,
    xact_commit: i64,
}

// ------------------------------------------------------------------------ //
//  Activity stats
// ------------------------------------------------------------------------ //

/// Append one statistics row per live database on the target. Disk metrics
/// ride along on every row; `db_size` stays null until the size collector
/// fills it.
pub async fn collect_server_stats(ctx: &AppContext, server: &Server) -> CollectOutcome {
    let mut outcome = CollectOutcome::new(&server.name);

    let (data_dir, samples) = match fetch_activity(ctx, server).await {
        Ok(result) => result,
        Err(e) => {
            outcome.errors.push(e.to_string());
            tracing::error!(server = %server.name, error = %e, "activity collection failed");
            return outcome;
        }
    };

    if samples.is_empty() {
        outcome
            .errors
            .push("no databases in pg_stat_database".to_string());
        return outcome;
    }

    // SSH failures degrade the sample (null disk columns), they do not
    // abort the cycle.
    let (disk_free, disk_total) = match ctx.ssh.df_bytes(server, &data_dir).await {
        Ok((free, total)) => (Some(free), Some(total)),
        Err(e) => {
            tracing::warn!(server = %server.name, error = %e, "disk usage unavailable");
            (None, None)
        }
    };

    let now = Utc::now();
    for sample in &samples {
        let inserted = ctx
            .warehouse
            .insert_stat_sample(
                &server.name,
                now,
                &sample.datname,
                sample.numbackends,
                sample.xact_commit,
                disk_free,
                disk_total,
            )
            .await;
        match inserted {
            Ok(()) => outcome.inserted += 1,
            Err(e) => {
                outcome.errors.push(format!("{}: {}", sample.datname, e));
                tracing::error!(
                    server = %server.name,
                    datname = %sample.datname,
                    error = %e,
                    "statistics insert failed"
                );
            }
        }
    }

    tracing::info!(
        server = %server.name,
        inserted = outcome.inserted,
        disk_free,
        disk_total,
        "activity stats collected"
    );
    outcome
}

async fn fetch_activity(
    ctx: &AppContext,
    server: &Server,
) -> DatabaseResult<(String, Vec<ActivitySample>)> {
    let pool = ctx.remote.get_pool(server, None)?;

    let data_dir: String = sqlx::query_scalar("SELECT current_setting('data_directory')")
        .fetch_one(&pool)
        .await
        .map_err(|e| describe_remote_error(&e))?;

    let rows = sqlx::query(
        "SELECT s.datname, s.numbackends, s.xact_commit \
         FROM pg_stat_database s \
         JOIN pg_database d ON s.datid = d.oid \
         WHERE NOT d.datistemplate AND d.datname <> 'postgres' \
         ORDER BY s.datname",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| describe_remote_error(&e))?;

    let samples = rows
        .into_iter()
        .map(|row| ActivitySample {
            datname: row.get("datname"),
            numbackends: row.get("numbackends"),
            xact_commit: row.get("xact_commit"),
        })
        .collect();

    Ok((data_dir, samples))
}

// ------------------------------------------------------------------------ //
//  Database sizes
// ------------------------------------------------------------------------ //

/// Read `pg_database_size` per database and backfill the null `db_size`
/// samples. Sizes are queried one database at a time with a long statement
/// timeout so a single huge database cannot time out the whole batch.
pub async fn collect_server_sizes(ctx: &AppContext, server: &Server) -> CollectOutcome {
    let mut outcome = CollectOutcome::new(&server.name);

    let sizes = match fetch_db_sizes(ctx, server, &mut outcome).await {
        Ok(sizes) => sizes,
        Err(e) => {
            outcome.errors.push(e.to_string());
            tracing::error!(server = %server.name, error = %e, "size collection failed");
            return outcome;
        }
    };

    if sizes.is_empty() {
        outcome
            .errors
            .push("no databases to size".to_string());
        return outcome;
    }

    for (datname, size) in &sizes {
        match ctx.warehouse.backfill_db_size(&server.name, datname, *size).await {
            Ok(rows) => outcome.updated += rows,
            Err(e) => {
                outcome.errors.push(format!("{}: {}", datname, e));
                tracing::error!(
                    server = %server.name,
                    datname = %datname,
                    error = %e,
                    "db_size update failed"
                );
            }
        }
    }

    tracing::info!(server = %server.name, updated = outcome.updated, "db sizes updated");
    outcome
}

async fn fetch_db_sizes(
    ctx: &AppContext,
    server: &Server,
    outcome: &mut CollectOutcome,
) -> DatabaseResult<Vec<(String, i64)>> {
    let pool = ctx.remote.get_pool(server, None)?;
    let db_names = fetch_database_names(&pool).await?;

    // One connection for the whole batch; sizing a large cluster can take
    // far longer than the regular 5 s statement timeout.
    let mut conn = pool.acquire().await.map_err(|e| describe_remote_error(&e))?;
    sqlx::query("SET statement_timeout = '600s'")
        .execute(&mut *conn)
        .await
        .map_err(|e| describe_remote_error(&e))?;

    let mut sizes = Vec::with_capacity(db_names.len());
    for datname in &db_names {
        let size: Result<i64, sqlx::Error> = sqlx::query_scalar("SELECT pg_database_size($1)")
            .bind(datname)
            .fetch_one(&mut *conn)
            .await;
        match size {
            Ok(size) => sizes.push((datname.clone(), size)),
            Err(e) => {
                tracing::warn!(
                    server = %server.name,
                    datname = %datname,
                    error = %e,
                    "pg_database_size failed, skipping"
                );
                outcome.errors.push(format!("{}: {}", datname, e));
            }
        }
    }

    let _ = sqlx::query("SET statement_timeout = '5s'")
        .execute(&mut *conn)
        .await;

    Ok(sizes)
}

async fn fetch_database_names(pool: &PgPool) -> DatabaseResult<Vec<String>> {
    let names = sqlx::query_scalar(
        "SELECT datname FROM pg_database \
         WHERE NOT datistemplate AND datname <> 'postgres' \
         ORDER BY datname",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| describe_remote_error(&e))?;
    Ok(names)
}

// ------------------------------------------------------------------------ //
//  Topology sync
// ------------------------------------------------------------------------ //

/// Disjoint classification of remote vs. locally known databases.
#[derive(Debug, Default, PartialEq)]
pub struct TopologyDiff {
    pub added: Vec<String>,
    pub gone: Vec<String>,
    pub unchanged: Vec<String>,
    /// Same name, different oid: the database was dropped and recreated.
    pub recreated: Vec<String>,
}

pub fn diff_topology(
    remote: &BTreeMap<String, i64>,
    local: &BTreeMap<String, i64>,
) -> TopologyDiff {
    let mut diff = TopologyDiff::default();

    for (datname, oid) in remote {
        match local.get(datname) {
            None => diff.added.push(datname.clone()),
            Some(local_oid) if local_oid != oid => diff.recreated.push(datname.clone()),
            Some(_) => diff.unchanged.push(datname.clone()),
        }
    }
    for datname in local.keys() {
        if !remote.contains_key(datname) {
            diff.gone.push(datname.clone());
        }
    }
    diff
}

/// Reconcile `db_info` with the databases that actually exist on the target,
/// erasing sample history whose database identity changed.
pub async fn sync_server_databases(ctx: &AppContext, server: &Server) -> CollectOutcome {
    let mut outcome = CollectOutcome::new(&server.name);

    let remote = match fetch_remote_databases(ctx, server).await {
        Ok(remote) => remote,
        Err(e) => {
            outcome.errors.push(e.to_string());
            tracing::error!(server = %server.name, error = %e, "topology fetch failed");
            return outcome;
        }
    };

    let local: BTreeMap<String, i64> = match ctx.warehouse.list_db_info(&server.name).await {
        Ok(rows) => rows.into_iter().map(|db| (db.datname, db.oid)).collect(),
        Err(e) => {
            outcome.errors.push(e.to_string());
            return outcome;
        }
    };

    let diff = diff_topology(&remote, &local);

    if let Err(e) = ctx
        .warehouse
        .touch_last_seen(&server.name, &diff.unchanged)
        .await
    {
        outcome.errors.push(format!("last_seen: {}", e));
    }

    // Backfill creation times that earlier cycles could not resolve.
    if let Ok(missing) = ctx
        .warehouse
        .db_info_missing_creation_time(&server.name)
        .await
    {
        for (datname, oid) in missing {
            if let Some(created) = fetch_db_creation_time(ctx, server, oid).await {
                let _ = ctx
                    .warehouse
                    .set_db_creation_time(&server.name, &datname, created)
                    .await;
            }
        }
    }

    for datname in &diff.added {
        let oid = remote[datname];
        let created = fetch_db_creation_time(ctx, server, oid).await;
        match ctx
            .warehouse
            .insert_db_info(&server.name, datname, oid, created)
            .await
        {
            Ok(()) => {
                outcome.added += 1;
                tracing::info!(server = %server.name, datname = %datname, oid, "new database");
            }
            Err(e) => outcome.errors.push(format!("add {}: {}", datname, e)),
        }
    }

    for datname in &diff.recreated {
        let new_oid = remote[datname];
        let created = fetch_db_creation_time(ctx, server, new_oid).await;
        match ctx
            .warehouse
            .replace_recreated_db(&server.name, datname, new_oid, created)
            .await
        {
            Ok(()) => {
                outcome.recreated += 1;
                tracing::info!(
                    server = %server.name,
                    datname = %datname,
                    old_oid = local[datname],
                    new_oid,
                    "database recreated, history reset"
                );
            }
            Err(e) => outcome.errors.push(format!("recreate {}: {}", datname, e)),
        }
    }

    for datname in &diff.gone {
        match ctx.warehouse.remove_database(&server.name, datname).await {
            Ok(()) => {
                outcome.deleted += 1;
                tracing::info!(server = %server.name, datname = %datname, "database gone");
            }
            Err(e) => outcome.errors.push(format!("delete {}: {}", datname, e)),
        }
    }

    tracing::info!(
        server = %server.name,
        added = outcome.added,
        deleted = outcome.deleted,
        recreated = outcome.recreated,
        "topology synced"
    );
    outcome
}

async fn fetch_remote_databases(
    ctx: &AppContext,
    server: &Server,
) -> DatabaseResult<BTreeMap<String, i64>> {
    let pool = ctx.remote.get_pool(server, None)?;
    let rows = sqlx::query(
        "SELECT datname, oid::bigint AS oid FROM pg_database \
         WHERE NOT datistemplate AND datname <> 'postgres' \
         ORDER BY datname",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| describe_remote_error(&e))?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("datname"), row.get("oid")))
        .collect())
}

/// Creation time via the on-disk `PG_VERSION` file of the database. May be
/// unavailable (permissions, unusual layout); null is acceptable.
async fn fetch_db_creation_time(
    ctx: &AppContext,
    server: &Server,
    oid: i64,
) -> Option<DateTime<Utc>> {
    let pool = ctx.remote.get_pool(server, None).ok()?;
    let result: Result<Option<DateTime<Utc>>, sqlx::Error> = sqlx::query_scalar(
        "SELECT (pg_stat_file('base/' || $1 || '/PG_VERSION')).modification",
    )
    .bind(oid.to_string())
    .fetch_one(&pool)
    .await;

    match result {
        Ok(ts) => ts,
        Err(e) => {
            tracing::warn!(server = %server.name, oid, error = %e, "pg_stat_file lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_diff_disjoint_sets() {
        let remote = map(&[("app", 16384), ("orders", 17050), ("new_db", 18000)]);
        let local = map(&[("app", 16384), ("orders", 17000), ("old_db", 15000)]);

        let diff = diff_topology(&remote, &local);
        assert_eq!(diff.added, vec!["new_db"]);
        assert_eq!(diff.gone, vec!["old_db"]);
        assert_eq!(diff.unchanged, vec!["app"]);
        assert_eq!(diff.recreated, vec!["orders"]);

        // Every name lands in exactly one bucket.
        let total = diff.added.len() + diff.gone.len() + diff.unchanged.len() + diff.recreated.len();
        let mut names: Vec<&String> = remote.keys().chain(local.keys()).collect();
        names.sort();
        names.dedup();
        assert_eq!(total, names.len());
    }

    #[test]
    fn test_diff_empty_sides() {
        let empty = BTreeMap::new();
        let remote = map(&[("a", 1)]);

        let diff = diff_topology(&remote, &empty);
        assert_eq!(diff.added, vec!["a"]);
        assert!(diff.gone.is_empty() && diff.recreated.is_empty() && diff.unchanged.is_empty());

        let diff = diff_topology(&empty, &remote);
        assert_eq!(diff.gone, vec!["a"]);
        assert!(diff.added.is_empty() && diff.recreated.is_empty() && diff.unchanged.is_empty());

        assert_eq!(diff_topology(&empty, &empty), TopologyDiff::default());
    }

    #[test]
    fn test_diff_identical_sides() {
        let side = map(&[("a", 1), ("b", 2)]);
        let diff = diff_topology(&side, &side);
        assert_eq!(diff.unchanged, vec!["a", "b"]);
        assert!(diff.added.is_empty() && diff.gone.is_empty() && diff.recreated.is_empty());
    }
}

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::audit::LogLevel;
use crate::models::server::Server;
use crate::services::collector::{
    collect_server_sizes, collect_server_stats, sync_server_databases, CollectOutcome,
};
use crate::state::AppContext;

/// Grace period before the first cycle so the HTTP API comes up first.
const STARTUP_DELAY: Duration = Duration::from_secs(10);
const DAILY: u64 = 86_400;

/// Four independent periodic loops: activity stats, sizes, topology sync,
/// daily maintenance. Intervals are re-read from the settings table on
/// every iteration; per-target state lives in the warehouse, not here.
pub struct Scheduler {
    ctx: AppContext,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(ctx: AppContext, shutdown: CancellationToken) -> Self {
        Self { ctx, shutdown }
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let handles = vec![
            tokio::spawn(stats_loop(self.ctx.clone(), self.shutdown.clone())),
            tokio::spawn(sizes_loop(self.ctx.clone(), self.shutdown.clone())),
            tokio::spawn(topology_loop(self.ctx.clone(), self.shutdown.clone())),
            tokio::spawn(maintenance_loop(self.ctx, self.shutdown)),
        ];
        tracing::info!("collector started: {} loops", handles.len());
        handles
    }
}

/// Sleep that loses to shutdown. Returns true when the loop should exit.
async fn sleep_or_shutdown(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Run one cycle step unless shutdown wins first. Returns true on shutdown.
async fn step_or_shutdown<F: Future<Output = ()>>(
    shutdown: &CancellationToken,
    step: F,
) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = step => false,
    }
}

async fn stats_loop(ctx: AppContext, shutdown: CancellationToken) {
    if sleep_or_shutdown(&shutdown, STARTUP_DELAY).await {
        return;
    }
    loop {
        if step_or_shutdown(&shutdown, fan_out(&ctx, "stats", CollectorKind::Stats)).await {
            break;
        }
        let interval = ctx
            .warehouse
            .int_setting("collect_interval", ctx.config.collect_interval as i64)
            .await
            .max(1) as u64;
        if sleep_or_shutdown(&shutdown, Duration::from_secs(interval)).await {
            break;
        }
    }
    tracing::info!("[stats] loop stopped");
}

async fn sizes_loop(ctx: AppContext, shutdown: CancellationToken) {
    if sleep_or_shutdown(&shutdown, STARTUP_DELAY).await {
        return;
    }
    loop {
        if step_or_shutdown(&shutdown, fan_out(&ctx, "sizes", CollectorKind::Sizes)).await {
            break;
        }
        let interval = ctx
            .warehouse
            .int_setting(
                "size_update_interval",
                ctx.config.size_update_interval as i64,
            )
            .await
            .max(1) as u64;
        if sleep_or_shutdown(&shutdown, Duration::from_secs(interval)).await {
            break;
        }
    }
    tracing::info!("[sizes] loop stopped");
}

async fn topology_loop(ctx: AppContext, shutdown: CancellationToken) {
    if sleep_or_shutdown(&shutdown, STARTUP_DELAY).await {
        return;
    }
    loop {
        if step_or_shutdown(&shutdown, fan_out(&ctx, "db_info", CollectorKind::Topology)).await {
            break;
        }
        let interval = ctx
            .warehouse
            .int_setting("db_check_interval", ctx.config.db_check_interval as i64)
            .await
            .max(1) as u64;
        if sleep_or_shutdown(&shutdown, Duration::from_secs(interval)).await {
            break;
        }
    }
    tracing::info!("[db_info] loop stopped");
}

async fn maintenance_loop(ctx: AppContext, shutdown: CancellationToken) {
    if sleep_or_shutdown(&shutdown, STARTUP_DELAY).await {
        return;
    }
    loop {
        if step_or_shutdown(&shutdown, run_maintenance(&ctx)).await {
            break;
        }
        if sleep_or_shutdown(&shutdown, Duration::from_secs(DAILY)).await {
            break;
        }
    }
    tracing::info!("[maintenance] loop stopped");
}

/// Which collector a fan-out cycle runs.
#[derive(Debug, Clone, Copy)]
enum CollectorKind {
    Stats,
    Sizes,
    Topology,
}

impl CollectorKind {
    async fn run(self, ctx: &AppContext, server: &Server) -> CollectOutcome {
        match self {
            CollectorKind::Stats => collect_server_stats(ctx, server).await,
            CollectorKind::Sizes => collect_server_sizes(ctx, server).await,
            CollectorKind::Topology => sync_server_databases(ctx, server).await,
        }
    }
}

/// Run one collector over every registered target in parallel and log the
/// aggregate result. A failing target contributes an error entry and
/// nothing else.
async fn fan_out(ctx: &AppContext, loop_name: &'static str, kind: CollectorKind) {
    let servers = match ctx.warehouse.list_servers().await {
        Ok(servers) => servers,
        Err(e) => {
            tracing::error!(error = %e, "[{}] failed to load servers", loop_name);
            return;
        }
    };

    tracing::info!("[{}] collecting from {} servers", loop_name, servers.len());
    let outcomes = join_all(servers.iter().map(|s| kind.run(ctx, s))).await;

    let ok = outcomes.iter().filter(|o| o.is_ok()).count();
    let failed = outcomes.len() - ok;
    for outcome in outcomes.iter().filter(|o| !o.is_ok()) {
        tracing::error!(
            "[{}] {}: {}",
            loop_name,
            outcome.server_name,
            outcome.errors.join("; ")
        );
    }
    tracing::info!("[{}] finished: {} ok, {} with errors", loop_name, ok, failed);

    let level = match failed {
        0 => LogLevel::Info,
        _ => LogLevel::Warning,
    };
    let details = outcomes
        .iter()
        .filter(|o| !o.is_ok())
        .map(|o| format!("{}: {}", o.server_name, o.errors.join("; ")))
        .collect::<Vec<_>>()
        .join("\n");
    ctx.warehouse
        .log_system(
            level,
            &format!("collector.{}", loop_name),
            &format!("cycle finished: {} ok, {} with errors", ok, failed),
            (!details.is_empty()).then_some(details.as_str()),
        )
        .await;
}

/// Daily upkeep: roll partitions forward, enforce retention windows, drop
/// expired revocations.
async fn run_maintenance(ctx: &AppContext) {
    tracing::info!("[maintenance] starting");

    if let Err(e) = ctx.warehouse.ensure_partitions().await {
        tracing::error!(error = %e, "[maintenance] partition creation failed");
        ctx.warehouse
            .log_system(
                LogLevel::Error,
                "collector.maintenance",
                "partition creation failed",
                Some(&e.to_string()),
            )
            .await;
    }

    let retention_months = ctx
        .warehouse
        .int_setting("retention_months", ctx.config.retention_months)
        .await
        .max(1);
    match ctx.warehouse.cleanup_old_partitions(retention_months).await {
        Ok(dropped) if !dropped.is_empty() => {
            ctx.warehouse
                .log_system(
                    LogLevel::Info,
                    "collector.maintenance",
                    &format!("dropped {} expired partition(s)", dropped.len()),
                    Some(&dropped.join(", ")),
                )
                .await;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "[maintenance] partition cleanup failed");
        }
    }

    let audit_days = ctx
        .warehouse
        .int_setting("audit_retention_days", 90)
        .await
        .max(1);
    if let Err(e) = ctx.warehouse.purge_audit(audit_days).await {
        tracing::error!(error = %e, "[maintenance] audit retention failed");
    }

    let log_days = ctx
        .warehouse
        .int_setting("logs_retention_days", 30)
        .await
        .max(1);
    if let Err(e) = ctx.warehouse.purge_system_log(log_days).await {
        tracing::error!(error = %e, "[maintenance] system_log retention failed");
    }

    ctx.auth.purge_expired_revocations();
    tracing::info!("[maintenance] finished");
}

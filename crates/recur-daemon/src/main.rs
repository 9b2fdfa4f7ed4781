use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use recur_core::config::RecurConfig;
use recur_instances::{
    InstanceGenerator, OccurrenceRepository, RefillJob, SqliteTemplateStore, TemplateRepository,
};
use recur_scheduler::{Scheduler, SqliteExecutionRecords, SystemTimeSource, TimeSource};
use tracing::info;

mod handlers;
mod router;
mod templates;

/// Recurring-task daemon: materializes template occurrences and fires due jobs.
#[derive(Parser, Debug)]
#[command(name = "recur-daemon", version, about)]
struct Cli {
    /// Path to recur.toml (defaults to ~/.recur/recur.toml).
    #[arg(long, env = "RECUR_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recur_daemon=info,recur_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = RecurConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        RecurConfig::default()
    });

    // one SQLite file; each store gets its own connection
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    recur_scheduler::db::init_db(&db)?;
    recur_instances::db::init_db(&db)?;
    info!("database migrations complete");

    let store = Arc::new(SqliteTemplateStore::new(rusqlite::Connection::open(db_path)?)?);
    let records = Arc::new(SqliteExecutionRecords::new(rusqlite::Connection::open(db_path)?)?);
    let system_time = SystemTimeSource::new().ok_or_else(|| anyhow::anyhow!("no Tokio runtime"))?;
    let time: Arc<dyn TimeSource> = Arc::new(system_time);

    // Scheduler events: engine → router task
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(config.scheduler.event_buffer);
    let occurrences: Arc<dyn OccurrenceRepository> = store.clone();
    let template_store: Arc<dyn TemplateRepository> = store.clone();
    let scheduler = Scheduler::new(
        time.clone(),
        handlers::build_registry(template_store.clone(), occurrences.clone(), time.clone()),
        records,
        config.scheduler.clone(),
        Some(events_tx),
    )?;
    tokio::spawn(router::run_event_router(events_rx, occurrences.clone()));

    // materialize occurrences before the first due-signal can fire
    let refill = RefillJob::new(
        InstanceGenerator::new(config.generation.clone()),
        template_store.clone(),
        occurrences,
    );
    let now = recur_core::types::from_timestamp(time.now());
    let report = refill.run_once(now)?;
    info!(generated = report.generated, templates = report.checked, "initial refill done");
    let summary =
        templates::sync_template_schedules(&scheduler, template_store.as_ref(), now.date_naive())?;
    info!(created = summary.created, "template schedules registered");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let refill_loop = tokio::spawn(templates::run_refill_loop(
        refill,
        scheduler.clone(),
        template_store,
        time,
        Duration::from_secs(config.refill.interval_secs.max(1)),
        shutdown_rx,
    ));

    info!(schedules = scheduler.list_schedules().len(), "recur daemon running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // signal background loops to stop
    let _ = shutdown_tx.send(true);
    scheduler.stop();
    let _ = refill_loop.await;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

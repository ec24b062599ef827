use std::sync::Arc;

use tracing::info;

use slotbook::collab::{spawn_notifier, LogNotifier};
use slotbook::compactor;
use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        notify.clone(),
        config.engine_options(),
    )?);

    info!("slotbook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  require_approval: {}", config.require_approval);
    info!("  owner_may_reschedule: {}", config.owner_may_reschedule);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let notifier = spawn_notifier(&notify, Arc::new(LogNotifier));
    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    let compaction_task = tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    // Run until SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    info!("shutdown signal received");

    compaction_task.abort();
    // Leave a compact log behind so the next start replays quickly.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    notifier.abort();

    info!("slotbook stopped");
    Ok(())
}

//! Wires the standalone crates into one running daemon: loads config,
//! builds the in-process stores, recovers sessions left behind by the
//! previous run, then drives the queue processor until a shutdown signal
//! arrives.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use sandboxd_common::{init_tracing, GlobalArgs};
use sandboxd_core::{AutoResumeService, HandlerConfig, InMemorySessionStore, OrchestratorTaskHandler, SessionRegistry};
use sandboxd_event_log::EventLog;
use sandboxd_queue::{InMemoryQueueStore, QuotaConfig, QuotaManager, QueueProcessor, QueueProcessorConfig};

use crate::pump::UnimplementedPumpFactory;
use crate::session_preparer::ConfigSessionPreparer;

pub async fn run(args: GlobalArgs) -> anyhow::Result<()> {
    init_tracing(&args);

    let home = args.resolve_home()?;
    let config = Arc::new(sandboxd_common::config::load(&home)?);
    tracing::info!(home = %home.display(), model = %config.agent.default_model, "sandboxd starting");

    let sessions = Arc::new(InMemorySessionStore::default());
    let queue_store = Arc::new(InMemoryQueueStore::default());
    let quotas = Arc::new(QuotaManager::new(QuotaConfig::default()));
    let events = Arc::new(EventLog::new(home.join("events")));
    let registry = Arc::new(SessionRegistry::new());

    let auto_resume = AutoResumeService::new(sessions.clone(), queue_store.clone(), config.agent.max_resume_attempts);
    let recovery_started_at = chrono::Utc::now();
    let recovery = auto_resume.recover_on_startup(Duration::hours(config.agent.recovery_max_age_hours)).await?;
    tracing::info!(
        recovered = recovery.recovered,
        failed_no_resume_id = recovery.failed_no_resume_id,
        failed_attempts_exhausted = recovery.failed_attempts_exhausted,
        took = %sandboxd_common::elapsed::format_elapsed(recovery_started_at),
        "startup recovery swept"
    );

    let preparer = Arc::new(ConfigSessionPreparer::new(config.clone()));
    let pumps = Arc::new(UnimplementedPumpFactory);
    let handler_config = HandlerConfig {
        default_timeout: StdDuration::from_secs(config.agent.task_timeout_minutes * 60),
        large_input_threshold_bytes: config.agent.large_input_threshold_bytes as usize,
        large_input_template: config.agent.large_input_template.clone(),
    };
    let handler = Arc::new(OrchestratorTaskHandler::new(
        sessions.clone(),
        registry.clone(),
        events.clone(),
        pumps,
        preparer,
        queue_store.clone(),
        quotas.clone(),
        handler_config,
    ));
    let processor = Arc::new(QueueProcessor::new(
        queue_store.clone(),
        quotas.clone(),
        handler.clone(),
        QueueProcessorConfig::default(),
    ));

    let cleanup_handle = tokio::spawn(cleanup_loop(auto_resume, config.agent.cleanup_max_age_hours));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let processor_task = tokio::spawn(async move { processor.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    cleanup_handle.abort();
    processor_task.await?;
    Ok(())
}

/// Periodically fails sessions that have been stuck since before the
/// configured cutoff — catches what `recover_on_startup` can't (sessions
/// that go stale while the process is up, not just across a restart).
async fn cleanup_loop(
    auto_resume: AutoResumeService<Arc<InMemorySessionStore>, Arc<InMemoryQueueStore>>,
    cleanup_max_age_hours: i64,
) {
    let mut ticker = tokio::time::interval(StdDuration::from_secs(15 * 60));
    loop {
        ticker.tick().await;
        match auto_resume.cleanup_old_sessions(Duration::hours(cleanup_max_age_hours)).await {
            Ok(count) if count > 0 => tracing::info!(count, "cleaned up stale sessions"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "stale session cleanup failed"),
        }
    }
}

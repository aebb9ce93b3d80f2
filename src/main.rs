use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use pumpaudit::config::{Command, Config};
use pumpaudit::domain::{BatchId, ExecutionId};
use pumpaudit::engine::{Engine, LifecycleManager, StorageProgress};
use pumpaudit::observability::{init_tracing, EngineMetrics};
use pumpaudit::storage::{PostgresStorage, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    init_tracing(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting pumpaudit anomaly engine"
    );

    let storage = PostgresStorage::connect(
        &config.database_url,
        config.db_min_connections,
        config.db_max_connections,
    )
    .await?;
    storage.run_migrations().await?;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    match config.command.clone() {
        Command::Create {
            template_id,
            batches,
        } => {
            let lifecycle = LifecycleManager::new(storage);
            let execution = lifecycle
                .create_execution(template_id, batches.into_iter().map(BatchId).collect())
                .await?;
            println!("{}", execution.execution_id);
        }

        Command::Run {
            execution_id,
            batches,
        } => {
            let execution_id = ExecutionId::new(execution_id);
            let metrics = Arc::new(EngineMetrics::new());
            let progress = Arc::new(StorageProgress::new(storage.clone(), execution_id.clone()));
            let engine = Engine::new(storage, progress, metrics.clone(), config.engine_options());

            let batch_ids = batches.map(|b| b.into_iter().map(BatchId).collect());
            match engine.run(&execution_id, batch_ids).await {
                Ok(summary) => {
                    info!(
                        execution_id = %summary.execution_id,
                        status = %summary.status,
                        total_violations = summary.total_violations,
                        completed_batches = summary.completed_batches,
                        failed_batches = summary.failed_batches,
                        malformed_records = summary.malformed_records,
                        elapsed_ms = summary.elapsed_ms,
                        "execution finished"
                    );
                    info!(metrics = ?metrics.snapshot(), "engine metrics");
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                Err(e) => {
                    error!(execution_id = %execution_id, error = %e, "execution failed");
                    std::process::exit(1);
                }
            }
        }

        Command::Sweep { stale_after_secs } => {
            let swept = storage
                .sweep_stale(chrono::Duration::seconds(stale_after_secs as i64))
                .await?;
            info!(swept, stale_after_secs, "stale executions reconciled");
        }
    }

    Ok(())
}

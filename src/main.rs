mod config;
mod core;
mod entrypoint;
mod executor;
mod jobs;
mod languages;
mod redis_manager;
mod runner;
mod sandbox;
mod workspace;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::executor::{Executor, WorkerPool};
use crate::jobs::execute::{process_execute_job, ExecuteResult};
use crate::jobs::WorkerJob;
use crate::languages::LanguageRegistry;
use crate::redis_manager::RedisManager;
use crate::runner::SandboxedRunner;
use crate::workspace::WorkspaceManager;

/// How long one BLPOP waits before the shutdown flag is checked again
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sandbox_worker=info".parse()?),
        )
        .init();

    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;

    // Load language configurations
    let registry = match &config.languages_path {
        Some(path) => {
            let registry = LanguageRegistry::from_file(path)
                .with_context(|| format!("Failed to load language configurations from {:?}", path))?;
            info!("Loaded language configurations from {:?}", path);
            registry
        }
        None => LanguageRegistry::builtin().context("Built-in language table is invalid")?,
    };
    info!("Supported languages: {}", registry.supported_languages().join(", "));

    info!("Starting Sandbox Worker...");

    // Fail fast if the container runtime is unreachable
    sandbox::ensure_runtime_available(&config.sandbox.runtime).await?;

    let workspaces = WorkspaceManager::new(&config.scratch_root);
    let swept = workspaces
        .sweep_stale()
        .await
        .context("Failed to sweep scratch root")?;
    if swept > 0 {
        warn!(
            "Removed {} stale workspaces from {:?}",
            swept,
            workspaces.root()
        );
    }

    let runner = SandboxedRunner::new(config.sandbox.clone());
    info!(
        "Sandbox config: runtime={}, memory={}MB, pids={}, max_output={} bytes",
        runner.config().runtime,
        runner.config().memory_mb,
        runner.config().pids_limit,
        runner.config().max_output_bytes
    );

    let executor = Arc::new(Executor::new(
        Arc::new(registry),
        workspaces,
        Arc::new(runner),
        WorkerPool::new(config.pool_size, config.max_queue),
    ));
    info!(
        "Worker pool: {} concurrent runs, {} queued",
        config.pool_size, config.max_queue
    );

    let mut redis = RedisManager::connect(&config.redis_url).await?;
    let publisher = redis.publisher().await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        });
    }

    info!("Waiting for jobs...");

    let mut tasks = JoinSet::new();
    while !shutdown.is_cancelled() {
        let job = match redis.pop_job(POLL_TIMEOUT).await {
            Ok(Some(Ok(job))) => job,
            Ok(Some(Err(malformed))) => {
                if let (Some(key), Some(request_id)) =
                    (malformed.result_key(), malformed.request_id.clone())
                {
                    let mut publisher = publisher.clone();
                    let result = ExecuteResult::rejected(request_id, malformed.to_string());
                    tasks.spawn(async move {
                        if let Err(e) = publisher.store_execute_result(&key, &result).await {
                            error!("Failed to store rejection {}: {:#}", result.request_id, e);
                        }
                    });
                }
                reap_finished(&mut tasks);
                continue;
            }
            Ok(None) => {
                reap_finished(&mut tasks);
                continue;
            }
            Err(e) => {
                error!("Failed to receive job: {:#}", e);
                continue;
            }
        };

        match job {
            WorkerJob::Execute(job) => {
                info!(
                    "Received execute job: request_id={}, language={}",
                    job.request_id, job.language
                );

                let executor = executor.clone();
                let mut publisher = publisher.clone();
                let cancel = shutdown.child_token();
                tasks.spawn(async move {
                    let result = process_execute_job(&executor, &job, &cancel).await;
                    if let Err(e) = publisher
                        .store_execute_result(&job.result_key(), &result)
                        .await
                    {
                        error!("Failed to store execute result {}: {:#}", job.request_id, e);
                    }
                    info!(
                        "Execute job completed: request_id={}, outcome={}",
                        job.request_id, result.outcome
                    );
                });
            }
        }
        reap_finished(&mut tasks);
    }

    // Running jobs see the cancellation, kill their containers and still
    // report a result
    info!("Draining {} running jobs...", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        log_join_error(joined);
    }
    info!("Sandbox Worker stopped");

    Ok(())
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        log_join_error(joined);
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Execute job task failed: {}", e);
    }
}

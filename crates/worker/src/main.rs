use std::sync::Arc;

use anyhow::{Context, bail};
use rowforge_infra::config::WorkerConfig;
use rowforge_infra::jobs::{JobContext, JobRegistry, MethodTable, WorkQueue, Worker, WorkerOptions};

const USAGE: &str = "usage: rowforge-worker <info | destroy | work <queue>...>";

fn main() -> anyhow::Result<()> {
    rowforge_observability::init();

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        bail!(USAGE);
    };

    let config = WorkerConfig::from_env();
    let jobs = config
        .jobs_service()
        .with_context(|| format!("failed to open jobs database at {}", config.redis_url))?;
    let registry = Arc::new(JobRegistry::new(jobs.clone()));

    match command.as_str() {
        "info" => {
            let tasks = registry.list_all_tasks()?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        "destroy" => registry.destroy()?,
        "work" => {
            let queues: Vec<String> = args.collect();
            if queues.is_empty() {
                bail!("work needs at least one queue\n{USAGE}");
            }
            let backend = config.store_backend().with_context(|| {
                format!(
                    "failed to open {:?} store over {}",
                    config.backend, config.data_redis_url
                )
            })?;
            let context = JobContext::new(backend, registry);
            let options = WorkerOptions::new(queues).with_dequeue_timeout(config.dequeue_timeout);

            tracing::info!(backend = ?config.backend, "starting worker");
            let worker = Worker::new(
                WorkQueue::new(jobs),
                Arc::new(MethodTable::with_builtins()),
                context,
                options,
            );
            let processed = worker.spawn()?.join()?;
            tracing::info!(processed, "worker exited");
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
    Ok(())
}

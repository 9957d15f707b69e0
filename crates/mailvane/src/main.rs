//! Mailvane CLI: run workers and operate the queue and the search index.

mod adapters;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use mailvane_kv::{Kv, LockManager, RedisKv};
use mailvane_logging::{init_logging, LogConfig};
use mailvane_monitor::{AlertStore, HealthMonitor, HealthThresholds};
use mailvane_protocol::{
    AlertId, EnqueueOptions, Priority, SystemConfig, TaskId, TaskPayload,
};
use mailvane_queue::{LeaseReaper, Scheduler, SchedulerConfig};
use mailvane_search::{
    HealthAnalyzer, IndexStore, Indexer, Optimizer, QueryEngine, SearchOptions,
};
use mailvane_worker::{default_registry, Worker, WorkerConfig, WorkerEnv};

use adapters::{KvBlobStore, KvDocumentStore, KvNotificationGateway, OutboxMailTransport};

const REAPER_INTERVAL: Duration = Duration::from_secs(30);
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "mailvane", version, about = "Email-processing backend: durable task queue and search index")]
struct Cli {
    /// Mirror the log file's verbosity on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker loop with the lease reaper and health monitor
    Worker {
        /// Worker id; defaults to worker-<pid>
        #[arg(long, env = "MAILVANE_WORKER_ID")]
        id: Option<String>,
    },
    /// Enqueue a task from inline payload JSON ({"kind": ..., "data": ...})
    Enqueue {
        payload: String,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Delay before the task becomes due, in seconds
        #[arg(long)]
        delay_secs: Option<i64>,
    },
    /// Show a task's status record
    Status { id: String },
    /// Page through the dead-letter queue, newest first
    Failed {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Re-enqueue a dead-letter task as a fresh attempt chain
    Requeue { id: String },
    /// Query the search index
    Search {
        query: String,
        /// Metadata filters as key=value, repeatable
        #[arg(long)]
        filter: Vec<String>,
        #[arg(long)]
        fuzzy: bool,
        #[arg(long, default_value_t = 0)]
        from: usize,
        #[arg(long, default_value_t = 10)]
        size: usize,
    },
    /// Run the index optimization passes
    Optimize,
    /// Print the index health report
    IndexHealth {
        /// Bypass the hourly cache
        #[arg(long)]
        fresh: bool,
    },
    /// List, acknowledge, or resolve alerts
    Alerts {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Acknowledge an alert id (as <id>:<who>)
        #[arg(long)]
        ack: Option<String>,
        /// Resolve an alert id
        #[arg(long)]
        resolve: Option<String>,
    },
    /// Print queue depths
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "mailvane",
        verbose: cli.verbose,
    })?;

    let config = SystemConfig::from_env();
    let kv: Arc<dyn Kv> = Arc::new(
        RedisKv::connect(&config.kv_url)
            .await
            .with_context(|| format!("Failed to connect to KV at {}", config.kv_url))?,
    );
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&kv),
        SchedulerConfig {
            lease_timeout: config.lease_timeout,
            ..Default::default()
        },
    ));

    match cli.command {
        Command::Worker { id } => run_worker(kv, scheduler, config, id).await,
        Command::Enqueue {
            payload,
            priority,
            max_attempts,
            delay_secs,
        } => enqueue(&scheduler, &payload, priority, max_attempts, delay_secs).await,
        Command::Status { id } => show_status(&scheduler, &id).await,
        Command::Failed { offset, limit } => list_failed(&scheduler, offset, limit).await,
        Command::Requeue { id } => requeue(&scheduler, &id).await,
        Command::Search {
            query,
            filter,
            fuzzy,
            from,
            size,
        } => search(kv, &query, filter, fuzzy, from, size).await,
        Command::Optimize => optimize(kv).await,
        Command::IndexHealth { fresh } => index_health(kv, fresh).await,
        Command::Alerts { limit, ack, resolve } => alerts(kv, limit, ack, resolve).await,
        Command::Stats => stats(&scheduler).await,
    }
}

fn build_env(kv: Arc<dyn Kv>, scheduler: Arc<Scheduler>, config: SystemConfig) -> WorkerEnv {
    let store = IndexStore::new(Arc::clone(&kv));
    let locks = LockManager::new(Arc::clone(&kv));
    WorkerEnv {
        indexer: Arc::new(Indexer::new(store.clone(), locks)),
        query: Arc::new(QueryEngine::new(store)),
        docs: Arc::new(KvDocumentStore::new(Arc::clone(&kv))),
        blobs: Arc::new(KvBlobStore::new(Arc::clone(&kv))),
        mail: Arc::new(OutboxMailTransport::new(Arc::clone(&kv))),
        notifications: Arc::new(KvNotificationGateway::new(Arc::clone(&kv))),
        scheduler,
        kv,
        config,
    }
}

async fn run_worker(
    kv: Arc<dyn Kv>,
    scheduler: Arc<Scheduler>,
    config: SystemConfig,
    id: Option<String>,
) -> Result<()> {
    let mut worker_config = WorkerConfig {
        poll_interval: config.poll_interval,
        ..Default::default()
    };
    if let Some(id) = id {
        worker_config.worker_id = id;
    }

    let env = build_env(Arc::clone(&kv), Arc::clone(&scheduler), config.clone());
    let worker = Worker::new(worker_config, env.clone(), default_registry());
    let shutdown = worker.shutdown_token();

    let reaper = LeaseReaper::new(Arc::clone(&kv), config.lease_timeout);
    let reaper_handle = tokio::spawn(reaper.run(REAPER_INTERVAL));

    let monitor = HealthMonitor::new(
        Arc::clone(&kv),
        Arc::clone(&scheduler),
        Arc::clone(&env.docs),
        HealthThresholds::default(),
    );
    let monitor_handle = tokio::spawn(monitor.run(MONITOR_INTERVAL));

    let worker_handle = tokio::spawn(async move { worker.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();
    let _ = worker_handle.await;
    reaper_handle.abort();
    monitor_handle.abort();
    Ok(())
}

async fn enqueue(
    scheduler: &Scheduler,
    payload: &str,
    priority: Option<String>,
    max_attempts: Option<u32>,
    delay_secs: Option<i64>,
) -> Result<()> {
    let payload: TaskPayload =
        serde_json::from_str(payload).context("Payload must be {\"kind\": ..., \"data\": ...}")?;
    let priority = match priority.as_deref() {
        Some("high") => Some(Priority::High),
        Some("normal") => Some(Priority::Normal),
        Some("low") => Some(Priority::Low),
        Some(other) => bail!("unknown priority: {}", other),
        None => None,
    };
    let opts = EnqueueOptions {
        priority,
        max_attempts,
        scheduled_for: delay_secs.map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
        ..Default::default()
    };
    let id = scheduler.enqueue(payload, opts).await?;
    println!("{}", id);
    Ok(())
}

async fn show_status(scheduler: &Scheduler, id: &str) -> Result<()> {
    let id: TaskId = id.parse()?;
    match scheduler.get_status(&id).await? {
        Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        None => bail!("no status for task {}", id),
    }
    Ok(())
}

async fn list_failed(scheduler: &Scheduler, offset: usize, limit: usize) -> Result<()> {
    let tasks = scheduler.list_failed(offset, limit, true).await?;
    if tasks.is_empty() {
        println!("dead-letter queue is empty");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {}  attempts {}/{}  {}",
            task.id,
            task.kind(),
            task.attempts,
            task.max_attempts,
            task.error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn requeue(scheduler: &Scheduler, id: &str) -> Result<()> {
    let id: TaskId = id.parse()?;
    let Some(task) = scheduler.get_task(&id).await? else {
        bail!("no record for task {}", id);
    };
    let new_id = scheduler
        .enqueue(
            task.payload,
            EnqueueOptions {
                priority: Some(task.priority),
                max_attempts: Some(task.max_attempts),
                metadata: Some(task.metadata),
                correlation_id: Some(task.correlation_id),
                ..Default::default()
            },
        )
        .await?;
    println!("{}", new_id);
    Ok(())
}

async fn search(
    kv: Arc<dyn Kv>,
    query: &str,
    filters: Vec<String>,
    fuzzy: bool,
    from: usize,
    size: usize,
) -> Result<()> {
    let mut parsed: HashMap<String, Value> = HashMap::new();
    for filter in filters {
        let Some((key, value)) = filter.split_once('=') else {
            bail!("filters take the form key=value: {}", filter);
        };
        parsed.insert(key.to_string(), Value::String(value.to_string()));
    }
    let engine = QueryEngine::new(IndexStore::new(kv));
    let options = SearchOptions {
        from,
        size,
        filters: parsed,
        highlight: true,
        fuzzy,
        ..Default::default()
    };
    let results = engine.search(query, &options).await?;
    println!("{} match(es)", results.total);
    for hit in results.hits {
        println!(
            "{:.4}  {}:{}  {}",
            hit.score,
            hit.doc_type,
            hit.doc_id,
            hit.highlight.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn optimize(kv: Arc<dyn Kv>) -> Result<()> {
    let store = IndexStore::new(Arc::clone(&kv));
    let locks = LockManager::new(kv);
    let report = Optimizer::new(store, locks).run().await?;
    if report.skipped {
        println!("skipped: optimization already running elsewhere");
        return Ok(());
    }
    println!(
        "removed {} empty postings, rescored {} postings, dropped {} orphans, compacted {} metadata entries",
        report.empty_postings_removed,
        report.postings_rescored,
        report.orphan_members_removed,
        report.metadata_entries_compacted
    );
    Ok(())
}

async fn index_health(kv: Arc<dyn Kv>, fresh: bool) -> Result<()> {
    let analyzer = HealthAnalyzer::new(IndexStore::new(kv));
    let report = if fresh {
        analyzer.analyze_fresh().await?
    } else {
        analyzer.analyze().await?
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn alerts(
    kv: Arc<dyn Kv>,
    limit: usize,
    ack: Option<String>,
    resolve: Option<String>,
) -> Result<()> {
    let store = AlertStore::new(kv);
    if let Some(arg) = ack {
        let Some((id, who)) = arg.split_once(':') else {
            bail!("--ack takes <alert-id>:<who>");
        };
        let id: AlertId = id.parse()?;
        if store.acknowledge(&id, who).await? {
            println!("acknowledged {}", id);
        } else {
            println!("{} is not active", id);
        }
        return Ok(());
    }
    if let Some(id) = resolve {
        let id: AlertId = id.parse()?;
        if store.resolve(&id).await? {
            println!("resolved {}", id);
        } else {
            println!("{} already resolved", id);
        }
        return Ok(());
    }
    let alerts = store.list(limit).await?;
    if alerts.is_empty() {
        println!("no alerts");
        return Ok(());
    }
    for alert in alerts {
        println!(
            "{}  [{}] {}  {}  {}",
            alert.id,
            alert.severity,
            alert.state.as_str(),
            alert.source,
            alert.message
        );
    }
    Ok(())
}

async fn stats(scheduler: &Scheduler) -> Result<()> {
    let stats = scheduler.stats().await?;
    println!("ready      {}", stats.ready);
    println!("scheduled  {}", stats.scheduled);
    println!("processing {}", stats.processing);
    println!("failed     {}", stats.failed);
    Ok(())
}

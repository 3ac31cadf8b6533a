use std::sync::Arc;
use std::time::Duration;

use shared::LevelThresholds;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use devquest_server::broadcast::{BroadcastSettings, Broadcaster};
use devquest_server::cache::{CacheBackend, CacheClient, MemoryCache, RedisCache};
use devquest_server::db::PgStore;
use devquest_server::health::HealthMonitor;
use devquest_server::metrics::PipelineMetrics;
use devquest_server::pipeline::Pipeline;
use devquest_server::queue::ActivityQueue;

#[derive(Debug, serde::Deserialize)]
pub struct Env {
    database_url: String,
    redis_url: Option<String>,
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
    visibility_timeout_secs: Option<u64>,
    broadcast_rate_per_sec: Option<f64>,
    broadcast_burst: Option<f64>,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().pretty());
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let env = envy::from_env::<Env>().expect("Failed to load environment variables");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&env.database_url)
        .await
        .expect("Failed to connect to postgres");
    let store = Arc::new(PgStore::new(pool, LevelThresholds::default()));

    let backend: Arc<dyn CacheBackend> = match &env.redis_url {
        Some(url) => Arc::new(
            RedisCache::connect(url)
                .await
                .expect("Failed to connect to redis"),
        ),
        None => {
            info!("no REDIS_URL set, falling back to in-process cache");
            Arc::new(MemoryCache::default())
        }
    };
    let cache = CacheClient::new(backend);

    let queue = Arc::new(ActivityQueue::new(
        env.queue_capacity.unwrap_or(10_000),
        Duration::from_secs(env.visibility_timeout_secs.unwrap_or(30)),
    ));

    let mut broadcast_settings = BroadcastSettings::default();
    if let Some(rate) = env.broadcast_rate_per_sec {
        broadcast_settings.rate_per_sec = rate;
    }
    if let Some(burst) = env.broadcast_burst {
        broadcast_settings.burst = burst;
    }
    let broadcaster = Arc::new(Broadcaster::new(broadcast_settings));

    let metrics = Arc::new(PipelineMetrics::default());
    let health = Arc::new(HealthMonitor::new(Duration::from_secs(60)));

    let pipeline = Arc::new(Pipeline::new(
        store,
        cache,
        broadcaster,
        queue.clone(),
        metrics.clone(),
    ));
    let worker_count = env.worker_count.unwrap_or(4);
    pipeline.run_workers(worker_count, health);
    info!(worker_count, "activity pipeline started");

    let depth_queue = queue.clone();
    let depth_metrics = metrics.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            depth_metrics.set_queue_depth(depth_queue.depth());
        }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    info!("shutdown signal received, draining workers");
}

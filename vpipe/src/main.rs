use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vpipe_adapters::detector::LocalMotionAnalyzer;
use vpipe_adapters::strategy::build_strategy;
use vpipe_api::http::AppState;
use vpipe_api::Bus;
use vpipe_core::config::Config;
use vpipe_core::logging::init_logging;
use vpipe_core::metrics::Metrics;
use vpipe_core::models::Capability;
use vpipe_engine::AnalysisEngine;
use vpipe_ingest::{DirectoryWatcher, EventSource, ObjectStoreNotifier, WebhookReceiver};
use vpipe_queue::Queue;
use vpipe_registry::ProviderRegistry;
use vpipe_store::{AnalysisRepository, BrandRepository, ProviderRepository, QueueItemRepository, StreamRepository};
use vpipe_worker::{Pool, PoolConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().unwrap_or_default();
    if let Err(errors) = config.validate() {
        for err in &errors {
            eprintln!("config error: {err}");
        }
        anyhow::bail!("configuration validation failed with {} error(s)", errors.len());
    }

    init_logging(&config.logging)?;
    info!(http_address = %config.http_address(), "vpipe starting");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .connect(&config.database.url)
        .await
        .context("connecting to database")?;

    sqlx::migrate!("../vpipe-store/migrations")
        .run(&db_pool)
        .await
        .context("running database migrations")?;
    info!("database migrations applied");

    let metrics = Arc::new(Metrics::new());

    let redis_client = redis::Client::open(config.redis.url.clone()).context("opening redis client")?;
    let queue = Arc::new(
        Queue::connect(
            &config.redis.url,
            &config.queue.stream_key,
            &config.redis.consumer_group,
            Arc::clone(&metrics),
        )
        .await
        .context("connecting to segment event queue")?,
    );

    let streams_repo = StreamRepository::new(db_pool.clone());
    let providers_repo = ProviderRepository::new(db_pool.clone());
    let brands_repo = BrandRepository::new(db_pool.clone());
    let analysis_repo = AnalysisRepository::new(db_pool.clone());
    let queue_items_repo = QueueItemRepository::new(db_pool.clone());

    let hosted_vision_base_url = std::env::var("VPIPE_HOSTED_VISION_BASE_URL").unwrap_or_default();
    let hosted_vision_api_key = std::env::var("VPIPE_HOSTED_VISION_API_KEY").unwrap_or_default();
    let local_object_endpoint = std::env::var("VPIPE_LOCAL_OBJECT_ENDPOINT").unwrap_or_default();

    let registry = Arc::new(ProviderRegistry::new(
        providers_repo,
        brands_repo,
        Some(redis_client.clone()),
        config.registry.cache_ttl_seconds,
        hosted_vision_base_url,
        hosted_vision_api_key,
        local_object_endpoint,
    ));
    if let Err(e) = registry.reload().await {
        warn!(error = %e, "initial provider registry reload failed, starting with an empty snapshot");
    }

    let strategy = build_strategy(
        &config.engine.processing_mode,
        config.engine.worker_host.clone(),
        Duration::from_secs(config.engine.worker_timeout_seconds),
    )
    .context("building execution strategy")?;
    let engine = Arc::new(AnalysisEngine::new(Arc::clone(&registry), strategy));
    engine.register_video_adapter(Capability::MotionAnalysis, Arc::new(LocalMotionAnalyzer::new()));

    let bus = Arc::new(Bus::new(analysis_repo.clone(), Arc::clone(&metrics)));

    let cancel = CancellationToken::new();

    let pool_config = PoolConfig {
        concurrency: config.worker.concurrency,
        lease_timeout: Duration::from_millis(config.queue.lease_timeout_ms),
        confidence_threshold: config.engine.default_confidence_threshold,
        ..PoolConfig::default()
    };
    let pool = Arc::new(Pool::new(
        Arc::clone(&queue),
        Arc::clone(&engine),
        analysis_repo,
        queue_items_repo,
        Arc::clone(&bus) as Arc<dyn vpipe_core::broadcast::AnalysisBroadcaster>,
        pool_config,
        Arc::clone(&metrics),
    ));
    let pool_handle = {
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run("vpipe-worker", cancel).await })
    };
    let sweep_handle = {
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        let min_idle = Duration::from_millis(config.queue.lease_timeout_ms);
        let interval = Duration::from_millis(config.queue.claim_sweep_interval_ms);
        tokio::spawn(async move { pool.run_sweep("vpipe-worker-sweep", min_idle, interval, cancel).await })
    };

    let (event_source, webhook): (Arc<dyn EventSource>, Option<Arc<WebhookReceiver>>) =
        match config.ingest.source.as_str() {
            "object_store" => (Arc::new(ObjectStoreNotifier::new(config.ingest.watch_dir.clone(), Arc::clone(&queue))), None),
            "webhook" => {
                let secret = std::env::var("VPIPE_WEBHOOK_SECRET").unwrap_or_default();
                let receiver = Arc::new(WebhookReceiver::new(secret.into_bytes(), Arc::clone(&queue)));
                (Arc::clone(&receiver) as Arc<dyn EventSource>, Some(receiver))
            }
            _ => (
                Arc::new(DirectoryWatcher::new(
                    config.ingest.watch_dir.clone(),
                    Duration::from_millis(config.ingest.poll_interval_ms),
                    Arc::clone(&queue),
                    streams_repo,
                )),
                None,
            ),
        };
    let ingest_handle = {
        let event_source = Arc::clone(&event_source);
        tokio::spawn(async move {
            if let Err(e) = event_source.start().await {
                error!(error = %e, "event source stopped with an error");
            }
        })
    };

    let app_state = AppState {
        bus: Arc::clone(&bus),
        registry: Arc::clone(&registry),
        db_pool: db_pool.clone(),
        redis_client,
        metrics,
        webhook,
    };
    let router = vpipe_api::http::router(app_state);
    let listener = tokio::net::TcpListener::bind(config.http_address())
        .await
        .context("binding http listener")?;
    info!(address = %config.http_address(), "http server listening");

    let server_cancel = cancel.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        server_cancel.cancelled().await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "http server exited with an error");
            }
        }
        () = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    cancel.cancel();
    event_source.stop().await;
    if let Err(e) = pool_handle.await {
        error!(error = %e, "worker pool task panicked");
    }
    if let Err(e) = sweep_handle.await {
        error!(error = %e, "reclaim sweep task panicked");
    }
    ingest_handle.abort();

    info!("vpipe shut down");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

//! Analytics Runtime - appointment windowed aggregation
//!
//! Orchestrates the pipeline:
//! - Opens the SQLite topic log and joins the consumer group
//! - Spawns the result publisher and the ingestion loop
//! - Turns SIGINT/SIGTERM into a graceful stop (second signal aborts)
//!
//! Usage:
//!   cargo run --release --bin analytics_runtime
//!
//! See `PipelineConfig::from_env` for the environment variables.

use appointment_analytics::pipeline::{
    start_pipeline_ingestion, start_result_publisher, EchoingSink, PipelineConfig,
    PipelineStats, ResultEmitter, ResultSink, SealScheduler, ShutdownMode, TopicSink,
    WindowEngine,
};
use appointment_analytics::transport::SqliteEventLog;
use dotenv::dotenv;
use env_logger::{Env, Target};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .init();

    info!("🚀 Appointment Analytics Runtime");

    let config = PipelineConfig::from_env().map_err(|e| {
        error!("❌ {}", e);
        e
    })?;

    info!("   ├─ Event log: {}", config.log_path);
    info!("   ├─ Input topic: {} (group: {})", config.input_topic, config.consumer_group);
    info!("   ├─ Output topic: {}", config.output_topic);
    info!("   ├─ Start from: {}", config.start_from.as_str());
    info!("   ├─ Window: {}s tumbling (processing time)", config.window_size_secs);
    info!(
        "   └─ Empty windows: {}",
        if config.emit_empty_windows { "emit" } else { "skip" }
    );

    let event_log = SqliteEventLog::open(&config.log_path).map_err(|e| {
        error!("❌ Failed to open event log {}: {}", config.log_path, e);
        e
    })?;
    let consumer = event_log.consumer(&config.consumer_group, &config.input_topic, config.start_from)?;

    let stats = Arc::new(PipelineStats::new());

    let topic_sink = TopicSink::new(Arc::new(event_log.clone()), config.output_topic.clone());
    let sink: Arc<dyn ResultSink> = if config.echo_results {
        Arc::new(EchoingSink::new(Box::new(topic_sink)))
    } else {
        Arc::new(topic_sink)
    };

    let (result_tx, result_rx) = mpsc::channel(config.result_buffer);
    let mut publisher = tokio::spawn(start_result_publisher(
        result_rx,
        sink,
        config.publish_backoff(),
        stats.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMode::Running);
    let mut control_rx = shutdown_tx.subscribe();
    tokio::spawn(forward_signals(shutdown_tx));

    let engine = WindowEngine::new(config.engine_settings()?);
    let scheduler = SealScheduler::new(
        engine,
        ResultEmitter::new(result_tx, stats.clone()).with_backlog_limit(config.result_backlog_limit),
        stats.clone(),
    );
    let ingestion = tokio::spawn(start_pipeline_ingestion(
        Box::new(consumer),
        scheduler,
        config.ingestion_settings(),
        stats.clone(),
        shutdown_rx,
    ));

    info!("✅ Pipeline running");
    info!("🔄 Press CTRL+C to shutdown gracefully (twice to abort)");

    let emitter = match ingestion.await? {
        Ok(emitter) => emitter,
        Err(e) => {
            error!("❌ Ingestion failed: {}", e);
            publisher.abort();
            return Err(e.into());
        }
    };

    if *control_rx.borrow_and_update() == ShutdownMode::Abort {
        drop(emitter);
        publisher.abort();
        warn!("⚠️  Aborted, pending results discarded");
        info!("📊 {}", stats.snapshot());
        return Ok(());
    }

    let grace = config.shutdown_grace();
    let deadline = tokio::time::Instant::now() + grace;
    info!("🔄 Draining results (grace: {}s)...", grace.as_secs());

    let drain = async {
        let unqueued = emitter.close(grace).await;
        if unqueued > 0 {
            warn!("⚠️  {} results could not be queued before the grace period ended", unqueued);
        }
        match tokio::time::timeout_at(deadline, &mut publisher).await {
            Ok(_) => info!("✅ Publisher drained"),
            Err(_) => warn!("⚠️  Grace period elapsed before the publisher drained"),
        }
    };

    tokio::select! {
        _ = drain => {}
        _ = wait_for_abort(&mut control_rx) => {
            warn!("⚠️  Second signal received, abandoning drain");
        }
    }
    publisher.abort();

    info!("📊 {}", stats.snapshot());
    info!("✅ Analytics runtime stopped");
    Ok(())
}

/// First signal requests a graceful stop, the second an abort
async fn forward_signals(shutdown_tx: watch::Sender<ShutdownMode>) {
    wait_for_signal().await;
    info!("⚠️  Received shutdown signal, sealing open windows...");
    let _ = shutdown_tx.send(ShutdownMode::Graceful);

    wait_for_signal().await;
    warn!("⚠️  Received second shutdown signal, aborting");
    let _ = shutdown_tx.send(ShutdownMode::Abort);

    // Hold the sender so the runtime never sees a closed channel
    std::future::pending::<()>().await;
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("❌ Failed to listen for CTRL+C: {}", e);
                            std::future::pending::<()>().await;
                        }
                    }
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("⚠️  SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn wait_for_abort(rx: &mut watch::Receiver<ShutdownMode>) {
    loop {
        if *rx.borrow_and_update() == ShutdownMode::Abort {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

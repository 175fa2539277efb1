//! Pipeline ingestion - unified consume / tick / shutdown loop
//!
//! One task owns the `SealScheduler` (and through it the window engine), so
//! routing and sealing never race and no lock is needed. Publication happens
//! on the publisher task, fed through the scheduler's non-blocking emitter.

use super::backoff::{BackoffSettings, ExponentialBackoff};
use super::scheduler::{ResultEmitter, SealScheduler, ShutdownMode};
use super::stats::PipelineStats;
use crate::transport::{LogConsumer, TransportError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, sleep, Duration, Instant, MissedTickBehavior};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct IngestionSettings {
    pub tick_interval_ms: u64,
    pub poll_batch: usize,
    pub poll_idle_ms: u64,
    /// Retry budget for failed polls
    pub poll_backoff: BackoffSettings,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            poll_batch: 500,
            poll_idle_ms: 100,
            poll_backoff: BackoffSettings::default(),
        }
    }
}

/// Start pipeline ingestion from the input topic
///
/// Main loop, in priority order:
/// 1. Shutdown signal: stop and apply the shutdown policy
/// 2. Tick: seal windows whose end has passed, retry the publish backlog
/// 3. Stats timer: log counters every 10 seconds
/// 4. Poll: consume a batch, route every record, commit the position
///
/// A failed poll is retried with backoff without stalling ticks. Once the
/// retry budget is spent the loop returns the transport error.
///
/// On shutdown the scheduler is finished with the requested mode and its
/// emitter is returned so the caller can drain pending results. Dropping
/// the shutdown sender counts as a graceful stop.
pub async fn start_pipeline_ingestion(
    mut consumer: Box<dyn LogConsumer>,
    mut scheduler: SealScheduler,
    settings: IngestionSettings,
    stats: Arc<PipelineStats>,
    mut shutdown: watch::Receiver<ShutdownMode>,
) -> Result<ResultEmitter, TransportError> {
    log::info!("🚀 Starting pipeline ingestion");
    log::info!("   ├─ Tick interval: {}ms", settings.tick_interval_ms);
    log::info!("   ├─ Poll batch: {}", settings.poll_batch);
    log::info!("   └─ Reading from seq {}", consumer.position());

    let mut tick = interval(Duration::from_millis(settings.tick_interval_ms));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats_timer = interval_at(Instant::now() + STATS_LOG_INTERVAL, STATS_LOG_INTERVAL);
    let idle = Duration::from_millis(settings.poll_idle_ms);
    let mut poll_backoff = ExponentialBackoff::new(settings.poll_backoff);

    let poll_timer = sleep(Duration::ZERO);
    tokio::pin!(poll_timer);

    let mut mode = *shutdown.borrow_and_update();

    while mode == ShutdownMode::Running {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                mode = match changed {
                    Ok(()) => *shutdown.borrow_and_update(),
                    Err(_) => {
                        log::warn!("⚠️  Shutdown handle dropped, stopping gracefully");
                        ShutdownMode::Graceful
                    }
                };
            }

            _ = tick.tick() => {
                scheduler.on_tick();
            }

            _ = stats_timer.tick() => {
                log::info!(
                    "📊 {} | open windows: {} | backlog: {}",
                    stats.snapshot(),
                    scheduler.open_window_count(),
                    scheduler.pending_emissions()
                );
            }

            _ = &mut poll_timer => {
                let next_poll = match consumer.poll(settings.poll_batch).await {
                    Ok(records) if records.is_empty() => {
                        poll_backoff.reset();
                        idle
                    }
                    Ok(records) => {
                        poll_backoff.reset();
                        for record in &records {
                            scheduler.on_payload(&record.payload);
                        }
                        if let Err(e) = consumer.commit().await {
                            log::warn!(
                                "⚠️  Failed to commit position {}: {}",
                                consumer.position(),
                                e
                            );
                        }
                        Duration::ZERO
                    }
                    Err(e) => {
                        log::warn!("⚠️  Poll failed at seq {}: {}", consumer.position(), e);
                        match poll_backoff.next_retry() {
                            Ok(delay) => delay,
                            Err(_) => {
                                log::error!(
                                    "❌ Input unavailable after {} retries, stopping ingestion",
                                    poll_backoff.attempts()
                                );
                                return Err(e);
                            }
                        }
                    }
                };
                poll_timer.as_mut().reset(Instant::now() + next_poll);
            }
        }
    }

    log::info!("🔄 Shutdown requested ({:?})", mode);
    log::info!("📊 {}", stats.snapshot());

    let emitter = scheduler.finish(mode);
    log::info!("✅ Pipeline ingestion stopped");
    Ok(emitter)
}

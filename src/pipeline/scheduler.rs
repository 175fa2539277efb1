//! Aggregation scheduler - window lifecycle and result hand-off
//!
//! Drives `OPEN -> SEALED -> (emitted, discarded)` for every window:
//! - seals on each incoming event and on each periodic tick
//! - finalizes sealed windows and hands them to the publisher
//! - applies the shutdown policy to whatever is still open
//!
//! Hand-off never blocks: when the publish queue is full, results wait in an
//! ordered backlog that is retried on the next tick.

use super::decoder::{decode, is_subscribed};
use super::engine::WindowEngine;
use super::sink::Emission;
use super::stats::PipelineStats;
use super::windows::{Route, SealedWindow};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

/// How the pipeline is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Running,
    /// Forced seal of open windows, then drain the publish queue
    Graceful,
    /// Drop in-flight window state immediately
    Abort,
}

/// Default cap on results waiting for room in the publish queue
pub const DEFAULT_BACKLOG_LIMIT: usize = 1_024;

/// Non-blocking, order-preserving hand-off to the publisher task
///
/// Results that do not fit in the channel wait in a backlog of at most
/// `backlog_limit` entries; past that the oldest are dropped and counted.
pub struct ResultEmitter {
    tx: mpsc::Sender<Emission>,
    backlog: VecDeque<Emission>,
    backlog_limit: usize,
    stats: Arc<PipelineStats>,
}

impl ResultEmitter {
    pub fn new(tx: mpsc::Sender<Emission>, stats: Arc<PipelineStats>) -> Self {
        Self {
            tx,
            backlog: VecDeque::new(),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
            stats,
        }
    }

    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit.max(1);
        self
    }

    pub fn emit(&mut self, emissions: impl IntoIterator<Item = Emission>) {
        self.backlog.extend(emissions);
        self.drain();
        self.enforce_limit();
    }

    fn enforce_limit(&mut self) {
        let overflow = self.backlog.len().saturating_sub(self.backlog_limit);
        if overflow == 0 {
            return;
        }

        let first_end = self.backlog.front().map(|e| e.result.window_end_time);
        self.backlog.drain(..overflow);
        self.stats.record_results_dropped(overflow as u64);
        log::error!(
            "❌ Result backlog over {} entries, dropped {} oldest results (first window ending {:?})",
            self.backlog_limit,
            overflow,
            first_end
        );
    }

    /// Move as much of the backlog into the channel as it will take
    pub fn drain(&mut self) {
        while let Some(emission) = self.backlog.pop_front() {
            match self.tx.try_send(emission) {
                Ok(()) => {}
                Err(TrySendError::Full(emission)) => {
                    self.backlog.push_front(emission);
                    break;
                }
                Err(TrySendError::Closed(emission)) => {
                    let lost = self.backlog.len() + 1;
                    self.stats.record_results_dropped(lost as u64);
                    log::error!(
                        "❌ Publisher gone, dropping {} pending results (first window ending {})",
                        lost,
                        emission.result.window_end_time
                    );
                    self.backlog.clear();
                    break;
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Hand over the remaining backlog, waiting for queue space up to `grace`
    ///
    /// Returns the number of results that could not be handed over; those
    /// are counted as dropped.
    pub async fn close(mut self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;

        while let Some(emission) = self.backlog.pop_front() {
            match tokio::time::timeout_at(deadline, self.tx.send(emission)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    let lost = self.backlog.len() + 1;
                    self.stats.record_results_dropped(lost as u64);
                    return lost;
                }
            }
        }
        0
    }
}

/// Single owner of the window engine and its emission path
pub struct SealScheduler {
    engine: WindowEngine,
    emitter: ResultEmitter,
    stats: Arc<PipelineStats>,
}

impl SealScheduler {
    pub fn new(engine: WindowEngine, emitter: ResultEmitter, stats: Arc<PipelineStats>) -> Self {
        Self {
            engine,
            emitter,
            stats,
        }
    }

    /// Decode, filter and route one raw input message at the engine's current time
    pub fn on_payload(&mut self, payload: &[u8]) {
        let now = self.engine.now();
        self.on_payload_at(payload, now);
    }

    pub fn on_payload_at(&mut self, payload: &[u8], now_ms: i64) {
        self.stats.record_received(1);

        let event = match decode(payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_decode_errors(1);
                log::warn!("⚠️  Dropping undecodable message: {}", e);
                return;
            }
        };

        if !is_subscribed(&event) {
            self.stats.record_ignored(1);
            log::trace!("Ignoring event kind '{}'", event.kind);
            return;
        }

        let outcome = self.engine.ingest(&event, now_ms);
        self.dispatch(outcome.sealed);

        match outcome.route {
            Route::Accepted { .. } => self.stats.record_accepted(1),
            Route::Late { index } => {
                self.stats.record_late_events(1);
                log::debug!(
                    "Dropping late event for closed window {} (appointment {:?})",
                    index,
                    event.appointment_id
                );
            }
        }
    }

    /// Periodic seal check at the engine's current time
    pub fn on_tick(&mut self) {
        let now = self.engine.now();
        self.on_tick_at(now);
    }

    pub fn on_tick_at(&mut self, now_ms: i64) {
        let sealed = self.engine.advance(now_ms);
        self.dispatch(sealed);
        self.emitter.drain();
    }

    fn dispatch(&mut self, sealed: Vec<SealedWindow>) {
        if sealed.is_empty() {
            return;
        }

        self.stats.record_windows_sealed(sealed.len() as u64);
        let emissions = sealed.into_iter().map(|window| {
            log::info!(
                "🔒 Sealed window [{}, {}) with {} events",
                window.window.start_ms,
                window.window.end_ms,
                window.accumulator.total_count
            );
            Emission {
                key: window.key,
                result: window.into_result(),
            }
        });
        self.emitter.emit(emissions);

        if self.emitter.pending() > 0 {
            log::warn!(
                "⚠️  Publish queue full, {} results waiting in backlog",
                self.emitter.pending()
            );
        }
    }

    pub fn open_window_count(&self) -> usize {
        self.engine.open_window_count()
    }

    pub fn pending_emissions(&self) -> usize {
        self.emitter.pending()
    }

    /// Apply the shutdown policy and give back the emitter for final draining
    pub fn finish(mut self, mode: ShutdownMode) -> ResultEmitter {
        match mode {
            ShutdownMode::Graceful => {
                let sealed = self.engine.seal_all();
                log::info!("🔄 Forced seal of {} open windows", sealed.len());
                self.dispatch(sealed);
            }
            ShutdownMode::Abort | ShutdownMode::Running => {
                let dropped = self.engine.discard_open();
                self.stats.record_windows_discarded(dropped as u64);
                if dropped > 0 {
                    log::warn!("⚠️  Discarded {} in-flight windows", dropped);
                }
            }
        }
        self.emitter
    }
}

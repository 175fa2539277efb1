//! Window engine - owner of all live window state
//!
//! ```text
//! AppointmentEvent
//!     ↓
//! WindowEngine::ingest()  ── seals due windows first, then routes
//!     ↓
//! PartitionWindows (index → Accumulator, per partition key)
//!     ↓
//! WindowEngine::advance() / seal_all()
//!     ↓
//! Vec<SealedWindow>  (increasing start order)
//! ```
//!
//! The engine is not thread-safe on purpose: a single task owns it and
//! serializes event routing and sealing.

use super::types::{AppointmentEvent, PartitionKey, GLOBAL_PARTITION};
use super::windows::{PartitionWindows, Route, SealedWindow, WindowAssigner};
use std::collections::HashMap;

/// Processing-time source returning epoch milliseconds
pub type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock in epoch milliseconds
pub fn system_clock() -> Clock {
    Box::new(|| chrono::Utc::now().timestamp_millis())
}

/// Every event is grouped under one constant key
pub fn partition_key(_event: &AppointmentEvent) -> PartitionKey {
    GLOBAL_PARTITION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub window_size_ms: i64,
    /// Emit zero-valued results for windows that saw no events
    pub emit_empty_windows: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            window_size_ms: 60_000,
            emit_empty_windows: false,
        }
    }
}

/// Result of handing one event to the engine
#[derive(Debug)]
pub struct IngestOutcome {
    /// Windows sealed because the event's arrival crossed their boundary
    pub sealed: Vec<SealedWindow>,
    pub route: Route,
}

pub struct WindowEngine {
    assigner: WindowAssigner,
    partitions: HashMap<PartitionKey, PartitionWindows>,
    emit_empty_windows: bool,
    now_fn: Clock,
}

impl WindowEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::new_with_timestamp_fn(settings, system_clock())
    }

    /// Create an engine with a custom clock (deterministic tests)
    pub fn new_with_timestamp_fn(settings: EngineSettings, now_fn: Clock) -> Self {
        let mut partitions = HashMap::new();
        if settings.emit_empty_windows {
            // Ticks must open windows before the first event arrives
            partitions.insert(GLOBAL_PARTITION, PartitionWindows::new());
        }

        Self {
            assigner: WindowAssigner::new(settings.window_size_ms),
            partitions,
            emit_empty_windows: settings.emit_empty_windows,
            now_fn,
        }
    }

    /// Current processing time according to the engine clock
    pub fn now(&self) -> i64 {
        (self.now_fn)()
    }

    pub fn assigner(&self) -> &WindowAssigner {
        &self.assigner
    }

    /// Route an accepted event received at `now_ms`
    ///
    /// Any window whose boundary `now_ms` has crossed is sealed before routing,
    /// so an event can never land in a window that should already be closed.
    pub fn ingest(&mut self, event: &AppointmentEvent, now_ms: i64) -> IngestOutcome {
        let sealed = self.seal_due(now_ms);

        let route = self
            .partitions
            .entry(partition_key(event))
            .or_default()
            .route(&self.assigner, now_ms, event);

        IngestOutcome { sealed, route }
    }

    /// Periodic tick: seal due windows and, with the empty-window policy,
    /// open the window covering `now_ms`
    pub fn advance(&mut self, now_ms: i64) -> Vec<SealedWindow> {
        let sealed = self.seal_due(now_ms);

        if self.emit_empty_windows {
            for partition in self.partitions.values_mut() {
                partition.open_current(&self.assigner, now_ms);
            }
        }

        sealed
    }

    fn seal_due(&mut self, now_ms: i64) -> Vec<SealedWindow> {
        let fill_gaps = self.emit_empty_windows;
        let mut sealed = Vec::new();

        for (key, partition) in self.partitions.iter_mut() {
            for (window, accumulator) in partition.seal_due(&self.assigner, now_ms, fill_gaps) {
                sealed.push(SealedWindow {
                    key: *key,
                    window,
                    accumulator,
                });
            }
        }

        sort_for_emission(&mut sealed);
        sealed
    }

    /// Forced seal of every open window (graceful shutdown)
    pub fn seal_all(&mut self) -> Vec<SealedWindow> {
        let mut sealed = Vec::new();

        for (key, partition) in self.partitions.iter_mut() {
            for (window, accumulator) in partition.seal_all() {
                if accumulator.is_empty() && !self.emit_empty_windows {
                    continue;
                }
                sealed.push(SealedWindow {
                    key: *key,
                    window,
                    accumulator,
                });
            }
        }

        sort_for_emission(&mut sealed);
        sealed
    }

    /// Drop all in-flight window state without emitting it
    pub fn discard_open(&mut self) -> usize {
        self.partitions
            .values_mut()
            .map(PartitionWindows::discard_open)
            .sum()
    }

    pub fn open_window_count(&self) -> usize {
        self.partitions.values().map(PartitionWindows::open_count).sum()
    }

    pub fn partition(&self, key: PartitionKey) -> Option<&PartitionWindows> {
        self.partitions.get(key)
    }
}

fn sort_for_emission(sealed: &mut [SealedWindow]) {
    sealed.sort_by(|a, b| {
        a.window
            .start_ms
            .cmp(&b.window.start_ms)
            .then_with(|| a.key.cmp(b.key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::AggregateResult;
    use crate::pipeline::windows::WindowState;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    const MINUTE: i64 = 60_000;

    fn test_engine(emit_empty: bool) -> WindowEngine {
        WindowEngine::new_with_timestamp_fn(
            EngineSettings {
                window_size_ms: MINUTE,
                emit_empty_windows: emit_empty,
            },
            Box::new(|| 0),
        )
    }

    fn created(patient: i64, doctor: i64) -> AppointmentEvent {
        AppointmentEvent::created(Some(patient), Some(doctor))
    }

    fn results(sealed: Vec<SealedWindow>) -> Vec<AggregateResult> {
        sealed.into_iter().map(SealedWindow::into_result).collect()
    }

    #[test]
    fn test_end_to_end_example() {
        // Test: {patient 1, doctor 10} at 5s and {patient 1, doctor 11} at 50s
        let mut engine = test_engine(false);

        assert!(engine.ingest(&created(1, 10), 5_000).sealed.is_empty());
        assert!(engine.ingest(&created(1, 11), 50_000).sealed.is_empty());

        let emitted = results(engine.advance(60_000));
        assert_eq!(
            emitted,
            vec![AggregateResult {
                total_appointments: 2,
                unique_patients: 1,
                active_doctors: 2,
                window_end_time: 60_000,
            }]
        );
        assert_eq!(engine.open_window_count(), 0);
    }

    #[test]
    fn test_event_arrival_seals_previous_window() {
        let mut engine = test_engine(false);
        engine.ingest(&created(1, 10), 59_999);

        let outcome = engine.ingest(&created(2, 10), 60_001);

        assert_eq!(outcome.route, Route::Accepted { index: 1 });
        assert_eq!(outcome.sealed.len(), 1);
        assert_eq!(outcome.sealed[0].window.state, WindowState::Sealed);
        assert_eq!(outcome.sealed[0].clone().into_result().total_appointments, 1);
        assert_eq!(engine.open_window_count(), 1);
    }

    #[test]
    fn test_doctor_activity_and_patient_dedup() {
        let mut engine = test_engine(false);
        for (patient, doctor) in [(1, 10), (1, 10), (1, 11), (2, 10), (1, 12)] {
            engine.ingest(&created(patient, doctor), 1_000);
        }

        let result = results(engine.advance(MINUTE)).remove(0);
        assert_eq!(result.total_appointments, 5);
        assert_eq!(result.unique_patients, 2);
        assert_eq!(result.active_doctors, 3);
    }

    #[test]
    fn test_each_window_emitted_once_in_order() {
        let mut engine = test_engine(false);
        let mut emitted = Vec::new();

        for (i, at) in [1_000, MINUTE + 1_000, 2 * MINUTE + 1_000].into_iter().enumerate() {
            emitted.extend(engine.ingest(&created(i as i64, 1), at).sealed);
        }
        emitted.extend(engine.advance(10 * MINUTE));
        assert!(engine.advance(11 * MINUTE).is_empty());

        let ends: Vec<i64> = results(emitted).iter().map(|r| r.window_end_time).collect();
        assert_eq!(ends, vec![MINUTE, 2 * MINUTE, 3 * MINUTE]);
    }

    #[test]
    fn test_skip_policy_emits_nothing_for_empty_intervals() {
        let mut engine = test_engine(false);
        engine.ingest(&created(1, 1), 1_000);

        let emitted = results(engine.advance(5 * MINUTE));
        assert_eq!(emitted.len(), 1);
        assert!(engine.advance(6 * MINUTE).is_empty());
        assert_eq!(engine.open_window_count(), 0);
    }

    #[test]
    fn test_emit_policy_reports_every_interval() {
        let mut engine = test_engine(true);

        // Tick opens the window before any event
        assert!(engine.advance(1_000).is_empty());
        assert_eq!(engine.open_window_count(), 1);

        engine.ingest(&created(1, 1), 30_000);

        // Paused until 3m10s: windows 0, 1, 2 seal, window 3 opens
        let emitted = results(engine.advance(3 * MINUTE + 10_000));
        let totals: Vec<u64> = emitted.iter().map(|r| r.total_appointments).collect();
        let ends: Vec<i64> = emitted.iter().map(|r| r.window_end_time).collect();

        assert_eq!(totals, vec![1, 0, 0]);
        assert_eq!(ends, vec![MINUTE, 2 * MINUTE, 3 * MINUTE]);
        assert_eq!(engine.open_window_count(), 1);
    }

    #[test]
    fn test_late_event_dropped_not_folded_forward() {
        let mut engine = test_engine(false);
        engine.ingest(&created(1, 1), 61_000);

        // Wall clock stepped backwards into window 0
        let outcome = engine.ingest(&created(2, 2), 59_000);
        assert_eq!(outcome.route, Route::Late { index: 0 });

        let result = results(engine.advance(2 * MINUTE)).remove(0);
        assert_eq!(result.total_appointments, 1);
        assert_eq!(result.unique_patients, 1);
    }

    #[test]
    fn test_seal_all_emits_partial_window() {
        let mut engine = test_engine(false);
        engine.ingest(&created(1, 1), 10_000);

        let emitted = results(engine.seal_all());
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].window_end_time, MINUTE);
        assert_eq!(engine.open_window_count(), 0);
    }

    #[test]
    fn test_seal_all_skips_empty_under_skip_policy() {
        let mut engine = test_engine(false);
        engine.advance(1_000);
        assert!(engine.seal_all().is_empty());

        let mut engine = test_engine(true);
        engine.advance(1_000);
        assert_eq!(engine.seal_all().len(), 1);
    }

    #[test]
    fn test_discard_open_drops_partial_state() {
        let mut engine = test_engine(false);
        engine.ingest(&created(1, 1), 10_000);

        assert_eq!(engine.discard_open(), 1);
        assert!(engine.advance(2 * MINUTE).is_empty());
    }

    #[test]
    fn test_custom_clock() {
        let now = Arc::new(AtomicI64::new(42));
        let clock_now = now.clone();
        let engine = WindowEngine::new_with_timestamp_fn(
            EngineSettings::default(),
            Box::new(move || clock_now.load(Ordering::SeqCst)),
        );

        assert_eq!(engine.now(), 42);
        now.store(99, Ordering::SeqCst);
        assert_eq!(engine.now(), 99);
        assert_eq!(engine.assigner().size_ms(), 60_000);
    }

    #[test]
    fn test_single_partition_key() {
        let mut engine = test_engine(false);
        engine.ingest(&created(1, 1), 1_000);

        assert!(engine.partition(GLOBAL_PARTITION).is_some());
        assert_eq!(partition_key(&created(5, 5)), "all");
    }
}

//! Tumbling processing-time windows
//!
//! Window `i` covers `[i * size, (i + 1) * size)` in epoch milliseconds.
//! Windows are contiguous and never overlap, so per partition at most one
//! window is open while the clock moves forward.

use super::accumulator::Accumulator;
use super::types::{AggregateResult, AppointmentEvent, PartitionKey};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open,
    Sealed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub index: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub state: WindowState,
}

/// Maps a processing-time instant to the window covering it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAssigner {
    size_ms: i64,
}

impl WindowAssigner {
    /// `size_ms` must be positive; config validation rejects zero sizes
    pub fn new(size_ms: i64) -> Self {
        debug_assert!(size_ms > 0, "window size must be positive");
        Self { size_ms }
    }

    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    pub fn index_for(&self, now_ms: i64) -> i64 {
        now_ms.div_euclid(self.size_ms)
    }

    pub fn window_at(&self, index: i64) -> Window {
        let start_ms = index * self.size_ms;
        Window {
            index,
            start_ms,
            end_ms: start_ms + self.size_ms,
            state: WindowState::Open,
        }
    }

    pub fn assign(&self, now_ms: i64) -> Window {
        self.window_at(self.index_for(now_ms))
    }
}

/// A window taken out of the live set, ready for emission
#[derive(Debug, Clone, PartialEq)]
pub struct SealedWindow {
    pub key: PartitionKey,
    pub window: Window,
    pub accumulator: Accumulator,
}

impl SealedWindow {
    pub fn into_result(self) -> AggregateResult {
        self.accumulator.finalize(self.window.end_ms)
    }
}

/// Outcome of routing one event into a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Accepted { index: i64 },
    /// The event maps to a window index that has already closed
    Late { index: i64 },
}

/// Live window state for a single partition key
///
/// Keeps every open window keyed by index plus the lowest index still
/// accepting events. Anything below `closed_before` is gone for good.
#[derive(Debug, Default)]
pub struct PartitionWindows {
    open: BTreeMap<i64, (Window, Accumulator)>,
    closed_before: Option<i64>,
    first_index: Option<i64>,
}

impl PartitionWindows {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_closed(&self, index: i64) -> bool {
        self.closed_before.map_or(false, |closed| index < closed)
    }

    fn window_entry(&mut self, assigner: &WindowAssigner, index: i64) -> &mut Accumulator {
        self.first_index = Some(self.first_index.map_or(index, |first| first.min(index)));
        &mut self
            .open
            .entry(index)
            .or_insert_with(|| (assigner.window_at(index), Accumulator::create()))
            .1
    }

    /// Route an event received at `now_ms` to the window covering it
    pub fn route(
        &mut self,
        assigner: &WindowAssigner,
        now_ms: i64,
        event: &AppointmentEvent,
    ) -> Route {
        let index = assigner.index_for(now_ms);
        // The first window a partition sees closes everything before it
        self.closed_before.get_or_insert(index);
        if self.is_closed(index) {
            return Route::Late { index };
        }

        self.window_entry(assigner, index).add(event);
        Route::Accepted { index }
    }

    /// Make sure the window covering `now_ms` exists, even without events
    pub fn open_current(&mut self, assigner: &WindowAssigner, now_ms: i64) {
        let index = assigner.index_for(now_ms);
        self.closed_before.get_or_insert(index);
        if !self.is_closed(index) {
            self.window_entry(assigner, index);
        }
    }

    /// Seal every window whose end boundary is at or before `now_ms`
    ///
    /// Window `i` ends at or before `now_ms` exactly when `i` is below the
    /// index covering `now_ms`, so everything keyed below that index is due.
    ///
    /// Returned windows are in increasing start order. With `fill_gaps`, indices
    /// skipped during a scheduling gap (after the first window this partition
    /// ever opened) are sealed as empty windows so each elapsed interval is
    /// reported.
    pub fn seal_due(
        &mut self,
        assigner: &WindowAssigner,
        now_ms: i64,
        fill_gaps: bool,
    ) -> Vec<(Window, Accumulator)> {
        let boundary = assigner.index_for(now_ms);

        if fill_gaps {
            if let Some(first) = self.first_index {
                let from = self.closed_before.map_or(first, |closed| closed.max(first));
                for index in from..boundary {
                    self.window_entry(assigner, index);
                }
            }
        }

        let still_open = self.open.split_off(&boundary);
        let due = std::mem::replace(&mut self.open, still_open);

        self.closed_before = Some(self.closed_before.map_or(boundary, |closed| closed.max(boundary)));

        due.into_values()
            .map(|(mut window, acc)| {
                window.state = WindowState::Sealed;
                (window, acc)
            })
            .collect()
    }

    /// Seal every open window regardless of its boundary
    pub fn seal_all(&mut self) -> Vec<(Window, Accumulator)> {
        if let Some((&last, _)) = self.open.iter().next_back() {
            self.closed_before = Some(self.closed_before.map_or(last + 1, |closed| closed.max(last + 1)));
        }

        std::mem::take(&mut self.open)
            .into_values()
            .map(|(mut window, acc)| {
                window.state = WindowState::Sealed;
                (window, acc)
            })
            .collect()
    }

    /// Drop every open window without emitting; returns how many were dropped
    pub fn discard_open(&mut self) -> usize {
        let dropped = self.open.len();
        self.open.clear();
        dropped
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

//! Per-window aggregation state
//!
//! `add` is order-independent within a window and `merge` is commutative and
//! associative, so shards can accumulate independently and be combined in any
//! grouping at seal time.

use super::types::{AggregateResult, AppointmentEvent};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    pub total_count: u64,
    pub unique_patient_ids: HashSet<i64>,
    pub per_doctor_counts: HashMap<i64, u64>,
}

impl Accumulator {
    /// Zero-valued accumulator for a freshly opened window
    pub fn create() -> Self {
        Self::default()
    }

    /// Fold one accepted event into the window state
    ///
    /// Every event counts towards the total, repeats of the same appointment
    /// included.
    pub fn add(&mut self, event: &AppointmentEvent) {
        self.total_count += 1;

        if let Some(patient_id) = event.patient_id {
            self.unique_patient_ids.insert(patient_id);
        }
        if let Some(doctor_id) = event.doctor_id {
            *self.per_doctor_counts.entry(doctor_id).or_insert(0) += 1;
        }
    }

    /// Combine two partial accumulators of the same window
    pub fn merge(mut self, other: Accumulator) -> Accumulator {
        self.total_count += other.total_count;
        self.unique_patient_ids.extend(other.unique_patient_ids);
        for (doctor_id, count) in other.per_doctor_counts {
            *self.per_doctor_counts.entry(doctor_id).or_insert(0) += count;
        }
        self
    }

    /// Fold any number of shard accumulators into one
    pub fn merge_all(parts: impl IntoIterator<Item = Accumulator>) -> Accumulator {
        parts.into_iter().fold(Accumulator::create(), Accumulator::merge)
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    pub fn finalize(&self, window_end_ms: i64) -> AggregateResult {
        AggregateResult {
            total_appointments: self.total_count,
            unique_patients: self.unique_patient_ids.len() as u64,
            active_doctors: self.per_doctor_counts.len() as u64,
            window_end_time: window_end_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(patient: Option<i64>, doctor: Option<i64>) -> AppointmentEvent {
        AppointmentEvent::created(patient, doctor)
    }

    fn fold(events: &[AppointmentEvent]) -> Accumulator {
        let mut acc = Accumulator::create();
        for e in events {
            acc.add(e);
        }
        acc
    }

    fn sample_events() -> Vec<AppointmentEvent> {
        vec![
            event(Some(1), Some(10)),
            event(Some(2), Some(10)),
            event(Some(1), Some(11)),
            event(None, Some(12)),
            event(Some(3), None),
            event(None, None),
            event(Some(2), Some(11)),
        ]
    }

    #[test]
    fn test_create_is_zero_valued() {
        let acc = Accumulator::create();
        assert!(acc.is_empty());
        assert_eq!(
            acc.finalize(60_000),
            AggregateResult {
                total_appointments: 0,
                unique_patients: 0,
                active_doctors: 0,
                window_end_time: 60_000,
            }
        );
    }

    #[test]
    fn test_conservation_counts_duplicates() {
        // Test: Every accepted event counts, even identical repeats
        let repeated = vec![event(Some(1), Some(10)); 5];
        let acc = fold(&repeated);

        assert_eq!(acc.total_count, 5);
        assert_eq!(acc.finalize(0).unique_patients, 1);
        assert_eq!(acc.finalize(0).active_doctors, 1);
        assert_eq!(acc.per_doctor_counts[&10], 5);
    }

    #[test]
    fn test_absent_ids_only_skip_keyed_aggregates() {
        let acc = fold(&[event(None, None), event(None, Some(4)), event(Some(8), None)]);
        let result = acc.finalize(0);

        assert_eq!(result.total_appointments, 3);
        assert_eq!(result.unique_patients, 1);
        assert_eq!(result.active_doctors, 1);
    }

    #[test]
    fn test_add_is_order_independent() {
        let events = sample_events();
        let mut reversed = events.clone();
        reversed.reverse();

        assert_eq!(fold(&events), fold(&reversed));
    }

    #[test]
    fn test_merge_matches_single_fold_for_every_split() {
        // Test: merge(fold(g1), fold(g2)) == fold(g1 ∪ g2) for all contiguous splits
        let events = sample_events();
        let whole = fold(&events);

        for split in 0..=events.len() {
            let (left, right) = events.split_at(split);
            assert_eq!(fold(left).merge(fold(right)), whole, "split at {}", split);
            assert_eq!(fold(right).merge(fold(left)), whole, "reversed split at {}", split);
        }
    }

    #[test]
    fn test_merge_is_associative() {
        let events = sample_events();
        let a = fold(&events[..2]);
        let b = fold(&events[2..5]);
        let c = fold(&events[5..]);

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));

        assert_eq!(left, right);
        assert_eq!(left, fold(&events));
    }

    #[test]
    fn test_merge_interleaved_partition() {
        // Test: Non-contiguous partitions (odd/even positions) merge to the same state
        let events = sample_events();
        let odd: Vec<_> = events.iter().skip(1).step_by(2).cloned().collect();
        let even: Vec<_> = events.iter().step_by(2).cloned().collect();

        assert_eq!(fold(&odd).merge(fold(&even)), fold(&events));
    }

    #[test]
    fn test_merge_all_shards() {
        let events = sample_events();
        let shards: Vec<Accumulator> = events.chunks(3).map(fold).collect();

        assert_eq!(Accumulator::merge_all(shards), fold(&events));
        assert_eq!(Accumulator::merge_all(Vec::new()), Accumulator::create());
    }

    #[test]
    fn test_end_to_end_example_state() {
        let acc = fold(&[event(Some(1), Some(10)), event(Some(1), Some(11))]);
        assert_eq!(
            acc.finalize(60_000),
            AggregateResult {
                total_appointments: 2,
                unique_patients: 1,
                active_doctors: 2,
                window_end_time: 60_000,
            }
        );
    }
}

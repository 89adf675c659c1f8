//! Merges independent per-anchor readings into complete measurement sets

use crate::api::types::{ApiError, ApiResult};
use crate::core::constants::DEFAULT_STALENESS_THRESHOLD_MS;
use crate::core::topology::AnchorTopology;
use crate::core::types::{AnchorId, Measurement, MeasurementSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of a single `ingest`
#[derive(Debug, Clone, PartialEq)]
pub enum IngestStatus {
    /// The reading was buffered; the window is still incomplete
    Buffered { collected: usize, required: usize },
    /// The reading completed the window, which was captured and cleared
    Emitted(MeasurementSet),
}

/// Counters describing aggregation activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub readings_accepted: u64,
    pub readings_rejected: u64,
    pub windows_emitted: u64,
    /// Windows dropped unsolved because they aged out
    pub windows_discarded: u64,
}

/// In-flight readings since the window opened
#[derive(Debug, Default)]
struct AggregationWindow {
    entries: HashMap<AnchorId, Measurement>,
    next_sequence: u64,
    stats: AggregatorStats,
}

impl AggregationWindow {
    fn oldest_timestamp(&self) -> Option<i64> {
        self.entries.values().map(|m| m.timestamp_ms).min()
    }
}

/// Stateful, thread-safe window over the anchor topology.
///
/// Every `ingest` is one critical section: check staleness, insert,
/// check completeness, capture and clear. Two racing readings can never both
/// observe a complete window.
#[derive(Debug)]
pub struct MeasurementAggregator {
    topology: Arc<AnchorTopology>,
    staleness_threshold_ms: i64,
    window: Mutex<AggregationWindow>,
}

impl MeasurementAggregator {
    pub fn new(topology: Arc<AnchorTopology>) -> Self {
        Self::with_threshold(topology, DEFAULT_STALENESS_THRESHOLD_MS)
    }

    pub fn with_threshold(topology: Arc<AnchorTopology>, staleness_threshold_ms: i64) -> Self {
        Self {
            topology,
            staleness_threshold_ms,
            window: Mutex::new(AggregationWindow {
                next_sequence: 1,
                ..AggregationWindow::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregationWindow> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn topology(&self) -> &Arc<AnchorTopology> {
        &self.topology
    }

    pub fn staleness_threshold_ms(&self) -> i64 {
        self.staleness_threshold_ms
    }

    /// Ingest one reading, returning the completed set if this reading closed the window
    pub fn ingest(&self, measurement: Measurement) -> ApiResult<IngestStatus> {
        self.ingest_with(measurement, |_| {})
    }

    /// Like [`ingest`](Self::ingest), but hands a completed set to `emit`
    /// before the window lock is released, so emission order matches
    /// sequence order even when several producers complete windows back to back.
    /// `emit` must not block.
    pub fn ingest_with<F>(&self, measurement: Measurement, emit: F) -> ApiResult<IngestStatus>
    where
        F: FnOnce(MeasurementSet),
    {
        let mut window = self.lock();

        if !self.topology.contains(&measurement.anchor_id) {
            window.stats.readings_rejected += 1;
            log::warn!(
                "Rejected reading from unknown anchor {} ({:.3} m)",
                measurement.anchor_id,
                measurement.distance_m
            );
            return Err(ApiError::UnknownAnchor {
                anchor_id: measurement.anchor_id,
            });
        }

        if let Some(oldest) = window.oldest_timestamp() {
            // far-apart timestamps saturate to stale
            let age_ms = measurement.timestamp_ms.saturating_sub(oldest);
            if age_ms > self.staleness_threshold_ms {
                log::info!(
                    "StaleWindowDiscarded: dropping {} reading(s), window age {} ms > {} ms",
                    window.entries.len(),
                    age_ms,
                    self.staleness_threshold_ms
                );
                window.entries.clear();
                window.stats.windows_discarded += 1;
            }
        }

        log::debug!(
            "Reading from {}: {:.3} m at {}",
            measurement.anchor_id,
            measurement.distance_m,
            measurement.timestamp_ms
        );
        window.stats.readings_accepted += 1;
        let completed_at_ms = measurement.timestamp_ms;
        window.entries.insert(measurement.anchor_id.clone(), measurement);

        let required = self.topology.len();
        if window.entries.len() < required {
            return Ok(IngestStatus::Buffered {
                collected: window.entries.len(),
                required,
            });
        }

        let opened_at_ms = window.oldest_timestamp().unwrap_or(completed_at_ms);
        let entries = std::mem::take(&mut window.entries);
        let mut anchor_ids = Vec::with_capacity(required);
        let mut distances = Vec::with_capacity(required);
        for anchor in self.topology.anchors() {
            if let Some(m) = entries.get(&anchor.id) {
                anchor_ids.push(anchor.id.clone());
                distances.push(m.distance_m);
            }
        }

        let sequence = window.next_sequence;
        window.next_sequence += 1;
        window.stats.windows_emitted += 1;

        let set = MeasurementSet {
            sequence,
            anchor_ids,
            distances,
            opened_at_ms,
            completed_at_ms,
        };
        log::debug!("Emitting measurement set #{}: {:?}", set.sequence, set.distances);

        emit(set.clone());
        Ok(IngestStatus::Emitted(set))
    }

    /// Anchor ids currently buffered, in canonical order
    pub fn pending(&self) -> Vec<AnchorId> {
        let window = self.lock();
        self.topology
            .ids()
            .into_iter()
            .filter(|id| window.entries.contains_key(id))
            .collect()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.lock().stats
    }

    /// Drop any buffered readings without emitting them
    pub fn reset(&self) {
        self.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Anchor;
    use std::sync::Barrier;
    use std::thread;

    const A1: &str = "7c:df:a1:0f:af:45";
    const A2: &str = "7c:df:a1:0f:af:01";
    const A3: &str = "7c:df:a1:0e:d7:eb";

    fn topology() -> Arc<AnchorTopology> {
        Arc::new(
            AnchorTopology::new(vec![
                Anchor::new(A1, -2.80, 0.00, 2.08),
                Anchor::new(A2, 0.00, 3.58, 2.04),
                Anchor::new(A3, 3.43, 0.00, 1.84),
            ])
            .unwrap(),
        )
    }

    fn emitted(status: IngestStatus) -> MeasurementSet {
        match status {
            IngestStatus::Emitted(set) => set,
            other => panic!("expected emission, got {:?}", other),
        }
    }

    #[test]
    fn test_emits_in_canonical_order() {
        let aggregator = MeasurementAggregator::new(topology());

        assert_eq!(
            aggregator.ingest(Measurement::new(A3, 3.0, 1_000)).unwrap(),
            IngestStatus::Buffered { collected: 1, required: 3 }
        );
        assert_eq!(
            aggregator.ingest(Measurement::new(A1, 1.0, 1_100)).unwrap(),
            IngestStatus::Buffered { collected: 2, required: 3 }
        );
        let set = emitted(aggregator.ingest(Measurement::new(A2, 2.0, 1_200)).unwrap());

        assert_eq!(set.sequence, 1);
        assert_eq!(set.anchor_ids, vec![A1, A2, A3]);
        assert_eq!(set.distances, vec![1.0, 2.0, 3.0]);
        assert_eq!(set.opened_at_ms, 1_000);
        assert_eq!(set.completed_at_ms, 1_200);
        assert!(aggregator.pending().is_empty());
    }

    #[test]
    fn test_last_write_wins_within_window() {
        let aggregator = MeasurementAggregator::new(topology());
        aggregator.ingest(Measurement::new(A1, 1.0, 0)).unwrap();
        aggregator.ingest(Measurement::new(A1, 1.5, 10)).unwrap();
        assert_eq!(
            aggregator.ingest(Measurement::new(A2, 2.0, 20)).unwrap(),
            IngestStatus::Buffered { collected: 2, required: 3 }
        );
        let set = emitted(aggregator.ingest(Measurement::new(A3, 3.0, 30)).unwrap());
        assert_eq!(set.distances, vec![1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_stale_window_is_discarded_before_insert() {
        let aggregator = MeasurementAggregator::new(topology());
        aggregator.ingest(Measurement::new(A1, 1.0, 0)).unwrap();
        aggregator.ingest(Measurement::new(A2, 2.0, 1_000)).unwrap();

        // 30 001 ms after the oldest entry: the pair is dropped, the reading starts a fresh window
        let status = aggregator.ingest(Measurement::new(A3, 3.0, 30_001)).unwrap();
        assert_eq!(status, IngestStatus::Buffered { collected: 1, required: 3 });
        assert_eq!(aggregator.pending(), vec![A3]);
        assert_eq!(aggregator.stats().windows_discarded, 1);

        // the discarded readings never resurface
        aggregator.ingest(Measurement::new(A1, 1.1, 30_100)).unwrap();
        let set = emitted(aggregator.ingest(Measurement::new(A2, 2.2, 30_200)).unwrap());
        assert_eq!(set.distances, vec![1.1, 2.2, 3.0]);
        assert_eq!(set.opened_at_ms, 30_001);
    }

    #[test]
    fn test_exact_threshold_is_not_stale() {
        let aggregator = MeasurementAggregator::new(topology());
        aggregator.ingest(Measurement::new(A1, 1.0, 0)).unwrap();
        aggregator.ingest(Measurement::new(A2, 2.0, 10)).unwrap();
        let set = emitted(aggregator.ingest(Measurement::new(A3, 3.0, 30_000)).unwrap());
        assert_eq!(set.anchor_ids.len(), 3);
        assert_eq!(aggregator.stats().windows_discarded, 0);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let aggregator = MeasurementAggregator::new(topology());
        aggregator.ingest(Measurement::new(A1, 2.0, i64::MIN)).unwrap();

        let status = aggregator.ingest(Measurement::new(A2, 2.0, i64::MAX)).unwrap();
        assert_eq!(status, IngestStatus::Buffered { collected: 1, required: 3 });
        assert_eq!(aggregator.pending(), vec![A2]);
        assert_eq!(aggregator.stats().windows_discarded, 1);

        // a reading far in the past never ages the window
        let status = aggregator.ingest(Measurement::new(A3, 3.0, i64::MIN)).unwrap();
        assert_eq!(status, IngestStatus::Buffered { collected: 2, required: 3 });
        assert_eq!(aggregator.stats().windows_discarded, 1);
    }

    #[test]
    fn test_reset_drops_buffered_readings() {
        let aggregator = MeasurementAggregator::new(topology());
        aggregator.ingest(Measurement::new(A1, 1.0, 0)).unwrap();
        aggregator.ingest(Measurement::new(A2, 2.0, 10)).unwrap();

        aggregator.reset();
        assert!(aggregator.pending().is_empty());

        // the next window starts empty, so A3 alone does not complete it
        assert_eq!(
            aggregator.ingest(Measurement::new(A3, 3.0, 20)).unwrap(),
            IngestStatus::Buffered { collected: 1, required: 3 }
        );
        assert_eq!(aggregator.stats().windows_emitted, 0);
    }

    #[test]
    fn test_unknown_anchor_is_rejected_without_touching_window() {
        let aggregator = MeasurementAggregator::new(topology());
        aggregator.ingest(Measurement::new(A1, 1.0, 0)).unwrap();

        let result = aggregator.ingest(Measurement::new("de:ad:be:ef:00:00", 1.0, 60_000));
        assert_eq!(
            result,
            Err(ApiError::UnknownAnchor {
                anchor_id: "de:ad:be:ef:00:00".to_string()
            })
        );
        assert_eq!(aggregator.pending(), vec![A1]);

        let stats = aggregator.stats();
        assert_eq!(stats.readings_rejected, 1);
        assert_eq!(stats.readings_accepted, 1);
        assert_eq!(stats.windows_discarded, 0);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let aggregator = MeasurementAggregator::new(topology());
        for round in 0..3 {
            let t = round * 100;
            aggregator.ingest(Measurement::new(A1, 1.0, t)).unwrap();
            aggregator.ingest(Measurement::new(A2, 2.0, t + 1)).unwrap();
            let set = emitted(aggregator.ingest(Measurement::new(A3, 3.0, t + 2)).unwrap());
            assert_eq!(set.sequence, round as u64 + 1);
        }
        assert_eq!(aggregator.stats().windows_emitted, 3);
    }

    #[test]
    fn test_ingest_with_emits_inside_critical_section() {
        let aggregator = MeasurementAggregator::new(topology());
        let mut sink = Vec::new();

        aggregator.ingest_with(Measurement::new(A1, 1.0, 0), |s| sink.push(s)).unwrap();
        aggregator.ingest_with(Measurement::new(A2, 2.0, 0), |s| sink.push(s)).unwrap();
        assert!(sink.is_empty());
        aggregator.ingest_with(Measurement::new(A3, 3.0, 0), |s| sink.push(s)).unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].sequence, 1);
    }

    #[test]
    fn test_concurrent_completion_emits_once() {
        for _ in 0..50 {
            let aggregator = Arc::new(MeasurementAggregator::new(topology()));
            aggregator.ingest(Measurement::new(A1, 1.0, 0)).unwrap();

            // A2 and A3 race to complete the window
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = [(A2, 2.0), (A3, 3.0)]
                .into_iter()
                .map(|(id, d)| {
                    let aggregator = Arc::clone(&aggregator);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        aggregator.ingest(Measurement::new(id, d, 5)).unwrap()
                    })
                })
                .collect();

            let emissions = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|s| matches!(s, IngestStatus::Emitted(_)))
                .count();
            assert_eq!(emissions, 1);
            assert_eq!(aggregator.stats().windows_emitted, 1);
        }
    }

    #[test]
    fn test_many_producers_never_duplicate_sets() {
        let aggregator = Arc::new(MeasurementAggregator::new(topology()));
        let rounds = 200;

        let handles: Vec<_> = [(A1, 1.0), (A2, 2.0), (A3, 3.0)]
            .into_iter()
            .map(|(id, d)| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    let mut sets = Vec::new();
                    for _ in 0..rounds {
                        if let IngestStatus::Emitted(set) = aggregator.ingest(Measurement::new(id, d, 0)).unwrap() {
                            sets.push(set.sequence);
                        }
                    }
                    sets
                })
            })
            .collect();

        let mut sequences: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        sequences.sort_unstable();
        let emitted = sequences.len() as u64;

        // every emitted set has a unique sequence number 1..=n
        assert_eq!(sequences, (1..=emitted).collect::<Vec<_>>());
        assert_eq!(aggregator.stats().windows_emitted, emitted);
        assert_eq!(aggregator.stats().readings_accepted, 3 * rounds as u64);
    }
}

//! Positioning engine: the surface a transport layer talks to
//!
//! Owns the aggregator, the work queue, the position log and the worker
//! lifecycle. Nothing runs until [`PositioningEngine::start`] is called.

use crate::algorithms::PositionSolver;
use crate::api::types::{ApiError, ApiResult, EngineStatus, SubmitStatus};
use crate::core::topology::AnchorTopology;
use crate::core::types::{AnchorId, Measurement, Position};
use crate::processing::aggregator::{IngestStatus, MeasurementAggregator};
use crate::processing::position_log::PositionLog;
use crate::processing::queue::{EnqueueOutcome, WorkQueue};
use crate::processing::worker::{SolverWorker, StopMode, WorkerHandle, WorkerReport};
use crate::utils::config::SystemConfig;
use crate::validation::error::{ErrorReport, ErrorReporter};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct PositioningEngine {
    config: SystemConfig,
    topology: Arc<AnchorTopology>,
    aggregator: MeasurementAggregator,
    queue: WorkQueue,
    solver: Arc<dyn PositionSolver>,
    log: Arc<PositionLog>,
    reporter: Arc<ErrorReporter>,
    worker: Mutex<Option<WorkerHandle>>,
    last_report: Mutex<WorkerReport>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PositioningEngine {
    /// Build an engine using the Levenberg-Marquardt solver described by `config`
    pub fn new(config: SystemConfig) -> ApiResult<Self> {
        let solver: Arc<dyn PositionSolver> = Arc::new(config.build_solver());
        Self::with_solver(config, solver)
    }

    /// Build an engine around a custom solver
    pub fn with_solver(config: SystemConfig, solver: Arc<dyn PositionSolver>) -> ApiResult<Self> {
        config.validate()?;
        let topology = Arc::new(config.topology()?);
        let aggregator = MeasurementAggregator::with_threshold(Arc::clone(&topology), config.staleness_threshold_ms);
        // the first receiver is dropped; workers subscribe on start
        let (queue, _) = WorkQueue::new(&config.queue);

        log::info!(
            "Positioning engine configured with {} anchors, staleness threshold {} ms, max range {} m",
            topology.len(),
            config.staleness_threshold_ms,
            config.max_range_m
        );

        Ok(Self {
            topology,
            aggregator,
            queue,
            solver,
            log: Arc::new(PositionLog::new()),
            reporter: Arc::new(ErrorReporter::with_config(config.failure_history)),
            worker: Mutex::new(None),
            last_report: Mutex::new(WorkerReport::default()),
            config,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<AnchorTopology> {
        &self.topology
    }

    /// Spawn the solver worker. Sets submitted before this call are solved
    /// once it runs.
    pub fn start(&self) -> ApiResult<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(ApiError::AlreadyRunning);
        }

        let handle = SolverWorker::new(
            self.queue.subscribe(),
            Arc::clone(&self.topology),
            Arc::clone(&self.solver),
            Arc::clone(&self.log),
            Arc::clone(&self.reporter),
        )
        .spawn()?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the worker. `Drain` returns only after every set queued so far
    /// has been solved or reported.
    pub fn stop(&self, mode: StopMode) -> ApiResult<WorkerReport> {
        let handle = lock(&self.worker).take().ok_or(ApiError::NotRunning)?;
        let report = handle.stop(mode)?;
        *lock(&self.last_report) = report;
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).is_some()
    }

    /// Ingest one reading from the transport layer
    pub fn submit(&self, anchor_id: impl Into<AnchorId>, distance_m: f64, timestamp_ms: i64) -> ApiResult<SubmitStatus> {
        self.submit_measurement(Measurement::new(anchor_id, distance_m, timestamp_ms))
    }

    pub fn submit_measurement(&self, measurement: Measurement) -> ApiResult<SubmitStatus> {
        let mut enqueued = None;
        let status = self
            .aggregator
            .ingest_with(measurement, |set| enqueued = Some(self.queue.enqueue(set)))?;

        match status {
            IngestStatus::Buffered { collected, required } => Ok(SubmitStatus::Buffered { collected, required }),
            IngestStatus::Emitted(set) => {
                let sequence = set.sequence;
                match enqueued.ok_or(ApiError::QueueClosed)?? {
                    EnqueueOutcome::Queued => Ok(SubmitStatus::Queued { sequence }),
                    EnqueueOutcome::DroppedOldest { evicted } => Ok(SubmitStatus::QueuedEvicting { sequence, evicted }),
                    EnqueueOutcome::DroppedNewest => Ok(SubmitStatus::Dropped { sequence }),
                }
            }
        }
    }

    /// Consistent snapshot of every position solved so far, in solve order
    pub fn read_log(&self) -> Vec<Position> {
        self.log.snapshot()
    }

    pub fn read_log_since(&self, offset: usize) -> Vec<Position> {
        self.log.since(offset)
    }

    pub fn latest_position(&self) -> Option<Position> {
        self.log.latest()
    }

    pub fn position_log(&self) -> Arc<PositionLog> {
        Arc::clone(&self.log)
    }

    pub fn error_report(&self) -> ErrorReport {
        self.reporter.generate_error_report()
    }

    pub fn status(&self) -> EngineStatus {
        let (running, worker) = match lock(&self.worker).as_ref() {
            Some(handle) => (true, handle.report()),
            None => (false, *lock(&self.last_report)),
        };

        EngineStatus {
            running,
            aggregator: self.aggregator.stats(),
            pending_anchors: self.aggregator.pending(),
            queue_len: self.queue.len(),
            queue_dropped: self.queue.dropped(),
            log_len: self.log.len(),
            failures: self.reporter.total(),
            worker,
        }
    }
}

impl Drop for PositioningEngine {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.worker).take() {
            log::debug!("Positioning engine dropped while running, abandoning queue");
            let _ = handle.stop(StopMode::Abandon);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::Solution;
    use crate::core::types::Anchor;
    use crate::processing::queue::OverflowPolicy;
    use crate::utils::config::ConfigError;
    use crate::validation::error::PositioningError;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const A1: &str = "7c:df:a1:0f:af:45";
    const A2: &str = "7c:df:a1:0f:af:01";
    const A3: &str = "7c:df:a1:0e:d7:eb";

    fn exact_distances(engine: &PositioningEngine, truth: Vector3<f64>) -> Vec<(AnchorId, f64)> {
        engine
            .topology()
            .anchors()
            .iter()
            .map(|a| (a.id.clone(), (truth - a.position.to_vector3()).norm()))
            .collect()
    }

    #[test]
    fn test_scenario_recovers_point() {
        let engine = PositioningEngine::new(SystemConfig::default()).unwrap();
        engine.start().unwrap();

        let truth = Vector3::new(0.2, 1.0, 1.5);
        let readings = exact_distances(&engine, truth);
        let mut statuses = Vec::new();
        for (i, (id, d)) in readings.iter().enumerate() {
            statuses.push(engine.submit(id.as_str(), *d, 1_000 + i as i64 * 100).unwrap());
        }
        assert_eq!(statuses[0], SubmitStatus::Buffered { collected: 1, required: 3 });
        assert_eq!(statuses[2], SubmitStatus::Queued { sequence: 1 });

        let report = engine.stop(StopMode::Drain).unwrap();
        assert_eq!(report.solved, 1);

        let log = engine.read_log();
        assert_eq!(log.len(), 1);
        let p = &log[0];
        assert_abs_diff_eq!(p.x, 0.2, epsilon = 1e-3);
        assert_abs_diff_eq!(p.y, 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.z, 1.5, epsilon = 1e-3);
        assert_abs_diff_eq!(p.mean_absolute_residual, 0.0, epsilon = 1e-6);
        assert_eq!(p.anchor_ids, vec![A1, A2, A3]);
    }

    #[test]
    fn test_stale_pair_never_solved() {
        let engine = PositioningEngine::new(SystemConfig::default()).unwrap();
        engine.start().unwrap();

        engine.submit(A1, 2.0, 0).unwrap();
        engine.submit(A2, 2.5, 1_000).unwrap();
        // more than 30 s after the oldest buffered reading
        let status = engine.submit(A3, 3.0, 30_001).unwrap();
        assert_eq!(status, SubmitStatus::Buffered { collected: 1, required: 3 });
        assert_eq!(engine.status().pending_anchors, vec![A3.to_string()]);

        engine.stop(StopMode::Drain).unwrap();
        assert!(engine.read_log().is_empty());

        let status = engine.status();
        assert_eq!(status.aggregator.windows_discarded, 1);
        assert_eq!(status.aggregator.windows_emitted, 0);
    }

    #[test]
    fn test_invalid_distance_counted_not_logged() {
        let engine = PositioningEngine::new(SystemConfig::default()).unwrap();
        engine.start().unwrap();

        engine.submit(A1, 2.0, 0).unwrap();
        engine.submit(A2, 31.0, 10).unwrap();
        engine.submit(A3, 2.0, 20).unwrap();

        engine.submit(A1, 0.0, 100).unwrap();
        engine.submit(A2, 2.0, 110).unwrap();
        engine.submit(A3, 2.0, 120).unwrap();

        let report = engine.stop(StopMode::Drain).unwrap();
        assert_eq!(report.invalid, 2);
        assert_eq!(report.solved, 0);
        assert!(engine.read_log().is_empty());

        let errors = engine.error_report();
        assert_eq!(errors.total_failures, 2);
        assert_eq!(errors.failures_by_kind.get("InvalidMeasurement"), Some(&2));
        // newest first
        assert_eq!(errors.recent_failures[0].sequence, 2);
        assert_eq!(errors.recent_failures[1].sequence, 1);
    }

    #[test]
    fn test_unknown_anchor_rejected() {
        let engine = PositioningEngine::new(SystemConfig::default()).unwrap();
        engine.submit(A1, 2.0, 0).unwrap();

        let err = engine.submit("de:ad:be:ef:00:00", 2.0, 10).unwrap_err();
        assert_eq!(
            err,
            ApiError::UnknownAnchor {
                anchor_id: "de:ad:be:ef:00:00".to_string()
            }
        );

        let status = engine.status();
        assert_eq!(status.aggregator.readings_rejected, 1);
        assert_eq!(status.pending_anchors, vec![A1.to_string()]);
    }

    #[test]
    fn test_lifecycle() {
        let engine = PositioningEngine::new(SystemConfig::default()).unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.stop(StopMode::Drain), Err(ApiError::NotRunning));

        engine.start().unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.start(), Err(ApiError::AlreadyRunning));

        engine.stop(StopMode::Abandon).unwrap();
        assert!(!engine.is_running());

        // readings submitted while stopped wait in the queue for the next worker
        let readings = exact_distances(&engine, Vector3::new(0.5, 0.5, 1.0));
        for (id, d) in &readings {
            engine.submit(id.as_str(), *d, 0).unwrap();
        }
        assert_eq!(engine.status().queue_len, 1);

        engine.start().unwrap();
        let report = engine.stop(StopMode::Drain).unwrap();
        assert_eq!(report.solved, 1);
        assert_eq!(engine.read_log().len(), 1);
        assert_eq!(engine.status().worker.solved, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SystemConfig::default().with_anchors(vec![
            Anchor::new("a", 0.0, 0.0, 0.0),
            Anchor::new("a", 1.0, 0.0, 0.0),
            Anchor::new("b", 0.0, 1.0, 0.0),
        ]);
        assert!(matches!(
            PositioningEngine::new(config),
            Err(ApiError::Configuration(ConfigError::DuplicateAnchor { .. }))
        ));
    }

    #[test]
    fn test_concurrent_completion_emits_once() {
        let engine = Arc::new(PositioningEngine::new(SystemConfig::default()).unwrap());
        engine.start().unwrap();

        engine.submit(A1, 2.0, 0).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let racers: Vec<_> = [A2, A3]
            .into_iter()
            .map(|id| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.submit(id, 2.0, 10).unwrap()
                })
            })
            .collect();

        let statuses: Vec<SubmitStatus> = racers.into_iter().map(|h| h.join().unwrap()).collect();
        let completed = statuses.iter().filter(|s| s.sequence().is_some()).count();
        assert_eq!(completed, 1);

        engine.stop(StopMode::Drain).unwrap();
        assert_eq!(engine.status().aggregator.windows_emitted, 1);
    }

    /// Takes longer on earlier sets and reports the set's first distance as x
    struct SlowSolver;

    impl PositionSolver for SlowSolver {
        fn solve(&self, anchors: &[Vector3<f64>], distances: &[f64]) -> Result<Solution, PositioningError> {
            thread::sleep(Duration::from_millis((10.0 - distances[0]) as u64 * 3));
            Ok(Solution {
                position: Vector3::new(distances[0], 0.0, 0.0),
                mean_absolute_residual: 0.0,
                residuals: vec![0.0; anchors.len()],
                evaluations: 1,
                iterations: 0,
            })
        }
    }

    #[test]
    fn test_log_follows_submission_order() {
        let engine = PositioningEngine::with_solver(SystemConfig::default(), Arc::new(SlowSolver)).unwrap();
        engine.start().unwrap();

        for round in 1..=6 {
            let t = round as i64 * 100;
            engine.submit(A1, round as f64, t).unwrap();
            engine.submit(A2, 1.0, t).unwrap();
            engine.submit(A3, 1.0, t).unwrap();
        }
        engine.stop(StopMode::Drain).unwrap();

        let xs: Vec<f64> = engine.read_log().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let sequences: Vec<u64> = engine.read_log().iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_incremental_log_reads() {
        let engine = PositioningEngine::with_solver(SystemConfig::default(), Arc::new(SlowSolver)).unwrap();
        assert!(engine.latest_position().is_none());
        engine.start().unwrap();

        for round in 1..=3 {
            let t = round as i64 * 100;
            engine.submit(A1, round as f64, t).unwrap();
            engine.submit(A2, 1.0, t).unwrap();
            engine.submit(A3, 1.0, t).unwrap();
        }
        engine.stop(StopMode::Drain).unwrap();

        let tail: Vec<u64> = engine.read_log_since(1).iter().map(|p| p.sequence).collect();
        assert_eq!(tail, vec![2, 3]);
        assert!(engine.read_log_since(3).is_empty());
        assert_eq!(engine.latest_position().map(|p| p.sequence), Some(3));

        // the shared handle sees the same entries as the engine
        let log = engine.position_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log.snapshot(), engine.read_log());
    }

    #[test]
    fn test_bounded_queue_drops_newest() {
        let config = SystemConfig::default().with_bounded_queue(1, OverflowPolicy::DropNewest);
        let engine = PositioningEngine::new(config).unwrap();

        // not started: the queue fills up
        for round in 0..2 {
            let t = round * 100;
            engine.submit(A1, 2.0, t).unwrap();
            engine.submit(A2, 2.0, t).unwrap();
            let status = engine.submit(A3, 2.0, t).unwrap();
            if round == 0 {
                assert_eq!(status, SubmitStatus::Queued { sequence: 1 });
            } else {
                assert_eq!(status, SubmitStatus::Dropped { sequence: 2 });
            }
        }
        let status = engine.status();
        assert_eq!(status.queue_len, 1);
        assert_eq!(status.queue_dropped, 1);
    }
}

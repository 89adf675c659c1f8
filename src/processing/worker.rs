//! Single consumer loop: dequeue, solve, record

use crate::algorithms::PositionSolver;
use crate::api::types::{ApiError, ApiResult};
use crate::core::topology::AnchorTopology;
use crate::core::types::{MeasurementSet, Position};
use crate::processing::position_log::PositionLog;
use crate::processing::queue::QueueReceiver;
use crate::validation::error::{ErrorReporter, PositioningError};
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// How the worker treats sets still queued when asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMode {
    /// Solve everything already queued, then exit
    Drain,
    /// Exit after the set in progress, leaving the rest unsolved
    Abandon,
}

/// Per-outcome counts for the lifetime of a worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub solved: u64,
    pub invalid: u64,
    pub diverged: u64,
    /// Failures other than invalid input or divergence
    pub failed: u64,
    /// Sets left in the queue by an abandoning stop
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    solved: AtomicU64,
    invalid: AtomicU64,
    diverged: AtomicU64,
    failed: AtomicU64,
}

impl WorkerCounters {
    fn record(&self, outcome: &Result<Position, PositioningError>) {
        let counter = match outcome {
            Ok(_) => &self.solved,
            Err(PositioningError::InvalidMeasurement { .. }) => &self.invalid,
            Err(PositioningError::SolverDivergence { .. }) => &self.diverged,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, abandoned: u64) -> WorkerReport {
        WorkerReport {
            solved: self.solved.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            diverged: self.diverged.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned,
        }
    }
}

/// The only writer of the position log.
///
/// Solves run strictly one at a time in dequeue order, so log order equals
/// FIFO order. No lock is held while the optimizer runs.
pub struct SolverWorker {
    receiver: QueueReceiver,
    topology: Arc<AnchorTopology>,
    solver: Arc<dyn PositionSolver>,
    log: Arc<PositionLog>,
    reporter: Arc<ErrorReporter>,
    counters: Arc<WorkerCounters>,
}

impl SolverWorker {
    pub fn new(
        receiver: QueueReceiver,
        topology: Arc<AnchorTopology>,
        solver: Arc<dyn PositionSolver>,
        log: Arc<PositionLog>,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            receiver,
            topology,
            solver,
            log,
            reporter,
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    /// Solve one set and append the result. Failures are reported and returned.
    pub fn process(&self, set: MeasurementSet) -> Result<Position, PositioningError> {
        let outcome = self.solve_set(set);
        self.counters.record(&outcome);
        outcome
    }

    fn solve_set(&self, set: MeasurementSet) -> Result<Position, PositioningError> {
        // an id the topology does not know leaves the anchor list short, which the solver rejects
        let anchors = self.topology.positions_for(&set.anchor_ids).unwrap_or_default();
        let started = Instant::now();

        match self.solver.solve(&anchors, &set.distances) {
            Ok(solution) => {
                let position = Position::from_solution(set, &solution, chrono::Utc::now().timestamp_millis());
                log::info!(
                    "Set #{} solved in {:?}: ({:.3}, {:.3}, {:.3}), mean residual {:.3} m",
                    position.sequence,
                    started.elapsed(),
                    position.x,
                    position.y,
                    position.z,
                    position.mean_absolute_residual
                );
                self.log.append(position.clone());
                Ok(position)
            }
            Err(error) => {
                let error = error.with_anchor_ids(&set.anchor_ids);
                self.reporter.report_error(error.clone(), &set);
                Err(error)
            }
        }
    }

    pub fn report(&self) -> WorkerReport {
        self.counters.report(0)
    }

    /// Start the consumer loop on a dedicated thread
    pub fn spawn(self) -> ApiResult<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let counters = Arc::clone(&self.counters);

        let thread = thread::Builder::new()
            .name("solver-worker".to_string())
            .spawn(move || self.run(shutdown_rx))
            .map_err(|e| ApiError::Worker {
                details: format!("failed to spawn solver worker: {}", e),
            })?;

        log::info!("Solver worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            thread: Some(thread),
            counters,
        })
    }

    fn run(self, shutdown: Receiver<StopMode>) -> WorkerReport {
        loop {
            crossbeam::select! {
                recv(self.receiver.channel()) -> msg => match msg {
                    Ok(set) => {
                        let _ = self.process(set);
                    }
                    Err(_) => {
                        log::info!("Work queue closed, solver worker exiting");
                        return self.counters.report(0);
                    }
                },
                recv(shutdown) -> mode => {
                    // a dropped handle counts as abandon
                    let mode = mode.unwrap_or(StopMode::Abandon);
                    return self.shutdown(mode);
                }
            }
        }
    }

    fn shutdown(&self, mode: StopMode) -> WorkerReport {
        let abandoned = match mode {
            StopMode::Drain => {
                let mut drained = 0;
                while let Some(set) = self.receiver.try_dequeue() {
                    let _ = self.process(set);
                    drained += 1;
                }
                log::info!("Solver worker drained {} queued set(s)", drained);
                0
            }
            StopMode::Abandon => self.receiver.len() as u64,
        };

        let report = self.counters.report(abandoned);
        log::info!(
            "Solver worker stopped: {} solved, {} invalid, {} diverged, {} abandoned",
            report.solved,
            report.invalid,
            report.diverged,
            report.abandoned
        );
        report
    }
}

/// Owner of a running worker thread
pub struct WorkerHandle {
    shutdown: Sender<StopMode>,
    thread: Option<JoinHandle<WorkerReport>>,
    counters: Arc<WorkerCounters>,
}

impl WorkerHandle {
    /// Counters so far, without stopping
    pub fn report(&self) -> WorkerReport {
        self.counters.report(0)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Signal the worker and wait for it. An optimization in progress is
    /// always allowed to finish.
    pub fn stop(mut self, mode: StopMode) -> ApiResult<WorkerReport> {
        self.join(mode)
    }

    fn join(&mut self, mode: StopMode) -> ApiResult<WorkerReport> {
        let thread = self.thread.take().ok_or(ApiError::NotRunning)?;
        // fails only if the worker already exited on its own
        let _ = self.shutdown.try_send(mode);
        thread.join().map_err(|_| ApiError::Worker {
            details: "solver worker panicked".to_string(),
        })
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.join(StopMode::Abandon);
        }
    }
}

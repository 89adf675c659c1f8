//! FIFO hand-off between ingestion and the solver worker

use crate::api::types::{ApiError, ApiResult};
use crate::core::types::MeasurementSet;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// What a bounded queue does with a set that does not fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Discard the incoming set
    #[default]
    DropNewest,
    /// Evict the oldest queued set to make room
    DropOldest,
}

/// Queue sizing; `capacity: None` means unbounded
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The queue was full and the incoming set was discarded
    DroppedNewest,
    /// The queue was full and the set with this sequence number was evicted
    DroppedOldest { evicted: u64 },
}

/// Producer side of the work queue. `enqueue` never blocks.
#[derive(Debug)]
pub struct WorkQueue {
    sender: Sender<MeasurementSet>,
    // kept for eviction and length queries
    receiver: Receiver<MeasurementSet>,
    config: QueueConfig,
    dropped: AtomicU64,
}

/// Consumer side of the work queue, owned by the solver worker
#[derive(Debug)]
pub struct QueueReceiver {
    receiver: Receiver<MeasurementSet>,
}

impl WorkQueue {
    pub fn new(config: &QueueConfig) -> (Self, QueueReceiver) {
        let (sender, receiver) = match config.capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };

        let queue = Self {
            sender,
            receiver: receiver.clone(),
            config: config.clone(),
            dropped: AtomicU64::new(0),
        };
        (queue, QueueReceiver { receiver })
    }

    pub fn unbounded() -> (Self, QueueReceiver) {
        Self::new(&QueueConfig::default())
    }

    /// Another consumer handle onto the same queue, used when a worker is restarted
    pub fn subscribe(&self) -> QueueReceiver {
        QueueReceiver {
            receiver: self.receiver.clone(),
        }
    }

    pub fn enqueue(&self, set: MeasurementSet) -> ApiResult<EnqueueOutcome> {
        let mut outcome = EnqueueOutcome::Queued;
        let mut item = set;

        loop {
            match self.sender.try_send(item) {
                Ok(()) => return Ok(outcome),
                Err(TrySendError::Full(rejected)) => match self.config.overflow {
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "Work queue full ({} sets), dropping incoming set #{}",
                            self.sender.len(),
                            rejected.sequence
                        );
                        return Ok(EnqueueOutcome::DroppedNewest);
                    }
                    OverflowPolicy::DropOldest => {
                        // the worker may have drained the head in the meantime
                        if let Ok(evicted) = self.receiver.try_recv() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            log::warn!(
                                "Work queue full, evicting set #{} for set #{}",
                                evicted.sequence,
                                rejected.sequence
                            );
                            outcome = EnqueueOutcome::DroppedOldest {
                                evicted: evicted.sequence,
                            };
                        }
                        item = rejected;
                    }
                },
                Err(TrySendError::Disconnected(_)) => return Err(ApiError::QueueClosed),
            }
        }
    }

    /// Sets waiting to be solved
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.config.capacity
    }

    /// Sets lost to the overflow policy so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl QueueReceiver {
    /// Block until a set is available. `None` once the producer side is gone
    /// and the queue is empty.
    pub fn dequeue(&self) -> Option<MeasurementSet> {
        self.receiver.recv().ok()
    }

    pub fn try_dequeue(&self) -> Option<MeasurementSet> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub(crate) fn channel(&self) -> &Receiver<MeasurementSet> {
        &self.receiver
    }
}

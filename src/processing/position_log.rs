//! Append-only record of solved positions

use crate::core::types::Position;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ordered, append-only log. Insertion order is solve-completion order.
///
/// Readers take a shared lock and clone, so a snapshot is always a
/// consistent prefix of the appends made so far.
#[derive(Debug, Default)]
pub struct PositionLog {
    entries: RwLock<Vec<Position>>,
}

impl PositionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Position>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Position>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a position, returning its index in the log
    pub fn append(&self, position: Position) -> usize {
        let mut entries = self.write();
        entries.push(position);
        entries.len() - 1
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.read().clone()
    }

    /// Entries appended at or after `offset`, for incremental polling
    pub fn since(&self, offset: usize) -> Vec<Position> {
        self.read().iter().skip(offset).cloned().collect()
    }

    pub fn latest(&self) -> Option<Position> {
        self.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

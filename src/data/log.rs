//! Append-only in-memory logs.
//!
//! `SampleLogs` keeps the SignalLog and AuxLog behind a single lock, so every
//! observer sees them with equal length. `LabelLog` is owned by event capture.
//! Entries are never mutated after they are appended; readers take snapshots.

use crate::core::{AuxRow, LabelEvent, SampleRow};
use crate::error::{AppResult, RecorderError};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
struct SampleLogsInner {
    signal: Vec<SampleRow>,
    aux: Vec<AuxRow>,
}

/// SignalLog and AuxLog, appended together.
#[derive(Clone, Debug, Default)]
pub struct SampleLogs {
    inner: Arc<RwLock<SampleLogsInner>>,
}

impl SampleLogs {
    /// Creates empty logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one poll worth of paired rows.
    ///
    /// Nothing is appended if the two slices differ in length.
    pub fn append(&self, samples: &[SampleRow], aux: &[AuxRow]) -> AppResult<()> {
        if samples.len() != aux.len() {
            return Err(RecorderError::MalformedBatch(format!(
                "{} sample rows paired with {} aux rows",
                samples.len(),
                aux.len()
            )));
        }
        let mut inner = self.inner.write();
        inner.signal.extend_from_slice(samples);
        inner.aux.extend_from_slice(aux);
        Ok(())
    }

    /// `(signal_len, aux_len)` read under one guard.
    pub fn lens(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.signal.len(), inner.aux.len())
    }

    /// Number of rows in the SignalLog.
    pub fn signal_len(&self) -> usize {
        self.inner.read().signal.len()
    }

    /// Copy of the SignalLog.
    pub fn signal_snapshot(&self) -> Vec<SampleRow> {
        self.inner.read().signal.clone()
    }

    /// Copy of the AuxLog.
    pub fn aux_snapshot(&self) -> Vec<AuxRow> {
        self.inner.read().aux.clone()
    }
}

/// Operator labels in arrival order.
#[derive(Clone, Debug, Default)]
pub struct LabelLog {
    events: Arc<RwLock<Vec<LabelEvent>>>,
}

impl LabelLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event.
    pub fn append(&self, event: LabelEvent) {
        self.events.write().push(event);
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when no label was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Copy of every event.
    pub fn snapshot(&self) -> Vec<LabelEvent> {
        self.events.read().clone()
    }
}

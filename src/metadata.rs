//! Session manifest written next to the datasets.

use crate::core::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes one recording session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    /// Unique id of this session instance.
    pub session_uuid: uuid::Uuid,
    /// Subject identifier.
    pub subject_id: String,
    /// Run number.
    pub run: u32,
    /// Host the recording ran on.
    pub host: String,
    /// Description of the sample source.
    pub device: String,
    /// Wall-clock start (RFC 3339).
    pub started_at: Option<String>,
    /// Wall-clock stop (RFC 3339).
    pub stopped_at: Option<String>,
    /// Why the session stopped.
    pub stop_reason: Option<String>,
    /// Row counts keyed by dataset name.
    pub row_counts: BTreeMap<String, usize>,
    /// Producers that did not acknowledge the stop in time.
    pub abandoned_producers: Vec<String>,
    /// Version of the recorder.
    pub software_version: String,
}

impl SessionMetadata {
    /// Starts a manifest for `session`.
    pub fn new(session: &SessionId, device: impl Into<String>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            session_uuid: uuid::Uuid::new_v4(),
            subject_id: session.subject_id.clone(),
            run: session.run,
            host,
            device: device.into(),
            started_at: None,
            stopped_at: None,
            stop_reason: None,
            row_counts: BTreeMap::new(),
            abandoned_producers: Vec::new(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Records the start instant.
    pub fn mark_started(&mut self) {
        self.started_at = Some(chrono::Utc::now().to_rfc3339());
    }

    /// Records the stop instant and reason.
    pub fn mark_stopped(&mut self, reason: impl Into<String>) {
        self.stopped_at = Some(chrono::Utc::now().to_rfc3339());
        self.stop_reason = Some(reason.into());
    }

    /// Sets the row count of one dataset.
    pub fn set_rows(&mut self, dataset: impl Into<String>, rows: usize) {
        self.row_counts.insert(dataset.into(), rows);
    }
}

//! Core data types shared by the acquisition pipeline.
//!
//! Rows and label events are immutable once produced. Device timestamps
//! (`SampleRow`, `AuxRow`) and wall-clock timestamps (`LabelEvent`) are different
//! clock domains and are never compared against each other here.

use crate::error::{AppResult, RecorderError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// One row of EEG channel values at a device timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Device clock, monotonic within a session.
    pub device_timestamp: f64,
    /// Channel values in configured channel order.
    pub channel_values: Vec<f64>,
}

/// One row of auxiliary (analog) channel values, produced together with a `SampleRow`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuxRow {
    /// Device clock, identical to the paired `SampleRow`.
    pub device_timestamp: f64,
    /// Auxiliary values in configured channel order.
    pub aux_values: Vec<f64>,
}

/// Operator-facing attention labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Key `1`.
    LostFocus,
    /// Key `2`.
    FocusedAgain,
    /// Key `3`.
    LectureStarted,
    /// Key `4`.
    LecturePaused,
}

impl Label {
    /// Every label in key order.
    pub const ALL: [Label; 4] = [
        Label::LostFocus,
        Label::FocusedAgain,
        Label::LectureStarted,
        Label::LecturePaused,
    ];

    /// Maps a raw key to its label. Unrecognized keys yield `None`.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '1' => Some(Label::LostFocus),
            '2' => Some(Label::FocusedAgain),
            '3' => Some(Label::LectureStarted),
            '4' => Some(Label::LecturePaused),
            _ => None,
        }
    }

    /// Key bound to this label.
    pub fn key(self) -> char {
        match self {
            Label::LostFocus => '1',
            Label::FocusedAgain => '2',
            Label::LectureStarted => '3',
            Label::LecturePaused => '4',
        }
    }

    /// Text written to the label dataset.
    pub fn as_str(self) -> &'static str {
        match self {
            Label::LostFocus => "Lost Focus",
            Label::FocusedAgain => "Focused Again",
            Label::LectureStarted => "Lecture Started",
            Label::LecturePaused => "Lecture Paused",
        }
    }

    /// One-line operator instructions, e.g. `Press 1 for 'Lost Focus', ...`.
    pub fn instructions() -> String {
        let bindings: Vec<String> = Self::ALL
            .iter()
            .map(|label| format!("{} for '{}'", label.key(), label.as_str()))
            .collect();
        format!("Press {}", bindings.join(", "))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label stamped with the host wall clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelEvent {
    /// POSIX epoch seconds.
    pub wall_timestamp: f64,
    /// The recognized label.
    pub label: Label,
}

impl LabelEvent {
    /// Stamps `label` with the current wall-clock time.
    pub fn now(label: Label) -> Self {
        Self {
            wall_timestamp: wall_clock_seconds(),
            label,
        }
    }
}

/// Current host time as POSIX epoch seconds with microsecond resolution.
pub fn wall_clock_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Raw key identifier delivered by a `KeySource`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyPress(pub char);

/// A column-major batch as returned by board APIs.
///
/// `channels[c][i]` is channel `c` at `timestamps[i]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceBatch {
    /// Device timestamps, one per row.
    pub timestamps: Vec<f64>,
    /// EEG channel columns.
    pub channels: Vec<Vec<f64>>,
    /// Auxiliary channel columns.
    pub aux: Vec<Vec<f64>>,
}

impl DeviceBatch {
    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when the poll produced no rows.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Splits the batch into paired sample and aux rows.
    ///
    /// Fails without producing any row if a column length disagrees with the
    /// timestamp column.
    pub fn split(&self) -> AppResult<(Vec<SampleRow>, Vec<AuxRow>)> {
        let rows = self.timestamps.len();
        for (idx, column) in self.channels.iter().enumerate() {
            if column.len() != rows {
                return Err(RecorderError::MalformedBatch(format!(
                    "channel {} has {} values for {} timestamps",
                    idx + 1,
                    column.len(),
                    rows
                )));
            }
        }
        for (idx, column) in self.aux.iter().enumerate() {
            if column.len() != rows {
                return Err(RecorderError::MalformedBatch(format!(
                    "aux channel {} has {} values for {} timestamps",
                    idx + 1,
                    column.len(),
                    rows
                )));
            }
        }

        let samples = self
            .timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| SampleRow {
                device_timestamp: ts,
                channel_values: self.channels.iter().map(|c| c[i]).collect(),
            })
            .collect();
        let aux = self
            .timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| AuxRow {
                device_timestamp: ts,
                aux_values: self.aux.iter().map(|c| c[i]).collect(),
            })
            .collect();
        Ok((samples, aux))
    }
}

/// One hand-off queue entry: the rows of a single device poll.
#[derive(Clone, Debug, PartialEq)]
pub struct HandoffBatch {
    /// EEG rows of the poll.
    pub samples: Vec<SampleRow>,
    /// Aux rows of the poll.
    pub aux: Vec<AuxRow>,
    /// Device timestamps of the poll.
    pub timestamps: Vec<f64>,
}

/// Opaque session identifiers supplied at session start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionId {
    /// Subject identifier.
    pub subject_id: String,
    /// Run number.
    pub run: u32,
}

impl SessionId {
    /// Builds identifiers, rejecting an empty (or whitespace) subject id.
    pub fn new(subject_id: impl Into<String>, run: u32) -> AppResult<Self> {
        let subject_id = subject_id.into().trim().to_string();
        if subject_id.is_empty() {
            return Err(RecorderError::InvalidSession(
                "subject id must not be empty".into(),
            ));
        }
        Ok(Self { subject_id, run })
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject {} run {}", self.subject_id, self.run)
    }
}

/// One-way broadcast stop flag shared by the producers of a session.
///
/// Setting it more than once is a no-op. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Creates an unset signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Sets the flag. Returns `true` only for the call that flipped it.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// Whether the flag has been set.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set (immediately if already set).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn label_lookup_covers_bound_keys_only() {
        assert_eq!(Label::from_key('1'), Some(Label::LostFocus));
        assert_eq!(Label::from_key('2'), Some(Label::FocusedAgain));
        assert_eq!(Label::from_key('3'), Some(Label::LectureStarted));
        assert_eq!(Label::from_key('4'), Some(Label::LecturePaused));
        assert_eq!(Label::from_key('5'), None);
        assert_eq!(Label::from_key('q'), None);
        for label in Label::ALL {
            assert_eq!(Label::from_key(label.key()), Some(label));
        }
    }

    #[test]
    fn instructions_list_every_binding() {
        assert_eq!(
            Label::instructions(),
            "Press 1 for 'Lost Focus', 2 for 'Focused Again', 3 for 'Lecture Started', 4 for 'Lecture Paused'"
        );
    }

    #[test]
    fn split_pairs_rows_by_timestamp() {
        let batch = DeviceBatch {
            timestamps: vec![10.0, 10.004],
            channels: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            aux: vec![vec![0.5, 0.6]],
        };
        let (samples, aux) = batch.split().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(aux.len(), 2);
        assert_eq!(samples[1].channel_values, vec![2.0, 4.0]);
        assert_eq!(aux[1].aux_values, vec![0.6]);
        assert_eq!(samples[0].device_timestamp, aux[0].device_timestamp);
    }

    #[test]
    fn split_rejects_ragged_columns() {
        let batch = DeviceBatch {
            timestamps: vec![1.0, 2.0],
            channels: vec![vec![1.0]],
            aux: vec![],
        };
        assert!(matches!(
            batch.split(),
            Err(RecorderError::MalformedBatch(_))
        ));
    }

    #[test]
    fn session_id_requires_subject() {
        assert!(SessionId::new("", 1).is_err());
        assert!(SessionId::new("   ", 1).is_err());
        let id = SessionId::new(" s01 ", 2).unwrap();
        assert_eq!(id.subject_id, "s01");
        assert_eq!(id.to_string(), "subject s01 run 2");
    }

    #[tokio::test]
    async fn stop_signal_is_idempotent_and_shared() {
        let stop = StopSignal::new();
        let observer = stop.clone();
        assert!(!observer.is_set());

        let waiter = tokio::spawn(async move { observer.wait().await });
        assert!(stop.set());
        assert!(!stop.set());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stop.is_set());
        // Already set: resolves immediately.
        stop.wait().await;
    }
}

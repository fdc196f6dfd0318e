//! Persistence of the three session datasets.
//!
//! A `SessionWriter` receives each dataset separately so that a failure writing
//! one of them does not prevent attempting the others. Writers are called exactly
//! once per session by the controller's flush.
use crate::{
    core::{AuxRow, LabelEvent, SampleRow, SessionId},
    error::{AppResult, RecorderError},
    metadata::SessionMetadata,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The persisted datasets of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
    /// SignalLog snapshot.
    Signal,
    /// Aux rows drained from the hand-off queue.
    Aux,
    /// LabelLog snapshot.
    Labels,
}

impl DatasetKind {
    /// Operator-facing dataset name.
    pub fn display_name(self) -> &'static str {
        match self {
            DatasetKind::Signal => "EEG data",
            DatasetKind::Aux => "Auxiliary data",
            DatasetKind::Labels => "Labels",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Trait for the persistence collaborator.
///
/// Each method returns a human-readable location of the written artifact.
#[async_trait]
pub trait SessionWriter: Send + Sync {
    /// Writes the SignalLog snapshot.
    async fn write_signal(&self, session: &SessionId, rows: &[SampleRow]) -> AppResult<String>;

    /// Writes the auxiliary rows drained from the hand-off queue.
    async fn write_aux(&self, session: &SessionId, rows: &[AuxRow]) -> AppResult<String>;

    /// Writes the LabelLog snapshot.
    async fn write_labels(&self, session: &SessionId, events: &[LabelEvent]) -> AppResult<String>;

    /// Writes the session manifest. Writers without a manifest return `Ok(None)`.
    async fn write_manifest(
        &self,
        _session: &SessionId,
        _metadata: &SessionMetadata,
    ) -> AppResult<Option<String>> {
        Ok(None)
    }
}

/// File naming convention for session artifacts.
#[derive(Clone, Debug)]
pub struct SessionPaths {
    output_dir: PathBuf,
}

impl SessionPaths {
    /// Artifacts are placed directly in `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory holding every artifact.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `eeg_-{subject}_run-{run}.csv`
    pub fn signal(&self, session: &SessionId) -> PathBuf {
        self.output_dir
            .join(format!("eeg_-{}_run-{}.csv", session.subject_id, session.run))
    }

    /// `aux_-{subject}_run-{run}.csv`
    pub fn aux(&self, session: &SessionId) -> PathBuf {
        self.output_dir
            .join(format!("aux_-{}_run-{}.csv", session.subject_id, session.run))
    }

    /// `labels_subject-{subject}_run-{run}.csv`
    pub fn labels(&self, session: &SessionId) -> PathBuf {
        self.output_dir.join(format!(
            "labels_subject-{}_run-{}.csv",
            session.subject_id, session.run
        ))
    }

    /// `session_subject-{subject}_run-{run}.json`
    pub fn manifest(&self, session: &SessionId) -> PathBuf {
        self.output_dir.join(format!(
            "session_subject-{}_run-{}.json",
            session.subject_id, session.run
        ))
    }
}

/// A writer for CSV files.
pub struct CsvSessionWriter {
    paths: SessionPaths,
    eeg_channels: usize,
    aux_channels: usize,
    write_manifest: bool,
}

impl CsvSessionWriter {
    /// Creates a writer. Channel counts size the header of empty datasets.
    pub fn new(paths: SessionPaths, eeg_channels: usize, aux_channels: usize) -> Self {
        Self {
            paths,
            eeg_channels,
            aux_channels,
            write_manifest: true,
        }
    }

    /// Enables or disables the JSON manifest.
    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.write_manifest = enabled;
        self
    }

    /// Naming convention in use.
    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    fn ensure_dir(&self) -> AppResult<()> {
        let dir = self.paths.output_dir();
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)
                .map_err(|e| RecorderError::Storage(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(())
    }
}

fn value_header(prefix: &str, arity: usize) -> Vec<String> {
    std::iter::once("Timestamp".to_string())
        .chain((1..=arity).map(|i| format!("{prefix}_{i}")))
        .collect()
}

#[cfg(feature = "storage_csv")]
fn write_value_rows<'a>(
    path: &Path,
    header: &[String],
    rows: impl Iterator<Item = (f64, &'a [f64])>,
) -> AppResult<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    let mut count = 0;
    for (timestamp, values) in rows {
        let record: Vec<String> = std::iter::once(timestamp.to_string())
            .chain(values.iter().map(|v| v.to_string()))
            .collect();
        writer.write_record(&record)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

#[async_trait]
impl SessionWriter for CsvSessionWriter {
    async fn write_signal(&self, session: &SessionId, rows: &[SampleRow]) -> AppResult<String> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (session, rows);
            return Err(RecorderError::FeatureNotEnabled("storage_csv".to_string()));
        }

        #[cfg(feature = "storage_csv")]
        {
            self.ensure_dir()?;
            let path = self.paths.signal(session);
            let arity = rows
                .first()
                .map_or(self.eeg_channels, |r| r.channel_values.len());
            let written = write_value_rows(
                &path,
                &value_header("EEG", arity),
                rows.iter()
                    .map(|r| (r.device_timestamp, r.channel_values.as_slice())),
            )?;
            tracing::info!(path = %path.display(), rows = written, "EEG dataset written");
            Ok(path.display().to_string())
        }
    }

    async fn write_aux(&self, session: &SessionId, rows: &[AuxRow]) -> AppResult<String> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (session, rows);
            return Err(RecorderError::FeatureNotEnabled("storage_csv".to_string()));
        }

        #[cfg(feature = "storage_csv")]
        {
            self.ensure_dir()?;
            let path = self.paths.aux(session);
            let arity = rows
                .first()
                .map_or(self.aux_channels, |r| r.aux_values.len());
            let written = write_value_rows(
                &path,
                &value_header("AUX", arity),
                rows.iter().map(|r| (r.device_timestamp, r.aux_values.as_slice())),
            )?;
            tracing::info!(path = %path.display(), rows = written, "Aux dataset written");
            Ok(path.display().to_string())
        }
    }

    async fn write_labels(&self, session: &SessionId, events: &[LabelEvent]) -> AppResult<String> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (session, events);
            return Err(RecorderError::FeatureNotEnabled("storage_csv".to_string()));
        }

        #[cfg(feature = "storage_csv")]
        {
            self.ensure_dir()?;
            let path = self.paths.labels(session);
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(["Timestamp", "Label"])?;
            for event in events {
                writer.write_record([event.wall_timestamp.to_string(), event.label.to_string()])?;
            }
            writer.flush()?;
            tracing::info!(path = %path.display(), rows = events.len(), "Label dataset written");
            Ok(path.display().to_string())
        }
    }

    async fn write_manifest(
        &self,
        session: &SessionId,
        metadata: &SessionMetadata,
    ) -> AppResult<Option<String>> {
        if !self.write_manifest {
            return Ok(None);
        }
        self.ensure_dir()?;
        let path = self.paths.manifest(session);
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, json)
            .map_err(|e| RecorderError::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(Some(path.display().to_string()))
    }
}

#[derive(Debug, Default)]
struct MemoryDatasets {
    signal: Vec<SampleRow>,
    aux: Vec<AuxRow>,
    labels: Vec<LabelEvent>,
    manifest: Option<SessionMetadata>,
    writes: usize,
}

/// Keeps datasets in memory. Used by `--dry-run` and by tests.
#[derive(Debug, Default)]
pub struct MemorySessionWriter {
    datasets: Mutex<MemoryDatasets>,
    failing: Option<DatasetKind>,
}

impl MemorySessionWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer that rejects `kind` and accepts the other datasets.
    pub fn failing(kind: DatasetKind) -> Self {
        Self {
            datasets: Mutex::default(),
            failing: Some(kind),
        }
    }

    /// Number of write calls received, successful or not.
    pub fn write_count(&self) -> usize {
        self.datasets.lock().writes
    }

    /// Last SignalLog written.
    pub fn signal(&self) -> Vec<SampleRow> {
        self.datasets.lock().signal.clone()
    }

    /// Last aux dataset written.
    pub fn aux(&self) -> Vec<AuxRow> {
        self.datasets.lock().aux.clone()
    }

    /// Last LabelLog written.
    pub fn labels(&self) -> Vec<LabelEvent> {
        self.datasets.lock().labels.clone()
    }

    /// Manifest, if one was written.
    pub fn manifest(&self) -> Option<SessionMetadata> {
        self.datasets.lock().manifest.clone()
    }

    fn check(&self, kind: DatasetKind) -> AppResult<()> {
        self.datasets.lock().writes += 1;
        if self.failing == Some(kind) {
            return Err(RecorderError::Storage(format!(
                "{} rejected by memory writer",
                kind
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionWriter for MemorySessionWriter {
    async fn write_signal(&self, session: &SessionId, rows: &[SampleRow]) -> AppResult<String> {
        self.check(DatasetKind::Signal)?;
        self.datasets.lock().signal = rows.to_vec();
        Ok(format!("memory://{}/{}/eeg", session.subject_id, session.run))
    }

    async fn write_aux(&self, session: &SessionId, rows: &[AuxRow]) -> AppResult<String> {
        self.check(DatasetKind::Aux)?;
        self.datasets.lock().aux = rows.to_vec();
        Ok(format!("memory://{}/{}/aux", session.subject_id, session.run))
    }

    async fn write_labels(&self, session: &SessionId, events: &[LabelEvent]) -> AppResult<String> {
        self.check(DatasetKind::Labels)?;
        self.datasets.lock().labels = events.to_vec();
        Ok(format!("memory://{}/{}/labels", session.subject_id, session.run))
    }

    async fn write_manifest(
        &self,
        session: &SessionId,
        metadata: &SessionMetadata,
    ) -> AppResult<Option<String>> {
        self.datasets.lock().manifest = Some(metadata.clone());
        Ok(Some(format!(
            "memory://{}/{}/manifest",
            session.subject_id, session.run
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_naming_convention() {
        let paths = SessionPaths::new("data/misc");
        let session = SessionId::new("s07", 3).unwrap();
        assert_eq!(
            paths.signal(&session),
            PathBuf::from("data/misc/eeg_-s07_run-3.csv")
        );
        assert_eq!(
            paths.aux(&session),
            PathBuf::from("data/misc/aux_-s07_run-3.csv")
        );
        assert_eq!(
            paths.labels(&session),
            PathBuf::from("data/misc/labels_subject-s07_run-3.csv")
        );
        assert_eq!(
            paths.manifest(&session),
            PathBuf::from("data/misc/session_subject-s07_run-3.json")
        );
    }

    #[test]
    fn header_numbers_channels_from_one() {
        assert_eq!(value_header("EEG", 2), vec!["Timestamp", "EEG_1", "EEG_2"]);
        assert_eq!(value_header("AUX", 0), vec!["Timestamp"]);
    }

    #[tokio::test]
    async fn memory_writer_rejects_only_the_failing_dataset() {
        let writer = MemorySessionWriter::failing(DatasetKind::Aux);
        let session = SessionId::new("s", 1).unwrap();
        assert!(writer.write_signal(&session, &[]).await.is_ok());
        assert!(writer.write_aux(&session, &[]).await.is_err());
        assert!(writer.write_labels(&session, &[]).await.is_ok());
        assert_eq!(writer.write_count(), 3);
    }
}

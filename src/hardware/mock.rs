//! Mock Hardware Implementations
//!
//! Scripted collaborators for tests and dry runs without a physical board.
//!
//! # Available Mocks
//!
//! - `ScriptedSource` - replays a fixed sequence of poll outcomes
//! - `ChannelKeySource` - key presses injected programmatically

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use crate::core::{DeviceBatch, KeyPress};
use crate::hardware::capabilities::{KeySource, SampleSource};

// =============================================================================
// ScriptedSource - Replayed Poll Outcomes
// =============================================================================

/// Outcome of one scripted poll.
#[derive(Clone, Debug, PartialEq)]
pub enum PollStep {
    /// Return this many rows.
    Rows(usize),
    /// Return an empty batch.
    Empty,
    /// Fail with this message.
    Fail(String),
    /// Never complete.
    Hang,
}

struct Script {
    steps: VecDeque<PollStep>,
    next_timestamp: f64,
}

/// Sample source that replays `PollStep`s, then repeats a tail step forever.
///
/// # Example
///
/// ```rust,ignore
/// let source = ScriptedSource::new(vec![PollStep::Rows(2), PollStep::Empty, PollStep::Rows(3)]);
/// ```
pub struct ScriptedSource {
    script: Mutex<Script>,
    tail: PollStep,
    eeg_channels: usize,
    aux_channels: usize,
    polls: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedSource {
    /// Replays `steps`, then returns empty batches.
    pub fn new(steps: Vec<PollStep>) -> Self {
        Self {
            script: Mutex::new(Script {
                steps: steps.into(),
                next_timestamp: 0.0,
            }),
            tail: PollStep::Empty,
            eeg_channels: 8,
            aux_channels: 3,
            polls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Step repeated once the script is exhausted.
    pub fn then(mut self, tail: PollStep) -> Self {
        self.tail = tail;
        self
    }

    /// Channel arity of generated rows.
    pub fn with_channels(mut self, eeg_channels: usize, aux_channels: usize) -> Self {
        self.eeg_channels = eeg_channels;
        self.aux_channels = aux_channels;
        self
    }

    /// Number of `poll` calls made.
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls made.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> (PollStep, f64) {
        let mut script = self.script.lock();
        let step = script.steps.pop_front().unwrap_or_else(|| self.tail.clone());
        let start = script.next_timestamp;
        if let PollStep::Rows(n) = step {
            script.next_timestamp += n as f64 * 0.004;
        }
        (step, start)
    }

    fn batch(&self, rows: usize, start: f64) -> DeviceBatch {
        let timestamps: Vec<f64> = (0..rows).map(|i| start + i as f64 * 0.004).collect();
        let channels = (0..self.eeg_channels)
            .map(|c| (0..rows).map(|i| (c * 1000 + i) as f64).collect())
            .collect();
        let aux = (0..self.aux_channels)
            .map(|c| (0..rows).map(|i| -((c * 1000 + i) as f64)).collect())
            .collect();
        DeviceBatch {
            timestamps,
            channels,
            aux,
        }
    }
}

#[async_trait]
impl SampleSource for ScriptedSource {
    async fn poll(&self) -> Result<DeviceBatch> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let (step, start) = self.next_step();
        match step {
            PollStep::Rows(n) => Ok(self.batch(n, start)),
            PollStep::Empty => Ok(DeviceBatch::default()),
            PollStep::Fail(msg) => Err(anyhow!(msg)),
            PollStep::Hang => {
                std::future::pending::<()>().await;
                Ok(DeviceBatch::default())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "Scripted source: {} EEG channels, {} aux channels",
            self.eeg_channels, self.aux_channels
        )
    }
}

// =============================================================================
// ChannelKeySource - Injected Key Presses
// =============================================================================

/// Key source driven by `press` calls.
#[derive(Default)]
pub struct ChannelKeySource {
    sender: Mutex<Option<mpsc::Sender<KeyPress>>>,
    unsubscribes: AtomicUsize,
}

impl ChannelKeySource {
    /// Creates an unsubscribed source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a key press. Returns `false` if nobody is subscribed.
    pub async fn press(&self, key: char) -> bool {
        let sender = self.sender.lock().clone();
        match sender {
            Some(tx) => tx.send(KeyPress(key)).await.is_ok(),
            None => false,
        }
    }

    /// Whether a subscription is active.
    pub fn is_subscribed(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Number of `unsubscribe` calls made.
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for ChannelKeySource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<KeyPress>> {
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().take();
    }
}

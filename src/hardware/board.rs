//! Synthetic EEG board.
//!
//! Stands in for a vendor driver: rows accrue at `sample_rate_hz` on the board's
//! own clock and are handed out by `poll`, the way a streaming board's ring
//! buffer is drained.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::time::Instant;

use crate::core::{wall_clock_seconds, DeviceBatch};
use crate::hardware::capabilities::SampleSource;

struct BoardClock {
    started: Instant,
    /// Device time of row zero.
    epoch: f64,
    emitted: u64,
    closed: bool,
}

/// Simulated multi-channel board with analog aux inputs.
pub struct SyntheticBoard {
    eeg_channels: usize,
    aux_channels: usize,
    sample_rate_hz: f64,
    clock: Mutex<BoardClock>,
}

impl SyntheticBoard {
    /// Creates a streaming board.
    pub fn new(eeg_channels: usize, aux_channels: usize, sample_rate_hz: f64) -> Self {
        Self {
            eeg_channels,
            aux_channels,
            sample_rate_hz,
            clock: Mutex::new(BoardClock {
                started: Instant::now(),
                epoch: wall_clock_seconds(),
                emitted: 0,
                closed: false,
            }),
        }
    }

    /// Total rows produced so far.
    pub fn rows_emitted(&self) -> u64 {
        self.clock.lock().emitted
    }
}

#[async_trait]
impl SampleSource for SyntheticBoard {
    async fn poll(&self) -> Result<DeviceBatch> {
        let mut clock = self.clock.lock();
        if clock.closed {
            bail!("board session released");
        }

        let due = (clock.started.elapsed().as_secs_f64() * self.sample_rate_hz) as u64;
        let count = due.saturating_sub(clock.emitted) as usize;
        let period = 1.0 / self.sample_rate_hz;
        let first = clock.emitted;
        clock.emitted = due.max(clock.emitted);

        let timestamps: Vec<f64> = (0..count as u64)
            .map(|i| clock.epoch + (first + i) as f64 * period)
            .collect();
        let mut rng = rand::thread_rng();
        // microvolts for EEG, raw analog counts for aux
        let channels = (0..self.eeg_channels)
            .map(|_| (0..count).map(|_| rng.gen_range(-100.0..100.0)).collect())
            .collect();
        let aux = (0..self.aux_channels)
            .map(|_| (0..count).map(|_| rng.gen_range(0.0..1023.0)).collect())
            .collect();

        Ok(DeviceBatch {
            timestamps,
            channels,
            aux,
        })
    }

    async fn close(&self) -> Result<()> {
        let mut clock = self.clock.lock();
        if !clock.closed {
            clock.closed = true;
            tracing::debug!(rows = clock.emitted, "Synthetic board released");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "Synthetic board: {} EEG channels, {} aux channels @ {} Hz",
            self.eeg_channels, self.aux_channels, self.sample_rate_hz
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn poll_returns_rows_accrued_since_last_poll() {
        let board = SyntheticBoard::new(4, 2, 1000.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let batch = board.poll().await.unwrap();
        assert!(!batch.is_empty());
        assert_eq!(batch.channels.len(), 4);
        assert_eq!(batch.aux.len(), 2);
        assert!(batch.channels.iter().all(|c| c.len() == batch.len()));
        assert!(batch.timestamps.windows(2).all(|w| w[0] < w[1]));

        let next = board.poll().await.unwrap();
        if let (Some(last), Some(first)) = (batch.timestamps.last(), next.timestamps.first()) {
            assert!(first > last);
        }
        assert_eq!(board.rows_emitted() as usize, batch.len() + next.len());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_polling() {
        let board = SyntheticBoard::new(1, 1, 250.0);
        board.close().await.unwrap();
        board.close().await.unwrap();
        assert!(board.poll().await.is_err());
    }
}

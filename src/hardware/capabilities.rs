//! Collaborator capabilities at the hardware boundary.
//!
//! The acquisition core only needs two narrow capabilities:
//!
//! - `SampleSource`: drains whatever rows the device has buffered since the last poll.
//! - `KeySource`: pushes raw operator key presses.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Transport discovery and board configuration happen before a source is handed
//! to the session and are not part of these traits.

use crate::core::{DeviceBatch, KeyPress};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Capability: Buffered Sample Readout
///
/// Devices that accumulate timestamped multi-channel rows and hand them out on demand.
///
/// # Contract
/// - `poll` returns every row buffered since the previous call (possibly none)
/// - An `Err` from `poll` is a transient failure; the caller decides when to give up
/// - `poll` is never called concurrently by more than one caller
/// - `close` is idempotent
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Drain the currently available batch.
    async fn poll(&self) -> Result<DeviceBatch>;

    /// Stop streaming and release the device.
    async fn close(&self) -> Result<()>;

    /// Human-readable description (board, channel counts, rate).
    fn describe(&self) -> String;
}

/// Capability: Operator Key Input
///
/// Push-based key notifications from the input subsystem.
///
/// # Contract
/// - `subscribe` starts delivery and returns the receiving end
/// - `unsubscribe` stops delivery; calling it again is a no-op
/// - Delivery order equals press order
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Begin receiving key presses.
    async fn subscribe(&self) -> Result<mpsc::Receiver<KeyPress>>;

    /// Release the subscription.
    async fn unsubscribe(&self);
}

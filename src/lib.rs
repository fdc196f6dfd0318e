//! # Focus Recorder Core Library
//!
//! This crate is the core library for the `focus-recorder` application, which records
//! a multichannel EEG stream together with operator-entered attention labels during a
//! lecture session and persists both once the session ends.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The polling producer. Drains the sample source into the
//!   SignalLog/AuxLog and the hand-off queue, with a bounded retry budget.
//! - **`capture`**: The event-capture producer. Maps key presses to labels and stamps
//!   them with the wall clock.
//! - **`config`**: Layered configuration (defaults, TOML, environment) via `figment`.
//! - **`core`**: Row, label and batch types, session identifiers and the shared
//!   `StopSignal`.
//! - **`data`**: Append-only logs, the bounded hand-off queue, and dataset writers.
//! - **`error`**: The crate-wide `RecorderError` enum.
//! - **`hardware`**: Capability traits for the sample and key sources, the synthetic
//!   board, the terminal key source, and scripted mocks.
//! - **`metadata`**: The JSON session manifest.
//! - **`session`**: `SessionController`, which owns the buffers and drives
//!   `Idle -> Running -> Stopping -> Flushed`.
//! - **`telemetry`**: `tracing` subscriber setup.

pub mod acquisition;
pub mod capture;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod hardware;
pub mod metadata;
pub mod session;
pub mod telemetry;

pub use error::{AppResult, RecorderError};
pub use session::{FlushReport, SessionController, SessionOptions, SessionState, StopReason};

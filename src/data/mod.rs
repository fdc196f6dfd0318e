//! In-memory session buffers and dataset storage.
pub mod handoff;
pub mod log;
pub mod storage;

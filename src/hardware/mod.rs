//! Hardware collaborators.
//!
//! Capability traits plus the devices shipped with the recorder: a synthetic
//! board, a terminal key source, and scripted mocks.

pub mod board;
pub mod capabilities;
pub mod keyboard;
pub mod mock;

pub use board::SyntheticBoard;
pub use capabilities::{KeySource, SampleSource};
pub use keyboard::StdinKeySource;

//! Tracking: turns captures into Frames, estimates their pose and decides
//! which ones become KeyFrames.
//!
//! - Frame construction and feature sets (`frame`)
//! - Descriptor matching for initialization (`matching`)
//! - The per-capture state machine (`tracker`, `state`)

pub mod frame;
pub mod matching;
pub mod state;
pub mod tracker;

pub use state::TrackingState;
pub use tracker::Tracker;

//! Sampling/decimation of the auto-logged streams.
//!
//! Continuous streams (pose, scene graph, spatial map, frame rate) pass a time
//! gate and, for scene and map, a change gate before they produce an item.
//! Discrete events such as anchors bypass this module entirely.

pub mod engine;
pub mod gate;

pub use engine::SamplingEngine;
pub use gate::{ChangeGate, FrameRateCounter, StreamGate, FRAME_RATE_WINDOW_SECS};

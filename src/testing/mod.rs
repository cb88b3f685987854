//! Testing utilities for avhal
//!
//! Synthetic audio and picture data used by the synthetic backend and by
//! the test-suite.

pub mod synthetic_data;

pub use synthetic_data::{silence, synthetic_audio_buffer, synthetic_picture_frame};

//! Format catalog
//!
//! Audio sample formats and FourCC-coded pixel formats used to negotiate
//! streams with a backend.

mod audio;
mod picture;

pub use audio::{bits_per_sample, AudioFormat, SampleFormat};
pub use picture::{
    fourcc, fourcc_decode, fourcc_encode, pixel_format_by_id, PictureFormat, PixelFormat,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Format of a stream, either audio or picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaFormat {
    Audio(AudioFormat),
    Picture(PictureFormat),
}

impl MediaFormat {
    pub fn as_audio(&self) -> Option<&AudioFormat> {
        match self {
            MediaFormat::Audio(format) => Some(format),
            MediaFormat::Picture(_) => None,
        }
    }

    pub fn as_picture(&self) -> Option<&PictureFormat> {
        match self {
            MediaFormat::Picture(format) => Some(format),
            MediaFormat::Audio(_) => None,
        }
    }

    /// Size of one delivery buffer for the given latency.
    ///
    /// Audio buffers hold `latency_ms` worth of frames; picture buffers hold
    /// one frame (compressed layouts get a 24 bit per pixel upper bound).
    pub fn buffer_size(&self, latency_ms: u32) -> usize {
        match self {
            MediaFormat::Audio(format) => format.bytes_for_duration(latency_ms),
            MediaFormat::Picture(format) => format
                .frame_size()
                .unwrap_or(format.width() as usize * format.height() as usize * 3),
        }
    }
}

impl From<AudioFormat> for MediaFormat {
    fn from(format: AudioFormat) -> Self {
        MediaFormat::Audio(format)
    }
}

impl From<PictureFormat> for MediaFormat {
    fn from(format: PictureFormat) -> Self {
        MediaFormat::Picture(format)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaFormat::Audio(format) => format.fmt(f),
            MediaFormat::Picture(format) => format.fmt(f),
        }
    }
}

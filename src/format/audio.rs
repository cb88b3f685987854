use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AvError;

/// PCM sample encodings understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum SampleFormat {
    /// Unsigned 8 bit PCM
    U8,
    /// Signed 16 bit PCM, little endian
    S16LE,
    /// Signed 16 bit PCM, big endian
    S16BE,
    /// Signed 24 bit PCM, little endian
    S24LE,
    /// Signed 24 bit PCM, big endian
    S24BE,
    /// Signed 32 bit PCM, little endian
    S32LE,
    /// Signed 32 bit PCM, big endian
    S32BE,
    /// 32 bit IEEE float, little endian, range -1.0 to 1.0
    FLOAT32LE,
    /// 32 bit IEEE float, big endian, range -1.0 to 1.0
    FLOAT32BE,
    /// 8 bit A-law
    ALAW,
    /// 8 bit mu-law
    ULAW,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 11] = [
        SampleFormat::U8,
        SampleFormat::S16LE,
        SampleFormat::S16BE,
        SampleFormat::S24LE,
        SampleFormat::S24BE,
        SampleFormat::S32LE,
        SampleFormat::S32BE,
        SampleFormat::FLOAT32LE,
        SampleFormat::FLOAT32BE,
        SampleFormat::ALAW,
        SampleFormat::ULAW,
    ];

    pub fn bits_per_sample(self) -> u32 {
        bits_per_sample(self)
    }

    pub fn bytes_per_sample(self) -> u32 {
        self.bits_per_sample() / 8
    }

    pub fn is_big_endian(self) -> bool {
        matches!(
            self,
            SampleFormat::S16BE | SampleFormat::S24BE | SampleFormat::S32BE | SampleFormat::FLOAT32BE
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::FLOAT32LE | SampleFormat::FLOAT32BE)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::U8 => "U8",
            SampleFormat::S16LE => "S16LE",
            SampleFormat::S16BE => "S16BE",
            SampleFormat::S24LE => "S24LE",
            SampleFormat::S24BE => "S24BE",
            SampleFormat::S32LE => "S32LE",
            SampleFormat::S32BE => "S32BE",
            SampleFormat::FLOAT32LE => "FLOAT32LE",
            SampleFormat::FLOAT32BE => "FLOAT32BE",
            SampleFormat::ALAW => "ALAW",
            SampleFormat::ULAW => "ULAW",
        }
    }
}

/// Bits occupied by one sample of the given format.
pub fn bits_per_sample(format: SampleFormat) -> u32 {
    match format {
        SampleFormat::ALAW | SampleFormat::ULAW | SampleFormat::U8 => 8,
        SampleFormat::S16LE | SampleFormat::S16BE => 16,
        SampleFormat::S24LE | SampleFormat::S24BE => 24,
        SampleFormat::S32LE
        | SampleFormat::S32BE
        | SampleFormat::FLOAT32LE
        | SampleFormat::FLOAT32BE => 32,
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SampleFormat::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AvError::not_found("sample format", s))
    }
}

/// Immutable audio format: sample encoding, rate and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAudioFormat")]
pub struct AudioFormat {
    sample_format: SampleFormat,
    sample_rate: u32,
    channels: u16,
}

#[derive(Deserialize)]
struct RawAudioFormat {
    sample_format: SampleFormat,
    sample_rate: u32,
    channels: u16,
}

impl TryFrom<RawAudioFormat> for AudioFormat {
    type Error = AvError;

    fn try_from(raw: RawAudioFormat) -> Result<Self, Self::Error> {
        Self::new(raw.sample_format, raw.sample_rate, raw.channels)
    }
}

impl AudioFormat {
    /// Build a format; rate and channel count must be positive.
    pub fn new(sample_format: SampleFormat, sample_rate: u32, channels: u16) -> Result<Self, AvError> {
        if sample_rate == 0 {
            return Err(AvError::format_unsupported("sample rate must be positive"));
        }
        if channels == 0 {
            return Err(AvError::format_unsupported("channel count must be positive"));
        }
        Ok(Self {
            sample_format,
            sample_rate,
            channels,
        })
    }

    /// 44.1 kHz stereo signed 16 bit.
    pub fn cd_quality() -> Self {
        Self {
            sample_format: SampleFormat::S16LE,
            sample_rate: 44_100,
            channels: 2,
        }
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.sample_format.bits_per_sample()
    }

    /// Size of one interleaved frame (one sample per channel) in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() as usize * self.channels as usize
    }

    /// Bytes needed to hold `millis` of audio, rounded down to whole frames
    /// and never less than one frame.
    pub fn bytes_for_duration(&self, millis: u32) -> usize {
        let frames = (self.sample_rate as u64 * millis as u64 / 1000).max(1);
        frames as usize * self.bytes_per_frame()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.sample_format, self.sample_rate, self.channels)
    }
}

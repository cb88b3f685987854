//! Synthetic media generators
//!
//! Produces PCM buffers in every catalog sample format and picture frames in
//! any pixel layout, so streams can be exercised without hardware.

use crate::format::{AudioFormat, PictureFormat, SampleFormat};

/// Tone frequency of generated audio.
pub const TONE_HZ: f64 = 440.0;

/// Peak amplitude of generated audio (0.3 of full scale, no clipping).
pub const TONE_AMPLITUDE: f64 = 0.3;

/// G.711 mu-law encoding of a 16 bit sample.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    value = value.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (value >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// G.711 A-law encoding of a 16 bit sample.
pub fn linear_to_alaw(sample: i16) -> u8 {
    const SEGMENT_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

    let mut value = (sample as i32) >> 3;
    let mask = if value >= 0 {
        0xD5
    } else {
        value = -value - 1;
        0x55
    };

    let Some(segment) = SEGMENT_END.iter().position(|end| value <= *end) else {
        return (0x7F ^ mask) as u8;
    };
    let mut encoded = (segment as i32) << 4;
    if segment < 2 {
        encoded |= (value >> 1) & 0x0F;
    } else {
        encoded |= (value >> segment) & 0x0F;
    }
    (encoded ^ mask) as u8
}

/// Append one sample, given as -1.0..=1.0, in `format`'s encoding.
pub fn push_sample(out: &mut Vec<u8>, value: f64, format: SampleFormat) {
    let value = value.clamp(-1.0, 1.0);
    let s16 = (value * i16::MAX as f64) as i16;
    match format {
        SampleFormat::U8 => out.push((value * 127.0 + 128.0) as u8),
        SampleFormat::S16LE => out.extend_from_slice(&s16.to_le_bytes()),
        SampleFormat::S16BE => out.extend_from_slice(&s16.to_be_bytes()),
        SampleFormat::S24LE => {
            let s24 = (value * 8_388_607.0) as i32;
            out.extend_from_slice(&s24.to_le_bytes()[..3]);
        }
        SampleFormat::S24BE => {
            let s24 = (value * 8_388_607.0) as i32;
            out.extend_from_slice(&s24.to_be_bytes()[1..]);
        }
        SampleFormat::S32LE => out.extend_from_slice(&((value * i32::MAX as f64) as i32).to_le_bytes()),
        SampleFormat::S32BE => out.extend_from_slice(&((value * i32::MAX as f64) as i32).to_be_bytes()),
        SampleFormat::FLOAT32LE => out.extend_from_slice(&(value as f32).to_le_bytes()),
        SampleFormat::FLOAT32BE => out.extend_from_slice(&(value as f32).to_be_bytes()),
        SampleFormat::ALAW => out.push(linear_to_alaw(s16)),
        SampleFormat::ULAW => out.push(linear_to_ulaw(s16)),
    }
}

/// Interleaved sine tone, `frames` frames long, continuing from frame
/// `start_frame` so consecutive buffers join without a phase jump.
pub fn synthetic_audio_buffer(format: &AudioFormat, start_frame: u64, frames: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * format.bytes_per_frame());
    let rate = format.sample_rate() as f64;

    for i in 0..frames as u64 {
        let t = (start_frame + i) as f64 / rate;
        let value = (2.0 * std::f64::consts::PI * TONE_HZ * t).sin() * TONE_AMPLITUDE;
        for _ in 0..format.channels() {
            push_sample(&mut out, value, format.sample_format());
        }
    }
    out
}

/// `frames` frames of digital silence.
pub fn silence(format: &AudioFormat, frames: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * format.bytes_per_frame());
    for _ in 0..frames * format.channels() as usize {
        push_sample(&mut out, 0.0, format.sample_format());
    }
    out
}

/// Gradient test picture that shifts with `frame_number`.
///
/// The byte length matches [`PictureFormat::frame_size`]; compressed layouts
/// get a 3 byte per pixel buffer.
pub fn synthetic_picture_frame(format: &PictureFormat, frame_number: u64) -> Vec<u8> {
    let width = format.width() as usize;
    let len = format.frame_size().unwrap_or(width * format.height() as usize * 3);
    let base = (frame_number % 256) as u8;

    (0..len)
        .map(|i| {
            let pixel = i / 3;
            let x = pixel % width;
            let y = pixel / width;
            base.wrapping_add(((x + y + i % 3) % 256) as u8)
        })
        .collect()
}

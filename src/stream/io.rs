//! Application-side endpoints and observers of a stream.

use crate::errors::AvError;
use crate::types::Device;

/// Receives captured buffers. Called on the backend delivery thread, never
/// concurrently for the same stream. `data` is only valid for the duration
/// of the call and must be copied if it is needed afterwards.
///
/// Returning an error halts delivery: the stream reports it through
/// [`StreamListener::stream_error`] and moves to `Stopped`.
pub trait CaptureSink: Send {
    fn write(&mut self, data: &[u8], length: usize) -> anyhow::Result<()>;
}

impl<F> CaptureSink for F
where
    F: FnMut(&[u8], usize) -> anyhow::Result<()> + Send,
{
    fn write(&mut self, data: &[u8], length: usize) -> anyhow::Result<()> {
        self(data, length)
    }
}

/// Supplies buffers for playback. Returns the number of bytes written into
/// `buffer`; the stream zeroes whatever is left over.
pub trait PlaybackSource: Send {
    fn read(&mut self, buffer: &mut [u8]) -> anyhow::Result<usize>;
}

impl<F> PlaybackSource for F
where
    F: FnMut(&mut [u8]) -> anyhow::Result<usize> + Send,
{
    fn read(&mut self, buffer: &mut [u8]) -> anyhow::Result<usize> {
        self(buffer)
    }
}

/// Lifecycle notifications of a stream. Every method defaults to a no-op.
///
/// `stream_ended` and `stream_error` may be called from the backend delivery
/// thread; the others run on the thread that drove the transition.
pub trait StreamListener: Send + Sync {
    fn stream_opened(&self, _device: &Device) {}

    fn stream_started(&self, _device: &Device) {}

    fn stream_stopped(&self, _device: &Device) {}

    fn stream_closed(&self, _device: &Device) {}

    /// Delivery ended without the caller asking for it.
    fn stream_ended(&self, _device: &Device) {}

    fn stream_error(&self, _device: &Device, _error: &AvError) {}
}

/// Volume and mute changes of an audio stream.
pub trait AudioSessionListener: Send + Sync {
    fn volume_changed(&self, volume: f32, mute: bool);
}

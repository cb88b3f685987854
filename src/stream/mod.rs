//! Stream engine
//!
//! A [`Stream`] is a capture or playback session bound to one device. The
//! caller owns it and drives the lifecycle (see [`StreamState`]); buffers
//! flow on a backend-owned delivery thread into a [`CaptureSink`] or out of
//! a [`PlaybackSource`].
//!
//! Lifecycle methods never hold the state lock while calling into the
//! backend, so a delivery thread reporting an error or end of stream cannot
//! deadlock against `stop()`.

mod delivery;
mod io;
mod state;

pub use io::{AudioSessionListener, CaptureSink, PlaybackSource, StreamListener};
pub use state::{StreamOp, StreamState};

use std::sync::Arc;

use delivery::{DeliveryBridge, Endpoint, Shared};

use crate::errors::{AvError, AvResult};
use crate::format::{AudioFormat, MediaFormat, PictureFormat};
use crate::platform::{Backend, SessionParams, StreamHandle};
use crate::registry::DeviceRegistry;
use crate::types::{Device, StreamKind};

pub struct Stream {
    registry: Arc<DeviceRegistry>,
    backend: Arc<dyn Backend>,
    handle: StreamHandle,
    kind: StreamKind,
    format: MediaFormat,
    params: SessionParams,
    shared: Arc<Shared>,
}

impl Stream {
    pub fn audio_capture(
        registry: Arc<DeviceRegistry>,
        device: Device,
        format: AudioFormat,
        params: SessionParams,
        sink: impl CaptureSink + 'static,
    ) -> AvResult<Self> {
        Self::create(
            registry,
            device,
            StreamKind::AudioCapture,
            format.into(),
            params,
            Endpoint::Capture(Box::new(sink)),
        )
    }

    pub fn audio_playback(
        registry: Arc<DeviceRegistry>,
        device: Device,
        format: AudioFormat,
        params: SessionParams,
        source: impl PlaybackSource + 'static,
    ) -> AvResult<Self> {
        Self::create(
            registry,
            device,
            StreamKind::AudioPlayback,
            format.into(),
            params,
            Endpoint::Playback(Box::new(source)),
        )
    }

    pub fn video_capture(
        registry: Arc<DeviceRegistry>,
        device: Device,
        format: PictureFormat,
        params: SessionParams,
        sink: impl CaptureSink + 'static,
    ) -> AvResult<Self> {
        Self::create(
            registry,
            device,
            StreamKind::VideoCapture,
            format.into(),
            params,
            Endpoint::Capture(Box::new(sink)),
        )
    }

    fn create(
        registry: Arc<DeviceRegistry>,
        device: Device,
        kind: StreamKind,
        format: MediaFormat,
        mut params: SessionParams,
        endpoint: Endpoint,
    ) -> AvResult<Self> {
        if device.category() != kind.category() || device.direction() != kind.direction() {
            return Err(AvError::illegal_state(format!(
                "cannot create a {kind:?} stream on {} {} device {device}",
                device.category(),
                device.direction()
            )));
        }
        check_format(kind, &format)?;

        params.volume = params.volume.clamp(0.0, 1.0);
        params.buffer_latency_ms = params.buffer_latency_ms.max(1);
        if kind.is_audio() {
            params.frame_rate = None;
        }

        let backend = registry.backend().clone();
        let shared = Arc::new(Shared::new(device, endpoint));
        let bridge = Arc::new(DeliveryBridge::new(shared.clone()));
        let handle = backend.create_stream(&shared.device, kind, &format, bridge)?;

        log::debug!("Created {:?} stream {} on {} ({})", kind, handle, shared.device, format);

        Ok(Self {
            registry,
            backend,
            handle,
            kind,
            format,
            params,
            shared,
        })
    }

    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn add_listener(&self, listener: Arc<dyn StreamListener>) {
        self.shared.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StreamListener>) {
        self.shared.remove_listener(listener);
    }

    pub fn add_session_listener(&self, listener: Arc<dyn AudioSessionListener>) -> AvResult<()> {
        self.ensure_audio("session listeners")?;
        self.shared.add_session_listener(listener);
        Ok(())
    }

    pub fn remove_session_listener(&self, listener: &Arc<dyn AudioSessionListener>) {
        self.shared.remove_session_listener(listener);
    }

    /// Acquire the device. Fails with `DeviceUnavailable` if the device has
    /// disappeared since it was enumerated.
    pub fn open(&mut self) -> AvResult<()> {
        let next = self.state().next(StreamOp::Open)?;

        if !self.registry.contains(&self.shared.device)? {
            return Err(AvError::device_unavailable(format!(
                "{} is no longer present",
                self.shared.device
            )));
        }

        self.backend.open_stream(self.handle, &self.params)?;
        self.shared.set_state(next);
        log::info!("Opened {:?} stream on {} ({})", self.kind, self.shared.device, self.format);
        self.shared
            .notify("stream_opened", |l| l.stream_opened(&self.shared.device));
        Ok(())
    }

    pub fn start(&mut self) -> AvResult<()> {
        let previous = self.state();
        let next = previous.next(StreamOp::Start)?;

        if self.shared.take_halted() {
            if let Err(e) = self.backend.stop_stream(self.handle) {
                log::warn!("Stopping halted stream {} failed: {}", self.handle, e);
            }
        }

        self.shared.set_state(next);
        self.shared.set_accepting(true);
        if let Err(e) = self.backend.start_stream(self.handle) {
            self.shared.set_accepting(false);
            self.shared.set_state(previous);
            return Err(e);
        }

        log::info!("Started stream on {}", self.shared.device);
        self.shared
            .notify("stream_started", |l| l.stream_started(&self.shared.device));
        Ok(())
    }

    /// Halt delivery. Returns once no sink or source call is in progress.
    ///
    /// Stopping a stream that already stopped on its own (sink failure,
    /// device removal) is accepted and only releases the backend side.
    pub fn stop(&mut self) -> AvResult<()> {
        let previous = self.state();
        previous.next(StreamOp::Stop)?;

        self.shared.set_accepting(false);
        let halted = self.shared.take_halted();
        let result = if previous == StreamState::Started || halted {
            self.backend.stop_stream(self.handle)
        } else {
            Ok(())
        };
        self.shared.drain();

        if self
            .shared
            .transition(StreamState::Started, StreamState::Stopped)
        {
            log::info!("Stopped stream on {}", self.shared.device);
            self.shared
                .notify("stream_stopped", |l| l.stream_stopped(&self.shared.device));
        }
        result
    }

    pub fn close(&mut self) -> AvResult<()> {
        let next = self.state().next(StreamOp::Close)?;

        if self.shared.take_halted() {
            if let Err(e) = self.backend.stop_stream(self.handle) {
                log::warn!("Stopping halted stream {} failed: {}", self.handle, e);
            }
        }
        self.backend.close_stream(self.handle)?;
        self.shared.set_state(next);

        log::info!("Closed stream on {}", self.shared.device);
        self.shared
            .notify("stream_closed", |l| l.stream_closed(&self.shared.device));
        Ok(())
    }

    /// Release the backend stream. On failure the stream stays Closed and
    /// dispose may be called again.
    pub fn dispose(&mut self) -> AvResult<()> {
        let next = self.state().next(StreamOp::Dispose)?;
        self.backend.dispose_stream(self.handle)?;
        self.shared.set_state(next);
        log::debug!("Disposed stream {}", self.handle);
        Ok(())
    }

    fn ensure_active(&self, what: &str) -> AvResult<()> {
        let state = self.state();
        if !state.is_active() {
            return Err(AvError::illegal_state(format!(
                "cannot access {what} of a stream that is {state}"
            )));
        }
        Ok(())
    }

    fn ensure_audio(&self, what: &str) -> AvResult<()> {
        if !self.kind.is_audio() {
            return Err(AvError::illegal_state(format!("video streams have no {what}")));
        }
        Ok(())
    }

    fn ensure_video(&self, what: &str) -> AvResult<()> {
        if self.kind.is_audio() {
            return Err(AvError::illegal_state(format!("audio streams have no {what}")));
        }
        Ok(())
    }

    fn ensure_not_started(&self, what: &str) -> AvResult<()> {
        if self.state() == StreamState::Started {
            return Err(AvError::illegal_state(format!(
                "stop the stream before changing its {what}"
            )));
        }
        Ok(())
    }

    fn push_session(&mut self, params: SessionParams) -> AvResult<()> {
        self.backend.update_session(self.handle, &params)?;
        self.params = params;
        Ok(())
    }

    pub fn volume(&self) -> AvResult<f32> {
        self.ensure_active("volume")?;
        self.ensure_audio("volume")?;
        Ok(self.params.volume)
    }

    /// Set the volume. Values outside 0.0-1.0 are clamped.
    pub fn set_volume(&mut self, volume: f32) -> AvResult<()> {
        self.ensure_active("volume")?;
        self.ensure_audio("volume")?;

        let clamped = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        if clamped != volume {
            log::warn!("Volume {} out of range, clamped to {}", volume, clamped);
        }
        let params = SessionParams {
            volume: clamped,
            ..self.params
        };
        self.push_session(params)?;
        self.shared.notify_volume(self.params.volume, self.params.mute);
        Ok(())
    }

    pub fn mute(&self) -> AvResult<bool> {
        self.ensure_active("mute")?;
        self.ensure_audio("mute")?;
        Ok(self.params.mute)
    }

    pub fn set_mute(&mut self, mute: bool) -> AvResult<()> {
        self.ensure_active("mute")?;
        self.ensure_audio("mute")?;
        let params = SessionParams { mute, ..self.params };
        self.push_session(params)?;
        self.shared.notify_volume(self.params.volume, self.params.mute);
        Ok(())
    }

    /// Buffer latency in milliseconds.
    pub fn buffer_latency(&self) -> AvResult<u32> {
        self.ensure_active("buffer latency")?;
        Ok(self.params.buffer_latency_ms)
    }

    pub fn set_buffer_latency(&mut self, latency_ms: u32) -> AvResult<()> {
        self.ensure_active("buffer latency")?;
        if latency_ms == 0 {
            log::warn!("Buffer latency of 0 ms raised to 1 ms");
        }
        let params = SessionParams {
            buffer_latency_ms: latency_ms.max(1),
            ..self.params
        };
        self.push_session(params)
    }

    pub fn audio_format(&self) -> AvResult<AudioFormat> {
        self.ensure_active("audio format")?;
        self.ensure_audio("audio format")?;
        self.format
            .as_audio()
            .copied()
            .ok_or_else(|| AvError::illegal_state("stream carries no audio format"))
    }

    pub fn set_audio_format(&mut self, format: AudioFormat) -> AvResult<()> {
        self.ensure_active("audio format")?;
        self.ensure_audio("audio format")?;
        self.ensure_not_started("audio format")?;
        self.change_format(format.into())
    }

    pub fn picture_format(&self) -> AvResult<PictureFormat> {
        self.ensure_active("picture format")?;
        self.ensure_video("picture format")?;
        self.format
            .as_picture()
            .copied()
            .ok_or_else(|| AvError::illegal_state("stream carries no picture format"))
    }

    pub fn set_picture_format(&mut self, format: PictureFormat) -> AvResult<()> {
        self.ensure_active("picture format")?;
        self.ensure_video("picture format")?;
        self.ensure_not_started("picture format")?;
        self.change_format(format.into())
    }

    fn change_format(&mut self, format: MediaFormat) -> AvResult<()> {
        self.backend.set_stream_format(self.handle, &format)?;
        log::debug!("Stream {} format changed to {}", self.handle, format);
        self.format = format;
        Ok(())
    }

    /// Requested frame rate, `None` until one is set.
    pub fn frame_rate(&self) -> AvResult<Option<f32>> {
        self.ensure_active("frame rate")?;
        self.ensure_video("frame rate")?;
        Ok(self.params.frame_rate)
    }

    pub fn set_frame_rate(&mut self, fps: f32) -> AvResult<()> {
        self.ensure_active("frame rate")?;
        self.ensure_video("frame rate")?;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(AvError::format_unsupported(format!("invalid frame rate {fps}")));
        }
        let params = SessionParams {
            frame_rate: Some(fps),
            ..self.params
        };
        self.push_session(params)
    }

    /// Bytes delivered to the sink, or requested from the source, since the
    /// stream was created.
    pub fn stream_position(&self) -> AvResult<u64> {
        self.ensure_active("stream position")?;
        Ok(self.shared.position())
    }
}

fn check_format(kind: StreamKind, format: &MediaFormat) -> AvResult<()> {
    let matches = match format {
        MediaFormat::Audio(_) => kind.is_audio(),
        MediaFormat::Picture(_) => !kind.is_audio(),
    };
    if !matches {
        return Err(AvError::format_unsupported(format!(
            "{format} cannot be used for a {kind:?} stream"
        )));
    }
    Ok(())
}

impl Drop for Stream {
    fn drop(&mut self) {
        let state = self.state();
        if state == StreamState::Disposed {
            return;
        }
        if state == StreamState::Started {
            if let Err(e) = self.stop() {
                log::warn!("Error stopping stream {} in drop: {}", self.handle, e);
            }
        }
        if matches!(self.state(), StreamState::Opened | StreamState::Stopped) {
            if let Err(e) = self.close() {
                log::warn!("Error closing stream {} in drop: {}", self.handle, e);
            }
        }
        if let Err(e) = self.dispose() {
            log::warn!("Error disposing stream {} in drop: {}", self.handle, e);
        }
    }
}

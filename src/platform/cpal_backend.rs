//! Audio backend over cpal
//!
//! Enumerates the default host's input and output devices, detects hotplug
//! by polling the device list, and runs capture/playback streams with raw
//! sample buffers. cpal streams are not `Send` on every platform, so each
//! open stream lives on its own worker thread and is driven by commands.
//!
//! cpal has no stable device ids; descriptors are `input:<name>` and
//! `output:<name>`, which stay the same across reconnects of the same device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Backend, BufferFlow, HandleArena, RawHotplugEvent, SessionParams, StreamCallback, StreamHandle};
use crate::config::AvConfig;
use crate::errors::{AvError, AvResult};
use crate::format::{AudioFormat, MediaFormat, SampleFormat};
use crate::types::{Device, Direction, MediaCategory, StreamKind};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn descriptor_for(direction: Direction, name: &str) -> String {
    match direction {
        Direction::Capture => format!("input:{name}"),
        Direction::Playback => format!("output:{name}"),
    }
}

fn to_cpal_sample_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    match format {
        SampleFormat::U8 => Some(cpal::SampleFormat::U8),
        SampleFormat::S16LE if cfg!(target_endian = "little") => Some(cpal::SampleFormat::I16),
        SampleFormat::S32LE if cfg!(target_endian = "little") => Some(cpal::SampleFormat::I32),
        SampleFormat::FLOAT32LE if cfg!(target_endian = "little") => Some(cpal::SampleFormat::F32),
        _ => None,
    }
}

fn from_cpal_sample_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::U8 => Some(SampleFormat::U8),
        cpal::SampleFormat::I16 => Some(SampleFormat::S16LE),
        cpal::SampleFormat::I32 => Some(SampleFormat::S32LE),
        cpal::SampleFormat::F32 => Some(SampleFormat::FLOAT32LE),
        _ => None,
    }
}

fn map_build_error(device: &Device, error: cpal::BuildStreamError) -> AvError {
    match error {
        cpal::BuildStreamError::DeviceNotAvailable => {
            AvError::device_unavailable(format!("{device} is not available"))
        }
        cpal::BuildStreamError::StreamConfigNotSupported | cpal::BuildStreamError::InvalidArgument => {
            AvError::format_unsupported(format!("{device}: {error}"))
        }
        other => AvError::backend(format!("{device}: {other}")),
    }
}

/// Scale samples in place. Formats without a linear integer or float
/// representation are left untouched.
fn apply_gain(bytes: &mut [u8], format: SampleFormat, gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    match format {
        SampleFormat::FLOAT32LE => {
            for chunk in bytes.chunks_exact_mut(4) {
                let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) * gain;
                chunk.copy_from_slice(&sample.to_le_bytes());
            }
        }
        SampleFormat::S16LE => {
            for chunk in bytes.chunks_exact_mut(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 * gain;
                chunk.copy_from_slice(&(sample as i16).to_le_bytes());
            }
        }
        SampleFormat::S32LE => {
            for chunk in bytes.chunks_exact_mut(4) {
                let sample = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64 * gain as f64;
                chunk.copy_from_slice(&(sample as i32).to_le_bytes());
            }
        }
        SampleFormat::U8 => {
            for byte in bytes.iter_mut() {
                *byte = ((*byte as f32 - 128.0) * gain + 128.0) as u8;
            }
        }
        _ => {}
    }
}

fn fill_silence(bytes: &mut [u8], format: SampleFormat) {
    let value = if format == SampleFormat::U8 { 128 } else { 0 };
    bytes.fill(value);
}

enum Command {
    Play(Sender<AvResult<()>>),
    Pause(Sender<AvResult<()>>),
    Shutdown,
}

struct Worker {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

struct CpalStream {
    device: Device,
    kind: StreamKind,
    format: MediaFormat,
    session: Arc<Mutex<SessionParams>>,
    callback: Arc<dyn StreamCallback>,
    active: Arc<AtomicBool>,
    worker: Option<Worker>,
}

/// Everything needed to build a cpal stream on the worker thread.
struct StreamJob {
    handle: StreamHandle,
    device: Device,
    kind: StreamKind,
    format: AudioFormat,
    session: Arc<Mutex<SessionParams>>,
    callback: Arc<dyn StreamCallback>,
    active: Arc<AtomicBool>,
}

pub struct CpalBackend {
    poll_interval: Duration,
    streams: HandleArena<CpalStream>,
}

impl CpalBackend {
    pub fn new(config: &AvConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.hotplug.poll_interval_ms),
            streams: HandleArena::new(),
        }
    }

    fn host() -> cpal::Host {
        cpal::default_host()
    }

    fn to_device(device: &cpal::Device, direction: Direction) -> Option<Device> {
        let name = device.name().ok()?;
        let config = match direction {
            Direction::Capture => device.default_input_config(),
            Direction::Playback => device.default_output_config(),
        };
        let formats = config
            .ok()
            .and_then(|c| {
                let sample_format = from_cpal_sample_format(c.sample_format())?;
                AudioFormat::new(sample_format, c.sample_rate().0, c.channels()).ok()
            })
            .map(|f| vec![MediaFormat::from(f)])
            .unwrap_or_default();

        Some(
            Device::new(descriptor_for(direction, &name), name, MediaCategory::Audio, direction)
                .with_formats(formats),
        )
    }

    fn scan(direction: Direction) -> AvResult<Vec<Device>> {
        let host = Self::host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Capture => host
                .input_devices()
                .map_err(|e| AvError::backend(format!("Failed to enumerate input devices: {e}")))?
                .collect(),
            Direction::Playback => host
                .output_devices()
                .map_err(|e| AvError::backend(format!("Failed to enumerate output devices: {e}")))?
                .collect(),
        };
        Ok(devices
            .iter()
            .filter_map(|d| Self::to_device(d, direction))
            .collect())
    }

    fn find_native(device: &Device) -> AvResult<cpal::Device> {
        let host = Self::host();
        let mut candidates: Box<dyn Iterator<Item = cpal::Device>> = match device.direction() {
            Direction::Capture => Box::new(
                host.input_devices()
                    .map_err(|e| AvError::backend(format!("Failed to enumerate input devices: {e}")))?,
            ),
            Direction::Playback => Box::new(
                host.output_devices()
                    .map_err(|e| AvError::backend(format!("Failed to enumerate output devices: {e}")))?,
            ),
        };
        candidates
            .find(|d| {
                d.name()
                    .map(|name| descriptor_for(device.direction(), &name) == device.descriptor())
                    .unwrap_or(false)
            })
            .ok_or_else(|| AvError::device_unavailable(format!("{device} is not connected")))
    }

    fn spawn_worker(&self, handle: StreamHandle) -> AvResult<()> {
        let job = self.streams.with(handle, |s| {
            let format = s
                .format
                .as_audio()
                .copied()
                .ok_or_else(|| AvError::format_unsupported("cpal streams carry audio only"))?;
            Ok::<_, AvError>(StreamJob {
                handle,
                device: s.device.clone(),
                kind: s.kind,
                format,
                session: s.session.clone(),
                callback: s.callback.clone(),
                active: s.active.clone(),
            })
        })??;

        let (commands_tx, commands_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name(format!("avhal-cpal-stream-{}", handle.0))
            .spawn(move || run_worker(job, commands_rx, ready_tx))
            .map_err(|e| AvError::backend(format!("spawn failed: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.streams.with(handle, |s| {
                    s.worker = Some(Worker {
                        commands: commands_tx,
                        thread,
                    })
                })?;
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AvError::backend("cpal worker exited before building the stream"))
            }
        }
    }

    fn send(&self, handle: StreamHandle, build: impl FnOnce(Sender<AvResult<()>>) -> Command) -> AvResult<()> {
        let commands = self
            .streams
            .with(handle, |s| s.worker.as_ref().map(|w| w.commands.clone()))?
            .ok_or_else(|| AvError::illegal_state(format!("stream {handle} is not open")))?;

        let (reply_tx, reply_rx) = bounded(1);
        commands
            .send(build(reply_tx))
            .map_err(|_| AvError::backend(format!("cpal worker for {handle} is gone")))?;
        reply_rx
            .recv()
            .map_err(|_| AvError::backend(format!("cpal worker for {handle} did not reply")))?
    }

    fn shutdown_worker(&self, handle: StreamHandle) -> AvResult<()> {
        let worker = self.streams.with(handle, |s| {
            s.active.store(false, Ordering::SeqCst);
            s.worker.take()
        })?;
        if let Some(worker) = worker {
            let _ = worker.commands.send(Command::Shutdown);
            if worker.thread.join().is_err() {
                log::error!("cpal worker for {} panicked", handle);
            }
        }
        Ok(())
    }
}

fn build_stream(job: &StreamJob) -> AvResult<cpal::Stream> {
    let native = CpalBackend::find_native(&job.device)?;
    let sample_format = to_cpal_sample_format(job.format.sample_format()).ok_or_else(|| {
        AvError::format_unsupported(format!("{} is not supported by cpal", job.format.sample_format()))
    })?;

    let latency = lock(&job.session).buffer_latency_ms;
    let frames = (job.format.sample_rate() as u64 * latency as u64 / 1000).max(1) as u32;
    let fixed = cpal::StreamConfig {
        channels: job.format.channels(),
        sample_rate: cpal::SampleRate(job.format.sample_rate()),
        buffer_size: cpal::BufferSize::Fixed(frames),
    };

    match build_with(job, &native, &fixed, sample_format) {
        Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
            log::debug!("{}: fixed buffer of {} frames refused, using host default", job.device, frames);
            let fallback = cpal::StreamConfig {
                buffer_size: cpal::BufferSize::Default,
                ..fixed
            };
            build_with(job, &native, &fallback, sample_format).map_err(|e| map_build_error(&job.device, e))
        }
        other => other.map_err(|e| map_build_error(&job.device, e)),
    }
}

fn build_with(
    job: &StreamJob,
    native: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let handle = job.handle;
    let error_callback = {
        let callback = job.callback.clone();
        let active = job.active.clone();
        move |err: cpal::StreamError| match err {
            cpal::StreamError::DeviceNotAvailable => {
                active.store(false, Ordering::SeqCst);
                callback.on_ended(handle, "device not available");
            }
            other => log::error!("cpal stream {} error: {}", handle, other),
        }
    };

    match job.kind {
        StreamKind::AudioCapture => {
            let callback = job.callback.clone();
            let active = job.active.clone();
            let session = job.session.clone();
            let format = job.format.sample_format();
            let mut scratch = Vec::new();
            native.build_input_stream_raw(
                config,
                sample_format,
                move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                    if !active.load(Ordering::SeqCst) {
                        return;
                    }
                    let params = *lock(&session);
                    let bytes = data.bytes();
                    let flow = if params.mute || (params.volume - 1.0).abs() >= f32::EPSILON {
                        scratch.clear();
                        scratch.extend_from_slice(bytes);
                        if params.mute {
                            fill_silence(&mut scratch, format);
                        } else {
                            apply_gain(&mut scratch, format, params.volume);
                        }
                        callback.on_buffer(handle, &scratch)
                    } else {
                        callback.on_buffer(handle, bytes)
                    };
                    if flow == BufferFlow::Halt {
                        active.store(false, Ordering::SeqCst);
                    }
                },
                error_callback,
                None,
            )
        }
        StreamKind::AudioPlayback => {
            let callback = job.callback.clone();
            let active = job.active.clone();
            let session = job.session.clone();
            let format = job.format.sample_format();
            native.build_output_stream_raw(
                config,
                sample_format,
                move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                    let bytes = data.bytes_mut();
                    if !active.load(Ordering::SeqCst) {
                        fill_silence(bytes, format);
                        return;
                    }
                    let params = *lock(&session);
                    if callback.on_request_buffer(handle, bytes) == BufferFlow::Halt {
                        active.store(false, Ordering::SeqCst);
                    }
                    if params.mute {
                        fill_silence(bytes, format);
                    } else {
                        apply_gain(bytes, format, params.volume);
                    }
                },
                error_callback,
                None,
            )
        }
        StreamKind::VideoCapture => Err(cpal::BuildStreamError::InvalidArgument),
    }
}

fn run_worker(job: StreamJob, commands: Receiver<Command>, ready: Sender<AvResult<()>>) {
    let stream = match build_stream(&job) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    log::debug!("cpal stream {} built for {}", job.handle, job.device);

    for command in commands.iter() {
        match command {
            Command::Play(reply) => {
                job.active.store(true, Ordering::SeqCst);
                let result = stream
                    .play()
                    .map_err(|e| AvError::backend(format!("Failed to start stream: {e}")));
                if result.is_err() {
                    job.active.store(false, Ordering::SeqCst);
                }
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                job.active.store(false, Ordering::SeqCst);
                let result = stream
                    .pause()
                    .map_err(|e| AvError::backend(format!("Failed to stop stream: {e}")));
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }

    job.active.store(false, Ordering::SeqCst);
    drop(stream);
    log::debug!("cpal stream {} released", job.handle);
}

impl Backend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn list_devices(&self, category: MediaCategory, direction: Direction) -> AvResult<Vec<Device>> {
        match category {
            MediaCategory::Audio => Self::scan(direction),
            MediaCategory::Video => Ok(Vec::new()),
        }
    }

    fn default_device(&self, category: MediaCategory, direction: Direction) -> AvResult<Option<String>> {
        if category == MediaCategory::Video {
            return Ok(None);
        }
        let host = Self::host();
        let device = match direction {
            Direction::Capture => host.default_input_device(),
            Direction::Playback => host.default_output_device(),
        };
        Ok(device
            .and_then(|d| d.name().ok())
            .map(|name| descriptor_for(direction, &name)))
    }

    /// Polls the device list every `hotplug.poll_interval_ms` and reports
    /// the difference. The polling thread exits when the receiver is dropped.
    fn subscribe_hotplug(&self) -> AvResult<Receiver<RawHotplugEvent>> {
        fn snapshot() -> HashMap<String, Device> {
            let mut devices = HashMap::new();
            for direction in [Direction::Capture, Direction::Playback] {
                match CpalBackend::scan(direction) {
                    Ok(found) => devices.extend(found.into_iter().map(|d| (d.descriptor().to_string(), d))),
                    Err(e) => log::warn!("Hotplug scan failed: {}", e),
                }
            }
            devices
        }

        let (tx, rx) = unbounded();
        let interval = self.poll_interval;
        let mut known = snapshot();

        thread::Builder::new()
            .name("avhal-cpal-hotplug".to_string())
            .spawn(move || loop {
                thread::sleep(interval);
                let current = snapshot();

                for (descriptor, device) in &current {
                    if !known.contains_key(descriptor)
                        && tx.send(RawHotplugEvent::Connected(device.clone())).is_err()
                    {
                        return;
                    }
                }
                for (descriptor, device) in &known {
                    if !current.contains_key(descriptor)
                        && tx.send(RawHotplugEvent::Disconnected(device.clone())).is_err()
                    {
                        return;
                    }
                }
                known = current;
            })
            .map_err(|e| AvError::backend(format!("spawn failed: {e}")))?;

        log::info!("cpal hotplug polling every {:?}", interval);
        Ok(rx)
    }

    fn create_stream(
        &self,
        device: &Device,
        kind: StreamKind,
        format: &MediaFormat,
        callback: Arc<dyn StreamCallback>,
    ) -> AvResult<StreamHandle> {
        if kind == StreamKind::VideoCapture {
            return Err(AvError::format_unsupported("cpal has no video devices"));
        }
        Ok(self.streams.insert(CpalStream {
            device: device.clone(),
            kind,
            format: *format,
            session: Arc::new(Mutex::new(SessionParams::default())),
            callback,
            active: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }

    fn open_stream(&self, handle: StreamHandle, params: &SessionParams) -> AvResult<()> {
        self.streams.with(handle, |s| *lock(&s.session) = *params)?;
        self.spawn_worker(handle)
    }

    fn start_stream(&self, handle: StreamHandle) -> AvResult<()> {
        self.send(handle, Command::Play)
    }

    fn stop_stream(&self, handle: StreamHandle) -> AvResult<()> {
        self.streams
            .with(handle, |s| s.active.store(false, Ordering::SeqCst))?;
        self.send(handle, Command::Pause)
    }

    fn close_stream(&self, handle: StreamHandle) -> AvResult<()> {
        self.shutdown_worker(handle)
    }

    fn dispose_stream(&self, handle: StreamHandle) -> AvResult<()> {
        self.shutdown_worker(handle)?;
        self.streams.remove(handle)?;
        Ok(())
    }

    fn set_stream_format(&self, handle: StreamHandle, format: &MediaFormat) -> AvResult<()> {
        let audio = format
            .as_audio()
            .ok_or_else(|| AvError::format_unsupported("cpal streams carry audio only"))?;
        if to_cpal_sample_format(audio.sample_format()).is_none() {
            return Err(AvError::format_unsupported(format!(
                "{} is not supported by cpal",
                audio.sample_format()
            )));
        }

        let (previous, was_open) = self.streams.with(handle, |s| {
            let previous = std::mem::replace(&mut s.format, *format);
            (previous, s.worker.is_some())
        })?;
        if !was_open {
            return Ok(());
        }

        // The native stream is bound to its format; rebuild it.
        self.shutdown_worker(handle)?;
        if let Err(e) = self.spawn_worker(handle) {
            self.streams.with(handle, |s| s.format = previous)?;
            self.spawn_worker(handle)?;
            return Err(e);
        }
        Ok(())
    }

    fn update_session(&self, handle: StreamHandle, params: &SessionParams) -> AvResult<()> {
        self.streams.with(handle, |s| *lock(&s.session) = *params)
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        for handle in self.streams.find(|s| s.worker.is_some()) {
            let _ = self.shutdown_worker(handle);
        }
    }
}

//! In-memory backend
//!
//! Devices, controls and formats are plain data that tests and the CLI's
//! `--synthetic` mode can script. Devices can be plugged and unplugged at
//! runtime, failures can be injected, and started streams get a delivery
//! thread that produces (or consumes) synthetic media at a fixed interval.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Backend, BufferFlow, HandleArena, RawHotplugEvent, SessionParams, StreamCallback, StreamHandle};
use crate::config::AvConfig;
use crate::controls::{CameraControlType, Control, ControlKind, ControlType, PictureControlType};
use crate::errors::{AvError, AvResult};
use crate::format::{AudioFormat, MediaFormat, PictureFormat, PixelFormat, SampleFormat};
use crate::testing::{synthetic_audio_buffer, synthetic_picture_frame};
use crate::types::{Device, Direction, MediaCategory, StreamKind};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Failures the backend should simulate.
#[derive(Debug, Clone, Default)]
pub struct FailureInjection {
    /// Every enumeration call fails.
    pub fail_enumeration: bool,
    /// Every control query and write fails.
    pub fail_controls: bool,
    /// Formats refused by `open_stream` and `set_stream_format`.
    pub rejected_formats: Vec<MediaFormat>,
    /// `dispose_stream` fails and keeps the stream.
    pub fail_dispose: bool,
}

struct ControlSlot {
    descriptor: Control,
    value: i64,
    auto: bool,
}

#[derive(Default)]
struct Inventory {
    devices: Vec<Device>,
    defaults: HashMap<(MediaCategory, Direction), String>,
    controls: HashMap<String, Vec<ControlSlot>>,
    picture_formats: HashMap<String, Vec<PictureFormat>>,
}

impl Inventory {
    fn is_present(&self, device: &Device) -> bool {
        self.devices.iter().any(|d| d == device)
    }

    fn control_slot(&mut self, device: &Device, control: ControlType) -> AvResult<&mut ControlSlot> {
        self.controls
            .get_mut(device.descriptor())
            .and_then(|slots| slots.iter_mut().find(|s| s.descriptor.control_type() == control))
            .ok_or_else(|| AvError::control_access_failed(format!("{device} has no control {control}")))
    }
}

struct WorkerFlags {
    stop: AtomicBool,
    device_lost: AtomicBool,
}

struct Worker {
    flags: Arc<WorkerFlags>,
    thread: JoinHandle<()>,
}

struct SyntheticStream {
    device: Device,
    kind: StreamKind,
    format: MediaFormat,
    session: Arc<Mutex<SessionParams>>,
    callback: Arc<dyn StreamCallback>,
    opened: bool,
    rendered: Arc<AtomicU64>,
    worker: Option<Worker>,
}

/// Scriptable backend with no hardware behind it.
pub struct SyntheticBackend {
    interval: Duration,
    inventory: Mutex<Inventory>,
    streams: HandleArena<SyntheticStream>,
    subscribers: Mutex<Vec<Sender<RawHotplugEvent>>>,
    failures: Mutex<FailureInjection>,
}

impl SyntheticBackend {
    /// An empty backend. Add devices with [`SyntheticBackend::add_device`].
    pub fn new(config: &AvConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.synthetic.buffer_interval_ms),
            inventory: Mutex::new(Inventory::default()),
            streams: HandleArena::new(),
            subscribers: Mutex::new(Vec::new()),
            failures: Mutex::new(FailureInjection::default()),
        }
    }

    /// A backend with a microphone, a speaker and a camera with controls.
    pub fn with_demo_devices(config: &AvConfig) -> Self {
        let backend = Self::new(config);

        let cd = AudioFormat::cd_quality();
        let float = AudioFormat::new(SampleFormat::FLOAT32LE, 48_000, 2).unwrap_or(cd);
        let audio_formats: Vec<MediaFormat> = vec![cd.into(), float.into()];

        backend.add_device(
            Device::new("synthetic:mic0", "Synthetic Microphone", MediaCategory::Audio, Direction::Capture)
                .with_formats(audio_formats.clone()),
        );
        backend.add_device(
            Device::new("synthetic:speaker0", "Synthetic Speaker", MediaCategory::Audio, Direction::Playback)
                .with_formats(audio_formats),
        );

        let picture_formats: Vec<PictureFormat> = [
            (PixelFormat::YUYV, 640, 480),
            (PixelFormat::RGB24, 320, 240),
            (PixelFormat::MJPG, 1280, 720),
        ]
        .into_iter()
        .filter_map(|(pf, w, h)| PictureFormat::new(pf, w, h).ok())
        .collect();

        let camera = Device::new("synthetic:cam0", "Synthetic Camera", MediaCategory::Video, Direction::Capture)
            .with_formats(picture_formats.iter().copied().map(MediaFormat::from).collect());
        backend.set_picture_formats(&camera, picture_formats);
        backend.set_controls(&camera, demo_controls());
        backend.add_device(camera);

        backend
    }

    fn inventory(&self) -> MutexGuard<'_, Inventory> {
        lock(&self.inventory)
    }

    fn failures(&self) -> FailureInjection {
        lock(&self.failures).clone()
    }

    pub fn set_failures(&self, failures: FailureInjection) {
        *lock(&self.failures) = failures;
    }

    /// Plug a device in. Subscribers receive a connect event.
    ///
    /// Adding a device that is already present lists it twice.
    pub fn add_device(&self, device: Device) {
        {
            let mut inventory = self.inventory();
            if inventory.is_present(&device) {
                log::debug!("Synthetic device {} already present, listing it twice", device);
            }
            inventory.devices.push(device.clone());
        }
        log::debug!("Synthetic device added: {}", device);
        self.publish(RawHotplugEvent::Connected(device));
    }

    /// Unplug a device. Subscribers receive a disconnect event and streams
    /// running on it end.
    pub fn remove_device(&self, descriptor: &str) -> AvResult<Device> {
        let device = {
            let mut inventory = self.inventory();
            let index = inventory
                .devices
                .iter()
                .position(|d| d.descriptor() == descriptor)
                .ok_or_else(|| AvError::not_found("device", descriptor))?;
            inventory.devices.remove(index)
        };

        for handle in self.streams.find(|s| s.device == device) {
            let _ = self.streams.with(handle, |s| {
                if let Some(worker) = &s.worker {
                    worker.flags.device_lost.store(true, Ordering::SeqCst);
                }
            });
        }

        log::debug!("Synthetic device removed: {}", device);
        self.publish(RawHotplugEvent::Disconnected(device.clone()));
        Ok(device)
    }

    pub fn set_default_device(&self, category: MediaCategory, direction: Direction, descriptor: &str) {
        self.inventory()
            .defaults
            .insert((category, direction), descriptor.to_string());
    }

    /// Replace the control descriptors of `device`; current values start at
    /// each control's default.
    pub fn set_controls(&self, device: &Device, controls: Vec<Control>) {
        let slots = controls
            .into_iter()
            .map(|descriptor| ControlSlot {
                value: descriptor.default_value(),
                auto: false,
                descriptor,
            })
            .collect();
        self.inventory()
            .controls
            .insert(device.descriptor().to_string(), slots);
    }

    pub fn set_picture_formats(&self, device: &Device, formats: Vec<PictureFormat>) {
        self.inventory()
            .picture_formats
            .insert(device.descriptor().to_string(), formats);
    }

    /// Session parameters last pushed for `handle`.
    pub fn session_params(&self, handle: StreamHandle) -> AvResult<SessionParams> {
        self.streams.with(handle, |s| *lock(&s.session))
    }

    /// Bytes pulled from the playback path of `handle` so far.
    pub fn rendered_bytes(&self, handle: StreamHandle) -> AvResult<u64> {
        self.streams
            .with(handle, |s| s.rendered.load(Ordering::SeqCst))
    }

    pub fn is_delivering(&self, handle: StreamHandle) -> bool {
        self.streams
            .with(handle, |s| {
                s.worker
                    .as_ref()
                    .is_some_and(|w| !w.thread.is_finished())
            })
            .unwrap_or(false)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn publish(&self, event: RawHotplugEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn check_format(&self, format: &MediaFormat) -> AvResult<()> {
        if self.failures().rejected_formats.contains(format) {
            return Err(AvError::format_unsupported(format!("{format} rejected by device")));
        }
        Ok(())
    }

    fn check_controls(&self) -> AvResult<()> {
        if self.failures().fail_controls {
            return Err(AvError::backend("injected control failure"));
        }
        Ok(())
    }

    fn join_worker(&self, handle: StreamHandle) -> AvResult<()> {
        let worker = self.streams.with(handle, |s| s.worker.take())?;
        if let Some(worker) = worker {
            worker.flags.stop.store(true, Ordering::SeqCst);
            if worker.thread.join().is_err() {
                log::error!("Synthetic delivery thread for {} panicked", handle);
            }
        }
        Ok(())
    }
}

fn demo_controls() -> Vec<Control> {
    let picture = [
        (PictureControlType::Brightness, -64, 64, 1, 0, false),
        (PictureControlType::Contrast, 0, 100, 1, 50, false),
        (PictureControlType::Saturation, 0, 100, 1, 64, false),
        (PictureControlType::Gain, 0, 100, 1, 32, true),
        (PictureControlType::WhiteBalance, 2800, 6500, 10, 4600, true),
        (PictureControlType::PowerLineFrequency, 0, 2, 1, 1, false),
    ]
    .map(|(t, min, max, step, default, auto)| Control::new(t, min, max, step, default, auto));

    let camera = [
        (CameraControlType::Exposure, -11, -2, 1, -6, true),
        (CameraControlType::Focus, 0, 1023, 1, 0, true),
        (CameraControlType::Zoom, 100, 400, 10, 100, false),
        (CameraControlType::Pan, -180, 180, 1, 0, false),
        (CameraControlType::Tilt, -90, 90, 1, 0, false),
    ]
    .map(|(t, min, max, step, default, auto)| Control::new(t, min, max, step, default, auto));

    picture
        .into_iter()
        .chain(camera)
        .filter_map(|control| control.ok())
        .collect()
}

impl Backend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn list_devices(&self, category: MediaCategory, direction: Direction) -> AvResult<Vec<Device>> {
        if self.failures().fail_enumeration {
            return Err(AvError::backend("injected enumeration failure"));
        }
        Ok(self
            .inventory()
            .devices
            .iter()
            .filter(|d| d.category() == category && d.direction() == direction)
            .cloned()
            .collect())
    }

    fn default_device(&self, category: MediaCategory, direction: Direction) -> AvResult<Option<String>> {
        if self.failures().fail_enumeration {
            return Err(AvError::backend("injected enumeration failure"));
        }
        let inventory = self.inventory();
        if let Some(descriptor) = inventory.defaults.get(&(category, direction)) {
            return Ok(Some(descriptor.clone()));
        }
        Ok(inventory
            .devices
            .iter()
            .find(|d| d.category() == category && d.direction() == direction)
            .map(|d| d.descriptor().to_string()))
    }

    fn subscribe_hotplug(&self) -> AvResult<Receiver<RawHotplugEvent>> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers).push(tx);
        Ok(rx)
    }

    fn picture_formats(&self, device: &Device) -> AvResult<Vec<PictureFormat>> {
        Ok(self
            .inventory()
            .picture_formats
            .get(device.descriptor())
            .cloned()
            .unwrap_or_default())
    }

    fn controls(&self, device: &Device, kind: ControlKind) -> AvResult<Vec<Control>> {
        self.check_controls()?;
        Ok(self
            .inventory()
            .controls
            .get(device.descriptor())
            .map(|slots| {
                slots
                    .iter()
                    .map(|s| s.descriptor)
                    .filter(|c| c.kind() == kind)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn control_value(&self, device: &Device, control: ControlType) -> AvResult<i64> {
        self.check_controls()?;
        Ok(self.inventory().control_slot(device, control)?.value)
    }

    fn set_control_value(&self, device: &Device, control: ControlType, value: i64) -> AvResult<()> {
        self.check_controls()?;
        self.inventory().control_slot(device, control)?.value = value;
        Ok(())
    }

    fn control_auto_mode(&self, device: &Device, control: ControlType) -> AvResult<bool> {
        self.check_controls()?;
        Ok(self.inventory().control_slot(device, control)?.auto)
    }

    fn set_control_auto_mode(&self, device: &Device, control: ControlType, auto: bool) -> AvResult<()> {
        self.check_controls()?;
        let mut inventory = self.inventory();
        let slot = inventory.control_slot(device, control)?;
        if auto && !slot.descriptor.has_auto_mode() {
            return Err(AvError::control_access_failed(format!("{control} has no auto mode")));
        }
        slot.auto = auto;
        Ok(())
    }

    fn create_stream(
        &self,
        device: &Device,
        kind: StreamKind,
        format: &MediaFormat,
        callback: Arc<dyn StreamCallback>,
    ) -> AvResult<StreamHandle> {
        let handle = self.streams.insert(SyntheticStream {
            device: device.clone(),
            kind,
            format: *format,
            session: Arc::new(Mutex::new(SessionParams::default())),
            callback,
            opened: false,
            rendered: Arc::new(AtomicU64::new(0)),
            worker: None,
        });
        log::debug!("Synthetic stream {} created for {}", handle, device);
        Ok(handle)
    }

    fn open_stream(&self, handle: StreamHandle, params: &SessionParams) -> AvResult<()> {
        let (device, format) = self.streams.with(handle, |s| (s.device.clone(), s.format))?;
        if !self.inventory().is_present(&device) {
            return Err(AvError::device_unavailable(format!("{device} is not connected")));
        }
        self.check_format(&format)?;
        self.streams.with(handle, |s| {
            s.opened = true;
            *lock(&s.session) = *params;
        })
    }

    fn start_stream(&self, handle: StreamHandle) -> AvResult<()> {
        let device = self.streams.with(handle, |s| s.device.clone())?;
        if !self.inventory().is_present(&device) {
            return Err(AvError::device_unavailable(format!("{device} is not connected")));
        }

        // A previous run may have ended on its own.
        self.join_worker(handle)?;

        let interval = self.interval;
        self.streams.with(handle, |s| {
            if !s.opened {
                return Err(AvError::illegal_state(format!("stream {handle} is not open")));
            }
            let flags = Arc::new(WorkerFlags {
                stop: AtomicBool::new(false),
                device_lost: AtomicBool::new(false),
            });
            let job = DeliveryJob {
                handle,
                kind: s.kind,
                format: s.format,
                session: s.session.clone(),
                callback: s.callback.clone(),
                rendered: s.rendered.clone(),
                flags: flags.clone(),
                interval,
            };
            let thread = thread::Builder::new()
                .name(format!("avhal-synthetic-{}", handle.0))
                .spawn(move || job.run())
                .map_err(|e| AvError::backend(format!("spawn failed: {e}")))?;
            s.worker = Some(Worker { flags, thread });
            Ok(())
        })?
    }

    fn stop_stream(&self, handle: StreamHandle) -> AvResult<()> {
        self.join_worker(handle)
    }

    fn close_stream(&self, handle: StreamHandle) -> AvResult<()> {
        self.join_worker(handle)?;
        self.streams.with(handle, |s| s.opened = false)
    }

    fn dispose_stream(&self, handle: StreamHandle) -> AvResult<()> {
        if self.failures().fail_dispose {
            return Err(AvError::backend("injected dispose failure"));
        }
        self.join_worker(handle)?;
        self.streams.remove(handle)?;
        log::debug!("Synthetic stream {} disposed", handle);
        Ok(())
    }

    fn set_stream_format(&self, handle: StreamHandle, format: &MediaFormat) -> AvResult<()> {
        self.check_format(format)?;
        self.streams.with(handle, |s| s.format = *format)
    }

    fn update_session(&self, handle: StreamHandle, params: &SessionParams) -> AvResult<()> {
        self.streams.with(handle, |s| *lock(&s.session) = *params)
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        for handle in self.streams.find(|s| s.worker.is_some()) {
            let _ = self.join_worker(handle);
        }
    }
}

/// Everything a delivery thread needs, detached from the arena.
struct DeliveryJob {
    handle: StreamHandle,
    kind: StreamKind,
    format: MediaFormat,
    session: Arc<Mutex<SessionParams>>,
    callback: Arc<dyn StreamCallback>,
    rendered: Arc<AtomicU64>,
    flags: Arc<WorkerFlags>,
    interval: Duration,
}

impl DeliveryJob {
    fn run(self) {
        log::debug!("Synthetic delivery for {} started", self.handle);
        let mut sequence: u64 = 0;
        let mut frame_cursor: u64 = 0;

        loop {
            if self.flags.stop.load(Ordering::SeqCst) {
                break;
            }
            if self.flags.device_lost.load(Ordering::SeqCst) {
                self.callback.on_ended(self.handle, "device removed");
                break;
            }

            let params = *lock(&self.session);
            let size = self.format.buffer_size(params.buffer_latency_ms);

            let flow = match (self.kind, &self.format) {
                (StreamKind::AudioCapture, MediaFormat::Audio(format)) => {
                    let Some(frames) = size.checked_div(format.bytes_per_frame()) else {
                        self.callback.on_ended(self.handle, "degenerate audio format");
                        break;
                    };
                    let data = synthetic_audio_buffer(format, frame_cursor, frames);
                    frame_cursor += frames as u64;
                    self.callback.on_buffer(self.handle, &data)
                }
                (StreamKind::VideoCapture, MediaFormat::Picture(format)) => {
                    let data = synthetic_picture_frame(format, sequence);
                    self.callback.on_buffer(self.handle, &data)
                }
                (StreamKind::AudioPlayback, MediaFormat::Audio(_)) => {
                    let mut buffer = vec![0u8; size];
                    let flow = self.callback.on_request_buffer(self.handle, &mut buffer);
                    if flow == BufferFlow::Continue {
                        self.rendered.fetch_add(size as u64, Ordering::SeqCst);
                    }
                    flow
                }
                (kind, format) => {
                    log::error!("Synthetic stream {} has {:?} with {}", self.handle, kind, format);
                    BufferFlow::Halt
                }
            };

            if flow == BufferFlow::Halt {
                break;
            }
            sequence += 1;

            if self.interval.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.interval);
            }
        }
        log::debug!("Synthetic delivery for {} ended after {} buffer(s)", self.handle, sequence);
    }
}

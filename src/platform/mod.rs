//! Backend capability contract
//!
//! A [`Backend`] is whatever native layer actually talks to hardware. The
//! core never reaches past this trait: enumeration, hotplug, control I/O and
//! stream resources all go through it. Stream resources are addressed by
//! integer [`StreamHandle`]s into a [`HandleArena`] owned by the backend.

pub mod synthetic;

#[cfg(feature = "audio")]
pub mod cpal_backend;

pub use synthetic::SyntheticBackend;

#[cfg(feature = "audio")]
pub use cpal_backend::CpalBackend;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::AvConfig;
use crate::controls::{Control, ControlKind, ControlType};
use crate::errors::{AvError, AvResult};
use crate::format::{MediaFormat, PictureFormat};
use crate::types::{Device, Direction, MediaCategory, StreamKind};

/// Opaque id of a backend stream resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamHandle(pub u64);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hotplug transition as pushed by a backend. Both sides carry the device
/// so that devices without a descriptor can be matched by name.
#[derive(Debug, Clone, PartialEq)]
pub enum RawHotplugEvent {
    Connected(Device),
    Disconnected(Device),
}

/// Whether the backend should keep delivering buffers after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFlow {
    Continue,
    Halt,
}

/// Session settings pushed to the backend on open and whenever they change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub buffer_latency_ms: u32,
    pub volume: f32,
    pub mute: bool,
    pub frame_rate: Option<f32>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            buffer_latency_ms: 20,
            volume: 1.0,
            mute: false,
            frame_rate: None,
        }
    }
}

/// Callbacks the core hands to a backend for one stream.
///
/// A backend invokes these from its own delivery thread, one at a time.
pub trait StreamCallback: Send + Sync {
    /// A capture buffer is ready. `data` is only valid for this call.
    fn on_buffer(&self, handle: StreamHandle, data: &[u8]) -> BufferFlow;

    /// The playback path needs `buffer` filled.
    fn on_request_buffer(&self, handle: StreamHandle, buffer: &mut [u8]) -> BufferFlow;

    /// The backend terminated delivery on its own, e.g. the device was removed.
    fn on_ended(&self, handle: StreamHandle, reason: &str);
}

/// Native capability provider.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Devices currently present, in backend order. "No devices" is `Ok(vec![])`.
    fn list_devices(&self, category: MediaCategory, direction: Direction) -> AvResult<Vec<Device>>;

    /// Descriptor of the system default device, if there is one.
    fn default_device(&self, category: MediaCategory, direction: Direction) -> AvResult<Option<String>>;

    /// Push channel of connect/disconnect transitions. The backend stops
    /// producing once the receiver is dropped.
    fn subscribe_hotplug(&self) -> AvResult<Receiver<RawHotplugEvent>>;

    fn picture_formats(&self, _device: &Device) -> AvResult<Vec<PictureFormat>> {
        Ok(Vec::new())
    }

    fn controls(&self, _device: &Device, _kind: ControlKind) -> AvResult<Vec<Control>> {
        Ok(Vec::new())
    }

    fn control_value(&self, device: &Device, control: ControlType) -> AvResult<i64> {
        Err(unsupported_control(self.name(), device, control))
    }

    fn set_control_value(&self, device: &Device, control: ControlType, _value: i64) -> AvResult<()> {
        Err(unsupported_control(self.name(), device, control))
    }

    fn control_auto_mode(&self, device: &Device, control: ControlType) -> AvResult<bool> {
        Err(unsupported_control(self.name(), device, control))
    }

    fn set_control_auto_mode(&self, device: &Device, control: ControlType, _auto: bool) -> AvResult<()> {
        Err(unsupported_control(self.name(), device, control))
    }

    /// Allocate a stream resource bound to `device`. Nothing is acquired
    /// from the hardware until [`Backend::open_stream`].
    fn create_stream(
        &self,
        device: &Device,
        kind: StreamKind,
        format: &MediaFormat,
        callback: Arc<dyn StreamCallback>,
    ) -> AvResult<StreamHandle>;

    fn open_stream(&self, handle: StreamHandle, params: &SessionParams) -> AvResult<()>;

    fn start_stream(&self, handle: StreamHandle) -> AvResult<()>;

    /// Halt delivery. Must not return while a callback for `handle` is running.
    fn stop_stream(&self, handle: StreamHandle) -> AvResult<()>;

    fn close_stream(&self, handle: StreamHandle) -> AvResult<()>;

    fn dispose_stream(&self, handle: StreamHandle) -> AvResult<()>;

    fn set_stream_format(&self, handle: StreamHandle, format: &MediaFormat) -> AvResult<()>;

    fn update_session(&self, _handle: StreamHandle, _params: &SessionParams) -> AvResult<()> {
        Ok(())
    }
}

fn unsupported_control(backend: &str, device: &Device, control: ControlType) -> AvError {
    AvError::control_access_failed(format!(
        "{backend} backend has no control {control} on {device}"
    ))
}

/// Integer-indexed store of backend resources.
pub struct HandleArena<T> {
    entries: Mutex<HashMap<StreamHandle, T>>,
    next_id: AtomicU64,
}

impl<T> HandleArena<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamHandle, T>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, value: T) -> StreamHandle {
        let handle = StreamHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(handle, value);
        handle
    }

    /// Run `f` on the entry. The arena stays locked for the duration, so `f`
    /// must not block on anything that calls back into the arena.
    pub fn with<R>(&self, handle: StreamHandle, f: impl FnOnce(&mut T) -> R) -> AvResult<R> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(&handle)
            .ok_or_else(|| AvError::illegal_state(format!("unknown stream handle {handle}")))?;
        Ok(f(entry))
    }

    pub fn remove(&self, handle: StreamHandle) -> AvResult<T> {
        self.lock()
            .remove(&handle)
            .ok_or_else(|| AvError::illegal_state(format!("unknown stream handle {handle}")))
    }

    pub fn contains(&self, handle: StreamHandle) -> bool {
        self.lock().contains_key(&handle)
    }

    /// Handles whose entry matches `predicate`.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Vec<StreamHandle> {
        self.lock()
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The native backend compiled into this build.
pub fn default_backend(config: &AvConfig) -> AvResult<Arc<dyn Backend>> {
    #[cfg(feature = "audio")]
    {
        log::info!("Using cpal audio backend");
        Ok(Arc::new(CpalBackend::new(config)))
    }

    #[cfg(not(feature = "audio"))]
    {
        let _ = config;
        Err(AvError::backend(
            "no native backend compiled in; enable the `audio` feature or use SyntheticBackend",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_hands_out_distinct_handles() {
        let arena = HandleArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.with(a, |v| *v).unwrap(), "a");
    }

    #[test]
    fn test_arena_remove_then_lookup_fails() {
        let arena = HandleArena::new();
        let handle = arena.insert(7u32);
        assert_eq!(arena.remove(handle).unwrap(), 7);
        assert!(arena.with(handle, |_| ()).is_err());
        assert!(arena.remove(handle).is_err());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_arena_find() {
        let arena = HandleArena::new();
        let even = arena.insert(2);
        arena.insert(3);
        assert_eq!(arena.find(|v| v % 2 == 0), vec![even]);
    }
}

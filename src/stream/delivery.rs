//! Glue between a backend delivery thread and the application endpoint.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::io::{AudioSessionListener, CaptureSink, PlaybackSource, StreamListener};
use super::state::StreamState;
use crate::errors::AvError;
use crate::platform::{BufferFlow, StreamCallback, StreamHandle};
use crate::types::Device;

pub(crate) enum Endpoint {
    Capture(Box<dyn CaptureSink>),
    Playback(Box<dyn PlaybackSource>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between a `Stream` and its backend callback.
pub(crate) struct Shared {
    pub device: Device,
    state: Mutex<StreamState>,
    endpoint: Mutex<Endpoint>,
    /// Cleared before the backend is asked to stop; buffers arriving after
    /// that are refused.
    accepting: AtomicBool,
    /// Delivery ended from the callback side, the backend still has to be
    /// told to stop.
    halted: AtomicBool,
    position: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn StreamListener>>>,
    session_listeners: RwLock<Vec<Arc<dyn AudioSessionListener>>>,
}

impl Shared {
    pub fn new(device: Device, endpoint: Endpoint) -> Self {
        Self {
            device,
            state: Mutex::new(StreamState::Closed),
            endpoint: Mutex::new(endpoint),
            accepting: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            position: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            session_listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> StreamState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: StreamState) {
        *lock(&self.state) = state;
    }

    /// Move from `from` to `to`. Returns false if the stream was elsewhere.
    pub fn transition(&self, from: StreamState, to: StreamState) -> bool {
        let mut state = lock(&self.state);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn take_halted(&self) -> bool {
        self.halted.swap(false, Ordering::SeqCst)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Wait until no sink or source call is in progress.
    pub fn drain(&self) {
        drop(lock(&self.endpoint));
    }

    pub fn add_listener(&self, listener: Arc<dyn StreamListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StreamListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_session_listener(&self, listener: Arc<dyn AudioSessionListener>) {
        self.session_listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    pub fn remove_session_listener(&self, listener: &Arc<dyn AudioSessionListener>) {
        self.session_listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn notify(&self, event: &str, f: impl Fn(&dyn StreamListener)) {
        let snapshot = self
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                log::error!("Stream listener panicked in {} for {}", event, self.device);
            }
        }
    }

    pub fn notify_volume(&self, volume: f32, mute: bool) {
        let snapshot = self
            .session_listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener.volume_changed(volume, mute))).is_err() {
                log::error!("Audio session listener panicked for {}", self.device);
            }
        }
    }

    fn fail(&self, handle: StreamHandle, error: AvError) {
        log::error!("Stream {} on {} failed: {}", handle, self.device, error);
        self.accepting.store(false, Ordering::SeqCst);
        self.halted.store(true, Ordering::SeqCst);
        self.notify("stream_error", |l| l.stream_error(&self.device, &error));
        if self.transition(StreamState::Started, StreamState::Stopped) {
            self.notify("stream_ended", |l| l.stream_ended(&self.device));
        }
    }
}

/// [`StreamCallback`] handed to the backend for one stream.
pub(crate) struct DeliveryBridge {
    shared: Arc<Shared>,
}

impl DeliveryBridge {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl StreamCallback for DeliveryBridge {
    fn on_buffer(&self, handle: StreamHandle, data: &[u8]) -> BufferFlow {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return BufferFlow::Halt;
        }

        let mut endpoint = lock(&self.shared.endpoint);
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return BufferFlow::Halt;
        }
        let Endpoint::Capture(sink) = &mut *endpoint else {
            log::warn!("Stream {} is a playback stream, dropping captured buffer", handle);
            return BufferFlow::Halt;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.write(data, data.len())));
        drop(endpoint);

        match outcome {
            Ok(Ok(())) => {
                self.shared
                    .position
                    .fetch_add(data.len() as u64, Ordering::SeqCst);
                BufferFlow::Continue
            }
            Ok(Err(e)) => {
                self.shared
                    .fail(handle, AvError::backend(format!("capture sink failed: {e:#}")));
                BufferFlow::Halt
            }
            Err(_) => {
                self.shared
                    .fail(handle, AvError::backend("capture sink panicked"));
                BufferFlow::Halt
            }
        }
    }

    fn on_request_buffer(&self, handle: StreamHandle, buffer: &mut [u8]) -> BufferFlow {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            buffer.fill(0);
            return BufferFlow::Halt;
        }

        let mut endpoint = lock(&self.shared.endpoint);
        if !self.shared.accepting.load(Ordering::SeqCst) {
            buffer.fill(0);
            return BufferFlow::Halt;
        }
        let Endpoint::Playback(source) = &mut *endpoint else {
            log::warn!("Stream {} is a capture stream, cannot fill playback buffer", handle);
            buffer.fill(0);
            return BufferFlow::Halt;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| source.read(buffer)));
        drop(endpoint);

        match outcome {
            Ok(Ok(filled)) => {
                let filled = filled.min(buffer.len());
                buffer[filled..].fill(0);
                self.shared
                    .position
                    .fetch_add(buffer.len() as u64, Ordering::SeqCst);
                BufferFlow::Continue
            }
            Ok(Err(e)) => {
                buffer.fill(0);
                self.shared
                    .fail(handle, AvError::backend(format!("playback source failed: {e:#}")));
                BufferFlow::Halt
            }
            Err(_) => {
                buffer.fill(0);
                self.shared
                    .fail(handle, AvError::backend("playback source panicked"));
                BufferFlow::Halt
            }
        }
    }

    fn on_ended(&self, handle: StreamHandle, reason: &str) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        self.shared.halted.store(true, Ordering::SeqCst);
        if self
            .shared
            .transition(StreamState::Started, StreamState::Stopped)
        {
            log::info!("Stream {} on {} ended: {}", handle, self.shared.device, reason);
            self.shared
                .notify("stream_ended", |l| l.stream_ended(&self.shared.device));
        }
    }
}

//! Library context
//!
//! [`AvContext`] owns the backend, the device registry and the hotplug watch
//! thread, and creates streams with the configured session defaults. There
//! are no process-wide managers: independent contexts can coexist, e.g. one
//! per test.

use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::AvConfig;
use crate::errors::{AvError, AvResult};
use crate::format::{AudioFormat, PictureFormat};
use crate::platform::{self, Backend, SessionParams};
use crate::registry::DeviceRegistry;
use crate::stream::{CaptureSink, PlaybackSource, Stream};
use crate::types::Device;

struct HotplugWatch {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct AvContext {
    config: AvConfig,
    registry: Arc<DeviceRegistry>,
    watch: Mutex<Option<HotplugWatch>>,
}

impl AvContext {
    /// Build a context over `backend`. The hotplug watch starts right away
    /// when `config.hotplug.enabled` is set.
    pub fn new(backend: Arc<dyn Backend>, config: AvConfig) -> AvResult<Self> {
        log::info!("Initializing avhal context with {} backend", backend.name());
        let context = Self {
            config,
            registry: Arc::new(DeviceRegistry::new(backend)),
            watch: Mutex::new(None),
        };
        if context.config.hotplug.enabled {
            context.start_hotplug_watch()?;
        }
        Ok(context)
    }

    /// Context over the native backend compiled into this build.
    pub fn with_default_backend(config: AvConfig) -> AvResult<Self> {
        let backend = platform::default_backend(&config)?;
        Self::new(backend, config)
    }

    pub fn config(&self) -> &AvConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.registry.backend()
    }

    pub fn is_watching_hotplug(&self) -> bool {
        self.watch
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Subscribe to backend hotplug events and forward them to the registry
    /// on a dedicated thread. Calling it while already watching is a no-op.
    pub fn start_hotplug_watch(&self) -> AvResult<()> {
        let mut watch = self.watch.lock().unwrap_or_else(|p| p.into_inner());
        if watch.is_some() {
            return Ok(());
        }

        let events = self.registry.backend().subscribe_hotplug()?;
        self.registry.seed_presence()?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let registry = self.registry.clone();
        let poll = Duration::from_millis(self.config.hotplug.poll_interval_ms);

        let thread = thread::Builder::new()
            .name("avhal-hotplug".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    match events.recv_timeout(poll) {
                        Ok(event) => {
                            registry.handle_raw_event(event);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            log::warn!("Backend closed the hotplug channel");
                            break;
                        }
                    }
                }
                log::debug!("Hotplug watch thread exiting");
            })
            .map_err(|e| AvError::backend(format!("spawn failed: {e}")))?;

        log::info!("Hotplug watch started");
        *watch = Some(HotplugWatch { stop, thread });
        Ok(())
    }

    /// Stop the watch thread and wait for it. Events already being delivered
    /// finish first.
    pub fn stop_hotplug_watch(&self) {
        let watch = self
            .watch
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(watch) = watch {
            watch.stop.store(true, Ordering::SeqCst);
            if watch.thread.join().is_err() {
                log::error!("Hotplug watch thread panicked");
            }
            log::info!("Hotplug watch stopped");
        }
    }

    fn session_defaults(&self) -> SessionParams {
        SessionParams {
            buffer_latency_ms: self.config.stream.default_buffer_latency_ms,
            volume: self.config.stream.default_volume,
            mute: false,
            frame_rate: None,
        }
    }

    pub fn audio_capture_stream(
        &self,
        device: &Device,
        format: AudioFormat,
        sink: impl CaptureSink + 'static,
    ) -> AvResult<Stream> {
        Stream::audio_capture(
            self.registry.clone(),
            device.clone(),
            format,
            self.session_defaults(),
            sink,
        )
    }

    pub fn audio_playback_stream(
        &self,
        device: &Device,
        format: AudioFormat,
        source: impl PlaybackSource + 'static,
    ) -> AvResult<Stream> {
        Stream::audio_playback(
            self.registry.clone(),
            device.clone(),
            format,
            self.session_defaults(),
            source,
        )
    }

    pub fn video_capture_stream(
        &self,
        device: &Device,
        format: PictureFormat,
        sink: impl CaptureSink + 'static,
    ) -> AvResult<Stream> {
        Stream::video_capture(
            self.registry.clone(),
            device.clone(),
            format,
            self.session_defaults(),
            sink,
        )
    }
}

impl Drop for AvContext {
    fn drop(&mut self) {
        self.stop_hotplug_watch();
    }
}

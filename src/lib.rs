//! avhal: cross-platform audio/video hardware abstraction
//!
//! This crate puts heterogeneous native capture and playback subsystems
//! behind one device model.
//!
//! # Features
//! - Device enumeration per media category and direction, with defaults
//! - Hotplug notification that stays consistent while devices come and go
//! - Typed camera and picture controls with range and auto-mode semantics
//! - Audio sample format and FourCC pixel format catalog
//! - Stream lifecycle (open/start/stop/close/dispose) with callback delivery
//! - A scriptable synthetic backend for offline testing
//! - Audio capture and playback over cpal (`audio` feature)
//!
//! # Usage
//! ```rust,no_run
//! use avhal::{AvConfig, AvContext, MediaCategory, SyntheticBackend};
//! use std::sync::Arc;
//!
//! let config = AvConfig::default();
//! let backend = Arc::new(SyntheticBackend::with_demo_devices(&config));
//! let context = AvContext::new(backend, config).unwrap();
//!
//! let mic = context
//!     .registry()
//!     .default_capture_device(MediaCategory::Audio)
//!     .unwrap();
//! let mut stream = context
//!     .audio_capture_stream(&mic, avhal::AudioFormat::cd_quality(), |data: &[u8], len: usize| -> anyhow::Result<()> {
//!         println!("{} bytes ({})", len, data.len());
//!         Ok(())
//!     })
//!     .unwrap();
//! stream.open().unwrap();
//! stream.start().unwrap();
//! stream.stop().unwrap();
//! ```
pub mod config;
pub mod context;
pub mod controls;
pub mod errors;
pub mod format;
pub mod hotplug;
pub mod platform;
pub mod registry;
pub mod stream;
pub mod types;

// Testing utilities - synthetic data for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::AvConfig;
pub use context::AvContext;
pub use controls::{CameraControlType, Control, ControlKind, ControlType, PictureControlType};
pub use errors::{AvError, AvErrorKind, AvResult};
pub use format::{AudioFormat, MediaFormat, PictureFormat, PixelFormat, SampleFormat};
pub use hotplug::{HotplugListener, HotplugNotifier};
pub use platform::{Backend, StreamHandle, SyntheticBackend};
pub use registry::DeviceRegistry;
pub use stream::{
    AudioSessionListener, CaptureSink, PlaybackSource, Stream, StreamListener, StreamState,
};
pub use types::{Device, Direction, HotplugEvent, HotplugEventKind, MediaCategory, Platform, StreamKind};

#[cfg(feature = "audio")]
pub use platform::CpalBackend;

/// Detect the current platform using the Platform enum
pub fn current_platform() -> Platform {
    Platform::current()
}

/// Initialize logging for avhal
pub fn init_logging() {
    init_logging_with(&config::LoggingConfig::default().level);
}

/// Initialize logging with a fallback filter used when `RUST_LOG` is unset
pub fn init_logging_with(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        platform: Platform::current(),
        audio_backend: cfg!(feature = "audio"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platform: Platform,
    pub audio_backend: bool,
}

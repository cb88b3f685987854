//! Core value types shared by the registry, hotplug and stream layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::format::MediaFormat;

/// Host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOS => "macos",
            Platform::Linux => "linux",
            Platform::Unknown => "unknown",
        }
    }
}

/// Media a device handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaCategory {
    Audio,
    Video,
}

/// Whether a device produces (capture) or consumes (playback) media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Capture,
    Playback,
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaCategory::Audio => f.write_str("audio"),
            MediaCategory::Video => f.write_str("video"),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Playback => f.write_str("playback"),
        }
    }
}

/// A capture or playback device as reported by a backend.
///
/// Devices are immutable. Identity follows [`Device::same_identity`]: the
/// descriptor decides when both sides carry one, the name decides when
/// neither does, and a device with a descriptor never equals one without.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    descriptor: String,
    name: String,
    category: MediaCategory,
    direction: Direction,
    formats: Vec<MediaFormat>,
}

impl Device {
    pub fn new(
        descriptor: impl Into<String>,
        name: impl Into<String>,
        category: MediaCategory,
        direction: Direction,
    ) -> Self {
        Self {
            descriptor: descriptor.into(),
            name: name.into(),
            category,
            direction,
            formats: Vec::new(),
        }
    }

    pub fn with_formats(mut self, formats: Vec<MediaFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> MediaCategory {
        self.category
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Formats the backend advertised when the device was enumerated.
    pub fn formats(&self) -> &[MediaFormat] {
        &self.formats
    }

    /// Canonical identity rule.
    pub fn same_identity(&self, other: &Device) -> bool {
        match (self.descriptor.is_empty(), other.descriptor.is_empty()) {
            (false, false) => self.descriptor == other.descriptor,
            (true, true) => self.name == other.name,
            _ => false,
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.descriptor.is_empty() {
            false.hash(state);
            self.name.hash(state);
        } else {
            true.hash(state);
            self.descriptor.hash(state);
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ID: {})", self.name, self.descriptor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotplugEventKind {
    Connected,
    Disconnected,
}

/// A physical connect or disconnect, as delivered to hotplug listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotplugEvent {
    pub kind: HotplugEventKind,
    pub device: Device,
    pub occurred_at: DateTime<Utc>,
}

impl HotplugEvent {
    pub fn new(kind: HotplugEventKind, device: Device) -> Self {
        Self {
            kind,
            device,
            occurred_at: Utc::now(),
        }
    }
}

/// The three stream shapes a backend can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    AudioCapture,
    AudioPlayback,
    VideoCapture,
}

impl StreamKind {
    pub fn category(&self) -> MediaCategory {
        match self {
            StreamKind::AudioCapture | StreamKind::AudioPlayback => MediaCategory::Audio,
            StreamKind::VideoCapture => MediaCategory::Video,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            StreamKind::AudioCapture | StreamKind::VideoCapture => Direction::Capture,
            StreamKind::AudioPlayback => Direction::Playback,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.category() == MediaCategory::Audio
    }
}

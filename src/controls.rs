//! Range-control model
//!
//! Camera and picture controls share one descriptor shape: a signed 64 bit
//! range with step, default value and an optional auto mode. The control
//! type is a tagged enum selecting one of two static name tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{AvError, AvResult};

/// Picture (image processing) controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PictureControlType {
    BacklightCompensation,
    Brightness,
    ColorEnable,
    Contrast,
    DigitalMultiplier,
    DigitalMultiplierLimit,
    Exposure,
    Gain,
    Gamma,
    Hue,
    PowerLineFrequency,
    Saturation,
    Sharpness,
    WhiteBalance,
    WhiteBalanceComponent,
    /// Sentinel reported for controls a backend exposes but cannot map.
    /// Callers are expected to filter it out.
    NotImplemented,
}

/// Camera (optics and mechanics) controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraControlType {
    AutoExposurePriority,
    Exposure,
    ExposureRelative,
    FocalLength,
    Focus,
    FocusRelative,
    Iris,
    IrisRelative,
    JpegActiveMarker,
    JpegChromaSubsampling,
    JpegCompressionQuality,
    JpegRestartInterval,
    LedFrequency,
    LedMode,
    Pan,
    PanRelative,
    PanTilt,
    PanTiltRelative,
    Privacy,
    Roll,
    RollRelative,
    ScanMode,
    Tilt,
    TiltRelative,
    Zoom,
    ZoomRelative,
}

impl PictureControlType {
    pub const ALL: [PictureControlType; 16] = [
        PictureControlType::BacklightCompensation,
        PictureControlType::Brightness,
        PictureControlType::ColorEnable,
        PictureControlType::Contrast,
        PictureControlType::DigitalMultiplier,
        PictureControlType::DigitalMultiplierLimit,
        PictureControlType::Exposure,
        PictureControlType::Gain,
        PictureControlType::Gamma,
        PictureControlType::Hue,
        PictureControlType::PowerLineFrequency,
        PictureControlType::Saturation,
        PictureControlType::Sharpness,
        PictureControlType::WhiteBalance,
        PictureControlType::WhiteBalanceComponent,
        PictureControlType::NotImplemented,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PictureControlType::BacklightCompensation => "backlight.compensation",
            PictureControlType::Brightness => "brightness",
            PictureControlType::ColorEnable => "color.enable",
            PictureControlType::Contrast => "contrast",
            PictureControlType::DigitalMultiplier => "digital.multiplier",
            PictureControlType::DigitalMultiplierLimit => "digital.multiplier.limit",
            PictureControlType::Exposure => "exposure",
            PictureControlType::Gain => "gain",
            PictureControlType::Gamma => "gamma",
            PictureControlType::Hue => "hue",
            PictureControlType::PowerLineFrequency => "powerline.frequency",
            PictureControlType::Saturation => "saturation",
            PictureControlType::Sharpness => "sharpness",
            PictureControlType::WhiteBalance => "whitebalance",
            PictureControlType::WhiteBalanceComponent => "whitebalance.component",
            PictureControlType::NotImplemented => "not.implemented",
        }
    }

    pub fn is_sentinel(self) -> bool {
        self == PictureControlType::NotImplemented
    }
}

impl CameraControlType {
    pub const ALL: [CameraControlType; 26] = [
        CameraControlType::AutoExposurePriority,
        CameraControlType::Exposure,
        CameraControlType::ExposureRelative,
        CameraControlType::FocalLength,
        CameraControlType::Focus,
        CameraControlType::FocusRelative,
        CameraControlType::Iris,
        CameraControlType::IrisRelative,
        CameraControlType::JpegActiveMarker,
        CameraControlType::JpegChromaSubsampling,
        CameraControlType::JpegCompressionQuality,
        CameraControlType::JpegRestartInterval,
        CameraControlType::LedFrequency,
        CameraControlType::LedMode,
        CameraControlType::Pan,
        CameraControlType::PanRelative,
        CameraControlType::PanTilt,
        CameraControlType::PanTiltRelative,
        CameraControlType::Privacy,
        CameraControlType::Roll,
        CameraControlType::RollRelative,
        CameraControlType::ScanMode,
        CameraControlType::Tilt,
        CameraControlType::TiltRelative,
        CameraControlType::Zoom,
        CameraControlType::ZoomRelative,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CameraControlType::AutoExposurePriority => "auto.exposure.priority",
            CameraControlType::Exposure => "exposure",
            CameraControlType::ExposureRelative => "exposure.relative",
            CameraControlType::FocalLength => "focal.length",
            CameraControlType::Focus => "focus",
            CameraControlType::FocusRelative => "focus.relative",
            CameraControlType::Iris => "iris",
            CameraControlType::IrisRelative => "iris.relative",
            CameraControlType::JpegActiveMarker => "jpeg.active.marker",
            CameraControlType::JpegChromaSubsampling => "jpeg.chroma.subsampling",
            CameraControlType::JpegCompressionQuality => "jpeg.compression.quality",
            CameraControlType::JpegRestartInterval => "jpeg.restart.interval",
            CameraControlType::LedFrequency => "led.frequency",
            CameraControlType::LedMode => "led.mode",
            CameraControlType::Pan => "pan",
            CameraControlType::PanRelative => "pan.relative",
            CameraControlType::PanTilt => "pan.tilt",
            CameraControlType::PanTiltRelative => "pan.tilt.relative",
            CameraControlType::Privacy => "privacy",
            CameraControlType::Roll => "roll",
            CameraControlType::RollRelative => "roll.relative",
            CameraControlType::ScanMode => "scan.mode",
            CameraControlType::Tilt => "tilt",
            CameraControlType::TiltRelative => "tilt.relative",
            CameraControlType::Zoom => "zoom",
            CameraControlType::ZoomRelative => "zoom.relative",
        }
    }
}

/// Name of a picture control, e.g. `"powerline.frequency"`.
pub fn picture_control_name(control: PictureControlType) -> &'static str {
    control.name()
}

/// Name of a camera control, e.g. `"exposure.relative"`.
pub fn camera_control_name(control: CameraControlType) -> &'static str {
    control.name()
}

/// Which catalog a control belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    Picture,
    Camera,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::Picture => f.write_str("picture"),
            ControlKind::Camera => f.write_str("camera"),
        }
    }
}

/// A control type tagged with its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlType {
    Picture(PictureControlType),
    Camera(CameraControlType),
}

impl ControlType {
    pub fn kind(&self) -> ControlKind {
        match self {
            ControlType::Picture(_) => ControlKind::Picture,
            ControlType::Camera(_) => ControlKind::Camera,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlType::Picture(t) => t.name(),
            ControlType::Camera(t) => t.name(),
        }
    }

    /// Every control type of both catalogs, picture controls first.
    pub fn all() -> impl Iterator<Item = ControlType> {
        PictureControlType::ALL
            .into_iter()
            .map(ControlType::Picture)
            .chain(CameraControlType::ALL.into_iter().map(ControlType::Camera))
    }

    /// Resolve a dotted name within one catalog. Names such as `"exposure"`
    /// exist in both, so the kind is required.
    pub fn from_name(kind: ControlKind, name: &str) -> AvResult<ControlType> {
        ControlType::all()
            .find(|t| t.kind() == kind && t.name() == name)
            .ok_or_else(|| AvError::not_found(&format!("{kind} control"), name))
    }
}

impl From<PictureControlType> for ControlType {
    fn from(t: PictureControlType) -> Self {
        ControlType::Picture(t)
    }
}

impl From<CameraControlType> for ControlType {
    fn from(t: CameraControlType) -> Self {
        ControlType::Camera(t)
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind(), self.name())
    }
}

impl FromStr for ControlType {
    type Err = AvError;

    /// Parses the `Display` form, `"<kind>.<name>"`, e.g. `"camera.zoom"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| AvError::not_found("control", s))?;
        let kind = match kind {
            "picture" => ControlKind::Picture,
            "camera" => ControlKind::Camera,
            _ => return Err(AvError::not_found("control kind", kind)),
        };
        ControlType::from_name(kind, name)
    }
}

/// Immutable range-control descriptor as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Control {
    control_type: ControlType,
    min: i64,
    max: i64,
    step: i64,
    default: i64,
    auto_mode: bool,
}

impl Control {
    /// Build a descriptor. Only `min <= max` is enforced here; the remaining
    /// relations are the backend's business, see [`Control::is_consistent`].
    pub fn new(
        control_type: impl Into<ControlType>,
        min: i64,
        max: i64,
        step: i64,
        default: i64,
        auto_mode: bool,
    ) -> AvResult<Self> {
        let control_type = control_type.into();
        if min > max {
            return Err(AvError::control_access_failed(format!(
                "{}: minimum {min} exceeds maximum {max}",
                control_type.name()
            )));
        }
        Ok(Self {
            control_type,
            min,
            max,
            step,
            default,
            auto_mode,
        })
    }

    pub fn control_type(&self) -> ControlType {
        self.control_type
    }

    pub fn kind(&self) -> ControlKind {
        self.control_type.kind()
    }

    pub fn name(&self) -> &'static str {
        self.control_type.name()
    }

    pub fn min_value(&self) -> i64 {
        self.min
    }

    pub fn max_value(&self) -> i64 {
        self.max
    }

    pub fn step_value(&self) -> i64 {
        self.step
    }

    pub fn default_value(&self) -> i64 {
        self.default
    }

    pub fn has_auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// `min <= default <= max`, and the default sits on the step grid when
    /// a positive step is given.
    pub fn is_consistent(&self) -> bool {
        if !self.contains(self.default) {
            return false;
        }
        if self.step > 0 {
            return (self.default as i128 - self.min as i128) % self.step as i128 == 0;
        }
        true
    }

    /// Check a value before it is written to the device.
    pub fn validate_value(&self, value: i64) -> AvResult<()> {
        if !self.contains(value) {
            return Err(AvError::control_access_failed(format!(
                "{}: value {value} outside {}..={}",
                self.name(),
                self.min,
                self.max
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}:{}:{}, Default Value: {}, Auto-Mode: {}",
            self.name(),
            self.min,
            self.step,
            self.max,
            self.default,
            self.auto_mode
        )
    }
}

//! Device registry
//!
//! Enumerates devices through the backend on every call (nothing is cached
//! for enumeration), resolves system defaults, owns the hotplug notifier and
//! exposes the control and format queries of video devices.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::controls::{Control, ControlKind, ControlType};
use crate::errors::{AvError, AvErrorKind, AvResult};
use crate::format::PictureFormat;
use crate::hotplug::{HotplugListener, HotplugNotifier};
use crate::platform::{Backend, RawHotplugEvent};
use crate::types::{Device, Direction, HotplugEvent, HotplugEventKind, MediaCategory};

/// Key used to track device presence for hotplug de-duplication.
fn presence_key(device: &Device) -> &str {
    if device.descriptor().is_empty() {
        device.name()
    } else {
        device.descriptor()
    }
}

pub struct DeviceRegistry {
    backend: Arc<dyn Backend>,
    notifier: HotplugNotifier,
    present: Mutex<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            notifier: HotplugNotifier::new(),
            present: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn notifier(&self) -> &HotplugNotifier {
        &self.notifier
    }

    fn present(&self) -> MutexGuard<'_, HashMap<String, Device>> {
        self.present.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Capture devices of `category`, in backend order, without duplicates.
    pub fn capture_devices(&self, category: MediaCategory) -> AvResult<Vec<Device>> {
        self.devices(category, Direction::Capture)
    }

    /// Playback devices of `category`, in backend order, without duplicates.
    pub fn playback_devices(&self, category: MediaCategory) -> AvResult<Vec<Device>> {
        self.devices(category, Direction::Playback)
    }

    pub fn devices(&self, category: MediaCategory, direction: Direction) -> AvResult<Vec<Device>> {
        let reported = self
            .backend
            .list_devices(category, direction)
            .map_err(|e| match e.kind {
                AvErrorKind::BackendFailure => e,
                _ => AvError::backend(e.message),
            })?;

        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(reported.len());
        for device in reported {
            if device.category() != category || device.direction() != direction {
                log::warn!(
                    "Backend {} listed {} under {} {}, skipping",
                    self.backend.name(),
                    device,
                    category,
                    direction
                );
                continue;
            }
            if !seen.insert(device.clone()) {
                log::debug!("Dropping duplicate device {}", device);
                continue;
            }
            devices.push(device);
        }

        log::debug!("Found {} {} {} device(s)", devices.len(), category, direction);
        Ok(devices)
    }

    pub fn default_capture_device(&self, category: MediaCategory) -> AvResult<Device> {
        self.default_device(category, Direction::Capture)
    }

    pub fn default_playback_device(&self, category: MediaCategory) -> AvResult<Device> {
        self.default_device(category, Direction::Playback)
    }

    fn default_device(&self, category: MediaCategory, direction: Direction) -> AvResult<Device> {
        let descriptor = self
            .backend
            .default_device(category, direction)?
            .ok_or_else(|| AvError::not_found(&format!("default {category} {direction} device"), "none"))?;

        self.devices(category, direction)?
            .into_iter()
            .find(|d| d.descriptor() == descriptor)
            .ok_or_else(|| AvError::not_found(&format!("default {category} {direction} device"), descriptor))
    }

    /// Look a device up by descriptor across every category and direction.
    pub fn find_device(&self, descriptor: &str) -> AvResult<Device> {
        for category in [MediaCategory::Audio, MediaCategory::Video] {
            for direction in [Direction::Capture, Direction::Playback] {
                if let Some(device) = self
                    .devices(category, direction)?
                    .into_iter()
                    .find(|d| d.descriptor() == descriptor)
                {
                    return Ok(device);
                }
            }
        }
        Err(AvError::not_found("device", descriptor))
    }

    /// Whether the backend still reports `device`.
    pub fn contains(&self, device: &Device) -> AvResult<bool> {
        Ok(self
            .devices(device.category(), device.direction())?
            .contains(device))
    }

    pub fn attach_hotplug_listener(&self, listener: Arc<dyn HotplugListener>) {
        self.notifier.attach(listener);
    }

    pub fn detach_hotplug_listener(&self, listener: &Arc<dyn HotplugListener>) {
        self.notifier.detach(listener);
    }

    /// Record the devices present right now, so that later raw events can be
    /// de-duplicated and disconnects resolved to full devices.
    pub fn seed_presence(&self) -> AvResult<()> {
        let mut snapshot = HashMap::new();
        for category in [MediaCategory::Audio, MediaCategory::Video] {
            for direction in [Direction::Capture, Direction::Playback] {
                for device in self.devices(category, direction)? {
                    snapshot.insert(presence_key(&device).to_string(), device);
                }
            }
        }
        log::debug!("Hotplug presence seeded with {} device(s)", snapshot.len());
        *self.present() = snapshot;
        Ok(())
    }

    /// Translate a backend transition into a [`HotplugEvent`] and deliver it.
    ///
    /// Connects of a device already present and disconnects of a device not
    /// present are dropped, so each physical transition is reported once.
    pub fn handle_raw_event(&self, raw: RawHotplugEvent) -> Option<HotplugEvent> {
        let event = match raw {
            RawHotplugEvent::Connected(device) => {
                let mut present = self.present();
                let key = presence_key(&device).to_string();
                if present.contains_key(&key) {
                    log::debug!("Ignoring repeated connect for {}", device);
                    return None;
                }
                present.insert(key, device.clone());
                log::info!("Device connected: {}", device);
                HotplugEvent::new(HotplugEventKind::Connected, device)
            }
            RawHotplugEvent::Disconnected(gone) => {
                let Some(device) = self.present().remove(presence_key(&gone)) else {
                    log::debug!("Ignoring disconnect for unknown device {}", gone);
                    return None;
                };
                log::info!("Device disconnected: {}", device);
                HotplugEvent::new(HotplugEventKind::Disconnected, device)
            }
        };

        self.notifier.dispatch(&event);
        Some(event)
    }

    fn ensure_video(device: &Device) -> AvResult<()> {
        if device.category() != MediaCategory::Video {
            return Err(AvError::control_access_failed(format!(
                "{device} is not a video device"
            )));
        }
        Ok(())
    }

    pub fn picture_formats(&self, device: &Device) -> AvResult<Vec<PictureFormat>> {
        if device.category() != MediaCategory::Video {
            return Err(AvError::format_unsupported(format!(
                "{device} has no picture formats"
            )));
        }
        self.backend.picture_formats(device)
    }

    pub fn picture_controls(&self, device: &Device) -> AvResult<Vec<Control>> {
        self.controls(device, ControlKind::Picture)
    }

    pub fn camera_controls(&self, device: &Device) -> AvResult<Vec<Control>> {
        self.controls(device, ControlKind::Camera)
    }

    /// Control descriptors of one kind. Descriptors with `min > max` or of
    /// the wrong kind are dropped; inconsistent defaults are passed through.
    pub fn controls(&self, device: &Device, kind: ControlKind) -> AvResult<Vec<Control>> {
        Self::ensure_video(device)?;
        let reported = self
            .backend
            .controls(device, kind)
            .map_err(AvError::into_control_error)?;

        let controls = reported
            .into_iter()
            .filter(|control| {
                if control.kind() != kind {
                    log::warn!("{}: backend returned {} control under {}", device, control.kind(), kind);
                    return false;
                }
                if control.min_value() > control.max_value() {
                    log::warn!("{}: rejecting control with inverted range: {}", device, control);
                    return false;
                }
                if !control.is_consistent() {
                    log::warn!("{}: inconsistent control descriptor: {}", device, control);
                }
                true
            })
            .collect();
        Ok(controls)
    }

    fn descriptor_for(&self, device: &Device, control: ControlType) -> AvResult<Control> {
        self.controls(device, control.kind())?
            .into_iter()
            .find(|c| c.control_type() == control)
            .ok_or_else(|| AvError::control_access_failed(format!("{device} has no control {control}")))
    }

    pub fn control_value(&self, device: &Device, control: ControlType) -> AvResult<i64> {
        Self::ensure_video(device)?;
        self.backend
            .control_value(device, control)
            .map_err(AvError::into_control_error)
    }

    /// Write a control value. Values outside the advertised range are
    /// rejected before the backend is called.
    pub fn set_control_value(&self, device: &Device, control: ControlType, value: i64) -> AvResult<()> {
        let descriptor = self.descriptor_for(device, control)?;
        descriptor.validate_value(value)?;
        log::debug!("{}: setting {} to {}", device, control, value);
        self.backend
            .set_control_value(device, control, value)
            .map_err(AvError::into_control_error)
    }

    pub fn control_auto_mode(&self, device: &Device, control: ControlType) -> AvResult<bool> {
        Self::ensure_video(device)?;
        self.backend
            .control_auto_mode(device, control)
            .map_err(AvError::into_control_error)
    }

    pub fn set_control_auto_mode(&self, device: &Device, control: ControlType, auto: bool) -> AvResult<()> {
        let descriptor = self.descriptor_for(device, control)?;
        if auto && !descriptor.has_auto_mode() {
            return Err(AvError::control_access_failed(format!(
                "{} has no auto mode",
                descriptor.name()
            )));
        }
        self.backend
            .set_control_auto_mode(device, control, auto)
            .map_err(AvError::into_control_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AvConfig;
    use crate::platform::SyntheticBackend;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(SyntheticBackend::with_demo_devices(&AvConfig::default())))
    }

    fn usb_mic() -> Device {
        Device::new("usb:1", "USB Mic", MediaCategory::Audio, Direction::Capture)
    }

    #[test]
    fn test_repeated_transitions_are_dropped() {
        let registry = registry();
        registry.seed_presence().unwrap();

        let event = registry.handle_raw_event(RawHotplugEvent::Connected(usb_mic())).unwrap();
        assert_eq!(event.kind, HotplugEventKind::Connected);
        assert!(registry.handle_raw_event(RawHotplugEvent::Connected(usb_mic())).is_none());

        let gone = RawHotplugEvent::Disconnected(usb_mic());
        let event = registry.handle_raw_event(gone.clone()).unwrap();
        assert_eq!(event.kind, HotplugEventKind::Disconnected);
        assert_eq!(event.device.name(), "USB Mic");
        assert!(registry.handle_raw_event(gone).is_none());
    }

    #[test]
    fn test_seeded_devices_are_not_reconnected() {
        let registry = registry();
        registry.seed_presence().unwrap();
        let cam = Device::new("synthetic:cam0", "Synthetic Camera", MediaCategory::Video, Direction::Capture);
        assert!(registry.handle_raw_event(RawHotplugEvent::Connected(cam)).is_none());
    }

    #[test]
    fn test_disconnect_without_descriptor_is_reported() {
        let registry = registry();
        registry.seed_presence().unwrap();
        let loopback = Device::new("", "Loopback", MediaCategory::Audio, Direction::Playback);

        registry.handle_raw_event(RawHotplugEvent::Connected(loopback.clone())).unwrap();
        let event = registry
            .handle_raw_event(RawHotplugEvent::Disconnected(loopback.clone()))
            .unwrap();
        assert_eq!(event.kind, HotplugEventKind::Disconnected);
        assert_eq!(event.device.name(), "Loopback");
        assert!(registry.handle_raw_event(RawHotplugEvent::Disconnected(loopback)).is_none());
    }

    #[test]
    fn test_presence_key_falls_back_to_name() {
        let no_descriptor = Device::new("", "Loopback", MediaCategory::Audio, Direction::Playback);
        assert_eq!(presence_key(&no_descriptor), "Loopback");
        assert_eq!(presence_key(&usb_mic()), "usb:1");
    }
}

//! Device registry behavior over the synthetic backend

use avhal::controls::{CameraControlType, Control, ControlKind, ControlType, PictureControlType};
use avhal::platform::synthetic::FailureInjection;
use avhal::{
    AvConfig, AvContext, AvErrorKind, Device, Direction, HotplugListener, MediaCategory, SyntheticBackend,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

fn quiet_config() -> AvConfig {
    let mut config = AvConfig::default();
    config.hotplug.enabled = false;
    config.hotplug.poll_interval_ms = 10;
    config.synthetic.buffer_interval_ms = 1;
    config
}

fn demo_context() -> (Arc<SyntheticBackend>, AvContext) {
    let config = quiet_config();
    let backend = Arc::new(SyntheticBackend::with_demo_devices(&config));
    let context = AvContext::new(backend.clone(), config).unwrap();
    (backend, context)
}

fn camera(context: &AvContext) -> Device {
    context.registry().find_device("synthetic:cam0").unwrap()
}

#[test]
fn test_enumeration_by_category_and_direction() {
    let (_backend, context) = demo_context();
    let registry = context.registry();

    let mics = registry.capture_devices(MediaCategory::Audio).unwrap();
    assert_eq!(mics.len(), 1);
    assert_eq!(mics[0].name(), "Synthetic Microphone");
    assert!(mics.iter().all(|d| d.direction() == Direction::Capture));

    let speakers = registry.playback_devices(MediaCategory::Audio).unwrap();
    assert_eq!(speakers[0].descriptor(), "synthetic:speaker0");

    assert!(registry.playback_devices(MediaCategory::Video).unwrap().is_empty());
}

#[test]
fn test_duplicates_are_dropped_in_backend_order() {
    let (backend, context) = demo_context();
    backend.add_device(Device::new("usb:2", "Second Mic", MediaCategory::Audio, Direction::Capture));
    backend.add_device(Device::new("usb:2", "Second Mic again", MediaCategory::Audio, Direction::Capture));

    let mics = context.registry().capture_devices(MediaCategory::Audio).unwrap();
    let descriptors: Vec<&str> = mics.iter().map(|d| d.descriptor()).collect();
    assert_eq!(descriptors, vec!["synthetic:mic0", "usb:2"]);
    assert_eq!(mics[1].name(), "Second Mic");
}

#[test]
fn test_devices_without_descriptor_dedupe_by_name() {
    let (backend, context) = demo_context();
    backend.add_device(Device::new("", "Loopback", MediaCategory::Audio, Direction::Playback));
    backend.add_device(Device::new("", "Loopback", MediaCategory::Audio, Direction::Playback));
    backend.add_device(Device::new("", "Monitor", MediaCategory::Audio, Direction::Playback));

    let speakers = context.registry().playback_devices(MediaCategory::Audio).unwrap();
    let names: Vec<&str> = speakers.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["Synthetic Speaker", "Loopback", "Monitor"]);
}

#[test]
fn test_default_device() {
    let (backend, context) = demo_context();
    let registry = context.registry();

    let err = registry.default_playback_device(MediaCategory::Video).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::NotFound);

    backend.add_device(Device::new("usb:7", "Other Mic", MediaCategory::Audio, Direction::Capture));
    backend.set_default_device(MediaCategory::Audio, Direction::Capture, "usb:7");
    let mic = registry.default_capture_device(MediaCategory::Audio).unwrap();
    assert_eq!(mic.descriptor(), "usb:7");

    backend.set_default_device(MediaCategory::Audio, Direction::Capture, "synthetic:mic0");
    let mic = registry.default_capture_device(MediaCategory::Audio).unwrap();
    assert_eq!(mic.descriptor(), "synthetic:mic0");

    backend.set_default_device(MediaCategory::Audio, Direction::Playback, "gone:0");
    let err = registry.default_playback_device(MediaCategory::Audio).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::NotFound);
}

#[test]
fn test_enumeration_failure_is_backend_failure() {
    let (backend, context) = demo_context();
    backend.set_failures(FailureInjection {
        fail_enumeration: true,
        ..Default::default()
    });

    let err = context.registry().capture_devices(MediaCategory::Video).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::BackendFailure);
}

#[test]
fn test_find_device_unknown() {
    let (_backend, context) = demo_context();
    let err = context.registry().find_device("nope").unwrap_err();
    assert_eq!(err.kind, AvErrorKind::NotFound);
}

#[test]
fn test_picture_formats_require_video() {
    let (_backend, context) = demo_context();
    let registry = context.registry();

    let formats = registry.picture_formats(&camera(&context)).unwrap();
    assert_eq!(formats.len(), 3);
    assert_eq!(formats[0].to_string(), "YUYV - 640x480");

    let mic = registry.find_device("synthetic:mic0").unwrap();
    let err = registry.picture_formats(&mic).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::FormatUnsupported);
}

#[test]
fn test_control_listing_and_access() {
    let (_backend, context) = demo_context();
    let registry = context.registry();
    let cam = camera(&context);

    let picture = registry.picture_controls(&cam).unwrap();
    assert!(picture.iter().all(|c| c.kind() == ControlKind::Picture));
    let contrast = picture
        .iter()
        .find(|c| c.control_type() == ControlType::Picture(PictureControlType::Contrast))
        .unwrap();
    assert_eq!(contrast.default_value(), 50);

    let camera_controls = registry.camera_controls(&cam).unwrap();
    assert!(camera_controls
        .iter()
        .any(|c| c.control_type() == ControlType::Camera(CameraControlType::Zoom)));

    let contrast = ControlType::from(PictureControlType::Contrast);
    registry.set_control_value(&cam, contrast, 80).unwrap();
    assert_eq!(registry.control_value(&cam, contrast).unwrap(), 80);
}

#[test]
fn test_out_of_range_value_is_rejected() {
    let (_backend, context) = demo_context();
    let registry = context.registry();
    let cam = camera(&context);
    let contrast = ControlType::from(PictureControlType::Contrast);

    let err = registry.set_control_value(&cam, contrast, 101).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::ControlAccessFailed);
    assert_eq!(registry.control_value(&cam, contrast).unwrap(), 50);
}

#[test]
fn test_auto_mode() {
    let (_backend, context) = demo_context();
    let registry = context.registry();
    let cam = camera(&context);

    let gain = ControlType::from(PictureControlType::Gain);
    registry.set_control_auto_mode(&cam, gain, true).unwrap();
    assert!(registry.control_auto_mode(&cam, gain).unwrap());
    registry.set_control_auto_mode(&cam, gain, false).unwrap();
    assert!(!registry.control_auto_mode(&cam, gain).unwrap());

    let contrast = ControlType::from(PictureControlType::Contrast);
    let err = registry.set_control_auto_mode(&cam, contrast, true).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::ControlAccessFailed);
}

#[test]
fn test_controls_on_audio_device_fail() {
    let (_backend, context) = demo_context();
    let registry = context.registry();
    let mic = registry.find_device("synthetic:mic0").unwrap();

    let err = registry.picture_controls(&mic).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::ControlAccessFailed);
    let err = registry
        .control_value(&mic, ControlType::from(PictureControlType::Brightness))
        .unwrap_err();
    assert_eq!(err.kind, AvErrorKind::ControlAccessFailed);
}

#[test]
fn test_backend_control_failure_is_control_access_failed() {
    let (backend, context) = demo_context();
    let cam = camera(&context);
    backend.set_failures(FailureInjection {
        fail_controls: true,
        ..Default::default()
    });

    let err = context.registry().camera_controls(&cam).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::ControlAccessFailed);
}

#[test]
fn test_inverted_descriptor_is_dropped() {
    let (backend, context) = demo_context();
    let cam = camera(&context);

    // Backends can hand over descriptors that never went through Control::new
    let inverted: Control = serde_json::from_value(serde_json::json!({
        "control_type": { "Picture": "Hue" },
        "min": 10,
        "max": -10,
        "step": 1,
        "default": 0,
        "auto_mode": false
    }))
    .unwrap();
    let sharpness = Control::new(PictureControlType::Sharpness, 0, 7, 1, 3, false).unwrap();
    backend.set_controls(&cam, vec![inverted, sharpness]);

    let controls = context.registry().picture_controls(&cam).unwrap();
    assert_eq!(controls, vec![sharpness]);
}

struct ChannelListener {
    tx: Sender<(bool, String)>,
}

impl HotplugListener for ChannelListener {
    fn device_connected(&self, device: &Device) {
        let _ = self.tx.send((true, device.descriptor().to_string()));
    }

    fn device_disconnected(&self, device: &Device) {
        let _ = self.tx.send((false, device.descriptor().to_string()));
    }
}

fn channel_listener() -> (Arc<dyn HotplugListener>, Receiver<(bool, String)>) {
    let (tx, rx) = unbounded();
    (Arc::new(ChannelListener { tx }), rx)
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_hotplug_connect_and_disconnect() {
    let (backend, context) = demo_context();
    context.start_hotplug_watch().unwrap();
    assert!(context.is_watching_hotplug());

    let (listener, rx) = channel_listener();
    context.registry().attach_hotplug_listener(listener);

    backend.add_device(Device::new("usb:9", "USB Camera", MediaCategory::Video, Direction::Capture));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (true, "usb:9".to_string()));

    backend.remove_device("usb:9").unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (false, "usb:9".to_string()));

    context.stop_hotplug_watch();
    assert!(!context.is_watching_hotplug());
}

#[test]
fn test_hotplug_repeated_connect_reported_once() {
    let (backend, context) = demo_context();
    context.start_hotplug_watch().unwrap();
    let (listener, rx) = channel_listener();
    context.registry().attach_hotplug_listener(listener);

    // Already present when the watch started
    backend.add_device(Device::new("synthetic:mic0", "Synthetic Microphone", MediaCategory::Audio, Direction::Capture));
    backend.add_device(Device::new("usb:3", "Headset", MediaCategory::Audio, Direction::Playback));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (true, "usb:3".to_string()));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_detached_listener_gets_nothing() {
    let (backend, context) = demo_context();
    context.start_hotplug_watch().unwrap();

    let (detached, detached_rx) = channel_listener();
    let (kept, kept_rx) = channel_listener();
    let registry = context.registry();
    registry.attach_hotplug_listener(detached.clone());
    registry.attach_hotplug_listener(kept);
    registry.detach_hotplug_listener(&detached);

    backend.add_device(Device::new("usb:4", "Dock Mic", MediaCategory::Audio, Direction::Capture));
    assert_eq!(kept_rx.recv_timeout(WAIT).unwrap(), (true, "usb:4".to_string()));
    assert!(detached_rx.try_recv().is_err());
}

struct PanickingListener;

impl HotplugListener for PanickingListener {
    fn device_connected(&self, _device: &Device) {
        panic!("listener bug");
    }

    fn device_disconnected(&self, _device: &Device) {}
}

#[test]
fn test_panicking_listener_does_not_block_others() {
    let (backend, context) = demo_context();
    context.start_hotplug_watch().unwrap();

    let registry = context.registry();
    registry.attach_hotplug_listener(Arc::new(PanickingListener));
    let (listener, rx) = channel_listener();
    registry.attach_hotplug_listener(listener);

    backend.add_device(Device::new("usb:5", "Webcam", MediaCategory::Video, Direction::Capture));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (true, "usb:5".to_string()));

    backend.add_device(Device::new("usb:6", "Webcam 2", MediaCategory::Video, Direction::Capture));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (true, "usb:6".to_string()));
}

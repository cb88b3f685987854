//! Stream lifecycle and delivery over the synthetic backend

use avhal::platform::synthetic::FailureInjection;
use avhal::{
    AudioFormat, AudioSessionListener, AvConfig, AvContext, AvError, AvErrorKind, Device, MediaFormat, PictureFormat,
    PixelFormat, SampleFormat, StreamListener, StreamState, SyntheticBackend,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn demo_context() -> (Arc<SyntheticBackend>, AvContext) {
    let mut config = AvConfig::default();
    config.hotplug.enabled = false;
    config.synthetic.buffer_interval_ms = 1;
    let backend = Arc::new(SyntheticBackend::with_demo_devices(&config));
    let context = AvContext::new(backend.clone(), config).unwrap();
    (backend, context)
}

fn device(context: &AvContext, descriptor: &str) -> Device {
    context.registry().find_device(descriptor).unwrap()
}

fn counting_sink(counter: Arc<AtomicUsize>) -> impl FnMut(&[u8], usize) -> anyhow::Result<()> + Send + 'static {
    move |_data: &[u8], _len: usize| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Opened,
    Started,
    Stopped,
    Closed,
    Ended,
    Error(AvErrorKind),
}

struct RecordingListener {
    tx: Sender<Event>,
}

impl StreamListener for RecordingListener {
    fn stream_opened(&self, _device: &Device) {
        let _ = self.tx.send(Event::Opened);
    }

    fn stream_started(&self, _device: &Device) {
        let _ = self.tx.send(Event::Started);
    }

    fn stream_stopped(&self, _device: &Device) {
        let _ = self.tx.send(Event::Stopped);
    }

    fn stream_closed(&self, _device: &Device) {
        let _ = self.tx.send(Event::Closed);
    }

    fn stream_ended(&self, _device: &Device) {
        let _ = self.tx.send(Event::Ended);
    }

    fn stream_error(&self, _device: &Device, error: &AvError) {
        let _ = self.tx.send(Event::Error(error.kind));
    }
}

/// Collect events until `last` arrives or the wait runs out.
fn events_until(rx: &Receiver<Event>, last: Event) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.recv_timeout(WAIT) {
        let done = event == last;
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}

fn recording_listener() -> (Arc<dyn StreamListener>, Receiver<Event>) {
    let (tx, rx) = unbounded();
    (Arc::new(RecordingListener { tx }), rx)
}

#[test]
fn test_audio_capture_lifecycle() {
    let (backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let buffers = Arc::new(AtomicUsize::new(0));

    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(buffers.clone()))
        .unwrap();
    let (listener, events) = recording_listener();
    stream.add_listener(listener);
    assert_eq!(stream.state(), StreamState::Closed);

    stream.open().unwrap();
    assert_eq!(stream.state(), StreamState::Opened);
    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Started);
    assert!(wait_until(|| buffers.load(Ordering::SeqCst) >= 3));

    stream.stop().unwrap();
    assert_eq!(stream.state(), StreamState::Stopped);
    assert!(!backend.is_delivering(stream.handle()));

    // Nothing is delivered once stop returned
    let after_stop = buffers.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(buffers.load(Ordering::SeqCst), after_stop);

    let bytes_per_buffer = AudioFormat::cd_quality().bytes_for_duration(20) as u64;
    assert_eq!(stream.stream_position().unwrap(), after_stop as u64 * bytes_per_buffer);

    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    stream.dispose().unwrap();
    assert_eq!(stream.state(), StreamState::Disposed);
    assert_eq!(backend.stream_count(), 0);

    let seen: Vec<Event> = events.try_iter().collect();
    assert_eq!(seen, vec![Event::Opened, Event::Started, Event::Stopped, Event::Closed]);
}

#[test]
fn test_restart_after_stop() {
    let (_backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let buffers = Arc::new(AtomicUsize::new(0));
    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(buffers.clone()))
        .unwrap();

    stream.open().unwrap();
    stream.start().unwrap();
    stream.stop().unwrap();
    let first_run = buffers.load(Ordering::SeqCst);

    stream.start().unwrap();
    assert!(wait_until(|| buffers.load(Ordering::SeqCst) > first_run));
    stream.stop().unwrap();
}

#[test]
fn test_illegal_transitions() {
    let (_backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(Arc::new(AtomicUsize::new(0))))
        .unwrap();

    assert_eq!(stream.start().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.stop().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.close().unwrap_err().kind, AvErrorKind::IllegalState);

    stream.open().unwrap();
    assert_eq!(stream.open().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.dispose().unwrap_err().kind, AvErrorKind::IllegalState);

    stream.start().unwrap();
    assert_eq!(stream.close().unwrap_err().kind, AvErrorKind::IllegalState);
    stream.stop().unwrap();
    stream.close().unwrap();
    stream.dispose().unwrap();

    assert_eq!(stream.open().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.start().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.stop().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.close().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.dispose().unwrap_err().kind, AvErrorKind::IllegalState);

    assert_eq!(stream.volume().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.set_volume(0.5).unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.mute().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.set_mute(true).unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.audio_format().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(
        stream.set_audio_format(AudioFormat::cd_quality()).unwrap_err().kind,
        AvErrorKind::IllegalState
    );
    assert_eq!(stream.buffer_latency().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.set_buffer_latency(20).unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.stream_position().unwrap_err().kind, AvErrorKind::IllegalState);
}

#[test]
fn test_video_accessors_after_dispose() {
    let (_backend, context) = demo_context();
    let cam = device(&context, "synthetic:cam0");
    let vga = PictureFormat::new(PixelFormat::YUYV, 640, 480).unwrap();
    let mut stream = context
        .video_capture_stream(&cam, vga, counting_sink(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    stream.open().unwrap();
    stream.close().unwrap();
    stream.dispose().unwrap();

    assert_eq!(stream.state(), StreamState::Disposed);
    assert_eq!(stream.picture_format().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.set_picture_format(vga).unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.frame_rate().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.set_frame_rate(30.0).unwrap_err().kind, AvErrorKind::IllegalState);
}

#[test]
fn test_failed_dispose_can_be_retried() {
    let (backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    stream.open().unwrap();
    stream.close().unwrap();

    backend.set_failures(FailureInjection {
        fail_dispose: true,
        ..Default::default()
    });
    assert_eq!(stream.dispose().unwrap_err().kind, AvErrorKind::BackendFailure);
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(backend.stream_count(), 1);

    backend.set_failures(FailureInjection::default());
    stream.dispose().unwrap();
    assert_eq!(stream.state(), StreamState::Disposed);
    assert_eq!(backend.stream_count(), 0);
}

#[test]
fn test_accessors_require_active_stream() {
    let (_backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(Arc::new(AtomicUsize::new(0))))
        .unwrap();

    assert_eq!(stream.buffer_latency().unwrap_err().kind, AvErrorKind::IllegalState);
    assert_eq!(stream.set_mute(true).unwrap_err().kind, AvErrorKind::IllegalState);

    stream.open().unwrap();
    assert_eq!(stream.buffer_latency().unwrap(), 20);
    assert_eq!(stream.audio_format().unwrap(), AudioFormat::cd_quality());
    assert_eq!(stream.picture_format().unwrap_err().kind, AvErrorKind::IllegalState);
}

#[test]
fn test_wrong_device_for_stream_kind() {
    let (_backend, context) = demo_context();
    let speaker = device(&context, "synthetic:speaker0");
    let err = context
        .audio_capture_stream(&speaker, AudioFormat::cd_quality(), counting_sink(Arc::new(AtomicUsize::new(0))))
        .err()
        .unwrap();
    assert_eq!(err.kind, AvErrorKind::IllegalState);
}

#[test]
fn test_session_parameters_reach_backend() {
    let (backend, context) = demo_context();
    let speaker = device(&context, "synthetic:speaker0");
    let mut stream = context
        .audio_playback_stream(&speaker, AudioFormat::cd_quality(), |buf: &mut [u8]| -> anyhow::Result<usize> {
            Ok(buf.len())
        })
        .unwrap();
    stream.open().unwrap();

    stream.set_volume(0.25).unwrap();
    stream.set_mute(true).unwrap();
    stream.set_buffer_latency(50).unwrap();

    let params = backend.session_params(stream.handle()).unwrap();
    assert_eq!(params.volume, 0.25);
    assert!(params.mute);
    assert_eq!(params.buffer_latency_ms, 50);

    stream.set_volume(3.0).unwrap();
    assert_eq!(stream.volume().unwrap(), 1.0);
    stream.set_buffer_latency(0).unwrap();
    assert_eq!(stream.buffer_latency().unwrap(), 1);
}

struct VolumeRecorder {
    changes: Mutex<Vec<(f32, bool)>>,
}

impl AudioSessionListener for VolumeRecorder {
    fn volume_changed(&self, volume: f32, mute: bool) {
        self.changes.lock().unwrap().push((volume, mute));
    }
}

#[test]
fn test_session_listener_sees_volume_changes() {
    let (_backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let recorder = Arc::new(VolumeRecorder {
        changes: Mutex::new(Vec::new()),
    });
    stream.add_session_listener(recorder.clone()).unwrap();

    stream.open().unwrap();
    stream.set_volume(0.5).unwrap();
    stream.set_mute(true).unwrap();

    assert_eq!(*recorder.changes.lock().unwrap(), vec![(0.5, false), (0.5, true)]);
}

#[test]
fn test_playback_position_advances() {
    let (backend, context) = demo_context();
    let speaker = device(&context, "synthetic:speaker0");
    let format = AudioFormat::new(SampleFormat::FLOAT32LE, 48_000, 2).unwrap();

    // Source fills half of each buffer; the rest must be rendered as silence
    let mut stream = context
        .audio_playback_stream(&speaker, format, |buf: &mut [u8]| -> anyhow::Result<usize> {
            let half = buf.len() / 2;
            buf[..half].fill(0x7f);
            Ok(half)
        })
        .unwrap();
    stream.open().unwrap();
    stream.start().unwrap();
    assert!(wait_until(|| backend.rendered_bytes(stream.handle()).unwrap_or(0) > 0));
    stream.stop().unwrap();

    let position = stream.stream_position().unwrap();
    assert!(position > 0);
    assert_eq!(position % format.bytes_for_duration(20) as u64, 0);
}

#[test]
fn test_sink_error_stops_stream() {
    let (_backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let mut calls = 0;
    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), move |_data: &[u8], _len: usize| -> anyhow::Result<()> {
            calls += 1;
            if calls == 3 {
                anyhow::bail!("disk full");
            }
            Ok(())
        })
        .unwrap();
    let (listener, events) = recording_listener();
    stream.add_listener(listener);

    stream.open().unwrap();
    stream.start().unwrap();

    let seen = events_until(&events, Event::Ended);
    assert_eq!(stream.state(), StreamState::Stopped);
    assert_eq!(
        seen,
        vec![
            Event::Opened,
            Event::Started,
            Event::Error(AvErrorKind::BackendFailure),
            Event::Ended
        ]
    );

    // Two successful buffers were counted, the failing one was not
    let bytes_per_buffer = AudioFormat::cd_quality().bytes_for_duration(20) as u64;
    assert_eq!(stream.stream_position().unwrap(), 2 * bytes_per_buffer);

    stream.stop().unwrap();
    stream.close().unwrap();
    stream.dispose().unwrap();
}

#[test]
fn test_device_removal_ends_stream() {
    let (backend, context) = demo_context();
    let cam = device(&context, "synthetic:cam0");
    let format = PictureFormat::new(PixelFormat::YUYV, 640, 480).unwrap();
    let frames = Arc::new(AtomicUsize::new(0));

    let mut stream = context
        .video_capture_stream(&cam, format, counting_sink(frames.clone()))
        .unwrap();
    let (listener, events) = recording_listener();
    stream.add_listener(listener);
    stream.open().unwrap();
    stream.start().unwrap();
    assert!(wait_until(|| frames.load(Ordering::SeqCst) > 0));

    backend.remove_device("synthetic:cam0").unwrap();
    let seen = events_until(&events, Event::Ended);
    assert_eq!(seen.last(), Some(&Event::Ended));
    assert_eq!(stream.state(), StreamState::Stopped);

    // The device is gone, so it cannot be reopened
    stream.close().unwrap();
    assert_eq!(stream.open().unwrap_err().kind, AvErrorKind::DeviceUnavailable);
}

#[test]
fn test_open_fails_when_device_gone() {
    let (backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    let mut stream = context
        .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(Arc::new(AtomicUsize::new(0))))
        .unwrap();

    backend.remove_device("synthetic:mic0").unwrap();
    assert_eq!(stream.open().unwrap_err().kind, AvErrorKind::DeviceUnavailable);
    assert_eq!(stream.state(), StreamState::Closed);
}

#[test]
fn test_rejected_format() {
    let (backend, context) = demo_context();
    let cam = device(&context, "synthetic:cam0");
    let rejected = PictureFormat::new(PixelFormat::MJPG, 1280, 720).unwrap();
    backend.set_failures(FailureInjection {
        rejected_formats: vec![MediaFormat::from(rejected)],
        ..Default::default()
    });

    let mut stream = context
        .video_capture_stream(&cam, rejected, counting_sink(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    assert_eq!(stream.open().unwrap_err().kind, AvErrorKind::FormatUnsupported);

    let mut stream = context
        .video_capture_stream(
            &cam,
            PictureFormat::new(PixelFormat::YUYV, 640, 480).unwrap(),
            counting_sink(Arc::new(AtomicUsize::new(0))),
        )
        .unwrap();
    stream.open().unwrap();
    let err = stream.set_picture_format(rejected).unwrap_err();
    assert_eq!(err.kind, AvErrorKind::FormatUnsupported);
    assert_eq!(stream.picture_format().unwrap().pixel_format(), PixelFormat::YUYV);
}

#[test]
fn test_video_format_and_frame_rate() {
    let (_backend, context) = demo_context();
    let cam = device(&context, "synthetic:cam0");
    let mut stream = context
        .video_capture_stream(
            &cam,
            PictureFormat::new(PixelFormat::YUYV, 640, 480).unwrap(),
            counting_sink(Arc::new(AtomicUsize::new(0))),
        )
        .unwrap();
    stream.open().unwrap();

    let rgb = PictureFormat::new(PixelFormat::RGB24, 320, 240).unwrap();
    stream.set_picture_format(rgb).unwrap();
    assert_eq!(stream.picture_format().unwrap(), rgb);

    stream.set_frame_rate(30.0).unwrap();
    assert_eq!(stream.frame_rate().unwrap(), Some(30.0));
    assert_eq!(stream.set_frame_rate(0.0).unwrap_err().kind, AvErrorKind::FormatUnsupported);
    assert_eq!(stream.volume().unwrap_err().kind, AvErrorKind::IllegalState);

    stream.start().unwrap();
    assert_eq!(stream.set_picture_format(rgb).unwrap_err().kind, AvErrorKind::IllegalState);
    stream.stop().unwrap();
}

#[test]
fn test_drop_releases_backend_stream() {
    let (backend, context) = demo_context();
    let mic = device(&context, "synthetic:mic0");
    {
        let mut stream = context
            .audio_capture_stream(&mic, AudioFormat::cd_quality(), counting_sink(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        stream.open().unwrap();
        stream.start().unwrap();
        assert_eq!(backend.stream_count(), 1);
    }
    assert_eq!(backend.stream_count(), 0);
}

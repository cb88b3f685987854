use anyhow::{anyhow, bail, Context as _};
use avhal::{
    AudioFormat, AvConfig, AvContext, ControlType, Device, Direction, HotplugListener, MediaCategory,
    SyntheticBackend,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "Usage: avhal-cli <command> [args] [--synthetic] [--json]

Commands:
  list-devices
  list-formats <descriptor>
  list-controls <descriptor>
  set-control <descriptor> <kind.name> <value|auto|manual>
  watch
  capture <descriptor> [--buffers <n>] [--timeout <ms>]";

struct Options {
    json: bool,
    synthetic: bool,
    positional: Vec<String>,
    buffers: usize,
    timeout_ms: u64,
}

fn parse_options(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options {
        json: false,
        synthetic: false,
        positional: Vec::new(),
        buffers: 5,
        timeout_ms: 2000,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => options.json = true,
            "--synthetic" => options.synthetic = true,
            "--buffers" => {
                i += 1;
                options.buffers = args.get(i).ok_or_else(|| anyhow!("--buffers needs a value"))?.parse()?;
            }
            "--timeout" => {
                i += 1;
                options.timeout_ms = args.get(i).ok_or_else(|| anyhow!("--timeout needs a value"))?.parse()?;
            }
            other => options.positional.push(other.to_string()),
        }
        i += 1;
    }
    Ok(options)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let config = AvConfig::load_or_default();
    avhal::init_logging_with(&config.logging.level);

    let command = args[1].as_str();
    let options = parse_options(&args[2..])?;

    match command {
        "list-devices" => cmd_list_devices(&options, config),
        "list-formats" => cmd_list_formats(&options, config),
        "list-controls" => cmd_list_controls(&options, config),
        "set-control" => cmd_set_control(&options, config),
        "watch" => cmd_watch(&options, config),
        "capture" => cmd_capture(&options, config),
        _ => {
            eprintln!("Unknown command: {}\n\n{USAGE}", command);
            std::process::exit(1);
        }
    }
}

fn open_context(options: &Options, mut config: AvConfig, watch: bool) -> anyhow::Result<AvContext> {
    config.hotplug.enabled = watch;
    let context = if options.synthetic {
        AvContext::new(Arc::new(SyntheticBackend::with_demo_devices(&config)), config)?
    } else {
        AvContext::with_default_backend(config).context("no native backend, try --synthetic")?
    };
    Ok(context)
}

fn device_arg(options: &Options, context: &AvContext, usage: &str) -> anyhow::Result<Device> {
    let Some(descriptor) = options.positional.first() else {
        bail!("Usage: avhal-cli {usage}");
    };
    Ok(context.registry().find_device(descriptor)?)
}

fn cmd_list_devices(options: &Options, config: AvConfig) -> anyhow::Result<()> {
    let context = open_context(options, config, false)?;
    let registry = context.registry();

    let mut devices = Vec::new();
    for category in [MediaCategory::Audio, MediaCategory::Video] {
        devices.extend(registry.capture_devices(category)?);
        devices.extend(registry.playback_devices(category)?);
    }

    if options.json {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            println!("{:<8} {:<9} {}", d.category(), d.direction(), d);
        }
    }
    Ok(())
}

fn cmd_list_formats(options: &Options, config: AvConfig) -> anyhow::Result<()> {
    let context = open_context(options, config, false)?;
    let device = device_arg(options, &context, "list-formats <descriptor>")?;

    let formats: Vec<String> = match device.category() {
        MediaCategory::Video => context
            .registry()
            .picture_formats(&device)?
            .iter()
            .map(ToString::to_string)
            .collect(),
        MediaCategory::Audio => device.formats().iter().map(ToString::to_string).collect(),
    };

    if options.json {
        println!("{}", serde_json::to_string(&formats)?);
    } else {
        for f in formats {
            println!("{f}");
        }
    }
    Ok(())
}

fn cmd_list_controls(options: &Options, config: AvConfig) -> anyhow::Result<()> {
    let context = open_context(options, config, false)?;
    let device = device_arg(options, &context, "list-controls <descriptor>")?;
    let registry = context.registry();

    let mut controls = registry.picture_controls(&device)?;
    controls.extend(registry.camera_controls(&device)?);

    if options.json {
        let rows: Vec<serde_json::Value> = controls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "control": c.control_type().to_string(),
                    "min": c.min_value(),
                    "max": c.max_value(),
                    "step": c.step_value(),
                    "default": c.default_value(),
                    "auto_mode": c.has_auto_mode(),
                    "value": registry.control_value(&device, c.control_type()).ok(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
    } else {
        for c in controls {
            let value = registry
                .control_value(&device, c.control_type())
                .map(|v| v.to_string())
                .unwrap_or_else(|e| format!("<{e}>"));
            println!("{} [{}] = {}", c, c.kind(), value);
        }
    }
    Ok(())
}

fn cmd_set_control(options: &Options, config: AvConfig) -> anyhow::Result<()> {
    let usage = "set-control <descriptor> <kind.name> <value|auto|manual>";
    if options.positional.len() < 3 {
        bail!("Usage: avhal-cli {usage}");
    }
    let context = open_context(options, config, false)?;
    let device = device_arg(options, &context, usage)?;
    let control: ControlType = options.positional[1].parse()?;
    let registry = context.registry();

    match options.positional[2].as_str() {
        "auto" => registry.set_control_auto_mode(&device, control, true)?,
        "manual" => registry.set_control_auto_mode(&device, control, false)?,
        value => {
            let value: i64 = value
                .parse()
                .with_context(|| format!("invalid control value {value:?}"))?;
            registry.set_control_value(&device, control, value)?;
        }
    }

    let value = registry.control_value(&device, control)?;
    let auto = registry.control_auto_mode(&device, control)?;
    if options.json {
        println!("{}", serde_json::json!({ "control": control.to_string(), "value": value, "auto": auto }));
    } else {
        println!("{control} = {value} (auto: {auto})");
    }
    Ok(())
}

struct PrintingListener {
    json: bool,
}

impl PrintingListener {
    fn print(&self, event: &str, device: &Device) {
        if self.json {
            println!("{}", serde_json::json!({ "event": event, "device": device }));
        } else {
            println!("{event}: {device}");
        }
    }
}

impl HotplugListener for PrintingListener {
    fn device_connected(&self, device: &Device) {
        self.print("connected", device);
    }

    fn device_disconnected(&self, device: &Device) {
        self.print("disconnected", device);
    }
}

fn cmd_watch(options: &Options, config: AvConfig) -> anyhow::Result<()> {
    let context = open_context(options, config, true)?;
    context
        .registry()
        .attach_hotplug_listener(Arc::new(PrintingListener { json: options.json }));

    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;

    if !options.json {
        println!("Watching for device changes, press Ctrl-C to stop");
    }
    let _ = rx.recv();
    Ok(())
}

fn cmd_capture(options: &Options, config: AvConfig) -> anyhow::Result<()> {
    let context = open_context(options, config, false)?;
    let device = device_arg(options, &context, "capture <descriptor> [--buffers <n>]")?;
    if device.direction() != Direction::Capture {
        bail!("{device} is not a capture device");
    }

    let (tx, rx) = crossbeam_channel::bounded::<usize>(options.buffers.max(1));
    let sink = move |_data: &[u8], length: usize| -> anyhow::Result<()> {
        let _ = tx.try_send(length);
        Ok(())
    };

    let mut stream = match device.category() {
        MediaCategory::Audio => {
            let format = device
                .formats()
                .iter()
                .find_map(|f| f.as_audio().copied())
                .unwrap_or_else(AudioFormat::cd_quality);
            context.audio_capture_stream(&device, format, sink)?
        }
        MediaCategory::Video => {
            let format = context
                .registry()
                .picture_formats(&device)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("{device} reports no picture formats"))?;
            context.video_capture_stream(&device, format, sink)?
        }
    };

    stream.open()?;
    stream.start()?;

    let timeout = Duration::from_millis(options.timeout_ms);
    for index in 0..options.buffers {
        match rx.recv_timeout(timeout) {
            Ok(length) if options.json => {
                println!("{}", serde_json::json!({ "index": index, "bytes": length }))
            }
            Ok(length) => println!("Buffer {index}: {length} bytes"),
            Err(_) if options.json => println!("null"),
            Err(_) => println!("Timeout"),
        }
    }

    stream.stop()?;
    let position = stream.stream_position()?;
    stream.close()?;
    stream.dispose()?;

    if !options.json {
        println!("Captured {position} bytes");
    }
    Ok(())
}

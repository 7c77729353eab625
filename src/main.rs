#![allow(clippy::pedantic)]

mod cli;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use clap::Parser;
use evdev::Device;
use tracing::{info, warn};

use keymux::host::config::HostMapping;
use keymux::host::evdev_bridge::{self, DeviceKeyEmitter, DeviceLeds, EvdevForwarder, MacroSubHandler};
use keymux::{combination::SubHandler, host, Context, Forwarder, KeyboardLayout, Recognizer, VariableStore};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { device, config }) => run_device(device, config),
        Some(Commands::RunAll { settings }) => run_all(settings),
        Some(Commands::Validate { config }) => validate(config),
        Some(Commands::Completion { shell }) => {
            cli::generate_completion(shell);
            Ok(())
        }
        None => {
            cli::print_help();
            Ok(())
        }
    }
}

/// Grab every device named in a settings file, one OS thread and one
/// single-threaded event loop per device (spec.md §5: each device group owns
/// its own cooperative scheduling domain, so they never need to share one).
fn run_all(settings_path: Option<PathBuf>) -> Result<()> {
    init_tracing();

    let path = settings_path
        .or_else(host::config::default_settings_path)
        .context("no --settings given and no default settings path available")?;
    let settings = host::config::load_settings(&path)?;

    let handles: Vec<_> = settings
        .devices
        .into_iter()
        .map(|entry| std::thread::spawn(move || run_device(entry.device, entry.mapping)))
        .collect();

    for handle in handles {
        handle.join().expect("device thread panicked")?;
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn validate(config: PathBuf) -> Result<()> {
    init_tracing();
    let mut layout = KeyboardLayout::new();
    let mappings = host::config::load_mappings(&config, &mut layout)?;
    for hm in &mappings {
        if let Some(text) = &hm.mapping.macro_text {
            keymux::parse(text).with_context(|| format!("macro for target {:?}", hm.mapping.target_uinput))?;
        }
    }
    info!("{} mapping(s) parsed successfully", mappings.len());
    Ok(())
}

/// The one sub-handler type every mapping's `Recognizer` gets built with,
/// so a `Vec<Recognizer<MappingHandler>>` can hold both plain key remaps
/// and macro-driven ones uniformly.
enum MappingHandler {
    Key(DeviceKeyEmitter),
    Macro(MacroSubHandler),
}

impl SubHandler for MappingHandler {
    fn notify(&mut self, event: keymux::InputEvent, suppress: bool) -> bool {
        match self {
            MappingHandler::Key(h) => h.notify(event, suppress),
            MappingHandler::Macro(h) => h.notify(event, suppress),
        }
    }

    fn reset(&mut self) {
        match self {
            MappingHandler::Key(h) => h.reset(),
            MappingHandler::Macro(h) => h.reset(),
        }
    }
}

/// `ForwarderLookup` over `Context`'s own forwarders, for the duration of
/// one `Recognizer::notify` call. Release events the Recognizer needs to
/// emit for keys of a pressed combination prefix (spec.md §4.1.1) flow
/// through here to the passthrough forwarder registered under the device's
/// origin hash.
struct ContextForwarders<'a> {
    guard: std::sync::MutexGuard<'a, Context>,
}

impl keymux::ForwarderLookup for ContextForwarders<'_> {
    fn get_forwarder(&mut self, origin_hash: u64) -> Option<&mut dyn Forwarder> {
        self.guard.get_forwarder(origin_hash)
    }
}

fn run_device(device_path: PathBuf, config_path: PathBuf) -> Result<()> {
    init_tracing();

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run_event_loop(device_path, config_path))
}

async fn run_event_loop(device_path: PathBuf, config_path: PathBuf) -> Result<()> {
    let mut device = Device::open(&device_path).with_context(|| format!("opening {device_path:?}"))?;
    let origin = evdev_bridge::origin_hash(&device);

    let mut layout = KeyboardLayout::new();
    let mappings: Vec<HostMapping> = host::config::load_mappings(&config_path, &mut layout)?;

    let layout = Arc::new(Mutex::new(layout));
    let context = Arc::new(Mutex::new(Context::new()));
    let store = VariableStore::new();

    let passthrough = EvdevForwarder::new("keymux passthrough")?;
    context.lock().unwrap().add_forwarder(origin, Box::new(passthrough));
    context.lock().unwrap().set_upstream(Box::new(DeviceLeds::new(device_path.clone())));

    let mut recognizers = Vec::new();
    for hm in mappings {
        let forwarder: Arc<Mutex<Box<dyn Forwarder>>> =
            Arc::new(Mutex::new(Box::new(EvdevForwarder::new(&hm.mapping.target_uinput)?)));

        let handler = match (&hm.mapping.macro_text, hm.output_code) {
            (Some(text), _) => {
                let program = keymux::parse(text)?;
                let mac = keymux::Macro::new(program, store.clone(), context.clone(), layout.clone(), hm.mapping.flags);
                MappingHandler::Macro(MacroSubHandler::new(mac, forwarder))
            }
            (None, Some(code)) => MappingHandler::Key(DeviceKeyEmitter::new(keymux::event::ev::EV_KEY, code, forwarder)),
            (None, None) => unreachable!("load_mappings rejects mappings with neither"),
        };

        recognizers.push(Recognizer::new(hm.mapping.input_combination.clone(), hm.mapping.flags.release_combination_keys, handler));
    }

    device.grab().context("grabbing device")?;
    info!("grabbed {device_path:?}, {} mapping(s) active", recognizers.len());

    // `evdev::Device::fetch_events` is blocking I/O (the teacher's
    // `keyboard_thread.rs` reads the same way); run it on its own OS thread
    // and bridge raw events into this device's single cooperative event
    // loop over a channel, rather than pulling in evdev's async feature.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<evdev::InputEvent>(256);
    let reader_path = device_path.clone();
    std::thread::spawn(move || loop {
        match device.fetch_events() {
            Ok(batch) => {
                for raw in batch {
                    if tx.blocking_send(raw).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("reading {reader_path:?}: {e}");
                return;
            }
        }
    });

    while let Some(raw) = rx.recv().await {
        let Some(normalized) = evdev_bridge::normalize(raw, origin, 1) else {
            continue;
        };

        let mut absorbed_by_any = false;
        for recognizer in &mut recognizers {
            let mut forwarders = ContextForwarders { guard: context.lock().unwrap() };
            if recognizer.notify(normalized, false, &mut forwarders) {
                absorbed_by_any = true;
            }
        }

        if !absorbed_by_any {
            let mut ctx = context.lock().unwrap();
            if let Some(passthrough) = ctx.get_forwarder(origin) {
                passthrough.write(normalized.event_type, normalized.code, normalized.value);
                passthrough.syn();
            }
        }

        context.lock().unwrap().dispatch_to_listeners(&normalized);
    }

    Ok(())
}

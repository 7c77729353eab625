//! Bridges real `evdev`/`uinput` devices to the library's `InputEvent`,
//! `Forwarder`, and `UpstreamSource` seams. Grounded on the teacher's
//! `uinput.rs` (`VirtualKeyboard`, built from a `VirtualDeviceBuilder` with
//! every key code registered) and `keyboard_id.rs` (hashing device identity
//! from vendor/product/version/bustype since a serial number is often
//! absent on the virtual devices this crate targets).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, Device, EventType, InputEvent as EvdevInputEvent, Key};
use tracing::{debug, warn};

use crate::combination::SubHandler;
use crate::context::UpstreamSource;
use crate::event::{self, AxisSign, InputEvent};
use crate::forwarder::Forwarder;
use crate::macro_engine::Macro;

/// Stable identifier for a physical device, used as `InputConfig::origin_hash`
/// and as the key `Context::add_forwarder` files its `Forwarder` under.
/// Grounded on `keyboard_id.rs`'s hardware-id construction, collapsed to a
/// single `u64` since that's all `origin_hash` needs to be.
pub fn origin_hash(device: &Device) -> u64 {
    use std::hash::{Hash, Hasher};
    let id = device.input_id();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.vendor().hash(&mut hasher);
    id.product().hash(&mut hasher);
    id.version().hash(&mut hasher);
    id.bus_type().0.hash(&mut hasher);
    device.physical_path().unwrap_or("unknown").hash(&mut hasher);
    hasher.finish()
}

/// Converts one `evdev::InputEvent` off a grabbed source device into the
/// library's normalized `InputEvent`, collapsing `EV_ABS`/`EV_REL` axes to a
/// pressed/released digital event the Combination Recognizer can consume
/// (spec.md §2's "value-normalizer" pipeline stage). A `threshold` of zero
/// means "any nonzero value presses"; callers configure it per axis.
pub fn normalize(raw: EvdevInputEvent, origin: u64, threshold: i32) -> Option<InputEvent> {
    let event_type = raw.event_type().0;
    match event_type {
        t if t == event::ev::EV_KEY => Some(InputEvent::new(event_type, raw.code(), raw.value().clamp(0, 1), origin)),
        t if t == event::ev::EV_ABS || t == event::ev::EV_REL => {
            let value = raw.value();
            if value == 0 {
                // A return-to-center is ambiguous about which sign's digital
                // key it releases; callers track the last sign themselves
                // when this matters. Here it's treated as "released" on
                // whichever sign was last reported true by the caller.
                return Some(
                    InputEvent::new(event_type, raw.code(), 0, origin).with_axis_sign(AxisSign::Positive),
                );
            }
            let sign = if value.is_negative() { AxisSign::Negative } else { AxisSign::Positive };
            let pressed = value.unsigned_abs() as i32 >= threshold.max(1);
            Some(InputEvent::new(event_type, raw.code(), pressed as i32, origin).with_axis_sign(sign))
        }
        _ => None,
    }
}

/// A `Forwarder` backed by a real `uinput` virtual device. One instance per
/// physical source device, matching spec.md §5's "forwarders are exclusively
/// owned by their origin device".
pub struct EvdevForwarder {
    device: evdev::uinput::VirtualDevice,
}

impl EvdevForwarder {
    pub fn new(name: &str) -> anyhow::Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 0u16..256 {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()?.name(name).with_keys(&keys)?.build()?;

        // Give udev time to recognize the device before the first write,
        // matching the teacher's `VirtualKeyboard::new`.
        std::thread::sleep(std::time::Duration::from_millis(200));

        Ok(Self { device })
    }
}

impl Forwarder for EvdevForwarder {
    fn write(&mut self, event_type: u16, code: u16, value: i32) {
        let ev = EvdevInputEvent::new(EventType(event_type), code, value);
        if let Err(e) = self.device.emit(&[ev]) {
            warn!("uinput write failed: {e}");
        }
    }

    fn syn(&mut self) {
        let syn = EvdevInputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        if let Err(e) = self.device.emit(&[syn]) {
            warn!("uinput syn failed: {e}");
        }
    }
}

/// Reads LED state off the physical source device for `if_capslock`/
/// `if_numlock`. A device that doesn't report LEDs (or errors reading them)
/// is treated as "no locks active" rather than propagating the error —
/// matching spec.md §7's guidance that these are soft, log-and-continue
/// failure paths.
pub struct DeviceLeds {
    path: std::path::PathBuf,
}

impl DeviceLeds {
    pub fn new(path: std::path::PathBuf) -> Self {
        Self { path }
    }
}

impl UpstreamSource for DeviceLeds {
    fn leds(&self) -> HashSet<u16> {
        let Ok(device) = Device::open(&self.path) else {
            return HashSet::new();
        };
        let Some(led_state) = device.get_led_state().ok() else {
            debug!("device at {:?} does not report LED state", self.path);
            return HashSet::new();
        };
        led_state.iter().map(|led| led.0).collect()
    }
}

/// A `SubHandler` that writes a single fixed key straight to its own
/// `Forwarder`, closing the gap `combination::KeyEmitter` deliberately
/// leaves open ("a bare `KeyEmitter` only reports it handled this; hosts
/// that want this behavior compose it with one"). This is that composition.
pub struct DeviceKeyEmitter {
    target_type: u16,
    target_code: u16,
    forwarder: Arc<Mutex<Box<dyn Forwarder>>>,
}

impl DeviceKeyEmitter {
    pub fn new(target_type: u16, target_code: u16, forwarder: Arc<Mutex<Box<dyn Forwarder>>>) -> Self {
        Self { target_type, target_code, forwarder }
    }
}

impl SubHandler for DeviceKeyEmitter {
    fn notify(&mut self, event: InputEvent, suppress: bool) -> bool {
        if suppress {
            return false;
        }
        let value = i32::from(event.is_pressed());
        let mut fwd = self.forwarder.lock().unwrap();
        fwd.write(self.target_type, self.target_code, value);
        fwd.syn();
        true
    }

    fn reset(&mut self) {
        let mut fwd = self.forwarder.lock().unwrap();
        fwd.write(self.target_type, self.target_code, 0);
        fwd.syn();
    }
}

/// Adapts a shared `Forwarder` handle so a `Macro::run` can hold it across
/// its own `.await` points without holding the `std::sync::MutexGuard`
/// itself across them — each call locks only for the duration of the one
/// `write`/`syn` it performs.
struct SharedForwarder(Arc<Mutex<Box<dyn Forwarder>>>);

impl Forwarder for SharedForwarder {
    fn write(&mut self, event_type: u16, code: u16, value: i32) {
        self.0.lock().unwrap().write(event_type, code, value);
    }

    fn syn(&mut self) {
        self.0.lock().unwrap().syn();
    }
}

/// A `SubHandler` that drives a compiled `Macro` from combination
/// activation/deactivation. Activation presses the trigger and, if the
/// macro isn't already running, spawns its `run()` on the current
/// single-threaded `tokio::task::LocalSet` (spec.md §5: one cooperative
/// event loop per device, so a macro's own target device never sees
/// concurrent writers even though its `Forwarder` handle is `Arc<Mutex<_>>`
/// to satisfy `SubHandler: Send`).
pub struct MacroSubHandler {
    mac: Macro,
    forwarder: Arc<Mutex<Box<dyn Forwarder>>>,
}

impl MacroSubHandler {
    pub fn new(mac: Macro, forwarder: Arc<Mutex<Box<dyn Forwarder>>>) -> Self {
        Self { mac, forwarder }
    }
}

impl SubHandler for MacroSubHandler {
    fn notify(&mut self, event: InputEvent, suppress: bool) -> bool {
        if suppress {
            return false;
        }
        if event.is_pressed() {
            self.mac.press_trigger();
            if !self.mac.running() {
                let mac = self.mac.clone();
                let mut fwd = SharedForwarder(self.forwarder.clone());
                tokio::task::spawn_local(async move {
                    if let Err(e) = mac.run(&mut fwd).await {
                        warn!("macro aborted: {e}");
                    }
                });
            }
        } else {
            self.mac.release_trigger();
        }
        true
    }

    fn reset(&mut self) {
        self.mac.reset();
    }
}

//! The host: the external collaborator spec.md §1 characterizes only by the
//! interfaces it feeds the library (`Forwarder`, `UpstreamSource`, already-
//! parsed `Mapping`s). Device discovery, hotplug, presets, a GUI, and IPC are
//! explicitly out of scope (spec.md §1) and are not reimplemented here — this
//! module exists only to demonstrate the library wired to a real `evdev`
//! device and a real `uinput` sink, the way the teacher's `event_processor`
//! wires `KeymapProcessor` to `VirtualKeyboard`.

pub mod config;
pub mod evdev_bridge;

//! The Mapping Context (component H, spec.md §4.5): the glue object that
//! gives handlers and running macros access to the listener registry,
//! forwarders, and upstream device metadata.
//!
//! Context is the ownership root (spec.md §9): it owns forwarders and the
//! listener registry outright. Macros never hold a strong reference back to
//! Context — they hold a `ListenerToken`, an opaque identifier plus a
//! deregistration call, so no Context -> handler -> Context cycle can form.

use std::collections::{HashMap, HashSet};

use crate::event::InputEvent;
use crate::forwarder::{Forwarder, ForwarderLookup};

/// A running macro's hook into events it did not otherwise receive, used by
/// `if_single`/`if_tap`-style tasks that must observe "did anything else
/// happen before my trigger released". Returns `true` to mean "stop
/// propagating this event to later listeners" — it does not imply removal,
/// callers deregister explicitly once their wait is satisfied.
pub trait Listener: Send {
    fn on_event(&mut self, event: &InputEvent) -> bool;
}

/// Opaque handle returned by `Context::register_listener`. Carries no
/// reference to Context; holding one does not keep Context or any handler
/// alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

/// A stream of InputEvents plus LED state, per spec.md §6 "Upstream source".
/// Implemented by the host's `evdev_bridge` over a real device; a fake is
/// used in tests for `if_capslock`/`if_numlock`.
pub trait UpstreamSource: Send {
    fn leds(&self) -> HashSet<u16>;
}

/// Bundles listener registry, per-origin forwarders, and upstream LED
/// access for one device group's event loop. Not `Sync` — per spec.md §5
/// each device group runs its dispatch on a single cooperative event loop,
/// so a `Context` is never shared across threads without external
/// synchronization (the variable store is the one resource that is).
#[derive(Default)]
pub struct Context {
    forwarders: HashMap<u64, Box<dyn Forwarder>>,
    upstream: Option<Box<dyn UpstreamSource>>,
    listeners: HashMap<u64, Box<dyn Listener>>,
    next_listener_id: u64,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_forwarder(&mut self, origin_hash: u64, forwarder: Box<dyn Forwarder>) {
        self.forwarders.insert(origin_hash, forwarder);
    }

    pub fn set_upstream(&mut self, source: Box<dyn UpstreamSource>) {
        self.upstream = Some(source);
    }

    /// Active LED codes, per the bound `UpstreamSource`. Empty if no source
    /// is bound (`if_capslock`/`if_numlock` then see the lock as inactive).
    pub fn leds(&self) -> HashSet<u16> {
        self.upstream.as_ref().map(|s| s.leds()).unwrap_or_default()
    }

    /// Register a listener; returns a token the caller must pass to
    /// `deregister_listener` when it's done waiting (task completion,
    /// timeout, or `reset()`).
    pub fn register_listener(&mut self, listener: Box<dyn Listener>) -> ListenerToken {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.insert(id, listener);
        ListenerToken(id)
    }

    pub fn deregister_listener(&mut self, token: ListenerToken) {
        self.listeners.remove(&token.0);
    }

    /// Feed one event to every registered listener, in registration order.
    /// Called by the host's dispatch loop after the Recognizer chain has had
    /// its turn, so listeners observe events the way `if_single` expects:
    /// anything not already absorbed by the combination under test.
    pub fn dispatch_to_listeners(&mut self, event: &InputEvent) {
        for listener in self.listeners.values_mut() {
            listener.on_event(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl ForwarderLookup for Context {
    fn get_forwarder(&mut self, origin_hash: u64) -> Option<&mut dyn Forwarder> {
        self.forwarders.get_mut(&origin_hash).map(|f| f.as_mut())
    }
}

//! The Combination Recognizer (component D, spec.md §4.1).
//!
//! Tracks which keys of a user-defined combination are currently held,
//! decides when the combination fires and unfires, and coordinates release
//! bookkeeping so that neither stuck keys nor leaked keystrokes occur.
//! Grounded on `examples/original_source/inputremapper/injection/mapping_handlers/combination_handler.py`.

use std::collections::HashMap;
use tracing::{debug, error};

use crate::event::{InputCombination, InputEvent};
use crate::forwarder::ForwarderLookup;

/// What a combination's sub-handler does with a resolved activation/
/// deactivation event. Implemented by a direct key emitter or by
/// `macro_engine::runtime::Macro` (spec.md §6 "Sub-handler").
pub trait SubHandler: Send {
    /// `suppress` is only ever `true` when the caller wants to update state
    /// without emitting (used by upstream handlers composing several
    /// recognizers); the Recognizer itself never passes `true` except on
    /// a fresh activation it was asked to suppress.
    fn notify(&mut self, event: InputEvent, suppress: bool) -> bool;

    /// Tear down transient state (release any held keys, cancel timers).
    fn reset(&mut self);
}

/// A `SubHandler` that emits a single fixed key on activation/deactivation.
/// The simplest possible sub-handler, used when a mapping has no macro text.
pub struct KeyEmitter {
    pub target_type: u16,
    pub target_code: u16,
}

impl SubHandler for KeyEmitter {
    fn notify(&mut self, event: InputEvent, suppress: bool) -> bool {
        if suppress {
            return false;
        }
        // The caller is responsible for actually writing through a
        // Forwarder; a bare KeyEmitter only reports "I handled this",
        // since it has no Forwarder handle of its own. Hosts that want
        // this behavior compose it with one (see `host::evdev_bridge`).
        let _ = event;
        true
    }

    fn reset(&mut self) {}
}

/// Owns the per-mapping combination state described in spec.md §3.
pub struct Recognizer<H: SubHandler> {
    combination: InputCombination,
    flags_release_combination_keys: bool,
    /// `input_match_hash -> currently held`. Key set is fixed at construction.
    pressed: HashMap<u64, bool>,
    /// Snapshot of "sub-handler has been told the combination is down and
    /// not yet told it is up".
    output_active: bool,
    /// `(type, code) -> a release is still owed`.
    ///
    /// Keyed by `(type, code)` only, not `(type, code, origin)` — this is
    /// intentional (spec.md §9 Open Question): if the same code arrives
    /// from two physical devices at once, their pending releases collapse
    /// into one entry. Preserved rather than "fixed" to match the original.
    requires_release: HashMap<(u16, u16), bool>,
    sub_handler: H,
}

impl<H: SubHandler> Recognizer<H> {
    pub fn new(combination: InputCombination, release_combination_keys: bool, sub_handler: H) -> Self {
        let pressed = combination.match_hashes().map(|(hash, _)| (hash, false)).collect();
        Self {
            combination,
            flags_release_combination_keys: release_combination_keys,
            pressed,
            output_active: false,
            requires_release: HashMap::new(),
            sub_handler,
        }
    }

    pub fn sub_handler(&self) -> &H {
        &self.sub_handler
    }

    pub fn sub_handler_mut(&mut self) -> &mut H {
        &mut self.sub_handler
    }

    fn is_activated(&self) -> bool {
        self.pressed.values().all(|&v| v)
    }

    /// `true` = this event was absorbed and must not be forwarded to the
    /// physical-passthrough sink by the upstream router.
    pub fn notify(
        &mut self,
        event: InputEvent,
        suppress: bool,
        forwarders: &mut dyn ForwarderLookup,
    ) -> bool {
        let hash = event.input_match_hash();
        if !self.pressed.contains_key(&hash) {
            // Not responsible for this event.
            return false;
        }

        let was_active = self.output_active;
        self.pressed.insert(hash, event.is_pressed());
        let is_active = self.is_activated();
        let changed = is_active != was_active;

        if changed {
            if event.is_pressed() {
                self.handle_fresh_activation(suppress, event, forwarders)
            } else {
                self.handle_fresh_deactivation(event)
            }
        } else if event.is_pressed() {
            self.handle_hold_press(event)
        } else {
            self.handle_hold_release(event)
        }
    }

    /// §4.1.1
    fn handle_fresh_activation(
        &mut self,
        suppress: bool,
        event: InputEvent,
        forwarders: &mut dyn ForwarderLookup,
    ) -> bool {
        if suppress {
            return false;
        }

        if self.combination.len() > 1 && self.flags_release_combination_keys {
            self.forward_release(forwarders);
        }

        self.output_active = true;
        let result = self.sub_handler.notify(event, false);
        self.requires_release.insert(event.type_and_code(), !result);
        result
    }

    /// §4.1.2
    fn handle_fresh_deactivation(&mut self, event: InputEvent) -> bool {
        self.output_active = false;
        // The `suppress` hint is ignored here on purpose — otherwise stuck
        // outputs can occur.
        self.sub_handler.notify(event, false);
        !self.requires_release.remove(&event.type_and_code()).unwrap_or(false)
    }

    /// §4.1.3
    fn handle_hold_press(&mut self, event: InputEvent) -> bool {
        self.requires_release.insert(event.type_and_code(), !self.output_active);
        self.output_active
    }

    /// §4.1.4
    fn handle_hold_release(&mut self, event: InputEvent) -> bool {
        !self.requires_release.remove(&event.type_and_code()).unwrap_or(false)
    }

    /// Release events for other keys of the combination to the Forwarder
    /// bound to each key's origin device, so the pressed prefix keys don't
    /// appear held to downstream consumers while the combination's own
    /// effect is active.
    fn forward_release(&mut self, forwarders: &mut dyn ForwarderLookup) {
        let held: Vec<(u64, crate::event::InputConfig)> = self
            .combination
            .match_hashes()
            .filter(|(hash, _)| self.pressed.get(hash).copied().unwrap_or(false))
            .collect();

        for (_, cfg) in held {
            let tc = cfg.type_and_code();
            if !self.requires_release.get(&tc).copied().unwrap_or(false) {
                continue;
            }

            let Some(origin_hash) = cfg.origin_hash else {
                error!("cannot forward release for {:?}: no origin_hash", tc);
                continue;
            };

            match forwarders.get_forwarder(origin_hash) {
                Some(fwd) => {
                    debug!("forwarding release for {:?}", tc);
                    fwd.write(tc.0, tc.1, 0);
                    fwd.syn();
                }
                None => error!("cannot forward release for {:?}: unknown forwarder", tc),
            }

            self.requires_release.remove(&tc);
        }
    }

    /// §4.1.5
    pub fn reset(&mut self) {
        for v in self.pressed.values_mut() {
            *v = false;
        }
        self.requires_release.clear();
        self.output_active = false;
        self.sub_handler.reset();
    }

    pub fn output_active(&self) -> bool {
        self.output_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ev, InputConfig};
    use std::collections::HashMap as Map;

    struct FakeForwarders(Map<u64, crate::forwarder::RecordingForwarder>);

    impl ForwarderLookup for FakeForwarders {
        fn get_forwarder(&mut self, origin_hash: u64) -> Option<&mut dyn crate::forwarder::Forwarder> {
            self.0.get_mut(&origin_hash).map(|f| f as &mut dyn crate::forwarder::Forwarder)
        }
    }

    struct RecordingSubHandler {
        code: u16,
        events: Vec<(u16, bool)>,
    }

    impl SubHandler for RecordingSubHandler {
        fn notify(&mut self, event: InputEvent, suppress: bool) -> bool {
            if suppress {
                return false;
            }
            self.events.push((self.code, event.is_pressed()));
            true
        }

        fn reset(&mut self) {
            self.events.clear();
        }
    }

    fn press(event_type: u16, code: u16, origin: u64) -> InputEvent {
        InputEvent::new(event_type, code, 1, origin)
    }

    fn release(event_type: u16, code: u16, origin: u64) -> InputEvent {
        InputEvent::new(event_type, code, 0, origin)
    }

    /// Scenario 1 from spec.md §8: two-key combination, prefix forwarded.
    #[test]
    fn two_key_combination_releases_prefix_and_emits_sub_handler() {
        const A: u16 = 30;
        const B: u16 = 48;
        const ORIGIN: u64 = 1;

        let combo = InputCombination::new([
            InputConfig::digital(ev::EV_KEY, A, Some(ORIGIN)),
            InputConfig::digital(ev::EV_KEY, B, Some(ORIGIN)),
        ])
        .unwrap();

        let sub = RecordingSubHandler { code: 999, events: Vec::new() };
        let mut recognizer = Recognizer::new(combo, true, sub);

        let mut forwarders = FakeForwarders(Map::from([(ORIGIN, crate::forwarder::RecordingForwarder::new())]));

        // A down -> not yet active, forward.
        let absorbed = recognizer.notify(press(ev::EV_KEY, A, ORIGIN), false, &mut forwarders);
        assert!(!absorbed);

        // B down -> activation: releases A via forwarder, sub-handler fires.
        let absorbed = recognizer.notify(press(ev::EV_KEY, B, ORIGIN), false, &mut forwarders);
        assert!(absorbed);
        assert_eq!(recognizer.sub_handler().events, vec![(999, true)]);
        assert_eq!(forwarders.0.get(&ORIGIN).unwrap().key_trace(), vec![(A, 0)]);

        // B up -> deactivation, sub-handler fires, absorbed (no release was
        // pending for B because the sub-handler claimed the press).
        let absorbed = recognizer.notify(release(ev::EV_KEY, B, ORIGIN), false, &mut forwarders);
        assert!(absorbed);
        assert_eq!(recognizer.sub_handler().events, vec![(999, true), (999, false)]);

        // A up -> absorbed too (A's press was absorbed on activation, so a
        // release is still owed and consumed here).
        let absorbed = recognizer.notify(release(ev::EV_KEY, A, ORIGIN), false, &mut forwarders);
        assert!(absorbed);
    }

    #[test]
    fn reset_is_idempotent() {
        const A: u16 = 30;
        let combo = InputCombination::new([InputConfig::digital(ev::EV_KEY, A, Some(1))]).unwrap();
        let sub = RecordingSubHandler { code: 1, events: Vec::new() };
        let mut recognizer = Recognizer::new(combo, true, sub);
        let mut forwarders = FakeForwarders(Map::from([(1, crate::forwarder::RecordingForwarder::new())]));

        recognizer.notify(press(ev::EV_KEY, A, 1), false, &mut forwarders);
        recognizer.reset();
        let after_one = recognizer.output_active();
        recognizer.reset();
        let after_two = recognizer.output_active();
        assert_eq!(after_one, after_two);
        assert!(!after_two);
    }

    #[test]
    fn single_key_combination_never_sweeps_prefix_release() {
        const A: u16 = 30;
        let combo = InputCombination::new([InputConfig::digital(ev::EV_KEY, A, Some(1))]).unwrap();
        let sub = RecordingSubHandler { code: 1, events: Vec::new() };
        let mut recognizer = Recognizer::new(combo, true, sub);
        let mut forwarders = FakeForwarders(Map::from([(1, crate::forwarder::RecordingForwarder::new())]));

        let absorbed = recognizer.notify(press(ev::EV_KEY, A, 1), false, &mut forwarders);
        assert!(absorbed);
        assert!(forwarders.0.get(&1).unwrap().events.is_empty());
    }

    /// Hold-press/hold-release: a key re-pressed while not yet fully active
    /// is forwarded; once active it is absorbed (spec.md §4.1.3/4.1.4).
    #[test]
    fn hold_press_absorbs_only_once_active() {
        const A: u16 = 30;
        const B: u16 = 48;
        let combo = InputCombination::new([
            InputConfig::digital(ev::EV_KEY, A, Some(1)),
            InputConfig::digital(ev::EV_KEY, B, Some(1)),
        ])
        .unwrap();
        let sub = RecordingSubHandler { code: 1, events: Vec::new() };
        let mut recognizer = Recognizer::new(combo, true, sub);
        let mut forwarders = FakeForwarders(Map::from([(1, crate::forwarder::RecordingForwarder::new())]));

        // A alone: not active, forwarded.
        assert!(!recognizer.notify(press(ev::EV_KEY, A, 1), false, &mut forwarders));
    }
}

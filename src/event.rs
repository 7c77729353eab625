//! Event value model: the normalized representation of an input event and
//! the types a user-defined mapping is built from (component A, spec.md §3).

use smallvec::SmallVec;
use std::time::Instant;

/// Linux `evdev` event type numbers we care about. Kept as plain `u16`
/// rather than wrapping `evdev::EventType` so this module has no dependency
/// on the host's device layer; `host::evdev_bridge` is the only place that
/// talks to real `evdev` types.
pub mod ev {
    pub const EV_KEY: u16 = 0x01;
    pub const EV_REL: u16 = 0x02;
    pub const EV_ABS: u16 = 0x03;
    pub const EV_LED: u16 = 0x11;

    /// LED codes used by `if_capslock`/`if_numlock` to read `Context::leds()`.
    pub const LED_NUML: u16 = 0x00;
    pub const LED_CAPSL: u16 = 0x01;
}

/// Which side of an axis's zero point produced a synthesized press.
///
/// Set by the value-normalizer stage when it collapses an absolute/relative
/// axis into a pressed/released key-like event. `None` for inputs that were
/// already digital (`EV_KEY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisSign {
    Negative,
    Positive,
}

/// An immutable observation of one input transition.
///
/// `origin_device_id` is a stable hash of the physical device this event
/// came from (see `Context::device_hash`), used to route release events back
/// through the correct `Forwarder`.
#[derive(Debug, Clone, Copy)]
pub struct InputEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
    pub origin_device_id: u64,
    pub timestamp: Instant,
    pub axis_sign: Option<AxisSign>,
}

impl InputEvent {
    pub fn new(event_type: u16, code: u16, value: i32, origin_device_id: u64) -> Self {
        Self {
            event_type,
            code,
            value,
            origin_device_id,
            timestamp: Instant::now(),
            axis_sign: None,
        }
    }

    pub fn with_axis_sign(mut self, sign: AxisSign) -> Self {
        self.axis_sign = Some(sign);
        self
    }

    /// `(type, code)` pair — the identity a release event must share with
    /// the press it is releasing, independent of which device it came from.
    pub const fn type_and_code(&self) -> (u16, u16) {
        (self.event_type, self.code)
    }

    /// Identity key for combination membership: type + code, plus a
    /// value-sign discriminator when this event was synthesized from a
    /// typed axis (so `KEY_LEFT` and `KEY_RIGHT` synthesized off the same
    /// `EV_ABS` axis never collide).
    pub fn input_match_hash(&self) -> u64 {
        let sign_bit: u64 = match self.axis_sign {
            None => 0,
            Some(AxisSign::Negative) => 1,
            Some(AxisSign::Positive) => 2,
        };
        (u64::from(self.event_type) << 48) | (u64::from(self.code) << 16) | sign_bit
    }

    pub const fn is_pressed(&self) -> bool {
        self.value == 1
    }
}

/// One element of a user combination.
///
/// Analog configs (continuous axes that were never collapsed to
/// pressed/released) can never appear in a combination; construction
/// rejects them, matching `combination_handler.py`'s
/// `assert not input_config.defines_analog_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputConfig {
    pub event_type: u16,
    pub code: u16,
    pub analog: bool,
    pub origin_hash: Option<u64>,
}

impl InputConfig {
    pub const fn digital(event_type: u16, code: u16, origin_hash: Option<u64>) -> Self {
        Self {
            event_type,
            code,
            analog: false,
            origin_hash,
        }
    }

    pub const fn type_and_code(&self) -> (u16, u16) {
        (self.event_type, self.code)
    }
}

/// An ordered, non-empty sequence of `InputConfig`s. All of them must be
/// held for the combination to activate; order matters only for the
/// release-forwarding sweep in `Recognizer::notify`.
#[derive(Debug, Clone)]
pub struct InputCombination {
    configs: SmallVec<[InputConfig; 4]>,
}

impl InputCombination {
    /// Build a combination, rejecting empty and analog input.
    pub fn new(configs: impl IntoIterator<Item = InputConfig>) -> Result<Self, crate::error::CombinationError> {
        let configs: SmallVec<[InputConfig; 4]> = configs.into_iter().collect();
        if configs.is_empty() {
            return Err(crate::error::CombinationError::EmptyCombination);
        }
        if configs.iter().any(|c| c.analog) {
            return Err(crate::error::CombinationError::AnalogInCombination);
        }
        Ok(Self { configs })
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputConfig> {
        self.configs.iter()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Hashes used as keys for the Recognizer's `pressed` map, in
    /// combination order — the synthetic `origin_device_id` of `0` is
    /// irrelevant here since `input_match_hash` never looks at it.
    pub fn match_hashes(&self) -> impl Iterator<Item = (u64, InputConfig)> + '_ {
        self.configs.iter().map(|cfg| {
            let probe = InputEvent::new(cfg.event_type, cfg.code, 0, 0);
            (probe.input_match_hash(), *cfg)
        })
    }
}

/// Flags that tune how a `Mapping` behaves, independent of what it fires.
#[derive(Debug, Clone, Copy)]
pub struct MappingFlags {
    /// Whether a fresh activation should release the keys of the pressed
    /// combination prefix (spec.md §4.1.1 step 1).
    pub release_combination_keys: bool,
    /// Sleep inserted by `key`/`key_down`/`key_up` between adjacent
    /// emissions (spec.md §4.3).
    pub macro_key_sleep_ms: u64,
    /// Tick rate in Hz for `mouse`/`wheel` tasks (spec.md §4.3).
    pub rel_rate: u32,
}

impl Default for MappingFlags {
    fn default() -> Self {
        Self {
            release_combination_keys: true,
            macro_key_sleep_ms: 0,
            rel_rate: 60,
        }
    }
}

/// A user-defined rule: a combination to watch, a target `uinput` to write
/// to, and either a plain output key or a macro program.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub input_combination: InputCombination,
    pub target_uinput: String,
    pub macro_text: Option<String>,
    pub flags: MappingFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_combination_is_rejected() {
        let result = InputCombination::new(std::iter::empty());
        assert!(matches!(
            result,
            Err(crate::error::CombinationError::EmptyCombination)
        ));
    }

    #[test]
    fn analog_config_is_rejected() {
        let analog = InputConfig {
            event_type: ev::EV_ABS,
            code: 0,
            analog: true,
            origin_hash: None,
        };
        let result = InputCombination::new([analog]);
        assert!(matches!(
            result,
            Err(crate::error::CombinationError::AnalogInCombination)
        ));
    }

    #[test]
    fn axis_sign_discriminates_match_hash() {
        let base = InputEvent::new(ev::EV_ABS, 1, 1, 0);
        let neg = base.with_axis_sign(AxisSign::Negative);
        let pos = base.with_axis_sign(AxisSign::Positive);
        assert_ne!(neg.input_match_hash(), pos.input_match_hash());
        assert_ne!(neg.input_match_hash(), base.input_match_hash());
    }
}

//! The Keyboard Layout Table (component B, spec.md §3 "Key-symbol
//! resolution"): name <-> evdev code lookups, plus allocation of a free code
//! for symbols the layout doesn't know about.
//!
//! Grounded on `src/keycode.rs`'s `define_keycodes!` macro for the static
//! table, and on
//! `examples/original_source/keymapper/state.py`'s `SystemMapping` for the
//! unknown-symbol allocation behavior.

use std::collections::HashMap;
use tracing::debug;

use crate::error::ParseError;

/// Rough classification of a key, used only for `is_modifier` convenience —
/// nothing in the recognizer or macro engine branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCategory {
    Modifier,
    Letter,
    Number,
    Function,
    Special,
    Navigation,
    Numpad,
    Media,
    International,
    Lock,
    General,
}

/// Declares a static symbol table: `NAME = code, category,` pairs become
/// `KeyboardLayout::STATIC` entries plus a `name()`/`category()` lookup.
macro_rules! define_keycodes {
    (
        $(
            $variant:ident = $code:expr, $category:ident,
        )*
    ) => {
        /// Static name -> code pairs known without consulting the live
        /// system layout. Lowercase name, matching `SystemMapping`'s
        /// case-insensitive lookups.
        const STATIC_TABLE: &[(&str, u16, KeyCategory)] = &[
            $(
                (stringify!($variant), $code, define_keycodes!(@@category $category)),
            )*
        ];
    };

    (@@category modifier) => { KeyCategory::Modifier };
    (@@category letter) => { KeyCategory::Letter };
    (@@category number) => { KeyCategory::Number };
    (@@category function) => { KeyCategory::Function };
    (@@category special) => { KeyCategory::Special };
    (@@category navigation) => { KeyCategory::Navigation };
    (@@category numpad) => { KeyCategory::Numpad };
    (@@category media) => { KeyCategory::Media };
    (@@category international) => { KeyCategory::International };
    (@@category lock) => { KeyCategory::Lock };
    (@@category general) => { KeyCategory::General };
}

define_keycodes! {
    key_a = 30, letter,
    key_b = 48, letter,
    key_c = 46, letter,
    key_d = 32, letter,
    key_e = 18, letter,
    key_f = 33, letter,
    key_g = 34, letter,
    key_h = 35, letter,
    key_i = 23, letter,
    key_j = 36, letter,
    key_k = 37, letter,
    key_l = 38, letter,
    key_m = 50, letter,
    key_n = 49, letter,
    key_o = 24, letter,
    key_p = 25, letter,
    key_q = 16, letter,
    key_r = 19, letter,
    key_s = 31, letter,
    key_t = 20, letter,
    key_u = 22, letter,
    key_v = 47, letter,
    key_w = 17, letter,
    key_x = 45, letter,
    key_y = 21, letter,
    key_z = 44, letter,

    key_1 = 2, number,
    key_2 = 3, number,
    key_3 = 4, number,
    key_4 = 5, number,
    key_5 = 6, number,
    key_6 = 7, number,
    key_7 = 8, number,
    key_8 = 9, number,
    key_9 = 10, number,
    key_0 = 11, number,

    key_leftctrl = 29, modifier,
    key_leftshift = 42, modifier,
    key_leftalt = 56, modifier,
    key_leftmeta = 125, modifier,
    key_rightctrl = 97, modifier,
    key_rightshift = 54, modifier,
    key_rightalt = 100, modifier,
    key_rightmeta = 126, modifier,

    key_esc = 1, special,
    key_capslock = 58, lock,
    key_tab = 15, special,
    key_space = 57, special,
    key_enter = 28, special,
    key_backspace = 14, special,
    key_delete = 111, special,
    key_grave = 41, special,
    key_minus = 12, special,
    key_equal = 13, special,
    key_leftbrace = 26, special,
    key_rightbrace = 27, special,
    key_backslash = 43, special,
    key_semicolon = 39, special,
    key_apostrophe = 40, special,
    key_comma = 51, special,
    key_dot = 52, special,
    key_slash = 53, special,

    key_sysrq = 99, special,
    key_pause = 119, special,

    key_left = 105, navigation,
    key_down = 108, navigation,
    key_up = 103, navigation,
    key_right = 106, navigation,

    key_f1 = 59, function,
    key_f2 = 60, function,
    key_f3 = 61, function,
    key_f4 = 62, function,
    key_f5 = 63, function,
    key_f6 = 64, function,
    key_f7 = 65, function,
    key_f8 = 66, function,
    key_f9 = 67, function,
    key_f10 = 68, function,
    key_f11 = 87, function,
    key_f12 = 88, function,
    key_f13 = 183, function,
    key_f14 = 184, function,
    key_f15 = 185, function,
    key_f16 = 186, function,
    key_f17 = 187, function,
    key_f18 = 188, function,
    key_f19 = 189, function,
    key_f20 = 190, function,
    key_f21 = 191, function,
    key_f22 = 192, function,
    key_f23 = 193, function,
    key_f24 = 194, function,

    key_scrolllock = 70, lock,
    key_numlock = 69, lock,

    key_insert = 110, navigation,
    key_home = 102, navigation,
    key_pageup = 104, navigation,
    key_end = 107, navigation,
    key_pagedown = 109, navigation,

    key_kpslash = 98, numpad,
    key_kpasterisk = 55, numpad,
    key_kpminus = 74, numpad,
    key_kpplus = 78, numpad,
    key_kpenter = 96, numpad,
    key_kp1 = 79, numpad,
    key_kp2 = 80, numpad,
    key_kp3 = 81, numpad,
    key_kp4 = 75, numpad,
    key_kp5 = 76, numpad,
    key_kp6 = 77, numpad,
    key_kp7 = 71, numpad,
    key_kp8 = 72, numpad,
    key_kp9 = 73, numpad,
    key_kp0 = 82, numpad,
    key_kpdot = 83, numpad,

    key_mute = 113, media,
    key_volumedown = 114, media,
    key_volumeup = 115, media,
}

/// Bare aliases for the most commonly typed symbol names (spec.md §6 gives
/// `a`, `minus`, `btn_left` as examples alongside the full `KEY_A` form) plus
/// the mouse button codes, which have no `key_`-prefixed counterpart at all.
/// Kept as a second table rather than folded into `define_keycodes!` because
/// bare digits and `btn_*` names aren't valid Rust identifiers for that
/// macro's `$variant:ident` matcher.
const ALIAS_TABLE: &[(&str, u16, KeyCategory)] = &[
    ("a", 30, KeyCategory::Letter),
    ("b", 48, KeyCategory::Letter),
    ("c", 46, KeyCategory::Letter),
    ("d", 32, KeyCategory::Letter),
    ("e", 18, KeyCategory::Letter),
    ("f", 33, KeyCategory::Letter),
    ("g", 34, KeyCategory::Letter),
    ("h", 35, KeyCategory::Letter),
    ("i", 23, KeyCategory::Letter),
    ("j", 36, KeyCategory::Letter),
    ("k", 37, KeyCategory::Letter),
    ("l", 38, KeyCategory::Letter),
    ("m", 50, KeyCategory::Letter),
    ("n", 49, KeyCategory::Letter),
    ("o", 24, KeyCategory::Letter),
    ("p", 25, KeyCategory::Letter),
    ("q", 16, KeyCategory::Letter),
    ("r", 19, KeyCategory::Letter),
    ("s", 31, KeyCategory::Letter),
    ("t", 20, KeyCategory::Letter),
    ("u", 22, KeyCategory::Letter),
    ("v", 47, KeyCategory::Letter),
    ("w", 17, KeyCategory::Letter),
    ("x", 45, KeyCategory::Letter),
    ("y", 21, KeyCategory::Letter),
    ("z", 44, KeyCategory::Letter),
    ("0", 11, KeyCategory::Number),
    ("1", 2, KeyCategory::Number),
    ("2", 3, KeyCategory::Number),
    ("3", 4, KeyCategory::Number),
    ("4", 5, KeyCategory::Number),
    ("5", 6, KeyCategory::Number),
    ("6", 7, KeyCategory::Number),
    ("7", 8, KeyCategory::Number),
    ("8", 9, KeyCategory::Number),
    ("9", 10, KeyCategory::Number),
    ("minus", 12, KeyCategory::Special),
    ("equal", 13, KeyCategory::Special),
    ("space", 57, KeyCategory::Special),
    ("tab", 15, KeyCategory::Special),
    ("enter", 28, KeyCategory::Special),
    ("esc", 1, KeyCategory::Special),
    ("ctrl", 29, KeyCategory::Modifier),
    ("shift", 42, KeyCategory::Modifier),
    ("alt", 56, KeyCategory::Modifier),
    ("meta", 125, KeyCategory::Modifier),
    ("btn_left", 0x110, KeyCategory::General),
    ("btn_right", 0x111, KeyCategory::General),
    ("btn_middle", 0x112, KeyCategory::General),
    ("btn_side", 0x113, KeyCategory::General),
    ("btn_extra", 0x114, KeyCategory::General),
    ("btn_forward", 0x115, KeyCategory::General),
    ("btn_back", 0x116, KeyCategory::General),
];

/// Name/code table for a mapping's runtime target device, with dynamic
/// allocation of codes for symbols the static/system layout doesn't know.
///
/// One instance is normally shared (via `Context`, component H) across all
/// macros/combinations targeting the same `uinput`, so repeated lookups of
/// the same unknown symbol are stable — mirrors `SystemMapping` being a
/// process-wide singleton in the original.
#[derive(Debug, Default)]
pub struct KeyboardLayout {
    /// Extra name -> code entries layered on top of `STATIC_TABLE`, e.g.
    /// learned from the live X/Wayland layout by the host. Lowercase keys.
    extra: HashMap<String, u16>,
    /// Codes already spoken for, so `allocate` never hands out a code that's
    /// in active use. Populated from `extra` and the static table lazily.
    occupied: std::collections::HashSet<u16>,
    /// code -> symbol name, for codes handed out by `allocate`. Keyed so a
    /// second `allocate("foo")` call returns the same code as the first.
    allocated_unknowns: HashMap<u16, String>,
}

impl KeyboardLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer additional name -> code pairs on top of the static table
    /// (e.g. ones read from the live system layout by the host).
    pub fn extend(&mut self, entries: impl IntoIterator<Item = (String, u16)>) {
        for (name, code) in entries {
            let name = name.to_lowercase();
            self.occupied.insert(code);
            self.extra.insert(name, code);
        }
    }

    /// Resolve a symbol name to a code, consulting the static table first
    /// then the extra entries. Case-insensitive.
    pub fn get(&self, name: &str) -> Option<u16> {
        let name = name.to_lowercase();
        STATIC_TABLE
            .iter()
            .chain(ALIAS_TABLE)
            .find(|(n, _, _)| *n == name)
            .map(|(_, code, _)| *code)
            .or_else(|| self.extra.get(&name).copied())
    }

    /// The category of a statically-known key, if any.
    pub fn category(&self, name: &str) -> Option<KeyCategory> {
        let name = name.to_lowercase();
        STATIC_TABLE.iter().chain(ALIAS_TABLE).find(|(n, _, _)| *n == name).map(|(_, _, c)| *c)
    }

    /// Resolve `name` to a code to inject, allocating a free one if the
    /// layout has never heard of it. Writing that code through a `uinput`
    /// without also configuring the device's keymap to interpret it as
    /// `name` won't do anything useful — this only reserves the slot.
    ///
    /// Grounded on `SystemMapping.get_or_allocate`: known symbols resolve
    /// directly; previously-allocated unknowns return their remembered code;
    /// otherwise the first unoccupied code in `0..256` is claimed.
    pub fn get_or_allocate(&mut self, name: &str) -> Result<u16, ParseError> {
        let name = name.to_lowercase();

        if let Some(code) = self.get(&name) {
            return Ok(code);
        }

        if let Some((&code, _)) = self.allocated_unknowns.iter().find(|(_, n)| **n == name) {
            return Ok(code);
        }

        for code in 0u16..256 {
            let claimed_statically = STATIC_TABLE.iter().chain(ALIAS_TABLE).any(|(_, c, _)| *c == code);
            if claimed_statically || self.occupied.contains(&code) || self.allocated_unknowns.contains_key(&code) {
                continue;
            }
            self.allocated_unknowns.insert(code, name.clone());
            debug!("allocated code {code} for unknown symbol {name:?}");
            return Ok(code);
        }

        Err(ParseError::UnknownSymbol(name))
    }

    /// Every name the layout can currently resolve, static plus learned.
    pub fn known_names(&self) -> impl Iterator<Item = &str> {
        STATIC_TABLE
            .iter()
            .chain(ALIAS_TABLE)
            .map(|(n, _, _)| *n)
            .chain(self.extra.keys().map(String::as_str))
    }
}

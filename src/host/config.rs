//! Loads a mapping list from a RON file into `event::Mapping` values
//! (spec.md §0: "the binary loads a mapping list from a small RON/TOML
//! file... the library itself accepts already-parsed `Mapping` values and
//! never touches a filesystem"). Grounded on the teacher's `config.rs`
//! (`Config::load`/`load_or_default`, RON as the on-disk format) but scoped
//! down to the one thing this crate's library actually consumes: a list of
//! combinations and their target behavior.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::event::{InputCombination, InputConfig, Mapping, MappingFlags};
use crate::layout::KeyboardLayout;

/// One combination element as written in the RON file: a key symbol name
/// (resolved through the layout table at load time) plus the origin device
/// this config is bound to.
#[derive(Debug, Deserialize)]
struct RawInputConfig {
    symbol: String,
    #[serde(default)]
    origin_hash: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawFlags {
    #[serde(default = "default_true")]
    release_combination_keys: bool,
    #[serde(default)]
    macro_key_sleep_ms: u64,
    #[serde(default = "default_rel_rate")]
    rel_rate: u32,
}

fn default_true() -> bool {
    true
}

fn default_rel_rate() -> u32 {
    60
}

impl Default for RawFlags {
    fn default() -> Self {
        Self {
            release_combination_keys: default_true(),
            macro_key_sleep_ms: 0,
            rel_rate: default_rel_rate(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    combination: Vec<RawInputConfig>,
    target_uinput: String,
    #[serde(default)]
    macro_text: Option<String>,
    /// The symbol to emit when this mapping has no `macro_text` — resolved
    /// to a code at load time and handed to a host-side `DeviceKeyEmitter`.
    /// Not part of the library's `Mapping` (spec.md's sub-handler contract
    /// only names "a direct code emitter" in the abstract); this is purely
    /// host wiring, so it stays a load-time detail rather than a library field.
    #[serde(default)]
    output_symbol: Option<String>,
    #[serde(default)]
    flags: RawFlags,
}

#[derive(Debug, Deserialize)]
struct RawMappingFile {
    mappings: Vec<RawMapping>,
}

/// A loaded `Mapping` plus the host-only detail needed to build its
/// sub-handler: the resolved output code for a plain (non-macro) mapping.
#[derive(Debug, Clone)]
pub struct HostMapping {
    pub mapping: Mapping,
    pub output_code: Option<u16>,
}

/// Parse a RON mapping file, resolving every symbol name through `layout`
/// (allocating codes for symbols `layout` doesn't already know, same as a
/// macro body would at runtime).
pub fn load_mappings(path: &Path, layout: &mut KeyboardLayout) -> Result<Vec<HostMapping>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading mapping file {path:?}"))?;
    let raw: RawMappingFile = ron::from_str(&text).with_context(|| format!("parsing mapping file {path:?}"))?;

    raw.mappings
        .into_iter()
        .map(|m| build_mapping(m, layout))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("resolving symbols in {path:?}"))
}

fn build_mapping(raw: RawMapping, layout: &mut KeyboardLayout) -> Result<HostMapping> {
    let configs = raw
        .combination
        .iter()
        .map(|c| -> Result<InputConfig> {
            let code = layout.get_or_allocate(&c.symbol)?;
            Ok(InputConfig::digital(crate::event::ev::EV_KEY, code, c.origin_hash))
        })
        .collect::<Result<Vec<_>>>()?;

    let input_combination = InputCombination::new(configs).context("building combination")?;

    let output_code = raw
        .output_symbol
        .as_deref()
        .map(|s| layout.get_or_allocate(s))
        .transpose()?;

    if raw.macro_text.is_none() && output_code.is_none() {
        anyhow::bail!("mapping for {:?} has neither macro_text nor output_symbol", raw.target_uinput);
    }

    let mapping = Mapping {
        input_combination,
        target_uinput: raw.target_uinput,
        macro_text: raw.macro_text,
        flags: MappingFlags {
            release_combination_keys: raw.flags.release_combination_keys,
            macro_key_sleep_ms: raw.flags.macro_key_sleep_ms,
            rel_rate: raw.flags.rel_rate,
        },
    };

    Ok(HostMapping { mapping, output_code })
}

/// Top-level daemon settings (spec.md's ambient Config stack, SPEC_FULL §1):
/// which devices to grab and which RON mapping file each one runs, read from
/// a small TOML file. Separate from the per-mapping RON format above,
/// mirroring the teacher's split between a daemon-wide settings file and the
/// RON content it points at.
#[derive(Debug, Deserialize)]
pub struct Settings {
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub device: std::path::PathBuf,
    pub mapping: std::path::PathBuf,
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading settings file {path:?}"))?;
    toml::from_str(&text).with_context(|| format!("parsing settings file {path:?}"))
}

/// `$XDG_CONFIG_HOME/keymux/settings.toml`, used when no `--settings` flag
/// is given to the `run-all` subcommand.
pub fn default_settings_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("keymux").join("settings.toml"))
}

#![allow(clippy::pedantic, clippy::module_inception)]

//! `keymux` — a combination recognizer and macro engine for Linux input
//! devices: the two tightly-coupled subsystems of a key-remapper's core
//! (tracking held-key combinations, and interpreting/scheduling the small
//! macro language a combination can fire) factored out of everything that
//! merely feeds them events (device discovery, presets, a GUI, `uinput`
//! plumbing). Those external collaborators live under [`host`] as a thin
//! demonstration wiring, not as the deliverable of this crate.

pub mod combination;
pub mod context;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod host;
pub mod layout;
pub mod macro_engine;

pub use combination::{KeyEmitter, Recognizer, SubHandler};
pub use context::{Context, Listener, ListenerToken, UpstreamSource};
pub use error::{CombinationError, ParseError, RuntimeError};
pub use event::{InputCombination, InputConfig, InputEvent, Mapping, MappingFlags};
pub use forwarder::{Forwarder, ForwarderLookup};
pub use layout::KeyboardLayout;
pub use macro_engine::{parse, Macro, Program, Task, Value, Variable, VariableStore};

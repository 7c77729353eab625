//! The macro Variable store (component F, spec.md §4.4).
//!
//! Per spec.md §9's redesign note this is an explicit handle passed to each
//! device's event loop, never an ambient global — construct one in the host
//! and clone it into every `Macro`/`Context` that should share it. Cloning
//! is cheap (an `Arc` bump); every clone observes the same underlying map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::value::Value;

/// Process-wide (within this handle's sharing scope) name -> value map.
/// A single mutex serializes writes; reads take a consistent snapshot of
/// one key, matching spec.md §5's "multi-reader / multi-writer" contract.
///
/// True cross-OS-process sharing (spec.md §5's "one injector process per
/// device group") would back this with shared memory; no crate in this
/// project's dependency stack provides that primitive, so this handle is
/// shared within one process via `Clone` (an `Arc` bump) — sufficient for
/// the single-daemon deployment the binary in this crate targets. See
/// `DESIGN.md` for the tradeoff.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.inner.lock().unwrap().insert(name.to_string(), value);
    }

    /// Remove every variable. Only used by tests, matching the original
    /// store's `clear()`.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

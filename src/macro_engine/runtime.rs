//! The Macro Runtime (component G, spec.md §4.3): schedules a parsed
//! `Program` cooperatively, suspending on timers, the trigger's
//! press/release signal, and Context listeners.
//!
//! Grounded on
//! `examples/original_source/tests/unit/test_macros.py`'s
//! `trigger_sequence`/`release_sequence` harness, which pins `press_trigger`
//! / `release_trigger` as plain signals and `run()` as idempotent while
//! already running — and on the teacher's `tokio`-based async daemon
//! orchestration style (`daemon.rs`) for how a suspending task tree is
//! structured around `tokio::select!` and `Notify`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

use super::ast::Program;
use super::store::VariableStore;
use super::tasks::{self, ExecCtx};
use crate::context::Context;
use crate::error::RuntimeError;
use crate::event::MappingFlags;
use crate::forwarder::Forwarder;
use crate::layout::KeyboardLayout;

/// One compiled macro program bound to a trigger. Cheap to clone (every
/// field is an `Arc`), so the same `Macro` handle can be held by both the
/// Recognizer that triggers it and whatever spawned its `run()` task.
#[derive(Clone)]
pub struct Macro {
    program: Arc<Program>,
    store: VariableStore,
    context: Arc<Mutex<Context>>,
    layout: Arc<Mutex<KeyboardLayout>>,
    flags: MappingFlags,
    trigger_pressed: Arc<AtomicBool>,
    release_notify: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl Macro {
    pub fn new(
        program: Program,
        store: VariableStore,
        context: Arc<Mutex<Context>>,
        layout: Arc<Mutex<KeyboardLayout>>,
        flags: MappingFlags,
    ) -> Self {
        Self {
            program: Arc::new(program),
            store,
            context,
            layout,
            flags,
            trigger_pressed: Arc::new(AtomicBool::new(false)),
            release_notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Idempotent; a release when not pressed has no effect beyond waking
    /// whatever happens to be waiting.
    pub fn press_trigger(&self) {
        self.trigger_pressed.store(true, Ordering::SeqCst);
    }

    /// Idempotent; a release when not pressed still notifies (harmless —
    /// nothing is waiting).
    pub fn release_trigger(&self) {
        self.trigger_pressed.store(false, Ordering::SeqCst);
        self.release_notify.notify_waiters();
    }

    pub fn is_trigger_pressed(&self) -> bool {
        self.trigger_pressed.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the program to completion, writing emitted events through
    /// `forwarder`. A second `run()` on an already-running macro is a
    /// silent no-op (spec.md §4.3).
    pub async fn run(&self, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("run() called on an already-running macro, ignoring");
            return Ok(());
        }

        let ctx = ExecCtx {
            store: &self.store,
            context: &self.context,
            layout: &self.layout,
            flags: self.flags,
            trigger_pressed: &self.trigger_pressed,
            release_notify: &self.release_notify,
        };
        let result = tasks::run_program(&ctx, &self.program, forwarder).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Release any keys a cancelled run might have left down and cancel
    /// outstanding suspension. Concretely: flip the trigger to released so
    /// any `hold`/`hold_keys`/`mouse`/`wheel` loop currently polling
    /// `trigger_pressed` exits on its next check, then mark not-running so
    /// a fresh `run()` is accepted.
    pub fn reset(&self) {
        self.release_trigger();
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::RecordingForwarder;
    use crate::macro_engine::parser::parse;

    fn test_macro(source: &str) -> (Macro, Arc<Mutex<Context>>) {
        let context = Arc::new(Mutex::new(Context::new()));
        let program = parse(source).unwrap();
        let store = VariableStore::new();
        let layout = Arc::new(Mutex::new(KeyboardLayout::new()));
        let flags = MappingFlags { macro_key_sleep_ms: 0, ..Default::default() };
        (Macro::new(program, store, context.clone(), layout, flags), context)
    }

    #[tokio::test]
    async fn duplicate_run_is_a_no_op() {
        let (m, _ctx) = test_macro("key(key_a)");
        let mut fwd1 = RecordingForwarder::new();
        let mut fwd2 = RecordingForwarder::new();
        let run1 = m.run(&mut fwd1);
        let run2 = m.run(&mut fwd2);
        let (r1, r2) = tokio::join!(run1, run2);
        assert!(r1.is_ok());
        assert!(r2.is_ok());
    }

    #[tokio::test]
    async fn key_emits_down_then_up() {
        let (m, _ctx) = test_macro("key(key_a)");
        let mut fwd = RecordingForwarder::new();
        m.run(&mut fwd).await.unwrap();
        assert_eq!(fwd.key_trace(), vec![(30, 1), (30, 0)]);
    }
}

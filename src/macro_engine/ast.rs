//! The Macro AST (component E, spec.md §3 "Macro AST", §4.2 task table).
//!
//! Each task owns typed `Variable` slots instead of the constant/positional
//! split a reflection-driven parser would need — Rust's enums let the type
//! checker enforce "this task has exactly these typed arguments" for free,
//! so the parser builds `Task` values directly rather than going through a
//! generic `ArgumentConfig` description at runtime. `tasks.rs` resolves each
//! slot's `Variable` against the accepted `TypeTag`s for that slot when the
//! task actually runs.

use super::value::Variable;

/// Which axis a `mouse`/`wheel` task moves, resolved from the task's
/// `direction` string argument at parse time (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Up,
    Down,
    Left,
    Right,
}

/// A key task's exact behavior: `key` presses and releases, `key_down` and
/// `key_up` emit only one half (used to build chords by hand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Tap,
    Down,
    Up,
}

/// A sequence of tasks run depth-first, left-to-right — the body bound by
/// `.` chaining at the top level, or nested inside a task like `hold(...)`,
/// `repeat(...)`, `if_tap(...)`.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub tasks: Vec<Task>,
}

impl Program {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// One node of the task tree (spec.md §4.2 "Known tasks and their
/// signatures").
#[derive(Debug, Clone)]
pub enum Task {
    Key { symbol: Variable, edge: KeyEdge },
    Hold { child: Option<Program> },
    HoldKeys { symbols: Vec<Variable> },
    Modify { symbol: Variable, child: Program },
    Repeat { count: Variable, child: Program },
    Wait { min_ms: Variable, max_ms: Option<Variable> },
    Mouse { axis: Axis, speed: Variable, accel: Option<Variable> },
    Wheel { axis: Axis, speed: Variable },
    Event { event_type: Variable, code: Variable, value: Variable },
    Set { name: String, value: Variable },
    Add { name: String, amount: Variable },
    IfEq { a: Variable, b: Variable, then: Option<Program>, els: Option<Program> },
    /// Legacy spelling: `name` is read straight out of the store rather
    /// than being a general `Variable` expression (spec.md §2
    /// "Supplemented features").
    IfEqName { name: String, value: Variable, then: Option<Program>, els: Option<Program> },
    IfTap { then: Option<Program>, els: Option<Program>, timeout_ms: Variable },
    IfSingle { then: Option<Program>, els: Option<Program>, timeout_ms: Option<Variable> },
    IfCapsLock { then: Option<Program>, els: Option<Program> },
    IfNumLock { then: Option<Program>, els: Option<Program> },
}

impl Task {
    /// The name this task was parsed from, for error messages and tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Task::Key { edge, .. } => match edge {
                KeyEdge::Tap => "key",
                KeyEdge::Down => "key_down",
                KeyEdge::Up => "key_up",
            },
            Task::Hold { .. } => "hold",
            Task::HoldKeys { .. } => "hold_keys",
            Task::Modify { .. } => "modify",
            Task::Repeat { .. } => "repeat",
            Task::Wait { .. } => "wait",
            Task::Mouse { .. } => "mouse",
            Task::Wheel { .. } => "wheel",
            Task::Event { .. } => "event",
            Task::Set { .. } => "set",
            Task::Add { .. } => "add",
            Task::IfEq { .. } => "if_eq",
            Task::IfEqName { .. } => "ifeq",
            Task::IfTap { .. } => "if_tap",
            Task::IfSingle { .. } => "if_single",
            Task::IfCapsLock { .. } => "if_capslock",
            Task::IfNumLock { .. } => "if_numlock",
        }
    }
}

//! Task execution semantics (spec.md §4.3). Each function here implements
//! one row of the task table; `run_program`/`run_task` is the depth-first,
//! left-to-right tree walk spec.md requires.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::ast::{Axis, KeyEdge, Program, Task};
use super::store::VariableStore;
use super::value::{TypeTag, Value, Variable};
use crate::context::{Context, Listener};
use crate::error::RuntimeError;
use crate::event::{ev, MappingFlags};
use crate::forwarder::Forwarder;
use crate::layout::KeyboardLayout;

/// Everything a task needs to run, bundled so `run_task` doesn't take a
/// dozen parameters. Borrowed from the owning `Macro` for the duration of
/// one `run()` call.
pub struct ExecCtx<'a> {
    pub store: &'a VariableStore,
    pub context: &'a Arc<Mutex<Context>>,
    pub layout: &'a Arc<Mutex<KeyboardLayout>>,
    pub flags: MappingFlags,
    pub trigger_pressed: &'a Arc<AtomicBool>,
    pub release_notify: &'a Arc<tokio::sync::Notify>,
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

fn emit(forwarder: &mut dyn Forwarder, event_type: u16, code: u16, value: i32) {
    forwarder.write(event_type, code, value);
    forwarder.syn();
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn resolve_number(ctx: &ExecCtx, task: &str, var: &Variable) -> Result<f64, RuntimeError> {
    match var.resolve(ctx.store, task, &[TypeTag::Int, TypeTag::Float])? {
        Value::Int(i) => Ok(i as f64),
        Value::Float(f) => Ok(f),
        _ => unreachable!("resolve() only returns an accepted type"),
    }
}

fn resolve_int(ctx: &ExecCtx, task: &str, var: &Variable) -> Result<i64, RuntimeError> {
    match var.resolve(ctx.store, task, &[TypeTag::Int])? {
        Value::Int(i) => Ok(i),
        _ => unreachable!(),
    }
}

/// Resolve a `symbol` slot to an evdev code: a string resolves through the
/// layout table (allocating a free code for unknown symbols); an int is
/// used as a raw code directly.
fn resolve_symbol(ctx: &ExecCtx, task: &str, var: &Variable) -> Result<u16, RuntimeError> {
    let value = var.resolve(ctx.store, task, &[TypeTag::Str, TypeTag::Int])?;
    match value {
        Value::Str(name) => {
            let mut layout = ctx.layout.lock().unwrap();
            layout.get_or_allocate(&name).map_err(|e| RuntimeError::TypeViolation {
                task: task.to_string(),
                variable: name,
                detail: e.to_string(),
            })
        }
        Value::Int(code) => Ok(code as u16),
        _ => unreachable!(),
    }
}

pub fn run_program<'a>(
    ctx: &'a ExecCtx<'a>,
    program: &'a Program,
    forwarder: &'a mut dyn Forwarder,
) -> BoxFut<'a, Result<(), RuntimeError>> {
    Box::pin(async move {
        for task in &program.tasks {
            run_task(ctx, task, forwarder).await?;
        }
        Ok(())
    })
}

fn run_task<'a>(ctx: &'a ExecCtx<'a>, task: &'a Task, forwarder: &'a mut dyn Forwarder) -> BoxFut<'a, Result<(), RuntimeError>> {
    Box::pin(async move {
        match task {
            Task::Key { symbol, edge } => run_key(ctx, task.name(), *edge, symbol, forwarder).await,
            Task::Hold { child } => run_hold(ctx, child, forwarder).await,
            Task::HoldKeys { symbols } => run_hold_keys(ctx, symbols, forwarder).await,
            Task::Modify { symbol, child } => run_modify(ctx, symbol, child, forwarder).await,
            Task::Repeat { count, child } => run_repeat(ctx, count, child, forwarder).await,
            Task::Wait { min_ms, max_ms } => run_wait(ctx, min_ms, max_ms.as_ref()).await,
            Task::Mouse { axis, speed, accel } => run_mouse(ctx, *axis, speed, accel.as_ref(), forwarder).await,
            Task::Wheel { axis, speed } => run_wheel(ctx, *axis, speed, forwarder).await,
            Task::Event { event_type, code, value } => run_event(ctx, event_type, code, value, forwarder),
            Task::Set { name, value } => run_set(ctx, name, value),
            Task::Add { name, amount } => run_add(ctx, name, amount),
            Task::IfEq { a, b, then, els } => run_if_eq(ctx, a, b, then.as_ref(), els.as_ref(), forwarder).await,
            Task::IfEqName { name, value, then, els } => run_ifeq_name(ctx, name, value, then.as_ref(), els.as_ref(), forwarder).await,
            Task::IfTap { then, els, timeout_ms } => run_if_tap(ctx, then.as_ref(), els.as_ref(), timeout_ms, forwarder).await,
            Task::IfSingle { then, els, timeout_ms } => run_if_single(ctx, then.as_ref(), els.as_ref(), timeout_ms.as_ref(), forwarder).await,
            Task::IfCapsLock { then, els } => run_if_led(ctx, ev::LED_CAPSL, then.as_ref(), els.as_ref(), forwarder).await,
            Task::IfNumLock { then, els } => run_if_led(ctx, ev::LED_NUML, then.as_ref(), els.as_ref(), forwarder).await,
        }
    })
}

async fn run_optional<'a>(ctx: &'a ExecCtx<'a>, program: Option<&'a Program>, forwarder: &'a mut dyn Forwarder) -> Result<(), RuntimeError> {
    match program {
        Some(p) => run_program(ctx, p, forwarder).await,
        None => Ok(()),
    }
}

async fn run_key(ctx: &ExecCtx<'_>, task: &str, edge: KeyEdge, symbol: &Variable, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    let code = resolve_symbol(ctx, task, symbol)?;
    match edge {
        KeyEdge::Down => {
            emit(forwarder, ev::EV_KEY, code, 1);
            sleep_ms(ctx.flags.macro_key_sleep_ms).await;
        }
        KeyEdge::Up => {
            emit(forwarder, ev::EV_KEY, code, 0);
            sleep_ms(ctx.flags.macro_key_sleep_ms).await;
        }
        KeyEdge::Tap => {
            emit(forwarder, ev::EV_KEY, code, 1);
            sleep_ms(ctx.flags.macro_key_sleep_ms).await;
            emit(forwarder, ev::EV_KEY, code, 0);
            sleep_ms(ctx.flags.macro_key_sleep_ms).await;
        }
    }
    Ok(())
}

async fn run_hold(ctx: &ExecCtx<'_>, child: &Option<Program>, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    match child {
        None => {
            ctx.release_notify.notified().await;
            Ok(())
        }
        Some(program) => {
            loop {
                if !ctx.trigger_pressed.load(Ordering::SeqCst) {
                    break;
                }
                run_program(ctx, program, forwarder).await?;
                if !ctx.trigger_pressed.load(Ordering::SeqCst) {
                    break;
                }
            }
            Ok(())
        }
    }
}

async fn run_hold_keys(ctx: &ExecCtx<'_>, symbols: &[Variable], forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    let codes = symbols
        .iter()
        .map(|v| resolve_symbol(ctx, "hold_keys", v))
        .collect::<Result<Vec<_>, _>>()?;

    for &code in &codes {
        emit(forwarder, ev::EV_KEY, code, 1);
    }
    ctx.release_notify.notified().await;
    for &code in codes.iter().rev() {
        emit(forwarder, ev::EV_KEY, code, 0);
    }
    Ok(())
}

async fn run_modify(ctx: &ExecCtx<'_>, symbol: &Variable, child: &Program, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    let code = resolve_symbol(ctx, "modify", symbol)?;
    emit(forwarder, ev::EV_KEY, code, 1);
    let result = run_program(ctx, child, forwarder).await;
    emit(forwarder, ev::EV_KEY, code, 0);
    result
}

async fn run_repeat(ctx: &ExecCtx<'_>, count: &Variable, child: &Program, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    let n = resolve_int(ctx, "repeat", count)?;
    for _ in 0..n.max(0) {
        run_program(ctx, child, forwarder).await?;
    }
    Ok(())
}

async fn run_wait(ctx: &ExecCtx<'_>, min_ms: &Variable, max_ms: Option<&Variable>) -> Result<(), RuntimeError> {
    let min = resolve_number(ctx, "wait", min_ms)?;
    let ms = match max_ms {
        None => min,
        Some(max_var) => {
            let max = resolve_number(ctx, "wait", max_var)?;
            if max <= min {
                min
            } else {
                rand::thread_rng().gen_range(min..=max)
            }
        }
    };
    sleep_ms(ms.max(0.0) as u64).await;
    Ok(())
}

async fn run_mouse(ctx: &ExecCtx<'_>, axis: Axis, speed: &Variable, accel: Option<&Variable>, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    let target_speed = resolve_number(ctx, "mouse", speed)?;
    // No accel argument means constant speed, full `speed` every tick right
    // away — not a ramp with factor 1 (spec.md §4.3 "default 1 -> constant
    // speed"). An explicit accel <= 0 collapses to the same thing.
    let accel_factor = match accel {
        Some(v) => Some(resolve_number(ctx, "mouse", v)?),
        None => None,
    };
    let (rel_code, sign): (u16, f64) = match axis {
        Axis::Up => (1, -1.0),   // REL_Y, negative is up
        Axis::Down => (1, 1.0),  // REL_Y
        Axis::Left => (0, -1.0), // REL_X
        Axis::Right => (0, 1.0), // REL_X
    };

    let period = Duration::from_millis((1000 / ctx.flags.rel_rate.max(1)) as u64);
    let mut velocity = 0.0f64;
    // A carried fractional remainder: each tick's exact velocity accumulates
    // into `acc`, and only the truncated whole part is ever emitted, so a
    // sub-1-unit/tick ramp (or speed) still nets out to the right total
    // distance instead of being rounded away every tick.
    let mut acc = 0.0f64;
    while ctx.trigger_pressed.load(Ordering::SeqCst) {
        match accel_factor {
            Some(a) if a > 0.0 => velocity = (velocity + a).min(target_speed),
            _ => velocity = target_speed,
        }
        acc += velocity;
        let step = acc.trunc();
        acc -= step;
        emit(forwarder, ev::EV_REL, rel_code, (step * sign) as i32);
        tokio::time::sleep(period).await;
    }
    Ok(())
}

async fn run_wheel(ctx: &ExecCtx<'_>, axis: Axis, speed: &Variable, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    const REL_WHEEL: u16 = 8;
    const REL_HWHEEL: u16 = 6;
    const REL_WHEEL_HI_RES: u16 = 11;
    const REL_HWHEEL_HI_RES: u16 = 12;

    let speed_value = resolve_number(ctx, "wheel", speed)?.max(1.0);
    let horizontal = matches!(axis, Axis::Left | Axis::Right);
    let sign: i32 = match axis {
        Axis::Up | Axis::Left => -1,
        Axis::Down | Axis::Right => 1,
    };
    let (coarse_code, hires_code) = if horizontal {
        (REL_HWHEEL, REL_HWHEEL_HI_RES)
    } else {
        (REL_WHEEL, REL_WHEEL_HI_RES)
    };

    let ticks_per_coarse = (120.0 / speed_value).round().max(1.0) as u64;
    let period = Duration::from_millis((1000 / ctx.flags.rel_rate.max(1)) as u64);
    let mut tick: u64 = 0;

    while ctx.trigger_pressed.load(Ordering::SeqCst) {
        emit(forwarder, ev::EV_REL, hires_code, sign * speed_value as i32);
        if tick % ticks_per_coarse == 0 {
            emit(forwarder, ev::EV_REL, coarse_code, sign);
        }
        tick += 1;
        tokio::time::sleep(period).await;
    }
    Ok(())
}

fn run_event(ctx: &ExecCtx<'_>, event_type: &Variable, code: &Variable, value: &Variable, forwarder: &mut dyn Forwarder) -> Result<(), RuntimeError> {
    let t = resolve_int(ctx, "event", event_type)?;
    let c = resolve_int(ctx, "event", code)?;
    let v = resolve_int(ctx, "event", value)?;
    emit(forwarder, t as u16, c as u16, v as i32);
    Ok(())
}

fn run_set(ctx: &ExecCtx<'_>, name: &str, value: &Variable) -> Result<(), RuntimeError> {
    let resolved = value.resolve(ctx.store, "set", &[TypeTag::Null, TypeTag::Int, TypeTag::Float, TypeTag::Str])?;
    ctx.store.set(name, resolved);
    Ok(())
}

fn run_add(ctx: &ExecCtx<'_>, name: &str, amount: &Variable) -> Result<(), RuntimeError> {
    let delta = resolve_number(ctx, "add", amount)?;
    match ctx.store.get(name) {
        Some(Value::Int(i)) if delta.fract() == 0.0 => {
            ctx.store.set(name, Value::Int(i + delta as i64));
        }
        Some(Value::Int(i)) => {
            ctx.store.set(name, Value::Float(i as f64 + delta));
        }
        Some(Value::Float(f)) => {
            ctx.store.set(name, Value::Float(f + delta));
        }
        None if delta.fract() == 0.0 => {
            ctx.store.set(name, Value::Int(delta as i64));
        }
        None => {
            ctx.store.set(name, Value::Float(delta));
        }
        Some(other) => {
            warn!("add({name}, ..): existing value {other:?} is not a number, leaving unchanged");
        }
    }
    Ok(())
}

async fn run_if_eq(
    ctx: &ExecCtx<'_>,
    a: &Variable,
    b: &Variable,
    then: Option<&Program>,
    els: Option<&Program>,
    forwarder: &mut dyn Forwarder,
) -> Result<(), RuntimeError> {
    const ALL: &[TypeTag] = &[TypeTag::Null, TypeTag::Int, TypeTag::Float, TypeTag::Str];
    let va = a.resolve(ctx.store, "if_eq", ALL)?;
    let vb = b.resolve(ctx.store, "if_eq", ALL)?;
    if values_equal(&va, &vb) {
        run_optional(ctx, then, forwarder).await
    } else {
        run_optional(ctx, els, forwarder).await
    }
}

async fn run_ifeq_name(
    ctx: &ExecCtx<'_>,
    name: &str,
    value: &Variable,
    then: Option<&Program>,
    els: Option<&Program>,
    forwarder: &mut dyn Forwarder,
) -> Result<(), RuntimeError> {
    const ALL: &[TypeTag] = &[TypeTag::Null, TypeTag::Int, TypeTag::Float, TypeTag::Str];
    let stored = ctx.store.get(name).unwrap_or(Value::Null);
    let expected = value.resolve(ctx.store, "ifeq", ALL)?;
    if values_equal(&stored, &expected) {
        run_optional(ctx, then, forwarder).await
    } else {
        run_optional(ctx, els, forwarder).await
    }
}

/// No int<->string coercion: equality requires matching variant and value.
/// Int/Float compare numerically across the two numeric variants.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => false,
    }
}

async fn run_if_tap(
    ctx: &ExecCtx<'_>,
    then: Option<&Program>,
    els: Option<&Program>,
    timeout_ms: &Variable,
    forwarder: &mut dyn Forwarder,
) -> Result<(), RuntimeError> {
    let timeout = resolve_number(ctx, "if_tap", timeout_ms)?.max(0.0) as u64;

    // Register interest in the release before checking state, so a release
    // that lands between the check and the await is never missed (the
    // pre-press race from spec.md §9).
    let notified = ctx.release_notify.notified();

    if !ctx.trigger_pressed.load(Ordering::SeqCst) {
        return run_optional(ctx, then, forwarder).await;
    }

    tokio::select! {
        _ = notified => run_optional(ctx, then, forwarder).await,
        _ = tokio::time::sleep(Duration::from_millis(timeout)) => run_optional(ctx, els, forwarder).await,
    }
}

struct SingleGuard {
    tripped: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl Listener for SingleGuard {
    fn on_event(&mut self, event: &crate::event::InputEvent) -> bool {
        if event.event_type == ev::EV_KEY && event.is_pressed() {
            self.tripped.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
        false
    }
}

async fn run_if_single(
    ctx: &ExecCtx<'_>,
    then: Option<&Program>,
    els: Option<&Program>,
    timeout_ms: Option<&Variable>,
    forwarder: &mut dyn Forwarder,
) -> Result<(), RuntimeError> {
    let tripped = Arc::new(AtomicBool::new(false));
    let tripped_notify = Arc::new(tokio::sync::Notify::new());

    let token = {
        let mut context = ctx.context.lock().unwrap();
        context.register_listener(Box::new(SingleGuard { tripped: tripped.clone(), notify: tripped_notify.clone() }))
    };

    let released = ctx.release_notify.notified();
    let tripped_wait = tripped_notify.notified();

    let outcome = match timeout_ms {
        None => {
            tokio::select! {
                _ = released => "then",
                _ = tripped_wait => "else",
            }
        }
        Some(timeout_var) => {
            let timeout = resolve_number(ctx, "if_single", timeout_var)?.max(0.0) as u64;
            tokio::select! {
                _ = released => "then",
                _ = tripped_wait => "else",
                _ = tokio::time::sleep(Duration::from_millis(timeout)) => "then",
            }
        }
    };

    ctx.context.lock().unwrap().deregister_listener(token);

    if outcome == "then" {
        run_optional(ctx, then, forwarder).await
    } else {
        run_optional(ctx, els, forwarder).await
    }
}

async fn run_if_led(
    ctx: &ExecCtx<'_>,
    led_code: u16,
    then: Option<&Program>,
    els: Option<&Program>,
    forwarder: &mut dyn Forwarder,
) -> Result<(), RuntimeError> {
    let active = ctx.context.lock().unwrap().leds().contains(&led_code);
    if active {
        run_optional(ctx, then, forwarder).await
    } else {
        run_optional(ctx, els, forwarder).await
    }
}

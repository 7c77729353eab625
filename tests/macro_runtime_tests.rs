//! End-to-end scenarios 2-6 from spec.md §8, run against the real
//! cooperative scheduler in [`keymux::Macro::run`]. Every test uses
//! `#[tokio::test(start_paused = true)]`: the virtual clock auto-advances
//! past any await that is purely waiting on a timer, so a concurrent
//! "releaser" task (`tokio::join!`'d alongside `mac.run(...)`) can pace out
//! millisecond-scale interleavings deterministically and in zero real time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keymux::context::Context;
use keymux::event::{ev, AxisSign, InputEvent};
use keymux::forwarder::RecordingForwarder;
use keymux::layout::KeyboardLayout;
use keymux::{parse, Macro, MappingFlags, Value, VariableStore};

fn test_macro(source: &str) -> (Macro, Arc<Mutex<Context>>) {
    let context = Arc::new(Mutex::new(Context::new()));
    let program = parse(source).unwrap();
    let store = VariableStore::new();
    let layout = Arc::new(Mutex::new(KeyboardLayout::new()));
    let flags = MappingFlags { macro_key_sleep_ms: 0, ..Default::default() };
    (Macro::new(program, store, context.clone(), layout, flags), context)
}

/// Scenario 2: `"a + b + c + d"` presses all four keys down on activation
/// and releases them in reverse order once the trigger releases.
#[tokio::test(start_paused = true)]
async fn plus_syntax_macro_presses_down_then_releases_in_reverse() {
    let (mac, _ctx) = test_macro("a + b + c + d");
    let mut fwd = RecordingForwarder::new();

    let releaser = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        mac.release_trigger();
    };

    let (result, ()) = tokio::join!(mac.run(&mut fwd), releaser);
    result.unwrap();

    const A: u16 = 30;
    const B: u16 = 48;
    const C: u16 = 46;
    const D: u16 = 32;
    assert_eq!(fwd.key_trace(), vec![(A, 1), (B, 1), (C, 1), (D, 1), (D, 0), (C, 0), (B, 0), (A, 0)]);
}

/// Scenario 3: `repeat(3, key(m).w(100))` takes between 270ms and 360ms and
/// taps `m` three times.
#[tokio::test(start_paused = true)]
async fn repeat_three_times_with_wait_taps_key_and_takes_about_300ms() {
    let (mac, _ctx) = test_macro("repeat(3, key(m).w(100))");
    let mut fwd = RecordingForwarder::new();

    let start = tokio::time::Instant::now();
    mac.run(&mut fwd).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(270) && elapsed <= Duration::from_millis(360), "elapsed {elapsed:?} out of [270ms, 360ms]");

    const M: u16 = 50;
    assert_eq!(fwd.key_trace(), vec![(M, 1), (M, 0), (M, 1), (M, 0), (M, 1), (M, 0)]);
}

/// Scenario 4, tap branch: releasing within the 100ms timeout runs `then`.
#[tokio::test(start_paused = true)]
async fn if_tap_runs_then_branch_on_a_quick_release() {
    let (mac, _ctx) = test_macro("if_tap(key(a), key(b), 100)");
    let mut fwd = RecordingForwarder::new();
    mac.press_trigger();

    let releaser = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        mac.release_trigger();
    };

    let (result, ()) = tokio::join!(mac.run(&mut fwd), releaser);
    result.unwrap();

    const A: u16 = 30;
    assert_eq!(fwd.key_trace(), vec![(A, 1), (A, 0)]);
}

/// Scenario 4, timeout branch: holding past the 100ms timeout runs `else`.
#[tokio::test(start_paused = true)]
async fn if_tap_runs_else_branch_when_held_past_timeout() {
    let (mac, _ctx) = test_macro("if_tap(key(a), key(b), 100)");
    let mut fwd = RecordingForwarder::new();
    mac.press_trigger();

    let releaser = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        mac.release_trigger();
    };

    let (result, ()) = tokio::join!(mac.run(&mut fwd), releaser);
    result.unwrap();

    const B: u16 = 48;
    assert_eq!(fwd.key_trace(), vec![(B, 1), (B, 0)]);
}

/// Scenario 5, tripped: another key pressed before the trigger releases
/// runs `else`.
#[tokio::test(start_paused = true)]
async fn if_single_runs_else_branch_when_another_key_interrupts() {
    let (mac, ctx) = test_macro("if_single(key(x), key(y))");
    let mut fwd = RecordingForwarder::new();

    let interrupter = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.lock().unwrap().dispatch_to_listeners(&InputEvent::new(ev::EV_KEY, 999, 1, 0));
    };
    let releaser = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        mac.release_trigger();
    };

    let (result, (), ()) = tokio::join!(mac.run(&mut fwd), interrupter, releaser);
    result.unwrap();

    const Y: u16 = 21;
    assert_eq!(fwd.key_trace(), vec![(Y, 1), (Y, 0)]);
}

/// Scenario 5, untripped: axis motion before release must not count as
/// "another key" — `SingleGuard` only reacts to `EV_KEY` presses, so the
/// trigger's own release runs `then`.
#[tokio::test(start_paused = true)]
async fn if_single_ignores_axis_motion_and_runs_then_branch() {
    let (mac, ctx) = test_macro("if_single(key(x), key(y))");
    let mut fwd = RecordingForwarder::new();

    let axis_motion = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let event = InputEvent::new(ev::EV_ABS, 1, 1, 0).with_axis_sign(AxisSign::Positive);
        ctx.lock().unwrap().dispatch_to_listeners(&event);
    };
    let releaser = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        mac.release_trigger();
    };

    let (result, (), ()) = tokio::join!(mac.run(&mut fwd), axis_motion, releaser);
    result.unwrap();

    const X: u16 = 45;
    assert_eq!(fwd.key_trace(), vec![(X, 1), (X, 0)]);
}

/// Scenario 6: `if_eq($foo, 3, key(a), key(b))` reacts to a variable set
/// from a second handle onto the same store (spec.md §9's "explicit handle,
/// never an ambient global" — two `VariableStore` clones sharing one
/// backing map is this crate's stand-in for "a second process" writing the
/// same cross-process variable).
#[tokio::test(start_paused = true)]
async fn if_eq_observes_a_variable_set_through_a_cloned_store_handle() {
    let context = Arc::new(Mutex::new(Context::new()));
    let layout = Arc::new(Mutex::new(KeyboardLayout::new()));
    let flags = MappingFlags::default();
    let store = VariableStore::new();
    let other_handle = store.clone();

    let program = parse("if_eq($foo, 3, key(a), key(b))").unwrap();
    let mac = Macro::new(program, store, context, layout, flags);

    const A: u16 = 30;
    const B: u16 = 48;

    other_handle.set("foo", Value::Int(2));
    let mut fwd_unequal = RecordingForwarder::new();
    mac.run(&mut fwd_unequal).await.unwrap();
    assert_eq!(fwd_unequal.key_trace(), vec![(B, 1), (B, 0)]);

    other_handle.set("foo", Value::Int(3));
    let mut fwd_equal = RecordingForwarder::new();
    mac.run(&mut fwd_equal).await.unwrap();
    assert_eq!(fwd_equal.key_trace(), vec![(A, 1), (A, 0)]);
}

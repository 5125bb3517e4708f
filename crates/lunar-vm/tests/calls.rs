mod common;

use common::*;
use lunar_core::{OpCode, Proto, ProtoBuilder};
use lunar_vm::{Closure, LuaError, LuaState, LuaTable, LuaValue};
use std::cell::RefCell;
use std::rc::Rc;

/// `function() return 1, 2, 3 end`
fn three_values() -> Proto {
    let mut b = ProtoBuilder::new(SOURCE).max_stack(3);
    for (reg, n) in [(0, 1), (1, 2), (2, 3)] {
        let k = b.int(n);
        b.abx(OpCode::LoadK, reg, k);
    }
    b.abc(OpCode::Return, 0, 4, 0);
    b.finish()
}

fn ints(values: &[i64]) -> Vec<LuaValue> {
    values.iter().map(|&n| LuaValue::Integer(n)).collect()
}

#[test]
fn results_are_truncated_to_the_wanted_count() {
    let mut b = main_chunk(3);
    let f = b.proto(three_values());
    b.abx(OpCode::Closure, 0, f);
    b.abc(OpCode::Call, 0, 1, 3);
    b.abc(OpCode::Return, 0, 3, 0);
    assert_eq!(run(b.finish()).unwrap(), ints(&[1, 2]));
}

#[test]
fn missing_results_are_padded_with_nil() {
    let mut b = main_chunk(4);
    let f = b.proto(three_values());
    b.abx(OpCode::Closure, 0, f);
    b.abc(OpCode::Call, 0, 1, 5);
    b.abc(OpCode::Return, 0, 5, 0);
    let mut expected = ints(&[1, 2, 3]);
    expected.push(LuaValue::Nil);
    assert_eq!(run(b.finish()).unwrap(), expected);
}

#[test]
fn open_results_expand_into_the_next_call() {
    // return select('#', f())
    let mut b = main_chunk(3);
    let f = b.proto(three_values());
    let hash = b.str("#");
    get_global(&mut b, 0, "select");
    b.abx(OpCode::LoadK, 1, hash);
    b.abx(OpCode::Closure, 2, f);
    b.abc(OpCode::Call, 2, 1, 0);
    b.abc(OpCode::Call, 0, 0, 2);
    b.abc(OpCode::Return, 0, 2, 0);
    assert_eq!(run(b.finish()).unwrap(), ints(&[3]));
}

#[test]
fn open_results_expand_into_return() {
    // return f()
    let mut b = main_chunk(1);
    let f = b.proto(three_values());
    b.abx(OpCode::Closure, 0, f);
    b.abc(OpCode::Call, 0, 1, 0);
    b.abc(OpCode::Return, 0, 0, 0);
    assert_eq!(run(b.finish()).unwrap(), ints(&[1, 2, 3]));
}

#[test]
fn varargs_are_counted_and_unpacked() {
    // local function v(...) local a, b = ... return select('#', ...), a, b end
    // return v(10, 20, 30)
    let mut v = function(0, 5).vararg();
    let hash = v.str("#");
    v.abc(OpCode::VarArg, 0, 3, 0);
    get_global(&mut v, 2, "select");
    v.abx(OpCode::LoadK, 3, hash);
    v.abc(OpCode::VarArg, 4, 0, 0);
    v.abc(OpCode::Call, 2, 0, 2);
    v.abc(OpCode::Move, 3, 0, 0);
    v.abc(OpCode::Move, 4, 1, 0);
    v.abc(OpCode::Return, 2, 4, 0);

    let mut b = main_chunk(4);
    let v = b.proto(v.finish());
    b.abx(OpCode::Closure, 0, v);
    for (reg, n) in [(1, 10), (2, 20), (3, 30)] {
        let k = b.int(n);
        b.abx(OpCode::LoadK, reg, k);
    }
    b.abc(OpCode::Call, 0, 4, 0);
    b.abc(OpCode::Return, 0, 0, 0);
    assert_eq!(run(b.finish()).unwrap(), ints(&[3, 10, 20]));
}

#[test]
fn missing_parameters_are_nil() {
    // local function g(a, b) return b, a end
    // return g(5)
    let mut g = ProtoBuilder::new(SOURCE).params(2).max_stack(4);
    g.abc(OpCode::Move, 2, 1, 0);
    g.abc(OpCode::Move, 3, 0, 0);
    g.abc(OpCode::Return, 2, 3, 0);

    let mut b = main_chunk(2);
    let g = b.proto(g.finish());
    let five = b.int(5);
    b.abx(OpCode::Closure, 0, g);
    b.abx(OpCode::LoadK, 1, five);
    b.abc(OpCode::Call, 0, 2, 0);
    b.abc(OpCode::Return, 0, 0, 0);
    assert_eq!(
        run(b.finish()).unwrap(),
        vec![LuaValue::Nil, LuaValue::Integer(5)]
    );
}

/// `function loop(n) if n == 0 then return "done" end return loop(n - 1) end`,
/// with the recursive call either as a tail call or a plain call.
fn countdown(tail: bool) -> Proto {
    let mut f = function(1, 3);
    let k0 = ki(&mut f, 0);
    let k1 = ki(&mut f, 1);
    let done = f.str("done");
    f.abc(OpCode::Eq, 0, 0, k0); // 0: n == 0 skips the jump
    f.asbx(OpCode::Jmp, 0, 2); // 1: -> 4
    f.abx(OpCode::LoadK, 1, done); // 2
    f.abc(OpCode::Return, 1, 2, 0); // 3
    get_global(&mut f, 1, "loop"); // 4
    f.abc(OpCode::Sub, 2, 0, k1); // 5
    if tail {
        f.abc(OpCode::TailCall, 1, 2, 0);
        f.abc(OpCode::Return, 1, 0, 0);
    } else {
        f.abc(OpCode::Call, 1, 2, 2);
        f.abc(OpCode::Return, 1, 2, 0);
    }
    f.finish()
}

fn run_countdown(state: &mut LuaState, tail: bool, n: i64) -> Result<Vec<LuaValue>, LuaError> {
    let mut b = main_chunk(2);
    let f = b.proto(countdown(tail));
    let kn = b.int(n);
    b.abx(OpCode::Closure, 0, f);
    set_global(&mut b, "loop", 0);
    get_global(&mut b, 0, "loop");
    b.abx(OpCode::LoadK, 1, kn);
    b.abc(OpCode::Call, 0, 2, 2);
    b.abc(OpCode::Return, 0, 2, 0);
    run_with(state, b.finish())
}

#[test]
fn tail_calls_do_not_grow_the_call_depth() {
    let mut state = state_with_depth(50);
    let results = run_countdown(&mut state, true, 1000).unwrap();
    assert_eq!(results, vec![LuaValue::from("done")]);
    assert_eq!(state.call_depth(), 1);
}

#[test]
fn deep_recursion_overflows() {
    let mut state = state_with_depth(50);
    let err = run_countdown(&mut state, false, 100).unwrap_err();
    assert!(matches!(err.root(), LuaError::StackOverflow));
    assert_eq!(err.to_string(), "test.lua:1: stack overflow");
    assert_eq!(state.call_depth(), 1);
    assert_eq!(state.get_top(), 0);

    // The state is still usable afterwards.
    let results = run_countdown(&mut state, false, 10).unwrap();
    assert_eq!(results, vec![LuaValue::from("done")]);
}

#[test]
fn default_state_reports_overflow_instead_of_crashing() {
    let mut state = LuaState::new();
    let err = run_countdown(&mut state, false, 250).unwrap_err();
    assert!(matches!(err.root(), LuaError::StackOverflow));
    assert_eq!(state.call_depth(), 1);

    let results = run_countdown(&mut state, false, 150).unwrap();
    assert_eq!(results, vec![LuaValue::from("done")]);
}

#[test]
fn raised_depth_limit_recurses_on_a_grown_native_stack() {
    let mut state = state_with_depth(20_000);
    let results = run_countdown(&mut state, false, 10_000).unwrap();
    assert_eq!(results, vec![LuaValue::from("done")]);
    assert_eq!(state.call_depth(), 1);
}

fn double_second_arg(l: &mut LuaState) -> Result<usize, LuaError> {
    let ty = l.type_of(1);
    let n = l.check_integer(2)?;
    l.push(n * 2);
    l.push(ty);
    Ok(2)
}

#[test]
fn call_metamethod_receives_the_callee_first() {
    let mt = Rc::new(RefCell::new(LuaTable::new()));
    let handler = Rc::new(Closure::new_native(double_second_arg, Vec::new()));
    mt.borrow_mut().put_str("__call", LuaValue::Closure(handler));
    let mut obj = LuaTable::new();
    obj.set_metatable(Some(mt));

    let mut b = main_chunk(2);
    let k21 = b.int(21);
    get_global(&mut b, 0, "obj");
    b.abx(OpCode::LoadK, 1, k21);
    b.abc(OpCode::Call, 0, 2, 0);
    b.abc(OpCode::Return, 0, 0, 0);

    let mut state = LuaState::new();
    state.set_global("obj", Rc::new(RefCell::new(obj)));
    let results = run_with(&mut state, b.finish()).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(42), LuaValue::from("table")]);
}

#[test]
fn calling_nil_is_an_error() {
    let mut b = main_chunk(1);
    get_global(&mut b, 0, "missing");
    b.abc(OpCode::Call, 0, 1, 1);
    b.abc(OpCode::Return, 0, 1, 0);
    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.to_string(), "test.lua:1: attempt to call a nil value");
}

fn add_all(l: &mut LuaState) -> Result<usize, LuaError> {
    let mut sum = 0;
    for i in 1..=l.get_top() {
        sum += l.check_integer(i)?;
    }
    l.push(sum);
    Ok(1)
}

#[test]
fn host_calls_registered_function() {
    let mut state = LuaState::new();
    state.register("add_all", add_all);
    let f = state.get_global("add_all");
    state.push(f);
    state.push(1i64);
    state.push(2i64);
    state.push(39i64);
    state.call(3, Some(1)).unwrap();
    assert_eq!(state.get_top(), 1);
    assert_eq!(state.value(1), LuaValue::Integer(42));

    let f = state.get_global("add_all");
    state.push(f);
    state.push("x");
    let err = state.call(1, None).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #1 to 'add_all' (number expected, got string)"
    );
    assert_eq!(state.get_top(), 1);
}

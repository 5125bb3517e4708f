mod common;

use common::*;
use lunar_core::{OpCode, ProtoBuilder, UpvalueDesc};
use lunar_vm::LuaValue;

/// `function() return <upvalue 0> end`, capturing register `reg` of the
/// enclosing function.
fn getter(reg: u8) -> lunar_core::Proto {
    let mut b = ProtoBuilder::new(SOURCE).max_stack(2);
    b.upvalue("v", UpvalueDesc::Stack(reg));
    b.abc(OpCode::GetUpval, 0, 0, 0);
    b.abc(OpCode::Return, 0, 2, 0);
    b.finish()
}

/// `function() v = v + 1 return v end`, capturing register `reg`.
fn incrementer(reg: u8) -> lunar_core::Proto {
    let mut b = ProtoBuilder::new(SOURCE).max_stack(2);
    b.upvalue("v", UpvalueDesc::Stack(reg));
    let k1 = ki(&mut b, 1);
    b.abc(OpCode::GetUpval, 0, 0, 0);
    b.abc(OpCode::Add, 0, 0, k1);
    b.abc(OpCode::SetUpval, 0, 0, 0);
    b.abc(OpCode::Return, 0, 2, 0);
    b.finish()
}

#[test]
fn each_loop_iteration_gets_a_fresh_cell() {
    // local fns = {}
    // for i = 1, 3 do fns[i] = function() return i end end
    // return fns[1](), fns[2](), fns[3]()
    let mut b = main_chunk(6);
    let getter = b.proto(getter(4));
    let one = b.int(1);
    let three = b.int(3);
    let (k1, k2, k3) = (ki(&mut b, 1), ki(&mut b, 2), ki(&mut b, 3));
    b.abc(OpCode::NewTable, 0, 0, 0); // 0
    b.abx(OpCode::LoadK, 1, one); // 1
    b.abx(OpCode::LoadK, 2, three); // 2
    b.abx(OpCode::LoadK, 3, one); // 3
    b.asbx(OpCode::ForPrep, 1, 3); // 4: -> 8
    b.abx(OpCode::Closure, 5, getter); // 5
    b.abc(OpCode::SetTable, 0, 4, 5); // 6
    b.asbx(OpCode::Jmp, 5, 0); // 7: close upvalues >= R(4)
    b.asbx(OpCode::ForLoop, 1, -4); // 8: -> 5
    b.abc(OpCode::GetTable, 1, 0, k1);
    b.abc(OpCode::Call, 1, 1, 2);
    b.abc(OpCode::GetTable, 2, 0, k2);
    b.abc(OpCode::Call, 2, 1, 2);
    b.abc(OpCode::GetTable, 3, 0, k3);
    b.abc(OpCode::Call, 3, 1, 2);
    b.abc(OpCode::Return, 1, 4, 0);

    let results = run(b.finish()).unwrap();
    assert_eq!(
        results,
        vec![LuaValue::Integer(1), LuaValue::Integer(2), LuaValue::Integer(3)]
    );
}

#[test]
fn closures_share_an_open_cell_with_the_register() {
    // local n = 0
    // local inc = function() n = n + 1 return n end
    // local get = function() return n end
    // inc() inc()
    // return get(), n
    let mut b = main_chunk(5);
    let inc = b.proto(incrementer(0));
    let get = b.proto(getter(0));
    let zero = b.int(0);
    b.abx(OpCode::LoadK, 0, zero);
    b.abx(OpCode::Closure, 1, inc);
    b.abx(OpCode::Closure, 2, get);
    b.abc(OpCode::Move, 3, 1, 0);
    b.abc(OpCode::Call, 3, 1, 1);
    b.abc(OpCode::Move, 3, 1, 0);
    b.abc(OpCode::Call, 3, 1, 1);
    b.abc(OpCode::Move, 3, 2, 0);
    b.abc(OpCode::Call, 3, 1, 2);
    b.abc(OpCode::Move, 4, 0, 0);
    b.abc(OpCode::Return, 3, 3, 0);

    let results = run(b.finish()).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(2), LuaValue::Integer(2)]);
}

#[test]
fn closed_cell_outlives_its_frame() {
    // local function mk() local c = 0 return function() c = c + 1 return c end end
    // local f = mk()
    // f()
    // return f()
    let mut mk = ProtoBuilder::new(SOURCE).max_stack(2);
    let counter = mk.proto(incrementer(0));
    let zero = mk.int(0);
    mk.abx(OpCode::LoadK, 0, zero);
    mk.abx(OpCode::Closure, 1, counter);
    mk.abc(OpCode::Return, 1, 2, 0);

    let mut b = main_chunk(2);
    let mk = b.proto(mk.finish());
    b.abx(OpCode::Closure, 0, mk);
    b.abc(OpCode::Call, 0, 1, 2);
    b.abc(OpCode::Move, 1, 0, 0);
    b.abc(OpCode::Call, 1, 1, 1);
    b.abc(OpCode::Move, 1, 0, 0);
    b.abc(OpCode::Call, 1, 1, 2);
    b.abc(OpCode::Return, 1, 2, 0);

    let results = run(b.finish()).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(2)]);
}

#[test]
fn nested_function_reaches_globals_through_inherited_upvalue() {
    // local function outer() return function() return answer end end
    let mut inner = function(0, 2);
    get_global(&mut inner, 0, "answer");
    inner.abc(OpCode::Return, 0, 2, 0);

    let mut outer = function(0, 2);
    let inner = outer.proto(inner.finish());
    outer.abx(OpCode::Closure, 0, inner);
    outer.abc(OpCode::Return, 0, 2, 0);

    let mut b = main_chunk(2);
    let outer = b.proto(outer.finish());
    b.abx(OpCode::Closure, 0, outer);
    b.abc(OpCode::Call, 0, 1, 2);
    b.abc(OpCode::Call, 0, 1, 2);
    b.abc(OpCode::Return, 0, 2, 0);

    let mut state = lunar_vm::LuaState::new();
    state.set_global("answer", 42i64);
    let results = run_with(&mut state, b.finish()).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(42)]);
}

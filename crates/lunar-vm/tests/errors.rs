mod common;

use common::*;
use lunar_chunk::ChunkError;
use lunar_core::{Constant, OpCode, ProtoBuilder};
use lunar_vm::{LuaError, LuaState, LuaValue, Status};

#[test]
fn pcall_catches_error_with_position() {
    // return pcall(function() error("boom") end)
    let mut inner = function(0, 2);
    inner.set_line(3);
    let boom = inner.str("boom");
    get_global(&mut inner, 0, "error");
    inner.abx(OpCode::LoadK, 1, boom);
    inner.abc(OpCode::Call, 0, 2, 1);
    inner.abc(OpCode::Return, 0, 1, 0);

    let mut b = main_chunk(2);
    let inner = b.proto(inner.finish());
    get_global(&mut b, 0, "pcall");
    b.abx(OpCode::Closure, 1, inner);
    b.abc(OpCode::Call, 0, 2, 3);
    b.abc(OpCode::Return, 0, 3, 0);

    let mut state = LuaState::new();
    let results = run_with(&mut state, b.finish()).unwrap();
    assert_eq!(
        results,
        vec![LuaValue::Boolean(false), LuaValue::from("test.lua:3: boom")]
    );
    assert_eq!(state.call_depth(), 1);
}

#[test]
fn pcall_passes_results_through_on_success() {
    // return pcall(function(a) return a, 7 end, 5)
    let mut inner = ProtoBuilder::new(SOURCE).params(1).max_stack(2);
    let seven = inner.int(7);
    inner.abx(OpCode::LoadK, 1, seven);
    inner.abc(OpCode::Return, 0, 3, 0);

    let mut b = main_chunk(3);
    let inner = b.proto(inner.finish());
    let five = b.int(5);
    get_global(&mut b, 0, "pcall");
    b.abx(OpCode::Closure, 1, inner);
    b.abx(OpCode::LoadK, 2, five);
    b.abc(OpCode::Call, 0, 3, 0);
    b.abc(OpCode::Return, 0, 0, 0);

    assert_eq!(
        run(b.finish()).unwrap(),
        vec![LuaValue::Boolean(true), LuaValue::Integer(5), LuaValue::Integer(7)]
    );
}

#[test]
fn error_values_keep_their_identity() {
    // local e = {}
    // local ok, err = pcall(error, e)
    // return ok, err, rawequal(e, err)
    let mut b = main_chunk(6);
    b.abc(OpCode::NewTable, 0, 0, 0);
    get_global(&mut b, 1, "pcall");
    get_global(&mut b, 2, "error");
    b.abc(OpCode::Move, 3, 0, 0);
    b.abc(OpCode::Call, 1, 3, 3);
    get_global(&mut b, 3, "rawequal");
    b.abc(OpCode::Move, 4, 0, 0);
    b.abc(OpCode::Move, 5, 2, 0);
    b.abc(OpCode::Call, 3, 3, 2);
    b.abc(OpCode::Return, 1, 4, 0);

    let results = run(b.finish()).unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert_eq!(results[1].type_name(), "table");
    assert_eq!(results[2], LuaValue::Boolean(true));
}

#[test]
fn error_level_zero_adds_no_position() {
    let mut b = main_chunk(3);
    let msg = b.str("plain");
    let zero = b.int(0);
    get_global(&mut b, 0, "error");
    b.abx(OpCode::LoadK, 1, msg);
    b.abx(OpCode::LoadK, 2, zero);
    b.abc(OpCode::Call, 0, 3, 1);
    b.abc(OpCode::Return, 0, 1, 0);

    let err = run(b.finish()).unwrap_err();
    assert!(matches!(&err, LuaError::Script(v) if *v == LuaValue::from("plain")));
}

#[test]
fn runtime_errors_carry_the_instruction_line() {
    let mut b = main_chunk(1);
    let knil = lunar_core::opcode::rk_ask(b.constant(Constant::Nil));
    let k1 = ki(&mut b, 1);
    b.set_line(4);
    b.abc(OpCode::Add, 0, knil, k1);
    b.abc(OpCode::Return, 0, 2, 0);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "test.lua:4: attempt to perform arithmetic on a nil value"
    );
    assert!(matches!(
        err.root(),
        LuaError::Arithmetic { kind: "arithmetic", type_name: "nil" }
    ));
}

#[test]
fn comparing_unrelated_types_fails() {
    let mut b = main_chunk(1);
    let k1 = ki(&mut b, 1);
    b.abc(OpCode::NewTable, 0, 0, 0);
    b.abc(OpCode::Lt, 1, 0, k1);
    b.asbx(OpCode::Jmp, 0, 0);
    b.abc(OpCode::Return, 0, 1, 0);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "test.lua:1: attempt to compare table with number"
    );
}

#[test]
fn integer_division_by_zero() {
    let mut b = main_chunk(1);
    let k1 = ki(&mut b, 1);
    let k0 = ki(&mut b, 0);
    b.abc(OpCode::IDiv, 0, k1, k0);
    b.abc(OpCode::Return, 0, 2, 0);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.to_string(), "test.lua:1: attempt to perform 'n//0'");
}

#[test]
fn altered_signature_is_rejected_before_running() {
    let mut b = main_chunk(1);
    get_global(&mut b, 0, "print");
    b.abc(OpCode::Call, 0, 1, 1);
    b.abc(OpCode::Return, 0, 1, 0);
    let mut bytes = lunar_chunk::dump(&b.finish());
    bytes[1] = b'X';

    let out = SharedBuffer::default();
    let mut state = LuaState::new();
    state.set_output(out.clone());
    let err = state.execute(&bytes).unwrap_err();
    assert!(matches!(err, LuaError::Bytecode(ChunkError::BadSignature)));
    assert_eq!(state.get_top(), 0);
    assert_eq!(out.contents(), "");

    let err = state.load(&bytes[..10]).unwrap_err();
    assert!(matches!(err, LuaError::Bytecode(_)));
    assert_eq!(state.get_top(), 0);
}

#[test]
fn host_pcall_reports_runtime_error() {
    let mut b = main_chunk(1);
    b.abc(OpCode::Len, 0, 0, 0);
    b.abc(OpCode::Return, 0, 2, 0);

    let mut state = LuaState::new();
    state.load_proto(std::rc::Rc::new(b.finish()));
    assert_eq!(state.pcall(0, Some(1)), Status::RuntimeError);
    assert_eq!(state.get_top(), 1);
    assert_eq!(
        state.value(-1),
        LuaValue::from("test.lua:1: attempt to get length of a nil value")
    );
    assert_eq!(state.call_depth(), 1);
}

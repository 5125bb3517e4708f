use criterion::{criterion_group, criterion_main, Criterion};
use lunar_core::opcode::rk_ask;
use lunar_core::{OpCode, Proto, ProtoBuilder, UpvalueDesc};
use lunar_vm::LuaState;
use std::hint::black_box;
use std::rc::Rc;

fn main_chunk(max_stack: u8) -> ProtoBuilder {
    let mut b = ProtoBuilder::new("=bench").vararg().max_stack(max_stack);
    b.upvalue("_ENV", UpvalueDesc::Stack(0));
    b
}

/// `local s = 0 for i = 1, n do s = s + i end return s`
fn numeric_for(n: i64) -> Proto {
    let mut b = main_chunk(5);
    let zero = b.int(0);
    let one = b.int(1);
    let limit = b.int(n);
    b.abx(OpCode::LoadK, 0, zero);
    b.abx(OpCode::LoadK, 1, one);
    b.abx(OpCode::LoadK, 2, limit);
    b.abx(OpCode::LoadK, 3, one);
    b.asbx(OpCode::ForPrep, 1, 1);
    b.abc(OpCode::Add, 0, 0, 4);
    b.asbx(OpCode::ForLoop, 1, -2);
    b.abc(OpCode::Return, 0, 2, 0);
    b.finish()
}

/// `local f = function(x) return x + 1 end local s = 0 for i = 1, n do s = f(s) end return s`
fn call_loop(n: i64) -> Proto {
    let mut inc = ProtoBuilder::new("=bench").params(1).max_stack(2);
    let k1 = rk_ask(inc.int(1));
    inc.abc(OpCode::Add, 1, 0, k1);
    inc.abc(OpCode::Return, 1, 2, 0);

    let mut b = main_chunk(8);
    let inc = b.proto(inc.finish());
    let zero = b.int(0);
    let one = b.int(1);
    let limit = b.int(n);
    b.abx(OpCode::Closure, 0, inc);
    b.abx(OpCode::LoadK, 1, zero);
    b.abx(OpCode::LoadK, 2, one);
    b.abx(OpCode::LoadK, 3, limit);
    b.abx(OpCode::LoadK, 4, one);
    b.asbx(OpCode::ForPrep, 2, 4);
    b.abc(OpCode::Move, 6, 0, 0);
    b.abc(OpCode::Move, 7, 1, 0);
    b.abc(OpCode::Call, 6, 2, 2);
    b.abc(OpCode::Move, 1, 6, 0);
    b.asbx(OpCode::ForLoop, 2, -5);
    b.abc(OpCode::Return, 1, 2, 0);
    b.finish()
}

fn bench_dispatch(c: &mut Criterion) {
    let arith = Rc::new(numeric_for(10_000));
    c.bench_function("numeric_for_10k", |b| {
        let mut state = LuaState::new();
        b.iter(|| black_box(state.execute_proto(arith.clone())))
    });

    let calls = Rc::new(call_loop(10_000));
    c.bench_function("call_loop_10k", |b| {
        let mut state = LuaState::new();
        b.iter(|| black_box(state.execute_proto(calls.clone())))
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);

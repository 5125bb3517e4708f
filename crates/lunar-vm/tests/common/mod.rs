//! Shared helpers for assembling test programs by hand.
#![allow(dead_code)]

use lunar_core::opcode::rk_ask;
use lunar_core::{OpCode, Proto, ProtoBuilder, UpvalueDesc};
use lunar_vm::{LuaError, LuaState, LuaValue, VmConfig};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

pub const SOURCE: &str = "@test.lua";

/// Builder for a main chunk: variadic, `_ENV` as upvalue 0, line 1.
pub fn main_chunk(max_stack: u8) -> ProtoBuilder {
    let mut b = ProtoBuilder::new(SOURCE).vararg().max_stack(max_stack);
    b.upvalue("_ENV", UpvalueDesc::Stack(0));
    b.set_line(1);
    b
}

/// Builder for a nested function that can reach globals through the
/// enclosing function's upvalue 0.
pub fn function(params: u8, max_stack: u8) -> ProtoBuilder {
    let mut b = ProtoBuilder::new(SOURCE).params(params).max_stack(max_stack);
    b.upvalue("_ENV", UpvalueDesc::Upvalue(0));
    b.set_line(1);
    b
}

/// RK operand for a string constant.
pub fn ks(b: &mut ProtoBuilder, s: &str) -> u32 {
    rk_ask(b.str(s))
}

/// RK operand for an integer constant.
pub fn ki(b: &mut ProtoBuilder, n: i64) -> u32 {
    rk_ask(b.int(n))
}

/// `R(reg) = _ENV[name]`
pub fn get_global(b: &mut ProtoBuilder, reg: u32, name: &str) {
    let k = ks(b, name);
    b.abc(OpCode::GetTabUp, reg, 0, k);
}

/// `_ENV[name] = R(reg)`
pub fn set_global(b: &mut ProtoBuilder, name: &str, reg: u32) {
    let k = ks(b, name);
    b.abc(OpCode::SetTabUp, 0, k, reg);
}

pub fn run(proto: Proto) -> Result<Vec<LuaValue>, LuaError> {
    LuaState::new().execute_proto(Rc::new(proto))
}

pub fn run_with(state: &mut LuaState, proto: Proto) -> Result<Vec<LuaValue>, LuaError> {
    state.execute_proto(Rc::new(proto))
}

pub fn state_with_depth(depth: usize) -> LuaState {
    LuaState::with_config(VmConfig::default().with_max_call_depth(depth))
}

/// An output sink that can be read back after the state is done with it.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

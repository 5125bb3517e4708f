//! `lunar-core`: bytecode model shared across the lunar workspace.
//!
//! This crate defines:
//! - [`Instruction`]: the 32-bit Lua 5.3 instruction word
//! - [`OpCode`] and its static operand table
//! - [`Proto`]: compiled function prototypes, plus [`ProtoBuilder`]

pub mod opcode;
pub mod proto;

pub use opcode::{fb2int, int2fb, Instruction, OpArgMode, OpCode, OpMode};
pub use proto::{Constant, LocVar, Proto, ProtoBuilder, UpvalueDesc};

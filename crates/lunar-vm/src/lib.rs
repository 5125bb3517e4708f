//! `lunar-vm`: register-based virtual machine that executes Lua 5.3 bytecode.
//!
//! A [`LuaState`] owns the value stack, the call frames and the registry.
//! Load a binary chunk with [`LuaState::load`] (or build a
//! [`Proto`](lunar_core::Proto) in memory) and run it with
//! [`LuaState::call`] or [`LuaState::pcall`]:
//!
//! ```no_run
//! use lunar_vm::LuaState;
//!
//! let bytes = std::fs::read("hello.luac").unwrap();
//! let mut state = LuaState::new();
//! let results = state.execute(&bytes).unwrap();
//! println!("{} values returned", results.len());
//! ```

pub mod arith;
mod call;
pub mod closure;
pub mod compare;
pub mod config;
mod dispatch;
pub mod error;
mod frame;
mod metamethod;
pub mod number;
pub mod state;
pub mod stdlib;
pub mod table;
pub mod value;

pub use arith::ArithOp;
pub use closure::{Closure, ClosureKind, NativeFn, Upvalue};
pub use config::VmConfig;
pub use error::LuaError;
pub use state::{LuaState, Status};
pub use table::{LuaTable, TableKey};
pub use value::{LuaValue, TableRef};

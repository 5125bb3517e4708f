use crate::closure::{Closure, Upvalue};
use crate::value::LuaValue;
use std::collections::BTreeMap;
use std::rc::Rc;

// ── Call frame ────────────────────────────────────────────────────────────────

/// A single entry on the call stack.
///
/// All frames share the state's flat value stack; a frame's register `r`
/// is `stack[base + r]`.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The function being executed; `None` for the host's root frame.
    pub closure: Option<Rc<Closure>>,
    /// Absolute slot of the called function. Results are written from here.
    pub func: usize,
    /// Absolute slot of register 0 (first argument for native frames).
    pub base: usize,
    /// One past the last live slot.
    pub top: usize,
    /// Index of the next instruction (script frames only).
    pub pc: usize,
    /// Arguments beyond the fixed parameters of a variadic function.
    pub varargs: Vec<LuaValue>,
    /// Open upvalue cells aliasing this frame's registers, by absolute slot.
    pub open_upvalues: BTreeMap<usize, Upvalue>,
}

impl Frame {
    pub fn host() -> Self {
        Self {
            closure: None,
            func: 0,
            base: 0,
            top: 0,
            pc: 0,
            varargs: Vec::new(),
            open_upvalues: BTreeMap::new(),
        }
    }

    pub fn new(closure: Rc<Closure>, func: usize, top: usize) -> Self {
        Self {
            closure: Some(closure),
            func,
            base: func + 1,
            top,
            pc: 0,
            varargs: Vec::new(),
            open_upvalues: BTreeMap::new(),
        }
    }

    /// Source location of the instruction currently executing, if known.
    pub fn current_line(&self) -> Option<(String, u32)> {
        let proto = self.closure.as_ref()?.proto()?;
        let line = proto.line_at(self.pc.checked_sub(1)?)?;
        Some((proto.short_source().to_string(), line))
    }

    /// Existing open cell for `slot`, or a new one registered on this frame.
    pub fn find_upvalue(&mut self, slot: usize) -> Upvalue {
        self.open_upvalues
            .entry(slot)
            .or_insert_with(|| Upvalue::open(slot))
            .clone()
    }

    /// Close every open cell aliasing a slot `>= from`.
    pub fn close_upvalues(&mut self, from: usize, stack: &[LuaValue]) {
        let closing = self.open_upvalues.split_off(&from);
        for uv in closing.values() {
            uv.close(stack);
        }
    }
}

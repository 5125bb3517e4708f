//! Closures and upvalue cells.

use crate::error::LuaError;
use crate::state::LuaState;
use crate::value::LuaValue;
use lunar_core::Proto;
use std::cell::RefCell;
use std::rc::Rc;

/// A host function callable from scripts.
///
/// Arguments are on the callee's stack window (`state.value(1)` ..
/// `state.value(state.get_top())`). The function pushes its results and
/// returns how many it pushed.
pub type NativeFn = fn(&mut LuaState) -> Result<usize, LuaError>;

// ── Upvalue cells ─────────────────────────────────────────────────────────────

/// A shared, mutable upvalue cell.
///
/// While the captured local is still on the stack (`Open`), the cell holds its
/// absolute stack slot. When the local goes out of scope, the runtime copies
/// the value into the cell (`Closed`).
#[derive(Debug, Clone)]
pub struct Upvalue(Rc<RefCell<UpvalueState>>);

/// Interior state of an upvalue cell.
#[derive(Debug, Clone)]
pub enum UpvalueState {
    /// The value lives in the value stack at this absolute index.
    Open(usize),
    /// The owning frame exited; the value was migrated here.
    Closed(LuaValue),
}

impl Upvalue {
    pub fn open(slot: usize) -> Self {
        Self(Rc::new(RefCell::new(UpvalueState::Open(slot))))
    }

    pub fn closed(val: LuaValue) -> Self {
        Self(Rc::new(RefCell::new(UpvalueState::Closed(val))))
    }

    pub fn get(&self, stack: &[LuaValue]) -> LuaValue {
        match &*self.0.borrow() {
            UpvalueState::Open(slot) => stack.get(*slot).cloned().unwrap_or_default(),
            UpvalueState::Closed(v) => v.clone(),
        }
    }

    pub fn set(&self, stack: &mut [LuaValue], val: LuaValue) {
        let mut inner = self.0.borrow_mut();
        match &mut *inner {
            UpvalueState::Open(slot) => stack[*slot] = val,
            UpvalueState::Closed(v) => *v = val,
        }
    }

    /// Migrate an open cell's value off the stack. Closing twice is a no-op.
    pub fn close(&self, stack: &[LuaValue]) {
        let mut inner = self.0.borrow_mut();
        if let UpvalueState::Open(slot) = *inner {
            *inner = UpvalueState::Closed(stack.get(slot).cloned().unwrap_or_default());
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.0.borrow(), UpvalueState::Open(_))
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Upvalue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ── Closures ──────────────────────────────────────────────────────────────────

pub enum ClosureKind {
    /// Compiled function body.
    Script(Rc<Proto>),
    /// Host callback.
    Native(NativeFn),
}

/// A runtime function: a body paired with its captured upvalue cells.
pub struct Closure {
    pub kind: ClosureKind,
    pub upvalues: Vec<Upvalue>,
}

impl Closure {
    /// A script closure with one fresh closed-nil cell per upvalue descriptor;
    /// the `Closure` instruction replaces them with the captured cells.
    pub fn new_script(proto: Rc<Proto>) -> Self {
        let upvalues = (0..proto.upvalues.len())
            .map(|_| Upvalue::closed(LuaValue::Nil))
            .collect();
        Self {
            kind: ClosureKind::Script(proto),
            upvalues,
        }
    }

    pub fn new_native(f: NativeFn, captured: Vec<LuaValue>) -> Self {
        Self {
            kind: ClosureKind::Native(f),
            upvalues: captured.into_iter().map(Upvalue::closed).collect(),
        }
    }

    pub fn proto(&self) -> Option<&Rc<Proto>> {
        match &self.kind {
            ClosureKind::Script(p) => Some(p),
            ClosureKind::Native(_) => None,
        }
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ClosureKind::Script(p) => write!(
                f,
                "Closure(script {}:{}, {} upvalues)",
                p.short_source(),
                p.line_defined,
                self.upvalues.len()
            ),
            ClosureKind::Native(_) => write!(f, "Closure(native, {} upvalues)", self.upvalues.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_cell_aliases_stack_until_closed() {
        let mut stack = vec![LuaValue::Integer(1), LuaValue::Integer(2)];
        let uv = Upvalue::open(1);
        assert_eq!(uv.get(&stack), LuaValue::Integer(2));
        uv.set(&mut stack, LuaValue::Integer(5));
        assert_eq!(stack[1], LuaValue::Integer(5));

        uv.close(&stack);
        assert!(!uv.is_open());
        stack[1] = LuaValue::Integer(9);
        assert_eq!(uv.get(&stack), LuaValue::Integer(5));

        // A second close must not re-read the slot.
        uv.close(&stack);
        assert_eq!(uv.get(&stack), LuaValue::Integer(5));
    }

    #[test]
    fn shared_cell_is_seen_by_all_handles() {
        let mut stack = Vec::new();
        let a = Upvalue::closed(LuaValue::Nil);
        let b = a.clone();
        a.set(&mut stack, LuaValue::Boolean(true));
        assert_eq!(b.get(&stack), LuaValue::Boolean(true));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn script_closure_gets_one_cell_per_descriptor() {
        let mut b = lunar_core::ProtoBuilder::new("=t");
        b.upvalue("_ENV", lunar_core::UpvalueDesc::Stack(0));
        b.upvalue("x", lunar_core::UpvalueDesc::Upvalue(1));
        let cl = Closure::new_script(Rc::new(b.finish()));
        assert_eq!(cl.upvalues.len(), 2);
        assert!(cl.upvalues.iter().all(|u| !u.is_open()));
    }
}

use crate::closure::{Closure, NativeFn};
use crate::config::VmConfig;
use crate::error::LuaError;
use crate::frame::Frame;
use crate::table::LuaTable;
use crate::value::{LuaValue, TableRef};
use lunar_core::Proto;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tracing::debug;

/// Registry slot holding the globals table.
pub const RIDX_GLOBALS: i64 = 2;

/// Outcome of a protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    RuntimeError,
}

// ── Interpreter state ─────────────────────────────────────────────────────────

/// One independent interpreter: value stack, call frames, registry.
///
/// Values are reference counted with `Rc`, so a state and everything it
/// owns stays on the thread that created it.
pub struct LuaState {
    /// Flat value stack shared by all frames.
    pub(crate) stack: Vec<LuaValue>,
    /// Active calls; `frames[0]` is the host frame and is never popped.
    pub(crate) frames: Vec<Frame>,
    registry: TableRef,
    globals: TableRef,
    pub(crate) config: VmConfig,
    output: Box<dyn Write>,
}

impl LuaState {
    /// A state with the default limits and the base library loaded.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let registry = Rc::new(RefCell::new(LuaTable::new()));
        let globals = Rc::new(RefCell::new(LuaTable::new()));
        registry
            .borrow_mut()
            .put_int(RIDX_GLOBALS, LuaValue::Table(globals.clone()));
        let mut state = LuaState {
            stack: vec![LuaValue::Nil; config.stack_headroom],
            frames: vec![Frame::host()],
            registry,
            globals,
            config,
            output: Box::new(std::io::stdout()),
        };
        crate::stdlib::open_base(&mut state);
        state
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Redirect `print` output.
    pub fn set_output(&mut self, out: impl Write + 'static) {
        self.output = Box::new(out);
    }

    pub(crate) fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    pub fn registry(&self) -> TableRef {
        self.registry.clone()
    }

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().get_str(name)
    }

    pub fn set_global(&mut self, name: &str, value: impl Into<LuaValue>) {
        self.globals.borrow_mut().put_str(name, value.into());
    }

    /// Store a native function in the globals table.
    pub fn register(&mut self, name: &str, f: NativeFn) {
        let closure = Rc::new(Closure::new_native(f, Vec::new()));
        self.set_global(name, LuaValue::Closure(closure));
    }

    /// Number of active frames, the host frame included.
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    /// Decode a binary chunk and push its main function. Nothing is pushed
    /// when the chunk is rejected.
    pub fn load(&mut self, chunk: &[u8]) -> Result<(), LuaError> {
        let proto = lunar_chunk::undump(chunk)?;
        self.load_proto(Rc::new(proto));
        Ok(())
    }

    /// Push a closure over `proto` whose first upvalue is the globals table.
    pub fn load_proto(&mut self, proto: Rc<Proto>) {
        let closure = Closure::new_script(proto);
        if let Some(env) = closure.upvalues.first() {
            env.set(&mut self.stack, LuaValue::Table(self.globals.clone()));
        }
        self.push(LuaValue::Closure(Rc::new(closure)));
    }

    /// Load and run a binary chunk, returning everything it returns.
    pub fn execute(&mut self, chunk: &[u8]) -> Result<Vec<LuaValue>, LuaError> {
        let proto = lunar_chunk::undump(chunk)?;
        self.execute_proto(Rc::new(proto))
    }

    pub fn execute_proto(&mut self, proto: Rc<Proto>) -> Result<Vec<LuaValue>, LuaError> {
        let mark = self.get_top();
        self.load_proto(proto);
        self.call(0, None)?;
        let results = (mark + 1..=self.get_top())
            .map(|i| self.value(i as isize))
            .collect();
        self.set_top(mark);
        Ok(results)
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    /// Call the function below the top `nargs` values. Results replace the
    /// function and arguments: exactly `n` of them for `Some(n)`, all of
    /// them for `None`.
    pub fn call(&mut self, nargs: usize, nresults: Option<usize>) -> Result<(), LuaError> {
        let func = self.func_slot(nargs)?;
        let depth = self.frames.len();
        match self.call_at(func, nargs, nresults) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.unwind(depth);
                self.frame_mut().top = func;
                Err(e)
            }
        }
    }

    /// Like [`call`](Self::call), but errors are caught: frames above this
    /// one are closed and discarded and the error value is left on the stack.
    pub fn pcall(&mut self, nargs: usize, nresults: Option<usize>) -> Status {
        let func = match self.func_slot(nargs) {
            Ok(func) => func,
            Err(e) => {
                self.push(e.into_value());
                return Status::RuntimeError;
            }
        };
        let depth = self.frames.len();
        match self.call_at(func, nargs, nresults) {
            Ok(_) => Status::Ok,
            Err(e) => {
                let unwound = self.frames.len() - depth;
                self.unwind(depth);
                debug!(target: "lunar::vm", unwound, error = %e, "protected call recovered");
                self.frame_mut().top = func;
                self.push(e.into_value());
                Status::RuntimeError
            }
        }
    }

    fn func_slot(&self, nargs: usize) -> Result<usize, LuaError> {
        let frame = self.frame();
        frame
            .top
            .checked_sub(nargs + 1)
            .filter(|&f| f >= frame.base)
            .ok_or_else(|| LuaError::runtime("not enough values on the stack for call"))
    }

    // ── Stack API (relative to the current frame) ─────────────────────────────

    /// Number of values in the current frame's window.
    pub fn get_top(&self) -> usize {
        let frame = self.frame();
        frame.top - frame.base
    }

    /// Grow (with nils) or shrink the current window to `n` values.
    pub fn set_top(&mut self, n: usize) {
        let base = self.frame().base;
        let old = self.frame().top;
        let new = base + n;
        self.ensure_stack(new);
        for slot in old.min(new)..new {
            self.stack[slot] = LuaValue::Nil;
        }
        self.frame_mut().top = new;
    }

    /// Absolute stack slot for a 1-based (or negative, top-relative) index.
    fn slot(&self, idx: isize) -> Option<usize> {
        let frame = self.frame();
        let slot = if idx > 0 {
            frame.base + idx as usize - 1
        } else if idx < 0 {
            frame.top.checked_sub(idx.unsigned_abs())?
        } else {
            return None;
        };
        (slot >= frame.base && slot < frame.top).then_some(slot)
    }

    /// Value at `idx`, or nil outside the window.
    pub fn value(&self, idx: isize) -> LuaValue {
        self.slot(idx)
            .map(|s| self.stack[s].clone())
            .unwrap_or_default()
    }

    pub fn type_of(&self, idx: isize) -> &'static str {
        match self.slot(idx) {
            Some(s) => self.stack[s].type_name(),
            None => "no value",
        }
    }

    pub fn push(&mut self, value: impl Into<LuaValue>) {
        let top = self.frame().top;
        self.ensure_stack(top + 1 + self.config.stack_headroom);
        self.stack[top] = value.into();
        self.frame_mut().top = top + 1;
    }

    /// Remove and return the top value (nil on an empty window).
    pub fn pop(&mut self) -> LuaValue {
        let frame = self.frame();
        if frame.top == frame.base {
            return LuaValue::Nil;
        }
        let top = frame.top - 1;
        self.frame_mut().top = top;
        std::mem::take(&mut self.stack[top])
    }

    /// Move the top value to `idx`, shifting the values above it up.
    pub fn insert(&mut self, idx: isize) {
        let Some(slot) = self.slot(idx) else { return };
        let top = self.frame().top;
        self.stack[slot..top].rotate_right(1);
    }

    pub fn to_integer(&self, idx: isize) -> Option<i64> {
        self.value(idx).to_integer()
    }

    pub fn to_number(&self, idx: isize) -> Option<f64> {
        self.value(idx).to_number()
    }

    // ── Argument checks for native functions ──────────────────────────────────

    /// Error for bad argument `arg` of the running native function.
    pub fn arg_error(&self, arg: usize, msg: &str) -> LuaError {
        match self.current_function_name() {
            Some(name) => LuaError::Runtime(format!("bad argument #{arg} to '{name}' ({msg})")),
            None => LuaError::Runtime(format!("bad argument #{arg} ({msg})")),
        }
    }

    fn type_error(&self, arg: usize, expected: &str) -> LuaError {
        let got = self.type_of(arg as isize);
        self.arg_error(arg, &format!("{expected} expected, got {got}"))
    }

    pub fn check_any(&self, arg: usize) -> Result<LuaValue, LuaError> {
        match self.slot(arg as isize) {
            Some(s) => Ok(self.stack[s].clone()),
            None => Err(self.arg_error(arg, "value expected")),
        }
    }

    pub fn check_table(&self, arg: usize) -> Result<TableRef, LuaError> {
        match self.value(arg as isize) {
            LuaValue::Table(t) => Ok(t),
            _ => Err(self.type_error(arg, "table")),
        }
    }

    pub fn check_integer(&self, arg: usize) -> Result<i64, LuaError> {
        let v = self.value(arg as isize);
        match v.to_integer() {
            Some(n) => Ok(n),
            None if v.to_number().is_some() => {
                Err(self.arg_error(arg, "number has no integer representation"))
            }
            None => Err(self.type_error(arg, "number")),
        }
    }

    pub fn opt_integer(&self, arg: usize, default: i64) -> Result<i64, LuaError> {
        if self.value(arg as isize).is_nil() {
            Ok(default)
        } else {
            self.check_integer(arg)
        }
    }

    pub fn check_number(&self, arg: usize) -> Result<f64, LuaError> {
        self.to_number(arg as isize)
            .ok_or_else(|| self.type_error(arg, "number"))
    }

    pub fn check_string(&self, arg: usize) -> Result<Rc<[u8]>, LuaError> {
        self.value(arg as isize)
            .to_str_bytes()
            .ok_or_else(|| self.type_error(arg, "string"))
    }

    /// Global name under which the running function is stored, if any.
    fn current_function_name(&self) -> Option<String> {
        let current = self.frame().closure.as_ref()?;
        let globals = self.globals.borrow();
        let name = globals.iter().find_map(|(k, v)| match (k, v) {
            (LuaValue::LuaString(name), LuaValue::Closure(c)) if Rc::ptr_eq(&c, current) => {
                Some(String::from_utf8_lossy(&name).into_owned())
            }
            _ => None,
        });
        name
    }

    // ── Native closures ───────────────────────────────────────────────────────

    /// Pop `captured` values and push a native closure that owns them as
    /// upvalues.
    pub fn push_native_closure(&mut self, f: NativeFn, captured: usize) {
        let frame = self.frame();
        let captured = captured.min(frame.top - frame.base);
        let start = frame.top - captured;
        let values = self.stack[start..frame.top].to_vec();
        self.frame_mut().top = start;
        self.push(LuaValue::Closure(Rc::new(Closure::new_native(f, values))));
    }

    /// Upvalue `i` (0-based) of the running native closure.
    pub fn upvalue(&self, i: usize) -> LuaValue {
        self.frame()
            .closure
            .as_ref()
            .and_then(|c| c.upvalues.get(i))
            .map(|uv| uv.get(&self.stack))
            .unwrap_or_default()
    }

    // ── Metatables ────────────────────────────────────────────────────────────

    /// Metatable of the value at `idx`.
    pub fn get_metatable(&self, idx: isize) -> Option<TableRef> {
        self.metatable_of(&self.value(idx))
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`.
    /// Non-table values share one metatable per type.
    pub fn set_metatable(&mut self, idx: isize) {
        let mt = match self.pop() {
            LuaValue::Table(t) => Some(t),
            _ => None,
        };
        let target = self.value(idx);
        self.set_metatable_of(&target, mt);
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    pub(crate) fn frame(&self) -> &Frame {
        let n = self.frames.len();
        &self.frames[n - 1]
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        let n = self.frames.len();
        &mut self.frames[n - 1]
    }

    pub(crate) fn ensure_stack(&mut self, size: usize) {
        if self.stack.len() < size {
            self.stack.resize(size, LuaValue::Nil);
        }
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

//! Function calls, returns and frame unwinding.

use crate::closure::{Closure, ClosureKind, NativeFn};
use crate::dispatch::Flow;
use crate::error::LuaError;
use crate::frame::Frame;
use crate::state::LuaState;
use crate::value::LuaValue;
use lunar_core::Proto;
use std::mem;
use std::rc::Rc;
use tracing::{debug, trace};

/// Native stack left when a call switches to a fresh segment.
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each fresh native stack segment.
const STACK_GROW_SIZE: usize = 2 * 1024 * 1024;

impl LuaState {
    /// Replace a non-function at `func` by its `__call` handler, shifting the
    /// original value into the first argument. Returns the callee and the
    /// adjusted argument count.
    pub(crate) fn resolve_callable(
        &mut self,
        func: usize,
        mut nargs: usize,
    ) -> Result<(Rc<Closure>, usize), LuaError> {
        for _ in 0..=self.config.max_meta_chain {
            let callee = self.stack[func].clone();
            if let LuaValue::Closure(c) = callee {
                return Ok((c, nargs));
            }
            let handler = self.metafield(&callee, "__call");
            if handler.is_nil() {
                return Err(LuaError::NotCallable(callee.type_name()));
            }
            let end = func + 1 + nargs;
            self.ensure_stack(end + 1 + self.config.stack_headroom);
            self.stack[func..=end].rotate_right(1);
            self.stack[func] = handler;
            nargs += 1;
        }
        Err(LuaError::runtime("'__call' chain too long; possible loop"))
    }

    /// Call the value at absolute slot `func` with the `nargs` values above
    /// it. Results are moved down to `func` and adjusted to `nresults`
    /// (`None` keeps them all); the caller's top ends just past them.
    ///
    /// Every nested call recurses on the native stack, so the call runs on a
    /// freshly allocated segment whenever the current one is nearly full.
    pub(crate) fn call_at(
        &mut self,
        func: usize,
        nargs: usize,
        nresults: Option<usize>,
    ) -> Result<usize, LuaError> {
        if self.frames.len() > self.config.max_call_depth {
            return Err(LuaError::StackOverflow);
        }
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.call_inner(func, nargs, nresults)
        })
    }

    fn call_inner(
        &mut self,
        func: usize,
        nargs: usize,
        nresults: Option<usize>,
    ) -> Result<usize, LuaError> {
        let (closure, nargs) = self.resolve_callable(func, nargs)?;
        trace!(target: "lunar::vm", depth = self.frames.len(), nargs, "call");
        match &closure.kind {
            ClosureKind::Native(f) => {
                let f = *f;
                self.call_native(closure, f, func, nargs, nresults)
            }
            ClosureKind::Script(proto) => {
                let proto = proto.clone();
                self.push_script_frame(closure, &proto, func, nargs);
                let n = self.run_frame()?;
                Ok(self.adjust_results(func, n, nresults))
            }
        }
    }

    fn call_native(
        &mut self,
        closure: Rc<Closure>,
        f: NativeFn,
        func: usize,
        nargs: usize,
        nresults: Option<usize>,
    ) -> Result<usize, LuaError> {
        let top = func + 1 + nargs;
        self.ensure_stack(top + self.config.stack_headroom);
        self.frames.push(Frame::new(closure, func, top));
        // On error the frame stays in place for the unwinder.
        let returned = f(self)?;
        let Some(frame) = self.frames.pop() else {
            return Err(LuaError::runtime("call stack underflow"));
        };
        let n = returned.min(frame.top - frame.base);
        let first = frame.top - n;
        for i in 0..n {
            self.stack[func + i] = mem::take(&mut self.stack[first + i]);
        }
        Ok(self.adjust_results(func, n, nresults))
    }

    /// Open a frame for a script function whose arguments sit above `func`.
    pub(crate) fn push_script_frame(
        &mut self,
        closure: Rc<Closure>,
        proto: &Proto,
        func: usize,
        nargs: usize,
    ) {
        let base = func + 1;
        let nparams = proto.num_params as usize;
        let nregs = proto.max_stack_size as usize;
        let varargs = if proto.is_vararg && nargs > nparams {
            self.stack[base + nparams..base + nargs]
                .iter_mut()
                .map(mem::take)
                .collect()
        } else {
            Vec::new()
        };
        self.ensure_stack(base + nregs.max(nargs) + self.config.stack_headroom);
        for slot in base + nargs.min(nparams)..base + nregs.max(nparams) {
            self.stack[slot] = LuaValue::Nil;
        }
        let mut frame = Frame::new(closure, func, base + nregs);
        frame.varargs = varargs;
        trace!(
            target: "lunar::vm",
            source = proto.short_source(),
            line = proto.line_defined,
            depth = self.frames.len() + 1,
            "enter function"
        );
        self.frames.push(frame);
    }

    /// Pad or truncate `n` results at `func` to the wanted count and set the
    /// current frame's top just past them.
    pub(crate) fn adjust_results(&mut self, func: usize, n: usize, nresults: Option<usize>) -> usize {
        let count = nresults.unwrap_or(n);
        self.ensure_stack(func + count + self.config.stack_headroom);
        for slot in func + n.min(count)..func + count {
            self.stack[slot] = LuaValue::Nil;
        }
        self.frame_mut().top = func + count;
        count
    }

    /// Pop the running frame, closing its upvalues, and move `n` results
    /// starting at absolute slot `first` to the frame's function slot.
    pub(crate) fn return_from(&mut self, first: usize, n: usize) -> Result<usize, LuaError> {
        let Some(mut frame) = self.frames.pop() else {
            return Err(LuaError::runtime("call stack underflow"));
        };
        frame.close_upvalues(0, &self.stack);
        for i in 0..n {
            self.stack[frame.func + i] = mem::take(&mut self.stack[first + i]);
        }
        trace!(target: "lunar::vm", results = n, depth = self.frames.len(), "return");
        Ok(n)
    }

    /// Replace the running frame with a call to the value at `func`.
    ///
    /// Script callees reuse the frame slot so the call depth stays flat;
    /// native callees run normally and their results are returned at once.
    pub(crate) fn tail_call(&mut self, func: usize, nargs: usize) -> Result<Flow, LuaError> {
        let (closure, nargs) = self.resolve_callable(func, nargs)?;
        let base = self.frame().base;
        self.close_upvalues(base);
        match &closure.kind {
            ClosureKind::Script(proto) => {
                let proto = proto.clone();
                let Some(frame) = self.frames.pop() else {
                    return Err(LuaError::runtime("call stack underflow"));
                };
                let dest = frame.func;
                for i in 0..=nargs {
                    self.stack[dest + i] = mem::take(&mut self.stack[func + i]);
                }
                trace!(target: "lunar::vm", depth = self.frames.len() + 1, "tail call");
                self.push_script_frame(closure, &proto, dest, nargs);
                Ok(Flow::Reenter)
            }
            ClosureKind::Native(_) => {
                let n = self.call_at(func, nargs, None)?;
                let n = self.return_from(func, n)?;
                Ok(Flow::Return(n))
            }
        }
    }

    /// Discard frames above `depth`, closing their upvalues.
    pub(crate) fn unwind(&mut self, depth: usize) {
        let depth = depth.max(1);
        if self.frames.len() > depth {
            debug!(target: "lunar::vm", frames = self.frames.len() - depth, "unwinding");
        }
        while self.frames.len() > depth {
            if let Some(mut frame) = self.frames.pop() {
                frame.close_upvalues(0, &self.stack);
            }
        }
    }
}

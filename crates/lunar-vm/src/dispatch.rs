//! The instruction dispatch loop.

use crate::arith::ArithOp;
use crate::closure::{Closure, ClosureKind, Upvalue};
use crate::error::LuaError;
use crate::number::float_to_int;
use crate::state::LuaState;
use crate::table::LuaTable;
use crate::value::LuaValue;
use lunar_core::opcode::{index_k, is_k, LFIELDS_PER_FLUSH};
use lunar_core::{fb2int, Instruction, OpCode, Proto, UpvalueDesc};
use std::cell::RefCell;
use std::rc::Rc;

/// What the loop does after one instruction.
pub(crate) enum Flow {
    Continue,
    /// The frame returned this many values, already moved to its function slot.
    Return(usize),
    /// A tail call replaced the frame; start over with the new one.
    Reenter,
}

impl LuaState {
    /// Execute the script frame on top of the frame stack until it returns.
    /// On error the frame is left in place for the caller to unwind.
    pub(crate) fn run_frame(&mut self) -> Result<usize, LuaError> {
        'reenter: loop {
            let frame = self.frame();
            let Some(cl) = frame.closure.clone() else {
                return Err(LuaError::runtime("no function to run"));
            };
            let Some(proto) = cl.proto().cloned() else {
                return Err(LuaError::runtime("frame is not a script function"));
            };
            let base = frame.base;

            loop {
                let pc = self.frame().pc;
                // Falling off the end behaves like `return`.
                let Some(&i) = proto.code.get(pc) else {
                    return self.return_from(base, 0);
                };
                self.frame_mut().pc = pc + 1;
                match self.step(&cl, &proto, base, i) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Return(n)) => return Ok(n),
                    Ok(Flow::Reenter) => continue 'reenter,
                    Err(e) => return Err(locate(e, &proto, pc)),
                }
            }
        }
    }

    fn step(
        &mut self,
        cl: &Rc<Closure>,
        proto: &Rc<Proto>,
        base: usize,
        i: Instruction,
    ) -> Result<Flow, LuaError> {
        let Some(op) = i.opcode() else {
            return Err(LuaError::runtime(format!("invalid opcode {}", i.raw_opcode())));
        };
        let a = i.a() as usize;
        let ra = base + a;

        macro_rules! reg {
            ($r:expr) => {
                self.stack[base + ($r) as usize]
            };
        }

        match op {
            OpCode::Move => {
                let v = reg!(i.b()).clone();
                self.stack[ra] = v;
            }
            OpCode::LoadK => {
                self.stack[ra] = constant(proto, i.bx())?;
            }
            OpCode::LoadKx => {
                let ax = self.extra_arg(proto)?;
                self.stack[ra] = constant(proto, ax)?;
            }
            OpCode::LoadBool => {
                self.stack[ra] = LuaValue::Boolean(i.b() != 0);
                if i.c() != 0 {
                    self.skip();
                }
            }
            OpCode::LoadNil => {
                for slot in ra..=ra + i.b() as usize {
                    self.stack[slot] = LuaValue::Nil;
                }
            }

            // ── Upvalues and tables ───────────────────────────────────────────
            OpCode::GetUpval => {
                self.stack[ra] = self.upvalue_of(cl, i.b())?;
            }
            OpCode::SetUpval => {
                let v = self.stack[ra].clone();
                let uv = upvalue_cell(cl, i.b())?;
                uv.set(&mut self.stack, v);
            }
            OpCode::GetTabUp => {
                let t = self.upvalue_of(cl, i.b())?;
                let k = self.rk(proto, base, i.c())?;
                self.stack[ra] = self.index(t, k)?;
            }
            OpCode::GetTable => {
                let t = reg!(i.b()).clone();
                let k = self.rk(proto, base, i.c())?;
                self.stack[ra] = self.index(t, k)?;
            }
            OpCode::SetTabUp => {
                let t = self.upvalue_of(cl, i.a())?;
                let k = self.rk(proto, base, i.b())?;
                let v = self.rk(proto, base, i.c())?;
                self.set_index(t, k, v)?;
            }
            OpCode::SetTable => {
                let t = self.stack[ra].clone();
                let k = self.rk(proto, base, i.b())?;
                let v = self.rk(proto, base, i.c())?;
                self.set_index(t, k, v)?;
            }
            OpCode::NewTable => {
                let t = LuaTable::with_capacity(fb2int(i.b()), fb2int(i.c()));
                self.stack[ra] = LuaValue::Table(Rc::new(RefCell::new(t)));
            }
            OpCode::SelfOp => {
                let obj = reg!(i.b()).clone();
                let k = self.rk(proto, base, i.c())?;
                self.stack[ra + 1] = obj.clone();
                self.stack[ra] = self.index(obj, k)?;
            }

            // ── Arithmetic ────────────────────────────────────────────────────
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr => {
                let Some(aop) = ArithOp::from_opcode(op) else {
                    return Err(LuaError::runtime("bad arithmetic opcode"));
                };
                let x = self.rk(proto, base, i.b())?;
                let y = self.rk(proto, base, i.c())?;
                self.stack[ra] = self.arith(aop, x, y)?;
            }
            OpCode::Unm | OpCode::BNot => {
                let aop = if op == OpCode::Unm { ArithOp::Unm } else { ArithOp::BNot };
                let x = reg!(i.b()).clone();
                self.stack[ra] = self.arith(aop, x.clone(), x)?;
            }
            OpCode::Not => {
                self.stack[ra] = LuaValue::Boolean(!reg!(i.b()).is_truthy());
            }
            OpCode::Len => {
                let v = reg!(i.b()).clone();
                self.stack[ra] = self.len(&v)?;
            }
            OpCode::Concat => {
                let values = self.stack[base + i.b() as usize..=base + i.c() as usize].to_vec();
                self.stack[ra] = self.concat(values)?;
            }

            // ── Control flow ──────────────────────────────────────────────────
            OpCode::Jmp => {
                if a != 0 {
                    self.close_upvalues(ra - 1);
                }
                self.jump(i.sbx())?;
            }
            OpCode::Eq => {
                let x = self.rk(proto, base, i.b())?;
                let y = self.rk(proto, base, i.c())?;
                if self.equals(&x, &y)? != (a != 0) {
                    self.skip();
                }
            }
            OpCode::Lt => {
                let x = self.rk(proto, base, i.b())?;
                let y = self.rk(proto, base, i.c())?;
                if self.less_than(&x, &y)? != (a != 0) {
                    self.skip();
                }
            }
            OpCode::Le => {
                let x = self.rk(proto, base, i.b())?;
                let y = self.rk(proto, base, i.c())?;
                if self.less_equal(&x, &y)? != (a != 0) {
                    self.skip();
                }
            }
            OpCode::Test => {
                if self.stack[ra].is_truthy() != (i.c() != 0) {
                    self.skip();
                }
            }
            OpCode::TestSet => {
                let v = reg!(i.b()).clone();
                if v.is_truthy() != (i.c() != 0) {
                    self.skip();
                } else {
                    self.stack[ra] = v;
                }
            }

            // ── Calls ─────────────────────────────────────────────────────────
            OpCode::Call => {
                let nargs = self.arg_count(ra, i.b());
                let nresults = match i.c() {
                    0 => None,
                    c => Some(c as usize - 1),
                };
                self.call_at(ra, nargs, nresults)?;
                if nresults.is_some() {
                    self.frame_mut().top = base + proto.max_stack_size as usize;
                }
            }
            OpCode::TailCall => {
                let nargs = self.arg_count(ra, i.b());
                return self.tail_call(ra, nargs);
            }
            OpCode::Return => {
                let n = match i.b() {
                    0 => self.frame().top.saturating_sub(ra),
                    b => b as usize - 1,
                };
                let n = self.return_from(ra, n)?;
                return Ok(Flow::Return(n));
            }

            // ── Loops ─────────────────────────────────────────────────────────
            OpCode::ForLoop => {
                let state = (
                    self.stack[ra].clone(),
                    self.stack[ra + 1].clone(),
                    self.stack[ra + 2].clone(),
                );
                match state {
                    (LuaValue::Integer(idx), LuaValue::Integer(left), LuaValue::Integer(step)) => {
                        // The limit slot holds the iterations still to run.
                        let left = left as u64;
                        if left > 0 {
                            let next = LuaValue::Integer(idx.wrapping_add(step));
                            self.jump(i.sbx())?;
                            self.stack[ra + 1] = LuaValue::Integer((left - 1) as i64);
                            self.stack[ra] = next.clone();
                            self.stack[ra + 3] = next;
                        }
                    }
                    (idx, limit, step) => {
                        let (Some(idx), Some(limit), Some(step)) =
                            (idx.to_number(), limit.to_number(), step.to_number())
                        else {
                            return Err(LuaError::runtime("'for' loop state is not numeric"));
                        };
                        let next = idx + step;
                        if for_continues(next, limit, step) {
                            self.jump(i.sbx())?;
                            self.stack[ra] = LuaValue::Float(next);
                            self.stack[ra + 3] = LuaValue::Float(next);
                        }
                    }
                }
            }
            OpCode::ForPrep => {
                if self.for_prep(ra)? {
                    self.stack[ra + 3] = self.stack[ra].clone();
                } else {
                    // Skip the body and its closing FORLOOP.
                    self.jump(i.sbx() + 1)?;
                }
            }
            OpCode::TForCall => {
                let cb = ra + 3;
                self.ensure_stack(cb + 3 + self.config.stack_headroom);
                for j in 0..3 {
                    self.stack[cb + j] = self.stack[ra + j].clone();
                }
                self.call_at(cb, 2, Some(i.c() as usize))?;
                self.frame_mut().top = base + proto.max_stack_size as usize;
            }
            OpCode::TForLoop => {
                let control = self.stack[ra + 1].clone();
                if !control.is_nil() {
                    self.stack[ra] = control;
                    self.jump(i.sbx())?;
                }
            }

            // ── Construction ──────────────────────────────────────────────────
            OpCode::SetList => {
                let n = match i.b() {
                    0 => self.frame().top.saturating_sub(ra + 1),
                    b => b as usize,
                };
                let block = match i.c() {
                    0 => self.extra_arg(proto)?,
                    c => c,
                };
                let Some(t) = self.stack[ra].as_table().cloned() else {
                    return Err(LuaError::runtime("SETLIST target is not a table"));
                };
                let offset = (block.saturating_sub(1) * LFIELDS_PER_FLUSH) as i64;
                let mut t = t.borrow_mut();
                for j in 1..=n {
                    t.put_int(offset + j as i64, self.stack[ra + j].clone());
                }
                drop(t);
                self.frame_mut().top = base + proto.max_stack_size as usize;
            }
            OpCode::Closure => {
                let Some(child) = proto.protos.get(i.bx() as usize).cloned() else {
                    return Err(LuaError::runtime("prototype index out of range"));
                };
                let closure = self.make_closure(cl, child, base)?;
                self.stack[ra] = LuaValue::Closure(Rc::new(closure));
            }
            OpCode::VarArg => {
                let varargs = self.frame().varargs.clone();
                match i.b() {
                    0 => {
                        let n = varargs.len();
                        self.ensure_stack(ra + n + self.config.stack_headroom);
                        for (j, v) in varargs.into_iter().enumerate() {
                            self.stack[ra + j] = v;
                        }
                        self.frame_mut().top = ra + n;
                    }
                    b => {
                        for j in 0..b as usize - 1 {
                            self.stack[ra + j] = varargs.get(j).cloned().unwrap_or_default();
                        }
                    }
                }
            }
            OpCode::ExtraArg => {
                return Err(LuaError::runtime("unexpected EXTRAARG instruction"));
            }
        }
        Ok(Flow::Continue)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn rk(&self, proto: &Proto, base: usize, x: u32) -> Result<LuaValue, LuaError> {
        if is_k(x) {
            constant(proto, index_k(x))
        } else {
            Ok(self.stack[base + x as usize].clone())
        }
    }

    fn upvalue_of(&self, cl: &Closure, idx: u32) -> Result<LuaValue, LuaError> {
        Ok(upvalue_cell(cl, idx)?.get(&self.stack))
    }

    /// Argument count of a call whose B operand is `b`; 0 means up to top.
    fn arg_count(&self, ra: usize, b: u32) -> usize {
        match b {
            0 => self.frame().top.saturating_sub(ra + 1),
            b => b as usize - 1,
        }
    }

    /// Consume the EXTRAARG that must follow the current instruction.
    fn extra_arg(&mut self, proto: &Proto) -> Result<u32, LuaError> {
        let pc = self.frame().pc;
        match proto.code.get(pc) {
            Some(next) if next.opcode() == Some(OpCode::ExtraArg) => {
                self.frame_mut().pc = pc + 1;
                Ok(next.ax())
            }
            _ => Err(LuaError::runtime("missing EXTRAARG instruction")),
        }
    }

    fn skip(&mut self) {
        self.frame_mut().pc += 1;
    }

    fn jump(&mut self, sbx: i32) -> Result<(), LuaError> {
        let frame = self.frame_mut();
        let target = frame.pc as i64 + sbx as i64;
        if target < 0 {
            return Err(LuaError::runtime("jump target out of range"));
        }
        frame.pc = target as usize;
        Ok(())
    }

    /// Close the running frame's open upvalues at absolute slots `>= from`.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.close_upvalues(from, &self.stack);
        }
    }

    /// Instantiate `child`, capturing registers of the running frame or
    /// upvalues of the enclosing closure.
    fn make_closure(&mut self, cl: &Closure, child: Rc<Proto>, base: usize) -> Result<Closure, LuaError> {
        let mut upvalues = Vec::with_capacity(child.upvalues.len());
        for desc in &child.upvalues {
            let cell = match *desc {
                UpvalueDesc::Stack(r) => self.frame_mut().find_upvalue(base + r as usize),
                UpvalueDesc::Upvalue(idx) => upvalue_cell(cl, idx as u32)?.clone(),
            };
            upvalues.push(cell);
        }
        Ok(Closure {
            kind: ClosureKind::Script(child),
            upvalues,
        })
    }

    /// Normalise the loop registers at `ra` before the first iteration and
    /// report whether the body runs at all.
    ///
    /// Integer loops replace the limit by the number of iterations left after
    /// the first, so the counter never has to step past the integer range.
    fn for_prep(&mut self, ra: usize) -> Result<bool, LuaError> {
        let init = self.stack[ra].clone();
        let limit = self.stack[ra + 1].clone();
        let step = self.stack[ra + 2].clone();
        if let (LuaValue::Integer(init), LuaValue::Integer(step)) = (&init, &step) {
            if let Some((limit, stop_now)) = for_limit(&limit, *step) {
                let count = if stop_now { None } else { for_count(*init, limit, *step) };
                let Some(count) = count else {
                    return Ok(false);
                };
                self.stack[ra + 1] = LuaValue::Integer(count as i64);
                return Ok(true);
            }
        }
        let limit = limit
            .to_number()
            .ok_or_else(|| LuaError::runtime("'for' limit must be a number"))?;
        let step = step
            .to_number()
            .ok_or_else(|| LuaError::runtime("'for' step must be a number"))?;
        let init = init
            .to_number()
            .ok_or_else(|| LuaError::runtime("'for' initial value must be a number"))?;
        self.stack[ra + 1] = LuaValue::Float(limit);
        self.stack[ra + 2] = LuaValue::Float(step);
        self.stack[ra] = LuaValue::Float(init);
        Ok(for_continues(init, limit, step))
    }
}

/// Float loop test; a zero step counts as descending.
fn for_continues(idx: f64, limit: f64, step: f64) -> bool {
    if 0.0 < step {
        idx <= limit
    } else {
        limit <= idx
    }
}

/// Iterations after the first for an integer loop, or `None` when the body
/// never runs. A zero step with `limit <= init` never ends.
fn for_count(init: i64, limit: i64, step: i64) -> Option<u64> {
    if step > 0 {
        (init <= limit).then(|| (limit as u64).wrapping_sub(init as u64) / step as u64)
    } else if step < 0 {
        // `-(step + 1) + 1` is `-step` without overflowing at `i64::MIN`.
        let stride = (-(step + 1)) as u64 + 1;
        (limit <= init).then(|| (init as u64).wrapping_sub(limit as u64) / stride)
    } else {
        (limit <= init).then_some(u64::MAX)
    }
}

/// Integer loop limit for `step`, clipped to the integer range. The flag is
/// set when the loop must not run at all. `None` selects the float loop.
fn for_limit(limit: &LuaValue, step: i64) -> Option<(i64, bool)> {
    if let LuaValue::Integer(n) = limit {
        return Some((*n, false));
    }
    let f = limit.to_number()?;
    let rounded = if step < 0 { f.ceil() } else { f.floor() };
    if let Some(n) = float_to_int(rounded) {
        return Some((n, false));
    }
    if f > 0.0 {
        Some((i64::MAX, step < 0))
    } else {
        Some((i64::MIN, step >= 0))
    }
}

fn constant(proto: &Proto, idx: u32) -> Result<LuaValue, LuaError> {
    proto
        .constants
        .get(idx as usize)
        .map(LuaValue::from)
        .ok_or_else(|| LuaError::runtime(format!("constant index {idx} out of range")))
}

fn upvalue_cell(cl: &Closure, idx: u32) -> Result<&Upvalue, LuaError> {
    cl.upvalues
        .get(idx as usize)
        .ok_or_else(|| LuaError::runtime(format!("upvalue index {idx} out of range")))
}

/// Prefix an error with the source position of the instruction at `pc`.
fn locate(e: LuaError, proto: &Proto, pc: usize) -> LuaError {
    if e.is_located() {
        return e;
    }
    let line = proto
        .line_at(pc)
        .map_or_else(|| "?".to_string(), |l| l.to_string());
    LuaError::Traced {
        location: format!("{}:{}", proto.short_source(), line),
        error: Box::new(e),
    }
}

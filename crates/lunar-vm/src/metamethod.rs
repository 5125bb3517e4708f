//! Metatable lookup and the operations that fall back to metamethods.

use crate::arith::{arith_raw, ArithOp};
use crate::compare;
use crate::error::LuaError;
use crate::state::LuaState;
use crate::value::{LuaValue, TableRef};
use std::mem;
use std::rc::Rc;
use tracing::trace;

/// Registry key of the shared metatable for non-table values of a type.
fn type_metatable_key(v: &LuaValue) -> String {
    format!("_MT{}", v.type_tag())
}

impl LuaState {
    // ── Lookup ────────────────────────────────────────────────────────────────

    /// The metatable governing `v`: its own for tables, the per-type one
    /// from the registry otherwise.
    pub(crate) fn metatable_of(&self, v: &LuaValue) -> Option<TableRef> {
        match v {
            LuaValue::Table(t) => t.borrow().metatable(),
            other => {
                let key = type_metatable_key(other);
                let registry = self.registry();
                let mt = registry.borrow().get_str(&key).as_table().cloned();
                mt
            }
        }
    }

    pub(crate) fn set_metatable_of(&mut self, v: &LuaValue, mt: Option<TableRef>) {
        match v {
            LuaValue::Table(t) => t.borrow_mut().set_metatable(mt),
            other => {
                let key = type_metatable_key(other);
                let value = mt.map(LuaValue::Table).unwrap_or_default();
                self.registry().borrow_mut().put_str(&key, value);
            }
        }
    }

    /// Raw `metatable(v)[event]`, or nil.
    pub(crate) fn metafield(&self, v: &LuaValue, event: &str) -> LuaValue {
        let Some(mt) = self.metatable_of(v) else {
            return LuaValue::Nil;
        };
        let field = mt.borrow().get_str(event);
        field
    }

    /// Call a metamethod with `args` above everything live in the current
    /// frame and return its first result.
    pub(crate) fn call_meta(&mut self, f: LuaValue, args: &[LuaValue]) -> Result<LuaValue, LuaError> {
        let frame = self.frame();
        let saved_top = frame.top;
        let scratch = match frame.closure.as_ref().and_then(|c| c.proto()) {
            Some(p) => saved_top.max(frame.base + p.max_stack_size as usize),
            None => saved_top,
        };
        trace!(target: "lunar::vm", nargs = args.len(), "metamethod call");
        self.ensure_stack(scratch + args.len() + 1 + self.config.stack_headroom);
        self.stack[scratch] = f;
        for (i, a) in args.iter().enumerate() {
            self.stack[scratch + 1 + i] = a.clone();
        }
        self.call_at(scratch, args.len(), Some(1))?;
        let result = mem::take(&mut self.stack[scratch]);
        self.frame_mut().top = saved_top;
        Ok(result)
    }

    // ── Indexing ──────────────────────────────────────────────────────────────

    /// `t[k]` with `__index` fallback.
    pub fn index(&mut self, t: LuaValue, k: LuaValue) -> Result<LuaValue, LuaError> {
        let mut t = t;
        for _ in 0..self.config.max_meta_chain {
            let handler = match &t {
                LuaValue::Table(tbl) => {
                    let v = tbl.borrow().get(&k);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    let h = self.metafield(&t, "__index");
                    if h.is_nil() {
                        return Ok(LuaValue::Nil);
                    }
                    h
                }
                other => {
                    let h = self.metafield(other, "__index");
                    if h.is_nil() {
                        return Err(LuaError::NotTable(other.type_name()));
                    }
                    h
                }
            };
            if let LuaValue::Closure(_) = handler {
                return self.call_meta(handler, &[t, k]);
            }
            t = handler;
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    /// `t[k] = v` with `__newindex` fallback.
    pub fn set_index(&mut self, t: LuaValue, k: LuaValue, v: LuaValue) -> Result<(), LuaError> {
        let mut t = t;
        for _ in 0..self.config.max_meta_chain {
            let handler = match &t {
                LuaValue::Table(tbl) => {
                    let present = !tbl.borrow().get(&k).is_nil();
                    let h = if present {
                        LuaValue::Nil
                    } else {
                        self.metafield(&t, "__newindex")
                    };
                    if h.is_nil() {
                        return tbl.borrow_mut().put(k, v);
                    }
                    h
                }
                other => {
                    let h = self.metafield(other, "__newindex");
                    if h.is_nil() {
                        return Err(LuaError::NotTable(other.type_name()));
                    }
                    h
                }
            };
            if let LuaValue::Closure(_) = handler {
                self.call_meta(handler, &[t, k, v])?;
                return Ok(());
            }
            t = handler;
        }
        Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    /// Arithmetic or bitwise `op` with metamethod fallback. Unary
    /// operators receive the operand twice.
    pub fn arith(&mut self, op: ArithOp, a: LuaValue, b: LuaValue) -> Result<LuaValue, LuaError> {
        if let Some(r) = arith_raw(op, &a, &b)? {
            return Ok(r);
        }
        let mut handler = self.metafield(&a, op.event());
        if handler.is_nil() {
            handler = self.metafield(&b, op.event());
        }
        if !handler.is_nil() {
            return self.call_meta(handler, &[a, b]);
        }
        if op.is_bitwise() {
            if a.to_number().is_some() && b.to_number().is_some() {
                return Err(LuaError::runtime("number has no integer representation"));
            }
            let culprit = if a.to_number().is_none() { &a } else { &b };
            return Err(LuaError::Arithmetic {
                kind: "bitwise operation",
                type_name: culprit.type_name(),
            });
        }
        let culprit = if a.to_arith().is_none() { &a } else { &b };
        Err(LuaError::Arithmetic {
            kind: "arithmetic",
            type_name: culprit.type_name(),
        })
    }

    // ── Comparison ────────────────────────────────────────────────────────────

    /// `a == b`, consulting `__eq` only for two distinct tables.
    pub fn equals(&mut self, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
        if a.raw_equals(b) {
            return Ok(true);
        }
        if !(matches!(a, LuaValue::Table(_)) && matches!(b, LuaValue::Table(_))) {
            return Ok(false);
        }
        let mut handler = self.metafield(a, "__eq");
        if handler.is_nil() {
            handler = self.metafield(b, "__eq");
        }
        if handler.is_nil() {
            return Ok(false);
        }
        Ok(self.call_meta(handler, &[a.clone(), b.clone()])?.is_truthy())
    }

    pub fn less_than(&mut self, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
        if let Some(r) = primitive_order(a, b, false) {
            return Ok(r);
        }
        match self.order_handler(a, b, "__lt") {
            Some(h) => Ok(self.call_meta(h, &[a.clone(), b.clone()])?.is_truthy()),
            None => Err(compare_error(a, b)),
        }
    }

    pub fn less_equal(&mut self, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
        if let Some(r) = primitive_order(a, b, true) {
            return Ok(r);
        }
        if let Some(h) = self.order_handler(a, b, "__le") {
            return Ok(self.call_meta(h, &[a.clone(), b.clone()])?.is_truthy());
        }
        match self.order_handler(b, a, "__lt") {
            Some(h) => Ok(!self.call_meta(h, &[b.clone(), a.clone()])?.is_truthy()),
            None => Err(compare_error(a, b)),
        }
    }

    fn order_handler(&self, a: &LuaValue, b: &LuaValue, event: &str) -> Option<LuaValue> {
        let h = self.metafield(a, event);
        let h = if h.is_nil() { self.metafield(b, event) } else { h };
        (!h.is_nil()).then_some(h)
    }

    // ── Length, concatenation, conversion ─────────────────────────────────────

    /// `#v`
    pub fn len(&mut self, v: &LuaValue) -> Result<LuaValue, LuaError> {
        if let LuaValue::LuaString(s) = v {
            return Ok(LuaValue::Integer(s.len() as i64));
        }
        let handler = self.metafield(v, "__len");
        if !handler.is_nil() {
            return self.call_meta(handler, &[v.clone(), v.clone()]);
        }
        match v {
            LuaValue::Table(t) => Ok(LuaValue::Integer(t.borrow().length())),
            other => Err(LuaError::Length(other.type_name())),
        }
    }

    /// Concatenate `values` left to right (evaluated right-associatively
    /// when metamethods are involved).
    pub fn concat(&mut self, values: Vec<LuaValue>) -> Result<LuaValue, LuaError> {
        if values.iter().all(|v| v.to_str_bytes().is_some()) {
            let mut out = Vec::new();
            for v in &values {
                if let Some(s) = v.to_str_bytes() {
                    out.extend_from_slice(&s);
                }
            }
            return Ok(LuaValue::LuaString(Rc::from(out)));
        }
        let mut iter = values.into_iter().rev();
        let mut acc = iter.next().unwrap_or_else(|| LuaValue::from(""));
        for lhs in iter {
            acc = self.concat_pair(lhs, acc)?;
        }
        Ok(acc)
    }

    fn concat_pair(&mut self, a: LuaValue, b: LuaValue) -> Result<LuaValue, LuaError> {
        if let (Some(x), Some(y)) = (a.to_str_bytes(), b.to_str_bytes()) {
            let mut out = Vec::with_capacity(x.len() + y.len());
            out.extend_from_slice(&x);
            out.extend_from_slice(&y);
            return Ok(LuaValue::LuaString(Rc::from(out)));
        }
        let mut handler = self.metafield(&a, "__concat");
        if handler.is_nil() {
            handler = self.metafield(&b, "__concat");
        }
        if !handler.is_nil() {
            return self.call_meta(handler, &[a, b]);
        }
        let culprit = if a.to_str_bytes().is_none() { &a } else { &b };
        Err(LuaError::Concat(culprit.type_name()))
    }

    /// `tostring(v)`, honouring `__tostring` and `__name`.
    pub fn tostring(&mut self, v: &LuaValue) -> Result<LuaValue, LuaError> {
        let handler = self.metafield(v, "__tostring");
        if !handler.is_nil() {
            let s = self.call_meta(handler, &[v.clone()])?;
            return match s {
                LuaValue::LuaString(_) => Ok(s),
                _ => Err(LuaError::runtime("'__tostring' must return a string")),
            };
        }
        if let LuaValue::LuaString(_) = v {
            return Ok(v.clone());
        }
        if let LuaValue::LuaString(name) = self.metafield(v, "__name") {
            let addr = match v {
                LuaValue::Table(t) => format!("{:p}", Rc::as_ptr(t)),
                LuaValue::Closure(c) => format!("{:p}", Rc::as_ptr(c)),
                _ => String::new(),
            };
            if !addr.is_empty() {
                let name = String::from_utf8_lossy(&name);
                return Ok(LuaValue::from(format!("{name}: {addr}").as_str()));
            }
        }
        Ok(LuaValue::from(v.to_string().as_str()))
    }
}

/// Ordering without metamethods: numbers and strings only.
fn primitive_order(a: &LuaValue, b: &LuaValue, or_equal: bool) -> Option<bool> {
    use LuaValue::*;
    Some(match (a, b) {
        (Integer(x), Integer(y)) => {
            if or_equal {
                x <= y
            } else {
                x < y
            }
        }
        (Float(x), Float(y)) => {
            if or_equal {
                x <= y
            } else {
                x < y
            }
        }
        (Integer(i), Float(f)) => {
            if or_equal {
                compare::le_int_float(*i, *f)
            } else {
                compare::lt_int_float(*i, *f)
            }
        }
        (Float(f), Integer(i)) => {
            if or_equal {
                compare::le_float_int(*f, *i)
            } else {
                compare::lt_float_int(*f, *i)
            }
        }
        (LuaString(x), LuaString(y)) => {
            if or_equal {
                x[..] <= y[..]
            } else {
                x[..] < y[..]
            }
        }
        _ => return None,
    })
}

fn compare_error(a: &LuaValue, b: &LuaValue) -> LuaError {
    LuaError::Comparison {
        lhs: a.type_name(),
        rhs: b.type_name(),
    }
}

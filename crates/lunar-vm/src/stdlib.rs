//! The base library: the globals every state starts with.

use crate::error::LuaError;
use crate::number::{str_to_int_base, str_to_number};
use crate::state::{LuaState, Status};
use crate::value::LuaValue;

pub fn open_base(l: &mut LuaState) {
    l.register("print", lua_print);
    l.register("type", lua_type);
    l.register("tostring", lua_tostring);
    l.register("tonumber", lua_tonumber);
    l.register("assert", lua_assert);
    l.register("error", lua_error);
    l.register("pcall", lua_pcall);
    l.register("select", lua_select);
    l.register("next", lua_next);
    l.register("pairs", lua_pairs);
    l.register("ipairs", lua_ipairs);
    l.register("getmetatable", lua_getmetatable);
    l.register("setmetatable", lua_setmetatable);
    l.register("rawget", lua_rawget);
    l.register("rawset", lua_rawset);
    l.register("rawequal", lua_rawequal);
    l.register("rawlen", lua_rawlen);
    let g = l.globals();
    l.set_global("_G", g);
    l.set_global("_VERSION", "Lua 5.3");
}

fn lua_print(l: &mut LuaState) -> Result<usize, LuaError> {
    let mut line = Vec::new();
    for i in 1..=l.get_top() {
        if i > 1 {
            line.push(b'\t');
        }
        let v = l.value(i as isize);
        if let LuaValue::LuaString(s) = l.tostring(&v)? {
            line.extend_from_slice(&s);
        }
    }
    line.push(b'\n');
    l.output()
        .write_all(&line)
        .map_err(|e| LuaError::runtime(format!("print: {e}")))?;
    Ok(0)
}

fn lua_type(l: &mut LuaState) -> Result<usize, LuaError> {
    let v = l.check_any(1)?;
    l.push(v.type_name());
    Ok(1)
}

fn lua_tostring(l: &mut LuaState) -> Result<usize, LuaError> {
    let v = l.check_any(1)?;
    let s = l.tostring(&v)?;
    l.push(s);
    Ok(1)
}

fn lua_tonumber(l: &mut LuaState) -> Result<usize, LuaError> {
    if l.value(2).is_nil() {
        let v = l.check_any(1)?;
        let n = match &v {
            LuaValue::Integer(_) | LuaValue::Float(_) => v.clone(),
            LuaValue::LuaString(s) => str_to_number(s).unwrap_or_default(),
            _ => LuaValue::Nil,
        };
        l.push(n);
        return Ok(1);
    }
    let base = l.check_integer(2)?;
    let LuaValue::LuaString(s) = l.value(1) else {
        let got = l.type_of(1);
        return Err(l.arg_error(1, &format!("string expected, got {got}")));
    };
    if !(2..=36).contains(&base) {
        return Err(l.arg_error(2, "base out of range"));
    }
    let n = str_to_int_base(&s, base as u32).map_or(LuaValue::Nil, LuaValue::Integer);
    l.push(n);
    Ok(1)
}

/// Raise `msg`, prefixing string messages with the position of the
/// function `level` frames below the running native.
fn raise(l: &LuaState, msg: LuaValue, level: i64) -> LuaError {
    if let LuaValue::LuaString(s) = &msg {
        let depth = l.frames.len() as i64 - 1 - level;
        if level > 0 && depth >= 0 {
            if let Some((source, line)) = l.frames[depth as usize].current_line() {
                let text = format!("{source}:{line}: {}", String::from_utf8_lossy(s));
                return LuaError::Script(LuaValue::from(text.as_str()));
            }
        }
    }
    LuaError::Script(msg)
}

fn lua_assert(l: &mut LuaState) -> Result<usize, LuaError> {
    let cond = l.check_any(1)?;
    if cond.is_truthy() {
        return Ok(l.get_top());
    }
    let msg = if l.get_top() >= 2 {
        l.value(2)
    } else {
        LuaValue::from("assertion failed!")
    };
    Err(raise(l, msg, 1))
}

fn lua_error(l: &mut LuaState) -> Result<usize, LuaError> {
    let level = l.opt_integer(2, 1)?;
    let msg = l.value(1);
    Err(raise(l, msg, level))
}

fn lua_pcall(l: &mut LuaState) -> Result<usize, LuaError> {
    l.check_any(1)?;
    let nargs = l.get_top() - 1;
    let status = l.pcall(nargs, None);
    l.push(status == Status::Ok);
    l.insert(1);
    Ok(l.get_top())
}

fn lua_select(l: &mut LuaState) -> Result<usize, LuaError> {
    let n = l.get_top() as i64;
    if let LuaValue::LuaString(s) = l.value(1) {
        if &s[..] == b"#" {
            l.push(n - 1);
            return Ok(1);
        }
    }
    let mut i = l.check_integer(1)?;
    if i < 0 {
        i += n;
    } else if i > n {
        i = n;
    }
    if i < 1 {
        return Err(l.arg_error(1, "index out of range"));
    }
    Ok((n - i) as usize)
}

fn lua_next(l: &mut LuaState) -> Result<usize, LuaError> {
    let t = l.check_table(1)?;
    let key = l.value(2);
    let entry = t.borrow_mut().next(&key)?;
    match entry {
        Some((k, v)) => {
            l.push(k);
            l.push(v);
            Ok(2)
        }
        None => {
            l.push(LuaValue::Nil);
            Ok(1)
        }
    }
}

fn lua_pairs(l: &mut LuaState) -> Result<usize, LuaError> {
    let v = l.check_any(1)?;
    let handler = l.metafield(&v, "__pairs");
    if !handler.is_nil() {
        l.push(handler);
        l.push(v);
        l.call(1, Some(3))?;
        return Ok(3);
    }
    l.push_native_closure(lua_next, 0);
    l.push(v);
    l.push(LuaValue::Nil);
    Ok(3)
}

fn ipairs_aux(l: &mut LuaState) -> Result<usize, LuaError> {
    let i = l.check_integer(2)?.wrapping_add(1);
    l.push(i);
    let t = l.value(1);
    let v = l.index(t, LuaValue::Integer(i))?;
    let found = !v.is_nil();
    l.push(v);
    Ok(if found { 2 } else { 1 })
}

fn lua_ipairs(l: &mut LuaState) -> Result<usize, LuaError> {
    let v = l.check_any(1)?;
    l.push_native_closure(ipairs_aux, 0);
    l.push(v);
    l.push(0i64);
    Ok(3)
}

fn lua_getmetatable(l: &mut LuaState) -> Result<usize, LuaError> {
    let v = l.check_any(1)?;
    let result = match l.metatable_of(&v) {
        None => LuaValue::Nil,
        Some(mt) => {
            let protected = mt.borrow().get_str("__metatable");
            if protected.is_nil() {
                LuaValue::Table(mt)
            } else {
                protected
            }
        }
    };
    l.push(result);
    Ok(1)
}

fn lua_setmetatable(l: &mut LuaState) -> Result<usize, LuaError> {
    let t = l.check_table(1)?;
    let mt = match l.value(2) {
        LuaValue::Nil => None,
        LuaValue::Table(mt) => Some(mt),
        _ => return Err(l.arg_error(2, "nil or table expected")),
    };
    let target = LuaValue::Table(t.clone());
    if !l.metafield(&target, "__metatable").is_nil() {
        return Err(LuaError::runtime("cannot change a protected metatable"));
    }
    t.borrow_mut().set_metatable(mt);
    l.set_top(1);
    Ok(1)
}

fn lua_rawget(l: &mut LuaState) -> Result<usize, LuaError> {
    let t = l.check_table(1)?;
    let k = l.check_any(2)?;
    let v = t.borrow().get(&k);
    l.push(v);
    Ok(1)
}

fn lua_rawset(l: &mut LuaState) -> Result<usize, LuaError> {
    let t = l.check_table(1)?;
    let k = l.check_any(2)?;
    let v = l.check_any(3)?;
    t.borrow_mut().put(k, v)?;
    l.set_top(1);
    Ok(1)
}

fn lua_rawequal(l: &mut LuaState) -> Result<usize, LuaError> {
    let a = l.check_any(1)?;
    let b = l.check_any(2)?;
    l.push(a.raw_equals(&b));
    Ok(1)
}

fn lua_rawlen(l: &mut LuaState) -> Result<usize, LuaError> {
    let n = match l.value(1) {
        LuaValue::Table(t) => t.borrow().length(),
        LuaValue::LuaString(s) => s.len() as i64,
        _ => return Err(l.arg_error(1, "table or string expected")),
    };
    l.push(n);
    Ok(1)
}

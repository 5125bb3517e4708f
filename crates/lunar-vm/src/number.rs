//! Number ↔ string conversions with Lua 5.3 semantics.

use crate::value::LuaValue;

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Exact float → integer conversion; `None` if `f` has a fractional part
/// or is out of range.
pub fn float_to_int(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && (-TWO_POW_63..TWO_POW_63).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Render a float like C's `%.14g`, appending `.0` when the result would
/// otherwise read as an integer.
pub fn fmt_float(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let sci = format!("{n:.13e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    let mut out = if !(-4..14).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let prec = (13 - exp) as usize;
        trim_fraction(&format!("{n:.prec$}")).to_string()
    };
    if out.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        out.push_str(".0");
    }
    out
}

fn hex_digit(b: u8) -> Option<u32> {
    (b as char).to_digit(16)
}

fn parse_hex(body: &str) -> Option<LuaValue> {
    let bytes = body.as_bytes();
    if !body.contains(['.', 'p', 'P']) {
        if bytes.is_empty() {
            return None;
        }
        let mut acc: i64 = 0;
        for &b in bytes {
            acc = acc.wrapping_mul(16).wrapping_add(hex_digit(b)? as i64);
        }
        return Some(LuaValue::Integer(acc));
    }

    let (mantissa, exp) = match body.find(['p', 'P']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let mut value = 0.0f64;
    let mut scale = 0i32;
    let mut any_digit = false;
    let mut seen_dot = false;
    for b in mantissa.bytes() {
        if b == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
            continue;
        }
        value = value * 16.0 + hex_digit(b)? as f64;
        any_digit = true;
        if seen_dot {
            scale -= 4;
        }
    }
    if !any_digit {
        return None;
    }
    if let Some(exp) = exp {
        let e: i32 = exp.parse().ok()?;
        scale = scale.checked_add(e)?;
    }
    Some(LuaValue::Float(value * 2f64.powi(scale)))
}

fn parse_decimal(body: &str) -> Option<LuaValue> {
    if body.is_empty() {
        return None;
    }
    if body.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = body.parse::<i64>() {
            return Some(LuaValue::Integer(n));
        }
    }
    let valid = body
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !valid || !body.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    body.parse::<f64>().ok().map(LuaValue::Float)
}

/// Convert a string to a number following the Lua lexer's numeral rules
/// (decimal or hexadecimal, optional sign, surrounding whitespace).
pub fn str_to_number(s: &[u8]) -> Option<LuaValue> {
    let s = std::str::from_utf8(s).ok()?.trim_matches(|c: char| c.is_ascii_whitespace());
    let (neg, body) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let value = match body.get(..2) {
        Some("0x") | Some("0X") => parse_hex(&body[2..])?,
        _ => parse_decimal(body)?,
    };
    Some(match (neg, value) {
        (false, v) => v,
        (true, LuaValue::Integer(n)) => LuaValue::Integer(n.wrapping_neg()),
        (true, LuaValue::Float(f)) => LuaValue::Float(-f),
        (true, v) => v,
    })
}

/// Parse an integer numeral in `base` (2..=36), as `tonumber(s, base)` does.
pub fn str_to_int_base(s: &[u8], base: u32) -> Option<i64> {
    let s = std::str::from_utf8(s).ok()?.trim_matches(|c: char| c.is_ascii_whitespace());
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if body.is_empty() {
        return None;
    }
    let mut acc: i64 = 0;
    for c in body.chars() {
        let d = c.to_digit(base)?;
        acc = acc.wrapping_mul(base as i64).wrapping_add(d as i64);
    }
    Some(if neg { acc.wrapping_neg() } else { acc })
}

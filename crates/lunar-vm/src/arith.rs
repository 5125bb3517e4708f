//! Raw arithmetic and bitwise operations on numbers.

use crate::error::LuaError;
use crate::value::LuaValue;
use lunar_core::OpCode;

/// Binary and unary operators that may dispatch to a metamethod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    /// Metamethod name consulted when the operands are not numbers.
    pub fn event(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
            ArithOp::Div => "__div",
            ArithOp::IDiv => "__idiv",
            ArithOp::BAnd => "__band",
            ArithOp::BOr => "__bor",
            ArithOp::BXor => "__bxor",
            ArithOp::Shl => "__shl",
            ArithOp::Shr => "__shr",
            ArithOp::Unm => "__unm",
            ArithOp::BNot => "__bnot",
        }
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }

    pub fn from_opcode(op: OpCode) -> Option<ArithOp> {
        Some(match op {
            OpCode::Add => ArithOp::Add,
            OpCode::Sub => ArithOp::Sub,
            OpCode::Mul => ArithOp::Mul,
            OpCode::Mod => ArithOp::Mod,
            OpCode::Pow => ArithOp::Pow,
            OpCode::Div => ArithOp::Div,
            OpCode::IDiv => ArithOp::IDiv,
            OpCode::BAnd => ArithOp::BAnd,
            OpCode::BOr => ArithOp::BOr,
            OpCode::BXor => ArithOp::BXor,
            OpCode::Shl => ArithOp::Shl,
            OpCode::Shr => ArithOp::Shr,
            OpCode::Unm => ArithOp::Unm,
            OpCode::BNot => ArithOp::BNot,
            _ => return None,
        })
    }
}

/// Apply `op` without metamethods. `Ok(None)` means the operands are not
/// (convertible to) numbers of the right kind and a metamethod should be
/// tried. Unary operators ignore `b`.
pub fn arith_raw(op: ArithOp, a: &LuaValue, b: &LuaValue) -> Result<Option<LuaValue>, LuaError> {
    if op.is_bitwise() {
        let (Some(x), Some(y)) = (a.to_integer(), b.to_integer()) else {
            return Ok(None);
        };
        let r = match op {
            ArithOp::BAnd => x & y,
            ArithOp::BOr => x | y,
            ArithOp::BXor => x ^ y,
            ArithOp::Shl => shift_left(x, y),
            ArithOp::Shr => shift_left(x, y.wrapping_neg()),
            _ => !x,
        };
        return Ok(Some(LuaValue::Integer(r)));
    }
    let (Some(x), Some(y)) = (a.to_arith(), b.to_arith()) else {
        return Ok(None);
    };
    if let (LuaValue::Integer(x), LuaValue::Integer(y)) = (&x, &y) {
        let (x, y) = (*x, *y);
        let r = match op {
            ArithOp::Add => Some(x.wrapping_add(y)),
            ArithOp::Sub => Some(x.wrapping_sub(y)),
            ArithOp::Mul => Some(x.wrapping_mul(y)),
            ArithOp::IDiv => Some(int_div(x, y)?),
            ArithOp::Mod => Some(int_mod(x, y)?),
            ArithOp::Unm => Some(x.wrapping_neg()),
            _ => None,
        };
        if let Some(r) = r {
            return Ok(Some(LuaValue::Integer(r)));
        }
    }
    let (Some(x), Some(y)) = (x.to_number(), y.to_number()) else {
        return Ok(None);
    };
    let r = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Pow => x.powf(y),
        ArithOp::IDiv => (x / y).floor(),
        ArithOp::Mod => float_mod(x, y),
        _ => -x,
    };
    Ok(Some(LuaValue::Float(r)))
}

/// Floor division, rounding toward negative infinity.
fn int_div(x: i64, y: i64) -> Result<i64, LuaError> {
    match y {
        0 => Err(LuaError::runtime("attempt to perform 'n//0'")),
        -1 => Ok(x.wrapping_neg()),
        _ => {
            let q = x / y;
            if (x % y != 0) && ((x ^ y) < 0) {
                Ok(q - 1)
            } else {
                Ok(q)
            }
        }
    }
}

/// Modulo whose result takes the sign of the divisor.
fn int_mod(x: i64, y: i64) -> Result<i64, LuaError> {
    match y {
        0 => Err(LuaError::runtime("attempt to perform 'n%0'")),
        -1 => Ok(0),
        _ => {
            let r = x % y;
            if r != 0 && (r ^ y) < 0 {
                Ok(r + y)
            } else {
                Ok(r)
            }
        }
    }
}

fn float_mod(x: f64, y: f64) -> f64 {
    let m = x % y;
    if m * y < 0.0 {
        m + y
    } else {
        m
    }
}

/// Logical shift; negative counts shift right, counts of 64 or more give 0.
fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        ((x as u64) >> -n) as i64
    }
}

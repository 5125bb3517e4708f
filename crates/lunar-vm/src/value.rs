use crate::closure::Closure;
use crate::number::{float_to_int, fmt_float, str_to_number};
use crate::table::LuaTable;
use lunar_core::Constant;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to a table.
pub type TableRef = Rc<RefCell<LuaTable>>;

/// All Lua value types, mirroring the Lua 5.3 type system.
#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Immutable byte string.
    LuaString(Rc<[u8]>),
    /// A table (array + hash parts, shared with interior mutability).
    Table(TableRef),
    /// A script or native closure.
    Closure(Rc<Closure>),
}

/// Type tags as numbered in Lua's `lua.h`.
pub mod tag {
    pub const NIL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const NUMBER: u8 = 3;
    pub const STRING: u8 = 4;
    pub const TABLE: u8 = 5;
    pub const FUNCTION: u8 = 6;
}

impl LuaValue {
    /// Returns the Lua type name string as per the reference manual.
    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) | LuaValue::Float(_) => "number",
            LuaValue::LuaString(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Closure(_) => "function",
        }
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            LuaValue::Nil => tag::NIL,
            LuaValue::Boolean(_) => tag::BOOLEAN,
            LuaValue::Integer(_) | LuaValue::Float(_) => tag::NUMBER,
            LuaValue::LuaString(_) => tag::STRING,
            LuaValue::Table(_) => tag::TABLE,
            LuaValue::Closure(_) => tag::FUNCTION,
        }
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Integer(_) | LuaValue::Float(_))
    }

    /// Create a new empty table value.
    pub fn new_table() -> Self {
        LuaValue::Table(Rc::new(RefCell::new(LuaTable::new())))
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            LuaValue::LuaString(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value, converting strings (`tonumber` without a base).
    pub fn to_number(&self) -> Option<f64> {
        match self {
            LuaValue::Integer(n) => Some(*n as f64),
            LuaValue::Float(f) => Some(*f),
            LuaValue::LuaString(s) => str_to_number(s).and_then(|v| v.to_number()),
            _ => None,
        }
    }

    /// Integer value, converting integral floats and numeric strings.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(n) => Some(*n),
            LuaValue::Float(f) => float_to_int(*f),
            LuaValue::LuaString(s) => str_to_number(s).and_then(|v| v.to_integer()),
            _ => None,
        }
    }

    /// The number a value coerces to in arithmetic, keeping its subtype.
    pub fn to_arith(&self) -> Option<LuaValue> {
        match self {
            LuaValue::Integer(_) | LuaValue::Float(_) => Some(self.clone()),
            LuaValue::LuaString(s) => str_to_number(s),
            _ => None,
        }
    }

    /// String form used by concatenation: strings as-is, numbers formatted.
    pub fn to_str_bytes(&self) -> Option<Rc<[u8]>> {
        match self {
            LuaValue::LuaString(s) => Some(s.clone()),
            LuaValue::Integer(n) => Some(Rc::from(n.to_string().as_bytes())),
            LuaValue::Float(f) => Some(Rc::from(fmt_float(*f).as_bytes())),
            _ => None,
        }
    }

    /// Primitive equality: never consults metamethods.
    pub fn raw_equals(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::Integer(i), LuaValue::Float(f)) | (LuaValue::Float(f), LuaValue::Integer(i)) => {
                float_to_int(*f) == Some(*i)
            }
            (LuaValue::LuaString(a), LuaValue::LuaString(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Closure(a), LuaValue::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(n: i64) -> Self {
        LuaValue::Integer(n)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Float(n)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::LuaString(Rc::from(s.as_bytes()))
    }
}

impl From<&[u8]> for LuaValue {
    fn from(s: &[u8]) -> Self {
        LuaValue::LuaString(Rc::from(s))
    }
}

impl From<TableRef> for LuaValue {
    fn from(t: TableRef) -> Self {
        LuaValue::Table(t)
    }
}

impl From<&Constant> for LuaValue {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Nil => LuaValue::Nil,
            Constant::Boolean(b) => LuaValue::Boolean(*b),
            Constant::Integer(n) => LuaValue::Integer(*n),
            Constant::Float(f) => LuaValue::Float(*f),
            Constant::String(s) => LuaValue::LuaString(s.clone()),
        }
    }
}

impl std::fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "LuaValue::Nil"),
            LuaValue::Boolean(b) => write!(f, "LuaValue::Boolean({b})"),
            LuaValue::Integer(n) => write!(f, "LuaValue::Integer({n})"),
            LuaValue::Float(n) => write!(f, "LuaValue::Float({n})"),
            LuaValue::LuaString(s) => {
                write!(f, "LuaValue::LuaString({:?})", String::from_utf8_lossy(s))
            }
            LuaValue::Table(t) => write!(f, "LuaValue::Table({:p})", Rc::as_ptr(t)),
            LuaValue::Closure(c) => write!(f, "LuaValue::Closure({:p})", Rc::as_ptr(c)),
        }
    }
}

/// `tostring` without metamethods.
impl std::fmt::Display for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{b}"),
            LuaValue::Integer(n) => write!(f, "{n}"),
            LuaValue::Float(n) => f.write_str(&fmt_float(*n)),
            LuaValue::LuaString(s) => f.write_str(&String::from_utf8_lossy(s)),
            LuaValue::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            LuaValue::Closure(c) => write!(f, "function: {:p}", Rc::as_ptr(c)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_and_false_are_falsy() {
        assert!(!LuaValue::Nil.is_truthy());
        assert!(!LuaValue::Boolean(false).is_truthy());
        // In Lua, 0 and "" are truthy.
        assert!(LuaValue::Integer(0).is_truthy());
        assert!(LuaValue::from("").is_truthy());
    }

    #[test]
    fn type_names() {
        assert_eq!(LuaValue::Nil.type_name(), "nil");
        assert_eq!(LuaValue::Integer(1).type_name(), "number");
        assert_eq!(LuaValue::Float(1.0).type_name(), "number");
        assert_eq!(LuaValue::from("hi").type_name(), "string");
        assert_eq!(LuaValue::new_table().type_name(), "table");
    }

    #[test]
    fn integer_float_equality_is_exact() {
        assert_eq!(LuaValue::Integer(1), LuaValue::Float(1.0));
        assert_ne!(LuaValue::Integer(1), LuaValue::Float(1.5));
        // 2^53 + 1 is not representable as a float; the float 2^53 must not equal it.
        let big = (1i64 << 53) + 1;
        assert_ne!(LuaValue::Integer(big), LuaValue::Float(big as f64));
        assert_ne!(LuaValue::Float(f64::NAN), LuaValue::Float(f64::NAN));
    }

    #[test]
    fn table_reference_equality() {
        let t1 = LuaValue::new_table();
        let t2 = LuaValue::new_table();
        assert_eq!(t1, t1.clone());
        assert_ne!(t1, t2);
    }

    #[test]
    fn coercions() {
        assert_eq!(LuaValue::from("10").to_integer(), Some(10));
        assert_eq!(LuaValue::from("0x10").to_number(), Some(16.0));
        assert_eq!(LuaValue::Float(2.0).to_integer(), Some(2));
        assert_eq!(LuaValue::Float(2.5).to_integer(), None);
        assert_eq!(LuaValue::Boolean(true).to_number(), None);
        assert_eq!(LuaValue::Float(3.0).to_string(), "3.0");
        assert_eq!(&*LuaValue::Integer(-4).to_str_bytes().unwrap(), b"-4");
    }
}

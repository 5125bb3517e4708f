use lunar_chunk::ChunkError;
use thiserror::Error;

use crate::value::LuaValue;

/// All errors that can occur while loading or running bytecode.
#[derive(Debug, Clone, Error)]
pub enum LuaError {
    /// Call on a value that is neither a function nor has `__call`.
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    /// Index or assignment on a value without an `__index`/`__newindex` handler.
    #[error("attempt to index a {0} value")]
    NotTable(&'static str),

    /// Arithmetic or bitwise operation on an unsupported operand.
    #[error("attempt to perform {kind} on a {type_name} value")]
    Arithmetic {
        kind: &'static str,
        type_name: &'static str,
    },

    #[error("attempt to get length of a {0} value")]
    Length(&'static str),

    #[error("attempt to concatenate a {0} value")]
    Concat(&'static str),

    #[error("attempt to compare {}", compare_operands(.lhs, .rhs))]
    Comparison {
        lhs: &'static str,
        rhs: &'static str,
    },

    /// Nil/NaN table key, or a key unknown to `next`.
    #[error("{0}")]
    InvalidKey(String),

    #[error("stack overflow")]
    StackOverflow,

    #[error(transparent)]
    Bytecode(#[from] ChunkError),

    /// A value raised by `error(...)`.
    #[error("{}", script_message(.0))]
    Script(LuaValue),

    /// Numeric-domain and library failures.
    #[error("{0}")]
    Runtime(String),

    /// An error annotated with the `source:line` of the instruction that raised it.
    #[error("{location}: {error}")]
    Traced {
        location: String,
        error: Box<LuaError>,
    },
}

fn compare_operands(lhs: &str, rhs: &str) -> String {
    if lhs == rhs {
        format!("two {lhs} values")
    } else {
        format!("{lhs} with {rhs}")
    }
}

fn script_message(v: &LuaValue) -> String {
    match v {
        LuaValue::LuaString(_) | LuaValue::Integer(_) | LuaValue::Float(_) => v.to_string(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

impl LuaError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        LuaError::Runtime(msg.into())
    }

    /// The innermost error, without location wrappers.
    pub fn root(&self) -> &LuaError {
        match self {
            LuaError::Traced { error, .. } => error.root(),
            other => other,
        }
    }

    /// Whether this error already carries its final form for the caller:
    /// raised values and located errors are never re-annotated.
    pub(crate) fn is_located(&self) -> bool {
        matches!(self, LuaError::Traced { .. } | LuaError::Script(_))
    }

    /// The value a protected call hands back to the script.
    pub fn into_value(self) -> LuaValue {
        match self {
            LuaError::Script(v) => v,
            LuaError::Traced { error, location } => match *error {
                LuaError::Script(v) => v,
                inner => LuaValue::from(format!("{location}: {inner}").as_str()),
            },
            other => LuaValue::from(other.to_string().as_str()),
        }
    }
}

//! Function prototypes: the immutable unit of compiled code.

use crate::opcode::{Instruction, OpCode};
use std::fmt;
use std::rc::Rc;

// ── Function prototype ────────────────────────────────────────────────────────

/// A compiled function prototype, immutable once built.
///
/// Every Lua function (main chunk or nested function) is one `Proto`.
/// Closures share a `Proto` via `Rc`; upvalue cells are per-instance.
#[derive(Debug, Clone, Default)]
pub struct Proto {
    /// Chunk name, e.g. `@script.lua`.
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    /// Number of fixed parameters.
    pub num_params: u8,
    /// Whether the function accepts varargs (`...`).
    pub is_vararg: bool,
    /// Number of registers the function needs.
    pub max_stack_size: u8,
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    /// How to obtain each upvalue when the closure is instantiated.
    pub upvalues: Vec<UpvalueDesc>,
    /// Nested prototypes referenced by `Closure` instructions.
    pub protos: Vec<Rc<Proto>>,
    /// Debug: source line per instruction (may be empty).
    pub line_info: Vec<u32>,
    /// Debug: local variable names and live ranges.
    pub loc_vars: Vec<LocVar>,
    /// Debug: upvalue names (may be shorter than `upvalues`).
    pub upvalue_names: Vec<String>,
}

impl Proto {
    /// Source line of the instruction at `pc`, if line info is present.
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }

    /// Chunk name without the leading `@` or `=` marker.
    pub fn short_source(&self) -> &str {
        self.source
            .strip_prefix('@')
            .or_else(|| self.source.strip_prefix('='))
            .unwrap_or(&self.source)
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// An entry of a prototype's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<[u8]>),
}

impl Constant {
    pub fn string(s: impl AsRef<[u8]>) -> Self {
        Constant::String(Rc::from(s.as_ref()))
    }

    /// Identity used for pool deduplication; floats compare by bit pattern
    /// so `0.0`/`-0.0` and NaNs stay distinct.
    fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => f.write_str("nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Integer(n) => write!(f, "{n}"),
            Constant::Float(n) => write!(f, "{n:?}"),
            Constant::String(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
        }
    }
}

// ── Upvalue descriptors ───────────────────────────────────────────────────────

/// Describes where to find an upvalue at closure instantiation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    /// Capture register `reg` of the **immediately enclosing** call frame.
    Stack(u8),
    /// Re-use upvalue `idx` of the **enclosing** closure.
    Upvalue(u8),
}

impl UpvalueDesc {
    /// `(instack, idx)` as stored in binary chunks.
    pub fn to_raw(self) -> (u8, u8) {
        match self {
            UpvalueDesc::Stack(r) => (1, r),
            UpvalueDesc::Upvalue(i) => (0, i),
        }
    }

    pub fn from_raw(instack: u8, idx: u8) -> Self {
        if instack != 0 {
            UpvalueDesc::Stack(idx)
        } else {
            UpvalueDesc::Upvalue(idx)
        }
    }
}

/// A local variable's debug record: live while `start_pc <= pc < end_pc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocVar {
    pub name: String,
    pub start_pc: u32,
    pub end_pc: u32,
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Mutable builder for a [`Proto`].
///
/// Used by tests, benches and embedders to assemble bytecode by hand.
#[derive(Debug, Default)]
pub struct ProtoBuilder {
    proto: Proto,
    line: u32,
}

impl ProtoBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            proto: Proto {
                source: source.into(),
                max_stack_size: 2,
                ..Default::default()
            },
            line: 0,
        }
    }

    pub fn params(mut self, n: u8) -> Self {
        self.proto.num_params = n;
        self
    }

    pub fn vararg(mut self) -> Self {
        self.proto.is_vararg = true;
        self
    }

    pub fn max_stack(mut self, n: u8) -> Self {
        self.proto.max_stack_size = n;
        self
    }

    /// Source line attached to subsequently emitted instructions.
    /// Line info is recorded only once a line has been set.
    pub fn set_line(&mut self, line: u32) {
        if self.line == 0 {
            self.proto.line_info = vec![line; self.proto.code.len()];
        }
        self.line = line;
    }

    /// Append an instruction and return its pc.
    pub fn emit(&mut self, i: Instruction) -> usize {
        self.proto.code.push(i);
        if self.line != 0 {
            self.proto.line_info.push(self.line);
        }
        self.proto.code.len() - 1
    }

    pub fn abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.emit(Instruction::abc(op, a, b, c))
    }

    pub fn abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.emit(Instruction::abx(op, a, bx))
    }

    pub fn asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.emit(Instruction::asbx(op, a, sbx))
    }

    /// Patch the jump at `pc` so it lands on `target`.
    pub fn patch_jump(&mut self, pc: usize, target: usize) {
        let i = self.proto.code[pc];
        let Some(op) = i.opcode() else { return };
        let offset = target as i32 - (pc as i32 + 1);
        self.proto.code[pc] = Instruction::asbx(op, i.a(), offset);
    }

    pub fn pc(&self) -> usize {
        self.proto.code.len()
    }

    /// Intern a constant and return its pool index.
    pub fn constant(&mut self, value: Constant) -> u32 {
        if let Some(idx) = self.proto.constants.iter().position(|c| c.same_as(&value)) {
            return idx as u32;
        }
        self.proto.constants.push(value);
        (self.proto.constants.len() - 1) as u32
    }

    pub fn int(&mut self, n: i64) -> u32 {
        self.constant(Constant::Integer(n))
    }

    pub fn float(&mut self, n: f64) -> u32 {
        self.constant(Constant::Float(n))
    }

    pub fn str(&mut self, s: &str) -> u32 {
        self.constant(Constant::string(s))
    }

    pub fn upvalue(&mut self, name: &str, desc: UpvalueDesc) -> u32 {
        self.proto.upvalues.push(desc);
        self.proto.upvalue_names.push(name.to_owned());
        (self.proto.upvalues.len() - 1) as u32
    }

    pub fn proto(&mut self, child: Proto) -> u32 {
        self.proto.protos.push(Rc::new(child));
        (self.proto.protos.len() - 1) as u32
    }

    pub fn local(&mut self, name: &str, start_pc: u32, end_pc: u32) {
        self.proto.loc_vars.push(LocVar { name: name.to_owned(), start_pc, end_pc });
    }

    pub fn finish(self) -> Proto {
        self.proto
    }
}

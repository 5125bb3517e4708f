//! Lua 5.3 instruction set.
//!
//! Every instruction is a single 32-bit word. The low 6 bits hold the
//! opcode; the remaining 26 bits are split according to one of four layouts:
//!
//! ```text
//!  31       23       14        6      0
//!  |   B:9   |  C:9   |  A:8   | op:6 |   iABC
//!  |      Bx:18       |  A:8   | op:6 |   iABx / iAsBx
//!  |           Ax:26           | op:6 |   iAx
//! ```

use std::fmt;

pub const SIZE_OP: u32 = 6;
pub const SIZE_A: u32 = 8;
pub const SIZE_B: u32 = 9;
pub const SIZE_C: u32 = 9;
pub const SIZE_BX: u32 = SIZE_B + SIZE_C;
pub const SIZE_AX: u32 = SIZE_A + SIZE_BX;

pub const POS_A: u32 = SIZE_OP;
pub const POS_C: u32 = POS_A + SIZE_A;
pub const POS_B: u32 = POS_C + SIZE_C;
pub const POS_BX: u32 = POS_C;
pub const POS_AX: u32 = POS_A;

pub const MAXARG_A: u32 = (1 << SIZE_A) - 1;
pub const MAXARG_B: u32 = (1 << SIZE_B) - 1;
pub const MAXARG_C: u32 = (1 << SIZE_C) - 1;
pub const MAXARG_BX: u32 = (1 << SIZE_BX) - 1;
pub const MAXARG_SBX: i32 = (MAXARG_BX >> 1) as i32;
pub const MAXARG_AX: u32 = (1 << SIZE_AX) - 1;

/// RK operands with this bit set address the constant pool.
pub const BITRK: u32 = 1 << (SIZE_B - 1);

/// Largest constant index an RK operand can address.
pub const MAXINDEXRK: u32 = BITRK - 1;

/// Number of list items accumulated before a `SetList` flush.
pub const LFIELDS_PER_FLUSH: u32 = 50;

/// Returns `true` if an RK operand refers to a constant.
#[inline]
pub fn is_k(rk: u32) -> bool {
    rk & BITRK != 0
}

/// Constant index encoded in an RK operand.
#[inline]
pub fn index_k(rk: u32) -> u32 {
    rk & !BITRK
}

/// Encode constant index `k` as an RK operand.
#[inline]
pub fn rk_ask(k: u32) -> u32 {
    k | BITRK
}

/// Decode a "floating point byte" (`eeeeexxx`) as used by `NewTable` size hints.
pub fn fb2int(x: u32) -> usize {
    if x < 8 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << ((x >> 3) - 1)
    }
}

/// Encode `x` as a floating point byte, rounding up.
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    if x < 8 {
        return x;
    }
    while x >= (8 << 4) {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= (8 << 1) {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Lua 5.3 opcodes, in their on-disk numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// `R(A) := R(B)`
    Move = 0,
    /// `R(A) := Kst(Bx)`
    LoadK,
    /// `R(A) := Kst(extra arg)`
    LoadKx,
    /// `R(A) := (Bool)B; if (C) pc++`
    LoadBool,
    /// `R(A), R(A+1), ..., R(A+B) := nil`
    LoadNil,
    /// `R(A) := UpValue[B]`
    GetUpval,
    /// `R(A) := UpValue[B][RK(C)]`
    GetTabUp,
    /// `R(A) := R(B)[RK(C)]`
    GetTable,
    /// `UpValue[A][RK(B)] := RK(C)`
    SetTabUp,
    /// `UpValue[B] := R(A)`
    SetUpval,
    /// `R(A)[RK(B)] := RK(C)`
    SetTable,
    /// `R(A) := {}` (size = B,C)
    NewTable,
    /// `R(A+1) := R(B); R(A) := R(B)[RK(C)]`
    SelfOp,
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
    Not,
    Len,
    /// `R(A) := R(B).. ... ..R(C)`
    Concat,
    /// `pc += sBx; if (A) close all upvalues >= R(A - 1)`
    Jmp,
    /// `if ((RK(B) == RK(C)) ~= A) then pc++`
    Eq,
    Lt,
    Le,
    /// `if not (R(A) <=> C) then pc++`
    Test,
    /// `if (R(B) <=> C) then R(A) := R(B) else pc++`
    TestSet,
    /// `R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))`
    Call,
    /// `return R(A)(R(A+1), ... ,R(A+B-1))`
    TailCall,
    /// `return R(A), ... ,R(A+B-2)`
    Return,
    /// `R(A) += R(A+2); if R(A) <?= R(A+1) then { pc += sBx; R(A+3) = R(A) }`
    ForLoop,
    /// `R(A) -= R(A+2); pc += sBx`
    ForPrep,
    /// `R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2))`
    TForCall,
    /// `if R(A+1) ~= nil then { R(A) = R(A+1); pc += sBx }`
    TForLoop,
    /// `R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B`
    SetList,
    /// `R(A) := closure(KPROTO[Bx])`
    Closure,
    /// `R(A), R(A+1), ..., R(A+B-2) = vararg`
    VarArg,
    /// Extra (larger) argument for the previous opcode.
    ExtraArg,
}

/// Instruction layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// How an operand field is used, for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgMode {
    /// Argument is not used.
    N,
    /// Argument is used as a plain number.
    U,
    /// Argument is a register or a jump offset.
    R,
    /// Argument is a constant or register/constant.
    K,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub mode: OpMode,
    pub b: OpArgMode,
    pub c: OpArgMode,
    /// Instruction sets register A.
    pub sets_a: bool,
    /// Instruction is a test (the next instruction must be a jump).
    pub is_test: bool,
}

const fn info(
    name: &'static str,
    is_test: bool,
    sets_a: bool,
    b: OpArgMode,
    c: OpArgMode,
    mode: OpMode,
) -> OpInfo {
    OpInfo { name, mode, b, c, sets_a, is_test }
}

use OpArgMode::{K, N, R, U};
use OpMode::{IABx, IAsBx, IAx, IABC};

static OP_INFO: [OpInfo; OpCode::COUNT] = [
    info("MOVE", false, true, R, N, IABC),
    info("LOADK", false, true, K, N, IABx),
    info("LOADKX", false, true, N, N, IABx),
    info("LOADBOOL", false, true, U, U, IABC),
    info("LOADNIL", false, true, U, N, IABC),
    info("GETUPVAL", false, true, U, N, IABC),
    info("GETTABUP", false, true, U, K, IABC),
    info("GETTABLE", false, true, R, K, IABC),
    info("SETTABUP", false, false, K, K, IABC),
    info("SETUPVAL", false, false, U, N, IABC),
    info("SETTABLE", false, false, K, K, IABC),
    info("NEWTABLE", false, true, U, U, IABC),
    info("SELF", false, true, R, K, IABC),
    info("ADD", false, true, K, K, IABC),
    info("SUB", false, true, K, K, IABC),
    info("MUL", false, true, K, K, IABC),
    info("MOD", false, true, K, K, IABC),
    info("POW", false, true, K, K, IABC),
    info("DIV", false, true, K, K, IABC),
    info("IDIV", false, true, K, K, IABC),
    info("BAND", false, true, K, K, IABC),
    info("BOR", false, true, K, K, IABC),
    info("BXOR", false, true, K, K, IABC),
    info("SHL", false, true, K, K, IABC),
    info("SHR", false, true, K, K, IABC),
    info("UNM", false, true, R, N, IABC),
    info("BNOT", false, true, R, N, IABC),
    info("NOT", false, true, R, N, IABC),
    info("LEN", false, true, R, N, IABC),
    info("CONCAT", false, true, R, R, IABC),
    info("JMP", false, false, R, N, IAsBx),
    info("EQ", true, false, K, K, IABC),
    info("LT", true, false, K, K, IABC),
    info("LE", true, false, K, K, IABC),
    info("TEST", true, false, N, U, IABC),
    info("TESTSET", true, true, R, U, IABC),
    info("CALL", false, true, U, U, IABC),
    info("TAILCALL", false, true, U, U, IABC),
    info("RETURN", false, false, U, N, IABC),
    info("FORLOOP", false, true, R, N, IAsBx),
    info("FORPREP", false, true, R, N, IAsBx),
    info("TFORCALL", false, false, N, U, IABC),
    info("TFORLOOP", false, true, R, N, IAsBx),
    info("SETLIST", false, false, U, U, IABC),
    info("CLOSURE", false, true, U, N, IABx),
    info("VARARG", false, true, U, N, IABC),
    info("EXTRAARG", false, false, U, U, IAx),
];

impl OpCode {
    pub const COUNT: usize = 47;

    const ALL: [OpCode; OpCode::COUNT] = [
        OpCode::Move,
        OpCode::LoadK,
        OpCode::LoadKx,
        OpCode::LoadBool,
        OpCode::LoadNil,
        OpCode::GetUpval,
        OpCode::GetTabUp,
        OpCode::GetTable,
        OpCode::SetTabUp,
        OpCode::SetUpval,
        OpCode::SetTable,
        OpCode::NewTable,
        OpCode::SelfOp,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Mod,
        OpCode::Pow,
        OpCode::Div,
        OpCode::IDiv,
        OpCode::BAnd,
        OpCode::BOr,
        OpCode::BXor,
        OpCode::Shl,
        OpCode::Shr,
        OpCode::Unm,
        OpCode::BNot,
        OpCode::Not,
        OpCode::Len,
        OpCode::Concat,
        OpCode::Jmp,
        OpCode::Eq,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Test,
        OpCode::TestSet,
        OpCode::Call,
        OpCode::TailCall,
        OpCode::Return,
        OpCode::ForLoop,
        OpCode::ForPrep,
        OpCode::TForCall,
        OpCode::TForLoop,
        OpCode::SetList,
        OpCode::Closure,
        OpCode::VarArg,
        OpCode::ExtraArg,
    ];

    /// Map a raw 6-bit opcode number back to an [`OpCode`].
    pub fn from_u8(n: u8) -> Option<OpCode> {
        Self::ALL.get(n as usize).copied()
    }

    pub fn info(self) -> &'static OpInfo {
        &OP_INFO[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn mode(self) -> OpMode {
        self.info().mode
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Instruction word ──────────────────────────────────────────────────────────

/// One encoded 32-bit instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Instruction(pub u32);

#[inline]
fn mask(size: u32) -> u32 {
    (1u32 << size) - 1
}

impl Instruction {
    /// Raw 6-bit opcode field.
    #[inline]
    pub fn raw_opcode(self) -> u8 {
        (self.0 & mask(SIZE_OP)) as u8
    }

    /// Decoded opcode, or `None` for an out-of-range opcode number.
    #[inline]
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.raw_opcode())
    }

    #[inline]
    pub fn a(self) -> u32 {
        (self.0 >> POS_A) & mask(SIZE_A)
    }

    #[inline]
    pub fn b(self) -> u32 {
        (self.0 >> POS_B) & mask(SIZE_B)
    }

    #[inline]
    pub fn c(self) -> u32 {
        (self.0 >> POS_C) & mask(SIZE_C)
    }

    #[inline]
    pub fn bx(self) -> u32 {
        (self.0 >> POS_BX) & mask(SIZE_BX)
    }

    #[inline]
    pub fn sbx(self) -> i32 {
        self.bx() as i32 - MAXARG_SBX
    }

    #[inline]
    pub fn ax(self) -> u32 {
        (self.0 >> POS_AX) & mask(SIZE_AX)
    }

    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAXARG_A && b <= MAXARG_B && c <= MAXARG_C);
        Instruction(
            (op as u32) | (a << POS_A) | (b << POS_B) | (c << POS_C),
        )
    }

    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(a <= MAXARG_A && bx <= MAXARG_BX);
        Instruction((op as u32) | (a << POS_A) | (bx << POS_BX))
    }

    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::abx(op, a, (sbx + MAXARG_SBX) as u32)
    }

    pub fn new_ax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAXARG_AX);
        Instruction((op as u32) | (ax << POS_AX))
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<bad opcode {}> {:#010x}", self.raw_opcode(), self.0);
        };
        match op.mode() {
            OpMode::IABC => write!(f, "{:<9} {} {} {}", op.name(), self.a(), self.b(), self.c()),
            OpMode::IABx => write!(f, "{:<9} {} {}", op.name(), self.a(), self.bx()),
            OpMode::IAsBx => write!(f, "{:<9} {} {}", op.name(), self.a(), self.sbx()),
            OpMode::IAx => write!(f, "{:<9} {}", op.name(), self.ax()),
        }
    }
}

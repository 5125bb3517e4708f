use thiserror::Error;

/// Reasons a byte buffer is rejected as a Lua 5.3 binary chunk.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChunkError {
    #[error("not a precompiled chunk (bad signature)")]
    BadSignature,

    #[error("version mismatch: expected 0x53, found {0:#04x}")]
    VersionMismatch(u8),

    #[error("format mismatch: expected 0, found {0}")]
    FormatMismatch(u8),

    #[error("corrupted chunk: {0}")]
    Corrupted(&'static str),

    #[error("{what} size mismatch: expected {expected}, found {found}")]
    SizeMismatch {
        what: &'static str,
        expected: u8,
        found: u8,
    },

    #[error("truncated chunk: need {need} bytes at offset {offset}")]
    Truncated { offset: usize, need: usize },

    #[error("unknown constant tag {0:#04x}")]
    BadConstantTag(u8),

    #[error("invalid opcode {op} at pc {pc}")]
    BadOpcode { pc: usize, op: u8 },

    #[error("functions nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("{0} trailing bytes after main function")]
    TrailingBytes(usize),
}

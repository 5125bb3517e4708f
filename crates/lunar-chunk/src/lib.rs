//! `lunar-chunk`: reads and writes Lua 5.3 precompiled chunks.

pub mod decode;
pub mod disasm;
pub mod encode;
pub mod error;
pub mod header;

pub use decode::{is_binary_chunk, undump};
pub use disasm::disassemble;
pub use encode::dump;
pub use error::ChunkError;

//! Fixed header and tag constants of the Lua 5.3 binary chunk format.

pub const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x53;
pub const LUAC_FORMAT: u8 = 0;
pub const LUAC_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
pub const CINT_SIZE: u8 = 4;
pub const CSIZET_SIZE: u8 = 8;
pub const INSTRUCTION_SIZE: u8 = 4;
pub const LUA_INTEGER_SIZE: u8 = 8;
pub const LUA_NUMBER_SIZE: u8 = 8;
pub const LUAC_INT: i64 = 0x5678;
pub const LUAC_NUM: f64 = 370.5;

pub const TAG_NIL: u8 = 0x00;
pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_NUMFLT: u8 = 0x03;
pub const TAG_NUMINT: u8 = 0x13;
pub const TAG_SHRSTR: u8 = 0x04;
pub const TAG_LNGSTR: u8 = 0x14;

/// Strings longer than this are written with the long-string tag.
pub const LUAI_MAXSHORTLEN: usize = 40;

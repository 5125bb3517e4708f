//! Binary decoder: `&[u8]` → [`Proto`].
//!
//! Reads the layout `luac` 5.3 writes on a little-endian 64-bit host.

use std::rc::Rc;

use lunar_core::{Constant, Instruction, LocVar, Proto, UpvalueDesc};
use tracing::debug;

use crate::error::ChunkError;
use crate::header::*;

// ── Cursor reader ─────────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ChunkError> {
        if self.remaining() < n {
            return Err(ChunkError::Truncated { offset: self.pos, need: n });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ChunkError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, ChunkError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32, ChunkError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64, ChunkError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, ChunkError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, ChunkError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Element count prefix (a C `int`).
    fn read_count(&mut self) -> Result<usize, ChunkError> {
        let n = self.read_u32()? as usize;
        // Every element takes at least one byte; reject absurd counts early.
        if n > self.remaining() {
            return Err(ChunkError::Truncated { offset: self.pos, need: n });
        }
        Ok(n)
    }

    /// A length-prefixed string; `None` for the absent (size 0) string.
    fn read_string(&mut self) -> Result<Option<&'a [u8]>, ChunkError> {
        let size = match self.read_u8()? {
            0 => return Ok(None),
            0xFF => self.read_u64()? as usize,
            n => n as usize,
        };
        if size == 0 {
            return Ok(None);
        }
        self.read_bytes(size - 1).map(Some)
    }

    fn read_name(&mut self) -> Result<String, ChunkError> {
        Ok(self
            .read_string()?
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default())
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

fn check_size(r: &mut Reader<'_>, what: &'static str, expected: u8) -> Result<(), ChunkError> {
    let found = r.read_u8()?;
    if found != expected {
        return Err(ChunkError::SizeMismatch { what, expected, found });
    }
    Ok(())
}

fn check_header(r: &mut Reader<'_>) -> Result<(), ChunkError> {
    if r.remaining() < LUA_SIGNATURE.len() || r.read_bytes(LUA_SIGNATURE.len())? != LUA_SIGNATURE {
        return Err(ChunkError::BadSignature);
    }
    let version = r.read_u8()?;
    if version != LUAC_VERSION {
        return Err(ChunkError::VersionMismatch(version));
    }
    let format = r.read_u8()?;
    if format != LUAC_FORMAT {
        return Err(ChunkError::FormatMismatch(format));
    }
    if r.read_bytes(LUAC_DATA.len())? != LUAC_DATA {
        return Err(ChunkError::Corrupted("bad conversion data"));
    }
    check_size(r, "int", CINT_SIZE)?;
    check_size(r, "size_t", CSIZET_SIZE)?;
    check_size(r, "Instruction", INSTRUCTION_SIZE)?;
    check_size(r, "lua_Integer", LUA_INTEGER_SIZE)?;
    check_size(r, "lua_Number", LUA_NUMBER_SIZE)?;
    if r.read_i64()? != LUAC_INT {
        return Err(ChunkError::Corrupted("endianness mismatch"));
    }
    if r.read_f64()? != LUAC_NUM {
        return Err(ChunkError::Corrupted("float format mismatch"));
    }
    Ok(())
}

// ── Proto decoder ─────────────────────────────────────────────────────────────

/// Deepest function nesting `undump` accepts.
pub const MAX_NESTING: usize = 200;

fn decode_proto(r: &mut Reader<'_>, parent_source: &str, depth: usize) -> Result<Proto, ChunkError> {
    if depth > MAX_NESTING {
        return Err(ChunkError::TooDeep(MAX_NESTING));
    }
    let mut source = r.read_name()?;
    if source.is_empty() {
        source = parent_source.to_owned();
    }
    let line_defined = r.read_u32()?;
    let last_line_defined = r.read_u32()?;
    let num_params = r.read_u8()?;
    let is_vararg = r.read_u8()? != 0;
    let max_stack_size = r.read_u8()?;

    let n = r.read_count()?;
    let mut code = Vec::with_capacity(n);
    for pc in 0..n {
        let i = Instruction(r.read_u32()?);
        if i.opcode().is_none() {
            return Err(ChunkError::BadOpcode { pc, op: i.raw_opcode() });
        }
        code.push(i);
    }

    let n = r.read_count()?;
    let mut constants = Vec::with_capacity(n);
    for _ in 0..n {
        constants.push(decode_constant(r)?);
    }

    let n = r.read_count()?;
    let mut upvalues = Vec::with_capacity(n);
    for _ in 0..n {
        let instack = r.read_u8()?;
        let idx = r.read_u8()?;
        upvalues.push(UpvalueDesc::from_raw(instack, idx));
    }

    let n = r.read_count()?;
    let mut protos = Vec::with_capacity(n);
    for _ in 0..n {
        protos.push(Rc::new(decode_proto(r, &source, depth + 1)?));
    }

    let n = r.read_count()?;
    let mut line_info = Vec::with_capacity(n);
    for _ in 0..n {
        line_info.push(r.read_u32()?);
    }

    let n = r.read_count()?;
    let mut loc_vars = Vec::with_capacity(n);
    for _ in 0..n {
        let name = r.read_name()?;
        let start_pc = r.read_u32()?;
        let end_pc = r.read_u32()?;
        loc_vars.push(LocVar { name, start_pc, end_pc });
    }

    let n = r.read_count()?;
    let mut upvalue_names = Vec::with_capacity(n);
    for _ in 0..n {
        upvalue_names.push(r.read_name()?);
    }

    Ok(Proto {
        source,
        line_defined,
        last_line_defined,
        num_params,
        is_vararg,
        max_stack_size,
        code,
        constants,
        upvalues,
        protos,
        line_info,
        loc_vars,
        upvalue_names,
    })
}

fn decode_constant(r: &mut Reader<'_>) -> Result<Constant, ChunkError> {
    let tag = r.read_u8()?;
    match tag {
        TAG_NIL => Ok(Constant::Nil),
        TAG_BOOLEAN => Ok(Constant::Boolean(r.read_u8()? != 0)),
        TAG_NUMFLT => Ok(Constant::Float(r.read_f64()?)),
        TAG_NUMINT => Ok(Constant::Integer(r.read_i64()?)),
        TAG_SHRSTR | TAG_LNGSTR => Ok(Constant::string(r.read_string()?.unwrap_or_default())),
        t => Err(ChunkError::BadConstantTag(t)),
    }
}

// ── Public entry point ────────────────────────────────────────────────────────

/// Decode a complete binary chunk into its main function prototype.
///
/// Every header mismatch, unknown tag, invalid opcode or truncation is an
/// error; a partially decoded chunk is never returned.
pub fn undump(data: &[u8]) -> Result<Proto, ChunkError> {
    let mut r = Reader::new(data);
    check_header(&mut r)?;
    let nupvals = r.read_u8()?;
    let proto = decode_proto(&mut r, "=?", 0)?;
    if r.remaining() > 0 {
        return Err(ChunkError::TrailingBytes(r.remaining()));
    }
    debug!(
        target: "lunar::chunk",
        source = %proto.source,
        nupvals,
        instructions = proto.code.len(),
        protos = proto.protos.len(),
        "chunk loaded"
    );
    Ok(proto)
}

/// Returns `true` when `data` starts with the binary chunk signature.
pub fn is_binary_chunk(data: &[u8]) -> bool {
    data.starts_with(LUA_SIGNATURE)
}

//! Binary encoder: [`Proto`] → `Vec<u8>` in the `luac` 5.3 layout.

use lunar_core::{Constant, Proto};

use crate::header::*;

// ── Low-level write helpers ────────────────────────────────────────────────

fn push_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_count(buf: &mut Vec<u8>, n: usize) {
    push_u32(buf, n as u32);
}

fn push_string(buf: &mut Vec<u8>, s: Option<&[u8]>) {
    let Some(bytes) = s else {
        push_u8(buf, 0);
        return;
    };
    let size = bytes.len() + 1;
    if size < 0xFF {
        push_u8(buf, size as u8);
    } else {
        push_u8(buf, 0xFF);
        buf.extend_from_slice(&(size as u64).to_le_bytes());
    }
    buf.extend_from_slice(bytes);
}

fn push_header(buf: &mut Vec<u8>) {
    buf.extend_from_slice(LUA_SIGNATURE);
    push_u8(buf, LUAC_VERSION);
    push_u8(buf, LUAC_FORMAT);
    buf.extend_from_slice(LUAC_DATA);
    push_u8(buf, CINT_SIZE);
    push_u8(buf, CSIZET_SIZE);
    push_u8(buf, INSTRUCTION_SIZE);
    push_u8(buf, LUA_INTEGER_SIZE);
    push_u8(buf, LUA_NUMBER_SIZE);
    buf.extend_from_slice(&LUAC_INT.to_le_bytes());
    buf.extend_from_slice(&LUAC_NUM.to_le_bytes());
}

// ── Proto encoder ──────────────────────────────────────────────────────────

fn encode_proto(proto: &Proto, parent_source: Option<&str>, buf: &mut Vec<u8>) {
    // Nested functions sharing the parent's source store it as absent.
    if parent_source == Some(proto.source.as_str()) {
        push_string(buf, None);
    } else {
        push_string(buf, Some(proto.source.as_bytes()));
    }
    push_u32(buf, proto.line_defined);
    push_u32(buf, proto.last_line_defined);
    push_u8(buf, proto.num_params);
    push_u8(buf, proto.is_vararg as u8);
    push_u8(buf, proto.max_stack_size);

    push_count(buf, proto.code.len());
    for i in &proto.code {
        push_u32(buf, i.0);
    }

    push_count(buf, proto.constants.len());
    for c in &proto.constants {
        encode_constant(c, buf);
    }

    push_count(buf, proto.upvalues.len());
    for desc in &proto.upvalues {
        let (instack, idx) = desc.to_raw();
        push_u8(buf, instack);
        push_u8(buf, idx);
    }

    push_count(buf, proto.protos.len());
    for p in &proto.protos {
        encode_proto(p, Some(&proto.source), buf);
    }

    push_count(buf, proto.line_info.len());
    for line in &proto.line_info {
        push_u32(buf, *line);
    }

    push_count(buf, proto.loc_vars.len());
    for var in &proto.loc_vars {
        push_string(buf, Some(var.name.as_bytes()));
        push_u32(buf, var.start_pc);
        push_u32(buf, var.end_pc);
    }

    push_count(buf, proto.upvalue_names.len());
    for name in &proto.upvalue_names {
        push_string(buf, Some(name.as_bytes()));
    }
}

fn encode_constant(c: &Constant, buf: &mut Vec<u8>) {
    match c {
        Constant::Nil => push_u8(buf, TAG_NIL),
        Constant::Boolean(b) => {
            push_u8(buf, TAG_BOOLEAN);
            push_u8(buf, *b as u8);
        }
        Constant::Float(f) => {
            push_u8(buf, TAG_NUMFLT);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Constant::Integer(n) => {
            push_u8(buf, TAG_NUMINT);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Constant::String(s) => {
            let tag = if s.len() <= LUAI_MAXSHORTLEN { TAG_SHRSTR } else { TAG_LNGSTR };
            push_u8(buf, tag);
            push_string(buf, Some(s));
        }
    }
}

// ── Public entry point ────────────────────────────────────────────────────────

/// Serialize `proto` as a main chunk.
pub fn dump(proto: &Proto) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + proto.code.len() * 4);
    push_header(&mut buf);
    push_u8(&mut buf, proto.upvalues.len() as u8);
    encode_proto(proto, None, &mut buf);
    buf
}

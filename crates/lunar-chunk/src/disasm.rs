use lunar_core::opcode::{index_k, is_k};
use lunar_core::{Constant, Instruction, OpArgMode, OpCode, OpMode, Proto};

/// Disassemble a [`Proto`] into a `luac -l -l` style listing.
///
/// Recursively lists nested `protos[]` after their parent.
pub fn disassemble(proto: &Proto) -> String {
    let mut out = String::new();
    disasm_proto(proto, true, &mut out);
    out
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn disasm_proto(proto: &Proto, is_main: bool, out: &mut String) {
    let kind = if is_main { "main" } else { "function" };
    out.push_str(&format!(
        "{kind} <{}:{},{}> ({})\n",
        proto.short_source(),
        proto.line_defined,
        proto.last_line_defined,
        plural(proto.code.len(), "instruction"),
    ));
    out.push_str(&format!(
        "{}{} params, {}, {}, {}, {}, {}\n",
        proto.num_params,
        if proto.is_vararg { "+" } else { "" },
        plural(proto.max_stack_size as usize, "slot"),
        plural(proto.upvalues.len(), "upvalue"),
        plural(proto.loc_vars.len(), "local"),
        plural(proto.constants.len(), "constant"),
        plural(proto.protos.len(), "function"),
    ));

    for (pc, i) in proto.code.iter().enumerate() {
        let line = proto
            .line_at(pc)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("\t{}\t[{line}]\t{}\n", pc + 1, fmt_instruction(pc, *i, proto)));
    }

    out.push_str(&format!("constants ({}):\n", proto.constants.len()));
    for (idx, c) in proto.constants.iter().enumerate() {
        out.push_str(&format!("\t{}\t{}\n", idx + 1, fmt_constant(c)));
    }

    out.push_str(&format!("locals ({}):\n", proto.loc_vars.len()));
    for (idx, v) in proto.loc_vars.iter().enumerate() {
        out.push_str(&format!("\t{idx}\t{}\t{}\t{}\n", v.name, v.start_pc + 1, v.end_pc + 1));
    }

    out.push_str(&format!("upvalues ({}):\n", proto.upvalues.len()));
    for (idx, desc) in proto.upvalues.iter().enumerate() {
        let (instack, reg) = desc.to_raw();
        let name = proto.upvalue_names.get(idx).map(String::as_str).unwrap_or("-");
        out.push_str(&format!("\t{idx}\t{name}\t{instack}\t{reg}\n"));
    }

    for sub in &proto.protos {
        out.push('\n');
        disasm_proto(sub, false, out);
    }
}

fn fmt_constant(c: &Constant) -> String {
    match c {
        Constant::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{f:.1}"),
        Constant::Float(f) => f.to_string(),
        other => other.to_string(),
    }
}

fn rk_operand(mode: OpArgMode, v: u32) -> Option<i64> {
    match mode {
        OpArgMode::N => None,
        OpArgMode::K if is_k(v) => Some(-1 - index_k(v) as i64),
        _ => Some(v as i64),
    }
}

fn constant_at(proto: &Proto, idx: u32) -> String {
    proto
        .constants
        .get(idx as usize)
        .map(fmt_constant)
        .unwrap_or_else(|| "?".to_string())
}

fn rk_comment(proto: &Proto, v: u32) -> String {
    if is_k(v) {
        constant_at(proto, index_k(v))
    } else {
        "-".to_string()
    }
}

fn upvalue_name(proto: &Proto, idx: u32) -> &str {
    proto
        .upvalue_names
        .get(idx as usize)
        .map(String::as_str)
        .unwrap_or("-")
}

fn fmt_instruction(pc: usize, i: Instruction, proto: &Proto) -> String {
    let Some(op) = i.opcode() else {
        return format!("??? {:#010x}", i.0);
    };
    let info = op.info();
    let mut operands = vec![i.a() as i64];
    match info.mode {
        OpMode::IABC => {
            operands.extend(rk_operand(info.b, i.b()));
            operands.extend(rk_operand(info.c, i.c()));
        }
        OpMode::IABx => {
            if info.b == OpArgMode::K {
                operands.push(-1 - i.bx() as i64);
            } else if info.b == OpArgMode::U {
                operands.push(i.bx() as i64);
            }
        }
        OpMode::IAsBx => operands.push(i.sbx() as i64),
        OpMode::IAx => operands = vec![-1 - i.ax() as i64],
    }
    let operands = operands
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    let comment = match op {
        OpCode::LoadK => Some(constant_at(proto, i.bx())),
        OpCode::GetUpval | OpCode::SetUpval => Some(upvalue_name(proto, i.b()).to_string()),
        OpCode::GetTabUp => Some(format!("{} {}", upvalue_name(proto, i.b()), rk_comment(proto, i.c()))),
        OpCode::SetTabUp => Some(format!(
            "{} {} {}",
            upvalue_name(proto, i.a()),
            rk_comment(proto, i.b()),
            rk_comment(proto, i.c())
        )),
        OpCode::GetTable | OpCode::SelfOp if is_k(i.c()) => Some(rk_comment(proto, i.c())),
        OpCode::SetTable
        | OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Mod
        | OpCode::Pow
        | OpCode::Div
        | OpCode::IDiv
        | OpCode::BAnd
        | OpCode::BOr
        | OpCode::BXor
        | OpCode::Shl
        | OpCode::Shr
        | OpCode::Eq
        | OpCode::Lt
        | OpCode::Le
            if is_k(i.b()) || is_k(i.c()) =>
        {
            Some(format!("{} {}", rk_comment(proto, i.b()), rk_comment(proto, i.c())))
        }
        OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
            Some(format!("to {}", pc as i64 + i.sbx() as i64 + 2))
        }
        OpCode::Closure => Some(format!("function [{}]", i.bx())),
        _ => None,
    };

    match comment {
        Some(c) => format!("{:<9}\t{operands}\t; {c}", op.name()),
        None => format!("{:<9}\t{operands}", op.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunar_core::{ProtoBuilder, UpvalueDesc};

    #[test]
    fn lists_constants_and_jumps() {
        let mut b = ProtoBuilder::new("@demo.lua");
        b.upvalue("_ENV", UpvalueDesc::Stack(0));
        b.set_line(1);
        let k = b.str("print");
        b.abc(OpCode::GetTabUp, 0, 0, lunar_core::opcode::rk_ask(k));
        b.asbx(OpCode::Jmp, 0, 0);
        b.abc(OpCode::Return, 0, 1, 0);
        let text = disassemble(&b.finish());

        assert!(text.starts_with("main <demo.lua:0,0> (3 instructions)"));
        assert!(text.contains("GETTABUP \t0 0 -1\t; _ENV \"print\""));
        assert!(text.contains("JMP      \t0 0\t; to 3"));
        assert!(text.contains("upvalues (1):\n\t0\t_ENV\t1\t0"));
    }
}

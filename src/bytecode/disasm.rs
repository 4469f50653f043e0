use crate::bytecode::{ByteCode, Literal, Op, op::jump_target, verify::collect_jump_targets};
use std::fmt::Write;

/// Disassembly of a whole template: main stream, then macros by name.
pub fn disassemble(bc: &ByteCode) -> String {
    let mut out = String::new();
    code_object(&mut out, &bc.name, &bc.ops);

    for (name, code) in &bc.macros {
        let label = format!("MACRO {}({})", name, code.params.join(", "));
        code_object(&mut out, &label, &code.ops);
    }
    out
}

fn code_object(out: &mut String, name: &str, ops: &[Op]) {
    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(out, " {}", name);
    let _ = writeln!(out, " {} instructions", ops.len());
    let _ = writeln!(out, "════════════════════════════════════════");
    out.push_str(&disassemble_ops(ops));
    out.push('\n');
}

/// One line per instruction; jump targets are marked with `►`.
pub fn disassemble_ops(ops: &[Op]) -> String {
    let targets = collect_jump_targets(ops);
    let mut out = String::new();

    for (ip, op) in ops.iter().enumerate() {
        let is_target = targets.contains(&ip);
        if is_target {
            let _ = writeln!(out, "      ┌──────────────────────────────────");
        }
        let marker = if is_target { "► " } else { "  " };
        let _ = writeln!(out, "{:04} {}{}", ip, marker, format_op(op, ip));
    }
    out
}

fn format_jump(mnemonic: &str, ip: usize, offset: i32) -> String {
    let direction = if offset < 0 { "↑" } else { "↓" };
    match jump_target(ip, offset) {
        Some(target) => format!("{:<12}{:+} {} (→ {:04})", mnemonic, offset, direction, target),
        None => format!("{:<12}{:+} {} (→ ????)", mnemonic, offset, direction),
    }
}

fn format_literal(lit: &Literal) -> String {
    match lit {
        Literal::Nil => "nil".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(n) => n.to_string(),
        Literal::UInt(n) => format!("{}u", n),
        Literal::Float(f) => format!("{:?}", f),
        Literal::Str(s) => format!("{:?}", s),
    }
}

fn format_op(op: &Op, ip: usize) -> String {
    match op {
        Op::Noop => "NOOP".to_string(),
        Op::End => "END".to_string(),

        // Registers
        Op::Nil => "NIL".to_string(),
        Op::Literal(lit) => format!("LITERAL     {}", format_literal(lit)),
        Op::MoveToSb => "MOVE_TO_SB".to_string(),
        Op::MoveFromSb => "MOVE_FROM_SB".to_string(),
        Op::PopToSb => "POP_TO_SB".to_string(),
        Op::Push => "PUSH".to_string(),
        Op::Pop => "POP".to_string(),
        Op::PushMark => "PUSH_MARK".to_string(),

        // Variables
        Op::FetchSymbol(name) => format!("FETCH_SYM   {}", name),
        Op::FetchField(name) => format!("FETCH_FIELD .{}", name),
        Op::FetchArrayElement => "FETCH_ELEM  ; sa[sb]".to_string(),
        Op::LoadLvar(slot) => format!("LOAD_LVAR   #{}", slot),
        Op::SaveToLvar(slot) => format!("SAVE_LVAR   #{}", slot),
        Op::LoopVar(slot) => format!("LOOP_VAR    #{}", slot),

        // Output
        Op::MarkRaw => "MARK_RAW".to_string(),
        Op::Print => "PRINT".to_string(),
        Op::PrintRaw => "PRINT_RAW".to_string(),
        Op::PrintRawConst(text) => format!("PRINT_CONST {:?}", text),

        // Arithmetic
        Op::Add => "ADD".to_string(),
        Op::Sub => "SUB".to_string(),
        Op::Mul => "MUL".to_string(),
        Op::Div => "DIV".to_string(),
        Op::Mod => "MOD".to_string(),
        Op::Concat => "CONCAT".to_string(),
        Op::Neg => "NEG".to_string(),

        // Comparison
        Op::Eq => "EQ".to_string(),
        Op::Ne => "NE".to_string(),
        Op::Lt => "LT".to_string(),
        Op::Gt => "GT".to_string(),
        Op::Le => "LE".to_string(),
        Op::Ge => "GE".to_string(),

        // Logic
        Op::And(offset) => format_jump("AND", ip, *offset),
        Op::Or(offset) => format_jump("OR", ip, *offset),
        Op::Not => "NOT".to_string(),

        // Control flow
        Op::Goto(offset) => format_jump("GOTO", ip, *offset),
        Op::JumpIfFalse(offset) => format_jump("JUMP_FALSE", ip, *offset),

        // Constructors
        Op::MakeArray => "MAKE_ARRAY".to_string(),
        Op::MakeHash => "MAKE_HASH".to_string(),
        Op::Range => "RANGE       ; sb..sa".to_string(),

        // Calls
        Op::FunCallSymbol(name) => format!("FUNCALL     {}", name),
        Op::MethodCall(name) => format!("METHOD      .{}", name),
        Op::MacroCall(name) => format!("MACRO_CALL  {}", name),
        Op::Filter(name) => format!("FILTER      | {}", name),
        Op::HtmlEscape => "HTML_ESCAPE".to_string(),
        Op::UriEscape => "URI_ESCAPE".to_string(),

        // Loops
        Op::ForStart(slot) => format!("FOR_START   #{}", slot),
        Op::ForIter { slot, max, exit } => {
            format!("{} #{} max={}", format_jump("FOR_ITER", ip, *exit), slot, max)
        }
        Op::LoopGuard { slot, max } => format!("LOOP_GUARD  #{} max={}", slot, max),

        // Output capture and templates
        Op::SaveWriter => "SAVE_WRITER".to_string(),
        Op::RestoreWriter => "RESTORE_WRITER".to_string(),
        Op::Include => "INCLUDE     ; name=sa vars=sb".to_string(),
        Op::Wrapper => "WRAPPER     ; name=sa vars=sb".to_string(),
    }
}

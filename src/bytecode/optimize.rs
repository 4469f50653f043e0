use crate::bytecode::{ByteCode, Literal, Op, verify::collect_jump_targets};

/// Peephole pass over the main stream and every macro body.
/// Returns the number of fused pairs.
pub fn optimize(bc: &mut ByteCode) -> usize {
    let mut fused = optimize_ops(&mut bc.ops);
    for code in bc.macros.values_mut() {
        fused += optimize_ops(&mut code.ops);
    }
    fused
}

/// Rewrites `Literal(Str)` + `PrintRaw` into `PrintRawConst` + `Noop`.
///
/// The instruction count never changes, so relative jumps stay valid. A pair
/// whose `PrintRaw` is a jump target is left alone.
pub fn optimize_ops(ops: &mut [Op]) -> usize {
    let targets = collect_jump_targets(ops);
    let mut fused = 0;
    let mut ip = 0;

    while ip + 1 < ops.len() {
        let fusable = matches!(ops[ip], Op::Literal(Literal::Str(_)))
            && ops[ip + 1] == Op::PrintRaw
            && !targets.contains(&(ip + 1));

        if fusable {
            if let Op::Literal(Literal::Str(text)) = std::mem::replace(&mut ops[ip], Op::Noop) {
                ops[ip] = Op::PrintRawConst(text);
                ops[ip + 1] = Op::Noop;
                fused += 1;
            }
            ip += 2;
        } else {
            ip += 1;
        }
    }

    fused
}

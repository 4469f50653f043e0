use std::collections::BTreeSet;

use crate::bytecode::{ByteCode, Op, op::jump_target};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("bytecode check error in {code} at ip={ip}: {message}")]
pub struct VerifyError {
    pub code: String,
    pub ip: usize,
    pub message: String,
}

impl VerifyError {
    fn new(code: &str, ip: usize, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            ip,
            message: message.into(),
        }
    }
}

/// Absolute targets of every jump in `ops`, in ascending order.
/// Jumps that would land before the start are skipped.
pub fn collect_jump_targets(ops: &[Op]) -> BTreeSet<usize> {
    ops.iter()
        .enumerate()
        .filter_map(|(ip, op)| op.jump_offset().and_then(|off| jump_target(ip, off)))
        .collect()
}

/// Checks that `ops` ends with `End` and that every jump lands inside the
/// sequence on an instruction boundary.
pub fn check_ops(code: &str, ops: &[Op]) -> Result<(), VerifyError> {
    if ops.last() != Some(&Op::End) {
        return Err(VerifyError::new(
            code,
            ops.len(),
            "instruction stream does not end with End",
        ));
    }

    for (ip, op) in ops.iter().enumerate() {
        let Some(offset) = op.jump_offset() else {
            continue;
        };
        match jump_target(ip, offset) {
            Some(target) if target < ops.len() => {}
            _ => {
                return Err(VerifyError::new(
                    code,
                    ip,
                    format!(
                        "{:?} lands outside 0..{} (offset {:+})",
                        op,
                        ops.len(),
                        offset
                    ),
                ));
            }
        }
    }

    Ok(())
}

/// Checks the main stream and every macro body.
pub fn verify(bc: &ByteCode) -> Result<(), VerifyError> {
    check_ops(&bc.name, &bc.ops)?;
    for (name, code) in &bc.macros {
        check_ops(&format!("{}::{}", bc.name, name), &code.ops)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_jumps() {
        let ops = vec![Op::Nil, Op::JumpIfFalse(2), Op::Print, Op::Goto(-3), Op::End];
        assert!(check_ops("t", &ops).is_ok());
    }

    #[test]
    fn test_jump_past_end() {
        let ops = vec![Op::Goto(5), Op::End];
        let err = check_ops("t", &ops).unwrap_err();
        assert_eq!(err.ip, 0);
        assert!(err.message.contains("outside"));
    }

    #[test]
    fn test_jump_before_start() {
        let ops = vec![Op::Nil, Op::Goto(-2), Op::End];
        assert!(check_ops("t", &ops).is_err());
    }

    #[test]
    fn test_missing_end() {
        let ops = vec![Op::Nil];
        assert!(check_ops("t", &ops).is_err());
    }

    #[test]
    fn test_collect_targets() {
        let ops = vec![
            Op::Nil,
            Op::JumpIfFalse(3),
            Op::Print,
            Op::Goto(-3),
            Op::End,
        ];
        let targets: Vec<usize> = collect_jump_targets(&ops).into_iter().collect();
        assert_eq!(targets, vec![0, 4]);
    }
}

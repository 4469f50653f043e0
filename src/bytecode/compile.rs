use std::collections::BTreeMap;

use crate::{
    ast::{BinaryOp, Node, NodeKind, Template, UnaryOp},
    bytecode::{
        ByteCode, Literal, MacroCode, Op, compile_error::CompileError, verify::verify,
    },
};

/// Lowers a parsed template into bytecode.
pub struct Compiler {
    /// Template name stamped on the output
    name: String,

    /// Macros compiled so far
    macros: BTreeMap<String, MacroCode>,
}

impl Compiler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            macros: BTreeMap::new(),
        }
    }

    pub fn compile(mut self, template: &Template) -> Result<ByteCode, CompileError> {
        let mut ops = Vec::new();
        for node in &template.nodes {
            self.compile_statement(node, &mut ops, true)?;
        }
        ops.push(Op::End);

        let mut bc = ByteCode::new(self.name);
        bc.ops = ops;
        bc.macros = self.macros;

        verify(&bc)?;
        Ok(bc)
    }

    fn compile_block(&mut self, nodes: &[Node], ops: &mut Vec<Op>) -> Result<(), CompileError> {
        for node in nodes {
            self.compile_statement(node, ops, false)?;
        }
        Ok(())
    }

    fn compile_statement(
        &mut self,
        node: &Node,
        ops: &mut Vec<Op>,
        top_level: bool,
    ) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Text(text) => {
                ops.push(Op::Literal(Literal::Str(text.clone())));
                ops.push(Op::PrintRaw);
            }

            NodeKind::Print(expr) => {
                self.compile_expr(expr, ops)?;
                ops.push(Op::Print);
            }

            NodeKind::Discard(expr) => self.compile_expr(expr, ops)?,

            // cond
            // JumpIfFalse(else)
            // then
            // Goto(end)        ; only with an else branch
            // else:
            // ...
            // end:
            NodeKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.compile_expr(cond, ops)?;
                let skip_then = emit(ops, Op::JumpIfFalse(0));
                self.compile_block(then, ops)?;
                if otherwise.is_empty() {
                    patch_to_here(ops, skip_then)?;
                } else {
                    let skip_else = emit(ops, Op::Goto(0));
                    patch_to_here(ops, skip_then)?;
                    self.compile_block(otherwise, ops)?;
                    patch_to_here(ops, skip_else)?;
                }
            }

            // list
            // ForStart(slot)
            // top: ForIter{exit}
            // body
            // Goto(top)
            // exit:
            NodeKind::Foreach {
                slot,
                list,
                body,
                max_iterations,
                ..
            } => {
                self.compile_expr(list, ops)?;
                ops.push(Op::ForStart(*slot));
                let top = emit(
                    ops,
                    Op::ForIter {
                        slot: *slot,
                        max: *max_iterations,
                        exit: 0,
                    },
                );
                self.compile_block(body, ops)?;
                emit_goto(ops, top)?;
                patch_to_here(ops, top)?;
            }

            // Literal 0, SaveToLvar(counter)
            // top: cond
            // JumpIfFalse(exit)
            // LoopGuard
            // JumpIfFalse(exit)
            // body
            // Goto(top)
            // exit:
            NodeKind::While {
                cond,
                body,
                counter_slot,
                max_iterations,
            } => {
                ops.push(Op::Literal(Literal::Int(0)));
                ops.push(Op::SaveToLvar(*counter_slot));
                let top = ops.len();
                self.compile_expr(cond, ops)?;
                let cond_exit = emit(ops, Op::JumpIfFalse(0));
                ops.push(Op::LoopGuard {
                    slot: *counter_slot,
                    max: *max_iterations,
                });
                let guard_exit = emit(ops, Op::JumpIfFalse(0));
                self.compile_block(body, ops)?;
                emit_goto(ops, top)?;
                patch_to_here(ops, cond_exit)?;
                patch_to_here(ops, guard_exit)?;
            }

            NodeKind::Macro { name, params, body } => {
                if !top_level {
                    return Err(CompileError::nested_macro(name));
                }
                let mut macro_ops = Vec::new();
                self.compile_block(body, &mut macro_ops)?;
                macro_ops.push(Op::End);
                self.macros.insert(
                    name.clone(),
                    MacroCode {
                        params: params.clone(),
                        ops: macro_ops,
                    },
                );
            }

            NodeKind::Include { template, bindings } => {
                self.compile_expr(template, ops)?;
                ops.push(Op::Push);
                self.compile_bindings(bindings, ops)?;
                ops.push(Op::MoveToSb);
                ops.push(Op::Pop);
                ops.push(Op::Include);
            }

            NodeKind::Wrapper {
                template,
                bindings,
                body,
            } => {
                ops.push(Op::SaveWriter);
                self.compile_block(body, ops)?;
                ops.push(Op::RestoreWriter);
                ops.push(Op::Push);
                self.compile_expr(template, ops)?;
                ops.push(Op::Push);
                self.compile_bindings(bindings, ops)?;
                ops.push(Op::MoveToSb);
                ops.push(Op::Pop);
                ops.push(Op::Wrapper);
            }

            _ => self.compile_expr(node, ops)?,
        }
        Ok(())
    }

    /// Leaves a map of the bindings in `sa`, or nil when there are none.
    fn compile_bindings(
        &mut self,
        bindings: &[(String, Node)],
        ops: &mut Vec<Op>,
    ) -> Result<(), CompileError> {
        if bindings.is_empty() {
            ops.push(Op::Nil);
            return Ok(());
        }
        ops.push(Op::PushMark);
        for (key, value) in bindings {
            ops.push(Op::Literal(Literal::Str(key.clone())));
            ops.push(Op::Push);
            self.compile_expr(value, ops)?;
            ops.push(Op::Push);
        }
        ops.push(Op::MakeHash);
        Ok(())
    }

    fn compile_args(&mut self, args: &[Node], ops: &mut Vec<Op>) -> Result<(), CompileError> {
        for arg in args {
            self.compile_expr(arg, ops)?;
            ops.push(Op::Push);
        }
        Ok(())
    }

    /// Compiles an expression, leaving its value in `sa`.
    fn compile_expr(&mut self, node: &Node, ops: &mut Vec<Op>) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Int(n) => ops.push(Op::Literal(Literal::Int(*n))),
            NodeKind::UInt(n) => ops.push(Op::Literal(Literal::UInt(*n))),
            NodeKind::Float(f) => ops.push(Op::Literal(Literal::Float(*f))),
            NodeKind::Str(s) => ops.push(Op::Literal(Literal::Str(s.clone()))),
            NodeKind::Bool(b) => ops.push(Op::Literal(Literal::Bool(*b))),
            NodeKind::Nil => ops.push(Op::Nil),

            NodeKind::LocalVar { slot, .. } => ops.push(Op::LoadLvar(*slot)),
            NodeKind::Symbol(name) => ops.push(Op::FetchSymbol(name.clone())),
            NodeKind::LoopVar { slot } => ops.push(Op::LoopVar(*slot)),

            NodeKind::Field { container, name } => {
                self.compile_expr(container, ops)?;
                ops.push(Op::FetchField(name.clone()));
            }

            NodeKind::Index { container, index } => {
                self.compile_expr(container, ops)?;
                ops.push(Op::Push);
                self.compile_expr(index, ops)?;
                ops.push(Op::MoveToSb);
                ops.push(Op::Pop);
                ops.push(Op::FetchArrayElement);
            }

            NodeKind::MethodCall {
                invocant,
                name,
                args,
            } => {
                ops.push(Op::PushMark);
                self.compile_expr(invocant, ops)?;
                ops.push(Op::Push);
                self.compile_args(args, ops)?;
                ops.push(Op::MethodCall(name.clone()));
            }

            NodeKind::FunCall { name, args } => {
                ops.push(Op::PushMark);
                self.compile_args(args, ops)?;
                ops.push(Op::FunCallSymbol(name.clone()));
            }

            NodeKind::MacroCall { name, args } => {
                ops.push(Op::PushMark);
                self.compile_args(args, ops)?;
                ops.push(Op::MacroCall(name.clone()));
            }

            NodeKind::Filter { expr, name } => {
                self.compile_expr(expr, ops)?;
                ops.push(match name.as_str() {
                    "html" => Op::HtmlEscape,
                    "uri" => Op::UriEscape,
                    "raw" => Op::MarkRaw,
                    _ => Op::Filter(name.clone()),
                });
            }

            NodeKind::Unary { op, operand } => {
                self.compile_expr(operand, ops)?;
                ops.push(match op {
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Neg => Op::Neg,
                });
            }

            NodeKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                self.compile_expr(left, ops)?;
                let short = emit(
                    ops,
                    match op {
                        BinaryOp::And => Op::And(0),
                        _ => Op::Or(0),
                    },
                );
                self.compile_expr(right, ops)?;
                patch_to_here(ops, short)?;
            }

            NodeKind::Binary { op, left, right } => {
                self.compile_operands(left, right, ops)?;
                ops.push(binary_op(*op));
            }

            NodeKind::Assign { slot, value, .. } => {
                self.compile_expr(value, ops)?;
                ops.push(Op::SaveToLvar(*slot));
            }

            NodeKind::List(items) => {
                ops.push(Op::PushMark);
                self.compile_args(items, ops)?;
                ops.push(Op::MakeArray);
            }

            NodeKind::Range { start, end } => {
                self.compile_operands(start, end, ops)?;
                ops.push(Op::Range);
            }

            _ => return Err(CompileError::unhandled(node)),
        }
        Ok(())
    }

    /// Left operand into `sb`, right operand into `sa`.
    fn compile_operands(
        &mut self,
        left: &Node,
        right: &Node,
        ops: &mut Vec<Op>,
    ) -> Result<(), CompileError> {
        self.compile_expr(left, ops)?;
        if leaves_sb_alone(right) {
            ops.push(Op::MoveToSb);
            self.compile_expr(right, ops)?;
        } else {
            ops.push(Op::Push);
            self.compile_expr(right, ops)?;
            ops.push(Op::PopToSb);
        }
        Ok(())
    }
}

/// True when compiling `node` cannot clobber `sb`.
fn leaves_sb_alone(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Int(_)
        | NodeKind::UInt(_)
        | NodeKind::Float(_)
        | NodeKind::Str(_)
        | NodeKind::Bool(_)
        | NodeKind::Nil
        | NodeKind::LocalVar { .. }
        | NodeKind::Symbol(_)
        | NodeKind::LoopVar { .. } => true,
        NodeKind::Field { container, .. } => leaves_sb_alone(container),
        _ => false,
    }
}

fn binary_op(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::Concat => Op::Concat,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Ne => Op::Ne,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::Le => Op::Le,
        BinaryOp::Ge => Op::Ge,
        BinaryOp::And => Op::And(0),
        BinaryOp::Or => Op::Or(0),
    }
}

fn emit(ops: &mut Vec<Op>, op: Op) -> usize {
    ops.push(op);
    ops.len() - 1
}

fn relative(from: usize, to: usize) -> Result<i32, CompileError> {
    i32::try_from(to as i64 - from as i64)
        .map_err(|_| CompileError::internal(format!("jump from {} to {} is too far", from, to)))
}

/// Points the jump at `at` to the next instruction to be emitted.
fn patch_to_here(ops: &mut [Op], at: usize) -> Result<(), CompileError> {
    let offset = relative(at, ops.len())?;
    match ops.get_mut(at).and_then(Op::jump_offset_mut) {
        Some(slot) => {
            *slot = offset;
            Ok(())
        }
        None => Err(CompileError::internal(format!(
            "no jump instruction at {} to patch",
            at
        ))),
    }
}

fn emit_goto(ops: &mut Vec<Op>, target: usize) -> Result<(), CompileError> {
    let offset = relative(ops.len(), target)?;
    ops.push(Op::Goto(offset));
    Ok(())
}

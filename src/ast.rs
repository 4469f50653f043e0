//! # Template Abstract Syntax Tree
//!
//! The AST is produced by the parser and consumed by the bytecode compiler.
//! It does not depend on the surface syntax: any front-end that resolves
//! local variables to slots can target it.
//!
//! ## Conventions
//!
//! - Expression nodes leave one value behind when compiled.
//! - Statement nodes (`Print`, `If`, loops, ...) leave nothing.
//! - `slot` fields are frame-relative indices resolved by the parser.
//!
//! `Clone` is a deep copy: every child is owned (`Box`/`Vec`), so a cloned
//! macro or wrapper body never aliases the original.

use crate::token::Span;

/// A node plus its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub span: Span,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// String concatenation (`~`).
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// Short-circuit `&&`.
    And,
    /// Short-circuit `||`.
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ───────────────────────────── Literals ─────────────────────────────
    /// Literal template text, printed unescaped.
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,

    // ───────────────────────────── Variables ────────────────────────────
    /// Frame-local variable, already resolved to a slot.
    LocalVar { name: String, slot: usize },

    /// Variable looked up by name in the render environment.
    Symbol(String),

    /// The `loop` object of the foreach whose item lives in `slot`.
    LoopVar { slot: usize },

    // ─────────────────────────────── Access ─────────────────────────────
    /// `container.name`
    Field { container: Box<Node>, name: String },

    /// `container[index]`
    Index { container: Box<Node>, index: Box<Node> },

    /// `invocant.name(args...)`
    MethodCall {
        invocant: Box<Node>,
        name: String,
        args: Vec<Node>,
    },

    /// `name(args...)`, dispatched through the function registry.
    FunCall { name: String, args: Vec<Node> },

    /// Call of a macro declared earlier in the same template.
    MacroCall { name: String, args: Vec<Node> },

    /// `expr | name`
    Filter { expr: Box<Node>, name: String },

    // ───────────────────────────── Operators ────────────────────────────
    Unary { op: UnaryOp, operand: Box<Node> },

    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },

    /// Store into a local slot. Evaluates to the stored value.
    Assign {
        name: String,
        slot: usize,
        value: Box<Node>,
    },

    /// `[a, b, c]`
    List(Vec<Node>),

    /// `[start..end]`, inclusive on both ends.
    Range { start: Box<Node>, end: Box<Node> },

    // ───────────────────────────── Statements ───────────────────────────
    /// Print an expression (HTML-escaped unless the value is raw).
    Print(Box<Node>),

    /// Evaluate and throw the result away (`CALL expr`, bare assignment).
    Discard(Box<Node>),

    If {
        cond: Box<Node>,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },

    /// `FOREACH var IN list`. The loop uses three consecutive slots: the
    /// current item at `slot`, the index at `slot + 1` and the collection
    /// at `slot + 2`.
    Foreach {
        var: String,
        slot: usize,
        list: Box<Node>,
        body: Vec<Node>,
        max_iterations: usize,
    },

    /// `WHILE cond`. `counter_slot` holds the hidden iteration counter.
    While {
        cond: Box<Node>,
        body: Vec<Node>,
        counter_slot: usize,
        max_iterations: usize,
    },

    /// `MACRO name(params) BLOCK ... END`. Parameters occupy slots
    /// `0..params.len()` of the macro's own frame.
    Macro {
        name: String,
        params: Vec<String>,
        body: Vec<Node>,
    },

    /// `INCLUDE template WITH k = v, ...`
    Include {
        template: Box<Node>,
        bindings: Vec<(String, Node)>,
    },

    /// `WRAPPER template WITH k = v ... END`. The rendered body is passed to
    /// the wrapping template as `content`.
    Wrapper {
        template: Box<Node>,
        bindings: Vec<(String, Node)>,
        body: Vec<Node>,
    },
}

impl Node {
    pub fn new(span: Span, kind: NodeKind) -> Self {
        Node { span, kind }
    }

    pub fn boxed(span: Span, kind: NodeKind) -> Box<Self> {
        Box::new(Node::new(span, kind))
    }

    /// Human-readable name of the node kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Text(_) => "text",
            NodeKind::Int(_) => "integer literal",
            NodeKind::UInt(_) => "unsigned literal",
            NodeKind::Float(_) => "float literal",
            NodeKind::Str(_) => "string literal",
            NodeKind::Bool(_) => "bool literal",
            NodeKind::Nil => "nil",
            NodeKind::LocalVar { .. } => "local variable",
            NodeKind::Symbol(_) => "variable",
            NodeKind::LoopVar { .. } => "loop",
            NodeKind::Field { .. } => "field access",
            NodeKind::Index { .. } => "index access",
            NodeKind::MethodCall { .. } => "method call",
            NodeKind::FunCall { .. } => "function call",
            NodeKind::MacroCall { .. } => "macro call",
            NodeKind::Filter { .. } => "filter",
            NodeKind::Unary { .. } => "unary operator",
            NodeKind::Binary { .. } => "binary operator",
            NodeKind::Assign { .. } => "assignment",
            NodeKind::List(_) => "list literal",
            NodeKind::Range { .. } => "range",
            NodeKind::Print(_) => "print",
            NodeKind::Discard(_) => "call",
            NodeKind::If { .. } => "if",
            NodeKind::Foreach { .. } => "foreach",
            NodeKind::While { .. } => "while",
            NodeKind::Macro { .. } => "macro",
            NodeKind::Include { .. } => "include",
            NodeKind::Wrapper { .. } => "wrapper",
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Text(_)
            | NodeKind::Int(_)
            | NodeKind::UInt(_)
            | NodeKind::Float(_)
            | NodeKind::Str(_)
            | NodeKind::Bool(_)
            | NodeKind::Nil
            | NodeKind::LocalVar { .. }
            | NodeKind::Symbol(_)
            | NodeKind::LoopVar { .. } => Vec::new(),
            NodeKind::Field { container, .. } => vec![&**container],
            NodeKind::Index { container, index } => vec![&**container, &**index],
            NodeKind::MethodCall { invocant, args, .. } => {
                let mut v: Vec<&Node> = vec![&**invocant];
                v.extend(args.iter());
                v
            }
            NodeKind::FunCall { args, .. } | NodeKind::MacroCall { args, .. } => {
                args.iter().collect()
            }
            NodeKind::Filter { expr, .. } => vec![&**expr],
            NodeKind::Unary { operand, .. } => vec![&**operand],
            NodeKind::Binary { left, right, .. } => vec![&**left, &**right],
            NodeKind::Assign { value, .. } => vec![&**value],
            NodeKind::List(items) => items.iter().collect(),
            NodeKind::Range { start, end } => vec![&**start, &**end],
            NodeKind::Print(expr) | NodeKind::Discard(expr) => vec![&**expr],
            NodeKind::If {
                cond,
                then,
                otherwise,
            } => {
                let mut v: Vec<&Node> = vec![&**cond];
                v.extend(then.iter());
                v.extend(otherwise.iter());
                v
            }
            NodeKind::Foreach { list, body, .. } => {
                let mut v: Vec<&Node> = vec![&**list];
                v.extend(body.iter());
                v
            }
            NodeKind::While { cond, body, .. } => {
                let mut v: Vec<&Node> = vec![&**cond];
                v.extend(body.iter());
                v
            }
            NodeKind::Macro { body, .. } => body.iter().collect(),
            NodeKind::Include { template, bindings } => {
                let mut v: Vec<&Node> = vec![&**template];
                v.extend(bindings.iter().map(|(_, n)| n));
                v
            }
            NodeKind::Wrapper {
                template,
                bindings,
                body,
            } => {
                let mut v: Vec<&Node> = body.iter().collect();
                v.push(&**template);
                v.extend(bindings.iter().map(|(_, n)| n));
                v
            }
        }
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }
}

/// Parsed template: a name and its top-level nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Template {
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        for node in &self.nodes {
            node.walk(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(kind: NodeKind) -> Node {
        Node::new(Span::new(0, 1), kind)
    }

    #[test]
    fn test_clone_is_deep() {
        let original = n(NodeKind::Macro {
            name: "m".to_string(),
            params: vec!["a".to_string()],
            body: vec![n(NodeKind::Print(Box::new(n(NodeKind::LocalVar {
                name: "a".to_string(),
                slot: 0,
            }))))],
        });

        let mut copy = original.clone();
        if let NodeKind::Macro { body, .. } = &mut copy.kind {
            body.push(n(NodeKind::Text("extra".to_string())));
            if let NodeKind::Print(inner) = &mut body[0].kind {
                inner.kind = NodeKind::Nil;
            }
        }

        match &original.kind {
            NodeKind::Macro { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(
                    &body[0].kind,
                    NodeKind::Print(inner) if matches!(inner.kind, NodeKind::LocalVar { slot: 0, .. })
                ));
            }
            other => panic!("expected macro, got {:?}", other),
        }
    }

    #[test]
    fn test_walk_is_preorder() {
        let tree = n(NodeKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(n(NodeKind::Int(1))),
            right: Box::new(n(NodeKind::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(n(NodeKind::Int(2))),
            })),
        });
        let mut names = Vec::new();
        tree.walk(&mut |node| names.push(node.kind_name()));
        assert_eq!(
            names,
            vec![
                "binary operator",
                "integer literal",
                "unary operator",
                "integer literal"
            ]
        );
    }
}

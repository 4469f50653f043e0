use std::collections::HashMap;

use crate::ast::{BinaryOp, Node, NodeKind, Template, UnaryOp};
use crate::error::{Error, Result};
use crate::lexer::{LexError, Lexer, TokenStream};
use crate::parser_error::SyntaxError;
use crate::symbol::Syntax;
use crate::token::{Span, Token, TokenKind};

/// Local-variable bookkeeping for one frame (template body or macro body).
///
/// Slots grow monotonically for the life of the frame, so a name declared
/// in an inner scope always gets a fresh slot and never overwrites the slot
/// of a same-named outer variable.
#[derive(Debug, Default)]
struct ScopeFrame {
    scope: HashMap<String, usize>,
    outer_scopes: Vec<HashMap<String, usize>>,
    next_slot: usize,
    /// Item slots of the enclosing foreach loops, innermost last.
    loops: Vec<usize>,
}

impl ScopeFrame {
    fn lookup(&self, name: &str) -> Option<usize> {
        self.scope
            .get(name)
            .or_else(|| self.outer_scopes.iter().rev().find_map(|s| s.get(name)))
            .copied()
    }

    fn reserve(&mut self, count: usize) -> usize {
        let slot = self.next_slot;
        self.next_slot += count;
        slot
    }

    fn declare(&mut self, name: &str) -> usize {
        let slot = self.reserve(1);
        self.scope.insert(name.to_string(), slot);
        slot
    }

    fn push_scope(&mut self) {
        let outer = std::mem::take(&mut self.scope);
        self.outer_scopes.push(outer);
    }

    fn pop_scope(&mut self) {
        self.scope = self.outer_scopes.pop().unwrap_or_default();
    }
}

/// How a block ended. Carries the closing token for diagnostics.
enum BlockEnd {
    Eof(Token),
    End(Token),
    Else(Token),
    Elsif(Token, Node),
}

impl BlockEnd {
    fn token(&self) -> &Token {
        match self {
            BlockEnd::Eof(t) | BlockEnd::End(t) | BlockEnd::Else(t) | BlockEnd::Elsif(t, _) => t,
        }
    }
}

enum Directive {
    Node(Node),
    Empty,
    Close(BlockEnd),
}

/// Recursive-descent parser for the TTerse syntax.
///
/// Pulls tokens lazily from the lexer through a one-token-pushback stream
/// and resolves local variables to frame slots as it goes. The first lexical
/// or syntax error aborts the parse.
pub struct Parser<'a> {
    name: String,
    tokens: TokenStream<'a>,
    tag_end: String,
    max_iterations: usize,
    frame: ScopeFrame,
    outer_frames: Vec<ScopeFrame>,
    macros: Vec<String>,
}

impl<'a> Parser<'a> {
    pub fn new(name: &str, source: &'a str, syntax: &'a Syntax) -> Self {
        Parser {
            name: name.to_string(),
            tokens: TokenStream::new(Lexer::new(name, source, syntax)),
            tag_end: syntax.tag_end.clone(),
            max_iterations: syntax.max_iterations,
            frame: ScopeFrame::default(),
            outer_frames: Vec::new(),
            macros: Vec::new(),
        }
    }

    /// Parses the whole template.
    pub fn parse(mut self) -> Result<Template> {
        let (nodes, end) = self.parse_block()?;
        match end {
            BlockEnd::Eof(_) => Ok(Template {
                name: self.name,
                nodes,
            }),
            other => Err(self.error_at(other.token(), "unexpected block terminator outside a block")),
        }
    }

    // --------------------
    // token helpers
    // --------------------

    fn next(&mut self) -> Result<Token> {
        let token = self.tokens.next();
        if token.kind == TokenKind::Error {
            return Err(LexError::from_token(&self.name, &token).into());
        }
        Ok(token)
    }

    fn peek(&mut self) -> Result<TokenKind> {
        let token = self.tokens.peek();
        if token.kind == TokenKind::Error {
            return Err(LexError::from_token(&self.name, token).into());
        }
        Ok(token.kind)
    }

    fn eat(&mut self, kind: TokenKind) -> Result<bool> {
        if self.peek()? == kind {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        let token = self.next()?;
        if token.kind != kind {
            return Err(self.unexpected(&token, what));
        }
        Ok(token)
    }

    fn expect_tag_end(&mut self) -> Result<Token> {
        let what = format!("tag end '{}'", self.tag_end);
        self.expect(TokenKind::TagEnd, &what)
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        Ok(self.expect(TokenKind::Ident, what)?.value)
    }

    fn unexpected(&self, found: &Token, expected: &str) -> Error {
        SyntaxError::unexpected(&self.name, found, expected).into()
    }

    fn error_at(&self, at: &Token, message: &str) -> Error {
        SyntaxError::at(&self.name, at, message).into()
    }

    fn require_end(&self, end: BlockEnd) -> Result<()> {
        match end {
            BlockEnd::End(_) => Ok(()),
            other => Err(self.unexpected(other.token(), "END")),
        }
    }

    // --------------------
    // blocks
    // --------------------

    /// Parses text and directives until END/ELSE/ELSIF or end of input.
    fn parse_block(&mut self) -> Result<(Vec<Node>, BlockEnd)> {
        let mut nodes = Vec::new();
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::RawText => {
                    nodes.push(Node::new(token.span, NodeKind::Text(token.value)));
                }
                TokenKind::TagStart => match self.parse_directive()? {
                    Directive::Node(node) => nodes.push(node),
                    Directive::Empty => {}
                    Directive::Close(end) => return Ok((nodes, end)),
                },
                TokenKind::Eof => return Ok((nodes, BlockEnd::Eof(token))),
                _ => return Err(self.unexpected(&token, "text or tag start")),
            }
        }
    }

    /// Parses a loop body in its own lexical scope.
    fn parse_scoped_body(&mut self) -> Result<Vec<Node>> {
        let (body, end) = self.parse_block()?;
        self.require_end(end)?;
        Ok(body)
    }

    fn parse_directive(&mut self) -> Result<Directive> {
        let token = self.next()?;
        let span = token.span;

        let node = match token.kind {
            TokenKind::TagEnd => return Ok(Directive::Empty),

            TokenKind::Get => {
                let expr = self.parse_expr()?;
                self.expect_tag_end()?;
                Node::new(span, NodeKind::Print(Box::new(expr)))
            }
            TokenKind::Set => self.parse_set(span)?,
            TokenKind::Call => {
                let expr = self.parse_assignment()?;
                self.expect_tag_end()?;
                Node::new(span, NodeKind::Discard(Box::new(expr)))
            }
            TokenKind::If | TokenKind::Unless => {
                let mut cond = self.parse_expr()?;
                self.expect_tag_end()?;
                if token.kind == TokenKind::Unless {
                    cond = Node::new(
                        span,
                        NodeKind::Unary {
                            op: UnaryOp::Not,
                            operand: Box::new(cond),
                        },
                    );
                }
                self.parse_if_body(span, cond)?
            }
            TokenKind::Elsif => {
                let cond = self.parse_expr()?;
                self.expect_tag_end()?;
                return Ok(Directive::Close(BlockEnd::Elsif(token, cond)));
            }
            TokenKind::Else => {
                self.expect_tag_end()?;
                return Ok(Directive::Close(BlockEnd::Else(token)));
            }
            TokenKind::End => {
                self.expect_tag_end()?;
                return Ok(Directive::Close(BlockEnd::End(token)));
            }
            TokenKind::Foreach => self.parse_foreach(span)?,
            TokenKind::While => self.parse_while(span)?,
            TokenKind::Macro => self.parse_macro(span)?,
            TokenKind::Include => {
                let (template, bindings) = self.parse_include_target()?;
                Node::new(span, NodeKind::Include { template, bindings })
            }
            TokenKind::Wrapper => {
                let (template, bindings) = self.parse_include_target()?;
                let (body, end) = self.parse_block()?;
                self.require_end(end)?;
                Node::new(
                    span,
                    NodeKind::Wrapper {
                        template,
                        bindings,
                        body,
                    },
                )
            }
            _ => {
                // bare expression: print it, unless it is an assignment
                self.tokens.backup(token);
                let expr = self.parse_assignment()?;
                self.expect_tag_end()?;
                match expr.kind {
                    NodeKind::Assign { .. } => Node::new(span, NodeKind::Discard(Box::new(expr))),
                    _ => Node::new(span, NodeKind::Print(Box::new(expr))),
                }
            }
        };

        Ok(Directive::Node(node))
    }

    /// `SET name = expr`. Declares `name` in the innermost scope unless it
    /// already lives there.
    fn parse_set(&mut self, span: Span) -> Result<Node> {
        let name = self.expect_ident("variable name after SET")?;
        self.expect(TokenKind::Assign, "'='")?;
        let value = self.parse_expr()?;
        self.expect_tag_end()?;

        let slot = match self.frame.scope.get(&name) {
            Some(slot) => *slot,
            None => self.frame.declare(&name),
        };

        let assign = Node::new(
            span,
            NodeKind::Assign {
                name,
                slot,
                value: Box::new(value),
            },
        );
        Ok(Node::new(span, NodeKind::Discard(Box::new(assign))))
    }

    fn parse_if_body(&mut self, span: Span, cond: Node) -> Result<Node> {
        let (then, end) = self.parse_block()?;
        let otherwise = match end {
            BlockEnd::End(_) => Vec::new(),
            BlockEnd::Else(_) => {
                let (body, end) = self.parse_block()?;
                self.require_end(end)?;
                body
            }
            BlockEnd::Elsif(token, cond) => vec![self.parse_if_body(token.span, cond)?],
            BlockEnd::Eof(token) => return Err(self.unexpected(&token, "END")),
        };

        Ok(Node::new(
            span,
            NodeKind::If {
                cond: Box::new(cond),
                then,
                otherwise,
            },
        ))
    }

    /// `FOREACH var IN expr ... END`
    fn parse_foreach(&mut self, span: Span) -> Result<Node> {
        let var = self.expect_ident("loop variable name")?;
        let token = self.next()?;
        if !matches!(token.kind, TokenKind::In | TokenKind::Assign) {
            return Err(self.unexpected(&token, "IN"));
        }
        // the list is evaluated in the enclosing scope
        let list = self.parse_expr()?;
        self.expect_tag_end()?;

        self.frame.push_scope();
        let slot = self.frame.reserve(3);
        self.frame.scope.insert(var.clone(), slot);
        self.frame.loops.push(slot);

        let body = self.parse_scoped_body();

        self.frame.loops.pop();
        self.frame.pop_scope();

        Ok(Node::new(
            span,
            NodeKind::Foreach {
                var,
                slot,
                list: Box::new(list),
                body: body?,
                max_iterations: self.max_iterations,
            },
        ))
    }

    /// `WHILE cond ... END`
    fn parse_while(&mut self, span: Span) -> Result<Node> {
        let cond = self.parse_expr()?;
        self.expect_tag_end()?;

        self.frame.push_scope();
        let counter_slot = self.frame.reserve(1);
        let body = self.parse_scoped_body();
        self.frame.pop_scope();

        Ok(Node::new(
            span,
            NodeKind::While {
                cond: Box::new(cond),
                body: body?,
                counter_slot,
                max_iterations: self.max_iterations,
            },
        ))
    }

    /// `MACRO name(a, b) BLOCK ... END`
    fn parse_macro(&mut self, span: Span) -> Result<Node> {
        let name = self.expect_ident("macro name")?;

        let mut params = Vec::new();
        if self.eat(TokenKind::LParen)? {
            if !self.eat(TokenKind::RParen)? {
                loop {
                    params.push(self.expect_ident("parameter name")?);
                    let token = self.next()?;
                    match token.kind {
                        TokenKind::Comma => continue,
                        TokenKind::RParen => break,
                        _ => return Err(self.unexpected(&token, "',' or ')'")),
                    }
                }
            }
        }
        self.expect(TokenKind::Block, "BLOCK")?;
        self.expect_tag_end()?;

        // declared before the body so the macro can call itself
        if !self.macros.contains(&name) {
            self.macros.push(name.clone());
        }

        let outer = std::mem::take(&mut self.frame);
        self.outer_frames.push(outer);
        for param in &params {
            self.frame.declare(param);
        }

        let body = self.parse_scoped_body();

        self.frame = self.outer_frames.pop().unwrap_or_default();

        Ok(Node::new(
            span,
            NodeKind::Macro {
                name,
                params,
                body: body?,
            },
        ))
    }

    /// Template expression plus optional `WITH k = v, ...`, then the tag end.
    fn parse_include_target(&mut self) -> Result<(Box<Node>, Vec<(String, Node)>)> {
        let template = self.parse_expr()?;
        let mut bindings = Vec::new();

        if self.eat(TokenKind::With)? {
            loop {
                let key = self.expect_ident("binding name")?;
                self.expect(TokenKind::Assign, "'='")?;
                let value = self.parse_expr()?;
                bindings.push((key, value));
                if !self.eat(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect_tag_end()?;

        Ok((Box::new(template), bindings))
    }

    // --------------------
    // expressions
    // --------------------

    /// Expression optionally followed by `=`, `+=`, `-=`, `*=` or `/=`.
    fn parse_assignment(&mut self) -> Result<Node> {
        let target = self.parse_expr()?;

        let op = match self.peek()? {
            TokenKind::Assign => None,
            TokenKind::AddAssign => Some(BinaryOp::Add),
            TokenKind::SubAssign => Some(BinaryOp::Sub),
            TokenKind::MulAssign => Some(BinaryOp::Mul),
            TokenKind::DivAssign => Some(BinaryOp::Div),
            _ => return Ok(target),
        };
        let op_token = self.next()?;

        let name = match &target.kind {
            NodeKind::LocalVar { name, .. } | NodeKind::Symbol(name) => name.clone(),
            _ => {
                return Err(self.error_at(
                    &op_token,
                    &format!("cannot assign to {}", target.kind_name()),
                ));
            }
        };

        let value = self.parse_expr()?;
        let span = target.span;
        let value = match op {
            Some(op) => Node::new(
                op_token.span,
                NodeKind::Binary {
                    op,
                    left: Box::new(target),
                    right: Box::new(value),
                },
            ),
            None => value,
        };

        let slot = match self.frame.lookup(&name) {
            Some(slot) => slot,
            None => self.frame.declare(&name),
        };

        Ok(Node::new(
            span,
            NodeKind::Assign {
                name,
                slot,
                value: Box::new(value),
            },
        ))
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Node> {
        let mut expr = self.parse_or()?;
        while self.peek()? == TokenKind::Pipe {
            let pipe = self.next()?;
            let name = self.expect_ident("filter name")?;
            expr = Node::new(
                pipe.span,
                NodeKind::Filter {
                    expr: Box::new(expr),
                    name,
                },
            );
        }
        Ok(expr)
    }

    fn binary(op: BinaryOp, span: Span, left: Node, right: Node) -> Node {
        Node::new(
            span,
            NodeKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        )
    }

    fn parse_or(&mut self) -> Result<Node> {
        let mut left = self.parse_and()?;
        while self.peek()? == TokenKind::Or {
            let token = self.next()?;
            let right = self.parse_and()?;
            left = Self::binary(BinaryOp::Or, token.span, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut left = self.parse_equality()?;
        while self.peek()? == TokenKind::And {
            let token = self.next()?;
            let right = self.parse_equality()?;
            left = Self::binary(BinaryOp::And, token.span, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek()? {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                _ => return Ok(left),
            };
            let token = self.next()?;
            let right = self.parse_relational()?;
            left = Self::binary(op, token.span, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Node> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek()? {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::LtEq => BinaryOp::Le,
                TokenKind::GtEq => BinaryOp::Ge,
                _ => return Ok(left),
            };
            let token = self.next()?;
            let right = self.parse_additive()?;
            left = Self::binary(op, token.span, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Node> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek()? {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::Tilde => BinaryOp::Concat,
                _ => return Ok(left),
            };
            let token = self.next()?;
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, token.span, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Node> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek()? {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            let token = self.next()?;
            let right = self.parse_unary()?;
            left = Self::binary(op, token.span, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Node> {
        let op = match self.peek()? {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => {
                self.next()?;
                return self.parse_unary();
            }
            _ => return self.parse_postfix(),
        };
        let token = self.next()?;
        let operand = self.parse_unary()?;
        Ok(Node::new(
            token.span,
            NodeKind::Unary {
                op,
                operand: Box::new(operand),
            },
        ))
    }

    fn parse_postfix(&mut self) -> Result<Node> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek()? {
                TokenKind::Dot => {
                    let dot = self.next()?;
                    if self.peek()? == TokenKind::Number {
                        let token = self.next()?;
                        let index = Node::new(token.span, self.parse_number(&token)?);
                        expr = Node::new(
                            dot.span,
                            NodeKind::Index {
                                container: Box::new(expr),
                                index: Box::new(index),
                            },
                        );
                        continue;
                    }
                    let name = self.expect_ident("field name")?;
                    if self.peek()? == TokenKind::LParen {
                        self.next()?;
                        let args = self.parse_args()?;
                        expr = Node::new(
                            dot.span,
                            NodeKind::MethodCall {
                                invocant: Box::new(expr),
                                name,
                                args,
                            },
                        );
                    } else {
                        expr = Node::new(
                            dot.span,
                            NodeKind::Field {
                                container: Box::new(expr),
                                name,
                            },
                        );
                    }
                }
                TokenKind::LBracket => {
                    let bracket = self.next()?;
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Node::new(
                        bracket.span,
                        NodeKind::Index {
                            container: Box::new(expr),
                            index: Box::new(index),
                        },
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Arguments after an already consumed `(`.
    fn parse_args(&mut self) -> Result<Vec<Node>> {
        let mut args = Vec::new();
        if self.eat(TokenKind::RParen)? {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            let token = self.next()?;
            match token.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => return Ok(args),
                _ => return Err(self.unexpected(&token, "',' or ')'")),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node> {
        let token = self.next()?;
        let span = token.span;

        let kind = match token.kind {
            TokenKind::Number => self.parse_number(&token)?,
            TokenKind::String => NodeKind::Str(token.value),
            TokenKind::True => NodeKind::Bool(true),
            TokenKind::False => NodeKind::Bool(false),
            TokenKind::Nil => NodeKind::Nil,
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(expr);
            }
            TokenKind::LBracket => self.parse_list_literal()?,
            TokenKind::Ident => {
                if self.peek()? == TokenKind::LParen {
                    self.next()?;
                    let args = self.parse_args()?;
                    let name = token.value;
                    if self.macros.contains(&name) {
                        NodeKind::MacroCall { name, args }
                    } else {
                        NodeKind::FunCall { name, args }
                    }
                } else {
                    self.resolve_variable(token.value)
                }
            }
            _ => return Err(self.unexpected(&token, "expression")),
        };

        Ok(Node::new(span, kind))
    }

    fn resolve_variable(&self, name: String) -> NodeKind {
        if let Some(slot) = self.frame.lookup(&name) {
            return NodeKind::LocalVar { name, slot };
        }
        if name == "loop" {
            if let Some(slot) = self.frame.loops.last() {
                return NodeKind::LoopVar { slot: *slot };
            }
        }
        NodeKind::Symbol(name)
    }

    /// `[]`, `[a, b, c]` or `[a..b]`, after the opening bracket.
    fn parse_list_literal(&mut self) -> Result<NodeKind> {
        if self.eat(TokenKind::RBracket)? {
            return Ok(NodeKind::List(Vec::new()));
        }

        let first = self.parse_expr()?;
        if self.eat(TokenKind::Range)? {
            let end = self.parse_expr()?;
            self.expect(TokenKind::RBracket, "']'")?;
            return Ok(NodeKind::Range {
                start: Box::new(first),
                end: Box::new(end),
            });
        }

        let mut items = vec![first];
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::RBracket => break,
                TokenKind::Comma => {
                    if self.eat(TokenKind::RBracket)? {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                _ => return Err(self.unexpected(&token, "',' or ']'")),
            }
        }
        Ok(NodeKind::List(items))
    }

    fn parse_number(&self, token: &Token) -> Result<NodeKind> {
        let text = token.value.as_str();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };

        let hex = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"));
        if let Some(hex) = hex {
            let value = i64::from_str_radix(hex, 16)
                .map_err(|_| self.error_at(token, &format!("hex number out of range: {}", text)))?;
            return Ok(NodeKind::Int(if negative { -value } else { value }));
        }

        if digits.contains(['.', 'e', 'E']) {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error_at(token, &format!("invalid float: {}", text)))?;
            return Ok(NodeKind::Float(value));
        }

        if let Ok(value) = text.parse::<i64>() {
            return Ok(NodeKind::Int(value));
        }
        if !negative {
            if let Ok(value) = digits.parse::<u64>() {
                return Ok(NodeKind::UInt(value));
            }
        }
        Err(self.error_at(token, &format!("integer out of range: {}", text)))
    }
}

/// Parses `source` with the given syntax.
pub fn parse_template(name: &str, source: &str, syntax: &Syntax) -> Result<Template> {
    Parser::new(name, source, syntax).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Template {
        parse_template("test.tt", source, &Syntax::tterse()).unwrap()
    }

    fn parse_err(source: &str) -> Error {
        parse_template("test.tt", source, &Syntax::tterse()).unwrap_err()
    }

    fn print_expr(node: &Node) -> &NodeKind {
        match &node.kind {
            NodeKind::Print(expr) => &expr.kind,
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_text_only() {
        let t = parse("Hello, World!");
        assert_eq!(t.nodes.len(), 1);
        assert_eq!(t.nodes[0].kind, NodeKind::Text("Hello, World!".to_string()));
    }

    #[test]
    fn test_bare_expression_prints() {
        let t = parse("Hi [% name %]!");
        assert_eq!(t.nodes.len(), 3);
        assert_eq!(print_expr(&t.nodes[1]), &NodeKind::Symbol("name".to_string()));
    }

    #[test]
    fn test_precedence() {
        let t = parse("[% 1 + 2 * 3 %]");
        match print_expr(&t.nodes[0]) {
            NodeKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(right.kind, NodeKind::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {:?}", other),
        }

        let t = parse("[% (1 + 2) * 3 %]");
        assert!(matches!(
            print_expr(&t.nodes[0]),
            NodeKind::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_set_declares_slot() {
        let t = parse("[% SET x = 1 %][% x %]");
        match &t.nodes[0].kind {
            NodeKind::Discard(assign) => assert!(matches!(
                assign.kind,
                NodeKind::Assign { slot: 0, .. }
            )),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            print_expr(&t.nodes[1]),
            NodeKind::LocalVar { slot: 0, .. }
        ));
    }

    #[test]
    fn test_compound_assignment_reuses_slot() {
        let t = parse("[% SET x = 0 %][% CALL x += 1 %]");
        match &t.nodes[1].kind {
            NodeKind::Discard(assign) => match &assign.kind {
                NodeKind::Assign { slot, value, .. } => {
                    assert_eq!(*slot, 0);
                    assert!(matches!(value.kind, NodeKind::Binary { op: BinaryOp::Add, .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_foreach_shadows_outer_variable() {
        let t = parse("[% SET i = 9 %][% FOREACH i IN [1..3] %][% i %][% END %][% i %]");
        match &t.nodes[1].kind {
            NodeKind::Foreach { slot, body, .. } => {
                assert_eq!(*slot, 1);
                assert!(matches!(print_expr(&body[0]), NodeKind::LocalVar { slot: 1, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(print_expr(&t.nodes[2]), NodeKind::LocalVar { slot: 0, .. }));
    }

    #[test]
    fn test_loop_variable_resolution() {
        let t = parse("[% FOREACH x IN list %][% loop.index %][% END %][% loop %]");
        match &t.nodes[0].kind {
            NodeKind::Foreach { body, .. } => match print_expr(&body[0]) {
                NodeKind::Field { container, name } => {
                    assert_eq!(name, "index");
                    assert_eq!(container.kind, NodeKind::LoopVar { slot: 0 });
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
        // outside any loop `loop` is an ordinary variable
        assert_eq!(print_expr(&t.nodes[1]), &NodeKind::Symbol("loop".to_string()));
    }

    #[test]
    fn test_if_elsif_else() {
        let t = parse("[% IF a %]A[% ELSIF b %]B[% ELSE %]C[% END %]");
        match &t.nodes[0].kind {
            NodeKind::If { then, otherwise, .. } => {
                assert_eq!(then.len(), 1);
                assert_eq!(otherwise.len(), 1);
                match &otherwise[0].kind {
                    NodeKind::If { otherwise, .. } => {
                        assert_eq!(otherwise[0].kind, NodeKind::Text("C".to_string()))
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unless_negates() {
        let t = parse("[% UNLESS a %]x[% END %]");
        match &t.nodes[0].kind {
            NodeKind::If { cond, .. } => {
                assert!(matches!(cond.kind, NodeKind::Unary { op: UnaryOp::Not, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_macro_params_and_call() {
        let t = parse("[% MACRO greet(who, punct) BLOCK %]Hi [% who %][% punct %][% END %][% greet('Bob', '!') %]");
        match &t.nodes[0].kind {
            NodeKind::Macro { name, params, body } => {
                assert_eq!(name, "greet");
                assert_eq!(params, &vec!["who".to_string(), "punct".to_string()]);
                assert!(matches!(print_expr(&body[1]), NodeKind::LocalVar { slot: 0, .. }));
                assert!(matches!(print_expr(&body[2]), NodeKind::LocalVar { slot: 1, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            print_expr(&t.nodes[1]),
            NodeKind::MacroCall { args, .. } if args.len() == 2
        ));
    }

    #[test]
    fn test_include_and_wrapper() {
        let t = parse("[% INCLUDE 'a.tt' WITH x = 1, y = 'z' %][% WRAPPER 'w.tt' %]body[% END %]");
        match &t.nodes[0].kind {
            NodeKind::Include { template, bindings } => {
                assert_eq!(template.kind, NodeKind::Str("a.tt".to_string()));
                let keys: Vec<&str> = bindings.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["x", "y"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &t.nodes[1].kind {
            NodeKind::Wrapper { body, bindings, .. } => {
                assert!(bindings.is_empty());
                assert_eq!(body[0].kind, NodeKind::Text("body".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_filters_and_methods() {
        let t = parse("[% items.join(', ') | html %][% list[0].name %]");
        match print_expr(&t.nodes[0]) {
            NodeKind::Filter { expr, name } => {
                assert_eq!(name, "html");
                assert!(matches!(&expr.kind, NodeKind::MethodCall { name, args, .. } if name == "join" && args.len() == 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        match print_expr(&t.nodes[1]) {
            NodeKind::Field { container, name } => {
                assert_eq!(name, "name");
                assert!(matches!(container.kind, NodeKind::Index { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dotted_index() {
        let t = parse("[% rows.2.0.name %]");
        let NodeKind::Field { container, name } = print_expr(&t.nodes[0]) else {
            panic!("expected field access");
        };
        assert_eq!(name, "name");
        let NodeKind::Index { container, index } = &container.kind else {
            panic!("expected index, got {:?}", container.kind);
        };
        assert_eq!(index.kind, NodeKind::Int(0));
        let NodeKind::Index { container, index } = &container.kind else {
            panic!("expected index, got {:?}", container.kind);
        };
        assert_eq!(index.kind, NodeKind::Int(2));
        assert_eq!(container.kind, NodeKind::Symbol("rows".to_string()));
    }

    #[test]
    fn test_numbers() {
        let t = parse("[% 0x10 %][% 2.5 %][% 18446744073709551615 %][% [-3] %]");
        assert_eq!(print_expr(&t.nodes[0]), &NodeKind::Int(16));
        assert_eq!(print_expr(&t.nodes[1]), &NodeKind::Float(2.5));
        assert_eq!(print_expr(&t.nodes[2]), &NodeKind::UInt(u64::MAX));
        match print_expr(&t.nodes[3]) {
            NodeKind::List(items) => assert_eq!(items[0].kind, NodeKind::Int(-3)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_details() {
        match parse_err("line one\n[% FOREACH x list %][% END %]") {
            Error::Syntax(e) => {
                assert_eq!(e.template, "test.tt");
                assert_eq!(e.line, 2);
                assert_eq!(e.expected.as_deref(), Some("IN"));
                assert_eq!(e.found, "identifier 'list'");
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_end() {
        match parse_err("[% IF a %]x") {
            Error::Syntax(e) => {
                assert_eq!(e.expected.as_deref(), Some("END"));
                assert_eq!(e.found, "end of input");
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_stray_end() {
        assert!(matches!(parse_err("x[% END %]"), Error::Syntax(_)));
    }

    #[test]
    fn test_lex_error_propagates() {
        match parse_err("Hello World,\n[% name ") {
            Error::Lex(e) => {
                assert_eq!(e.line, 2);
                assert!(e.message.contains("'%]'"));
            }
            other => panic!("expected lex error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(matches!(parse_err("[% 1 = 2 %]"), Error::Syntax(_)));
    }
}

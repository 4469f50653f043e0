use std::fmt::Write;

use crate::token::{Token, TokenKind};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints a nicer value for some tokens
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Token]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Token]) -> String {
        let mut out = String::new();
        for t in tokens {
            self.render_one(&mut out, t);
        }
        out
    }

    fn render_one(&self, out: &mut String, t: &Token) {
        let line = t.span.line;
        let pos = t.span.pos;

        let kind = self.kind(t.kind);
        let colr = if self.color { self.color(t.kind) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let _ = if self.show_debug_repr {
            writeln!(
                out,
                "[{:02}:{:04}] {}{:<8} {:?} {:?}{}",
                line, pos, colr, kind, t.kind, t.value, reset
            )
        } else {
            match t.kind {
                TokenKind::RawText => writeln!(
                    out,
                    "[{:02}:{:04}] {}{:<8} {} bytes{}",
                    line,
                    pos,
                    colr,
                    kind,
                    t.value.len(),
                    reset
                ),
                _ => writeln!(
                    out,
                    "[{:02}:{:04}] {}{:<8} {}{}",
                    line, pos, colr, kind, t, reset
                ),
            }
        };
    }

    fn kind(&self, k: TokenKind) -> &'static str {
        use TokenKind::*;
        match k {
            // stream structure
            RawText => "TEXT",
            TagStart | TagEnd => "TAG",
            Eof => "EOF",
            Error => "ERROR",

            // literals
            Number => "NUMBER",
            String => "STRING",
            True | False => "BOOL",
            Nil => "NIL",

            // names
            Ident => "IDENT",

            // structure
            LParen | RParen | LBracket | RBracket | Comma | Dot | Range | Pipe => "PUNCT",

            // ops / comparisons
            Plus | Minus | Star | Slash | Percent | Tilde | And | Or | Not => "OP",
            Assign | AddAssign | SubAssign | MulAssign | DivAssign => "ASSIGN",
            Eq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",

            // everything else = directive keyword
            _ => "KEYWORD",
        }
    }

    fn color(&self, k: TokenKind) -> &'static str {
        use TokenKind::*;
        match k {
            RawText | Eof => Self::DIM,
            TagStart | TagEnd => Self::BLU,
            String => Self::GRN,
            Number | True | False | Nil => Self::CYN,
            Ident => Self::YEL,
            Plus | Minus | Star | Slash | Percent | Tilde | And | Or | Not => Self::MAG,
            Eq | NotEq | Lt | LtEq | Gt | GtEq => Self::MAG,
            _ => Self::RESET,
        }
    }
}

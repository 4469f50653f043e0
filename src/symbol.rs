use std::sync::Arc;

use crate::token::TokenKind;

/// Default ceiling for `WHILE`/`FOREACH` iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// A keyword or operator recognized inside tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: &'static str,
    pub kind: TokenKind,
    pub priority: f64,
}

/// Ordered keyword/operator table.
///
/// Entries are kept sorted by descending priority; equal priorities keep
/// their insertion order. The table is frozen once built and shared by
/// reference with every lexer.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a symbol whose priority is its length, so longer spellings win
    /// over their prefixes (`INCLUDE` before `IN`, `..` before `.`).
    pub fn add(&mut self, name: &'static str, kind: TokenKind) {
        self.add_with_priority(name, kind, name.len() as f64);
    }

    pub fn add_with_priority(&mut self, name: &'static str, kind: TokenKind, priority: f64) {
        self.symbols.push(Symbol {
            name,
            kind,
            priority,
        });
        // stable: ties keep insertion order
        self.symbols
            .sort_by(|a, b| b.priority.total_cmp(&a.priority));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Finds the highest-priority symbol that `input` starts with.
    ///
    /// Word-like symbols (ending in a letter) only match on a word boundary,
    /// so `IN` never matches the start of `INDEX`.
    pub fn match_at(&self, input: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|sym| {
            if !input.starts_with(sym.name) {
                return false;
            }
            let word_like = sym
                .name
                .chars()
                .last()
                .map(|c| c.is_ascii_alphanumeric() || c == '_')
                .unwrap_or(false);
            if !word_like {
                return true;
            }
            match input[sym.name.len()..].chars().next() {
                Some(c) => !(c.is_alphanumeric() || c == '_'),
                None => true,
            }
        })
    }

    /// Keyword and operator set of the TTerse syntax.
    pub fn tterse() -> Self {
        let mut t = SymbolTable::new();

        t.add("GET", TokenKind::Get);
        t.add("SET", TokenKind::Set);
        t.add("CALL", TokenKind::Call);
        t.add("IF", TokenKind::If);
        t.add("ELSIF", TokenKind::Elsif);
        t.add("ELSE", TokenKind::Else);
        t.add("UNLESS", TokenKind::Unless);
        t.add("FOREACH", TokenKind::Foreach);
        t.add("IN", TokenKind::In);
        t.add("WHILE", TokenKind::While);
        t.add("MACRO", TokenKind::Macro);
        t.add("BLOCK", TokenKind::Block);
        t.add("INCLUDE", TokenKind::Include);
        t.add("WRAPPER", TokenKind::Wrapper);
        t.add("WITH", TokenKind::With);
        t.add("END", TokenKind::End);

        t.add("true", TokenKind::True);
        t.add("false", TokenKind::False);
        t.add("nil", TokenKind::Nil);

        t.add("AND", TokenKind::And);
        t.add("and", TokenKind::And);
        t.add("OR", TokenKind::Or);
        t.add("or", TokenKind::Or);
        t.add("NOT", TokenKind::Not);
        t.add("not", TokenKind::Not);

        t.add("&&", TokenKind::And);
        t.add("||", TokenKind::Or);
        t.add("==", TokenKind::Eq);
        t.add("!=", TokenKind::NotEq);
        t.add("<=", TokenKind::LtEq);
        t.add(">=", TokenKind::GtEq);
        t.add("+=", TokenKind::AddAssign);
        t.add("-=", TokenKind::SubAssign);
        t.add("*=", TokenKind::MulAssign);
        t.add("/=", TokenKind::DivAssign);
        t.add("..", TokenKind::Range);

        t.add("!", TokenKind::Not);
        t.add("<", TokenKind::Lt);
        t.add(">", TokenKind::Gt);
        t.add("=", TokenKind::Assign);
        t.add("+", TokenKind::Plus);
        t.add("-", TokenKind::Minus);
        t.add("*", TokenKind::Star);
        t.add("/", TokenKind::Slash);
        t.add("%", TokenKind::Percent);
        t.add("~", TokenKind::Tilde);
        t.add(".", TokenKind::Dot);
        t.add(",", TokenKind::Comma);
        t.add("|", TokenKind::Pipe);
        t.add("(", TokenKind::LParen);
        t.add(")", TokenKind::RParen);
        t.add("[", TokenKind::LBracket);
        t.add("]", TokenKind::RBracket);

        t
    }
}

/// Surface syntax: tag delimiters, keyword table and loop ceiling.
#[derive(Debug, Clone)]
pub struct Syntax {
    pub tag_start: String,
    pub tag_end: String,
    pub max_iterations: usize,
    pub symbols: Arc<SymbolTable>,
}

impl Syntax {
    /// `[% ... %]` delimiters.
    pub fn tterse() -> Self {
        Syntax {
            tag_start: "[%".to_string(),
            tag_end: "%]".to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            symbols: Arc::new(SymbolTable::tterse()),
        }
    }

    /// Same grammar, different delimiters (e.g. `<:` / `:>`).
    pub fn with_delimiters(mut self, tag_start: &str, tag_end: &str) -> Self {
        self.tag_start = tag_start.to_string();
        self.tag_end = tag_end.to_string();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }
}

impl Default for Syntax {
    fn default() -> Self {
        Syntax::tterse()
    }
}

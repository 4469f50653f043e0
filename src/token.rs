/// Source location of a token: byte offset plus 1-based line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub pos: usize,
    pub line: usize,
}

impl Span {
    pub fn new(pos: usize, line: usize) -> Self {
        Span { pos, line }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Stream structure
    RawText,
    Eof,
    Error,
    TagStart,
    TagEnd,

    // Literals
    Number,
    String,
    True,
    False,
    Nil,

    Ident,

    // Punctuation
    Dot,
    Range,
    Comma,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // Assignment
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,

    // Comparison
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Logic
    And,
    Or,
    Not,

    // Keywords
    Get,
    Set,
    Call,
    If,
    Elsif,
    Else,
    Unless,
    Foreach,
    In,
    While,
    Macro,
    Block,
    Include,
    Wrapper,
    With,
    End,
}

impl TokenKind {
    /// True for tokens that can end an operand. A `+`/`-` following one of
    /// these is an operator, not the sign of a number literal.
    pub fn ends_operand(self) -> bool {
        matches!(
            self,
            TokenKind::Number
                | TokenKind::String
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Nil
                | TokenKind::Ident
                | TokenKind::RParen
                | TokenKind::RBracket
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenKind::RawText => "raw text",
            TokenKind::Eof => "end of input",
            TokenKind::Error => "error",
            TokenKind::TagStart => "tag start",
            TokenKind::TagEnd => "tag end",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Nil => "nil",
            TokenKind::Ident => "identifier",
            TokenKind::Dot => "'.'",
            TokenKind::Range => "'..'",
            TokenKind::Comma => "','",
            TokenKind::Pipe => "'|'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Assign => "'='",
            TokenKind::AddAssign => "'+='",
            TokenKind::SubAssign => "'-='",
            TokenKind::MulAssign => "'*='",
            TokenKind::DivAssign => "'/='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Tilde => "'~'",
            TokenKind::Eq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::LtEq => "'<='",
            TokenKind::GtEq => "'>='",
            TokenKind::And => "'&&'",
            TokenKind::Or => "'||'",
            TokenKind::Not => "'!'",
            TokenKind::Get => "GET",
            TokenKind::Set => "SET",
            TokenKind::Call => "CALL",
            TokenKind::If => "IF",
            TokenKind::Elsif => "ELSIF",
            TokenKind::Else => "ELSE",
            TokenKind::Unless => "UNLESS",
            TokenKind::Foreach => "FOREACH",
            TokenKind::In => "IN",
            TokenKind::While => "WHILE",
            TokenKind::Macro => "MACRO",
            TokenKind::Block => "BLOCK",
            TokenKind::Include => "INCLUDE",
            TokenKind::Wrapper => "WRAPPER",
            TokenKind::With => "WITH",
            TokenKind::End => "END",
        };
        write!(f, "{}", s)
    }
}

/// A single lexed token.
///
/// `value` holds the source text for identifiers, numbers and raw text, the
/// unquoted contents for strings, and the message for `Error` tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub value: String,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, value: impl Into<String>) -> Self {
        Token {
            kind,
            span,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TokenKind::Ident | TokenKind::Number => write!(f, "{} '{}'", self.kind, self.value),
            TokenKind::String => write!(f, "string \"{}\"", self.value),
            TokenKind::RawText => write!(f, "raw text"),
            _ => write!(f, "{}", self.kind),
        }
    }
}

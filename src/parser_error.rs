use crate::token::Token;

/// A parsing error with source location.
///
/// `line` is 1-based and comes from the offending token's span. `expected`
/// is filled in when the parser knew which token it wanted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{template}:{line}: syntax error: {message}")]
pub struct SyntaxError {
    pub template: String,
    pub line: usize,
    pub pos: usize,
    pub expected: Option<String>,
    pub found: String,
    pub message: String,
}

impl SyntaxError {
    /// `expected <what>, found <token>`
    pub fn unexpected(template: &str, found: &Token, expected: impl Into<String>) -> Self {
        let expected = expected.into();
        SyntaxError {
            template: template.to_string(),
            line: found.span.line,
            pos: found.span.pos,
            message: format!("expected {}, found {}", expected, found),
            expected: Some(expected),
            found: found.to_string(),
        }
    }

    /// Error at `at` with a free-form message.
    pub fn at(template: &str, at: &Token, message: impl Into<String>) -> Self {
        SyntaxError {
            template: template.to_string(),
            line: at.span.line,
            pos: at.span.pos,
            expected: None,
            found: at.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("runtime error: {message}{}", format_call_stack(.call_stack))]
pub struct RuntimeError {
    pub message: String,
    /// Innermost context first.
    pub call_stack: Vec<String>,
}

fn format_call_stack(call_stack: &[String]) -> String {
    if call_stack.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n  call stack:");
    for (i, frame) in call_stack.iter().enumerate() {
        out.push_str(&format!("\n    {}: {}", i, frame));
    }
    out
}

impl RuntimeError {
    pub fn new(msg: impl Into<String>) -> Self {
        RuntimeError {
            message: msg.into(),
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.call_stack.push(context.into());
        self
    }
}

pub fn division_by_zero() -> RuntimeError {
    RuntimeError::new("division by zero")
}

pub fn modulo_by_zero() -> RuntimeError {
    RuntimeError::new("modulo by zero")
}

pub fn type_error(expected: &str, got: &str) -> RuntimeError {
    RuntimeError::new(format!("type error: expected {}, got {}", expected, got))
}

pub fn arity_mismatch(kind: &str, name: &str, expected: usize, got: usize) -> RuntimeError {
    RuntimeError::new(format!(
        "{} '{}' expects {} argument{}, got {}",
        kind,
        name,
        expected,
        if expected == 1 { "" } else { "s" },
        got
    ))
}

pub fn stack_underflow(what: &str) -> RuntimeError {
    RuntimeError::new(format!("{} underflow", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_stack() {
        let err = division_by_zero();
        assert_eq!(err.to_string(), "runtime error: division by zero");
    }

    #[test]
    fn test_display_with_stack() {
        let err = RuntimeError::new("boom")
            .with_context("macro 'inner'")
            .with_context("page.tt");
        let msg = err.to_string();
        assert!(msg.contains("call stack:"));
        assert!(msg.contains("0: macro 'inner'"));
        assert!(msg.contains("1: page.tt"));
    }

    #[test]
    fn test_arity_message() {
        let err = arity_mismatch("macro", "greet", 1, 2);
        assert_eq!(err.message, "macro 'greet' expects 1 argument, got 2");
    }
}

use crate::ast::Node;
use crate::bytecode::verify::VerifyError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// A node type that the compiler doesn't know how to handle
    #[error("compile error: cannot compile '{node_type}' node{}", hint_suffix(.hint))]
    UnhandledNode {
        node_type: String,
        hint: Option<String>,
    },
    /// A node that's valid but appeared in an invalid position
    #[error(
        "compile error: {node_type}{}: {reason}{}",
        name_suffix(.name),
        hint_suffix(.hint)
    )]
    InvalidPosition {
        node_type: String,
        name: Option<String>,
        reason: String,
        hint: Option<String>,
    },
    /// Internal compiler error (shouldn't happen in normal use)
    #[error("compile error: internal error: {0}")]
    Internal(String),
    /// Emitted bytecode failed the jump check
    #[error("compile error: {0}")]
    Verify(#[from] VerifyError),
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("\n  hint: {}", h),
        None => String::new(),
    }
}

fn name_suffix(name: &Option<String>) -> String {
    match name {
        Some(n) => format!(" '{}'", n),
        None => String::new(),
    }
}

impl CompileError {
    /// Create an error for an unhandled node type
    pub fn unhandled(node: &Node) -> Self {
        CompileError::UnhandledNode {
            node_type: node.kind_name().to_string(),
            hint: Some("this node cannot be compiled in expression position".to_string()),
        }
    }

    /// Create an error for a macro declared inside another block
    pub fn nested_macro(name: &str) -> Self {
        CompileError::InvalidPosition {
            node_type: "macro".to_string(),
            name: Some(name.to_string()),
            reason: "macros cannot be declared inside another block".to_string(),
            hint: Some("move the MACRO directive to the top level of the template".to_string()),
        }
    }

    /// Create an internal compiler error
    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;
    use crate::token::Span;

    #[test]
    fn test_unhandled_node_display() {
        let node = Node::new(Span::new(0, 1), NodeKind::Text("x".to_string()));
        let err = CompileError::unhandled(&node);

        let msg = err.to_string();
        assert!(msg.contains("cannot compile"));
        assert!(msg.contains("text"));
        assert!(msg.contains("hint"));
    }

    #[test]
    fn test_nested_macro_display() {
        let err = CompileError::nested_macro("inner");

        let msg = err.to_string();
        assert!(msg.contains("macro 'inner'"));
        assert!(msg.contains("inside another block"));
        assert!(msg.contains("top level"));
    }

    #[test]
    fn test_internal_error_display() {
        let err = CompileError::internal("something went wrong");

        let msg = err.to_string();
        assert!(msg.contains("internal"));
        assert!(msg.contains("something went wrong"));
    }
}

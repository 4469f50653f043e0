use crate::bytecode::compile_error::CompileError;
use crate::lexer::LexError;
use crate::loader::LoadError;
use crate::parser_error::SyntaxError;
use crate::runtime::runtime_error::RuntimeError;

/// Top-level error for every stage of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

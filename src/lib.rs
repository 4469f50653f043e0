//! kiln: a TTerse-style template engine.
//!
//! Templates go through a lexer, a parser that resolves local variables to
//! slots, a bytecode compiler, a peephole optimizer and finally a register
//! VM that writes output to any [`std::io::Write`] sink.

pub mod ast;
pub mod bytecode;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod parser_error;
pub mod pool;
pub mod runtime;
pub mod symbol;
pub mod token;

pub use bytecode::ByteCode;
pub use engine::{Engine, EngineConfig, compile_template};
pub use error::{Error, Result};
pub use loader::{
    Cache, CacheStrategy, CachedLoader, FileCache, FileFetcher, LoadError, Loader, MemoryCache,
    MemoryFetcher, TemplateFetcher, TemplateSource,
};
pub use runtime::{FunctionRegistry, Object, Record, Value, Vars, Vm, VmConfig};
pub use symbol::Syntax;

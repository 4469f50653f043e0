use std::io::Write;
use std::sync::Arc;

use log::debug;

use crate::bytecode::compile::Compiler;
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::optimize::optimize;
use crate::bytecode::verify::verify;
use crate::bytecode::ByteCode;
use crate::error::Result;
use crate::loader::{
    Cache, CacheStrategy, CachedLoader, Loader, MemoryCache, MemoryFetcher, TemplateFetcher,
};
use crate::parser::parse_template;
use crate::pool::BufferPool;
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::value::Value;
use crate::runtime::{FunctionRegistry, Vars, Vm, VmConfig};
use crate::symbol::Syntax;

/// Parses, compiles and (optionally) optimizes one template.
pub fn compile_template(
    name: &str,
    source: &str,
    syntax: &Syntax,
    optimize_code: bool,
) -> Result<ByteCode> {
    let template = parse_template(name, source, syntax)?;
    let mut bc = Compiler::new(name).compile(&template)?;
    if optimize_code {
        let fused = optimize(&mut bc);
        verify(&bc).map_err(CompileError::from)?;
        debug!("optimized '{}': {} instructions fused", name, fused);
    }
    Ok(bc)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub syntax: Syntax,
    pub cache_strategy: CacheStrategy,
    pub optimize: bool,
    pub vm: VmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            syntax: Syntax::tterse(),
            cache_strategy: CacheStrategy::Verify,
            optimize: true,
            vm: VmConfig::default(),
        }
    }
}

/// Front door of the crate: compiles and renders templates.
///
/// ```
/// use kiln::{Engine, Value, Vars};
///
/// let engine = Engine::new();
/// let mut vars = Vars::new();
/// vars.insert("name".to_string(), Value::from("world"));
/// let out = engine.render("hello", "Hello, [% name %]!", &vars).unwrap();
/// assert_eq!(out, "Hello, world!");
/// ```
pub struct Engine {
    config: EngineConfig,
    functions: FunctionRegistry,
    loader: CachedLoader,
    pool: BufferPool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let loader = CachedLoader::new(Box::new(MemoryFetcher::new()), Box::new(MemoryCache::new()))
            .with_strategy(config.cache_strategy)
            .with_syntax(config.syntax.clone())
            .with_optimize(config.optimize);
        Self {
            config,
            functions: FunctionRegistry::with_builtins(),
            loader,
            pool: BufferPool::default(),
        }
    }

    /// Where INCLUDE, WRAPPER and [`Engine::render_template`] find sources.
    pub fn with_fetcher(mut self, fetcher: impl TemplateFetcher + 'static) -> Self {
        self.loader.set_fetcher(Box::new(fetcher));
        self
    }

    pub fn with_cache(mut self, cache: impl Cache + 'static) -> Self {
        self.loader.set_cache(Box::new(cache));
        self
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.functions.register(name, f);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn loader(&self) -> &CachedLoader {
        &self.loader
    }

    pub fn compile(&self, name: &str, source: &str) -> Result<ByteCode> {
        compile_template(name, source, &self.config.syntax, self.config.optimize)
    }

    pub fn execute(&self, bc: &ByteCode, vars: &Vars, out: &mut dyn Write) -> Result<()> {
        Vm::new(&self.functions, &self.config.vm)
            .with_loader(&self.loader)
            .run(bc, vars, out)
    }

    /// Compiles `source` and renders it to a string.
    pub fn render(&self, name: &str, source: &str, vars: &Vars) -> Result<String> {
        let bc = self.compile(name, source)?;
        self.render_bytecode(&bc, vars)
    }

    /// Renders a template obtained through the loader.
    pub fn render_template(&self, name: &str, vars: &Vars) -> Result<String> {
        let bc: Arc<ByteCode> = self.loader.load(name)?;
        self.render_bytecode(&bc, vars)
    }

    fn render_bytecode(&self, bc: &ByteCode, vars: &Vars) -> Result<String> {
        let mut buf = self.pool.get();
        let result = self.execute(bc, vars, &mut buf);
        let text = result.map(|()| String::from_utf8_lossy(&buf).into_owned());
        self.pool.put(buf);
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_render_reuses_buffers() {
        let engine = Engine::new();
        let vars = Vars::new();
        assert_eq!(engine.render("a", "first", &vars).unwrap(), "first");
        assert_eq!(engine.render("b", "2nd", &vars).unwrap(), "2nd");
        assert_eq!(engine.pool.pooled(), 1);
    }

    #[test]
    fn test_failed_render_returns_buffer() {
        let engine = Engine::new();
        let err = engine.render("a", "x[% 1 / 0 %]", &Vars::new()).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert_eq!(engine.render("b", "ok", &Vars::new()).unwrap(), "ok");
    }

    #[test]
    fn test_custom_function() {
        let engine = Engine::new().with_function("shout", |args| {
            Ok(Value::from(format!("{}!", args.first().cloned().unwrap_or_default())))
        });
        let out = engine.render("a", "[% shout('hey') %]", &Vars::new()).unwrap();
        assert_eq!(out, "hey!");
    }

    #[test]
    fn test_optimize_flag() {
        let plain = Engine::with_config(EngineConfig {
            optimize: false,
            ..EngineConfig::default()
        });
        let bc = plain.compile("a", "text").unwrap();
        assert!(!bc.ops.iter().any(|op| matches!(op, crate::bytecode::Op::PrintRawConst(_))));

        let bc = Engine::new().compile("a", "text").unwrap();
        assert!(matches!(bc.ops[0], crate::bytecode::Op::PrintRawConst(_)));
    }

    #[test]
    fn test_render_template_through_fetcher() {
        let engine = Engine::new().with_fetcher(MemoryFetcher::new().with("page", "[% 1 + 2 %]"));
        assert_eq!(engine.render_template("page", &Vars::new()).unwrap(), "3");
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::runtime::escape::{html_escape, uri_escape};
use crate::runtime::runtime_error::{RuntimeError, arity_mismatch, type_error};
use crate::runtime::value::{Number, Value};

pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Name -> callable table used for `f(args)`, `expr | filter` and as the last
/// resort for `value.method(args)`.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("upper", |args| {
            let [v] = exact::<1>("upper", args)?;
            Ok(map_text(v, |s| s.to_uppercase()))
        });
        registry.register("lower", |args| {
            let [v] = exact::<1>("lower", args)?;
            Ok(map_text(v, |s| s.to_lowercase()))
        });
        registry.register("trim", |args| {
            let [v] = exact::<1>("trim", args)?;
            Ok(map_text(v, |s| s.trim().to_string()))
        });
        registry.register("length", |args| {
            let [v] = exact::<1>("length", args)?;
            length(v)
        });
        registry.register("reverse", |args| {
            let [v] = exact::<1>("reverse", args)?;
            reverse(v)
        });
        registry.register("join", |args| match args {
            [list] => join(list, ""),
            [list, sep] => join(list, &sep.to_string()),
            _ => Err(arity_mismatch("function", "join", 2, args.len())),
        });
        registry.register("abs", |args| {
            let [v] = exact::<1>("abs", args)?;
            Ok(match v.to_number() {
                Number::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .unwrap_or(Value::UInt(n.unsigned_abs())),
                Number::UInt(n) => Value::UInt(n),
                Number::Float(f) => Value::Float(f.abs()),
            })
        });
        registry.register("default", |args| {
            let [v, fallback] = exact::<2>("default", args)?;
            Ok(if v.is_truthy() { v.clone() } else { fallback.clone() })
        });
        registry.register("html", |args| {
            let [v] = exact::<1>("html", args)?;
            Ok(Value::Raw(html_escape(&v.to_string())))
        });
        registry.register("uri", |args| {
            let [v] = exact::<1>("uri", args)?;
            Ok(Value::Str(uri_escape(&v.to_string())))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        match self.functions.get(name) {
            Some(f) => f(args),
            None => Err(RuntimeError::new(format!("unknown function '{}'", name))),
        }
    }
}

fn exact<'a, const N: usize>(name: &str, args: &'a [Value]) -> Result<&'a [Value; N], RuntimeError> {
    args.try_into()
        .map_err(|_| arity_mismatch("function", name, N, args.len()))
}

/// Applies a string transform, keeping the raw marking of `Raw` input.
fn map_text(v: &Value, f: impl Fn(&str) -> String) -> Value {
    match v {
        Value::Raw(s) => Value::Raw(f(s)),
        other => Value::Str(f(&other.to_string())),
    }
}

fn length(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Str(s) | Value::Raw(s) => Ok(Value::from(s.chars().count())),
        Value::List(items) => Ok(Value::from(items.len())),
        Value::Map(map) => Ok(Value::from(map.len())),
        Value::Nil => Ok(Value::Int(0)),
        other => Err(type_error("string, list or map", other.type_name())),
    }
}

fn reverse(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
        Value::Raw(s) => Ok(Value::Raw(s.chars().rev().collect())),
        Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
        other => Err(type_error("string or list", other.type_name())),
    }
}

fn join(list: &Value, sep: &str) -> Result<Value, RuntimeError> {
    match list {
        Value::List(items) => Ok(Value::Str(
            items
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(sep),
        )),
        other => Err(type_error("list", other.type_name())),
    }
}

/// Methods every string, list and map understands.
/// Returns `None` when `name` is not one of them.
pub fn builtin_method(
    invocant: &Value,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, RuntimeError>> {
    let result = match (invocant, name, args) {
        (Value::Str(_) | Value::Raw(_) | Value::List(_) | Value::Map(_), "length" | "size", []) => {
            length(invocant)
        }

        (Value::Str(_) | Value::Raw(_), "upper", []) => Ok(map_text(invocant, str::to_uppercase)),
        (Value::Str(_) | Value::Raw(_), "lower", []) => Ok(map_text(invocant, str::to_lowercase)),
        (Value::Str(_) | Value::Raw(_), "trim", []) => {
            Ok(map_text(invocant, |s| s.trim().to_string()))
        }
        (Value::Str(s) | Value::Raw(s), "split", [sep]) => Ok(Value::List(
            s.split(sep.to_string().as_str())
                .map(Value::from)
                .collect(),
        )),
        (Value::Str(s) | Value::Raw(s), "contains", [needle]) => {
            Ok(Value::Bool(s.contains(needle.to_string().as_str())))
        }

        (Value::List(items), "first", []) => Ok(items.first().cloned().unwrap_or_default()),
        (Value::List(items), "last", []) => Ok(items.last().cloned().unwrap_or_default()),
        (Value::List(_), "join", []) => join(invocant, ""),
        (Value::List(_), "join", [sep]) => join(invocant, &sep.to_string()),
        (Value::List(_) | Value::Str(_) | Value::Raw(_), "reverse", []) => reverse(invocant),

        (Value::Map(map), "keys", []) => Ok(Value::List(
            map.keys().map(|k| Value::Str(k.clone())).collect(),
        )),
        (Value::Map(map), "values", []) => Ok(Value::List(map.values().cloned().collect())),
        (Value::Map(map), "exists", [key]) => Ok(Value::Bool(map.contains_key(&key.to_string()))),

        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let r = FunctionRegistry::with_builtins();
        assert_eq!(r.call("upper", &[Value::from("abc")]).unwrap(), Value::from("ABC"));
        assert_eq!(r.call("trim", &[Value::from("  x ")]).unwrap(), Value::from("x"));
        assert_eq!(r.call("length", &[Value::from("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(
            r.call("join", &[Value::from(vec![1, 2]), Value::from("-")]).unwrap(),
            Value::from("1-2")
        );
        assert_eq!(r.call("abs", &[Value::Int(-4)]).unwrap(), Value::Int(4));
        assert_eq!(
            r.call("default", &[Value::Nil, Value::from("n/a")]).unwrap(),
            Value::from("n/a")
        );
        assert!(matches!(
            r.call("html", &[Value::from("<")]).unwrap(),
            Value::Raw(s) if s == "&lt;"
        ));
    }

    #[test]
    fn test_arity_and_unknown() {
        let r = FunctionRegistry::with_builtins();
        let err = r.call("upper", &[]).unwrap_err();
        assert!(err.message.contains("expects 1 argument"));
        let err = r.call("nope", &[]).unwrap_err();
        assert!(err.message.contains("unknown function 'nope'"));
    }

    #[test]
    fn test_string_transforms_keep_raw() {
        let r = FunctionRegistry::with_builtins();
        let raw = Value::Raw("&lt;b&gt; ".to_string());
        assert!(matches!(r.call("upper", &[raw.clone()]).unwrap(), Value::Raw(s) if s == "&LT;B&GT; "));
        assert!(matches!(r.call("lower", &[raw.clone()]).unwrap(), Value::Raw(_)));
        assert!(matches!(r.call("trim", &[raw.clone()]).unwrap(), Value::Raw(s) if s == "&lt;b&gt;"));
        assert!(matches!(
            builtin_method(&raw, "upper", &[]).unwrap().unwrap(),
            Value::Raw(_)
        ));
        assert!(matches!(r.call("upper", &[Value::from("x")]).unwrap(), Value::Str(s) if s == "X"));
    }

    #[test]
    fn test_custom_function() {
        let mut r = FunctionRegistry::new();
        r.register("twice", |args| Ok(Value::Int(args[0].to_i64() * 2)));
        assert!(r.contains("twice"));
        assert_eq!(r.call("twice", &[Value::Int(21)]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_builtin_methods() {
        let list = Value::from(vec!["a", "b"]);
        assert_eq!(
            builtin_method(&list, "size", &[]).unwrap().unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            builtin_method(&list, "join", &[Value::from(",")]).unwrap().unwrap(),
            Value::from("a,b")
        );
        assert_eq!(
            builtin_method(&Value::from("a,b"), "split", &[Value::from(",")])
                .unwrap()
                .unwrap(),
            list
        );
        assert!(builtin_method(&Value::Int(1), "size", &[]).is_none());
        assert!(builtin_method(&list, "frobnicate", &[]).is_none());
    }
}

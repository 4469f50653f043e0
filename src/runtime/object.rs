//! Host objects exposed to templates.
//!
//! Anything implementing [`Object`] can be placed in the render variables and
//! accessed with `obj.field` or `obj.method(args)`. Lookups fall back from
//! the exact name to the capitalized name, then to a case-insensitive match
//! over [`Object::field_names`].

use std::collections::BTreeMap;
use std::fmt;

use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::value::Value;

pub trait Object: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    fn get_field(&self, name: &str) -> Option<Value>;

    /// Names used for case-insensitive field lookup.
    fn field_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// `None` when the object has no such method.
    fn call_method(&self, _name: &str, _args: &[Value]) -> Option<Result<Value, RuntimeError>> {
        None
    }
}

fn capitalize(name: &str) -> Option<String> {
    let mut chars = name.chars();
    let first = chars.next()?;
    if first.is_uppercase() {
        return None;
    }
    Some(first.to_uppercase().chain(chars).collect())
}

/// Field lookup with exported-name and case-insensitive fallback.
pub fn lookup_field(object: &dyn Object, name: &str) -> Option<Value> {
    if let Some(value) = object.get_field(name) {
        return Some(value);
    }
    if let Some(value) = capitalize(name).and_then(|n| object.get_field(&n)) {
        return Some(value);
    }
    object
        .field_names()
        .into_iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(name))
        .and_then(|candidate| object.get_field(&candidate))
}

/// Method call with the same fallback as [`lookup_field`], minus the
/// case-insensitive step.
pub fn call_method(
    object: &dyn Object,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, RuntimeError>> {
    object
        .call_method(name, args)
        .or_else(|| capitalize(name).and_then(|n| object.call_method(&n, args)))
}

/// A plain named bag of fields.
#[derive(Debug, Clone, Default)]
pub struct Record {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Record {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }
}

impl Object for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

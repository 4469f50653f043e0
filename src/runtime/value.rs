use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::bytecode::Literal;
use crate::runtime::object::Object;
use crate::runtime::runtime_error::{RuntimeError, division_by_zero, modulo_by_zero};

/// A runtime value.
///
/// `Raw` is a string that has already been escaped (or is trusted) and is
/// printed verbatim by `Print`.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Raw(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Arc<dyn Object>),
}

/// A value coerced for arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::UInt(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    fn as_i128(self) -> Option<i128> {
        match self {
            Number::Int(n) => Some(n as i128),
            Number::UInt(n) => Some(n as i128),
            Number::Float(_) => None,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Int(n) => n == 0,
            Number::UInt(n) => n == 0,
            Number::Float(f) => f == 0.0,
        }
    }
}

impl Value {
    pub fn object(object: impl Object + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) | Value::Raw(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(o) => o.type_name(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::UInt(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) | Value::Raw(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// The text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Raw(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view. Non-numeric values are zero; numeric strings are parsed.
    pub fn to_number(&self) -> Number {
        match self {
            Value::Int(n) => Number::Int(*n),
            Value::UInt(n) => Number::UInt(*n),
            Value::Float(f) => Number::Float(*f),
            Value::Bool(b) => Number::Int(*b as i64),
            Value::Str(s) | Value::Raw(s) => parse_number(s.trim()).unwrap_or(Number::Int(0)),
            _ => Number::Int(0),
        }
    }

    /// Integer view, truncating floats.
    pub fn to_i64(&self) -> i64 {
        match self.to_number() {
            Number::Int(n) => n,
            Number::UInt(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Number::Float(f) => f as i64,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_))
    }

    /// Template equality: numbers compare by value across kinds, strings by
    /// text (raw or not), containers element-wise, objects by identity.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Nil, _) | (_, Value::Nil) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => match (self.as_str(), other.as_str()) {
                (Some(a), Some(b)) => a == b,
                _ if self.is_numeric() || other.is_numeric() => {
                    compare_numbers(self.to_number(), other.to_number()) == Some(Ordering::Equal)
                }
                _ => false,
            },
        }
    }

    /// Ordering for `< > <= >=`: two strings compare lexically, anything
    /// else numerically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self.as_str(), other.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => compare_numbers(self.to_number(), other.to_number()),
        }
    }

    pub fn add(&self, rhs: &Value) -> Value {
        int_or_float(self, rhs, i128::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Value) -> Value {
        int_or_float(self, rhs, i128::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Value) -> Value {
        int_or_float(self, rhs, i128::checked_mul, |a, b| a * b)
    }

    /// Exact integer division stays integral, otherwise the result is a float.
    pub fn div(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = (self.to_number(), rhs.to_number());
        if b.is_zero() {
            return Err(division_by_zero());
        }
        if let (Some(x), Some(y)) = (a.as_i128(), b.as_i128()) {
            if x % y == 0 {
                return Ok(fit_integer(x / y, both_unsigned(a, b)));
            }
        }
        Ok(Value::Float(a.as_f64() / b.as_f64()))
    }

    pub fn rem(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = (self.to_number(), rhs.to_number());
        if b.is_zero() {
            return Err(modulo_by_zero());
        }
        match (a.as_i128(), b.as_i128()) {
            (Some(x), Some(y)) => Ok(fit_integer(x % y, both_unsigned(a, b))),
            _ => Ok(Value::Float(a.as_f64() % b.as_f64())),
        }
    }

    pub fn neg(&self) -> Value {
        match self.to_number() {
            Number::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(n as f64))),
            Number::UInt(n) => fit_integer(-(n as i128), false),
            Number::Float(f) => Value::Float(-f),
        }
    }
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(Number::Int(n));
    }
    if let Ok(n) = s.parse::<u64>() {
        return Some(Number::UInt(n));
    }
    s.parse::<f64>().ok().map(Number::Float)
}

fn compare_numbers(a: Number, b: Number) -> Option<Ordering> {
    match (a.as_i128(), b.as_i128()) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

fn both_unsigned(a: Number, b: Number) -> bool {
    matches!((a, b), (Number::UInt(_), Number::UInt(_)))
}

/// Narrowest integer value holding `n`; floats past the 64-bit range.
fn fit_integer(n: i128, prefer_unsigned: bool) -> Value {
    if prefer_unsigned {
        if let Ok(u) = u64::try_from(n) {
            return Value::UInt(u);
        }
    }
    if let Ok(i) = i64::try_from(n) {
        return Value::Int(i);
    }
    if let Ok(u) = u64::try_from(n) {
        return Value::UInt(u);
    }
    Value::Float(n as f64)
}

fn int_or_float(
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i128, i128) -> Option<i128>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    let (a, b) = (lhs.to_number(), rhs.to_number());
    if let (Some(x), Some(y)) = (a.as_i128(), b.as_i128()) {
        if let Some(result) = int_op(x, y) {
            return fit_integer(result, both_unsigned(a, b));
        }
    }
    Value::Float(float_op(a.as_f64(), b.as_f64()))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::UInt(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) | Value::Raw(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Object(o) => write!(f, "<{}>", o.type_name()),
        }
    }
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Nil => Value::Nil,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::UInt(n) => Value::UInt(*n),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        fit_integer(n as i128, false)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::from(vec![1, 2, 3]).to_string(), "[1, 2, 3]");
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        assert_eq!(Value::Map(map).to_string(), "{a: 1}");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(Vec::new()).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::Float(0.5).is_truthy());
    }

    #[test]
    fn test_add_kinds() {
        assert!(matches!(Value::Int(2).add(&Value::Int(3)), Value::Int(5)));
        assert!(matches!(Value::UInt(2).add(&Value::UInt(3)), Value::UInt(5)));
        assert!(matches!(Value::Int(2).add(&Value::Float(0.5)), Value::Float(f) if f == 2.5));
        assert!(matches!(Value::from("4").add(&Value::Int(1)), Value::Int(5)));
        assert!(matches!(Value::from("abc").add(&Value::Int(1)), Value::Int(1)));
        assert!(matches!(Value::Nil.add(&Value::Nil), Value::Int(0)));
    }

    #[test]
    fn test_signed_unsigned_mix() {
        assert!(matches!(Value::UInt(5).sub(&Value::Int(10)), Value::Int(-5)));
        assert!(matches!(
            Value::UInt(u64::MAX).add(&Value::Int(0)),
            Value::UInt(u64::MAX)
        ));
        assert!(matches!(Value::Int(i64::MAX).add(&Value::Int(1)), Value::UInt(_)));
    }

    #[test]
    fn test_division() {
        assert!(matches!(Value::Int(6).div(&Value::Int(3)), Ok(Value::Int(2))));
        assert!(matches!(Value::Int(7).div(&Value::Int(2)), Ok(Value::Float(f)) if f == 3.5));
        assert!(Value::Int(1).div(&Value::Int(0)).is_err());
        assert!(Value::Float(1.0).div(&Value::Float(0.0)).is_err());
        assert!(matches!(Value::Int(7).rem(&Value::Int(3)), Ok(Value::Int(1))));
        assert!(Value::Int(7).rem(&Value::Int(0)).is_err());
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Int(1), Value::UInt(1));
        assert_eq!(Value::from("a"), Value::Raw("a".to_string()));
        assert_eq!(Value::from("1"), Value::Int(1));
        assert_ne!(Value::Nil, Value::Int(0));
        assert_ne!(Value::from("a"), Value::from("b"));
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(
            Value::from("b").compare(&Value::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::UInt(u64::MAX).compare(&Value::Int(-1)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_neg() {
        assert!(matches!(Value::Int(3).neg(), Value::Int(-3)));
        assert!(matches!(Value::from("2.5").neg(), Value::Float(f) if f == -2.5));
    }
}

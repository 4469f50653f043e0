use crate::runtime::object::Object;
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::value::Value;

/// The `loop` object visible inside a FOREACH body.
///
/// Built on demand from the loop's index and collection slots. Field names
/// are matched after lowercasing and dropping underscores, so `is_first`,
/// `isFirst` and `IsFirst` all resolve.
#[derive(Debug, Clone)]
pub struct LoopVar {
    index: usize,
    size: usize,
    prev: Value,
    next: Value,
}

impl LoopVar {
    pub fn new(index: usize, items: &[Value]) -> Self {
        LoopVar {
            index,
            size: items.len(),
            prev: index
                .checked_sub(1)
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or_default(),
            next: items.get(index + 1).cloned().unwrap_or_default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn count(&self) -> usize {
        self.index + 1
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_index(&self) -> i64 {
        self.size as i64 - 1
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.size
    }
}

const FIELDS: &[&str] = &[
    "index",
    "count",
    "size",
    "max_index",
    "is_first",
    "is_last",
    "peek_prev",
    "peek_next",
];

impl Object for LoopVar {
    fn type_name(&self) -> &str {
        "loop"
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        let key: String = name
            .chars()
            .filter(|c| *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        let value = match key.as_str() {
            "index" => Value::from(self.index()),
            "count" => Value::from(self.count()),
            "size" => Value::from(self.size()),
            "maxindex" | "max" => Value::Int(self.max_index()),
            "isfirst" | "first" => Value::Bool(self.is_first()),
            "islast" | "last" => Value::Bool(self.is_last()),
            "peekprev" | "prev" => self.prev.clone(),
            "peeknext" | "next" => self.next.clone(),
            _ => return None,
        };
        Some(value)
    }

    fn field_names(&self) -> Vec<String> {
        FIELDS.iter().map(|f| f.to_string()).collect()
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value, RuntimeError>> {
        if !args.is_empty() {
            return None;
        }
        self.get_field(name).map(Ok)
    }
}

use crate::bytecode::Op;
use crate::loader::LoadError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByteCode {
    /// Template name, used for diagnostics and as the cache key.
    pub name: String,

    pub generated_at: SystemTime,

    /// Main instruction stream. Always ends with `Op::End`.
    pub ops: Vec<Op>,

    /// Macros declared in this template: name -> compiled body.
    pub macros: BTreeMap<String, MacroCode>,
}

impl ByteCode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generated_at: SystemTime::now(),
            ops: Vec::new(),
            macros: BTreeMap::new(),
        }
    }

    pub fn append(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Encodes with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LoadError> {
        postcard::to_allocvec(self).map_err(|e| LoadError::Encode {
            name: self.name.clone(),
            message: e.to_string(),
        })
    }

    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self, LoadError> {
        postcard::from_bytes(bytes).map_err(|e| LoadError::Decode {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// A compiled macro body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroCode {
    pub params: Vec<String>,
    pub ops: Vec<Op>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Literal;

    #[test]
    fn test_bytes_round_trip() {
        let mut bc = ByteCode::new("page.tt");
        bc.append(Op::Literal(Literal::Str("hi".to_string())));
        bc.append(Op::PrintRaw);
        bc.append(Op::End);
        bc.macros.insert(
            "m".to_string(),
            MacroCode {
                params: vec!["a".to_string()],
                ops: vec![Op::LoadLvar(0), Op::Print, Op::End],
            },
        );

        let bytes = bc.to_bytes().unwrap();
        let back = ByteCode::from_bytes("page.tt", &bytes).unwrap();
        assert_eq!(back, bc);
    }

    #[test]
    fn test_from_garbage_fails() {
        let err = ByteCode::from_bytes("x", &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }));
    }
}

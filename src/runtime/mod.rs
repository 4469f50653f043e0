pub mod escape;
pub mod functions;
pub mod loop_var;
pub mod object;
pub mod runtime_error;
pub mod value;
pub mod vm;

use std::collections::HashMap;

pub use functions::FunctionRegistry;
pub use object::{Object, Record};
pub use value::Value;
pub use vm::{Vm, VmConfig};

/// Variables supplied to a render. Read-only for the VM.
pub type Vars = HashMap<String, Value>;

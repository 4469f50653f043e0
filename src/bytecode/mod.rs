pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod optimize;
pub mod verify;

pub use ir::{ByteCode, MacroCode};
pub use op::{Literal, Op};

use serde::{Deserialize, Serialize};

// =============================================================================
// LITERAL - constant operand carried by an op
// =============================================================================

/// Constant baked into the instruction stream. Kept separate from the
/// runtime `Value` so bytecode stays plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

// =============================================================================
// OP - Bytecode instructions
// =============================================================================
//
// Register convention: `sa` is the accumulator, `sb` the second operand.
// Binary operators compute `sb OP sa` into `sa`.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Noop,
    /// Halts the current op sequence.
    End,

    // registers
    Nil,
    Literal(Literal),
    MoveToSb,
    MoveFromSb,
    /// Pop the operand stack into `sb`.
    PopToSb,
    /// Push `sa` onto the operand stack.
    Push,
    /// Pop the operand stack into `sa`.
    Pop,
    /// Remember the operand stack height for a variadic op.
    PushMark,

    // variables
    FetchSymbol(String),
    FetchField(String),
    /// `sa[sb]`
    FetchArrayElement,
    LoadLvar(usize),
    SaveToLvar(usize),
    /// Build the loop object for the foreach whose item lives in the slot.
    LoopVar(usize),

    // output
    MarkRaw,
    Print,
    PrintRaw,
    PrintRawConst(String),

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Neg,

    // comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    // logic
    /// Short-circuit: if `sa` is falsy, jump, leaving `sa` as the result.
    And(i32),
    /// Short-circuit: if `sa` is truthy, jump, leaving `sa` as the result.
    Or(i32),
    Not,

    // ==========================================================================
    // Jumps: offsets are relative to the jumping instruction.
    // ==========================================================================
    Goto(i32),
    JumpIfFalse(i32),

    // constructors
    /// Collect everything above the mark into a list.
    MakeArray,
    /// Collect key/value pairs above the mark into a map.
    MakeHash,
    /// Inclusive integer range `sb..=sa`.
    Range,

    // calls (arguments above a mark)
    FunCallSymbol(String),
    MethodCall(String),
    MacroCall(String),
    Filter(String),
    HtmlEscape,
    UriEscape,

    // loops
    ForStart(usize),
    ForIter {
        slot: usize,
        max: usize,
        exit: i32,
    },
    /// Increment the counter in `slot`; `sa` becomes whether it is still
    /// within `max`.
    LoopGuard {
        slot: usize,
        max: usize,
    },

    // output capture
    SaveWriter,
    RestoreWriter,

    // templates: name in `sa`, bindings in `sb`
    Include,
    /// Wrapped content is popped from the operand stack.
    Wrapper,
}

impl Op {
    /// Relative jump distance carried by this op, if any.
    pub fn jump_offset(&self) -> Option<i32> {
        match self {
            Op::Goto(offset)
            | Op::JumpIfFalse(offset)
            | Op::And(offset)
            | Op::Or(offset)
            | Op::ForIter { exit: offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub(crate) fn jump_offset_mut(&mut self) -> Option<&mut i32> {
        match self {
            Op::Goto(offset)
            | Op::JumpIfFalse(offset)
            | Op::And(offset)
            | Op::Or(offset)
            | Op::ForIter { exit: offset, .. } => Some(offset),
            _ => None,
        }
    }
}

/// Absolute target of a jump at `ip` with `offset`, if it is not negative.
pub fn jump_target(ip: usize, offset: i32) -> Option<usize> {
    let target = ip as i64 + offset as i64;
    usize::try_from(target).ok()
}

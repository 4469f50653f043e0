use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use log::{debug, warn};

use crate::bytecode::{ByteCode, Op, op::jump_target};
use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::runtime::escape::{html_escape, uri_escape};
use crate::runtime::functions::{FunctionRegistry, builtin_method};
use crate::runtime::loop_var::LoopVar;
use crate::runtime::object;
use crate::runtime::runtime_error::{RuntimeError, arity_mismatch, stack_underflow};
use crate::runtime::value::Value;
use crate::runtime::Vars;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Nesting limit for macro calls and includes.
    pub max_call_depth: usize,
    /// Largest list a `[a..b]` range may build.
    pub max_range_len: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 100,
            max_range_len: 1_000_000,
        }
    }
}

/// One activation: template body, macro call or include.
#[derive(Debug)]
struct Frame {
    /// Index of local slot 0 in the shared slot stack.
    base: usize,
    /// Variables passed with `WITH`, visible to `FetchSymbol`.
    bindings: Option<BTreeMap<String, Value>>,
}

/// Per-run machine state. The bytecode itself is never touched.
struct State<'v> {
    sa: Value,
    sb: Value,
    stack: Vec<Value>,
    marks: Vec<usize>,
    slots: Vec<Value>,
    frames: Vec<Frame>,
    vars: &'v Vars,
    captures: Vec<Vec<u8>>,
    depth: usize,
}

impl<'v> State<'v> {
    fn new(vars: &'v Vars) -> Self {
        State {
            sa: Value::Nil,
            sb: Value::Nil,
            stack: Vec::new(),
            marks: Vec::new(),
            slots: Vec::new(),
            frames: Vec::new(),
            vars,
            captures: Vec::new(),
            depth: 0,
        }
    }

    fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    fn load(&self, slot: usize) -> Value {
        self.slots
            .get(self.base() + slot)
            .cloned()
            .unwrap_or_default()
    }

    fn slot_mut(&mut self, slot: usize) -> &mut Value {
        let index = self.base() + slot;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Value::Nil);
        }
        &mut self.slots[index]
    }

    fn push_frame(&mut self, bindings: Option<BTreeMap<String, Value>>) {
        self.frames.push(Frame {
            base: self.slots.len(),
            bindings,
        });
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.slots.truncate(frame.base);
        }
    }

    fn pop(&mut self) -> std::result::Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| stack_underflow("operand stack"))
    }

    /// Everything pushed since the last mark.
    fn pop_marked(&mut self) -> std::result::Result<Vec<Value>, RuntimeError> {
        let mark = self.marks.pop().ok_or_else(|| stack_underflow("mark stack"))?;
        if mark > self.stack.len() {
            return Err(stack_underflow("operand stack"));
        }
        Ok(self.stack.split_off(mark))
    }

    fn lookup_symbol(&self, name: &str) -> Value {
        self.frames
            .iter()
            .rev()
            .filter_map(|f| f.bindings.as_ref())
            .find_map(|b| b.get(name))
            .or_else(|| self.vars.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn write(&mut self, out: &mut dyn Write, text: &str) -> std::io::Result<()> {
        match self.captures.last_mut() {
            Some(buf) => {
                buf.extend_from_slice(text.as_bytes());
                Ok(())
            }
            None => out.write_all(text.as_bytes()),
        }
    }
}

/// Executes bytecode against a variable environment.
///
/// The VM is stateless between runs; all mutable state lives in a `State`
/// created by [`Vm::run`], so one `Vm` may serve many renders.
pub struct Vm<'a> {
    functions: &'a FunctionRegistry,
    config: &'a VmConfig,
    loader: Option<&'a dyn Loader>,
}

impl<'a> Vm<'a> {
    pub fn new(functions: &'a FunctionRegistry, config: &'a VmConfig) -> Self {
        Vm {
            functions,
            config,
            loader: None,
        }
    }

    /// Loader used by INCLUDE and WRAPPER.
    pub fn with_loader(mut self, loader: &'a dyn Loader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Renders `bc` into `out`. Output written before an error is not
    /// rolled back.
    pub fn run(&self, bc: &ByteCode, vars: &Vars, out: &mut dyn Write) -> Result<()> {
        let mut state = State::new(vars);
        state.push_frame(None);
        self.exec(bc, &bc.ops, &mut state, out)
            .map_err(|e| add_context(e, &bc.name))?;
        state.pop_frame();
        Ok(())
    }

    fn enter(&self, state: &mut State, what: &str) -> std::result::Result<(), RuntimeError> {
        state.depth += 1;
        if state.depth > self.config.max_call_depth {
            return Err(RuntimeError::new(format!(
                "call depth limit exceeded ({}) - possible infinite recursion in {}",
                self.config.max_call_depth, what
            )));
        }
        Ok(())
    }

    fn exec(
        &self,
        bc: &ByteCode,
        ops: &[Op],
        st: &mut State,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut ip: usize = 0;

        loop {
            let op = ops
                .get(ip)
                .ok_or_else(|| RuntimeError::new(format!("instruction pointer {} out of range", ip)))?;
            let mut next = ip + 1;

            match op {
                Op::Noop => {}
                Op::End => return Ok(()),

                // Registers
                Op::Nil => st.sa = Value::Nil,
                Op::Literal(lit) => st.sa = Value::from(lit),
                Op::MoveToSb => st.sb = std::mem::take(&mut st.sa),
                Op::MoveFromSb => st.sa = std::mem::take(&mut st.sb),
                Op::PopToSb => st.sb = st.pop()?,
                Op::Push => {
                    let v = std::mem::take(&mut st.sa);
                    st.stack.push(v);
                }
                Op::Pop => st.sa = st.pop()?,
                Op::PushMark => st.marks.push(st.stack.len()),

                // Variables
                Op::FetchSymbol(name) => st.sa = st.lookup_symbol(name),
                Op::FetchField(name) => {
                    let container = std::mem::take(&mut st.sa);
                    st.sa = fetch_field(&container, name)?;
                }
                Op::FetchArrayElement => {
                    let container = std::mem::take(&mut st.sa);
                    st.sa = fetch_element(&container, &st.sb);
                }
                Op::LoadLvar(slot) => st.sa = st.load(*slot),
                Op::SaveToLvar(slot) => {
                    let v = st.sa.clone();
                    *st.slot_mut(*slot) = v;
                }
                Op::LoopVar(slot) => {
                    let index = usize::try_from(st.load(slot + 1).to_i64()).unwrap_or(0);
                    let loop_var = match st.slots.get(st.base() + slot + 2) {
                        Some(Value::List(items)) => LoopVar::new(index, items),
                        _ => LoopVar::new(index, &[]),
                    };
                    st.sa = Value::object(loop_var);
                }

                // Output
                Op::MarkRaw => {
                    st.sa = match std::mem::take(&mut st.sa) {
                        Value::Nil => Value::Nil,
                        Value::Str(s) => Value::Raw(s),
                        other => Value::Raw(other.to_string()),
                    };
                }
                Op::Print => match &st.sa {
                    Value::Nil => warn!("{}: printing nil value", bc.name),
                    Value::Raw(s) => {
                        let s = s.clone();
                        st.write(out, &s)?;
                    }
                    other => {
                        let s = html_escape(&other.to_string());
                        st.write(out, &s)?;
                    }
                },
                Op::PrintRaw => {
                    let s = st.sa.to_string();
                    st.write(out, &s)?;
                }
                Op::PrintRawConst(text) => st.write(out, text)?,

                // Arithmetic: sb OP sa
                Op::Add => st.sa = st.sb.add(&st.sa),
                Op::Sub => st.sa = st.sb.sub(&st.sa),
                Op::Mul => st.sa = st.sb.mul(&st.sa),
                Op::Div => st.sa = st.sb.div(&st.sa)?,
                Op::Mod => st.sa = st.sb.rem(&st.sa)?,
                Op::Concat => st.sa = Value::Str(format!("{}{}", st.sb, st.sa)),
                Op::Neg => st.sa = st.sa.neg(),

                // Comparison
                Op::Eq => st.sa = Value::Bool(st.sb.loose_eq(&st.sa)),
                Op::Ne => st.sa = Value::Bool(!st.sb.loose_eq(&st.sa)),
                Op::Lt => st.sa = Value::Bool(st.sb.compare(&st.sa).is_some_and(|o| o.is_lt())),
                Op::Gt => st.sa = Value::Bool(st.sb.compare(&st.sa).is_some_and(|o| o.is_gt())),
                Op::Le => st.sa = Value::Bool(st.sb.compare(&st.sa).is_some_and(|o| o.is_le())),
                Op::Ge => st.sa = Value::Bool(st.sb.compare(&st.sa).is_some_and(|o| o.is_ge())),

                // Logic
                Op::And(offset) => {
                    if !st.sa.is_truthy() {
                        next = jump(ip, *offset, ops.len())?;
                    }
                }
                Op::Or(offset) => {
                    if st.sa.is_truthy() {
                        next = jump(ip, *offset, ops.len())?;
                    }
                }
                Op::Not => st.sa = Value::Bool(!st.sa.is_truthy()),

                // Control flow
                Op::Goto(offset) => next = jump(ip, *offset, ops.len())?,
                Op::JumpIfFalse(offset) => {
                    if !st.sa.is_truthy() {
                        next = jump(ip, *offset, ops.len())?;
                    }
                }

                // Constructors
                Op::MakeArray => st.sa = Value::List(st.pop_marked()?),
                Op::MakeHash => {
                    let items = st.pop_marked()?;
                    let mut map = BTreeMap::new();
                    let mut pairs = items.into_iter();
                    while let Some(key) = pairs.next() {
                        let value = pairs.next().unwrap_or_default();
                        map.insert(key.to_string(), value);
                    }
                    st.sa = Value::Map(map);
                }
                Op::Range => {
                    let (start, end) = (st.sb.to_i64(), st.sa.to_i64());
                    st.sa = self.range(start, end)?;
                }

                // Calls
                Op::FunCallSymbol(name) => {
                    let args = st.pop_marked()?;
                    st.sa = self.functions.call(name, &args)?;
                }
                Op::MethodCall(name) => {
                    let mut args = st.pop_marked()?;
                    if args.is_empty() {
                        return Err(stack_underflow("method invocant").into());
                    }
                    let invocant = args.remove(0);
                    st.sa = self.call_method(&invocant, name, &args)?;
                }
                Op::MacroCall(name) => {
                    let args = st.pop_marked()?;
                    st.sa = self.call_macro(bc, name, args, st, out)?;
                }
                Op::Filter(name) => {
                    let v = std::mem::take(&mut st.sa);
                    st.sa = self.functions.call(name, &[v])?;
                }
                Op::HtmlEscape => st.sa = Value::Raw(html_escape(&st.sa.to_string())),
                Op::UriEscape => st.sa = Value::Str(uri_escape(&st.sa.to_string())),

                // Loops
                Op::ForStart(slot) => {
                    let items = match std::mem::take(&mut st.sa) {
                        Value::List(items) => items,
                        _ => Vec::new(),
                    };
                    *st.slot_mut(*slot) = Value::Nil;
                    *st.slot_mut(slot + 1) = Value::Int(-1);
                    *st.slot_mut(slot + 2) = Value::List(items);
                }
                Op::ForIter { slot, max, exit } => {
                    let index = st.load(slot + 1).to_i64() + 1;
                    let position = usize::try_from(index).unwrap_or(0);
                    let item = match st.slots.get(st.base() + slot + 2) {
                        Some(Value::List(items)) => items.get(position).cloned(),
                        _ => None,
                    };
                    match item {
                        Some(_) if position >= *max => {
                            warn!(
                                "{}: FOREACH stopped after {} iterations",
                                bc.name, max
                            );
                            next = jump(ip, *exit, ops.len())?;
                        }
                        Some(item) => {
                            *st.slot_mut(*slot) = item;
                            *st.slot_mut(slot + 1) = Value::Int(index);
                        }
                        None => next = jump(ip, *exit, ops.len())?,
                    }
                }
                Op::LoopGuard { slot, max } => {
                    let count = st.load(*slot).to_i64() + 1;
                    *st.slot_mut(*slot) = Value::Int(count);
                    let within = usize::try_from(count).is_ok_and(|c| c <= *max);
                    if !within {
                        warn!("{}: WHILE stopped after {} iterations", bc.name, max);
                    }
                    st.sa = Value::Bool(within);
                }

                // Output capture
                Op::SaveWriter => st.captures.push(Vec::new()),
                Op::RestoreWriter => {
                    let buf = st
                        .captures
                        .pop()
                        .ok_or_else(|| stack_underflow("capture stack"))?;
                    st.sa = Value::Raw(String::from_utf8_lossy(&buf).into_owned());
                }

                // Templates
                Op::Include => {
                    let name = st.sa.to_string();
                    let bindings = into_bindings(std::mem::take(&mut st.sb));
                    self.include(&name, bindings, st, out)?;
                    st.sa = Value::Nil;
                }
                Op::Wrapper => {
                    let content = st.pop()?;
                    let name = st.sa.to_string();
                    let mut bindings = into_bindings(std::mem::take(&mut st.sb)).unwrap_or_default();
                    bindings.insert("content".to_string(), content);
                    self.include(&name, Some(bindings), st, out)?;
                    st.sa = Value::Nil;
                }
            }

            ip = next;
        }
    }

    fn range(&self, start: i64, end: i64) -> std::result::Result<Value, RuntimeError> {
        let len = if end < start {
            0
        } else {
            (i128::from(end) - i128::from(start)) as u128 + 1
        };
        let limit = self.config.max_range_len;
        if len > limit as u128 {
            return Err(RuntimeError::new(format!(
                "range [{}..{}] has {} elements, limit is {}",
                start, end, len, limit
            )));
        }
        Ok(Value::List((start..=end).map(Value::Int).collect()))
    }

    fn call_method(
        &self,
        invocant: &Value,
        name: &str,
        args: &[Value],
    ) -> std::result::Result<Value, RuntimeError> {
        if let Some(result) = builtin_method(invocant, name, args) {
            return result;
        }
        if let Value::Object(obj) = invocant {
            if let Some(result) = object::call_method(obj.as_ref(), name, args) {
                return result;
            }
        }
        if self.functions.contains(name) {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(invocant.clone());
            full.extend_from_slice(args);
            return self.functions.call(name, &full);
        }
        Err(RuntimeError::new(format!(
            "{} has no method '{}'",
            invocant.type_name(),
            name
        )))
    }

    fn call_macro(
        &self,
        bc: &ByteCode,
        name: &str,
        args: Vec<Value>,
        st: &mut State,
        out: &mut dyn Write,
    ) -> Result<Value> {
        let code = bc
            .macros
            .get(name)
            .ok_or_else(|| RuntimeError::new(format!("undefined macro '{}'", name)))?;
        if code.params.len() != args.len() {
            return Err(arity_mismatch("macro", name, code.params.len(), args.len()).into());
        }

        debug!("{}: calling macro '{}'", bc.name, name);
        self.enter(st, &format!("macro '{}'", name))?;
        st.push_frame(None);
        for (slot, arg) in args.into_iter().enumerate() {
            *st.slot_mut(slot) = arg;
        }
        st.captures.push(Vec::new());

        let result = self.exec(bc, &code.ops, st, out);

        let captured = st.captures.pop().unwrap_or_default();
        st.pop_frame();
        st.depth -= 1;

        result.map_err(|e| add_context(e, &format!("macro '{}'", name)))?;
        Ok(Value::Raw(String::from_utf8_lossy(&captured).into_owned()))
    }

    fn include(
        &self,
        name: &str,
        bindings: Option<BTreeMap<String, Value>>,
        st: &mut State,
        out: &mut dyn Write,
    ) -> Result<()> {
        let loader = self.loader.ok_or_else(|| {
            RuntimeError::new(format!("cannot include '{}': no template loader configured", name))
        })?;
        let bc: Arc<ByteCode> = loader.load(name)?;

        debug!("including '{}'", name);
        self.enter(st, &format!("include '{}'", name))?;
        st.push_frame(bindings);

        let result = self.exec(&bc, &bc.ops, st, out);

        st.pop_frame();
        st.depth -= 1;

        result.map_err(|e| add_context(e, name))
    }
}

fn add_context(err: Error, context: &str) -> Error {
    match err {
        Error::Runtime(e) => Error::Runtime(e.with_context(context)),
        other => other,
    }
}

fn jump(ip: usize, offset: i32, len: usize) -> std::result::Result<usize, RuntimeError> {
    jump_target(ip, offset)
        .filter(|target| *target < len)
        .ok_or_else(|| RuntimeError::new(format!("jump from {} by {:+} leaves the code", ip, offset)))
}

fn into_bindings(value: Value) -> Option<BTreeMap<String, Value>> {
    match value {
        Value::Map(map) => Some(map),
        _ => None,
    }
}

fn fetch_field(container: &Value, name: &str) -> std::result::Result<Value, RuntimeError> {
    match container {
        Value::Nil => Ok(Value::Nil),
        Value::Map(map) => Ok(map.get(name).cloned().unwrap_or_default()),
        Value::Object(obj) => Ok(object::lookup_field(obj.as_ref(), name).unwrap_or_default()),
        other => match builtin_method(other, name, &[]) {
            Some(result) => result,
            None => Ok(Value::Nil),
        },
    }
}

fn fetch_element(container: &Value, index: &Value) -> Value {
    match container {
        Value::List(items) => {
            let i = index.to_i64();
            let position = if i < 0 { items.len() as i64 + i } else { i };
            usize::try_from(position)
                .ok()
                .and_then(|p| items.get(p))
                .cloned()
                .unwrap_or_default()
        }
        Value::Map(map) => map.get(&index.to_string()).cloned().unwrap_or_default(),
        Value::Object(obj) => object::lookup_field(obj.as_ref(), &index.to_string()).unwrap_or_default(),
        _ => Value::Nil,
    }
}

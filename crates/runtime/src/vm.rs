//! The bytecode interpreter (§4.5).
//!
//! Grounded on the retrieved stack-machine VM examples' "flat `Vec<Instruction>`
//! addressed by `ip`, dispatch in one big `match`" shape, generalized to
//! Limit's richer opcode set (structural pattern matching, error unions,
//! `attempt`/`handle`, and `parallel`/`concurrent` dispatch). Function calls
//! recurse through [`Vm::execute`] on the Rust call stack rather than
//! maintaining an explicit frame stack of our own -- the simplest faithful
//! rendering of "one call, one fresh locals/operand-stack pair", at the cost
//! of deep Limit recursion consuming Rust stack space 1:1.

use crate::error::RuntimeError;
use limit_compiler::bytecode::{Chunk, Constant, FunctionProto, Instruction, OnErrorPolicy, OpCode, PatternTest};
use limit_core::source::SourceLocation;
use limit_core::types::{ClassType, FieldType, Type};
use limit_core::value::{ChannelHandle, ErrorValue, FieldSlot, FunctionHandle, Instance, IteratorKind, RangeValue, Value, ValueKey};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// An active `attempt`'s handler chain: where to resume on error, and how
/// far to unwind the operand stack first. Scoped to the frame that pushed
/// it; never visible across a `Call`.
struct TryRegion {
    handler_ip: usize,
    stack_depth: usize,
}

pub struct Vm {
    chunk: Rc<Chunk>,
    globals: Vec<Value>,
    class_by_name: HashMap<String, usize>,
}

fn loc() -> SourceLocation {
    // Instructions don't carry a full source span yet (only a `line`,
    // itself not wired up end to end by the compiler), so runtime errors
    // report a synthetic location until that's threaded through.
    SourceLocation::synthetic()
}

impl Vm {
    pub fn new(chunk: Rc<Chunk>) -> Self {
        let mut name_to_slot: HashMap<&str, usize> = HashMap::new();
        for (i, name) in chunk.global_names.iter().enumerate() {
            name_to_slot.insert(name.as_str(), i);
        }

        let mut globals = vec![Value::Nil; chunk.global_names.len()];
        for (i, f) in chunk.functions.iter().enumerate() {
            if f.is_method {
                continue;
            }
            if let Some(&slot) = name_to_slot.get(f.name.as_str()) {
                globals[slot] = Value::Function(Rc::new(FunctionHandle {
                    function_index: i,
                    name: Rc::from(f.name.as_str()),
                    captures: Vec::new(),
                }));
            }
        }
        let mut class_by_name = HashMap::new();
        for (i, class) in chunk.classes.iter().enumerate() {
            class_by_name.insert(class.name.clone(), i);
            if let Some(&slot) = name_to_slot.get(class.name.as_str()) {
                globals[slot] = Value::Function(Rc::new(FunctionHandle {
                    function_index: class.constructor,
                    name: Rc::from(class.name.as_str()),
                    captures: Vec::new(),
                }));
            }
        }

        Vm { chunk, globals, class_by_name }
    }

    /// Runs the program's entry function (the synthetic top-level script
    /// body) to completion.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let entry = self.chunk.entry;
        let result = self.call_function(entry, Vec::new())?;
        if let Value::Error(e) = result {
            return Err(RuntimeError::Unhandled((*e).clone()));
        }
        Ok(result)
    }

    /// Calls a function already resolved to an index (used directly by the
    /// task scheduler for `parallel`/`concurrent` thunks, which always take
    /// zero arguments).
    pub fn call_function(&mut self, function_index: usize, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let chunk = Rc::clone(&self.chunk);
        let proto = &chunk.functions[function_index];
        let mut locals = vec![Value::Nil; proto.local_count];
        for (i, arg) in args.into_iter().enumerate() {
            if i < proto.local_count {
                locals[i] = arg;
            }
        }
        let temp_count = proto.temp_count;
        self.execute(&proto.code, locals, temp_count)
    }

    fn jump_target(ip: usize, offset: isize) -> usize {
        (ip as isize + 1 + offset) as usize
    }

    fn class_type_for(&self, proto_name: &str) -> Rc<ClassType> {
        let idx = self.class_by_name[proto_name];
        let proto = &self.chunk.classes[idx];
        Rc::new(ClassType {
            name: proto.name.clone(),
            fields: proto
                .field_names
                .iter()
                .map(|n| FieldType { name: n.clone(), ty: Type::Any })
                .collect(),
            // Method *types* aren't needed at runtime -- dispatch goes
            // through `ClassProto::methods` (function indices), not
            // through this type descriptor.
            methods: Vec::new(),
        })
    }

    /// Runs `code` to completion: a `Return`/`ReturnNil` returns directly;
    /// falling off the end returns whatever is left on the operand stack
    /// (used for parameter-default snippets, which are bare expressions
    /// with no trailing `Return`).
    fn execute(&mut self, code: &[Instruction], mut locals: Vec<Value>, temp_count: usize) -> Result<Value, RuntimeError> {
        let chunk = Rc::clone(&self.chunk);
        let mut stack: Vec<Value> = Vec::new();
        let mut temps: Vec<Value> = vec![Value::Nil; temp_count];
        let mut try_regions: Vec<TryRegion> = Vec::new();
        let mut ip: usize = 0;

        loop {
            if ip >= code.len() {
                return Ok(stack.pop().unwrap_or(Value::Nil));
            }
            let op = &code[ip].op;
            match op {
                OpCode::LoadConstInt(v) => {
                    stack.push(Value::Int(*v));
                    ip += 1;
                }
                OpCode::LoadConstFloat(v) => {
                    stack.push(Value::Float(*v));
                    ip += 1;
                }
                OpCode::LoadConstStr(idx) => {
                    stack.push(Value::Str(chunk.constants.strings[*idx].clone()));
                    ip += 1;
                }
                OpCode::LoadConstBool(v) => {
                    stack.push(Value::Bool(*v));
                    ip += 1;
                }
                OpCode::LoadConstNil => {
                    stack.push(Value::Nil);
                    ip += 1;
                }
                OpCode::LoadLocal(slot) => {
                    stack.push(locals[*slot].clone());
                    ip += 1;
                }
                OpCode::StoreLocal(slot) => {
                    let v = pop(&mut stack)?;
                    locals[*slot] = v;
                    ip += 1;
                }
                OpCode::LoadGlobal(idx) => {
                    stack.push(self.globals[*idx].clone());
                    ip += 1;
                }
                OpCode::StoreGlobal(idx) => {
                    let v = pop(&mut stack)?;
                    self.globals[*idx] = v;
                    ip += 1;
                }
                OpCode::LoadField(idx) => {
                    let base = pop(&mut stack)?;
                    let name = &chunk.constants.strings[*idx];
                    let value = read_field(&base, name)?;
                    stack.push(value);
                    ip += 1;
                }
                OpCode::StoreField(idx) => {
                    let base = pop(&mut stack)?;
                    let value = pop(&mut stack)?;
                    let name = &chunk.constants.strings[*idx];
                    write_field(&base, name, value)?;
                    ip += 1;
                }
                OpCode::Pop => {
                    pop(&mut stack)?;
                    ip += 1;
                }
                OpCode::Dup => {
                    let v = stack.last().ok_or(RuntimeError::StackUnderflow)?.clone();
                    stack.push(v);
                    ip += 1;
                }
                OpCode::Neg => {
                    let v = pop(&mut stack)?;
                    stack.push(match v {
                        Value::Int(n) => Value::Int(-n),
                        Value::Float(n) => Value::Float(-n),
                        other => return Err(RuntimeError::TypeConversion { from: other.type_tag(), to: "Int/Float", location: loc() }),
                    });
                    ip += 1;
                }
                OpCode::Not => {
                    let v = pop(&mut stack)?;
                    stack.push(Value::Bool(!v.is_truthy()));
                    ip += 1;
                }
                OpCode::Add => {
                    binop(&mut stack, add)?;
                    ip += 1;
                }
                OpCode::Sub => {
                    binop(&mut stack, sub)?;
                    ip += 1;
                }
                OpCode::Mul => {
                    binop(&mut stack, mul)?;
                    ip += 1;
                }
                OpCode::Div => {
                    binop(&mut stack, div)?;
                    ip += 1;
                }
                OpCode::Mod => {
                    binop(&mut stack, rem)?;
                    ip += 1;
                }
                OpCode::Pow => {
                    binop(&mut stack, pow)?;
                    ip += 1;
                }
                OpCode::ConcatStr => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Str(Rc::from(format!("{a}{b}"))));
                    ip += 1;
                }
                OpCode::Eq => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(a == b));
                    ip += 1;
                }
                OpCode::NotEq => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(a != b));
                    ip += 1;
                }
                OpCode::Lt => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(compare(&a, &b)? == std::cmp::Ordering::Less));
                    ip += 1;
                }
                OpCode::LtEq => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(compare(&a, &b)? != std::cmp::Ordering::Greater));
                    ip += 1;
                }
                OpCode::Gt => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(compare(&a, &b)? == std::cmp::Ordering::Greater));
                    ip += 1;
                }
                OpCode::GtEq => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(compare(&a, &b)? != std::cmp::Ordering::Less));
                    ip += 1;
                }
                OpCode::Jump(offset) => {
                    ip = Self::jump_target(ip, *offset);
                }
                OpCode::JumpIfFalse(offset) => {
                    let v = pop(&mut stack)?;
                    if v.is_truthy() {
                        ip += 1;
                    } else {
                        ip = Self::jump_target(ip, *offset);
                    }
                }
                OpCode::JumpIfTrue(offset) => {
                    let v = pop(&mut stack)?;
                    if v.is_truthy() {
                        ip = Self::jump_target(ip, *offset);
                    } else {
                        ip += 1;
                    }
                }
                OpCode::Call { arg_count, omitted } => {
                    let mut args: Vec<Value> = (0..*arg_count).map(|_| pop(&mut stack)).collect::<Result<_, _>>()?;
                    args.reverse();
                    let callee = pop(&mut stack)?;
                    let result = self.invoke(callee, args, omitted)?;
                    stack.push(result);
                    ip += 1;
                }
                OpCode::CallMethod { name, arg_count } => {
                    let mut args: Vec<Value> = (0..*arg_count).map(|_| pop(&mut stack)).collect::<Result<_, _>>()?;
                    args.reverse();
                    let receiver = pop(&mut stack)?;
                    let method_name = chunk.constants.strings[*name].clone();
                    let result = self.invoke_method(receiver, &method_name, args)?;
                    stack.push(result);
                    ip += 1;
                }
                OpCode::Return => {
                    return Ok(pop(&mut stack)?);
                }
                OpCode::ReturnNil => {
                    return Ok(Value::Nil);
                }
                OpCode::CreateList(n) => {
                    let mut items: Vec<Value> = (0..*n).map(|_| pop(&mut stack)).collect::<Result<_, _>>()?;
                    items.reverse();
                    stack.push(Value::list(items));
                    ip += 1;
                }
                OpCode::CreateDict(n) => {
                    let mut entries = Vec::with_capacity(*n);
                    for _ in 0..*n {
                        let v = pop(&mut stack)?;
                        let k = pop(&mut stack)?;
                        entries.push((k, v));
                    }
                    entries.reverse();
                    stack.push(Value::dict(entries));
                    ip += 1;
                }
                OpCode::CreateRecord(indices) => {
                    let mut values: Vec<Value> = (0..indices.len()).map(|_| pop(&mut stack)).collect::<Result<_, _>>()?;
                    values.reverse();
                    let entries = indices
                        .iter()
                        .zip(values)
                        .map(|(idx, v)| (Value::Str(chunk.constants.strings[*idx].clone()), v))
                        .collect();
                    stack.push(Value::dict(entries));
                    ip += 1;
                }
                OpCode::MakeRange(inclusive) => {
                    let end = pop(&mut stack)?;
                    let start = pop(&mut stack)?;
                    let (s, e) = match (start, end) {
                        (Value::Int(s), Value::Int(e)) => (s, e),
                        (a, b) => return Err(RuntimeError::TypeConversion { from: a.type_tag(), to: b.type_tag(), location: loc() }),
                    };
                    stack.push(Value::Range(RangeValue { start: s, end: e, step: 1, inclusive: *inclusive }));
                    ip += 1;
                }
                OpCode::Index => {
                    let index = pop(&mut stack)?;
                    let base = pop(&mut stack)?;
                    stack.push(read_index(&base, &index)?);
                    ip += 1;
                }
                OpCode::SetIndex => {
                    let index = pop(&mut stack)?;
                    let base = pop(&mut stack)?;
                    let value = pop(&mut stack)?;
                    write_index(&base, &index, value)?;
                    ip += 1;
                }
                OpCode::Print(n) => {
                    let mut parts: Vec<Value> = (0..*n).map(|_| pop(&mut stack)).collect::<Result<_, _>>()?;
                    parts.reverse();
                    let line: Vec<String> = parts.iter().map(|v| v.to_string()).collect();
                    println!("{}", line.join(" "));
                    ip += 1;
                }
                OpCode::MakeInstance(class_idx) => {
                    let proto = &chunk.classes[*class_idx];
                    let mut values: Vec<Value> = (0..proto.field_names.len()).map(|_| pop(&mut stack)).collect::<Result<_, _>>()?;
                    values.reverse();
                    let class = self.class_type_for(&proto.name);
                    let fields = proto
                        .field_names
                        .iter()
                        .zip(values)
                        .map(|(name, value)| FieldSlot { name: Rc::from(name.as_str()), value })
                        .collect();
                    stack.push(Value::Instance(Rc::new(RefCell::new(Instance { class, fields }))));
                    ip += 1;
                }
                OpCode::IteratorNew(temp) => {
                    let v = pop(&mut stack)?;
                    let kind = match v {
                        Value::List(items) => IteratorKind::List { items, index: 0 },
                        Value::Dict(map) => IteratorKind::DictEntries { entries: map.borrow().values().cloned().collect(), index: 0 },
                        Value::Range(r) => IteratorKind::Range { current: r.start, end: r.end, step: r.step, inclusive: r.inclusive },
                        Value::Channel(ch) => IteratorKind::Channel(ch),
                        other => return Err(RuntimeError::TypeConversion { from: other.type_tag(), to: "Iterator", location: loc() }),
                    };
                    temps[*temp] = Value::Iterator(Rc::new(RefCell::new(kind)));
                    ip += 1;
                }
                OpCode::IteratorHasNext(temp) => {
                    let has_next = iterator_has_next(&temps[*temp])?;
                    stack.push(Value::Bool(has_next));
                    ip += 1;
                }
                OpCode::IteratorNext(temp) => {
                    let v = iterator_next(&temps[*temp])?;
                    stack.push(v);
                    ip += 1;
                }
                OpCode::IteratorNextKeyValue(temp) => {
                    let (k, v) = iterator_next_key_value(&temps[*temp])?;
                    stack.push(k);
                    stack.push(v);
                    ip += 1;
                }
                OpCode::ClearTemp(temp) => {
                    temps[*temp] = Value::Nil;
                    ip += 1;
                }
                OpCode::TryUnwrap => {
                    let value = pop(&mut stack)?;
                    if value.is_error() {
                        if let Some(region) = try_regions.pop() {
                            stack.truncate(region.stack_depth);
                            stack.push(value);
                            ip = region.handler_ip;
                        } else {
                            return Ok(value);
                        }
                    } else {
                        stack.push(value);
                        ip += 1;
                    }
                }
                OpCode::TryOrHandle { err_local, handler_offset } => {
                    let value = pop(&mut stack)?;
                    if value.is_error() {
                        locals[*err_local] = value;
                        ip = Self::jump_target(ip, *handler_offset);
                    } else {
                        stack.push(value);
                        ip += 1;
                    }
                }
                OpCode::BeginTry { handler_offset } => {
                    try_regions.push(TryRegion {
                        handler_ip: Self::jump_target(ip, *handler_offset),
                        stack_depth: stack.len(),
                    });
                    ip += 1;
                }
                OpCode::EndTry { skip_handlers } => {
                    try_regions.pop();
                    ip = Self::jump_target(ip, *skip_handlers);
                }
                OpCode::EndHandler => {
                    // Unreachable in compiled code: the no-match path in
                    // `compile_attempt` returns before reaching here. Kept
                    // as a harmless landing pad, not a real instruction.
                    ip += 1;
                }
                OpCode::MatchPattern(test) => {
                    let subject = pop(&mut stack)?;
                    let matched = pattern_matches(&subject, test, &mut locals);
                    stack.push(Value::Bool(matched));
                    ip += 1;
                }
                OpCode::MakeError { kind, arg_count } => {
                    let mut args: Vec<Value> = (0..*arg_count).map(|_| pop(&mut stack)).collect::<Result<_, _>>()?;
                    args.reverse();
                    let kind_name = chunk.constants.strings[*kind].to_string();
                    let message = args.first().map(|v| v.to_string()).unwrap_or_default();
                    stack.push(Value::error(ErrorValue { kind: kind_name, message, args, location: loc() }));
                    ip += 1;
                }
                OpCode::TestErrorKind(kind) => {
                    let matched = match stack.last() {
                        Some(Value::Error(e)) => {
                            let want = &chunk.constants.strings[*kind];
                            want.is_empty() || want.as_ref() == e.kind.as_str()
                        }
                        _ => false,
                    };
                    stack.push(Value::Bool(matched));
                    ip += 1;
                }
                OpCode::ParallelRun { task_functions, cores, on_error } => {
                    self.run_parallel(&chunk, task_functions, *cores, *on_error)?;
                    ip += 1;
                }
                OpCode::ConcurrentRun { function } => {
                    let result = crate::scheduler::run_concurrent(Rc::clone(&chunk), *function);
                    if let Err(e) = result {
                        return Err(RuntimeError::Unhandled(e));
                    }
                    ip += 1;
                }
                OpCode::Halt => {
                    return Ok(stack.pop().unwrap_or(Value::Nil));
                }
            }
        }
    }

    fn invoke(&mut self, callee: Value, args: Vec<Value>, omitted: &[usize]) -> Result<Value, RuntimeError> {
        let handle = match callee {
            Value::Function(handle) => handle,
            other => return Err(RuntimeError::NotCallable(other.type_tag())),
        };
        let chunk = Rc::clone(&self.chunk);
        let proto = &chunk.functions[handle.function_index];
        let locals = self.bind_params(proto, 0, &args, omitted)?;
        self.call_function(handle.function_index, locals)
    }

    fn invoke_method(&mut self, receiver: Value, method_name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let instance = match &receiver {
            Value::Instance(inst) => inst.clone(),
            other => return Err(RuntimeError::NotCallable(other.type_tag())),
        };
        let class_name = instance.borrow().class.name.clone();
        let chunk = Rc::clone(&self.chunk);
        let class_idx = *self
            .class_by_name
            .get(&class_name)
            .expect("instance class always has a registered ClassProto");
        let proto_idx = chunk.classes[class_idx]
            .methods
            .iter()
            .find(|(name, _)| name == method_name)
            .map(|(_, idx)| *idx)
            .ok_or(RuntimeError::UnknownGlobal(method_name.to_string()))?;
        let proto = &chunk.functions[proto_idx];
        let mut locals = self.bind_params(proto, 1, &args, &[])?;
        locals[0] = receiver;
        self.call_function(proto_idx, locals)
    }

    /// Builds a function's `locals` array, leaving slots `0..this_offset`
    /// (reserved for `this` on methods) at `Nil` for the caller to fill.
    fn bind_params(&mut self, proto: &FunctionProto, this_offset: usize, args: &[Value], omitted: &[usize]) -> Result<Vec<Value>, RuntimeError> {
        let mut locals = vec![Value::Nil; proto.local_count];
        for i in 0..proto.param_count {
            let slot = this_offset + i;
            if omitted.contains(&i) || i >= args.len() {
                if let Some(Some(default_code)) = proto.param_defaults.get(i) {
                    locals[slot] = self.execute(default_code, Vec::new(), 0)?;
                }
            } else {
                locals[slot] = args[i].clone();
            }
        }
        Ok(locals)
    }

    fn run_parallel(&mut self, chunk: &Rc<Chunk>, task_functions: &[usize], cores: Option<usize>, on_error: OnErrorPolicy) -> Result<(), RuntimeError> {
        let batch_size = cores.unwrap_or(task_functions.len().max(1)).max(1);
        let mut first_error: Option<ErrorValue> = None;
        for batch in task_functions.chunks(batch_size) {
            let handles: Vec<_> = batch.iter().map(|&f| crate::scheduler::spawn_task(Rc::clone(chunk), f)).collect();
            for handle in &handles {
                if let Err(e) = crate::scheduler::join(handle) {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    if on_error == OnErrorPolicy::Stop {
                        return Err(RuntimeError::Unhandled(first_error.unwrap()));
                    }
                }
            }
        }
        if on_error == OnErrorPolicy::Auto {
            if let Some(e) = first_error {
                return Err(RuntimeError::Unhandled(e));
            }
        }
        Ok(())
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, RuntimeError> {
    stack.pop().ok_or(RuntimeError::StackUnderflow)
}

fn binop(stack: &mut Vec<Value>, f: impl Fn(Value, Value) -> Result<Value, RuntimeError>) -> Result<bool, RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    stack.push(f(a, b)?);
    Ok(true)
}

fn add(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_add(y))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => Ok(Value::Float(x as f64 + y)),
        (Value::Str(x), Value::Str(y)) => Ok(Value::Str(Rc::from(format!("{x}{y}")))),
        (Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (a, b) => Err(RuntimeError::TypeConversion { from: a.type_tag(), to: b.type_tag(), location: loc() }),
    }
}

fn sub(a: Value, b: Value) -> Result<Value, RuntimeError> {
    numeric(a, b, |x, y| x - y, |x, y| x - y)
}

fn mul(a: Value, b: Value) -> Result<Value, RuntimeError> {
    numeric(a, b, |x, y| x.wrapping_mul(y), |x, y| x * y)
}

fn div(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (&a, &b) {
        (Value::Int(_), Value::Int(0)) => return Err(RuntimeError::DivisionByZero(loc())),
        (Value::Float(_), Value::Float(y)) if *y == 0.0 => return Err(RuntimeError::DivisionByZero(loc())),
        _ => {}
    }
    numeric(a, b, |x, y| x / y, |x, y| x / y)
}

fn rem(a: Value, b: Value) -> Result<Value, RuntimeError> {
    if let (Value::Int(_), Value::Int(0)) = (&a, &b) {
        return Err(RuntimeError::DivisionByZero(loc()));
    }
    numeric(a, b, |x, y| x % y, |x, y| x % y)
}

fn pow(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) if y >= 0 => Ok(Value::Int(x.pow(y as u32))),
        (Value::Int(x), Value::Int(y)) => Ok(Value::Float((x as f64).powi(y as i32))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x.powf(y))),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float((x as f64).powf(y))),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x.powi(y as i32))),
        (a, b) => Err(RuntimeError::TypeConversion { from: a.type_tag(), to: b.type_tag(), location: loc() }),
    }
}

fn numeric(a: Value, b: Value, int_op: impl Fn(i64, i64) -> i64, float_op: impl Fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int_op(x, y))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(float_op(x, y))),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(float_op(x as f64, y))),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(float_op(x, y as f64))),
        (a, b) => Err(RuntimeError::TypeConversion { from: a.type_tag(), to: b.type_tag(), location: loc() }),
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.as_ref().cmp(y.as_ref())),
        _ => {
            let (x, y) = match (a, b) {
                (Value::Int(x), Value::Float(y)) => (*x as f64, *y),
                (Value::Float(x), Value::Int(y)) => (*x, *y as f64),
                (Value::Float(x), Value::Float(y)) => (*x, *y),
                _ => return Err(RuntimeError::TypeConversion { from: a.type_tag(), to: b.type_tag(), location: loc() }),
            };
            x.partial_cmp(&y).ok_or(RuntimeError::TypeConversion { from: "Float", to: "Ordering", location: loc() })
        }
    }
}

fn read_field(base: &Value, name: &str) -> Result<Value, RuntimeError> {
    match base {
        Value::Instance(inst) => inst.borrow().get(name).cloned().ok_or(RuntimeError::KeyNotFound(loc())),
        Value::Dict(map) => {
            let key = ValueKey::Str(Rc::from(name));
            map.borrow().get(&key).map(|(_, v)| v.clone()).ok_or(RuntimeError::KeyNotFound(loc()))
        }
        other => Err(RuntimeError::TypeConversion { from: other.type_tag(), to: "field access", location: loc() }),
    }
}

fn write_field(base: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
    match base {
        Value::Instance(inst) => {
            if inst.borrow_mut().set(name, value) {
                Ok(())
            } else {
                Err(RuntimeError::KeyNotFound(loc()))
            }
        }
        Value::Dict(map) => {
            let key = ValueKey::Str(Rc::from(name));
            map.borrow_mut().insert(key, (Value::str(name), value));
            Ok(())
        }
        other => Err(RuntimeError::TypeConversion { from: other.type_tag(), to: "field assignment", location: loc() }),
    }
}

fn read_index(base: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match base {
        Value::List(items) => {
            let items = items.borrow();
            let i = as_index(index, items.len())?;
            items.get(i).cloned().ok_or(RuntimeError::IndexOutOfBounds { index: as_i64(index), len: items.len(), location: loc() })
        }
        Value::Dict(map) => {
            let key = ValueKey::from_value(index).ok_or(RuntimeError::KeyNotFound(loc()))?;
            map.borrow().get(&key).map(|(_, v)| v.clone()).ok_or(RuntimeError::KeyNotFound(loc()))
        }
        Value::Str(s) => {
            let i = as_index(index, s.chars().count())?;
            s.chars().nth(i).map(|c| Value::str(c.to_string())).ok_or(RuntimeError::IndexOutOfBounds { index: as_i64(index), len: s.chars().count(), location: loc() })
        }
        other => Err(RuntimeError::TypeConversion { from: other.type_tag(), to: "index", location: loc() }),
    }
}

fn write_index(base: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
    match base {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let i = as_index(index, len)?;
            if i >= items.len() {
                return Err(RuntimeError::IndexOutOfBounds { index: as_i64(index), len, location: loc() });
            }
            items[i] = value;
            Ok(())
        }
        Value::Dict(map) => {
            let key = ValueKey::from_value(index).ok_or(RuntimeError::KeyNotFound(loc()))?;
            map.borrow_mut().insert(key, (index.clone(), value));
            Ok(())
        }
        other => Err(RuntimeError::TypeConversion { from: other.type_tag(), to: "index assignment", location: loc() }),
    }
}

fn as_i64(v: &Value) -> i64 {
    match v {
        Value::Int(n) => *n,
        _ => -1,
    }
}

fn as_index(v: &Value, len: usize) -> Result<usize, RuntimeError> {
    match v {
        Value::Int(n) if *n >= 0 => Ok(*n as usize),
        Value::Int(n) => Err(RuntimeError::IndexOutOfBounds { index: *n, len, location: loc() }),
        other => Err(RuntimeError::TypeConversion { from: other.type_tag(), to: "Int", location: loc() }),
    }
}

fn iterator_has_next(value: &Value) -> Result<bool, RuntimeError> {
    let Value::Iterator(cell) = value else {
        return Err(RuntimeError::TypeConversion { from: value.type_tag(), to: "Iterator", location: loc() });
    };
    Ok(match &*cell.borrow() {
        IteratorKind::List { items, index } => *index < items.borrow().len(),
        IteratorKind::DictEntries { entries, index } => *index < entries.len(),
        IteratorKind::Range { current, end, step, inclusive } => {
            if *step >= 0 {
                if *inclusive { current <= end } else { current < end }
            } else if *inclusive {
                current >= end
            } else {
                current > end
            }
        }
        // Channels can't be peeked without consuming: "has more" means
        // "not yet closed", not "a value is buffered right now".
        IteratorKind::Channel(ch) => !*ch.closed.borrow(),
        IteratorKind::Exhausted => false,
    })
}

fn iterator_next(value: &Value) -> Result<Value, RuntimeError> {
    let Value::Iterator(cell) = value else {
        return Err(RuntimeError::TypeConversion { from: value.type_tag(), to: "Iterator", location: loc() });
    };
    let mut kind = cell.borrow_mut();
    match &mut *kind {
        IteratorKind::List { items, index } => {
            let items = items.borrow();
            let v = items.get(*index).cloned().ok_or(RuntimeError::IteratorExhausted(loc()))?;
            *index += 1;
            Ok(v)
        }
        IteratorKind::DictEntries { entries, index } => {
            let (_, v) = entries.get(*index).cloned().ok_or(RuntimeError::IteratorExhausted(loc()))?;
            *index += 1;
            Ok(v)
        }
        IteratorKind::Range { current, end, step, inclusive } => {
            let has_next = if *step >= 0 {
                if *inclusive { *current <= *end } else { *current < *end }
            } else if *inclusive {
                *current >= *end
            } else {
                *current > *end
            };
            if !has_next {
                return Err(RuntimeError::IteratorExhausted(loc()));
            }
            let v = *current;
            *current += *step;
            Ok(Value::Int(v))
        }
        IteratorKind::Channel(ch) => receive_from(ch).ok_or(RuntimeError::IteratorExhausted(loc())),
        IteratorKind::Exhausted => Err(RuntimeError::IteratorExhausted(loc())),
    }
}

fn iterator_next_key_value(value: &Value) -> Result<(Value, Value), RuntimeError> {
    let Value::Iterator(cell) = value else {
        return Err(RuntimeError::TypeConversion { from: value.type_tag(), to: "Iterator", location: loc() });
    };
    let mut kind = cell.borrow_mut();
    match &mut *kind {
        IteratorKind::DictEntries { entries, index } => {
            let pair = entries.get(*index).cloned().ok_or(RuntimeError::IteratorExhausted(loc()))?;
            *index += 1;
            Ok(pair)
        }
        _ => Err(RuntimeError::TypeConversion { from: "Iterator", to: "key-value pair", location: loc() }),
    }
}

fn receive_from(ch: &ChannelHandle) -> Option<Value> {
    ch.receiver.recv().ok()
}

fn const_to_value(c: &Constant) -> Value {
    match c {
        Constant::Int(v) => Value::Int(*v),
        Constant::Float(v) => Value::Float(*v),
        Constant::Str(s) => Value::Str(s.clone()),
        Constant::Bool(v) => Value::Bool(*v),
        Constant::Nil => Value::Nil,
    }
}

fn pattern_matches(value: &Value, test: &PatternTest, locals: &mut [Value]) -> bool {
    match test {
        PatternTest::Wildcard => true,
        PatternTest::Bind(slot) => {
            locals[*slot] = value.clone();
            true
        }
        PatternTest::Literal(c) => *value == const_to_value(c),
        PatternTest::Range(start, end, inclusive) => match value {
            Value::Int(n) => {
                if *inclusive {
                    *start <= *n && *n <= *end
                } else {
                    *start <= *n && *n < *end
                }
            }
            _ => false,
        },
        PatternTest::List(items) => match value {
            Value::List(list) => {
                let list = list.borrow();
                list.len() == items.len() && list.iter().zip(items).all(|(v, t)| pattern_matches(v, t, locals))
            }
            _ => false,
        },
        PatternTest::Dict(fields) => match value {
            Value::Dict(map) => {
                let map = map.borrow();
                fields.iter().all(|(name, t)| {
                    let key = ValueKey::Str(Rc::from(name.as_str()));
                    map.get(&key).is_some_and(|(_, v)| pattern_matches(v, t, locals))
                })
            }
            _ => false,
        },
        PatternTest::Variant(name, args) => match value {
            Value::Error(e) => e.kind == *name && e.args.len() == args.len() && e.args.iter().zip(args).all(|(v, t)| pattern_matches(v, t, locals)),
            Value::Instance(inst) => {
                let inst = inst.borrow();
                inst.class.name == *name
                    && inst.fields.len() == args.len()
                    && inst.fields.iter().zip(args).all(|(f, t)| pattern_matches(&f.value, t, locals))
            }
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limit_compiler::config::CompilerConfig;

    fn run(src: &str) -> Result<Value, RuntimeError> {
        let compiled = limit_compiler::compile(src, "test.lim", &CompilerConfig::default()).expect("compiles");
        Vm::new(Rc::new(compiled.chunk)).run()
    }

    #[test]
    fn arithmetic_and_globals_evaluate() {
        let result = run("var x = 1 + 2 * 3;\nprint x;").unwrap();
        assert_eq!(result, Value::Nil);
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let result = run("var x = 1 / 0;");
        assert!(matches!(result, Err(RuntimeError::DivisionByZero(_))));
    }

    #[test]
    fn list_index_out_of_bounds_is_a_runtime_error() {
        let result = run("var xs = [1, 2]; var y = xs[5];");
        assert!(matches!(result, Err(RuntimeError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn class_instance_round_trips_a_field() {
        let result = run(
            r#"class Point { x: Int = 0; }
               var p = Point(x: 5);
               var y = p.x;"#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn method_call_reads_this() {
        let result = run(
            r#"class Point {
                 x: Int = 0;
                 fn getX() -> Int { return this.x; }
               }
               var p = Point(x: 7);
               var y = p.getX();"#,
        );
        assert!(result.is_ok());
    }
}

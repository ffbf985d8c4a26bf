//! The register VM: frames, slot resolution and the dispatch loop.
//!
//! Each call pushes a `Frame` owning a contiguous range of the value stack
//! plus a fresh environment whose parent is the callee closure's captured
//! environment (or nothing for plain named calls). Depth-0 slot addresses
//! resolve into the frame's stack range; higher depths walk the
//! environment parent chain. Stores keep the two views coherent: a depth-0
//! store writes the stack slot and mirrors declared locals into the frame
//! environment, an outer store writes the environment and mirrors into any
//! live frame that owns it.
//!
//! Nested `run` calls (builtins re-entering the VM) stack additional
//! `VmState` levels; every level's values and environments stay GC roots
//! for the duration.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    array::{MapKey, OrderedMap},
    error::{UdonError, UdonResult},
    heap::{Closure, EnvId},
    interp::Interpreter,
    lower::{CallOp, Function, RegOp, Slot},
    value::{self, BinaryOp, CompareOp, Literal, Value},
};

/// One function activation.
#[derive(Debug)]
pub(crate) struct Frame {
    /// First slot of this frame's range on the value stack.
    pub base: usize,
    /// Slot count (locals + transient evaluation stack).
    pub size: usize,
    /// Saved instruction index; kept current across calls.
    pub ip: usize,
    pub func: Rc<Function>,
    pub env: EnvId,
    /// Caller slot that receives the return value; `None` for root frames.
    pub ret_dst: Option<Slot>,
}

/// The stacks of one `run` activation. Nested host re-entry pushes further
/// states; all of them are GC roots.
#[derive(Debug, Default)]
pub(crate) struct VmState {
    pub values: Vec<Value>,
    pub frames: Vec<Frame>,
}

impl Interpreter {
    /// Runs a registered function to completion on a fresh VM level.
    pub(crate) fn run_function_values(
        &mut self,
        name: &str,
        args: Vec<Value>,
        named: Vec<(Rc<str>, Value)>,
    ) -> UdonResult<Value> {
        let Some(func) = self.functions.get(name).cloned() else {
            return Err(UdonError::runtime(format!("Function '{name}' not found")));
        };
        self.run_closure(func, None, args, named)
    }

    /// Calls a callable value (used by builtins such as `sort` and by
    /// import forwarders). Arguments are positional.
    pub(crate) fn call_value(&mut self, callable: &Value, args: Vec<Value>) -> UdonResult<Value> {
        match callable {
            Value::Function(id) => {
                let closure = self.heap.closure(*id);
                if let Some(handler) = closure.native {
                    let roots = closure.roots.clone();
                    return handler(self, &roots, &args);
                }
                let Some(func) = closure.func.clone() else {
                    return Err(UdonError::runtime(format!(
                        "Function '{}' has no callable body",
                        closure.name
                    )));
                };
                let parent_env = closure.env;
                self.run_closure(func, parent_env, args, Vec::new())
            }
            other => Err(UdonError::runtime(format!(
                "Cannot call non-function value of type {}",
                other.type_name()
            ))),
        }
    }

    fn run_closure(
        &mut self,
        func: Rc<Function>,
        parent_env: Option<EnvId>,
        args: Vec<Value>,
        named: Vec<(Rc<str>, Value)>,
    ) -> UdonResult<Value> {
        let level = self.runs.len();
        self.runs.push(VmState::default());
        let result = self
            .push_frame(level, func, parent_env, None, args, named)
            .and_then(|()| self.exec_level(level));
        self.runs.truncate(level);
        // The heap object behind the result stays rooted until the next run.
        if let Ok(value) = &result {
            self.last_result = Some(value.clone());
        }
        result
    }

    // ----- frames and slots ---------------------------------------------

    fn push_frame(
        &mut self,
        level: usize,
        func: Rc<Function>,
        parent_env: Option<EnvId>,
        ret_dst: Option<Slot>,
        args: Vec<Value>,
        named: Vec<(Rc<str>, Value)>,
    ) -> UdonResult<()> {
        let state = &mut self.runs[level];
        let base = state.values.len();
        let size = func.frame_size as usize;
        state.values.resize(base + size, Value::None);
        let env = self.heap.alloc_env(func.locals_len as usize, parent_env);
        self.runs[level].frames.push(Frame {
            base,
            size,
            ip: 0,
            func: Rc::clone(&func),
            env,
            ret_dst,
        });
        self.bind_args(level, &func, args, named)
    }

    /// Binds call arguments to parameter slots.
    ///
    /// Named arguments route to the matching parameter; remaining
    /// positionals fill in declaration order; missing parameters read as
    /// `none`. Surplus positionals and unknown names pack into the variadic
    /// array when one is declared and error otherwise.
    fn bind_args(
        &mut self,
        level: usize,
        func: &Function,
        args: Vec<Value>,
        named: Vec<(Rc<str>, Value)>,
    ) -> UdonResult<()> {
        let variadic = func.variadic.clone();
        let fixed: SmallVec<[(Rc<str>, u16); 8]> = func
            .params
            .iter()
            .zip(&func.param_slots)
            .filter(|(name, _)| variadic.as_ref().is_none_or(|(v, _)| v != *name))
            .map(|(name, slot)| (Rc::clone(name), *slot))
            .collect();

        let mut by_name: Vec<(Rc<str>, Value)> = Vec::new();
        let mut overflow_named: Vec<(Rc<str>, Value)> = Vec::new();
        for (name, value) in named {
            if fixed.iter().any(|(p, _)| *p == name) {
                by_name.push((name, value));
            } else if variadic.is_some() {
                overflow_named.push((name, value));
            } else {
                return Err(UdonError::runtime(format!("Unknown named argument '{name}'")));
            }
        }

        if variadic.is_none() && args.len() > fixed.len() {
            return Err(UdonError::runtime("Too many positional arguments"));
        }

        let mut positional = args.into_iter();
        for (param, slot) in &fixed {
            let value = match by_name.iter().position(|(n, _)| n == param) {
                Some(found) => by_name.swap_remove(found).1,
                None => positional.next().unwrap_or(Value::None),
            };
            self.write_slot(level, Slot::local(*slot), value)?;
        }

        if let Some((_, var_slot)) = variadic {
            let mut rest = OrderedMap::new();
            for (i, value) in positional.enumerate() {
                rest.set(MapKey::Int(i as i64), value);
            }
            for (name, value) in overflow_named {
                rest.set(MapKey::Str(name), value);
            }
            let id = self.heap.alloc_array(rest);
            self.write_slot(level, Slot::local(var_slot), Value::Array(id))?;
        }
        Ok(())
    }

    /// Walks `depth` parents up the current frame's environment chain.
    fn env_at_depth(&self, level: usize, depth: u16) -> UdonResult<EnvId> {
        let frame = self.runs[level].frames.last().expect("no active frame");
        let mut env = frame.env;
        for _ in 0..depth {
            env = self
                .heap
                .env(env)
                .parent
                .ok_or_else(|| UdonError::runtime("Invalid slot reference: environment chain too short"))?;
        }
        Ok(env)
    }

    fn read_slot(&self, level: usize, slot: Slot) -> UdonResult<Value> {
        if slot.depth == 0 {
            let frame = self.runs[level].frames.last().expect("no active frame");
            let index = frame.base + slot.index as usize;
            return self.runs[level]
                .values
                .get(index)
                .cloned()
                .ok_or_else(|| UdonError::runtime("Malformed instruction: slot out of frame range"));
        }
        let env = self.env_at_depth(level, slot.depth)?;
        self.heap
            .env(env)
            .slots
            .get(slot.index as usize)
            .cloned()
            .ok_or_else(|| UdonError::runtime("Invalid slot reference: index out of range"))
    }

    /// Writes a slot, keeping the stack range and the environment chain in
    /// sync so either addressing form observes current values.
    fn write_slot(&mut self, level: usize, slot: Slot, value: Value) -> UdonResult<()> {
        if slot.depth == 0 {
            let frame = self.runs[level].frames.last().expect("no active frame");
            let index = frame.base + slot.index as usize;
            let env = frame.env;
            let stack_slot = self.runs[level]
                .values
                .get_mut(index)
                .ok_or_else(|| UdonError::runtime("Malformed instruction: slot out of frame range"))?;
            *stack_slot = value.clone();
            let env = self.heap.env_mut(env);
            if let Some(env_slot) = env.slots.get_mut(slot.index as usize) {
                *env_slot = value;
            }
            return Ok(());
        }

        let env = self.env_at_depth(level, slot.depth)?;
        let index = slot.index as usize;
        {
            let env = self.heap.env_mut(env);
            let env_slot = env
                .slots
                .get_mut(index)
                .ok_or_else(|| UdonError::runtime("Invalid slot reference: index out of range"))?;
            *env_slot = value.clone();
        }
        // Mirror into any live frame owning that environment.
        for state in &mut self.runs {
            for frame in &state.frames {
                if frame.env == env && index < frame.size {
                    state.values[frame.base + index] = value.clone();
                }
            }
        }
        Ok(())
    }

    // ----- the dispatch loop --------------------------------------------

    fn exec_level(&mut self, level: usize) -> UdonResult<Value> {
        'reload: loop {
            let frame = self.runs[level].frames.last().expect("no active frame");
            let func = Rc::clone(&frame.func);
            let mut ip = frame.ip;

            loop {
                if ip >= func.code.len() {
                    // Falling off the end returns none.
                    match self.finish_return(level, Value::None)? {
                        Some(result) => return Ok(result),
                        None => continue 'reload,
                    }
                }
                let instr = &func.code[ip];
                let at = |e: UdonError| e.or_location(instr.line, instr.column);

                match &instr.op {
                    RegOp::Nop | RegOp::Pop => {}
                    RegOp::Move { dst, src } => {
                        let value = self.read_slot(level, *src).map_err(at)?;
                        self.write_slot(level, *dst, value).map_err(at)?;
                    }
                    RegOp::LoadK { dst, literal } => {
                        self.write_slot(level, *dst, literal.to_value()).map_err(at)?;
                    }
                    RegOp::LoadGlobal { dst, name } => {
                        let value = self.globals.get(&**name).cloned().unwrap_or(Value::None);
                        self.write_slot(level, *dst, value).map_err(at)?;
                    }
                    RegOp::StoreGlobal { name, src } => {
                        let value = self.read_slot(level, *src).map_err(at)?;
                        self.globals.insert(Rc::clone(name), value);
                    }
                    RegOp::Binary { op, dst, a, b } => {
                        let lhs = self.read_slot(level, *a).map_err(at)?;
                        let rhs = self.read_slot(level, *b).map_err(at)?;
                        let result = self.binary_values(*op, &lhs, &rhs).map_err(at)?;
                        self.write_slot(level, *dst, result).map_err(at)?;
                    }
                    RegOp::Compare { op, dst, a, b } => {
                        let lhs = self.read_slot(level, *a).map_err(at)?;
                        let rhs = self.read_slot(level, *b).map_err(at)?;
                        let result = match op {
                            CompareOp::Eq => lhs.loose_eq(&rhs),
                            CompareOp::Ne => !lhs.loose_eq(&rhs),
                            other => value::compare(*other, &lhs, &rhs).map_err(at)?,
                        };
                        self.write_slot(level, *dst, Value::Bool(result)).map_err(at)?;
                    }
                    RegOp::Negate { dst, a } => {
                        let operand = self.read_slot(level, *a).map_err(at)?;
                        let result = value::negate(&operand).map_err(at)?;
                        self.write_slot(level, *dst, result).map_err(at)?;
                    }
                    RegOp::ToBool { dst, a } => {
                        let operand = self.read_slot(level, *a).map_err(at)?;
                        let truthy = operand.truthy(&self.heap);
                        self.write_slot(level, *dst, Value::Bool(truthy)).map_err(at)?;
                    }
                    RegOp::Not { dst, a } => {
                        let operand = self.read_slot(level, *a).map_err(at)?;
                        let truthy = operand.truthy(&self.heap);
                        self.write_slot(level, *dst, Value::Bool(!truthy)).map_err(at)?;
                    }
                    RegOp::GetProp { dst, obj, key } => {
                        let object = self.read_slot(level, *obj).map_err(at)?;
                        let result = self.get_property(&object, key);
                        self.write_slot(level, *dst, result).map_err(at)?;
                    }
                    RegOp::GetIndex { dst, obj, index } => {
                        let object = self.read_slot(level, *obj).map_err(at)?;
                        let index = self.read_slot(level, *index).map_err(at)?;
                        let result = self.get_index(&object, &index);
                        self.write_slot(level, *dst, result).map_err(at)?;
                    }
                    RegOp::SetProp { obj, key, value } => {
                        let new_value = self.read_slot(level, *value).map_err(at)?;
                        let key = MapKey::from_value(&key.to_value(), &self.heap);
                        self.store_into_object_slot(level, *obj, key, new_value).map_err(at)?;
                    }
                    RegOp::SetIndex { obj, index, value } => {
                        let new_value = self.read_slot(level, *value).map_err(at)?;
                        let index = self.read_slot(level, *index).map_err(at)?;
                        let key = MapKey::from_value(&index, &self.heap);
                        self.store_into_object_slot(level, *obj, key, new_value).map_err(at)?;
                    }
                    RegOp::MakeClosure { dst, name } => {
                        let Some(func) = self.functions.get(&**name).cloned() else {
                            return Err(at(UdonError::runtime(format!("Function '{name}' not found"))));
                        };
                        let env = self.runs[level].frames.last().expect("no active frame").env;
                        let id = self.heap.alloc_closure(Closure {
                            name: Rc::clone(name),
                            func: Some(func),
                            env: Some(env),
                            native: None,
                            roots: Vec::new(),
                        });
                        self.write_slot(level, *dst, Value::Function(id)).map_err(at)?;
                    }
                    RegOp::Jump { target } => {
                        ip = *target as usize;
                        continue;
                    }
                    RegOp::JumpIfFalse { cond, target } => {
                        let condition = self.read_slot(level, *cond).map_err(at)?;
                        if !condition.truthy(&self.heap) {
                            ip = *target as usize;
                            continue;
                        }
                    }
                    RegOp::Call(call) => {
                        if self.dispatch_call(level, call, ip).map_err(at)? {
                            continue 'reload;
                        }
                    }
                    RegOp::Return { src } => {
                        let result = self.read_slot(level, *src).map_err(at)?;
                        match self.finish_return(level, result)? {
                            Some(result) => return Ok(result),
                            None => continue 'reload,
                        }
                    }
                }
                ip += 1;
            }
        }
    }

    /// Pops the current frame. Returns `Some` with the final result when
    /// the level's root frame returned, `None` after handing the value to
    /// the caller frame.
    fn finish_return(&mut self, level: usize, result: Value) -> UdonResult<Option<Value>> {
        let finished = self.runs[level].frames.pop().expect("no frame to return from");
        if self.runs[level].frames.is_empty() {
            self.runs[level].values.clear();
            return Ok(Some(result));
        }

        let caller = self.runs[level].frames.last().expect("caller frame");
        let end = caller.base + caller.size;
        self.runs[level].values.truncate(end);
        if let Some(dst) = finished.ret_dst {
            self.write_slot(level, dst, result)?;
        }

        // Function return is a GC safe point; the result is already rooted
        // through the caller's slot.
        if self.heap.wants_collection() {
            self.collect_garbage(None);
        }
        Ok(None)
    }

    /// Executes a CALL. Returns true when a script frame was pushed and the
    /// dispatch loop must reload its cached frame state.
    fn dispatch_call(&mut self, level: usize, call: &CallOp, ip: usize) -> UdonResult<bool> {
        let argc = call.argc as usize;
        let mut args: Vec<Value> = Vec::with_capacity(argc);
        for i in 0..argc {
            let slot = Slot {
                depth: call.arg_base.depth,
                index: call.arg_base.index + i as u16,
            };
            args.push(self.read_slot(level, slot)?);
        }

        // Split keyword arguments off the positional list.
        let mut named: Vec<(Rc<str>, Value)> = Vec::new();
        let positional: Vec<Value> = if call.arg_names.is_empty() {
            args
        } else {
            let mut positional = Vec::with_capacity(argc);
            for (value, name) in args.into_iter().zip(&call.arg_names) {
                match name {
                    Some(name) => named.push((Rc::clone(name), value)),
                    None => positional.push(value),
                }
            }
            positional
        };

        if let Some(name) = &call.name {
            // Resolution order: script function, then builtin.
            if let Some(func) = self.functions.get(&**name).cloned() {
                self.runs[level].frames.last_mut().expect("frame").ip = ip + 1;
                self.push_frame(level, func, None, Some(call.dst), positional, named)?;
                return Ok(true);
            }
            if let Some(entry) = self.builtins.get(&**name).cloned() {
                let result = (entry.func)(self, &positional, &named)?;
                self.write_slot(level, call.dst, result)?;
                return Ok(false);
            }
            return Err(UdonError::runtime(format!("Function '{name}' not found")));
        }

        let callable_slot = call
            .callable
            .ok_or_else(|| UdonError::runtime("Malformed call instruction: no callee"))?;
        let callable = self.read_slot(level, callable_slot)?;
        match callable {
            Value::Function(id) => {
                let closure = self.heap.closure(id);
                if let Some(handler) = closure.native {
                    let roots = closure.roots.clone();
                    let result = handler(self, &roots, &positional)?;
                    self.write_slot(level, call.dst, result)?;
                    return Ok(false);
                }
                let Some(func) = closure.func.clone() else {
                    return Err(UdonError::runtime(format!(
                        "Function '{}' has no callable body",
                        closure.name
                    )));
                };
                let parent_env = closure.env;
                self.runs[level].frames.last_mut().expect("frame").ip = ip + 1;
                self.push_frame(level, func, parent_env, Some(call.dst), positional, named)?;
                Ok(true)
            }
            other => Err(UdonError::runtime(format!(
                "Cannot call non-function value of type {}",
                other.type_name()
            ))),
        }
    }

    // ----- value operations needing heap access -------------------------

    /// Arithmetic with the concat fallbacks: `..` always concatenates
    /// display forms; `+` concatenates when a string is involved and merges
    /// when both sides are arrays.
    fn binary_values(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> UdonResult<Value> {
        match op {
            BinaryOp::Concat => {
                let text = format!("{}{}", lhs.display(&self.heap), rhs.display(&self.heap));
                Ok(Value::str(&text))
            }
            BinaryOp::Add if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) => {
                let text = format!("{}{}", lhs.display(&self.heap), rhs.display(&self.heap));
                Ok(Value::str(&text))
            }
            BinaryOp::Add => {
                if let (Value::Array(a), Value::Array(b)) = (lhs, rhs) {
                    let mut merged = OrderedMap::new();
                    for (key, value) in self.heap.array(*a).iter() {
                        merged.set(key.clone(), value.clone());
                    }
                    for (key, value) in self.heap.array(*b).iter() {
                        merged.set(key.clone(), value.clone());
                    }
                    return Ok(Value::Array(self.heap.alloc_array(merged)));
                }
                value::numeric_binary(op, lhs, rhs)
            }
            _ => value::numeric_binary(op, lhs, rhs),
        }
    }

    /// Named property read. Missing properties and non-array objects read
    /// as `none` rather than raising.
    fn get_property(&self, object: &Value, key: &Literal) -> Value {
        match object {
            Value::Array(id) => {
                let key = MapKey::from_value(&key.to_value(), &self.heap);
                self.heap.array(*id).get(&key).cloned().unwrap_or(Value::None)
            }
            _ => Value::None,
        }
    }

    /// Indexed read: array lookup, byte of a string, or a property read
    /// when the index is a string. String bytes surface through the
    /// Latin-1 view of [`value::byte_char_string`].
    fn get_index(&self, object: &Value, index: &Value) -> Value {
        match object {
            Value::Array(id) => {
                let key = MapKey::from_value(index, &self.heap);
                self.heap.array(*id).get(&key).cloned().unwrap_or(Value::None)
            }
            Value::Str(s) => {
                if !index.is_numeric() {
                    return Value::None;
                }
                let at = index.as_f64();
                if at < 0.0 {
                    return Value::None;
                }
                match s.as_bytes().get(at as usize) {
                    Some(&byte) => value::byte_char_string(byte),
                    None => Value::None,
                }
            }
            _ => Value::None,
        }
    }

    /// Property/index store through an object slot. A non-array slot is
    /// replaced by a fresh array first, so the write always lands.
    fn store_into_object_slot(&mut self, level: usize, obj: Slot, key: MapKey, value: Value) -> UdonResult<()> {
        let object = self.read_slot(level, obj)?;
        let id = match object {
            Value::Array(id) => id,
            _ => {
                let id = self.heap.alloc_array(OrderedMap::new());
                self.write_slot(level, obj, Value::Array(id))?;
                id
            }
        };
        self.heap.array_mut(id).set(key, value);
        Ok(())
    }
}

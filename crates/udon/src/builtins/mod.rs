//! Builtin registration protocol and the standard builtin library.
//!
//! A builtin is a host callback registered under a name together with a
//! human-readable signature and a return-type tag. The compiler emits calls
//! to a small reserved set (`array`, `__object_literal`, `keys`, `len`,
//! `array_get`); everything else here is library surface and optional for
//! embedders, which can also register their own entries or alias existing
//! ones.

mod arrays;
mod encoding;
mod files;
mod math;
mod strings;

use std::rc::Rc;

use crate::{
    array::{MapKey, OrderedMap},
    error::{UdonError, UdonResult},
    heap::ArrayId,
    interp::Interpreter,
    value::{self, Value},
};

/// Keyword arguments of a builtin call, in call order.
pub type NamedArgs = [(Rc<str>, Value)];

/// Host callback invoked by name from script code.
pub type BuiltinFn = fn(&mut Interpreter, &[Value], &NamedArgs) -> UdonResult<Value>;

/// Callback slot for closures that wrap host behavior (import forwarders).
/// Receives the closure's rooted payload values, then the call arguments.
pub type NativeHandler = fn(&mut Interpreter, &[Value], &[Value]) -> UdonResult<Value>;

/// One registry entry. Aliases share the entry via `Rc`.
#[derive(Debug)]
pub struct BuiltinEntry {
    pub signature: String,
    pub return_type: String,
    pub func: BuiltinFn,
}

// ----- argument helpers (shared by the submodules) ----------------------

pub(crate) fn expect_exact(name: &str, args: &[Value], count: usize) -> UdonResult<()> {
    if args.len() == count {
        Ok(())
    } else {
        Err(UdonError::host(format!("{name} expects {count} argument(s), got {}", args.len())))
    }
}

pub(crate) fn str_arg<'a>(name: &str, args: &'a [Value], index: usize) -> UdonResult<&'a str> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        _ => Err(UdonError::host(format!("{name} expects a string argument"))),
    }
}

pub(crate) fn int_arg(name: &str, args: &[Value], index: usize) -> UdonResult<i64> {
    match args.get(index) {
        Some(v) if v.is_int_like() => Ok(v.as_int()),
        _ => Err(UdonError::host(format!("{name} expects an integer argument"))),
    }
}

pub(crate) fn num_arg(name: &str, args: &[Value], index: usize) -> UdonResult<f64> {
    match args.get(index) {
        Some(v) if v.is_numeric() => Ok(v.as_f64()),
        _ => Err(UdonError::host(format!("{name} expects a numeric argument"))),
    }
}

pub(crate) fn array_arg(name: &str, args: &[Value], index: usize) -> UdonResult<ArrayId> {
    match args.get(index) {
        Some(Value::Array(id)) => Ok(*id),
        _ => Err(UdonError::host(format!("{name} expects an array argument"))),
    }
}

// ----- registration ------------------------------------------------------

/// Registers the standard library into a fresh interpreter.
pub(crate) fn register_defaults(interp: &mut Interpreter) {
    register_core(interp);
    math::register(interp);
    strings::register(interp);
    arrays::register(interp);
    encoding::register(interp);
    files::register(interp);

    interp.register_alias("length", "len");
    interp.register_alias("array_keys", "keys");
    interp.register_alias("array_len", "len");
}

fn register_core(interp: &mut Interpreter) {
    interp.register_builtin("array", "values:any...", "array", builtin_array);
    interp.register_builtin("__object_literal", "", "array", builtin_object_literal);
    interp.register_builtin("keys", "arr:any", "array", builtin_keys);
    interp.register_builtin("len", "value:any", "int", builtin_len);
    interp.register_builtin("array_get", "arr:any, key:any", "any", builtin_array_get);

    interp.register_builtin("print", "values:any...", "none", builtin_print);
    interp.register_builtin("puts", "values:any...", "none", builtin_puts);

    interp.register_builtin("__gc_collect", "budget_ms?:int", "none", builtin_gc_collect);
    interp.register_builtin("__gc_stats", "", "array", builtin_gc_stats);
    interp.register_builtin("globals", "", "array", builtin_globals);

    interp.register_builtin("time", "", "int", builtin_time);
    interp.register_builtin("rand", "", "float", builtin_rand);
    interp.register_builtin("range", "start:int, stop:int, step?:int", "array", builtin_range);

    interp.register_builtin("import", "path:string", "array", builtin_import);
    interp.register_builtin("run_eventhandlers", "event:string", "none", builtin_run_eventhandlers);
}

// ----- reserved builtins -------------------------------------------------

/// `array(v...)` — a fresh array with the arguments at indices `0..n`.
fn builtin_array(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let mut map = OrderedMap::new();
    for (index, value) in args.iter().enumerate() {
        map.set(MapKey::Int(index as i64), value.clone());
    }
    Ok(Value::Array(interp.heap.alloc_array(map)))
}

/// `__object_literal(v0..vn-1, k0..kn-1, n)` — constructs the array behind
/// an object literal, preserving source entry order.
fn builtin_object_literal(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let Some(Value::Int(count)) = args.last() else {
        return Err(UdonError::host("__object_literal: internal error - invalid count"));
    };
    let count = usize::try_from(*count)
        .map_err(|_| UdonError::host("__object_literal: internal error - negative count"))?;
    if args.len() != count * 2 + 1 {
        return Err(UdonError::host("__object_literal: internal error - arg count mismatch"));
    }

    let mut map = OrderedMap::new();
    for i in 0..count {
        let key = MapKey::from_value(&args[count + i], &interp.heap);
        map.set(key, args[i].clone());
    }
    Ok(Value::Array(interp.heap.alloc_array(map)))
}

/// `keys(o)` — array of keys in insertion order; for strings, the index
/// list `0..len`.
fn builtin_keys(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let mut out = OrderedMap::new();
    match args.first() {
        Some(Value::Array(id)) => {
            for (index, key) in interp.heap.array(*id).keys().into_iter().enumerate() {
                out.set(MapKey::Int(index as i64), key.to_value());
            }
        }
        Some(Value::Str(s)) => {
            for index in 0..s.len() {
                out.set(MapKey::Int(index as i64), Value::Int(index as i64));
            }
        }
        _ => return Err(UdonError::host("keys expects an array")),
    }
    Ok(Value::Array(interp.heap.alloc_array(out)))
}

/// `len(v)` — entry count of an array, byte length of a string.
fn builtin_len(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    match args.first() {
        Some(Value::Array(id)) => Ok(Value::Int(interp.heap.array(*id).len() as i64)),
        Some(Value::Str(s)) => Ok(Value::Int(s.len() as i64)),
        Some(Value::None) => Ok(Value::Int(0)),
        _ => Err(UdonError::host("len expects a string or array")),
    }
}

/// `array_get(o, k)` — indexed read; missing keys read as `none`.
fn builtin_array_get(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.len() != 2 {
        return Err(UdonError::host("array_get expects (array, key)"));
    }
    match &args[0] {
        Value::Array(id) => {
            let key = MapKey::from_value(&args[1], &interp.heap);
            Ok(interp.heap.array(*id).get(&key).cloned().unwrap_or(Value::None))
        }
        Value::Str(s) => {
            let index = &args[1];
            if !index.is_numeric() {
                return Ok(Value::None);
            }
            let at = index.as_f64();
            if at < 0.0 {
                return Ok(Value::None);
            }
            Ok(s.as_bytes()
                .get(at as usize)
                .map_or(Value::None, |&b| value::byte_char_string(b)))
        }
        _ => Err(UdonError::host("array_get expects (array, key)")),
    }
}

// ----- output ------------------------------------------------------------

fn builtin_print(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let mut text = String::new();
    for (index, value) in args.iter().enumerate() {
        if index > 0 {
            text.push(' ');
        }
        text.push_str(&value.display(&interp.heap));
    }
    text.push('\n');
    let print = Rc::clone(&interp.print);
    print.borrow_mut().write(&text);
    Ok(Value::None)
}

fn builtin_puts(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let mut text = String::new();
    for value in args {
        text.push_str(&value.display(&interp.heap));
    }
    let print = Rc::clone(&interp.print);
    print.borrow_mut().write(&text);
    Ok(Value::None)
}

// ----- GC and introspection ----------------------------------------------

fn builtin_gc_collect(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let budget = match args.first() {
        None => None,
        Some(Value::Int(ms)) if *ms > 0 => Some(*ms as u64),
        Some(Value::Int(_)) => None,
        Some(_) => {
            return Err(UdonError::host("__gc_collect expects an optional integer budget (ms)"));
        }
    };
    interp.collect_garbage(budget);
    Ok(Value::None)
}

fn builtin_gc_stats(interp: &mut Interpreter, _args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let (envs, arrays, closures) = interp.heap.live_counts();
    let stats = interp.heap.stats();
    let stack_roots: usize = interp.runs.iter().map(|state| state.values.len()).sum();
    let mut out = OrderedMap::new();
    out.set(MapKey::str("envs"), Value::Int(envs as i64));
    out.set(MapKey::str("arrays"), Value::Int(arrays as i64));
    out.set(MapKey::str("functions"), Value::Int(closures as i64));
    out.set(MapKey::str("stack_roots"), Value::Int(stack_roots as i64));
    out.set(MapKey::str("gc_runs"), Value::Int(stats.runs as i64));
    out.set(MapKey::str("gc_ms"), Value::Int(stats.time_ms as i64));
    Ok(Value::Array(interp.heap.alloc_array(out)))
}

fn builtin_globals(interp: &mut Interpreter, _args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let mut out = OrderedMap::new();
    for (name, value) in &interp.globals {
        out.set(MapKey::Str(Rc::clone(name)), value.clone());
    }
    Ok(Value::Array(interp.heap.alloc_array(out)))
}

// ----- misc host surface -------------------------------------------------

fn builtin_time(_interp: &mut Interpreter, _args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let seconds = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(Value::Int(seconds as i64))
}

fn builtin_rand(_interp: &mut Interpreter, _args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    Ok(Value::Float(rand::random::<f64>()))
}

/// `range(start, stop[, step])` — half-open integer range as an array.
fn builtin_range(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.len() < 2 || args.len() > 3 {
        return Err(UdonError::host("range expects (start, stop, [step])"));
    }
    let start = int_arg("range", args, 0)?;
    let stop = int_arg("range", args, 1)?;
    let step = if args.len() == 3 { int_arg("range", args, 2)? } else { 1 };
    if step == 0 {
        return Err(UdonError::host("range step must not be zero"));
    }

    let mut map = OrderedMap::new();
    let mut current = start;
    let mut index = 0i64;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        map.set(MapKey::Int(index), Value::Int(current));
        index += 1;
        current += step;
    }
    Ok(Value::Array(interp.heap.alloc_array(map)))
}

fn builtin_import(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("import", args, 1)?;
    let path = str_arg("import", args, 0)?.to_owned();
    interp.import_module(&path)
}

fn builtin_run_eventhandlers(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("run_eventhandlers", args, 1)?;
    let event = str_arg("run_eventhandlers", args, 0)?.to_owned();
    interp.run_eventhandlers(&event)?;
    Ok(Value::None)
}

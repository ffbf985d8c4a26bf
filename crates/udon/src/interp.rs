//! The interpreter facade: compilation pipeline, globals, builtins, event
//! dispatch, imports and GC orchestration.
//!
//! One `Interpreter` owns one heap, one globals table and one function
//! table. Execution is single-threaded and cooperative; builtins may
//! re-enter `run` and every live VM level stays rooted for the collector.

use std::{cell::RefCell, rc::Rc};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    array::{MapKey, OrderedMap},
    builtins::{self, BuiltinEntry, BuiltinFn},
    compiler,
    error::{UdonError, UdonResult},
    heap::{ArrayId, Closure, GcStats, Heap},
    io::{PrintWriter, StdPrint},
    ir::FunctionIr,
    lexer::tokenize,
    lower::{self, Function},
    value::Value,
    vm::VmState,
};

/// An embeddable script interpreter.
///
/// Typical host usage:
///
/// ```
/// use udon::{Interpreter, Value};
///
/// let mut interp = Interpreter::new();
/// interp.compile("function main() { return 21 * 2 }").unwrap();
/// let result = interp.run("main", vec![]).unwrap();
/// assert_eq!(result, Value::Int(42));
/// ```
pub struct Interpreter {
    pub(crate) heap: Heap,
    /// Globals by name; the index position doubles as the stable slot.
    pub(crate) globals: IndexMap<Rc<str>, Value>,
    pub(crate) functions: AHashMap<Rc<str>, Rc<Function>>,
    pub(crate) builtins: AHashMap<Rc<str>, Rc<BuiltinEntry>>,
    /// Event key ("on:tick") to handler function names, registration order.
    pub(crate) events: IndexMap<String, Vec<Rc<str>>>,
    /// Owned sub-interpreters created by `import`, addressed by index.
    pub(crate) imports: Vec<Box<Interpreter>>,
    /// Active VM levels; all of their stacks and environments are GC roots.
    pub(crate) runs: Vec<VmState>,
    /// Host-registered values protected from collection.
    pub(crate) extra_roots: Vec<Value>,
    /// The most recent run result, rooted so the host can inspect it.
    pub(crate) last_result: Option<Value>,
    pub(crate) print: Rc<RefCell<dyn PrintWriter>>,
    /// Comment bodies collected by the lexer across compiles.
    pub comments: Vec<String>,
    declared_globals: AHashSet<Rc<str>>,
    lambda_counter: u32,
    anon_counter: u32,
    init_counter: u32,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Creates an interpreter with the standard builtin library registered.
    #[must_use]
    pub fn new() -> Self {
        let mut interp = Self {
            heap: Heap::new(),
            globals: IndexMap::new(),
            functions: AHashMap::new(),
            builtins: AHashMap::new(),
            events: IndexMap::new(),
            imports: Vec::new(),
            runs: Vec::new(),
            extra_roots: Vec::new(),
            last_result: None,
            print: Rc::new(RefCell::new(StdPrint)),
            comments: Vec::new(),
            declared_globals: AHashSet::new(),
            lambda_counter: 0,
            anon_counter: 0,
            init_counter: 0,
        };
        builtins::register_defaults(&mut interp);
        interp
    }

    /// Redirects `print`/`puts` output (see [`crate::CollectPrint`]).
    pub fn set_print(&mut self, writer: Rc<RefCell<dyn PrintWriter>>) {
        self.print = writer;
    }

    /// Read access to the heap, for inspecting values from host builtins.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // ----- compilation --------------------------------------------------

    /// Compiles a program, discarding previously compiled state (functions,
    /// globals, events). Builtins stay registered.
    pub fn compile(&mut self, source: &str) -> UdonResult<()> {
        self.functions.clear();
        self.events.clear();
        self.globals.clear();
        self.declared_globals.clear();
        self.runs.clear();
        self.extra_roots.clear();
        self.last_result = None;
        self.comments.clear();
        self.lambda_counter = 0;
        self.anon_counter = 0;
        self.init_counter = 0;
        self.compile_append(source)
    }

    /// Compiles an additional chunk into the existing program, then runs
    /// its global initializers. Used by the REPL and by `compile`.
    pub fn compile_append(&mut self, source: &str) -> UdonResult<()> {
        let started = std::time::Instant::now();
        let lex = tokenize(source)?;
        let output = compiler::compile(&lex.tokens, &self.declared_globals, self.lambda_counter, self.anon_counter)?;
        self.comments.extend(lex.comments);
        self.lambda_counter = output.lambda_counter;
        self.anon_counter = output.anon_counter;

        for name in &output.new_globals {
            self.declared_globals.insert(Rc::clone(name));
            self.globals.entry(Rc::clone(name)).or_insert(Value::None);
        }
        for ir in output.functions {
            let func = Rc::new(lower::lower_function(ir)?);
            self.functions.insert(Rc::clone(&func.name), func);
        }
        for (event, function) in output.events {
            self.events.entry(event).or_default().push(function);
        }
        tracing::debug!(functions = self.functions.len(), elapsed = ?started.elapsed(), "compiled chunk");

        if !output.global_init.is_empty() {
            let name: Rc<str> = Rc::from(format!("__globals_init_{}", self.init_counter).as_str());
            self.init_counter += 1;
            let ir = FunctionIr {
                name: Rc::clone(&name),
                params: vec![],
                param_slots: vec![],
                variadic: None,
                locals_len: output.global_init_locals,
                code: output.global_init,
            };
            let func = Rc::new(lower::lower_function(ir)?);
            self.functions.insert(Rc::clone(&name), func);
            self.run_function_values(&name, vec![], vec![])?;
        }
        Ok(())
    }

    // ----- execution ----------------------------------------------------

    /// Runs a compiled function with positional arguments.
    pub fn run(&mut self, name: &str, args: Vec<Value>) -> UdonResult<Value> {
        self.run_function_values(name, args, vec![])
    }

    /// Runs a compiled function with positional and named arguments.
    pub fn run_with_named(&mut self, name: &str, args: Vec<Value>, named: Vec<(String, Value)>) -> UdonResult<Value> {
        let named = named
            .into_iter()
            .map(|(n, v)| (Rc::from(n.as_str()), v))
            .collect();
        self.run_function_values(name, args, named)
    }

    /// Calls a callable value (closure) with positional arguments.
    pub fn invoke(&mut self, callable: &Value, args: Vec<Value>) -> UdonResult<Value> {
        self.call_value(callable, args)
    }

    /// Runs every handler registered under an event key (e.g. `"on:tick"`),
    /// in registration order, stopping at the first error.
    pub fn run_eventhandlers(&mut self, event: &str) -> UdonResult<()> {
        let handlers: Vec<Rc<str>> = self.events.get(event).cloned().unwrap_or_default();
        for handler in handlers {
            self.run_function_values(&handler, vec![], vec![])?;
        }
        Ok(())
    }

    /// True when at least one function with this name is compiled.
    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    // ----- globals ------------------------------------------------------

    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(Rc::from(name), value);
        self.declared_globals.insert(Rc::from(name));
    }

    /// Stable slot index of a global, usable with [`Self::global_by_slot`].
    #[must_use]
    pub fn global_slot(&self, name: &str) -> Option<usize> {
        self.globals.get_index_of(name)
    }

    #[must_use]
    pub fn global_by_slot(&self, slot: usize) -> Option<Value> {
        self.globals.get_index(slot).map(|(_, v)| v.clone())
    }

    /// Global names in declaration order.
    #[must_use]
    pub fn global_names(&self) -> Vec<String> {
        self.globals.keys().map(|k| k.to_string()).collect()
    }

    // ----- builtins -----------------------------------------------------

    /// Registers a host builtin callable from scripts by name.
    pub fn register_builtin(
        &mut self,
        name: &str,
        signature: &str,
        return_type: &str,
        func: BuiltinFn,
    ) {
        self.builtins.insert(
            Rc::from(name),
            Rc::new(BuiltinEntry {
                signature: signature.to_owned(),
                return_type: return_type.to_owned(),
                func,
            }),
        );
    }

    /// Binds `alias` to the entry registered under `target`.
    pub fn register_alias(&mut self, alias: &str, target: &str) {
        if let Some(entry) = self.builtins.get(target).cloned() {
            self.builtins.insert(Rc::from(alias), entry);
        }
    }

    #[must_use]
    pub fn has_builtin(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    // ----- garbage collection -------------------------------------------

    /// Forces a mark-sweep cycle. With a budget, sweeping may defer some
    /// pools to the next cycle once the budget is exceeded.
    pub fn collect_garbage(&mut self, budget_ms: Option<u64>) {
        let value_roots = self
            .globals
            .values()
            .chain(self.runs.iter().flat_map(|state| state.values.iter()))
            .chain(self.extra_roots.iter())
            .chain(self.last_result.iter());
        let env_roots = self
            .runs
            .iter()
            .flat_map(|state| state.frames.iter().map(|frame| frame.env));
        self.heap.collect(value_roots, env_roots, budget_ms);
    }

    #[must_use]
    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Roots a value against collection for the duration of host-driven
    /// work; pair with [`Self::pop_root`].
    pub fn push_root(&mut self, value: Value) {
        self.extra_roots.push(value);
    }

    pub fn pop_root(&mut self) {
        self.extra_roots.pop();
    }

    // ----- value construction and inspection ----------------------------

    /// Allocates an empty array on this interpreter's heap.
    pub fn new_array(&mut self) -> Value {
        Value::Array(self.heap.alloc_array(OrderedMap::new()))
    }

    /// Sets a key in an array value; non-hashable keys coerce to strings.
    pub fn array_set(&mut self, array: &Value, key: &Value, value: Value) -> UdonResult<()> {
        let Value::Array(id) = array else {
            return Err(UdonError::runtime("array_set target is not an array"));
        };
        let key = MapKey::from_value(key, &self.heap);
        self.heap.array_mut(*id).set(key, value);
        Ok(())
    }

    /// Reads a key from an array value; missing keys read as `none`.
    #[must_use]
    pub fn array_get(&self, array: &Value, key: &Value) -> Value {
        let Value::Array(id) = array else {
            return Value::None;
        };
        let key = MapKey::from_value(key, &self.heap);
        self.heap.array(*id).get(&key).cloned().unwrap_or(Value::None)
    }

    /// Display form of a value (what `print` would write).
    #[must_use]
    pub fn display_value(&self, value: &Value) -> String {
        value.display(&self.heap)
    }

    // ----- disassembly --------------------------------------------------

    /// Stack-IR disassembly of every compiled function, sorted by name.
    #[must_use]
    pub fn dump_instructions(&self) -> String {
        let mut names: Vec<&Rc<str>> = self.functions.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            let func = &self.functions[name];
            let ir = FunctionIr {
                name: Rc::clone(&func.name),
                params: func.params.clone(),
                param_slots: func.param_slots.clone(),
                variadic: func.variadic.clone(),
                locals_len: func.locals_len,
                code: func.stack_code.clone(),
            };
            out.push_str(&ir.disassemble());
            out.push('\n');
        }
        out
    }

    /// Register-form disassembly of every compiled function.
    #[must_use]
    pub fn dump_lowered(&self) -> String {
        let mut names: Vec<&Rc<str>> = self.functions.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            out.push_str(&self.functions[name].disassemble_lowered());
            out.push('\n');
        }
        out
    }

    // ----- imports ------------------------------------------------------

    /// Loads and compiles another source file into an owned
    /// sub-interpreter, returning the result array: the child's globals
    /// deep-copied into this heap plus a forwarding closure per child
    /// function. Mutations on either side stay private afterward.
    pub(crate) fn import_module(&mut self, path: &str) -> UdonResult<Value> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| UdonError::host(format!("import: cannot read '{path}': {e}")))?;
        let mut child = Box::new(Self::new());
        child.print = Rc::clone(&self.print);
        child.compile(&source)?;

        let import_id = self.imports.len();
        self.imports.push(child);

        let result = self.heap.alloc_array(OrderedMap::new());

        // Snapshot globals: deep copies, cycle-aware. Closures have no
        // meaning outside their interpreter and snapshot as none.
        let global_names: Vec<Rc<str>> = self.imports[import_id].globals.keys().cloned().collect();
        for name in global_names {
            let value = self.imports[import_id].globals.get(&name).cloned().unwrap_or(Value::None);
            let mut seen = AHashMap::new();
            let copied = {
                let (imports, heap) = (&self.imports, &mut self.heap);
                deep_copy(&value, &imports[import_id].heap, heap, &mut seen)
            };
            self.heap.array_mut(result).set(MapKey::Str(name), copied);
        }

        // Forwarders for the child's callable surface (internal synthetic
        // functions are not exported).
        let mut function_names: Vec<Rc<str>> = self.imports[import_id]
            .functions
            .keys()
            .filter(|n| !n.starts_with("__") && !n.starts_with("_anon_"))
            .cloned()
            .collect();
        function_names.sort();
        for name in function_names {
            let closure = self.heap.alloc_closure(Closure {
                name: Rc::clone(&name),
                func: None,
                env: None,
                native: Some(forward_import_call),
                roots: vec![
                    Value::Int(import_id as i64),
                    Value::Str(Rc::from(&*name)),
                ],
            });
            self.heap
                .array_mut(result)
                .set(MapKey::Str(name), Value::Function(closure));
        }

        Ok(Value::Array(result))
    }

    pub(crate) fn imported(&mut self, id: usize) -> UdonResult<&mut Self> {
        self.imports
            .get_mut(id)
            .map(|boxed| &mut **boxed)
            .ok_or_else(|| UdonError::runtime(format!("Unknown imported interpreter id {id}")))
    }
}

/// Copies a value from one heap into another, preserving shared structure
/// and cycles through the `seen` map. Function values do not cross heaps.
pub(crate) fn deep_copy(
    value: &Value,
    src: &Heap,
    dst: &mut Heap,
    seen: &mut AHashMap<ArrayId, ArrayId>,
) -> Value {
    match value {
        Value::Array(id) => {
            if let Some(copied) = seen.get(id) {
                return Value::Array(*copied);
            }
            let copied = dst.alloc_array(OrderedMap::new());
            seen.insert(*id, copied);
            let entries: Vec<(MapKey, Value)> = src
                .array(*id)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, entry) in entries {
                let entry = deep_copy(&entry, src, dst, seen);
                dst.array_mut(copied).set(key, entry);
            }
            Value::Array(copied)
        }
        Value::Function(_) => Value::None,
        other => other.clone(),
    }
}

/// Native handler of import forwarders: re-enters the child interpreter by
/// stored id, copying arguments in and the result back out.
fn forward_import_call(interp: &mut Interpreter, roots: &[Value], args: &[Value]) -> UdonResult<Value> {
    let (Some(Value::Int(id)), Some(Value::Str(name))) = (roots.first(), roots.get(1)) else {
        return Err(UdonError::runtime("Malformed import forwarder"));
    };
    let id = *id as usize;
    let name = Rc::clone(name);

    // Arguments cross into the child's heap.
    let copied_args: Vec<Value> = {
        let (imports, heap) = (&mut interp.imports, &interp.heap);
        let child = imports
            .get_mut(id)
            .ok_or_else(|| UdonError::runtime(format!("Unknown imported interpreter id {id}")))?;
        args.iter()
            .map(|arg| {
                let mut seen = AHashMap::new();
                deep_copy(arg, heap, &mut child.heap, &mut seen)
            })
            .collect()
    };

    let result = interp.imported(id)?.run_function_values(&name, copied_args, vec![])?;

    // And the result crosses back.
    let copied = {
        let (imports, heap) = (&interp.imports, &mut interp.heap);
        let mut seen = AHashMap::new();
        deep_copy(&result, &imports[id].heap, heap, &mut seen)
    };
    Ok(copied)
}

//! Array mutation and query builtins.
//!
//! Arrays double as lists (integer keys) and maps; the list-shaped helpers
//! (`push`, `shift`, `unshift`) treat the integer-keyed entries as the list
//! part and leave other keys alone.

use std::cmp::Ordering;

use crate::{
    array::{MapKey, OrderedMap},
    builtins::{NamedArgs, array_arg, expect_exact},
    error::{UdonError, UdonResult},
    heap::ArrayId,
    interp::Interpreter,
    value::{self, CompareOp, Value},
};

/// `push(arr, v)` — appends at index `len(arr)`.
fn builtin_push(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("push", args, 2)?;
    let id = array_arg("push", args, 0)?;
    let index = interp.heap.array(id).len() as i64;
    interp.heap.array_mut(id).set(MapKey::Int(index), args[1].clone());
    Ok(Value::None)
}

/// `pop(arr[, key])` — removes and returns the given key, or the highest
/// integer key when omitted. Returns `none` when nothing was removed.
fn builtin_pop(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(UdonError::host("pop expects (array, [key])"));
    }
    let id = array_arg("pop", args, 0)?;
    let key = if args.len() == 2 {
        Some(MapKey::from_value(&args[1], &interp.heap))
    } else {
        interp
            .heap
            .array(id)
            .iter()
            .filter_map(|(k, _)| match k {
                MapKey::Int(i) => Some(*i),
                _ => None,
            })
            .max()
            .map(MapKey::Int)
    };
    let Some(key) = key else {
        return Ok(Value::None);
    };
    Ok(interp.heap.array_mut(id).remove(&key).unwrap_or(Value::None))
}

/// `delete(arr, key)` — removes a key, returning the removed value, or
/// `false` when the key was missing.
fn builtin_delete(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("delete", args, 2)?;
    let id = array_arg("delete", args, 0)?;
    let key = MapKey::from_value(&args[1], &interp.heap);
    Ok(interp.heap.array_mut(id).remove(&key).unwrap_or(Value::Bool(false)))
}

/// Renumbers the integer-keyed entries of `entries` from 0 while keeping
/// other keys as they are.
fn renumber(entries: Vec<(MapKey, Value)>) -> OrderedMap {
    let mut out = OrderedMap::new();
    let mut index = 0i64;
    for (key, value) in entries {
        match key {
            MapKey::Int(_) => {
                out.set(MapKey::Int(index), value);
                index += 1;
            }
            other => out.set(other, value),
        }
    }
    out
}

/// `shift(arr)` — removes and returns the entry at the smallest integer
/// key, renumbering the remaining integer keys from 0.
fn builtin_shift(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("shift", args, 1)?;
    let id = array_arg("shift", args, 0)?;
    let first = interp
        .heap
        .array(id)
        .iter()
        .filter_map(|(k, _)| match k {
            MapKey::Int(i) => Some(*i),
            _ => None,
        })
        .min();
    let Some(first) = first else {
        return Ok(Value::None);
    };
    let removed = interp
        .heap
        .array_mut(id)
        .remove(&MapKey::Int(first))
        .unwrap_or(Value::None);
    let entries: Vec<(MapKey, Value)> = interp
        .heap
        .array(id)
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    *interp.heap.array_mut(id) = renumber(entries);
    Ok(removed)
}

/// `unshift(arr, v)` — inserts at integer index 0, shifting the integer
/// keys up by one.
fn builtin_unshift(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("unshift", args, 2)?;
    let id = array_arg("unshift", args, 0)?;
    let mut entries: Vec<(MapKey, Value)> = vec![(MapKey::Int(0), args[1].clone())];
    entries.extend(interp.heap.array(id).iter().map(|(k, v)| (k.clone(), v.clone())));
    *interp.heap.array_mut(id) = renumber(entries);
    Ok(Value::None)
}

/// `contains(hay, needle)` — value membership for arrays, substring match
/// for strings.
fn builtin_contains(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("contains", args, 2)?;
    match &args[0] {
        Value::Array(id) => {
            let found = interp.heap.array(*id).iter().any(|(_, v)| v.loose_eq(&args[1]));
            Ok(Value::Bool(found))
        }
        Value::Str(hay) => match &args[1] {
            Value::Str(needle) => Ok(Value::Bool(hay.contains(&**needle))),
            other => {
                let needle = other.display(&interp.heap);
                Ok(Value::Bool(hay.contains(&needle)))
            }
        },
        _ => Err(UdonError::host("contains expects (array|string, needle)")),
    }
}

/// Default ordering used by `sort`: numbers by value, strings bytewise,
/// anything else by display form.
fn default_order(interp: &Interpreter, a: &Value, b: &Value) -> Ordering {
    if let Ok(less) = value::compare(CompareOp::Lt, a, b) {
        if less {
            return Ordering::Less;
        }
        if a.loose_eq(b) {
            return Ordering::Equal;
        }
        return Ordering::Greater;
    }
    a.display(&interp.heap).cmp(&b.display(&interp.heap))
}

struct SortOptions {
    descending: bool,
    by_key: bool,
    compare: Option<Value>,
}

fn sort_options(interp: &Interpreter, options: Option<&Value>) -> SortOptions {
    let mut parsed = SortOptions {
        descending: false,
        by_key: false,
        compare: None,
    };
    let Some(Value::Array(id)) = options else {
        return parsed;
    };
    let map = interp.heap.array(*id);
    if let Some(desc) = map.get(&MapKey::str("desc")) {
        parsed.descending = desc.truthy(&interp.heap);
    }
    if let Some(by_key) = map.get(&MapKey::str("by_key")) {
        parsed.by_key = by_key.truthy(&interp.heap);
    }
    if let Some(compare) = map.get(&MapKey::str("compare")) {
        if matches!(compare, Value::Function(_)) {
            parsed.compare = Some(compare.clone());
        }
    }
    parsed
}

fn sorted_copy(interp: &mut Interpreter, id: ArrayId, options: SortOptions) -> UdonResult<Value> {
    let mut entries: Vec<(MapKey, Value)> = interp
        .heap
        .array(id)
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(compare) = &options.compare {
        // User comparator re-enters the VM; keep the scratch entries
        // rooted across those calls.
        let scratch = interp.heap.alloc_array(interp_entries_map(&entries));
        interp.push_root(Value::Array(scratch));
        let mut error = None;
        entries.sort_by(|a, b| {
            if error.is_some() {
                return Ordering::Equal;
            }
            let (left, right) = if options.by_key {
                (a.0.to_value(), b.0.to_value())
            } else {
                (a.1.clone(), b.1.clone())
            };
            match interp.call_value(compare, vec![left, right]) {
                Ok(result) => {
                    let rank = match result {
                        Value::Int(i) => i,
                        Value::Float(f) => f as i64,
                        Value::Bool(true) => -1,
                        _ => 0,
                    };
                    rank.cmp(&0)
                }
                Err(e) => {
                    error = Some(e);
                    Ordering::Equal
                }
            }
        });
        interp.pop_root();
        if let Some(e) = error {
            return Err(e);
        }
    } else if options.by_key {
        entries.sort_by(|a, b| default_order(interp, &a.0.to_value(), &b.0.to_value()));
    } else {
        entries.sort_by(|a, b| default_order(interp, &a.1, &b.1));
    }

    if options.descending {
        entries.reverse();
    }

    // Integer-keyed entries renumber to their new positions; other keys
    // keep their identity in the new order.
    let all_int = entries.iter().all(|(k, _)| matches!(k, MapKey::Int(_)));
    let result = if all_int {
        let mut out = OrderedMap::new();
        for (index, (_, value)) in entries.into_iter().enumerate() {
            out.set(MapKey::Int(index as i64), value);
        }
        out
    } else {
        let mut out = OrderedMap::new();
        for (key, value) in entries {
            out.set(key, value);
        }
        out
    };
    Ok(Value::Array(interp.heap.alloc_array(result)))
}

fn interp_entries_map(entries: &[(MapKey, Value)]) -> OrderedMap {
    let mut map = OrderedMap::new();
    for (key, value) in entries {
        map.set(key.clone(), value.clone());
    }
    map
}

/// `sort(arr[, options])` — a new array sorted by value. Options map:
/// `desc`, `by_key`, `compare` (callable returning negative/zero/positive).
fn builtin_sort(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(UdonError::host("sort expects (array, [options])"));
    }
    let id = array_arg("sort", args, 0)?;
    let options = sort_options(interp, args.get(1));
    sorted_copy(interp, id, options)
}

/// `ksort(arr[, options])` — `sort` with `by_key` forced on.
fn builtin_ksort(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(UdonError::host("ksort expects (array, [options])"));
    }
    let id = array_arg("ksort", args, 0)?;
    let mut options = sort_options(interp, args.get(1));
    options.by_key = true;
    sorted_copy(interp, id, options)
}

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_builtin("push", "arr:array, value:any", "none", builtin_push);
    interp.register_builtin("pop", "arr:array, key?:any", "any", builtin_pop);
    interp.register_builtin("delete", "arr:array, key:any", "any", builtin_delete);
    interp.register_builtin("shift", "arr:array", "any", builtin_shift);
    interp.register_builtin("unshift", "arr:array, value:any", "none", builtin_unshift);
    interp.register_builtin("contains", "hay:any, needle:any", "bool", builtin_contains);
    interp.register_builtin("sort", "arr:array, options?:any", "array", builtin_sort);
    interp.register_builtin("ksort", "arr:array, options?:any", "array", builtin_ksort);
}

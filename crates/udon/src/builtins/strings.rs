//! String manipulation and conversion builtins. All operations are
//! byte-wise; strings are opaque byte sequences to the language.

use crate::{
    array::{MapKey, OrderedMap},
    builtins::{NamedArgs, expect_exact, int_arg, str_arg},
    error::{UdonError, UdonResult},
    interp::Interpreter,
    value::{self, Value},
};

fn builtin_split(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("split", args, 2)?;
    let text = str_arg("split", args, 0)?;
    let delim = str_arg("split", args, 1)?;
    if delim.is_empty() {
        return Err(UdonError::host("split expects a non-empty delimiter"));
    }
    let mut map = OrderedMap::new();
    for (index, part) in text.split(delim).enumerate() {
        map.set(MapKey::Int(index as i64), Value::str(part));
    }
    Ok(Value::Array(interp.heap.alloc_array(map)))
}

fn builtin_join(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("join", args, 2)?;
    let Some(Value::Array(id)) = args.first() else {
        return Err(UdonError::host("join expects (array, delimiter)"));
    };
    let delim = str_arg("join", args, 1)?.to_owned();
    let parts: Vec<String> = interp
        .heap
        .array(*id)
        .iter()
        .map(|(_, v)| v.display(&interp.heap))
        .collect();
    Ok(Value::str(&parts.join(&delim)))
}

fn builtin_substr(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("substr", args, 3)?;
    let text = str_arg("substr", args, 0)?;
    let start = int_arg("substr", args, 1)?.max(0) as usize;
    let count = int_arg("substr", args, 2)?.max(0) as usize;
    let bytes = text.as_bytes();
    if start >= bytes.len() {
        return Ok(Value::str(""));
    }
    let end = (start + count).min(bytes.len());
    Ok(Value::str(&String::from_utf8_lossy(&bytes[start..end])))
}

fn builtin_replace(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.len() != 3 && args.len() != 4 {
        return Err(UdonError::host("replace expects (string, old, new, [count])"));
    }
    let text = str_arg("replace", args, 0)?;
    let old = str_arg("replace", args, 1)?;
    let new = str_arg("replace", args, 2)?;
    if old.is_empty() {
        return Ok(Value::str(text));
    }
    let replaced = if args.len() == 4 {
        let count = int_arg("replace", args, 3)?.max(0) as usize;
        text.replacen(old, new, count)
    } else {
        text.replace(old, new)
    };
    Ok(Value::str(&replaced))
}

fn builtin_starts_with(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("starts_with", args, 2)?;
    let text = str_arg("starts_with", args, 0)?;
    let prefix = str_arg("starts_with", args, 1)?;
    Ok(Value::Bool(text.starts_with(prefix)))
}

fn builtin_ends_with(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("ends_with", args, 2)?;
    let text = str_arg("ends_with", args, 0)?;
    let suffix = str_arg("ends_with", args, 1)?;
    Ok(Value::Bool(text.ends_with(suffix)))
}

/// `find(s, needle[, start])` — byte offset of the first match at or after
/// `start`, or -1.
fn builtin_find(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.len() != 2 && args.len() != 3 {
        return Err(UdonError::host("find expects (string, needle, [start])"));
    }
    let text = str_arg("find", args, 0)?;
    let needle = str_arg("find", args, 1)?;
    let start = if args.len() == 3 {
        int_arg("find", args, 2)?.max(0) as usize
    } else {
        0
    };
    if start > text.len() {
        return Ok(Value::Int(-1));
    }
    match text[start..].find(needle) {
        Some(offset) => Ok(Value::Int((start + offset) as i64)),
        None => Ok(Value::Int(-1)),
    }
}

/// `ord(s)` — byte code of the first position under the single-byte
/// string view: the first character's value when it fits in 0-255
/// (the inverse of `chr` and of indexed reads), otherwise the first byte
/// of its UTF-8 encoding. An empty string reads as 0.
fn builtin_ord(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("ord", args, 1)?;
    let text = str_arg("ord", args, 0)?;
    let code = match text.chars().next() {
        None => 0,
        Some(c) if (c as u32) <= 0xFF => c as u32,
        Some(_) => u32::from(text.as_bytes()[0]),
    };
    Ok(Value::Int(i64::from(code)))
}

/// `chr(code)` — one-character string for a byte value. The code wraps
/// into 0-255 and maps the way `ord` reads it back, so `ord(chr(n))` is
/// always `n & 0xFF`.
fn builtin_chr(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("chr", args, 1)?;
    let code = int_arg("chr", args, 0)?;
    Ok(value::byte_char_string(code as u8))
}

fn builtin_to_upper(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_upper", args, 1)?;
    Ok(Value::str(&str_arg("to_upper", args, 0)?.to_uppercase()))
}

fn builtin_to_lower(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_lower", args, 1)?;
    Ok(Value::str(&str_arg("to_lower", args, 0)?.to_lowercase()))
}

fn builtin_trim(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("trim", args, 1)?;
    Ok(Value::str(str_arg("trim", args, 0)?.trim()))
}

fn builtin_concat(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let mut out = String::new();
    for value in args {
        out.push_str(&value.display(&interp.heap));
    }
    Ok(Value::str(&out))
}

fn builtin_to_htmlsafe(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_htmlsafe", args, 1)?;
    let text = str_arg("to_htmlsafe", args, 0)?;
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    Ok(Value::str(&out))
}

// ----- conversions -------------------------------------------------------

/// Loose numeric view used by `to_int`/`to_float`: strings parse (0 on
/// failure), arrays read as their length, `none` as 0.
fn loose_number(interp: &Interpreter, value: &Value) -> f64 {
    match value {
        Value::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Array(id) => interp.heap.array(*id).len() as f64,
        Value::None | Value::Function(_) => 0.0,
        other => other.as_f64(),
    }
}

fn builtin_to_int(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_int", args, 1)?;
    Ok(Value::Int(loose_number(interp, &args[0]) as i64))
}

fn builtin_to_float(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_float", args, 1)?;
    Ok(Value::Float(loose_number(interp, &args[0])))
}

fn builtin_to_string(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_string", args, 1)?;
    Ok(Value::str(&args[0].display(&interp.heap)))
}

fn builtin_to_bool(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_bool", args, 1)?;
    Ok(Value::Bool(args[0].truthy(&interp.heap)))
}

fn builtin_typeof(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("typeof", args, 1)?;
    Ok(Value::str(args[0].type_name()))
}

/// `to_base(value, digits)` — renders an integer using the digit alphabet;
/// the base is the alphabet length.
fn builtin_to_base(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_base", args, 2)?;
    let value = int_arg("to_base", args, 0)?;
    let digits = str_arg("to_base", args, 1)?;
    let alphabet: Vec<char> = digits.chars().collect();
    if alphabet.len() < 2 {
        return Err(UdonError::host("to_base expects at least 2 digit characters"));
    }
    let base = alphabet.len() as i64;
    let negative = value < 0;
    let mut remaining = value.unsigned_abs();
    let mut out = String::new();
    loop {
        let digit = (remaining % base as u64) as usize;
        out.insert(0, alphabet[digit]);
        remaining /= base as u64;
        if remaining == 0 {
            break;
        }
    }
    if negative {
        out.insert(0, '-');
    }
    Ok(Value::str(&out))
}

fn builtin_from_base(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("from_base", args, 2)?;
    let text = str_arg("from_base", args, 0)?;
    let digits = str_arg("from_base", args, 1)?;
    let alphabet: Vec<char> = digits.chars().collect();
    if alphabet.len() < 2 {
        return Err(UdonError::host("from_base expects at least 2 digit characters"));
    }
    let base = alphabet.len() as i64;
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut value: i64 = 0;
    for c in body.chars() {
        let Some(digit) = alphabet.iter().position(|&d| d == c) else {
            return Err(UdonError::host(format!("from_base: invalid digit '{c}'")));
        };
        value = value.wrapping_mul(base).wrapping_add(digit as i64);
    }
    Ok(Value::Int(if negative { -value } else { value }))
}

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_builtin("split", "s:string, delim:string", "array", builtin_split);
    interp.register_builtin("join", "arr:array, delim:string", "string", builtin_join);
    interp.register_builtin("substr", "s:string, start:int, count:int", "string", builtin_substr);
    interp.register_builtin("replace", "s:string, old:string, new:string, count?:int", "string", builtin_replace);
    interp.register_builtin("starts_with", "s:string, prefix:string", "bool", builtin_starts_with);
    interp.register_builtin("ends_with", "s:string, suffix:string", "bool", builtin_ends_with);
    interp.register_builtin("find", "s:string, needle:string, start?:int", "int", builtin_find);
    interp.register_builtin("ord", "s:string", "int", builtin_ord);
    interp.register_builtin("chr", "code:int", "string", builtin_chr);
    interp.register_builtin("to_upper", "s:string", "string", builtin_to_upper);
    interp.register_builtin("to_lower", "s:string", "string", builtin_to_lower);
    interp.register_builtin("trim", "s:string", "string", builtin_trim);
    interp.register_builtin("concat", "parts:any...", "string", builtin_concat);
    interp.register_builtin("to_htmlsafe", "s:string", "string", builtin_to_htmlsafe);

    interp.register_builtin("to_int", "value:any", "int", builtin_to_int);
    interp.register_builtin("to_float", "value:any", "float", builtin_to_float);
    interp.register_builtin("to_string", "value:any", "string", builtin_to_string);
    interp.register_builtin("to_bool", "value:any", "bool", builtin_to_bool);
    interp.register_builtin("typeof", "value:any", "string", builtin_typeof);
    interp.register_builtin("to_base", "value:int, digits:string", "string", builtin_to_base);
    interp.register_builtin("from_base", "value:string, digits:string", "int", builtin_from_base);
}

//! JSON, base64, URI and digest builtins.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest as _, Md5};
use sha1::Sha1;
use sha2::Sha256;

use crate::{
    array::{MapKey, OrderedMap},
    builtins::{NamedArgs, expect_exact, str_arg},
    error::{UdonError, UdonResult},
    heap::{ArrayId, Heap},
    interp::Interpreter,
    value::Value,
};

// ----- JSON --------------------------------------------------------------

/// Serializes a value to `serde_json::Value`. Arrays always become JSON
/// objects with stringified keys, in insertion order. Cycles are an error.
fn to_json_value(value: &Value, heap: &Heap, path: &mut Vec<ArrayId>) -> UdonResult<serde_json::Value> {
    Ok(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Function(id) => serde_json::Value::String(format!("<function:{}>", heap.closure(*id).name)),
        Value::Array(id) => {
            if path.contains(id) {
                return Err(UdonError::host("to_json: cannot serialize cyclic array"));
            }
            path.push(*id);
            let mut object = serde_json::Map::new();
            for (key, entry) in heap.array(*id).iter() {
                object.insert(key.display(), to_json_value(entry, heap, path)?);
            }
            path.pop();
            serde_json::Value::Object(object)
        }
    })
}

fn from_json_value(value: serde_json::Value, heap: &mut Heap) -> Value {
    match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::str(&s),
        serde_json::Value::Array(items) => {
            let mut map = OrderedMap::new();
            for (index, item) in items.into_iter().enumerate() {
                let item = from_json_value(item, heap);
                map.set(MapKey::Int(index as i64), item);
            }
            Value::Array(heap.alloc_array(map))
        }
        serde_json::Value::Object(object) => {
            let mut map = OrderedMap::new();
            for (key, item) in object {
                let item = from_json_value(item, heap);
                map.set(MapKey::str(&key), item);
            }
            Value::Array(heap.alloc_array(map))
        }
    }
}

fn builtin_to_json(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_json", args, 1)?;
    let mut path = Vec::new();
    let json = to_json_value(&args[0], &interp.heap, &mut path)?;
    Ok(Value::str(&json.to_string()))
}

fn builtin_from_json(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("from_json", args, 1)?;
    let text = str_arg("from_json", args, 0)?;
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|e| UdonError::host(format!("from_json: {e}")))?;
    Ok(from_json_value(parsed, &mut interp.heap))
}

// ----- base64 and URI ----------------------------------------------------

fn builtin_to_base64(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_base64", args, 1)?;
    Ok(Value::str(&BASE64.encode(str_arg("to_base64", args, 0)?)))
}

fn builtin_from_base64(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("from_base64", args, 1)?;
    let bytes = BASE64
        .decode(str_arg("from_base64", args, 0)?)
        .map_err(|e| UdonError::host(format!("from_base64: {e}")))?;
    Ok(Value::str(&String::from_utf8_lossy(&bytes)))
}

fn is_uri_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

fn builtin_to_uri(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("to_uri", args, 1)?;
    let text = str_arg("to_uri", args, 0)?;
    let mut out = String::with_capacity(text.len());
    for &byte in text.as_bytes() {
        if is_uri_unreserved(byte) {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    Ok(Value::str(&out))
}

fn builtin_from_uri(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("from_uri", args, 1)?;
    let text = str_arg("from_uri", args, 0)?;
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    Ok(Value::str(&String::from_utf8_lossy(&out)))
}

// ----- digests -----------------------------------------------------------

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn builtin_crc32(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("crc32", args, 1)?;
    let mut crc = flate2::Crc::new();
    crc.update(str_arg("crc32", args, 0)?.as_bytes());
    Ok(Value::str(&format!("{:08x}", crc.sum())))
}

fn builtin_md5(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("md5", args, 1)?;
    let digest = Md5::digest(str_arg("md5", args, 0)?.as_bytes());
    Ok(Value::str(&hex_string(&digest)))
}

fn builtin_sha1(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("sha1", args, 1)?;
    let digest = Sha1::digest(str_arg("sha1", args, 0)?.as_bytes());
    Ok(Value::str(&hex_string(&digest)))
}

fn builtin_sha256(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("sha256", args, 1)?;
    let digest = Sha256::digest(str_arg("sha256", args, 0)?.as_bytes());
    Ok(Value::str(&hex_string(&digest)))
}

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_builtin("to_json", "value:any", "string", builtin_to_json);
    interp.register_builtin("from_json", "s:string", "any", builtin_from_json);
    interp.register_builtin("to_base64", "s:string", "string", builtin_to_base64);
    interp.register_builtin("from_base64", "s:string", "string", builtin_from_base64);
    interp.register_builtin("to_uri", "s:string", "string", builtin_to_uri);
    interp.register_builtin("from_uri", "s:string", "string", builtin_from_uri);
    interp.register_builtin("crc32", "data:string", "string", builtin_crc32);
    interp.register_builtin("md5", "data:string", "string", builtin_md5);
    interp.register_builtin("sha1", "data:string", "string", builtin_sha1);
    interp.register_builtin("sha256", "data:string", "string", builtin_sha256);
}

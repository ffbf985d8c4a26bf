//! File I/O builtins. Paths resolve relative to the host process's working
//! directory; errors surface as host errors with the OS message attached.

use crate::{
    builtins::{NamedArgs, expect_exact, str_arg},
    error::{UdonError, UdonResult},
    interp::Interpreter,
    value::Value,
};

fn builtin_read_entire_file(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("read_entire_file", args, 1)?;
    let path = str_arg("read_entire_file", args, 0)?;
    let content = std::fs::read(path).map_err(|e| UdonError::host(format!("read_entire_file: '{path}': {e}")))?;
    Ok(Value::str(&String::from_utf8_lossy(&content)))
}

fn builtin_write_entire_file(interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("write_entire_file", args, 2)?;
    let path = str_arg("write_entire_file", args, 0)?;
    let data = args[1].display(&interp.heap);
    std::fs::write(path, data).map_err(|e| UdonError::host(format!("write_entire_file: '{path}': {e}")))?;
    Ok(Value::None)
}

fn builtin_file_size(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("file_size", args, 1)?;
    let path = str_arg("file_size", args, 0)?;
    let metadata = std::fs::metadata(path).map_err(|e| UdonError::host(format!("file_size: '{path}': {e}")))?;
    Ok(Value::Int(metadata.len() as i64))
}

fn builtin_file_time(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    expect_exact("file_time", args, 1)?;
    let path = str_arg("file_time", args, 0)?;
    let metadata = std::fs::metadata(path).map_err(|e| UdonError::host(format!("file_time: '{path}': {e}")))?;
    let seconds = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(Value::Int(seconds as i64))
}

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_builtin("read_entire_file", "path:string", "string", builtin_read_entire_file);
    interp.register_builtin("write_entire_file", "path:string, data:any", "none", builtin_write_entire_file);
    interp.register_builtin("file_size", "path:string", "int", builtin_file_size);
    interp.register_builtin("file_time", "path:string", "int", builtin_file_time);

    interp.register_alias("load_from_file", "read_entire_file");
    interp.register_alias("save_to_file", "write_entire_file");
}

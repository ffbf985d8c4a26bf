//! Numeric and bitwise builtins.
//!
//! Unary and binary math functions follow the language's promotion rule:
//! all-integer operands produce an integer result (the float result is
//! truncated back), any float operand produces a float.

use crate::{
    builtins::{NamedArgs, int_arg, num_arg},
    error::{UdonError, UdonResult},
    interp::Interpreter,
    value::Value,
};

fn wrap_unary(result: f64, operand: &Value) -> Value {
    if operand.is_int_like() {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    }
}

fn wrap_binary(result: f64, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_int_like() && rhs.is_int_like() {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    }
}

macro_rules! unary_math {
    ($fn_name:ident, $name:literal, $op:path) => {
        fn $fn_name(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
            if args.len() != 1 {
                return Err(UdonError::host(concat!($name, " expects 1 numeric argument")));
            }
            let x = num_arg($name, args, 0)?;
            Ok(wrap_unary($op(x), &args[0]))
        }
    };
}

macro_rules! binary_math {
    ($fn_name:ident, $name:literal, $op:path) => {
        fn $fn_name(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
            if args.len() != 2 {
                return Err(UdonError::host(concat!($name, " expects 2 numeric arguments")));
            }
            let a = num_arg($name, args, 0)?;
            let b = num_arg($name, args, 1)?;
            Ok(wrap_binary($op(a, b), &args[0], &args[1]))
        }
    };
}

unary_math!(builtin_abs, "abs", f64::abs);
unary_math!(builtin_floor, "floor", f64::floor);
unary_math!(builtin_ceil, "ceil", f64::ceil);
unary_math!(builtin_round, "round", f64::round);
unary_math!(builtin_sqrt, "sqrt", f64::sqrt);
unary_math!(builtin_sin, "sin", f64::sin);
unary_math!(builtin_cos, "cos", f64::cos);
unary_math!(builtin_tan, "tan", f64::tan);
unary_math!(builtin_exp, "exp", f64::exp);
unary_math!(builtin_log, "log", f64::ln);

binary_math!(builtin_pow, "pow", f64::powf);
binary_math!(builtin_atan2, "atan2", f64::atan2);
binary_math!(builtin_min, "min", f64::min);
binary_math!(builtin_max, "max", f64::max);

fn bit_operands(name: &str, args: &[Value]) -> UdonResult<(i64, i64)> {
    if args.len() != 2 {
        return Err(UdonError::host(format!("{name} expects 2 integer arguments")));
    }
    Ok((int_arg(name, args, 0)?, int_arg(name, args, 1)?))
}

fn builtin_bit_and(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let (a, b) = bit_operands("bit_and", args)?;
    Ok(Value::Int(a & b))
}

fn builtin_bit_or(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let (a, b) = bit_operands("bit_or", args)?;
    Ok(Value::Int(a | b))
}

fn builtin_bit_xor(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let (a, b) = bit_operands("bit_xor", args)?;
    Ok(Value::Int(a ^ b))
}

fn builtin_bit_shl(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let (a, b) = bit_operands("bit_shl", args)?;
    Ok(Value::Int(a.wrapping_shl(b as u32)))
}

fn builtin_bit_shr(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    let (a, b) = bit_operands("bit_shr", args)?;
    Ok(Value::Int(a.wrapping_shr(b as u32)))
}

fn builtin_bit_not(_interp: &mut Interpreter, args: &[Value], _named: &NamedArgs) -> UdonResult<Value> {
    if args.len() != 1 {
        return Err(UdonError::host("bit_not expects 1 integer argument"));
    }
    Ok(Value::Int(!int_arg("bit_not", args, 0)?))
}

pub(super) fn register(interp: &mut Interpreter) {
    interp.register_builtin("abs", "x:number", "number", builtin_abs);
    interp.register_builtin("floor", "x:number", "number", builtin_floor);
    interp.register_builtin("ceil", "x:number", "number", builtin_ceil);
    interp.register_builtin("round", "x:number", "number", builtin_round);
    interp.register_builtin("sqrt", "x:number", "number", builtin_sqrt);
    interp.register_builtin("sin", "x:number", "number", builtin_sin);
    interp.register_builtin("cos", "x:number", "number", builtin_cos);
    interp.register_builtin("tan", "x:number", "number", builtin_tan);
    interp.register_builtin("exp", "x:number", "number", builtin_exp);
    interp.register_builtin("log", "x:number", "number", builtin_log);

    interp.register_builtin("pow", "a:number, b:number", "number", builtin_pow);
    interp.register_builtin("atan2", "a:number, b:number", "number", builtin_atan2);
    interp.register_builtin("min", "a:number, b:number", "number", builtin_min);
    interp.register_builtin("max", "a:number, b:number", "number", builtin_max);

    interp.register_builtin("bit_and", "a:int, b:int", "int", builtin_bit_and);
    interp.register_builtin("bit_or", "a:int, b:int", "int", builtin_bit_or);
    interp.register_builtin("bit_xor", "a:int, b:int", "int", builtin_bit_xor);
    interp.register_builtin("bit_shl", "a:int, b:int", "int", builtin_bit_shl);
    interp.register_builtin("bit_shr", "a:int, b:int", "int", builtin_bit_shr);
    interp.register_builtin("bit_not", "x:int", "int", builtin_bit_not);
}

#![doc = include_str!("../../../README.md")]

mod array;
mod builtins;
mod compiler;
mod error;
mod heap;
mod interp;
mod io;
mod ir;
mod lexer;
mod lower;
mod repl;
mod value;
mod vm;

pub use crate::{
    array::{MapKey, OrderedMap},
    builtins::{BuiltinEntry, BuiltinFn, NamedArgs, NativeHandler},
    error::{ErrorKind, UdonError, UdonResult},
    heap::{ArrayId, ClosureId, GcStats, Heap},
    interp::Interpreter,
    io::{CollectPrint, PrintWriter, StdPrint},
    lexer::{LexOutput, Token, TokenKind, tokenize},
    repl::{ReplOutcome, ReplSession},
    value::Value,
};

//! Stack-shaped intermediate representation emitted by the compiler.
//!
//! This is the first of the two bytecodes: operands travel on an implicit
//! evaluation stack and jump targets are instruction indices within the
//! same function. The lowerer translates this form 1:1 into the
//! register/slot form that the VM executes (`crate::lower`), so indices
//! stay valid across the translation.

use std::{fmt, rc::Rc};

use crate::value::{BinaryOp, CompareOp, Literal};

/// Key operand of `GET_PROP` / `STORE_PROP`.
///
/// `Index` is the reserved `"[index]"` form: the key is not encoded in the
/// instruction but taken from the evaluation stack.
#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    Named(Literal),
    Index,
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(lit) => write!(f, "{lit}"),
            Self::Index => write!(f, "[index]"),
        }
    }
}

/// One stack-IR operation.
#[derive(Debug, Clone, PartialEq)]
pub enum StackOp {
    Nop,
    /// Push a constant.
    PushLiteral(Literal),
    /// Push the value of a local slot; depth counts enclosing function
    /// activations (0 = current).
    LoadLocal { depth: u16, slot: u16 },
    /// Pop into a local slot.
    StoreLocal { depth: u16, slot: u16 },
    /// Push a global by name (missing global reads as `none`).
    LoadGlobal(Rc<str>),
    /// Pop into a global by name.
    StoreGlobal(Rc<str>),
    /// Begin a lexical block scope declaring `count` locals. Runtime no-op;
    /// kept for the disassembly and for scope bookkeeping audits.
    EnterScope(u16),
    ExitScope,
    /// Pop two, push the arithmetic/concat result.
    Binary(BinaryOp),
    /// Pop two, push a bool.
    Compare(CompareOp),
    /// Pop one, push its numeric negation.
    Negate,
    /// Pop one, push its truthiness as a bool.
    ToBool,
    /// Pop one bool, push the inverse.
    Not,
    /// Unconditional jump to an instruction index in this function.
    Jump(u32),
    /// Pop a condition; jump when falsy.
    JumpIfFalse(u32),
    /// Named form pops the object; `[index]` form pops index then object.
    GetProp(PropKey),
    /// Named form pops value then object; `[index]` form pops value, index,
    /// then object. Writes through the object handle.
    StoreProp(PropKey),
    /// Push a Function value capturing the current environment.
    MakeClosure(Rc<str>),
    /// Call with `argc` stack arguments. `name: None` is the dynamic form:
    /// the callable was pushed below the arguments. `arg_names` (when
    /// non-empty) parallels the arguments; `None` entries are positional.
    Call {
        name: Option<Rc<str>>,
        argc: u16,
        arg_names: Vec<Option<Rc<str>>>,
    },
    /// Pop the result and leave the function.
    Return,
    /// Discard the top of stack.
    Pop,
}

/// A stack-IR instruction with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct StackInstr {
    pub op: StackOp,
    pub line: u32,
    pub column: u32,
}

/// Compiler output for one function.
#[derive(Debug, Clone)]
pub struct FunctionIr {
    pub name: Rc<str>,
    pub params: Vec<Rc<str>>,
    /// Root-frame slot of each declared parameter, parallel to `params`.
    pub param_slots: Vec<u16>,
    /// Trailing `name...` parameter, if any, with its slot.
    pub variadic: Option<(Rc<str>, u16)>,
    /// Number of declared local slots (parameters included).
    pub locals_len: u16,
    pub code: Vec<StackInstr>,
}

impl fmt::Display for StackOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "NOP"),
            Self::PushLiteral(lit) => write!(f, "PUSH {lit}"),
            Self::LoadLocal { depth, slot } => write!(f, "LOAD_LOCAL {depth}:{slot}"),
            Self::StoreLocal { depth, slot } => write!(f, "STORE_LOCAL {depth}:{slot}"),
            Self::LoadGlobal(name) => write!(f, "LOAD_GLOBAL {name}"),
            Self::StoreGlobal(name) => write!(f, "STORE_GLOBAL {name}"),
            Self::EnterScope(count) => write!(f, "ENTER_SCOPE {count}"),
            Self::ExitScope => write!(f, "EXIT_SCOPE"),
            Self::Binary(op) => write!(f, "{}", <&'static str>::from(op)),
            Self::Compare(op) => write!(f, "{}", <&'static str>::from(op)),
            Self::Negate => write!(f, "NEG"),
            Self::ToBool => write!(f, "TO_BOOL"),
            Self::Not => write!(f, "NOT"),
            Self::Jump(target) => write!(f, "JUMP {target}"),
            Self::JumpIfFalse(target) => write!(f, "JZ {target}"),
            Self::GetProp(key) => write!(f, "GET_PROP {key}"),
            Self::StoreProp(key) => write!(f, "STORE_PROP {key}"),
            Self::MakeClosure(name) => write!(f, "MAKE_CLOSURE {name}"),
            Self::Call { name, argc, arg_names } => {
                match name {
                    Some(name) => write!(f, "CALL {name} argc={argc}")?,
                    None => write!(f, "CALL <dyn> argc={argc}")?,
                }
                if arg_names.iter().any(Option::is_some) {
                    write!(f, " [")?;
                    for (i, arg_name) in arg_names.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg_name.as_deref().unwrap_or(""))?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            Self::Return => write!(f, "RETURN"),
            Self::Pop => write!(f, "POP"),
        }
    }
}

impl FunctionIr {
    /// Textual disassembly: a `function NAME(params)` header followed by one
    /// line per instruction.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = format!("function {}(", self.name);
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(param);
            if let Some((variadic, _)) = &self.variadic {
                if variadic == param {
                    out.push_str("...");
                }
            }
        }
        out.push_str(")\n");
        for (index, instr) in self.code.iter().enumerate() {
            out.push_str(&format!("  [{index}] {}\n", instr.op));
        }
        out
    }
}

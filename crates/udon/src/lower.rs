//! Lowering from the stack IR to the register/slot form the VM executes.
//!
//! The translation is strictly 1:1 — every stack instruction produces
//! exactly one register instruction — so jump targets survive unchanged.
//! A slot allocator models the evaluation stack as the tail of the frame:
//! slots below `locals_len` are the declared locals, higher slots are
//! transient temporaries. At control-flow joins the depth entering the join
//! must equal the minimum depth recorded by any predecessor jump; the
//! allocator is reset to that minimum when translation reaches the target.

use std::{fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    error::{ErrorKind, UdonError, UdonResult},
    ir::{FunctionIr, PropKey, StackInstr, StackOp},
    value::{BinaryOp, CompareOp, Literal},
};

/// A register operand: `depth` counts enclosing function activations
/// through the environment chain (0 = the current frame), `index` is the
/// slot within that frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub depth: u16,
    pub index: u16,
}

impl Slot {
    #[must_use]
    pub(crate) fn local(index: u16) -> Self {
        Self { depth: 0, index }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.depth, self.index)
    }
}

/// Call operands, boxed to keep `RegOp` small.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOp {
    pub dst: Slot,
    /// Callee name; `None` is the dynamic form using `callable`.
    pub name: Option<Rc<str>>,
    pub argc: u16,
    /// First argument slot; arguments are contiguous.
    pub arg_base: Slot,
    /// Slot holding the callable for the dynamic form.
    pub callable: Option<Slot>,
    /// Keyword names parallel to the arguments; `None` = positional.
    pub arg_names: Vec<Option<Rc<str>>>,
}

/// One register-form operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RegOp {
    Nop,
    /// Evaluation-stack bookkeeping only; no runtime effect.
    Pop,
    Move { dst: Slot, src: Slot },
    LoadK { dst: Slot, literal: Literal },
    LoadGlobal { dst: Slot, name: Rc<str> },
    StoreGlobal { name: Rc<str>, src: Slot },
    Binary { op: BinaryOp, dst: Slot, a: Slot, b: Slot },
    Compare { op: CompareOp, dst: Slot, a: Slot, b: Slot },
    Negate { dst: Slot, a: Slot },
    ToBool { dst: Slot, a: Slot },
    Not { dst: Slot, a: Slot },
    GetProp { dst: Slot, obj: Slot, key: Literal },
    GetIndex { dst: Slot, obj: Slot, index: Slot },
    SetProp { obj: Slot, key: Literal, value: Slot },
    SetIndex { obj: Slot, index: Slot, value: Slot },
    MakeClosure { dst: Slot, name: Rc<str> },
    Jump { target: u32 },
    JumpIfFalse { cond: Slot, target: u32 },
    Call(Box<CallOp>),
    Return { src: Slot },
}

/// A register instruction with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct RegInstr {
    pub op: RegOp,
    pub line: u32,
    pub column: u32,
}

/// A fully compiled function: the stack IR it was built from, the lowered
/// register code the VM runs, and the frame layout.
#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub params: Vec<Rc<str>>,
    pub param_slots: Vec<u16>,
    pub variadic: Option<(Rc<str>, u16)>,
    /// Declared locals (parameters included); also the environment size.
    pub locals_len: u16,
    /// Total frame size: locals plus the deepest transient stack observed.
    pub frame_size: u16,
    pub stack_code: Vec<StackInstr>,
    pub code: Vec<RegInstr>,
}

/// Models the transient evaluation stack appended to the frame.
struct SlotAllocator {
    next: u16,
    max: u16,
}

impl SlotAllocator {
    fn new(locals_len: u16) -> Self {
        Self {
            next: locals_len,
            max: locals_len,
        }
    }

    fn push(&mut self) -> u16 {
        let slot = self.next;
        self.next += 1;
        self.max = self.max.max(self.next);
        slot
    }

    fn pop(&mut self) -> u16 {
        if self.next == 0 {
            return 0;
        }
        self.next -= 1;
        self.next
    }

    fn peek(&self) -> u16 {
        self.next.saturating_sub(1)
    }
}

/// Lowers one function. Fails only on malformed input (an out-of-range jump
/// or an argument count deeper than the stack), which indicates a compiler
/// bug rather than a user error.
pub(crate) fn lower_function(ir: FunctionIr) -> UdonResult<Function> {
    let code_len = ir.code.len();
    let mut slots = SlotAllocator::new(ir.locals_len);
    let mut code = Vec::with_capacity(code_len);
    // Pending evaluation-stack depths for forward join points, min-merged.
    let mut join_depths: AHashMap<usize, u16> = AHashMap::new();

    for (ip, instr) in ir.code.iter().enumerate() {
        if let Some(&depth) = join_depths.get(&ip) {
            slots.next = depth;
            slots.max = slots.max.max(depth);
        }

        let op = translate(instr, &mut slots, code_len)?;
        code.push(RegInstr {
            op,
            line: instr.line,
            column: instr.column,
        });

        if let StackOp::Jump(target) | StackOp::JumpIfFalse(target) = instr.op {
            let target = target as usize;
            let depth_after = slots.next;
            join_depths
                .entry(target)
                .and_modify(|d| *d = (*d).min(depth_after))
                .or_insert(depth_after);
        }
    }

    Ok(Function {
        name: ir.name,
        params: ir.params,
        param_slots: ir.param_slots,
        variadic: ir.variadic,
        locals_len: ir.locals_len,
        frame_size: slots.max,
        stack_code: ir.code,
        code,
    })
}

fn lower_bug(instr: &StackInstr, message: impl Into<String>) -> UdonError {
    UdonError::new(ErrorKind::Lower, instr.line, instr.column, message)
}

fn check_target(instr: &StackInstr, target: u32, code_len: usize) -> UdonResult<u32> {
    if (target as usize) > code_len {
        return Err(lower_bug(instr, format!("Jump target {target} out of range")));
    }
    Ok(target)
}

fn translate(instr: &StackInstr, slots: &mut SlotAllocator, code_len: usize) -> UdonResult<RegOp> {
    let op = match &instr.op {
        StackOp::Nop | StackOp::EnterScope(_) | StackOp::ExitScope => RegOp::Nop,
        StackOp::Pop => {
            slots.pop();
            RegOp::Pop
        }
        StackOp::PushLiteral(literal) => RegOp::LoadK {
            dst: Slot::local(slots.push()),
            literal: literal.clone(),
        },
        StackOp::LoadLocal { depth, slot } => RegOp::Move {
            dst: Slot::local(slots.push()),
            src: Slot {
                depth: *depth,
                index: *slot,
            },
        },
        StackOp::StoreLocal { depth, slot } => {
            let src = slots.pop();
            RegOp::Move {
                dst: Slot {
                    depth: *depth,
                    index: *slot,
                },
                src: Slot::local(src),
            }
        }
        StackOp::LoadGlobal(name) => RegOp::LoadGlobal {
            dst: Slot::local(slots.push()),
            name: Rc::clone(name),
        },
        StackOp::StoreGlobal(name) => {
            let src = slots.pop();
            RegOp::StoreGlobal {
                name: Rc::clone(name),
                src: Slot::local(src),
            }
        }
        StackOp::Binary(op) => {
            let b = slots.pop();
            let a = slots.pop();
            RegOp::Binary {
                op: *op,
                dst: Slot::local(slots.push()),
                a: Slot::local(a),
                b: Slot::local(b),
            }
        }
        StackOp::Compare(op) => {
            let b = slots.pop();
            let a = slots.pop();
            RegOp::Compare {
                op: *op,
                dst: Slot::local(slots.push()),
                a: Slot::local(a),
                b: Slot::local(b),
            }
        }
        StackOp::Negate => {
            let a = slots.pop();
            RegOp::Negate {
                dst: Slot::local(slots.push()),
                a: Slot::local(a),
            }
        }
        StackOp::ToBool => {
            let a = slots.pop();
            RegOp::ToBool {
                dst: Slot::local(slots.push()),
                a: Slot::local(a),
            }
        }
        StackOp::Not => {
            let a = slots.pop();
            RegOp::Not {
                dst: Slot::local(slots.push()),
                a: Slot::local(a),
            }
        }
        StackOp::GetProp(PropKey::Named(key)) => {
            let obj = slots.pop();
            RegOp::GetProp {
                dst: Slot::local(slots.push()),
                obj: Slot::local(obj),
                key: key.clone(),
            }
        }
        StackOp::GetProp(PropKey::Index) => {
            let index = slots.pop();
            let obj = slots.pop();
            RegOp::GetIndex {
                dst: Slot::local(slots.push()),
                obj: Slot::local(obj),
                index: Slot::local(index),
            }
        }
        StackOp::StoreProp(PropKey::Named(key)) => {
            let value = slots.pop();
            let obj = slots.pop();
            RegOp::SetProp {
                obj: Slot::local(obj),
                key: key.clone(),
                value: Slot::local(value),
            }
        }
        StackOp::StoreProp(PropKey::Index) => {
            let value = slots.pop();
            let index = slots.pop();
            let obj = slots.pop();
            RegOp::SetIndex {
                obj: Slot::local(obj),
                index: Slot::local(index),
                value: Slot::local(value),
            }
        }
        StackOp::MakeClosure(name) => RegOp::MakeClosure {
            dst: Slot::local(slots.push()),
            name: Rc::clone(name),
        },
        StackOp::Jump(target) => RegOp::Jump {
            target: check_target(instr, *target, code_len)?,
        },
        StackOp::JumpIfFalse(target) => {
            let cond = slots.pop();
            RegOp::JumpIfFalse {
                cond: Slot::local(cond),
                target: check_target(instr, *target, code_len)?,
            }
        }
        StackOp::Call { name, argc, arg_names } => {
            let arg_base = slots
                .next
                .checked_sub(*argc)
                .ok_or_else(|| lower_bug(instr, "Call argument count exceeds stack depth"))?;
            slots.next = arg_base;
            let callable = if name.is_none() {
                Some(Slot::local(slots.pop()))
            } else {
                None
            };
            RegOp::Call(Box::new(CallOp {
                dst: Slot::local(slots.push()),
                name: name.clone(),
                argc: *argc,
                arg_base: Slot::local(arg_base),
                callable,
                arg_names: arg_names.clone(),
            }))
        }
        StackOp::Return => RegOp::Return {
            src: Slot::local(slots.peek()),
        },
    };
    Ok(op)
}

impl fmt::Display for RegOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "NOP"),
            Self::Pop => write!(f, "POP"),
            Self::Move { dst, src } => write!(f, "MOVE dst={dst} src={src}"),
            Self::LoadK { dst, literal } => write!(f, "LOADK dst={dst} lit={literal}"),
            Self::LoadGlobal { dst, name } => write!(f, "LOAD_GLOBAL dst={dst} {name}"),
            Self::StoreGlobal { name, src } => write!(f, "STORE_GLOBAL {name} src={src}"),
            Self::Binary { op, dst, a, b } => {
                write!(f, "{} dst={dst} a={a} b={b}", <&'static str>::from(op))
            }
            Self::Compare { op, dst, a, b } => {
                write!(f, "{} dst={dst} a={a} b={b}", <&'static str>::from(op))
            }
            Self::Negate { dst, a } => write!(f, "NEG dst={dst} a={a}"),
            Self::ToBool { dst, a } => write!(f, "TO_BOOL dst={dst} a={a}"),
            Self::Not { dst, a } => write!(f, "NOT dst={dst} a={a}"),
            Self::GetProp { dst, obj, key } => write!(f, "GET_PROP dst={dst} obj={obj} key={key}"),
            Self::GetIndex { dst, obj, index } => write!(f, "GET_INDEX dst={dst} obj={obj} idx={index}"),
            Self::SetProp { obj, key, value } => write!(f, "SET_PROP obj={obj} key={key} src={value}"),
            Self::SetIndex { obj, index, value } => write!(f, "SET_INDEX obj={obj} idx={index} src={value}"),
            Self::MakeClosure { dst, name } => write!(f, "MAKE_CLOSURE dst={dst} {name}"),
            Self::Jump { target } => write!(f, "JUMP {target}"),
            Self::JumpIfFalse { cond, target } => write!(f, "JZ cond={cond} {target}"),
            Self::Call(call) => {
                match &call.name {
                    Some(name) => write!(f, "CALL {name}")?,
                    None => write!(f, "CALL <dyn>")?,
                }
                write!(f, " argc={} base={} dst={}", call.argc, call.arg_base, call.dst)?;
                if let Some(callable) = call.callable {
                    write!(f, " callable={callable}")?;
                }
                Ok(())
            }
            Self::Return { src } => write!(f, "RETURN src={src}"),
        }
    }
}

impl Function {
    /// Disassembly of the lowered register form.
    #[must_use]
    pub fn disassemble_lowered(&self) -> String {
        let mut out = format!("function {}(frame_size={})\n", self.name, self.frame_size);
        for (index, instr) in self.code.iter().enumerate() {
            out.push_str(&format!("  [{index}] {}\n", instr.op));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: StackOp) -> StackInstr {
        StackInstr { op, line: 1, column: 1 }
    }

    fn lower(locals_len: u16, ops: Vec<StackOp>) -> Function {
        lower_function(FunctionIr {
            name: Rc::from("test"),
            params: vec![],
            param_slots: vec![],
            variadic: None,
            locals_len,
            code: ops.into_iter().map(instr).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_one_to_one_translation() {
        let func = lower(
            1,
            vec![
                StackOp::EnterScope(1),
                StackOp::PushLiteral(Literal::Int(1)),
                StackOp::StoreLocal { depth: 0, slot: 0 },
                StackOp::ExitScope,
            ],
        );
        assert_eq!(func.code.len(), 4);
        assert_eq!(func.code[0].op, RegOp::Nop);
        assert_eq!(
            func.code[1].op,
            RegOp::LoadK {
                dst: Slot::local(1),
                literal: Literal::Int(1)
            }
        );
        assert_eq!(
            func.code[2].op,
            RegOp::Move {
                dst: Slot::local(0),
                src: Slot::local(1)
            }
        );
        assert_eq!(func.code[3].op, RegOp::Nop);
    }

    #[test]
    fn test_frame_size_tracks_watermark() {
        // locals=2, three pushes before any pop -> frame 5
        let func = lower(
            2,
            vec![
                StackOp::PushLiteral(Literal::Int(1)),
                StackOp::PushLiteral(Literal::Int(2)),
                StackOp::PushLiteral(Literal::Int(3)),
                StackOp::Pop,
                StackOp::Pop,
                StackOp::Pop,
            ],
        );
        assert_eq!(func.frame_size, 5);
    }

    #[test]
    fn test_binary_pops_two_pushes_one() {
        let func = lower(
            0,
            vec![
                StackOp::PushLiteral(Literal::Int(1)),
                StackOp::PushLiteral(Literal::Int(2)),
                StackOp::Binary(BinaryOp::Add),
                StackOp::Return,
            ],
        );
        assert_eq!(
            func.code[2].op,
            RegOp::Binary {
                op: BinaryOp::Add,
                dst: Slot::local(0),
                a: Slot::local(0),
                b: Slot::local(1)
            }
        );
        assert_eq!(func.code[3].op, RegOp::Return { src: Slot::local(0) });
    }

    #[test]
    fn test_join_depth_takes_predecessor_minimum() {
        // if-shaped flow: JZ over a push; the join after the jump must
        // resume at the minimum predecessor depth.
        let func = lower(
            0,
            vec![
                StackOp::PushLiteral(Literal::Bool(true)), // depth 1
                StackOp::JumpIfFalse(4),                   // depth 0, join(4) = 0
                StackOp::PushLiteral(Literal::Int(1)),     // depth 1
                StackOp::Pop,                              // depth 0
                StackOp::PushLiteral(Literal::Int(9)),     // join: resumes at 0
            ],
        );
        assert_eq!(
            func.code[4].op,
            RegOp::LoadK {
                dst: Slot::local(0),
                literal: Literal::Int(9)
            }
        );
    }

    #[test]
    fn test_ternary_branches_unify() {
        // cond ? 1 : 2 — both arms leave exactly one value at the same slot.
        let func = lower(
            0,
            vec![
                StackOp::PushLiteral(Literal::Bool(true)), // 0: depth 1
                StackOp::JumpIfFalse(4),                   // 1: depth 0
                StackOp::PushLiteral(Literal::Int(1)),     // 2: depth 1
                StackOp::Jump(5),                          // 3: join(5)=1
                StackOp::PushLiteral(Literal::Int(2)),     // 4: entered at 0 -> depth 1
                StackOp::Return,                           // 5: entered at min(1,1)=1
            ],
        );
        let RegOp::LoadK { dst: then_dst, .. } = func.code[2].op.clone() else {
            panic!("expected LoadK");
        };
        let RegOp::LoadK { dst: else_dst, .. } = func.code[4].op.clone() else {
            panic!("expected LoadK");
        };
        assert_eq!(then_dst, else_dst);
        assert_eq!(func.code[5].op, RegOp::Return { src: then_dst });
    }

    #[test]
    fn test_dynamic_call_lowering() {
        let func = lower(
            1,
            vec![
                StackOp::LoadLocal { depth: 0, slot: 0 }, // callable at slot 1
                StackOp::PushLiteral(Literal::Int(5)),    // arg at slot 2
                StackOp::Call {
                    name: None,
                    argc: 1,
                    arg_names: vec![],
                },
            ],
        );
        let RegOp::Call(call) = &func.code[2].op else {
            panic!("expected Call");
        };
        assert_eq!(call.arg_base, Slot::local(2));
        assert_eq!(call.callable, Some(Slot::local(1)));
        assert_eq!(call.dst, Slot::local(1));
    }

    #[test]
    fn test_named_call_lowering() {
        let func = lower(
            0,
            vec![
                StackOp::PushLiteral(Literal::Int(1)),
                StackOp::PushLiteral(Literal::Int(2)),
                StackOp::Call {
                    name: Some(Rc::from("pow")),
                    argc: 2,
                    arg_names: vec![],
                },
            ],
        );
        let RegOp::Call(call) = &func.code[2].op else {
            panic!("expected Call");
        };
        assert_eq!(call.arg_base, Slot::local(0));
        assert_eq!(call.callable, None);
        assert_eq!(call.dst, Slot::local(0));
    }

    #[test]
    fn test_jump_out_of_range_is_lower_error() {
        let result = lower_function(FunctionIr {
            name: Rc::from("bad"),
            params: vec![],
            param_slots: vec![],
            variadic: None,
            locals_len: 0,
            code: vec![instr(StackOp::Jump(99))],
        });
        assert_eq!(result.unwrap_err().kind, ErrorKind::Lower);
    }

    #[test]
    fn test_scope_markers_erase_to_nop() {
        let func = lower(0, vec![StackOp::EnterScope(3), StackOp::ExitScope]);
        assert!(func.code.iter().all(|i| i.op == RegOp::Nop));
    }
}

//! Single-pass recursive-descent compiler: tokens in, stack IR out.
//!
//! Parsing and code emission are fused; there is no AST. Each function body
//! is compiled into a vector of stack instructions with forward jumps
//! patched as targets become known. Lexical scopes map names to
//! function-flat frame slots: every declaration gets a distinct slot from a
//! per-function counter, so block scoping is purely compile-time
//! visibility and `depth` in a slot address counts enclosing *function*
//! activations, not blocks.
//!
//! Top-level `var` initializers accumulate into a per-chunk initializer
//! block which the interpreter registers as a synthetic function and runs
//! once after compilation.

use std::{cell::RefCell, rc::Rc};

use ahash::{AHashMap, AHashSet};

use crate::{
    error::{ErrorKind, UdonError, UdonResult},
    ir::{FunctionIr, PropKey, StackInstr, StackOp},
    lexer::{Token, TokenKind},
    value::{BinaryOp, CompareOp, Literal},
};

/// Result of compiling one source chunk.
#[derive(Debug)]
pub(crate) struct CompileOutput {
    /// Every function compiled from the chunk, lambdas included, in
    /// definition order. Later definitions of the same name win.
    pub functions: Vec<FunctionIr>,
    /// Event registrations `("on:EVENT", function_name)` in source order.
    pub events: Vec<(String, Rc<str>)>,
    /// Globals newly declared by this chunk, in declaration order.
    pub new_globals: Vec<Rc<str>>,
    /// Initializer code for the chunk's globals (empty when none).
    pub global_init: Vec<StackInstr>,
    /// Locals used by temporaries inside the initializer block.
    pub global_init_locals: u16,
    /// Next lambda ordinal, to be carried into the next chunk.
    pub lambda_counter: u32,
    /// Next anonymous-function ordinal.
    pub anon_counter: u32,
}

type ScopeMap = Rc<RefCell<AHashMap<Rc<str>, u16>>>;

/// One lexical block scope during compilation.
struct ScopeFrame {
    map: ScopeMap,
    /// Runtime scopes emit ENTER_SCOPE/EXIT_SCOPE markers; the function
    /// root scope (parameters) does not.
    runtime: bool,
    enter_instr: usize,
    declared: u16,
}

/// Per-function compilation state.
struct FunctionCtx {
    scopes: Vec<ScopeFrame>,
    /// Scope chains of enclosing functions, innermost function first, each
    /// with its scopes innermost-first. Shared via `Rc` so declarations made
    /// while a lambda is open stay visible to it.
    enclosing: Vec<Vec<ScopeMap>>,
    next_slot: u16,
    param_slots: Vec<u16>,
    variadic: Option<(Rc<str>, u16)>,
}

impl FunctionCtx {
    fn new() -> Self {
        Self {
            scopes: Vec::new(),
            enclosing: Vec::new(),
            next_slot: 0,
            param_slots: Vec::new(),
            variadic: None,
        }
    }
}

/// A resolved variable reference.
#[derive(Debug, Clone)]
enum Resolved {
    Local { depth: u16, slot: u16 },
    Global(Rc<str>),
}

/// Loop/switch context for `break`/`continue` patching.
struct LoopCtx {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
    allow_continue: bool,
    /// Scope-stack depth to unwind to before jumping out.
    scope_depth: usize,
}

pub(crate) struct Compiler<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// Suppresses `:` postfix handling inside ternary branches.
    stop_at_colon: bool,
    /// Globals declared by earlier chunks of the same interpreter.
    known_globals: &'a AHashSet<Rc<str>>,
    /// Top-level `var` names pre-scanned from this chunk, so functions can
    /// reference globals declared later in the file.
    chunk_globals: AHashSet<String>,
    new_globals: Vec<Rc<str>>,
    functions: Vec<FunctionIr>,
    events: Vec<(String, Rc<str>)>,
    global_init: Vec<StackInstr>,
    init_ctx: FunctionCtx,
    loop_stack: Vec<LoopCtx>,
    lambda_counter: u32,
    anon_counter: u32,
}

/// Compiles one chunk of tokens.
pub(crate) fn compile(
    tokens: &[Token],
    known_globals: &AHashSet<Rc<str>>,
    lambda_counter: u32,
    anon_counter: u32,
) -> UdonResult<CompileOutput> {
    let mut init_ctx = FunctionCtx::new();
    init_ctx.scopes.push(ScopeFrame {
        map: Rc::new(RefCell::new(AHashMap::new())),
        runtime: false,
        enter_instr: usize::MAX,
        declared: 0,
    });

    let mut compiler = Compiler {
        tokens,
        pos: 0,
        stop_at_colon: false,
        known_globals,
        chunk_globals: collect_top_level_globals(tokens),
        new_globals: Vec::new(),
        functions: Vec::new(),
        events: Vec::new(),
        global_init: Vec::new(),
        init_ctx,
        loop_stack: Vec::new(),
        lambda_counter,
        anon_counter,
    };
    compiler.parse_program()?;

    Ok(CompileOutput {
        functions: compiler.functions,
        events: compiler.events,
        new_globals: compiler.new_globals,
        global_init: compiler.global_init,
        global_init_locals: compiler.init_ctx.next_slot,
        lambda_counter: compiler.lambda_counter,
        anon_counter: compiler.anon_counter,
    })
}

/// Scans the token stream for `var NAME` at brace depth zero.
fn collect_top_level_globals(tokens: &[Token]) -> AHashSet<String> {
    let mut globals = AHashSet::new();
    let mut depth = 0i32;
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.kind == TokenKind::Symbol {
            match token.text.as_str() {
                "{" => depth += 1,
                "}" => depth -= 1,
                _ => {}
            }
        }
        if depth == 0
            && token.is_keyword("var")
            && tokens.get(i + 1).is_some_and(|t| t.kind == TokenKind::Identifier)
        {
            globals.insert(tokens[i + 1].text.clone());
        }
        i += 1;
    }
    globals
}

impl Compiler<'_> {
    // ----- token cursor -------------------------------------------------

    fn is_end(&self) -> bool {
        self.peek().kind == TokenKind::EndOfFile
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        let index = self.pos + offset;
        (index < self.tokens.len()).then(|| &self.tokens[index])
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_end() {
            self.pos += 1;
        }
        self.previous()
    }

    fn check_symbol(&self, text: &str) -> bool {
        self.peek().is_symbol(text)
    }

    fn match_symbol(&mut self, text: &str) -> bool {
        if self.check_symbol(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, text: &str) -> bool {
        if self.peek().is_keyword(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, token: &Token, message: impl Into<String>) -> UdonError {
        UdonError::new(ErrorKind::Parse, token.line, token.column, message)
    }

    fn error_here(&self, message: impl Into<String>) -> UdonError {
        self.error(self.peek(), message)
    }

    fn semantic_error(&self, token: &Token, message: impl Into<String>) -> UdonError {
        UdonError::new(ErrorKind::Compile, token.line, token.column, message)
    }

    fn expect_symbol(&mut self, symbol: &str, message: &str) -> UdonResult<()> {
        if self.match_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error_here(message))
        }
    }

    fn skip_semicolons(&mut self) {
        while self.match_symbol(";") {}
    }

    // ----- emission -----------------------------------------------------

    fn emit(&self, body: &mut Vec<StackInstr>, op: StackOp) {
        let token = self.previous();
        body.push(StackInstr {
            op,
            line: token.line,
            column: token.column,
        });
    }

    fn emit_at(&self, body: &mut Vec<StackInstr>, op: StackOp, token: &Token) {
        body.push(StackInstr {
            op,
            line: token.line,
            column: token.column,
        });
    }

    fn patch_jump(body: &mut [StackInstr], index: usize, target: usize) {
        let target = target as u32;
        match &mut body[index].op {
            StackOp::Jump(t) | StackOp::JumpIfFalse(t) => *t = target,
            other => unreachable!("patching non-jump {other:?}"),
        }
    }

    // ----- scopes and slots ---------------------------------------------

    fn begin_scope(&self, ctx: &mut FunctionCtx, body: &mut Vec<StackInstr>, runtime: bool) {
        let enter_instr = body.len();
        if runtime {
            self.emit(body, StackOp::EnterScope(0));
        }
        ctx.scopes.push(ScopeFrame {
            map: Rc::new(RefCell::new(AHashMap::new())),
            runtime,
            enter_instr,
            declared: 0,
        });
    }

    /// Ends a scope and returns the instruction index just past its body
    /// (the EXIT_SCOPE position), for loop-exit patching.
    fn end_scope(&self, ctx: &mut FunctionCtx, body: &mut Vec<StackInstr>) -> usize {
        let frame = ctx.scopes.pop().expect("scope underflow");
        let mut exit_index = body.len();
        if frame.runtime {
            if let StackOp::EnterScope(count) = &mut body[frame.enter_instr].op {
                *count = frame.declared;
            }
            exit_index = body.len();
            self.emit(body, StackOp::ExitScope);
        }
        exit_index
    }

    /// Emits EXIT_SCOPE for every runtime scope deeper than `target_depth`,
    /// without popping compile-time state (used by break/continue).
    fn emit_unwind_to_depth(&self, ctx: &FunctionCtx, body: &mut Vec<StackInstr>, target_depth: usize) {
        for frame in ctx.scopes.iter().skip(target_depth).rev() {
            if frame.runtime {
                self.emit(body, StackOp::ExitScope);
            }
        }
    }

    /// Declares a name in the innermost scope, allocating a fresh frame
    /// slot. Redeclaring in the same scope reuses the existing slot.
    fn declare_variable(&self, ctx: &mut FunctionCtx, name: &str) -> u16 {
        let frame = ctx.scopes.last().expect("no scope to declare in");
        if let Some(&slot) = frame.map.borrow().get(name) {
            return slot;
        }
        let slot = ctx.next_slot;
        ctx.next_slot += 1;
        frame.map.borrow_mut().insert(Rc::from(name), slot);
        let frame = ctx.scopes.last_mut().expect("no scope to declare in");
        frame.declared += 1;
        slot
    }

    /// Resolves inner→outer in the current function, then through enclosing
    /// function scope chains (depth = function hops), then globals.
    fn resolve_variable(&self, ctx: &FunctionCtx, name: &str) -> Option<Resolved> {
        for frame in ctx.scopes.iter().rev() {
            if let Some(&slot) = frame.map.borrow().get(name) {
                return Some(Resolved::Local { depth: 0, slot });
            }
        }
        for (hops, chain) in ctx.enclosing.iter().enumerate() {
            for scope in chain {
                if let Some(&slot) = scope.borrow().get(name) {
                    return Some(Resolved::Local {
                        depth: u16::try_from(hops + 1).expect("function nesting exceeds u16"),
                        slot,
                    });
                }
            }
        }
        if self.known_globals.contains(name)
            || self.new_globals.iter().any(|g| &**g == name)
            || self.chunk_globals.contains(name)
        {
            return Some(Resolved::Global(Rc::from(name)));
        }
        None
    }

    fn emit_load_var(&self, body: &mut Vec<StackInstr>, var: &Resolved) {
        match var {
            Resolved::Local { depth, slot } => self.emit(
                body,
                StackOp::LoadLocal {
                    depth: *depth,
                    slot: *slot,
                },
            ),
            Resolved::Global(name) => self.emit(body, StackOp::LoadGlobal(Rc::clone(name))),
        }
    }

    fn emit_store_var(&self, body: &mut Vec<StackInstr>, var: &Resolved) {
        match var {
            Resolved::Local { depth, slot } => self.emit(
                body,
                StackOp::StoreLocal {
                    depth: *depth,
                    slot: *slot,
                },
            ),
            Resolved::Global(name) => self.emit(body, StackOp::StoreGlobal(Rc::clone(name))),
        }
    }

    /// Declares a uniquely named temporary in the current scope.
    fn make_temp_var(&self, ctx: &mut FunctionCtx, prefix: &str) -> Resolved {
        let mut name = prefix.to_owned();
        let mut suffix = 0;
        while self.resolve_variable(ctx, &name).is_some() {
            name = format!("{prefix}_{suffix}");
            suffix += 1;
        }
        let slot = self.declare_variable(ctx, &name);
        Resolved::Local { depth: 0, slot }
    }

    // ----- top level ----------------------------------------------------

    fn parse_program(&mut self) -> UdonResult<()> {
        while !self.is_end() {
            self.skip_semicolons();
            if self.is_end() {
                break;
            }
            if self.match_keyword("function") {
                self.parse_function()?;
            } else if self.match_keyword("var") {
                self.parse_global_var()?;
            } else {
                return Err(self.error_here("Expected 'function' or 'var'"));
            }
        }
        Ok(())
    }

    fn parse_global_var(&mut self) -> UdonResult<()> {
        if self.peek().kind != TokenKind::Identifier {
            return Err(self.error_here("Expected variable name"));
        }
        let name_token = self.advance().clone();
        let name: Rc<str> = Rc::from(name_token.text.as_str());
        if self.known_globals.contains(&name) || self.new_globals.contains(&name) {
            return Err(self.semantic_error(&name_token, format!("Global '{name}' already declared")));
        }
        if self.match_symbol(":") {
            self.advance(); // type annotation, single token
        }
        self.new_globals.push(Rc::clone(&name));

        if self.match_symbol("=") {
            let mut init = std::mem::take(&mut self.global_init);
            let mut ctx = std::mem::replace(&mut self.init_ctx, FunctionCtx::new());
            self.parse_expression(&mut init, &mut ctx)?;
            self.global_init = init;
            self.init_ctx = ctx;
        } else {
            let mut init = std::mem::take(&mut self.global_init);
            self.emit(&mut init, StackOp::PushLiteral(Literal::None));
            self.global_init = init;
        }
        let mut init = std::mem::take(&mut self.global_init);
        self.emit(&mut init, StackOp::StoreGlobal(name));
        self.global_init = init;
        Ok(())
    }

    fn parse_function(&mut self) -> UdonResult<()> {
        let mut function_name = String::new();
        let mut event_target: Option<String> = None;

        if self.peek().kind == TokenKind::Identifier {
            if self.peek().text == "on" && self.peek_at(1).is_some_and(|t| t.is_symbol(":")) {
                self.advance(); // 'on'
                self.advance(); // ':'
                if self.peek().kind != TokenKind::Identifier {
                    return Err(self.error_here("Expected event name after on:"));
                }
                event_target = Some(self.advance().text.clone());
            } else {
                function_name = self.advance().text.clone();
            }
        }
        if function_name.is_empty() && event_target.is_none() {
            return Err(self.error_here("Expected function name"));
        }
        if function_name.is_empty() {
            function_name = format!("_anon_{}", self.anon_counter);
            self.anon_counter += 1;
        }

        let name: Rc<str> = Rc::from(function_name.as_str());
        let ir = self.parse_function_body(&name, None)?;
        self.functions.push(ir);
        if let Some(event) = event_target {
            self.events.push((format!("on:{event}"), name));
        }
        Ok(())
    }

    /// Parses `(params) [-> type] { body }` into a `FunctionIr`.
    ///
    /// `enclosing` supplies the captured scope chains for lambdas; top-level
    /// functions pass `None` and resolve outward only to globals.
    fn parse_function_body(&mut self, name: &Rc<str>, enclosing: Option<Vec<Vec<ScopeMap>>>) -> UdonResult<FunctionIr> {
        self.expect_symbol("(", "Expected '(' after function name")?;

        let mut params: Vec<Rc<str>> = Vec::new();
        let mut variadic_param: Option<Rc<str>> = None;
        if !self.match_symbol(")") {
            loop {
                if self.peek().kind != TokenKind::Identifier {
                    return Err(self.error_here("Expected parameter name"));
                }
                let param: Rc<str> = Rc::from(self.advance().text.as_str());
                params.push(Rc::clone(&param));
                if self.match_symbol(":") {
                    self.advance(); // type annotation, single token
                }
                if self.match_symbol("...") {
                    variadic_param = Some(param);
                    break;
                }
                if !self.match_symbol(",") {
                    break;
                }
            }
            self.expect_symbol(")", "Expected ')' after parameters")?;
        }

        if self.match_symbol("->") {
            self.advance(); // return type annotation, single token
        }

        self.expect_symbol("{", "Expected '{' to start function body")?;

        let mut body = Vec::new();
        let mut ctx = FunctionCtx::new();
        if let Some(enclosing) = enclosing {
            ctx.enclosing = enclosing;
        }
        // The root function scope holds parameters and is not a runtime scope.
        self.begin_scope(&mut ctx, &mut body, false);
        for param in &params {
            let slot = self.declare_variable(&mut ctx, param);
            ctx.param_slots.push(slot);
            if variadic_param.as_deref() == Some(&**param) {
                ctx.variadic = Some((Rc::clone(param), slot));
            }
        }

        loop {
            self.skip_semicolons();
            if self.match_symbol("}") {
                break;
            }
            if self.is_end() {
                return Err(self.error(self.previous(), "Missing closing '}'"));
            }
            self.parse_statement(&mut body, &mut ctx)?;
        }

        Ok(FunctionIr {
            name: Rc::clone(name),
            params,
            param_slots: ctx.param_slots.clone(),
            variadic: ctx.variadic.clone(),
            locals_len: ctx.next_slot,
            code: body,
        })
    }

    fn parse_function_literal(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        // Capture the enclosing scope chains: this function's scopes
        // (innermost first), then the chains it already inherited.
        let mut enclosing: Vec<Vec<ScopeMap>> = Vec::with_capacity(ctx.enclosing.len() + 1);
        enclosing.push(ctx.scopes.iter().rev().map(|f| Rc::clone(&f.map)).collect());
        enclosing.extend(ctx.enclosing.iter().cloned());

        let name: Rc<str> = Rc::from(format!("__lambda_{}", self.lambda_counter).as_str());
        self.lambda_counter += 1;

        // Loops do not extend across a function boundary.
        let saved_loops = std::mem::take(&mut self.loop_stack);
        let result = self.parse_function_body(&name, Some(enclosing));
        self.loop_stack = saved_loops;
        let ir = result?;
        self.functions.push(ir);

        self.emit(body, StackOp::MakeClosure(name));
        Ok(())
    }

    // ----- statements ---------------------------------------------------

    fn parse_block(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx, create_scope: bool) -> UdonResult<()> {
        self.expect_symbol("{", "Expected '{' to start block")?;
        if create_scope {
            self.begin_scope(ctx, body, true);
        }
        loop {
            self.skip_semicolons();
            if self.match_symbol("}") {
                break;
            }
            if self.is_end() {
                return Err(self.error(self.previous(), "Missing closing '}'"));
            }
            self.parse_statement(body, ctx)?;
        }
        if create_scope {
            self.end_scope(ctx, body);
        }
        Ok(())
    }

    fn parse_statement_or_block(
        &mut self,
        body: &mut Vec<StackInstr>,
        ctx: &mut FunctionCtx,
        create_scope: bool,
    ) -> UdonResult<()> {
        if self.check_symbol("{") {
            self.parse_block(body, ctx, create_scope)
        } else {
            self.parse_statement(body, ctx)
        }
    }

    fn parse_statement(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.skip_semicolons();
        if self.match_keyword("if") {
            return self.parse_if(body, ctx);
        }
        if self.match_keyword("while") {
            return self.parse_while(body, ctx);
        }
        if self.match_keyword("for") {
            return self.parse_for(body, ctx);
        }
        if self.match_keyword("foreach") {
            return self.parse_foreach(body, ctx);
        }
        if self.match_keyword("switch") {
            return self.parse_switch(body, ctx);
        }
        if self.match_keyword("return") {
            return self.parse_return(body, ctx);
        }
        if self.match_keyword("break") {
            let token = self.previous().clone();
            let Some(target_depth) = self.loop_stack.last().map(|l| l.scope_depth) else {
                return Err(self.semantic_error(&token, "break outside of loop/switch"));
            };
            self.emit_unwind_to_depth(ctx, body, target_depth);
            let jump = body.len();
            self.emit(body, StackOp::Jump(0));
            self.loop_stack.last_mut().expect("loop stack").break_jumps.push(jump);
            return Ok(());
        }
        if self.match_keyword("continue") {
            let token = self.previous().clone();
            if !self.loop_stack.last().is_some_and(|l| l.allow_continue) {
                return Err(self.semantic_error(&token, "continue outside of loop"));
            }
            let target_depth = self.loop_stack.last().map(|l| l.scope_depth).unwrap_or(0);
            self.emit_unwind_to_depth(ctx, body, target_depth);
            let jump = body.len();
            self.emit(body, StackOp::Jump(0));
            self.loop_stack.last_mut().expect("loop stack").continue_jumps.push(jump);
            return Ok(());
        }

        let produced = self.parse_assignment_or_expression(body, ctx)?;
        if produced {
            self.emit(body, StackOp::Pop);
        }
        Ok(())
    }

    fn parse_if(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.begin_scope(ctx, body, true);
        self.expect_symbol("(", "Expected '(' after if")?;
        self.parse_expression(body, ctx)?;
        self.expect_symbol(")", "Expected ')' after if condition")?;

        let jump_false = body.len();
        self.emit(body, StackOp::JumpIfFalse(0));

        self.parse_statement_or_block(body, ctx, false)?;

        let jump_end = body.len();
        self.emit(body, StackOp::Jump(0));
        let patch_target = body.len();
        Self::patch_jump(body, jump_false, patch_target);

        self.skip_semicolons();
        if self.match_keyword("else") {
            self.parse_statement_or_block(body, ctx, false)?;
        }
        let patch_target = body.len();
        Self::patch_jump(body, jump_end, patch_target);
        self.end_scope(ctx, body);
        Ok(())
    }

    fn parse_while(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.begin_scope(ctx, body, true);
        self.expect_symbol("(", "Expected '(' after while")?;
        let cond_index = body.len();
        self.parse_expression(body, ctx)?;
        self.expect_symbol(")", "Expected ')' after while condition")?;

        let jump_false = body.len();
        self.emit(body, StackOp::JumpIfFalse(0));

        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            allow_continue: true,
            scope_depth: ctx.scopes.len(),
        });
        self.parse_statement_or_block(body, ctx, false)?;

        let loop_ctx = self.loop_stack.pop().expect("loop stack");
        for jump in loop_ctx.continue_jumps {
            Self::patch_jump(body, jump, cond_index);
        }
        self.emit(body, StackOp::Jump(cond_index as u32));
        let exit_index = self.end_scope(ctx, body);
        Self::patch_jump(body, jump_false, exit_index);
        for jump in loop_ctx.break_jumps {
            Self::patch_jump(body, jump, exit_index);
        }
        Ok(())
    }

    fn parse_for(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.expect_symbol("(", "Expected '(' after for")?;
        self.begin_scope(ctx, body, true);

        if !self.match_symbol(";") {
            if self.match_keyword("var") {
                if self.peek().kind != TokenKind::Identifier {
                    return Err(self.error_here("Expected variable name"));
                }
                let name = self.advance().text.clone();
                self.declare_variable(ctx, &name);
                let var = self.resolve_variable(ctx, &name).expect("just declared");
                if self.match_symbol(":") {
                    self.advance();
                }
                if self.match_symbol("=") {
                    self.parse_expression(body, ctx)?;
                } else {
                    self.emit(body, StackOp::PushLiteral(Literal::None));
                }
                self.emit_store_var(body, &var);
            } else {
                let produced = self.parse_assignment_or_expression(body, ctx)?;
                if produced {
                    self.emit(body, StackOp::Pop);
                }
            }
            self.expect_symbol(";", "Expected ';' after for init")?;
        }

        let cond_index = body.len();
        if self.match_symbol(";") {
            self.emit(body, StackOp::PushLiteral(Literal::Int(1)));
        } else {
            self.parse_expression(body, ctx)?;
            self.expect_symbol(";", "Expected ';' after for condition")?;
        }
        let jump_false = body.len();
        self.emit(body, StackOp::JumpIfFalse(0));

        // The step expression appears before the body in the source but
        // runs after it, so compile it into a side buffer.
        let mut step_code: Vec<StackInstr> = Vec::new();
        if !self.match_symbol(")") {
            let produced = self.parse_assignment_or_expression(&mut step_code, ctx)?;
            if produced {
                self.emit(&mut step_code, StackOp::Pop);
            }
            self.expect_symbol(")", "Expected ')' after for increment")?;
        }

        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            allow_continue: true,
            scope_depth: ctx.scopes.len(),
        });
        self.parse_statement_or_block(body, ctx, true)?;

        let loop_ctx = self.loop_stack.pop().expect("loop stack");
        let continue_target = body.len();
        for jump in loop_ctx.continue_jumps {
            Self::patch_jump(body, jump, continue_target);
        }
        // Splice in the step code, rebasing its internal jump targets.
        let offset = body.len() as u32;
        for mut instr in step_code {
            if let StackOp::Jump(t) | StackOp::JumpIfFalse(t) = &mut instr.op {
                *t += offset;
            }
            body.push(instr);
        }
        self.emit(body, StackOp::Jump(cond_index as u32));
        let exit_index = self.end_scope(ctx, body);
        Self::patch_jump(body, jump_false, exit_index);
        for jump in loop_ctx.break_jumps {
            Self::patch_jump(body, jump, exit_index);
        }
        Ok(())
    }

    /// Desugars `foreach (var k[, v] in E) { ... }` into an index loop over
    /// `keys(E)` using hidden locals, making iteration order equal
    /// insertion order for arrays and positional for strings.
    fn parse_foreach(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.expect_symbol("(", "Expected '(' after foreach")?;
        self.begin_scope(ctx, body, true);

        let declared = self.match_keyword("var");
        if self.peek().kind != TokenKind::Identifier {
            return Err(self.error_here("Expected iterator variable name"));
        }
        let key_name = self.advance().text.clone();
        let key_var = if declared {
            self.declare_variable(ctx, &key_name);
            self.resolve_variable(ctx, &key_name).expect("just declared")
        } else {
            self.resolve_variable(ctx, &key_name)
                .ok_or_else(|| self.semantic_error(self.previous(), format!("Undeclared variable '{key_name}'")))?
        };

        let mut value_var = None;
        if self.match_symbol(",") {
            if self.peek().kind != TokenKind::Identifier {
                return Err(self.error_here("Expected value variable name after ','"));
            }
            let value_name = self.advance().text.clone();
            let var = if declared {
                self.declare_variable(ctx, &value_name);
                self.resolve_variable(ctx, &value_name).expect("just declared")
            } else {
                self.resolve_variable(ctx, &value_name)
                    .ok_or_else(|| self.semantic_error(self.previous(), format!("Undeclared variable '{value_name}'")))?
            };
            value_var = Some(var);
        }

        if !self.match_keyword("in") {
            return Err(self.error_here("Expected 'in' in foreach"));
        }

        let coll_var = self.make_temp_var(ctx, &format!("__foreach_coll_{}", body.len()));
        let keys_var = self.make_temp_var(ctx, &format!("__foreach_keys_{}", body.len()));
        let idx_var = self.make_temp_var(ctx, &format!("__foreach_i_{}", body.len()));

        self.parse_expression(body, ctx)?;
        self.emit_store_var(body, &coll_var);

        self.emit_load_var(body, &coll_var);
        self.emit(
            body,
            StackOp::Call {
                name: Some(Rc::from("keys")),
                argc: 1,
                arg_names: vec![],
            },
        );
        self.emit_store_var(body, &keys_var);

        self.emit(body, StackOp::PushLiteral(Literal::Int(0)));
        self.emit_store_var(body, &idx_var);

        self.expect_symbol(")", "Expected ')' after foreach header")?;

        let cond_index = body.len();
        self.emit_load_var(body, &idx_var);
        self.emit_load_var(body, &keys_var);
        self.emit(
            body,
            StackOp::Call {
                name: Some(Rc::from("len")),
                argc: 1,
                arg_names: vec![],
            },
        );
        self.emit(body, StackOp::Compare(CompareOp::Lt));
        let jump_false = body.len();
        self.emit(body, StackOp::JumpIfFalse(0));

        self.emit_load_var(body, &keys_var);
        self.emit_load_var(body, &idx_var);
        self.emit(
            body,
            StackOp::Call {
                name: Some(Rc::from("array_get")),
                argc: 2,
                arg_names: vec![],
            },
        );
        self.emit_store_var(body, &key_var);

        if let Some(value_var) = &value_var {
            self.emit_load_var(body, &coll_var);
            self.emit_load_var(body, &key_var);
            self.emit(
                body,
                StackOp::Call {
                    name: Some(Rc::from("array_get")),
                    argc: 2,
                    arg_names: vec![],
                },
            );
            self.emit_store_var(body, value_var);
        }

        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            allow_continue: true,
            scope_depth: ctx.scopes.len(),
        });
        self.parse_statement_or_block(body, ctx, true)?;

        let loop_ctx = self.loop_stack.pop().expect("loop stack");
        let continue_target = body.len();
        for jump in loop_ctx.continue_jumps {
            Self::patch_jump(body, jump, continue_target);
        }

        self.emit_load_var(body, &idx_var);
        self.emit(body, StackOp::PushLiteral(Literal::Int(1)));
        self.emit(body, StackOp::Binary(BinaryOp::Add));
        self.emit_store_var(body, &idx_var);

        self.emit(body, StackOp::Jump(cond_index as u32));
        let exit_index = self.end_scope(ctx, body);
        Self::patch_jump(body, jump_false, exit_index);
        for jump in loop_ctx.break_jumps {
            Self::patch_jump(body, jump, exit_index);
        }
        Ok(())
    }

    fn parse_switch(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.expect_symbol("(", "Expected '(' after switch")?;
        self.begin_scope(ctx, body, true);
        let tmp_var = self.make_temp_var(ctx, &format!("__switch_val_{}", body.len()));
        self.parse_expression(body, ctx)?;
        self.expect_symbol(")", "Expected ')' after switch expression")?;
        self.emit_store_var(body, &tmp_var);
        self.expect_symbol("{", "Expected '{' after switch header")?;

        // break is legal inside switch, continue is not.
        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            allow_continue: false,
            scope_depth: ctx.scopes.len(),
        });

        let mut has_default = false;
        while !self.is_end() && !self.check_symbol("}") {
            self.skip_semicolons();
            if self.check_symbol("}") {
                break;
            }
            if self.match_keyword("case") {
                let case_literal = self.parse_case_literal()?;
                self.expect_symbol(":", "Expected ':' after case value")?;

                self.emit_load_var(body, &tmp_var);
                self.emit(body, StackOp::PushLiteral(case_literal));
                self.emit(body, StackOp::Compare(CompareOp::Eq));
                let jump_next = body.len();
                self.emit(body, StackOp::JumpIfFalse(0));

                loop {
                    self.skip_semicolons();
                    if self.check_symbol("}") {
                        break;
                    }
                    if self.peek().is_keyword("case") || self.peek().is_keyword("default") {
                        break;
                    }
                    self.parse_statement(body, ctx)?;
                }

                let end_jump = body.len();
                self.emit(body, StackOp::Jump(0));
                let patch_target = body.len();
                Self::patch_jump(body, jump_next, patch_target);
                self.loop_stack.last_mut().expect("loop stack").break_jumps.push(end_jump);
            } else if self.match_keyword("default") {
                if has_default {
                    return Err(self.semantic_error(self.previous(), "Multiple default labels"));
                }
                has_default = true;
                self.expect_symbol(":", "Expected ':' after default")?;
                loop {
                    self.skip_semicolons();
                    if self.check_symbol("}") || self.peek().is_keyword("case") || self.peek().is_keyword("default") {
                        break;
                    }
                    self.parse_statement(body, ctx)?;
                }
            } else {
                return Err(self.error_here("Expected case/default or '}' in switch"));
            }
        }
        self.expect_symbol("}", "Expected '}' to close switch")?;

        let loop_ctx = self.loop_stack.pop().expect("loop stack");
        let exit_index = self.end_scope(ctx, body);
        for jump in loop_ctx.break_jumps {
            Self::patch_jump(body, jump, exit_index);
        }
        Ok(())
    }

    fn parse_case_literal(&mut self) -> UdonResult<Literal> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                self.number_literal(&token)
            }
            TokenKind::String => {
                self.advance();
                Ok(Literal::str(&token.text))
            }
            TokenKind::Keyword if token.text == "true" => {
                self.advance();
                Ok(Literal::Bool(true))
            }
            TokenKind::Keyword if token.text == "false" => {
                self.advance();
                Ok(Literal::Bool(false))
            }
            TokenKind::Keyword if token.text == "none" => {
                self.advance();
                Ok(Literal::None)
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Literal::str(&token.text))
            }
            _ => Err(self.error(&token, "Expected literal after case")),
        }
    }

    fn parse_return(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        let mut value_count = 0usize;
        if self.match_symbol("(") {
            if self.match_symbol(")") {
                return Err(self.semantic_error(self.previous(), "return requires a value"));
            }
            loop {
                self.parse_expression(body, ctx)?;
                value_count += 1;
                if !self.match_symbol(",") {
                    break;
                }
            }
            self.expect_symbol(")", "Expected ')' after return value")?;
        } else {
            if self.check_symbol("}") || self.check_symbol(";") || self.is_end() {
                return Err(self.semantic_error(self.previous(), "return requires a value"));
            }
            self.parse_expression(body, ctx)?;
            value_count = 1;
        }
        if value_count > 1 {
            // Multiple return values pack into an array, pairing with
            // destructuring assignment on the caller side.
            self.emit(
                body,
                StackOp::Call {
                    name: Some(Rc::from("array")),
                    argc: u16::try_from(value_count).expect("return value count exceeds u16"),
                    arg_names: vec![],
                },
            );
        }
        self.emit(body, StackOp::Return);
        Ok(())
    }

    // ----- assignments and expressions ----------------------------------

    fn parse_expression(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_assignment_or_expression(body, ctx)?;
        Ok(())
    }

    /// Parses one assignment or expression. Returns whether a value was
    /// left on the stack (property/index stores leave nothing).
    fn parse_assignment_or_expression(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<bool> {
        if self.match_keyword("var") {
            return self.parse_var_statement(body, ctx);
        }

        if self.peek().kind == TokenKind::Identifier {
            if self.try_parse_destructuring(body, ctx)? {
                return Ok(true);
            }
            if self.try_parse_target_assignment(body, ctx)? {
                return Ok(false);
            }
            if self.try_parse_simple_assignment(body, ctx)? {
                return Ok(true);
            }
        }

        self.parse_ternary(body, ctx)?;
        Ok(true)
    }

    fn parse_var_statement(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<bool> {
        let mut names: Vec<String> = Vec::new();
        loop {
            if self.peek().kind != TokenKind::Identifier {
                return Err(self.error_here("Expected variable name"));
            }
            names.push(self.advance().text.clone());
            if self.match_symbol(":") {
                self.advance();
            }
            if !self.match_symbol(",") {
                break;
            }
        }

        if self.match_symbol("=") {
            self.parse_expression(body, ctx)?;
            self.destructure_assign(body, ctx, &names, true)?;
        } else {
            for name in &names {
                if name == "_" {
                    continue;
                }
                self.declare_variable(ctx, name);
                let var = self.resolve_variable(ctx, name).expect("just declared");
                self.emit(body, StackOp::PushLiteral(Literal::None));
                self.emit_store_var(body, &var);
            }
            self.emit(body, StackOp::PushLiteral(Literal::None));
        }
        Ok(true)
    }

    /// Binds `a, b, c = expr`: the RHS lands in a hidden temp, each target
    /// reads successive integer indices (`_` skips); a single target takes
    /// the RHS directly. Leaves the first bound value on the stack.
    fn destructure_assign(
        &mut self,
        body: &mut Vec<StackInstr>,
        ctx: &mut FunctionCtx,
        names: &[String],
        allow_new: bool,
    ) -> UdonResult<()> {
        let tmp_var = self.make_temp_var(ctx, &format!("__tuple_tmp_{}", body.len()));
        self.emit_store_var(body, &tmp_var);

        let use_indexing = names.len() > 1;
        for (i, name) in names.iter().enumerate() {
            if name == "_" {
                continue;
            }
            let target = if allow_new {
                self.declare_variable(ctx, name);
                self.resolve_variable(ctx, name).expect("just declared")
            } else {
                self.resolve_variable(ctx, name)
                    .ok_or_else(|| self.semantic_error(self.previous(), format!("Undeclared variable '{name}'")))?
            };
            self.load_destructure_element(body, &tmp_var, i, use_indexing);
            self.emit_store_var(body, &target);
        }

        if names.is_empty() {
            self.emit(body, StackOp::PushLiteral(Literal::None));
        } else {
            self.load_destructure_element(body, &tmp_var, 0, use_indexing);
        }
        Ok(())
    }

    fn load_destructure_element(&self, body: &mut Vec<StackInstr>, tmp: &Resolved, index: usize, use_indexing: bool) {
        self.emit_load_var(body, tmp);
        if use_indexing {
            self.emit(body, StackOp::PushLiteral(Literal::Int(index as i64)));
            self.emit(body, StackOp::GetProp(PropKey::Index));
        }
    }

    /// `a, b = expr` without `var`: only commits after seeing the full
    /// ident-comma run followed by `=`.
    fn try_parse_destructuring(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<bool> {
        let mut lookahead = 0usize;
        let mut count = 0usize;
        let mut saw_comma = false;
        while self.peek_at(lookahead).is_some_and(|t| t.kind == TokenKind::Identifier) {
            count += 1;
            lookahead += 1;
            if self.peek_at(lookahead).is_some_and(|t| t.is_symbol(",")) {
                saw_comma = true;
                lookahead += 1;
                continue;
            }
            break;
        }
        if !(saw_comma && count > 1 && self.peek_at(lookahead).is_some_and(|t| t.is_symbol("="))) {
            return Ok(false);
        }

        let mut names = Vec::with_capacity(count);
        loop {
            names.push(self.advance().text.clone());
            if self.check_symbol(",") && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Identifier) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect_symbol("=", "Expected '=' in destructuring assignment")?;
        self.parse_expression(body, ctx)?;
        self.destructure_assign(body, ctx, &names, false)?;
        Ok(true)
    }

    fn compound_op_for(text: &str) -> Option<BinaryOp> {
        match text {
            "+=" => Some(BinaryOp::Add),
            "-=" => Some(BinaryOp::Sub),
            "*=" => Some(BinaryOp::Mul),
            "/=" => Some(BinaryOp::Div),
            _ => None,
        }
    }

    /// Property / index assignment targets: `o:a = e`, `o:a:b op= e`,
    /// `o[i] = e`, `o:a[i] op= e`. Commits only when the lookahead finds an
    /// assignment operator after the full target.
    fn try_parse_target_assignment(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<bool> {
        // Scan: base ident, then `:key` repetitions, then optionally a
        // bracketed index, then `=` or a compound operator.
        let mut la = 1usize;
        let mut chain_len = 0usize;
        while self.peek_at(la).is_some_and(|t| t.is_symbol(":"))
            && self.peek_at(la + 1).is_some_and(|t| {
                matches!(t.kind, TokenKind::Identifier | TokenKind::String | TokenKind::Number)
            })
        {
            chain_len += 1;
            la += 2;
        }

        let mut indexed = false;
        if self.peek_at(la).is_some_and(|t| t.is_symbol("[")) {
            let mut depth = 1i32;
            let mut end = la + 1;
            while depth > 0 {
                match self.peek_at(end) {
                    Some(t) if t.is_symbol("[") => depth += 1,
                    Some(t) if t.is_symbol("]") => depth -= 1,
                    Some(t) if t.kind == TokenKind::EndOfFile => return Ok(false),
                    None => return Ok(false),
                    _ => {}
                }
                if depth > 0 {
                    end += 1;
                }
            }
            indexed = true;
            la = end + 1;
        }

        if chain_len == 0 && !indexed {
            return Ok(false);
        }
        let Some(op_token) = self.peek_at(la) else {
            return Ok(false);
        };
        let op_text = op_token.text.clone();
        let compound = Self::compound_op_for(&op_text);
        if !(op_token.kind == TokenKind::Symbol && (op_text == "=" || compound.is_some())) {
            return Ok(false);
        }

        // Committed: consume base and chain, emitting loads.
        let base_name = self.advance().text.clone();
        let base = self
            .resolve_variable(ctx, &base_name)
            .ok_or_else(|| self.semantic_error(self.previous(), format!("Undeclared variable '{base_name}'")))?;
        self.emit_load_var(body, &base);

        let mut chain: Vec<Literal> = Vec::with_capacity(chain_len);
        for _ in 0..chain_len {
            self.advance(); // ':'
            let key_token = self.advance().clone();
            chain.push(self.prop_key_literal(&key_token)?);
        }

        if indexed {
            // Every chain key is a read on the way to the indexed store.
            for key in &chain {
                self.emit(body, StackOp::GetProp(PropKey::Named(key.clone())));
            }
            self.advance(); // '['
            self.parse_expression(body, ctx)?;
            self.expect_symbol("]", "Expected ']' after index")?;

            if let Some(op) = compound {
                let obj_tmp = self.make_temp_var(ctx, &format!("__tmp_obj_{}", body.len()));
                let idx_tmp = self.make_temp_var(ctx, &format!("__tmp_idx_{}", body.len()));
                let res_tmp = self.make_temp_var(ctx, &format!("__tmp_res_{}", body.len()));
                self.emit_store_var(body, &idx_tmp);
                self.emit_store_var(body, &obj_tmp);
                self.advance(); // operator
                self.emit_load_var(body, &obj_tmp);
                self.emit_load_var(body, &idx_tmp);
                self.emit(body, StackOp::GetProp(PropKey::Index));
                self.parse_expression(body, ctx)?;
                self.emit(body, StackOp::Binary(op));
                self.emit_store_var(body, &res_tmp);
                self.emit_load_var(body, &obj_tmp);
                self.emit_load_var(body, &idx_tmp);
                self.emit_load_var(body, &res_tmp);
                self.emit(body, StackOp::StoreProp(PropKey::Index));
            } else {
                self.advance(); // '='
                self.parse_expression(body, ctx)?;
                self.emit(body, StackOp::StoreProp(PropKey::Index));
            }
            return Ok(true);
        }

        // Named property target: all but the last key are reads.
        let last = chain.pop().expect("chain_len > 0");
        for key in &chain {
            self.emit(body, StackOp::GetProp(PropKey::Named(key.clone())));
        }
        self.advance(); // operator
        if let Some(op) = compound {
            let obj_tmp = self.make_temp_var(ctx, &format!("__tmp_obj_{}", body.len()));
            let res_tmp = self.make_temp_var(ctx, &format!("__tmp_res_{}", body.len()));
            self.emit_store_var(body, &obj_tmp);
            self.emit_load_var(body, &obj_tmp);
            self.emit(body, StackOp::GetProp(PropKey::Named(last.clone())));
            self.parse_expression(body, ctx)?;
            self.emit(body, StackOp::Binary(op));
            self.emit_store_var(body, &res_tmp);
            self.emit_load_var(body, &obj_tmp);
            self.emit_load_var(body, &res_tmp);
            self.emit(body, StackOp::StoreProp(PropKey::Named(last)));
        } else {
            self.parse_expression(body, ctx)?;
            self.emit(body, StackOp::StoreProp(PropKey::Named(last)));
        }
        Ok(true)
    }

    /// `x = e` and `x op= e`; leaves the assigned value on the stack.
    fn try_parse_simple_assignment(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<bool> {
        let Some(op_token) = self.peek_at(1) else {
            return Ok(false);
        };
        if op_token.kind != TokenKind::Symbol {
            return Ok(false);
        }
        let op_text = op_token.text.clone();
        let compound = Self::compound_op_for(&op_text);
        if op_text != "=" && compound.is_none() {
            return Ok(false);
        }

        let name = self.advance().text.clone();
        let var = self
            .resolve_variable(ctx, &name)
            .ok_or_else(|| self.semantic_error(self.previous(), format!("Undeclared variable '{name}'")))?;
        self.advance(); // operator
        if let Some(op) = compound {
            self.emit_load_var(body, &var);
            self.parse_expression(body, ctx)?;
            self.emit(body, StackOp::Binary(op));
        } else {
            self.parse_expression(body, ctx)?;
        }
        self.emit_store_var(body, &var);
        self.emit_load_var(body, &var); // assignment yields the new value
        Ok(true)
    }

    // ----- precedence climbing ------------------------------------------

    fn parse_ternary(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_or(body, ctx)?;
        while self.match_symbol("?") {
            let jump_false = body.len();
            self.emit(body, StackOp::JumpIfFalse(0));

            let saved = self.stop_at_colon;
            self.stop_at_colon = true;
            self.parse_expression(body, ctx)?;
            self.stop_at_colon = saved;

            let jump_end = body.len();
            self.emit(body, StackOp::Jump(0));
            self.expect_symbol(":", "Expected ':' in ternary expression")?;
            let patch_target = body.len();
            Self::patch_jump(body, jump_false, patch_target);

            let saved = self.stop_at_colon;
            self.stop_at_colon = true;
            self.parse_expression(body, ctx)?;
            self.stop_at_colon = saved;

            let patch_target = body.len();
            Self::patch_jump(body, jump_end, patch_target);
        }
        Ok(())
    }

    fn parse_or(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_and(body, ctx)?;
        while self.match_symbol("||") {
            self.emit(body, StackOp::ToBool);
            let jump_rhs = body.len();
            self.emit(body, StackOp::JumpIfFalse(0));
            self.emit(body, StackOp::PushLiteral(Literal::Bool(true)));
            let jump_end = body.len();
            self.emit(body, StackOp::Jump(0));
            let patch_target = body.len();
            Self::patch_jump(body, jump_rhs, patch_target);
            self.parse_and(body, ctx)?;
            self.emit(body, StackOp::ToBool);
            let patch_target = body.len();
            Self::patch_jump(body, jump_end, patch_target);
        }
        Ok(())
    }

    fn parse_and(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_equality(body, ctx)?;
        while self.match_symbol("&&") {
            self.emit(body, StackOp::ToBool);
            let jump_false = body.len();
            self.emit(body, StackOp::JumpIfFalse(0));
            self.parse_equality(body, ctx)?;
            self.emit(body, StackOp::ToBool);
            let jump_end = body.len();
            self.emit(body, StackOp::Jump(0));
            let patch_target = body.len();
            Self::patch_jump(body, jump_false, patch_target);
            self.emit(body, StackOp::PushLiteral(Literal::Bool(false)));
            let patch_target = body.len();
            Self::patch_jump(body, jump_end, patch_target);
        }
        Ok(())
    }

    fn parse_equality(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_comparison(body, ctx)?;
        loop {
            if self.match_symbol("==") {
                self.parse_comparison(body, ctx)?;
                self.emit(body, StackOp::Compare(CompareOp::Eq));
            } else if self.match_symbol("!=") {
                self.parse_comparison(body, ctx)?;
                self.emit(body, StackOp::Compare(CompareOp::Ne));
            } else {
                return Ok(());
            }
        }
    }

    fn parse_comparison(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_additive(body, ctx)?;
        loop {
            let op = if self.match_symbol("<") {
                CompareOp::Lt
            } else if self.match_symbol("<=") {
                CompareOp::Le
            } else if self.match_symbol(">") {
                CompareOp::Gt
            } else if self.match_symbol(">=") {
                CompareOp::Ge
            } else {
                return Ok(());
            };
            self.parse_additive(body, ctx)?;
            self.emit(body, StackOp::Compare(op));
        }
    }

    fn parse_additive(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_multiplicative(body, ctx)?;
        loop {
            let op = if self.match_symbol("+") {
                BinaryOp::Add
            } else if self.match_symbol("-") {
                BinaryOp::Sub
            } else if self.match_symbol("..") {
                BinaryOp::Concat
            } else {
                return Ok(());
            };
            self.parse_multiplicative(body, ctx)?;
            self.emit(body, StackOp::Binary(op));
        }
    }

    fn parse_multiplicative(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        self.parse_unary(body, ctx)?;
        loop {
            let op = if self.match_symbol("*") {
                BinaryOp::Mul
            } else if self.match_symbol("/") {
                BinaryOp::Div
            } else if self.match_symbol("%") {
                BinaryOp::Mod
            } else {
                return Ok(());
            };
            self.parse_unary(body, ctx)?;
            self.emit(body, StackOp::Binary(op));
        }
    }

    fn parse_unary(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        if self.match_symbol("-") {
            self.parse_unary(body, ctx)?;
            self.emit(body, StackOp::Negate);
            return Ok(());
        }
        if self.match_symbol("!") {
            self.parse_unary(body, ctx)?;
            self.emit(body, StackOp::ToBool);
            self.emit(body, StackOp::Not);
            return Ok(());
        }
        if self.match_symbol("++") || self.match_symbol("--") {
            let increment = self.previous().text == "++";
            if self.peek().kind != TokenKind::Identifier {
                return Err(self.error_here("Expected identifier after increment"));
            }
            let name = self.advance().text.clone();
            let var = self
                .resolve_variable(ctx, &name)
                .ok_or_else(|| self.semantic_error(self.previous(), format!("Undeclared variable '{name}'")))?;
            self.emit_load_var(body, &var);
            self.emit(body, StackOp::PushLiteral(Literal::Int(1)));
            self.emit(
                body,
                StackOp::Binary(if increment { BinaryOp::Add } else { BinaryOp::Sub }),
            );
            self.emit_store_var(body, &var);
            self.emit_load_var(body, &var);
            return Ok(());
        }
        self.parse_primary(body, ctx)
    }

    fn parse_postfix(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        loop {
            if self.stop_at_colon && self.check_symbol(":") {
                return Ok(());
            }
            if self.match_symbol(".") {
                self.parse_method_postfix(body, ctx)?;
                continue;
            }
            if self.match_symbol(":") {
                self.parse_key_postfix(body)?;
                continue;
            }
            if self.match_symbol("[") {
                self.parse_expression(body, ctx)?;
                self.expect_symbol("]", "Expected ']' after index")?;
                self.emit(body, StackOp::GetProp(PropKey::Index));
                continue;
            }
            if self.match_symbol("(") {
                let argc = self.parse_call_args(body, ctx, false)?.0;
                self.emit(
                    body,
                    StackOp::Call {
                        name: None,
                        argc,
                        arg_names: vec![],
                    },
                );
                continue;
            }
            return Ok(());
        }
    }

    /// `.name(args)` — the receiver already on the stack becomes the first
    /// argument of a named call.
    fn parse_method_postfix(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        if self.peek().kind != TokenKind::Identifier {
            return Err(self.error_here("Expected member name after '.'"));
        }
        let member: Rc<str> = Rc::from(self.advance().text.as_str());
        if !self.match_symbol("(") {
            return Err(self.error_here("Expected '(' after method access"));
        }
        let (argc, mut arg_names) = self.parse_call_args(body, ctx, true)?;
        if arg_names.iter().any(Option::is_some) {
            arg_names.insert(0, None); // receiver is positional
        } else {
            arg_names.clear();
        }
        self.emit(
            body,
            StackOp::Call {
                name: Some(member),
                argc: argc + 1,
                arg_names,
            },
        );
        Ok(())
    }

    fn parse_key_postfix(&mut self, body: &mut Vec<StackInstr>) -> UdonResult<()> {
        let token = self.peek().clone();
        let key = match token.kind {
            TokenKind::Identifier | TokenKind::String => {
                self.advance();
                Literal::str(&token.text)
            }
            TokenKind::Number => {
                self.advance();
                self.number_literal(&token)?
            }
            _ => return Err(self.error(&token, "Expected key after ':'")),
        };
        self.emit(body, StackOp::GetProp(PropKey::Named(key)));
        Ok(())
    }

    /// Parses a `(...)`-delimited argument list (the opening paren is
    /// already consumed). Returns the count and keyword names; names are
    /// only recognized when `allow_names` is set.
    fn parse_call_args(
        &mut self,
        body: &mut Vec<StackInstr>,
        ctx: &mut FunctionCtx,
        allow_names: bool,
    ) -> UdonResult<(u16, Vec<Option<Rc<str>>>)> {
        let mut argc: u16 = 0;
        let mut arg_names: Vec<Option<Rc<str>>> = Vec::new();
        if !self.match_symbol(")") {
            loop {
                let mut arg_name = None;
                if allow_names
                    && self.peek().kind == TokenKind::Identifier
                    && self.peek_at(1).is_some_and(|t| t.is_symbol("="))
                {
                    arg_name = Some(Rc::from(self.advance().text.as_str()));
                    self.advance(); // '='
                }
                self.parse_expression(body, ctx)?;
                arg_names.push(arg_name);
                argc += 1;
                if !self.match_symbol(",") {
                    break;
                }
            }
            self.expect_symbol(")", "Expected ')' after arguments")?;
        }
        if arg_names.iter().all(Option::is_none) {
            arg_names.clear();
        }
        Ok((argc, arg_names))
    }

    fn number_literal(&self, token: &Token) -> UdonResult<Literal> {
        let text = &token.text;
        let is_float = text.contains('.') || text.contains('e') || text.contains('E');
        if is_float {
            text.parse::<f64>()
                .map(Literal::Float)
                .map_err(|_| self.error(token, format!("Invalid number literal '{text}'")))
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(Literal::Int(value)),
                // Out-of-range integer literals degrade to float.
                Err(_) => text
                    .parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|_| self.error(token, format!("Invalid number literal '{text}'"))),
            }
        }
    }

    fn parse_primary(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        if self.match_keyword("function") {
            self.parse_function_literal(body, ctx)?;
            return self.parse_postfix(body, ctx);
        }

        if self.peek().kind == TokenKind::Number {
            let token = self.advance().clone();
            let literal = self.number_literal(&token)?;
            self.emit_at(body, StackOp::PushLiteral(literal), &token);
            return self.parse_postfix(body, ctx);
        }

        if self.peek().kind == TokenKind::String {
            let token = self.advance().clone();
            self.emit_at(body, StackOp::PushLiteral(Literal::str(&token.text)), &token);
            return self.parse_postfix(body, ctx);
        }

        if self.peek().kind == TokenKind::Identifier {
            return self.parse_identifier_primary(body, ctx);
        }

        if self.match_symbol("[") {
            return self.parse_array_literal(body, ctx);
        }

        if self.peek().is_keyword("true") || self.peek().is_keyword("false") {
            let value = self.advance().text == "true";
            self.emit(body, StackOp::PushLiteral(Literal::Bool(value)));
            return self.parse_postfix(body, ctx);
        }
        if self.peek().is_keyword("none") {
            self.advance();
            self.emit(body, StackOp::PushLiteral(Literal::None));
            return self.parse_postfix(body, ctx);
        }

        if self.peek().kind == TokenKind::Template {
            let token = self.advance().clone();
            self.emit_at(body, StackOp::PushLiteral(Literal::str(&token.template_body)), &token);
            self.emit_at(
                body,
                StackOp::Call {
                    name: Some(Rc::from(token.text.as_str())),
                    argc: 1,
                    arg_names: vec![],
                },
                &token,
            );
            return self.parse_postfix(body, ctx);
        }

        if self.match_symbol("(") {
            self.parse_expression(body, ctx)?;
            self.expect_symbol(")", "Expected ')'")?;
            return self.parse_postfix(body, ctx);
        }

        if self.match_symbol("{") {
            return self.parse_object_literal(body, ctx);
        }

        Err(self.error_here(format!("Unexpected token '{}' in expression", self.peek().text)))
    }

    fn parse_identifier_primary(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        let ident = self.advance().clone();
        let resolved = self.resolve_variable(ctx, &ident.text);

        if self.match_symbol("(") {
            // A resolvable name is a dynamic call through the variable; an
            // unresolvable one is a named call bound at runtime (script
            // function or builtin), which may carry keyword arguments.
            let dynamic = resolved.is_some();
            if let Some(var) = &resolved {
                self.emit_load_var(body, var);
            }
            let (argc, arg_names) = self.parse_call_args(body, ctx, !dynamic)?;
            let op = if dynamic {
                StackOp::Call {
                    name: None,
                    argc,
                    arg_names: vec![],
                }
            } else {
                StackOp::Call {
                    name: Some(Rc::from(ident.text.as_str())),
                    argc,
                    arg_names,
                }
            };
            self.emit_at(body, op, &ident);
            return self.parse_postfix(body, ctx);
        }

        let Some(var) = resolved else {
            return Err(self.semantic_error(&ident, format!("Undeclared variable '{}'", ident.text)));
        };
        self.emit_load_var(body, &var);
        if self.match_symbol("++") || self.match_symbol("--") {
            let increment = self.previous().text == "++";
            self.emit(body, StackOp::PushLiteral(Literal::Int(1)));
            self.emit(
                body,
                StackOp::Binary(if increment { BinaryOp::Add } else { BinaryOp::Sub }),
            );
            self.emit_store_var(body, &var);
            self.emit_load_var(body, &var);
        }
        self.parse_postfix(body, ctx)
    }

    /// `[a, b, c]` compiles to a call of the reserved `array` builtin.
    fn parse_array_literal(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        let mut count: u16 = 0;
        if !self.match_symbol("]") {
            loop {
                self.parse_expression(body, ctx)?;
                count += 1;
                if !self.match_symbol(",") {
                    break;
                }
            }
            self.expect_symbol("]", "Expected ']' after array literal")?;
        }
        self.emit(
            body,
            StackOp::Call {
                name: Some(Rc::from("array")),
                argc: count,
                arg_names: vec![],
            },
        );
        self.parse_postfix(body, ctx)
    }

    /// `{ k1: e1, k2: e2 }` pushes the values, then the keys, then the
    /// entry count, and calls the reserved `__object_literal` builtin.
    /// Entries without an explicit key take successive integer indices.
    fn parse_object_literal(&mut self, body: &mut Vec<StackInstr>, ctx: &mut FunctionCtx) -> UdonResult<()> {
        let mut keys: Vec<Literal> = Vec::new();
        let mut auto_index: i64 = 0;

        if !self.match_symbol("}") {
            loop {
                let key_token = self.peek().clone();
                if !matches!(
                    key_token.kind,
                    TokenKind::Identifier | TokenKind::String | TokenKind::Number
                ) {
                    return Err(self.error(&key_token, "Expected property name"));
                }
                self.advance();

                let key = if self.match_symbol(":") {
                    let key = self.prop_key_literal(&key_token)?;
                    if let Literal::Int(n) = key {
                        if n >= 0 {
                            auto_index = auto_index.max(n + 1);
                        }
                    }
                    key
                } else {
                    // Not `key: value` after all; rewind so the token parses
                    // as the value expression.
                    self.pos -= 1;
                    let key = Literal::Int(auto_index);
                    auto_index += 1;
                    key
                };

                self.parse_expression(body, ctx)?;
                keys.push(key);

                if !self.match_symbol(",") {
                    break;
                }
            }
            self.expect_symbol("}", "Expected '}' after object literal")?;
        }

        let count = keys.len();
        for key in keys {
            self.emit(body, StackOp::PushLiteral(key));
        }
        self.emit(body, StackOp::PushLiteral(Literal::Int(count as i64)));
        self.emit(
            body,
            StackOp::Call {
                name: Some(Rc::from("__object_literal")),
                argc: u16::try_from(count * 2 + 1).expect("object literal too large"),
                arg_names: vec![],
            },
        );
        self.parse_postfix(body, ctx)
    }

    /// Typed key literal: identifiers and strings stay strings, numbers
    /// become int/float keys.
    fn prop_key_literal(&self, token: &Token) -> UdonResult<Literal> {
        match token.kind {
            TokenKind::Identifier | TokenKind::String => Ok(Literal::str(&token.text)),
            TokenKind::Number => self.number_literal(token),
            _ => Err(self.error(token, "Expected property name")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn compile_source(source: &str) -> CompileOutput {
        let lex = tokenize(source).unwrap();
        compile(&lex.tokens, &AHashSet::new(), 0, 0).unwrap()
    }

    fn compile_err(source: &str) -> UdonError {
        let lex = tokenize(source).unwrap();
        compile(&lex.tokens, &AHashSet::new(), 0, 0).unwrap_err()
    }

    fn find<'a>(out: &'a CompileOutput, name: &str) -> &'a FunctionIr {
        out.functions.iter().find(|f| &*f.name == name).unwrap()
    }

    #[test]
    fn test_simple_function() {
        let out = compile_source("function main() { return 1 + 2 }");
        let main = find(&out, "main");
        assert!(main.params.is_empty());
        let ops: Vec<&StackOp> = main.code.iter().map(|i| &i.op).collect();
        assert!(matches!(ops[0], StackOp::PushLiteral(Literal::Int(1))));
        assert!(matches!(ops[1], StackOp::PushLiteral(Literal::Int(2))));
        assert!(matches!(ops[2], StackOp::Binary(BinaryOp::Add)));
        assert!(matches!(ops[3], StackOp::Return));
    }

    #[test]
    fn test_params_get_root_slots() {
        let out = compile_source("function f(a, b) { return a }");
        let f = find(&out, "f");
        assert_eq!(f.param_slots, vec![0, 1]);
        assert_eq!(f.locals_len, 2);
    }

    #[test]
    fn test_variadic_parameter() {
        let out = compile_source("function f(a, rest...) { return a }");
        let f = find(&out, "f");
        assert_eq!(f.params.len(), 2);
        let (name, slot) = f.variadic.clone().unwrap();
        assert_eq!(&*name, "rest");
        assert_eq!(slot, 1);
    }

    #[test]
    fn test_block_scope_isolation() {
        let err = compile_err("function f() { if (true) { var x = 1 } return x }");
        assert!(err.message.contains("Undeclared variable 'x'"));
    }

    #[test]
    fn test_flat_slots_do_not_reuse() {
        // two sibling blocks declare one var each -> distinct slots
        let out = compile_source("function f() { if (true) { var a = 1 } if (true) { var b = 2 } return 0 }");
        assert_eq!(find(&out, "f").locals_len, 2);
    }

    #[test]
    fn test_global_declaration_and_init() {
        let out = compile_source("var greeting = \"hi\"\nfunction main() { return greeting }");
        assert_eq!(out.new_globals.len(), 1);
        assert_eq!(&*out.new_globals[0], "greeting");
        assert!(
            out.global_init
                .iter()
                .any(|i| matches!(&i.op, StackOp::StoreGlobal(n) if &**n == "greeting"))
        );
        let main = find(&out, "main");
        assert!(
            main.code
                .iter()
                .any(|i| matches!(&i.op, StackOp::LoadGlobal(n) if &**n == "greeting"))
        );
    }

    #[test]
    fn test_forward_global_reference() {
        // functions may reference globals declared later in the file
        let out = compile_source("function main() { return later }\nvar later = 3");
        let main = find(&out, "main");
        assert!(
            main.code
                .iter()
                .any(|i| matches!(&i.op, StackOp::LoadGlobal(n) if &**n == "later"))
        );
    }

    #[test]
    fn test_duplicate_global_errors() {
        let err = compile_err("var x = 1\nvar x = 2");
        assert!(err.message.contains("already declared"));
    }

    #[test]
    fn test_lambda_captures_enclosing_slots() {
        let out = compile_source("function outer() { var n = 0 return function() { n = n + 1 return n } }");
        let lambda = find(&out, "__lambda_0");
        assert!(
            lambda
                .code
                .iter()
                .any(|i| matches!(i.op, StackOp::LoadLocal { depth: 1, .. })),
            "captured variable resolves one activation out"
        );
        let outer = find(&out, "outer");
        assert!(outer.code.iter().any(|i| matches!(&i.op, StackOp::MakeClosure(n) if &**n == "__lambda_0")));
    }

    #[test]
    fn test_event_handler_registration() {
        let out = compile_source("function on:tick() { return 1 }\nfunction on:tick() { return 2 }");
        assert_eq!(out.events.len(), 2);
        assert_eq!(out.events[0].0, "on:tick");
        assert_eq!(out.events[1].0, "on:tick");
        assert_ne!(out.events[0].1, out.events[1].1);
    }

    #[test]
    fn test_break_outside_loop_errors() {
        let err = compile_err("function f() { break }");
        assert_eq!(err.kind, ErrorKind::Compile);
        assert!(err.message.contains("break outside"));
    }

    #[test]
    fn test_continue_in_switch_errors() {
        let err = compile_err("function f() { switch (1) { case 1: continue } }");
        assert!(err.message.contains("continue outside"));
    }

    #[test]
    fn test_return_without_value_errors() {
        let err = compile_err("function f() { return }");
        assert_eq!(err.kind, ErrorKind::Compile);
        assert!(err.message.contains("return requires a value"));
    }

    #[test]
    fn test_foreach_desugars_to_keys_len_array_get() {
        let out = compile_source("function f(o) { foreach (var k, v in o) { print(k) } return 0 }");
        let f = find(&out, "f");
        let called: Vec<&str> = f
            .code
            .iter()
            .filter_map(|i| match &i.op {
                StackOp::Call { name: Some(n), .. } => Some(&**n),
                _ => None,
            })
            .collect();
        assert!(called.contains(&"keys"));
        assert!(called.contains(&"len"));
        assert!(called.iter().filter(|n| **n == "array_get").count() >= 2);
    }

    #[test]
    fn test_object_literal_emits_reserved_call() {
        let out = compile_source("function f() { return {a: 1, b: 2} }");
        let f = find(&out, "f");
        assert!(f.code.iter().any(
            |i| matches!(&i.op, StackOp::Call { name: Some(n), argc: 5, .. } if &**n == "__object_literal")
        ));
    }

    #[test]
    fn test_object_literal_auto_index_keys_are_ints() {
        let out = compile_source("function f() { return {7: \"x\", \"y\"} }");
        let f = find(&out, "f");
        // explicit int key 7 bumps the auto index to 8
        assert!(f.code.iter().any(|i| matches!(i.op, StackOp::PushLiteral(Literal::Int(7)))));
        assert!(f.code.iter().any(|i| matches!(i.op, StackOp::PushLiteral(Literal::Int(8)))));
    }

    #[test]
    fn test_template_compiles_to_call() {
        let out = compile_source("function f() { return $html(<b>x</b>) }");
        let f = find(&out, "f");
        assert!(f.code.iter().any(|i| matches!(&i.op, StackOp::PushLiteral(Literal::Str(s)) if &**s == "<b>x</b>")));
        assert!(f.code.iter().any(
            |i| matches!(&i.op, StackOp::Call { name: Some(n), argc: 1, .. } if &**n == "$html")
        ));
    }

    #[test]
    fn test_malformed_template_is_parse_error() {
        let err = compile_err("function f() { return $t + 1 }");
        assert!(err.message.contains("Unexpected token '$t'"));
    }

    #[test]
    fn test_named_call_arguments() {
        let out = compile_source("function f() { return draw(1, mode=\"fast\") }");
        let f = find(&out, "f");
        let call = f
            .code
            .iter()
            .find_map(|i| match &i.op {
                StackOp::Call {
                    name: Some(n),
                    argc,
                    arg_names,
                } if &**n == "draw" => Some((*argc, arg_names.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.0, 2);
        assert_eq!(call.1.len(), 2);
        assert!(call.1[0].is_none());
        assert_eq!(call.1[1].as_deref(), Some("mode"));
    }

    #[test]
    fn test_dynamic_call_through_variable() {
        let out = compile_source("function f(g) { return g(1) }");
        let f = find(&out, "f");
        assert!(f.code.iter().any(|i| matches!(&i.op, StackOp::Call { name: None, argc: 1, .. })));
    }

    #[test]
    fn test_method_call_counts_receiver() {
        let out = compile_source("function f(o) { return o.update(1) }");
        let f = find(&out, "f");
        assert!(f.code.iter().any(
            |i| matches!(&i.op, StackOp::Call { name: Some(n), argc: 2, .. } if &**n == "update")
        ));
    }

    #[test]
    fn test_index_assignment_uses_index_sentinel() {
        let out = compile_source("function f(a) { a[0] = 9 return a }");
        let f = find(&out, "f");
        assert!(f.code.iter().any(|i| matches!(&i.op, StackOp::StoreProp(PropKey::Index))));
    }

    #[test]
    fn test_chained_property_assignment() {
        let out = compile_source("function f(o) { o:a:b = 5 return o }");
        let f = find(&out, "f");
        let gets: Vec<String> = f
            .code
            .iter()
            .filter_map(|i| match &i.op {
                StackOp::GetProp(PropKey::Named(k)) => Some(k.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(gets, vec!["a"]);
        assert!(f.code.iter().any(
            |i| matches!(&i.op, StackOp::StoreProp(PropKey::Named(Literal::Str(s))) if &**s == "b")
        ));
    }

    #[test]
    fn test_compound_assignment_loads_then_stores() {
        let out = compile_source("function f() { var x = 1 x += 2 return x }");
        let f = find(&out, "f");
        let adds = f.code.iter().filter(|i| matches!(i.op, StackOp::Binary(BinaryOp::Add))).count();
        assert_eq!(adds, 1);
    }

    #[test]
    fn test_destructuring_var() {
        let out = compile_source("function f(a) { var x, y, z = a return x + y + z }");
        let f = find(&out, "f");
        let index_gets = f.code.iter().filter(|i| matches!(i.op, StackOp::GetProp(PropKey::Index))).count();
        // three targets plus the statement value re-load
        assert_eq!(index_gets, 4);
    }

    #[test]
    fn test_single_target_var_assigns_directly() {
        let out = compile_source("function f(a) { var x = a return x }");
        let f = find(&out, "f");
        assert!(!f.code.iter().any(|i| matches!(i.op, StackOp::GetProp(PropKey::Index))));
    }

    #[test]
    fn test_destructuring_underscore_skips() {
        let out = compile_source("function f(a) { var x, _, z = a return x + z }");
        let f = find(&out, "f");
        let index_gets = f.code.iter().filter(|i| matches!(i.op, StackOp::GetProp(PropKey::Index))).count();
        assert_eq!(index_gets, 3);
    }

    #[test]
    fn test_short_circuit_shapes() {
        let out = compile_source("function f(a, b) { return a && b() }");
        let f = find(&out, "f");
        let to_bools = f.code.iter().filter(|i| matches!(i.op, StackOp::ToBool)).count();
        assert_eq!(to_bools, 2);
        assert!(f.code.iter().any(|i| matches!(i.op, StackOp::JumpIfFalse(_))));
    }

    #[test]
    fn test_ternary_colon_disambiguation() {
        // the ':' inside the ternary must not parse as a key access on b
        let out = compile_source("function f(c, a, b) { return c ? a : b }");
        let f = find(&out, "f");
        assert!(!f.code.iter().any(|i| matches!(i.op, StackOp::GetProp(_))));
    }

    #[test]
    fn test_scope_markers_patched() {
        let out = compile_source("function f() { while (true) { var a = 1 var b = 2 break } return 0 }");
        let f = find(&out, "f");
        assert!(f.code.iter().any(|i| matches!(i.op, StackOp::EnterScope(_))));
        // break unwinds the loop body scope before jumping
        let exits = f.code.iter().filter(|i| matches!(i.op, StackOp::ExitScope)).count();
        assert!(exits >= 1);
    }

    #[test]
    fn test_top_level_garbage_rejected() {
        let err = compile_err("42");
        assert!(err.message.contains("Expected 'function' or 'var'"));
    }

    #[test]
    fn test_case_insensitive_keywords_parse() {
        let out = compile_source("FUNCTION main() { RETURN 1 }");
        assert_eq!(out.functions.len(), 1);
    }

    #[test]
    fn test_switch_compiles_with_default() {
        let out = compile_source(
            "function f(x) { var r = 0 switch (x) { case 1: r = 10 break case \"two\": r = 20 default: r = 99 } return r }",
        );
        let f = find(&out, "f");
        let eqs = f.code.iter().filter(|i| matches!(i.op, StackOp::Compare(CompareOp::Eq))).count();
        assert_eq!(eqs, 2);
    }
}

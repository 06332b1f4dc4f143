//! IR generation: a two-pass walk over the AST that resolves symbols
//! through a layered scope/frame model, computes stack offsets, and emits
//! linear operations with forward-reference fixups.
//!
//! The prepass registers top-level function symbols (enabling forward
//! references) and processes imports: `import name;` emits an IMPORT_LIB
//! operation, `import "path";` parses the target file and generates its IR
//! inline. The main pass emits everything else. Symbol operands that name
//! globals stay symbolic until serialization.

use std::path::PathBuf;

use crate::{
    ast::{Node, NodeKind},
    bytecode::{self, IrOp, Marker, MarkerDetail, Opcode, Operand, Program},
    error::{EngineError, ErrorKind, SourceLoc, render_hint},
    input::{Input, Pos},
    lexer::TokenKind,
    parser::Parser,
    resource::EngineOptions,
    symbol::{SymKind, SymScope, Symbol, SymbolTable},
};

/// Runtime cells a call inserts below each frame: saved return address and
/// saved base index. Outer-frame local offsets must skip these.
const FRAME_HEADER_SIZE: i32 = 2;

#[derive(Debug)]
struct IrScope {
    symbols: SymbolTable,
    base_index: i32,
    stack_offset: i32,
}

#[derive(Debug)]
struct IrFrame {
    base_index: i32,
    arg_count: i32,
    scopes: Vec<IrScope>,
}

/// Loop bookkeeping: entry address, the jump-over-end operation to patch
/// when the loop closes, and every `break` jump waiting for the same patch.
#[derive(Debug)]
struct LoopRecord {
    begin_addr: u32,
    end_jump: Option<usize>,
    breaks: Vec<usize>,
}

/// Successful IR generation output, ready for serialization.
#[derive(Debug)]
pub(crate) struct IrOutput {
    pub ops: Vec<IrOp>,
    pub globals: SymbolTable,
    pub markers: Vec<Marker>,
}

pub(crate) struct IrBuilder<'o> {
    options: &'o EngineOptions,
    ops: Vec<IrOp>,
    offset: u32,
    frames: Vec<IrFrame>,
    loops: Vec<LoopRecord>,
    markers: Vec<Marker>,
    globals: SymbolTable,
    valid: bool,
    errors: Vec<EngineError>,
}

impl<'o> IrBuilder<'o> {
    /// Walks the tree and produces the operation list, globals table and
    /// markers, or the accumulated diagnostics on failure.
    pub fn generate(root: &Node, input: &Input, options: &'o EngineOptions) -> Result<IrOutput, Vec<EngineError>> {
        let mut builder = Self {
            options,
            ops: Vec::new(),
            offset: 0,
            frames: Vec::new(),
            loops: Vec::new(),
            markers: Vec::new(),
            globals: SymbolTable::new(),
            valid: true,
            errors: Vec::new(),
        };

        builder.push_frame(0);
        builder.gen(root, input);
        builder.emit(Opcode::Exit);
        builder.pop_frame();

        if builder.valid && builder.errors.is_empty() {
            Ok(IrOutput {
                ops: builder.ops,
                globals: builder.globals,
                markers: builder.markers,
            })
        } else {
            Err(builder.errors)
        }
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn emit(&mut self, opcode: Opcode) -> usize {
        self.emit_arg(opcode, Operand::None)
    }

    fn emit_arg(&mut self, opcode: Opcode, operand: Operand) -> usize {
        let op = IrOp {
            opcode,
            operand,
            bytecode_offset: self.offset,
        };
        self.offset += op.size();
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Patches a previously stubbed int operand. The operand must have been
    /// emitted as an int so encoded sizes stay stable.
    fn patch_int(&mut self, index: usize, value: i32) {
        debug_assert!(matches!(self.ops[index].operand, Operand::Int(_)));
        self.ops[index].operand = Operand::Int(value);
    }

    fn mark_symbol(&mut self, name: &str) {
        self.markers.push(Marker {
            addr: self.offset,
            detail: MarkerDetail::Symbol(name.to_owned()),
        });
    }

    fn mark_source(&mut self, input: &Input, pos: Pos) {
        self.markers.push(Marker {
            addr: self.offset,
            detail: MarkerDetail::Source {
                file: input.name().to_owned(),
                line: pos.line,
                col: pos.col,
            },
        });
    }

    fn error_at(&mut self, input: &Input, pos: Pos, message: String) {
        self.valid = false;
        let hint = render_hint(&input.line_at(pos.line_start), pos.col);
        self.errors.push(
            EngineError::new(ErrorKind::Ir, message)
                .with_loc(SourceLoc {
                    file: input.name().to_owned(),
                    line: pos.line,
                    col: pos.col,
                })
                .with_hint(hint),
        );
    }

    // ------------------------------------------------------------------
    // Frames, scopes, symbols
    // ------------------------------------------------------------------

    fn current_frame(&self) -> &IrFrame {
        self.frames.last().expect("frame stack is never empty while generating")
    }

    fn current_scope(&self) -> &IrScope {
        self.current_frame()
            .scopes
            .last()
            .expect("scope stack is never empty while generating")
    }

    fn current_scope_mut(&mut self) -> &mut IrScope {
        self.frames
            .last_mut()
            .expect("frame stack is never empty while generating")
            .scopes
            .last_mut()
            .expect("scope stack is never empty while generating")
    }

    fn scope_is_global(&self) -> bool {
        self.frames.len() == 1 && self.frames[0].scopes.len() == 1
    }

    /// Cells the current scope has pushed beyond its base.
    fn scope_local_offset(&self) -> i32 {
        let scope = self.current_scope();
        scope.stack_offset - scope.base_index
    }

    /// The RETURN_FUNC pop delta: everything past the frame base plus the
    /// arguments below it.
    fn calling_offset(&self) -> i32 {
        let scope = self.current_scope();
        let frame = self.current_frame();
        (scope.stack_offset - frame.base_index) + frame.arg_count
    }

    fn push_frame(&mut self, arg_count: i32) {
        let base_index = if self.frames.is_empty() {
            0
        } else {
            self.current_scope().stack_offset
        };
        self.frames.push(IrFrame {
            base_index,
            arg_count,
            scopes: vec![IrScope {
                symbols: SymbolTable::new(),
                base_index,
                stack_offset: base_index,
            }],
        });
    }

    fn pop_frame(&mut self) {
        if self.frames.len() == 1 {
            // the outermost frame's table becomes the script's globals
            let scope = self
                .frames
                .last_mut()
                .and_then(|frame| frame.scopes.last_mut())
                .expect("outermost frame has a scope");
            self.globals = std::mem::take(&mut scope.symbols);
        }
        self.frames.pop();
    }

    fn push_scope(&mut self) {
        let stack_offset = self.current_scope().stack_offset;
        self.frames.last_mut().expect("frame stack is not empty").scopes.push(IrScope {
            symbols: SymbolTable::new(),
            base_index: stack_offset,
            stack_offset,
        });
    }

    /// Emits the POP restoring the stack to the scope base, then discards
    /// the scope.
    fn pop_scope(&mut self) {
        let delta = self.scope_local_offset();
        self.emit_arg(Opcode::Pop, Operand::Int(delta));
        self.frames.last_mut().expect("frame stack is not empty").scopes.pop();
    }

    fn set_var(&mut self, name: &str) {
        let scope_kind = if self.scope_is_global() {
            SymScope::Global
        } else {
            SymScope::Local
        };
        let scope = self.current_scope_mut();
        let offset = scope.stack_offset;
        scope.stack_offset += 1;
        scope.symbols.insert(Symbol {
            name: name.to_owned(),
            scope: scope_kind,
            kind: SymKind::Var,
            offset,
            argc: 0,
        });
    }

    fn set_param(&mut self, name: &str) -> bool {
        let scope = self.current_scope_mut();
        let offset = scope.stack_offset;
        scope.stack_offset += 1;
        scope.symbols.insert(Symbol {
            name: name.to_owned(),
            scope: SymScope::Param,
            kind: SymKind::Var,
            offset,
            argc: 0,
        })
    }

    /// Registers a function symbol at the current bytecode offset. With
    /// `update`, an existing binding (from the prepass) is replaced so the
    /// main pass fixes up the real entry address.
    fn set_func(&mut self, name: &str, argc: i32, update: bool) -> bool {
        let scope_kind = if self.scope_is_global() {
            SymScope::Global
        } else {
            SymScope::Local
        };
        let symbol = Symbol {
            name: name.to_owned(),
            scope: scope_kind,
            kind: SymKind::Func,
            offset: self.offset as i32,
            argc,
        };
        let scope = self.current_scope_mut();
        if update {
            scope.symbols.replace(symbol);
            true
        } else {
            scope.symbols.insert(symbol)
        }
    }

    /// Looks a name up in the current scope only; double definition within
    /// one scope is an error.
    fn get_symbol_local(&self, name: &str) -> Option<Symbol> {
        self.current_scope().symbols.get(name).cloned()
    }

    /// Lookup walking scopes innermost-out, then frames innermost-out.
    fn get_symbol(&self, name: &str) -> Option<Symbol> {
        for frame in self.frames.iter().rev() {
            for scope in frame.scopes.iter().rev() {
                if let Some(symbol) = scope.symbols.get(name) {
                    return Some(symbol.clone());
                }
            }
        }
        None
    }

    /// Like [`Self::get_symbol`], with Local/Param offsets rebased to the
    /// current frame. Resolving through `frame_delta` intervening frames
    /// skips their saved return-address/base pairs.
    fn get_symbol_relative(&self, name: &str) -> Option<Symbol> {
        for (frame_index, frame) in self.frames.iter().enumerate().rev() {
            for scope in frame.scopes.iter().rev() {
                if let Some(symbol) = scope.symbols.get(name) {
                    let mut symbol = symbol.clone();
                    match symbol.scope {
                        SymScope::Global => {}
                        // arguments sit directly below the frame base
                        SymScope::Param => {
                            symbol.offset -= self.current_frame().base_index;
                        }
                        // locals of outer frames skip the saved
                        // return-address/base pair of each frame between
                        SymScope::Local => {
                            let frame_delta = (self.frames.len() - 1 - frame_index) as i32;
                            symbol.offset =
                                symbol.offset - self.current_frame().base_index - frame_delta * FRAME_HEADER_SIZE;
                        }
                    }
                    return Some(symbol);
                }
            }
        }
        None
    }

    /// Global symbols stay symbolic for the serializer; frame-relative
    /// symbols encode their computed offset directly.
    fn operand_from_symbol(symbol: &Symbol) -> Operand {
        if symbol.scope == SymScope::Global {
            Operand::Symbol(symbol.name.clone())
        } else {
            Operand::Int(symbol.offset)
        }
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    fn begin_loop(&mut self) {
        self.loops.push(LoopRecord {
            begin_addr: self.offset,
            end_jump: None,
            breaks: Vec::new(),
        });
    }

    /// Emits the conditional jump that exits the loop, to be patched at end.
    fn check_loop(&mut self) {
        let index = self.emit_arg(Opcode::JumpZero, Operand::Int(0));
        if let Some(record) = self.loops.last_mut() {
            record.end_jump = Some(index);
        }
    }

    fn continue_loop(&mut self) -> bool {
        let Some(record) = self.loops.last() else {
            return false;
        };
        let begin = record.begin_addr as i32;
        self.emit_arg(Opcode::Jump, Operand::Int(begin));
        true
    }

    fn break_loop(&mut self) -> bool {
        if self.loops.is_empty() {
            return false;
        }
        let index = self.emit_arg(Opcode::Jump, Operand::Int(0));
        if let Some(record) = self.loops.last_mut() {
            record.breaks.push(index);
        }
        true
    }

    /// Closes the loop: jump back to the entry, then patch the exit jump
    /// and every break to land here.
    fn end_loop(&mut self) {
        let record = self.loops.pop().expect("end_loop pairs with begin_loop");
        self.emit_arg(Opcode::Jump, Operand::Int(record.begin_addr as i32));

        let end_addr = self.offset as i32;
        if let Some(index) = record.end_jump {
            self.patch_int(index, end_addr);
        }
        for index in record.breaks {
            self.patch_int(index, end_addr);
        }
    }

    // ------------------------------------------------------------------
    // Prepass
    // ------------------------------------------------------------------

    /// Pre-registers top-level function symbols and processes imports, so
    /// calls may precede definitions in source order.
    fn prepass(&mut self, node: &Node, input: &Input) {
        if !self.valid {
            return;
        }
        match node.kind {
            NodeKind::Root | NodeKind::Block => {
                for child in &node.children {
                    self.prepass(child, input);
                }
            }
            NodeKind::DefineFunc => {
                let name = node.token.text().to_owned();
                let param_count = node.children[0].children.len() as i32;
                if !self.set_func(&name, param_count, false) {
                    self.error_at(input, node.token.pos, format!("global {name} already defined"));
                }
            }
            NodeKind::ImportLib => {
                let name = node.token.text().as_bytes().to_vec();
                self.emit_arg(Opcode::ImportLib, Operand::Bytes(name));
            }
            NodeKind::ImportScript => self.import_script(node, input),
            _ => {}
        }
    }

    /// Parses and inlines the imported file's IR, resolving the path
    /// relative to the importing file's directory.
    fn import_script(&mut self, node: &Node, input: &Input) {
        let mut path = PathBuf::from(input.name());
        path.pop();
        path.push(node.token.text());

        let imported = match Input::open(&path) {
            Ok(imported) => imported,
            Err(err) => {
                self.error_at(
                    input,
                    node.token.pos,
                    format!("failed to import script {}: {err}", node.token.text()),
                );
                return;
            }
        };

        let mut parser = Parser::new(imported, self.options);
        let root = parser.parse();
        let errors = parser.take_errors();
        if !errors.is_empty() || root.is_none() {
            self.valid = false;
            self.errors.extend(errors);
            self.error_at(input, node.token.pos, format!("failed to import script {}", node.token.text()));
            return;
        }

        let root = root.expect("checked above");
        self.gen(&root, parser.input());
    }

    // ------------------------------------------------------------------
    // Main pass
    // ------------------------------------------------------------------

    fn gen(&mut self, node: &Node, input: &Input) {
        if !self.valid {
            return;
        }
        match node.kind {
            NodeKind::Root => {
                self.prepass(node, input);
                for child in &node.children {
                    self.gen(child, input);
                }
            }
            NodeKind::Block => {
                for child in &node.children {
                    self.gen(child, input);
                }
            }
            NodeKind::StmtExpr => {
                for child in &node.children {
                    self.gen(child, input);
                }
            }
            NodeKind::Discard => {
                // eval keeps top-level results so they can be returned to
                // the host; file execution discards everything
                if !input.is_string_backed() || !self.scope_is_global() {
                    self.emit_arg(Opcode::Pop, Operand::Int(1));
                }
            }
            NodeKind::Literal => self.gen_literal(node),
            NodeKind::Variable => self.gen_variable(node, input),
            NodeKind::UnaryOp => {
                self.gen(&node.children[0], input);
                self.mark_source(input, node.token.pos);
                match node.token.kind {
                    TokenKind::Not => self.emit(Opcode::Not),
                    TokenKind::Sub => self.emit(Opcode::Neg),
                    _ => unreachable!("parser only builds unary nodes for ! and -"),
                };
            }
            NodeKind::BinaryOp => self.gen_binary_op(node, input),
            NodeKind::ArrayLiteral => {
                for child in node.children.iter().rev() {
                    self.gen(child, input);
                }
                let count = node.children.len() as i32;
                self.emit_arg(Opcode::PushArray, Operand::Int(count));
            }
            NodeKind::MapLiteral => {
                for child in node.children.iter().rev() {
                    self.gen(child, input);
                }
                let count = node.children.len() as i32;
                self.emit_arg(Opcode::PushMap, Operand::Int(count));
            }
            NodeKind::MapPair => {
                self.gen(&node.children[0], input);
                self.gen(&node.children[1], input);
            }
            NodeKind::Element => {
                self.gen(&node.children[0], input); // index
                self.gen(&node.children[1], input); // container
                self.mark_source(input, node.token.pos);
                self.emit(Opcode::PushElement);
            }
            NodeKind::Field => {
                // sugar for indexing with the field name as a string key
                let name = node.token.text().as_bytes().to_vec();
                self.emit_arg(Opcode::PushString, Operand::Bytes(name));
                self.gen(&node.children[0], input);
                self.mark_source(input, node.token.pos);
                self.emit(Opcode::PushElement);
            }
            NodeKind::Range => {
                self.gen(&node.children[0], input); // from
                self.gen(&node.children[1], input); // to
                self.mark_source(input, node.token.pos);
                self.emit(Opcode::PushRange);
            }
            NodeKind::DefineVar => {
                if node.children.is_empty() {
                    self.emit(Opcode::PushNone);
                } else {
                    self.gen(&node.children[0], input);
                }
                let name = node.token.text().to_owned();
                if self.get_symbol_local(&name).is_some() {
                    self.error_at(input, node.token.pos, format!("variable {name} already defined in block"));
                    return;
                }
                self.set_var(&name);
            }
            NodeKind::If => {
                self.gen(&node.children[0], input);
                let end_jump = self.emit_arg(Opcode::JumpZero, Operand::Int(0));
                self.push_scope();
                self.gen(&node.children[1], input);
                self.pop_scope();
                let end_addr = self.offset as i32;
                self.patch_int(end_jump, end_addr);
            }
            NodeKind::IfElse => {
                self.gen(&node.children[0], input);
                let else_jump = self.emit_arg(Opcode::JumpZero, Operand::Int(0));

                self.push_scope();
                self.gen(&node.children[1], input);
                self.pop_scope();
                let end_jump = self.emit_arg(Opcode::Jump, Operand::Int(0));

                let else_addr = self.offset as i32;
                self.push_scope();
                self.gen(&node.children[2], input);
                self.pop_scope();

                let end_addr = self.offset as i32;
                self.patch_int(else_jump, else_addr);
                self.patch_int(end_jump, end_addr);
            }
            NodeKind::While => {
                self.begin_loop();
                self.gen(&node.children[0], input);
                self.check_loop();

                self.push_scope();
                self.gen(&node.children[1], input);
                self.pop_scope();

                self.end_loop();
            }
            NodeKind::For => self.gen_for(node, input),
            NodeKind::Break => {
                if !self.break_loop() {
                    self.error_at(input, node.token.pos, "break statement must be inside a loop".to_owned());
                }
            }
            NodeKind::Continue => {
                if !self.continue_loop() {
                    self.error_at(input, node.token.pos, "continue statement must be inside a loop".to_owned());
                }
            }
            NodeKind::CallNamed => self.gen_call_named(node, input),
            NodeKind::CallUnnamed => {
                let arg_count = node.children.len() as i32 - 1;
                let frame_op = self.emit_arg(Opcode::CallFrame, Operand::Int(0));
                for arg in &node.children[1..] {
                    self.gen(arg, input);
                }
                // the callee expression is evaluated onto the stack last
                self.gen(&node.children[0], input);
                self.emit_arg(Opcode::ArgCount, Operand::Int(arg_count));
                self.mark_source(input, node.token.pos);
                self.emit(Opcode::CallTop);
                let ret_addr = self.offset as i32;
                self.patch_int(frame_op, ret_addr);
            }
            NodeKind::Return => {
                if self.frames.len() == 1 {
                    self.error_at(input, node.token.pos, "return statement must be inside a function".to_owned());
                    return;
                }
                let delta = self.calling_offset();
                if node.children.is_empty() {
                    self.emit(Opcode::PushNone);
                } else {
                    self.gen(&node.children[0], input);
                }
                self.emit_arg(Opcode::ReturnFunc, Operand::Int(delta));
            }
            NodeKind::Param => {
                let name = node.token.text().to_owned();
                if !self.set_param(&name) {
                    self.error_at(input, node.token.pos, format!("parameter {name} already defined"));
                }
            }
            NodeKind::ParamList => {
                for child in &node.children {
                    self.gen(child, input);
                }
            }
            NodeKind::DefineFunc => self.gen_define_func(node, input),
            // imports were fully handled by the prepass
            NodeKind::ImportLib | NodeKind::ImportScript => {}
        }
    }

    fn gen_literal(&mut self, node: &Node) {
        let text = node.token.text();
        match node.token.kind {
            TokenKind::Int => {
                let value = text.parse::<i64>().unwrap_or(0) as i32;
                self.emit_arg(Opcode::PushInt, Operand::Int(value));
            }
            TokenKind::Hex => {
                let value = i64::from_str_radix(&text[2..], 16).unwrap_or(0) as i32;
                self.emit_arg(Opcode::PushInt, Operand::Int(value));
            }
            TokenKind::Binary => {
                let value = i64::from_str_radix(&text[2..], 2).unwrap_or(0) as i32;
                self.emit_arg(Opcode::PushInt, Operand::Int(value));
            }
            TokenKind::Float => {
                let value = text.parse::<f32>().unwrap_or(0.0);
                self.emit_arg(Opcode::PushFloat, Operand::Float(value));
            }
            TokenKind::String => {
                self.emit_arg(Opcode::PushString, Operand::Bytes(text.as_bytes().to_vec()));
            }
            TokenKind::Char => {
                let byte = text.bytes().next().unwrap_or(0);
                self.emit_arg(Opcode::PushChar, Operand::Char(byte));
            }
            TokenKind::True => {
                self.emit_arg(Opcode::PushBool, Operand::Bool(true));
            }
            TokenKind::False => {
                self.emit_arg(Opcode::PushBool, Operand::Bool(false));
            }
            TokenKind::None => {
                self.emit(Opcode::PushNone);
            }
            _ => unreachable!("parser only builds literal nodes from literal tokens"),
        }
    }

    fn gen_variable(&mut self, node: &Node, input: &Input) {
        let name = node.token.text().to_owned();
        let Some(symbol) = self.get_symbol_relative(&name) else {
            self.error_at(input, node.token.pos, format!("variable {name} not defined in current block"));
            return;
        };

        self.mark_symbol(&name);

        if symbol.kind == SymKind::Func {
            // a function referenced as a value pushes its address
            self.emit_arg(Opcode::PushFunc, Self::operand_from_symbol(&symbol));
            return;
        }

        let operand = Self::operand_from_symbol(&symbol);
        if symbol.scope == SymScope::Global {
            self.emit_arg(Opcode::PushGlobal, operand);
        } else {
            self.emit_arg(Opcode::PushLocal, operand);
        }
    }

    fn gen_binary_op(&mut self, node: &Node, input: &Input) {
        let mut kind = node.token.kind;

        // plain assignment evaluates only the right side; the left side is
        // handled below as a store target
        if kind != TokenKind::Assign {
            self.gen(&node.children[0], input);
        }
        self.gen(&node.children[1], input);

        self.mark_source(input, node.token.pos);

        match kind {
            TokenKind::Add => {
                self.emit(Opcode::Add);
            }
            TokenKind::Sub => {
                self.emit(Opcode::Sub);
            }
            TokenKind::Mul => {
                self.emit(Opcode::Mul);
            }
            TokenKind::Div => {
                self.emit(Opcode::Div);
            }
            TokenKind::Mod => {
                self.emit(Opcode::Mod);
            }
            TokenKind::Pow => {
                self.emit(Opcode::Pow);
            }
            TokenKind::And => {
                self.emit(Opcode::And);
            }
            TokenKind::Or => {
                self.emit(Opcode::Or);
            }
            TokenKind::Lt => {
                self.emit(Opcode::Lt);
            }
            TokenKind::LtEq => {
                self.emit(Opcode::Lte);
            }
            TokenKind::Gt => {
                self.emit(Opcode::Gt);
            }
            TokenKind::GtEq => {
                self.emit(Opcode::Gte);
            }
            TokenKind::Eq => {
                self.emit(Opcode::Eq);
            }
            TokenKind::NotEq => {
                self.emit(Opcode::Neq);
            }
            TokenKind::ApproxEq => {
                self.emit(Opcode::ApproxEq);
            }
            // compound assignment applies the operator, then stores
            TokenKind::AddAssign => {
                self.emit(Opcode::Add);
                kind = TokenKind::Assign;
            }
            TokenKind::SubAssign => {
                self.emit(Opcode::Sub);
                kind = TokenKind::Assign;
            }
            TokenKind::MulAssign => {
                self.emit(Opcode::Mul);
                kind = TokenKind::Assign;
            }
            TokenKind::DivAssign => {
                self.emit(Opcode::Div);
                kind = TokenKind::Assign;
            }
            TokenKind::ModAssign => {
                self.emit(Opcode::Mod);
                kind = TokenKind::Assign;
            }
            TokenKind::PowAssign => {
                self.emit(Opcode::Pow);
                kind = TokenKind::Assign;
            }
            TokenKind::Assign => {}
            _ => unreachable!("parser only builds binary nodes for binary operators"),
        }

        if kind == TokenKind::Assign {
            self.gen_store(node, input);
        }
    }

    /// Stores the value on top of the stack into the assignment target.
    fn gen_store(&mut self, node: &Node, input: &Input) {
        let target = &node.children[0];
        match target.kind {
            NodeKind::Variable => {
                let name = target.token.text().to_owned();
                let Some(symbol) = self.get_symbol_relative(&name) else {
                    self.error_at(input, node.token.pos, format!("variable {name} not defined"));
                    return;
                };
                if symbol.kind == SymKind::Func {
                    self.error_at(input, node.token.pos, format!("cannot assign to function {name}"));
                    return;
                }

                self.mark_symbol(&name);
                let operand = Self::operand_from_symbol(&symbol);
                if symbol.scope == SymScope::Global {
                    self.emit_arg(Opcode::LoadGlobal, operand);
                } else {
                    self.emit_arg(Opcode::LoadLocal, operand);
                }
            }
            NodeKind::Element => {
                self.gen(&target.children[0], input); // index
                self.gen(&target.children[1], input); // container
                self.mark_source(input, node.token.pos);
                self.emit(Opcode::LoadElement);
            }
            NodeKind::Field => {
                let name = target.token.text().as_bytes().to_vec();
                self.emit_arg(Opcode::PushString, Operand::Bytes(name));
                self.gen(&target.children[0], input);
                self.mark_source(input, node.token.pos);
                self.emit(Opcode::LoadElement);
            }
            _ => {
                self.error_at(
                    input,
                    node.token.pos,
                    "left hand of assignment must be a variable or element".to_owned(),
                );
            }
        }
    }

    fn gen_call_named(&mut self, node: &Node, input: &Input) {
        let name = node.token.text().to_owned();
        let arg_count = node.children.len() as i32;

        if let Some(symbol) = self.get_symbol(&name) {
            if symbol.kind == SymKind::Func && symbol.argc != arg_count {
                self.error_at(
                    input,
                    node.token.pos,
                    format!(
                        "function call {name} passed {arg_count} arguments, expected {}",
                        symbol.argc
                    ),
                );
                return;
            }

            let frame_op = self.emit_arg(Opcode::CallFrame, Operand::Int(0));
            for arg in &node.children {
                self.gen(arg, input);
            }
            self.emit_arg(Opcode::ArgCount, Operand::Int(arg_count));

            if symbol.kind == SymKind::Func {
                self.mark_symbol(&name);
                self.emit_arg(Opcode::Call, Self::operand_from_symbol(&symbol));
            } else {
                // a variable holding a function value
                let var_symbol = self
                    .get_symbol_relative(&name)
                    .expect("symbol was just found by the unadjusted lookup");
                self.mark_symbol(&name);
                let operand = Self::operand_from_symbol(&var_symbol);
                if var_symbol.scope == SymScope::Global {
                    self.emit_arg(Opcode::CallGlobal, operand);
                } else {
                    self.emit_arg(Opcode::CallLocal, operand);
                }
            }

            let ret_addr = self.offset as i32;
            self.patch_int(frame_op, ret_addr);
            return;
        }

        // unknown names call through the extension registry; arguments are
        // evaluated in reverse so the callee sees them in source order
        for arg in node.children.iter().rev() {
            self.gen(arg, input);
        }
        self.mark_symbol(&name);
        self.emit_arg(Opcode::PushString, Operand::Bytes(name.clone().into_bytes()));
        self.emit_arg(Opcode::CallExt, Operand::Int(arg_count));
    }

    fn gen_for(&mut self, node: &Node, input: &Input) {
        // reserve the iterator slot in the enclosing scope
        let iter_abs = {
            let scope = self.current_scope_mut();
            let offset = scope.stack_offset;
            scope.stack_offset += 1;
            offset
        };
        let iter_offset = iter_abs - self.current_frame().base_index;

        self.gen(&node.children[1], input);
        self.mark_source(input, node.token.pos);
        self.emit(Opcode::PushIterator);

        self.begin_loop();
        self.push_scope();

        // the loop variable gets a fresh slot each iteration
        let var_name = node.children[0].token.text().to_owned();
        self.set_var(&var_name);
        self.emit(Opcode::PushNone);

        let var_symbol = self
            .get_symbol_relative(&var_name)
            .expect("loop variable was just defined");

        self.emit_arg(Opcode::Iterate, Operand::Int(iter_offset));
        self.check_loop();

        // on success the element is on top; store it into the loop variable
        self.emit_arg(Opcode::LoadLocal, Self::operand_from_symbol(&var_symbol));

        self.gen(&node.children[2], input);

        self.pop_scope();
        self.end_loop();

        // drop the iterator and the spare variable slot left by the
        // exhausting iteration
        self.emit_arg(Opcode::Pop, Operand::Int(2));
        self.current_scope_mut().stack_offset -= 1;
    }

    fn gen_define_func(&mut self, node: &Node, input: &Input) {
        let name = node.token.text().to_owned();
        let params = &node.children[0];
        let param_count = params.children.len() as i32;

        // skip over the body in straight-line execution
        let end_jump = self.emit_arg(Opcode::Jump, Operand::Int(0));

        // the prepass registered globals with a placeholder address; the
        // main pass fixes the offset up in place
        let update = self.scope_is_global();
        if !self.set_func(&name, param_count, update) {
            self.error_at(input, node.token.pos, format!("function {name} already defined"));
            return;
        }

        // parameter scope
        self.push_scope();
        self.gen(params, input);

        self.mark_symbol(&name);
        self.emit_arg(Opcode::EnterFunc, Operand::Int(param_count));

        // function body frame
        self.push_frame(param_count);
        self.gen(&node.children[1], input);

        // guarantee the body returns
        if self.ops.last().map(|op| op.opcode) != Some(Opcode::ReturnFunc) {
            let delta = self.calling_offset();
            self.emit(Opcode::PushNone);
            self.emit_arg(Opcode::ReturnFunc, Operand::Int(delta));
        }

        self.pop_frame();
        self.pop_scope();

        let end_addr = self.offset as i32;
        self.patch_int(end_jump, end_addr);
    }
}

/// Compiles one input end to end: parse, generate IR, serialize.
pub(crate) fn compile(input: Input, options: &EngineOptions) -> Result<Program, Vec<EngineError>> {
    let mut parser = Parser::new(input, options);
    let root = parser.parse();
    let errors = parser.take_errors();
    let Some(root) = root else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let output = IrBuilder::generate(&root, parser.input(), options)?;

    match bytecode::serialize_ops(&output.ops, &output.globals) {
        Ok(program_bytes) => Ok(Program {
            bytecode: program_bytes,
            globals: output.globals,
            markers: output.markers,
        }),
        Err(err) => Err(vec![err]),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn generate_ops(code: &str) -> IrOutput {
        let options = EngineOptions::default();
        let input = Input::from_string("test.aug", code);
        let mut parser = Parser::new(input, &options);
        let root = parser.parse().expect("parse should succeed");
        IrBuilder::generate(&root, parser.input(), &options).expect("generation should succeed")
    }

    fn generate_err(code: &str) -> Vec<EngineError> {
        let options = EngineOptions::default();
        let input = Input::from_string("test.aug", code);
        let mut parser = Parser::new(input, &options);
        let root = parser.parse().expect("parse should succeed");
        IrBuilder::generate(&root, parser.input(), &options).expect_err("generation should fail")
    }

    fn opcodes(output: &IrOutput) -> Vec<Opcode> {
        output.ops.iter().map(|op| op.opcode).collect()
    }

    #[test]
    fn offsets_are_contiguous() {
        let output = generate_ops("var x = 1 + 2; x = x * 3;");
        let mut expected = 0u32;
        for op in &output.ops {
            assert_eq!(op.bytecode_offset, expected);
            expected += op.size();
        }
    }

    #[test]
    fn literal_and_arith_sequence() {
        // eval mode keeps the top-level expression result
        let output = generate_ops("1 + 2;");
        assert_eq!(
            opcodes(&output),
            vec![Opcode::PushInt, Opcode::PushInt, Opcode::Add, Opcode::Exit]
        );
    }

    #[test]
    fn hex_and_binary_literals_decode() {
        let output = generate_ops("0x10 + 0b101;");
        assert_eq!(output.ops[0].operand, Operand::Int(16));
        assert_eq!(output.ops[1].operand, Operand::Int(5));
    }

    #[test]
    fn double_define_in_one_scope_is_an_error() {
        let errors = generate_err("var x = 1; var x = 2;");
        assert!(errors[0].message.contains("already defined"));
    }

    #[test]
    fn shadowing_in_nested_scope_is_permitted() {
        generate_ops("var x = 1; if true { var x = 2; }");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let errors = generate_err("var x = y;");
        assert_eq!(errors[0].kind, ErrorKind::Ir);
        assert!(errors[0].message.contains("not defined"));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let errors = generate_err("break;");
        assert!(errors[0].message.contains("inside a loop"));
    }

    #[test]
    fn if_jump_is_patched_past_the_block() {
        let output = generate_ops("if true { var x = 1; }");
        let jump = output
            .ops
            .iter()
            .find(|op| op.opcode == Opcode::JumpZero)
            .expect("an if emits JUMP_ZERO");
        let Operand::Int(target) = jump.operand else {
            panic!("jump operand must be an int");
        };
        // the patched target is the EXIT at the end
        let exit_offset = output.ops.last().unwrap().bytecode_offset;
        assert_eq!(target as u32, exit_offset);
    }

    #[test]
    fn function_definition_registers_global_symbol() {
        let output = generate_ops("func add(a, b) { return a + b; }");
        let symbol = output.globals.get("add").expect("function symbol exists");
        assert_eq!(symbol.kind, SymKind::Func);
        assert_eq!(symbol.argc, 2);
        // the entry address points past the jump-over (1 opcode byte + 4
        // operand bytes)
        assert_eq!(symbol.offset, 5);
    }

    #[test]
    fn forward_reference_resolves_through_prepass() {
        // call precedes the definition in source order
        let output = generate_ops("func main() { return helper(); } func helper() { return 1; }");
        assert!(output.globals.get("helper").is_some());
        // the call is a CALL with a symbolic operand, resolved at
        // serialization
        let call = output.ops.iter().find(|op| op.opcode == Opcode::Call).unwrap();
        assert_eq!(call.operand, Operand::Symbol("helper".to_owned()));
    }

    #[test]
    fn wrong_argc_at_callsite_is_an_error() {
        let errors = generate_err("func f(a) { return a; } f(1, 2);");
        assert!(errors[0].message.contains("expected 1"));
    }

    #[test]
    fn named_call_emits_frame_args_count_call() {
        let output = generate_ops("func f() { return 1; } f();");
        let kinds = opcodes(&output);
        let call_at = kinds.iter().position(|&op| op == Opcode::Call).unwrap();
        assert_eq!(kinds[call_at - 1], Opcode::ArgCount);
        assert_eq!(kinds[call_at - 2], Opcode::CallFrame);
        // CALL_FRAME was patched to the address after CALL
        let frame = &output.ops[call_at - 2];
        let Operand::Int(ret) = frame.operand else {
            panic!("frame operand must be an int")
        };
        assert_eq!(ret as u32, output.ops[call_at].bytecode_offset + output.ops[call_at].size());
    }

    #[test]
    fn unknown_name_becomes_extension_call() {
        let output = generate_ops("probe(1, 2);");
        let kinds = opcodes(&output);
        assert!(kinds.contains(&Opcode::CallExt));
        assert!(kinds.contains(&Opcode::PushString));
        assert!(!kinds.contains(&Opcode::CallFrame));
    }

    #[test]
    fn params_resolve_below_the_frame_base() {
        let output = generate_ops("func f(a, b) { return b; }");
        // `return b` loads the second of two params: offset -1
        let push_local = output.ops.iter().find(|op| op.opcode == Opcode::PushLocal).unwrap();
        assert_eq!(push_local.operand, Operand::Int(-1));
    }

    #[test]
    fn for_loop_reserves_iterator_and_pops_two() {
        let output = generate_ops("for i in 0:3 { }");
        let kinds = opcodes(&output);
        assert!(kinds.contains(&Opcode::PushIterator));
        assert!(kinds.contains(&Opcode::Iterate));
        let last_pop = output
            .ops
            .iter()
            .rev()
            .find(|op| op.opcode == Opcode::Pop)
            .expect("for loop ends with a pop");
        assert_eq!(last_pop.operand, Operand::Int(2));
    }

    #[test]
    fn empty_call_still_emits_frame_and_arg_count() {
        let output = generate_ops("func f() { return 1; } f();");
        let kinds = opcodes(&output);
        let arg_count = output.ops.iter().find(|op| op.opcode == Opcode::ArgCount).unwrap();
        assert_eq!(arg_count.operand, Operand::Int(0));
        assert!(kinds.contains(&Opcode::CallFrame));
    }

    #[test]
    fn markers_record_faultable_sites() {
        let output = generate_ops("var x = 1 + 2;");
        assert!(output
            .markers
            .iter()
            .any(|marker| matches!(&marker.detail, MarkerDetail::Source { file, .. } if file == "test.aug")));
    }

    #[test]
    fn compile_produces_bytecode() {
        let options = EngineOptions::default();
        let program = compile(Input::from_string("test.aug", "var x = 41 + 1;"), &options).unwrap();
        assert!(!program.bytecode().is_empty());
        assert!(program.globals.get("x").is_some());
    }

    #[test]
    fn program_dump_load_round_trip() {
        let options = EngineOptions::default();
        let program = compile(Input::from_string("test.aug", "func f(a) { return a; }"), &options).unwrap();
        let blob = program.dump().unwrap();
        let restored = Program::load(&blob).unwrap();
        assert_eq!(program.bytecode(), restored.bytecode());
        assert_eq!(restored.globals.get("f").map(|s| s.argc), Some(1));
    }
}

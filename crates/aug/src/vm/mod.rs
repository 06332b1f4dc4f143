//! The stack virtual machine.
//!
//! Execution state is a flat cell stack plus four registers: instruction
//! pointer, frame base index, pending argument count, and the address of
//! the last fetched instruction (for marker lookup on faults). The
//! dispatch loop advances the instruction pointer past each operand before
//! executing, so jumps simply overwrite it.
//!
//! Calling convention: `CALL_FRAME` pushes the return address and the
//! saved base, arguments follow, and `CALL*` sets the base to the current
//! top so parameters resolve at negative offsets. `RETURN_FUNC` unwinds in
//! reverse and halts when it pops the sentinel return address.

mod binary;
mod call;
mod element;

use crate::{
    bytecode::{MarkerDetail, Opcode, OperandType, Program},
    error::{EngineError, SourceLoc},
    extension::ExtensionSet,
    heap::{Heap, HeapData, Iter, IterState, Map, Range, Str},
    lib_loader::{LibHandle, LibLoader},
    resource::EngineOptions,
    tracer::VmTracer,
    value::Value,
};

/// Return address marking the bottom frame of a host-initiated call; the
/// VM halts instead of jumping when RETURN_FUNC pops it.
pub(crate) const SENTINEL_RET_ADDR: i32 = -1;

/// Mutable execution state, detachable from the engine so `save_state`/
/// `load_state` can swap whole executions.
#[derive(Debug)]
pub(crate) struct VmState {
    pub stack: Vec<Value>,
    pub base_index: usize,
    pub arg_count: i32,
    /// `None` once halted (end of execution or a reported fault).
    pub ip: Option<usize>,
    pub last_ip: usize,
}

impl VmState {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(256),
            base_index: 0,
            arg_count: 0,
            ip: None,
            last_ip: 0,
        }
    }

    /// Releases every stack cell. Leaves the state ready for reuse.
    pub fn drain(&mut self, heap: &mut Heap) {
        for value in self.stack.drain(..) {
            value.drop_with_heap(heap);
        }
        self.base_index = 0;
        self.arg_count = 0;
        self.ip = None;
        self.last_ip = 0;
    }
}

/// Decoded operand of the instruction being executed.
enum Decoded {
    None,
    Bool(bool),
    Char(u8),
    Int(i32),
    Float(f32),
    Bytes(Vec<u8>),
}

impl Decoded {
    fn int(&self) -> i32 {
        match self {
            Self::Int(i) => *i,
            _ => unreachable!("operand decoded against the opcode table"),
        }
    }
}

/// One dispatch run over a program. Borrows the engine's heap, extension
/// tables and loader for the duration of the execution.
pub(crate) struct Vm<'a> {
    pub state: &'a mut VmState,
    pub program: &'a Program,
    pub heap: &'a mut Heap,
    pub global_exts: &'a mut ExtensionSet,
    pub script_exts: Option<&'a mut ExtensionSet>,
    pub lib_loader: &'a mut dyn LibLoader,
    pub tracer: &'a mut dyn VmTracer,
    pub options: &'a EngineOptions,
    /// Faults reported during this run; at most one thanks to halt-on-error.
    pub errors: Vec<EngineError>,
    /// Libraries opened by IMPORT_LIB during this run.
    pub loaded_libs: Vec<LibHandle>,
}

impl Vm<'_> {
    /// Runs the dispatch loop from `entry` until EXIT, the sentinel return,
    /// or a fault.
    pub fn run_from(&mut self, entry: usize) {
        self.state.ip = Some(entry);
        self.run();
    }

    fn run(&mut self) {
        while let Some(ip) = self.state.ip {
            let bytecode = self.program.bytecode();
            if ip >= bytecode.len() {
                self.fault(EngineError::runtime("instruction pointer ran past the bytecode"));
                break;
            }
            self.state.last_ip = ip;

            let Some(opcode) = Opcode::from_repr(bytecode[ip]) else {
                self.fault(EngineError::runtime(format!("invalid opcode {:#04x}", bytecode[ip])));
                break;
            };
            self.tracer.on_instruction(ip, opcode, self.state.stack.len());

            let mut cursor = ip + 1;
            let operand = match self.decode_operand(opcode, &mut cursor) {
                Ok(operand) => operand,
                Err(err) => {
                    self.fault(err);
                    break;
                }
            };

            // advance past the operand; jumping arms overwrite this
            self.state.ip = Some(cursor);

            if let Err(err) = self.exec_op(opcode, operand) {
                self.fault(err);
            }
        }
    }

    fn decode_operand(&self, opcode: Opcode, cursor: &mut usize) -> Result<Decoded, EngineError> {
        let bytes = self.program.bytecode();
        let truncated = || EngineError::runtime("bytecode ends inside an operand");
        match opcode.operand_type() {
            OperandType::None => Ok(Decoded::None),
            OperandType::Bool => {
                let byte = *bytes.get(*cursor).ok_or_else(truncated)?;
                *cursor += 1;
                Ok(Decoded::Bool(byte != 0))
            }
            OperandType::Char => {
                let byte = *bytes.get(*cursor).ok_or_else(truncated)?;
                *cursor += 1;
                Ok(Decoded::Char(byte))
            }
            OperandType::Int => {
                let slice = bytes.get(*cursor..*cursor + 4).ok_or_else(truncated)?;
                *cursor += 4;
                Ok(Decoded::Int(i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]])))
            }
            OperandType::Float => {
                let slice = bytes.get(*cursor..*cursor + 4).ok_or_else(truncated)?;
                *cursor += 4;
                Ok(Decoded::Float(f32::from_le_bytes([
                    slice[0], slice[1], slice[2], slice[3],
                ])))
            }
            OperandType::Bytes => {
                let start = *cursor;
                while *cursor < bytes.len() && bytes[*cursor] != 0 {
                    *cursor += 1;
                }
                if *cursor >= bytes.len() {
                    return Err(truncated());
                }
                let data = bytes[start..*cursor].to_vec();
                *cursor += 1; // terminator
                Ok(Decoded::Bytes(data))
            }
        }
    }

    // ------------------------------------------------------------------
    // Stack primitives
    // ------------------------------------------------------------------

    fn push(&mut self, value: Value) -> Result<(), EngineError> {
        if self.state.stack.len() >= self.options.stack_size {
            value.drop_with_heap(self.heap);
            return Err(EngineError::runtime("stack overflow"));
        }
        self.state.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, EngineError> {
        self.state
            .stack
            .pop()
            .ok_or_else(|| EngineError::runtime("stack underflow"))
    }

    /// Resolves a frame-relative offset (possibly negative, for params)
    /// into an absolute stack index.
    fn local_index(&self, offset: i32) -> Result<usize, EngineError> {
        let index = self.state.base_index as i64 + i64::from(offset);
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.state.stack.len())
            .ok_or_else(|| EngineError::runtime(format!("local offset {offset} is outside the stack")))
    }

    fn global_index(&self, offset: i32) -> Result<usize, EngineError> {
        usize::try_from(offset)
            .ok()
            .filter(|&i| i < self.state.stack.len())
            .ok_or_else(|| EngineError::runtime(format!("global index {offset} is outside the stack")))
    }

    /// The symbol name recorded at the current instruction, for call-site
    /// diagnostics.
    fn marker_symbol(&self) -> Option<&str> {
        match self.program.marker_at(self.state.last_ip as u32).map(|m| &m.detail) {
            Some(MarkerDetail::Symbol(name)) => Some(name),
            _ => None,
        }
    }

    /// Reports a fault: attaches the marker-recorded source location,
    /// notifies the tracer, and clears the instruction pointer so cascading
    /// errors are suppressed.
    fn fault(&mut self, mut err: EngineError) {
        if err.loc.is_none() {
            if let Some(MarkerDetail::Source { file, line, col }) =
                self.program.marker_at(self.state.last_ip as u32).map(|m| &m.detail)
            {
                err.loc = Some(SourceLoc {
                    file: file.clone(),
                    line: *line,
                    col: *col,
                });
            }
        }
        self.tracer.on_error(&err);
        self.errors.push(err);
        self.state.ip = None;
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn exec_op(&mut self, opcode: Opcode, operand: Decoded) -> Result<(), EngineError> {
        match opcode {
            Opcode::Exit => {
                self.state.ip = None;
            }
            Opcode::NoOp => {}
            Opcode::Pop => {
                for _ in 0..operand.int() {
                    let value = self.pop()?;
                    value.drop_with_heap(self.heap);
                }
            }

            // constants
            Opcode::PushNone => self.push(Value::None)?,
            Opcode::PushBool => {
                let Decoded::Bool(b) = operand else { unreachable!() };
                self.push(Value::Bool(b))?;
            }
            Opcode::PushChar => {
                let Decoded::Char(c) = operand else { unreachable!() };
                self.push(Value::Char(c))?;
            }
            Opcode::PushInt => self.push(Value::Int(operand.int()))?,
            Opcode::PushFloat => {
                let Decoded::Float(f) = operand else { unreachable!() };
                self.push(Value::Float(f))?;
            }
            Opcode::PushString => {
                let Decoded::Bytes(bytes) = operand else { unreachable!() };
                let id = self.heap.allocate(HeapData::Str(Str::from_bytes(bytes)));
                self.push(Value::Ref(id))?;
            }
            Opcode::PushFunc => self.push(Value::Func(operand.int()))?,

            // aggregate builders
            Opcode::PushArray => {
                let count = operand.int();
                let mut values = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    values.push(self.pop()?);
                }
                let id = self.heap.allocate(HeapData::Array(values));
                self.push(Value::Ref(id))?;
            }
            Opcode::PushMap => {
                let count = operand.int();
                let mut map = Map::new();
                for _ in 0..count {
                    let value = self.pop()?;
                    let key_value = self.pop()?;
                    let Some(key) = key_value.as_map_key(self.heap) else {
                        let message =
                            format!("map key must be an int or string, not {}", key_value.type_name(self.heap));
                        key_value.drop_with_heap(self.heap);
                        value.drop_with_heap(self.heap);
                        for stale in map.drain_all() {
                            stale.drop_with_heap(self.heap);
                        }
                        return Err(EngineError::runtime(message));
                    };
                    key_value.drop_with_heap(self.heap);
                    if let Some(old) = map.insert(key, value) {
                        old.drop_with_heap(self.heap);
                    }
                }
                let id = self.heap.allocate(HeapData::Map(map));
                self.push(Value::Ref(id))?;
            }
            Opcode::PushRange => {
                let to = self.pop()?;
                let from = self.pop()?;
                let (Value::Int(from_i), Value::Int(to_i)) = (&from, &to) else {
                    let message = format!(
                        "range bounds must be ints, not {} and {}",
                        from.type_name(self.heap),
                        to.type_name(self.heap)
                    );
                    from.drop_with_heap(self.heap);
                    to.drop_with_heap(self.heap);
                    return Err(EngineError::runtime(message));
                };
                let id = self.heap.allocate(HeapData::Range(Range {
                    from: *from_i,
                    to: *to_i,
                }));
                self.push(Value::Ref(id))?;
            }
            Opcode::PushIterator => {
                let iterable = self.pop()?;
                if !element::is_iterable(&iterable, self.heap) {
                    let message = format!("type {} is not iterable", iterable.type_name(self.heap));
                    iterable.drop_with_heap(self.heap);
                    return Err(EngineError::runtime(message));
                }
                let id = self.heap.allocate(HeapData::Iter(Iter {
                    iterable,
                    state: IterState::Fresh,
                }));
                self.push(Value::Ref(id))?;
            }
            Opcode::Iterate => {
                let index = self.local_index(operand.int())?;
                let Value::Ref(iter_id) = &self.state.stack[index] else {
                    return Err(EngineError::runtime("iterate target is not an iterator"));
                };
                match element::iterate(*iter_id, self.heap)? {
                    Some(element) => {
                        self.push(element)?;
                        self.push(Value::Bool(true))?;
                    }
                    None => self.push(Value::Bool(false))?,
                }
            }

            // locals and globals
            Opcode::PushLocal => {
                let index = self.local_index(operand.int())?;
                let value = self.state.stack[index].clone_with_heap(self.heap);
                self.push(value)?;
            }
            Opcode::PushGlobal => {
                let index = self.global_index(operand.int())?;
                let value = self.state.stack[index].clone_with_heap(self.heap);
                self.push(value)?;
            }
            Opcode::LoadLocal => {
                let index = self.local_index(operand.int())?;
                let top = self.pop()?;
                let old = std::mem::replace(&mut self.state.stack[index], top);
                old.drop_with_heap(self.heap);
            }
            Opcode::LoadGlobal => {
                let index = self.global_index(operand.int())?;
                let top = self.pop()?;
                let old = std::mem::replace(&mut self.state.stack[index], top);
                old.drop_with_heap(self.heap);
            }
            Opcode::PushElement => {
                let container = self.pop()?;
                let index = self.pop()?;
                let result = element::get_element(&index, &container, self.heap);
                container.drop_with_heap(self.heap);
                index.drop_with_heap(self.heap);
                self.push(result?)?;
            }
            Opcode::LoadElement => {
                let container = self.pop()?;
                let index = self.pop()?;
                let value = self.pop()?;
                let result = element::set_element(&container, &index, value, self.heap);
                container.drop_with_heap(self.heap);
                index.drop_with_heap(self.heap);
                result?;
            }

            // arithmetic and comparison
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Pow
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Lt
            | Opcode::Lte
            | Opcode::Gt
            | Opcode::Gte
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::ApproxEq => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = binary::apply_binary(opcode, &lhs, &rhs, self.heap, self.options.approx_threshold);
                lhs.drop_with_heap(self.heap);
                rhs.drop_with_heap(self.heap);
                self.push(result?)?;
            }
            Opcode::Not | Opcode::Neg => {
                let value = self.pop()?;
                let result = binary::apply_unary(opcode, &value, self.heap);
                value.drop_with_heap(self.heap);
                self.push(result?)?;
            }

            // control flow
            Opcode::Jump => {
                self.state.ip = Some(operand.int() as usize);
            }
            Opcode::JumpZero => {
                let cond = self.pop()?;
                if !cond.to_bool(self.heap) {
                    self.state.ip = Some(operand.int() as usize);
                }
                cond.drop_with_heap(self.heap);
            }
            Opcode::JumpNzero => {
                let cond = self.pop()?;
                if cond.to_bool(self.heap) {
                    self.state.ip = Some(operand.int() as usize);
                }
                cond.drop_with_heap(self.heap);
            }

            // calls
            Opcode::CallFrame => {
                let ret_addr = operand.int();
                self.push(Value::Int(ret_addr))?;
                self.push(Value::Int(self.state.base_index as i32))?;
            }
            Opcode::ArgCount => {
                self.state.arg_count = operand.int();
            }
            Opcode::Call => {
                let addr = operand.int();
                self.tracer.on_call(addr as usize, self.state.arg_count);
                self.state.ip = Some(addr as usize);
                self.state.base_index = self.state.stack.len();
            }
            Opcode::CallTop => {
                let callee = self.pop()?;
                let Value::Func(addr) = &callee else {
                    let name = self.marker_symbol().unwrap_or("(anonymous)").to_owned();
                    callee.drop_with_heap(self.heap);
                    return Err(EngineError::runtime(format!("value {name} is not a function")));
                };
                let addr = *addr;
                self.tracer.on_call(addr as usize, self.state.arg_count);
                self.state.ip = Some(addr as usize);
                self.state.base_index = self.state.stack.len();
            }
            Opcode::CallLocal => {
                let index = self.local_index(operand.int())?;
                let Value::Func(addr) = &self.state.stack[index] else {
                    let name = self.marker_symbol().unwrap_or("(anonymous)");
                    return Err(EngineError::runtime(format!("local variable {name} is not a function")));
                };
                let addr = *addr;
                self.tracer.on_call(addr as usize, self.state.arg_count);
                self.state.ip = Some(addr as usize);
                self.state.base_index = self.state.stack.len();
            }
            Opcode::CallGlobal => {
                let index = self.global_index(operand.int())?;
                let Value::Func(addr) = &self.state.stack[index] else {
                    let name = self.marker_symbol().unwrap_or("(anonymous)");
                    return Err(EngineError::runtime(format!("global variable {name} is not a function")));
                };
                let addr = *addr;
                self.tracer.on_call(addr as usize, self.state.arg_count);
                self.state.ip = Some(addr as usize);
                self.state.base_index = self.state.stack.len();
            }
            Opcode::EnterFunc => {
                let param_count = operand.int();
                if self.state.arg_count != param_count {
                    let name = self.marker_symbol().unwrap_or("anonymous");
                    return Err(EngineError::runtime(format!(
                        "incorrect number of arguments passed to {name}: received {} expected {param_count}",
                        self.state.arg_count
                    )));
                }
            }
            Opcode::ReturnFunc => {
                let ret_value = self.pop()?;
                for _ in 0..operand.int() {
                    let local = self.pop()?;
                    local.drop_with_heap(self.heap);
                }

                let saved_base = self.pop()?;
                let Value::Int(saved_base) = saved_base else {
                    return Err(EngineError::runtime("call frame is missing the saved base index"));
                };
                self.state.base_index = saved_base.max(0) as usize;

                let ret_addr = self.pop()?;
                let Value::Int(ret_addr) = ret_addr else {
                    return Err(EngineError::runtime("call frame is missing the return address"));
                };
                self.tracer.on_return(ret_addr);
                if ret_addr == SENTINEL_RET_ADDR {
                    self.state.ip = None;
                } else {
                    self.state.ip = Some(ret_addr as usize);
                }

                self.push(ret_value)?;
            }
            Opcode::CallExt => self.call_extension(operand.int())?,
            Opcode::ImportLib => {
                let Decoded::Bytes(name) = operand else { unreachable!() };
                self.import_library(&String::from_utf8_lossy(&name))?;
            }
        }
        Ok(())
    }
}

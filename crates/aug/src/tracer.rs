//! Execution tracing hooks for the VM.
//!
//! A [`VmTracer`] observes the dispatch loop without affecting execution.
//! [`NoopTracer`] is the default; [`StderrTracer`] prints a line per
//! instruction for debugging; [`RecordingTracer`] captures events for test
//! assertions.

use crate::{bytecode::Opcode, error::EngineError};

/// Observer interface for VM execution.
pub trait VmTracer {
    /// Called before each instruction executes.
    fn on_instruction(&mut self, addr: usize, opcode: Opcode, stack_len: usize) {
        let _ = (addr, opcode, stack_len);
    }

    /// Called when control transfers into a function body.
    fn on_call(&mut self, target: usize, arg_count: i32) {
        let _ = (target, arg_count);
    }

    /// Called when a function returns to its caller.
    fn on_return(&mut self, ret_addr: i32) {
        let _ = ret_addr;
    }

    /// Called when the VM faults.
    fn on_error(&mut self, err: &EngineError) {
        let _ = err;
    }
}

/// Tracer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Shared-handle forwarding, so a host can keep a handle to a tracer it
/// hands to the engine and inspect it afterwards.
impl<T: VmTracer> VmTracer for std::rc::Rc<std::cell::RefCell<T>> {
    fn on_instruction(&mut self, addr: usize, opcode: Opcode, stack_len: usize) {
        self.borrow_mut().on_instruction(addr, opcode, stack_len);
    }

    fn on_call(&mut self, target: usize, arg_count: i32) {
        self.borrow_mut().on_call(target, arg_count);
    }

    fn on_return(&mut self, ret_addr: i32) {
        self.borrow_mut().on_return(ret_addr);
    }

    fn on_error(&mut self, err: &EngineError) {
        self.borrow_mut().on_error(err);
    }
}

/// Tracer that prints each instruction to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, addr: usize, opcode: Opcode, stack_len: usize) {
        eprintln!("[{addr:>6}] {opcode:<14} stack={stack_len}");
    }

    fn on_call(&mut self, target: usize, arg_count: i32) {
        eprintln!("         call -> {target} argc={arg_count}");
    }

    fn on_return(&mut self, ret_addr: i32) {
        eprintln!("         return -> {ret_addr}");
    }

    fn on_error(&mut self, err: &EngineError) {
        eprintln!("         fault: {err}");
    }
}

/// One recorded trace event.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Instruction { addr: usize, opcode: Opcode },
    Call { target: usize, arg_count: i32 },
    Return { ret_addr: i32 },
    Error { message: String },
}

/// Tracer that records events for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Returns the opcodes executed, in order.
    #[must_use]
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Instruction { opcode, .. } => Some(*opcode),
                _ => None,
            })
            .collect()
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, addr: usize, opcode: Opcode, _stack_len: usize) {
        self.events.push(TraceEvent::Instruction { addr, opcode });
    }

    fn on_call(&mut self, target: usize, arg_count: i32) {
        self.events.push(TraceEvent::Call { target, arg_count });
    }

    fn on_return(&mut self, ret_addr: i32) {
        self.events.push(TraceEvent::Return { ret_addr });
    }

    fn on_error(&mut self, err: &EngineError) {
        self.events.push(TraceEvent::Error {
            message: err.message.clone(),
        });
    }
}

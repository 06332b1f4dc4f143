#![doc = include_str!("../../../README.md")]

mod ast;
mod bytecode;
mod error;
mod extension;
mod heap;
mod input;
mod io;
mod ir;
mod lexer;
mod lib_loader;
mod object;
mod parser;
mod resource;
mod run;
mod symbol;
mod tracer;
mod value;
mod vm;

pub use crate::{
    bytecode::{Opcode, Program},
    error::{EngineError, ErrorKind, SourceLoc},
    extension::{Extension, ExtensionSet},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    lib_loader::{LIB_ENTRY_NAME, LibHandle, LibLoader, NulLibLoader, RegisterLibFn},
    object::Object,
    resource::{DEFAULT_APPROX_THRESHOLD, DEFAULT_STACK_SIZE, EngineOptions},
    run::{Aug, ExecState, Script},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    value::UserdataId,
};

//! The embedding surface.
//!
//! [`Aug`] is one engine instance: heap, execution state, extension
//! registry, library loader, and the single error handler. A host compiles
//! and runs code through `execute`/`eval`, keeps long-lived scripts through
//! `load`/`call`/`unload`, and brackets nested executions with
//! `save_state`/`load_state`.
//!
//! One engine is single-threaded; values never move between engines.

use std::path::Path;

use crate::{
    bytecode::Program,
    error::{EngineError, ErrorKind},
    extension::{Extension, ExtensionSet},
    heap::Heap,
    input::Input,
    ir,
    lib_loader::{LibHandle, LibLoader, NulLibLoader},
    object::{Object, object_to_value, value_to_object},
    resource::EngineOptions,
    symbol::SymKind,
    tracer::{NoopTracer, VmTracer},
    value::Value,
    vm::{SENTINEL_RET_ADDR, Vm, VmState},
};

/// A loaded script: its compiled program, the stack snapshot holding its
/// globals between calls, and the extensions its imports registered.
pub struct Script {
    program: Program,
    stack_state: Vec<Value>,
    extensions: ExtensionSet,
    libs: Vec<LibHandle>,
}

impl Script {
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Extensions registered by this script's imported libraries.
    #[must_use]
    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }
}

/// Opaque snapshot of the engine's execution pointers and stack, used to
/// nest executions on one engine.
pub struct ExecState {
    state: VmState,
}

/// One scripting engine instance.
pub struct Aug {
    options: EngineOptions,
    heap: Heap,
    exec: VmState,
    extensions: ExtensionSet,
    lib_loader: Box<dyn LibLoader>,
    tracer: Box<dyn VmTracer>,
    error_handler: Box<dyn FnMut(&EngineError)>,
}

impl Aug {
    /// Creates an engine. Every diagnostic flows through the error handler,
    /// which defaults to stderr until [`Aug::set_error_handler`] replaces
    /// it.
    #[must_use]
    pub fn startup(options: EngineOptions) -> Self {
        Self {
            options,
            heap: Heap::new(),
            exec: VmState::new(),
            extensions: ExtensionSet::new(),
            lib_loader: Box::new(NulLibLoader),
            tracer: Box::new(NoopTracer),
            error_handler: Box::new(|err| eprintln!("{err}")),
        }
    }

    /// Tears the engine down, releasing every value it still owns.
    pub fn shutdown(mut self) {
        self.exec.drain(&mut self.heap);
    }

    pub fn set_error_handler(&mut self, handler: impl FnMut(&EngineError) + 'static) {
        self.error_handler = Box::new(handler);
    }

    pub fn set_lib_loader(&mut self, loader: impl LibLoader + 'static) {
        self.lib_loader = Box::new(loader);
    }

    pub fn set_tracer(&mut self, tracer: impl VmTracer + 'static) {
        self.tracer = Box::new(tracer);
    }

    /// Registers a native function under `name` in the engine-global
    /// registry. Script-local registration happens through `import` and
    /// the library loader instead.
    pub fn register(&mut self, name: &str, func: impl FnMut(&[Object]) -> Object + 'static) {
        self.extensions.register(name, Box::new(func) as Extension);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.extensions.unregister(name)
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Live heap values; zero after balanced executions. Exposed for leak
    /// assertions.
    #[must_use]
    pub fn live_heap_values(&self) -> usize {
        self.heap.live_count()
    }

    // ------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------

    /// Compiles a source file to a program without executing it.
    pub fn compile_file(&mut self, path: impl AsRef<Path>) -> Result<Program, EngineError> {
        let path = path.as_ref();
        let input = match Input::open(path) {
            Ok(input) => input,
            Err(io_err) => {
                let err = EngineError::new(
                    ErrorKind::Parse,
                    format!("failed to open script {}: {io_err}", path.display()),
                );
                (self.error_handler)(&err);
                return Err(err);
            }
        };
        self.compile_input(input)
    }

    /// Compiles an in-memory code string. String-backed compilation keeps
    /// top-level expression results so `eval` can return the last one.
    pub fn compile_str(&mut self, name: &str, code: &str) -> Result<Program, EngineError> {
        self.compile_input(Input::from_string(name, code))
    }

    fn compile_input(&mut self, input: Input) -> Result<Program, EngineError> {
        match ir::compile(input, &self.options) {
            Ok(program) => Ok(program),
            Err(errors) => Err(self.report_and_first(errors)),
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Compiles and runs a file once, discarding all state afterwards.
    pub fn execute(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let program = self.compile_file(path)?;
        self.execute_program(&program)
    }

    /// Runs an already-compiled program once (for example one restored via
    /// [`Program::load`]).
    pub fn execute_program(&mut self, program: &Program) -> Result<(), EngineError> {
        let mut script_exts = ExtensionSet::new();
        let (errors, libs) = self.run_program(program, &mut script_exts);
        for handle in libs {
            self.lib_loader.close(handle);
        }
        self.exec.drain(&mut self.heap);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(self.report_and_first(errors))
        }
    }

    /// Compiles and runs a code string, returning the value left on top of
    /// the stack (None when the code left nothing).
    pub fn eval(&mut self, code: &str) -> Result<Object, EngineError> {
        let program = self.compile_str("eval", code)?;
        let mut script_exts = ExtensionSet::new();
        let (errors, libs) = self.run_program(&program, &mut script_exts);
        for handle in libs {
            self.lib_loader.close(handle);
        }
        if !errors.is_empty() {
            self.exec.drain(&mut self.heap);
            return Err(self.report_and_first(errors));
        }

        let result = match self.exec.stack.pop() {
            Some(value) => {
                let object = value_to_object(&value, &self.heap);
                value.drop_with_heap(&mut self.heap);
                object
            }
            None => Object::None,
        };
        self.exec.drain(&mut self.heap);
        Ok(result)
    }

    /// Compiles a file, runs its top level, and snapshots the resulting
    /// stack into a [`Script`] so its globals survive across [`Aug::call`]
    /// invocations.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<Script, EngineError> {
        let program = self.compile_file(path)?;
        let mut extensions = ExtensionSet::new();
        let (errors, libs) = self.run_program(&program, &mut extensions);
        if !errors.is_empty() {
            self.exec.drain(&mut self.heap);
            for handle in libs {
                self.lib_loader.close(handle);
            }
            return Err(self.report_and_first(errors));
        }

        let stack_state = std::mem::take(&mut self.exec.stack);
        self.exec.drain(&mut self.heap);
        Ok(Script {
            program,
            stack_state,
            extensions,
            libs,
        })
    }

    /// Releases a script: its stack snapshot, and the libraries it loaded.
    pub fn unload(&mut self, script: Script) {
        let Script {
            stack_state, libs, ..
        } = script;
        for value in stack_state {
            value.drop_with_heap(&mut self.heap);
        }
        for handle in libs {
            self.lib_loader.close(handle);
        }
    }

    /// Calls a global function defined by a loaded script.
    ///
    /// The script's stack snapshot is re-pushed so globals are visible,
    /// a sentinel frame and the arguments go on top, and the dispatch loop
    /// runs until the sentinel return halts it. Afterwards the (possibly
    /// mutated) globals are snapshotted back into the script.
    pub fn call(&mut self, script: &mut Script, name: &str, args: &[Object]) -> Result<Object, EngineError> {
        let Some(symbol) = script.program.globals.get(name).cloned() else {
            return Err(self.report_one(EngineError::runtime(format!("function {name} not found in script"))));
        };
        if symbol.kind != SymKind::Func {
            return Err(self.report_one(EngineError::runtime(format!("global {name} is not a function"))));
        }
        if symbol.argc != args.len() as i32 {
            return Err(self.report_one(EngineError::runtime(format!(
                "function {name} passed {} arguments, expected {}",
                args.len(),
                symbol.argc
            ))));
        }
        if script.stack_state.len() + 2 + args.len() >= self.options.stack_size {
            return Err(self.report_one(EngineError::runtime("stack overflow")));
        }

        // keep whatever execution state the engine held; restore on exit
        let saved = std::mem::replace(&mut self.exec, VmState::new());
        self.exec.stack = std::mem::take(&mut script.stack_state);

        // sentinel frame: return address, then saved base
        self.exec.stack.push(Value::Int(SENTINEL_RET_ADDR));
        self.exec.stack.push(Value::Int(0));
        for arg in args {
            let value = object_to_value(arg, &mut self.heap);
            self.exec.stack.push(value);
        }
        self.exec.base_index = self.exec.stack.len();
        self.exec.arg_count = args.len() as i32;

        let mut vm = Vm {
            state: &mut self.exec,
            program: &script.program,
            heap: &mut self.heap,
            global_exts: &mut self.extensions,
            script_exts: Some(&mut script.extensions),
            lib_loader: &mut *self.lib_loader,
            tracer: &mut *self.tracer,
            options: &self.options,
            errors: Vec::new(),
            loaded_libs: Vec::new(),
        };
        vm.run_from(symbol.offset as usize);
        let errors = vm.errors;
        let libs = vm.loaded_libs;
        script.libs.extend(libs);

        let result = if errors.is_empty() {
            match self.exec.stack.pop() {
                Some(value) => {
                    let object = value_to_object(&value, &self.heap);
                    value.drop_with_heap(&mut self.heap);
                    Ok(object)
                }
                None => Ok(Object::None),
            }
        } else {
            Err(self.report_and_first(errors))
        };

        // the remaining stack is the script's global region again
        script.stack_state = std::mem::take(&mut self.exec.stack);
        self.exec = saved;
        result
    }

    // ------------------------------------------------------------------
    // State snapshots
    // ------------------------------------------------------------------

    /// Detaches the current execution state, leaving the engine with a
    /// fresh one. Pair with [`Aug::load_state`] around nested executions.
    pub fn save_state(&mut self) -> ExecState {
        ExecState {
            state: std::mem::replace(&mut self.exec, VmState::new()),
        }
    }

    /// Restores a previously saved execution state, releasing whatever the
    /// engine accumulated in between.
    pub fn load_state(&mut self, state: ExecState) {
        self.exec.drain(&mut self.heap);
        self.exec = state.state;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Resets the execution state and runs `program` from the top.
    fn run_program(&mut self, program: &Program, script_exts: &mut ExtensionSet) -> (Vec<EngineError>, Vec<LibHandle>) {
        self.exec.drain(&mut self.heap);
        let mut vm = Vm {
            state: &mut self.exec,
            program,
            heap: &mut self.heap,
            global_exts: &mut self.extensions,
            script_exts: Some(script_exts),
            lib_loader: &mut *self.lib_loader,
            tracer: &mut *self.tracer,
            options: &self.options,
            errors: Vec::new(),
            loaded_libs: Vec::new(),
        };
        vm.run_from(0);
        (vm.errors, vm.loaded_libs)
    }

    fn report_one(&mut self, err: EngineError) -> EngineError {
        (self.error_handler)(&err);
        err
    }

    fn report_and_first(&mut self, errors: Vec<EngineError>) -> EngineError {
        for err in &errors {
            (self.error_handler)(err);
        }
        errors.into_iter().next().expect("caller checked that errors exist")
    }
}

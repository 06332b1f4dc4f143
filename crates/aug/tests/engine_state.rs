mod common;

use aug::{Aug, EngineOptions, Object, Program};
use common::write_script;
use pretty_assertions::assert_eq;

#[test]
fn heap_stays_balanced_across_runs() {
    let mut aug = Aug::startup(EngineOptions::default());
    for _ in 0..3 {
        aug.eval(r#"var m = {"xs": [1, 2, 3], "s": "text"}; m["xs"][0];"#).unwrap();
        assert_eq!(aug.live_heap_values(), 0);
    }
    aug.shutdown();
}

#[test]
fn load_call_unload_releases_everything() {
    let path = write_script(
        "state",
        r#"var names = ["ada", "brian"]; func first() { return names[0]; }"#,
    );
    let mut aug = Aug::startup(EngineOptions::default());
    let mut script = aug.load(&path).unwrap();
    assert!(aug.live_heap_values() > 0, "the script snapshot holds its globals");

    assert_eq!(aug.call(&mut script, "first", &[]).unwrap(), Object::String("ada".to_owned()));

    aug.unload(script);
    assert_eq!(aug.live_heap_values(), 0);
    aug.shutdown();
}

#[test]
fn save_state_brackets_a_nested_execution() {
    let fib = write_script(
        "nested_fib",
        "func fib(n) { if n < 2 { return n; } return fib(n-1) + fib(n-2); }",
    );
    let mut aug = Aug::startup(EngineOptions::default());
    let mut script = aug.load(&fib).unwrap();

    let state = aug.save_state();
    // a nested evaluation runs on the same engine while the state is parked
    assert_eq!(aug.eval("10 * 4;").unwrap(), Object::Int(40));
    aug.load_state(state);

    // the original script still works after restoring
    assert_eq!(aug.call(&mut script, "fib", &[Object::Int(7)]).unwrap(), Object::Int(13));
    aug.unload(script);
    aug.shutdown();
}

#[test]
fn execute_runs_a_file_to_completion() {
    let path = write_script("exec", "var total = 0; for i in 0:5 { total = total + i; } report(total);");
    let mut aug = Aug::startup(EngineOptions::default());

    use std::{cell::RefCell, rc::Rc};
    let seen: Rc<RefCell<Option<Object>>> = Rc::default();
    let sink = Rc::clone(&seen);
    aug.register("report", move |args| {
        *sink.borrow_mut() = args.first().cloned();
        Object::None
    });

    aug.execute(&path).unwrap();
    assert_eq!(*seen.borrow(), Some(Object::Int(10)));
    assert_eq!(aug.live_heap_values(), 0);
    aug.shutdown();
}

#[test]
fn compiled_programs_dump_and_reload() {
    let path = write_script("dump", "emit(6 * 7);");
    let mut aug = Aug::startup(EngineOptions::default());

    use std::{cell::RefCell, rc::Rc};
    let seen: Rc<RefCell<Vec<Object>>> = Rc::default();
    let sink = Rc::clone(&seen);
    aug.register("emit", move |args| {
        sink.borrow_mut().extend(args.iter().cloned());
        Object::None
    });

    let program = aug.compile_file(&path).unwrap();
    let blob = program.dump().unwrap();
    let restored = Program::load(&blob).unwrap();
    assert_eq!(program.bytecode(), restored.bytecode());

    aug.execute_program(&restored).unwrap();
    assert_eq!(*seen.borrow(), vec![Object::Int(42)]);
    aug.shutdown();
}

#[test]
fn import_script_inlines_at_compile_time() {
    let dir = std::env::temp_dir();
    let lib_name = format!("aug_test_importee_{}.aug", std::process::id());
    std::fs::write(dir.join(&lib_name), "func triple(x) { return x * 3; }").unwrap();

    let main = write_script("importer", &format!("import \"{lib_name}\"; var nine = triple(3);"));
    let mut aug = Aug::startup(EngineOptions::default());
    let mut script = aug.load(&main).unwrap();

    // the imported function is a global of the combined program
    assert_eq!(aug.call(&mut script, "triple", &[Object::Int(5)]).unwrap(), Object::Int(15));

    aug.unload(script);
    aug.shutdown();
}

#[test]
fn tracer_observes_instructions_and_calls() {
    use std::{cell::RefCell, rc::Rc};

    use aug::{Opcode, RecordingTracer, TraceEvent};

    let mut aug = Aug::startup(EngineOptions::default());
    let tracer = Rc::new(RefCell::new(RecordingTracer::new()));
    aug.set_tracer(Rc::clone(&tracer));

    aug.eval("func id(x) { return x; } id(3);").unwrap();

    let tracer = tracer.borrow();
    let opcodes = tracer.opcodes();
    assert!(opcodes.contains(&Opcode::Call));
    assert!(opcodes.contains(&Opcode::ReturnFunc));
    assert!(tracer
        .events()
        .iter()
        .any(|event| matches!(event, TraceEvent::Call { arg_count: 1, .. })));
    aug.shutdown();
}

#[test]
fn arithmetic_laws() {
    let mut aug = Aug::startup(EngineOptions::default());
    // + and * commute over numeric types
    assert_eq!(aug.eval("2 + 3 == 3 + 2;").unwrap(), Object::Bool(true));
    assert_eq!(aug.eval("2.5 * 4 ~= 4 * 2.5;").unwrap(), Object::Bool(true));
    // - and / do not
    assert_eq!(aug.eval("5 - 2 == 2 - 5;").unwrap(), Object::Bool(false));
    assert_eq!(aug.eval("1 / 2 ~= 0.5;").unwrap(), Object::Bool(true));
    aug.shutdown();
}

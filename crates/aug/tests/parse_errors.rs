use std::{cell::RefCell, rc::Rc};

use aug::{Aug, EngineOptions, ErrorKind};
use pretty_assertions::assert_eq;

fn eval_err(code: &str) -> aug::EngineError {
    let mut aug = Aug::startup(EngineOptions::default());
    aug.set_error_handler(|_| {});
    let err = aug.eval(code).expect_err("eval should fail");
    aug.shutdown();
    err
}

#[test]
fn unterminated_string_is_a_lex_error() {
    let err = eval_err("var s = \"oops");
    assert_eq!(err.kind, ErrorKind::Lex);
    assert!(err.message.contains("unterminated"));
}

#[test]
fn bad_escape_is_a_lex_error() {
    let err = eval_err(r#"var s = "a\qb";"#);
    assert_eq!(err.kind, ErrorKind::Lex);
    assert!(err.message.contains("escape"));
}

#[test]
fn missing_paren_is_a_parse_error_with_a_hint() {
    let err = eval_err("var x = (1 + 2;");
    assert_eq!(err.kind, ErrorKind::Parse);
    let loc = err.loc.expect("parse errors carry a location");
    assert_eq!(loc.file, "eval");
    assert!(err.hint.expect("parse errors carry a hint").contains('^'));
}

#[test]
fn undefined_name_is_an_ir_error() {
    let err = eval_err("var x = missing_name + 1;");
    assert_eq!(err.kind, ErrorKind::Ir);
    assert!(err.message.contains("not defined"));
}

#[test]
fn redefinition_is_an_ir_error() {
    let err = eval_err("var x = 1; var x = 2;");
    assert_eq!(err.kind, ErrorKind::Ir);
    assert!(err.message.contains("already defined"));
}

#[test]
fn continue_outside_loop_is_an_ir_error() {
    let err = eval_err("continue;");
    assert_eq!(err.kind, ErrorKind::Ir);
}

#[test]
fn type_mismatch_is_a_runtime_error_with_a_location() {
    let err = eval_err("1 + true;");
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("not defined for types int and bool"));
    assert!(err.loc.is_some(), "the fault maps back through markers");
}

#[test]
fn faults_are_reported_once_and_suppress_cascades() {
    let mut aug = Aug::startup(EngineOptions::default());
    let count: Rc<RefCell<usize>> = Rc::default();
    let sink = Rc::clone(&count);
    aug.set_error_handler(move |_| *sink.borrow_mut() += 1);

    // both statements would fault; the VM halts after the first
    assert!(aug.eval("1 + true; 2 + false;").is_err());
    assert_eq!(*count.borrow(), 1);
    aug.shutdown();
}

#[test]
fn engine_stays_usable_after_an_error() {
    let mut aug = Aug::startup(EngineOptions::default());
    aug.set_error_handler(|_| {});
    assert!(aug.eval("var x = ;").is_err());
    assert_eq!(aug.eval("1 + 1;").unwrap(), aug::Object::Int(2));
    assert_eq!(aug.live_heap_values(), 0);
    aug.shutdown();
}

#[test]
fn multiple_compile_errors_surface_in_order() {
    let mut aug = Aug::startup(EngineOptions::default());
    let messages: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&messages);
    aug.set_error_handler(move |err| sink.borrow_mut().push(err.message.clone()));

    // two undefined names in one compile; IR generation reports the first
    // and aborts that statement's production
    assert!(aug.eval("var a = nope; var b = also_nope;").is_err());
    assert!(!messages.borrow().is_empty());
    aug.shutdown();
}

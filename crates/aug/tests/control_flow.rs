use aug::{Aug, EngineOptions, Object};
use pretty_assertions::assert_eq;

fn eval(code: &str) -> Object {
    let mut aug = Aug::startup(EngineOptions::default());
    let result = aug.eval(code).expect("eval should succeed");
    assert_eq!(aug.live_heap_values(), 0, "heap must be balanced after eval");
    aug.shutdown();
    result
}

#[test]
fn precedence_hello_arithmetic() {
    assert_eq!(eval("var x = 2 + 3 * 4; x == 14;"), Object::Bool(true));
}

#[test]
fn if_and_else_branches() {
    assert_eq!(eval("var x = 0; if true { x = 1; } x;"), Object::Int(1));
    assert_eq!(eval("var x = 0; if false { x = 1; } else { x = 2; } x;"), Object::Int(2));
    assert_eq!(
        eval("var x = 0; if false { x = 1; } else if true { x = 3; } else { x = 2; } x;"),
        Object::Int(3)
    );
}

#[test]
fn while_loop_accumulates() {
    assert_eq!(
        eval("var i = 0; var s = 0; while i < 5 { s = s + i; i = i + 1; } s;"),
        Object::Int(10)
    );
}

#[test]
fn while_condition_false_skips_body() {
    assert_eq!(eval("var s = 7; while false { s = 0; } s;"), Object::Int(7));
}

#[test]
fn for_over_range_sums() {
    assert_eq!(eval("var s = 0; for i in 0:10 { s = s + i; } s;"), Object::Int(45));
}

#[test]
fn for_over_empty_range_iterates_zero_times() {
    assert_eq!(eval("var c = 0; for i in 5:5 { c = c + 1; } c;"), Object::Int(0));
    assert_eq!(eval("var c = 0; for i in 5:2 { c = c + 1; } c;"), Object::Int(0));
}

#[test]
fn for_over_int_is_inclusive() {
    assert_eq!(eval("var s = 0; for i in 3 { s = s + i; } s;"), Object::Int(6));
}

#[test]
fn for_over_array_visits_elements_in_order() {
    assert_eq!(
        eval("var out = 0; for v in [5, 10, 20] { out = out * 100 + v; } out;"),
        Object::Int(51020)
    );
}

#[test]
fn for_over_string_yields_chars() {
    assert_eq!(eval(r#"var c = 0; for ch in "abc" { c = c + 1; } c;"#), Object::Int(3));
    assert_eq!(eval(r#"var last = ' '; for ch in "xyz" { last = ch; } last == 'z';"#), Object::Bool(true));
}

#[test]
fn break_and_continue_semantics() {
    // counts 1 and 3: evens are skipped, 5 breaks out
    assert_eq!(
        eval("var c = 0; for i in 0:10 { if i == 5 { break; } if i % 2 == 0 { continue; } c = c + 1; } c;"),
        Object::Int(2)
    );
}

#[test]
fn break_leaves_while_loop() {
    assert_eq!(
        eval("var i = 0; while true { if i == 4 { break; } i = i + 1; } i;"),
        Object::Int(4)
    );
}

#[test]
fn nested_loops_break_only_inner() {
    assert_eq!(
        eval("var c = 0; for i in 0:3 { for j in 0:10 { if j == 2 { break; } c = c + 1; } } c;"),
        Object::Int(6)
    );
}

#[test]
fn logical_operators_coerce_truthiness() {
    assert_eq!(eval("1 and 2;"), Object::Bool(true));
    assert_eq!(eval("0 or false;"), Object::Bool(false));
    assert_eq!(eval("!none;"), Object::Bool(true));
}

#[test]
fn unary_minus_on_variables() {
    assert_eq!(eval("var x = 5; -x;"), Object::Int(-5));
    assert_eq!(eval("var x = 2.5; var y = -x; y ~= -2.5;"), Object::Bool(true));
}

//! Script test driver.
//!
//! Runs each given script file with the `expect`/`sum`/`print` extensions
//! registered, tallies per-file and session pass counts, and prints a
//! PASS/FAIL line per file plus a session summary.

use std::{cell::RefCell, env, process::ExitCode, rc::Rc};

use aug::{Aug, EngineOptions, Object, PrintWriter, StdPrint, StderrTracer};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CLEAR: &str = "\x1b[0m";

#[derive(Debug, Default)]
struct Tester {
    passed: u32,
    total: u32,
    verbose: bool,
}

impl Tester {
    fn verify(&mut self, success: bool, message: &str) {
        self.total += 1;
        if success {
            self.passed += 1;
        }
        if self.verbose {
            let tag = if success {
                format!("{GREEN}PASS{CLEAR}")
            } else {
                format!("{RED}FAIL{CLEAR}")
            };
            println!("[{tag}]\t{message}");
        }
    }
}

/// `expect(cond, detail...)`: records one check; extra arguments become the
/// failure detail.
fn register_expect(aug: &mut Aug, tester: &Rc<RefCell<Tester>>) {
    let tester = Rc::clone(tester);
    aug.register("expect", move |args| {
        let success = args.first().is_some_and(Object::truthy);
        let detail: Vec<String> = args.iter().skip(1).map(ToString::to_string).collect();
        tester.borrow_mut().verify(success, &detail.join(" "));
        Object::None
    });
}

/// `sum(values...)`: numeric sum. Stays an int until a float shows up.
fn register_sum(aug: &mut Aug) {
    aug.register("sum", |args| {
        let mut total = 0.0f64;
        let mut all_ints = true;
        for arg in args {
            match arg {
                Object::Float(_) => all_ints = false,
                Object::Array(_) | Object::Map(_) | Object::String(_) => return Object::None,
                _ => {}
            }
            match arg.to_f64() {
                Some(v) => total += v,
                None => return Object::None,
            }
        }
        if all_ints {
            Object::Int(total as i32)
        } else {
            Object::Float(total as f32)
        }
    });
}

/// `print(values...)`: space-separated arguments followed by a newline.
fn register_print(aug: &mut Aug) {
    aug.register("print", |args| {
        let mut writer = StdPrint;
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                writer.push(' ');
            }
            writer.write(&arg.to_string());
        }
        writer.push('\n');
        Object::None
    });
}

fn main() -> ExitCode {
    let mut files = Vec::new();
    let mut verbose = false;
    let mut dump = false;
    let mut trace = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--verbose" => verbose = true,
            "--dump" => dump = true,
            "--trace" => trace = true,
            _ => files.push(arg),
        }
    }

    if files.is_empty() {
        eprintln!("usage: aug [--verbose] [--dump] [--trace] <script>...");
        return ExitCode::FAILURE;
    }

    let mut aug = Aug::startup(EngineOptions::default());
    if trace {
        aug.set_tracer(StderrTracer);
    }
    let tester = Rc::new(RefCell::new(Tester {
        verbose,
        ..Tester::default()
    }));
    register_expect(&mut aug, &tester);
    register_sum(&mut aug);
    register_print(&mut aug);

    let mut session_passed = 0u32;
    let mut session_total = 0u32;

    for file in &files {
        {
            let mut t = tester.borrow_mut();
            t.passed = 0;
            t.total = 0;
        }

        if verbose {
            println!("{YELLOW}{file}{CLEAR}");
        }
        if dump {
            if let Ok(program) = aug.compile_file(file) {
                print!("{}", program.disassemble());
            }
        }

        let ran = aug.execute(file).is_ok();
        let (passed, total) = {
            let t = tester.borrow();
            (t.passed, t.total)
        };
        let success = ran && passed == total;

        session_total += 1;
        if success {
            session_passed += 1;
        }

        if verbose {
            println!("{YELLOW}{file}: passed {passed} / {total}{CLEAR}");
        } else {
            let tag = if success {
                format!("{GREEN}PASS{CLEAR}")
            } else {
                format!("{RED}FAIL{CLEAR}")
            };
            println!("[{tag}]\t{file}");
        }
    }

    let success = session_total > 0 && session_passed == session_total;
    let tag = if success {
        format!("{GREEN}PASS{CLEAR}")
    } else {
        format!("{RED}FAIL{CLEAR}")
    };
    println!("[{tag}]\tsession ended, passed {session_passed} / {session_total}");

    aug.shutdown();
    if success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

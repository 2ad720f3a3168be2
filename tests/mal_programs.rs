//! Whole Mal programs run through the public API.

#![cfg(feature = "reader")]
#![expect(clippy::unwrap_used)] // test code OK

use malxp::Error;
use malxp::ast::{Value, kw, nil, val};
use malxp::evaluator::{self, Environment, create_global_env};
use malxp::reader::read_str;
use pretty_assertions::assert_eq;

/// Evaluate each form in order, returning the last result
fn run(env: &Environment, forms: &[&str]) -> Result<Value, Error> {
    let mut last = Value::Nil;
    for source in forms {
        last = evaluator::eval(&read_str(source)?, env)?;
    }
    Ok(last)
}

fn run_fresh(forms: &[&str]) -> Result<Value, Error> {
    run(&create_global_env(), forms)
}

#[test]
fn test_recursive_functions() {
    let result = run_fresh(&[
        "(def! fib (fn* [n] (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))",
        "(fib 15)",
    ]);
    assert_eq!(result.unwrap(), val(610));

    let result = run_fresh(&[
        "(def! sum2 (fn* (n acc) (if (= n 0) acc (sum2 (- n 1) (+ n acc)))))",
        "(sum2 10000 0)",
    ]);
    assert_eq!(result.unwrap(), val(50_005_000));
}

#[test]
fn test_closures_and_atoms() {
    let env = create_global_env();
    run(
        &env,
        &[
            "(def! make-counter (fn* () (let* [n (atom 0)] (fn* () (swap! n + 1)))))",
            "(def! c1 (make-counter))",
            "(def! c2 (make-counter))",
        ],
    )
    .unwrap();

    assert_eq!(run(&env, &["(c1)", "(c1)", "(c1)"]).unwrap(), val(3));
    assert_eq!(run(&env, &["(c2)"]).unwrap(), val(1));
}

#[test]
fn test_macros_and_quasiquote() {
    let env = create_global_env();
    run(
        &env,
        &[
            "(defmacro! unless (fn* (pred a b) `(if ~pred ~b ~a)))",
            "(defmacro! my-or (fn* (& xs) (if (empty? xs) nil (if (= 1 (count xs)) (first xs) `(let* (or_tmp ~(first xs)) (if or_tmp or_tmp (my-or ~@(rest xs))))))))",
        ],
    )
    .unwrap();

    assert_eq!(run(&env, &["(unless false 7 8)"]).unwrap(), val(7));
    assert_eq!(run(&env, &["(unless true 7 8)"]).unwrap(), val(8));
    assert_eq!(run(&env, &["(my-or false nil 3 4)"]).unwrap(), val(3));
    assert_eq!(run(&env, &["(my-or)"]).unwrap(), nil());

    let expanded = run(&env, &["(macroexpand (unless c 1 2))"]).unwrap();
    assert_eq!(expanded, read_str("(if c 2 1)").unwrap());

    let spliced = run(&env, &["(def! xs '(2 3))", "`[1 ~@xs 4]"]).unwrap();
    assert_eq!(spliced, read_str("[1 2 3 4]").unwrap());
}

#[test]
fn test_exceptions() {
    let env = create_global_env();
    let caught = run(
        &env,
        &[r#"(try* (throw {:code 42}) (catch* e (get e :code)))"#],
    )
    .unwrap();
    assert_eq!(caught, val(42));

    let native = run(&env, &["(try* (nth [1] 5) (catch* e (str \"caught: \" e)))"]).unwrap();
    let Value::String(message) = native else {
        panic!("expected a string, got {native:?}");
    };
    assert!(message.starts_with("caught: "), "{message}");

    let unbound = run(&env, &["(try* undefined-thing (catch* e e))"]).unwrap();
    assert_eq!(unbound, val("'undefined-thing' not found"));

    match run(&env, &["(throw :boom)"]) {
        Err(Error::Throw(value)) => assert_eq!(value, kw("boom")),
        other => panic!("expected a thrown keyword, got {other:?}"),
    }
}

#[test]
fn test_cond_and_higher_order() {
    let result = run_fresh(&[
        "(def! classify (fn* [n] (cond (< n 0) :negative (= n 0) :zero \"else\" :positive)))",
        "(map classify [-5 0 5])",
    ]);
    assert_eq!(
        result.unwrap(),
        Value::list(vec![kw("negative"), kw("zero"), kw("positive")])
    );

    let result = run_fresh(&["(apply + 1 2 (list 3 4))"]);
    assert_eq!(result.unwrap(), val(10));
}

#[test]
fn test_eval_and_read_string() {
    let result = run_fresh(&[
        "(def! code (read-string \"(+ 1 (* 2 3))\"))",
        "(list code (eval code))",
    ]);
    assert_eq!(result.unwrap(), read_str("((+ 1 (* 2 3)) 7)").unwrap());

    // eval always works in the root environment
    let result = run_fresh(&["(def! x 1)", "(let* [x 2] (eval 'x))"]);
    assert_eq!(result.unwrap(), val(1));
}

#[test]
fn test_load_file() {
    let path = std::env::temp_dir().join(format!("malxp-load-{}.mal", std::process::id()));
    std::fs::write(
        &path,
        ";; helpers\n(def! square (fn* [x] (* x x)))\n(def! cube (fn* [x] (* x (square x))))\n",
    )
    .unwrap();

    let env = create_global_env();
    let loaded = evaluator::apply(
        &env.get("load-file").unwrap(),
        vec![Value::from(path.to_string_lossy().as_ref())],
    );
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded.unwrap(), nil());
    assert_eq!(run(&env, &["(cube 3)"]).unwrap(), val(27));

    let missing = run(&env, &["(load-file \"/definitely/not/here.mal\")"]);
    assert!(matches!(missing, Err(Error::EvalError(_))));
}

#[test]
fn test_printing() {
    let result = run_fresh(&[r#"(pr-str "a\nb" :k [1 {"x" nil}] (atom 1))"#]).unwrap();
    assert_eq!(result, val(r#""a\nb" :k [1 {"x" nil}] (atom 1)"#));

    let result = run_fresh(&[r#"(str "a" 1 :k nil "\"q\"")"#]).unwrap();
    assert_eq!(result, val("a1:knil\"q\""));
}

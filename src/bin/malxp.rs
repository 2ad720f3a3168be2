use malxp::ast::Value;
use malxp::evaluator::{self, Environment};
use malxp::reader::read_str;
use malxp::{Error, ParseErrorKind};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::{env, panic, process};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const BANNER: &str = r#"(println (str "Mal [" *host-language* "]"))"#;

/// Driver settings read from the process environment
struct ReplConfig {
    prompt: &'static str,
    history_file: Option<PathBuf>,
}

impl ReplConfig {
    fn from_env() -> Self {
        let history_file = env::var_os("MALXP_HISTORY")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".malxp_history")));
        ReplConfig {
            prompt: "user> ",
            history_file,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("MALXP_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let mut args = env::args().skip(1);
    let status = match args.next() {
        Some(script) => run_script(&script, args.collect()),
        None => {
            let result = panic::catch_unwind(|| {
                run_repl(&ReplConfig::from_env());
            });

            if let Err(panic_info) = result {
                eprintln!("The REPL encountered an unexpected error and must exit.");

                if let Some(msg) = panic_info.downcast_ref::<&str>() {
                    eprintln!("Error: {msg}");
                } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                    eprintln!("Error: {msg}");
                } else {
                    eprintln!("Error: Unknown panic occurred");
                }
                1
            } else {
                0
            }
        }
    };

    process::exit(status);
}

/// Run `(load-file script)` with `*ARGV*` bound to the remaining arguments
fn run_script(script: &str, argv: Vec<String>) -> i32 {
    let env = evaluator::create_global_env();
    env.set(
        "*ARGV*",
        Value::list(argv.into_iter().map(Value::from).collect()),
    );

    let result = env
        .get("load-file")
        .and_then(|load_file| evaluator::apply(&load_file, vec![Value::from(script)]));

    match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

/// Read and evaluate one line. `Ok(None)` means there was nothing to evaluate.
fn rep(line: &str, env: &Environment) -> Result<Option<Value>, Error> {
    match read_str(line) {
        Ok(form) => evaluator::eval(&form, env).map(Some),
        Err(Error::ParseError(e)) if e.kind == ParseErrorKind::Empty => Ok(None),
        Err(e) => Err(e),
    }
}

fn run_repl(config: &ReplConfig) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return;
        }
    };
    if let Some(path) = &config.history_file
        && let Err(err) = rl.load_history(path)
    {
        debug!(path = %path.display(), %err, "no history loaded");
    }

    let env = evaluator::create_global_env();

    // Callable from Mal code as (help)
    env.register_builtin_operation::<_, ()>("help", print_help);

    if let Err(e) = rep(BANNER, &env) {
        println!("Error: {e}");
    }
    println!("Type :help for more commands, or Ctrl+D to exit.");

    loop {
        match rl.readline(config.prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        _ = print_help().is_ok();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match rep(line, &env) {
                    Ok(Some(result)) => println!("{result}"),
                    Ok(None) => {}
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    if let Some(path) = &config.history_file
        && let Err(err) = rl.save_history(path)
    {
        warn!(path = %path.display(), %err, "could not save history");
    }
}

fn print_help() -> Result<Value, Error> {
    println!("Mal interpreter:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  def! let* do if fn* quote quasiquote defmacro! macroexpand try*/catch*");
    println!();
    println!("Examples:");
    println!("  (+ 1 2 3)");
    println!("  (def! fib (fn* [n] (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))");
    println!("  (defmacro! unless (fn* [c a b] `(if ~c ~b ~a)))");
    println!("  (try* (throw {{:msg \"oops\"}}) (catch* e (get e :msg)))");
    println!("  (load-file \"prelude.mal\")");
    println!();

    Ok(Value::Nil)
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}

mod ast;
mod interpreter;
mod parser;
mod scanner;
mod value;

use std::env::args;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;

use anyhow::{Context, Result};

use ast::StmtInner;
use interpreter::Interpreter;
use value::Value;

fn main() -> Result<()> {
    let mut script = None;
    let mut debug = false;
    for arg in args().skip(1) {
        match arg.as_str() {
            "--debug" => debug = true,
            _ if script.is_none() => script = Some(arg),
            _ => {
                let mut stderr = std::io::stderr().lock();
                stderr
                    .write_all("Usage: sol [script] [--debug]\n".as_bytes())
                    .unwrap();
                std::process::exit(64);
            }
        }
    }
    if let Some(path) = script {
        run_file(&path, debug)
    } else {
        run_prompt(debug)
    }
}

fn run_file(path: &str, debug: bool) -> Result<()> {
    let mut file = File::open(path).context("Unable to open script file")?;
    let mut source = String::new();
    file.read_to_string(&mut source)
        .context("Unable to read script file")?;

    let program = match parser::parse(&source) {
        Ok(program) => program,
        Err(err) => {
            // Display is already `<Kind> at line <L>: <message>`
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let mut interpreter = Interpreter::new();
    let outcome = if debug {
        program.0.iter().try_for_each(|stmt| {
            eprintln!("D {}", stmt);
            interpreter.interpret_one(stmt).map(|_| ())
        })
    } else {
        interpreter.interpret(&program)
    };
    if let Err(fault) = outcome {
        eprintln!("{}", fault);
        std::process::exit(1);
    }
    Ok(())
}

fn run_prompt(debug: bool) -> Result<()> {
    let stdin = std::io::stdin().lock();
    let mut reader = BufReader::new(stdin);
    let mut interpreter = Interpreter::new();
    let mut buffer = String::new();
    let mut line = String::new();

    loop {
        let prompt = if buffer.is_empty() { "sol> " } else { "...> " };
        print!("{}", prompt);
        std::io::stdout().flush()?;
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            // EOF ends the session, discarding any half-typed statement
            break;
        }
        buffer.push_str(&line);
        if !statement_complete(&buffer) {
            continue;
        }
        dispatch(&mut interpreter, &buffer, debug);
        // Parse errors flush the pending buffer too; collection restarts
        buffer.clear();
    }
    Ok(())
}

fn dispatch(interpreter: &mut Interpreter, source: &str, debug: bool) {
    let program = match parser::parse(source) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{}: {} (line {})", err.kind, err.message, err.pos.line);
            return;
        }
    };
    for stmt in &program.0 {
        if debug {
            eprintln!("D {}", stmt);
        }
        match interpreter.interpret_one(stmt) {
            Ok(value) => {
                // Bare expressions echo their value; assignments and Null
                // results stay quiet
                if matches!(stmt.inner, StmtInner::Expr(_)) && !matches!(value, Value::Null) {
                    println!("{}", value);
                }
            }
            Err(fault) => {
                eprintln!(
                    "{}: {} (line {})",
                    fault.error.kind(),
                    fault.error,
                    fault.line
                );
                // The environment survives; the rest of this input is dropped
                return;
            }
        }
    }
}

/// Whether the buffer holds at least one full statement: a period outside
/// strings, brackets, braces, and parentheses. A period glued to a digit is
/// a decimal point, not a terminator.
fn statement_complete(buffer: &str) -> bool {
    let bytes = buffer.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A single quote right after an identifier character is a
                // name like res', not a string opener
                if quote == b'\''
                    && i > 0
                    && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_')
                {
                    i += 1;
                    continue;
                }
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i == bytes.len() {
                    // Unterminated string, keep reading lines
                    return false;
                }
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'.' => {
                let decimal = i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit();
                if depth == 0 && !decimal {
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn incomplete_without_period() {
        assert!(!statement_complete("x = 1"));
        assert!(statement_complete("x = 1."));
    }

    #[test]
    fn decimal_point_is_not_a_terminator() {
        assert!(!statement_complete("x = 1.5"));
        assert!(statement_complete("x = 1.5."));
    }

    #[test]
    fn nesting_defers_the_terminator() {
        assert!(!statement_complete("a = [1,"));
        assert!(statement_complete("a = [1, 2]."));
        assert!(statement_complete("d = {\"x\": 1}."));
        assert!(!statement_complete("y = (+ 1"));
    }

    #[test]
    fn periods_inside_strings_do_not_count() {
        assert!(!statement_complete("s = 'a.b'"));
        assert!(statement_complete("s = 'a.b'."));
        assert!(!statement_complete("s = 'no terminator yet"));
        assert!(!statement_complete("s = \"multi\nline . still open"));
    }

    #[test]
    fn trailing_apostrophe_identifiers_are_not_strings() {
        assert!(statement_complete("res' = 1."));
    }

    #[test]
    fn comments_hide_periods() {
        assert!(!statement_complete("# nothing here .\n"));
        assert!(statement_complete("x = 1. # trailing .\n"));
    }
}

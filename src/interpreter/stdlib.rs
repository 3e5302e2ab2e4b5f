use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::rc::Rc;

use indexmap::IndexMap;

use super::runtime::{Interpreter, RuntimeError};
use crate::value::{SolResult, Value};

fn text_arg(name: &str, value: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::Str(s) => Ok(s.as_ref().clone()),
        other => Err(RuntimeError::Type(format!(
            "'{}' expects a string, got {}",
            name,
            other.type_name()
        ))),
    }
}

pub fn sh_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let command = text_arg("sh", &args[0])?;
    let output = match Command::new("sh").arg("-c").arg(&command).output() {
        Ok(output) => output,
        Err(e) => {
            return Ok(SolResult::err(Value::string(format!(
                "failed to run '{}': {}",
                command, e
            ))));
        }
    };
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(SolResult::ok(Value::string(
            stdout.trim_end_matches('\n').to_string(),
        )))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            format!("'{}' exited with {}", command, output.status)
        } else {
            stderr.trim_end_matches('\n').to_string()
        };
        Ok(SolResult::err(Value::string(detail)))
    }
}

pub fn getenv_impl(
    _interpreter: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let key = text_arg("getenv", &args[0])?;
    match env::var(&key) {
        Ok(value) => Ok(SolResult::ok(Value::string(value))),
        Err(_) => Ok(SolResult::err(Value::string(format!(
            "environment variable '{}' is not set",
            key
        )))),
    }
}

pub fn setenv_impl(
    _interpreter: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let key = text_arg("setenv", &args[0])?;
    let value = text_arg("setenv", &args[1])?;
    env::set_var(&key, &value);
    Ok(Value::string(format!("Set {}={}", key, value)))
}

pub fn listenv_impl(
    _interpreter: &mut Interpreter,
    _args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let mut entries = IndexMap::new();
    for (key, value) in env::vars() {
        entries.insert(key, Value::string(value));
    }
    Ok(Value::Dict(Rc::new(entries)))
}

pub fn flush_and_exit(code: i32) -> ! {
    let _ = std::io::stdout().flush();
    std::process::exit(code)
}

pub fn exit_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let code = match args.first() {
        None => 0,
        Some(Value::Number(n)) => n.as_integer().ok_or_else(|| {
            RuntimeError::Type(format!("'exit' expects an integer code, got {}", n))
        })?,
        Some(other) => {
            return Err(RuntimeError::Type(format!(
                "'exit' expects an integer code, got {}",
                other.type_name()
            )));
        }
    };
    flush_and_exit(code as i32)
}

pub fn cpu_count_impl(
    _interpreter: &mut Interpreter,
    _args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let count = std::thread::available_parallelism()
        .map(|n| n.get() as i64)
        .unwrap_or(1);
    Ok(Value::int(count))
}

pub fn pwd_impl(_interpreter: &mut Interpreter, _args: Vec<Value>) -> Result<Value, RuntimeError> {
    match env::current_dir() {
        Ok(path) => Ok(Value::string(path.display().to_string())),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "cannot read working directory: {}",
            e
        )))),
    }
}

pub fn ls_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let path = match args.first() {
        Some(value) => text_arg("ls", value)?,
        None => ".".to_string(),
    };
    let entries = match fs::read_dir(&path) {
        Ok(entries) => entries,
        Err(e) => {
            return Ok(SolResult::err(Value::string(format!(
                "cannot list '{}': {}",
                path, e
            ))));
        }
    };
    let mut names = Vec::new();
    for entry in entries.flatten() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(SolResult::ok(Value::Array(Rc::new(
        names.into_iter().map(Value::string).collect(),
    ))))
}

pub fn read_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let path = text_arg("read", &args[0])?;
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(SolResult::ok(Value::string(contents))),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "cannot read '{}': {}",
            path, e
        )))),
    }
}

pub fn write_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let contents = args[0].to_string();
    let path = text_arg("write", &args[1])?;
    match fs::write(&path, contents) {
        Ok(()) => Ok(SolResult::ok(Value::string(format!(
            "Data written to '{}'",
            path
        )))),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "cannot write '{}': {}",
            path, e
        )))),
    }
}

pub fn mkdir_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let path = text_arg("mkdir", &args[0])?;
    match fs::create_dir_all(&path) {
        Ok(()) => Ok(SolResult::ok(Value::string(format!(
            "Directory '{}' created",
            path
        )))),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "cannot create '{}': {}",
            path, e
        )))),
    }
}

pub fn rm_impl(_interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let path = text_arg("rm", &args[0])?;
    let target = Path::new(&path);
    let outcome = if target.is_dir() {
        fs::remove_dir(target).map(|()| format!("Directory '{}' removed", path))
    } else if target.is_file() {
        fs::remove_file(target).map(|()| format!("File '{}' removed", path))
    } else {
        return Ok(SolResult::err(Value::string(format!(
            "'{}' not found",
            path
        ))));
    };
    match outcome {
        Ok(message) => Ok(SolResult::ok(Value::string(message))),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "cannot remove '{}': {}",
            path, e
        )))),
    }
}

pub fn jsonparse_impl(
    _interpreter: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let text = text_arg("jsonparse", &args[0])?;
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => Ok(SolResult::ok(json_to_value(json))),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "invalid JSON: {}",
            e
        )))),
    }
}

pub fn jsonstringify_impl(
    _interpreter: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let json = value_to_json(&args[0])?;
    let text = serde_json::to_string_pretty(&json)
        .map_err(|e| RuntimeError::Type(format!("cannot serialise to JSON: {}", e)))?;
    Ok(Value::string(text))
}

pub fn jsonread_impl(
    _interpreter: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let path = text_arg("jsonread", &args[0])?;
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) => {
            return Ok(SolResult::err(Value::string(format!(
                "cannot read '{}': {}",
                path, e
            ))));
        }
    };
    match serde_json::from_str::<serde_json::Value>(&contents) {
        Ok(json) => Ok(SolResult::ok(json_to_value(json))),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "invalid JSON in '{}': {}",
            path, e
        )))),
    }
}

pub fn jsonwrite_impl(
    _interpreter: &mut Interpreter,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    let json = value_to_json(&args[0])?;
    let path = text_arg("jsonwrite", &args[1])?;
    let text = serde_json::to_string_pretty(&json)
        .map_err(|e| RuntimeError::Type(format!("cannot serialise to JSON: {}", e)))?;
    match fs::write(&path, text) {
        Ok(()) => Ok(SolResult::ok(Value::string(format!(
            "Data written to '{}'",
            path
        )))),
        Err(e) => Ok(SolResult::err(Value::string(format!(
            "cannot write '{}': {}",
            path, e
        )))),
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                Value::int(int)
            } else {
                Value::float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => {
            Value::Array(Rc::new(items.into_iter().map(json_to_value).collect()))
        }
        serde_json::Value::Object(entries) => {
            let mut dict = IndexMap::new();
            for (key, value) in entries {
                dict.insert(key, json_to_value(value));
            }
            Value::Dict(Rc::new(dict))
        }
    }
}

fn value_to_json(value: &Value) -> Result<serde_json::Value, RuntimeError> {
    use crate::value::Number;
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Number(Number::Int(int)) => Ok(serde_json::Value::from(*int)),
        Value::Number(Number::Float(dbl)) => serde_json::Number::from_f64(*dbl)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                RuntimeError::Type(format!("cannot serialise {} to JSON", dbl))
            }),
        Value::Str(s) => Ok(serde_json::Value::String(s.as_ref().clone())),
        Value::Array(items) => {
            let converted = items
                .iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::Value::Array(converted))
        }
        Value::Dict(entries) => {
            let mut object = serde_json::Map::new();
            for (key, value) in entries.iter() {
                object.insert(key.clone(), value_to_json(value)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        other => Err(RuntimeError::Type(format!(
            "cannot serialise a {} to JSON",
            other.type_name()
        ))),
    }
}

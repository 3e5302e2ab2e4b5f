mod builtin;
mod callable;
mod runtime;
mod stdlib;

pub use callable::{BuiltinFunc, PartialApp, SolFunc};
pub use runtime::{Environment, Fault, Interpreter, RuntimeError};

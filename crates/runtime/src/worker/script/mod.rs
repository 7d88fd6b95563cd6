// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The model script language run by the interpreter worker.
//!
//! A script is a list of items:
//!
//! ```text
//! # constants are evaluated once, at load
//! let weights = json(file("weights.json"));
//!
//! fn score(x) = dot(x, weights);
//! fn predict(input) = sigmoid(score(input.features));
//! ```
//!
//! Values are numbers, strings, booleans, null, lists, maps and functions.
//! Arithmetic broadcasts between numbers and lists. Runtime failures carry
//! a traceback of the user functions they passed through.

mod eval;
mod lexer;
mod parser;

pub use eval::{Func, Value, DEFAULT_MEMORY_LIMIT, MAX_CALL_DEPTH};

use eval::Interpreter;
use parser::Item;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    Syntax,
    Runtime,
    /// An allocation would exceed the memory limit.
    Memory,
}

/// One user function a runtime error unwound through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
    /// Line the error was raised on.
    pub line: Option<usize>,
    /// Innermost frame first.
    pub frames: Vec<Frame>,
    /// Line in the frame currently unwinding.
    cursor: Option<usize>,
}

impl ScriptError {
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self {
            kind: ScriptErrorKind::Syntax,
            message: message.into(),
            line: Some(line),
            frames: Vec::new(),
            cursor: Some(line),
        }
    }

    pub fn runtime(message: impl Into<String>, line: usize) -> Self {
        Self {
            kind: ScriptErrorKind::Runtime,
            message: message.into(),
            line: Some(line),
            frames: Vec::new(),
            cursor: Some(line),
        }
    }

    pub fn memory(message: impl Into<String>, line: usize) -> Self {
        Self {
            kind: ScriptErrorKind::Memory,
            ..Self::runtime(message, line)
        }
    }

    /// Records that the error left `function`, called from `call_line`.
    fn leave_frame(mut self, function: &str, def_line: usize, call_line: usize) -> Self {
        self.frames.push(Frame {
            function: function.to_string(),
            line: self.cursor.unwrap_or(def_line),
        });
        self.cursor = Some(call_line);
        self
    }

    /// Python-style traceback, outermost call first.
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.frames.iter().rev() {
            out.push_str(&format!("  in {} (line {})\n", frame.function, frame.line));
        }
        let label = match self.kind {
            ScriptErrorKind::Syntax => "SyntaxError",
            ScriptErrorKind::Runtime => "Error",
            ScriptErrorKind::Memory => "MemoryError",
        };
        match (self.kind, self.line) {
            (ScriptErrorKind::Syntax, Some(line)) => {
                out.push_str(&format!("{label}: {} (line {line})", self.message))
            }
            _ => out.push_str(&format!("{label}: {}", self.message)),
        }
        out
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {line})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptError {}

/// A parsed script with its top-level bindings evaluated.
///
/// Programs hold `Rc` values and stay on the worker thread that built them.
pub struct Program {
    globals: HashMap<String, Value>,
    files: BTreeMap<String, String>,
    memory_limit: usize,
}

impl Program {
    /// Parses `source`, defines its functions, then evaluates its `let`
    /// bindings in order. `files` are readable through `file(name)`.
    pub fn load(source: &str, files: BTreeMap<String, String>) -> Result<Self, ScriptError> {
        Self::load_with_limit(source, files, DEFAULT_MEMORY_LIMIT)
    }

    /// Like [`load`](Self::load), refusing single allocations over
    /// `memory_limit` bytes at load and at every call.
    pub fn load_with_limit(
        source: &str,
        files: BTreeMap<String, String>,
        memory_limit: usize,
    ) -> Result<Self, ScriptError> {
        let items = parser::parse(source)?;
        let mut globals = HashMap::new();
        for item in &items {
            if let Item::Fn(def) = item {
                globals.insert(def.name.clone(), Value::Func(Func::User(Rc::clone(def))));
            }
        }
        for item in items {
            if let Item::Let { name, value, .. } = item {
                let evaluated = Interpreter::new(&globals, &files)
                    .with_memory_limit(memory_limit)
                    .eval_global(&value)?;
                globals.insert(name, evaluated);
            }
        }
        Ok(Self {
            globals,
            files,
            memory_limit,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// `true` when `name` is bound to something callable.
    pub fn is_function(&self, name: &str) -> bool {
        matches!(self.globals.get(name), Some(Value::Func(_)))
    }

    /// Binds `name` to a function returning `value`, unless already bound.
    pub fn define_default(&mut self, name: &str, value: serde_json::Value) {
        self.globals
            .entry(name.to_string())
            .or_insert_with(|| Value::Func(Func::Const(Rc::new(Value::from_json(&value)))));
    }

    /// Names of every callable global, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .globals
            .iter()
            .filter(|(_, v)| matches!(v, Value::Func(_)))
            .map(|(k, _)| k.clone())
            .collect();
        names.sort();
        names
    }

    /// Calls `name` with `input` (or with no argument when the function
    /// takes none) and returns plain JSON.
    pub fn call_json(&self, name: &str, input: &serde_json::Value) -> Result<serde_json::Value, ScriptError> {
        let callee = self
            .globals
            .get(name)
            .ok_or_else(|| ScriptError::runtime(format!("function '{name}' is not defined"), 0))?;
        let args = match callee {
            Value::Func(Func::User(def)) if def.params.is_empty() => Vec::new(),
            Value::Func(Func::Const(_)) => Vec::new(),
            _ => vec![Value::from_json(input)],
        };
        let mut interpreter = Interpreter::new(&self.globals, &self.files).with_memory_limit(self.memory_limit);
        interpreter.call(callee, args, 0).map(|v| v.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sum_scaled() {
        let program = Program::load("fn predict(input) = sum(input.x) * 0.5;", BTreeMap::new()).unwrap();
        let out = program.call_json("predict", &json!({"x": [1, 2, 0.5]})).unwrap();
        assert_eq!(out, json!(1.75));
    }

    #[test]
    fn test_globals_and_files() {
        let files = BTreeMap::from([("w.json".to_string(), "[0.5, 0.5]".to_string())]);
        let program = Program::load(
            "let w = json(file(\"w.json\"));\nfn predict(input) = dot(input, w);",
            files,
        )
        .unwrap();
        assert_eq!(program.call_json("predict", &json!([2, 4])).unwrap(), json!(3));
    }

    #[test]
    fn test_traceback_lists_frames() {
        let source = "fn inner(x) =\n  x.missing;\nfn predict(input) =\n  inner(input) + 1;";
        let program = Program::load(source, BTreeMap::new()).unwrap();
        let err = program.call_json("predict", &json!({"a": 1})).unwrap_err();
        assert_eq!(err.frames.len(), 2);
        let tb = err.traceback();
        assert!(tb.starts_with("Traceback (most recent call last):\n  in predict (line 4)\n  in inner (line 2)\n"));
        assert!(tb.ends_with("Error: map has no field 'missing'"));
    }

    #[test]
    fn test_recursion_limit() {
        // The worker thread runs with a large stack; do the same here.
        let err = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let program = Program::load("fn f(n) = f(n + 1);", BTreeMap::new()).unwrap();
                program.call_json("f", &json!(0)).unwrap_err()
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(err.message.contains("maximum call depth"));
        assert_eq!(err.frames.len(), MAX_CALL_DEPTH);
    }

    #[test]
    fn test_default_function() {
        let mut program = Program::load("fn predict(x) = x;", BTreeMap::new()).unwrap();
        program.define_default("get_model_info", json!({"name": "m"}));
        program.define_default("predict", json!(null));
        assert!(program.is_function("predict"));
        assert_eq!(program.call_json("get_model_info", &json!(null)).unwrap(), json!({"name": "m"}));
        assert_eq!(program.function_names(), vec!["get_model_info", "predict"]);
    }

    #[test]
    fn test_oversized_range_is_memory_error() {
        let program = Program::load_with_limit("fn predict(n) = len(range(n));", BTreeMap::new(), 1 << 20).unwrap();
        assert_eq!(program.call_json("predict", &json!(100)).unwrap(), json!(100));
        let err = program.call_json("predict", &json!(1e12)).unwrap_err();
        assert_eq!(err.kind, ScriptErrorKind::Memory);
        assert!(err.traceback().contains("MemoryError: range()"));

        let err = Program::load("let big = range(1e15);", BTreeMap::new()).err().unwrap();
        assert_eq!(err.kind, ScriptErrorKind::Memory);
    }

    #[test]
    fn test_load_errors() {
        let err = Program::load("let a = b;", BTreeMap::new()).err().unwrap();
        assert_eq!(err.kind, ScriptErrorKind::Runtime);
        let err = Program::load("fn (", BTreeMap::new()).err().unwrap();
        assert_eq!(err.kind, ScriptErrorKind::Syntax);
        assert!(err.traceback().contains("SyntaxError"));
    }
}

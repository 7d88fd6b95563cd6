// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tree-walking evaluator and builtins.

use super::parser::{BinOp, Expr, ExprKind, FnDef};
use super::ScriptError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// Deepest chain of nested user function calls.
pub const MAX_CALL_DEPTH: usize = 256;

/// Bytes a script may claim in one allocation when the host sets no limit.
pub const DEFAULT_MEMORY_LIMIT: usize = 512 * 1024 * 1024;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Func(Func),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Func {
    User(Rc<FnDef>),
    Builtin(&'static str),
    /// Takes no arguments and returns a fixed value.
    Const(Rc<Value>),
}

const BUILTINS: [&str; 24] = [
    "len", "sum", "mean", "min", "max", "abs", "sqrt", "exp", "ln", "round", "floor", "relu",
    "sigmoid", "softmax", "argmax", "dot", "range", "keys", "concat", "clamp", "file", "json",
    "error", "str",
];

pub fn builtin(name: &str) -> Option<Value> {
    BUILTINS
        .iter()
        .find(|b| **b == name)
        .map(|b| Value::Func(Func::Builtin(b)))
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Func(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Func(_) => true,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Num),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Plain JSON. Non-finite numbers become `null`; integral numbers that
    /// fit exactly render as integers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Num(n) => number_to_json(*n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Func(f) => serde_json::Value::String(f.to_string()),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if !n.is_finite() {
        serde_json::Value::Null
    } else if n.fract() == 0.0 && n.abs() < EXACT {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Func::User(def) => write!(f, "<fn {}>", def.name),
            Func::Builtin(name) => write!(f, "<builtin {name}>"),
            Func::Const(_) => f.write_str("<fn>"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Func(func) => func.fmt(f),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Evaluates expressions against a module's globals.
pub struct Interpreter<'a> {
    globals: &'a HashMap<String, Value>,
    files: &'a BTreeMap<String, String>,
    depth: usize,
    memory_limit: usize,
}

type Locals = Vec<(String, Value)>;

impl<'a> Interpreter<'a> {
    pub fn new(globals: &'a HashMap<String, Value>, files: &'a BTreeMap<String, String>) -> Self {
        Self {
            globals,
            files,
            depth: 0,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Evaluates a top-level expression with no local bindings.
    pub fn eval_global(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.eval(expr, &mut Vec::new())
    }

    pub fn call(&mut self, callee: &Value, args: Vec<Value>, line: usize) -> Result<Value, ScriptError> {
        match callee {
            Value::Func(Func::User(def)) => self.call_user(def, args, line),
            Value::Func(Func::Builtin(name)) => self.call_builtin(name, args, line),
            Value::Func(Func::Const(value)) => {
                if !args.is_empty() {
                    return Err(ScriptError::runtime("function takes no arguments", line));
                }
                Ok((**value).clone())
            }
            other => Err(ScriptError::runtime(
                format!("{} is not callable", other.type_name()),
                line,
            )),
        }
    }

    fn call_user(&mut self, def: &Rc<FnDef>, args: Vec<Value>, line: usize) -> Result<Value, ScriptError> {
        if args.len() != def.params.len() {
            return Err(ScriptError::runtime(
                format!(
                    "{}() takes {} arguments, got {}",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
                line,
            ));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::runtime(
                format!("maximum call depth {MAX_CALL_DEPTH} exceeded in {}()", def.name),
                line,
            ));
        }
        self.depth += 1;
        let mut locals: Locals = def.params.iter().cloned().zip(args).collect();
        let result = self.eval(&def.body, &mut locals);
        self.depth -= 1;
        result.map_err(|e| e.leave_frame(&def.name, def.line, line))
    }

    fn lookup(&self, name: &str, locals: &Locals, line: usize) -> Result<Value, ScriptError> {
        if let Some((_, value)) = locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtin(name).ok_or_else(|| ScriptError::runtime(format!("name '{name}' is not defined"), line))
    }

    fn eval(&mut self, expr: &Expr, locals: &mut Locals) -> Result<Value, ScriptError> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Num(n) => Ok(Value::Num(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::List(items) => items
                .iter()
                .map(|item| self.eval(item, locals))
                .collect::<Result<_, _>>()
                .map(Value::List),
            ExprKind::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval(value, locals)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Map(map))
            }
            ExprKind::Var(name) => self.lookup(name, locals, line),
            ExprKind::Neg(inner) => {
                let value = self.eval(inner, locals)?;
                map_numbers(&value, &|x| -x).map_err(|m| ScriptError::runtime(format!("unary '-': {m}"), line))
            }
            ExprKind::Not(inner) => Ok(Value::Bool(!self.eval(inner, locals)?.truthy())),
            ExprKind::And(lhs, rhs) => {
                if !self.eval(lhs, locals)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs, locals)?.truthy()))
            }
            ExprKind::Or(lhs, rhs) => {
                if self.eval(lhs, locals)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs, locals)?.truthy()))
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs, locals)?;
                let b = self.eval(rhs, locals)?;
                binary(*op, &a, &b).map_err(|m| ScriptError::runtime(m, line))
            }
            ExprKind::If(cond, then, otherwise) => {
                if self.eval(cond, locals)?.truthy() {
                    self.eval(then, locals)
                } else {
                    self.eval(otherwise, locals)
                }
            }
            ExprKind::Let(name, value, body) => {
                let value = self.eval(value, locals)?;
                locals.push((name.clone(), value));
                let result = self.eval(body, locals);
                locals.pop();
                result
            }
            ExprKind::Index(target, index) => {
                let target = self.eval(target, locals)?;
                let index = self.eval(index, locals)?;
                index_value(&target, &index).map_err(|m| ScriptError::runtime(m, line))
            }
            ExprKind::Field(target, field) => match self.eval(target, locals)? {
                Value::Map(mut map) => map
                    .remove(field)
                    .ok_or_else(|| ScriptError::runtime(format!("map has no field '{field}'"), line)),
                other => Err(ScriptError::runtime(
                    format!("cannot read field '{field}' of {}", other.type_name()),
                    line,
                )),
            },
            ExprKind::Call(callee, args) => {
                let callee = self.eval(callee, locals)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, locals))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&callee, args, line)
            }
        }
    }

    fn call_builtin(&mut self, name: &str, args: Vec<Value>, line: usize) -> Result<Value, ScriptError> {
        let fail = |message: String| ScriptError::runtime(format!("{name}(): {message}"), line);
        let one = |args: &[Value]| -> Result<Value, ScriptError> {
            match args {
                [single] => Ok(single.clone()),
                _ => Err(fail(format!("expected 1 argument, got {}", args.len()))),
            }
        };

        let unary_math = |f: &dyn Fn(f64) -> f64| -> Result<Value, ScriptError> {
            map_numbers(&one(&args)?, f).map_err(fail)
        };

        match name {
            "len" => match one(&args)? {
                Value::List(items) => Ok(Value::Num(items.len() as f64)),
                Value::Str(s) => Ok(Value::Num(s.chars().count() as f64)),
                Value::Map(map) => Ok(Value::Num(map.len() as f64)),
                other => Err(fail(format!("{} has no length", other.type_name()))),
            },
            "sum" => Ok(Value::Num(numbers(&one(&args)?).map_err(fail)?.iter().sum())),
            "mean" => {
                let values = numbers(&one(&args)?).map_err(fail)?;
                if values.is_empty() {
                    return Err(fail("mean of an empty list".into()));
                }
                Ok(Value::Num(values.iter().sum::<f64>() / values.len() as f64))
            }
            "min" | "max" => {
                let values = if args.len() == 1 {
                    numbers(&args[0]).map_err(fail)?
                } else {
                    numbers(&Value::List(args.clone())).map_err(fail)?
                };
                let folded = values.iter().copied().reduce(|a, b| {
                    if name == "min" {
                        a.min(b)
                    } else {
                        a.max(b)
                    }
                });
                folded
                    .map(Value::Num)
                    .ok_or_else(|| fail("no values".into()))
            }
            "abs" => unary_math(&f64::abs),
            "sqrt" => unary_math(&f64::sqrt),
            "exp" => unary_math(&f64::exp),
            "ln" => unary_math(&f64::ln),
            "round" => unary_math(&f64::round),
            "floor" => unary_math(&f64::floor),
            "relu" => unary_math(&|x: f64| x.max(0.0)),
            "sigmoid" => unary_math(&|x: f64| 1.0 / (1.0 + (-x).exp())),
            "softmax" => {
                let values = flat_list(&one(&args)?).map_err(fail)?;
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
                let total: f64 = exps.iter().sum();
                Ok(Value::List(exps.into_iter().map(|e| Value::Num(e / total)).collect()))
            }
            "argmax" => {
                let values = flat_list(&one(&args)?).map_err(fail)?;
                let best = values
                    .iter()
                    .enumerate()
                    .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                        Some((_, b)) if b >= v => best,
                        _ => Some((i, v)),
                    });
                best.map(|(i, _)| Value::Num(i as f64))
                    .ok_or_else(|| fail("argmax of an empty list".into()))
            }
            "dot" => match args.as_slice() {
                [a, b] => {
                    let (a, b) = (flat_list(a).map_err(fail)?, flat_list(b).map_err(fail)?);
                    if a.len() != b.len() {
                        return Err(fail(format!("length mismatch {} vs {}", a.len(), b.len())));
                    }
                    Ok(Value::Num(a.iter().zip(&b).map(|(x, y)| x * y).sum()))
                }
                _ => Err(fail("expected 2 arguments".into())),
            },
            "range" => {
                let (start, end) = match args.as_slice() {
                    [Value::Num(end)] => (0.0, *end),
                    [Value::Num(start), Value::Num(end)] => (*start, *end),
                    _ => return Err(fail("expected range(end) or range(start, end)".into())),
                };
                let (start, end) = (start.ceil() as i64, end.ceil() as i64);
                let len = end.saturating_sub(start).max(0) as u64;
                let bytes = len.saturating_mul(std::mem::size_of::<Value>() as u64);
                if bytes > self.memory_limit as u64 {
                    return Err(ScriptError::memory(
                        format!(
                            "{name}(): {len} elements need {bytes} bytes, limit is {}",
                            self.memory_limit
                        ),
                        line,
                    ));
                }
                Ok(Value::List((start..end).map(|i| Value::Num(i as f64)).collect()))
            }
            "keys" => match one(&args)? {
                Value::Map(map) => Ok(Value::List(map.into_keys().map(Value::Str).collect())),
                other => Err(fail(format!("expected a map, got {}", other.type_name()))),
            },
            "concat" => {
                if args.iter().all(|a| matches!(a, Value::Str(_))) {
                    Ok(Value::Str(args.iter().map(|a| a.to_string()).collect()))
                } else {
                    let mut out = Vec::new();
                    for arg in args {
                        match arg {
                            Value::List(items) => out.extend(items),
                            other => {
                                return Err(fail(format!("cannot concatenate {}", other.type_name())))
                            }
                        }
                    }
                    Ok(Value::List(out))
                }
            }
            "clamp" => match args.as_slice() {
                [x, Value::Num(lo), Value::Num(hi)] => {
                    let (lo, hi) = (*lo, *hi);
                    map_numbers(x, &|v| v.clamp(lo.min(hi), hi.max(lo))).map_err(fail)
                }
                _ => Err(fail("expected clamp(x, lo, hi)".into())),
            },
            "file" => match one(&args)? {
                Value::Str(name) => self
                    .files
                    .get(&name)
                    .map(|text| Value::Str(text.clone()))
                    .ok_or_else(|| fail(format!("bundle has no text file '{name}'"))),
                other => Err(fail(format!("expected a file name, got {}", other.type_name()))),
            },
            "json" => match one(&args)? {
                Value::Str(text) => serde_json::from_str::<serde_json::Value>(&text)
                    .map(|v| Value::from_json(&v))
                    .map_err(|e| fail(e.to_string())),
                other => Err(fail(format!("expected a string, got {}", other.type_name()))),
            },
            "str" => Ok(Value::Str(one(&args)?.to_string())),
            "error" => {
                let message = args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" ");
                Err(ScriptError::runtime(message, line))
            }
            other => Err(ScriptError::runtime(format!("unknown builtin '{other}'"), line)),
        }
    }
}

/// Applies `f` to a number or to every number of a (nested) list.
fn map_numbers(value: &Value, f: &dyn Fn(f64) -> f64) -> Result<Value, String> {
    match value {
        Value::Num(n) => Ok(Value::Num(f(*n))),
        Value::Bool(b) => Ok(Value::Num(f(if *b { 1.0 } else { 0.0 }))),
        Value::List(items) => items
            .iter()
            .map(|item| map_numbers(item, f))
            .collect::<Result<_, _>>()
            .map(Value::List),
        other => Err(format!("expected a number or list, got {}", other.type_name())),
    }
}

/// Every number in a (nested) list, or the number itself.
fn numbers(value: &Value) -> Result<Vec<f64>, String> {
    let mut out = Vec::new();
    collect_numbers(value, &mut out)?;
    Ok(out)
}

fn collect_numbers(value: &Value, out: &mut Vec<f64>) -> Result<(), String> {
    match value {
        Value::Num(n) => out.push(*n),
        Value::Bool(b) => out.push(if *b { 1.0 } else { 0.0 }),
        Value::List(items) => {
            for item in items {
                collect_numbers(item, out)?;
            }
        }
        other => return Err(format!("expected numbers, found {}", other.type_name())),
    }
    Ok(())
}

/// A flat list of numbers.
fn flat_list(value: &Value) -> Result<Vec<f64>, String> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| match item {
                Value::Num(n) => Ok(*n),
                other => Err(format!("expected a flat list of numbers, found {}", other.type_name())),
            })
            .collect(),
        other => Err(format!("expected a list, got {}", other.type_name())),
    }
}

fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, String> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(a == b)),
        BinOp::Ne => return Ok(Value::Bool(a != b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => return compare(op, a, b),
        _ => {}
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) if op == BinOp::Add => Ok(Value::Str(format!("{x}{y}"))),
        (Value::Num(x), Value::Num(y)) => Ok(Value::Num(arith(op, *x, *y))),
        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                return Err(format!(
                    "operator '{}' on lists of length {} and {}",
                    op.symbol(),
                    xs.len(),
                    ys.len()
                ));
            }
            xs.iter()
                .zip(ys)
                .map(|(x, y)| binary(op, x, y))
                .collect::<Result<_, _>>()
                .map(Value::List)
        }
        (Value::List(xs), scalar @ Value::Num(_)) => xs
            .iter()
            .map(|x| binary(op, x, scalar))
            .collect::<Result<_, _>>()
            .map(Value::List),
        (scalar @ Value::Num(_), Value::List(ys)) => ys
            .iter()
            .map(|y| binary(op, scalar, y))
            .collect::<Result<_, _>>()
            .map(Value::List),
        _ => Err(format!(
            "unsupported operand types for '{}': {} and {}",
            op.symbol(),
            a.type_name(),
            b.type_name()
        )),
    }
}

fn arith(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Rem => x % y,
        _ => f64::NAN,
    }
}

fn compare(op: BinOp, a: &Value, b: &Value) -> Result<Value, String> {
    let ordering = match (a, b) {
        (Value::Num(x), Value::Num(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => {
            return Err(format!(
                "cannot compare {} with {} using '{}'",
                a.type_name(),
                b.type_name(),
                op.symbol()
            ))
        }
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    Ok(Value::Bool(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}

fn index_value(target: &Value, index: &Value) -> Result<Value, String> {
    match (target, index) {
        (Value::List(items), Value::Num(i)) => {
            position(*i, items.len()).map(|p| items[p].clone())
        }
        (Value::Str(s), Value::Num(i)) => {
            let chars: Vec<char> = s.chars().collect();
            position(*i, chars.len()).map(|p| Value::Str(chars[p].to_string()))
        }
        (Value::Map(map), Value::Str(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| format!("map has no key '{key}'")),
        _ => Err(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        )),
    }
}

/// Resolves a possibly negative index.
fn position(index: f64, len: usize) -> Result<usize, String> {
    if index.fract() != 0.0 {
        return Err(format!("index {index} is not an integer"));
    }
    let resolved = if index < 0.0 { len as f64 + index } else { index };
    if resolved < 0.0 || resolved >= len as f64 {
        return Err(format!("index {index} out of range for length {len}"));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::script::parser::parse;
    use crate::worker::script::parser::Item;

    /// Evaluates `fn main() = <expr>;` and returns the result.
    fn eval(expr: &str) -> Result<Value, ScriptError> {
        let items = parse(&format!("fn main() = {expr};")).unwrap();
        let Item::Fn(def) = &items[0] else { unreachable!() };
        let globals = HashMap::new();
        let files = BTreeMap::from([("t.json".to_string(), "[1, 2]".to_string())]);
        Interpreter::new(&globals, &files).call(&Value::Func(Func::User(Rc::clone(def))), vec![], 1)
    }

    fn num(expr: &str) -> f64 {
        match eval(expr).unwrap() {
            Value::Num(n) => n,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_and_broadcast() {
        assert_eq!(num("1 + 2 * 3 - 4 / 2"), 5.0);
        assert_eq!(num("7 % 4"), 3.0);
        assert_eq!(
            eval("[1, 2] * 2 + [10, 20]").unwrap(),
            Value::List(vec![Value::Num(12.0), Value::Num(24.0)])
        );
        assert!(eval("[1, 2] + [1]").is_err());
        assert_eq!(eval(r#""a" + "b""#).unwrap(), Value::Str("ab".into()));
    }

    #[test]
    fn test_builtins() {
        assert_eq!(num("sum([1, 2, 0.5])"), 3.5);
        assert_eq!(num("mean([1, 2, 3])"), 2.0);
        assert_eq!(num("max(3, 9, 4)"), 9.0);
        assert_eq!(num("argmax([0.1, 0.7, 0.2])"), 1.0);
        assert_eq!(num("dot([1, 2], [3, 4])"), 11.0);
        assert_eq!(num("len(range(2, 6))"), 4.0);
        assert_eq!(num("sum(softmax([1, 2, 3]))").round(), 1.0);
        assert_eq!(num("json(file(\"t.json\"))[1]"), 2.0);
        assert_eq!(num("clamp(5, 0, 1)"), 1.0);
        assert_eq!(num("relu(-3)"), 0.0);
    }

    #[test]
    fn test_logic_and_indexing() {
        assert_eq!(eval("if 1 < 2 and not (3 == 4) then \"y\" else \"n\"").unwrap(), Value::Str("y".into()));
        assert_eq!(num("[5, 6, 7][-1]"), 7.0);
        assert_eq!(num("{a: {b: 4}}.a.b"), 4.0);
        assert_eq!(num("let x = 2 in let y = x * x in y + x"), 6.0);
        assert!(eval("[1][3]").is_err());
        assert!(eval("{a: 1}.b").is_err());
    }

    #[test]
    fn test_error_builtin_and_undefined() {
        let err = eval("error(\"bad input\", 3)").unwrap_err();
        assert_eq!(err.message, "bad input 3");
        let err = eval("nope + 1").unwrap_err();
        assert!(err.message.contains("'nope' is not defined"));
    }

    #[test]
    fn test_json_normalisation() {
        let v = Value::List(vec![Value::Num(3.0), Value::Num(1.75), Value::Num(f64::NAN)]);
        assert_eq!(v.to_json(), serde_json::json!([3, 1.75, null]));
        let back = Value::from_json(&serde_json::json!({"x": [1, true, "s"]}));
        assert!(matches!(back, Value::Map(ref m) if m.contains_key("x")));
    }
}

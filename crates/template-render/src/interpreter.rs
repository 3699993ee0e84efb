use indexmap::IndexMap;
use sqlchain_api::{ChainError, Result};

use crate::ast::{BinaryOp, Expr, LoopTarget, MacroDef, Node, UnaryOp};
use crate::helpers::OutputColumns;
use crate::value::Value;
use crate::{RenderContext, Template};

/// Nesting limit shared by macro calls and `render()`.
const MAX_DEPTH: usize = 32;

pub(crate) type Frame = IndexMap<String, Value>;

/// Tree-walking evaluator for one render of one template.
///
/// Variables live in a stack of frames: frame 0 holds the bound arguments and
/// `source_table`, loops and macro calls push their own. `set` writes to the
/// innermost frame, so assignments inside a loop body do not leak out of it.
pub(crate) struct Evaluator<'t, 'c> {
    pub(crate) template: &'t Template,
    pub(crate) ctx: &'c RenderContext<'c>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) output: OutputColumns,
    pub(crate) depth: usize,
}

impl<'t, 'c> Evaluator<'t, 'c> {
    pub(crate) fn new(template: &'t Template, ctx: &'c RenderContext<'c>) -> Self {
        let mut globals: Frame = ctx
            .arguments
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        globals.insert("source_table".to_string(), Value::Str(ctx.source.to_string()));
        Self {
            template,
            ctx,
            frames: vec![globals],
            output: OutputColumns::default(),
            depth: 0,
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> ChainError {
        ChainError::evaluation(self.template.name(), message)
    }

    pub(crate) fn exec(&mut self, nodes: &[Node], out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval(expr)?;
                    out.push_str(&value.to_string());
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (cond, body) in branches {
                        if self.eval(cond)?.is_truthy() {
                            self.exec(body, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.exec(otherwise, out)?;
                    }
                }
                Node::For {
                    target,
                    iterable,
                    body,
                    empty,
                } => self.exec_for(target, iterable, body, empty, out)?,
                Node::Set { name, value } => {
                    let value = self.eval(value)?;
                    if let Some(frame) = self.frames.last_mut() {
                        frame.insert(name.clone(), value);
                    }
                }
                Node::Do(expr) => {
                    self.eval(expr)?;
                }
            }
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        target: &LoopTarget,
        iterable: &Expr,
        body: &[Node],
        empty: &[Node],
        out: &mut String,
    ) -> Result<()> {
        let items = match self.eval(iterable)? {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            Value::Map(entries) => entries.into_keys().map(Value::Str).collect(),
            other => return Err(self.error(format!("cannot iterate over a {}", other.type_name()))),
        };
        if items.is_empty() {
            return self.exec(empty, out);
        }

        let length = items.len();
        for (index, item) in items.into_iter().enumerate() {
            let mut frame = Frame::new();
            match target {
                LoopTarget::Single(name) => {
                    frame.insert(name.clone(), item);
                }
                LoopTarget::Pair(first, second) => match item {
                    Value::List(mut pair) if pair.len() == 2 => {
                        let b = pair.pop().unwrap_or(Value::Null);
                        let a = pair.pop().unwrap_or(Value::Null);
                        frame.insert(first.clone(), a);
                        frame.insert(second.clone(), b);
                    }
                    other => {
                        return Err(self.error(format!(
                            "cannot unpack {} into {}, {}",
                            other.type_name(),
                            first,
                            second
                        )))
                    }
                },
            }
            frame.insert("loop".to_string(), loop_value(index, length));

            self.frames.push(frame);
            let result = self.exec(body, out);
            self.frames.pop();
            result?;
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| self.error(format!("'{}' is undefined", name))),
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_>>()?,
            )),
            Expr::Dict(entries) => {
                let mut map = IndexMap::new();
                for (key, value) in entries {
                    let key = self.eval(key)?.to_string();
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::Attr(base, name) => {
                let base = self.eval(base)?;
                match base {
                    Value::Map(entries) => Ok(entries.get(name).cloned().unwrap_or(Value::Null)),
                    other => Err(self.error(format!(
                        "{} has no attribute '{}'",
                        other.type_name(),
                        name
                    ))),
                }
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                self.index(base, index)
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Filter { value, name, args } => {
                let value = if name == "default" {
                    self.eval_or_null(value)?
                } else {
                    self.eval(value)?
                };
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>>>()?;
                self.apply_filter(name, value, args)
            }
            Expr::Test {
                value,
                name,
                negated,
            } => {
                let passed = self.eval_test(value, name)?;
                Ok(Value::Bool(passed != *negated))
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                match (op, operand) {
                    (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| self.error(format!("cannot negate {}", i))),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Neg, other) => {
                        Err(self.error(format!("cannot negate a {}", other.type_name())))
                    }
                }
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs),
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(otherwise),
                        None => Ok(Value::Null),
                    }
                }
            }
        }
    }

    /// Like [`eval`](Self::eval), but an undefined variable yields null.
    fn eval_or_null(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Var(name) => Ok(self.lookup(name).cloned().unwrap_or(Value::Null)),
            other => self.eval(other),
        }
    }

    fn index(&self, base: Value, index: Value) -> Result<Value> {
        match (base, index) {
            (Value::Map(entries), key) => Ok(entries
                .get(&key.to_string())
                .cloned()
                .unwrap_or(Value::Null)),
            (Value::List(items), Value::Int(i)) => {
                let len = items.len() as i64;
                let pos = if i < 0 { len + i } else { i };
                if pos < 0 || pos >= len {
                    return Err(self.error(format!("list index {} out of range", i)));
                }
                Ok(items[pos as usize].clone())
            }
            (base, index) => Err(self.error(format!(
                "cannot index a {} with a {}",
                base.type_name(),
                index.type_name()
            ))),
        }
    }

    fn eval_test(&mut self, value: &Expr, name: &str) -> Result<bool> {
        if name == "defined" || name == "undefined" {
            let defined = match value {
                Expr::Var(var) => self.lookup(var).is_some(),
                other => self.eval(other).is_ok(),
            };
            return Ok(defined == (name == "defined"));
        }
        let value = self.eval(value)?;
        let passed = match name {
            "none" => value.is_null(),
            "string" => matches!(value, Value::Str(_)),
            "mapping" => matches!(value, Value::Map(_)),
            "sequence" | "iterable" => {
                matches!(value, Value::List(_) | Value::Map(_) | Value::Str(_))
            }
            "number" => matches!(value, Value::Int(_) | Value::Float(_)),
            "boolean" => matches!(value, Value::Bool(_)),
            other => return Err(self.error(format!("unknown test '{}'", other))),
        };
        Ok(passed)
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value> {
        // and/or return one of their operands, short-circuiting the right one
        match op {
            BinaryOp::And => {
                let left = self.eval(lhs)?;
                return if left.is_truthy() { self.eval(rhs) } else { Ok(left) };
            }
            BinaryOp::Or => {
                let left = self.eval(lhs)?;
                return if left.is_truthy() { Ok(left) } else { self.eval(rhs) };
            }
            _ => {}
        }

        let left = self.eval(lhs)?;
        let right = self.eval(rhs)?;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(left.loosely_equals(&right))),
            BinaryOp::Neq => Ok(Value::Bool(!left.loosely_equals(&right))),
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                let ordering = left.compare(&right).ok_or_else(|| {
                    self.error(format!(
                        "cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    ))
                })?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Lte => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            BinaryOp::In => Ok(Value::Bool(self.contains(&right, &left)?)),
            BinaryOp::NotIn => Ok(Value::Bool(!self.contains(&right, &left)?)),
            BinaryOp::Concat => Ok(Value::Str(format!("{}{}", left, right))),
            BinaryOp::Add => match (left, right) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                (Value::List(mut a), Value::List(b)) => {
                    a.extend(b);
                    Ok(Value::List(a))
                }
                (a, b) => self.arithmetic(op, a, b),
            },
            _ => self.arithmetic(op, left, right),
        }
    }

    fn contains(&self, haystack: &Value, needle: &Value) -> Result<bool> {
        match haystack {
            Value::List(items) => Ok(items.iter().any(|item| item.loosely_equals(needle))),
            Value::Map(entries) => Ok(entries.contains_key(&needle.to_string())),
            Value::Str(s) => match needle {
                Value::Str(n) => Ok(s.contains(n.as_str())),
                other => Err(self.error(format!(
                    "'in <string>' requires a string, not a {}",
                    other.type_name()
                ))),
            },
            Value::Null => Ok(false),
            other => Err(self.error(format!(
                "a {} cannot be searched with 'in'",
                other.type_name()
            ))),
        }
    }

    fn arithmetic(&self, op: BinaryOp, left: Value, right: Value) -> Result<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                match op {
                    BinaryOp::Add => Ok(Value::Int(a.wrapping_add(b))),
                    BinaryOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                    BinaryOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                    BinaryOp::Div if b == 0 => Err(self.error("division by zero")),
                    BinaryOp::Div => Ok(Value::Float(a as f64 / b as f64)),
                    BinaryOp::Mod if b == 0 => Err(self.error("modulo by zero")),
                    BinaryOp::Mod => a
                        .checked_rem_euclid(b)
                        .map(Value::Int)
                        .ok_or_else(|| self.error(format!("{} % {} overflows", a, b))),
                    _ => Err(self.error("unsupported operator")),
                }
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = as_f64(&left);
                let b = as_f64(&right);
                match op {
                    BinaryOp::Add => Ok(Value::Float(a + b)),
                    BinaryOp::Sub => Ok(Value::Float(a - b)),
                    BinaryOp::Mul => Ok(Value::Float(a * b)),
                    BinaryOp::Div if b == 0.0 => Err(self.error("division by zero")),
                    BinaryOp::Div => Ok(Value::Float(a / b)),
                    BinaryOp::Mod if b == 0.0 => Err(self.error("modulo by zero")),
                    BinaryOp::Mod => Ok(Value::Float(a.rem_euclid(b))),
                    _ => Err(self.error("unsupported operator")),
                }
            }
            _ => Err(self.error(format!(
                "unsupported operand types {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        }
    }

    fn eval_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<Value> {
        let positional = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>>>()?;
        let mut keywords = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            keywords.push((name.clone(), self.eval(expr)?));
        }

        match func {
            Expr::Attr(base, method) => {
                let receiver = self.eval(base)?;
                self.call_method(receiver, method, positional)
            }
            Expr::Var(name) => {
                let template = self.template;
                if let Some(def) = template.macros().get(name) {
                    return self.call_macro(def, positional, keywords);
                }
                self.call_helper(name, positional, keywords)
            }
            _ => Err(self.error("expression is not callable")),
        }
    }

    pub(crate) fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {} levels", MAX_DEPTH)));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn call_macro(
        &mut self,
        def: &MacroDef,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        if args.len() > def.params.len() {
            return Err(self.error(format!(
                "macro {} takes {} arguments, got {}",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        let mut kwargs: IndexMap<String, Value> = kwargs.into_iter().collect();
        let mut frame = Frame::new();
        let mut args = args.into_iter();
        for (param, default) in &def.params {
            let value = match args.next() {
                Some(value) => value,
                None => match kwargs.shift_remove(param) {
                    Some(value) => value,
                    None => match default {
                        Some(expr) => self.eval(expr)?,
                        None => Value::Null,
                    },
                },
            };
            frame.insert(param.clone(), value);
        }
        if let Some(unknown) = kwargs.keys().next() {
            return Err(self.error(format!(
                "macro {} has no parameter '{}'",
                def.name, unknown
            )));
        }

        self.enter()?;
        // macros see the globals and their own parameters, not the caller's locals
        let globals = self.frames[0].clone();
        let saved = std::mem::replace(&mut self.frames, vec![globals, frame]);
        let mut buffer = String::new();
        let result = self.exec(&def.body, &mut buffer);
        self.frames = saved;
        self.leave();
        result?;
        Ok(Value::Str(buffer))
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

fn loop_value(index: usize, length: usize) -> Value {
    let mut map = IndexMap::new();
    map.insert("index".to_string(), Value::Int(index as i64 + 1));
    map.insert("index0".to_string(), Value::Int(index as i64));
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == length));
    map.insert("length".to_string(), Value::Int(length as i64));
    Value::Map(map)
}

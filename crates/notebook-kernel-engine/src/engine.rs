//! Expression-language engine.

use notebook_kernel_core::{
    DisplayData, DisplayHook, DisplayOptions, EvaluationContext, Evaluation, ExecutionEngine,
    ExecutionError, InterruptHandle, message::LanguageInfo,
};
use serde_json::Map;

use crate::{
    lexer::tokenize,
    parser::{BinOp, Expr, Stmt, StmtKind, UnaryOp, parse},
    value::Value,
};

/// Bindings persisted across execute requests.
pub type Bindings = EvaluationContext<Value>;

/// Evaluates the `calc` expression language.
#[derive(Debug, Default)]
pub struct ExpressionEngine {
    interrupt: InterruptHandle,
}

impl ExpressionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionEngine for ExpressionEngine {
    type Context = Bindings;

    fn evaluate(
        &mut self,
        code: &str,
        context: &mut Bindings,
        display: &mut dyn DisplayHook,
    ) -> Result<Evaluation, ExecutionError> {
        // An interrupt that arrived while idle targets nothing.
        self.interrupt.clear();

        let stmts = parse(&tokenize(code)?)?;
        let mut evaluator = Evaluator {
            bindings: context,
            display,
        };

        let mut last = Value::Undefined;
        for stmt in &stmts {
            if self.interrupt.take() {
                return Err(ExecutionError::new("KeyboardInterrupt", "execution interrupted")
                    .with_trace(&trace(code, stmt.line)));
            }
            last = evaluator.statement(stmt).map_err(|e| {
                if e.traceback.is_empty() {
                    e.with_trace(&trace(code, stmt.line))
                } else {
                    e
                }
            })?;
        }

        tracing::debug!(statements = stmts.len(), "Evaluated cell");
        Ok(match last {
            Value::Undefined => Evaluation::NoValue,
            value => Evaluation::Value(value.to_string()),
        })
    }

    fn language_info(&self) -> LanguageInfo {
        LanguageInfo {
            name: "calc".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mimetype: "text/x-calc".to_string(),
            file_extension: ".calc".to_string(),
        }
    }

    fn banner(&self) -> String {
        "calc: a small expression language".to_string()
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        Some(self.interrupt.clone())
    }
}

fn trace(code: &str, line: usize) -> String {
    let source = code.lines().nth(line.saturating_sub(1)).unwrap_or("").trim();
    format!("Traceback (most recent call last):\n  line {line}: {source}")
}

struct Evaluator<'a> {
    bindings: &'a mut Bindings,
    display: &'a mut dyn DisplayHook,
}

impl Evaluator<'_> {
    fn statement(&mut self, stmt: &Stmt) -> Result<Value, ExecutionError> {
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                let value = self.defined(expr)?;
                self.bindings.set(name.clone(), value);
                Ok(Value::Undefined)
            }
            StmtKind::Assign(name, expr) => {
                if !self.bindings.contains(name) {
                    return Err(name_error(name));
                }
                let value = self.defined(expr)?;
                self.bindings.set(name.clone(), value);
                Ok(Value::Undefined)
            }
            StmtKind::Expr(expr) => self.expr(expr),
        }
    }

    /// Evaluate an expression that must produce a value.
    fn defined(&mut self, expr: &Expr) -> Result<Value, ExecutionError> {
        match self.expr(expr)? {
            Value::Undefined => Err(ExecutionError::new(
                "TypeError",
                "expression produces no value",
            )),
            value => Ok(value),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<Value, ExecutionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.bindings.get(name).cloned().ok_or_else(|| name_error(name)),
            Expr::Unary(op, operand) => {
                let value = self.defined(operand)?;
                unary(*op, value)
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.defined(lhs)?;
                let rhs = self.defined(rhs)?;
                binary(*op, lhs, rhs)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|a| self.defined(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, args)
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecutionError> {
        match (name, args.as_slice()) {
            ("display", [value]) => {
                self.display
                    .display(DisplayData::Text(value.to_plain()), DisplayOptions::default());
                Ok(Value::Undefined)
            }
            ("display", [value, id]) => {
                self.display.display(
                    DisplayData::Text(value.to_plain()),
                    DisplayOptions {
                        display_id: Some(id.to_plain()),
                        update: false,
                    },
                );
                Ok(Value::Undefined)
            }
            ("update_display", [value, id]) => {
                self.display.display(
                    DisplayData::Text(value.to_plain()),
                    DisplayOptions {
                        display_id: Some(id.to_plain()),
                        update: true,
                    },
                );
                Ok(Value::Undefined)
            }
            ("display_raw", [Value::Str(mime), body, rest @ ..]) if rest.len() <= 1 => {
                let mut bundle = Map::new();
                bundle.insert(mime.clone(), serde_json::Value::String(body.to_plain()));
                self.display.display(
                    DisplayData::Raw(bundle),
                    DisplayOptions {
                        display_id: rest.first().map(Value::to_plain),
                        update: false,
                    },
                );
                Ok(Value::Undefined)
            }
            ("len", [Value::Str(s)]) => i64::try_from(s.chars().count())
                .map(Value::Int)
                .map_err(|_| ExecutionError::new("OverflowError", "length too large")),
            ("len", [other]) => Err(type_error(format!(
                "len() expects a string, got {}",
                other.type_name()
            ))),
            ("str", [value]) => Ok(Value::Str(value.to_plain())),
            ("raise", [name, message]) => {
                Err(ExecutionError::new(name.to_plain(), message.to_plain()))
            }
            ("display" | "update_display" | "display_raw" | "len" | "str" | "raise", _) => Err(
                type_error(format!("{name}() called with {} argument(s)", args.len())),
            ),
            _ => Err(name_error(name)),
        }
    }
}

fn name_error(name: &str) -> ExecutionError {
    ExecutionError::new("NameError", format!("name '{name}' is not defined"))
}

fn type_error(message: impl Into<String>) -> ExecutionError {
    ExecutionError::new("TypeError", message)
}

fn overflow() -> ExecutionError {
    ExecutionError::new("OverflowError", "integer overflow")
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, ExecutionError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, other) => Err(type_error(format!(
            "bad operand type for unary -: {}",
            other.type_name()
        ))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, ExecutionError> {
    use Value::{Bool, Int, Str};

    match (op, &lhs, &rhs) {
        (BinOp::Add, Str(_), _) | (BinOp::Add, _, Str(_)) => {
            Ok(Str(format!("{}{}", lhs.to_plain(), rhs.to_plain())))
        }
        (BinOp::Eq, _, _) => Ok(Bool(equals(&lhs, &rhs))),
        (BinOp::NotEq, _, _) => Ok(Bool(!equals(&lhs, &rhs))),
        (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, Str(a), Str(b)) => {
            Ok(Bool(compare(op, a.cmp(b))))
        }
        (_, Int(a), Int(b)) => int_arith(op, *a, *b),
        _ => {
            let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) else {
                return Err(type_error(format!(
                    "unsupported operand types for {op:?}: {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            };
            float_arith(op, a, b)
        }
    }
}

#[allow(clippy::float_cmp)]
fn equals(lhs: &Value, rhs: &Value) -> bool {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        return a == b;
    }
    match (as_float(lhs), as_float(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn compare(op: BinOp, ordering: std::cmp::Ordering) -> bool {
    match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Value, ExecutionError> {
    let zero_division = || ExecutionError::new("ZeroDivisionError", "division by zero");
    match op {
        BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Div if b == 0 => Err(zero_division()),
        BinOp::Div => match a.checked_rem(b) {
            Some(0) => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
            Some(_) => {
                #[allow(clippy::cast_precision_loss)]
                let (a, b) = (a as f64, b as f64);
                float_arith(op, a, b)
            }
            None => Err(overflow()),
        },
        BinOp::Rem if b == 0 => Err(zero_division()),
        BinOp::Rem => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Ok(Value::Bool(compare(op, a.cmp(&b)))),
        _ => {
            #[allow(clippy::cast_precision_loss)]
            let (a, b) = (a as f64, b as f64);
            float_arith(op, a, b)
        }
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Result<Value, ExecutionError> {
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div | BinOp::Rem if b == 0.0 => {
            Err(ExecutionError::new("ZeroDivisionError", "division by zero"))
        }
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::Rem => Ok(Value::Float(a % b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => a
            .partial_cmp(&b)
            .map(|o| Value::Bool(compare(op, o)))
            .ok_or_else(|| type_error("comparison with NaN")),
        BinOp::Eq => Ok(Value::Bool(equals(&Value::Float(a), &Value::Float(b)))),
        BinOp::NotEq => Ok(Value::Bool(!equals(&Value::Float(a), &Value::Float(b)))),
    }
}

pub mod arithmetic;
pub mod calculator;
pub mod expr;

use crate::errors::ToolError;
use crate::mcp::registry::{Arguments, DynTool};
use arithmetic::{ArithmeticTool, Operation};
use calculator::{CalculateTool, CalculatorTool};
use serde_json::Value;
use std::sync::Arc;

pub fn builtin_tools() -> Vec<DynTool> {
    vec![
        Arc::new(CalculatorTool),
        Arc::new(ArithmeticTool::new(Operation::Add)),
        Arc::new(ArithmeticTool::new(Operation::Subtract)),
        Arc::new(ArithmeticTool::new(Operation::Multiply)),
        Arc::new(ArithmeticTool::new(Operation::Divide)),
        Arc::new(CalculateTool),
    ]
}

/// Accepts JSON numbers and numeric strings.
pub fn number_arg(args: &Arguments, key: &str) -> Result<f64, ToolError> {
    let invalid = |reason: &str| ToolError::InvalidArgument { name: key.to_string(), reason: reason.to_string() };
    match args.get(key) {
        None | Some(Value::Null) => Err(ToolError::MissingArgument(key.to_string())),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid("not representable as f64")),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| invalid("not a number")),
        Some(_) => Err(invalid("expected a number")),
    }
}

pub fn string_arg<'a>(args: &'a Arguments, key: &str) -> Result<&'a str, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Err(ToolError::MissingArgument(key.to_string())),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ToolError::InvalidArgument { name: key.to_string(), reason: "expected a string".into() }),
    }
}

/// Integral values print without a fractional part.
pub fn format_number(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

use crate::errors::ToolError;
use crate::mcp::registry::{Arguments, Tool};
use crate::mcp::types::ToolResult;
use crate::tools::arithmetic::Operation;
use crate::tools::{expr, format_number, string_arg};
use async_trait::async_trait;
use serde_json::{json, Value};

fn evaluate_expression(args: &Arguments) -> Result<ToolResult, ToolError> {
    let expression = string_arg(args, "expression")?;
    Ok(match expr::evaluate(expression) {
        Ok(value) => ToolResult::text(format!("{} = {}", expression.trim(), format_number(value))),
        Err(e) => ToolResult::error(format!("Error: cannot evaluate expression: {e}")),
    })
}

/// Multi-operation calculator: `operation` picks a binary op on `a`/`b`, or
/// `calculate` for a free-form `expression`.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Basic arithmetic: add, subtract, multiply, divide, or evaluate an expression"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide", "calculate"],
                    "description": "operation to perform"
                },
                "a": {"type": "number", "description": "first operand (binary operations)"},
                "b": {"type": "number", "description": "second operand (binary operations)"},
                "expression": {"type": "string", "description": "expression (calculate)"}
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, arguments: Arguments) -> Result<ToolResult, ToolError> {
        let operation = string_arg(&arguments, "operation")?;
        if operation == "calculate" {
            return evaluate_expression(&arguments);
        }
        match Operation::parse(operation) {
            Some(op) => op.run(&arguments),
            None => Ok(ToolResult::error(format!("Error: unsupported operation `{operation}`"))),
        }
    }
}

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression such as (2 + 3) * 4"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {"type": "string", "description": "expression to evaluate"}
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: Arguments) -> Result<ToolResult, ToolError> {
        evaluate_expression(&arguments)
    }
}

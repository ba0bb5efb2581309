use crate::errors::ToolError;
use crate::mcp::registry::{Arguments, Tool};
use crate::mcp::types::ToolResult;
use crate::tools::{format_number, number_arg};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(Operation::Add),
            "subtract" => Some(Operation::Subtract),
            "multiply" => Some(Operation::Multiply),
            "divide" => Some(Operation::Divide),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Operation::Add => "+",
            Operation::Subtract => "-",
            Operation::Multiply => "*",
            Operation::Divide => "/",
        }
    }

    pub fn apply(self, a: f64, b: f64) -> Option<f64> {
        match self {
            Operation::Add => Some(a + b),
            Operation::Subtract => Some(a - b),
            Operation::Multiply => Some(a * b),
            Operation::Divide if b == 0.0 => None,
            Operation::Divide => Some(a / b),
        }
    }

    /// Computes `a op b` as a tool result; division by zero is a failed
    /// result, not an error.
    pub fn run(self, args: &Arguments) -> Result<ToolResult, ToolError> {
        let a = number_arg(args, "a")?;
        let b = number_arg(args, "b")?;
        Ok(match self.apply(a, b) {
            Some(r) => ToolResult::text(format!(
                "Result: {} {} {} = {}",
                format_number(a),
                self.symbol(),
                format_number(b),
                format_number(r)
            )),
            None => ToolResult::error("Error: division by zero"),
        })
    }
}

/// One of the four binary operations exposed as its own tool.
pub struct ArithmeticTool {
    op: Operation,
}

impl ArithmeticTool {
    pub fn new(op: Operation) -> Self {
        Self { op }
    }
}

#[async_trait]
impl Tool for ArithmeticTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        match self.op {
            Operation::Add => "Add two numbers",
            Operation::Subtract => "Subtract b from a",
            Operation::Multiply => "Multiply two numbers",
            Operation::Divide => "Divide a by b (b must not be zero)",
        }
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number", "description": "first operand"},
                "b": {"type": "number", "description": "second operand"}
            },
            "required": ["a", "b"]
        })
    }

    async fn execute(&self, arguments: Arguments) -> Result<ToolResult, ToolError> {
        self.op.run(&arguments)
    }
}

use crate::errors::{panic_message, ToolError};
use crate::mcp::types::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub type Arguments = Map<String, Value>;
pub type DynTool = Arc<dyn Tool + Send + Sync + 'static>;

#[async_trait]
pub trait Tool {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, arguments: Arguments) -> Result<ToolResult, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

type Handler = dyn Fn(Arguments) -> BoxFuture<'static, Result<ToolResult, ToolError>> + Send + Sync;

/// A tool assembled from plain values and a closure.
pub struct FnTool {
    name: String,
    description: String,
    input_schema: Value,
    handler: Box<Handler>,
}

impl FnTool {
    pub fn new<F, Fut>(name: &str, description: &str, input_schema: Value, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            handler: Box::new(move |args| handler(args).boxed()),
        }
    }

    pub fn into_dyn(self) -> DynTool {
        Arc::new(self)
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, arguments: Arguments) -> Result<ToolResult, ToolError> {
        (self.handler)(arguments).await
    }
}

/// What the dispatcher needs from a catalogue of tools.
#[async_trait]
pub trait ToolSource: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Never fails: unknown names and tool failures come back as
    /// error-shaped results.
    async fn invoke(&self, name: &str, arguments: Arguments) -> ToolResult;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<(String, DynTool)>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_tools() -> Self {
        let registry = Self::new();
        for tool in crate::tools::builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Inserts `tool`, replacing any tool already registered under its name.
    pub fn register(&self, tool: DynTool) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = tools.iter_mut().find(|(n, _)| *n == name) {
            warn!(tool = %name, "tool already registered, overwriting");
            slot.1 = tool;
        } else {
            info!(tool = %name, "registered tool");
            tools.push((name, tool));
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let before = tools.len();
        tools.retain(|(n, _)| n != name);
        let removed = tools.len() != before;
        if removed {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    pub fn clear(&self) {
        self.tools.write().unwrap_or_else(PoisonError::into_inner).clear();
        info!("cleared all registered tools");
    }

    pub fn get(&self, name: &str) -> Option<DynTool> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.iter().find(|(n, _)| n == name).map(|(_, t)| t.clone())
    }

    /// Snapshot in registration order.
    pub fn list(&self) -> Vec<DynTool> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn list_names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        tools.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn count(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn invoke(&self, name: &str, arguments: Arguments) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "unknown tool");
            return ToolResult::error(format!("unknown tool: {name}"));
        };
        let started = Instant::now();
        // the lock is released above; a panicking tool cannot poison it
        let outcome = AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(result)) => {
                debug!(tool = name, duration_ms, is_error = result.is_error, "tool finished");
                result
            }
            Ok(Err(e)) => {
                error!(tool = name, duration_ms, error = %e, "tool execution failed");
                ToolResult::error(format!("execution error for `{name}`: {e}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(tool = name, duration_ms, panic = %message, "tool panicked");
                ToolResult::error(format!("execution error for `{name}`: {message}"))
            }
        }
    }
}

#[async_trait]
impl ToolSource for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.list().iter().map(|t| t.definition()).collect()
    }

    async fn invoke(&self, name: &str, arguments: Arguments) -> ToolResult {
        ToolRegistry::invoke(self, name, arguments).await
    }
}

use crate::mcp::client::RpcClient;
use crate::mcp::registry::{Arguments, ToolRegistry, ToolSource};
use crate::mcp::types::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// One entry of a batch: `{"name": ..., "arguments": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

/// Local tools plus the tools of any number of provider subprocesses,
/// presented as a single catalogue. Local names win over remote ones.
pub struct ToolHub {
    local: Arc<ToolRegistry>,
    providers: Vec<Arc<RpcClient>>,
}

impl ToolHub {
    pub fn new(local: Arc<ToolRegistry>, providers: Vec<Arc<RpcClient>>) -> Self {
        Self { local, providers }
    }

    pub fn local(&self) -> &Arc<ToolRegistry> {
        &self.local
    }

    pub fn providers(&self) -> &[Arc<RpcClient>] {
        &self.providers
    }

    fn remote_definitions(&self) -> Vec<ToolDefinition> {
        let mut seen: HashSet<String> = self.local.list_names().into_iter().collect();
        let mut out = Vec::new();
        for provider in self.providers.iter().filter(|p| p.is_initialized()) {
            for tool in provider.list_cached_tools() {
                if seen.insert(tool.name.clone()) {
                    out.push(tool);
                }
            }
        }
        out
    }

    fn provider_for(&self, name: &str) -> Option<&Arc<RpcClient>> {
        self.providers.iter().find(|p| p.is_initialized() && p.is_tool_available(name))
    }

    pub fn is_tool_available(&self, name: &str) -> bool {
        self.local.has(name) || self.provider_for(name).is_some()
    }

    /// Wire definition of `name`, local first, then the first provider that
    /// lists it.
    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        if let Some(tool) = self.local.get(name) {
            return Some(tool.definition());
        }
        self.remote_definitions().into_iter().find(|t| t.name == name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.definitions().into_iter().map(|t| t.name).collect()
    }

    pub fn tool_count(&self) -> usize {
        self.local.count() + self.remote_definitions().len()
    }

    /// Invokes `name` and returns only its text, the way a chat handler
    /// consumes tool output.
    pub async fn call_text(&self, name: &str, arguments: Arguments) -> String {
        self.invoke(name, arguments).await.text_content()
    }

    /// Tool catalogue rendered for prompt injection; empty when there are no
    /// tools.
    pub fn context_info(&self) -> String {
        let tools = self.definitions();
        if tools.is_empty() {
            return String::new();
        }
        let lines: Vec<String> = tools.iter().map(|t| format!("- {}: {}", t.name, t.description)).collect();
        format!("Available tools:\n{}", lines.join("\n"))
    }

    pub fn search(&self, query: &str) -> Vec<ToolDefinition> {
        let query = query.to_lowercase();
        self.definitions()
            .into_iter()
            .filter(|t| t.name.to_lowercase().contains(&query) || t.description.to_lowercase().contains(&query))
            .collect()
    }

    /// Runs each call in order, one at a time.
    pub async fn batch_call(&self, calls: Vec<BatchCall>) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            let Some(name) = call.name.filter(|n| !n.is_empty()) else {
                outcomes.push(BatchOutcome {
                    name: None,
                    result: None,
                    error: Some("tool name must not be empty".into()),
                    success: false,
                });
                continue;
            };
            let text = self.call_text(&name, call.arguments).await;
            outcomes.push(BatchOutcome { name: Some(name), result: Some(text), error: None, success: true });
        }
        outcomes
    }

    pub fn summary(&self) -> Value {
        let tools: Vec<Value> = self
            .definitions()
            .into_iter()
            .map(|t| json!({"name": t.name, "description": t.description}))
            .collect();
        json!({
            "total_tools": tools.len(),
            "local_tools": self.local.count(),
            "remote_tools": self.remote_definitions().len(),
            "tools": tools,
        })
    }

    pub async fn shutdown(&self) {
        for provider in &self.providers {
            provider.close().await;
        }
    }
}

#[async_trait]
impl ToolSource for ToolHub {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut tools = self.local.definitions();
        tools.extend(self.remote_definitions());
        tools
    }

    async fn invoke(&self, name: &str, arguments: Arguments) -> ToolResult {
        if self.local.has(name) {
            return self.local.invoke(name, arguments).await;
        }
        if let Some(provider) = self.provider_for(name) {
            return provider.call(name, arguments).await;
        }
        warn!(tool = name, "tool not available locally or from any provider");
        ToolResult::error(format!("unknown tool: {name}"))
    }
}

use crate::errors::{panic_message, AppError, AppResult};
use crate::mcp::registry::{Arguments, ToolSource};
use crate::mcp::types::{
    Implementation, InitializeResult, RequestId, RpcError, RpcRequest, RpcResponse, ToolsListResult,
    PROTOCOL_VERSION,
};
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Translates JSON-RPC requests into tool-source calls. Holds no per-request
/// state; one instance can serve any number of channels.
pub struct Dispatcher {
    tools: Arc<dyn ToolSource>,
    server_info: Implementation,
}

impl Dispatcher {
    pub fn new(tools: Arc<dyn ToolSource>, server_info: Implementation) -> Self {
        Self { tools, server_info }
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn tools(&self) -> &Arc<dyn ToolSource> {
        &self.tools
    }

    /// Handles one raw line. `None` means the line was a notification and
    /// gets no reply.
    pub async fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        self.handle_bytes(line.as_bytes()).await
    }

    /// Like `handle_line` for undecoded input; bytes that are not UTF-8 get
    /// the same parse error as malformed JSON.
    pub async fn handle_bytes(&self, raw: &[u8]) -> Option<RpcResponse> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                let err = AppError::Parse(e.to_string());
                let error = RpcError::new(err.rpc_code(), "parse error")
                    .with_data(json!({"details": e.to_string()}));
                Some(RpcResponse::failure(None, error))
            }
        }
    }

    pub async fn handle_value(&self, value: Value) -> Option<RpcResponse> {
        // salvage the id first so envelope errors still correlate
        let id = value
            .get("id")
            .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());
        match serde_json::from_value::<RpcRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let err = AppError::InvalidRequest(e.to_string());
                warn!(id = ?id, error = %err, "rejected request envelope");
                Some(RpcResponse::failure(id, RpcError::from(&err)))
            }
        }
    }

    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "notification");
            return None;
        }
        let RpcRequest { id, method, params, .. } = request;
        debug!(method = %method, id = ?id, "request");

        let outcome = AssertUnwindSafe(self.route(&method, params)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(result)) => RpcResponse::success(id, result),
            Ok(Err(err)) => {
                match &err {
                    AppError::Internal(_) => error!(method = %method, id = ?id, error = %err, "internal error"),
                    _ => warn!(method = %method, id = ?id, error = %err, "request rejected"),
                }
                RpcResponse::failure(id, RpcError::from(&err))
            }
            Err(payload) => {
                let err = AppError::Internal(panic_message(payload.as_ref()));
                error!(method = %method, id = ?id, error = %err, "request handler panicked");
                RpcResponse::failure(id, RpcError::from(&err))
            }
        };
        Some(response)
    }

    async fn route(&self, method: &str, params: Option<Value>) -> AppResult<Value> {
        match method {
            "initialize" => self.initialize(params),
            "tools/list" => self.tools_list(),
            "tools/call" => self.tools_call(params).await,
            other => Err(AppError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize(&self, _params: Option<Value>) -> AppResult<Value> {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({"tools": {}}),
            server_info: self.server_info.clone(),
        };
        to_value(&result)
    }

    fn tools_list(&self) -> AppResult<Value> {
        to_value(&ToolsListResult { tools: self.tools.definitions() })
    }

    async fn tools_call(&self, params: Option<Value>) -> AppResult<Value> {
        let params = params.unwrap_or(Value::Null);
        let name = match params.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(_) => return Err(AppError::InvalidParams("tool name must be a non-empty string".into())),
            None => return Err(AppError::InvalidParams("tool name is required".into())),
        };
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => Arguments::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(AppError::InvalidParams("arguments must be an object".into())),
        };
        let result = self.tools.invoke(&name, arguments).await;
        to_value(&result)
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))
}

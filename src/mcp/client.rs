use crate::config::ProviderConfig;
use crate::errors::ClientError;
use crate::mcp::registry::Arguments;
use crate::mcp::types::{
    Implementation, InitializeParams, RequestId, RpcRequest, RpcResponse, ToolDefinition, ToolResult,
    ToolsListResult, PROTOCOL_VERSION,
};
use crate::mcp::wire;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on waiting for one response line.
    pub call_timeout: Duration,
    /// Bound on the whole initialize + tools/list handshake.
    pub init_timeout: Duration,
    /// How long `close` waits for the process to exit after stdin closes.
    pub shutdown_timeout: Duration,
    pub client_info: Implementation,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            client_info: Implementation {
                name: "toolrpc-client".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

struct Channel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    // bytes of a line whose read was cut short by a timeout
    pending: Vec<u8>,
    // requests that timed out after being sent; their replies may still arrive
    abandoned: usize,
}

impl Channel {
    async fn send(&mut self, line: &[u8]) -> Result<(), ClientError> {
        self.stdin.write_all(line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, ClientError> {
        let n = self.stdout.read_until(b'\n', &mut self.pending).await?;
        if n == 0 && self.pending.is_empty() {
            return Err(ClientError::Closed);
        }
        Ok(std::mem::take(&mut self.pending))
    }

    async fn read_response(&mut self, id: &RequestId, provider: &str) -> Result<RpcResponse, ClientError> {
        loop {
            let line = self.read_line().await?;
            let Some(trimmed) = wire::trim_line(&line) else { continue };
            let response: RpcResponse = serde_json::from_slice(trimmed)
                .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
            match &response.id {
                Some(got) if got == id => {
                    // replies arrive in request order, so nothing older is still in flight
                    self.abandoned = 0;
                    return Ok(response);
                }
                // the peer could not read an id back; it is ours unless an older reply is owed
                None if self.abandoned == 0 => return Ok(response),
                None => {
                    self.abandoned -= 1;
                    warn!(provider, expected = %id, "skipping stale response without id");
                }
                Some(got) => {
                    self.abandoned = self.abandoned.saturating_sub(1);
                    warn!(provider, expected = %id, got = %got, "skipping stale response");
                }
            }
        }
    }
}

/// Client side of one tool-provider subprocess. Exchanges on the channel are
/// serialized: concurrent callers queue on the channel lock.
pub struct RpcClient {
    name: String,
    options: ClientOptions,
    channel: Mutex<Option<Channel>>,
    tools: RwLock<Vec<ToolDefinition>>,
    initialized: AtomicBool,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(name: &str, options: ClientOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            channel: Mutex::new(None),
            tools: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns `command args...` and runs the handshake. Returns whether the
    /// provider is ready; on failure the client stays closed with no tools.
    pub async fn start(&self, command: &str, args: &[String]) -> bool {
        let mut cmd = Command::new(command);
        cmd.args(args);
        self.start_command(cmd).await
    }

    pub async fn start_provider(&self, provider: &ProviderConfig) -> bool {
        let mut cmd = Command::new(&provider.command);
        cmd.args(&provider.args);
        for (key, value) in &provider.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &provider.cwd {
            cmd.current_dir(dir);
        }
        self.start_command(cmd).await
    }

    pub async fn start_command(&self, cmd: Command) -> bool {
        self.close().await;
        match self.spawn_and_handshake(cmd).await {
            Ok(count) => {
                info!(provider = %self.name, tools = count, "provider ready");
                true
            }
            Err(e) => {
                error!(provider = %self.name, error = %e, "provider failed to start");
                self.close().await;
                false
            }
        }
    }

    async fn spawn_and_handshake(&self, mut cmd: Command) -> Result<usize, ClientError> {
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ClientError::Spawn(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| ClientError::Spawn("stdin not captured".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ClientError::Spawn("stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(self.name.clone(), stderr));
        }
        info!(provider = %self.name, pid = ?child.id(), "provider spawned");

        *self.channel.lock().await = Some(Channel {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            pending: Vec::new(),
            abandoned: 0,
        });

        let tools = match timeout(self.options.init_timeout, self.handshake()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => return Err(ClientError::Handshake(e.to_string())),
            Err(_) => return Err(ClientError::Timeout(self.options.init_timeout)),
        };

        let count = tools.len();
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(count)
    }

    async fn handshake(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({"roots": {"listChanged": true}}),
            client_info: self.options.client_info.clone(),
        };
        let params = serde_json::to_value(&params).map_err(std::io::Error::from)?;
        let init = self.request("initialize", Some(params)).await?;
        let server = init.get("serverInfo").cloned().unwrap_or_default();
        debug!(provider = %self.name, server = %server, "initialized");
        self.fetch_tools().await
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        let result = self.request("tools/list", None).await?;
        let list: ToolsListResult =
            serde_json::from_value(result).map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        Ok(list.tools)
    }

    /// One request/response exchange. Returns the `result` member, or the
    /// peer's JSON-RPC error as `ClientError::Server`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(ClientError::NotStarted)?;

        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = RpcRequest::new(id.clone(), method, params);
        let line = wire::encode_line(&request, true).map_err(std::io::Error::from)?;

        // the write shares the deadline: a provider that stops reading fills the pipe
        let mut sent = false;
        let exchange = async {
            match channel.send(&line).await {
                Ok(()) => {
                    sent = true;
                    channel.read_response(&id, &self.name).await
                }
                Err(e) => Err(e),
            }
        };
        let outcome = timeout(self.options.call_timeout, exchange).await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) if sent => {
                channel.abandoned += 1;
                Err(ClientError::Timeout(self.options.call_timeout))
            }
            Err(_) => Err(ClientError::WriteTimeout(self.options.call_timeout)),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                if e.is_terminal() {
                    warn!(provider = %self.name, error = %e, "provider channel lost");
                    self.initialized.store(false, Ordering::SeqCst);
                    if let Some(mut lost) = guard.take() {
                        if let Err(kill) = lost.child.start_kill() {
                            debug!(provider = %self.name, error = %kill, "provider already gone");
                        }
                    }
                }
                return Err(e);
            }
        };
        drop(guard);
        if let Some(err) = response.error {
            return Err(ClientError::Server { code: err.code, message: err.message });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn try_call(&self, name: &str, arguments: Arguments) -> Result<ToolResult, ClientError> {
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        match serde_json::from_value::<ToolResult>(result.clone()) {
            Ok(tool_result) => Ok(tool_result),
            Err(e) => {
                debug!(provider = %self.name, tool = name, error = %e, "non-standard tool result");
                Ok(ToolResult::text(result.to_string()))
            }
        }
    }

    /// Like `try_call`, with every failure folded into an error-shaped result.
    pub async fn call(&self, name: &str, arguments: Arguments) -> ToolResult {
        match self.try_call(name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                error!(provider = %self.name, tool = name, error = %e, "tool call failed");
                ToolResult::error(format!("tool call failed: {e}"))
            }
        }
    }

    pub async fn refresh_tools(&self) -> Result<usize, ClientError> {
        let tools = self.fetch_tools().await?;
        let count = tools.len();
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
        Ok(count)
    }

    pub fn list_cached_tools(&self) -> Vec<ToolDefinition> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_tool_available(&self, name: &str) -> bool {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).iter().any(|t| t.name == name)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub async fn is_alive(&self) -> bool {
        let mut guard = self.channel.lock().await;
        match guard.as_mut() {
            Some(channel) => matches!(channel.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Stops the subprocess and waits for it. Safe to call repeatedly or
    /// before `start`.
    pub async fn close(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.tools.write().unwrap_or_else(PoisonError::into_inner).clear();
        let Some(Channel { mut child, stdin, .. }) = self.channel.lock().await.take() else {
            return;
        };
        // EOF on stdin asks a well-behaved provider to exit on its own
        drop(stdin);
        match timeout(self.options.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => info!(provider = %self.name, status = %status, "provider exited"),
            _ => match child.kill().await {
                Ok(()) => info!(provider = %self.name, "provider killed"),
                Err(e) => warn!(provider = %self.name, error = %e, "failed to kill provider"),
            },
        }
    }
}

async fn forward_stderr(provider: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(provider = %provider, stderr = %line, "provider stderr");
    }
}

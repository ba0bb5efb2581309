pub mod config;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod security;
pub mod server;
pub mod tools;


pub use mcp::client::{ClientOptions, RpcClient};
pub use mcp::dispatcher::Dispatcher;
pub use mcp::hub::ToolHub;
pub use mcp::registry::{Arguments, DynTool, FnTool, Tool, ToolRegistry, ToolSource};
pub use mcp::types::{ContentBlock, RpcRequest, RpcResponse, ToolDefinition, ToolResult};

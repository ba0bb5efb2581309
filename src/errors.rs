use crate::mcp::types::{
    RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use axum::{http::StatusCode, Json};
use serde::Serialize;
use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Request-level failures. Protocol variants become JSON-RPC error objects,
/// transport variants become HTTP error bodies.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("origin denied")]
    OriginDenied,
    #[error("request too large")]
    RequestTooLarge,
    #[error("rate limited")]
    RateLimited,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::OriginDenied => "OriginDenied",
            AppError::RequestTooLarge => "RequestTooLarge",
            AppError::RateLimited => "RateLimited",
            AppError::Parse(_) => "ParseError",
            AppError::InvalidRequest(_) => "InvalidRequest",
            AppError::MethodNotFound(_) => "MethodNotFound",
            AppError::InvalidParams(_) => "InvalidParams",
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn rpc_code(&self) -> i32 {
        match self {
            AppError::Parse(_) => PARSE_ERROR,
            AppError::InvalidRequest(_) => INVALID_REQUEST,
            AppError::MethodNotFound(_) => METHOD_NOT_FOUND,
            AppError::InvalidParams(_) => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::OriginDenied => StatusCode::FORBIDDEN,
            AppError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Parse(_)
            | AppError::InvalidRequest(_)
            | AppError::MethodNotFound(_)
            | AppError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        RpcError::new(err.rpc_code(), err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn into_response(err: AppError) -> (StatusCode, Json<ErrorBody>) {
    let body = ErrorBody { code: err.code(), message: err.to_string() };
    (err.status(), Json(body))
}

/// Failure raised by a tool's `execute`. The registry folds it into an
/// error-shaped `ToolResult`; it never reaches the wire as a JSON-RPC error.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing argument `{0}`")]
    MissingArgument(String),
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client not started")]
    NotStarted,
    #[error("failed to spawn provider: {0}")]
    Spawn(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The subprocess closed its stdout; the channel is gone for good.
    #[error("provider closed the channel")]
    Closed,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The request line could not be written in time; a partial line may sit
    /// in the pipe, so the channel cannot be reused.
    #[error("provider did not accept the request within {0:?}")]
    WriteTimeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("server error [{code}]: {message}")]
    Server { code: i32, message: String },
}

impl ClientError {
    /// True when the channel cannot carry further exchanges.
    pub fn is_terminal(&self) -> bool {
        match self {
            ClientError::Closed | ClientError::NotStarted | ClientError::WriteTimeout(_) => true,
            ClientError::Io(e) => e.kind() == std::io::ErrorKind::BrokenPipe,
            _ => false,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

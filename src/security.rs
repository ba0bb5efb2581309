use crate::errors::AppError;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use http::HeaderMap;
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

pub fn require_bearer(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let token = extract_bearer(headers).ok_or(AppError::Unauthorized)?;
    if token != expected {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// An empty allow-list admits every origin, including requests without one.
pub fn check_origin(headers: &HeaderMap, allowed: &[String]) -> Result<(), AppError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let origin = headers
        .get(http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::OriginDenied)?;
    if allowed.iter().any(|o| o == origin) {
        Ok(())
    } else {
        Err(AppError::OriginDenied)
    }
}

pub fn content_length_ok(headers: &HeaderMap, max_kb: usize) -> Result<(), AppError> {
    if let Some(len) = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if len > max_kb * 1024 {
            return Err(AppError::RequestTooLarge);
        }
    }
    Ok(())
}

/// Global and per-token request budgets for the HTTP transport.
#[derive(Clone)]
pub struct RateLimiters {
    global: Arc<DefaultDirectRateLimiter>,
    per_token: Arc<DefaultKeyedRateLimiter<String>>,
}

impl RateLimiters {
    pub fn new(global_per_sec: u32, per_token_per_sec: u32) -> Self {
        let global = NonZeroU32::new(global_per_sec).unwrap_or(nonzero!(1u32));
        let per_token = NonZeroU32::new(per_token_per_sec).unwrap_or(nonzero!(1u32));
        Self {
            global: Arc::new(RateLimiter::direct(Quota::per_second(global))),
            per_token: Arc::new(RateLimiter::keyed(Quota::per_second(per_token))),
        }
    }

    pub fn check(&self, token: Option<&str>) -> Result<(), AppError> {
        self.global.check().map_err(|_| AppError::RateLimited)?;
        if let Some(token) = token {
            self.per_token.check_key(&token.to_string()).map_err(|_| AppError::RateLimited)?;
        }
        Ok(())
    }
}

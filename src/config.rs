use crate::mcp::client::ClientOptions;
use crate::mcp::types::Implementation;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub http: Http,
    pub auth: Option<Auth>,
    pub client: Client,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

impl std::str::FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "stdio" => Ok(Transport::Stdio),
            "http" => Ok(Transport::Http),
            other => anyhow::bail!("unknown transport: {other}"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    pub name: String,
    pub transport: Transport,
    pub ascii_only: bool,
}

impl Default for Server {
    fn default() -> Self {
        Self { name: "toolrpc".to_string(), transport: Transport::Stdio, ascii_only: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Http {
    pub bind_addr: String,
    pub port: u16,
    pub base_path: String,
    pub max_request_kb: usize,
    pub requests_per_second: u32,
    pub per_token_per_second: u32,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8765,
            base_path: "/mcp".to_string(),
            max_request_kb: 256,
            requests_per_second: 50,
            per_token_per_second: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Auth {
    pub bearer_token: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Client {
    pub call_timeout_ms: u64,
    pub init_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for Client {
    fn default() -> Self {
        Self { call_timeout_ms: 30_000, init_timeout_ms: 30_000, shutdown_timeout_ms: 5_000 }
    }
}

impl Client {
    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            ..ClientOptions::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.name.trim().is_empty() { anyhow::bail!("server.name must not be empty"); }
        if !self.http.base_path.starts_with('/') { anyhow::bail!("http.base_path must start with '/'"); }
        if self.http.max_request_kb == 0 { anyhow::bail!("max_request_kb must be > 0"); }
        if self.http.requests_per_second == 0 { anyhow::bail!("requests_per_second must be > 0"); }
        if self.http.per_token_per_second == 0 { anyhow::bail!("per_token_per_second must be > 0"); }
        if let Some(auth) = &self.auth {
            if auth.bearer_token.trim().is_empty() { anyhow::bail!("bearer_token must not be empty"); }
        }
        if self.client.call_timeout_ms == 0 { anyhow::bail!("call_timeout_ms must be > 0"); }
        if self.client.init_timeout_ms == 0 { anyhow::bail!("init_timeout_ms must be > 0"); }
        if self.client.shutdown_timeout_ms == 0 { anyhow::bail!("shutdown_timeout_ms must be > 0"); }

        let mut names = HashSet::new();
        for p in &self.providers {
            if p.name.trim().is_empty() { anyhow::bail!("provider name must not be empty"); }
            if !names.insert(p.name.as_str()) { anyhow::bail!("duplicate provider name: {}", p.name); }
            resolve_command(&p.command)
                .map_err(|e| anyhow::anyhow!("provider {}: command {} not found: {e}", p.name, p.command))?;
            if let Some(dir) = &p.cwd {
                if !dir.is_dir() {
                    anyhow::bail!("provider {}: cwd does not exist or is not a directory: {}", p.name, dir.display());
                }
            }
        }
        Ok(())
    }

    /// Makes provider paths absolute so they survive later cwd changes.
    pub fn canonicalize_providers(&mut self) -> anyhow::Result<()> {
        for p in &mut self.providers {
            p.command = resolve_command(&p.command)?.to_string_lossy().into_owned();
            if let Some(dir) = &p.cwd {
                p.cwd = Some(dunce::canonicalize(dir)?);
            }
        }
        Ok(())
    }

    pub fn server_info(&self) -> Implementation {
        Implementation { name: self.server.name.clone(), version: env!("CARGO_PKG_VERSION").to_string() }
    }
}

pub fn resolve_command(cmd: &str) -> anyhow::Result<PathBuf> {
    let path = if cmd.contains('/') { PathBuf::from(cmd) } else { which::which(cmd)? };
    Ok(dunce::canonicalize(path)?)
}

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use toolrpc::config::{Config, Transport};
use toolrpc::{logging, server, Dispatcher, RpcClient, ToolHub, ToolRegistry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut transport: Option<Transport> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "--transport" => {
                i += 1;
                if i >= args.len() { eprintln!("--transport requires stdio or http"); std::process::exit(2); }
                transport = Some(args[i].parse()?);
            }
            _ => {}
        }
        i += 1;
    }

    let default_path = PathBuf::from("toolrpc.toml");
    let mut cfg = match config_path {
        Some(path) => Config::load(&path).with_context(|| format!("loading config {}", path.display()))?,
        None if default_path.exists() => Config::load(&default_path).context("loading config toolrpc.toml")?,
        None => Config::default(),
    };
    if let Some(t) = transport {
        cfg.server.transport = t;
    }
    cfg.validate().context("validating config")?;
    cfg.canonicalize_providers().context("resolving provider paths")?;

    let registry = Arc::new(ToolRegistry::with_builtin_tools());
    let mut providers = Vec::new();
    for p in &cfg.providers {
        let client = Arc::new(RpcClient::new(&p.name, cfg.client.options()));
        if client.start_provider(p).await {
            providers.push(client);
        } else {
            warn!(provider = %p.name, "provider unavailable, continuing without it");
        }
    }
    let hub = Arc::new(ToolHub::new(registry, providers));
    let dispatcher = Arc::new(Dispatcher::new(hub.clone(), cfg.server_info()));

    info!(transport = ?cfg.server.transport, tools = ?hub.tool_names(), "toolrpc ready");

    let served = match cfg.server.transport {
        Transport::Stdio => server::serve_stdio(dispatcher, cfg.server.ascii_only).await,
        Transport::Http => server::serve_http(cfg, dispatcher).await,
    };
    hub.shutdown().await;
    served
}

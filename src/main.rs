//! ws-hub: standalone WebSocket server.
//!
//! Loads configuration, installs logging and (optionally) metrics, binds the
//! listener and runs the server until SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use ws_hub::config::{load_config, validate_config, HandlerKind, ServerConfig};
use ws_hub::lifecycle::{spawn_signal_handler, Shutdown};
use ws_hub::net::listener::Listener;
use ws_hub::observability::{init_logging, init_metrics};
use ws_hub::ws::{BroadcastHandler, EchoHandler, MessageHandler, WebSocketServer};

#[derive(Debug, Parser)]
#[command(name = "ws-hub")]
#[command(about = "RFC 6455 WebSocket server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Override websocket.path
    #[arg(short, long)]
    path: Option<String>,

    /// Override observability.log_level
    #[arg(long)]
    log_level: Option<String>,

    /// Reload the handshake policy when the config file changes
    #[arg(short, long, requires = "config")]
    watch: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(path) = &self.path {
            config.websocket.path = path.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    args.apply_overrides(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    init_logging(&config.observability.log_level);
    tracing::info!("ws-hub v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        path = %config.websocket.path,
        handler = ?config.websocket.handler,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let handler: Arc<dyn MessageHandler> = match config.websocket.handler {
        HandlerKind::Echo => Arc::new(EchoHandler),
        HandlerKind::Broadcast => Arc::new(BroadcastHandler),
    };

    let listener = Listener::bind(&config.listener).await?;
    let mut server = WebSocketServer::new(config, handler);

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ws_hub::config::ConfigWatcher::new(path);
            server = server.with_config_updates(updates);
            Some(watcher.run()?)
        }
        _ => None,
    };

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());
    server.run(listener, shutdown.subscribe()).await?;
    signals.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

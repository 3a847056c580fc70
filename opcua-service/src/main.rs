//! OPC-UA plugin server
//!
//! Builds the information model from the compiled-in plugins, then serves it:
//! - Environment and plugin configuration loading
//! - Plugin construction with rollback of failed plugins
//! - Request dispatch on the server thread until Ctrl-C

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use ua_core::{LogLevel, ServerParams};
use ua_model::{MemoryAddressSpace, Server};
use ua_plugins::{default_host, DefaultVapixConnector, LocalEventBus, PluginHostConfig, Services};

#[derive(Parser, Debug)]
#[command(name = "opcua-server")]
#[command(about = "OPC-UA server populated by information-model plugins")]
struct Args {
    /// Server port (1024-65535), overrides OPCUA_PORT
    #[arg(short, long)]
    port: Option<String>,

    /// Log level 0 (debug) to 4 (fatal), overrides OPCUA_LOG_LEVEL
    #[arg(short, long)]
    log_level: Option<String>,

    /// JSON plugin host configuration
    #[arg(long)]
    plugin_config: Option<PathBuf>,

    /// List the compiled-in plugins and exit
    #[arg(long)]
    list_plugins: bool,
}

fn server_params(args: &Args) -> Result<ServerParams> {
    let mut params = ServerParams::from_env();
    if let Some(level) = &args.log_level {
        params.apply("LogLevel", level)?;
    }
    if let Some(port) = &args.port {
        params.apply("Port", port)?;
    }
    Ok(params)
}

fn init_tracing(level: LogLevel) -> Result<()> {
    let directive = format!("opcua_service={0},ua_model={0},ua_plugins={0}", level.as_directive());
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for part in directive.split(',') {
        filter = filter.add_directive(part.parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn plugin_config(args: &Args) -> Result<PluginHostConfig> {
    match &args.plugin_config {
        Some(path) => PluginHostConfig::from_file(path)
            .with_context(|| format!("Failed to load plugin configuration from {}", path.display())),
        None => Ok(PluginHostConfig::from_env()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/opcua-server/environment (if exists)
    let env_file = ua_core::config::load_environment();

    let args = Args::parse();
    let params = server_params(&args)?;
    init_tracing(params.log_level)?;
    if let Some(path) = env_file {
        info!("Environment loaded from {}", path);
    }

    if args.list_plugins {
        for descriptor in ua_plugins::builtin_descriptors() {
            println!("{}", descriptor.name);
        }
        return Ok(());
    }

    let config = plugin_config(&args)?;

    // --- 1. Build the information model ---

    let engine = Arc::new(MemoryAddressSpace::new());
    let services = Services {
        vapix: Arc::new(DefaultVapixConnector::new()),
        events: Arc::new(LocalEventBus::new()),
    };
    let host = default_host(engine.clone(), services)?;

    let active = match host.load_all(&config).await {
        Ok(active) => active,
        Err(e) => {
            error!("Plugin loading aborted: {}", e);
            if let Err(destroy_error) = host.destroy_all().await {
                warn!("Cleanup after aborted loading failed: {}", destroy_error);
            }
            bail!("unrecoverable plugin failure: {}", e);
        }
    };
    if active == 0 {
        warn!("No plugin became active; serving the base address space only");
    }
    info!("Information model ready: {} node(s), {} plugin(s) active", engine.node_count(), active);

    // --- 2. Serve ---

    let server = Server::start(engine.clone()).context("Failed to start the dispatcher")?;
    info!("OPC-UA server on port {}", params.port);

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutting down...");

    // --- 3. Orderly shutdown ---

    host.destroy_all().await?;
    server.shutdown().await?;
    info!("Server stopped");
    Ok(())
}

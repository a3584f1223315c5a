use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing::info;
use txtredirect::config::{RuntimeConfig, default_config_path};
use txtredirect::server;
use txtredirect::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "txtredirect", version, about = "DNS TXT driven redirect server", long_about = None)]
struct Args {
    /// Override path to the runtime config (txtredirect.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Send TXT queries straight to this DNS server (ip or ip:port)
    #[arg(long, value_name = "ADDR")]
    resolver: Option<String>,

    /// Enable the Prometheus exporter regardless of config
    #[arg(long, action = ArgAction::SetTrue)]
    metrics: bool,

    /// Emit logs as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json_logs: bool,

    /// Increase logging verbosity
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut runtime = RuntimeConfig::load_or_default(&config_path)?;

    if let Some(listen) = args.listen {
        runtime.server.listen = listen;
    }
    if let Some(resolver) = args.resolver {
        runtime.redirect.resolver = Some(resolver);
    }
    if args.metrics {
        runtime.metrics.enable = true;
    }

    info!(config = %config_path.display(), "Loaded txtredirect configuration");
    server::run(runtime).await
}

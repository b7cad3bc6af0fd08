//! Artifact Gate - mutual-TLS artifact delivery gateway

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use artifact_gate::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    match cli.command {
        Some(Command::Check) => run_check(config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Validate everything the server would load, without binding
fn run_check(config: Config) -> ExitCode {
    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let summary = gateway.summary();
    println!("✅ Configuration OK\n");
    println!("   Listen:        {}", summary.addr);
    println!("   Route:         {}", summary.url);
    println!("   Trust anchors: {}", summary.trust_anchors);
    match summary.crl_entries {
        Some(n) => println!("   CRL:           {n} revoked serial(s)"),
        None => println!("   CRL:           not configured"),
    }
    println!(
        "   OCSP:          {}",
        summary.ocsp_url.as_deref().unwrap_or("disabled")
    );
    println!("   Backend:       {}", summary.backend);
    println!(
        "   Audit:         {}",
        if summary.audit { "enabled" } else { "disabled" }
    );
    ExitCode::SUCCESS
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        object_store = config.api.use_object_store,
        "Starting Artifact Gate"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}

//! Barrel - Log-Structured Key-Value Store
//!
//! Serves the storage engine over HTTP, or runs the least-bytes
//! load balancer in front of a pool of Barrel nodes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use barrel::api::HttpServer;
use barrel::config::BarrelConfig;
use barrel::error::Result;
use barrel::lb::Balancer;
use barrel::store::Store;

/// Barrel - Log-Structured Key-Value Store
#[derive(Parser)]
#[command(name = "barrel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "barrel.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a store node with its HTTP API
    Serve,

    /// Start the load balancer frontend
    Balance,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "barrel.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Serve => run_serve(cli.config).await,
        Commands::Balance => run_balance(cli.config).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start a store node
async fn run_serve(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting Barrel node...");

    let config = match BarrelConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };

    let store = match Store::open(&config.store.data_dir, config.store.segment_limit) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(
                "Failed to open store at {:?}: {}",
                config.store.data_dir,
                e
            );
            return Err(e);
        }
    };

    let http_server = HttpServer::new(config.api.clone(), Arc::clone(&store));
    http_server.start().await
}

/// Start the load balancer
async fn run_balance(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting Barrel load balancer...");

    let config = BarrelConfig::from_file(&config_path)?;
    config.validate_balancer()?;

    let balancer = Balancer::new(config.balancer.clone());
    balancer.start().await
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    let config_content = r#"# Barrel Configuration
# Generated configuration file

[store]
data_dir = "/var/lib/barrel"
# Active log size in bytes past which it is sealed into a segment
segment_limit = 10485760

[api]
enabled = true
bind_address = "0.0.0.0:9000"
cors_enabled = false

[balancer]
bind_address = "0.0.0.0:8090"
backends = []
# backends = ["node-1.example.com:9000", "node-2.example.com:9000"]
health_interval_secs = 10
request_timeout_secs = 3
trace_enabled = false
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure the data directory and backends.");
    println!("Then start with: barrel serve --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match BarrelConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Data Directory: {}", config.store.data_dir.display());
            println!("  Segment Limit:  {} bytes", config.store.segment_limit);
            println!("  API Address:    {}", config.api.bind_address);
            println!("  LB Address:     {}", config.balancer.bind_address);
            println!("  Backends:       {}", config.balancer.backends.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

//! BarrelCtl - Command line tool for talking to a Barrel node
//!
//! Usage:
//!   barrelctl get KEY          - Read a value
//!   barrelctl put KEY VALUE    - Write a value
//!   barrelctl status           - Show engine statistics
//!   barrelctl health           - Probe node health
//!   barrelctl check-config     - Check a configuration file

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Barrel Node Control Tool
#[derive(Parser)]
#[command(name = "barrelctl")]
#[command(about = "Control and inspect a Barrel node", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "barrel.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the value stored under a key
    Get {
        /// Key to look up
        key: String,
    },
    /// Store a value under a key
    Put {
        /// Key to write
        key: String,
        /// Value to store
        value: String,
    },
    /// Show engine statistics of the node
    Status,
    /// Probe node health
    Health,
    /// Check configuration file for errors
    CheckConfig {
        /// Path to config file to check (defaults to --config path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

// ============ API Types ============

#[derive(Debug, Serialize)]
struct PutRequest {
    value: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    data_dir: String,
    #[serde(default)]
    active_size: u64,
    #[serde(default)]
    active_keys: usize,
    #[serde(default)]
    sealed_segments: usize,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    healthy: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

// ============ Config ============

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    api: ApiConfig,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfig {
    #[serde(default = "default_api_bind")]
    bind_address: String,
}

fn default_api_bind() -> String {
    "0.0.0.0:9000".to_string()
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let endpoint = match &cli.endpoint {
        Some(e) => e.clone(),
        None => endpoint_from_config(&cli.config),
    };

    let result = match &cli.command {
        Commands::Get { key } => get(&endpoint, key).await,
        Commands::Put { key, value } => put(&endpoint, key, value).await,
        Commands::Status => status(&endpoint).await,
        Commands::Health => health(&endpoint).await,
        Commands::CheckConfig { file } => {
            let config_path = file.clone().unwrap_or_else(|| cli.config.clone());
            check_config(&config_path)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Resolve the API endpoint from a config file, falling back to
/// localhost on any problem.
fn endpoint_from_config(config_path: &PathBuf) -> String {
    let fallback = "http://127.0.0.1:9000".to_string();
    if !config_path.exists() {
        return fallback;
    }
    let content = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(_) => return fallback,
    };
    match toml::from_str::<Config>(&content) {
        Ok(config) => {
            let addr = config.api.bind_address;
            if addr.starts_with("0.0.0.0") {
                format!(
                    "http://127.0.0.1:{}",
                    addr.split(':').nth(1).unwrap_or("9000")
                )
            } else {
                format!("http://{}", addr)
            }
        }
        Err(_) => fallback,
    }
}

async fn get(endpoint: &str, key: &str) -> Result<(), String> {
    let url = format!("{}/db/{}", endpoint, key);
    let response = reqwest::get(&url).await.map_err(|e| e.to_string())?;

    if response.status().is_success() {
        let body: GetResponse = response.json().await.map_err(|e| e.to_string())?;
        println!("{}", body.value);
        Ok(())
    } else {
        Err(api_error(response).await)
    }
}

async fn put(endpoint: &str, key: &str, value: &str) -> Result<(), String> {
    let url = format!("{}/db/{}", endpoint, key);
    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&PutRequest {
            value: value.to_string(),
        })
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if response.status().is_success() {
        println!("OK");
        Ok(())
    } else {
        Err(api_error(response).await)
    }
}

async fn status(endpoint: &str) -> Result<(), String> {
    let url = format!("{}/status", endpoint);
    let response = reqwest::get(&url).await.map_err(|e| e.to_string())?;
    let body: StatusResponse = response.json().await.map_err(|e| e.to_string())?;

    println!("Barrel Node Status");
    println!("==================");
    println!("Data Directory:  {}", body.data_dir);
    println!("Active Log Size: {} bytes", body.active_size);
    println!("Active Keys:     {}", body.active_keys);
    println!("Sealed Segments: {}", body.sealed_segments);
    Ok(())
}

async fn health(endpoint: &str) -> Result<(), String> {
    let url = format!("{}/health", endpoint);
    let response = reqwest::get(&url).await.map_err(|e| e.to_string())?;
    let body: HealthResponse = response.json().await.map_err(|e| e.to_string())?;

    if body.healthy {
        println!("Node is healthy");
        Ok(())
    } else {
        Err("node reported unhealthy".to_string())
    }
}

fn check_config(config_path: &PathBuf) -> Result<(), String> {
    match barrel::BarrelConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Data Directory: {}", config.store.data_dir.display());
            println!("  API Address:    {}", config.api.bind_address);
            Ok(())
        }
        Err(e) => Err(format!("invalid configuration: {}", e)),
    }
}

async fn api_error(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) if !body.error.is_empty() => format!("{} ({})", body.error, body.code),
        _ => format!("request failed with status {}", status),
    }
}

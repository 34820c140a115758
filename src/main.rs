//! namenode-ha CLI - Main entry point.

use namenode_ha::cli::{Cli, Commands};
use namenode_ha::config::HaConfig;
use namenode_ha::health::HealthResponse;
use namenode_ha::probe::{Prober, TcpProber};
use namenode_ha::NodeId;
use std::path::Path;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Run { unit, state_dir } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(unit) = unit {
                config.node.unit_name = unit;
            }
            if let Some(state_dir) = state_dir {
                config.node.state_dir = state_dir;
            }
            config.observability.log_level = cli.log_level;
            config.validate()?;

            namenode_ha::observability::init(&config.observability)?;
            namenode_ha::run(config).await?;
        }

        Commands::Probe {
            host,
            port,
            timeout_ms,
        } => {
            let prober = TcpProber::new(Duration::from_millis(timeout_ms));
            if prober.probe(&NodeId::from(host.as_str()), port).await {
                println!("{}:{} reachable", host, port);
            } else {
                println!("{}:{} unreachable", host, port);
                std::process::exit(1);
            }
        }

        Commands::Status { addr, health } => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()?;

            if health {
                let response = client
                    .get(format!("http://{}/health", addr))
                    .send()
                    .await?;
                let code = response.status();
                let body: HealthResponse = response.json().await?;
                println!("{}", serde_json::to_string_pretty(&body)?);
                if !code.is_success() {
                    std::process::exit(1);
                }
            } else {
                match client.get(format!("http://{}/status", addr)).send().await {
                    Ok(response) => println!("{}", response.text().await?),
                    Err(e) => {
                        eprintln!("Failed to reach controller at {}: {}", addr, e);
                        std::process::exit(1);
                    }
                }
            }
        }

        Commands::Version => {
            println!("namenode-ha {}", namenode_ha::VERSION);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<HaConfig> {
    match path {
        Some(path) => Ok(HaConfig::from_file(path)?),
        None => Ok(HaConfig::development()),
    }
}

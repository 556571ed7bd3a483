// src/main.rs

//! The entry point of the `lockstep` binary. Every node of a group runs the same
//! command; only the head touches the resource and every node prints the result.

use anyhow::Result;
use lockstep::ClusterSession;
use lockstep::config::Config;
use lockstep::node;
use lockstep::node::metrics_server::run_metrics_server;
use std::env;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str = "Usage: lockstep [--config node.toml] <cat|ls> <identifier>";

enum Command {
    Cat(String),
    Ls(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("lockstep version {VERSION}");
        return Ok(());
    }

    // It can be provided via a --config flag; otherwise, it defaults to "lockstep.toml".
    let config_index = args.iter().position(|arg| arg == "--config");
    let config_path = config_index
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("lockstep.toml");

    let positional: Vec<&str> = args
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, _)| Some(*i) != config_index && Some(*i) != config_index.map(|c| c + 1))
        .map(|(_, arg)| arg.as_str())
        .collect();
    let command = match positional.as_slice() {
        ["cat", identifier] => Command::Cat(identifier.to_string()),
        ["ls", identifier] => Command::Ls(identifier.to_string()),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    // Get log level from env var or config.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let metrics_task = if config.metrics.enabled && config.role().is_head() {
        Some(tokio::spawn(run_metrics_server(
            config.metrics.port,
            shutdown_tx.subscribe(),
        )))
    } else {
        None
    };

    info!("Starting lockstep {VERSION} as {}.", config.role());
    let session = node::establish(&config).await?;

    let outcome = run_command(&session, command).await;
    if let Err(e) = &outcome {
        error!("Command failed: {e}");
    }

    // Nobody exits before everyone is done.
    if let Err(e) = session.barrier().await {
        error!("Final barrier failed: {e}");
    }
    for event in session.events().await {
        info!("Cluster event: {event}");
    }
    session.close().await;

    let _ = shutdown_tx.send(());
    if let Some(task) = metrics_task {
        let _ = task.await;
    }
    outcome
}

async fn run_command(session: &ClusterSession, command: Command) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    match command {
        Command::Cat(identifier) => {
            let mut file = session.open_file(&identifier).await?;
            loop {
                let chunk = file.read(session.io().chunk_size).await?;
                if chunk.is_empty() {
                    break;
                }
                stdout.write_all(&chunk).await?;
            }
            file.close().await?;
        }
        Command::Ls(identifier) => {
            let mut directory = session.open_directory(&identifier).await?;
            for entry in directory.list_entries().await? {
                let suffix = if entry.is_directory() { "/" } else { "" };
                stdout
                    .write_all(format!("{}{suffix}\n", entry.name).as_bytes())
                    .await?;
            }
            directory.close().await?;
        }
    }
    stdout.flush().await?;
    Ok(())
}

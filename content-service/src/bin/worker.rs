//! Content worker binary
//!
//! Consumes content report requests for this site's queue and writes the
//! reports and session status the web tier polls.
//!
//! # Usage
//!
//! ```bash
//! content-worker
//! content-worker --config /path/to/config.toml --site PDBE
//! ```

use content_extraction::config::SITE_ID_ENV;
use content_extraction::Config;
use content_service::WorkerServer;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Default)]
struct WorkerArgs {
    config_path: Option<PathBuf>,
    socket_path: Option<PathBuf>,
    site_id: Option<String>,
}

/// Parse command line arguments
fn parse_args() -> WorkerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = WorkerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("content-worker v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--socket" => {
                i += 1;
                if i < args.len() {
                    parsed.socket_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--site" => {
                i += 1;
                if i < args.len() {
                    parsed.site_id = Some(args[i].clone());
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("Use --help for usage information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"Content worker - produces entry and summary content reports

USAGE:
    content-worker [OPTIONS]

OPTIONS:
    -h, --help              Show this help message
    -v, --version           Show version
    -c, --config <PATH>     Path to configuration file
    --socket <PATH>         Unix socket path (default: /tmp/<queue>_<site>.sock)
    --site <SITE_ID>        Site id (default: ${} or the configured site)

Log verbosity is controlled with RUST_LOG (default: info)."#,
        SITE_ID_ENV
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    let mut config = match args.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    if let Some(site_id) = args.site_id {
        config.site.site_id = site_id;
    }
    if let Some(socket) = args.socket_path {
        config.queue.socket_path = Some(socket);
    }

    info!(
        "Starting content worker for site {} with definitions {:?}",
        config.site.site_id, config.definitions.path
    );
    let server = WorkerServer::from_config(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Worker error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    if server.socket_path().exists() {
        std::fs::remove_file(server.socket_path())?;
    }

    Ok(())
}

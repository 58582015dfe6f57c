//! Content definition administration
//!
//! ```bash
//! content-definitions list
//! content-definitions show report-entry-sasbdb
//! content-definitions import new_definitions.json [--no-backup]
//! ```

use content_extraction::{Config, ContentRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

enum Command {
    List,
    Show(String),
    Import { path: PathBuf, backup: bool },
}

fn usage() -> ExitCode {
    eprintln!(
        r#"USAGE:
    content-definitions [-c <CONFIG>] list
    content-definitions [-c <CONFIG>] show <CONTENT_TYPE>
    content-definitions [-c <CONFIG>] import <FILE> [--no-backup]"#
    );
    ExitCode::from(2)
}

fn parse_args(args: &[String]) -> Option<(Option<PathBuf>, Command)> {
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                config_path = Some(PathBuf::from(args.get(i)?));
            }
            other => rest.push(other),
        }
        i += 1;
    }

    let command = match rest.as_slice() {
        ["list"] => Command::List,
        ["show", content_type] => Command::Show(content_type.to_string()),
        ["import", path] => Command::Import {
            path: PathBuf::from(path),
            backup: true,
        },
        ["import", path, "--no-backup"] | ["import", "--no-backup", path] => Command::Import {
            path: PathBuf::from(path),
            backup: false,
        },
        _ => return None,
    };
    Some((config_path, command))
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((config_path, command)) = parse_args(&args) else {
        return usage();
    };

    let config = match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let registry = ContentRegistry::from_config(&config.definitions);

    match command {
        Command::List => {
            for content_type in registry.content_types() {
                let definition = registry.get_definition(&content_type);
                println!(
                    "{}\t{}\t{} categories",
                    content_type,
                    serde_json::to_value(definition.kind)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    definition.content.len()
                );
            }
            ExitCode::SUCCESS
        }
        Command::Show(content_type) => {
            let definition = registry.get_definition(&content_type);
            if definition.is_empty() {
                eprintln!("Unknown content type {}", content_type);
                return ExitCode::FAILURE;
            }
            match serde_json::to_string_pretty(&definition) {
                Ok(text) => {
                    println!("{}", text);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Cannot render {}: {}", content_type, e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Import { path, backup } => match registry.import_definitions(&path, backup) {
            Ok(count) => {
                println!(
                    "Imported {} content definitions into {:?}",
                    count,
                    registry.path()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Import of {:?} rejected: {}", path, e);
                ExitCode::FAILURE
            }
        },
    }
}

use anyhow::Result;
use std::path::PathBuf;

use pholio::config::Config;
use pholio::db::Database;
use pholio::server::{create_app, AppState};
use pholio::storage::FsBlobStore;
use pholio::{faces, logging};

fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("pholio {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config_path
}

fn print_help() {
    println!(
        r#"pholio - photo gallery server with face search

USAGE:
    pholio [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PHOLIO_LOG          Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/pholio/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(None);

    let config = Config::load(config_path.as_deref())?;

    let db = Database::open(&config.db_path)?;
    db.initialize()?;

    let blobs = FsBlobStore::new(config.storage.root.clone())?;

    // Models must be loaded before the listener starts; nothing can reach
    // the detection path until this returns.
    faces::detector::init(&config.faces)?;
    tracing::info!("face models loaded");

    let bind = config.server.bind.clone();
    let state = AppState::new(db, Box::new(blobs), config);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

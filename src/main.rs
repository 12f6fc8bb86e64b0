mod broker;
mod cache;
mod config;
mod error;
mod gateway;
mod http;
mod pos;
mod security;
mod store;
mod sync;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use store::models::SyncType;
use store::MemoryStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "posbridge", version, about = "POS integration gateway")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one sync pass for a credential and print the report
    Sync {
        #[arg(long)]
        credential_id: String,
        /// Comma-separated: categories,products,inventory,full_products
        #[arg(long, default_value = "categories,products,inventory")]
        types: String,
    },
}

fn parse_sync_types(raw: &str) -> Result<Vec<SyncType>> {
    raw.split(',')
        .map(|item| {
            let name = item.trim();
            serde_json::from_value(serde_json::Value::String(name.to_string()))
                .map_err(|_| anyhow::anyhow!("unknown sync type: {name}"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    let config = config::Config::from_file(&args.config)?;

    match args.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);
            info!("starting integration gateway on port {port}");
            let store = Arc::new(MemoryStore::new());
            http::api::serve(config, store, port).await?;
        }
        Commands::Sync {
            credential_id,
            types,
        } => {
            let types = parse_sync_types(&types)?;
            let store = Arc::new(MemoryStore::new());
            let state = http::api::AppState::with_defaults(Arc::new(config), store)?;
            let report = state
                .orchestrator
                .sync_data(&credential_id, &types, &sync::SyncOptions::default())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

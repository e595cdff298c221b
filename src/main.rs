//! ormtest - show and probe the configured test database

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use figment::providers::Serialized;
use ormtest::config::CONFIG_FILE;
use ormtest::TestConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Test database environment check
#[derive(Parser, Debug)]
#[command(
    name = "ormtest",
    version,
    about = "Show the resolved test database and optionally connect to it"
)]
struct Args {
    /// Configuration file (environment variables still take precedence)
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Override the backend alias
    #[arg(short, long)]
    backend: Option<String>,

    /// Override the logical database name
    #[arg(short, long)]
    database: Option<String>,

    /// Connect, run a trivial query and list tables
    #[arg(long)]
    probe: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ormtest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut figment = TestConfig::figment(&args.config);
    if let Some(backend) = &args.backend {
        figment = figment.merge(Serialized::default("backend", backend));
    }
    if let Some(database) = &args.database {
        figment = figment.merge(Serialized::default("database", database));
    }
    let config = TestConfig::extract(figment)?;
    let db = config.database()?;

    println!("backend:  {}", db.engine());
    println!("target:   {}", db.name());
    println!("url:      {}", db.display_url());
    println!("verbose:  {}", config.verbose);

    if args.probe {
        db.connect().await?;
        db.health_check().await?;
        let tables = db.get_tables().await?;
        println!("tables:   {}", tables.len());
        for table in tables {
            println!("  {}", table);
        }
        db.close().await;
    }

    Ok(())
}

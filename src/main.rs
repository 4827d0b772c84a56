//! shelflife entry point.

use clap::Parser;
use shelflife::{
    config::{Cli, Command, Config},
    db::Database,
    enrich::{self, BatchEnrichRequest},
    id, import,
    mcp::{self, ApiClient},
    openlibrary::OpenLibraryClient,
    server,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The MCP transport owns stdout.
    init_logging(matches!(cli.command, Some(Command::Mcp)));

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);
    let mut config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_overrides(&cli);

    match cli.command {
        Some(Command::Init { force }) => cmd_init(&config, force),
        Some(Command::Hash { parts }) => {
            println!("{}", id::make_id(&parts));
            Ok(())
        }
        Some(Command::Import { file, enrich }) => cmd_import(&config, &file, enrich).await,
        Some(Command::Enrich { all, overwrite }) => cmd_enrich(&config, all, overwrite).await,
        Some(Command::Mcp) => cmd_mcp(config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => cmd_serve(config, None).await,
    }
}

fn init_logging(to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shelflife=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if to_stderr {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(Database::open(&config.database.path)?)
}

/// Write a default config file and create the database.
fn cmd_init(config: &Config, force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    open_database(config)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nThen run: shelflife import ~/goodreads_library_export.csv");
    Ok(())
}

/// Import a Goodreads export from the command line.
async fn cmd_import(config: &Config, file: &Path, enrich: bool) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let result = import::import_file(&db, file)?;
    println!(
        "Imported {}: {} books created, {} updated, {} shelves, {} reviews, {} readings",
        file.display(),
        result.books_created,
        result.books_updated,
        result.shelves_created,
        result.reviews_created,
        result.readings_created
    );

    if enrich {
        let client = OpenLibraryClient::new(&config.openlibrary)?;
        let batch = enrich::enrich_batch(&db, &client, &BatchEnrichRequest::default()).await?;
        println!(
            "Enriched {} of {} books ({} failed)",
            batch.enriched, batch.total, batch.failed
        );
    }
    Ok(())
}

/// Enrich the library from Open Library.
async fn cmd_enrich(config: &Config, all: bool, overwrite: bool) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let client = OpenLibraryClient::new(&config.openlibrary)?;
    let request = BatchEnrichRequest {
        book_ids: None,
        only_unenriched: !all,
        overwrite,
    };

    let batch = enrich::enrich_batch(&db, &client, &request).await?;
    for result in batch.results.iter().filter(|r| r.enriched) {
        println!(
            "{}: {} fields, {} tags",
            result.book_id,
            result.fields_updated.len(),
            result.tags_added.len()
        );
    }
    println!(
        "Enriched {} of {} books ({} failed)",
        batch.enriched, batch.total, batch.failed
    );
    Ok(())
}

/// Serve the tool protocol on stdio.
async fn cmd_mcp(config: Config) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let state = server::AppState::new(config, db)?;
    mcp::serve_stdio(ApiClient::new(server::create_router(state))).await?;
    Ok(())
}

/// Start the HTTP API.
async fn cmd_serve(mut config: Config, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    let db = open_database(&config)?;
    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        "Starting shelflife server"
    );

    let bind = config.server.bind;
    let state = server::AppState::new(config, db)?;
    let app = server::create_router(state);

    let listener = TcpListener::bind(bind).await?;
    tracing::info!(address = %bind, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Personal reading library manager.
#[derive(Parser, Debug, Clone)]
#[command(name = "shelflife")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "SHELFLIFE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database (overrides the config file).
    #[arg(long, env = "SHELFLIFE_DB_PATH", global = true)]
    pub database: Option<PathBuf>,

    /// Open Library API base URL.
    #[arg(long, env = "SHELFLIFE_OPENLIBRARY_URL", global = true)]
    pub openlibrary_url: Option<String>,

    /// Open Library covers base URL.
    #[arg(long, env = "SHELFLIFE_COVERS_URL", global = true)]
    pub covers_url: Option<String>,

    /// Open Library request timeout in seconds.
    #[arg(long, env = "SHELFLIFE_OPENLIBRARY_TIMEOUT", global = true)]
    pub openlibrary_timeout: Option<u64>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP API (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long, env = "SHELFLIFE_BIND")]
        bind: Option<SocketAddr>,
    },

    /// Run the MCP tool server on stdio.
    Mcp,

    /// Import a Goodreads library export.
    Import {
        /// Path to the exported CSV file.
        file: PathBuf,
        /// Enrich imported books from Open Library afterwards.
        #[arg(long)]
        enrich: bool,
    },

    /// Enrich books from Open Library.
    Enrich {
        /// Enrich every book, not only those without an Open Library key.
        #[arg(long)]
        all: bool,
        /// Overwrite fields that already have a value.
        #[arg(long)]
        overwrite: bool,
    },

    /// Print the identifier derived from the given parts.
    Hash {
        /// Parts to hash, e.g. a title and an author.
        #[arg(required = true)]
        parts: Vec<String>,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Open Library configuration.
    #[serde(default)]
    pub openlibrary: OpenLibraryConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
        8000,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("shelflife.db")
}

/// Open Library configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLibraryConfig {
    /// API base URL.
    #[serde(default = "default_openlibrary_url")]
    pub base_url: String,

    /// Covers base URL.
    #[serde(default = "default_covers_url")]
    pub covers_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for OpenLibraryConfig {
    fn default() -> Self {
        Self {
            base_url: default_openlibrary_url(),
            covers_url: default_covers_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_openlibrary_url() -> String {
    "https://openlibrary.org".to_string()
}

fn default_covers_url() -> String {
    "https://covers.openlibrary.org".to_string()
}

fn default_timeout() -> u64 {
    15
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("shelflife.toml"),
            dirs::config_dir()
                .map(|p| p.join("shelflife").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/shelflife/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Apply command-line and environment overrides.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(path) = &cli.database {
            self.database.path = path.clone();
        }
        if let Some(url) = &cli.openlibrary_url {
            self.openlibrary.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = &cli.covers_url {
            self.openlibrary.covers_url = url.trim_end_matches('/').to_string();
        }
        if let Some(timeout) = cli.openlibrary_timeout {
            self.openlibrary.timeout_seconds = timeout;
        }
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# shelflife configuration

[server]
bind = "127.0.0.1:8000"

[database]
path = "shelflife.db"

[openlibrary]
base_url = "https://openlibrary.org"
covers_url = "https://covers.openlibrary.org"
# Request timeout in seconds
timeout_seconds = 15
"#
        .to_string()
    }
}

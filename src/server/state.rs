//! Application state shared across handlers.

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::openlibrary::OpenLibraryClient;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Open Library client.
    pub openlibrary: Arc<OpenLibraryClient>,
}

impl AppState {
    /// Create application state, building the Open Library client from the
    /// configuration.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let openlibrary = OpenLibraryClient::new(&config.openlibrary)?;
        Ok(Self {
            config: Arc::new(config),
            db,
            openlibrary: Arc::new(openlibrary),
        })
    }
}

//! shelflife: a personal reading library.
//!
//! Books, shelves, tags, reviews and readings live in a single SQLite file.
//! Every entity id is derived from its natural key, so the same book added
//! twice, or imported again from Goodreads, lands on the same row.
//!
//! # Features
//!
//! - JSON HTTP API
//! - Goodreads library export import
//! - Open Library metadata enrichment
//! - MCP tool server over stdio

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Open Library enrichment.
pub mod enrich;
/// Error types.
pub mod error;
/// Goodreads export parsing.
pub mod goodreads;
/// Deterministic identifiers.
pub mod id;
/// Goodreads import.
pub mod import;
pub mod mcp;
/// Open Library client.
pub mod openlibrary;
/// HTTP server.
pub mod server;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::{AppState, create_router};

use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
///
/// The connection sits behind a mutex, so there is a single writer at a
/// time. Mutating operations go through [`Database::write`], which wraps the
/// whole operation in one transaction: an error anywhere rolls back every
/// statement the operation issued.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Cascading deletes depend on this; it is per connection.
        conn.pragma_update(None, "foreign_keys", true)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Books, keyed by make_id(title, author)
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                additional_authors TEXT,
                isbn TEXT UNIQUE,
                isbn13 TEXT UNIQUE,
                publisher TEXT,
                page_count INTEGER,
                year_published INTEGER,
                description TEXT,
                cover_url TEXT,
                goodreads_id TEXT UNIQUE,
                open_library_key TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Shelves, keyed by make_id(name)
            CREATE TABLE IF NOT EXISTS shelves (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                is_exclusive INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- Book placement on shelves, keyed by make_id(shelf_id, book_id)
            CREATE TABLE IF NOT EXISTS shelf_books (
                id INTEGER PRIMARY KEY,
                shelf_id INTEGER NOT NULL,
                book_id INTEGER NOT NULL,
                date_added TEXT NOT NULL,
                date_read TEXT,
                UNIQUE (shelf_id, book_id),
                FOREIGN KEY (shelf_id) REFERENCES shelves(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Tags, keyed by make_id(name)
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS book_tags (
                book_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (book_id, tag_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );

            -- One review per book, keyed by make_id(book_id)
            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY,
                book_id INTEGER NOT NULL UNIQUE,
                rating REAL,
                review_text TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Readings, keyed by make_id(book_id, started_at). The rowid is
            -- kept separate so it records insertion order.
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER NOT NULL UNIQUE,
                book_id INTEGER NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Progress entries, keyed by make_id(reading_id, date)
            CREATE TABLE IF NOT EXISTS reading_progress (
                id INTEGER PRIMARY KEY,
                reading_id INTEGER NOT NULL,
                page INTEGER NOT NULL,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (reading_id, date),
                FOREIGN KEY (reading_id) REFERENCES readings(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_title ON books(title);
            CREATE INDEX IF NOT EXISTS idx_shelf_books_book ON shelf_books(book_id);
            CREATE INDEX IF NOT EXISTS idx_book_tags_tag ON book_tags(tag_id);
            CREATE INDEX IF NOT EXISTS idx_readings_book ON readings(book_id);
            -- At most one open reading per book
            CREATE UNIQUE INDEX IF NOT EXISTS idx_readings_active
                ON readings(book_id) WHERE finished_at IS NULL;
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run a read-only operation against the connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run an operation inside a single transaction, committed on success.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

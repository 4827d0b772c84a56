use super::books::{BOOK_COLUMNS, require_book, row_to_book};
use super::{Shelf, ShelfWithBooks, now};
use crate::error::{AppError, Result};
use crate::id;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;

const SHELF_COLUMNS: &str = "s.id, s.name, s.description, s.is_exclusive, s.created_at";

/// Shelf names that are exclusive when created implicitly.
pub const EXCLUSIVE_SHELF_NAMES: [&str; 3] = ["read", "currently-reading", "to-read"];

/// Whether a shelf of this name is exclusive when created implicitly.
pub fn is_reserved_exclusive(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    EXCLUSIVE_SHELF_NAMES.contains(&lowered.as_str())
}

/// Fields accepted when creating a shelf.
#[derive(Debug, Clone, Deserialize)]
pub struct NewShelf {
    /// Unique name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether membership is exclusive.
    #[serde(default)]
    pub is_exclusive: bool,
}

/// Partial shelf update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShelfUpdate {
    /// New name. The shelf keeps its id.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New exclusivity flag.
    pub is_exclusive: Option<bool>,
}

fn row_to_shelf(row: &Row<'_>) -> rusqlite::Result<Shelf> {
    Ok(Shelf {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_exclusive: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(super) fn get_shelf(conn: &Connection, shelf_id: i64) -> Result<Option<Shelf>> {
    conn.query_row(
        &format!("SELECT {SHELF_COLUMNS} FROM shelves s WHERE s.id = ?1"),
        params![shelf_id],
        row_to_shelf,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get shelf: {}", e)))
}

fn get_shelf_by_name(conn: &Connection, name: &str) -> Result<Option<Shelf>> {
    conn.query_row(
        &format!("SELECT {SHELF_COLUMNS} FROM shelves s WHERE s.name = ?1"),
        params![name],
        row_to_shelf,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get shelf: {}", e)))
}

fn require_shelf(conn: &Connection, shelf_id: i64, what: &str) -> Result<Shelf> {
    get_shelf(conn, shelf_id)?.ok_or_else(|| AppError::NotFound(format!("{what} not found")))
}

pub(super) fn shelves_for_book(conn: &Connection, book_id: i64) -> Result<Vec<Shelf>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SHELF_COLUMNS} FROM shelves s
         JOIN shelf_books sb ON sb.shelf_id = s.id
         WHERE sb.book_id = ?1
         ORDER BY s.name"
    ))?;
    let shelves = stmt
        .query_map(params![book_id], row_to_shelf)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(shelves)
}

fn shelf_with_books(conn: &Connection, shelf: Shelf) -> Result<ShelfWithBooks> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOK_COLUMNS} FROM books b
         JOIN shelf_books sb ON sb.book_id = b.id
         WHERE sb.shelf_id = ?1
         ORDER BY sb.date_added, b.id"
    ))?;
    let books = stmt
        .query_map(params![shelf.id], row_to_book)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ShelfWithBooks { shelf, books })
}

/// Get the shelf named `name`, creating it when absent.
///
/// Returns the shelf and whether it was created. The insert is keyed by the
/// name-derived id, so two callers naming the same shelf converge on one row.
/// A renamed shelf keeps its old id, hence the fallback lookup by name.
pub(crate) fn get_or_create_shelf(
    conn: &Connection,
    name: &str,
    is_exclusive: bool,
) -> Result<(Shelf, bool)> {
    let shelf_id = id::name_id(name);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO shelves (id, name, description, is_exclusive, created_at)
         VALUES (?1, ?2, NULL, ?3, ?4)",
        params![shelf_id, name, is_exclusive, now()],
    )?;

    let shelf = match get_shelf(conn, shelf_id)? {
        Some(shelf) => shelf,
        None => get_shelf_by_name(conn, name)?.ok_or_else(|| {
            AppError::Internal(format!("Shelf '{}' vanished after insert", name))
        })?,
    };

    if inserted > 0 {
        tracing::debug!(shelf_id, name, is_exclusive, "Shelf created");
    }
    Ok((shelf, inserted > 0))
}

fn is_on_shelf(conn: &Connection, shelf_id: i64, book_id: i64) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM shelf_books WHERE shelf_id = ?1 AND book_id = ?2",
            params![shelf_id, book_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Put a book on a shelf.
///
/// Returns `false` when the book is already there. On an exclusive shelf the
/// book is first removed from every other exclusive shelf.
pub(crate) fn link_shelf_book(
    conn: &Connection,
    shelf: &Shelf,
    book_id: i64,
    date_added: DateTime<Utc>,
    date_read: Option<NaiveDate>,
) -> Result<bool> {
    if is_on_shelf(conn, shelf.id, book_id)? {
        return Ok(false);
    }

    if shelf.is_exclusive {
        let removed = conn.execute(
            "DELETE FROM shelf_books
             WHERE book_id = ?1
               AND shelf_id IN (SELECT id FROM shelves WHERE is_exclusive = 1)",
            params![book_id],
        )?;
        if removed > 0 {
            tracing::debug!(book_id, shelf = %shelf.name, removed, "Left other exclusive shelves");
        }
    }

    conn.execute(
        "INSERT INTO shelf_books (id, shelf_id, book_id, date_added, date_read)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id::make_id([shelf.id.to_string(), book_id.to_string()]),
            shelf.id,
            book_id,
            date_added,
            date_read,
        ],
    )
    .map_err(|e| AppError::from_constraint(e, "Book already on this shelf"))?;

    Ok(true)
}

impl super::Database {
    // ========== SHELF OPERATIONS ==========

    /// All shelves, ordered by name.
    pub fn list_shelves(&self) -> Result<Vec<Shelf>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SHELF_COLUMNS} FROM shelves s ORDER BY s.name"
            ))?;
            let shelves = stmt
                .query_map([], row_to_shelf)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(shelves)
        })
    }

    /// Shelf with its books.
    pub fn get_shelf(&self, shelf_id: i64) -> Result<ShelfWithBooks> {
        self.read(|conn| {
            let shelf = require_shelf(conn, shelf_id, "Shelf")?;
            shelf_with_books(conn, shelf)
        })
    }

    /// Create a shelf under `make_id(name)`.
    pub fn create_shelf(&self, data: &NewShelf) -> Result<Shelf> {
        let name = data.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name must not be empty".to_string()));
        }
        let shelf_id = id::name_id(name);

        let shelf = self.write(|tx| {
            if get_shelf(tx, shelf_id)?.is_some() {
                return Err(AppError::Conflict("Shelf already exists".to_string()));
            }
            tx.execute(
                "INSERT INTO shelves (id, name, description, is_exclusive, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![shelf_id, name, data.description, data.is_exclusive, now()],
            )
            .map_err(|e| AppError::from_constraint(e, "Shelf already exists"))?;
            require_shelf(tx, shelf_id, "Shelf")
        })?;

        tracing::info!(shelf_id, name = %shelf.name, "Shelf created");
        Ok(shelf)
    }

    /// Update name, description or exclusivity.
    pub fn update_shelf(&self, shelf_id: i64, update: ShelfUpdate) -> Result<Shelf> {
        self.write(|tx| {
            let mut shelf = require_shelf(tx, shelf_id, "Shelf")?;
            if let Some(name) = update.name {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(AppError::Validation("name must not be empty".to_string()));
                }
                shelf.name = name;
            }
            if update.description.is_some() {
                shelf.description = update.description;
            }
            if let Some(is_exclusive) = update.is_exclusive {
                shelf.is_exclusive = is_exclusive;
            }
            tx.execute(
                "UPDATE shelves SET name = ?2, description = ?3, is_exclusive = ?4 WHERE id = ?1",
                params![shelf.id, shelf.name, shelf.description, shelf.is_exclusive],
            )
            .map_err(|e| AppError::from_constraint(e, "A shelf with this name already exists"))?;
            Ok(shelf)
        })
    }

    /// Delete a shelf and its book links.
    pub fn delete_shelf(&self, shelf_id: i64) -> Result<()> {
        self.write(|tx| {
            let rows = tx.execute("DELETE FROM shelves WHERE id = ?1", params![shelf_id])?;
            if rows == 0 {
                return Err(AppError::NotFound("Shelf not found".to_string()));
            }
            Ok(())
        })
    }

    /// Put a book on a shelf, enforcing shelf exclusivity.
    pub fn add_book_to_shelf(&self, shelf_id: i64, book_id: i64) -> Result<()> {
        self.write(|tx| {
            let shelf = require_shelf(tx, shelf_id, "Shelf")?;
            require_book(tx, book_id)?;
            if !link_shelf_book(tx, &shelf, book_id, now(), None)? {
                return Err(AppError::Conflict("Book already on this shelf".to_string()));
            }
            Ok(())
        })
    }

    /// Take a book off a shelf.
    pub fn remove_book_from_shelf(&self, shelf_id: i64, book_id: i64) -> Result<()> {
        self.write(|tx| {
            let rows = tx.execute(
                "DELETE FROM shelf_books WHERE shelf_id = ?1 AND book_id = ?2",
                params![shelf_id, book_id],
            )?;
            if rows == 0 {
                return Err(AppError::NotFound("Book not on this shelf".to_string()));
            }
            Ok(())
        })
    }

    /// Move a book between shelves, keeping its added and read dates.
    ///
    /// Returns the source and destination shelf names.
    pub fn move_book(
        &self,
        book_id: i64,
        from_shelf_id: i64,
        to_shelf_id: i64,
    ) -> Result<(String, String)> {
        self.write(|tx| {
            require_book(tx, book_id)?;
            let from = require_shelf(tx, from_shelf_id, "Source shelf")?;
            let to = require_shelf(tx, to_shelf_id, "Destination shelf")?;

            let link: Option<(DateTime<Utc>, Option<NaiveDate>)> = tx
                .query_row(
                    "SELECT date_added, date_read FROM shelf_books
                     WHERE shelf_id = ?1 AND book_id = ?2",
                    params![from.id, book_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((date_added, date_read)) = link else {
                return Err(AppError::NotFound("Book not on source shelf".to_string()));
            };

            if is_on_shelf(tx, to.id, book_id)? {
                return Err(AppError::Conflict(
                    "Book already on destination shelf".to_string(),
                ));
            }

            tx.execute(
                "DELETE FROM shelf_books WHERE shelf_id = ?1 AND book_id = ?2",
                params![from.id, book_id],
            )?;
            link_shelf_book(tx, &to, book_id, date_added, date_read)?;

            Ok((from.name, to.name))
        })
    }
}

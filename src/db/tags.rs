use super::books::{BOOK_COLUMNS, get_book, require_book, row_to_book};
use super::{Book, Tag};
use crate::error::{AppError, Result};
use crate::id;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

/// Longest accepted tag name, in characters.
pub const MAX_TAG_LEN: usize = 100;

/// Outcome of tagging one book with several tags.
#[derive(Debug, Clone, Serialize)]
pub struct BulkTagResult {
    /// Every tag named in the request.
    pub tags: Vec<Tag>,
    /// Links created.
    pub created: usize,
    /// Links that already existed.
    pub skipped: usize,
}

/// Outcome of tagging several books with one tag.
#[derive(Debug, Clone, Serialize)]
pub struct BulkBookTagResult {
    /// The tag applied.
    pub tag: Tag,
    /// Books newly tagged.
    pub tagged: usize,
    /// Books that already had the tag.
    pub skipped: usize,
    /// Requested ids that matched no book.
    pub not_found: Vec<i64>,
}

/// Trim a tag name and check its length.
pub fn clean_tag_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("tag name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_TAG_LEN {
        return Err(AppError::Validation(format!(
            "tag name must be at most {MAX_TAG_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn get_tag(conn: &Connection, tag_id: i64) -> Result<Option<Tag>> {
    conn.query_row(
        "SELECT id, name FROM tags WHERE id = ?1",
        params![tag_id],
        row_to_tag,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get tag: {}", e)))
}

fn get_tag_by_name(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    conn.query_row(
        "SELECT id, name FROM tags WHERE name = ?1",
        params![name],
        row_to_tag,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get tag: {}", e)))
}

pub(super) fn tags_for_book(conn: &Connection, book_id: i64) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name FROM tags t
         JOIN book_tags bt ON bt.tag_id = t.id
         WHERE bt.book_id = ?1
         ORDER BY t.name",
    )?;
    let tags = stmt
        .query_map(params![book_id], row_to_tag)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
}

fn books_for_tag(conn: &Connection, tag_id: i64) -> Result<Vec<Book>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOK_COLUMNS} FROM books b
         JOIN book_tags bt ON bt.book_id = b.id
         WHERE bt.tag_id = ?1
         ORDER BY b.title, b.id"
    ))?;
    let books = stmt
        .query_map(params![tag_id], row_to_book)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(books)
}

/// Get the tag named `name`, creating it when absent.
///
/// Returns the tag and whether it was created. Same contract as shelves: keyed
/// insert, then lookup by id with a fallback by exact name.
pub(crate) fn get_or_create_tag(conn: &Connection, name: &str) -> Result<(Tag, bool)> {
    let tag_id = id::name_id(name);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO tags (id, name) VALUES (?1, ?2)",
        params![tag_id, name],
    )?;

    let tag = match get_tag(conn, tag_id)? {
        Some(tag) => tag,
        None => get_tag_by_name(conn, name)?
            .ok_or_else(|| AppError::Internal(format!("Tag '{}' vanished after insert", name)))?,
    };
    Ok((tag, inserted > 0))
}

/// Link a tag to a book. Returns `false` when already linked.
pub(crate) fn link_tag(conn: &Connection, book_id: i64, tag_id: i64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO book_tags (book_id, tag_id) VALUES (?1, ?2)",
        params![book_id, tag_id],
    )?;
    Ok(inserted > 0)
}

impl super::Database {
    // ========== TAG OPERATIONS ==========

    /// All tags, ordered by name.
    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY name")?;
            let tags = stmt
                .query_map([], row_to_tag)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tags)
        })
    }

    /// Books carrying a tag.
    pub fn books_with_tag(&self, tag_id: i64) -> Result<Vec<Book>> {
        self.read(|conn| {
            let tag = get_tag(conn, tag_id)?
                .ok_or_else(|| AppError::NotFound("Tag not found".to_string()))?;
            books_for_tag(conn, tag.id)
        })
    }

    /// Books carrying the tag with this exact name.
    pub fn books_with_tag_name(&self, name: &str) -> Result<Vec<Book>> {
        self.read(|conn| {
            let tag = get_tag_by_name(conn, name.trim())?
                .ok_or_else(|| AppError::NotFound("Tag not found".to_string()))?;
            books_for_tag(conn, tag.id)
        })
    }

    /// Tag one book. Conflict when the book already has the tag.
    pub fn tag_book(&self, book_id: i64, name: &str) -> Result<Tag> {
        let name = clean_tag_name(name)?;
        self.write(|tx| {
            require_book(tx, book_id)?;
            let (tag, _) = get_or_create_tag(tx, &name)?;
            if !link_tag(tx, book_id, tag.id)? {
                return Err(AppError::Conflict("Book already has this tag".to_string()));
            }
            Ok(tag)
        })
    }

    /// Tag one book with several tags, skipping those it already has.
    pub fn tag_book_batch(&self, book_id: i64, names: &[String]) -> Result<BulkTagResult> {
        let names = names
            .iter()
            .map(|n| clean_tag_name(n))
            .collect::<Result<Vec<_>>>()?;

        self.write(|tx| {
            require_book(tx, book_id)?;
            let mut result = BulkTagResult {
                tags: Vec::with_capacity(names.len()),
                created: 0,
                skipped: 0,
            };
            for name in &names {
                let (tag, _) = get_or_create_tag(tx, name)?;
                if link_tag(tx, book_id, tag.id)? {
                    result.created += 1;
                } else {
                    result.skipped += 1;
                }
                if !result.tags.contains(&tag) {
                    result.tags.push(tag);
                }
            }
            Ok(result)
        })
    }

    /// Tag several books with one tag. Unknown ids are reported, not fatal.
    pub fn tag_books(&self, name: &str, book_ids: &[i64]) -> Result<BulkBookTagResult> {
        let name = clean_tag_name(name)?;
        self.write(|tx| {
            let (tag, _) = get_or_create_tag(tx, &name)?;
            let mut tagged = 0;
            let mut skipped = 0;
            let mut not_found = Vec::new();

            for &book_id in book_ids {
                if get_book(tx, book_id)?.is_none() {
                    not_found.push(book_id);
                } else if link_tag(tx, book_id, tag.id)? {
                    tagged += 1;
                } else {
                    skipped += 1;
                }
            }

            Ok(BulkBookTagResult {
                tag,
                tagged,
                skipped,
                not_found,
            })
        })
    }

    /// Remove a tag from a book.
    pub fn untag_book(&self, book_id: i64, tag_id: i64) -> Result<()> {
        self.write(|tx| {
            let rows = tx.execute(
                "DELETE FROM book_tags WHERE book_id = ?1 AND tag_id = ?2",
                params![book_id, tag_id],
            )?;
            if rows == 0 {
                return Err(AppError::NotFound("Tag not found on this book".to_string()));
            }
            Ok(())
        })
    }
}

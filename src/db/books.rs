use super::{Book, BookDetail, BookUpdate, NewBook, like_pattern, now};
use super::{reviews, shelves, tags};
use crate::error::{AppError, Result};
use crate::id;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Deserialize;

pub(super) const BOOK_COLUMNS: &str = "b.id, b.title, b.author, b.additional_authors, b.isbn, \
     b.isbn13, b.publisher, b.page_count, b.year_published, b.description, b.cover_url, \
     b.goodreads_id, b.open_library_key, b.created_at, b.updated_at";

/// Column a book listing is sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookSort {
    /// Title (default).
    #[default]
    Title,
    /// Primary author.
    Author,
    /// Creation time.
    CreatedAt,
}

impl BookSort {
    fn column(self) -> &'static str {
        match self {
            BookSort::Title => "b.title",
            BookSort::Author => "b.author",
            BookSort::CreatedAt => "b.created_at",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending (default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters for listing books.
#[derive(Debug, Clone, Deserialize)]
pub struct BookFilter {
    /// Partial, case-insensitive author match.
    pub author: Option<String>,
    /// Exact tag name.
    pub tag: Option<String>,
    /// Partial, case-insensitive title match.
    pub q: Option<String>,
    /// Has a reading started on or after this date.
    pub started_after: Option<NaiveDate>,
    /// Has a reading started on or before this date.
    pub started_before: Option<NaiveDate>,
    /// Has a reading finished on or after this date.
    pub finished_after: Option<NaiveDate>,
    /// Has a reading finished on or before this date.
    pub finished_before: Option<NaiveDate>,
    /// Sort column.
    #[serde(default)]
    pub sort: BookSort,
    /// Sort direction.
    #[serde(default)]
    pub order: SortOrder,
    /// Page size.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Rows to skip.
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Default for BookFilter {
    fn default() -> Self {
        Self {
            author: None,
            tag: None,
            q: None,
            started_after: None,
            started_before: None,
            finished_after: None,
            finished_before: None,
            sort: BookSort::default(),
            order: SortOrder::default(),
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl BookFilter {
    fn filters_readings(&self) -> bool {
        self.started_after.is_some()
            || self.started_before.is_some()
            || self.finished_after.is_some()
            || self.finished_before.is_some()
    }
}

pub(super) fn row_to_book(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        additional_authors: row.get(3)?,
        isbn: row.get(4)?,
        isbn13: row.get(5)?,
        publisher: row.get(6)?,
        page_count: row.get(7)?,
        year_published: row.get(8)?,
        description: row.get(9)?,
        cover_url: row.get(10)?,
        goodreads_id: row.get(11)?,
        open_library_key: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Get a book by id.
pub(crate) fn get_book(conn: &Connection, book_id: i64) -> Result<Option<Book>> {
    conn.query_row(
        &format!("SELECT {BOOK_COLUMNS} FROM books b WHERE b.id = ?1"),
        params![book_id],
        row_to_book,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
}

/// Get a book by id, or fail with not-found.
pub(crate) fn require_book(conn: &Connection, book_id: i64) -> Result<Book> {
    get_book(conn, book_id)?.ok_or_else(|| AppError::NotFound("Book not found".to_string()))
}

/// Get a book by its Goodreads id.
pub(crate) fn get_book_by_goodreads_id(conn: &Connection, goodreads_id: &str) -> Result<Option<Book>> {
    conn.query_row(
        &format!("SELECT {BOOK_COLUMNS} FROM books b WHERE b.goodreads_id = ?1"),
        params![goodreads_id],
        row_to_book,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
}

/// Insert a book under the given id.
pub(crate) fn insert_book(
    conn: &Connection,
    book_id: i64,
    data: &NewBook,
    goodreads_id: Option<&str>,
) -> Result<Book> {
    if get_book(conn, book_id)?.is_some() {
        return Err(AppError::Conflict("Book already exists".to_string()));
    }

    let ts = now();
    conn.execute(
        "INSERT INTO books (id, title, author, additional_authors, isbn, isbn13, publisher,
                            page_count, year_published, description, cover_url, goodreads_id,
                            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            book_id,
            data.title,
            data.author,
            data.additional_authors,
            data.isbn,
            data.isbn13,
            data.publisher,
            data.page_count,
            data.year_published,
            data.description,
            data.cover_url,
            goodreads_id,
            ts,
        ],
    )
    .map_err(|e| AppError::from_constraint(e, "A book with this ISBN or Goodreads id already exists"))?;

    require_book(conn, book_id)
}

/// Write every mutable column of `book` back and bump `updated_at`.
pub(crate) fn update_book_row(conn: &Connection, book: &Book) -> Result<Book> {
    conn.execute(
        "UPDATE books SET title = ?2, author = ?3, additional_authors = ?4, isbn = ?5,
                isbn13 = ?6, publisher = ?7, page_count = ?8, year_published = ?9,
                description = ?10, cover_url = ?11, goodreads_id = ?12,
                open_library_key = ?13, updated_at = ?14
         WHERE id = ?1",
        params![
            book.id,
            book.title,
            book.author,
            book.additional_authors,
            book.isbn,
            book.isbn13,
            book.publisher,
            book.page_count,
            book.year_published,
            book.description,
            book.cover_url,
            book.goodreads_id,
            book.open_library_key,
            now(),
        ],
    )
    .map_err(|e| AppError::from_constraint(e, "A book with this ISBN or Goodreads id already exists"))?;

    require_book(conn, book.id)
}

fn book_detail(conn: &Connection, book: Book) -> Result<BookDetail> {
    let tags = tags::tags_for_book(conn, book.id)?;
    let shelves = shelves::shelves_for_book(conn, book.id)?;
    let review = reviews::get_review_for_book(conn, book.id)?;
    Ok(BookDetail {
        book,
        tags,
        shelves,
        review,
    })
}

fn collect_books(conn: &Connection, sql: &str, values: Vec<Value>) -> Result<Vec<Book>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

    let books = stmt
        .query_map(params_from_iter(values), row_to_book)
        .map_err(|e| AppError::Internal(format!("Failed to list books: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

    Ok(books)
}

impl super::Database {
    // ========== BOOK OPERATIONS ==========

    /// Total number of books.
    pub fn count_books(&self) -> Result<i64> {
        self.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))
                .map_err(|e| AppError::Internal(format!("Failed to count books: {}", e)))
        })
    }

    /// Case-insensitive partial title search, ordered by title.
    pub fn search_books(&self, title: &str, limit: i64) -> Result<Vec<Book>> {
        self.read(|conn| {
            collect_books(
                conn,
                &format!(
                    "SELECT {BOOK_COLUMNS} FROM books b
                     WHERE b.title LIKE ? ESCAPE '\\'
                     ORDER BY b.title, b.id
                     LIMIT ?"
                ),
                vec![Value::Text(like_pattern(title)), Value::Integer(limit)],
            )
        })
    }

    /// Filtered, sorted, paginated book listing.
    pub fn list_books(&self, filter: &BookFilter) -> Result<Vec<Book>> {
        let mut sql = format!("SELECT DISTINCT {BOOK_COLUMNS} FROM books b");
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(tag) = &filter.tag {
            sql.push_str(
                " JOIN book_tags bt ON bt.book_id = b.id JOIN tags t ON t.id = bt.tag_id",
            );
            clauses.push("t.name = ?");
            values.push(Value::Text(tag.clone()));
        }

        if filter.filters_readings() {
            sql.push_str(" JOIN readings r ON r.book_id = b.id");
            let bounds = [
                ("r.started_at >= ?", filter.started_after),
                ("r.started_at <= ?", filter.started_before),
                ("r.finished_at >= ?", filter.finished_after),
                ("r.finished_at <= ?", filter.finished_before),
            ];
            for (clause, date) in bounds {
                if let Some(date) = date {
                    clauses.push(clause);
                    values.push(Value::Text(date.to_string()));
                }
            }
        }

        if let Some(author) = filter.author.as_deref().filter(|a| !a.is_empty()) {
            clauses.push("b.author LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(author)));
        }

        if let Some(q) = filter.q.as_deref().filter(|q| !q.is_empty()) {
            clauses.push("b.title LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(q)));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let direction = filter.order.keyword();
        sql.push_str(&format!(
            " ORDER BY {} {direction}, b.id {direction} LIMIT ? OFFSET ?",
            filter.sort.column()
        ));
        values.push(Value::Integer(filter.limit));
        values.push(Value::Integer(filter.offset));

        self.read(|conn| collect_books(conn, &sql, values))
    }

    /// Get a book.
    pub fn get_book(&self, book_id: i64) -> Result<Option<Book>> {
        self.read(|conn| get_book(conn, book_id))
    }

    /// Book with its tags, shelves and review.
    pub fn get_book_detail(&self, book_id: i64) -> Result<BookDetail> {
        self.read(|conn| {
            let book = require_book(conn, book_id)?;
            book_detail(conn, book)
        })
    }

    /// Details of the books addressed by (title, author); unknown pairs are
    /// skipped.
    pub fn get_book_details_by_name<'a, I>(&self, refs: I) -> Result<Vec<BookDetail>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ids: Vec<i64> = Vec::new();
        for (title, author) in refs {
            let book_id = id::book_id(title, author);
            if !ids.contains(&book_id) {
                ids.push(book_id);
            }
        }

        self.read(|conn| {
            let mut details = Vec::with_capacity(ids.len());
            for book_id in ids {
                if let Some(book) = get_book(conn, book_id)? {
                    details.push(book_detail(conn, book)?);
                }
            }
            Ok(details)
        })
    }

    /// Create a book under `make_id(title, author)`.
    pub fn create_book(&self, data: &NewBook) -> Result<Book> {
        validate_new_book(data)?;
        let book_id = id::book_id(&data.title, &data.author);
        let book = self.write(|tx| insert_book(tx, book_id, data, None))?;
        tracing::info!(book_id, title = %book.title, "Book created");
        Ok(book)
    }

    /// Apply a partial update. The id is not recomputed when title or author
    /// change.
    pub fn update_book(&self, book_id: i64, update: BookUpdate) -> Result<Book> {
        self.write(|tx| {
            let mut book = require_book(tx, book_id)?;
            if let Some(v) = update.title {
                book.title = v;
            }
            if let Some(v) = update.author {
                book.author = v;
            }
            if update.additional_authors.is_some() {
                book.additional_authors = update.additional_authors;
            }
            if update.isbn.is_some() {
                book.isbn = update.isbn;
            }
            if update.isbn13.is_some() {
                book.isbn13 = update.isbn13;
            }
            if update.publisher.is_some() {
                book.publisher = update.publisher;
            }
            if update.page_count.is_some() {
                book.page_count = update.page_count;
            }
            if update.year_published.is_some() {
                book.year_published = update.year_published;
            }
            if update.description.is_some() {
                book.description = update.description;
            }
            if update.cover_url.is_some() {
                book.cover_url = update.cover_url;
            }
            if book.title.trim().is_empty() || book.author.trim().is_empty() {
                return Err(AppError::Validation(
                    "title and author must not be empty".to_string(),
                ));
            }
            update_book_row(tx, &book)
        })
    }

    /// Delete a book and, by cascade, its review, links and readings.
    pub fn delete_book(&self, book_id: i64) -> Result<()> {
        self.write(|tx| {
            let rows = tx
                .execute("DELETE FROM books WHERE id = ?1", params![book_id])
                .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
            if rows == 0 {
                return Err(AppError::NotFound("Book not found".to_string()));
            }
            Ok(())
        })?;
        tracing::info!(book_id, "Book deleted");
        Ok(())
    }

    /// Ids of every book, or only of those without an Open Library key.
    pub fn book_ids_for_enrichment(&self, only_unenriched: bool) -> Result<Vec<i64>> {
        let sql = if only_unenriched {
            "SELECT id FROM books WHERE open_library_key IS NULL OR open_library_key = '' ORDER BY id"
        } else {
            "SELECT id FROM books ORDER BY id"
        };

        self.read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }
}

/// Reject blank titles or authors.
pub(crate) fn validate_new_book(data: &NewBook) -> Result<()> {
    if data.title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }
    if data.author.trim().is_empty() {
        return Err(AppError::Validation("author must not be empty".to_string()));
    }
    Ok(())
}

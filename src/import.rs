//! Goodreads import: turns parsed export rows into books, shelf placements,
//! readings and reviews.
//!
//! The whole upload runs in one transaction. Each row runs inside its own
//! savepoint, so a row that violates a constraint is rolled back and skipped
//! without losing the rows around it. Every write is keyed by a derived id or
//! guarded by an existence check, so importing the same file twice creates
//! nothing the second time.

use crate::db::{
    self, Book, Database, NewBook, get_book, get_book_by_goodreads_id, get_or_create_shelf,
    get_review_for_book, insert_book, insert_reading, insert_review, is_reserved_exclusive,
    link_shelf_book, update_book_row,
};
use crate::error::Result;
use crate::goodreads::{GoodreadsRow, parse_goodreads_csv};
use crate::id;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::io::Read;
use std::path::Path;

/// Counts of what an import created or updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    /// New books.
    pub books_created: usize,
    /// Existing books overwritten from the export.
    pub books_updated: usize,
    /// New shelf placements.
    pub shelves_created: usize,
    /// New reviews.
    pub reviews_created: usize,
    /// New readings.
    pub readings_created: usize,
}

impl ImportResult {
    fn absorb(&mut self, other: ImportResult) {
        self.books_created += other.books_created;
        self.books_updated += other.books_updated;
        self.shelves_created += other.shelves_created;
        self.reviews_created += other.reviews_created;
        self.readings_created += other.readings_created;
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Shelves a row goes on: its bookshelves in order, then the disposition.
///
/// Reserved names other than the disposition are dropped, otherwise linking
/// them would knock the book off its disposition shelf.
fn shelf_names(row: &GoodreadsRow) -> Vec<&str> {
    let disposition = row.exclusive_shelf.as_deref();
    let mut names: Vec<&str> = Vec::new();
    for name in &row.bookshelves {
        let name = name.as_str();
        if is_reserved_exclusive(name) && Some(name) != disposition {
            continue;
        }
        if Some(name) != disposition && !names.contains(&name) {
            names.push(name);
        }
    }
    if let Some(name) = disposition {
        names.push(name);
    }
    names
}

fn new_book(row: &GoodreadsRow) -> NewBook {
    NewBook {
        title: row.title.clone(),
        author: row.author.clone(),
        additional_authors: row.additional_authors.clone(),
        isbn: row.isbn.clone(),
        isbn13: row.isbn13.clone(),
        publisher: row.publisher.clone(),
        page_count: row.page_count,
        year_published: row.year_published,
        ..NewBook::default()
    }
}

fn overwrite_from_row(book: &mut Book, row: &GoodreadsRow) {
    book.title = row.title.clone();
    book.author = row.author.clone();
    book.additional_authors = row.additional_authors.clone();
    book.isbn = row.isbn.clone();
    book.isbn13 = row.isbn13.clone();
    book.publisher = row.publisher.clone();
    book.page_count = row.page_count;
    book.year_published = row.year_published;
    book.goodreads_id = Some(row.goodreads_id.clone());
}

/// Find or create the row's book. Returns the book and whether it was created.
fn upsert_book(conn: &Connection, row: &GoodreadsRow) -> Result<(Book, bool)> {
    if let Some(mut book) = get_book_by_goodreads_id(conn, &row.goodreads_id)? {
        overwrite_from_row(&mut book, row);
        return Ok((update_book_row(conn, &book)?, false));
    }

    let book_id = id::book_id(&row.title, &row.author);
    match get_book(conn, book_id)? {
        // Added by hand before the import; adopt it.
        Some(mut book) if book.goodreads_id.is_none() => {
            overwrite_from_row(&mut book, row);
            Ok((update_book_row(conn, &book)?, false))
        }
        _ => {
            let book = insert_book(conn, book_id, &new_book(row), Some(&row.goodreads_id))?;
            Ok((book, true))
        }
    }
}

fn import_row(conn: &Connection, row: &GoodreadsRow) -> Result<ImportResult> {
    let mut result = ImportResult::default();

    let (book, created) = upsert_book(conn, row)?;
    if created {
        result.books_created += 1;
    } else {
        result.books_updated += 1;
    }

    let date_added = row.date_added.map(start_of_day).unwrap_or_else(db::now);
    for name in shelf_names(row) {
        let (shelf, _) = get_or_create_shelf(conn, name, is_reserved_exclusive(name))?;
        if link_shelf_book(conn, &shelf, book.id, date_added, row.date_read)? {
            result.shelves_created += 1;
        }
    }

    if let Some(date_read) = row.date_read {
        let started_at = if row.exclusive_shelf.as_deref() == Some("read") {
            row.date_added
        } else {
            None
        };
        let reading_id = id::make_id([book.id.to_string(), date_read.to_string()]);
        if insert_reading(conn, reading_id, book.id, started_at, Some(date_read))? {
            result.readings_created += 1;
        }
    }

    if (row.rating.is_some() || row.review_text.is_some())
        && get_review_for_book(conn, book.id)?.is_none()
    {
        let rating = row.rating.map(|r| r as f64);
        insert_review(conn, book.id, rating, row.review_text.as_deref())?;
        result.reviews_created += 1;
    }

    Ok(result)
}

/// Import parsed rows. Rows without a Goodreads id or title are skipped.
pub fn import_rows(db: &Database, rows: &[GoodreadsRow]) -> Result<ImportResult> {
    let result = db.write(|tx| {
        let mut total = ImportResult::default();
        for row in rows {
            if row.goodreads_id.is_empty() || row.title.is_empty() {
                continue;
            }

            tx.execute_batch("SAVEPOINT import_row")?;
            match import_row(tx, row) {
                Ok(counts) => {
                    tx.execute_batch("RELEASE import_row")?;
                    total.absorb(counts);
                }
                Err(e) => {
                    tx.execute_batch("ROLLBACK TO import_row; RELEASE import_row")?;
                    tracing::warn!(
                        goodreads_id = %row.goodreads_id,
                        title = %row.title,
                        error = %e,
                        "Skipping import row"
                    );
                }
            }
        }
        Ok(total)
    })?;

    tracing::info!(
        books_created = result.books_created,
        books_updated = result.books_updated,
        shelves_created = result.shelves_created,
        reviews_created = result.reviews_created,
        readings_created = result.readings_created,
        "Goodreads import finished"
    );
    Ok(result)
}

/// Parse and import a Goodreads export.
pub fn import_csv<R: Read>(db: &Database, reader: R) -> Result<ImportResult> {
    let rows = parse_goodreads_csv(reader)?;
    import_rows(db, &rows)
}

/// Parse and import a Goodreads export file.
pub fn import_file(db: &Database, path: &Path) -> Result<ImportResult> {
    tracing::info!(path = %path.display(), "Importing Goodreads export");
    let file = std::fs::File::open(path)?;
    import_csv(db, std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goodreads::tests::SAMPLE_CSV;

    fn row(goodreads_id: &str, title: &str, author: &str) -> GoodreadsRow {
        GoodreadsRow {
            goodreads_id: goodreads_id.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            additional_authors: None,
            isbn: None,
            isbn13: None,
            publisher: None,
            page_count: None,
            year_published: None,
            rating: None,
            review_text: None,
            exclusive_shelf: None,
            bookshelves: Vec::new(),
            date_added: None,
            date_read: None,
        }
    }

    #[test]
    fn test_import_sample() {
        let db = Database::open_memory().unwrap();
        let result = import_csv(&db, SAMPLE_CSV.as_bytes()).unwrap();

        assert_eq!(
            result,
            ImportResult {
                books_created: 2,
                books_updated: 0,
                // gatsby: classics, fiction, read; dune: sci-fi, currently-reading
                shelves_created: 5,
                reviews_created: 1,
                readings_created: 1,
            }
        );

        let gatsby = id::book_id("The Great Gatsby", "F. Scott Fitzgerald");
        let detail = db.get_book_detail(gatsby).unwrap();
        assert_eq!(detail.book.goodreads_id.as_deref(), Some("12345"));
        assert_eq!(detail.book.isbn13.as_deref(), Some("9780743273565"));
        assert_eq!(detail.review.unwrap().rating, Some(5.0));

        let names: Vec<_> = detail.shelves.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["classics", "fiction", "read"]);
        let read = detail.shelves.iter().find(|s| s.name == "read").unwrap();
        assert!(read.is_exclusive);
        assert!(!detail.shelves.iter().find(|s| s.name == "fiction").unwrap().is_exclusive);

        let readings = db.list_readings(gatsby).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].started_at, NaiveDate::from_ymd_opt(2023, 12, 1));
        assert_eq!(readings[0].finished_at, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(readings[0].duration_days, Some(45));
    }

    #[test]
    fn test_reimport_creates_nothing() {
        let db = Database::open_memory().unwrap();
        import_csv(&db, SAMPLE_CSV.as_bytes()).unwrap();
        let again = import_csv(&db, SAMPLE_CSV.as_bytes()).unwrap();

        assert_eq!(
            again,
            ImportResult {
                books_updated: 2,
                ..ImportResult::default()
            }
        );
        assert_eq!(db.count_books().unwrap(), 2);
    }

    #[test]
    fn test_reading_start_only_for_read_shelf() {
        let db = Database::open_memory().unwrap();
        let mut r = row("1", "Book", "Author");
        r.exclusive_shelf = Some("to-read".to_string());
        r.date_added = NaiveDate::from_ymd_opt(2024, 1, 1);
        r.date_read = NaiveDate::from_ymd_opt(2024, 2, 1);

        let result = import_rows(&db, &[r]).unwrap();
        assert_eq!(result.readings_created, 1);

        let readings = db.list_readings(id::book_id("Book", "Author")).unwrap();
        assert_eq!(readings[0].started_at, None);
        assert_eq!(readings[0].duration_days, None);
    }

    #[test]
    fn test_skips_rows_without_id_or_title() {
        let db = Database::open_memory().unwrap();
        let rows = [row("", "Book", "Author"), row("2", "", "Author")];
        assert_eq!(import_rows(&db, &rows).unwrap(), ImportResult::default());
        assert_eq!(db.count_books().unwrap(), 0);
    }

    #[test]
    fn test_adopts_manually_added_book() {
        let db = Database::open_memory().unwrap();
        let existing = db
            .create_book(&NewBook {
                title: "Dune".to_string(),
                author: "Frank Herbert".to_string(),
                ..NewBook::default()
            })
            .unwrap();

        let mut r = row("67890", "Dune", "Frank Herbert");
        r.page_count = Some(688);
        let result = import_rows(&db, &[r]).unwrap();
        assert_eq!(result.books_created, 0);
        assert_eq!(result.books_updated, 1);

        let book = db.get_book(existing.id).unwrap().unwrap();
        assert_eq!(book.goodreads_id.as_deref(), Some("67890"));
        assert_eq!(book.page_count, Some(688));
    }

    #[test]
    fn test_bad_row_does_not_abort_import() {
        let db = Database::open_memory().unwrap();
        let mut first = row("1", "First", "Author");
        first.isbn = Some("0000000000".to_string());
        let mut clash = row("2", "Second", "Author");
        clash.isbn = Some("0000000000".to_string());
        let third = row("3", "Third", "Author");

        let result = import_rows(&db, &[first, clash, third]).unwrap();
        assert_eq!(result.books_created, 2);
        assert!(db.get_book(id::book_id("Second", "Author")).unwrap().is_none());
        assert!(db.get_book(id::book_id("Third", "Author")).unwrap().is_some());
    }

    #[test]
    fn test_reserved_bookshelf_does_not_displace_disposition() {
        let mut r = row("1", "Book", "Author");
        r.exclusive_shelf = Some("read".to_string());
        r.bookshelves = vec!["to-read".into(), "favorites".into(), "read".into()];
        assert_eq!(shelf_names(&r), vec!["favorites", "read"]);
    }

    #[test]
    fn test_import_file() {
        let db = Database::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goodreads_library_export.csv");
        std::fs::write(&path, SAMPLE_CSV).unwrap();

        let result = import_file(&db, &path).unwrap();
        assert_eq!(result.books_created, 2);
    }
}

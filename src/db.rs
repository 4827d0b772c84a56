mod books;
mod readings;
mod reviews;
mod schema;
mod shelves;
mod tags;

pub use books::{BookFilter, BookSort, SortOrder};
pub use readings::{ProgressInput, ReadingUpdate};
pub use reviews::{ReviewInput, validate_rating};
pub use schema::Database;
pub use shelves::{EXCLUSIVE_SHELF_NAMES, NewShelf, ShelfUpdate, is_reserved_exclusive};
pub use tags::{BulkBookTagResult, BulkTagResult, MAX_TAG_LEN, clean_tag_name};

pub(crate) use books::{
    get_book, get_book_by_goodreads_id, insert_book, require_book, update_book_row,
    validate_new_book,
};
pub(crate) use readings::insert_reading;
pub(crate) use reviews::{get_review_for_book, insert_review};
pub(crate) use shelves::{get_or_create_shelf, link_shelf_book};
pub(crate) use tags::{get_or_create_tag, link_tag};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A book in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Derived from normalized title and author.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Co-authors, comma separated.
    pub additional_authors: Option<String>,
    /// ISBN-10.
    pub isbn: Option<String>,
    /// ISBN-13.
    pub isbn13: Option<String>,
    /// Publisher.
    pub publisher: Option<String>,
    /// Number of pages.
    pub page_count: Option<i64>,
    /// Publication year.
    pub year_published: Option<i64>,
    /// Description or summary.
    pub description: Option<String>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// Goodreads book id, set by import.
    pub goodreads_id: Option<String>,
    /// Open Library work key, set by enrichment.
    pub open_library_key: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBook {
    /// Title.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Co-authors.
    #[serde(default)]
    pub additional_authors: Option<String>,
    /// ISBN-10.
    #[serde(default)]
    pub isbn: Option<String>,
    /// ISBN-13.
    #[serde(default)]
    pub isbn13: Option<String>,
    /// Publisher.
    #[serde(default)]
    pub publisher: Option<String>,
    /// Number of pages.
    #[serde(default)]
    pub page_count: Option<i64>,
    /// Publication year.
    #[serde(default)]
    pub year_published: Option<i64>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Cover image URL.
    #[serde(default)]
    pub cover_url: Option<String>,
}

/// Partial book update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[allow(missing_docs)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub additional_authors: Option<String>,
    pub isbn: Option<String>,
    pub isbn13: Option<String>,
    pub publisher: Option<String>,
    pub page_count: Option<i64>,
    pub year_published: Option<i64>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
}

/// Book with its tags, shelves and review.
#[derive(Debug, Clone, Serialize)]
pub struct BookDetail {
    /// The book itself.
    #[serde(flatten)]
    pub book: Book,
    /// Tags, by name.
    pub tags: Vec<Tag>,
    /// Shelves it is on, by name.
    pub shelves: Vec<Shelf>,
    /// Its review, if any.
    pub review: Option<Review>,
}

/// A named shelf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shelf {
    /// Derived from the normalized name.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Exclusive shelves are mutually exclusive per book.
    pub is_exclusive: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Shelf with the books on it.
#[derive(Debug, Clone, Serialize)]
pub struct ShelfWithBooks {
    /// The shelf itself.
    #[serde(flatten)]
    pub shelf: Shelf,
    /// Books, oldest placement first.
    pub books: Vec<Book>,
}

/// A topical tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Derived from the name.
    pub id: i64,
    /// Unique name.
    pub name: String,
}

/// A rating and/or review of a book. One per book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Derived from the book id.
    pub id: i64,
    /// Reviewed book.
    pub book_id: i64,
    /// 0.0 to 5.0.
    pub rating: Option<f64>,
    /// Free text.
    pub review_text: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Review with the reviewed book's title and author.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewWithBook {
    /// The review itself.
    #[serde(flatten)]
    pub review: Review,
    /// Title of the reviewed book.
    pub book_title: String,
    /// Author of the reviewed book.
    pub book_author: String,
}

/// One reading session of a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Derived from book id and start date.
    pub id: i64,
    /// Book being read.
    pub book_id: i64,
    /// Day reading started, unknown for some imported readings.
    pub started_at: Option<NaiveDate>,
    /// `None` while the reading is active.
    pub finished_at: Option<NaiveDate>,
    /// Whole days between start and finish, when both are known.
    pub duration_days: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Reading {
    /// Days between start and finish.
    pub fn compute_duration(started_at: Option<NaiveDate>, finished_at: Option<NaiveDate>) -> Option<i64> {
        match (started_at, finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_days()),
            _ => None,
        }
    }

    /// Whether the reading has not been finished yet.
    pub fn is_active(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// Reading with its progress entries.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingDetail {
    /// The reading itself.
    #[serde(flatten)]
    pub reading: Reading,
    /// Progress, oldest first.
    pub progress_entries: Vec<ReadingProgress>,
}

/// Page reached on a given day of a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingProgress {
    /// Derived from reading id and date.
    pub id: i64,
    /// Owning reading.
    pub reading_id: i64,
    /// Page reached.
    pub page: i64,
    /// Day of the entry.
    pub date: NaiveDate,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Readings of one book, addressed by title and author.
#[derive(Debug, Clone, Serialize)]
#[allow(missing_docs)]
pub struct BookReadings {
    pub title: String,
    pub author: String,
    pub readings: Vec<Reading>,
}

/// Timestamp helper.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Today's date (UTC).
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

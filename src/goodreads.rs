//! Goodreads library export parsing.
//!
//! The export is a header-driven CSV. Columns are looked up by name, so
//! their order does not matter and unknown columns are ignored. Values that
//! do not parse degrade to `None` rather than failing the row.

use crate::error::Result;
use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::HashMap;
use std::io::Read;

const DATE_FORMAT: &str = "%Y/%m/%d";

/// One book of a Goodreads export.
#[derive(Debug, Clone, PartialEq)]
pub struct GoodreadsRow {
    /// Goodreads book id.
    pub goodreads_id: String,
    /// Title.
    pub title: String,
    /// Primary author.
    pub author: String,
    /// Co-authors.
    pub additional_authors: Option<String>,
    /// ISBN-10, unwrapped.
    pub isbn: Option<String>,
    /// ISBN-13, unwrapped.
    pub isbn13: Option<String>,
    /// Publisher.
    pub publisher: Option<String>,
    /// Number of pages.
    pub page_count: Option<i64>,
    /// Edition year, else original publication year.
    pub year_published: Option<i64>,
    /// 1 to 5; Goodreads writes 0 for unrated.
    pub rating: Option<i64>,
    /// Review text.
    pub review_text: Option<String>,
    /// Disposition shelf, e.g. `read` or `to-read`.
    pub exclusive_shelf: Option<String>,
    /// Other shelves.
    pub bookshelves: Vec<String>,
    /// Day the book was added.
    pub date_added: Option<NaiveDate>,
    /// Day the book was finished.
    pub date_read: Option<NaiveDate>,
}

/// Column positions by header name.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        let map = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_string(), i))
            .collect();
        Self(map)
    }

    fn get<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.0
            .get(name)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .unwrap_or_default()
    }

    fn text(&self, record: &StringRecord, name: &str) -> Option<String> {
        non_empty(self.get(record, name))
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Strip the `="..."` formula wrapper Goodreads puts around ISBNs.
pub fn clean_isbn(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches(|c| c == '=' || c == '"')
        .trim_matches('"');
    non_empty(cleaned)
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

fn parse_row(columns: &Columns, record: &StringRecord) -> GoodreadsRow {
    let bookshelves = columns
        .get(record, "Bookshelves")
        .split(',')
        .filter_map(non_empty)
        .collect();

    GoodreadsRow {
        goodreads_id: columns.get(record, "Book Id").to_string(),
        title: columns.get(record, "Title").to_string(),
        author: columns.get(record, "Author").to_string(),
        additional_authors: columns.text(record, "Additional Authors"),
        isbn: clean_isbn(columns.get(record, "ISBN")),
        isbn13: clean_isbn(columns.get(record, "ISBN13")),
        publisher: columns.text(record, "Publisher"),
        page_count: parse_int(columns.get(record, "Number of Pages")),
        year_published: parse_int(columns.get(record, "Year Published"))
            .or_else(|| parse_int(columns.get(record, "Original Publication Year"))),
        rating: parse_int(columns.get(record, "My Rating")).filter(|r| *r > 0),
        review_text: columns.text(record, "My Review"),
        exclusive_shelf: columns.text(record, "Exclusive Shelf"),
        bookshelves,
        date_added: parse_date(columns.get(record, "Date Added")),
        date_read: parse_date(columns.get(record, "Date Read")),
    }
}

/// Parse a Goodreads export. Records the CSV reader cannot decode are
/// skipped with a warning.
pub fn parse_goodreads_csv<R: Read>(reader: R) -> Result<Vec<GoodreadsRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let columns = Columns::new(reader.headers()?);

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        match result {
            Ok(record) => rows.push(parse_row(&columns, &record)),
            Err(e) => tracing::warn!(record = line + 1, error = %e, "Skipping malformed CSV record"),
        }
    }

    tracing::debug!(rows = rows.len(), "Parsed Goodreads export");
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_CSV: &str = "\
Book Id,Title,Author,Author l-f,Additional Authors,ISBN,ISBN13,My Rating,Average Rating,Publisher,Binding,Number of Pages,Year Published,Original Publication Year,Date Read,Date Added,Bookshelves,Bookshelves with positions,Exclusive Shelf,My Review,Spoiler,Private Notes,Read Count,Owned Copies
12345,The Great Gatsby,F. Scott Fitzgerald,\"Fitzgerald, F. Scott\",,\"=\"\"0743273567\"\"\",\"=\"\"9780743273565\"\"\",5,3.93,Scribner,Paperback,180,2004,1925,2024/01/15,2023/12/01,\"classics, fiction\",,read,Amazing book.,,,1,0
67890,Dune,Frank Herbert,\"Herbert, Frank\",,\"=\"\"0441172717\"\"\",\"=\"\"9780441172719\"\"\",0,4.25,Ace Books,Paperback,688,2005,1965,,2024/03/10,sci-fi,,currently-reading,,,,0,1
";

    /// An export of `rows` to-read books, each carrying a review of
    /// `review_len` characters.
    pub(crate) fn padded_export(rows: usize, review_len: usize) -> String {
        let header = SAMPLE_CSV.lines().next().unwrap_or_default();
        let review = "x".repeat(review_len);
        let mut csv = format!("{header}\n");
        for i in 1..=rows {
            let mut fields = vec![i.to_string(), format!("Book {i}"), format!("Author {i}")];
            fields.extend(std::iter::repeat_n(String::new(), 4));
            fields.push("0".to_string());
            fields.extend(std::iter::repeat_n(String::new(), 10));
            fields.push("to-read".to_string());
            fields.push(review.clone());
            fields.extend([String::new(), String::new(), "0".to_string(), "0".to_string()]);
            csv.push_str(&fields.join(","));
            csv.push('\n');
        }
        csv
    }

    fn sample() -> Vec<GoodreadsRow> {
        parse_goodreads_csv(SAMPLE_CSV.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(sample().len(), 2);
    }

    #[test]
    fn test_parse_fields() {
        let rows = sample();
        let gatsby = &rows[0];
        assert_eq!(gatsby.goodreads_id, "12345");
        assert_eq!(gatsby.title, "The Great Gatsby");
        assert_eq!(gatsby.author, "F. Scott Fitzgerald");
        assert_eq!(gatsby.additional_authors, None);
        assert_eq!(gatsby.isbn.as_deref(), Some("0743273567"));
        assert_eq!(gatsby.isbn13.as_deref(), Some("9780743273565"));
        assert_eq!(gatsby.publisher.as_deref(), Some("Scribner"));
        assert_eq!(gatsby.page_count, Some(180));
        assert_eq!(gatsby.year_published, Some(2004));
        assert_eq!(gatsby.rating, Some(5));
        assert_eq!(gatsby.review_text.as_deref(), Some("Amazing book."));
        assert_eq!(gatsby.exclusive_shelf.as_deref(), Some("read"));
    }

    #[test]
    fn test_parse_bookshelves() {
        let rows = sample();
        assert_eq!(rows[0].bookshelves, vec!["classics", "fiction"]);
        assert_eq!(rows[1].bookshelves, vec!["sci-fi"]);
    }

    #[test]
    fn test_zero_rating_is_unrated() {
        assert_eq!(sample()[1].rating, None);
    }

    #[test]
    fn test_parse_dates() {
        let rows = sample();
        assert_eq!(rows[0].date_read, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(rows[0].date_added, NaiveDate::from_ymd_opt(2023, 12, 1));
        assert_eq!(rows[1].date_read, None);
    }

    #[test]
    fn test_malformed_values_degrade() {
        let csv = "\u{feff}Book Id,Title,Author,Number of Pages,Year Published,Original Publication Year,Date Read\n\
                   1,Odd Book,Someone,many,,1999,15/01/2024\n";
        let rows = parse_goodreads_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].goodreads_id, "1");
        assert_eq!(rows[0].page_count, None);
        assert_eq!(rows[0].year_published, Some(1999));
        assert_eq!(rows[0].date_read, None);
        assert_eq!(rows[0].isbn, None);
    }

    #[test]
    fn test_clean_isbn() {
        assert_eq!(clean_isbn("=\"0441172717\"").as_deref(), Some("0441172717"));
        assert_eq!(clean_isbn("0441172717").as_deref(), Some("0441172717"));
        assert_eq!(clean_isbn("=\"\""), None);
        assert_eq!(clean_isbn(""), None);
    }
}

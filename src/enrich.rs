//! Applying Open Library metadata to books.
//!
//! Fetches never run while the database lock is held: metadata is fetched
//! first and then merged inside one transaction.

use crate::db::{
    Book, Database, MAX_TAG_LEN, NewBook, get_or_create_tag, insert_book, link_tag,
    require_book, update_book_row, validate_new_book,
};
use crate::error::{AppError, Result};
use crate::id;
use crate::openlibrary::{Metadata, OpenLibraryClient};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Subjects considered when deriving tags.
const MAX_SUBJECT_TAGS: usize = 10;

/// Outcome of enriching one book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichResult {
    /// Book enriched.
    pub book_id: i64,
    /// Whether any field or tag was applied.
    pub enriched: bool,
    /// Names of the fields written.
    pub fields_updated: Vec<String>,
    /// Names of the tags newly linked.
    pub tags_added: Vec<String>,
    /// Why nothing was applied, when metadata was missing.
    pub error: Option<String>,
}

impl EnrichResult {
    fn no_metadata(book_id: i64) -> Self {
        Self {
            book_id,
            enriched: false,
            fields_updated: Vec::new(),
            tags_added: Vec::new(),
            error: Some("No metadata found".to_string()),
        }
    }
}

/// Outcome of enriching several books.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEnrichResult {
    /// Books considered.
    pub total: usize,
    /// Books that received at least one field or tag.
    pub enriched: usize,
    /// Books for which no metadata was found.
    pub failed: usize,
    /// Per-book outcomes, in processing order.
    pub results: Vec<EnrichResult>,
}

/// Which books a batch enrichment covers.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEnrichRequest {
    /// Explicit ids; unknown ids are ignored.
    #[serde(default)]
    pub book_ids: Option<Vec<i64>>,
    /// Without explicit ids, only books lacking an Open Library key.
    #[serde(default = "default_true")]
    pub only_unenriched: bool,
    /// Replace fields that already have a value.
    #[serde(default)]
    pub overwrite: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BatchEnrichRequest {
    fn default() -> Self {
        Self {
            book_ids: None,
            only_unenriched: true,
            overwrite: false,
        }
    }
}

trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for i64 {
    fn is_blank(&self) -> bool {
        false
    }
}

fn merge_field<T: Blank + Clone>(
    name: &str,
    current: &mut Option<T>,
    fetched: Option<&T>,
    overwrite: bool,
    updated: &mut Vec<String>,
) {
    let Some(value) = fetched else {
        return;
    };
    if overwrite || current.as_ref().is_none_or(Blank::is_blank) {
        *current = Some(value.clone());
        updated.push(name.to_string());
    }
}

/// Merge fetched metadata into a book and link subject tags.
///
/// Only blank fields are written unless `overwrite` is set.
pub(crate) fn apply_metadata(
    conn: &Connection,
    book: &mut Book,
    metadata: &Metadata,
    overwrite: bool,
) -> Result<EnrichResult> {
    let mut fields_updated = Vec::new();

    merge_field("description", &mut book.description, metadata.description.as_ref(), overwrite, &mut fields_updated);
    merge_field("cover_url", &mut book.cover_url, metadata.cover_url.as_ref(), overwrite, &mut fields_updated);
    merge_field("page_count", &mut book.page_count, metadata.page_count.as_ref(), overwrite, &mut fields_updated);
    merge_field("publisher", &mut book.publisher, metadata.publisher.as_ref(), overwrite, &mut fields_updated);
    merge_field("year_published", &mut book.year_published, metadata.publish_year.as_ref(), overwrite, &mut fields_updated);
    merge_field("open_library_key", &mut book.open_library_key, metadata.open_library_key.as_ref(), overwrite, &mut fields_updated);

    if !fields_updated.is_empty() {
        *book = update_book_row(conn, book)?;
    }

    let mut tags_added = Vec::new();
    for subject in metadata.subjects.iter().take(MAX_SUBJECT_TAGS) {
        let name = subject.trim().to_lowercase();
        if name.is_empty() || name.chars().count() > MAX_TAG_LEN {
            continue;
        }
        let (tag, _) = get_or_create_tag(conn, &name)?;
        if link_tag(conn, book.id, tag.id)? {
            tags_added.push(tag.name);
        }
    }

    Ok(EnrichResult {
        book_id: book.id,
        enriched: !fields_updated.is_empty() || !tags_added.is_empty(),
        fields_updated,
        tags_added,
        error: None,
    })
}

async fn fetch_for(client: &OpenLibraryClient, book: &Book) -> Option<Metadata> {
    client
        .fetch_metadata(
            book.isbn.as_deref(),
            book.isbn13.as_deref(),
            Some(&book.title),
            Some(&book.author),
        )
        .await
}

/// Fetch metadata for one book and merge it.
pub async fn enrich_book(
    db: &Database,
    client: &OpenLibraryClient,
    book_id: i64,
    overwrite: bool,
) -> Result<EnrichResult> {
    let book = db
        .get_book(book_id)?
        .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

    let Some(metadata) = fetch_for(client, &book).await else {
        tracing::info!(book_id, title = %book.title, "No metadata found");
        return Ok(EnrichResult::no_metadata(book_id));
    };

    let result = db.write(|tx| {
        let mut book = require_book(tx, book_id)?;
        apply_metadata(tx, &mut book, &metadata, overwrite)
    })?;

    tracing::info!(
        book_id,
        fields = result.fields_updated.len(),
        tags = result.tags_added.len(),
        "Book enriched"
    );
    Ok(result)
}

/// Enrich several books, one after the other.
pub async fn enrich_batch(
    db: &Database,
    client: &OpenLibraryClient,
    request: &BatchEnrichRequest,
) -> Result<BatchEnrichResult> {
    let ids = match &request.book_ids {
        Some(ids) if !ids.is_empty() => {
            let mut found = Vec::with_capacity(ids.len());
            for &book_id in ids {
                if db.get_book(book_id)?.is_some() && !found.contains(&book_id) {
                    found.push(book_id);
                }
            }
            found
        }
        _ => db.book_ids_for_enrichment(request.only_unenriched)?,
    };

    let mut batch = BatchEnrichResult {
        total: ids.len(),
        enriched: 0,
        failed: 0,
        results: Vec::with_capacity(ids.len()),
    };

    // One book at a time, never concurrently.
    for book_id in ids {
        let result = match enrich_book(db, client, book_id, request.overwrite).await {
            Ok(result) => result,
            Err(AppError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        if result.enriched {
            batch.enriched += 1;
        } else if result.error.is_some() {
            batch.failed += 1;
        }
        batch.results.push(result);
    }

    tracing::info!(
        total = batch.total,
        enriched = batch.enriched,
        failed = batch.failed,
        "Batch enrichment finished"
    );
    Ok(batch)
}

/// Create a book, optionally resolving its canonical title and author and
/// enriching it first. The insert and the merge commit together.
pub async fn create_book(
    db: &Database,
    client: &OpenLibraryClient,
    mut data: NewBook,
    resolve: bool,
    enrich: bool,
) -> Result<Book> {
    validate_new_book(&data)?;

    if resolve {
        let candidates = client.search_candidates(&data.title, Some(&data.author), 1).await;
        if let Some(best) = candidates.into_iter().next() {
            tracing::debug!(from = %data.title, to = %best.title, "Resolved canonical title");
            data.title = best.title;
            data.author = best.author;
            data.isbn = data.isbn.or(best.isbn);
            data.isbn13 = data.isbn13.or(best.isbn13);
            data.publisher = data.publisher.or(best.publisher);
            data.page_count = data.page_count.or(best.page_count);
            data.year_published = data.year_published.or(best.year_published);
            data.cover_url = data.cover_url.or(best.cover_url);
        }
    }

    let book_id = id::book_id(&data.title, &data.author);
    if db.get_book(book_id)?.is_some() {
        return Err(AppError::Conflict("Book already exists".to_string()));
    }

    let metadata = if enrich {
        client
            .fetch_metadata(
                data.isbn.as_deref(),
                data.isbn13.as_deref(),
                Some(&data.title),
                Some(&data.author),
            )
            .await
    } else {
        None
    };

    let book = db.write(|tx| {
        let mut book = insert_book(tx, book_id, &data, None)?;
        if let Some(metadata) = &metadata {
            apply_metadata(tx, &mut book, metadata, false)?;
        }
        Ok(book)
    })?;

    tracing::info!(book_id, title = %book.title, resolve, enrich, "Book created");
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenLibraryConfig;
    use crate::tests::spawn_fake_openlibrary;

    fn dune() -> NewBook {
        NewBook {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            ..Default::default()
        }
    }

    fn metadata() -> Metadata {
        Metadata {
            open_library_key: Some("/works/OL1W".to_string()),
            description: Some("Fetched description".to_string()),
            cover_url: Some("https://covers.example/1.jpg".to_string()),
            page_count: Some(612),
            publisher: Some("Chilton".to_string()),
            publish_year: Some(1965),
            subjects: vec!["Science Fiction".to_string()],
        }
    }

    fn client_for(base_url: &str) -> OpenLibraryClient {
        OpenLibraryClient::new(&OpenLibraryConfig {
            base_url: base_url.to_string(),
            covers_url: "https://covers.example".to_string(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_fills_only_blank_fields() {
        let db = Database::open_memory().unwrap();
        let mut data = dune();
        data.description = Some("Mine".to_string());
        data.publisher = Some("".to_string());
        let book = db.create_book(&data).unwrap();

        let result = db
            .write(|tx| {
                let mut book = require_book(tx, book.id)?;
                apply_metadata(tx, &mut book, &metadata(), false)
            })
            .unwrap();

        assert!(result.enriched);
        assert!(!result.fields_updated.contains(&"description".to_string()));
        assert!(result.fields_updated.contains(&"publisher".to_string()));
        assert!(result.fields_updated.contains(&"page_count".to_string()));

        let stored = db.get_book(book.id).unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("Mine"));
        assert_eq!(stored.publisher.as_deref(), Some("Chilton"));
        assert_eq!(stored.open_library_key.as_deref(), Some("/works/OL1W"));
    }

    #[test]
    fn test_overwrite_replaces_populated_fields() {
        let db = Database::open_memory().unwrap();
        let mut data = dune();
        data.description = Some("Mine".to_string());
        let book = db.create_book(&data).unwrap();

        let result = db
            .write(|tx| {
                let mut book = require_book(tx, book.id)?;
                apply_metadata(tx, &mut book, &metadata(), true)
            })
            .unwrap();

        assert!(result.fields_updated.contains(&"description".to_string()));
        let stored = db.get_book(book.id).unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("Fetched description"));
    }

    #[test]
    fn test_subject_tags() {
        let db = Database::open_memory().unwrap();
        let book = db.create_book(&dune()).unwrap();
        let fetched = Metadata {
            subjects: vec![
                "  Science Fiction ".to_string(),
                "science fiction".to_string(),
                "   ".to_string(),
                "x".repeat(101),
                "Adventure".to_string(),
            ],
            ..Default::default()
        };

        let result = db
            .write(|tx| {
                let mut book = require_book(tx, book.id)?;
                apply_metadata(tx, &mut book, &fetched, false)
            })
            .unwrap();

        assert!(result.fields_updated.is_empty());
        assert_eq!(result.tags_added, vec!["science fiction", "adventure"]);
        assert!(result.enriched);

        // Already linked tags are not reported again.
        let again = db
            .write(|tx| {
                let mut book = require_book(tx, book.id)?;
                apply_metadata(tx, &mut book, &fetched, false)
            })
            .unwrap();
        assert!(again.tags_added.is_empty());
        assert!(!again.enriched);
    }

    #[test]
    fn test_only_first_ten_subjects() {
        let db = Database::open_memory().unwrap();
        let book = db.create_book(&dune()).unwrap();
        let fetched = Metadata {
            subjects: (0..15).map(|i| format!("subject {i}")).collect(),
            ..Default::default()
        };

        let result = db
            .write(|tx| {
                let mut book = require_book(tx, book.id)?;
                apply_metadata(tx, &mut book, &fetched, false)
            })
            .unwrap();
        assert_eq!(result.tags_added.len(), 10);
    }

    #[tokio::test]
    async fn test_enrich_book_by_isbn() {
        let base = spawn_fake_openlibrary().await;
        let db = Database::open_memory().unwrap();
        let mut data = dune();
        data.isbn13 = Some("9780441172719".to_string());
        let book = db.create_book(&data).unwrap();

        let result = enrich_book(&db, &client_for(&base), book.id, false).await.unwrap();
        assert!(result.enriched);
        assert!(result.error.is_none());
        assert!(result.tags_added.contains(&"science fiction".to_string()));

        let stored = db.get_book(book.id).unwrap().unwrap();
        assert_eq!(stored.open_library_key.as_deref(), Some("/works/OL893415W"));
        assert_eq!(stored.year_published, Some(2005));
    }

    #[tokio::test]
    async fn test_enrich_book_without_match() {
        let base = spawn_fake_openlibrary().await;
        let db = Database::open_memory().unwrap();
        let book = db
            .create_book(&NewBook {
                title: "Obscure Pamphlet".to_string(),
                author: "Nobody".to_string(),
                ..Default::default()
            })
            .unwrap();

        let result = enrich_book(&db, &client_for(&base), book.id, false).await.unwrap();
        assert!(!result.enriched);
        assert_eq!(result.error.as_deref(), Some("No metadata found"));
    }

    #[tokio::test]
    async fn test_enrich_batch_only_unenriched() {
        let base = spawn_fake_openlibrary().await;
        let client = client_for(&base);
        let db = Database::open_memory().unwrap();
        let dune = db.create_book(&dune()).unwrap();
        db.create_book(&NewBook {
            title: "Obscure Pamphlet".to_string(),
            author: "Nobody".to_string(),
            ..Default::default()
        })
        .unwrap();

        let first = enrich_batch(&db, &client, &BatchEnrichRequest::default()).await.unwrap();
        assert_eq!(first.total, 2);
        assert_eq!(first.enriched, 1);
        assert_eq!(first.failed, 1);
        assert_eq!(first.results.len(), 2);

        // Dune now has a key and drops out of the default selection.
        let second = enrich_batch(&db, &client, &BatchEnrichRequest::default()).await.unwrap();
        assert_eq!(second.total, 1);
        assert!(second.results.iter().all(|r| r.book_id != dune.id));

        let explicit = enrich_batch(
            &db,
            &client,
            &BatchEnrichRequest {
                book_ids: Some(vec![dune.id, 42]),
                only_unenriched: true,
                overwrite: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(explicit.total, 1);
    }

    #[tokio::test]
    async fn test_create_book_resolve_and_enrich() {
        let base = spawn_fake_openlibrary().await;
        let client = client_for(&base);
        let db = Database::open_memory().unwrap();

        let data = NewBook {
            title: "dune".to_string(),
            author: "herbert".to_string(),
            ..Default::default()
        };
        let book = create_book(&db, &client, data, true, true).await.unwrap();

        // Canonical title and author come from the first search candidate.
        assert_eq!(book.title, "Dune");
        assert_eq!(book.author, "Frank Herbert");
        assert_eq!(book.id, id::book_id("Dune", "Frank Herbert"));
        assert_eq!(book.isbn13.as_deref(), Some("9780441172719"));
        assert_eq!(book.open_library_key.as_deref(), Some("/works/OL893415W"));

        let again = create_book(
            &db,
            &client,
            NewBook {
                title: "DUNE".to_string(),
                author: "frank herbert".to_string(),
                ..Default::default()
            },
            false,
            false,
        )
        .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }
}

//! Open Library metadata client.
//!
//! Books are looked up by ISBN (edition record, then its work record) or, when
//! no ISBN is known, by a title/author search whose results are scored. Every
//! upstream failure is logged and collapses into "no match": callers never
//! see a network error.

use crate::config::OpenLibraryConfig;
use crate::error::{AppError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

const USER_AGENT: &str = concat!("shelflife/", env!("CARGO_PKG_VERSION"));

/// Search results scored when looking a book up by title and author.
const SEARCH_LIMIT: u32 = 5;

/// Subjects kept from a work record.
const MAX_SUBJECTS: usize = 20;

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[0-9]{3}|20[0-9]{2})\b").expect("year pattern is valid"));

/// Normalized metadata for one book.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    /// Work key, e.g. `/works/OL893415W`.
    pub open_library_key: Option<String>,
    /// Work description.
    pub description: Option<String>,
    /// Large cover image URL.
    pub cover_url: Option<String>,
    /// Page count.
    pub page_count: Option<i64>,
    /// First listed publisher.
    pub publisher: Option<String>,
    /// Publication year.
    pub publish_year: Option<i64>,
    /// Topical subjects, at most 20.
    pub subjects: Vec<String>,
}

/// A search hit offered for disambiguation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Title as Open Library has it.
    pub title: String,
    /// First listed author.
    pub author: String,
    /// Work key.
    pub open_library_key: Option<String>,
    /// Large cover image URL.
    pub cover_url: Option<String>,
    /// First 10-digit ISBN.
    pub isbn: Option<String>,
    /// First 13-digit ISBN.
    pub isbn13: Option<String>,
    /// First listed publisher.
    pub publisher: Option<String>,
    /// First publication year.
    pub year_published: Option<i64>,
    /// Median page count across editions.
    pub page_count: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeyRef {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct Edition {
    number_of_pages: Option<i64>,
    #[serde(default)]
    publishers: Vec<String>,
    publish_date: Option<String>,
    #[serde(default)]
    works: Vec<KeyRef>,
}

/// Work descriptions are either a bare string or a typed text object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Description {
    Text(String),
    Typed { value: String },
}

impl Description {
    fn into_text(self) -> String {
        match self {
            Description::Text(text) | Description::Typed { value: text } => text,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Work {
    description: Option<Description>,
    #[serde(default)]
    subjects: Vec<String>,
}

/// One document of a `search.json` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchDoc {
    /// Work key, with or without the `/works/` prefix.
    pub key: Option<String>,
    /// Title.
    pub title: Option<String>,
    /// Authors.
    #[serde(default)]
    pub author_name: Vec<String>,
    /// Cover id.
    pub cover_i: Option<i64>,
    /// Median page count.
    pub number_of_pages_median: Option<i64>,
    /// Publishers.
    #[serde(default)]
    pub publisher: Vec<String>,
    /// Subjects.
    #[serde(default)]
    pub subject: Vec<String>,
    /// ISBNs of all editions, both lengths mixed.
    #[serde(default)]
    pub isbn: Vec<String>,
    /// First publication year.
    pub first_publish_year: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

/// First plausible 4-digit year (1000 to 2099) in a freeform date.
pub fn extract_year(publish_date: Option<&str>) -> Option<i64> {
    let captures = YEAR_RE.captures(publish_date?)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Prefix a bare search key with `/works/`.
pub fn work_key(key: &str) -> String {
    if key.starts_with("/works/") {
        key.to_string()
    } else {
        format!("/works/{}", key.trim_start_matches('/'))
    }
}

/// Score search documents against a title and author, returning the best.
///
/// +10 exact title, else +5 when either title contains the other; +5 when an
/// author matches by containment; +1 each for a cover and a page count.
/// Documents scoring zero never win; ties go to the earlier document.
pub fn pick_best_match<'a>(docs: &'a [SearchDoc], title: &str, author: &str) -> Option<&'a SearchDoc> {
    let title = title.trim().to_lowercase();
    let author = author.trim().to_lowercase();

    let mut best: Option<(u32, &SearchDoc)> = None;
    for doc in docs {
        let doc_title = doc.title.as_deref().unwrap_or_default().trim().to_lowercase();
        let mut score = 0;

        if doc_title == title {
            score += 10;
        } else if doc_title.contains(&title) || title.contains(&doc_title) {
            score += 5;
        }

        let author_match = doc.author_name.iter().any(|a| {
            let a = a.to_lowercase();
            a.contains(&author) || author.contains(&a)
        });
        if author_match {
            score += 5;
        }

        if doc.cover_i.is_some_and(|c| c != 0) {
            score += 1;
        }
        if doc.number_of_pages_median.is_some_and(|p| p != 0) {
            score += 1;
        }

        if score > 0 && best.is_none_or(|(s, _)| score > s) {
            best = Some((score, doc));
        }
    }

    best.map(|(_, doc)| doc)
}

/// HTTP client for the Open Library API.
#[derive(Debug, Clone)]
pub struct OpenLibraryClient {
    http: reqwest::Client,
    base_url: String,
    covers_url: String,
}

impl OpenLibraryClient {
    /// Create a client from configuration.
    pub fn new(config: &OpenLibraryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            covers_url: config.covers_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET a JSON document; `None` on any failure or non-200 status.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Option<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Querying Open Library");

        let response = match self.http.get(&url).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Open Library request failed");
                return None;
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(url = %url, status = status.as_u16(), "Open Library returned an error status");
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Unreadable Open Library response");
                None
            }
        }
    }

    async fn fetch_work(&self, key: &str) -> Option<Work> {
        self.get_json(&format!("{}.json", work_key(key)), &[]).await
    }

    /// Look a book up by ISBN: edition record, then the work it belongs to.
    pub async fn fetch_by_isbn(&self, isbn: &str) -> Option<Metadata> {
        let edition: Edition = self.get_json(&format!("/isbn/{}.json", isbn), &[]).await?;

        let mut metadata = Metadata {
            page_count: edition.number_of_pages,
            publisher: edition.publishers.into_iter().next(),
            publish_year: extract_year(edition.publish_date.as_deref()),
            cover_url: Some(format!("{}/b/isbn/{}-L.jpg", self.covers_url, isbn)),
            ..Default::default()
        };

        if let Some(work) = edition.works.into_iter().next() {
            let key = work_key(&work.key);
            if let Some(work) = self.fetch_work(&key).await {
                metadata.description = work.description.map(Description::into_text);
                metadata.subjects = work.subjects.into_iter().take(MAX_SUBJECTS).collect();
            }
            metadata.open_library_key = Some(key);
        }

        tracing::debug!(isbn, key = ?metadata.open_library_key, "Open Library ISBN match");
        Some(metadata)
    }

    /// Search by title and author and take the best-scoring document.
    pub async fn fetch_by_title_author(&self, title: &str, author: &str) -> Option<Metadata> {
        let response: SearchResponse = self
            .get_json(
                "/search.json",
                &[
                    ("title", title.to_string()),
                    ("author", author.to_string()),
                    ("limit", SEARCH_LIMIT.to_string()),
                ],
            )
            .await?;

        let best = pick_best_match(&response.docs, title, author)?;
        let key = work_key(best.key.as_deref()?);

        let mut metadata = Metadata {
            open_library_key: Some(key.clone()),
            subjects: best.subject.iter().take(MAX_SUBJECTS).cloned().collect(),
            cover_url: best
                .cover_i
                .filter(|c| *c != 0)
                .map(|c| format!("{}/b/id/{}-L.jpg", self.covers_url, c)),
            page_count: best.number_of_pages_median.filter(|p| *p != 0),
            publisher: best.publisher.first().cloned(),
            ..Default::default()
        };

        if let Some(work) = self.fetch_work(&key).await {
            metadata.description = work.description.map(Description::into_text);
        }

        tracing::debug!(title, author, key = %key, "Open Library search match");
        Some(metadata)
    }

    /// ISBN-13 first, then ISBN-10, then title and author.
    pub async fn fetch_metadata(
        &self,
        isbn: Option<&str>,
        isbn13: Option<&str>,
        title: Option<&str>,
        author: Option<&str>,
    ) -> Option<Metadata> {
        for candidate in [isbn13, isbn].into_iter().flatten() {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }
            if let Some(metadata) = self.fetch_by_isbn(candidate).await {
                return Some(metadata);
            }
        }

        match (title, author) {
            (Some(title), Some(author)) if !title.is_empty() && !author.is_empty() => {
                self.fetch_by_title_author(title, author).await
            }
            _ => None,
        }
    }

    /// Search results as candidates, in Open Library's order. Documents
    /// without a title or author are dropped.
    pub async fn search_candidates(&self, title: &str, author: Option<&str>, limit: u32) -> Vec<Candidate> {
        let mut query = vec![("title", title.to_string())];
        if let Some(author) = author.filter(|a| !a.trim().is_empty()) {
            query.push(("author", author.to_string()));
        }
        query.push(("limit", limit.to_string()));

        let Some(response) = self.get_json::<SearchResponse>("/search.json", &query).await else {
            return Vec::new();
        };

        response
            .docs
            .into_iter()
            .filter_map(|doc| self.to_candidate(doc))
            .collect()
    }

    fn to_candidate(&self, doc: SearchDoc) -> Option<Candidate> {
        let title = doc.title?;
        let author = doc.author_name.into_iter().next()?;

        Some(Candidate {
            title,
            author,
            open_library_key: doc.key.as_deref().map(work_key),
            cover_url: doc
                .cover_i
                .filter(|c| *c != 0)
                .map(|c| format!("{}/b/id/{}-L.jpg", self.covers_url, c)),
            isbn: doc.isbn.iter().find(|i| i.len() == 10).cloned(),
            isbn13: doc.isbn.iter().find(|i| i.len() == 13).cloned(),
            publisher: doc.publisher.into_iter().next(),
            year_published: doc.first_publish_year,
            page_count: doc.number_of_pages_median.filter(|p| *p != 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::spawn_fake_openlibrary;

    fn doc(key: &str, title: &str, author: &str) -> SearchDoc {
        SearchDoc {
            key: Some(key.to_string()),
            title: Some(title.to_string()),
            author_name: vec![author.to_string()],
            ..Default::default()
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
    fn test_extract_year() {
        assert_eq!(extract_year(Some("March 1, 2004")), Some(2004));
        assert_eq!(extract_year(Some("1965")), Some(1965));
        assert_eq!(extract_year(Some("c. 850 or 2150")), None);
        assert_eq!(extract_year(Some("Unknown")), None);
        assert_eq!(extract_year(Some("")), None);
        assert_eq!(extract_year(None), None);
    }

    #[test]
    fn test_work_key() {
        assert_eq!(work_key("OL1W"), "/works/OL1W");
        assert_eq!(work_key("/works/OL1W"), "/works/OL1W");
    }

    #[test]
    fn test_pick_best_match_exact_title() {
        let mut dune = doc("OL1", "Dune", "Frank Herbert");
        dune.cover_i = Some(123);
        let docs = vec![doc("OL2", "Dune Messiah", "Frank Herbert"), dune];

        let best = pick_best_match(&docs, "Dune", "Frank Herbert").unwrap();
        assert_eq!(best.key.as_deref(), Some("OL1"));
    }

    #[test]
    fn test_pick_best_match_partial_title() {
        let docs = vec![doc("OL1", "The Complete Dune Saga", "Frank Herbert")];
        let best = pick_best_match(&docs, "Dune", "Frank Herbert").unwrap();
        assert_eq!(best.key.as_deref(), Some("OL1"));
    }

    #[test]
    fn test_pick_best_match_ties_keep_first() {
        let docs = vec![
            doc("OL1", "Dune", "Frank Herbert"),
            doc("OL2", "Dune", "Frank Herbert"),
        ];
        let best = pick_best_match(&docs, "dune", "frank herbert").unwrap();
        assert_eq!(best.key.as_deref(), Some("OL1"));
    }

    #[test]
    fn test_pick_best_match_no_match() {
        let docs = vec![doc("OL1", "Completely Different Book", "Other Author")];
        assert!(pick_best_match(&docs, "Dune", "Frank Herbert").is_none());
        assert!(pick_best_match(&[], "Dune", "Frank Herbert").is_none());
    }

    #[test]
    fn test_description_shapes() {
        let plain: Work = serde_json::from_str(r#"{"description": "A plain one."}"#).unwrap();
        assert_eq!(plain.description.unwrap().into_text(), "A plain one.");

        let typed: Work = serde_json::from_str(
            r#"{"description": {"type": "/type/text", "value": "A typed one."}}"#,
        )
        .unwrap();
        assert_eq!(typed.description.unwrap().into_text(), "A typed one.");
    }

    #[tokio::test]
    async fn test_fetch_by_isbn() {
        let base = spawn_fake_openlibrary().await;
        let client = client_for(&base);

        let metadata = client.fetch_by_isbn("9780441172719").await.unwrap();
        assert_eq!(metadata.open_library_key.as_deref(), Some("/works/OL893415W"));
        assert_eq!(
            metadata.description.as_deref(),
            Some("Set on the desert planet Arrakis...")
        );
        assert_eq!(metadata.page_count, Some(688));
        assert_eq!(metadata.publisher.as_deref(), Some("Ace Books"));
        assert_eq!(metadata.publish_year, Some(2005));
        assert_eq!(
            metadata.cover_url.as_deref(),
            Some("https://covers.example/b/isbn/9780441172719-L.jpg")
        );
        assert!(metadata.subjects.contains(&"Science Fiction".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_by_isbn_not_found() {
        let base = spawn_fake_openlibrary().await;
        assert!(client_for(&base).fetch_by_isbn("0000000000").await.is_none());
    }

    #[tokio::test]
    async fn test_network_error_is_no_match() {
        // Nothing listens on the discard port.
        let client = client_for("http://127.0.0.1:9");
        assert!(client.fetch_by_isbn("9780441172719").await.is_none());
        assert!(client.search_candidates("Dune", None, 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_by_title_author() {
        let base = spawn_fake_openlibrary().await;
        let metadata = client_for(&base)
            .fetch_by_title_author("Dune", "Frank Herbert")
            .await
            .unwrap();

        assert_eq!(metadata.open_library_key.as_deref(), Some("/works/OL1W"));
        assert_eq!(metadata.description.as_deref(), Some("A classic."));
        assert_eq!(metadata.page_count, Some(612));
        assert_eq!(
            metadata.cover_url.as_deref(),
            Some("https://covers.example/b/id/12345-L.jpg")
        );
    }

    #[tokio::test]
    async fn test_fetch_metadata_prefers_isbn() {
        let base = spawn_fake_openlibrary().await;
        let metadata = client_for(&base)
            .fetch_metadata(None, Some("9780441172719"), Some("Dune"), Some("Frank Herbert"))
            .await
            .unwrap();
        assert_eq!(metadata.open_library_key.as_deref(), Some("/works/OL893415W"));
    }

    #[tokio::test]
    async fn test_fetch_metadata_falls_back_to_search() {
        let base = spawn_fake_openlibrary().await;
        let metadata = client_for(&base)
            .fetch_metadata(Some("0000000000"), None, Some("Dune"), Some("Frank Herbert"))
            .await
            .unwrap();
        assert_eq!(metadata.open_library_key.as_deref(), Some("/works/OL1W"));

        let none = client_for(&base)
            .fetch_metadata(None, None, Some("Nothing Like It"), Some("Nobody"))
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_search_candidates() {
        let base = spawn_fake_openlibrary().await;
        let candidates = client_for(&base)
            .search_candidates("dune", Some("herbert"), 5)
            .await;

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].title, "Dune Messiah");
        let dune = &candidates[0];
        assert_eq!(dune.title, "Dune");
        assert_eq!(dune.author, "Frank Herbert");
        assert_eq!(dune.open_library_key.as_deref(), Some("/works/OL1W"));
        assert_eq!(dune.isbn.as_deref(), Some("0441172717"));
        assert_eq!(dune.isbn13.as_deref(), Some("9780441172719"));
        assert_eq!(dune.year_published, Some(1965));
        assert_eq!(dune.publisher.as_deref(), Some("Chilton Books"));
    }
}

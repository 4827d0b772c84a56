//! Tool catalogue and dispatch.
//!
//! Books, shelves and tags are addressed by name; their identifiers are
//! derived locally and the matching API routes are called.

use super::client::{ApiClient, ToolError, ToolResult, is_error, segment};
use crate::db::is_reserved_exclusive;
use crate::id;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Page size used when paging through every review.
const REVIEW_PAGE: usize = 200;

/// One tool as advertised to clients.
pub struct ToolSpec {
    /// Tool name.
    pub name: &'static str,
    /// What the tool does.
    pub description: &'static str,
    schema: fn() -> Value,
}

impl ToolSpec {
    /// JSON schema of the tool's arguments.
    pub fn input_schema(&self) -> Value {
        (self.schema)()
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn book_schema() -> Value {
    object(
        json!({
            "title": { "type": "string" },
            "author": { "type": "string" },
        }),
        &["title", "author"],
    )
}

/// Every tool the server offers.
pub fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "search_books",
            description: "Search your book library by title, author, tag, or free text query.",
            schema: || {
                object(
                    json!({
                        "query": { "type": "string" },
                        "author": { "type": "string" },
                        "tag": { "type": "string" },
                        "limit": { "type": "integer", "default": 50 },
                        "offset": { "type": "integer", "default": 0 },
                    }),
                    &[],
                )
            },
        },
        ToolSpec {
            name: "get_book",
            description: "Get full details for a book including tags, shelves, and review.",
            schema: book_schema,
        },
        ToolSpec {
            name: "lookup_book",
            description: "Look up candidate editions on Open Library before adding a book.",
            schema: || {
                object(
                    json!({
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "limit": { "type": "integer", "default": 5 },
                    }),
                    &["title"],
                )
            },
        },
        ToolSpec {
            name: "add_book",
            description: "Add a book to the library. Resolves against Open Library for canonical \
                          metadata, enriches with description, cover and subject tags. Optionally \
                          place it on a shelf, created if it doesn't exist.",
            schema: || {
                object(
                    json!({
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "shelf": { "type": "string" },
                    }),
                    &["title", "author"],
                )
            },
        },
        ToolSpec {
            name: "resolve_book",
            description: "Enrich an existing book by matching it against Open Library for \
                          metadata, cover art, and subject tags.",
            schema: book_schema,
        },
        ToolSpec {
            name: "shelve_book",
            description: "Put a book on a shelf (e.g. 'to-read', 'currently-reading', 'read'). \
                          Creates the shelf if it doesn't exist.",
            schema: || {
                object(
                    json!({
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "shelf": { "type": "string" },
                    }),
                    &["title", "author", "shelf"],
                )
            },
        },
        ToolSpec {
            name: "browse_shelf",
            description: "List all shelves (no argument) or get books on a specific shelf.",
            schema: || object(json!({ "shelf_name": { "type": "string" } }), &[]),
        },
        ToolSpec {
            name: "review_book",
            description: "Rate and/or review a book. Creates a new review or updates the \
                          existing one. Rating is 0-5.",
            schema: || {
                object(
                    json!({
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "rating": { "type": "number" },
                        "review_text": { "type": "string" },
                    }),
                    &["title", "author"],
                )
            },
        },
        ToolSpec {
            name: "get_reviews",
            description: "List book reviews, optionally filtered by minimum rating.",
            schema: || {
                object(
                    json!({
                        "min_rating": { "type": "number" },
                        "limit": { "type": "integer", "default": 50 },
                    }),
                    &[],
                )
            },
        },
        ToolSpec {
            name: "tag_books",
            description: "Apply a tag to one or more books. Each book needs 'title' and \
                          'author'. Reports which books were tagged and which were not found.",
            schema: || {
                object(
                    json!({
                        "tag": { "type": "string" },
                        "books": {
                            "type": "array",
                            "items": book_schema(),
                        },
                    }),
                    &["tag", "books"],
                )
            },
        },
        ToolSpec {
            name: "browse_tag",
            description: "List all tags (no argument) or get books with a specific tag.",
            schema: || object(json!({ "tag_name": { "type": "string" } }), &[]),
        },
        ToolSpec {
            name: "reading_profile",
            description: "Get an overview of reading interests: total books, shelves, top tags, \
                          rating distribution, and recently added books.",
            schema: || object(json!({}), &[]),
        },
        ToolSpec {
            name: "start_reading",
            description: "Start a reading session for a book (defaults to today).",
            schema: || {
                object(
                    json!({
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "started_at": { "type": "string", "format": "date" },
                    }),
                    &["title", "author"],
                )
            },
        },
        ToolSpec {
            name: "finish_reading",
            description: "Finish the active reading session of a book (defaults to today).",
            schema: || {
                object(
                    json!({
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "finished_at": { "type": "string", "format": "date" },
                    }),
                    &["title", "author"],
                )
            },
        },
        ToolSpec {
            name: "log_reading_progress",
            description: "Log progress on the active reading: an absolute page, pages read \
                          since the last entry, or a start_page/end_page range.",
            schema: || {
                object(
                    json!({
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "page": { "type": "integer" },
                        "pages_read": { "type": "integer" },
                        "start_page": { "type": "integer" },
                        "end_page": { "type": "integer" },
                        "progress_date": { "type": "string", "format": "date" },
                    }),
                    &["title", "author"],
                )
            },
        },
        ToolSpec {
            name: "get_reading_history",
            description: "List every reading session of a book, newest first.",
            schema: book_schema,
        },
        ToolSpec {
            name: "import_goodreads",
            description: "Import a Goodreads library export from a CSV file path.",
            schema: || object(json!({ "file_path": { "type": "string" } }), &["file_path"]),
        },
        ToolSpec {
            name: "import_goodreads_csv",
            description: "Import a Goodreads library export given as CSV content.",
            schema: || object(json!({ "csv_content": { "type": "string" } }), &["csv_content"]),
        },
    ]
}

// ============================================================================
// ARGUMENTS
// ============================================================================

fn parse<T: DeserializeOwned>(arguments: Value) -> ToolResult<T> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct BookArgs {
    title: String,
    author: String,
}

impl BookArgs {
    fn book_id(&self) -> i64 {
        id::book_id(&self.title, &self.author)
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: Option<String>,
    author: Option<String>,
    tag: Option<String>,
    #[serde(default = "default_list_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_list_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
struct LookupArgs {
    title: String,
    author: Option<String>,
    #[serde(default = "default_lookup_limit")]
    limit: i64,
}

fn default_lookup_limit() -> i64 {
    5
}

#[derive(Debug, Deserialize)]
struct AddBookArgs {
    title: String,
    author: String,
    shelf: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShelveArgs {
    title: String,
    author: String,
    shelf: String,
}

#[derive(Debug, Default, Deserialize)]
struct BrowseShelfArgs {
    shelf_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewArgs {
    title: String,
    author: String,
    rating: Option<f64>,
    review_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GetReviewsArgs {
    min_rating: Option<f64>,
    #[serde(default = "default_list_limit")]
    limit: i64,
}

#[derive(Debug, Deserialize)]
struct TagBooksArgs {
    tag: String,
    books: Vec<BookArgs>,
}

#[derive(Debug, Default, Deserialize)]
struct BrowseTagArgs {
    tag_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartArgs {
    title: String,
    author: String,
    started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinishArgs {
    title: String,
    author: String,
    finished_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressArgs {
    title: String,
    author: String,
    page: Option<i64>,
    pages_read: Option<i64>,
    start_page: Option<i64>,
    end_page: Option<i64>,
    progress_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportFileArgs {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct ImportCsvArgs {
    csv_content: String,
}

/// JSON object of the fields that are set.
fn body<const N: usize>(fields: [(&str, Option<Value>); N]) -> Value {
    let map: Map<String, Value> = fields
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect();
    Value::Object(map)
}

/// An empty list when the API rejected the call.
fn list_or_empty(value: Value) -> Value {
    if is_error(&value) { json!([]) } else { value }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Run one tool.
pub async fn call_tool(client: &ApiClient, name: &str, arguments: Value) -> ToolResult<Value> {
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other,
    };

    match name {
        "search_books" => search_books(client, parse(arguments)?).await,
        "get_book" => get_book(client, parse(arguments)?).await,
        "lookup_book" => lookup_book(client, parse(arguments)?).await,
        "add_book" => add_book(client, parse(arguments)?).await,
        "resolve_book" => resolve_book(client, parse(arguments)?).await,
        "shelve_book" => shelve_book(client, parse(arguments)?).await,
        "browse_shelf" => browse_shelf(client, parse(arguments)?).await,
        "review_book" => review_book(client, parse(arguments)?).await,
        "get_reviews" => get_reviews(client, parse(arguments)?).await,
        "tag_books" => tag_books(client, parse(arguments)?).await,
        "browse_tag" => browse_tag(client, parse(arguments)?).await,
        "reading_profile" => reading_profile(client).await,
        "start_reading" => start_reading(client, parse(arguments)?).await,
        "finish_reading" => finish_reading(client, parse(arguments)?).await,
        "log_reading_progress" => log_reading_progress(client, parse(arguments)?).await,
        "get_reading_history" => get_reading_history(client, parse(arguments)?).await,
        "import_goodreads" => import_goodreads(client, parse(arguments)?).await,
        "import_goodreads_csv" => import_goodreads_csv(client, parse(arguments)?).await,
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

async fn search_books(client: &ApiClient, args: SearchArgs) -> ToolResult<Value> {
    let mut query = vec![
        ("limit", args.limit.to_string()),
        ("offset", args.offset.to_string()),
    ];
    for (key, value) in [("q", args.query), ("author", args.author), ("tag", args.tag)] {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            query.push((key, value));
        }
    }
    Ok(list_or_empty(client.get("/api/books", &query).await?))
}

async fn get_book(client: &ApiClient, args: BookArgs) -> ToolResult<Value> {
    let path = format!(
        "/api/books/by-name/{}/{}",
        segment(&args.title),
        segment(&args.author)
    );
    client.get(&path, &[]).await
}

async fn lookup_book(client: &ApiClient, args: LookupArgs) -> ToolResult<Value> {
    let mut query = vec![("title", args.title), ("limit", args.limit.to_string())];
    if let Some(author) = args.author {
        query.push(("author", author));
    }
    Ok(list_or_empty(client.get("/api/books/lookup", &query).await?))
}

// ============================================================================
// LIBRARY
// ============================================================================

/// Get or create the shelf named `name`, returning its id.
async fn ensure_shelf(client: &ApiClient, name: &str) -> ToolResult<i64> {
    let shelf_id = id::name_id(name);
    let existing = client.get(&format!("/api/shelves/{shelf_id}"), &[]).await?;
    if is_error(&existing) {
        let created = client
            .post(
                "/api/shelves",
                &[],
                Some(json!({ "name": name, "is_exclusive": is_reserved_exclusive(name) })),
            )
            .await?;
        if is_error(&created) {
            tracing::warn!(shelf = %name, detail = %created["detail"], "Shelf creation rejected");
        }
    }
    Ok(shelf_id)
}

async fn add_book(client: &ApiClient, args: AddBookArgs) -> ToolResult<Value> {
    let query = [("resolve", "true".to_string()), ("enrich", "true".to_string())];
    let book = client
        .post(
            "/api/books",
            &query,
            Some(json!({ "title": args.title, "author": args.author })),
        )
        .await?;
    if is_error(&book) {
        return Ok(book);
    }

    if let (Some(shelf), Some(book_id)) = (args.shelf, book["id"].as_i64()) {
        let shelf_id = ensure_shelf(client, &shelf).await?;
        client
            .post(&format!("/api/shelves/{shelf_id}/books/{book_id}"), &[], None)
            .await?;
    }
    Ok(book)
}

async fn resolve_book(client: &ApiClient, args: BookArgs) -> ToolResult<Value> {
    client
        .post(&format!("/api/books/{}/enrich", args.book_id()), &[], None)
        .await
}

// ============================================================================
// SHELVES
// ============================================================================

async fn shelve_book(client: &ApiClient, args: ShelveArgs) -> ToolResult<Value> {
    let book_id = id::book_id(&args.title, &args.author);
    let shelf_id = ensure_shelf(client, &args.shelf).await?;
    client
        .post(&format!("/api/shelves/{shelf_id}/books/{book_id}"), &[], None)
        .await
}

async fn browse_shelf(client: &ApiClient, args: BrowseShelfArgs) -> ToolResult<Value> {
    match args.shelf_name.filter(|n| !n.is_empty()) {
        Some(name) => {
            client
                .get(&format!("/api/shelves/by-name/{}", segment(&name)), &[])
                .await
        }
        None => client.get("/api/shelves", &[]).await,
    }
}

// ============================================================================
// REVIEWS
// ============================================================================

async fn review_book(client: &ApiClient, args: ReviewArgs) -> ToolResult<Value> {
    let book_id = id::book_id(&args.title, &args.author);
    let body = body([
        ("rating", args.rating.map(Value::from)),
        ("review_text", args.review_text.map(Value::from)),
    ]);

    let created = client
        .post(&format!("/api/books/{book_id}/reviews"), &[], Some(body.clone()))
        .await?;
    if created["status"].as_u64() == Some(409) {
        let review_id = id::make_id([book_id.to_string()]);
        return client.put(&format!("/api/reviews/{review_id}"), body).await;
    }
    Ok(created)
}

async fn get_reviews(client: &ApiClient, args: GetReviewsArgs) -> ToolResult<Value> {
    let mut query = vec![("limit", args.limit.to_string())];
    if let Some(min_rating) = args.min_rating {
        query.push(("min_rating", min_rating.to_string()));
    }
    Ok(list_or_empty(client.get("/api/reviews", &query).await?))
}

// ============================================================================
// TAGS
// ============================================================================

async fn tag_books(client: &ApiClient, args: TagBooksArgs) -> ToolResult<Value> {
    let book_ids: Vec<i64> = args.books.iter().map(BookArgs::book_id).collect();
    let mut result = client
        .post(
            "/api/tags/books/batch",
            &[],
            Some(json!({ "tag": args.tag, "book_ids": book_ids })),
        )
        .await?;

    if let Some(not_found) = result.get("not_found").and_then(Value::as_array) {
        let missing: Vec<i64> = not_found.iter().filter_map(Value::as_i64).collect();
        let names: Vec<Value> = args
            .books
            .iter()
            .zip(&book_ids)
            .filter(|(_, book_id)| missing.contains(book_id))
            .map(|(book, _)| Value::from(format!("{} by {}", book.title, book.author)))
            .collect();
        result["not_found"] = Value::Array(names);
    }
    Ok(result)
}

async fn browse_tag(client: &ApiClient, args: BrowseTagArgs) -> ToolResult<Value> {
    let result = match args.tag_name.filter(|n| !n.is_empty()) {
        Some(name) => {
            client
                .get(&format!("/api/tags/by-name/{}/books", segment(&name)), &[])
                .await?
        }
        None => client.get("/api/tags", &[]).await?,
    };
    Ok(list_or_empty(result))
}

// ============================================================================
// PROFILE
// ============================================================================

async fn all_reviews(client: &ApiClient) -> ToolResult<Vec<Value>> {
    let mut reviews = Vec::new();
    let mut offset = 0;
    loop {
        let query = [
            ("limit", REVIEW_PAGE.to_string()),
            ("offset", offset.to_string()),
        ];
        let page = client.get("/api/reviews", &query).await?;
        let Some(batch) = page.as_array().filter(|b| !b.is_empty()) else {
            break;
        };
        let len = batch.len();
        reviews.extend(batch.iter().cloned());
        if len < REVIEW_PAGE {
            break;
        }
        offset += REVIEW_PAGE;
    }
    Ok(reviews)
}

fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

async fn reading_profile(client: &ApiClient) -> ToolResult<Value> {
    let stats = client.get("/api/books/stats", &[]).await?;
    let total_books = stats["total_books"].as_i64().unwrap_or(0);

    let recent_query = [
        ("limit", "5".to_string()),
        ("sort", "created_at".to_string()),
        ("order", "desc".to_string()),
    ];
    let recent = as_list(client.get("/api/books", &recent_query).await?);
    let shelves = as_list(client.get("/api/shelves", &[]).await?);
    let tags = as_list(client.get("/api/tags", &[]).await?);
    let reviews = all_reviews(client).await?;

    let mut rating_distribution: BTreeMap<String, u64> = BTreeMap::new();
    for review in &reviews {
        let rating = &review["rating"];
        if rating.as_f64().is_some_and(|r| r != 0.0) {
            *rating_distribution.entry(rating.to_string()).or_default() += 1;
        }
    }

    let mut tag_counts = Vec::with_capacity(tags.len());
    for tag in &tags {
        let Some(tag_id) = tag["id"].as_i64() else {
            continue;
        };
        let books = client.get(&format!("/api/tags/{tag_id}/books"), &[]).await?;
        if let Some(books) = books.as_array() {
            tag_counts.push((tag["name"].clone(), books.len()));
        }
    }
    tag_counts.sort_by(|a, b| b.1.cmp(&a.1));
    let top_tags: Vec<Value> = tag_counts
        .into_iter()
        .take(10)
        .map(|(name, count)| json!({ "name": name, "count": count }))
        .collect();

    let shelf_summaries: Vec<Value> = shelves
        .iter()
        .map(|s| json!({ "name": s["name"], "id": s["id"] }))
        .collect();
    let recent_books: Vec<Value> = recent
        .iter()
        .take(5)
        .map(|b| json!({ "title": b["title"], "author": b["author"] }))
        .collect();

    Ok(json!({
        "total_books": total_books,
        "total_reviews": reviews.len(),
        "shelves": shelf_summaries,
        "top_tags": top_tags,
        "rating_distribution": rating_distribution,
        "recent_books": recent_books,
    }))
}

// ============================================================================
// READING
// ============================================================================

async fn start_reading(client: &ApiClient, args: StartArgs) -> ToolResult<Value> {
    let book_id = id::book_id(&args.title, &args.author);
    let body = body([("started_at", args.started_at.map(Value::from))]);
    client
        .post(&format!("/api/books/{book_id}/start-reading"), &[], Some(body))
        .await
}

async fn finish_reading(client: &ApiClient, args: FinishArgs) -> ToolResult<Value> {
    let book_id = id::book_id(&args.title, &args.author);
    let body = body([("finished_at", args.finished_at.map(Value::from))]);
    client
        .put(&format!("/api/books/{book_id}/finish-reading"), body)
        .await
}

async fn log_reading_progress(client: &ApiClient, args: ProgressArgs) -> ToolResult<Value> {
    let book_id = id::book_id(&args.title, &args.author);
    let body = body([
        ("page", args.page.map(Value::from)),
        ("pages_read", args.pages_read.map(Value::from)),
        ("start_page", args.start_page.map(Value::from)),
        ("end_page", args.end_page.map(Value::from)),
        ("date", args.progress_date.map(Value::from)),
    ]);
    client
        .post(&format!("/api/books/{book_id}/reading/progress"), &[], Some(body))
        .await
}

async fn get_reading_history(client: &ApiClient, args: BookArgs) -> ToolResult<Value> {
    let result = client
        .get(&format!("/api/books/{}/readings", args.book_id()), &[])
        .await?;
    Ok(list_or_empty(result))
}

// ============================================================================
// IMPORT
// ============================================================================

async fn import_goodreads(client: &ApiClient, args: ImportFileArgs) -> ToolResult<Value> {
    let path = match args.file_path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| args.file_path.clone().into()),
        None => args.file_path.clone().into(),
    };

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read Goodreads export");
            return Ok(json!({
                "error": true,
                "detail": format!("File not found: {}", args.file_path),
            }));
        }
    };
    client
        .upload("/api/import/goodreads", "goodreads.csv", &content)
        .await
}

async fn import_goodreads_csv(client: &ApiClient, args: ImportCsvArgs) -> ToolResult<Value> {
    client
        .upload("/api/import/goodreads", "goodreads.csv", &args.csv_content)
        .await
}

//! HTTP request handlers.

use crate::db::{
    Book, BookDetail, BookFilter, BookReadings, BookUpdate, BulkBookTagResult, BulkTagResult,
    NewBook, NewShelf, ProgressInput, Reading, ReadingDetail, ReadingProgress, ReadingUpdate,
    Review, ReviewInput, ReviewWithBook, Shelf, ShelfUpdate, ShelfWithBooks, Tag,
};
use crate::enrich::{self, BatchEnrichRequest, BatchEnrichResult, EnrichResult};
use crate::error::{AppError, Result};
use crate::id;
use crate::import::{self, ImportResult};
use crate::openlibrary::Candidate;
use crate::server::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Multipart, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// JSON body whose rejections are reported as validation errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string whose rejections are reported as validation errors.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Path parameters whose rejections are reported as validation errors.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// Parse an optional JSON body; an empty body yields the default.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation(e.to_string()))
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if !(min..=max).contains(&value) {
        return Err(AppError::Validation(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(())
}

fn check_offset(offset: i64) -> Result<()> {
    if offset < 0 {
        return Err(AppError::Validation("offset must be >= 0".to_string()));
    }
    Ok(())
}

fn detail(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "detail": message.into() }))
}

// ============================================================================
// BOOKS
// ============================================================================

/// Total number of books.
pub async fn book_stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let total = state.db.count_books()?;
    Ok(Json(json!({ "total_books": total })))
}

/// Title search parameters.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    title: String,
    #[serde(default = "default_search_limit")]
    limit: i64,
}

fn default_search_limit() -> i64 {
    20
}

/// Case-insensitive partial title search.
pub async fn search_books(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> Result<Json<Vec<Book>>> {
    check_range("limit", params.limit, 1, 100)?;
    Ok(Json(state.db.search_books(&params.title, params.limit)?))
}

/// Filtered book listing.
pub async fn list_books(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<BookFilter>,
) -> Result<Json<Vec<Book>>> {
    check_range("limit", filter.limit, 1, 200)?;
    check_offset(filter.offset)?;
    Ok(Json(state.db.list_books(&filter)?))
}

/// Candidate lookup parameters.
#[derive(Debug, Deserialize)]
pub struct LookupParams {
    title: String,
    author: Option<String>,
    #[serde(default = "default_lookup_limit")]
    limit: i64,
}

fn default_lookup_limit() -> i64 {
    5
}

/// Open Library candidates for a title and optional author.
pub async fn lookup_book(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<LookupParams>,
) -> Result<Json<Vec<Candidate>>> {
    check_range("limit", params.limit, 1, 10)?;
    let candidates = state
        .openlibrary
        .search_candidates(&params.title, params.author.as_deref(), params.limit as u32)
        .await;
    Ok(Json(candidates))
}

/// A book addressed by title and author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRef {
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
}

/// A list of books addressed by name.
#[derive(Debug, Deserialize)]
pub struct BulkBookRequest {
    books: Vec<BookRef>,
}

impl BulkBookRequest {
    fn refs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.books
            .iter()
            .map(|b| (b.title.as_str(), b.author.as_str()))
    }
}

/// Details of several books by name.
pub async fn books_bulk(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BulkBookRequest>,
) -> Result<Json<Vec<BookDetail>>> {
    Ok(Json(state.db.get_book_details_by_name(request.refs())?))
}

/// Readings of several books by name.
pub async fn books_bulk_readings(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BulkBookRequest>,
) -> Result<Json<Vec<BookReadings>>> {
    Ok(Json(state.db.readings_by_name(request.refs())?))
}

/// Book detail by title and author.
pub async fn book_by_name(
    State(state): State<AppState>,
    ApiPath((title, author)): ApiPath<(String, String)>,
) -> Result<Json<BookDetail>> {
    let book_id = id::book_id(&title, &author);
    Ok(Json(state.db.get_book_detail(book_id)?))
}

/// Book detail.
pub async fn get_book(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
) -> Result<Json<BookDetail>> {
    Ok(Json(state.db.get_book_detail(book_id)?))
}

/// Creation flags.
#[derive(Debug, Default, Deserialize)]
pub struct CreateBookParams {
    #[serde(default)]
    resolve: bool,
    #[serde(default)]
    enrich: bool,
}

/// Create a book.
pub async fn create_book(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<CreateBookParams>,
    ApiJson(data): ApiJson<NewBook>,
) -> Result<(StatusCode, Json<Book>)> {
    let book = enrich::create_book(
        &state.db,
        &state.openlibrary,
        data,
        params.resolve,
        params.enrich,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(book)))
}

/// Overwrite flag.
#[derive(Debug, Default, Deserialize)]
pub struct OverwriteParams {
    #[serde(default)]
    overwrite: bool,
}

/// Enrich one book from Open Library.
pub async fn enrich_book(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<OverwriteParams>,
) -> Result<Json<EnrichResult>> {
    let result = enrich::enrich_book(&state.db, &state.openlibrary, book_id, params.overwrite).await?;
    Ok(Json(result))
}

/// Partial book update.
pub async fn update_book(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(update): ApiJson<BookUpdate>,
) -> Result<Json<Book>> {
    Ok(Json(state.db.update_book(book_id, update)?))
}

/// Delete a book.
pub async fn delete_book(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
) -> Result<StatusCode> {
    state.db.delete_book(book_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// SHELVES
// ============================================================================

/// All shelves.
pub async fn list_shelves(State(state): State<AppState>) -> Result<Json<Vec<Shelf>>> {
    Ok(Json(state.db.list_shelves()?))
}

/// Create a shelf.
pub async fn create_shelf(
    State(state): State<AppState>,
    ApiJson(data): ApiJson<NewShelf>,
) -> Result<(StatusCode, Json<Shelf>)> {
    let shelf = state.db.create_shelf(&data)?;
    Ok((StatusCode::CREATED, Json(shelf)))
}

/// Shelf and its books, by name.
pub async fn shelf_by_name(
    State(state): State<AppState>,
    ApiPath(name): ApiPath<String>,
) -> Result<Json<ShelfWithBooks>> {
    Ok(Json(state.db.get_shelf(id::name_id(&name))?))
}

/// Shelf and its books.
pub async fn get_shelf(
    State(state): State<AppState>,
    ApiPath(shelf_id): ApiPath<i64>,
) -> Result<Json<ShelfWithBooks>> {
    Ok(Json(state.db.get_shelf(shelf_id)?))
}

/// Partial shelf update.
pub async fn update_shelf(
    State(state): State<AppState>,
    ApiPath(shelf_id): ApiPath<i64>,
    ApiJson(update): ApiJson<ShelfUpdate>,
) -> Result<Json<Shelf>> {
    Ok(Json(state.db.update_shelf(shelf_id, update)?))
}

/// Delete a shelf.
pub async fn delete_shelf(
    State(state): State<AppState>,
    ApiPath(shelf_id): ApiPath<i64>,
) -> Result<StatusCode> {
    state.db.delete_shelf(shelf_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Source and destination of a move.
#[derive(Debug, Deserialize)]
pub struct MoveBookRequest {
    from_shelf_id: i64,
    to_shelf_id: i64,
}

/// Move a book between shelves.
pub async fn move_book(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(request): ApiJson<MoveBookRequest>,
) -> Result<Json<Value>> {
    let (from, to) = state
        .db
        .move_book(book_id, request.from_shelf_id, request.to_shelf_id)?;
    tracing::info!(book_id, from = %from, to = %to, "Book moved");
    Ok(detail(format!("Book moved from '{from}' to '{to}'")))
}

/// Put a book on a shelf.
pub async fn add_book_to_shelf(
    State(state): State<AppState>,
    ApiPath((shelf_id, book_id)): ApiPath<(i64, i64)>,
) -> Result<(StatusCode, Json<Value>)> {
    state.db.add_book_to_shelf(shelf_id, book_id)?;
    Ok((StatusCode::CREATED, detail("Book added to shelf")))
}

/// Take a book off a shelf.
pub async fn remove_book_from_shelf(
    State(state): State<AppState>,
    ApiPath((shelf_id, book_id)): ApiPath<(i64, i64)>,
) -> Result<StatusCode> {
    state.db.remove_book_from_shelf(shelf_id, book_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// TAGS
// ============================================================================

/// All tags.
pub async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(state.db.list_tags()?))
}

/// Books with a tag.
pub async fn tag_books_by_id(
    State(state): State<AppState>,
    ApiPath(tag_id): ApiPath<i64>,
) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.db.books_with_tag(tag_id)?))
}

/// Books with a tag, by tag name.
pub async fn tag_books_by_name(
    State(state): State<AppState>,
    ApiPath(name): ApiPath<String>,
) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.db.books_with_tag_name(&name)?))
}

/// One tag for many books.
#[derive(Debug, Deserialize)]
pub struct BulkBookTagRequest {
    tag: String,
    book_ids: Vec<i64>,
}

/// Tag many books.
pub async fn tag_books_batch(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BulkBookTagRequest>,
) -> Result<Json<BulkBookTagResult>> {
    Ok(Json(state.db.tag_books(&request.tag, &request.book_ids)?))
}

/// A tag name.
#[derive(Debug, Deserialize)]
pub struct TagRequest {
    name: String,
}

/// Tag a book.
pub async fn tag_book(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(request): ApiJson<TagRequest>,
) -> Result<(StatusCode, Json<Tag>)> {
    let tag = state.db.tag_book(book_id, &request.name)?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// Many tags for one book.
#[derive(Debug, Deserialize)]
pub struct BulkTagRequest {
    tags: Vec<String>,
}

/// Tag a book with several tags.
pub async fn tag_book_batch(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(request): ApiJson<BulkTagRequest>,
) -> Result<(StatusCode, Json<BulkTagResult>)> {
    let result = state.db.tag_book_batch(book_id, &request.tags)?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Untag a book.
pub async fn untag_book(
    State(state): State<AppState>,
    ApiPath((book_id, tag_id)): ApiPath<(i64, i64)>,
) -> Result<StatusCode> {
    state.db.untag_book(book_id, tag_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// REVIEWS
// ============================================================================

/// Review listing parameters.
#[derive(Debug, Deserialize)]
pub struct ReviewListParams {
    min_rating: Option<f64>,
    #[serde(default = "default_review_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_review_limit() -> i64 {
    50
}

/// Reviews across the library.
pub async fn list_reviews(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ReviewListParams>,
) -> Result<Json<Vec<ReviewWithBook>>> {
    check_range("limit", params.limit, 1, 200)?;
    check_offset(params.offset)?;
    let reviews = state
        .db
        .list_reviews(params.min_rating, params.limit, params.offset)?;
    Ok(Json(reviews))
}

/// Reviews of a book.
pub async fn book_reviews(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(state.db.reviews_for_book(book_id)?))
}

/// The review of a book.
pub async fn book_review(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
) -> Result<Json<Review>> {
    Ok(Json(state.db.review_for_book(book_id)?))
}

/// Review a book.
pub async fn create_review(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(input): ApiJson<ReviewInput>,
) -> Result<(StatusCode, Json<Review>)> {
    let review = state.db.create_review(book_id, &input)?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// A bare rating.
#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    rating: f64,
}

/// Set a book's rating, keeping any review text.
pub async fn set_rating(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(request): ApiJson<RatingRequest>,
) -> Result<Json<Review>> {
    Ok(Json(state.db.set_rating(book_id, request.rating)?))
}

/// Update a review.
pub async fn update_review(
    State(state): State<AppState>,
    ApiPath(review_id): ApiPath<i64>,
    ApiJson(input): ApiJson<ReviewInput>,
) -> Result<Json<Review>> {
    Ok(Json(state.db.update_review(review_id, input)?))
}

/// Delete a review.
pub async fn delete_review(
    State(state): State<AppState>,
    ApiPath(review_id): ApiPath<i64>,
) -> Result<StatusCode> {
    state.db.delete_review(review_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// READINGS
// ============================================================================

/// Optional start date.
#[derive(Debug, Default, Deserialize)]
pub struct StartReadingRequest {
    started_at: Option<NaiveDate>,
}

/// Start reading a book. The body is optional.
pub async fn start_reading(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    body: Bytes,
) -> Result<(StatusCode, Json<Reading>)> {
    let request: StartReadingRequest = optional_json(&body)?;
    let reading = state.db.start_reading(book_id, request.started_at)?;
    Ok((StatusCode::CREATED, Json(reading)))
}

/// Optional finish date.
#[derive(Debug, Default, Deserialize)]
pub struct FinishReadingRequest {
    finished_at: Option<NaiveDate>,
}

/// Finish the active reading of a book. The body is optional.
pub async fn finish_reading(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    body: Bytes,
) -> Result<Json<Reading>> {
    let request: FinishReadingRequest = optional_json(&body)?;
    Ok(Json(state.db.finish_reading(book_id, request.finished_at)?))
}

/// Readings of a book, newest first.
pub async fn list_readings(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
) -> Result<Json<Vec<Reading>>> {
    Ok(Json(state.db.list_readings(book_id)?))
}

/// A reading with its progress.
pub async fn get_reading(
    State(state): State<AppState>,
    ApiPath((book_id, reading_id)): ApiPath<(i64, i64)>,
) -> Result<Json<ReadingDetail>> {
    Ok(Json(state.db.get_reading(book_id, reading_id)?))
}

/// Change the dates of a reading.
pub async fn update_reading(
    State(state): State<AppState>,
    ApiPath((book_id, reading_id)): ApiPath<(i64, i64)>,
    ApiJson(update): ApiJson<ReadingUpdate>,
) -> Result<Json<Reading>> {
    Ok(Json(state.db.update_reading(book_id, reading_id, update)?))
}

/// Delete a reading.
pub async fn delete_reading(
    State(state): State<AppState>,
    ApiPath((book_id, reading_id)): ApiPath<(i64, i64)>,
) -> Result<StatusCode> {
    state.db.delete_reading(book_id, reading_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Log progress on the active reading.
pub async fn log_progress(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(input): ApiJson<ProgressInput>,
) -> Result<(StatusCode, Json<ReadingProgress>)> {
    let progress = state.db.log_progress(book_id, &input)?;
    Ok((StatusCode::CREATED, Json(progress)))
}

/// Progress of the active reading.
pub async fn active_progress(
    State(state): State<AppState>,
    ApiPath(book_id): ApiPath<i64>,
) -> Result<Json<Vec<ReadingProgress>>> {
    Ok(Json(state.db.active_progress(book_id)?))
}

/// Delete a progress entry.
pub async fn delete_progress(
    State(state): State<AppState>,
    ApiPath(progress_id): ApiPath<i64>,
) -> Result<StatusCode> {
    state.db.delete_progress(progress_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// IMPORT & ENRICHMENT
// ============================================================================

/// Import flags.
#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    #[serde(default)]
    enrich: bool,
}

/// Counts of a batch enrichment run after an import.
#[derive(Debug, Serialize)]
pub struct EnrichmentSummary {
    total: usize,
    enriched: usize,
    failed: usize,
}

impl From<BatchEnrichResult> for EnrichmentSummary {
    fn from(result: BatchEnrichResult) -> Self {
        Self {
            total: result.total,
            enriched: result.enriched,
            failed: result.failed,
        }
    }
}

/// Import counts, plus enrichment counts when requested.
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    #[serde(flatten)]
    result: ImportResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    enrichment: Option<EnrichmentSummary>,
}

/// Import a Goodreads export uploaded as the multipart field `file`.
pub async fn import_goodreads(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ImportParams>,
    mut multipart: Multipart,
) -> Result<Json<ImportResponse>> {
    let mut content = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            content = Some(field.bytes().await?);
            break;
        }
    }
    let content = content.ok_or_else(|| AppError::Validation("file is required".to_string()))?;

    let result = import::import_csv(&state.db, &content[..])?;

    let enrichment = if params.enrich {
        let batch =
            enrich::enrich_batch(&state.db, &state.openlibrary, &BatchEnrichRequest::default())
                .await?;
        Some(batch.into())
    } else {
        None
    };

    Ok(Json(ImportResponse { result, enrichment }))
}

/// Enrich several books.
pub async fn batch_enrich(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BatchEnrichRequest>,
) -> Result<Json<BatchEnrichResult>> {
    Ok(Json(
        enrich::enrich_batch(&state.db, &state.openlibrary, &request).await?,
    ))
}

// ============================================================================
// HASH
// ============================================================================

/// Identifier derived from the repeated `parts` query parameter.
pub async fn hash(ApiQuery(query): ApiQuery<Vec<(String, String)>>) -> Result<Json<Value>> {
    let parts: Vec<String> = query
        .into_iter()
        .filter(|(key, _)| key == "parts")
        .map(|(_, value)| value)
        .collect();
    if parts.is_empty() {
        return Err(AppError::Validation("parts is required".to_string()));
    }
    Ok(Json(json!({ "id": id::make_id(&parts), "parts": parts })))
}

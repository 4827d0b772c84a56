//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let book_routes = Router::new()
        .route("/", get(handlers::list_books).post(handlers::create_book))
        .route("/stats", get(handlers::book_stats))
        .route("/search", get(handlers::search_books))
        .route("/lookup", get(handlers::lookup_book))
        .route("/bulk", post(handlers::books_bulk))
        .route("/bulk-readings", post(handlers::books_bulk_readings))
        .route("/by-name/{title}/{author}", get(handlers::book_by_name))
        .route(
            "/{id}",
            get(handlers::get_book)
                .put(handlers::update_book)
                .delete(handlers::delete_book),
        )
        .route("/{id}/enrich", post(handlers::enrich_book))
        // Tags of a book
        .route("/{id}/tags", post(handlers::tag_book))
        .route("/{id}/tags/batch", post(handlers::tag_book_batch))
        .route("/{id}/tags/{tag_id}", delete(handlers::untag_book))
        // Reviews of a book
        .route(
            "/{id}/reviews",
            get(handlers::book_reviews).post(handlers::create_review),
        )
        .route("/{id}/review", get(handlers::book_review))
        .route("/{id}/rating", put(handlers::set_rating))
        // Readings and progress
        .route("/{id}/start-reading", post(handlers::start_reading))
        .route("/{id}/finish-reading", put(handlers::finish_reading))
        .route("/{id}/readings", get(handlers::list_readings))
        .route(
            "/{id}/readings/{reading_id}",
            get(handlers::get_reading)
                .put(handlers::update_reading)
                .delete(handlers::delete_reading),
        )
        .route(
            "/{id}/reading/progress",
            get(handlers::active_progress).post(handlers::log_progress),
        );

    let shelf_routes = Router::new()
        .route("/", get(handlers::list_shelves).post(handlers::create_shelf))
        .route("/by-name/{name}", get(handlers::shelf_by_name))
        .route("/move-book/{book_id}", post(handlers::move_book))
        .route(
            "/{id}",
            get(handlers::get_shelf)
                .put(handlers::update_shelf)
                .delete(handlers::delete_shelf),
        )
        .route(
            "/{id}/books/{book_id}",
            post(handlers::add_book_to_shelf).delete(handlers::remove_book_from_shelf),
        );

    let tag_routes = Router::new()
        .route("/", get(handlers::list_tags))
        .route("/books/batch", post(handlers::tag_books_batch))
        .route("/by-name/{name}/books", get(handlers::tag_books_by_name))
        .route("/{id}/books", get(handlers::tag_books_by_id));

    let review_routes = Router::new()
        .route("/", get(handlers::list_reviews))
        .route(
            "/{id}",
            put(handlers::update_review).delete(handlers::delete_review),
        );

    let import_routes = Router::new()
        .route(
            "/goodreads",
            post(handlers::import_goodreads).layer(DefaultBodyLimit::disable()),
        )
        .route("/enrich", post(handlers::batch_enrich));

    Router::new()
        .nest("/api/books", book_routes)
        .nest("/api/shelves", shelf_routes)
        .nest("/api/tags", tag_routes)
        .nest("/api/reviews", review_routes)
        .nest("/api/import", import_routes)
        .route(
            "/api/reading/progress/{id}",
            delete(handlers::delete_progress),
        )
        .route("/api/hash", get(handlers::hash))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

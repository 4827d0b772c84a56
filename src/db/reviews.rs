use super::books::require_book;
use super::{Review, ReviewWithBook, now};
use crate::error::{AppError, Result};
use crate::id;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;

const REVIEW_COLUMNS: &str = "r.id, r.book_id, r.rating, r.review_text, r.created_at, r.updated_at";

/// Review fields; on update, absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewInput {
    /// 0.0 to 5.0.
    pub rating: Option<f64>,
    /// Free text.
    pub review_text: Option<String>,
}

/// Check a rating is within 0.0..=5.0.
pub fn validate_rating(rating: f64) -> Result<()> {
    if !(0.0..=5.0).contains(&rating) {
        return Err(AppError::Validation(
            "rating must be between 0 and 5".to_string(),
        ));
    }
    Ok(())
}

impl ReviewInput {
    fn validate(&self) -> Result<()> {
        match self.rating {
            Some(rating) => validate_rating(rating),
            None => Ok(()),
        }
    }
}

fn row_to_review(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        book_id: row.get(1)?,
        rating: row.get(2)?,
        review_text: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn get_review(conn: &Connection, review_id: i64) -> Result<Option<Review>> {
    conn.query_row(
        &format!("SELECT {REVIEW_COLUMNS} FROM reviews r WHERE r.id = ?1"),
        params![review_id],
        row_to_review,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get review: {}", e)))
}

/// The review of a book, if any.
pub(crate) fn get_review_for_book(conn: &Connection, book_id: i64) -> Result<Option<Review>> {
    conn.query_row(
        &format!("SELECT {REVIEW_COLUMNS} FROM reviews r WHERE r.book_id = ?1"),
        params![book_id],
        row_to_review,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get review: {}", e)))
}

/// Insert the review of a book under `make_id(book_id)`.
pub(crate) fn insert_review(
    conn: &Connection,
    book_id: i64,
    rating: Option<f64>,
    review_text: Option<&str>,
) -> Result<Review> {
    let review_id = id::make_id([book_id.to_string()]);
    let ts = now();
    conn.execute(
        "INSERT INTO reviews (id, book_id, rating, review_text, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![review_id, book_id, rating, review_text, ts],
    )
    .map_err(|e| AppError::from_constraint(e, "Book already has a review"))?;

    get_review(conn, review_id)?
        .ok_or_else(|| AppError::Internal("Review vanished after insert".to_string()))
}

fn write_review(conn: &Connection, review: &Review) -> Result<Review> {
    conn.execute(
        "UPDATE reviews SET rating = ?2, review_text = ?3, updated_at = ?4 WHERE id = ?1",
        params![review.id, review.rating, review.review_text, now()],
    )?;
    get_review(conn, review.id)?
        .ok_or_else(|| AppError::NotFound("Review not found".to_string()))
}

impl super::Database {
    // ========== REVIEW OPERATIONS ==========

    /// Reviews across the library with the reviewed book's title and author,
    /// highest rating first.
    pub fn list_reviews(
        &self,
        min_rating: Option<f64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ReviewWithBook>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REVIEW_COLUMNS}, b.title, b.author
                 FROM reviews r
                 JOIN books b ON b.id = r.book_id
                 WHERE ?1 IS NULL OR r.rating >= ?1
                 ORDER BY r.rating IS NULL, r.rating DESC, r.id
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let reviews = stmt
                .query_map(params![min_rating, limit, offset], |row| {
                    Ok(ReviewWithBook {
                        review: row_to_review(row)?,
                        book_title: row.get(6)?,
                        book_author: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(reviews)
        })
    }

    /// Reviews of one book (zero or one).
    pub fn reviews_for_book(&self, book_id: i64) -> Result<Vec<Review>> {
        self.read(|conn| {
            require_book(conn, book_id)?;
            Ok(get_review_for_book(conn, book_id)?.into_iter().collect())
        })
    }

    /// The review of one book.
    pub fn review_for_book(&self, book_id: i64) -> Result<Review> {
        self.read(|conn| {
            require_book(conn, book_id)?;
            get_review_for_book(conn, book_id)?
                .ok_or_else(|| AppError::NotFound("Review not found".to_string()))
        })
    }

    /// Review a book. Conflict when it already has a review.
    pub fn create_review(&self, book_id: i64, input: &ReviewInput) -> Result<Review> {
        input.validate()?;
        self.write(|tx| {
            require_book(tx, book_id)?;
            if get_review_for_book(tx, book_id)?.is_some() {
                return Err(AppError::Conflict("Book already has a review".to_string()));
            }
            insert_review(tx, book_id, input.rating, input.review_text.as_deref())
        })
    }

    /// Set a book's rating, creating the review if needed and keeping any
    /// review text.
    pub fn set_rating(&self, book_id: i64, rating: f64) -> Result<Review> {
        validate_rating(rating)?;
        self.write(|tx| {
            require_book(tx, book_id)?;
            match get_review_for_book(tx, book_id)? {
                Some(mut review) => {
                    review.rating = Some(rating);
                    write_review(tx, &review)
                }
                None => insert_review(tx, book_id, Some(rating), None),
            }
        })
    }

    /// Update rating and/or text of a review.
    pub fn update_review(&self, review_id: i64, input: ReviewInput) -> Result<Review> {
        input.validate()?;
        self.write(|tx| {
            let mut review = get_review(tx, review_id)?
                .ok_or_else(|| AppError::NotFound("Review not found".to_string()))?;
            if input.rating.is_some() {
                review.rating = input.rating;
            }
            if input.review_text.is_some() {
                review.review_text = input.review_text;
            }
            write_review(tx, &review)
        })
    }

    /// Delete a review.
    pub fn delete_review(&self, review_id: i64) -> Result<()> {
        self.write(|tx| {
            let rows = tx.execute("DELETE FROM reviews WHERE id = ?1", params![review_id])?;
            if rows == 0 {
                return Err(AppError::NotFound("Review not found".to_string()));
            }
            Ok(())
        })
    }
}

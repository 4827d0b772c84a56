use super::books::require_book;
use super::{BookReadings, Reading, ReadingDetail, ReadingProgress, now, today};
use crate::error::{AppError, Result};
use crate::id;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;

const READING_COLUMNS: &str = "r.id, r.book_id, r.started_at, r.finished_at, r.created_at, r.updated_at";
const PROGRESS_COLUMNS: &str = "p.id, p.reading_id, p.page, p.date, p.created_at";

/// Partial reading update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingUpdate {
    /// New start date.
    pub started_at: Option<NaiveDate>,
    /// New finish date.
    pub finished_at: Option<NaiveDate>,
}

/// A progress log request.
///
/// Exactly one way of giving the page must be used: an absolute `page`,
/// `pages_read` since the last entry, or a `start_page`/`end_page` range.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressInput {
    /// Absolute page reached.
    pub page: Option<i64>,
    /// Pages read since the last entry.
    pub pages_read: Option<i64>,
    /// Start of the range read.
    pub start_page: Option<i64>,
    /// End of the range read.
    pub end_page: Option<i64>,
    /// Day of the entry, today when absent.
    pub date: Option<NaiveDate>,
}

impl ProgressInput {
    /// Check that exactly one input mode is used and its values are sane.
    pub fn validate(&self) -> Result<()> {
        let has_page = self.page.is_some();
        let has_pages_read = self.pages_read.is_some();
        let has_range = self.start_page.is_some() || self.end_page.is_some();

        let modes = [has_page, has_pages_read, has_range]
            .into_iter()
            .filter(|m| *m)
            .count();
        if modes == 0 {
            return Err(AppError::Validation(
                "Must provide one of: page, pages_read, or start_page+end_page".to_string(),
            ));
        }
        if modes > 1 {
            return Err(AppError::Validation(
                "Provide only one of: page, pages_read, or start_page+end_page".to_string(),
            ));
        }

        if let Some(page) = self.page {
            if page < 0 {
                return Err(AppError::Validation("page must be >= 0".to_string()));
            }
        }
        if let Some(pages_read) = self.pages_read {
            if pages_read < 1 {
                return Err(AppError::Validation("pages_read must be >= 1".to_string()));
            }
        }
        if has_range {
            let (Some(start), Some(end)) = (self.start_page, self.end_page) else {
                return Err(AppError::Validation(
                    "Both start_page and end_page are required for range input".to_string(),
                ));
            };
            if start < 0 {
                return Err(AppError::Validation("start_page must be >= 0".to_string()));
            }
            if end <= start {
                return Err(AppError::Validation(
                    "end_page must be greater than start_page".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Page to store, given the last logged page of the reading.
    pub fn resolve_page(&self, last_page: i64) -> Result<i64> {
        self.validate()?;
        match (self.page, self.pages_read, self.end_page) {
            (Some(page), _, _) => Ok(page),
            (_, Some(pages_read), _) => last_page
                .checked_add(pages_read)
                .ok_or_else(|| AppError::Validation("pages_read is too large".to_string())),
            (_, _, Some(end)) => Ok(end),
            _ => Err(AppError::Validation("No page given".to_string())),
        }
    }
}

fn row_to_reading(row: &Row<'_>) -> rusqlite::Result<Reading> {
    let started_at: Option<NaiveDate> = row.get(2)?;
    let finished_at: Option<NaiveDate> = row.get(3)?;
    Ok(Reading {
        id: row.get(0)?,
        book_id: row.get(1)?,
        started_at,
        finished_at,
        duration_days: Reading::compute_duration(started_at, finished_at),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_progress(row: &Row<'_>) -> rusqlite::Result<ReadingProgress> {
    Ok(ReadingProgress {
        id: row.get(0)?,
        reading_id: row.get(1)?,
        page: row.get(2)?,
        date: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Get a reading by id.
pub(crate) fn get_reading(conn: &Connection, reading_id: i64) -> Result<Option<Reading>> {
    conn.query_row(
        &format!("SELECT {READING_COLUMNS} FROM readings r WHERE r.id = ?1"),
        params![reading_id],
        row_to_reading,
    )
    .optional()
    .map_err(|e| AppError::Internal(format!("Failed to get reading: {}", e)))
}

fn require_book_reading(conn: &Connection, book_id: i64, reading_id: i64) -> Result<Reading> {
    require_book(conn, book_id)?;
    get_reading(conn, reading_id)?
        .filter(|r| r.book_id == book_id)
        .ok_or_else(|| AppError::NotFound("Reading not found".to_string()))
}

/// Most recently created unfinished reading of a book.
fn active_reading(conn: &Connection, book_id: i64) -> Result<Reading> {
    conn.query_row(
        &format!(
            "SELECT {READING_COLUMNS} FROM readings r
             WHERE r.book_id = ?1 AND r.finished_at IS NULL
             ORDER BY r.created_at DESC, r.rowid DESC
             LIMIT 1"
        ),
        params![book_id],
        row_to_reading,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("No active reading for this book".to_string()))
}

fn readings_for_book(conn: &Connection, book_id: i64) -> Result<Vec<Reading>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {READING_COLUMNS} FROM readings r
         WHERE r.book_id = ?1
         ORDER BY r.created_at DESC, r.rowid DESC"
    ))?;
    let readings = stmt
        .query_map(params![book_id], row_to_reading)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(readings)
}

fn progress_for_reading(conn: &Connection, reading_id: i64) -> Result<Vec<ReadingProgress>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROGRESS_COLUMNS} FROM reading_progress p
         WHERE p.reading_id = ?1
         ORDER BY p.date, p.id"
    ))?;
    let entries = stmt
        .query_map(params![reading_id], row_to_progress)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Page of the latest-dated entry of a reading, 0 when nothing is logged.
fn last_page(conn: &Connection, reading_id: i64) -> Result<i64> {
    let page = conn
        .query_row(
            "SELECT page FROM reading_progress WHERE reading_id = ?1 ORDER BY date DESC LIMIT 1",
            params![reading_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(page.unwrap_or(0))
}

/// Insert a reading unless one with this id exists. Returns whether it was
/// inserted.
pub(crate) fn insert_reading(
    conn: &Connection,
    reading_id: i64,
    book_id: i64,
    started_at: Option<NaiveDate>,
    finished_at: Option<NaiveDate>,
) -> Result<bool> {
    if get_reading(conn, reading_id)?.is_some() {
        return Ok(false);
    }
    let ts = now();
    conn.execute(
        "INSERT INTO readings (id, book_id, started_at, finished_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![reading_id, book_id, started_at, finished_at, ts],
    )
    .map_err(|e| AppError::from_constraint(e, "This book already has an active reading"))?;
    Ok(true)
}

impl super::Database {
    // ========== READING OPERATIONS ==========

    /// Start reading a book (today when no date is given).
    pub fn start_reading(&self, book_id: i64, started_at: Option<NaiveDate>) -> Result<Reading> {
        let started = started_at.unwrap_or_else(today);
        let reading_id = id::make_id([book_id.to_string(), started.to_string()]);

        let reading = self.write(|tx| {
            require_book(tx, book_id)?;
            if get_reading(tx, reading_id)?.is_some() {
                return Err(AppError::Conflict(
                    "A reading with this start date already exists".to_string(),
                ));
            }
            match active_reading(tx, book_id) {
                Ok(_) => {
                    return Err(AppError::Conflict(
                        "This book already has an active reading".to_string(),
                    ));
                }
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            insert_reading(tx, reading_id, book_id, Some(started), None)?;
            get_reading(tx, reading_id)?
                .ok_or_else(|| AppError::Internal("Reading vanished after insert".to_string()))
        })?;

        tracing::info!(book_id, reading_id, %started, "Reading started");
        Ok(reading)
    }

    /// Finish the active reading of a book (today when no date is given).
    pub fn finish_reading(&self, book_id: i64, finished_at: Option<NaiveDate>) -> Result<Reading> {
        let finished = finished_at.unwrap_or_else(today);

        let reading = self.write(|tx| {
            require_book(tx, book_id)?;
            let reading = active_reading(tx, book_id)?;
            if let Some(started) = reading.started_at {
                if finished < started {
                    return Err(AppError::Validation(
                        "finished_at must not be before started_at".to_string(),
                    ));
                }
            }
            tx.execute(
                "UPDATE readings SET finished_at = ?2, updated_at = ?3 WHERE id = ?1",
                params![reading.id, finished, now()],
            )?;
            get_reading(tx, reading.id)?
                .ok_or_else(|| AppError::NotFound("Reading not found".to_string()))
        })?;

        tracing::info!(book_id, reading_id = reading.id, %finished, "Reading finished");
        Ok(reading)
    }

    /// Readings of a book, newest first.
    pub fn list_readings(&self, book_id: i64) -> Result<Vec<Reading>> {
        self.read(|conn| {
            require_book(conn, book_id)?;
            readings_for_book(conn, book_id)
        })
    }

    /// A reading with its progress entries.
    pub fn get_reading(&self, book_id: i64, reading_id: i64) -> Result<ReadingDetail> {
        self.read(|conn| {
            let reading = require_book_reading(conn, book_id, reading_id)?;
            let progress_entries = progress_for_reading(conn, reading.id)?;
            Ok(ReadingDetail {
                reading,
                progress_entries,
            })
        })
    }

    /// Change the dates of a reading. The id is kept.
    pub fn update_reading(
        &self,
        book_id: i64,
        reading_id: i64,
        update: ReadingUpdate,
    ) -> Result<Reading> {
        self.write(|tx| {
            let mut reading = require_book_reading(tx, book_id, reading_id)?;
            if update.started_at.is_some() {
                reading.started_at = update.started_at;
            }
            if update.finished_at.is_some() {
                reading.finished_at = update.finished_at;
            }
            if let (Some(started), Some(finished)) = (reading.started_at, reading.finished_at) {
                if finished < started {
                    return Err(AppError::Validation(
                        "finished_at must not be before started_at".to_string(),
                    ));
                }
            }
            tx.execute(
                "UPDATE readings SET started_at = ?2, finished_at = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![reading.id, reading.started_at, reading.finished_at, now()],
            )?;
            get_reading(tx, reading.id)?
                .ok_or_else(|| AppError::NotFound("Reading not found".to_string()))
        })
    }

    /// Delete a reading and its progress entries.
    pub fn delete_reading(&self, book_id: i64, reading_id: i64) -> Result<()> {
        self.write(|tx| {
            let reading = require_book_reading(tx, book_id, reading_id)?;
            tx.execute("DELETE FROM readings WHERE id = ?1", params![reading.id])?;
            Ok(())
        })
    }

    /// Log progress on the active reading of a book.
    pub fn log_progress(&self, book_id: i64, input: &ProgressInput) -> Result<ReadingProgress> {
        input.validate()?;
        let date = input.date.unwrap_or_else(today);

        self.write(|tx| {
            require_book(tx, book_id)?;
            let reading = active_reading(tx, book_id)?;
            let page = input.resolve_page(last_page(tx, reading.id)?)?;
            let progress_id = id::make_id([reading.id.to_string(), date.to_string()]);

            tx.execute(
                "INSERT INTO reading_progress (id, reading_id, page, date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![progress_id, reading.id, page, date, now()],
            )
            .map_err(|e| AppError::from_constraint(e, "Progress already logged for this date"))?;

            tracing::debug!(book_id, reading_id = reading.id, page, %date, "Progress logged");
            tx.query_row(
                &format!("SELECT {PROGRESS_COLUMNS} FROM reading_progress p WHERE p.id = ?1"),
                params![progress_id],
                row_to_progress,
            )
            .map_err(AppError::from)
        })
    }

    /// Progress entries of the active reading, by date.
    pub fn active_progress(&self, book_id: i64) -> Result<Vec<ReadingProgress>> {
        self.read(|conn| {
            require_book(conn, book_id)?;
            let reading = active_reading(conn, book_id)?;
            progress_for_reading(conn, reading.id)
        })
    }

    /// Delete a progress entry.
    pub fn delete_progress(&self, progress_id: i64) -> Result<()> {
        self.write(|tx| {
            let rows = tx.execute(
                "DELETE FROM reading_progress WHERE id = ?1",
                params![progress_id],
            )?;
            if rows == 0 {
                return Err(AppError::NotFound("Progress entry not found".to_string()));
            }
            Ok(())
        })
    }

    /// Readings of the books addressed by (title, author), in request order.
    /// Unknown books get an empty list.
    pub fn readings_by_name<'a, I>(&self, refs: I) -> Result<Vec<BookReadings>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let refs: Vec<(&str, &str)> = refs.into_iter().collect();
        self.read(|conn| {
            let mut seen = Vec::new();
            let mut out = Vec::with_capacity(refs.len());
            for (title, author) in refs {
                let book_id = id::book_id(title, author);
                if seen.contains(&book_id) {
                    continue;
                }
                seen.push(book_id);
                out.push(BookReadings {
                    title: title.to_string(),
                    author: author.to_string(),
                    readings: readings_for_book(conn, book_id)?,
                });
            }
            Ok(out)
        })
    }
}

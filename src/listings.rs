//! Narrow read interface over the platform's listing tables.
//!
//! The listing CRUD surface lives in another service; the chat tools only
//! need these three queries. Records are plain rows serialized straight
//! into tool results.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub date: Option<String>,
    pub location: Option<String>,
    pub is_featured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub title: String,
    pub company: Option<String>,
    pub description: String,
    pub location: Option<String>,
}

/// Latest 10 featured events, newest first.
pub async fn fetch_featured_events(pool: &SqlitePool) -> Result<Vec<EventRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, description, date, location, is_featured
        FROM events
        WHERE is_featured = 1
        ORDER BY created_at DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(event_from_row).collect())
}

/// One event by id, or `None` if it does not exist.
pub async fn fetch_event(pool: &SqlitePool, event_id: i64) -> Result<Option<EventRecord>> {
    let row = sqlx::query(
        "SELECT id, title, description, date, location, is_featured FROM events WHERE id = ?",
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(event_from_row))
}

/// Latest 10 job postings, newest first.
pub async fn fetch_recent_jobs(pool: &SqlitePool) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, company, description, location
        FROM jobs
        ORDER BY created_at DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| JobRecord {
            id: row.get("id"),
            title: row.get("title"),
            company: row.get("company"),
            description: row.get("description"),
            location: row.get("location"),
        })
        .collect())
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> EventRecord {
    EventRecord {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        date: row.get("date"),
        location: row.get("location"),
        is_featured: row.get::<i64, _>("is_featured") != 0,
    }
}

//! Book listing.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::ClientResult;
use crate::models::Book;
use crate::transport::{Backend, HttpBackend};

/// Fetch every analyzed book, in the order the backend lists them.
pub async fn list_books(backend: &dyn Backend) -> ClientResult<Vec<Book>> {
    let books = backend.list_books().await?;
    tracing::debug!(count = books.len(), "listed books");
    Ok(books)
}

pub fn find_book<'a>(books: &'a [Book], id: &str) -> Option<&'a Book> {
    books.iter().find(|b| b.id == id)
}

/// Creation date as `YYYY-MM-DD`, or `-` when the timestamp is unusable.
pub fn format_created(book: &Book) -> String {
    book.created_at()
        .map(|dt: DateTime<Utc>| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// CLI entry point for `bka books`.
pub async fn run_books(config: &Config, json: bool) -> Result<()> {
    let backend = HttpBackend::from_config(&config.backend)?;
    let books = list_books(&backend).await?;

    if json {
        let rows: Vec<serde_json::Value> = books
            .iter()
            .map(|b| {
                serde_json::json!({
                    "id": b.id,
                    "title": b.title,
                    "created_at": b.created_at().map(|dt| dt.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if books.is_empty() {
        println!("No books analyzed yet. Run `bka analyze <file>` to add one.");
        return Ok(());
    }
    println!("{:<12} {:<38} TITLE", "CREATED", "ID");
    for book in &books {
        println!("{:<12} {:<38} {}", format_created(book), book.id, book.title);
    }
    Ok(())
}

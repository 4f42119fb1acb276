//! Persistence layer.
//!
//! Saves and loads the position book to/from a JSON file so the engine
//! resumes with its open positions (and their reservations) after a
//! restart. JSON is sufficient here: the book is small and the venue is
//! the authority on fills either way.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::positions::PositionBook;

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "vantage_positions.json";

/// Save the position book to a JSON file.
pub fn save_book(book: &PositionBook, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(book)
        .context("Failed to serialise position book")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write positions to {path}"))?;

    debug!(path, positions = book.len(), "Position book saved");
    Ok(())
}

/// Load the position book from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_book(path: Option<&str>) -> Result<Option<PositionBook>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved positions found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read positions from {path}"))?;

    let book: PositionBook = serde_json::from_str(&json)
        .context(format!("Failed to parse positions from {path}"))?;

    info!(
        path,
        positions = book.len(),
        realized_pnl = %book.realized_pnl,
        "Position book loaded from disk"
    );

    Ok(Some(book))
}

/// Delete the state file (for testing or reset).
pub fn delete_book(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Response table loading.
//!
//! Reads the delimited response export (header row, one respondent per line)
//! into [`ResponseRow`]s. Column order is preserved so that statements are
//! emitted in the same order the questions appear in the table.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::models::ResponseRow;

/// Read a response table from disk.
///
/// `user_id_column` names the respondent id column; every other column is
/// treated as a question code. Empty (or whitespace-only) cells become `None`.
///
/// # Errors
///
/// Fails if the file cannot be read, is not valid delimited text, or has no
/// `user_id_column` header.
pub fn load_responses(path: &Path, user_id_column: &str, delimiter: u8) -> Result<Vec<ResponseRow>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read response table: {}", path.display()))?;
    let rows = parse_responses_str(&content, user_id_column, delimiter)
        .with_context(|| format!("Failed to parse response table: {}", path.display()))?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "loaded response table");
    Ok(rows)
}

/// Parse response table text that has already been read into memory.
pub fn parse_responses_str(
    content: &str,
    user_id_column: &str,
    delimiter: u8,
) -> Result<Vec<ResponseRow>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Missing header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let Some(id_idx) = headers.iter().position(|h| h == user_id_column) else {
        bail!("User id column '{}' not found in header", user_id_column);
    };

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        // +2: one for the header, one for 1-based numbering
        let record = record.with_context(|| format!("Malformed record at line {}", line + 2))?;

        let cell = |idx: usize| -> Option<String> {
            record
                .get(idx)
                .filter(|value| !value.trim().is_empty())
                .map(str::to_string)
        };

        let answers = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != id_idx)
            .map(|(idx, code)| (code.clone(), cell(idx)))
            .collect();

        rows.push(ResponseRow {
            user_id: cell(id_idx),
            answers,
        });
    }

    Ok(rows)
}

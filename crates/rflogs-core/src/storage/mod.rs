pub mod listing;
pub mod runs;
pub mod schema;
pub mod store;

pub use runs::WriteOutcome;
pub use store::Store;

use crate::tags::TagError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error(transparent)]
    Tags(#[from] TagError),

    #[error("retention_days cannot exceed {max} (got {got})")]
    InvalidRetention { got: u32, max: u32 },

    #[error("File '{name}' already exists in this run")]
    DuplicateFile { name: String },

    #[error("corrupt value in column {column}: {message}")]
    Corrupt {
        column: &'static str,
        message: String,
    },
}

/// 22-character URL-safe id from a random UUID. The first character is
/// forced into A-Z/a-z so ids are safe as CLI arguments and file names.
pub fn new_id() -> String {
    let raw = URL_SAFE_NO_PAD.encode(uuid::Uuid::new_v4().as_bytes());
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => {
            let mut id = String::with_capacity(raw.len());
            id.push(to_alpha(first));
            id.extend(chars);
            id
        }
        None => raw,
    }
}

fn to_alpha(c: char) -> char {
    let code = c as u32;
    let offset = (code % 26) as u8;
    if code % 52 >= 26 {
        char::from(b'a' + offset)
    } else {
        char::from(b'A' + offset)
    }
}

/// Fixed-width RFC 3339 so text order matches time order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            column,
            message: format!("{raw}: {e}"),
        })
}

pub(crate) fn parse_ts_opt(
    raw: Option<String>,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| parse_ts(&s, column)).transpose()
}

//! On-disk encoding of the conversation store.
//!
//! The file is a single JSON object with three lists: `history`,
//! `bookmarks` and `sessions`. Missing keys read as empty lists so older
//! layouts keep loading.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use super::StoreError;
use super::records::{Bookmark, Message, Records, Session};

#[derive(Serialize)]
struct DocumentRef<'a> {
    history: &'a [Message],
    bookmarks: &'a [Bookmark],
    sessions: &'a [Session],
}

/// Result of decoding the raw file contents.
#[derive(Debug)]
pub(crate) enum Decoded {
    Parsed { records: Records, skipped: usize },
    Corrupt { reason: String },
}

/// Serialize records as two-space indented JSON.
pub(crate) fn encode(records: &Records) -> Result<Vec<u8>, StoreError> {
    let document = DocumentRef {
        history: &records.history,
        bookmarks: &records.bookmarks,
        sessions: &records.sessions,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

pub(crate) fn decode(bytes: &[u8]) -> Decoded {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            return Decoded::Corrupt {
                reason: format!("invalid JSON: {e}"),
            };
        }
    };

    let Value::Object(mut document) = value else {
        return Decoded::Corrupt {
            reason: format!(
                "expected a JSON object at the top level, found {}",
                kind_of(&value)
            ),
        };
    };

    let mut skipped = 0;
    let history = match take_list(&mut document, "history") {
        Ok(entries) => collect_valid(entries, &mut skipped, |entry| {
            serde_json::from_value::<Message>(entry).map_err(|e| e.to_string())
        }),
        Err(reason) => return Decoded::Corrupt { reason },
    };
    let bookmarks = match take_list(&mut document, "bookmarks") {
        Ok(entries) => collect_valid(entries, &mut skipped, |entry| {
            Bookmark::try_from(entry).map_err(|e| e.to_string())
        }),
        Err(reason) => return Decoded::Corrupt { reason },
    };
    let sessions = match take_list(&mut document, "sessions") {
        Ok(entries) => collect_valid(entries, &mut skipped, |entry| {
            Session::try_from(entry).map_err(|e| e.to_string())
        }),
        Err(reason) => return Decoded::Corrupt { reason },
    };

    Decoded::Parsed {
        records: Records {
            history,
            bookmarks,
            sessions,
        },
        skipped,
    }
}

fn take_list(document: &mut Map<String, Value>, key: &str) -> Result<Vec<Value>, String> {
    match document.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(entries),
        Some(other) => Err(format!("`{key}` must be a list, found {}", kind_of(&other))),
    }
}

fn collect_valid<T, F>(entries: Vec<Value>, skipped: &mut usize, parse: F) -> Vec<T>
where
    F: Fn(Value) -> Result<T, String>,
{
    entries
        .into_iter()
        .filter_map(|entry| match parse(entry) {
            Ok(record) => Some(record),
            Err(reason) => {
                debug!(target: "docent::store", "Skipping malformed record: {}", reason);
                *skipped += 1;
                None
            }
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Read the file, or `None` when nothing exists at `path` or it is a
/// directory. Any other I/O failure is an error.
pub(crate) fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    let io_err = |action: &'static str| {
        move |source: std::io::Error| StoreError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    };

    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => return Ok(None),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(io_err("inspect")(source)),
    }

    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_err("read")(source)),
    }
}

/// Replace the file at `path` with `bytes` via a synced sibling temp file
/// and a rename. Parent directories are created as needed.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |action: &'static str| {
        move |source: std::io::Error| StoreError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(io_err("create the directory for"))?;
            parent
        }
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err("stage"))?;
    tmp.write_all(bytes).map_err(io_err("write"))?;
    tmp.as_file().sync_all().map_err(io_err("sync"))?;
    tmp.persist(path).map_err(|e| io_err("replace")(e.error))?;
    Ok(())
}

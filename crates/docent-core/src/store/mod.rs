//! Persistent store for the transcript, bookmarks and saved sessions.
//!
//! All three sequences live in one JSON file. Every method takes `&self`:
//! the in-memory records sit behind a mutex that is never held across an
//! `.await`, and all file reads and writes are serialized through a single
//! per-store file lock, so overlapping `save`/`load` calls (sync or async)
//! never interleave on disk.

mod file;
mod records;

pub use records::{Bookmark, Fields, Message, Records, Role, Session};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::utils::AppPaths;
use file::Decoded;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize conversation store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid {kind} record: {message}")]
    InvalidRecord { kind: &'static str, message: String },

    #[error("Persistence task failed: {0}")]
    Task(String),
}

/// What a `load` found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file at the store path; in-memory records were left untouched.
    Missing,
    /// The file was read. `skipped` counts entries dropped because they did
    /// not match their record shape.
    Loaded { skipped: usize },
    /// The file could not be parsed and all three sequences were reset to
    /// empty. The file itself is left as is until the next save.
    Recovered { reason: String },
}

impl LoadOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, LoadOutcome::Recovered { .. })
    }
}

#[derive(Debug, Default)]
struct Shared {
    records: Mutex<Records>,
    file_lock: Mutex<()>,
}

impl Shared {
    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, path: &Path) -> Result<(), StoreError> {
        let _file = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes = file::encode(&self.records())?;
        file::write_atomic(path, &bytes)?;
        debug!(target: "docent::store", path = %path.display(), bytes = bytes.len(), "Saved conversation store");
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<LoadOutcome, StoreError> {
        let _file = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(bytes) = file::read_if_present(path)? else {
            debug!(target: "docent::store", path = %path.display(), "No conversation store on disk");
            return Ok(LoadOutcome::Missing);
        };

        match file::decode(&bytes) {
            Decoded::Parsed { records, skipped } => {
                if skipped > 0 {
                    warn!(
                        target: "docent::store",
                        path = %path.display(),
                        skipped,
                        "Dropped malformed entries while loading conversation store"
                    );
                }
                *self.records() = records;
                Ok(LoadOutcome::Loaded { skipped })
            }
            Decoded::Corrupt { reason } => {
                warn!(
                    target: "docent::store",
                    path = %path.display(),
                    %reason,
                    "Conversation store is unreadable; starting with empty history, bookmarks and sessions"
                );
                *self.records() = Records::default();
                Ok(LoadOutcome::Recovered { reason })
            }
        }
    }
}

/// Durable transcript, bookmark and session storage backed by one file.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    shared: Arc<Shared>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl ConversationStore {
    /// Create an empty store backed by `path`. Nothing is read until `load`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// `~/.context7_history.json`
    pub fn default_path() -> PathBuf {
        AppPaths::default_history_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a message to the transcript. Memory only.
    pub fn append(&self, message: Message) {
        self.shared.records().history.push(message);
    }

    /// Add a bookmark unless a structurally equal one is already stored.
    ///
    /// A newly inserted bookmark is persisted immediately. Returns whether
    /// the bookmark was inserted.
    pub fn add_bookmark(&self, bookmark: Bookmark) -> Result<bool, StoreError> {
        let inserted = {
            let mut records = self.shared.records();
            if records.bookmarks.contains(&bookmark) {
                false
            } else {
                records.bookmarks.push(bookmark);
                true
            }
        };

        if inserted {
            self.save()?;
        }
        Ok(inserted)
    }

    /// Append a session snapshot and persist immediately.
    pub fn add_session(&self, session: Session) -> Result<(), StoreError> {
        self.shared.records().sessions.push(session);
        self.save()
    }

    /// Empty the transcript. Bookmarks and sessions are kept; nothing is
    /// written until the next save.
    pub fn clear(&self) {
        self.shared.records().history.clear();
    }

    pub fn history(&self) -> Vec<Message> {
        self.shared.records().history.clone()
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.shared.records().bookmarks.clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.shared.records().sessions.clone()
    }

    /// Copy of all three sequences.
    pub fn snapshot(&self) -> Records {
        self.shared.records().clone()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        self.shared.persist(&self.path)
    }

    pub fn load(&self) -> Result<LoadOutcome, StoreError> {
        self.shared.restore(&self.path)
    }

    /// Same as [`save`](Self::save), run on the blocking pool.
    pub async fn save_async(&self) -> Result<(), StoreError> {
        let shared = Arc::clone(&self.shared);
        let path = self.path.clone();
        run_blocking(move || shared.persist(&path)).await
    }

    /// Same as [`load`](Self::load), run on the blocking pool.
    pub async fn load_async(&self) -> Result<LoadOutcome, StoreError> {
        let shared = Arc::clone(&self.shared);
        let path = self.path.clone();
        run_blocking(move || shared.restore(&path)).await
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConversationStore {
        ConversationStore::new(dir.path().join("history.json"))
    }

    #[test]
    fn new_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn append_does_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(Message::user("Hello world"));
        assert_eq!(store.history(), vec![Message::user("Hello world")]);
        assert!(!store.path().exists());
    }

    #[test]
    fn clear_only_empties_history() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(Message::user("test"));
        store.add_bookmark(Bookmark::new("Doc")).unwrap();
        store.add_session(Session::new("s", &[])).unwrap();

        store.clear();

        assert!(store.history().is_empty());
        assert_eq!(store.bookmarks().len(), 1);
        assert_eq!(store.sessions().len(), 1);
    }

    #[test]
    fn clear_does_not_persist() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(Message::user("kept on disk"));
        store.save().unwrap();

        store.clear();

        let reloaded = store_in(&dir);
        reloaded.load().unwrap();
        assert_eq!(reloaded.history(), vec![Message::user("kept on disk")]);
    }

    #[test]
    fn duplicate_bookmarks_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let doc = Bookmark::new("Test Doc").with_field("content", "Test content");

        assert!(store.add_bookmark(doc.clone()).unwrap());
        assert!(!store.add_bookmark(doc.clone()).unwrap());

        assert_eq!(store.bookmarks(), vec![doc]);
    }

    #[test]
    fn bookmarks_differing_in_any_field_are_distinct() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_bookmark(Bookmark::new("Doc").with_field("type", "md")).unwrap();
        store.add_bookmark(Bookmark::new("Doc").with_field("type", "rs")).unwrap();
        assert_eq!(store.bookmarks().len(), 2);
    }

    #[test]
    fn add_bookmark_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_bookmark(Bookmark::new("Saved")).unwrap();

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.load().unwrap(), LoadOutcome::Loaded { skipped: 0 });
        assert_eq!(reloaded.bookmarks(), vec![Bookmark::new("Saved")]);
    }

    #[test]
    fn sessions_are_not_deduplicated() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let session = Session::new("Test Session", &[]);
        store.add_session(session.clone()).unwrap();
        store.add_session(session.clone()).unwrap();
        assert_eq!(store.sessions(), vec![session.clone(), session]);
    }

    #[test]
    fn load_missing_file_keeps_current_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(Message::user("unsaved"));

        assert_eq!(store.load().unwrap(), LoadOutcome::Missing);
        assert_eq!(store.history(), vec![Message::user("unsaved")]);
    }

    #[test]
    fn load_corrupted_file_resets_everything() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(Message::user("in memory"));
        store.add_bookmark(Bookmark::new("Doc")).unwrap();
        std::fs::write(store.path(), "invalid json").unwrap();

        let outcome = store.load().unwrap();

        assert!(outcome.is_recovered());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn load_legacy_list_yields_empty_history() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            json!([{"user": "hello", "assistant": "hi"}]).to_string(),
        )
        .unwrap();

        assert!(store.load().unwrap().is_recovered());
        assert!(store.history().is_empty());
    }

    #[test]
    fn load_existing_file_populates_all_sequences() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            json!({
                "history": [{"role": "assistant", "content": "existing"}],
                "bookmarks": [{"title": "existing bookmark"}],
                "sessions": [{"name": "existing session"}],
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(store.load().unwrap(), LoadOutcome::Loaded { skipped: 0 });
        assert_eq!(store.history(), vec![Message::assistant("existing")]);
        assert_eq!(store.bookmarks()[0].title(), "existing bookmark");
        assert_eq!(store.sessions()[0].name(), "existing session");
    }

    #[test]
    fn load_older_layout_without_bookmarks_or_sessions() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            r#"{"history": [{"role": "user", "content": "old"}]}"#,
        )
        .unwrap();

        store.load().unwrap();
        assert_eq!(store.history(), vec![Message::user("old")]);
        assert!(store.bookmarks().is_empty());
        assert!(store.sessions().is_empty());
    }

    #[test]
    fn save_propagates_io_failures() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let store = ConversationStore::new(blocker.join("history.json"));

        let err = store.save().unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[tokio::test]
    async fn sync_and_async_saves_are_byte_identical() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(Message::user("q"));
        store.append(Message::assistant("a"));
        store.add_bookmark(Bookmark::new("Doc").with_field("type", "md")).unwrap();
        store.add_session(Session::new("s", &store.history())).unwrap();

        store.save().unwrap();
        let sync_bytes = std::fs::read(store.path()).unwrap();
        store.save_async().await.unwrap();
        let async_bytes = std::fs::read(store.path()).unwrap();

        assert_eq!(sync_bytes, async_bytes);
    }

    #[tokio::test]
    async fn async_round_trip_into_a_fresh_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        for i in 0..10 {
            store.append(Message::user(format!("Message {i}")));
        }
        store.save_async().await.unwrap();

        let fresh = store_in(&dir);
        fresh.load_async().await.unwrap();

        let history = fresh.history();
        assert_eq!(history.len(), 10);
        assert_eq!(history[9].content, "Message 9");
    }

    #[tokio::test]
    async fn concurrent_saves_and_loads_leave_a_readable_file() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir));
        store.append(Message::user("initial"));

        let (a, b, c) = tokio::join!(store.save_async(), store.load_async(), store.save_async());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.load().unwrap(), LoadOutcome::Loaded { skipped: 0 });
        assert!(reloaded.history().len() <= 1);
    }
}

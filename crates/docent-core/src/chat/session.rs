use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ChatError, ChatOrchestrator, ChatStream};
use crate::store::{ConversationStore, LoadOutcome, Message, Session, StoreError};

/// A completed turn. The reply is always delivered; `persist_error` is set
/// when the turn is in the in-memory transcript but could not be written to
/// disk.
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub persist_error: Option<StoreError>,
}

/// An orchestrator bound to a conversation store.
///
/// Only successful turns reach the transcript; a failed turn leaves it as
/// it was.
#[derive(Clone)]
pub struct ChatSession {
    orchestrator: ChatOrchestrator,
    store: Arc<ConversationStore>,
}

impl ChatSession {
    pub fn new(orchestrator: ChatOrchestrator, store: Arc<ConversationStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &ChatOrchestrator {
        &self.orchestrator
    }

    /// Load the store from disk.
    pub async fn initialize(&self) -> Result<LoadOutcome, StoreError> {
        let outcome = self.store.load_async().await?;
        if let LoadOutcome::Recovered { reason } = &outcome {
            warn!(target: "docent::chat", "Started with an empty history: {}", reason);
        }
        Ok(outcome)
    }

    pub async fn send(&self, user_text: &str) -> Result<TurnOutcome, ChatError> {
        self.send_with_token(user_text, CancellationToken::new())
            .await
    }

    pub async fn send_with_token(
        &self,
        user_text: &str,
        token: CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        let history = self.store.history();
        let reply = self
            .orchestrator
            .chat_with_token(user_text, &history, token)
            .await?;
        let persist_error = self.record_turn(user_text, &reply).await.err();
        if let Some(err) = &persist_error {
            warn!(target: "docent::chat", "Turn kept in memory but not saved: {}", err);
        }
        Ok(TurnOutcome {
            reply,
            persist_error,
        })
    }

    /// Stream a reply with the stored transcript as context. The caller
    /// records the turn with [`record_turn`](Self::record_turn) once the
    /// stream has finished cleanly.
    pub fn stream(&self, user_text: &str, token: CancellationToken) -> ChatStream {
        let history = self.store.history();
        self.orchestrator
            .chat_stream_with_token(user_text, &history, token)
    }

    /// Append a completed exchange and persist it. The exchange stays in the
    /// in-memory transcript even when the write fails.
    pub async fn record_turn(&self, user_text: &str, reply: &str) -> Result<(), StoreError> {
        self.store.append(Message::user(user_text));
        self.store.append(Message::assistant(reply));
        self.store.save_async().await
    }

    /// Snapshot the current transcript as a named session.
    pub fn save_session(&self, name: &str) -> Result<Session, StoreError> {
        let session = Session::new(name, &self.store.history())
            .with_field("created_at", Utc::now().to_rfc3339());
        self.store.add_session(session.clone())?;
        info!(target: "docent::chat", "Saved session '{}'", name);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::config::Config;
    use crate::test_utils::{FakeLauncher, ScriptedModelClient};
    use tempfile::TempDir;

    fn session(dir: &TempDir, client: ScriptedModelClient) -> ChatSession {
        let store = Arc::new(ConversationStore::new(dir.path().join("history.json")));
        let orchestrator = ChatOrchestrator::new(
            Arc::new(client),
            Arc::new(FakeLauncher::new("context7")),
            &Config::new("sk-test"),
        );
        ChatSession::new(orchestrator, store)
    }

    #[tokio::test]
    async fn successful_turn_is_recorded_and_persisted() {
        let dir = TempDir::new().unwrap();
        let chat = session(&dir, ScriptedModelClient::new().with_text("Hello!"));
        chat.initialize().await.unwrap();

        let outcome = chat.send("hi").await.unwrap();

        assert_eq!(outcome.reply, "Hello!");
        assert!(outcome.persist_error.is_none());
        let expected = vec![Message::user("hi"), Message::assistant("Hello!")];
        assert_eq!(chat.store().history(), expected);

        let reopened = ConversationStore::new(chat.store().path());
        reopened.load().unwrap();
        assert_eq!(reopened.history(), expected);
    }

    #[tokio::test]
    async fn failed_turn_leaves_history_untouched() {
        let dir = TempDir::new().unwrap();
        let chat = session(
            &dir,
            ScriptedModelClient::new()
                .with_text("first answer")
                .with_error(ApiError::from_status("openai", 500, "upstream down".to_string())),
        );
        chat.send("first").await.unwrap();

        let err = chat.send("second").await.unwrap_err();

        assert!(matches!(err, ChatError::Model(_)));
        assert_eq!(chat.store().history().len(), 2);
    }

    #[tokio::test]
    async fn reply_survives_a_failed_save() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let chat = ChatSession::new(
            ChatOrchestrator::new(
                Arc::new(ScriptedModelClient::new().with_text("still here")),
                Arc::new(FakeLauncher::new("context7")),
                &Config::new("sk-test"),
            ),
            Arc::new(ConversationStore::new(blocker.join("history.json"))),
        );

        let outcome = chat.send("q").await.unwrap();

        assert_eq!(outcome.reply, "still here");
        assert!(matches!(outcome.persist_error, Some(StoreError::Io { .. })));
        assert_eq!(
            chat.store().history(),
            vec![Message::user("q"), Message::assistant("still here")]
        );
    }

    #[tokio::test]
    async fn prior_turns_are_sent_as_context() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedModelClient::new().with_text("a").with_text("b"));
        let store = Arc::new(ConversationStore::new(dir.path().join("history.json")));
        let chat = ChatSession::new(
            ChatOrchestrator::new(
                client.clone(),
                Arc::new(FakeLauncher::new("context7")),
                &Config::new("sk-test"),
            ),
            store,
        );

        chat.send("one").await.unwrap();
        chat.send("two").await.unwrap();

        assert_eq!(client.requests()[1].messages.len(), 3);
    }

    #[test]
    fn save_session_snapshots_the_transcript() {
        let dir = TempDir::new().unwrap();
        let chat = session(&dir, ScriptedModelClient::new());
        chat.store().append(Message::user("q"));
        chat.store().append(Message::assistant("a"));

        let saved = chat.save_session("Morning").unwrap();

        assert_eq!(saved.name(), "Morning");
        assert_eq!(saved.messages().len(), 2);
        assert!(saved.get("created_at").is_some());
        assert_eq!(chat.store().sessions(), vec![saved]);
    }

    #[tokio::test]
    async fn initialize_reports_recovery() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("history.json"), "{not json").unwrap();
        let chat = session(&dir, ScriptedModelClient::new());

        assert!(chat.initialize().await.unwrap().is_recovered());
        assert!(chat.store().history().is_empty());
    }
}

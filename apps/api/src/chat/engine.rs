//! Conversation orchestrator — the per-message state machine.
//!
//! Flow per incoming message: hydrate memory → compose prompt → generate →
//! trigger check on the user's original text → on trigger, extract and
//! normalize with one repair round → append the turn pair to memory.
//!
//! The engine is stateless between messages except for the session-keyed
//! conversation memory. Backend failures are fatal for the current message;
//! structured-data failures degrade to a non-final conversational reply.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::extract::{extract_json, ExtractedJson};
use crate::chat::memory::{Role, SessionMemories};
use crate::chat::prompts::{compose_repair, compose_turn, APOLOGY_PREFIX, CONFIRMATION_REPLY};
use crate::chat::schema::SchemaDocument;
use crate::chat::store::MessageStore;
use crate::chat::trigger::TriggerSet;
use crate::llm_client::{CompletionBackend, LlmError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("generation backend failed: {0}")]
    Generation(#[from] LlmError),

    #[error("message store failed: {0}")]
    Store(#[from] anyhow::Error),
}

/// Result of one processed message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response_text: String,
    pub parsed_data: Option<Value>,
    pub is_final: bool,
}

pub struct IntakeEngine {
    backend: Arc<dyn CompletionBackend>,
    store: Arc<dyn MessageStore>,
    schema: Arc<SchemaDocument>,
    trigger: TriggerSet,
    memories: SessionMemories,
}

impl IntakeEngine {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        store: Arc<dyn MessageStore>,
        schema: Arc<SchemaDocument>,
        trigger: TriggerSet,
    ) -> Self {
        Self {
            backend,
            store,
            schema,
            trigger,
            memories: SessionMemories::new(),
        }
    }

    /// Resets in-process memory when a brand-new session starts under this id.
    pub async fn start_session(&self, session_id: Uuid) {
        self.memories.reset(session_id).await;
    }

    pub async fn process_message(
        &self,
        session_id: Uuid,
        user_text: &str,
    ) -> Result<ChatOutcome, EngineError> {
        let handle = self.memories.handle(session_id).await;
        // Holding the session lock across the whole transition serializes
        // concurrent messages for the same session.
        let mut memory = handle.lock().await;

        if memory.needs_hydration() {
            let turns = self.store.fetch_ordered(session_id).await?;
            if memory.hydrate(turns) && !memory.is_empty() {
                info!(%session_id, turns = memory.len(), "rehydrated session memory");
            }
        }

        let payload = compose_turn(&memory, user_text);
        let raw = self.backend.complete(&payload).await?;

        // The trigger reads the user's original text, never the reply.
        let outcome = if self.trigger.detect(user_text) {
            let transcript = if memory.is_empty() {
                format!("Human: {user_text}")
            } else {
                format!("{}\nHuman: {user_text}", memory.render())
            };
            match self.finalize(&raw, &transcript).await? {
                Some(record) => {
                    info!(%session_id, "final record produced");
                    ChatOutcome {
                        response_text: CONFIRMATION_REPLY.to_string(),
                        parsed_data: Some(record),
                        is_final: true,
                    }
                }
                None => ChatOutcome {
                    response_text: format!("{APOLOGY_PREFIX}{raw}"),
                    parsed_data: None,
                    is_final: false,
                },
            }
        } else {
            ChatOutcome {
                response_text: raw,
                parsed_data: None,
                is_final: false,
            }
        };

        // Memory mutates only once every generation round has succeeded, so
        // a failed or abandoned message leaves no trace.
        memory.push(Role::User, user_text);
        memory.push(Role::Assistant, outcome.response_text.clone());

        Ok(outcome)
    }

    /// Extraction → normalization on the primary reply, with exactly one
    /// stricter repair round. A second failure returns `None` and the
    /// message degrades to a non-final reply.
    async fn finalize(
        &self,
        raw: &str,
        transcript: &str,
    ) -> Result<Option<Value>, EngineError> {
        match self.try_extract(raw) {
            Ok(record) => return Ok(Some(record)),
            Err(reason) => warn!("primary extraction failed: {reason}"),
        }

        let payload = compose_repair(&self.schema.pretty(), transcript);
        let raw = self.backend.complete(&payload).await?;

        match self.try_extract(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                warn!("repair-round extraction failed: {reason}");
                Ok(None)
            }
        }
    }

    fn try_extract(&self, raw: &str) -> Result<Value, String> {
        match extract_json(raw) {
            ExtractedJson::Parsed(value) => {
                self.schema.normalize(value).map_err(|e| e.to_string())
            }
            ExtractedJson::Raw(_) => Err("no syntactically valid JSON in reply".to_string()),
        }
    }

    #[cfg(test)]
    async fn turns(&self, session_id: Uuid) -> Vec<crate::chat::memory::ConversationTurn> {
        self.memories
            .handle(session_id)
            .await
            .lock()
            .await
            .turns()
            .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;
    use crate::chat::schema::DEFAULT_SCHEMA_JSON;
    use crate::chat::store::test_support::InMemoryMessageStore;
    use crate::chat::trigger::TriggerMode;
    use crate::llm_client::PromptPayload;

    /// Replays a scripted list of replies and records every payload it saw.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
        payloads: Mutex<Vec<PromptPayload>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                calls: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, payload: &PromptPayload) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().await.push(payload.clone());
            let mut replies = self.replies.lock().await;
            Ok(replies
                .pop_front()
                .unwrap_or_else(|| "Baik, ada lagi yang perlu saya tahu?".to_string()))
        }
    }

    /// Always fails, as an unreachable backend would.
    struct FailingBackend;

    #[async_trait]
    impl CompletionBackend for FailingBackend {
        async fn complete(&self, _payload: &PromptPayload) -> Result<String, LlmError> {
            Err(LlmError::EmptyContent)
        }
    }

    fn record_json() -> Value {
        json!({
            "project": {
                "id": "p-1",
                "title": "Aplikasi Kasir",
                "slug": "aplikasi-kasir",
                "image": "https://example.com/kasir.png",
                "budget": {"minimum": 10_000_000, "total": 25_000_000},
                "duration": {"total": 3, "type": "month"},
                "published": false,
                "status": "created",
                "fundsStatus": "pending",
                "fundsUntil": "2025-06-01T00:00:00Z",
                "isFixed": true,
                "viewed": 0,
                "createdAt": "2025-01-10T08:00:00Z",
                "updatedAt": "2025-01-10T08:00:00Z"
            },
            "talent": {
                "id": "t-1",
                "name": "Backend Developer",
                "budget": 5_000_000,
                "experience": "intermediate",
                "payment": "fixed",
                "status": "open",
                "createdAt": "2025-01-10T08:00:00Z",
                "updatedAt": "2025-01-10T08:00:00Z"
            }
        })
    }

    fn engine_with(
        backend: Arc<dyn CompletionBackend>,
        store: Arc<dyn MessageStore>,
        mode: TriggerMode,
    ) -> IntakeEngine {
        IntakeEngine::new(
            backend,
            store,
            Arc::new(SchemaDocument::parse(DEFAULT_SCHEMA_JSON).unwrap()),
            TriggerSet::for_mode(mode),
        )
    }

    #[tokio::test]
    async fn test_plain_message_is_not_final() {
        let backend = ScriptedBackend::new(&["Menarik! Berapa budget Anda?"]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend.clone(), store, TriggerMode::Confirmation);
        let session_id = Uuid::new_v4();

        let outcome = engine
            .process_message(session_id, "Saya mau bikin aplikasi mobile")
            .await
            .unwrap();

        assert!(!outcome.is_final);
        assert!(outcome.parsed_data.is_none());
        assert_eq!(outcome.response_text, "Menarik! Berapa budget Anda?");
        assert_eq!(backend.call_count(), 1);

        let turns = engine.turns(session_id).await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_command_trigger_with_fenced_singular_talent() {
        let reply = format!(
            "Berikut data project Anda:\n```json\n{}\n```",
            serde_json::to_string_pretty(&record_json()).unwrap()
        );
        let backend = ScriptedBackend::new(&[&reply]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend.clone(), store, TriggerMode::Command);
        let session_id = Uuid::new_v4();

        let outcome = engine.process_message(session_id, "#submit").await.unwrap();

        assert!(outcome.is_final);
        assert_eq!(outcome.response_text, CONFIRMATION_REPLY);
        assert_eq!(backend.call_count(), 1);

        let record = outcome.parsed_data.unwrap();
        assert!(record.get("talent").is_none());
        let talents = record["talents"].as_array().unwrap();
        assert_eq!(talents.len(), 1);
        assert_eq!(talents[0]["name"], "Backend Developer");
    }

    #[tokio::test]
    async fn test_unparsable_prose_degrades_after_exactly_two_calls() {
        let backend = ScriptedBackend::new(&[
            "Hmm, saya rasa masih ada yang kurang.",
            "Masih belum bisa saya simpulkan.",
        ]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend.clone(), store, TriggerMode::Confirmation);
        let session_id = Uuid::new_v4();

        let outcome = engine.process_message(session_id, "ok").await.unwrap();

        assert_eq!(backend.call_count(), 2);
        assert!(!outcome.is_final);
        assert!(outcome.parsed_data.is_none());
        assert!(outcome.response_text.starts_with(APOLOGY_PREFIX));
        assert!(outcome
            .response_text
            .contains("Hmm, saya rasa masih ada yang kurang."));
    }

    #[tokio::test]
    async fn test_repair_round_recovers_plain_json() {
        let record = serde_json::to_string(&record_json()).unwrap();
        let backend = ScriptedBackend::new(&["Tentu, sudah saya catat semua.", &record]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend.clone(), store, TriggerMode::Confirmation);
        let session_id = Uuid::new_v4();

        let outcome = engine.process_message(session_id, "ok").await.unwrap();

        assert_eq!(backend.call_count(), 2);
        assert!(outcome.is_final);
        assert!(outcome.parsed_data.is_some());

        // The repair round reiterates the schema and the transcript
        let payloads = backend.payloads.lock().await;
        let repair = &payloads[1];
        assert!(repair.user.contains("\"project\""));
        assert!(repair.user.contains("Human: ok"));
    }

    #[tokio::test]
    async fn test_memory_holds_two_turns_per_message_in_order() {
        let backend = ScriptedBackend::new(&[]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend, store, TriggerMode::Command);
        let session_id = Uuid::new_v4();

        for text in ["pesan satu", "pesan dua", "pesan tiga"] {
            engine.process_message(session_id, text).await.unwrap();
        }

        let turns = engine.turns(session_id).await;
        assert_eq!(turns.len(), 6);
        assert_eq!(turns[0].content, "pesan satu");
        assert_eq!(turns[2].content, "pesan dua");
        assert_eq!(turns[4].content, "pesan tiga");
        for (i, turn) in turns.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected);
        }
    }

    #[tokio::test]
    async fn test_resumed_session_rehydrates_once() {
        let store = Arc::new(InMemoryMessageStore::new());
        let session_id = store.create_session("user-1").await.unwrap();
        store
            .append(session_id, Role::User, "saya mau bikin toko online")
            .await
            .unwrap();
        store
            .append(session_id, Role::Assistant, "Berapa budget Anda?")
            .await
            .unwrap();

        let backend = ScriptedBackend::new(&[]);
        let engine = engine_with(backend.clone(), store.clone(), TriggerMode::Confirmation);

        engine
            .process_message(session_id, "sekitar 20 juta")
            .await
            .unwrap();

        // Hydrated history plus the new turn pair
        let turns = engine.turns(session_id).await;
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].content, "saya mau bikin toko online");

        // The composed prompt carried the hydrated history
        let payloads = backend.payloads.lock().await;
        let system = payloads[0].system.as_deref().unwrap();
        assert!(system.contains("Human: saya mau bikin toko online"));
        assert!(system.contains("AI: Berapa budget Anda?"));
        drop(payloads);

        // Store edits after hydration are not reflected
        store
            .append(session_id, Role::User, "ditulis di belakang")
            .await
            .unwrap();
        engine.process_message(session_id, "lanjut").await.unwrap();
        let turns = engine.turns(session_id).await;
        assert_eq!(turns.len(), 6);
        assert!(!turns.iter().any(|t| t.content == "ditulis di belakang"));
    }

    #[tokio::test]
    async fn test_start_session_resets_memory() {
        let backend = ScriptedBackend::new(&[]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend, store, TriggerMode::Confirmation);
        let session_id = Uuid::new_v4();

        engine.process_message(session_id, "halo").await.unwrap();
        assert_eq!(engine.turns(session_id).await.len(), 2);

        engine.start_session(session_id).await;
        assert!(engine.turns(session_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_is_fatal_and_leaves_no_trace() {
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(
            Arc::new(FailingBackend),
            store,
            TriggerMode::Confirmation,
        );
        let session_id = Uuid::new_v4();

        let result = engine.process_message(session_id, "halo").await;
        assert!(matches!(result, Err(EngineError::Generation(_))));
        assert!(engine.turns(session_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_internal_repair_text_never_reaches_memory() {
        let backend = ScriptedBackend::new(&[
            "Jawaban pertama tanpa JSON.",
            "Jawaban kedua juga tanpa JSON.",
        ]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend, store, TriggerMode::Confirmation);
        let session_id = Uuid::new_v4();

        let outcome = engine.process_message(session_id, "ok").await.unwrap();

        let turns = engine.turns(session_id).await;
        assert_eq!(turns.len(), 2);
        // Only the degraded reply is remembered, not the repair attempt
        assert_eq!(turns[1].content, outcome.response_text);
        assert!(!turns
            .iter()
            .any(|t| t.content == "Jawaban kedua juga tanpa JSON."));
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_memory() {
        let backend = ScriptedBackend::new(&[]);
        let store = Arc::new(InMemoryMessageStore::new());
        let engine = engine_with(backend, store, TriggerMode::Confirmation);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        engine.process_message(a, "sesi pertama").await.unwrap();
        engine.process_message(b, "sesi kedua").await.unwrap();

        assert_eq!(engine.turns(a).await.len(), 2);
        assert_eq!(engine.turns(b).await.len(), 2);
        assert_eq!(engine.turns(a).await[0].content, "sesi pertama");
        assert_eq!(engine.turns(b).await[0].content, "sesi kedua");
    }
}

//! Session-scoped conversation memory.
//!
//! An append-only log of (role, text) turns per chat session. Memory is
//! rehydrated from persisted history at most once per process lifetime per
//! session, and cleared explicitly when a brand-new session begins. After
//! hydration it is NOT kept synchronized with the store.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parses a persisted role string. Unknown roles yield `None` so callers
    /// can skip malformed rows instead of failing a whole rehydration.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One conversation turn. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
    hydrated: bool,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True until the first successful hydration (or reset) while the log is
    /// still empty.
    pub fn needs_hydration(&self) -> bool {
        !self.hydrated && self.turns.is_empty()
    }

    /// Replays persisted turns into an empty memory. A no-op (returns false)
    /// if the memory already holds turns or was hydrated before.
    pub fn hydrate(&mut self, turns: Vec<ConversationTurn>) -> bool {
        if self.hydrated || !self.turns.is_empty() {
            return false;
        }
        self.turns = turns;
        self.hydrated = true;
        true
    }

    /// Clears the log for a brand-new session. Marks the memory hydrated:
    /// a fresh session has no history worth fetching.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.hydrated = true;
    }

    /// Renders the transcript for prompt injection.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| match t.role {
                Role::User => format!("Human: {}", t.content),
                Role::Assistant => format!("AI: {}", t.content),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Registry of per-session memories. Each session gets its own
/// `Arc<Mutex<ConversationMemory>>`; holding that lock across a message
/// transition serializes concurrent messages for the same session while
/// leaving other sessions free to proceed in parallel.
#[derive(Debug, Default)]
pub struct SessionMemories {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<ConversationMemory>>>>,
}

impl SessionMemories {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn handle(&self, session_id: Uuid) -> Arc<Mutex<ConversationMemory>> {
        self.inner
            .lock()
            .await
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(ConversationMemory::new())))
            .clone()
    }

    /// Resets memory when a brand-new session starts under this id.
    pub async fn reset(&self, session_id: Uuid) {
        let handle = self.handle(session_id).await;
        handle.lock().await.clear();
    }
}

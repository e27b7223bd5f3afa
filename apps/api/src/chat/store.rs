//! Message store — the persistence collaborator for sessions, turns, and
//! final records.
//!
//! The engine only reads from the store (one `fetch_ordered` per session
//! resume); the HTTP layer owns all writes.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::chat::memory::{ConversationTurn, Role};
use crate::models::chat::{ChatMessageRow, ProjectRecordRow};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_session(&self, user_id: &str) -> anyhow::Result<Uuid>;

    async fn append(&self, session_id: Uuid, role: Role, content: &str) -> anyhow::Result<()>;

    /// All turns of a session in creation order.
    async fn fetch_ordered(&self, session_id: Uuid) -> anyhow::Result<Vec<ConversationTurn>>;

    async fn store_final_record(&self, session_id: Uuid, record: &Value) -> anyhow::Result<()>;

    async fn fetch_latest_final_record(&self, session_id: Uuid)
        -> anyhow::Result<Option<Value>>;
}

/// PostgreSQL-backed store.
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create_session(&self, user_id: &str) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO chat_sessions (id, user_id) VALUES ($1, $2)")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn append(&self, session_id: Uuid, role: Role, content: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE chat_sessions SET updated_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_ordered(&self, session_id: Uuid) -> anyhow::Result<Vec<ConversationTurn>> {
        let rows: Vec<ChatMessageRow> = sqlx::query_as(
            "SELECT * FROM chat_messages WHERE session_id = $1 ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let turns = rows
            .into_iter()
            .filter_map(|row| match Role::parse(&row.role) {
                Some(role) => Some(ConversationTurn {
                    role,
                    content: row.content,
                }),
                None => {
                    warn!(message_id = %row.id, "skipping turn with unknown role '{}'", row.role);
                    None
                }
            })
            .collect();

        Ok(turns)
    }

    async fn store_final_record(&self, session_id: Uuid, record: &Value) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO project_records (id, session_id, record) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(record)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_latest_final_record(
        &self,
        session_id: Uuid,
    ) -> anyhow::Result<Option<Value>> {
        let row: Option<ProjectRecordRow> = sqlx::query_as(
            "SELECT * FROM project_records WHERE session_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.record))
    }
}

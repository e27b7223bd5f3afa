// Intake conversation prompt templates and fixed localized replies.
// All prompts for the chat module are defined here.

use crate::chat::memory::ConversationMemory;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::PromptPayload;

/// System persona for the intake conversation. `{chat_history}` is replaced
/// with the rendered transcript before sending.
pub const INTAKE_SYSTEM_TEMPLATE: &str = r#"You are a business creator assistant. Your role is to help users define their projects and talent requirements in detail through a natural conversation.

For each user message:
1. If it is a new project description or additional information:
   - Analyze the information provided
   - Ask specific questions about missing required details (title, budget, duration, roles needed)
   - Focus on one or two missing details at a time to keep the conversation natural
   - Provide suggestions based on the information given

2. Only when the user explicitly confirms they are done:
   - Generate a complete JSON record for the project and its talent postings
   - For any missing information, analyze the conversation history and make intelligent assumptions based on the project context, industry standards, and the user's stated constraints
   - Generate appropriate values for technical fields: UUIDs for ids, slugs from titles, current ISO timestamps for dates, realistic budgets for the project scope, durations matching the complexity

Do NOT emit the final JSON record before the user confirms. Until then, reply conversationally only.

Remember to:
- Keep responses focused on the current question or topic
- Not repeat previous conversation history back to the user
- Be concise but thorough in gathering information
- Use Indonesian language for conversational responses
- Ensure all generated data is realistic and contextually appropriate

Current conversation context:
{chat_history}"#;

/// Repair-round prompt. Reiterates the full schema and the transcript so the
/// backend can produce a complete record in one shot. Replace `{schema}` and
/// `{chat_history}` before sending.
pub const REPAIR_PROMPT_TEMPLATE: &str = r#"Based on our conversation about the project, generate a complete JSON record following this schema:

{schema}

Remember to:
1. Generate UUIDs for ids
2. Create slugs from titles
3. Use ISO 8601 format for dates
4. Make realistic assumptions for anything not discussed, based on the project context
5. Include every required field
6. Keep the data coherent and consistent

Previous conversation:
{chat_history}"#;

/// Reply sent when a final record was produced and stored.
pub const CONFIRMATION_REPLY: &str =
    "Baik, saya telah menyimpan detail project Anda. Apakah ada yang bisa saya bantu lagi?";

/// Prefix for the degraded reply when no record could be produced.
pub const APOLOGY_PREFIX: &str =
    "Maaf, saya masih membutuhkan beberapa informasi penting untuk melengkapi detail project. ";

/// Builds the per-turn payload: persona with the rendered history as system
/// instruction, the incoming text as the user turn. Pure; does not touch the
/// memory it reads.
pub fn compose_turn(memory: &ConversationMemory, user_text: &str) -> PromptPayload {
    PromptPayload {
        system: Some(INTAKE_SYSTEM_TEMPLATE.replace("{chat_history}", &memory.render())),
        user: user_text.to_string(),
    }
}

/// Builds the schema-reiterating payload for the single repair round.
/// `transcript` should already include the message being finalized.
pub fn compose_repair(schema_json: &str, transcript: &str) -> PromptPayload {
    PromptPayload {
        system: Some(JSON_ONLY_SYSTEM.to_string()),
        user: REPAIR_PROMPT_TEMPLATE
            .replace("{schema}", schema_json)
            .replace("{chat_history}", transcript),
    }
}

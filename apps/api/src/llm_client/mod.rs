/// LLM Client — the single point of entry for all generation-backend calls.
///
/// ARCHITECTURAL RULE: No other module may call the Groq API directly.
/// All completions MUST go through `CompletionBackend`.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const MAX_TOKENS: u32 = 4096;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Backend returned empty content")]
    EmptyContent,
}

/// A composed prompt ready for the backend: an optional system instruction
/// block plus the current user turn.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    pub system: Option<String>,
    pub user: String,
}

/// The one external, non-deterministic dependency of the intake pipeline:
/// given a composed prompt, produce a free-text completion.
///
/// Carried in `AppState` as `Arc<dyn CompletionBackend>` so tests can swap
/// in a scripted stub.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, payload: &PromptPayload) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatCompletionResponse {
    /// Extracts the text content of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Groq chat-completions client (OpenAI-compatible wire format).
/// Wraps the API with retry logic on 429/5xx and exponential backoff.
#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GroqClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            model,
        }
    }

    async fn call(&self, payload: &PromptPayload) -> Result<ChatCompletionResponse, LlmError> {
        let request_body = ChatCompletionRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: build_messages(payload),
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Backend call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(GROQ_API_URL)
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Backend API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                // Try to parse the structured error message
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let completion: ChatCompletionResponse = response.json().await?;

            if let Some(usage) = &completion.usage {
                debug!(
                    "Backend call succeeded: prompt_tokens={}, completion_tokens={}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }

            return Ok(completion);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl CompletionBackend for GroqClient {
    async fn complete(&self, payload: &PromptPayload) -> Result<String, LlmError> {
        let completion = self.call(payload).await?;
        completion
            .text()
            .map(str::to_owned)
            .ok_or(LlmError::EmptyContent)
    }
}

fn build_messages<'a>(payload: &'a PromptPayload) -> Vec<WireMessage<'a>> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = payload.system.as_deref() {
        messages.push(WireMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(WireMessage {
        role: "user",
        content: &payload.user,
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_with_system() {
        let payload = PromptPayload {
            system: Some("persona".to_string()),
            user: "halo".to_string(),
        };
        let messages = build_messages(&payload);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "persona");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "halo");
    }

    #[test]
    fn test_build_messages_without_system() {
        let payload = PromptPayload {
            system: None,
            user: "halo".to_string(),
        };
        let messages = build_messages(&payload);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn test_completion_response_text() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Baik, dicatat."}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        }"#;
        let completion: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(completion.text(), Some("Baik, dicatat."));
        assert_eq!(completion.usage.unwrap().completion_tokens, 8);
    }

    #[test]
    fn test_completion_response_empty_choices() {
        let json = r#"{"choices": []}"#;
        let completion: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(completion.text(), None);
    }
}

use anyhow::{Context, Result};

use crate::chat::trigger::TriggerMode;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub groq_api_key: String,
    pub groq_model: String,
    /// Path to the schema document; falls back to the bundled default.
    pub schema_path: Option<String>,
    pub trigger_mode: TriggerMode,
    /// Overrides the mode's default phrase list when set.
    pub trigger_phrases: Option<Vec<String>>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let trigger_mode = std::env::var("TRIGGER_MODE")
            .unwrap_or_else(|_| "confirmation".to_string())
            .parse::<TriggerMode>()
            .map_err(anyhow::Error::msg)
            .context("TRIGGER_MODE must be 'confirmation' or 'command'")?;

        let trigger_phrases = std::env::var("TRIGGER_PHRASES").ok().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        });

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            groq_api_key: require_env("GROQ_API_KEY")?,
            groq_model: std::env::var("GROQ_MODEL_NAME")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            schema_path: std::env::var("SCHEMA_PATH").ok(),
            trigger_mode,
            trigger_phrases,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

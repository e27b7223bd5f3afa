//! Trigger detection — decides, from the latest user utterance alone,
//! whether the conversation should move into finalize mode.

use std::str::FromStr;

/// Phrase convention in force for a deployment. `Confirmation` finalizes on
/// affirmative words; `Command` requires an explicit hashtag command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Confirmation,
    Command,
}

impl TriggerMode {
    pub fn default_phrases(self) -> Vec<String> {
        let phrases: &[&str] = match self {
            TriggerMode::Confirmation => &["oke", "ok", "yes", "good"],
            TriggerMode::Command => &["#submit", "#generate", "#selesai", "#done", "#finish"],
        };
        phrases.iter().map(|p| p.to_string()).collect()
    }
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "confirmation" => Ok(TriggerMode::Confirmation),
            "command" => Ok(TriggerMode::Command),
            other => Err(format!(
                "unknown trigger mode '{other}' (expected 'confirmation' or 'command')"
            )),
        }
    }
}

/// A fixed, configured set of trigger phrases.
#[derive(Debug, Clone)]
pub struct TriggerSet {
    phrases: Vec<String>,
}

impl TriggerSet {
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    pub fn for_mode(mode: TriggerMode) -> Self {
        Self::new(mode.default_phrases())
    }

    /// Case-insensitive substring match against the configured phrases.
    /// No fuzzy matching, no scoring. Never errors.
    pub fn detect(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str()))
    }
}

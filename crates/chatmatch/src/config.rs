use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::prompt::{PrefixPlacement, PromptBudget, RoleLabels};

/// Minimum gap between two attempts of the same scheduled request.
pub const MIN_RETRY_INTERVAL_FLOOR_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub prompt: PromptConfig,
    pub classifier: ClassifierConfig,
    pub scheduler: SchedulerConfig,
    pub provider: ProviderConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Character budget for a compiled chat prompt.
    pub max_length: usize,
    pub stop_marker: String,
    pub user_label: String,
    pub assistant_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Character budget for one batch of candidates.
    pub max_length: usize,
    pub retry_backoff_ms: u64,
    /// Give up retrying transient provider errors after this long.
    pub retry_deadline_secs: u64,
    /// Completion length for the id answer; a handful of digits is enough.
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub min_retry_interval_secs: u64,
    pub deadline_secs: u64,
    pub rate_limit_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Read from `CHATMATCH_API_KEY` when absent from the file.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    /// Answer from stored intents before asking the model.
    pub faq_first: bool,
    /// Let the classifier pick an intent when no stored phrasing matches.
    pub classifier_fallback: bool,
    /// Knowledge snippets prepended to the system prompt (0 disables retrieval).
    pub knowledge_snippets: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_length: 6000,
            stop_marker: "\n\n###".to_string(),
            user_label: "User".to_string(),
            assistant_label: "Assistant".to_string(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_length: 3000,
            retry_backoff_ms: 1500,
            retry_deadline_secs: 180,
            max_tokens: 8,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_retry_interval_secs: MIN_RETRY_INTERVAL_FLOOR_SECS,
            deadline_secs: 180,
            rate_limit_delay_ms: 2000,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            max_tokens: 512,
            temperature: 0.7,
            connect_timeout_secs: 15,
            request_timeout_secs: 120,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant. Answer the user's last message \
                            using the conversation so far."
                .to_string(),
            faq_first: true,
            classifier_fallback: true,
            knowledge_snippets: 0,
        }
    }
}

impl PromptConfig {
    pub fn budget(&self) -> PromptBudget {
        PromptBudget {
            max_length: self.max_length,
            stop_marker: self.stop_marker.clone(),
            labels: RoleLabels {
                user: self.user_label.clone(),
                assistant: self.assistant_label.clone(),
            },
            placement: PrefixPlacement::Prefix,
        }
    }

    /// Budget for classifier batches: same markers, smaller window, the
    /// instruction goes after the candidates.
    pub fn classifier_budget(&self, classifier: &ClassifierConfig) -> PromptBudget {
        PromptBudget {
            max_length: classifier.max_length,
            placement: PrefixPlacement::Postfix,
            ..self.budget()
        }
    }
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.max_length == 0 {
            return Err(EngineError::Config("prompt.max_length must be > 0".into()));
        }
        if self.prompt.stop_marker.is_empty() {
            return Err(EngineError::Config("prompt.stop_marker must not be empty".into()));
        }
        if self.prompt.user_label.trim().is_empty()
            || self.prompt.assistant_label.trim().is_empty()
        {
            return Err(EngineError::Config("prompt labels must not be empty".into()));
        }
        if self.classifier.max_length == 0 {
            return Err(EngineError::Config("classifier.max_length must be > 0".into()));
        }
        if self.scheduler.min_retry_interval_secs < MIN_RETRY_INTERVAL_FLOOR_SECS {
            return Err(EngineError::Config(format!(
                "scheduler.min_retry_interval_secs must be >= {}",
                MIN_RETRY_INTERVAL_FLOOR_SECS
            )));
        }
        if self.scheduler.deadline_secs <= self.scheduler.min_retry_interval_secs {
            return Err(EngineError::Config(
                "scheduler.deadline_secs must exceed min_retry_interval_secs".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(EngineError::Config("provider.temperature must be in [0.0, 2.0]".into()));
        }
        if self.provider.endpoint.is_empty() {
            return Err(EngineError::Config("provider.endpoint must not be empty".into()));
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file from `CHATMATCH_CONFIG` or the platform config
    /// directory; use defaults when neither exists.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "Loading engine config");
                Self::from_file(&path)
            }
            _ => {
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn default_path() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("CHATMATCH_CONFIG") {
            return Some(PathBuf::from(env_path));
        }
        dirs::config_dir().map(|dir| dir.join("chatmatch").join("config.json"))
    }

    fn apply_env(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("CHATMATCH_API_KEY")
                .ok()
                .filter(|k| !k.is_empty());
        }
    }
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_VISION_PROVIDER: &str = "anthropic";
pub const DEFAULT_ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_VISION_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_AIRTABLE_API_BASE: &str = "https://api.airtable.com/v0";
pub const DEFAULT_FEEDBACK_TABLE: &str = "HG Feedback";
pub const FEEDBACK_TIMEOUT_SECS: u64 = 10;

/// Where feedback goes besides the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub base_id: Option<String>,
    pub table: String,
    pub journal_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_AIRTABLE_API_BASE.to_string(),
            api_key: None,
            base_id: None,
            table: DEFAULT_FEEDBACK_TABLE.to_string(),
            journal_path: None,
            timeout: Duration::from_secs(FEEDBACK_TIMEOUT_SECS),
        }
    }
}

impl FeedbackConfig {
    pub fn remote_configured(&self) -> bool {
        self.api_key.is_some() && self.base_id.is_some()
    }
}

/// Process-wide settings, resolved once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub anthropic_api_key: Option<String>,
    pub anthropic_api_base: String,
    pub events_path: Option<PathBuf>,
    pub feedback: FeedbackConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_VISION_PROVIDER.to_string(),
            model: DEFAULT_VISION_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            anthropic_api_key: None,
            anthropic_api_base: DEFAULT_ANTHROPIC_API_BASE.to_string(),
            events_path: None,
            feedback: FeedbackConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider: non_empty_env("HG_VISION_PROVIDER")
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or(defaults.provider),
            model: non_empty_env("HG_VISION_MODEL").unwrap_or(defaults.model),
            max_tokens: parsed_env("HG_MAX_TOKENS").unwrap_or(defaults.max_tokens),
            request_timeout: parsed_env("HG_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            anthropic_api_base: first_non_empty_env(&["ANTHROPIC_API_BASE", "ANTHROPIC_BASE_URL"])
                .unwrap_or(defaults.anthropic_api_base),
            events_path: non_empty_env("HG_EVENTS_PATH").map(PathBuf::from),
            feedback: FeedbackConfig {
                api_base: non_empty_env("AIRTABLE_API_BASE")
                    .unwrap_or(defaults.feedback.api_base),
                api_key: non_empty_env("AIRTABLE_API_KEY"),
                base_id: non_empty_env("AIRTABLE_BASE_ID"),
                table: non_empty_env("HG_FEEDBACK_TABLE").unwrap_or(defaults.feedback.table),
                journal_path: non_empty_env("HG_FEEDBACK_JOURNAL").map(PathBuf::from),
                timeout: defaults.feedback.timeout,
            },
        }
    }

    /// Offline settings: deterministic provider, no remote feedback.
    pub fn dryrun() -> Self {
        Self {
            provider: "dryrun".to_string(),
            model: "dryrun-vision-1".to_string(),
            ..Self::default()
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_env(key))
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = non_empty_env(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}

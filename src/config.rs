use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use teloxide::types::{ChatId, UserId};

use crate::llm::Provider;

/// Telegram refuses messages longer than this.
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the `.env` file.
    ReadEnvFile { path: PathBuf, source: dotenvy::Error },
    /// A required variable is not set.
    Missing(&'static str),
    /// A variable is set but cannot be parsed.
    Invalid { key: &'static str, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadEnvFile { path, source } => {
                write!(f, "failed to read env file '{}': {}", path.display(), source)
            }
            Self::Missing(key) => write!(f, "{} is required", key),
            Self::Invalid { key, value } => write!(f, "{} has an invalid value '{}'", key, value),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadEnvFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Process-wide settings. Loaded once at start, never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    /// Senders allowed to use the bot. Empty means authorization is off.
    pub allowed_user_ids: HashSet<UserId>,
    pub supabase_url: String,
    pub supabase_key: String,
    pub llm_provider: Provider,
    pub llm_api_key: String,
    /// Vendor base URL (provider default unless `LLM_BASE_URL` is set).
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_max_attempts: u32,
    pub llm_retry_base: Duration,
    pub db_timeout: Duration,
    pub db_max_rows: usize,
    /// Classifications with a lower self-reported confidence are treated as not understood.
    pub confidence_threshold: f64,
    /// Replies are cut to this many characters.
    pub max_response_length: usize,
    pub log_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    /// Load from the process environment, with `env_file` supplying anything unset.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let file_vars = match env_file {
            Some(path) => read_env_file(path)?,
            None => HashMap::new(),
        };
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file_vars.get(key).cloned()))
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let bot_token = require("BOT_TOKEN")?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "BOT_TOKEN appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let allowed_user_ids = match get("ALLOWED_USER_IDS") {
            Some(raw) => parse_user_ids(&raw)?,
            None => HashSet::new(),
        };

        let supabase_url = require("SUPABASE_URL")?.trim_end_matches('/').to_string();
        if !supabase_url.starts_with("http://") && !supabase_url.starts_with("https://") {
            return Err(ConfigError::Validation("SUPABASE_URL must be an http(s) URL".into()));
        }
        let supabase_key = require("SUPABASE_KEY")?;

        let llm_provider = match get("LLM_PROVIDER") {
            Some(raw) => raw
                .parse::<Provider>()
                .map_err(|_| ConfigError::Invalid { key: "LLM_PROVIDER", value: raw })?,
            None => Provider::Groq,
        };
        let llm_api_key = require("LLM_API_KEY")?;
        let llm_base_url = get("LLM_BASE_URL")
            .unwrap_or_else(|| llm_provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        let llm_model = get("LLM_MODEL").unwrap_or_else(|| llm_provider.default_model().to_string());

        let llm_timeout = Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 30u64)?);
        let llm_max_attempts = parse_or(&get, "LLM_MAX_ATTEMPTS", 3u32)?;
        let llm_retry_base = Duration::from_millis(parse_or(&get, "LLM_RETRY_BASE_MS", 500u64)?);
        let db_timeout = Duration::from_secs(parse_or(&get, "DB_TIMEOUT_SECS", 15u64)?);
        let db_max_rows = parse_or(&get, "DB_MAX_ROWS", 20usize)?;
        let confidence_threshold = parse_or(&get, "CONFIDENCE_THRESHOLD", 0.3f64)?;
        let max_response_length = parse_or(&get, "MAX_RESPONSE_LENGTH", 4000usize)?;

        if llm_max_attempts == 0 {
            return Err(ConfigError::Validation("LLM_MAX_ATTEMPTS must be at least 1".into()));
        }
        if db_max_rows == 0 {
            return Err(ConfigError::Validation("DB_MAX_ROWS must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConfigError::Validation("CONFIDENCE_THRESHOLD must be between 0 and 1".into()));
        }
        if max_response_length == 0 || max_response_length > TELEGRAM_MESSAGE_LIMIT {
            return Err(ConfigError::Validation(format!(
                "MAX_RESPONSE_LENGTH must be between 1 and {TELEGRAM_MESSAGE_LIMIT}"
            )));
        }

        let log_dir = get("LOG_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("logs"));
        let log_chat_id = match get("LOG_CHAT_ID") {
            Some(raw) => Some(ChatId(
                raw.parse::<i64>()
                    .map_err(|_| ConfigError::Invalid { key: "LOG_CHAT_ID", value: raw })?,
            )),
            None => None,
        };

        Ok(Self {
            bot_token,
            allowed_user_ids,
            supabase_url,
            supabase_key,
            llm_provider,
            llm_api_key,
            llm_base_url,
            llm_model,
            llm_timeout,
            llm_max_attempts,
            llm_retry_base,
            db_timeout,
            db_max_rows,
            confidence_threshold,
            max_response_length,
            log_dir,
            log_chat_id,
        })
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let to_err = |source| ConfigError::ReadEnvFile { path: path.to_path_buf(), source };
    dotenvy::from_path_iter(path)
        .map_err(to_err)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(to_err)
}

/// A typo must not silently empty the list, since an empty list disables authorization.
fn parse_user_ids(raw: &str) -> Result<HashSet<UserId>, ConfigError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(UserId)
                .map_err(|_| ConfigError::Invalid { key: "ALLOWED_USER_IDS", value: s.to_string() })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    if ids.is_empty() {
        return Err(ConfigError::Invalid { key: "ALLOWED_USER_IDS", value: raw.to_string() });
    }
    Ok(ids)
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

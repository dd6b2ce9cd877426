//! Chat-completion clients for the supported LLM vendors.
//!
//! Every vendor sits behind [`LlmClient`]; the concrete client is picked from
//! config once at startup and shared as `Arc<dyn LlmClient>`.

pub mod dashscope;
pub mod openai;
pub mod retry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;

pub use dashscope::DashScopeClient;
pub use openai::OpenAiCompatClient;
pub use retry::{RetryPolicy, Retrying};

/// Temperature for intent classification.
pub const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Temperature for composing natural-language replies.
pub const COMPOSE_TEMPERATURE: f32 = 0.7;

/// A single system + user exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Ask for a strict JSON object, where the vendor supports it.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: COMPOSE_TEMPERATURE,
            json_mode: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one request and return the text of the first choice.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    /// The request did not finish within the client timeout.
    Timeout,
    /// Connection-level failure.
    Transport(String),
    /// Non-success HTTP status.
    Status { status: u16, body: String },
    /// Body could not be decoded.
    Malformed(String),
    /// No choices, or an empty message.
    Empty,
}

impl LlmError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) | Self::Empty => false,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Transport(e) => write!(f, "HTTP error: {e}"),
            Self::Status { status, body } => write!(f, "API error {status}: {body}"),
            Self::Malformed(e) => write!(f, "malformed response: {e}"),
            Self::Empty => write!(f, "empty response"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Supported chat-completion vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Groq,
    OpenRouter,
    Nscale,
    DashScope,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Nscale => "https://inference.api.nscale.com/v1",
            Self::DashScope => "https://dashscope.aliyuncs.com/api/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenRouter => "qwen/qwen3-235b-a22b",
            Self::Nscale => "Qwen/Qwen3-235B-A22B",
            Self::DashScope => "qwen-max",
        }
    }

    /// Whether the vendor honours `response_format: json_object`.
    pub fn supports_json_mode(&self) -> bool {
        !matches!(self, Self::Nscale)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
            Self::Nscale => "nscale",
            Self::DashScope => "dashscope",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openrouter" => Ok(Self::OpenRouter),
            "nscale" => Ok(Self::Nscale),
            "dashscope" | "qwen" => Ok(Self::DashScope),
            other => Err(format!("unknown LLM provider '{other}'")),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the configured vendor client wrapped in the retry policy.
pub fn from_config(config: &Config) -> Result<Arc<dyn LlmClient>, LlmError> {
    let inner: Arc<dyn LlmClient> = match config.llm_provider {
        Provider::DashScope => Arc::new(DashScopeClient::new(
            &config.llm_base_url,
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            config.llm_timeout,
        )?),
        provider => Arc::new(OpenAiCompatClient::new(
            provider,
            &config.llm_base_url,
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            config.llm_timeout,
        )?),
    };

    let policy = RetryPolicy {
        max_attempts: config.llm_max_attempts,
        base_delay: config.llm_retry_base,
        ..RetryPolicy::default()
    };
    Ok(Arc::new(Retrying::new(inner, policy)))
}

/// Remove `<think>…</think>` reasoning blocks that some models prepend.
pub fn strip_reasoning(text: &str) -> String {
    use std::sync::LazyLock;

    static THINK: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"(?s)<think>.*?(</think>|$)").expect("static regex")
    });
    THINK.replace_all(text, "").trim().to_string()
}

//! OpenAI-style `/chat/completions` client (Groq, OpenRouter, Nscale).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{ChatRequest, LlmClient, LlmError, Provider};

pub struct OpenAiCompatClient {
    provider: Provider,
    endpoint: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
pub(crate) struct ApiMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

pub(crate) const JSON_OBJECT: ResponseFormat = ResponseFormat { kind: "json_object" };

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Choice {
    pub message: Option<ChoiceMessage>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

/// Text of the first choice, or `Empty`.
pub(crate) fn first_choice_text(choices: Vec<Choice>) -> Result<String, LlmError> {
    choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(LlmError::Empty)
}

pub(crate) fn two_messages<'a>(request: &'a ChatRequest) -> [ApiMessage<'a>; 2] {
    [
        ApiMessage { role: "system", content: &request.system },
        ApiMessage { role: "user", content: &request.user },
    ]
}

impl OpenAiCompatClient {
    pub fn new(
        provider: Provider,
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
            http,
        })
    }

    fn body<'a>(&'a self, request: &'a ChatRequest) -> ApiRequest<'a> {
        let response_format =
            (request.json_mode && self.provider.supports_json_mode()).then_some(JSON_OBJECT);
        ApiRequest {
            model: &self.model,
            messages: two_messages(request),
            temperature: request.temperature,
            response_format,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        debug!("{} request: model={}, json={}", self.provider, self.model, request.json_mode);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let parsed: ApiResponse = response.json().await.map_err(LlmError::from_reqwest)?;
        first_choice_text(parsed.choices)
    }
}

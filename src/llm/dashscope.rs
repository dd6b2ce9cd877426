//! DashScope (Qwen) native text-generation client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::openai::{first_choice_text, two_messages, ApiMessage, Choice, ResponseFormat, JSON_OBJECT};
use crate::llm::{ChatRequest, LlmClient, LlmError};

const GENERATION_PATH: &str = "services/aigc/text-generation/generation";

pub struct DashScopeClient {
    endpoint: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    input: Input<'a>,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Input<'a> {
    messages: [ApiMessage<'a>; 2],
}

#[derive(Serialize)]
struct Parameters {
    result_format: &'static str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    output: Option<Output>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Output {
    #[serde(default)]
    choices: Vec<Choice>,
}

impl DashScopeClient {
    pub fn new(base_url: &str, api_key: String, model: String, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), GENERATION_PATH),
            api_key,
            model,
            http,
        })
    }

    fn body<'a>(&'a self, request: &'a ChatRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            input: Input { messages: two_messages(request) },
            parameters: Parameters {
                result_format: "message",
                temperature: request.temperature,
                response_format: request.json_mode.then_some(JSON_OBJECT),
            },
        }
    }
}

fn extract_text(parsed: GenerateResponse) -> Result<String, LlmError> {
    // DashScope reports some failures with HTTP 200 and a `code`
    if let Some(code) = parsed.code.filter(|c| !c.is_empty()) {
        let message = parsed.message.unwrap_or_default();
        return Err(LlmError::Malformed(format!("{code}: {message}")));
    }
    let output = parsed.output.ok_or(LlmError::Empty)?;
    first_choice_text(output.choices)
}

#[async_trait]
impl LlmClient for DashScopeClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        debug!("dashscope request: model={}, json={}", self.model, request.json_mode);

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

        let parsed: GenerateResponse = response.json().await.map_err(LlmError::from_reqwest)?;
        extract_text(parsed)
    }
}

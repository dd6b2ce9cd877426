//! Second LLM call: turns lookup results into a reply.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::context::ContextData;
use crate::llm::{strip_reasoning, ChatRequest, LlmClient, COMPOSE_TEMPERATURE};
use crate::nlu::NluResult;

const SYSTEM_PROMPT: &str = "Ты — корпоративный ассистент. Твоя задача — сформировать понятный и \
дружелюбный ответ на основе предоставленных данных. \
Используй только предоставленную информацию, не выдумывай факты, имена, даты или задачи. \
Если context.found равно false или данных нет, прямо скажи, что ничего не найдено. \
Если в context есть поле error, вежливо сообщи, что данные сейчас недоступны. \
Отвечай на русском языке, кратко и по делу, без разметки Markdown.";

pub struct Composer {
    llm: Arc<dyn LlmClient>,
}

impl Composer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// The exchange sent to the model for `nlu` and `context`.
    pub fn request(nlu: &NluResult, context: &ContextData) -> ChatRequest {
        let payload = json!({
            "intent": nlu.intent,
            "entities": nlu.entities,
            "context": context,
        });
        ChatRequest::new(SYSTEM_PROMPT, payload.to_string()).temperature(COMPOSE_TEMPERATURE)
    }

    /// `None` when the model fails or answers with nothing usable.
    pub async fn compose(&self, nlu: &NluResult, context: &ContextData) -> Option<String> {
        match self.llm.complete(&Self::request(nlu, context)).await {
            Ok(text) => Some(strip_reasoning(&text)).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("Composer failed for {}: {e}", nlu.intent);
                None
            }
        }
    }
}

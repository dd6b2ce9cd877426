//! Intent classification: prompt, model call and strict validation of the reply.
//!
//! The model is asked for `{"intent": ..., "entities": {...}}`. Its reply is
//! parsed as JSON only; anything that does not validate is "not understood".

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::{strip_reasoning, ChatRequest, LlmClient, LlmError, CLASSIFY_TEMPERATURE};

/// Extracted slots. Missing key means "not specified".
pub type Entities = BTreeMap<String, String>;

/// Entity keys the prompt asks for. Others are kept if the model adds them.
pub const ENTITY_KEYS: [&str; 9] = [
    "employee_name",
    "department",
    "position",
    "project",
    "date",
    "event_type",
    "task_keyword",
    "location",
    "info_type",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FindEmployee,
    FindByPosition,
    FindByDepartment,
    Availability,
    EventInfo,
    TaskInfo,
    GeneralQuestion,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 8] = [
        Intent::FindEmployee,
        Intent::FindByPosition,
        Intent::FindByDepartment,
        Intent::Availability,
        Intent::EventInfo,
        Intent::TaskInfo,
        Intent::GeneralQuestion,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FindEmployee => "find_employee",
            Self::FindByPosition => "find_by_position",
            Self::FindByDepartment => "find_by_department",
            Self::Availability => "availability",
            Self::EventInfo => "event_info",
            Self::TaskInfo => "task_info",
            Self::GeneralQuestion => "general_question",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.as_str() == s)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NluResult {
    pub intent: Intent,
    pub entities: Entities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Validate raw model output.
///
/// Takes the text from the first `{` to the last `}` so that prose around the
/// object is tolerated. Returns `None` unless that text is a JSON object with
/// a recognized string `intent` and, if present, an object `entities`.
pub fn validate(raw: &str) -> Option<NluResult> {
    let text = strip_reasoning(raw);
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }

    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let object = value.as_object()?;
    let intent = Intent::parse(object.get("intent")?.as_str()?)?;

    let entities = match object.get("entities") {
        None | Some(Value::Null) => Entities::new(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), text))
            })
            .collect(),
        Some(_) => return None,
    };

    let confidence = object.get("confidence").and_then(Value::as_f64);

    Some(NluResult { intent, entities, confidence })
}

/// Prompt for the classification call.
pub fn system_prompt() -> String {
    let intents: Vec<&str> = Intent::ALL.iter().map(Intent::as_str).collect();
    format!(
        r#"Ты — модуль распознавания запросов корпоративного Telegram-бота.
Определи намерение пользователя и извлеки сущности. Ответь ТОЛЬКО JSON-объектом без пояснений:
{{"intent": "<намерение>", "entities": {{"<ключ>": "<значение>"}}, "confidence": <число от 0 до 1>}}

Допустимые намерения: {intents}.
- find_employee: поиск сотрудника по имени, отделу или должности
- find_by_position: кто работает на определённой должности
- find_by_department: кто работает в определённом отделе
- availability: кто свободен или работает в определённый день
- event_info: мероприятия (дата, тип, место)
- task_info: задачи (ключевое слово, проект)
- general_question: общий вопрос, не требующий данных компании
- unknown: запрос непонятен

Допустимые ключи сущностей: {keys}.
Указывай только то, что явно есть в запросе. Не добавляй пустые значения.
Дату указывай только если она названа явно, в формате ДД.ММ.ГГГГ. Относительные даты ("завтра", "на следующей неделе") не указывай.
Названия отделов и должностей приводи к начальной форме в нижнем регистре ("отдела разработки" → "разработка")."#,
        intents = intents.join(", "),
        keys = ENTITY_KEYS.join(", "),
    )
}

#[derive(Debug)]
pub enum NluError {
    /// The model could not be reached or returned nothing.
    Llm(LlmError),
    /// The model answered, but not with a valid classification.
    Unrecognized(String),
}

impl fmt::Display for NluError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm(e) => write!(f, "LLM error: {e}"),
            Self::Unrecognized(raw) => write!(f, "unrecognized model output: {raw}"),
        }
    }
}

impl std::error::Error for NluError {}

/// Runs the classification call.
pub struct NluProcessor {
    llm: Arc<dyn LlmClient>,
}

impl NluProcessor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn understand(&self, text: &str) -> Result<NluResult, NluError> {
        let request = ChatRequest::new(system_prompt(), text)
            .temperature(CLASSIFY_TEMPERATURE)
            .json();
        let raw = self.llm.complete(&request).await.map_err(NluError::Llm)?;

        match validate(&raw) {
            Some(result) => {
                info!("NLU: intent={} entities={:?}", result.intent, result.entities);
                Ok(result)
            }
            None => {
                let preview: String = raw.chars().take(200).collect();
                warn!("NLU output did not validate: {preview:?}");
                Err(NluError::Unrecognized(raw))
            }
        }
    }
}

//! The assistant: authorization, command handling and the NLU pipeline.
//!
//! Everything here is independent of Telegram. `main` turns updates into
//! [`Request`]s and sends back whatever [`Assistant::handle`] returns.

use std::sync::Arc;

use teloxide::types::UserId;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::assistant::commands::{Command, Request};
use crate::assistant::format::{self, replies};
use crate::auth::{Access, AccessGate, DENIED_MESSAGE};
use crate::backend::models::{columns, DatabaseQuery};
use crate::backend::{Backend, BackendError, Direction, Filter, NewEvent, NewTask, Query, Row, Table};
use crate::composer::Composer;
use crate::config::Config;
use crate::context::ContextLookup;
use crate::llm::LlmClient;
use crate::nlu::{self, Intent, NluError, NluProcessor, NluResult};

/// Settings the assistant needs from [`Config`].
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub confidence_threshold: f64,
    pub max_response_length: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self { confidence_threshold: 0.3, max_response_length: 4000 }
    }
}

impl From<&Config> for AssistantConfig {
    fn from(config: &Config) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            max_response_length: config.max_response_length,
        }
    }
}

pub struct Assistant {
    config: AssistantConfig,
    gate: AccessGate,
    backend: Arc<dyn Backend>,
    nlu: NluProcessor,
    lookup: ContextLookup,
    composer: Composer,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        gate: AccessGate,
        llm: Arc<dyn LlmClient>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            config,
            gate,
            nlu: NluProcessor::new(llm.clone()),
            lookup: ContextLookup::new(backend.clone()),
            composer: Composer::new(llm),
            backend,
        }
    }

    pub fn check_access(&self, sender: Option<UserId>) -> Access {
        self.gate.check(sender)
    }

    /// Reply for one message. Never fails: every path ends in a user-facing text.
    pub async fn handle(&self, sender: Option<UserId>, request: Request) -> String {
        if self.check_access(sender) == Access::Denied {
            info!("Denied {:?}", sender);
            return DENIED_MESSAGE.to_string();
        }

        let reply = match request {
            Request::Command(command) => self.handle_command(command).await,
            Request::UnknownCommand(name) => {
                info!("Unknown command {name}");
                replies::UNKNOWN_COMMAND.to_string()
            }
            Request::Text(text) => self.answer(&text).await,
        };
        format::truncate(&reply, self.config.max_response_length)
    }

    async fn handle_command(&self, command: Command) -> String {
        match command {
            Command::Start => replies::WELCOME.to_string(),
            Command::Help => format!("{}{}", replies::HELP_INTRO, Command::descriptions()),
            Command::Search(text) => self.search(text.trim()).await,
            Command::Query(payload) | Command::DbQuery(payload) => self.structured_query(payload.trim()).await,
            Command::AskAi(payload) => self.ask_ai(payload.trim()).await,
            Command::Nlu(text) => self.describe(text.trim()).await,
            Command::GetEmployees => self.list_employees().await,
            Command::AddEvent(payload) => self.add_event(payload.trim()).await,
            Command::AddTask(payload) => self.add_task(payload.trim()).await,
        }
    }

    /// Free text: classify, look up, compose.
    pub async fn answer(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return replies::EMPTY_MESSAGE.to_string();
        }

        let nlu = match self.nlu.understand(text).await {
            Ok(result) => result,
            Err(NluError::Llm(e)) => {
                warn!("Could not classify message: {e}");
                return replies::NOT_PROCESSED.to_string();
            }
            Err(NluError::Unrecognized(_)) => return replies::NOT_UNDERSTOOD.to_string(),
        };

        if !self.is_confident(&nlu) {
            return replies::NOT_UNDERSTOOD.to_string();
        }

        let context = self.lookup.fetch(nlu.intent, &nlu.entities).await;
        if context.missing_criteria {
            return format::specify_more(nlu.intent).to_string();
        }

        match self.composer.compose(&nlu, &context).await {
            Some(reply) => reply,
            None => match &context.error {
                Some(error) => format::backend_failure(error),
                None => replies::COMPOSE_FAILED.to_string(),
            },
        }
    }

    fn is_confident(&self, nlu: &NluResult) -> bool {
        if nlu.intent == Intent::Unknown {
            return false;
        }
        match nlu.confidence {
            Some(c) if c < self.config.confidence_threshold => {
                info!("Low confidence {c:.2} for {}", nlu.intent);
                false
            }
            _ => true,
        }
    }

    async fn describe(&self, text: &str) -> String {
        if text.is_empty() {
            return replies::NLU_USAGE.to_string();
        }
        match self.nlu.understand(text).await {
            Ok(result) => format::describe_nlu(&result),
            Err(NluError::Llm(_)) => replies::NOT_PROCESSED.to_string(),
            Err(NluError::Unrecognized(_)) => replies::NOT_UNDERSTOOD.to_string(),
        }
    }

    /// A ready-made classification: look up and format without the composer.
    async fn ask_ai(&self, payload: &str) -> String {
        if payload.is_empty() {
            return replies::ASK_AI_USAGE.to_string();
        }
        let Some(result) = nlu::validate(payload) else {
            return "Некорректный JSON намерения: нужен объект с полем intent из списка поддерживаемых.".to_string();
        };
        if matches!(result.intent, Intent::Unknown | Intent::GeneralQuestion) {
            return replies::GENERAL_QUESTION.to_string();
        }

        let context = self.lookup.fetch(result.intent, &result.entities).await;
        if context.missing_criteria {
            return format::specify_more(result.intent).to_string();
        }
        format::context_summary(result.intent, &context.query_params, &context)
    }

    async fn search(&self, text: &str) -> String {
        if text.is_empty() {
            return replies::SEARCH_USAGE.to_string();
        }

        let by = |table: Table, cols: &[&str]| {
            Query::select(table)
                .any_of(cols.iter().map(|c| Filter::ilike(*c, text)).collect())
                .limit(format::SEARCH_ROWS)
        };
        let employees = by(
            Table::Employees,
            &[columns::EMPLOYEE_NAME, columns::EMPLOYEE_DEPARTMENT, columns::EMPLOYEE_POSITION],
        );
        let events = by(Table::Events, &[columns::EVENT_TITLE, columns::EVENT_DESCRIPTION]);
        let tasks = by(Table::Tasks, &[columns::TASK_TITLE, columns::TASK_DESCRIPTION]);

        let (employees, events, tasks) = tokio::join!(
            self.backend.select(&employees),
            self.backend.select(&events),
            self.backend.select(&tasks),
        );

        let mut failed = Vec::new();
        let mut rows = |table: Table, result: Result<Vec<Row>, BackendError>| {
            result.unwrap_or_else(|e| {
                warn!("Search in {table} failed: {e}");
                failed.push(table);
                Vec::new()
            })
        };
        let (employees, events, tasks) = (
            rows(Table::Employees, employees),
            rows(Table::Events, events),
            rows(Table::Tasks, tasks),
        );

        let found = format::search_results(&employees, &events, &tasks);
        format::with_search_failures(found, &failed)
    }

    async fn structured_query(&self, payload: &str) -> String {
        if payload.is_empty() {
            return replies::QUERY_USAGE.to_string();
        }
        let query = match serde_json::from_str::<DatabaseQuery>(payload) {
            Ok(parsed) => match parsed.into_query() {
                Ok(query) => query,
                Err(e) => return format!("Ошибка в запросе: {e}"),
            },
            Err(e) => return format!("Ошибка разбора JSON: {e}"),
        };

        match self.backend.select(&query).await {
            Ok(rows) => format::rows_listing(query.table, &rows),
            Err(e) => {
                warn!("Structured query on {} failed: {e}", query.table);
                format!("Ошибка выполнения запроса: {e}")
            }
        }
    }

    async fn list_employees(&self) -> String {
        // All columns: schemas differ (job_title, department_name), `Employee` accepts both
        let query = Query::select(Table::Employees).order_by(columns::EMPLOYEE_NAME, Direction::Asc);
        match self.backend.select(&query).await {
            Ok(rows) => {
                info!("Listing {} employee(s)", rows.len());
                format::employee_list(&rows)
            }
            Err(e) => {
                warn!("Employee listing failed: {e}");
                format!("Не удалось получить список сотрудников: {e}")
            }
        }
    }

    async fn add_event(&self, payload: &str) -> String {
        if payload.is_empty() {
            return replies::ADD_EVENT_USAGE.to_string();
        }
        let row = match serde_json::from_str::<NewEvent>(payload) {
            Ok(event) => match event.into_row() {
                Ok(row) => row,
                Err(e) => return format!("Ошибка в данных мероприятия: {e}"),
            },
            Err(e) => return format!("Ошибка разбора JSON: {e}"),
        };
        self.insert(Table::Events, row, "✅ Мероприятие добавлено").await
    }

    async fn add_task(&self, payload: &str) -> String {
        if payload.is_empty() {
            return replies::ADD_TASK_USAGE.to_string();
        }
        let row = match serde_json::from_str::<NewTask>(payload) {
            Ok(task) => match task.into_row() {
                Ok(row) => row,
                Err(e) => return format!("Ошибка в данных задачи: {e}"),
            },
            Err(e) => return format!("Ошибка разбора JSON: {e}"),
        };
        self.insert(Table::Tasks, row, "✅ Задача добавлена").await
    }

    async fn insert(&self, table: Table, row: Row, done: &str) -> String {
        let title = row.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        match self.backend.insert(table, row).await {
            Ok(_) => {
                info!("Inserted into {table}: {title}");
                format!("{done}: {title}")
            }
            Err(e) => {
                warn!("Insert into {table} failed: {e}");
                format!("Не удалось сохранить запись: {e}")
            }
        }
    }
}

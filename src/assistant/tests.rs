//! End-to-end tests for the assistant, with scripted model and database stubs.
//!
//! Run with: cargo test assistant

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use teloxide::types::UserId;

use super::*;
use crate::assistant::format::replies;
use crate::auth::{AccessGate, DENIED_MESSAGE};
use crate::backend::{Backend, BackendError, Filter, Query, Row, Table};
use crate::llm::{ChatRequest, LlmClient, LlmError, RetryPolicy, Retrying};

// =============================================================================
// STUBS
// =============================================================================

/// Replays queued replies; repeats the last one when the queue runs dry.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Option<Result<String, LlmError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn request(&self, i: usize) -> ChatRequest {
        self.seen.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = next {
            *last = Some(reply);
        }
        last.clone().unwrap_or(Err(LlmError::Empty))
    }
}

/// Serves fixed rows per table and records every call.
#[derive(Default)]
struct RecordingBackend {
    rows: HashMap<Table, Vec<Row>>,
    failure: Option<BackendError>,
    /// Only selects on this table fail.
    down: Option<Table>,
    queries: Mutex<Vec<Query>>,
    inserts: Mutex<Vec<(Table, Row)>>,
}

impl RecordingBackend {
    fn with_rows(mut self, table: Table, rows: Vec<Value>) -> Self {
        self.rows.insert(table, rows.into_iter().map(row).collect());
        self
    }

    fn failing(error: BackendError) -> Self {
        Self { failure: Some(error), ..Self::default() }
    }

    fn with_table_down(mut self, table: Table) -> Self {
        self.down = Some(table);
        self
    }

    fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError> {
        self.queries.lock().unwrap().push(query.clone());
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        if self.down == Some(query.table) {
            return Err(BackendError::Timeout);
        }
        Ok(self.rows.get(&query.table).cloned().unwrap_or_default())
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Vec<Row>, BackendError> {
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        self.inserts.lock().unwrap().push((table, row.clone()));
        Ok(vec![row])
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn assistant_with(
    gate: AccessGate,
    llm: Arc<dyn LlmClient>,
    backend: Arc<RecordingBackend>,
) -> Assistant {
    Assistant::new(AssistantConfig::default(), gate, llm, backend)
}

fn open_assistant(llm: Arc<ScriptedLlm>, backend: Arc<RecordingBackend>) -> Assistant {
    assistant_with(AccessGate::default(), llm, backend)
}

const ME: Option<UserId> = Some(UserId(42));

fn text(s: &str) -> Request {
    Request::Text(s.to_string())
}

fn command(s: &str) -> Request {
    Request::parse(s, "staffbot")
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

mod authorization {
    use super::*;

    #[tokio::test]
    async fn test_unlisted_sender_gets_fixed_reply_without_model_calls() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{"intent":"task_info","entities":{}}"#.into())]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = assistant_with(AccessGate::new(HashSet::from([UserId(1)])), llm.clone(), backend.clone());

        let reply = assistant.handle(Some(UserId(2)), text("Какие задачи есть?")).await;
        assert_eq!(reply, DENIED_MESSAGE);
        assert_eq!(llm.calls(), 0);
        assert!(backend.queries().is_empty());

        let reply = assistant.handle(None, command("/get_employees")).await;
        assert_eq!(reply, DENIED_MESSAGE);
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_listed_sender_is_served() {
        let llm = ScriptedLlm::new(vec![]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = assistant_with(AccessGate::new(HashSet::from([UserId(1)])), llm, backend);

        assert_eq!(assistant.handle(Some(UserId(1)), command("/start")).await, replies::WELCOME);
    }
}

// =============================================================================
// FREE-TEXT PIPELINE
// =============================================================================

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn test_availability_by_department_and_date() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"intent":"availability","entities":{"department":"разработка","date":"20.05.2025"}}"#.into()),
            Ok("20.05.2025 в отделе разработки работает Анна.".into()),
        ]);
        let backend = Arc::new(RecordingBackend::default().with_rows(
            Table::Employees,
            vec![json!({"name": "Анна", "department": "Разработка", "position": "Backend"})],
        ));
        let assistant = open_assistant(llm.clone(), backend.clone());

        let reply = assistant.handle(ME, text("Кто из разработки работает 20.05.2025?")).await;
        assert_eq!(reply, "20.05.2025 в отделе разработки работает Анна.");

        let queries = backend.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].table, Table::Employees);
        assert_eq!(queries[0].filters, vec![Filter::ilike("department", "разработка")]);

        assert_eq!(llm.calls(), 2);
        let classify = llm.request(0);
        assert!(classify.json_mode);
        assert_eq!(classify.user, "Кто из разработки работает 20.05.2025?");

        let compose: Value = serde_json::from_str(&llm.request(1).user).unwrap();
        assert_eq!(compose["intent"], "availability");
        assert_eq!(compose["context"]["found"], true);
        assert_eq!(compose["context"]["data"][0]["name"], "Анна");
        assert_eq!(compose["context"]["query_params"]["date"], "20.05.2025");
    }

    #[tokio::test]
    async fn test_model_timeouts_are_retried_then_reported() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Timeout)]);
        let policy = RetryPolicy { max_attempts: 3, base_delay: Duration::ZERO, max_delay: Duration::ZERO };
        let retrying: Arc<dyn LlmClient> = Arc::new(Retrying::new(llm.clone(), policy));
        let backend = Arc::new(RecordingBackend::default());
        let assistant = assistant_with(AccessGate::default(), retrying, backend.clone());

        let reply = assistant.handle(ME, text("Где работает Иван?")).await;
        assert_eq!(reply, replies::NOT_PROCESSED);
        assert_eq!(llm.calls(), 3);
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_classification_is_not_understood() {
        let llm = ScriptedLlm::new(vec![Ok("Извините, я не уверен.".into())]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = open_assistant(llm.clone(), backend.clone());

        assert_eq!(assistant.handle(ME, text("ъъъ")).await, replies::NOT_UNDERSTOOD);
        assert_eq!(llm.calls(), 1);
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_intent_and_low_confidence_are_not_understood() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"intent":"unknown","entities":{}}"#.into()),
            Ok(r#"{"intent":"find_employee","entities":{"employee_name":"Иван"},"confidence":0.1}"#.into()),
        ]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = open_assistant(llm.clone(), backend.clone());

        assert_eq!(assistant.handle(ME, text("погода?")).await, replies::NOT_UNDERSTOOD);
        assert_eq!(assistant.handle(ME, text("Иван?")).await, replies::NOT_UNDERSTOOD);
        assert_eq!(llm.calls(), 2);
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_missing_criteria_asks_for_more() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{"intent":"find_by_department","entities":{}}"#.into())]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = open_assistant(llm.clone(), backend.clone());

        let reply = assistant.handle(ME, text("Кто работает в отделе?")).await;
        assert_eq!(reply, format::specify_more(crate::nlu::Intent::FindByDepartment));
        assert_eq!(llm.calls(), 1);
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_found_is_still_composed() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"intent":"find_employee","entities":{"employee_name":"Пётр"}}"#.into()),
            Ok("Сотрудник с именем Пётр не найден.".into()),
        ]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = open_assistant(llm.clone(), backend);

        let reply = assistant.handle(ME, text("Где работает Пётр?")).await;
        assert_eq!(reply, "Сотрудник с именем Пётр не найден.");

        let compose: Value = serde_json::from_str(&llm.request(1).user).unwrap();
        assert_eq!(compose["context"]["found"], false);
        assert_eq!(compose["context"]["data"], json!([]));
    }

    #[tokio::test]
    async fn test_backend_failure_when_composer_also_fails() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"intent":"task_info","entities":{"project":"CRM"}}"#.into()),
            Err(LlmError::Status { status: 400, body: "bad request".into() }),
        ]);
        let backend = Arc::new(RecordingBackend::failing(BackendError::Timeout));
        let assistant = open_assistant(llm, backend);

        let reply = assistant.handle(ME, text("Задачи по CRM?")).await;
        assert_eq!(reply, format::backend_failure("query timed out"));
    }

    #[tokio::test]
    async fn test_composer_failure_without_backend_error() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"intent":"event_info","entities":{}}"#.into()),
            Ok("<think>...</think>".into()),
        ]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = open_assistant(llm, backend);

        assert_eq!(assistant.handle(ME, text("Какие мероприятия?")).await, replies::COMPOSE_FAILED);
    }

    #[tokio::test]
    async fn test_general_question_is_composed_without_lookup() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"intent":"general_question","entities":{}}"#.into()),
            Ok("Я помогаю с информацией о сотрудниках, мероприятиях и задачах.".into()),
        ]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = open_assistant(llm.clone(), backend.clone());

        let reply = assistant.handle(ME, text("Что ты умеешь?")).await;
        assert!(reply.starts_with("Я помогаю"));
        assert_eq!(llm.calls(), 2);
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_reply_is_truncated() {
        let long = "а".repeat(5000);
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"intent":"general_question","entities":{}}"#.into()),
            Ok(long),
        ]);
        let assistant = open_assistant(llm, Arc::new(RecordingBackend::default()));

        let reply = assistant.handle(ME, text("Расскажи всё")).await;
        assert_eq!(reply.chars().count(), AssistantConfig::default().max_response_length);
        assert!(reply.ends_with('…'));
    }

    #[tokio::test]
    async fn test_blank_message() {
        let llm = ScriptedLlm::new(vec![]);
        let assistant = open_assistant(llm.clone(), Arc::new(RecordingBackend::default()));

        assert_eq!(assistant.handle(ME, text("   ")).await, replies::EMPTY_MESSAGE);
        assert_eq!(llm.calls(), 0);
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

mod commands {
    use super::*;

    fn quiet() -> (Assistant, Arc<ScriptedLlm>, Arc<RecordingBackend>) {
        let llm = ScriptedLlm::new(vec![]);
        let backend = Arc::new(
            RecordingBackend::default()
                .with_rows(
                    Table::Employees,
                    vec![json!({"name": "Иван Петров", "department": "Разработка", "position": "Тимлид", "phone_number": "+7 900 000-00-00"})],
                )
                .with_rows(Table::Tasks, vec![json!({"title": "Отчёт", "status": "pending", "priority": "high"})]),
        );
        (open_assistant(llm.clone(), backend.clone()), llm, backend)
    }

    #[tokio::test]
    async fn test_help_lists_commands() {
        let (assistant, _, _) = quiet();
        let reply = assistant.handle(ME, command("/help")).await;
        assert!(reply.starts_with(replies::HELP_INTRO));
        for name in ["/search", "/query", "/get_employees", "/add_task"] {
            assert!(reply.contains(name), "help lacks {name}");
        }
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (assistant, llm, _) = quiet();
        assert_eq!(assistant.handle(ME, command("/weather")).await, replies::UNKNOWN_COMMAND);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_usage_hints_for_empty_arguments() {
        let (assistant, _, backend) = quiet();
        assert_eq!(assistant.handle(ME, command("/search")).await, replies::SEARCH_USAGE);
        assert_eq!(assistant.handle(ME, command("/query")).await, replies::QUERY_USAGE);
        assert_eq!(assistant.handle(ME, command("/add_event")).await, replies::ADD_EVENT_USAGE);
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_search_queries_all_three_tables() {
        let (assistant, llm, backend) = quiet();
        let reply = assistant.handle(ME, command("/search отчёт")).await;

        assert!(reply.contains("👥 Найденные сотрудники:\n- Иван Петров (Тимлид), Разработка"));
        assert!(reply.contains("📋 Найденные задачи:\n- Отчёт [pending], приоритет: high"));
        assert_eq!(llm.calls(), 0);

        let queries = backend.queries();
        let tables: HashSet<Table> = queries.iter().map(|q| q.table).collect();
        assert_eq!(tables, HashSet::from([Table::Employees, Table::Events, Table::Tasks]));
        for query in &queries {
            assert_eq!(query.limit, Some(format::SEARCH_ROWS));
            assert!(!query.any_of.is_empty());
            assert!(query.any_of.iter().all(|f| f.value == crate::backend::FilterValue::Text("отчёт".into())));
        }
    }

    #[tokio::test]
    async fn test_search_without_matches() {
        let llm = ScriptedLlm::new(vec![]);
        let assistant = open_assistant(llm, Arc::new(RecordingBackend::default()));
        assert_eq!(assistant.handle(ME, command("/search xyz")).await, replies::NOTHING_FOUND);
    }

    #[tokio::test]
    async fn test_search_reports_a_failed_table() {
        let llm = ScriptedLlm::new(vec![]);
        let backend = Arc::new(RecordingBackend::default().with_table_down(Table::Employees));
        let assistant = open_assistant(llm, backend);

        let reply = assistant.handle(ME, command("/search Иван")).await;
        assert_ne!(reply, replies::NOTHING_FOUND);
        assert!(reply.starts_with("😔"), "{reply}");
        assert!(reply.contains("employees"), "{reply}");
    }

    #[tokio::test]
    async fn test_search_keeps_results_when_one_table_fails() {
        let llm = ScriptedLlm::new(vec![]);
        let backend = Arc::new(
            RecordingBackend::default()
                .with_rows(Table::Tasks, vec![json!({"title": "Отчёт", "status": "pending"})])
                .with_table_down(Table::Events),
        );
        let assistant = open_assistant(llm, backend);

        let reply = assistant.handle(ME, command("/search отчёт")).await;
        assert!(reply.contains("📋 Найденные задачи:\n- Отчёт [pending]"), "{reply}");
        assert!(reply.ends_with("⚠️ Поиск не выполнен в таблицах: events"), "{reply}");
    }

    #[tokio::test]
    async fn test_structured_query() {
        let (assistant, _, backend) = quiet();
        let reply = assistant
            .handle(ME, command(r#"/query {"table": "tasks", "filters": [{"column": "priority", "operator": "eq", "value": "high"}], "limit": 5}"#))
            .await;
        assert!(reply.contains("'tasks'"));
        assert!(reply.contains("title: Отчёт"));

        let queries = backend.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].filters, vec![Filter::eq("priority", "high")]);
        assert_eq!(queries[0].limit, Some(5));
    }

    #[tokio::test]
    async fn test_structured_query_rejects_bad_input() {
        let (assistant, _, backend) = quiet();
        let reply = assistant.handle(ME, command(r#"/db_query {"table": "salaries"}"#)).await;
        assert!(reply.starts_with("Ошибка в запросе"), "{reply}");

        let reply = assistant.handle(ME, command("/db_query {not json")).await;
        assert!(reply.starts_with("Ошибка разбора JSON"), "{reply}");
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_get_employees() {
        let (assistant, _, backend) = quiet();
        let reply = assistant.handle(ME, command("/get_employees")).await;
        assert!(reply.starts_with("👥 Список сотрудников:"));
        assert!(reply.contains("Иван Петров"));
        assert!(reply.contains("📞 Телефон: +7 900 000-00-00"));
        assert!(reply.contains("✉️ Email: —"));

        let queries = backend.queries();
        assert_eq!(queries[0].columns, "*");
        assert_eq!(queries[0].order, Some(("name".to_string(), crate::backend::Direction::Asc)));
    }

    #[tokio::test]
    async fn test_get_employees_reads_alternate_column_names() {
        let llm = ScriptedLlm::new(vec![]);
        let backend = Arc::new(RecordingBackend::default().with_rows(
            Table::Employees,
            vec![json!({"name": "Ольга", "department_name": "Маркетинг", "job_title": "Аналитик", "hire_date": "2023-02-01"})],
        ));
        let assistant = open_assistant(llm, backend);

        let reply = assistant.handle(ME, command("/get_employees")).await;
        assert!(reply.contains("Отдел: Маркетинг"), "{reply}");
        assert!(reply.contains("Должность: Аналитик"), "{reply}");
    }

    #[tokio::test]
    async fn test_add_task_applies_defaults() {
        let (assistant, _, backend) = quiet();
        let reply = assistant
            .handle(ME, command(r#"/add_task {"title": "Подготовить отчёт", "due_date": "01.06.2025"}"#))
            .await;
        assert_eq!(reply, "✅ Задача добавлена: Подготовить отчёт");

        let inserts = backend.inserts.lock().unwrap();
        let (table, row) = &inserts[0];
        assert_eq!(*table, Table::Tasks);
        assert_eq!(row["status"], "pending");
        assert_eq!(row["priority"], "medium");
        assert_eq!(row["due_date"], "2025-06-01");
    }

    #[tokio::test]
    async fn test_add_event_rejects_bad_date() {
        let (assistant, _, backend) = quiet();
        let reply = assistant
            .handle(ME, command(r#"/add_event {"title": "Тимбилдинг", "date": "завтра"}"#))
            .await;
        assert!(reply.starts_with("Ошибка в данных мероприятия"), "{reply}");
        assert!(backend.inserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_event_backend_failure() {
        let llm = ScriptedLlm::new(vec![]);
        let backend = Arc::new(RecordingBackend::failing(BackendError::Api {
            status: 401,
            message: "Invalid API key".into(),
        }));
        let assistant = open_assistant(llm, backend);
        let reply = assistant
            .handle(ME, command(r#"/add_event {"title": "Тимбилдинг", "date": "20.05.2025"}"#))
            .await;
        assert!(reply.starts_with("Не удалось сохранить запись"), "{reply}");
    }

    #[tokio::test]
    async fn test_ask_ai_formats_lookup_without_model() {
        let (assistant, llm, backend) = quiet();
        let reply = assistant
            .handle(ME, command(r#"/ask_ai {"intent": "availability", "entities": {"department": "разработка"}}"#))
            .await;
        assert!(reply.starts_with("Проверка доступности в отделе разработка:"), "{reply}");
        assert!(reply.contains("- Иван Петров: предположительно доступен"));
        assert_eq!(llm.calls(), 0);
        assert_eq!(backend.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_nlu_describes_classification() {
        let llm = ScriptedLlm::new(vec![Ok(
            r#"{"intent":"event_info","entities":{"date":"01.06.2025"},"confidence":0.8}"#.into(),
        )]);
        let backend = Arc::new(RecordingBackend::default());
        let assistant = open_assistant(llm, backend.clone());

        let reply = assistant.handle(ME, command("/nlu Что будет 01.06.2025?")).await;
        assert_eq!(reply, "Распознано намерение: event_info\nСущности:\n- date: 01.06.2025\nУверенность: 0.80");
        assert!(backend.queries().is_empty());
    }
}

//! Reply texts and row formatting.

use serde_json::Value;

use crate::backend::models::from_row;
use crate::backend::{Employee, Event, Row, Table, Task};
use crate::context::ContextData;
use crate::nlu::{Entities, Intent, NluResult};

/// Listings stop growing past this many characters.
const LISTING_BUDGET: usize = 3800;

/// Rows shown per table in search results.
pub const SEARCH_ROWS: usize = 5;

pub mod replies {
    pub const WELCOME: &str = "👋 Привет! Я корпоративный бот-ассистент.\n\n\
        🔍 Я помогу вам:\n\
        - Найти информацию о сотрудниках\n\
        - Узнать о мероприятиях\n\
        - Отслеживать задачи\n\n\
        💡 Основные команды:\n\
        /search - Поиск по ключевому слову\n\
        /help - Подробная справка\n\n\
        ✨ Вы можете написать мне свой вопрос, и я постараюсь помочь!";

    pub const HELP_INTRO: &str = "Напишите вопрос обычным текстом, например:\n\
        - Кто из разработки работает 20.05.2025?\n\
        - Какие мероприятия запланированы на 01.06.2025?\n\
        - Какие задачи есть по проекту CRM?\n\n";

    pub const SEARCH_USAGE: &str = "🔍 Отправьте поисковый запрос после команды.\n\
        Например:\n\
        - /search разработка\n\
        - /search тимбилдинг\n\
        - /search отчёт";

    pub const QUERY_USAGE: &str = "🤖 Отправьте JSON-запрос к базе после команды.\n\n\
        Например:\n\
        /query {\"table\": \"tasks\", \"filters\": [{\"column\": \"priority\", \"operator\": \"eq\", \"value\": \"high\"}], \"limit\": 5}\n\n\
        Таблицы: employees, events, tasks.";

    pub const ASK_AI_USAGE: &str = "Отправьте JSON намерения после команды, например:\n\
        /ask_ai {\"intent\": \"find_employee\", \"entities\": {\"department\": \"разработка\"}}";

    pub const NLU_USAGE: &str = "Отправьте текст после команды, например: /nlu Кто работает в отделе маркетинга?";

    pub const ADD_EVENT_USAGE: &str = "Отправьте JSON мероприятия после команды, например:\n\
        /add_event {\"title\": \"Тимбилдинг\", \"date\": \"20.05.2025\", \"time\": \"18:00\", \"location\": \"Офис\", \"type\": \"team_building\"}";

    pub const ADD_TASK_USAGE: &str = "Отправьте JSON задачи после команды, например:\n\
        /add_task {\"title\": \"Подготовить отчёт\", \"due_date\": \"01.06.2025\", \"priority\": \"high\", \"project\": \"CRM\"}";

    pub const NOT_UNDERSTOOD: &str = "🤔 Не понял запрос. Попробуйте переформулировать.";

    pub const NOT_PROCESSED: &str = "😔 Не удалось обработать запрос. Попробуйте позже.";

    pub const COMPOSE_FAILED: &str = "😔 Извините, не удалось сформировать ответ. Попробуйте позже.";

    pub const NOTHING_FOUND: &str = "🤔 По вашему запросу ничего не найдено.";

    pub const UNKNOWN_COMMAND: &str = "Неизвестная команда. Список команд: /help";

    pub const EMPTY_MESSAGE: &str = "Напишите вопрос текстом.";

    pub const GENERAL_QUESTION: &str =
        "Я отвечаю на вопросы о сотрудниках, мероприятиях и задачах. Попробуйте переформулировать запрос.";
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Ask for the criteria an intent needs.
pub fn specify_more(intent: Intent) -> &'static str {
    match intent {
        Intent::FindByPosition => "Уточните, пожалуйста, должность для поиска.",
        Intent::FindByDepartment => "Уточните, пожалуйста, отдел для поиска.",
        Intent::Availability => "Чтобы проверить доступность, укажите сотрудника или отдел.",
        _ => "Уточните, пожалуйста, имя сотрудника, отдел или должность.",
    }
}

pub fn backend_failure(error: &str) -> String {
    format!("😔 Не удалось получить данные из базы: {error}")
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => "—".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("—")
}

/// Numbered lines, stopping once the budget is spent.
fn numbered<I: IntoIterator<Item = String>>(header: String, lines: I) -> String {
    let mut out = header;
    for (i, line) in lines.into_iter().enumerate() {
        if out.chars().count() > LISTING_BUDGET {
            out.push_str("\n... (данных слишком много, показана часть)");
            break;
        }
        out.push_str(&format!("{}. {}\n", i + 1, line));
    }
    out
}

/// Generic `N. column: value, …` listing used for structured queries.
pub fn rows_listing(table: Table, rows: &[Row]) -> String {
    if rows.is_empty() {
        return format!("По запросу к таблице '{table}' ничего не найдено.");
    }
    let lines = rows.iter().map(|row| {
        row.iter()
            .map(|(k, v)| format!("{k}: {}", text(v)))
            .collect::<Vec<_>>()
            .join(", ")
    });
    numbered(format!("📊 Результаты из таблицы '{table}':\n\n"), lines)
}

pub fn employee_list(rows: &[Row]) -> String {
    let employees: Vec<Employee> = rows.iter().filter_map(from_row).collect();
    if employees.is_empty() {
        return "В таблице сотрудников нет данных.".to_string();
    }
    let lines = employees.iter().map(|e| {
        format!(
            "🧑‍💼 {}\n   Отдел: {}\n   Должность: {}\n   📞 Телефон: {}\n   ✉️ Email: {}\n   📅 Дата приёма: {}\n",
            e.name,
            or_dash(&e.department),
            or_dash(&e.position),
            or_dash(&e.phone_number),
            or_dash(&e.email),
            or_dash(&e.hire_date),
        )
    });
    numbered("👥 Список сотрудников:\n\n".to_string(), lines)
}

fn employee_line(e: &Employee) -> String {
    match (&e.position, &e.department) {
        (Some(p), Some(d)) => format!("- {} ({p}), {d}", e.name),
        (Some(p), None) => format!("- {} ({p})", e.name),
        (None, Some(d)) => format!("- {} ({d})", e.name),
        (None, None) => format!("- {}", e.name),
    }
}

fn event_line(e: &Event) -> String {
    let mut line = format!("- {}", e.title);
    if let Some(date) = &e.date {
        line.push_str(&format!(" ({date}"));
        if let Some(time) = &e.time {
            line.push_str(&format!(" {time}"));
        }
        line.push(')');
    }
    if let Some(location) = &e.location {
        line.push_str(&format!(", {location}"));
    }
    line
}

fn task_line(t: &Task) -> String {
    let mut line = format!("- {} [{}]", t.title, or_dash(&t.status));
    if let Some(priority) = &t.priority {
        line.push_str(&format!(", приоритет: {priority}"));
    }
    if let Some(due) = &t.due_date {
        line.push_str(&format!(", срок: {due}"));
    }
    line
}

fn section<T, F>(title: &str, rows: &[Row], line: F) -> Option<String>
where
    T: for<'de> serde::Deserialize<'de>,
    F: Fn(&T) -> String,
{
    let items: Vec<T> = rows.iter().filter_map(from_row).take(SEARCH_ROWS).collect();
    if items.is_empty() {
        return None;
    }
    let lines: Vec<String> = items.iter().map(line).collect();
    Some(format!("{title}\n{}", lines.join("\n")))
}

/// Keyword search results; `None` when nothing matched.
pub fn search_results(employees: &[Row], events: &[Row], tasks: &[Row]) -> Option<String> {
    let sections: Vec<String> = [
        section("👥 Найденные сотрудники:", employees, employee_line),
        section("📅 Найденные мероприятия:", events, event_line),
        section("📋 Найденные задачи:", tasks, task_line),
    ]
    .into_iter()
    .flatten()
    .collect();

    (!sections.is_empty()).then(|| sections.join("\n\n"))
}

/// Search reply, naming the tables whose query failed.
pub fn with_search_failures(found: Option<String>, failed: &[Table]) -> String {
    if failed.is_empty() {
        return found.unwrap_or_else(|| replies::NOTHING_FOUND.to_string());
    }
    let names = failed.iter().map(Table::as_str).collect::<Vec<_>>().join(", ");
    match found {
        Some(found) => format!("{found}\n\n⚠️ Поиск не выполнен в таблицах: {names}"),
        None => format!("😔 Произошла ошибка при поиске (таблицы: {names}). Попробуйте позже."),
    }
}

/// Deterministic rendering of a lookup, without the composer.
pub fn context_summary(intent: Intent, entities: &Entities, context: &ContextData) -> String {
    if let Some(error) = &context.error {
        return backend_failure(error);
    }
    if !context.found {
        return replies::NOTHING_FOUND.to_string();
    }

    match intent {
        Intent::Availability => {
            let mut intro = "Проверка доступности".to_string();
            if let Some(name) = entities.get("employee_name") {
                intro.push_str(&format!(" для {name}"));
            } else if let Some(department) = entities.get("department") {
                intro.push_str(&format!(" в отделе {department}"));
            }
            if let Some(date) = entities.get("date") {
                intro.push_str(&format!(" на {date}"));
            }
            let lines: Vec<String> = context
                .data
                .iter()
                .filter_map(from_row::<Employee>)
                .map(|e| format!("- {}: предположительно доступен (требуется проверка)", e.name))
                .collect();
            let mut out = format!("{intro}:\n{}", lines.join("\n"));
            if !entities.contains_key("date") {
                out.push_str("\n\n(Дата не указана, доступность на конкретный день не проверена)");
            }
            out
        }
        Intent::EventInfo => section("📅 Мероприятия:", &context.data, event_line)
            .unwrap_or_else(|| replies::NOTHING_FOUND.to_string()),
        Intent::TaskInfo => section("📋 Задачи:", &context.data, task_line)
            .unwrap_or_else(|| replies::NOTHING_FOUND.to_string()),
        _ => section("👥 Найденные сотрудники:", &context.data, employee_line)
            .unwrap_or_else(|| replies::NOTHING_FOUND.to_string()),
    }
}

/// What `/nlu` shows.
pub fn describe_nlu(result: &NluResult) -> String {
    let mut out = format!("Распознано намерение: {}", result.intent);
    if result.entities.is_empty() {
        out.push_str("\nСущности: нет");
    } else {
        out.push_str("\nСущности:");
        for (key, value) in &result.entities {
            out.push_str(&format!("\n- {key}: {value}"));
        }
    }
    if let Some(confidence) = result.confidence {
        out.push_str(&format!("\nУверенность: {confidence:.2}"));
    }
    out
}
